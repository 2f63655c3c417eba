// Local usage statistics, appended as JSON lines next to the settings file

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::config::AnalyticsSettings;
use crate::platform::Platform;

pub const ANALYTICS_FILE_NAME: &str = "analytics.jsonl";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    AppStart,
    Download {
        platform: Platform,
        success: bool,
        file_count: usize,
    },
    Error {
        error_type: String,
        platform: Option<Platform>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(flatten)]
    pub kind: EventKind,
    pub timestamp: String,
    pub session_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageStats {
    pub app_starts: usize,
    pub total_downloads: usize,
    pub successful_downloads: usize,
    pub files_downloaded: usize,
    pub errors: usize,
    pub platforms_used: BTreeSet<Platform>,
    pub first_event: Option<String>,
    pub last_event: Option<String>,
}

pub struct Analytics {
    path: PathBuf,
    settings: AnalyticsSettings,
    session_id: String,
}

impl Analytics {
    pub fn new(config_dir: &Path, settings: &AnalyticsSettings) -> Self {
        Self {
            path: config_dir.join(ANALYTICS_FILE_NAME),
            settings: settings.clone(),
            session_id: session_id(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn track_app_start(&self) {
        self.record(EventKind::AppStart);
    }

    pub fn track_download(&self, platform: Platform, success: bool, file_count: usize) {
        self.record(EventKind::Download {
            platform,
            success,
            file_count,
        });
    }

    pub fn track_error(&self, error_type: &str, platform: Option<Platform>) {
        if self.settings.track_errors {
            self.record(EventKind::Error {
                error_type: error_type.to_string(),
                platform,
            });
        }
    }

    /// Tracking never fails the caller; problems are only logged
    fn record(&self, kind: EventKind) {
        if !self.settings.enabled {
            return;
        }
        let event = Event {
            kind,
            timestamp: OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default(),
            session_id: self.session_id.clone(),
        };
        if let Err(e) = self.append(&event) {
            warn!("Could not record analytics event: {}", e);
        }
    }

    fn append(&self, event: &Event) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(event)?;
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", line)
    }

    pub fn events(&self) -> io::Result<Vec<Event>> {
        let file = match fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut events = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(&line) {
                Ok(event) => events.push(event),
                Err(e) => debug!("Skipping malformed analytics line: {}", e),
            }
        }
        Ok(events)
    }

    pub fn usage_stats(&self) -> io::Result<UsageStats> {
        let events = self.events()?;
        let mut stats = UsageStats {
            first_event: events.first().map(|e| e.timestamp.clone()),
            last_event: events.last().map(|e| e.timestamp.clone()),
            ..UsageStats::default()
        };

        for event in &events {
            match &event.kind {
                EventKind::AppStart => stats.app_starts += 1,
                EventKind::Download {
                    platform,
                    success,
                    file_count,
                } => {
                    stats.total_downloads += 1;
                    stats.platforms_used.insert(*platform);
                    if *success {
                        stats.successful_downloads += 1;
                        stats.files_downloaded += file_count;
                    }
                }
                EventKind::Error { platform, .. } => {
                    stats.errors += 1;
                    if let Some(p) = platform {
                        stats.platforms_used.insert(*p);
                    }
                }
            }
        }
        Ok(stats)
    }
}

/// Short anonymous id for grouping events of one run
fn session_id() -> String {
    let mut hasher = Sha256::new();
    hasher.update(std::process::id().to_le_bytes());
    hasher.update(OffsetDateTime::now_utc().unix_timestamp_nanos().to_le_bytes());
    hex::encode(hasher.finalize())[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn enabled() -> AnalyticsSettings {
        AnalyticsSettings {
            enabled: true,
            track_errors: true,
        }
    }

    #[test]
    fn test_disabled_records_nothing() {
        let tmp = tempdir().unwrap();
        let analytics = Analytics::new(tmp.path(), &AnalyticsSettings::default());
        analytics.track_app_start();
        analytics.track_download(Platform::Youtube, true, 1);
        assert!(!analytics.path().exists());
        assert_eq!(analytics.usage_stats().unwrap(), UsageStats::default());
    }

    #[test]
    fn test_usage_stats() {
        let tmp = tempdir().unwrap();
        let analytics = Analytics::new(tmp.path(), &enabled());
        analytics.track_app_start();
        analytics.track_download(Platform::Reddit, true, 12);
        analytics.track_download(Platform::Youtube, false, 0);
        analytics.track_error("network_timeout", Some(Platform::Instagram));

        let stats = analytics.usage_stats().unwrap();
        assert_eq!(stats.app_starts, 1);
        assert_eq!(stats.total_downloads, 2);
        assert_eq!(stats.successful_downloads, 1);
        assert_eq!(stats.files_downloaded, 12);
        assert_eq!(stats.errors, 1);
        assert_eq!(
            stats.platforms_used.into_iter().collect::<Vec<_>>(),
            vec![Platform::Youtube, Platform::Instagram, Platform::Reddit]
        );
        assert!(stats.first_event.is_some());
    }

    #[test]
    fn test_error_tracking_can_be_disabled() {
        let tmp = tempdir().unwrap();
        let settings = AnalyticsSettings {
            enabled: true,
            track_errors: false,
        };
        let analytics = Analytics::new(tmp.path(), &settings);
        analytics.track_error("blocked", None);
        assert!(analytics.events().unwrap().is_empty());
    }

    #[test]
    fn test_event_line_format() {
        let tmp = tempdir().unwrap();
        let analytics = Analytics::new(tmp.path(), &enabled());
        analytics.track_download(Platform::Redgifs, true, 3);

        let raw = fs::read_to_string(analytics.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(raw.trim()).unwrap();
        assert_eq!(value["event"], "download");
        assert_eq!(value["platform"], "redgifs");
        assert_eq!(value["session_id"].as_str().map(str::len), Some(8));
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let tmp = tempdir().unwrap();
        let analytics = Analytics::new(tmp.path(), &enabled());
        analytics.track_app_start();
        let mut file = OpenOptions::new().append(true).open(analytics.path()).unwrap();
        writeln!(file, "not json").unwrap();
        analytics.track_app_start();
        assert_eq!(analytics.events().unwrap().len(), 2);
    }
}
