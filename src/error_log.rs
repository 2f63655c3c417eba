// Persistent history of failed downloads, kept as JSON lines next to the
// analytics file. Used for `smd errors stats` and exported reports.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};
use tracing::{debug, error, info, warn};

use crate::downloader::DownloadError;
use crate::platform::Platform;

pub const ERROR_LOG_FILE_NAME: &str = "errors.jsonl";

/// Records included verbatim in an exported report
pub const RECENT_LIMIT: usize = 100;

const MOST_COMMON_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Authentication,
    FileSystem,
    Parsing,
    PlatformSpecific,
    Configuration,
    System,
    UserInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ErrorCategory {
    pub fn of(error: &DownloadError) -> Self {
        match error {
            DownloadError::NetworkTimeout => Self::Network,
            DownloadError::Http { status: 401 | 403, .. } | DownloadError::Blocked(_) => Self::Authentication,
            DownloadError::Http { .. } => Self::Network,
            DownloadError::ToolNotFound(_) => Self::System,
            DownloadError::InvalidUrl(_) | DownloadError::UnsupportedUrl(_) | DownloadError::Cancelled => {
                Self::UserInput
            }
            DownloadError::ParseError(_) => Self::Parsing,
            DownloadError::Io(_) => Self::FileSystem,
            DownloadError::PlatformDisabled(_) | DownloadError::LicenseRequired(_) => Self::Configuration,
            DownloadError::ExecutionError(_) | DownloadError::Unknown(_) => Self::PlatformSpecific,
        }
    }
}

impl ErrorSeverity {
    pub fn of(error: &DownloadError) -> Self {
        match error {
            DownloadError::Cancelled => Self::Low,
            DownloadError::ToolNotFound(_) | DownloadError::Io(_) => Self::High,
            _ => Self::Medium,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: String,
    pub error_type: String,
    pub message: String,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub platform: Option<Platform>,
    /// Free-form origin, e.g. "download #3"
    pub context: Option<String>,
}

impl ErrorRecord {
    pub fn new(error: &DownloadError, platform: Option<Platform>, context: Option<String>) -> Self {
        Self {
            timestamp: OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default(),
            error_type: error.kind().to_string(),
            message: error.to_string(),
            category: ErrorCategory::of(error),
            severity: ErrorSeverity::of(error),
            platform,
            context,
        }
    }

    fn time(&self) -> Option<OffsetDateTime> {
        OffsetDateTime::parse(&self.timestamp, &Rfc3339).ok()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorTypeStats {
    pub count: usize,
    pub first_seen: String,
    pub last_seen: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorTrend {
    pub last_hour: usize,
    pub previous_period: usize,
    pub increasing: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorStats {
    pub total_errors: usize,
    pub unique_error_types: usize,
    /// Most frequent error types, highest count first
    pub most_common_errors: Vec<(String, ErrorTypeStats)>,
    pub category_breakdown: BTreeMap<ErrorCategory, usize>,
    pub severity_breakdown: BTreeMap<ErrorSeverity, usize>,
    pub platform_breakdown: BTreeMap<Platform, usize>,
    pub trend: ErrorTrend,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorPatterns {
    /// "a -> b" for consecutive error types
    pub sequences: BTreeMap<String, usize>,
    /// UTC hour of day to error count
    pub hourly_distribution: BTreeMap<u8, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub generated_at: String,
    pub statistics: ErrorStats,
    pub recent_errors: Vec<ErrorRecord>,
    pub patterns: ErrorPatterns,
}

pub struct ErrorLog {
    path: PathBuf,
}

impl ErrorLog {
    pub fn new(config_dir: &Path) -> Self {
        Self {
            path: config_dir.join(ERROR_LOG_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one failure. Never fails the caller.
    pub fn record(&self, error: &DownloadError, platform: Option<Platform>, context: Option<String>) {
        let record = ErrorRecord::new(error, platform, context);
        match record.severity {
            ErrorSeverity::Critical => error!("[{:?}] {}: {}", record.category, record.error_type, record.message),
            ErrorSeverity::High | ErrorSeverity::Medium => {
                debug!("[{:?}] {}: {}", record.category, record.error_type, record.message)
            }
            ErrorSeverity::Low => debug!("{}: {}", record.error_type, record.message),
        }
        if let Err(e) = self.append(&record) {
            warn!("Could not record error history: {}", e);
        }
    }

    fn append(&self, record: &ErrorRecord) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(record)?;
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", line)
    }

    pub fn records(&self) -> io::Result<Vec<ErrorRecord>> {
        let file = match fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ErrorRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => debug!("Skipping malformed error record: {}", e),
            }
        }
        Ok(records)
    }

    pub fn error_stats(&self) -> io::Result<ErrorStats> {
        Ok(stats_at(&self.records()?, OffsetDateTime::now_utc()))
    }

    /// Write statistics, recent errors and patterns as pretty JSON
    pub fn export_report(&self, dest: &Path) -> io::Result<ErrorReport> {
        let records = self.records()?;
        let now = OffsetDateTime::now_utc();
        let report = ErrorReport {
            generated_at: now.format(&Rfc3339).unwrap_or_default(),
            statistics: stats_at(&records, now),
            patterns: patterns(&records),
            recent_errors: records[records.len().saturating_sub(RECENT_LIMIT)..].to_vec(),
        };
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(dest, serde_json::to_string_pretty(&report)?)?;
        info!("Error report exported to {}", dest.display());
        Ok(report)
    }

    pub fn clear(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!("Error history cleared");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn stats_at(records: &[ErrorRecord], now: OffsetDateTime) -> ErrorStats {
    let mut stats = ErrorStats {
        total_errors: records.len(),
        ..ErrorStats::default()
    };
    let mut by_type: BTreeMap<String, ErrorTypeStats> = BTreeMap::new();
    let hour_ago = now - Duration::HOUR;

    for record in records {
        let entry = by_type.entry(record.error_type.clone()).or_insert_with(|| ErrorTypeStats {
            first_seen: record.timestamp.clone(),
            ..ErrorTypeStats::default()
        });
        entry.count += 1;
        entry.last_seen = record.timestamp.clone();

        *stats.category_breakdown.entry(record.category).or_default() += 1;
        *stats.severity_breakdown.entry(record.severity).or_default() += 1;
        if let Some(p) = record.platform {
            *stats.platform_breakdown.entry(p).or_default() += 1;
        }
        match record.time() {
            Some(t) if t > hour_ago => stats.trend.last_hour += 1,
            _ => stats.trend.previous_period += 1,
        }
    }
    stats.trend.increasing = stats.trend.last_hour > stats.trend.previous_period;

    stats.unique_error_types = by_type.len();
    let mut common: Vec<(String, ErrorTypeStats)> = by_type.into_iter().collect();
    // Stable sort keeps ties in name order
    common.sort_by(|a, b| b.1.count.cmp(&a.1.count));
    common.truncate(MOST_COMMON_LIMIT);
    stats.most_common_errors = common;
    stats
}

fn patterns(records: &[ErrorRecord]) -> ErrorPatterns {
    let mut patterns = ErrorPatterns::default();
    for pair in records.windows(2) {
        let sequence = format!("{} -> {}", pair[0].error_type, pair[1].error_type);
        *patterns.sequences.entry(sequence).or_default() += 1;
    }
    for t in records.iter().filter_map(ErrorRecord::time) {
        *patterns.hourly_distribution.entry(t.hour()).or_default() += 1;
    }
    patterns
}
