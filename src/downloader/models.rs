// Common data models for the dispatch layer

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::PlatformProfile;
use crate::platform::Platform;

/// Metadata for a single post, video, gallery or listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub id: String,
    pub title: String,
    pub uploader: String,
    pub duration_secs: Option<f64>,
    pub thumbnail: Option<String>,
    pub webpage_url: String,
    pub platform: Platform,
    /// Number of media items behind the URL (1 for a single video)
    pub item_count: usize,
    pub formats: Vec<MediaFormat>,
}

impl MediaInfo {
    pub fn new(platform: Platform, id: impl Into<String>, webpage_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            uploader: String::new(),
            duration_secs: None,
            thumbnail: None,
            webpage_url: webpage_url.into(),
            platform,
            item_count: 1,
            formats: Vec::new(),
        }
    }
}

/// Format details reported by yt-dlp or a site API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaFormat {
    pub format_id: String,
    pub ext: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub filesize: Option<u64>,
    pub url: Option<String>,
}

impl MediaFormat {
    pub fn is_h264(&self) -> bool {
        self.vcodec.as_deref().map_or(false, |v| v.starts_with("avc1"))
    }

    pub fn is_audio_only(&self) -> bool {
        self.vcodec.as_deref().map_or(true, |v| v == "none")
            && self.acodec.as_deref().map_or(false, |a| a != "none")
    }
}

/// One unit of work for the scheduler
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    /// Detected from the URL when absent
    pub platform: Option<Platform>,
    pub quality: Option<String>,
    pub audio_only: bool,
    /// Maximum items for listings (subreddits, user pages), 0 = setting default
    pub limit: Option<u32>,
    /// Extra directory below the platform folder
    pub output_subdir: Option<String>,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn with_quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = Some(quality.into());
        self
    }

    pub fn audio_only(mut self, audio_only: bool) -> Self {
        self.audio_only = audio_only;
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn platform(&self) -> Platform {
        self.platform.unwrap_or_else(|| Platform::detect(&self.url))
    }

    /// Quality after applying request overrides to the profile
    pub fn effective_quality(&self, profile: &PlatformProfile) -> String {
        if self.audio_only {
            return "audio".to_string();
        }
        self.quality.clone().unwrap_or_else(|| profile.quality.clone())
    }
}

/// Result of one successful download
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadOutcome {
    /// Files written (after post-processing)
    pub files: Vec<PathBuf>,
    /// Items skipped by filters or because they already existed
    pub skipped: usize,
    /// Name of the extractor that succeeded
    pub backend: String,
}

impl DownloadOutcome {
    pub fn new(backend: &str) -> Self {
        Self {
            backend: backend.to_string(),
            ..Self::default()
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.files
            .iter()
            .filter_map(|f| std::fs::metadata(f).ok())
            .map(|m| m.len())
            .sum()
    }
}

/// Download progress information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub job_id: u64,
    pub percent: f32,
    pub status: String,
}

/// Network options handed to the tools
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkConfig {
    /// HTTP or SOCKS5 proxy URL (e.g. "socks5h://127.0.0.1:1080")
    pub proxy: Option<String>,
    pub timeout: Duration,
    pub retries: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            timeout: Duration::from_secs(30),
            retries: 3,
        }
    }
}

impl From<&PlatformProfile> for NetworkConfig {
    fn from(profile: &PlatformProfile) -> Self {
        Self {
            proxy: profile.proxy.clone(),
            timeout: profile.timeout,
            retries: profile.retries,
        }
    }
}
