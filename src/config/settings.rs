// Typed settings document
//
// Mirrors the JSON configuration file section by section. Every struct is
// `#[serde(default)]`, so a partial or empty document deserializes into the
// documented defaults and unknown keys are ignored. Unset optional values are
// written as `null` so every key appears in the file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::platform::Platform;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36";

/// Reddit rejects generic browser agents on its JSON endpoints.
pub const REDDIT_USER_AGENT: &str = "Social Media Downloader Bot 1.0";

/// Upper bound for any configured delay (backoff base, per-request gap).
pub const MAX_DELAY_SECS: f64 = 3600.0;

pub const KNOWN_QUALITIES: &[&str] = &[
    "best", "worst", "2160p", "1440p", "1080p", "720p", "480p", "360p", "audio",
];

/// Root of the configuration document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub youtube: YoutubeSettings,
    pub tiktok: TiktokSettings,
    pub instagram: InstagramSettings,
    pub reddit: RedditSettings,
    pub redgifs: RedgifsSettings,
    pub xvideos: XvideosSettings,
    pub general: GeneralSettings,
    pub file_handling: FileHandlingSettings,
    pub analytics: AnalyticsSettings,
    pub updates: UpdateSettings,
    pub license: LicenseSettings,
    pub backup: BackupSettings,
    pub notifications: NotificationSettings,
    pub allowed_extensions: AllowedExtensions,
    pub size_limits: SizeLimits,
    pub media_processing: MediaProcessingSettings,
    pub quality_settings: QualitySettings,
    pub slideshow_defaults: SlideshowDefaults,
    pub logging: LoggingSettings,
    pub ui: UiSettings,
    pub advanced: AdvancedSettings,
}

// ── Platform sections ────────────────────────────────────────────────────────

/// Options shared by every platform section (flattened into it).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformCommon {
    pub enabled: bool,
    /// Quality string: "best", "1080p", "audio", ...
    pub quality: String,
    pub user_agent: Option<String>,
    /// Extra HTTP headers sent with every request to this platform
    pub headers: BTreeMap<String, String>,
    pub cookies_file: Option<PathBuf>,
    /// Browser name passed to `--cookies-from-browser` (chrome, firefox, ...)
    pub cookies_from_browser: Option<String>,
    pub timeout_secs: Option<u64>,
    pub retries: Option<u32>,
    /// Falls back to the platform's built-in limit when absent
    pub requests_per_minute: Option<u32>,
    pub min_request_delay_secs: Option<f64>,
}

impl Default for PlatformCommon {
    fn default() -> Self {
        Self {
            enabled: true,
            quality: "best".to_string(),
            user_agent: None,
            headers: BTreeMap::new(),
            cookies_file: None,
            cookies_from_browser: None,
            timeout_secs: None,
            retries: None,
            requests_per_minute: None,
            min_request_delay_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct YoutubeSettings {
    #[serde(flatten)]
    pub common: PlatformCommon,
    pub extract_audio: bool,
    pub write_thumbnail: bool,
    pub write_info_json: bool,
    pub write_subtitles: bool,
    /// yt-dlp `player_client` values tried in order
    pub player_clients: Vec<String>,
}

impl Default for YoutubeSettings {
    fn default() -> Self {
        Self {
            common: PlatformCommon::default(),
            extract_audio: false,
            write_thumbnail: true,
            write_info_json: true,
            write_subtitles: false,
            player_clients: vec!["web".to_string(), "web_safari".to_string(), "ios".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TiktokSettings {
    #[serde(flatten)]
    pub common: PlatformCommon,
    /// Turn photo-mode posts into a video with ffmpeg
    pub process_slideshows: bool,
    pub slideshow_duration_per_image: f64,
    pub remove_watermark: bool,
}

impl Default for TiktokSettings {
    fn default() -> Self {
        Self {
            common: PlatformCommon::default(),
            process_slideshows: true,
            slideshow_duration_per_image: 3.0,
            remove_watermark: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct InstagramSettings {
    #[serde(flatten)]
    pub common: PlatformCommon,
    pub include_stories: bool,
    pub include_highlights: bool,
    pub download_comments: bool,
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedditSettings {
    #[serde(flatten)]
    pub common: PlatformCommon,
    pub min_score: i64,
    pub skip_nsfw: bool,
    /// Listing order: hot, new, top, rising
    pub sort: String,
    /// Maximum posts per subreddit, 0 = unlimited
    pub limit: u32,
}

impl Default for RedditSettings {
    fn default() -> Self {
        Self {
            common: PlatformCommon {
                user_agent: Some(REDDIT_USER_AGENT.to_string()),
                ..PlatformCommon::default()
            },
            min_score: 0,
            skip_nsfw: false,
            sort: "hot".to_string(),
            limit: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedgifsSettings {
    #[serde(flatten)]
    pub common: PlatformCommon,
    pub api_base: String,
    pub prefer_hd: bool,
    /// Maximum gifs per user, 0 = unlimited
    pub limit: u32,
}

impl Default for RedgifsSettings {
    fn default() -> Self {
        Self {
            common: PlatformCommon::default(),
            api_base: "https://api.redgifs.com/v2".to_string(),
            prefer_hd: true,
            limit: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct XvideosSettings {
    #[serde(flatten)]
    pub common: PlatformCommon,
}

// ── General sections ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    pub download_directory: PathBuf,
    pub max_concurrent_downloads: u32,
    pub retry_attempts: u32,
    /// Seconds
    pub request_timeout: u64,
    /// Base delay for retry backoff, seconds
    pub retry_backoff_secs: f64,
    pub organize_by_platform: bool,
    pub skip_existing_files: bool,
    pub proxy: Option<String>,
    /// Scan local SOCKS5 ports when no proxy is configured
    pub auto_detect_proxy: bool,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        let download_directory = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Downloads")
            .join("SocialMediaDownloader");

        Self {
            download_directory,
            max_concurrent_downloads: 3,
            retry_attempts: 3,
            request_timeout: 30,
            retry_backoff_secs: 2.0,
            organize_by_platform: true,
            skip_existing_files: true,
            proxy: None,
            auto_detect_proxy: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileHandlingSettings {
    pub sanitize_filenames: bool,
    pub add_date_to_filename: bool,
    pub max_filename_length: usize,
    /// yt-dlp style output template, without extension
    pub filename_template: String,
    pub detect_duplicates: bool,
    pub remove_duplicates: bool,
}

impl Default for FileHandlingSettings {
    fn default() -> Self {
        Self {
            sanitize_filenames: true,
            add_date_to_filename: false,
            max_filename_length: 200,
            filename_template: "%(title)s".to_string(),
            detect_duplicates: true,
            remove_duplicates: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AnalyticsSettings {
    /// Local usage statistics only; nothing is sent anywhere
    pub enabled: bool,
    pub track_errors: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateSettings {
    pub check_tools_on_startup: bool,
    pub auto_update_tools: bool,
    pub channel: String,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            check_tools_on_startup: true,
            auto_update_tools: false,
            channel: "stable".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LicenseSettings {
    pub accepted_terms: bool,
    /// Required for redgifs and xvideos
    pub adult_content_enabled: bool,
    pub license_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
    pub enabled: bool,
    pub directory: Option<PathBuf>,
    pub keep_last: usize,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: None,
            keep_last: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub enabled: bool,
    pub on_complete: bool,
    pub on_error: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            on_complete: true,
            on_error: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllowedExtensions {
    pub video: Vec<String>,
    pub image: Vec<String>,
    pub audio: Vec<String>,
    /// Sidecar files written by the tools (info json, subtitles)
    pub metadata: Vec<String>,
}

impl Default for AllowedExtensions {
    fn default() -> Self {
        let list = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            video: list(&["mp4", "webm", "mkv", "mov", "m4v"]),
            image: list(&["jpg", "jpeg", "png", "gif", "webp", "heic"]),
            audio: list(&["mp3", "m4a", "aac", "opus", "ogg", "wav", "flac"]),
            metadata: list(&["json", "vtt", "srt", "txt"]),
        }
    }
}

impl AllowedExtensions {
    pub fn contains(&self, ext: &str) -> bool {
        let ext = ext.trim_start_matches('.').to_lowercase();
        self.video
            .iter()
            .chain(&self.image)
            .chain(&self.audio)
            .chain(&self.metadata)
            .any(|e| e.eq_ignore_ascii_case(&ext))
    }

    pub fn is_image(&self, ext: &str) -> bool {
        let ext = ext.trim_start_matches('.');
        self.image.iter().any(|e| e.eq_ignore_ascii_case(ext))
    }

    pub fn is_audio(&self, ext: &str) -> bool {
        let ext = ext.trim_start_matches('.');
        self.audio.iter().any(|e| e.eq_ignore_ascii_case(ext))
    }
}

/// Size bounds for downloaded files, 0 disables a bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizeLimits {
    pub max_file_size_mb: u64,
    pub min_file_size_kb: u64,
}

impl Default for SizeLimits {
    fn default() -> Self {
        Self {
            max_file_size_mb: 0,
            min_file_size_kb: 0,
        }
    }
}

impl SizeLimits {
    /// Saturates for values too large to express in bytes; `validate` rejects those.
    pub fn max_bytes(&self) -> Option<u64> {
        (self.max_file_size_mb > 0).then(|| self.max_file_size_mb.saturating_mul(1024 * 1024))
    }

    pub fn min_bytes(&self) -> Option<u64> {
        (self.min_file_size_kb > 0).then(|| self.min_file_size_kb.saturating_mul(1024))
    }

    fn overflows(&self) -> bool {
        self.max_file_size_mb.checked_mul(1024 * 1024).is_none() || self.min_file_size_kb.checked_mul(1024).is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaProcessingSettings {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub audio_format: String,
    pub audio_bitrate: String,
    pub video_codec: String,
    pub audio_codec: String,
    pub timeout_secs: u64,
}

impl Default for MediaProcessingSettings {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            audio_format: "mp3".to_string(),
            audio_bitrate: "192k".to_string(),
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualitySettings {
    pub default_video_quality: String,
    /// "h264" favours QuickTime-compatible streams, "any" takes the best codec
    pub preferred_codec: String,
    pub max_height: Option<u32>,
    pub merge_output_format: String,
}

impl Default for QualitySettings {
    fn default() -> Self {
        Self {
            default_video_quality: "best".to_string(),
            preferred_codec: "h264".to_string(),
            max_height: None,
            merge_output_format: "mp4".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlideshowDefaults {
    pub duration_per_image: f64,
    pub frame_rate: u32,
    pub include_audio: bool,
}

impl Default for SlideshowDefaults {
    fn default() -> Self {
        Self {
            duration_per_image: 3.0,
            frame_rate: 30,
            include_audio: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// error, warn, info, debug, trace
    pub level: String,
    pub log_to_file: bool,
    pub directory: Option<PathBuf>,
    pub file_name: String,
    /// daily, hourly, never
    pub rotation: String,
    pub max_files: usize,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_to_file: true,
            directory: None,
            file_name: "social_media_downloader.log".to_string(),
            rotation: "daily".to_string(),
            max_files: 5,
            json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiSettings {
    pub theme: String,
    pub language: String,
    pub show_thumbnails: bool,
    pub confirm_on_exit: bool,
    pub window_width: u32,
    pub window_height: u32,
}

impl Default for UiSettings {
    fn default() -> Self {
        Self {
            theme: "system".to_string(),
            language: "en".to_string(),
            show_thumbnails: true,
            confirm_on_exit: true,
            window_width: 1000,
            window_height: 700,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedSettings {
    pub user_agent: String,
    pub headers: BTreeMap<String, String>,
    pub verify_ssl: bool,
    pub connect_timeout_secs: u64,
    pub ytdlp_path: String,
    pub gallery_dl_path: String,
    pub debug_mode: bool,
}

impl Default for AdvancedSettings {
    fn default() -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("Accept-Language".to_string(), "en-US,en;q=0.9".to_string());

        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            headers,
            verify_ssl: true,
            connect_timeout_secs: 10,
            ytdlp_path: "yt-dlp".to_string(),
            gallery_dl_path: "gallery-dl".to_string(),
            debug_mode: false,
        }
    }
}

impl Settings {
    /// Parse a configuration document, filling every absent key with its default.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(json)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Shared options of a platform section; `None` for platforms without one.
    pub fn platform_common(&self, platform: Platform) -> Option<&PlatformCommon> {
        match platform {
            Platform::Youtube => Some(&self.youtube.common),
            Platform::Tiktok => Some(&self.tiktok.common),
            Platform::Instagram => Some(&self.instagram.common),
            Platform::Reddit => Some(&self.reddit.common),
            Platform::Redgifs => Some(&self.redgifs.common),
            Platform::Xvideos => Some(&self.xvideos.common),
            Platform::Twitter | Platform::Generic => None,
        }
    }

    pub fn platform_common_mut(&mut self, platform: Platform) -> Option<&mut PlatformCommon> {
        match platform {
            Platform::Youtube => Some(&mut self.youtube.common),
            Platform::Tiktok => Some(&mut self.tiktok.common),
            Platform::Instagram => Some(&mut self.instagram.common),
            Platform::Reddit => Some(&mut self.reddit.common),
            Platform::Redgifs => Some(&mut self.redgifs.common),
            Platform::Xvideos => Some(&mut self.xvideos.common),
            Platform::Twitter | Platform::Generic => None,
        }
    }

    /// Clamp values that the application can repair on its own.
    pub fn normalize(&mut self) {
        if self.general.max_concurrent_downloads < 1 {
            self.general.max_concurrent_downloads = 1;
        }
        self.general.retry_backoff_secs = clamp_delay(self.general.retry_backoff_secs);
        for common in [
            &mut self.youtube.common,
            &mut self.tiktok.common,
            &mut self.instagram.common,
            &mut self.reddit.common,
            &mut self.redgifs.common,
            &mut self.xvideos.common,
        ] {
            if let Some(delay) = common.min_request_delay_secs {
                common.min_request_delay_secs = Some(clamp_delay(delay));
            }
        }
    }

    /// Check type/range validity; returns every violation found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut issues = Vec::new();

        if self.general.max_concurrent_downloads < 1 {
            issues.push("general.max_concurrent_downloads must be at least 1".to_string());
        }
        if self.general.request_timeout == 0 {
            issues.push("general.request_timeout must be positive".to_string());
        }
        if !is_valid_delay(self.general.retry_backoff_secs) {
            issues.push(format!(
                "general.retry_backoff_secs must be between 0 and {}",
                MAX_DELAY_SECS
            ));
        }
        if self.general.download_directory.as_os_str().is_empty() {
            issues.push("general.download_directory must not be empty".to_string());
        }

        for platform in Platform::ALL {
            let Some(common) = self.platform_common(platform) else {
                continue;
            };
            if common.timeout_secs == Some(0) {
                issues.push(format!("{}.timeout_secs must be positive", platform));
            }
            if common.requests_per_minute == Some(0) {
                issues.push(format!("{}.requests_per_minute must be at least 1", platform));
            }
            if let Some(delay) = common.min_request_delay_secs {
                if !is_valid_delay(delay) {
                    issues.push(format!(
                        "{}.min_request_delay_secs must be between 0 and {}",
                        platform, MAX_DELAY_SECS
                    ));
                }
            }
            if !is_known_quality(&common.quality) {
                issues.push(format!("{}.quality '{}' is not recognised", platform, common.quality));
            }
        }

        if !is_known_quality(&self.quality_settings.default_video_quality) {
            issues.push(format!(
                "quality_settings.default_video_quality '{}' is not recognised",
                self.quality_settings.default_video_quality
            ));
        }
        if !matches!(self.quality_settings.preferred_codec.as_str(), "h264" | "any") {
            issues.push("quality_settings.preferred_codec must be 'h264' or 'any'".to_string());
        }
        if self.quality_settings.max_height == Some(0) {
            issues.push("quality_settings.max_height must be positive".to_string());
        }

        let tiktok_duration = self.tiktok.slideshow_duration_per_image;
        if !tiktok_duration.is_finite() || tiktok_duration <= 0.0 {
            issues.push("tiktok.slideshow_duration_per_image must be positive".to_string());
        }
        let slide_duration = self.slideshow_defaults.duration_per_image;
        if !slide_duration.is_finite() || slide_duration <= 0.0 {
            issues.push("slideshow_defaults.duration_per_image must be positive".to_string());
        }
        if self.slideshow_defaults.frame_rate == 0 {
            issues.push("slideshow_defaults.frame_rate must be positive".to_string());
        }

        if self.media_processing.timeout_secs == 0 {
            issues.push("media_processing.timeout_secs must be positive".to_string());
        }
        if self.advanced.connect_timeout_secs == 0 {
            issues.push("advanced.connect_timeout_secs must be positive".to_string());
        }
        if self.file_handling.max_filename_length < 16 {
            issues.push("file_handling.max_filename_length must be at least 16".to_string());
        }

        if self.size_limits.overflows() {
            issues.push("size_limits values are too large".to_string());
        } else if let (Some(min), Some(max)) = (self.size_limits.min_bytes(), self.size_limits.max_bytes()) {
            if min >= max {
                issues.push("size_limits.min_file_size_kb must be below max_file_size_mb".to_string());
            }
        }

        let ext = &self.allowed_extensions;
        if ext.video.is_empty() && ext.image.is_empty() && ext.audio.is_empty() {
            issues.push("allowed_extensions must list at least one media extension".to_string());
        }

        if !matches!(
            self.logging.level.to_lowercase().as_str(),
            "error" | "warn" | "info" | "debug" | "trace"
        ) {
            issues.push(format!("logging.level '{}' is not recognised", self.logging.level));
        }
        if !matches!(self.logging.rotation.as_str(), "daily" | "hourly" | "never") {
            issues.push("logging.rotation must be 'daily', 'hourly' or 'never'".to_string());
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }
}

fn is_valid_delay(secs: f64) -> bool {
    secs.is_finite() && (0.0..=MAX_DELAY_SECS).contains(&secs)
}

fn clamp_delay(secs: f64) -> f64 {
    if secs.is_finite() {
        secs.clamp(0.0, MAX_DELAY_SECS)
    } else {
        0.0
    }
}

/// Seconds from the settings as a `Duration`, clamped to `0..=MAX_DELAY_SECS`.
pub fn delay_duration(secs: f64) -> Duration {
    Duration::try_from_secs_f64(clamp_delay(secs)).unwrap_or(Duration::ZERO)
}

/// Accepts the named qualities plus any `<height>p` form.
pub fn is_known_quality(quality: &str) -> bool {
    if KNOWN_QUALITIES.contains(&quality) {
        return true;
    }
    quality
        .strip_suffix('p')
        .map_or(false, |h| !h.is_empty() && h.parse::<u32>().map_or(false, |v| v > 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_yields_defaults() {
        assert_eq!(Settings::from_json_str("").unwrap(), Settings::default());
        assert_eq!(Settings::from_json_str("{}").unwrap(), Settings::default());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let settings = Settings::from_json_str(
            r#"{ "reddit": { "min_score": 50 }, "general": { "max_concurrent_downloads": 8 } }"#,
        )
        .unwrap();

        assert_eq!(settings.reddit.min_score, 50);
        assert_eq!(settings.reddit.sort, "hot");
        assert_eq!(
            settings.reddit.common.user_agent.as_deref(),
            Some(REDDIT_USER_AGENT)
        );
        assert_eq!(settings.general.max_concurrent_downloads, 8);
        assert_eq!(settings.general.retry_attempts, 3);
        assert_eq!(settings.tiktok, TiktokSettings::default());
    }

    #[test]
    fn test_flattened_common_fields() {
        let settings = Settings::from_json_str(
            r#"{ "youtube": { "quality": "720p", "headers": { "X-Test": "1" }, "extract_audio": true } }"#,
        )
        .unwrap();

        assert_eq!(settings.youtube.common.quality, "720p");
        assert_eq!(settings.youtube.common.headers.get("X-Test").map(String::as_str), Some("1"));
        assert!(settings.youtube.extract_audio);
        assert!(settings.youtube.write_thumbnail);
    }

    #[test]
    fn test_roundtrip_preserves_values() {
        let mut settings = Settings::default();
        settings.instagram.username = Some("someone".to_string());
        settings.size_limits.max_file_size_mb = 500;
        settings.tiktok.common.requests_per_minute = Some(5);
        settings.advanced.headers.insert("Referer".to_string(), "https://example.com".to_string());

        let json = settings.to_json_pretty().unwrap();
        assert_eq!(Settings::from_json_str(&json).unwrap(), settings);
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let settings = Settings::from_json_str(r#"{ "legacy_section": { "x": 1 }, "ui": { "theme": "dark", "old": true } }"#)
            .unwrap();
        assert_eq!(settings.ui.theme, "dark");
    }

    #[test]
    fn test_wrong_type_is_rejected() {
        assert!(Settings::from_json_str(r#"{ "general": { "retry_attempts": -1 } }"#).is_err());
        assert!(Settings::from_json_str(r#"{ "general": { "request_timeout": "soon" } }"#).is_err());
    }

    #[test]
    fn test_defaults_validate() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_validate_collects_all_issues() {
        let mut settings = Settings::default();
        settings.general.request_timeout = 0;
        settings.youtube.common.timeout_secs = Some(0);
        settings.tiktok.common.quality = "ultra".to_string();
        settings.logging.level = "loud".to_string();

        let issues = settings.validate().unwrap_err();
        assert_eq!(issues.len(), 4);
        assert!(issues.iter().any(|i| i.contains("general.request_timeout")));
        assert!(issues.iter().any(|i| i.contains("youtube.timeout_secs")));
        assert!(issues.iter().any(|i| i.contains("tiktok.quality")));
        assert!(issues.iter().any(|i| i.contains("logging.level")));
    }

    #[test]
    fn test_size_limit_consistency() {
        let mut settings = Settings::default();
        settings.size_limits.max_file_size_mb = 1;
        settings.size_limits.min_file_size_kb = 2048;
        assert!(settings.validate().is_err());

        settings.size_limits.min_file_size_kb = 10;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_huge_size_limit_is_rejected() {
        let settings = Settings::from_json_str(&format!(
            r#"{{ "size_limits": {{ "max_file_size_mb": {} }} }}"#,
            u64::MAX
        ))
        .unwrap();
        assert_eq!(settings.size_limits.max_bytes(), Some(u64::MAX));

        let issues = settings.validate().unwrap_err();
        assert!(issues.iter().any(|i| i.contains("size_limits")));
    }

    #[test]
    fn test_huge_delays_are_rejected_and_clamped() {
        let mut settings = Settings::from_json_str(
            r#"{ "general": { "retry_backoff_secs": 1e20 }, "tiktok": { "min_request_delay_secs": 1e300 } }"#,
        )
        .unwrap();
        let issues = settings.validate().unwrap_err();
        assert!(issues.iter().any(|i| i.contains("general.retry_backoff_secs")));
        assert!(issues.iter().any(|i| i.contains("tiktok.min_request_delay_secs")));

        // Resolving a profile must not panic even before normalisation
        let profile = settings.profile_for(Platform::Tiktok);
        assert_eq!(profile.min_request_delay, Duration::from_secs(3600));

        settings.normalize();
        assert_eq!(settings.general.retry_backoff_secs, MAX_DELAY_SECS);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_delay_duration_edges() {
        assert_eq!(delay_duration(1.5), Duration::from_millis(1500));
        assert_eq!(delay_duration(-4.0), Duration::ZERO);
        assert_eq!(delay_duration(f64::NAN), Duration::ZERO);
        assert_eq!(delay_duration(f64::INFINITY), Duration::ZERO);
        assert_eq!(delay_duration(1e20), Duration::from_secs(3600));
    }

    #[test]
    fn test_normalize_clamps_concurrency() {
        let mut settings = Settings::default();
        settings.general.max_concurrent_downloads = 0;
        settings.reddit.common.min_request_delay_secs = Some(-3.0);
        settings.normalize();

        assert_eq!(settings.general.max_concurrent_downloads, 1);
        assert_eq!(settings.reddit.common.min_request_delay_secs, Some(0.0));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_known_quality() {
        assert!(is_known_quality("best"));
        assert!(is_known_quality("audio"));
        assert!(is_known_quality("240p"));
        assert!(!is_known_quality("p"));
        assert!(!is_known_quality("0p"));
        assert!(!is_known_quality("hd"));
    }

    #[test]
    fn test_allowed_extensions_lookup() {
        let ext = AllowedExtensions::default();
        assert!(ext.contains("MP4"));
        assert!(ext.contains(".jpg"));
        assert!(!ext.contains("exe"));
        assert!(ext.is_image("png"));
        assert!(ext.is_audio("m4a"));
    }
}
