// Resolved per-platform view of the settings
//
// Extractors never read the settings tree directly; they get a flat profile
// where platform overrides have already been applied on top of the
// `advanced` and `general` sections.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use super::settings::{delay_duration, Settings};
use crate::platform::Platform;

/// Built-in throttling per platform: (requests per minute, min delay seconds)
pub fn default_rate_limit(platform: Platform) -> (u32, f64) {
    match platform {
        Platform::Youtube => (30, 1.0),
        Platform::Tiktok => (20, 2.0),
        Platform::Instagram => (15, 3.0),
        Platform::Reddit => (60, 0.5),
        Platform::Twitter => (25, 1.5),
        Platform::Redgifs | Platform::Xvideos => (30, 2.0),
        Platform::Generic => (30, 1.0),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlatformProfile {
    pub platform: Platform,
    pub enabled: bool,
    pub quality: String,
    pub preferred_codec: String,
    pub max_height: Option<u32>,
    pub merge_output_format: String,
    pub user_agent: String,
    pub headers: BTreeMap<String, String>,
    pub cookies_file: Option<PathBuf>,
    pub cookies_from_browser: Option<String>,
    pub proxy: Option<String>,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub retries: u32,
    pub requests_per_minute: u32,
    pub min_request_delay: Duration,
    pub filename_template: String,
    pub verify_ssl: bool,
    pub ytdlp_path: String,
    pub gallery_dl_path: String,
}

impl Settings {
    /// Resolve the effective options for one platform.
    ///
    /// Precedence: platform section, then `advanced`, then `general`.
    pub fn profile_for(&self, platform: Platform) -> PlatformProfile {
        let common = self.platform_common(platform);
        let (default_rpm, default_delay) = default_rate_limit(platform);

        let quality = common
            .map(|c| c.quality.clone())
            .filter(|q| q != "best")
            .unwrap_or_else(|| self.quality_settings.default_video_quality.clone());

        let mut headers = self.advanced.headers.clone();
        if let Some(c) = common {
            headers.extend(c.headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        let delay = common
            .and_then(|c| c.min_request_delay_secs)
            .unwrap_or(default_delay);

        PlatformProfile {
            platform,
            enabled: common.map_or(true, |c| c.enabled),
            quality,
            preferred_codec: self.quality_settings.preferred_codec.clone(),
            max_height: self.quality_settings.max_height,
            merge_output_format: self.quality_settings.merge_output_format.clone(),
            user_agent: common
                .and_then(|c| c.user_agent.clone())
                .unwrap_or_else(|| self.advanced.user_agent.clone()),
            headers,
            cookies_file: common.and_then(|c| c.cookies_file.clone()),
            cookies_from_browser: common.and_then(|c| c.cookies_from_browser.clone()),
            proxy: self.general.proxy.clone(),
            timeout: Duration::from_secs(
                common
                    .and_then(|c| c.timeout_secs)
                    .unwrap_or(self.general.request_timeout)
                    .max(1),
            ),
            connect_timeout: Duration::from_secs(self.advanced.connect_timeout_secs.max(1)),
            retries: common
                .and_then(|c| c.retries)
                .unwrap_or(self.general.retry_attempts),
            requests_per_minute: common
                .and_then(|c| c.requests_per_minute)
                .unwrap_or(default_rpm)
                .max(1),
            min_request_delay: delay_duration(delay),
            filename_template: self.file_handling.filename_template.clone(),
            verify_ssl: self.advanced.verify_ssl,
            ytdlp_path: self.advanced.ytdlp_path.clone(),
            gallery_dl_path: self.advanced.gallery_dl_path.clone(),
        }
    }
}

impl PlatformProfile {
    pub fn has_cookies(&self) -> bool {
        self.cookies_file.is_some() || self.cookies_from_browser.is_some()
    }

    pub fn is_audio_only(&self) -> bool {
        self.quality == "audio"
    }
}
