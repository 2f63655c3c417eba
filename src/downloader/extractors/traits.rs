// Extractor trait and the context every extractor runs with

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{PlatformProfile, Settings};
use crate::downloader::errors::DownloadError;
use crate::downloader::models::{DownloadOutcome, DownloadRequest, MediaInfo};
use crate::downloader::progress::ProgressSink;
use crate::files::FileManager;
use crate::platform::Platform;

/// Everything an extractor needs to serve one request
#[derive(Debug, Clone)]
pub struct ExtractContext {
    pub settings: Arc<Settings>,
    pub profile: PlatformProfile,
    pub progress: ProgressSink,
}

impl ExtractContext {
    pub fn new(settings: Arc<Settings>, platform: Platform, progress: ProgressSink) -> Self {
        let profile = settings.profile_for(platform);
        Self {
            settings,
            profile,
            progress,
        }
    }

    pub fn platform(&self) -> Platform {
        self.profile.platform
    }

    /// Output directory for a request, created on demand
    pub fn output_dir(&self, request: &DownloadRequest) -> Result<PathBuf, DownloadError> {
        let dir = FileManager::new(&self.settings).download_dir(self.platform(), request.output_subdir.as_deref());
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Listing limit: request override, else the platform setting (0 = unlimited)
    pub fn listing_limit(&self, request: &DownloadRequest, configured: u32) -> u32 {
        request.limit.unwrap_or(configured)
    }
}

/// Trait for per-platform media extractors
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Name of the extractor (for logging)
    fn name(&self) -> &'static str;

    fn supports(&self, platform: Platform) -> bool;

    /// Whether the backing tool or service can be used right now
    fn is_available(&self) -> bool;

    async fn fetch_info(
        &self,
        request: &DownloadRequest,
        ctx: &ExtractContext,
    ) -> Result<MediaInfo, DownloadError>;

    async fn download(
        &self,
        request: &DownloadRequest,
        ctx: &ExtractContext,
    ) -> Result<DownloadOutcome, DownloadError>;
}
