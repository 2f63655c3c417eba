// Orchestrator with fallback logic
//
// Strategy:
// 1. Each platform has a preferred chain of extractors (native API first for
//    Reddit/Redgifs, gallery-dl first for image platforms, yt-dlp for video)
// 2. Unavailable extractors are skipped
// 3. On failure the next extractor is tried, unless the diagnosed reason is
//    permanent (DRM, removed content)

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::errors::DownloadError;
use super::extractors::{
    analyze_error, diagnose_error, BlockingReason, ExtractContext, Extractor, GalleryDlExtractor,
    RedditExtractor, RedgifsExtractor, YtDlpExtractor,
};
use super::models::{DownloadOutcome, DownloadRequest, MediaInfo};
use super::progress::ProgressSink;
use super::tools::ToolManager;
use crate::config::Settings;
use crate::files::FileManager;
use crate::media::MediaProcessor;
use crate::platform::Platform;

/// Extractor names in the order they are tried for a platform
pub fn preference(platform: Platform) -> &'static [&'static str] {
    match platform {
        Platform::Reddit => &["reddit-api", "gallery-dl", "yt-dlp"],
        Platform::Redgifs => &["redgifs-api", "gallery-dl"],
        Platform::Instagram | Platform::Twitter => &["gallery-dl", "yt-dlp"],
        Platform::Tiktok | Platform::Generic => &["yt-dlp", "gallery-dl"],
        Platform::Youtube | Platform::Xvideos => &["yt-dlp"],
    }
}

pub struct Downloader {
    settings: Arc<Settings>,
    extractors: Vec<Box<dyn Extractor>>,
    files: FileManager,
    media: Option<MediaProcessor>,
}

impl Downloader {
    /// Downloader with every built-in extractor, tools resolved from settings
    pub fn new(settings: Arc<Settings>) -> Self {
        let tools = ToolManager::new(&settings);
        let extractors: Vec<Box<dyn Extractor>> = vec![
            Box::new(YtDlpExtractor::new(&tools)),
            Box::new(GalleryDlExtractor::new(&tools)),
            Box::new(RedditExtractor::new()),
            Box::new(RedgifsExtractor::new()),
        ];
        let media = MediaProcessor::new(&settings, &tools);

        let mut downloader = Self::with_extractors(settings, extractors);
        downloader.media = Some(media).filter(MediaProcessor::is_available);
        downloader
    }

    pub fn with_extractors(settings: Arc<Settings>, extractors: Vec<Box<dyn Extractor>>) -> Self {
        Self {
            files: FileManager::new(&settings),
            settings,
            extractors,
            media: None,
        }
    }

    /// Replace the ffmpeg helper used for slideshows and audio conversion
    pub fn with_media(mut self, media: MediaProcessor) -> Self {
        self.media = Some(media).filter(MediaProcessor::is_available);
        self
    }

    pub fn add_extractor(&mut self, extractor: Box<dyn Extractor>) {
        self.extractors.push(extractor);
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    /// Usable extractors for a platform, in preference order
    pub fn chain(&self, platform: Platform) -> Vec<&dyn Extractor> {
        let order = preference(platform);
        let mut chain: Vec<(usize, &dyn Extractor)> = self
            .extractors
            .iter()
            .filter(|e| e.supports(platform) && e.is_available())
            .map(|e| {
                let rank = order.iter().position(|n| *n == e.name()).unwrap_or(order.len());
                (rank, e.as_ref())
            })
            .collect();
        chain.sort_by_key(|(rank, _)| *rank);
        chain.into_iter().map(|(_, e)| e).collect()
    }

    /// Platform enabled and, for adult sites, unlocked in the license section
    pub fn check_allowed(&self, platform: Platform) -> Result<(), DownloadError> {
        let enabled = self
            .settings
            .platform_common(platform)
            .map_or(true, |c| c.enabled);
        if !enabled {
            return Err(DownloadError::PlatformDisabled(platform));
        }
        if platform.is_adult() && !self.settings.license.adult_content_enabled {
            return Err(DownloadError::LicenseRequired(platform));
        }
        Ok(())
    }

    fn context(&self, platform: Platform, progress: ProgressSink) -> ExtractContext {
        ExtractContext::new(self.settings.clone(), platform, progress)
    }

    fn no_extractor(platform: Platform) -> DownloadError {
        DownloadError::ToolNotFound(format!(
            "no extractor available for {} (tried {})",
            platform,
            preference(platform).join(", ")
        ))
    }

    /// Final error of a chain, logging a hint when the cause is recognisable
    fn exhausted(platform: Platform, last_error: Option<DownloadError>) -> DownloadError {
        let Some(error) = last_error else {
            return Self::no_extractor(platform);
        };
        let diag = analyze_error(&error.to_string());
        if diag.reason != BlockingReason::Unknown {
            warn!("{} ({}): {}", platform, diag.reason, diag.reason.suggestion(platform));
        }
        error
    }

    fn should_stop(error: &DownloadError) -> bool {
        if matches!(error, DownloadError::Cancelled | DownloadError::InvalidUrl(_)) {
            return true;
        }
        diagnose_error(&error.to_string()).map_or(false, |r| r.is_permanent())
    }

    pub async fn fetch_info(
        &self,
        request: &DownloadRequest,
        progress: ProgressSink,
    ) -> Result<MediaInfo, DownloadError> {
        let platform = request.platform();
        self.check_allowed(platform)?;
        let ctx = self.context(platform, progress);

        let mut last_error = None;
        for extractor in self.chain(platform) {
            debug!("Trying {} for info on {}", extractor.name(), request.url);
            match extractor.fetch_info(request, &ctx).await {
                Ok(info) => {
                    info!("Info for {} from {}", request.url, extractor.name());
                    return Ok(info);
                }
                Err(e) => {
                    warn!("{} info failed: {}", extractor.name(), e);
                    let stop = Self::should_stop(&e);
                    last_error = Some(e);
                    if stop {
                        break;
                    }
                }
            }
        }
        Err(Self::exhausted(platform, last_error))
    }

    pub async fn download(
        &self,
        request: &DownloadRequest,
        progress: ProgressSink,
    ) -> Result<DownloadOutcome, DownloadError> {
        let platform = request.platform();
        self.check_allowed(platform)?;
        let ctx = self.context(platform, progress);

        let mut last_error = None;
        for extractor in self.chain(platform) {
            info!("Downloading {} with {}", request.url, extractor.name());
            match extractor.download(request, &ctx).await {
                Ok(outcome) => {
                    info!(
                        "{} finished {} ({} files, {} skipped)",
                        extractor.name(),
                        request.url,
                        outcome.files.len(),
                        outcome.skipped
                    );
                    return Ok(self.post_process(request, &ctx, outcome).await);
                }
                Err(e) => {
                    warn!("{} download failed: {}", extractor.name(), e);
                    let stop = Self::should_stop(&e);
                    last_error = Some(e);
                    if stop {
                        break;
                    }
                }
            }
        }
        Err(Self::exhausted(platform, last_error))
    }

    /// Filters, renames, slideshow rendering and duplicate handling.
    /// Failures here never fail the download itself.
    async fn post_process(
        &self,
        request: &DownloadRequest,
        ctx: &ExtractContext,
        mut outcome: DownloadOutcome,
    ) -> DownloadOutcome {
        let mut kept = Vec::with_capacity(outcome.files.len());
        for path in std::mem::take(&mut outcome.files) {
            match self.files.finalize(&path) {
                Ok(Some(p)) => kept.push(p),
                Ok(None) => outcome.skipped += 1,
                Err(e) => {
                    warn!("Post-processing {} failed: {}", path.display(), e);
                    kept.push(path);
                }
            }
        }
        outcome.files = kept;

        if request.audio_only {
            outcome.files = self.convert_to_audio(std::mem::take(&mut outcome.files)).await;
        }

        if ctx.platform() == Platform::Tiktok && self.settings.tiktok.process_slideshows {
            if let Some(video) = self.render_slideshow(&outcome.files).await {
                outcome.files.push(video);
            }
        }

        let handling = &self.settings.file_handling;
        if handling.detect_duplicates && !outcome.files.is_empty() {
            let dir = self.files.download_dir(ctx.platform(), request.output_subdir.as_deref());
            let remove = handling.remove_duplicates;
            let result = tokio::task::spawn_blocking(move || {
                if remove {
                    FileManager::remove_duplicates(&dir, true).map(|r| r.removed.len())
                } else {
                    FileManager::find_duplicates(&dir).map(|g| g.values().map(|v| v.len() - 1).sum())
                }
            })
            .await;

            match result {
                Ok(Ok(0)) => {}
                Ok(Ok(n)) if remove => {
                    info!("Removed {} duplicate files", n);
                    outcome.files.retain(|p| p.exists());
                }
                Ok(Ok(n)) => info!("Found {} duplicate files", n),
                Ok(Err(e)) => warn!("Duplicate check failed: {}", e),
                Err(e) => warn!("Duplicate check task failed: {}", e),
            }
        }

        outcome
    }

    /// Audio-only requests served by a backend that kept the video track
    async fn convert_to_audio(&self, files: Vec<PathBuf>) -> Vec<PathBuf> {
        let Some(media) = self.media.as_ref() else {
            return files;
        };
        let allowed = &self.settings.allowed_extensions;
        let mut converted = Vec::with_capacity(files.len());
        for path in files {
            let ext = path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            if ext == media.audio_format() || allowed.is_image(&ext) {
                converted.push(path);
                continue;
            }
            let dir = path.parent().map(PathBuf::from).unwrap_or_default();
            match media.convert_audio(&path, &dir).await {
                Ok(audio) => {
                    if let Err(e) = std::fs::remove_file(&path) {
                        warn!("Could not remove {}: {}", path.display(), e);
                    }
                    converted.push(audio);
                }
                Err(e) => {
                    warn!("Audio conversion of {} failed: {}", path.display(), e);
                    converted.push(path);
                }
            }
        }
        converted
    }

    /// TikTok photo posts arrive as images plus a soundtrack
    async fn render_slideshow(&self, files: &[PathBuf]) -> Option<PathBuf> {
        let media = self.media.as_ref()?;
        let allowed = &self.settings.allowed_extensions;
        let ext = |p: &PathBuf| {
            p.extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_default()
        };

        let images: Vec<PathBuf> = files.iter().filter(|p| allowed.is_image(&ext(p))).cloned().collect();
        if images.is_empty() || images.len() + 1 < files.len() {
            return None;
        }
        let audio = if self.settings.slideshow_defaults.include_audio {
            files.iter().find(|p| allowed.is_audio(&ext(p)))
        } else {
            None
        };

        let duration = Some(self.settings.tiktok.slideshow_duration_per_image)
            .filter(|d| *d > 0.0)
            .unwrap_or(self.settings.slideshow_defaults.duration_per_image);
        let first = &images[0];
        let stem = first.file_stem()?.to_string_lossy().into_owned();
        let output = FileManager::unique_path(&first.with_file_name(format!("{}_slideshow.mp4", stem)));

        match media
            .create_slideshow(&images, audio.map(PathBuf::as_path), duration, &output)
            .await
        {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("Slideshow rendering failed: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct Scripted {
        name: &'static str,
        platforms: Vec<Platform>,
        available: bool,
        result: Result<Vec<&'static str>, DownloadError>,
        calls: Arc<AtomicUsize>,
    }

    impl Scripted {
        fn new(name: &'static str, platforms: Vec<Platform>, result: Result<Vec<&'static str>, DownloadError>) -> Self {
            Self {
                name,
                platforms,
                available: true,
                result,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl Extractor for Scripted {
        fn name(&self) -> &'static str {
            self.name
        }

        fn supports(&self, platform: Platform) -> bool {
            self.platforms.contains(&platform)
        }

        fn is_available(&self) -> bool {
            self.available
        }

        async fn fetch_info(&self, request: &DownloadRequest, ctx: &ExtractContext) -> Result<MediaInfo, DownloadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()?;
            Ok(MediaInfo::new(ctx.platform(), self.name, request.url.clone()))
        }

        async fn download(&self, request: &DownloadRequest, ctx: &ExtractContext) -> Result<DownloadOutcome, DownloadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let names = self.result.clone()?;
            let dir = ctx.output_dir(request)?;
            let mut outcome = DownloadOutcome::new(self.name);
            for name in names {
                let path = dir.join(name);
                std::fs::write(&path, vec![7u8; 4096])?;
                outcome.files.push(path);
            }
            Ok(outcome)
        }
    }

    fn settings_in(dir: &std::path::Path) -> Arc<Settings> {
        let mut settings = Settings::default();
        settings.general.download_directory = dir.to_path_buf();
        Arc::new(settings)
    }

    #[test]
    fn test_chain_follows_preference() {
        let tmp = tempdir().unwrap();
        let downloader = Downloader::with_extractors(
            settings_in(tmp.path()),
            vec![
                Box::new(Scripted::new("yt-dlp", vec![Platform::Reddit, Platform::Youtube], Ok(vec![]))),
                Box::new(Scripted::new("gallery-dl", vec![Platform::Reddit], Ok(vec![]))),
                Box::new(Scripted::new("reddit-api", vec![Platform::Reddit], Ok(vec![]))),
            ],
        );
        let names: Vec<_> = downloader.chain(Platform::Reddit).iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["reddit-api", "gallery-dl", "yt-dlp"]);

        let names: Vec<_> = downloader.chain(Platform::Youtube).iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["yt-dlp"]);
        assert!(downloader.chain(Platform::Instagram).is_empty());
    }

    #[tokio::test]
    async fn test_falls_back_to_next_extractor() {
        let tmp = tempdir().unwrap();
        let failing = Scripted::new("reddit-api", vec![Platform::Reddit], Err(DownloadError::NetworkTimeout));
        let failing_calls = failing.calls.clone();
        let downloader = Downloader::with_extractors(
            settings_in(tmp.path()),
            vec![
                Box::new(failing),
                Box::new(Scripted::new("gallery-dl", vec![Platform::Reddit], Ok(vec!["a.jpg"]))),
            ],
        );

        let outcome = downloader
            .download(&DownloadRequest::new("r/pics"), ProgressSink::disabled())
            .await
            .unwrap();
        assert_eq!(failing_calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.backend, "gallery-dl");
        assert_eq!(outcome.files, vec![tmp.path().join("reddit").join("a.jpg")]);
    }

    #[tokio::test]
    async fn test_permanent_errors_stop_the_chain() {
        let tmp = tempdir().unwrap();
        let fallback = Scripted::new("gallery-dl", vec![Platform::Reddit], Ok(vec!["a.jpg"]));
        let fallback_calls = fallback.calls.clone();
        let downloader = Downloader::with_extractors(
            settings_in(tmp.path()),
            vec![
                Box::new(Scripted::new(
                    "reddit-api",
                    vec![Platform::Reddit],
                    Err(DownloadError::ExecutionError("This video is DRM protected".into())),
                )),
                Box::new(fallback),
            ],
        );
        let err = downloader
            .download(&DownloadRequest::new("r/pics"), ProgressSink::disabled())
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::ExecutionError(_)));
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_gating() {
        let tmp = tempdir().unwrap();
        let mut settings = Settings::default();
        settings.general.download_directory = tmp.path().to_path_buf();
        settings.youtube.common.enabled = false;
        let downloader = Downloader::with_extractors(Arc::new(settings), Vec::new());

        let err = downloader
            .download(&DownloadRequest::new("https://youtu.be/abc"), ProgressSink::disabled())
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::PlatformDisabled(Platform::Youtube)));

        let err = downloader
            .download(&DownloadRequest::new("https://www.redgifs.com/watch/abc"), ProgressSink::disabled())
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::LicenseRequired(Platform::Redgifs)));

        let err = downloader
            .download(&DownloadRequest::new("r/pics"), ProgressSink::disabled())
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::ToolNotFound(_)));
    }

    #[tokio::test]
    async fn test_post_processing_drops_disallowed_files() {
        let tmp = tempdir().unwrap();
        let downloader = Downloader::with_extractors(
            settings_in(tmp.path()),
            vec![Box::new(Scripted::new(
                "reddit-api",
                vec![Platform::Reddit],
                Ok(vec!["keep.jpg", "drop.exe"]),
            ))],
        );

        let outcome = downloader
            .download(&DownloadRequest::new("r/pics"), ProgressSink::disabled())
            .await
            .unwrap();
        assert_eq!(outcome.files, vec![tmp.path().join("reddit").join("keep.jpg")]);
        assert_eq!(outcome.skipped, 1);
        assert!(!tmp.path().join("reddit").join("drop.exe").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_audio_only_requests_are_converted() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = tempdir().unwrap();
        let bin = tmp.path().join("bin");
        std::fs::create_dir(&bin).unwrap();
        let ffmpeg = bin.join("ffmpeg");
        std::fs::write(&ffmpeg, "#!/bin/sh\nfor a; do out=$a; done; echo audio > \"$out\"\n").unwrap();
        std::fs::set_permissions(&ffmpeg, std::fs::Permissions::from_mode(0o755)).unwrap();

        let settings = settings_in(tmp.path());
        let media = MediaProcessor::with_paths(&settings, ffmpeg.to_string_lossy(), "ffprobe");
        let downloader = Downloader::with_extractors(
            settings,
            vec![Box::new(Scripted::new(
                "reddit-api",
                vec![Platform::Reddit],
                Ok(vec!["clip.mp4", "song.mp3"]),
            ))],
        )
        .with_media(media);

        let outcome = downloader
            .download(&DownloadRequest::new("r/music").audio_only(true), ProgressSink::disabled())
            .await
            .unwrap();
        let dir = tmp.path().join("reddit");
        assert_eq!(outcome.files, vec![dir.join("clip.mp3"), dir.join("song.mp3")]);
        assert!(!dir.join("clip.mp4").exists());
    }
}
