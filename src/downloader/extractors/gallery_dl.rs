// gallery-dl extractor - image posts and galleries (Instagram, TikTok photo
// mode, Twitter media, Reddit galleries)

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::traits::{ExtractContext, Extractor};
use crate::downloader::errors::DownloadError;
use crate::downloader::models::{DownloadOutcome, DownloadRequest, MediaInfo};
use crate::downloader::tools::{ToolManager, ToolType};
use crate::downloader::utils::{run_output_with_timeout, run_streaming};
use crate::platform::Platform;

pub struct GalleryDlExtractor {
    gallery_dl_path: Option<String>,
}

impl GalleryDlExtractor {
    pub fn new(tools: &ToolManager) -> Self {
        Self {
            gallery_dl_path: tools.resolve(ToolType::GalleryDl),
        }
    }

    pub fn with_path(path: impl Into<String>) -> Self {
        Self {
            gallery_dl_path: Some(path.into()),
        }
    }

    fn binary(&self) -> Result<&str, DownloadError> {
        self.gallery_dl_path
            .as_deref()
            .ok_or_else(|| DownloadError::ToolNotFound("gallery-dl".to_string()))
    }

    fn common_args(ctx: &ExtractContext) -> Vec<String> {
        let profile = &ctx.profile;
        let mut args = vec![
            "--http-timeout".to_string(),
            profile.timeout.as_secs().max(1).to_string(),
            "--retries".to_string(),
            profile.retries.to_string(),
            "--user-agent".to_string(),
            profile.user_agent.clone(),
        ];

        if let Some(path) = &profile.cookies_file {
            args.push("--cookies".to_string());
            args.push(path.to_string_lossy().into_owned());
        } else if let Some(browser) = &profile.cookies_from_browser {
            args.push("--cookies-from-browser".to_string());
            args.push(browser.clone());
        }

        if let Some(proxy) = &profile.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }

        if !profile.headers.is_empty() {
            if let Ok(headers) = serde_json::to_string(&profile.headers) {
                args.push("-o".to_string());
                args.push(format!("extractor.headers={}", headers));
            }
        }

        if !profile.verify_ssl {
            args.push("-o".to_string());
            args.push("downloader.verify=false".to_string());
        }

        // Respect the platform throttle between gallery-dl's own requests
        let sleep = profile.min_request_delay.as_secs_f64();
        if sleep > 0.0 {
            args.push("--sleep-request".to_string());
            args.push(format!("{:.1}", sleep));
        }

        args
    }

    fn platform_args(ctx: &ExtractContext) -> Vec<String> {
        let settings = &ctx.settings;
        let mut args = Vec::new();
        if ctx.platform() == Platform::Instagram {
            let ig = &settings.instagram;
            let mut include = vec!["posts"];
            if ig.include_stories {
                include.push("stories");
            }
            if ig.include_highlights {
                include.push("highlights");
            }
            args.push("-o".to_string());
            args.push(format!("extractor.instagram.include={}", include.join(",")));
        }
        args
    }

    fn download_args(request: &DownloadRequest, ctx: &ExtractContext, output_dir: &Path) -> Vec<String> {
        let mut args = vec!["-D".to_string(), output_dir.to_string_lossy().into_owned()];
        args.extend(Self::common_args(ctx));
        args.extend(Self::platform_args(ctx));

        if let Some(limit) = Self::limit(request, ctx) {
            args.push("--range".to_string());
            args.push(format!("1-{}", limit));
        }

        if !ctx.settings.general.skip_existing_files {
            args.push("--no-skip".to_string());
        }

        args.push(request.url.clone());
        args
    }

    fn limit(request: &DownloadRequest, ctx: &ExtractContext) -> Option<u32> {
        let configured = match ctx.platform() {
            Platform::Reddit => ctx.settings.reddit.limit,
            Platform::Redgifs => ctx.settings.redgifs.limit,
            _ => 0,
        };
        Some(ctx.listing_limit(request, configured)).filter(|l| *l > 0)
    }

    /// gallery-dl prints each written path; skipped files are prefixed with `# `
    fn parse_output(lines: &[String]) -> (Vec<PathBuf>, usize) {
        let mut files = Vec::new();
        let mut skipped = 0;
        for line in lines.iter().map(|l| l.trim()).filter(|l| !l.is_empty()) {
            if line.starts_with("# ") {
                skipped += 1;
            } else if !line.starts_with('[') {
                files.push(PathBuf::from(line));
            }
        }
        (files, skipped)
    }
}

#[async_trait]
impl Extractor for GalleryDlExtractor {
    fn name(&self) -> &'static str {
        "gallery-dl"
    }

    fn supports(&self, platform: Platform) -> bool {
        matches!(
            platform,
            Platform::Instagram
                | Platform::Tiktok
                | Platform::Twitter
                | Platform::Reddit
                | Platform::Redgifs
                | Platform::Generic
        )
    }

    fn is_available(&self) -> bool {
        self.gallery_dl_path.is_some()
    }

    async fn fetch_info(
        &self,
        request: &DownloadRequest,
        ctx: &ExtractContext,
    ) -> Result<MediaInfo, DownloadError> {
        let binary = self.binary()?;
        let mut args = vec!["--get-urls".to_string()];
        args.extend(Self::common_args(ctx));
        args.extend(Self::platform_args(ctx));
        if let Some(limit) = Self::limit(request, ctx) {
            args.push("--range".to_string());
            args.push(format!("1-{}", limit));
        }
        args.push(request.url.clone());
        debug!("{} {}", binary, args.join(" "));

        let out = run_output_with_timeout(binary, args, ctx.profile.timeout.as_secs() * 4).await?;
        if !out.status.success() {
            return Err(DownloadError::from(String::from_utf8_lossy(&out.stderr).to_string()));
        }

        let urls: Vec<String> = String::from_utf8_lossy(&out.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| l.starts_with("http"))
            .map(str::to_string)
            .collect();

        let mut info = MediaInfo::new(ctx.platform(), request.url.clone(), request.url.clone());
        info.title = request.url.clone();
        info.item_count = urls.len();
        info.thumbnail = urls.first().cloned();
        Ok(info)
    }

    async fn download(
        &self,
        request: &DownloadRequest,
        ctx: &ExtractContext,
    ) -> Result<DownloadOutcome, DownloadError> {
        let binary = self.binary()?;
        let output_dir = ctx.output_dir(request)?;
        let args = Self::download_args(request, ctx, &output_dir);
        debug!("{} {}", binary, args.join(" "));

        let progress = ctx.progress.clone();
        let mut seen = 0usize;
        // gallery-dl prints a path only once a file is complete, so silence says
        // nothing about a stall; its own --http-timeout covers dead connections
        let output = run_streaming(binary, &args, None, |line| {
            seen += 1;
            progress.emit(0.0, format!("item {}: {}", seen, line.trim_start_matches("# ")));
        })
        .await?;

        if !output.success {
            return Err(DownloadError::from(output.stderr));
        }

        let (files, skipped) = Self::parse_output(&output.stdout_lines);
        info!("gallery-dl finished {} ({} files, {} skipped)", request.url, files.len(), skipped);

        let mut outcome = DownloadOutcome::new(self.name());
        outcome.files = files;
        outcome.skipped = skipped;
        Ok(outcome)
    }
}
