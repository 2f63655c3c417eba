// yt-dlp extractor - video platforms (YouTube, TikTok, Instagram reels,
// Twitter, Xvideos, Reddit-hosted video, anything yt-dlp knows)
//
// YouTube attempts rotate through the configured player clients; a
// permanent restriction (DRM, removed video) stops the rotation early.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::diagnostics::diagnose_error;
use super::traits::{ExtractContext, Extractor};
use crate::downloader::errors::DownloadError;
use crate::downloader::format_selector::FormatSelector;
use crate::downloader::models::{DownloadOutcome, DownloadRequest, MediaFormat, MediaInfo, NetworkConfig};
use crate::downloader::progress::parse_ytdlp_progress;
use crate::downloader::tools::{ToolManager, ToolType};
use crate::downloader::utils::{get_proxy_args, get_timeout_args, run_output_with_timeout, run_streaming};
use crate::platform::Platform;

/// Marker used with `--print after_move:` to recognise final file paths on stdout
const SAVED_PREFIX: &str = "saved:";

pub struct YtDlpExtractor {
    ytdlp_path: Option<String>,
}

impl YtDlpExtractor {
    pub fn new(tools: &ToolManager) -> Self {
        Self {
            ytdlp_path: tools.resolve(ToolType::YtDlp),
        }
    }

    fn binary(&self) -> Result<&str, DownloadError> {
        self.ytdlp_path
            .as_deref()
            .ok_or_else(|| DownloadError::ToolNotFound("yt-dlp".to_string()))
    }

    /// Player clients to rotate through; a single `None` for non-YouTube URLs
    fn clients(ctx: &ExtractContext) -> Vec<Option<String>> {
        let configured = &ctx.settings.youtube.player_clients;
        if ctx.platform() == Platform::Youtube && !configured.is_empty() {
            configured.iter().cloned().map(Some).collect()
        } else {
            vec![None]
        }
    }

    /// Arguments shared by info and download runs
    fn common_args(ctx: &ExtractContext, client: Option<&str>) -> Vec<String> {
        let profile = &ctx.profile;
        let network = NetworkConfig::from(profile);

        let mut args = vec!["--no-warnings".to_string(), "--no-update".to_string()];
        args.extend(get_timeout_args(&network));
        args.extend(get_proxy_args(&network));
        args.push("--user-agent".to_string());
        args.push(profile.user_agent.clone());

        for (name, value) in &profile.headers {
            args.push("--add-header".to_string());
            args.push(format!("{}:{}", name, value));
        }

        if let Some(path) = &profile.cookies_file {
            args.push("--cookies".to_string());
            args.push(path.to_string_lossy().into_owned());
        } else if let Some(browser) = &profile.cookies_from_browser {
            args.push("--cookies-from-browser".to_string());
            args.push(browser.clone());
        }

        if !profile.verify_ssl {
            args.push("--no-check-certificates".to_string());
        }

        if let Some(client) = client {
            args.push("--extractor-args".to_string());
            args.push(format!("youtube:player_client={}", client));
        }

        args
    }

    fn info_args(url: &str, ctx: &ExtractContext, client: Option<&str>) -> Vec<String> {
        let mut args = vec!["--dump-single-json".to_string(), "--flat-playlist".to_string()];
        args.extend(Self::common_args(ctx, client));
        args.push(url.to_string());
        args
    }

    fn download_args(
        request: &DownloadRequest,
        ctx: &ExtractContext,
        output_dir: &Path,
        client: Option<&str>,
    ) -> Vec<String> {
        let settings = &ctx.settings;
        let profile = &ctx.profile;
        let quality = request.effective_quality(profile);
        let audio_only = quality == "audio" || (ctx.platform() == Platform::Youtube && settings.youtube.extract_audio);

        let format = FormatSelector::format_spec(&quality, &profile.preferred_codec, profile.max_height);

        let mut args = vec![
            "-f".to_string(),
            format,
            "--newline".to_string(),
            "--progress".to_string(),
            "--print".to_string(),
            format!("after_move:{}%(filepath)s", SAVED_PREFIX),
            "--fragment-retries".to_string(),
            "10".to_string(),
            "-P".to_string(),
            output_dir.to_string_lossy().into_owned(),
            "-o".to_string(),
            format!("{}.%(ext)s", profile.filename_template),
            "--trim-filenames".to_string(),
            settings.file_handling.max_filename_length.to_string(),
        ];
        args.extend(Self::common_args(ctx, client));

        match ctx.listing_limit(request, 0) {
            0 => args.push("--no-playlist".to_string()),
            n => {
                args.push("--yes-playlist".to_string());
                args.push("--playlist-end".to_string());
                args.push(n.to_string());
            }
        }

        if settings.general.skip_existing_files {
            args.push("--no-overwrites".to_string());
        } else {
            args.push("--force-overwrites".to_string());
        }

        if !audio_only {
            args.push("--merge-output-format".to_string());
            args.push(profile.merge_output_format.clone());
        }

        if ctx.platform() == Platform::Youtube {
            let yt = &settings.youtube;
            if yt.write_thumbnail {
                args.push("--write-thumbnail".to_string());
            }
            if yt.write_info_json {
                args.push("--write-info-json".to_string());
            }
            if yt.write_subtitles {
                args.push("--write-subs".to_string());
                args.push("--sub-langs".to_string());
                args.push("en.*".to_string());
            }
        }

        if audio_only {
            let media = &settings.media_processing;
            args.push("-x".to_string());
            args.push("--audio-format".to_string());
            args.push(media.audio_format.clone());
            args.push("--audio-quality".to_string());
            args.push(media.audio_bitrate.clone());
        }

        args.push(request.url.clone());
        args
    }

    fn parse_info(stdout: &[u8], platform: Platform) -> Result<MediaInfo, DownloadError> {
        let json: serde_json::Value = serde_json::from_slice(stdout)
            .map_err(|e| DownloadError::ParseError(format!("Invalid JSON from yt-dlp: {}", e)))?;

        let str_field = |key: &str| json[key].as_str().map(str::to_string);

        let mut info = MediaInfo::new(
            platform,
            str_field("id").unwrap_or_else(|| "unknown".to_string()),
            str_field("webpage_url")
                .or_else(|| str_field("original_url"))
                .unwrap_or_default(),
        );
        info.title = str_field("title").unwrap_or_else(|| "Unknown".to_string());
        info.uploader = str_field("uploader")
            .or_else(|| str_field("channel"))
            .unwrap_or_else(|| "Unknown".to_string());
        info.duration_secs = json["duration"].as_f64();
        info.thumbnail = str_field("thumbnail");

        if json["_type"].as_str() == Some("playlist") {
            info.item_count = json["entries"].as_array().map_or(0, Vec::len);
        }

        if let Some(formats) = json["formats"].as_array() {
            info.formats = formats
                .iter()
                .map(|f| MediaFormat {
                    format_id: f["format_id"].as_str().unwrap_or("").to_string(),
                    ext: f["ext"].as_str().unwrap_or("").to_string(),
                    width: f["width"].as_u64().map(|w| w as u32),
                    height: f["height"].as_u64().map(|h| h as u32),
                    vcodec: f["vcodec"].as_str().map(str::to_string),
                    acodec: f["acodec"].as_str().map(str::to_string),
                    filesize: f["filesize"].as_u64().or_else(|| f["filesize_approx"].as_u64()),
                    url: f["url"].as_str().map(str::to_string),
                })
                .collect();
        }

        Ok(info)
    }

    async fn run_download(
        &self,
        request: &DownloadRequest,
        ctx: &ExtractContext,
        output_dir: &Path,
        client: Option<&str>,
    ) -> Result<DownloadOutcome, DownloadError> {
        let binary = self.binary()?;
        let args = Self::download_args(request, ctx, output_dir, client);
        debug!("{} {}", binary, args.join(" "));

        let progress = ctx.progress.clone();
        let mut already = 0usize;
        let output = run_streaming(binary, &args, Some(ctx.profile.timeout.max(std::time::Duration::from_secs(60)) * 5), |line| {
            if let Some((percent, status)) = parse_ytdlp_progress(line) {
                if percent >= 100.0 && status.contains("already") {
                    already += 1;
                }
                progress.emit(percent, status);
            }
        })
        .await?;

        if !output.success {
            return Err(DownloadError::from(output.stderr));
        }

        let mut outcome = DownloadOutcome::new(self.name());
        outcome.files = output
            .stdout_lines
            .iter()
            .filter_map(|l| l.strip_prefix(SAVED_PREFIX))
            .map(PathBuf::from)
            .collect();
        outcome.skipped = already;
        Ok(outcome)
    }
}

#[async_trait]
impl Extractor for YtDlpExtractor {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    fn supports(&self, platform: Platform) -> bool {
        platform != Platform::Redgifs
    }

    fn is_available(&self) -> bool {
        self.ytdlp_path.is_some()
    }

    async fn fetch_info(
        &self,
        request: &DownloadRequest,
        ctx: &ExtractContext,
    ) -> Result<MediaInfo, DownloadError> {
        let binary = self.binary()?;
        let mut last_error = DownloadError::Unknown("No clients to try".to_string());

        for client in Self::clients(ctx) {
            let args = Self::info_args(&request.url, ctx, client.as_deref());
            debug!("{} {}", binary, args.join(" "));

            match run_output_with_timeout(binary, args, ctx.profile.timeout.as_secs() * 2).await {
                Ok(out) if out.status.success() => {
                    return Self::parse_info(&out.stdout, ctx.platform());
                }
                Ok(out) => {
                    let stderr = String::from_utf8_lossy(&out.stderr).to_string();
                    warn!("yt-dlp info failed (client {:?}): {}", client, stderr.trim());
                    let permanent = diagnose_error(&stderr).map_or(false, |r| r.is_permanent());
                    last_error = DownloadError::from(stderr);
                    if permanent {
                        break;
                    }
                }
                Err(e) => {
                    warn!("yt-dlp info error (client {:?}): {}", client, e);
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    async fn download(
        &self,
        request: &DownloadRequest,
        ctx: &ExtractContext,
    ) -> Result<DownloadOutcome, DownloadError> {
        let output_dir = ctx.output_dir(request)?;
        let mut last_error = DownloadError::Unknown("No clients to try".to_string());

        let clients = Self::clients(ctx);
        let total = clients.len();
        for (idx, client) in clients.into_iter().enumerate() {
            ctx.progress.emit(
                0.0,
                match &client {
                    Some(c) => format!("client={} | attempt {}/{}", c, idx + 1, total),
                    None => "starting yt-dlp".to_string(),
                },
            );

            match self.run_download(request, ctx, &output_dir, client.as_deref()).await {
                Ok(outcome) => {
                    info!(
                        "yt-dlp finished {} ({} files{})",
                        request.url,
                        outcome.files.len(),
                        client.as_deref().map(|c| format!(", client {}", c)).unwrap_or_default()
                    );
                    return Ok(outcome);
                }
                Err(e) => {
                    warn!("yt-dlp download failed (client {:?}): {}", client, e);
                    let permanent = matches!(e, DownloadError::ToolNotFound(_))
                        || diagnose_error(&e.to_string()).map_or(false, |r| r.is_permanent());
                    last_error = e;
                    if permanent {
                        break;
                    }
                }
            }
        }

        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::downloader::progress::ProgressSink;
    use std::sync::Arc;

    fn ctx(settings: Settings, platform: Platform) -> ExtractContext {
        ExtractContext::new(Arc::new(settings), platform, ProgressSink::disabled())
    }

    fn has_pair(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|w| w[0] == flag && w[1] == value)
    }

    #[test]
    fn test_download_args_follow_profile() {
        let mut settings = Settings::default();
        settings.tiktok.common.timeout_secs = Some(60);
        settings.tiktok.common.retries = Some(4);
        settings.tiktok.common.user_agent = Some("UA/1".to_string());
        settings.tiktok.common.cookies_from_browser = Some("firefox".to_string());
        settings.general.proxy = Some("socks5h://127.0.0.1:1080".to_string());
        let ctx = ctx(settings, Platform::Tiktok);

        let req = DownloadRequest::new("https://www.tiktok.com/@u/video/1");
        let args = YtDlpExtractor::download_args(&req, &ctx, &PathBuf::from("/out"), None);

        assert!(has_pair(&args, "--socket-timeout", "60"));
        assert!(has_pair(&args, "--retries", "4"));
        assert!(has_pair(&args, "--user-agent", "UA/1"));
        assert!(has_pair(&args, "--cookies-from-browser", "firefox"));
        assert!(has_pair(&args, "--proxy", "socks5h://127.0.0.1:1080"));
        assert!(has_pair(&args, "-P", "/out"));
        assert!(has_pair(&args, "--add-header", "Accept-Language:en-US,en;q=0.9"));
        assert!(args.contains(&"--no-playlist".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("youtube:player_client")));
        assert_eq!(args.last().unwrap(), "https://www.tiktok.com/@u/video/1");
    }

    #[test]
    fn test_youtube_audio_and_extras() {
        let mut settings = Settings::default();
        settings.youtube.write_subtitles = true;
        settings.media_processing.audio_format = "m4a".to_string();
        let ctx = ctx(settings, Platform::Youtube);

        let req = DownloadRequest::new("https://youtu.be/x").audio_only(true);
        let args = YtDlpExtractor::download_args(&req, &ctx, &PathBuf::from("/out"), Some("ios"));

        assert!(has_pair(&args, "-f", "ba[acodec^=mp4a]/ba/b"));
        assert!(has_pair(&args, "--audio-format", "m4a"));
        assert!(has_pair(&args, "--extractor-args", "youtube:player_client=ios"));
        assert!(args.contains(&"--write-thumbnail".to_string()));
        assert!(args.contains(&"--write-subs".to_string()));
        assert!(!args.contains(&"--merge-output-format".to_string()));
    }

    #[test]
    fn test_listing_limit_enables_playlist() {
        let ctx = ctx(Settings::default(), Platform::Youtube);
        let req = DownloadRequest::new("https://www.youtube.com/@chan/videos").with_limit(5);
        let args = YtDlpExtractor::download_args(&req, &ctx, &PathBuf::from("/out"), None);
        assert!(has_pair(&args, "--playlist-end", "5"));
        assert!(!args.contains(&"--no-playlist".to_string()));
    }

    #[test]
    fn test_clients_only_for_youtube() {
        let yt = ctx(Settings::default(), Platform::Youtube);
        assert_eq!(YtDlpExtractor::clients(&yt).len(), 3);

        let tw = ctx(Settings::default(), Platform::Twitter);
        assert_eq!(YtDlpExtractor::clients(&tw), vec![None]);
    }

    #[test]
    fn test_parse_info() {
        let json = br#"{
            "id": "abc", "title": "Clip", "uploader": "Someone", "duration": 61.5,
            "webpage_url": "https://youtu.be/abc", "thumbnail": "https://i.ytimg.com/x.jpg",
            "formats": [
                { "format_id": "137", "ext": "mp4", "height": 1080, "vcodec": "avc1.640028", "acodec": "none", "filesize": 1000 },
                { "format_id": "140", "ext": "m4a", "vcodec": "none", "acodec": "mp4a.40.2", "filesize_approx": 200 }
            ]
        }"#;
        let info = YtDlpExtractor::parse_info(json, Platform::Youtube).unwrap();
        assert_eq!(info.id, "abc");
        assert_eq!(info.duration_secs, Some(61.5));
        assert_eq!(info.formats.len(), 2);
        assert!(info.formats[0].is_h264());
        assert_eq!(info.formats[1].filesize, Some(200));
        assert_eq!(info.item_count, 1);
    }

    #[test]
    fn test_parse_playlist_info() {
        let json = br#"{ "_type": "playlist", "id": "PL1", "title": "List", "entries": [{}, {}, {}] }"#;
        let info = YtDlpExtractor::parse_info(json, Platform::Youtube).unwrap();
        assert_eq!(info.item_count, 3);
        assert_eq!(info.uploader, "Unknown");
    }

    #[test]
    fn test_parse_invalid_json() {
        assert!(matches!(
            YtDlpExtractor::parse_info(b"not json", Platform::Youtube),
            Err(DownloadError::ParseError(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_binary_reports_tool_not_found() {
        let extractor = YtDlpExtractor { ytdlp_path: None };
        let ctx = ctx(Settings::default(), Platform::Twitter);
        let err = extractor
            .fetch_info(&DownloadRequest::new("https://x.com/a/status/1"), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::ToolNotFound(_)));
        assert!(!extractor.is_available());
    }
}
