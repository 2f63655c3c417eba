// ffmpeg/ffprobe wrappers: slideshows and audio handling

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::{MediaProcessingSettings, Settings};
use crate::downloader::errors::DownloadError;
use crate::downloader::tools::{ToolManager, ToolType};
use crate::downloader::utils::run_output_with_timeout;

const PROBE_TIMEOUT_SECS: u64 = 30;

pub struct MediaProcessor {
    ffmpeg: Option<String>,
    ffprobe: Option<String>,
    config: MediaProcessingSettings,
    frame_rate: u32,
}

impl MediaProcessor {
    pub fn new(settings: &Settings, tools: &ToolManager) -> Self {
        Self {
            ffmpeg: tools.resolve(ToolType::Ffmpeg),
            ffprobe: tools.resolve(ToolType::Ffprobe),
            config: settings.media_processing.clone(),
            frame_rate: settings.slideshow_defaults.frame_rate,
        }
    }

    pub fn with_paths(settings: &Settings, ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self {
            ffmpeg: Some(ffmpeg.into()),
            ffprobe: Some(ffprobe.into()),
            config: settings.media_processing.clone(),
            frame_rate: settings.slideshow_defaults.frame_rate,
        }
    }

    pub fn is_available(&self) -> bool {
        self.ffmpeg.is_some()
    }

    fn ffmpeg(&self) -> Result<&str, DownloadError> {
        self.ffmpeg
            .as_deref()
            .ok_or_else(|| DownloadError::ToolNotFound("ffmpeg".to_string()))
    }

    /// Input for ffmpeg's concat demuxer. The last image is listed twice so
    /// its duration is honoured.
    pub fn concat_list(images: &[PathBuf], duration_per_image: f64) -> String {
        let mut list = String::new();
        for image in images {
            list.push_str(&format!("file '{}'\n", escape_concat_path(image)));
            list.push_str(&format!("duration {}\n", duration_per_image));
        }
        if let Some(last) = images.last() {
            list.push_str(&format!("file '{}'\n", escape_concat_path(last)));
        }
        list
    }

    pub fn slideshow_args(&self, list_file: &Path, audio: Option<&Path>, output: &Path) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-f".into(),
            "concat".into(),
            "-safe".into(),
            "0".into(),
            "-i".into(),
            list_file.to_string_lossy().into_owned(),
        ];
        if let Some(audio) = audio {
            args.push("-i".into());
            args.push(audio.to_string_lossy().into_owned());
        }

        args.extend([
            "-c:v".to_string(),
            self.config.video_codec.clone(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-r".to_string(),
            self.frame_rate.to_string(),
            // x264 needs even dimensions
            "-vf".to_string(),
            "scale=trunc(iw/2)*2:trunc(ih/2)*2".to_string(),
        ]);

        if audio.is_some() {
            args.extend([
                "-c:a".to_string(),
                self.config.audio_codec.clone(),
                "-shortest".to_string(),
            ]);
        }

        args.push("-y".into());
        args.push(output.to_string_lossy().into_owned());
        args
    }

    /// Render images (and optional audio) into a video at `output`
    pub async fn create_slideshow(
        &self,
        images: &[PathBuf],
        audio: Option<&Path>,
        duration_per_image: f64,
        output: &Path,
    ) -> Result<PathBuf, DownloadError> {
        if images.is_empty() {
            return Err(DownloadError::Unknown("No images provided for slideshow".to_string()));
        }
        let ffmpeg = self.ffmpeg()?;

        let audio = audio.filter(|a| a.exists());
        let audio_secs = match audio {
            Some(a) => match self.probe_duration(a).await {
                Ok(secs) => Some(secs),
                Err(e) => {
                    warn!("Could not read soundtrack length: {}", e);
                    None
                }
            },
            None => None,
        };
        let duration_per_image = fit_to_soundtrack(duration_per_image, images.len(), audio_secs);

        let list_file = output.with_extension("concat.txt");
        tokio::fs::write(&list_file, Self::concat_list(images, duration_per_image)).await?;

        let args = self.slideshow_args(&list_file, audio, output);
        debug!("{} {}", ffmpeg, args.join(" "));
        let result = run_output_with_timeout(ffmpeg, args, self.config.timeout_secs).await;

        if let Err(e) = tokio::fs::remove_file(&list_file).await {
            warn!("Could not remove {}: {}", list_file.display(), e);
        }

        let out = result?;
        if !out.status.success() {
            return Err(DownloadError::ExecutionError(format!(
                "ffmpeg slideshow failed: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        info!("Created slideshow video: {}", output.display());
        Ok(output.to_path_buf())
    }

    /// Duration in seconds as reported by ffprobe
    pub async fn probe_duration(&self, path: &Path) -> Result<f64, DownloadError> {
        let ffprobe = self
            .ffprobe
            .as_deref()
            .ok_or_else(|| DownloadError::ToolNotFound("ffprobe".to_string()))?;
        let args = vec![
            "-v".to_string(),
            "quiet".to_string(),
            "-show_entries".to_string(),
            "format=duration".to_string(),
            "-of".to_string(),
            "default=noprint_wrappers=1:nokey=1".to_string(),
            path.to_string_lossy().into_owned(),
        ];
        let out = run_output_with_timeout(ffprobe, args, PROBE_TIMEOUT_SECS).await?;
        if !out.status.success() {
            return Err(DownloadError::ExecutionError(String::from_utf8_lossy(&out.stderr).into_owned()));
        }
        parse_duration(&String::from_utf8_lossy(&out.stdout))
    }

    /// Extension audio-only downloads end up with
    pub fn audio_format(&self) -> &str {
        &self.config.audio_format
    }

    /// Re-encode audio (or the audio track of a video) into the configured
    /// format and bitrate
    pub async fn convert_audio(&self, input: &Path, output_dir: &Path) -> Result<PathBuf, DownloadError> {
        let output = output_dir.join(
            input
                .with_extension(&self.config.audio_format)
                .file_name()
                .unwrap_or_default(),
        );
        let args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            input.to_string_lossy().into_owned(),
            "-vn".to_string(),
            "-acodec".to_string(),
            audio_encoder(&self.config.audio_format).to_string(),
            "-b:a".to_string(),
            self.config.audio_bitrate.clone(),
            "-y".to_string(),
            output.to_string_lossy().into_owned(),
        ];
        self.run_ffmpeg(args, "audio conversion").await?;
        Ok(output)
    }

    async fn run_ffmpeg(&self, args: Vec<String>, what: &str) -> Result<(), DownloadError> {
        let ffmpeg = self.ffmpeg()?;
        debug!("{} {}", ffmpeg, args.join(" "));
        let out = run_output_with_timeout(ffmpeg, args, self.config.timeout_secs).await?;
        if out.status.success() {
            Ok(())
        } else {
            Err(DownloadError::ExecutionError(format!(
                "ffmpeg {} failed: {}",
                what,
                String::from_utf8_lossy(&out.stderr).trim()
            )))
        }
    }
}

/// Stretch the per-image time so the images cover the whole soundtrack
fn fit_to_soundtrack(per_image: f64, images: usize, audio_secs: Option<f64>) -> f64 {
    match audio_secs {
        Some(secs) if images > 0 && secs > per_image * images as f64 => secs / images as f64,
        _ => per_image,
    }
}

fn escape_concat_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/").replace('\'', "'\\''")
}

fn audio_encoder(format: &str) -> &str {
    match format {
        "mp3" => "libmp3lame",
        "m4a" | "aac" => "aac",
        "opus" | "ogg" => "libopus",
        "flac" => "flac",
        "wav" => "pcm_s16le",
        other => other,
    }
}

fn parse_duration(stdout: &str) -> Result<f64, DownloadError> {
    stdout
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d >= 0.0)
        .ok_or_else(|| DownloadError::ParseError(format!("Unexpected ffprobe duration: {:?}", stdout.trim())))
}
