// FormatSelector - maps quality settings to yt-dlp format expressions
//
// Handles:
// - Standard resolution mapping (1080p, 720p, 480p, 360p, any `<n>p`)
// - Audio-only extraction
// - Codec preferences (H.264 + AAC for player compatibility)
// - A global height cap from `quality_settings.max_height`

use super::models::MediaFormat;

pub struct FormatSelector;

impl FormatSelector {
    /// yt-dlp `-f` expression for a quality string and codec preference.
    pub fn format_spec(quality: &str, codec: &str, max_height: Option<u32>) -> String {
        if quality == "audio" {
            return if codec == "h264" {
                "ba[acodec^=mp4a]/ba/b".to_string()
            } else {
                "ba/b".to_string()
            };
        }
        if quality == "worst" {
            return "wv*+wa/worst".to_string();
        }

        let requested = Self::height_of(quality);
        let height = match (requested, max_height) {
            (Some(q), Some(cap)) => Some(q.min(cap)),
            (q, cap) => q.or(cap),
        };

        match (height, codec == "h264") {
            (Some(h), true) => format!(
                "bv*[height<={h}][vcodec^=avc1]+ba[acodec^=mp4a]/bv*[height<={h}]+ba/b[height<={h}]/best",
                h = h
            ),
            (Some(h), false) => format!("bv*[height<={h}]+ba/b[height<={h}]/best", h = h),
            (None, true) => "bv*[vcodec^=avc1]+ba[acodec^=mp4a]/bv*[vcodec^=avc]+ba/bv*+ba/best".to_string(),
            (None, false) => "bv*+ba/best".to_string(),
        }
    }

    /// `1080p` -> 1080; `best` and unknown strings -> None
    pub fn height_of(quality: &str) -> Option<u32> {
        quality
            .strip_suffix('p')
            .and_then(|h| h.parse::<u32>().ok())
            .filter(|h| *h > 0)
    }

    pub fn label_for_height(height: u32) -> String {
        match height {
            h if h >= 2160 => "2160p".to_string(),
            h if h >= 1440 => "1440p".to_string(),
            h if h >= 1080 => "1080p".to_string(),
            h if h >= 720 => "720p".to_string(),
            h if h >= 480 => "480p".to_string(),
            h if h >= 360 => "360p".to_string(),
            h => format!("{}p", h),
        }
    }

    /// Recommended quality given the formats a video offers
    pub fn recommend_quality(formats: &[MediaFormat]) -> &'static str {
        let max_height = formats.iter().filter_map(|f| f.height).max().unwrap_or(0);

        if max_height >= 1080 {
            "1080p"
        } else if max_height >= 720 {
            "720p"
        } else if max_height >= 480 {
            "480p"
        } else {
            "best"
        }
    }

    /// Distinct resolution labels offered, highest first
    pub fn available_qualities(formats: &[MediaFormat]) -> Vec<String> {
        let mut heights: Vec<u32> = formats
            .iter()
            .filter(|f| !f.is_audio_only())
            .filter_map(|f| f.height)
            .collect();
        heights.sort_unstable_by(|a, b| b.cmp(a));

        let mut labels: Vec<String> = Vec::new();
        for h in heights {
            let label = Self::label_for_height(h);
            if !labels.contains(&label) {
                labels.push(label);
            }
        }
        if formats.iter().any(MediaFormat::is_audio_only) {
            labels.push("audio".to_string());
        }
        labels
    }

    /// Format file size for display
    pub fn format_size(bytes: u64) -> String {
        let mb = bytes as f64 / 1_048_576.0;
        if mb >= 1024.0 {
            format!("{:.1} GB", mb / 1024.0)
        } else if mb >= 1.0 {
            format!("{:.0} MB", mb)
        } else {
            format!("{:.0} KB", bytes as f64 / 1024.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(height: u32, vcodec: &str) -> MediaFormat {
        MediaFormat {
            format_id: format!("{}p", height),
            ext: "mp4".to_string(),
            width: Some(height * 16 / 9),
            height: Some(height),
            vcodec: Some(vcodec.to_string()),
            acodec: Some("none".to_string()),
            filesize: None,
            url: None,
        }
    }

    fn audio() -> MediaFormat {
        MediaFormat {
            format_id: "140".to_string(),
            ext: "m4a".to_string(),
            width: None,
            height: None,
            vcodec: Some("none".to_string()),
            acodec: Some("mp4a.40.2".to_string()),
            filesize: None,
            url: None,
        }
    }

    #[test]
    fn test_h264_spec_for_height() {
        let spec = FormatSelector::format_spec("720p", "h264", None);
        assert!(spec.starts_with("bv*[height<=720][vcodec^=avc1]+ba[acodec^=mp4a]"));
        assert!(spec.ends_with("/best"));
    }

    #[test]
    fn test_any_codec_best() {
        assert_eq!(FormatSelector::format_spec("best", "any", None), "bv*+ba/best");
        assert_eq!(FormatSelector::format_spec("audio", "any", None), "ba/b");
    }

    #[test]
    fn test_max_height_caps_request() {
        let spec = FormatSelector::format_spec("1080p", "any", Some(480));
        assert_eq!(spec, "bv*[height<=480]+ba/b[height<=480]/best");

        let spec = FormatSelector::format_spec("best", "any", Some(720));
        assert_eq!(spec, "bv*[height<=720]+ba/b[height<=720]/best");
    }

    #[test]
    fn test_height_parsing() {
        assert_eq!(FormatSelector::height_of("1440p"), Some(1440));
        assert_eq!(FormatSelector::height_of("best"), None);
        assert_eq!(FormatSelector::height_of("0p"), None);
    }

    #[test]
    fn test_available_qualities() {
        let formats = vec![video(1080, "avc1"), video(1080, "vp9"), video(720, "avc1"), audio()];
        assert_eq!(
            FormatSelector::available_qualities(&formats),
            vec!["1080p", "720p", "audio"]
        );
        assert_eq!(FormatSelector::recommend_quality(&formats), "1080p");
    }

    #[test]
    fn test_format_size() {
        assert_eq!(FormatSelector::format_size(512 * 1024), "512 KB");
        assert_eq!(FormatSelector::format_size(150 * 1_048_576), "150 MB");
        assert_eq!(FormatSelector::format_size(3 * 1024 * 1_048_576), "3.0 GB");
    }
}
