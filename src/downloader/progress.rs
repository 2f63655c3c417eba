// Progress reporting for running downloads

use regex::Regex;
use tokio::sync::mpsc::UnboundedSender;

use super::models::DownloadProgress;

/// Forwards progress updates to whoever is listening (scheduler, CLI).
///
/// A sink without a channel silently drops updates, so extractors can always
/// report progress regardless of how they were invoked.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    job_id: u64,
    tx: Option<UnboundedSender<DownloadProgress>>,
}

impl ProgressSink {
    pub fn new(job_id: u64, tx: UnboundedSender<DownloadProgress>) -> Self {
        Self { job_id, tx: Some(tx) }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn job_id(&self) -> u64 {
        self.job_id
    }

    pub fn emit(&self, percent: f32, status: impl Into<String>) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(DownloadProgress {
                job_id: self.job_id,
                percent: percent.clamp(0.0, 100.0),
                status: status.into(),
            });
        }
    }

    /// Report `done` of `total` items as a percentage
    pub fn emit_items(&self, done: usize, total: usize, status: impl Into<String>) {
        let percent = if total == 0 {
            0.0
        } else {
            done as f32 * 100.0 / total as f32
        };
        self.emit(percent, status);
    }
}

lazy_static::lazy_static! {
    static ref PROGRESS_RE: Regex = Regex::new(
        r"\[download\]\s+(\d+\.?\d*)%\s+of\s+~?\s*(\d+\.?\d*\s*\w+)\s+at\s+(\d+\.?\d*\s*\w+/s)(?:\s+ETA\s+(\S+))?(?:\s+\(frag\s+(\d+)/(\d+)\))?"
    ).unwrap();
    static ref DEST_RE: Regex = Regex::new(r"\[download\]\s+Destination:\s+(.+)").unwrap();
    static ref MERGE_RE: Regex = Regex::new(r"\[Merger?\]\s+Merging").unwrap();
    static ref ALREADY_RE: Regex = Regex::new(r"has already been downloaded").unwrap();
}

/// Parse a yt-dlp progress line like:
/// [download]   6.2% of ~ 343.72MiB at  420.30KiB/s ETA 12:32 (frag 29/454)
/// Returns (percent, status_string)
pub fn parse_ytdlp_progress(line: &str) -> Option<(f32, String)> {
    if let Some(caps) = PROGRESS_RE.captures(line) {
        let percent: f32 = caps.get(1)?.as_str().parse().ok()?;
        let size = caps.get(2).map(|m| m.as_str()).unwrap_or("?");
        let speed = caps.get(3).map(|m| m.as_str()).unwrap_or("?");
        let eta = caps.get(4).map(|m| m.as_str()).unwrap_or("");
        let frag_current = caps.get(5).map(|m| m.as_str());
        let frag_total = caps.get(6).map(|m| m.as_str());

        let status = if let (Some(fc), Some(ft)) = (frag_current, frag_total) {
            format!("{:.1}% of {} @ {} ETA {} (frag {}/{})", percent, size, speed, eta, fc, ft)
        } else if !eta.is_empty() {
            format!("{:.1}% of {} @ {} ETA {}", percent, size, speed, eta)
        } else {
            format!("{:.1}% of {} @ {}", percent, size, speed)
        };

        return Some((percent, status));
    }

    if let Some(caps) = DEST_RE.captures(line) {
        let filename = caps.get(1).map(|m| m.as_str()).unwrap_or("file");
        let short_name: String = filename
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(filename)
            .chars()
            .take(50)
            .collect();
        return Some((0.0, format!("Starting: {}", short_name)));
    }

    if MERGE_RE.is_match(line) {
        return Some((99.0, "Merging video and audio".to_string()));
    }

    if ALREADY_RE.is_match(line) {
        return Some((100.0, "File already downloaded".to_string()));
    }

    None
}
