// Multi-platform social media downloader
//
// Configuration lives in one JSON document (config). Downloads are dispatched
// per platform to extractors backed by yt-dlp, gallery-dl or the sites' public
// JSON APIs, and run through a throttled, concurrency-limited scheduler.

pub mod analytics;
pub mod config;
pub mod cookies;
pub mod downloader;
pub mod error_log;
pub mod files;
pub mod logging;
pub mod media;
pub mod platform;
pub mod scheduler;

pub use config::{ConfigManager, Settings};
pub use downloader::{DownloadError, DownloadRequest, Downloader};
pub use platform::Platform;
pub use scheduler::DownloadScheduler;
