// Downloader module - extractors, fallback orchestration and the helpers they share

pub mod errors;
pub mod extractors;
pub mod format_selector;
pub mod http;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod tools;
pub mod utils;

pub use errors::DownloadError;
pub use models::{DownloadOutcome, DownloadProgress, DownloadRequest, MediaFormat, MediaInfo, NetworkConfig};
pub use orchestrator::Downloader;
pub use progress::ProgressSink;
