// Extractors - per-platform media retrieval
//
// Two families:
// - Tool-backed: yt-dlp (video sites) and gallery-dl (image posts, galleries)
// - API-backed: Reddit listings and Redgifs, fetched natively with reqwest
//
// The Downloader in `orchestrator.rs` picks a chain per platform and falls
// back between them.

mod diagnostics;
mod gallery_dl;
mod reddit;
mod redgifs;
mod traits;
mod ytdlp;

pub use diagnostics::{analyze_error, diagnose_error, BlockingDiagnostics, BlockingReason};
pub use gallery_dl::GalleryDlExtractor;
pub use reddit::{MediaItem, Post, RedditExtractor, RedditTarget};
pub use redgifs::{RedgifsExtractor, RedgifsTarget};
pub use traits::{ExtractContext, Extractor};
pub use ytdlp::YtDlpExtractor;
