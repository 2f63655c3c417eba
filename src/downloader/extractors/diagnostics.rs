// Classifies tool stderr and API error text into the reason a site refused
// the download, plus a hint for the settings key that may get around it.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::platform::Platform;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockingReason {
    Http403Forbidden,
    /// YouTube hides formats behind SABR streaming
    SabrStreaming,
    /// YouTube proof-of-origin token
    PoTokenRequired,
    AgeRestricted,
    /// Instagram / TikTok / Twitter login wall
    LoginRequired,
    GeoBlocked,
    /// Often a soft IP block
    NetworkTimeout,
    RateLimited,
    BotDetection,
    PrivateContent,
    ContentUnavailable,
    DrmProtected,
    MembersOnly,
    Unknown,
}

/// Needles per reason, checked top to bottom; the first rule with a hit wins.
const RULES: &[(BlockingReason, &[&str])] = &[
    (
        BlockingReason::DrmProtected,
        &["drm", "widevine", "playready", "fairplay", "requires purchase", "requires payment"],
    ),
    (
        BlockingReason::MembersOnly,
        &["members only", "members-only", "join this channel", "available to members"],
    ),
    (BlockingReason::SabrStreaming, &["sabr"]),
    (BlockingReason::PoTokenRequired, &["po token", "proof of origin"]),
    (
        BlockingReason::AgeRestricted,
        &["age-restricted", "confirm your age", "age_verification", "nsfw tweet"],
    ),
    (
        BlockingReason::LoginRequired,
        &["login required", "log in to", "please log in", "authorizationerror", "use --cookies"],
    ),
    (
        BlockingReason::PrivateContent,
        &["private video", "video is private", "account is private", "post is private", "been granted access"],
    ),
    (
        BlockingReason::ContentUnavailable,
        &[
            "video unavailable",
            "video is unavailable",
            "has been removed",
            "no longer available",
            "http error 404",
            "does not exist",
            "[deleted]",
        ],
    ),
    (
        BlockingReason::GeoBlocked,
        &["in your country", "geo restricted", "geo-restricted", "geographic restriction"],
    ),
    (BlockingReason::RateLimited, &["429", "rate limit", "too many requests"]),
    (
        BlockingReason::BotDetection,
        &["not a bot", "bot detection", "captcha", "unusual traffic", "automated"],
    ),
    (BlockingReason::Http403Forbidden, &["403", "forbidden"]),
    (
        BlockingReason::NetworkTimeout,
        &["timeout", "timed out", "connection refused", "connection reset", "network unreachable"],
    ),
];

impl BlockingReason {
    /// Another attempt, possibly with cookies or a proxy, could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Http403Forbidden
                | Self::SabrStreaming
                | Self::PoTokenRequired
                | Self::NetworkTimeout
                | Self::RateLimited
                | Self::BotDetection
        )
    }

    /// No other extractor or setting will get around this
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::DrmProtected | Self::ContentUnavailable)
    }

    pub fn cookies_might_help(&self) -> bool {
        matches!(
            self,
            Self::Http403Forbidden
                | Self::SabrStreaming
                | Self::PoTokenRequired
                | Self::AgeRestricted
                | Self::LoginRequired
                | Self::BotDetection
                | Self::PrivateContent
                | Self::MembersOnly
        )
    }

    pub fn proxy_might_help(&self) -> bool {
        matches!(
            self,
            Self::Http403Forbidden | Self::GeoBlocked | Self::NetworkTimeout | Self::RateLimited | Self::BotDetection
        )
    }

    /// 1 (transient) to 5 (nothing to be done)
    pub fn severity(&self) -> u8 {
        match self {
            Self::DrmProtected | Self::ContentUnavailable => 5,
            Self::PrivateContent | Self::GeoBlocked | Self::MembersOnly => 4,
            Self::AgeRestricted | Self::LoginRequired | Self::PoTokenRequired | Self::SabrStreaming => 3,
            Self::Http403Forbidden | Self::BotDetection | Self::RateLimited => 2,
            Self::NetworkTimeout | Self::Unknown => 1,
        }
    }

    /// Hint naming the settings keys to change for `platform`
    pub fn suggestion(&self, platform: Platform) -> String {
        match self {
            Self::Http403Forbidden => format!(
                "Set {p}.cookies_from_browser or {p}.cookies_file, or route through general.proxy",
                p = platform
            ),
            Self::SabrStreaming | Self::PoTokenRequired => format!(
                "Update yt-dlp (smd tools update yt-dlp) and set {}.cookies_from_browser",
                platform
            ),
            Self::AgeRestricted | Self::LoginRequired | Self::PrivateContent | Self::MembersOnly => format!(
                "Export cookies from a logged-in browser and set {}.cookies_from_browser",
                platform
            ),
            Self::GeoBlocked => "Use general.proxy with a server in an allowed region".to_string(),
            Self::NetworkTimeout => format!("Check the connection or raise {}.timeout_secs", platform),
            Self::RateLimited | Self::BotDetection => {
                format!("Lower {}.requests_per_minute or wait before retrying", platform)
            }
            Self::ContentUnavailable => "The content was removed or the URL is wrong".to_string(),
            Self::DrmProtected => "DRM-protected content cannot be saved as a file".to_string(),
            Self::Unknown => "Check the URL and run again with -v for details".to_string(),
        }
    }
}

impl fmt::Display for BlockingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Http403Forbidden => "access denied (HTTP 403)",
            Self::SabrStreaming => "SABR streaming protection",
            Self::PoTokenRequired => "proof-of-origin token required",
            Self::AgeRestricted => "age-restricted",
            Self::LoginRequired => "login required",
            Self::GeoBlocked => "geo-blocked",
            Self::NetworkTimeout => "network timeout",
            Self::RateLimited => "rate limited",
            Self::BotDetection => "bot detection",
            Self::PrivateContent => "private content",
            Self::ContentUnavailable => "content unavailable",
            Self::DrmProtected => "DRM-protected",
            Self::MembersOnly => "members-only",
            Self::Unknown => "unknown",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockingDiagnostics {
    pub reason: BlockingReason,
    /// First line of the error that looks like the actual complaint
    pub context: Option<String>,
    pub recommend_cookies: bool,
    pub recommend_proxy: bool,
    pub severity: u8,
    /// Needles of the winning rule found in the text
    pub matched_patterns: Vec<String>,
}

fn classify(lower: &str) -> Option<(BlockingReason, Vec<String>)> {
    RULES.iter().find_map(|(reason, needles)| {
        let hits: Vec<String> = needles
            .iter()
            .filter(|n| lower.contains(**n))
            .map(|n| n.to_string())
            .collect();
        (!hits.is_empty()).then(|| (*reason, hits))
    })
}

/// Reason behind an error text; `None` only for blank input
pub fn diagnose_error(error: &str) -> Option<BlockingReason> {
    if error.trim().is_empty() {
        return None;
    }
    let reason = classify(&error.to_lowercase()).map_or(BlockingReason::Unknown, |(r, _)| r);
    Some(reason)
}

pub fn analyze_error(error: &str) -> BlockingDiagnostics {
    let (reason, matched_patterns) =
        classify(&error.to_lowercase()).unwrap_or((BlockingReason::Unknown, Vec::new()));

    let context = error
        .lines()
        .map(str::trim)
        .find(|line| {
            let l = line.to_lowercase();
            l.starts_with("error:") || l.contains("[error]") || l.contains("forbidden") || l.contains("unavailable")
        })
        .map(str::to_string);

    BlockingDiagnostics {
        reason,
        context,
        recommend_cookies: reason.cookies_might_help(),
        recommend_proxy: reason.proxy_might_help(),
        severity: reason.severity(),
        matched_patterns,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_403_detection() {
        assert_eq!(
            diagnose_error("ERROR: HTTP Error 403: Forbidden"),
            Some(BlockingReason::Http403Forbidden)
        );
    }

    #[test]
    fn test_sabr_detection() {
        assert_eq!(
            diagnose_error("YouTube is forcing SABR streaming for this client"),
            Some(BlockingReason::SabrStreaming)
        );
    }

    #[test]
    fn test_instagram_login_wall() {
        let error = "ERROR: [Instagram] abc: Requested content is not available, rate-limit reached or login required";
        assert_eq!(diagnose_error(error), Some(BlockingReason::LoginRequired));
        assert!(BlockingReason::LoginRequired.cookies_might_help());
    }

    #[test]
    fn test_gallery_dl_auth_error() {
        let error = "[instagram][error] AuthorizationError: Login required";
        assert_eq!(diagnose_error(error), Some(BlockingReason::LoginRequired));
    }

    #[test]
    fn test_private_account() {
        assert_eq!(
            diagnose_error("ERROR: This account is private"),
            Some(BlockingReason::PrivateContent)
        );
    }

    #[test]
    fn test_removed_content_is_permanent() {
        let reason = diagnose_error("ERROR: [TikTok] 123: Video has been removed").unwrap();
        assert_eq!(reason, BlockingReason::ContentUnavailable);
        assert!(reason.is_permanent());
        assert!(!reason.is_retryable());
    }

    #[test]
    fn test_rate_limit_detection() {
        assert_eq!(
            diagnose_error("HTTP Error 429: Too Many Requests"),
            Some(BlockingReason::RateLimited)
        );
        assert!(BlockingReason::RateLimited.is_retryable());
    }

    #[test]
    fn test_timeout_and_geo() {
        assert_eq!(diagnose_error("Timed out after 30s"), Some(BlockingReason::NetworkTimeout));
        assert_eq!(
            diagnose_error("Video not available in your country"),
            Some(BlockingReason::GeoBlocked)
        );
    }

    #[test]
    fn test_drm_detection() {
        assert_eq!(
            diagnose_error("Widevine encrypted content cannot be downloaded"),
            Some(BlockingReason::DrmProtected)
        );
    }

    #[test]
    fn test_empty_error() {
        assert_eq!(diagnose_error("   "), None);
        assert_eq!(diagnose_error("something odd"), Some(BlockingReason::Unknown));
    }

    #[test]
    fn test_suggestion_names_platform_keys() {
        let hint = BlockingReason::LoginRequired.suggestion(Platform::Instagram);
        assert!(hint.contains("instagram.cookies_from_browser"));

        let hint = BlockingReason::RateLimited.suggestion(Platform::Reddit);
        assert!(hint.contains("reddit.requests_per_minute"));
    }

    #[test]
    fn test_analyze_error_context() {
        let diag = analyze_error("[debug] starting\nERROR: HTTP Error 403: Forbidden\n");
        assert_eq!(diag.reason, BlockingReason::Http403Forbidden);
        assert_eq!(diag.context.as_deref(), Some("ERROR: HTTP Error 403: Forbidden"));
        assert!(diag.recommend_proxy);
        assert_eq!(diag.matched_patterns, vec!["403", "forbidden"]);
        assert_eq!(diag.severity, 2);
    }
}
