// Error types for the download dispatch layer

use thiserror::Error;

use crate::platform::Platform;

#[derive(Debug, Clone, Error)]
pub enum DownloadError {
    /// Network timeout while talking to the site or the tool
    #[error("Network timeout: the site is not responding")]
    NetworkTimeout,

    /// The site rejected the request (429, bot detection, 403)
    #[error("Request blocked by the site: {0}")]
    Blocked(String),

    /// External tool missing from the system
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// No extractor can handle this URL
    #[error("Unsupported URL: {0}")]
    UnsupportedUrl(String),

    /// Failed to parse tool or API output
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Command execution failed
    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Downloads from {0} are disabled in the configuration")]
    PlatformDisabled(Platform),

    #[error("{0} content requires license.adult_content_enabled")]
    LicenseRequired(Platform),

    #[error("Download cancelled")]
    Cancelled,

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl DownloadError {
    /// Stable short label, used for analytics and event logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "network_timeout",
            Self::Blocked(_) => "blocked",
            Self::ToolNotFound(_) => "tool_not_found",
            Self::InvalidUrl(_) => "invalid_url",
            Self::UnsupportedUrl(_) => "unsupported_url",
            Self::ParseError(_) => "parse_error",
            Self::ExecutionError(_) => "execution_error",
            Self::Http { .. } => "http",
            Self::Io(_) => "io",
            Self::PlatformDisabled(_) => "platform_disabled",
            Self::LicenseRequired(_) => "license_required",
            Self::Cancelled => "cancelled",
            Self::Unknown(_) => "unknown",
        }
    }

    /// Whether another attempt with the same settings could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkTimeout | Self::Blocked(_) | Self::Io(_) => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::ExecutionError(msg) | Self::Unknown(msg) => {
                super::extractors::diagnose_error(msg).map_or(false, |r| r.is_retryable())
            }
            _ => false,
        }
    }
}

impl From<std::io::Error> for DownloadError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::TimedOut {
            return Self::NetworkTimeout;
        }
        Self::Io(e.to_string())
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Self::NetworkTimeout;
        }
        if let Some(status) = e.status() {
            return Self::Http {
                status: status.as_u16(),
                url: e.url().map(|u| u.to_string()).unwrap_or_default(),
            };
        }
        if e.is_decode() {
            return Self::ParseError(e.to_string());
        }
        Self::from(e.to_string())
    }
}

// Classify raw stderr / error strings coming back from the tools
impl From<String> for DownloadError {
    fn from(s: String) -> Self {
        let lower = s.to_lowercase();

        if lower.contains("timeout") || lower.contains("timed out") {
            return Self::NetworkTimeout;
        }

        if lower.contains("429")
            || lower.contains("too many requests")
            || lower.contains("bot")
            || lower.contains("blocked")
            || lower.contains("403")
        {
            return Self::Blocked(s);
        }

        if lower.contains("command not found")
            || lower.contains("no such file or directory")
            || lower.contains("failed to start")
        {
            return Self::ToolNotFound(s);
        }

        if lower.contains("unsupported url") {
            return Self::UnsupportedUrl(s);
        }
        if lower.contains("invalid url") || lower.contains("is not a valid url") {
            return Self::InvalidUrl(s);
        }

        if lower.contains("parse") || lower.contains("json") {
            return Self::ParseError(s);
        }

        Self::Unknown(s)
    }
}

impl From<&str> for DownloadError {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}
