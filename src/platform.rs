// Supported platforms and URL detection

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Youtube,
    Tiktok,
    Instagram,
    Reddit,
    Redgifs,
    Xvideos,
    Twitter,
    Generic,
}

impl Platform {
    pub const ALL: [Platform; 8] = [
        Platform::Youtube,
        Platform::Tiktok,
        Platform::Instagram,
        Platform::Reddit,
        Platform::Redgifs,
        Platform::Xvideos,
        Platform::Twitter,
        Platform::Generic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Youtube => "youtube",
            Self::Tiktok => "tiktok",
            Self::Instagram => "instagram",
            Self::Reddit => "reddit",
            Self::Redgifs => "redgifs",
            Self::Xvideos => "xvideos",
            Self::Twitter => "twitter",
            Self::Generic => "generic",
        }
    }

    /// Platforms gated behind `license.adult_content_enabled`
    pub fn is_adult(&self) -> bool {
        matches!(self, Self::Redgifs | Self::Xvideos)
    }

    /// Detect the platform from a URL or a shorthand such as `r/rust`.
    pub fn detect(input: &str) -> Self {
        let lower = input.trim().to_lowercase();

        if lower.contains("youtube.com") || lower.contains("youtu.be") {
            return Self::Youtube;
        }
        if lower.contains("tiktok.com") {
            return Self::Tiktok;
        }
        if lower.contains("instagram.com") {
            return Self::Instagram;
        }
        if lower.contains("twitter.com") || host_matches(&lower, "x.com") {
            return Self::Twitter;
        }
        if lower.contains("reddit.com") || lower.contains("redd.it") || lower.starts_with("r/") {
            return Self::Reddit;
        }
        if lower.contains("redgifs.com") {
            return Self::Redgifs;
        }
        if lower.contains("xvideos.com") {
            return Self::Xvideos;
        }

        Self::Generic
    }
}

/// `x.com` is a suffix of many unrelated hosts, so match it on the host only.
fn host_matches(url: &str, host: &str) -> bool {
    let without_scheme = url.split("://").nth(1).unwrap_or(url);
    let authority = without_scheme.split(['/', '?', '#']).next().unwrap_or("");
    let hostname = authority.rsplit('@').next().unwrap_or(authority);
    let hostname = hostname.split(':').next().unwrap_or(hostname);
    hostname == host || hostname.ends_with(&format!(".{}", host))
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown platform: {}", s))
    }
}
