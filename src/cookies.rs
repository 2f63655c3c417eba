// Per-platform cookie files for yt-dlp and gallery-dl.
//
// Cookies are imported from the three formats users usually have at hand
// (a Netscape cookies.txt, a browser-extension JSON export, or a raw `Cookie:`
// header) and always stored as Netscape files under `<config dir>/cookies`,
// named `<platform>_<kind>.txt`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::platform::Platform;

pub const COOKIES_DIR_NAME: &str = "cookies";
pub const NETSCAPE_HEADER: &str = "# Netscape HTTP Cookie File";

/// Kind used for cookies entered or imported by hand
pub const MANUAL_KIND: &str = "manual";

/// Lookup order after the manual file
const BROWSER_KINDS: [&str; 4] = ["chrome", "brave", "firefox", "edge"];

const HTTP_ONLY_PREFIX: &str = "#HttpOnly_";

#[derive(Debug, Error)]
pub enum CookieError {
    #[error("I/O error accessing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid cookie JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no usable cookies found in the input")]
    Empty,

    #[error("no cookie domain is known for {0}; import a Netscape or JSON export instead")]
    UnknownDomain(Platform),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieFormat {
    Netscape,
    Json,
    Header,
}

impl CookieFormat {
    /// Guess the format of pasted or exported cookie text
    pub fn detect(text: &str) -> Self {
        let trimmed = text.trim_start();
        if trimmed.starts_with('[') || trimmed.starts_with('{') {
            Self::Json
        } else if trimmed.starts_with(NETSCAPE_HEADER) || text.lines().any(|l| l.split('\t').count() >= 7) {
            Self::Netscape
        } else {
            Self::Header
        }
    }
}

impl FromStr for CookieFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "netscape" | "txt" => Ok(Self::Netscape),
            "json" => Ok(Self::Json),
            "header" => Ok(Self::Header),
            other => Err(format!("Unknown cookie format: {} (expected netscape, json or header)", other)),
        }
    }
}

impl fmt::Display for CookieFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Netscape => "netscape",
            Self::Json => "json",
            Self::Header => "header",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub domain: String,
    pub include_subdomains: bool,
    pub path: String,
    pub secure: bool,
    /// Unix seconds; 0 for session cookies
    pub expires: i64,
    pub name: String,
    pub value: String,
}

impl Cookie {
    fn netscape_line(&self) -> String {
        let flag = |b: bool| if b { "TRUE" } else { "FALSE" };
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.domain,
            flag(self.include_subdomains),
            self.path,
            flag(self.secure),
            self.expires,
            self.name,
            self.value
        )
    }

    fn is_expired(&self, now: i64) -> bool {
        self.expires > 0 && self.expires < now
    }
}

/// Cookie as exported by browser extensions such as "EditThisCookie"
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonCookie {
    domain: Option<String>,
    path: Option<String>,
    #[serde(default)]
    secure: bool,
    host_only: Option<bool>,
    expiration_date: Option<f64>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CookieFileInfo {
    pub kind: String,
    pub file: String,
    pub valid: bool,
    pub cookies: usize,
    pub expired: usize,
    pub modified: Option<String>,
}

/// Domain used when the input carries none (header format)
pub fn cookie_domain(platform: Platform) -> Option<&'static str> {
    match platform {
        Platform::Youtube => Some(".youtube.com"),
        Platform::Tiktok => Some(".tiktok.com"),
        Platform::Instagram => Some(".instagram.com"),
        Platform::Reddit => Some(".reddit.com"),
        Platform::Redgifs => Some(".redgifs.com"),
        Platform::Xvideos => Some(".xvideos.com"),
        Platform::Twitter => Some(".x.com"),
        Platform::Generic => None,
    }
}

pub fn parse_netscape(text: &str) -> Vec<Cookie> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim_end_matches('\r');
            let line = line.strip_prefix(HTTP_ONLY_PREFIX).unwrap_or(line);
            if line.trim().is_empty() || line.starts_with('#') {
                return None;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 7 {
                debug!("Skipping malformed cookie line");
                return None;
            }
            Some(Cookie {
                domain: fields[0].to_string(),
                include_subdomains: fields[1].eq_ignore_ascii_case("TRUE"),
                path: fields[2].to_string(),
                secure: fields[3].eq_ignore_ascii_case("TRUE"),
                expires: fields[4].trim().parse().unwrap_or(0),
                name: fields[5].to_string(),
                value: fields[6..].join("\t"),
            })
        })
        .collect()
}

pub fn parse_json(text: &str, platform: Platform) -> Result<Vec<Cookie>, CookieError> {
    let raw: Vec<JsonCookie> = match serde_json::from_str::<serde_json::Value>(text)? {
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<_, _>>()?,
        // Some exporters wrap the list: {"cookies": [...]}
        serde_json::Value::Object(mut map) => match map.remove("cookies") {
            Some(list) => serde_json::from_value(list)?,
            None => vec![serde_json::from_value(serde_json::Value::Object(map))?],
        },
        _ => return Err(CookieError::Empty),
    };

    let fallback = cookie_domain(platform).unwrap_or_default();
    Ok(raw
        .into_iter()
        .filter(|c| !c.name.is_empty() && !c.value.is_empty())
        .map(|c| {
            let domain = c.domain.unwrap_or_else(|| fallback.to_string());
            Cookie {
                include_subdomains: !c.host_only.unwrap_or(false) && domain.starts_with('.'),
                domain,
                path: c.path.unwrap_or_else(|| "/".to_string()),
                secure: c.secure,
                expires: c.expiration_date.filter(|e| e.is_finite() && *e > 0.0).map_or(0, |e| e as i64),
                name: c.name,
                value: c.value,
            }
        })
        .collect())
}

/// `name=value; other=value` as copied from a request's Cookie header.
/// Cookies get a one year lifetime.
pub fn parse_header(text: &str, platform: Platform, now: OffsetDateTime) -> Result<Vec<Cookie>, CookieError> {
    let domain = cookie_domain(platform).ok_or(CookieError::UnknownDomain(platform))?;
    let text = text.trim();
    let text = text
        .strip_prefix("Cookie:")
        .or_else(|| text.strip_prefix("cookie:"))
        .unwrap_or(text);
    let expires = (now + Duration::days(365)).unix_timestamp();

    Ok(text
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .filter(|(name, _)| !name.trim().is_empty())
        .map(|(name, value)| Cookie {
            domain: domain.to_string(),
            include_subdomains: true,
            path: "/".to_string(),
            secure: false,
            expires,
            name: name.trim().to_string(),
            value: value.trim().to_string(),
        })
        .collect())
}

pub fn to_netscape(cookies: &[Cookie], note: &str) -> String {
    let mut out = format!("{}\n# {}\n\n", NETSCAPE_HEADER, note);
    for cookie in cookies {
        out.push_str(&cookie.netscape_line());
        out.push('\n');
    }
    out
}

/// A Netscape file with at least one cookie line
pub fn is_valid_netscape(content: &str) -> bool {
    content.starts_with(NETSCAPE_HEADER) && !parse_netscape(content).is_empty()
}

pub struct CookieManager {
    dir: PathBuf,
}

impl CookieManager {
    pub fn new(config_dir: &Path) -> Self {
        Self {
            dir: config_dir.join(COOKIES_DIR_NAME),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_path(&self, platform: Platform, kind: &str) -> PathBuf {
        self.dir.join(format!("{}_{}.txt", platform, kind))
    }

    fn io_err(path: &Path) -> impl FnOnce(io::Error) -> CookieError + '_ {
        move |source| CookieError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Convert `text` and store it as the platform's manual cookie file
    pub fn store(&self, platform: Platform, text: &str, format: CookieFormat) -> Result<PathBuf, CookieError> {
        let cookies = match format {
            CookieFormat::Netscape => parse_netscape(text),
            CookieFormat::Json => parse_json(text, platform)?,
            CookieFormat::Header => parse_header(text, platform, OffsetDateTime::now_utc())?,
        };
        if cookies.is_empty() {
            return Err(CookieError::Empty);
        }

        let path = self.file_path(platform, MANUAL_KIND);
        fs::create_dir_all(&self.dir).map_err(Self::io_err(&self.dir))?;
        let note = format!("Imported from {} for {}", format, platform);
        fs::write(&path, to_netscape(&cookies, &note)).map_err(Self::io_err(&path))?;
        restrict_permissions(&path);
        info!("Stored {} cookies for {}", cookies.len(), platform);
        Ok(path)
    }

    /// Import a file, detecting its format unless one is given
    pub fn import_file(
        &self,
        platform: Platform,
        source: &Path,
        format: Option<CookieFormat>,
    ) -> Result<PathBuf, CookieError> {
        let text = fs::read_to_string(source).map_err(Self::io_err(source))?;
        let format = format.unwrap_or_else(|| CookieFormat::detect(&text));
        self.store(platform, &text, format)
    }

    /// Best stored file: the manual one, then browser exports
    pub fn cookies_file(&self, platform: Platform) -> Option<PathBuf> {
        std::iter::once(MANUAL_KIND)
            .chain(BROWSER_KINDS)
            .map(|kind| self.file_path(platform, kind))
            .find(|p| p.is_file())
    }

    pub fn validate_file(path: &Path) -> bool {
        match fs::read_to_string(path) {
            Ok(content) => is_valid_netscape(&content),
            Err(e) => {
                debug!("Cannot read {}: {}", path.display(), e);
                false
            }
        }
    }

    /// Stored files grouped by platform
    pub fn list(&self) -> io::Result<BTreeMap<String, Vec<CookieFileInfo>>> {
        let mut by_platform: BTreeMap<String, Vec<CookieFileInfo>> = BTreeMap::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(by_platform),
            Err(e) => return Err(e),
        };

        let now = OffsetDateTime::now_utc().unix_timestamp();
        for entry in entries {
            let entry = entry?;
            let file = entry.file_name().to_string_lossy().into_owned();
            let Some((platform, kind)) = file.strip_suffix(".txt").and_then(|s| s.split_once('_')) else {
                continue;
            };

            let content = fs::read_to_string(entry.path()).unwrap_or_default();
            let cookies = parse_netscape(&content);
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|t| OffsetDateTime::from(t).format(&Rfc3339).ok());

            by_platform.entry(platform.to_string()).or_default().push(CookieFileInfo {
                kind: kind.to_string(),
                valid: is_valid_netscape(&content),
                expired: cookies.iter().filter(|c| c.is_expired(now)).count(),
                cookies: cookies.len(),
                file,
                modified,
            });
        }
        for files in by_platform.values_mut() {
            files.sort_by(|a, b| a.kind.cmp(&b.kind));
        }
        Ok(by_platform)
    }

    /// Remove one kind, or every file of the platform. Returns the count removed.
    pub fn delete(&self, platform: Platform, kind: Option<&str>) -> io::Result<usize> {
        let targets: Vec<PathBuf> = match kind {
            Some(kind) => vec![self.file_path(platform, kind)],
            None => {
                let prefix = format!("{}_", platform);
                match fs::read_dir(&self.dir) {
                    Ok(entries) => entries
                        .filter_map(Result::ok)
                        .map(|e| e.path())
                        .filter(|p| {
                            p.file_name()
                                .map(|n| n.to_string_lossy())
                                .map_or(false, |n| n.starts_with(&prefix) && n.ends_with(".txt"))
                        })
                        .collect(),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
                    Err(e) => return Err(e),
                }
            }
        };

        let mut removed = 0;
        for path in targets {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        if removed > 0 {
            info!("Deleted {} cookie files for {}", removed, platform);
        }
        Ok(removed)
    }

    /// Point platforms without configured cookies at their stored file
    pub fn apply_to(&self, settings: &mut Settings) -> Vec<Platform> {
        let mut applied = Vec::new();
        for platform in Platform::ALL {
            let Some(path) = self.cookies_file(platform) else {
                continue;
            };
            let Some(common) = settings.platform_common_mut(platform) else {
                debug!("{} has no settings section for cookies", platform);
                continue;
            };
            if common.cookies_file.is_some() || common.cookies_from_browser.is_some() {
                continue;
            }
            if !Self::validate_file(&path) {
                warn!("Ignoring invalid cookie file {}", path.display());
                continue;
            }
            common.cookies_file = Some(path);
            applied.push(platform);
        }
        applied
    }

    /// Starting point for writing a cookies.txt by hand
    pub fn template(platform: Platform) -> String {
        let domain = cookie_domain(platform).unwrap_or(".example.com");
        format!(
            "{NETSCAPE_HEADER}\n\
             # Template for {platform}\n\
             # Fields are tab separated: domain, include subdomains, path, secure, expiry (unix), name, value\n\
             # Copy values from the browser's developer tools (Application > Cookies)\n\
             # {domain}\tTRUE\t/\tTRUE\t1767225600\tsessionid\tyour_session_id\n"
        )
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
        warn!("Could not restrict permissions on {}: {}", path.display(), e);
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}
