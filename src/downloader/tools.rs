// Detection and updating of the external tools downloads are delegated to.
// Locating a tool only touches the filesystem; version queries and updates
// run the tool through tokio.

use serde::{Deserialize, Serialize};
use std::env;
use std::ffi::OsStr;
use std::path::Path;
use tracing::{debug, info, warn};

use super::errors::DownloadError;
use super::utils::run_output_with_timeout;
use crate::config::Settings;

const VERSION_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ToolType {
    YtDlp,
    GalleryDl,
    Ffmpeg,
    Ffprobe,
}

impl ToolType {
    pub const ALL: [ToolType; 4] = [Self::YtDlp, Self::GalleryDl, Self::Ffmpeg, Self::Ffprobe];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolType::YtDlp => "yt-dlp",
            ToolType::GalleryDl => "gallery-dl",
            ToolType::Ffmpeg => "ffmpeg",
            ToolType::Ffprobe => "ffprobe",
        }
    }

    fn version_arg(&self) -> &'static str {
        match self {
            ToolType::YtDlp | ToolType::GalleryDl => "--version",
            ToolType::Ffmpeg | ToolType::Ffprobe => "-version",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str().eq_ignore_ascii_case(name.trim()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub tool_type: ToolType,
    pub version: Option<String>,
    pub path: Option<String>,
    pub is_available: bool,
}

/// Finds the tools, preferring the paths configured in the settings.
pub struct ToolManager {
    ytdlp: String,
    gallery_dl: String,
    ffmpeg: String,
    ffprobe: String,
}

impl ToolManager {
    pub fn new(settings: &Settings) -> Self {
        Self {
            ytdlp: settings.advanced.ytdlp_path.clone(),
            gallery_dl: settings.advanced.gallery_dl_path.clone(),
            ffmpeg: settings.media_processing.ffmpeg_path.clone(),
            ffprobe: settings.media_processing.ffprobe_path.clone(),
        }
    }

    fn configured(&self, tool_type: ToolType) -> &str {
        match tool_type {
            ToolType::YtDlp => &self.ytdlp,
            ToolType::GalleryDl => &self.gallery_dl,
            ToolType::Ffmpeg => &self.ffmpeg,
            ToolType::Ffprobe => &self.ffprobe,
        }
    }

    /// Location plus `--version` output; the version query runs the tool
    pub async fn get_tool_info(&self, tool_type: ToolType) -> ToolInfo {
        let path = self.resolve(tool_type);
        let version = match &path {
            Some(p) => get_version(p, tool_type).await,
            None => None,
        };

        ToolInfo {
            name: tool_type.as_str().to_string(),
            tool_type,
            is_available: path.is_some(),
            version,
            path,
        }
    }

    pub async fn get_all_tools(&self) -> Vec<ToolInfo> {
        let mut tools = Vec::with_capacity(ToolType::ALL.len());
        for tool_type in ToolType::ALL {
            tools.push(self.get_tool_info(tool_type).await);
        }
        tools
    }

    /// Resolved executable path, if the tool is installed. Only looks at the
    /// filesystem, so it is safe to call from async code.
    pub fn resolve(&self, tool_type: ToolType) -> Option<String> {
        let configured = self.configured(tool_type);

        // 1. A configured absolute/relative path wins
        if configured.contains('/') || configured.contains('\\') {
            if Path::new(configured).is_file() {
                return Some(configured.to_string());
            }
            warn!("Configured {} path does not exist: {}", tool_type.as_str(), configured);
        }

        // 2. Common install locations
        let binary_name = if configured.is_empty() { tool_type.as_str() } else { configured };
        let common_paths = [
            format!("/opt/homebrew/bin/{}", binary_name),
            format!("/usr/local/bin/{}", binary_name),
            format!("/usr/bin/{}", binary_name),
        ];
        if let Some(path) = common_paths.into_iter().find(|p| Path::new(p).is_file()) {
            return Some(path);
        }

        // 3. PATH lookup
        let found = find_in_path(binary_name, env::var_os("PATH").as_deref());
        if found.is_none() {
            debug!("{} not found", tool_type.as_str());
        }
        found
    }

    /// Upgrade a tool through the package manager it was most likely installed with.
    pub async fn update(&self, tool_type: ToolType) -> Result<String, DownloadError> {
        let info = self.get_tool_info(tool_type).await;
        if !info.is_available {
            return Err(DownloadError::ToolNotFound(format!(
                "{} is not installed; install it manually first",
                tool_type.as_str()
            )));
        }

        let (program, args) = update_command(tool_type, info.path.as_deref().unwrap_or(""));
        info!("Updating {}: {} {}", tool_type.as_str(), program, args.join(" "));

        let output = run_output_with_timeout(program, args, 600).await?;
        if output.status.success() {
            let after = self.get_tool_info(tool_type).await;
            Ok(format!(
                "{} updated ({})",
                tool_type.as_str(),
                after.version.unwrap_or_else(|| "unknown version".to_string())
            ))
        } else {
            Err(DownloadError::ExecutionError(format!(
                "Update failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

async fn get_version(path: &str, tool_type: ToolType) -> Option<String> {
    match run_output_with_timeout(path, vec![tool_type.version_arg().to_string()], VERSION_TIMEOUT_SECS).await {
        Ok(output) if output.status.success() => {
            let out = String::from_utf8_lossy(&output.stdout);
            out.lines().next().map(|l| clean_version(l, tool_type))
        }
        _ => None,
    }
}

/// First `name` (or `name.exe` on Windows) found in the `PATH` entries
fn find_in_path(name: &str, path_var: Option<&OsStr>) -> Option<String> {
    if name.contains('/') || name.contains('\\') {
        return None;
    }
    let candidates: Vec<String> = if cfg!(windows) {
        vec![format!("{}.exe", name), name.to_string()]
    } else {
        vec![name.to_string()]
    };
    env::split_paths(path_var?)
        .flat_map(|dir| candidates.iter().map(move |c| dir.join(c)))
        .find(|p| p.is_file())
        .map(|p| p.to_string_lossy().into_owned())
}

/// `ffmpeg version 6.1.1 Copyright ...` -> `6.1.1`
fn clean_version(line: &str, tool_type: ToolType) -> String {
    match tool_type {
        ToolType::Ffmpeg | ToolType::Ffprobe => line
            .split_whitespace()
            .nth(2)
            .unwrap_or(line)
            .to_string(),
        _ => line.trim().to_string(),
    }
}

fn update_command(tool_type: ToolType, installed_at: &str) -> (&'static str, Vec<String>) {
    let via_brew = installed_at.starts_with("/opt/homebrew") || installed_at.starts_with("/usr/local/Cellar");
    let args = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();

    match tool_type {
        ToolType::YtDlp if via_brew => ("brew", args(&["upgrade", "yt-dlp"])),
        ToolType::YtDlp => ("pip3", args(&["install", "-U", "yt-dlp"])),
        ToolType::GalleryDl if via_brew => ("brew", args(&["upgrade", "gallery-dl"])),
        ToolType::GalleryDl => ("pip3", args(&["install", "-U", "gallery-dl"])),
        ToolType::Ffmpeg | ToolType::Ffprobe => ("brew", args(&["upgrade", "ffmpeg"])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tool_names() {
        assert_eq!(ToolType::parse("yt-dlp"), Some(ToolType::YtDlp));
        assert_eq!(ToolType::parse("Gallery-DL"), Some(ToolType::GalleryDl));
        assert_eq!(ToolType::parse("lux"), None);
    }

    #[test]
    fn test_clean_version() {
        assert_eq!(
            clean_version("ffmpeg version 6.1.1 Copyright (c) 2000-2023", ToolType::Ffmpeg),
            "6.1.1"
        );
        assert_eq!(clean_version("2024.03.10\n", ToolType::YtDlp), "2024.03.10");
    }

    #[test]
    fn test_update_command_selection() {
        let (program, args) = update_command(ToolType::YtDlp, "/opt/homebrew/bin/yt-dlp");
        assert_eq!(program, "brew");
        assert_eq!(args, vec!["upgrade", "yt-dlp"]);

        let (program, args) = update_command(ToolType::GalleryDl, "/home/u/.local/bin/gallery-dl");
        assert_eq!(program, "pip3");
        assert_eq!(args, vec!["install", "-U", "gallery-dl"]);
    }

    #[tokio::test]
    async fn test_missing_configured_tool_is_unavailable() {
        let mut settings = Settings::default();
        settings.advanced.gallery_dl_path = "/nonexistent/dir/gallery-dl-xyz".to_string();
        let manager = ToolManager::new(&settings);
        let info = manager.get_tool_info(ToolType::GalleryDl).await;
        assert!(!info.is_available);
        assert!(info.version.is_none());
    }

    #[test]
    fn test_find_in_path() {
        let tmp = tempfile::tempdir().unwrap();
        let bin = tmp.path().join("bin");
        std::fs::create_dir(&bin).unwrap();
        let tool = bin.join(if cfg!(windows) { "gallery-dl.exe" } else { "gallery-dl" });
        std::fs::write(&tool, "").unwrap();

        let path_var = env::join_paths([tmp.path().join("empty"), bin.clone()]).unwrap();
        assert_eq!(
            find_in_path("gallery-dl", Some(path_var.as_os_str())),
            Some(tool.to_string_lossy().into_owned())
        );
        assert_eq!(find_in_path("yt-dlp", Some(path_var.as_os_str())), None);
        assert_eq!(find_in_path("gallery-dl", None), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_configured_tool_version() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let script = tmp.path().join("yt-dlp");
        std::fs::write(&script, "#!/bin/sh\necho 2024.03.10\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut settings = Settings::default();
        settings.advanced.ytdlp_path = script.to_string_lossy().into_owned();
        let info = ToolManager::new(&settings).get_tool_info(ToolType::YtDlp).await;
        assert!(info.is_available);
        assert_eq!(info.version.as_deref(), Some("2024.03.10"));
    }
}
