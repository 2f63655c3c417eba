// File handling: naming, filtering, duplicate detection and backups

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::platform::Platform;

const UNSAFE_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Make `name` safe for every common file system.
///
/// Unsafe characters become `_`, control characters are dropped, runs of
/// whitespace collapse to one space, and leading/trailing dots and spaces are
/// trimmed. Names longer than `max_len` characters are cut in the stem so the
/// extension survives.
pub fn sanitize_filename(name: &str, max_len: usize) -> String {
    let replaced: String = name
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| if UNSAFE_CHARS.contains(&c) { '_' } else { c })
        .collect();
    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_matches(|c| c == '.' || c == ' ');

    let cleaned = if trimmed.is_empty() { "download" } else { trimmed };
    truncate_keeping_extension(cleaned, max_len.max(1))
}

fn truncate_keeping_extension(name: &str, max_len: usize) -> String {
    if name.chars().count() <= max_len {
        return name.to_string();
    }
    let (stem, ext) = split_extension(name);
    let ext_len = ext.map_or(0, |e| e.chars().count() + 1);
    if ext_len >= max_len {
        return name.chars().take(max_len).collect();
    }
    let stem: String = stem.chars().take(max_len - ext_len).collect();
    match ext {
        Some(ext) => format!("{}.{}", stem.trim_end(), ext),
        None => stem,
    }
}

fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() && !ext.contains(' ') => (stem, Some(ext)),
        _ => (name, None),
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Groups of identical files keyed by their sha256
pub type DuplicateGroups = BTreeMap<String, Vec<PathBuf>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupeReport {
    pub groups: usize,
    pub removed: Vec<PathBuf>,
}

pub struct FileManager {
    settings: Settings,
}

impl FileManager {
    pub fn new(settings: &Settings) -> Self {
        Self {
            settings: settings.clone(),
        }
    }

    /// Target directory for a platform, honouring `organize_by_platform`
    pub fn download_dir(&self, platform: Platform, subfolder: Option<&str>) -> PathBuf {
        let mut dir = self.settings.general.download_directory.clone();
        if self.settings.general.organize_by_platform {
            dir.push(platform.as_str());
        }
        if let Some(sub) = subfolder {
            dir.push(self.clean_name(sub));
        }
        dir
    }

    /// Sanitize when enabled in settings, otherwise only cap the length
    pub fn clean_name(&self, name: &str) -> String {
        let max_len = self.settings.file_handling.max_filename_length;
        if self.settings.file_handling.sanitize_filenames {
            sanitize_filename(name, max_len)
        } else {
            truncate_keeping_extension(name, max_len.max(1))
        }
    }

    /// `clip.mp4` -> `clip_20240131.mp4`
    pub fn with_date_suffix(name: &str, date: OffsetDateTime) -> String {
        let stamp = date
            .format(format_description!("[year][month][day]"))
            .unwrap_or_default();
        match split_extension(name) {
            (stem, Some(ext)) => format!("{}_{}.{}", stem, stamp, ext),
            (stem, None) => format!("{}_{}", stem, stamp),
        }
    }

    /// First free path among `name.ext`, `name_1.ext`, `name_2.ext`, ...
    pub fn unique_path(path: &Path) -> PathBuf {
        if !path.exists() {
            return path.to_path_buf();
        }
        let dir = path.parent().unwrap_or_else(|| Path::new(""));
        let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let (stem, ext) = split_extension(&file_name);

        (1u32..)
            .map(|n| match ext {
                Some(ext) => dir.join(format!("{}_{}.{}", stem, n, ext)),
                None => dir.join(format!("{}_{}", stem, n)),
            })
            .find(|candidate| !candidate.exists())
            .unwrap_or_else(|| path.to_path_buf())
    }

    pub fn should_skip(&self, path: &Path) -> bool {
        self.settings.general.skip_existing_files && path.exists()
    }

    pub fn is_allowed(&self, path: &Path) -> bool {
        self.settings.allowed_extensions.contains(&extension_of(path))
    }

    /// Why a file falls outside `size_limits`, if it does
    pub fn check_size(&self, path: &Path) -> io::Result<Option<String>> {
        let len = fs::metadata(path)?.len();
        let limits = &self.settings.size_limits;
        if let Some(max) = limits.max_bytes().filter(|max| len > *max) {
            return Ok(Some(format!("{} bytes exceeds limit of {}", len, max)));
        }
        if let Some(min) = limits.min_bytes().filter(|min| len < *min) {
            return Ok(Some(format!("{} bytes is below minimum of {}", len, min)));
        }
        Ok(None)
    }

    /// Apply file_handling rules to a freshly downloaded file.
    ///
    /// Returns the final path, or `None` when the file was removed because
    /// its extension or size is not allowed.
    pub fn finalize(&self, path: &Path) -> io::Result<Option<PathBuf>> {
        if !path.is_file() {
            return Ok(Some(path.to_path_buf()));
        }
        if !self.is_allowed(path) {
            info!("Removing {} (extension not allowed)", path.display());
            fs::remove_file(path)?;
            return Ok(None);
        }
        if let Some(reason) = self.check_size(path)? {
            info!("Removing {} ({})", path.display(), reason);
            fs::remove_file(path)?;
            return Ok(None);
        }

        let original = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let mut name = self.clean_name(&original);
        if self.settings.file_handling.add_date_to_filename {
            name = Self::with_date_suffix(&name, OffsetDateTime::now_utc());
        }
        if name == original {
            return Ok(Some(path.to_path_buf()));
        }

        let target = Self::unique_path(&path.with_file_name(name));
        fs::rename(path, &target)?;
        debug!("Renamed {} -> {}", path.display(), target.display());
        Ok(Some(target))
    }

    pub fn file_hash(path: &Path) -> io::Result<String> {
        let mut file = fs::File::open(path)?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    /// Files under `dir` sharing content, only groups of two or more
    pub fn find_duplicates(dir: &Path) -> io::Result<DuplicateGroups> {
        let mut by_size: BTreeMap<u64, Vec<PathBuf>> = BTreeMap::new();
        for path in walk_files(dir)? {
            let len = fs::metadata(&path)?.len();
            by_size.entry(len).or_default().push(path);
        }

        // Only same-sized files need hashing
        let mut groups = DuplicateGroups::new();
        for paths in by_size.into_values().filter(|p| p.len() > 1) {
            for path in paths {
                match Self::file_hash(&path) {
                    Ok(hash) => groups.entry(hash).or_default().push(path),
                    Err(e) => warn!("Could not hash {}: {}", path.display(), e),
                }
            }
        }
        groups.retain(|_, paths| paths.len() > 1);
        Ok(groups)
    }

    /// Delete all but one file of every duplicate group
    pub fn remove_duplicates(dir: &Path, keep_newest: bool) -> io::Result<DedupeReport> {
        let groups = Self::find_duplicates(dir)?;
        let mut report = DedupeReport {
            groups: groups.len(),
            removed: Vec::new(),
        };

        for mut paths in groups.into_values() {
            paths.sort_by_key(|p| modified(p));
            if keep_newest {
                paths.reverse();
            }
            for path in paths.into_iter().skip(1) {
                match fs::remove_file(&path) {
                    Ok(()) => {
                        info!("Removed duplicate file: {}", path.display());
                        report.removed.push(path);
                    }
                    Err(e) => warn!("Could not remove duplicate {}: {}", path.display(), e),
                }
            }
        }
        Ok(report)
    }

    pub fn directory_size(dir: &Path) -> io::Result<u64> {
        walk_files(dir)?
            .iter()
            .try_fold(0u64, |acc, p| Ok(acc + fs::metadata(p)?.len()))
    }

    /// Remove empty directories below `dir` (not `dir` itself)
    pub fn cleanup_empty_dirs(dir: &Path) -> io::Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                removed += Self::cleanup_empty_dirs(&path)?;
                if fs::read_dir(&path)?.next().is_none() {
                    fs::remove_dir(&path)?;
                    debug!("Removed empty directory: {}", path.display());
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// Timestamped copy of `source` in `backup_dir`, keeping the newest
    /// `keep_last` backups of that source.
    pub fn create_backup(source: &Path, backup_dir: &Path, keep_last: usize) -> io::Result<PathBuf> {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "backup source has no file name"))?;
        let stamp = OffsetDateTime::now_utc()
            .format(format_description!("[year][month][day]_[hour][minute][second]"))
            .unwrap_or_default();

        fs::create_dir_all(backup_dir)?;
        let base = format!("{}_backup_{}", name, stamp);
        let target = (0u32..)
            .map(|n| match n {
                0 => backup_dir.join(&base),
                n => backup_dir.join(format!("{}_{}", base, n)),
            })
            .find(|candidate| !candidate.exists())
            .unwrap_or_else(|| backup_dir.join(&base));
        if source.is_dir() {
            copy_dir(source, &target)?;
        } else {
            fs::copy(source, &target)?;
        }
        info!("Created backup: {}", target.display());

        if keep_last > 0 {
            prune_backups(backup_dir, &name, keep_last)?;
        }
        Ok(target)
    }
}

fn modified(path: &Path) -> SystemTime {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

fn walk_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in fs::read_dir(&current)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }
    files.sort();
    Ok(files)
}

fn copy_dir(from: &Path, to: &Path) -> io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let dest = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &dest)?;
        } else {
            fs::copy(entry.path(), dest)?;
        }
    }
    Ok(())
}

fn prune_backups(backup_dir: &Path, source_name: &str, keep_last: usize) -> io::Result<()> {
    let prefix = format!("{}_backup_", source_name);
    let mut backups: Vec<PathBuf> = fs::read_dir(backup_dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .map_or(false, |n| n.to_string_lossy().starts_with(&prefix))
        })
        .collect();
    // Timestamps sort lexically
    backups.sort();

    let excess = backups.len().saturating_sub(keep_last);
    for old in backups.into_iter().take(excess) {
        let result = if old.is_dir() {
            fs::remove_dir_all(&old)
        } else {
            fs::remove_file(&old)
        };
        match result {
            Ok(()) => debug!("Pruned backup {}", old.display()),
            Err(e) => warn!("Could not prune backup {}: {}", old.display(), e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use time::macros::datetime;

    fn settings_in(dir: &Path) -> Settings {
        let mut settings = Settings::default();
        settings.general.download_directory = dir.to_path_buf();
        settings
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("a<b>c:d\"e/f\\g|h?i*j.mp4", 200), "a_b_c_d_e_f_g_h_i_j.mp4");
        assert_eq!(sanitize_filename("  ..hello\t\n  world..  ", 200), "hello world");
        assert_eq!(sanitize_filename("bell\u{7}.txt", 200), "bell.txt");
        assert_eq!(sanitize_filename("...", 200), "download");
    }

    #[test]
    fn test_sanitize_keeps_extension_when_truncating() {
        let long = format!("{}.mp4", "a".repeat(300));
        let cleaned = sanitize_filename(&long, 20);
        assert_eq!(cleaned.chars().count(), 20);
        assert!(cleaned.ends_with(".mp4"));
    }

    #[test]
    fn test_date_suffix() {
        let date = datetime!(2024-01-31 10:00 UTC);
        assert_eq!(FileManager::with_date_suffix("clip.mp4", date), "clip_20240131.mp4");
        assert_eq!(FileManager::with_date_suffix("README", date), "README_20240131");
    }

    #[test]
    fn test_download_dir_organization() {
        let tmp = tempdir().unwrap();
        let mut settings = settings_in(tmp.path());
        let fm = FileManager::new(&settings);
        assert_eq!(
            fm.download_dir(Platform::Reddit, Some("r/pics")),
            tmp.path().join("reddit").join("r_pics")
        );

        settings.general.organize_by_platform = false;
        let fm = FileManager::new(&settings);
        assert_eq!(fm.download_dir(Platform::Reddit, None), tmp.path());
    }

    #[test]
    fn test_should_skip_existing() {
        let tmp = tempdir().unwrap();
        let existing = tmp.path().join("have.jpg");
        fs::write(&existing, b"x").unwrap();
        let mut settings = settings_in(tmp.path());

        let fm = FileManager::new(&settings);
        assert!(fm.should_skip(&existing));
        assert!(!fm.should_skip(&tmp.path().join("new.jpg")));

        settings.general.skip_existing_files = false;
        assert!(!FileManager::new(&settings).should_skip(&existing));
    }

    #[test]
    fn test_unique_path() {
        let tmp = tempdir().unwrap();
        let base = tmp.path().join("clip.mp4");
        assert_eq!(FileManager::unique_path(&base), base);

        fs::write(&base, b"x").unwrap();
        fs::write(tmp.path().join("clip_1.mp4"), b"x").unwrap();
        assert_eq!(FileManager::unique_path(&base), tmp.path().join("clip_2.mp4"));
    }

    #[test]
    fn test_finalize_filters_and_renames() {
        let tmp = tempdir().unwrap();
        let mut settings = settings_in(tmp.path());
        settings.size_limits.min_file_size_kb = 1;
        let fm = FileManager::new(&settings);

        let exe = tmp.path().join("tool.exe");
        fs::write(&exe, vec![0u8; 2048]).unwrap();
        assert_eq!(fm.finalize(&exe).unwrap(), None);
        assert!(!exe.exists());

        let tiny = tmp.path().join("tiny.jpg");
        fs::write(&tiny, b"abc").unwrap();
        assert_eq!(fm.finalize(&tiny).unwrap(), None);

        let messy = tmp.path().join("  my   clip .mp4");
        fs::write(&messy, vec![1u8; 2048]).unwrap();
        let kept = fm.finalize(&messy).unwrap().unwrap();
        assert_eq!(kept, tmp.path().join("my clip .mp4"));
        assert!(kept.exists());
    }

    #[test]
    fn test_find_and_remove_duplicates() {
        let tmp = tempdir().unwrap();
        let nested = tmp.path().join("nested");
        fs::create_dir_all(&nested).unwrap();
        fs::write(tmp.path().join("a.jpg"), b"same bytes").unwrap();
        fs::write(nested.join("b.jpg"), b"same bytes").unwrap();
        fs::write(tmp.path().join("c.jpg"), b"diff bytes").unwrap();

        let groups = FileManager::find_duplicates(tmp.path()).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups.values().next().unwrap().len(), 2);

        let report = FileManager::remove_duplicates(tmp.path(), true).unwrap();
        assert_eq!(report.groups, 1);
        assert_eq!(report.removed.len(), 1);
        assert!(tmp.path().join("c.jpg").exists());
        assert!(FileManager::find_duplicates(tmp.path()).unwrap().is_empty());
    }

    #[test]
    fn test_file_hash_is_sha256() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("f");
        fs::write(&path, b"abc").unwrap();
        assert_eq!(
            FileManager::file_hash(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_directory_size_and_cleanup() {
        let tmp = tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("empty/deeper")).unwrap();
        fs::create_dir_all(tmp.path().join("full")).unwrap();
        fs::write(tmp.path().join("full/x.bin"), vec![0u8; 100]).unwrap();
        fs::write(tmp.path().join("y.bin"), vec![0u8; 50]).unwrap();

        assert_eq!(FileManager::directory_size(tmp.path()).unwrap(), 150);
        assert_eq!(FileManager::cleanup_empty_dirs(tmp.path()).unwrap(), 2);
        assert!(!tmp.path().join("empty").exists());
        assert!(tmp.path().join("full").exists());
    }

    #[test]
    fn test_backup_retention() {
        let tmp = tempdir().unwrap();
        let source = tmp.path().join("settings.json");
        fs::write(&source, b"{}").unwrap();
        let backups = tmp.path().join("backups");

        for _ in 0..4 {
            FileManager::create_backup(&source, &backups, 2).unwrap();
        }
        let count = fs::read_dir(&backups).unwrap().count();
        assert_eq!(count, 2);
    }
}
