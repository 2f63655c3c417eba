// Configuration loading and persistence
//
// The settings document lives at `<config dir>/social-media-downloader/config.json`.
// An optional `preferences.json` next to it holds user overrides that are
// deep-merged on top in memory only. Missing keys are filled with defaults and
// written back to config.json so the file always lists every option.

mod profile;
mod settings;

pub use profile::{default_rate_limit, PlatformProfile};
pub use settings::*;

use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub const APP_DIR_NAME: &str = "social-media-downloader";
pub const CONFIG_FILE_NAME: &str = "config.json";
pub const PREFERENCES_FILE_NAME: &str = "preferences.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine the platform config directory")]
    NoConfigDir,

    #[error("I/O error accessing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid configuration:\n  - {}", .0.join("\n  - "))]
    Validation(Vec<String>),

    #[error("unknown setting: {0}")]
    UnknownKey(String),

    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Default location of the configuration directory
pub fn default_config_dir() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .ok_or(ConfigError::NoConfigDir)
}

/// Owns the settings and the file they were loaded from.
#[derive(Debug)]
pub struct ConfigManager {
    path: PathBuf,
    /// Contents of config.json
    base: Settings,
    /// preferences.json overlay, never written back
    prefs: Option<Value>,
    /// `base` with `prefs` applied; what the application runs with
    settings: Settings,
}

impl ConfigManager {
    pub fn open_default() -> Result<Self, ConfigError> {
        Self::open(default_config_dir()?.join(CONFIG_FILE_NAME))
    }

    /// Load settings from `path`, creating the file with defaults if absent.
    ///
    /// A document that cannot be parsed is left untouched on disk and the
    /// defaults are used for this session.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            create_dir(parent)?;
        }

        let prefs_path = preferences_path(&path);
        let prefs = match read_json(&prefs_path) {
            Ok(Some(prefs)) => {
                debug!("Applying user preferences from {}", prefs_path.display());
                Some(prefs)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Ignoring user preferences: {}", e);
                None
            }
        };

        let on_disk = match read_json(&path) {
            Ok(value) => value,
            Err(e @ ConfigError::Parse { .. }) => {
                error!("{}; falling back to defaults", e);
                return Ok(Self::from_parts(path, Settings::default(), prefs));
            }
            Err(e) => return Err(e),
        };
        if on_disk.is_none() {
            info!("No configuration at {}, writing defaults", path.display());
        }

        let document = on_disk.clone().unwrap_or_else(|| Value::Object(Default::default()));
        let mut base: Settings = match serde_json::from_value(document) {
            Ok(s) => s,
            Err(source) => {
                error!(
                    "{}; falling back to defaults",
                    ConfigError::Parse { path: path.clone(), source }
                );
                return Ok(Self::from_parts(path, Settings::default(), prefs));
            }
        };
        base.normalize();

        let manager = Self::from_parts(path, base, prefs);

        // Keep the file complete: rewrite when keys were missing or it did not exist.
        let current = manager.base.to_value()?;
        if on_disk.as_ref().map_or(true, |v| !contains_all_keys(v, &current)) {
            manager.save()?;
        }

        Ok(manager)
    }

    fn from_parts(path: PathBuf, base: Settings, prefs: Option<Value>) -> Self {
        let settings = overlay(&base, prefs.as_ref());
        Self {
            path,
            base,
            prefs,
            settings,
        }
    }

    /// In-memory manager, not backed by a real file until `save` is called.
    pub fn with_settings(path: impl Into<PathBuf>, settings: Settings) -> Self {
        Self::from_parts(path.into(), settings, None)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn config_dir(&self) -> PathBuf {
        self.path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Write config.json; preference overrides stay in their own file.
    pub fn save(&self) -> Result<(), ConfigError> {
        let json = self.base.to_json_pretty()?;
        std::fs::write(&self.path, json).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })?;
        debug!("Configuration saved to {}", self.path.display());
        Ok(())
    }

    /// Replace the whole settings document after validating it.
    pub fn replace(&mut self, mut settings: Settings) -> Result<(), ConfigError> {
        settings.normalize();
        settings.validate().map_err(ConfigError::Validation)?;
        self.settings = overlay(&settings, self.prefs.as_ref());
        self.base = settings;
        self.save()
    }

    /// Look up a dotted key such as `reddit.min_score`.
    pub fn get(&self, key: &str) -> Result<Value, ConfigError> {
        let root = self.settings.to_value()?;
        lookup(&root, key)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))
    }

    /// Set a dotted key in config.json, re-typing and validating the whole
    /// document before saving. `null` clears an optional key.
    pub fn set(&mut self, key: &str, value: Value) -> Result<(), ConfigError> {
        let mut root = self.base.to_value()?;
        if lookup(&root, key).is_none() && !is_map_entry(&root, key) {
            return Err(ConfigError::UnknownKey(key.to_string()));
        }
        assign(&mut root, key, value)?;

        let updated: Settings =
            serde_json::from_value(root).map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                reason: e.to_string(),
            })?;

        // Unknown keys are dropped by serde; treat that as an error for explicit sets.
        let check = updated.to_value()?;
        if lookup(&check, key).is_none() {
            return Err(ConfigError::UnknownKey(key.to_string()));
        }

        updated.validate().map_err(ConfigError::Validation)?;
        if self.prefs.as_ref().map_or(false, |p| lookup(p, key).is_some()) {
            warn!("{} is overridden by {}", key, PREFERENCES_FILE_NAME);
        }
        self.settings = overlay(&updated, self.prefs.as_ref());
        self.base = updated;
        self.save()?;
        info!("Setting {} updated", key);
        Ok(())
    }

    pub fn reset_to_defaults(&mut self) -> Result<(), ConfigError> {
        self.base = Settings::default();
        self.settings = overlay(&self.base, self.prefs.as_ref());
        self.save()?;
        info!("Configuration reset to defaults");
        Ok(())
    }

    /// Configured download directory, created if necessary.
    pub fn download_directory(&self) -> Result<PathBuf, ConfigError> {
        let dir = self.settings.general.download_directory.clone();
        create_dir(&dir)?;
        Ok(dir)
    }

    /// Validate ranges and check the download directory is writable.
    pub fn check_writable(&self) -> Result<(), ConfigError> {
        self.settings.validate().map_err(ConfigError::Validation)?;

        let dir = self.download_directory()?;
        let marker = dir.join(".write_test");
        std::fs::write(&marker, b"test")
            .and_then(|_| std::fs::remove_file(&marker))
            .map_err(|source| ConfigError::Io { path: marker, source })
    }
}

pub fn preferences_path(config_path: &Path) -> PathBuf {
    config_path.with_file_name(PREFERENCES_FILE_NAME)
}

fn create_dir(dir: &Path) -> Result<(), ConfigError> {
    if dir.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
        path: dir.to_path_buf(),
        source,
    })
}

fn read_json(path: &Path) -> Result<Option<Value>, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    if content.trim().is_empty() {
        return Ok(Some(Value::Object(Default::default())));
    }

    serde_json::from_str(&content)
        .map(Some)
        .map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

/// Deep-merge `overlay` into `base`; objects merge key by key, anything else replaces.
pub fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// `base` with the preference overlay applied. An overlay that does not fit
/// the schema is ignored.
fn overlay(base: &Settings, prefs: Option<&Value>) -> Settings {
    let Some(prefs) = prefs else {
        return base.clone();
    };
    let mut value = match base.to_value() {
        Ok(v) => v,
        Err(e) => {
            warn!("Ignoring user preferences: {}", e);
            return base.clone();
        }
    };
    merge_json(&mut value, prefs.clone());
    match serde_json::from_value::<Settings>(value) {
        Ok(mut settings) => {
            settings.normalize();
            settings
        }
        Err(e) => {
            warn!("Ignoring user preferences: {}", e);
            base.clone()
        }
    }
}

/// `headers.<name>` style keys add entries to a free-form map.
fn is_map_entry(root: &Value, key: &str) -> bool {
    key.rsplit_once('.')
        .and_then(|(parent, _)| lookup(root, parent))
        .and_then(Value::as_object)
        .map_or(false, |map| map.values().all(Value::is_string))
}

fn lookup<'a>(root: &'a Value, key: &str) -> Option<&'a Value> {
    key.split('.')
        .filter(|k| !k.is_empty())
        .try_fold(root, |node, part| node.as_object()?.get(part))
}

fn assign(root: &mut Value, key: &str, value: Value) -> Result<(), ConfigError> {
    let parts: Vec<&str> = key.split('.').filter(|k| !k.is_empty()).collect();
    let Some((last, parents)) = parts.split_last() else {
        return Err(ConfigError::UnknownKey(key.to_string()));
    };

    let mut node = root;
    for part in parents {
        let map = node.as_object_mut().ok_or_else(|| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("'{}' is not a section", part),
        })?;
        node = map
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Default::default()));
    }

    let map = node.as_object_mut().ok_or_else(|| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: "parent is not a section".to_string(),
    })?;
    map.insert(last.to_string(), value);
    Ok(())
}

/// True when every key path present in `reference` also exists in `value`.
fn contains_all_keys(value: &Value, reference: &Value) -> bool {
    match (value, reference) {
        (Value::Object(v), Value::Object(r)) => r.iter().all(|(k, rv)| {
            v.get(k).map_or(false, |vv| contains_all_keys(vv, rv))
        }),
        _ => true,
    }
}

/// Parse a CLI-supplied value: JSON when it parses, otherwise a plain string.
pub fn parse_cli_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_open_creates_default_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cfg").join(CONFIG_FILE_NAME);

        let manager = ConfigManager::open(&path).unwrap();
        assert_eq!(manager.settings(), &Settings::default());
        assert!(path.exists());

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(Settings::from_json_str(&written).unwrap(), Settings::default());
    }

    #[test]
    fn test_open_fills_missing_keys_and_rewrites() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, r#"{ "general": { "retry_attempts": 9 } }"#).unwrap();

        let manager = ConfigManager::open(&path).unwrap();
        assert_eq!(manager.settings().general.retry_attempts, 9);
        assert_eq!(manager.settings().general.max_concurrent_downloads, 3);

        let on_disk: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk["general"]["retry_attempts"], json!(9));
        assert!(on_disk["slideshow_defaults"]["frame_rate"].is_number());
    }

    #[test]
    fn test_corrupt_file_uses_defaults_and_is_preserved() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "{ not json").unwrap();

        let manager = ConfigManager::open(&path).unwrap();
        assert_eq!(manager.settings(), &Settings::default());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[test]
    fn test_preferences_override_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, r#"{ "reddit": { "min_score": 10, "sort": "new" } }"#).unwrap();
        std::fs::write(
            preferences_path(&path),
            r#"{ "reddit": { "min_score": 100 }, "ui": { "theme": "dark" } }"#,
        )
        .unwrap();

        let manager = ConfigManager::open(&path).unwrap();
        assert_eq!(manager.settings().reddit.min_score, 100);
        assert_eq!(manager.settings().reddit.sort, "new");
        assert_eq!(manager.settings().ui.theme, "dark");

        // The overlay stays in memory; config.json keeps its own values
        let on_disk: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk["reddit"]["min_score"], json!(10));
        assert_eq!(on_disk["ui"]["theme"], json!("system"));
    }

    #[test]
    fn test_set_does_not_persist_preferences() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(preferences_path(&path), r#"{ "reddit": { "min_score": 100 } }"#).unwrap();

        let mut manager = ConfigManager::open(&path).unwrap();
        manager.set("reddit.sort", json!("top")).unwrap();
        assert_eq!(manager.settings().reddit.min_score, 100);
        assert_eq!(manager.settings().reddit.sort, "top");

        let on_disk: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk["reddit"]["min_score"], json!(0));
        assert_eq!(on_disk["reddit"]["sort"], json!("top"));
    }

    #[test]
    fn test_optional_keys_can_be_read_set_and_cleared() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let mut manager = ConfigManager::open(&path).unwrap();

        assert_eq!(manager.get("youtube.timeout_secs").unwrap(), Value::Null);

        manager.set("youtube.timeout_secs", json!(45)).unwrap();
        assert_eq!(manager.settings().youtube.common.timeout_secs, Some(45));

        manager.set("youtube.timeout_secs", Value::Null).unwrap();
        assert_eq!(manager.settings().youtube.common.timeout_secs, None);
        assert_eq!(ConfigManager::open(&path).unwrap().settings().youtube.common.timeout_secs, None);

        manager.set("general.proxy", json!("socks5://127.0.0.1:1080")).unwrap();
        assert_eq!(manager.get("general.proxy").unwrap(), json!("socks5://127.0.0.1:1080"));
    }

    #[test]
    fn test_zero_concurrency_is_clamped_on_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, r#"{ "general": { "max_concurrent_downloads": 0 } }"#).unwrap();

        let manager = ConfigManager::open(&path).unwrap();
        assert_eq!(manager.settings().general.max_concurrent_downloads, 1);
    }

    #[test]
    fn test_get_dotted_key() {
        let dir = tempdir().unwrap();
        let manager = ConfigManager::open(dir.path().join(CONFIG_FILE_NAME)).unwrap();

        assert_eq!(manager.get("tiktok.slideshow_duration_per_image").unwrap(), json!(3.0));
        assert_eq!(manager.get("youtube.quality").unwrap(), json!("best"));
        assert!(matches!(manager.get("youtube.nope"), Err(ConfigError::UnknownKey(_))));
    }

    #[test]
    fn test_set_persists_typed_value() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let mut manager = ConfigManager::open(&path).unwrap();

        manager.set("reddit.skip_nsfw", json!(true)).unwrap();
        manager.set("youtube.headers.Referer", json!("https://www.youtube.com")).unwrap();

        let reloaded = ConfigManager::open(&path).unwrap();
        assert!(reloaded.settings().reddit.skip_nsfw);
        assert_eq!(
            reloaded.settings().youtube.common.headers.get("Referer").map(String::as_str),
            Some("https://www.youtube.com")
        );
    }

    #[test]
    fn test_set_rejects_bad_values() {
        let dir = tempdir().unwrap();
        let mut manager = ConfigManager::open(dir.path().join(CONFIG_FILE_NAME)).unwrap();

        assert!(matches!(
            manager.set("general.retry_attempts", json!("many")),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            manager.set("general.request_timeout", json!(0)),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!(
            manager.set("general.bogus", json!(1)),
            Err(ConfigError::UnknownKey(_))
        ));
        assert!(matches!(
            manager.set("general.retry_attempts.inner", json!(1)),
            Err(ConfigError::UnknownKey(_))
        ));
        assert_eq!(manager.settings().general.retry_attempts, 3);
    }

    #[test]
    fn test_reset_to_defaults() {
        let dir = tempdir().unwrap();
        let mut manager = ConfigManager::open(dir.path().join(CONFIG_FILE_NAME)).unwrap();
        manager.set("ui.theme", json!("dark")).unwrap();
        manager.reset_to_defaults().unwrap();
        assert_eq!(manager.settings().ui.theme, "system");
    }

    #[test]
    fn test_check_writes_probe_in_download_dir() {
        let dir = tempdir().unwrap();
        let mut settings = Settings::default();
        settings.general.download_directory = dir.path().join("downloads");
        let manager = ConfigManager::with_settings(dir.path().join(CONFIG_FILE_NAME), settings);

        manager.check_writable().unwrap();
        assert!(dir.path().join("downloads").is_dir());
        assert!(!dir.path().join("downloads").join(".write_test").exists());
    }

    #[test]
    fn test_merge_json_is_deep() {
        let mut base = json!({ "a": { "b": 1, "c": 2 }, "d": [1, 2] });
        merge_json(&mut base, json!({ "a": { "c": 3 }, "d": [9], "e": true }));
        assert_eq!(base, json!({ "a": { "b": 1, "c": 3 }, "d": [9], "e": true }));
    }

    #[test]
    fn test_parse_cli_value() {
        assert_eq!(parse_cli_value("5"), json!(5));
        assert_eq!(parse_cli_value("true"), json!(true));
        assert_eq!(parse_cli_value("720p"), json!("720p"));
        assert_eq!(parse_cli_value(r#"["a","b"]"#), json!(["a", "b"]));
    }
}
