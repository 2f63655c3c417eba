// tracing subscriber setup from the `logging` settings section

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{Builder as RollingBuilder, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};

use crate::config::LoggingSettings;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to create log directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to set up log file: {0}")]
    Appender(String),

    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Keeps the background log writer alive; drop it last.
pub struct LogGuard {
    _worker: Option<WorkerGuard>,
    log_dir: Option<PathBuf>,
}

impl LogGuard {
    /// Directory receiving log files, if file logging is on
    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }
}

const LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Configured level, raised to at least debug by `-v` and trace by `-vv`;
/// never lowered
pub fn effective_level(configured: &str, verbosity: u8) -> String {
    let configured = configured.to_lowercase();
    let floor = match verbosity {
        0 => return configured,
        1 => 3,
        _ => 4,
    };
    match LEVELS.iter().position(|l| *l == configured) {
        Some(rank) if rank >= floor => configured,
        _ => LEVELS[floor].to_string(),
    }
}

fn rotation(name: &str) -> Rotation {
    match name {
        "hourly" => Rotation::HOURLY,
        "never" => Rotation::NEVER,
        _ => Rotation::DAILY,
    }
}

fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        // HTTP internals are too chatty below warn
        EnvFilter::try_new(format!("{},hyper=warn,reqwest=warn", level))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    })
}

/// Log directory: configured (relative paths sit under the config dir), else
/// `<config dir>/logs`
pub fn log_directory(settings: &LoggingSettings, config_dir: &Path) -> PathBuf {
    match &settings.directory {
        Some(dir) if dir.is_relative() => config_dir.join(dir),
        Some(dir) => dir.clone(),
        None => config_dir.join("logs"),
    }
}

/// Install the global subscriber: stderr always, plus a rolling file when
/// `log_to_file` is set. `RUST_LOG` overrides the configured level.
pub fn init(settings: &LoggingSettings, config_dir: &Path, verbosity: u8) -> Result<LogGuard, LoggingError> {
    let level = effective_level(&settings.level, verbosity);
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    layers.push(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(verbosity > 0)
            .boxed(),
    );

    let mut worker = None;
    let mut log_dir = None;
    if settings.log_to_file {
        let dir = log_directory(settings, config_dir);
        std::fs::create_dir_all(&dir).map_err(|source| LoggingError::Directory {
            path: dir.clone(),
            source,
        })?;

        let mut builder = RollingBuilder::new()
            .rotation(rotation(&settings.rotation))
            .filename_prefix(settings.file_name.clone());
        if settings.max_files > 0 {
            builder = builder.max_log_files(settings.max_files);
        }
        let appender = builder
            .build(&dir)
            .map_err(|e| LoggingError::Appender(e.to_string()))?;
        let (writer, guard) = tracing_appender::non_blocking(appender);

        let file_layer = fmt::layer().with_writer(writer).with_ansi(false);
        layers.push(if settings.json {
            file_layer.json().boxed()
        } else {
            file_layer.boxed()
        });

        worker = Some(guard);
        log_dir = Some(dir);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(build_filter(&level))
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    Ok(LogGuard {
        _worker: worker,
        log_dir,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_level() {
        assert_eq!(effective_level("WARN", 0), "warn");
        assert_eq!(effective_level("warn", 1), "debug");
        assert_eq!(effective_level("info", 3), "trace");
        assert_eq!(effective_level("trace", 1), "trace");
        assert_eq!(effective_level("Debug", 1), "debug");
    }

    #[test]
    fn test_rotation_names() {
        assert_eq!(rotation("hourly"), Rotation::HOURLY);
        assert_eq!(rotation("never"), Rotation::NEVER);
        assert_eq!(rotation("daily"), Rotation::DAILY);
        assert_eq!(rotation("weekly"), Rotation::DAILY);
    }

    #[test]
    fn test_log_directory() {
        let mut settings = LoggingSettings::default();
        assert_eq!(log_directory(&settings, Path::new("/cfg")), PathBuf::from("/cfg/logs"));

        settings.directory = Some(PathBuf::from("/var/log/smd"));
        assert_eq!(log_directory(&settings, Path::new("/cfg")), PathBuf::from("/var/log/smd"));

        settings.directory = Some(PathBuf::from("logs2"));
        assert_eq!(log_directory(&settings, Path::new("/cfg")), PathBuf::from("/cfg/logs2"));
    }
}
