// smd - command line front-end

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use social_media_downloader::analytics::Analytics;
use social_media_downloader::config::{parse_cli_value, ConfigManager, Settings};
use social_media_downloader::cookies::{CookieFormat, CookieManager};
use social_media_downloader::downloader::format_selector::FormatSelector;
use social_media_downloader::downloader::tools::{ToolManager, ToolType};
use social_media_downloader::downloader::utils::auto_detect_proxy;
use social_media_downloader::downloader::{DownloadRequest, Downloader, ProgressSink};
use social_media_downloader::error_log::ErrorLog;
use social_media_downloader::files::FileManager;
use social_media_downloader::logging;
use social_media_downloader::platform::Platform;
use social_media_downloader::scheduler::{DownloadScheduler, SchedulerEvent, DEFAULT_PRIORITY};

#[derive(Debug, Parser)]
#[command(name = "smd", about = "Download media from social platforms", version)]
struct Cli {
    /// Settings file (defaults to the platform config directory)
    #[arg(long, global = true, env = "SMD_CONFIG")]
    config: Option<PathBuf>,

    /// More log output; repeat for trace
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Download one or more URLs; `r/pics` works for subreddits, `--platform redgifs @name` for users
    Download {
        #[arg(required = true)]
        urls: Vec<String>,

        /// Force a platform instead of detecting it from the URL
        #[arg(long)]
        platform: Option<Platform>,

        /// Lower runs first
        #[arg(long, default_value_t = DEFAULT_PRIORITY)]
        priority: u8,

        /// Quality label such as 1080p, 720p, best or audio
        #[arg(long)]
        quality: Option<String>,

        #[arg(long)]
        audio_only: bool,

        /// Maximum items for listings (subreddits, user pages)
        #[arg(long)]
        limit: Option<u32>,

        /// Extra folder below the platform directory
        #[arg(long)]
        subdir: Option<String>,
    },

    /// Show metadata without downloading
    Info {
        url: String,

        #[arg(long)]
        platform: Option<Platform>,
    },

    #[command(subcommand)]
    Config(ConfigCommand),

    #[command(subcommand)]
    Tools(ToolsCommand),

    /// Find (and optionally remove) duplicate files
    Dedupe {
        dir: PathBuf,

        #[arg(long)]
        remove: bool,

        /// Keep the oldest copy instead of the newest
        #[arg(long)]
        keep_oldest: bool,
    },

    /// Local usage statistics
    Stats,

    #[command(subcommand)]
    Cookies(CookiesCommand),

    #[command(subcommand)]
    Errors(ErrorsCommand),
}

#[derive(Debug, Subcommand)]
enum CookiesCommand {
    /// Store cookies for a platform from a file (netscape, json or header)
    Import {
        platform: Platform,
        file: PathBuf,

        /// Input format; detected from the content when omitted
        #[arg(long)]
        format: Option<CookieFormat>,
    },
    /// Show stored cookie files per platform
    List,
    /// Delete stored cookies (one kind, or all of the platform)
    Delete {
        platform: Platform,
        #[arg(long)]
        kind: Option<String>,
    },
    /// Check that a file is a usable Netscape cookies file
    Validate { file: PathBuf },
    /// Print a cookies.txt template for a platform
    Template { platform: Platform },
}

#[derive(Debug, Subcommand)]
enum ErrorsCommand {
    /// Summary of recorded download errors
    Stats,
    /// Write a detailed JSON report
    Export { file: PathBuf },
    /// Forget all recorded errors
    Clear,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Print the effective settings document
    Show,
    /// Print the settings file location
    Path,
    /// Print one dotted key, e.g. `reddit.min_score`
    Get { key: String },
    /// Set one dotted key; values are parsed as JSON when possible
    Set { key: String, value: String },
    /// Restore all defaults
    Reset,
    /// Check ranges and that the download directory is writable
    Validate,
}

#[derive(Debug, Subcommand)]
enum ToolsCommand {
    /// Show detected tools and versions
    List,
    /// Update yt-dlp / gallery-dl (all updatable tools when none is named)
    Update { tool: Option<String> },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut manager = match &cli.config {
        Some(path) => ConfigManager::open(path.clone()),
        None => ConfigManager::open_default(),
    }
    .context("failed to load configuration")?;

    let mut verbosity = cli.verbose;
    if manager.settings().advanced.debug_mode {
        verbosity = verbosity.max(1);
    }
    let _log_guard = logging::init(&manager.settings().logging, &manager.config_dir(), verbosity)
        .context("failed to initialise logging")?;

    let analytics = Arc::new(Analytics::new(&manager.config_dir(), &manager.settings().analytics));
    analytics.track_app_start();

    match cli.command {
        Command::Download {
            urls,
            platform,
            priority,
            quality,
            audio_only,
            limit,
            subdir,
        } => {
            let settings = runtime_settings(&manager);
            check_tools(&settings).await;

            let requests = urls
                .into_iter()
                .map(|url| {
                    let mut request = DownloadRequest::new(url).audio_only(audio_only);
                    request.platform = platform;
                    request.quality = quality.clone();
                    request.limit = limit;
                    request.output_subdir = subdir.clone();
                    request
                })
                .collect();
            let error_log = Arc::new(ErrorLog::new(&manager.config_dir()));
            download(settings, requests, priority, analytics, error_log).await
        }
        Command::Info { url, platform } => {
            let settings = runtime_settings(&manager);
            let downloader = Downloader::new(settings);
            let mut request = DownloadRequest::new(url);
            request.platform = platform;

            let info = downloader.fetch_info(&request, ProgressSink::disabled()).await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
            if !info.formats.is_empty() {
                println!(
                    "Available qualities: {} (recommended: {})",
                    FormatSelector::available_qualities(&info.formats).join(", "),
                    FormatSelector::recommend_quality(&info.formats)
                );
            }
            Ok(())
        }
        Command::Config(cmd) => config_command(&mut manager, cmd),
        Command::Tools(cmd) => tools_command(manager.settings(), cmd).await,
        Command::Dedupe {
            dir,
            remove,
            keep_oldest,
        } => dedupe(dir, remove, !keep_oldest).await,
        Command::Stats => {
            let stats = analytics.usage_stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            if !manager.settings().analytics.enabled {
                println!("(analytics.enabled is false; enable it to record usage)");
            }
            Ok(())
        }
        Command::Cookies(cmd) => cookies_command(&CookieManager::new(&manager.config_dir()), cmd),
        Command::Errors(cmd) => errors_command(&ErrorLog::new(&manager.config_dir()), cmd),
    }
}

/// Settings as used for this process. The detected proxy and stored cookie
/// files are applied in memory only.
fn runtime_settings(manager: &ConfigManager) -> Arc<Settings> {
    let mut settings = manager.settings().clone();
    for platform in CookieManager::new(&manager.config_dir()).apply_to(&mut settings) {
        info!("Using stored cookies for {}", platform);
    }
    if settings.general.proxy.is_none() && settings.general.auto_detect_proxy {
        if let Some(proxy) = auto_detect_proxy() {
            info!("Using detected proxy {}", proxy);
            settings.general.proxy = Some(proxy);
        }
    }
    Arc::new(settings)
}

async fn check_tools(settings: &Settings) {
    if !settings.updates.check_tools_on_startup {
        return;
    }
    let tools = ToolManager::new(settings);
    for tool in tools.get_all_tools().await {
        if !tool.is_available {
            warn!("{} not found; some platforms will fall back or fail", tool.name);
        } else if settings.updates.auto_update_tools
            && matches!(tool.tool_type, ToolType::YtDlp | ToolType::GalleryDl)
        {
            match tools.update(tool.tool_type).await {
                Ok(message) => info!("{}", message),
                Err(e) => warn!("Could not update {}: {}", tool.name, e),
            }
        }
    }
}

async fn download(
    settings: Arc<Settings>,
    requests: Vec<DownloadRequest>,
    priority: u8,
    analytics: Arc<Analytics>,
    error_log: Arc<ErrorLog>,
) -> anyhow::Result<()> {
    let downloader = Arc::new(Downloader::new(settings.clone()));
    let scheduler = Arc::new(
        DownloadScheduler::new(settings, downloader)
            .with_analytics(analytics)
            .with_error_log(error_log),
    );

    let mut events = scheduler
        .events()
        .context("scheduler event stream already taken")?;
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(&event);
        }
    });

    let ids: Vec<_> = requests
        .into_iter()
        .map(|request| scheduler.schedule(request, priority))
        .collect();

    let mut run = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run().await })
    };

    let summary = tokio::select! {
        summary = &mut run => summary?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling downloads");
            for id in &ids {
                scheduler.cancel(*id);
            }
            run.await?
        }
    };
    // Last sender goes with the scheduler, which ends the printer
    drop(scheduler);
    let _ = printer.await;

    println!(
        "Done: {} succeeded, {} failed, {} cancelled, {} files",
        summary.succeeded,
        summary.failed,
        summary.cancelled,
        summary.files.len()
    );
    for (id, error) in &summary.errors {
        eprintln!("  #{}: {}", id, error);
    }
    if summary.failed > 0 {
        bail!("{} download(s) failed", summary.failed);
    }
    Ok(())
}

fn print_event(event: &SchedulerEvent) {
    match event {
        SchedulerEvent::Started { id, url } => eprintln!("[#{}] starting {}", id, url),
        SchedulerEvent::Progress(p) => eprintln!("[#{}] {:5.1}% {}", p.job_id, p.percent, p.status),
        SchedulerEvent::Retry { id, attempt, delay, error } => {
            eprintln!("[#{}] retry {} in {:.0?}: {}", id, attempt, delay, error)
        }
        SchedulerEvent::Finished { id, files, skipped } => {
            eprintln!("[#{}] finished: {} files, {} skipped", id, files.len(), skipped);
            for f in files {
                println!("{}", f.display());
            }
        }
        SchedulerEvent::Failed { id, error } => eprintln!("[#{}] failed: {}", id, error),
        SchedulerEvent::Cancelled { id } => eprintln!("[#{}] cancelled", id),
        SchedulerEvent::Queued { .. } => {}
    }
}

fn cookies_command(cookies: &CookieManager, cmd: CookiesCommand) -> anyhow::Result<()> {
    match cmd {
        CookiesCommand::Import { platform, file, format } => {
            let stored = cookies
                .import_file(platform, &file, format)
                .with_context(|| format!("failed to import {}", file.display()))?;
            println!("Stored cookies for {} in {}", platform, stored.display());
        }
        CookiesCommand::List => {
            let listed = cookies.list()?;
            if listed.is_empty() {
                println!("No cookies stored in {}", cookies.dir().display());
            }
            for (platform, files) in listed {
                println!("{}", platform);
                for f in files {
                    let state = if f.valid { "valid" } else { "invalid" };
                    println!(
                        "  {:<8} {:<8} {} cookies, {} expired, modified {}",
                        f.kind,
                        state,
                        f.cookies,
                        f.expired,
                        f.modified.as_deref().unwrap_or("?")
                    );
                }
            }
        }
        CookiesCommand::Delete { platform, kind } => {
            let removed = cookies.delete(platform, kind.as_deref())?;
            println!("Deleted {} cookie files for {}", removed, platform);
        }
        CookiesCommand::Validate { file } => {
            if !CookieManager::validate_file(&file) {
                bail!("{} is not a valid Netscape cookies file", file.display());
            }
            println!("{} is valid", file.display());
        }
        CookiesCommand::Template { platform } => print!("{}", CookieManager::template(platform)),
    }
    Ok(())
}

fn errors_command(log: &ErrorLog, cmd: ErrorsCommand) -> anyhow::Result<()> {
    match cmd {
        ErrorsCommand::Stats => println!("{}", serde_json::to_string_pretty(&log.error_stats()?)?),
        ErrorsCommand::Export { file } => {
            let report = log.export_report(&file)?;
            println!(
                "Wrote {} ({} errors recorded)",
                file.display(),
                report.statistics.total_errors
            );
        }
        ErrorsCommand::Clear => log.clear()?,
    }
    Ok(())
}

fn backup_config(manager: &ConfigManager) {
    let backup = &manager.settings().backup;
    if !backup.enabled || !manager.path().exists() {
        return;
    }
    let dir = backup
        .directory
        .clone()
        .unwrap_or_else(|| manager.config_dir().join("backups"));
    if let Err(e) = FileManager::create_backup(manager.path(), &dir, backup.keep_last) {
        warn!("Could not back up settings: {}", e);
    }
}

fn config_command(manager: &mut ConfigManager, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show => println!("{}", manager.settings().to_json_pretty()?),
        ConfigCommand::Path => println!("{}", manager.path().display()),
        ConfigCommand::Get { key } => println!("{}", serde_json::to_string_pretty(&manager.get(&key)?)?),
        ConfigCommand::Set { key, value } => {
            backup_config(manager);
            manager.set(&key, parse_cli_value(&value))?;
            println!("{} = {}", key, manager.get(&key)?);
        }
        ConfigCommand::Reset => {
            backup_config(manager);
            manager.reset_to_defaults()?;
            println!("Settings reset to defaults");
        }
        ConfigCommand::Validate => {
            manager.check_writable()?;
            println!("Settings are valid");
        }
    }
    Ok(())
}

async fn tools_command(settings: &Settings, cmd: ToolsCommand) -> anyhow::Result<()> {
    let tools = ToolManager::new(settings);
    match cmd {
        ToolsCommand::List => {
            for tool in tools.get_all_tools().await {
                println!(
                    "{:<11} {:<9} {:<14} {}",
                    tool.name,
                    if tool.is_available { "found" } else { "missing" },
                    tool.version.as_deref().unwrap_or("-"),
                    tool.path.as_deref().unwrap_or("-")
                );
            }
        }
        ToolsCommand::Update { tool } => {
            let targets = match tool {
                Some(name) => vec![ToolType::parse(&name).with_context(|| format!("unknown tool {}", name))?],
                None => vec![ToolType::YtDlp, ToolType::GalleryDl],
            };
            for target in targets {
                println!("{}", tools.update(target).await?);
            }
        }
    }
    Ok(())
}

async fn dedupe(dir: PathBuf, remove: bool, keep_newest: bool) -> anyhow::Result<()> {
    let root = dir.clone();
    let report = tokio::task::spawn_blocking(move || {
        if remove {
            FileManager::remove_duplicates(&dir, keep_newest).map(|r| (r.groups, r.removed))
        } else {
            FileManager::find_duplicates(&dir).map(|groups| {
                for (hash, paths) in &groups {
                    println!("{}", &hash[..12]);
                    for p in paths {
                        println!("  {}", p.display());
                    }
                }
                (groups.len(), Vec::new())
            })
        }
    })
    .await??;

    let (groups, removed) = report;
    println!("{} duplicate groups", groups);
    for path in &removed {
        println!("removed {}", path.display());
    }
    if remove {
        let emptied = FileManager::cleanup_empty_dirs(&root)?;
        if emptied > 0 {
            println!("removed {} empty directories", emptied);
        }
    }
    println!(
        "{} now holds {}",
        root.display(),
        FormatSelector::format_size(FileManager::directory_size(&root)?)
    );
    Ok(())
}
