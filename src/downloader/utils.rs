// Helper functions shared by the extractors

use std::net::{SocketAddr, TcpStream};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command as TokioCommand;
use tokio::time::timeout;
use tracing::{debug, info};

use super::errors::DownloadError;
use super::models::NetworkConfig;

fn spawn_error(program: &str, e: std::io::Error) -> DownloadError {
    if e.kind() == std::io::ErrorKind::NotFound {
        DownloadError::ToolNotFound(program.to_string())
    } else {
        DownloadError::ExecutionError(format!("Failed to start {}: {}", program, e))
    }
}

/// Run a command, capturing stdout and stderr, killing it after `timeout_secs`.
pub async fn run_output_with_timeout(
    program: &str,
    args: Vec<String>,
    timeout_secs: u64,
) -> Result<std::process::Output, DownloadError> {
    let mut child = TokioCommand::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| spawn_error(program, e))?;

    let mut stdout_pipe = child
        .stdout
        .take()
        .ok_or_else(|| DownloadError::ExecutionError(format!("Failed to capture stdout from {}", program)))?;
    let mut stderr_pipe = child
        .stderr
        .take()
        .ok_or_else(|| DownloadError::ExecutionError(format!("Failed to capture stderr from {}", program)))?;

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stdout_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stderr_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });

    match timeout(Duration::from_secs(timeout_secs), child.wait()).await {
        Ok(status_res) => {
            let status = status_res?;
            let stdout = join_pipe(stdout_task).await?;
            let stderr = join_pipe(stderr_task).await?;
            Ok(std::process::Output { status, stdout, stderr })
        }
        Err(_) => {
            let _ = child.kill().await;
            stdout_task.abort();
            stderr_task.abort();
            Err(DownloadError::NetworkTimeout)
        }
    }
}

async fn join_pipe(
    task: tokio::task::JoinHandle<std::io::Result<Vec<u8>>>,
) -> Result<Vec<u8>, DownloadError> {
    task.await
        .map_err(|e| DownloadError::ExecutionError(format!("pipe reader failed: {}", e)))?
        .map_err(DownloadError::from)
}

/// Output of a streamed command
#[derive(Debug)]
pub struct StreamedOutput {
    pub success: bool,
    pub stdout_lines: Vec<String>,
    pub stderr: String,
}

/// Run a command and hand every stdout line to `on_line` as it arrives.
///
/// `idle_timeout` bounds the silence between two lines, not the total
/// runtime, so long downloads keep going as long as the tool reports progress.
/// With `None` only cancellation stops a silent process.
pub async fn run_streaming<F>(
    program: &str,
    args: &[String],
    idle_timeout: Option<Duration>,
    mut on_line: F,
) -> Result<StreamedOutput, DownloadError>
where
    F: FnMut(&str),
{
    let mut child = TokioCommand::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| spawn_error(program, e))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| DownloadError::ExecutionError(format!("Failed to capture stdout from {}", program)))?;
    let mut stderr_pipe = child
        .stderr
        .take()
        .ok_or_else(|| DownloadError::ExecutionError(format!("Failed to capture stderr from {}", program)))?;

    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stderr_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });

    let mut lines = BufReader::new(stdout).lines();
    let mut stdout_lines = Vec::new();
    loop {
        let next = match idle_timeout {
            Some(limit) => match timeout(limit, lines.next_line()).await {
                Ok(next) => next,
                Err(_) => {
                    let _ = child.kill().await;
                    stderr_task.abort();
                    return Err(DownloadError::NetworkTimeout);
                }
            },
            None => lines.next_line().await,
        };
        match next? {
            Some(line) => {
                on_line(&line);
                stdout_lines.push(line);
            }
            None => break,
        }
    }

    let status = child.wait().await?;
    let stderr = join_pipe(stderr_task).await?;

    Ok(StreamedOutput {
        success: status.success(),
        stdout_lines,
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    })
}

/// Auto-detect a local SOCKS5 proxy.
/// Checks the XRAY config first, then common ports.
pub fn auto_detect_proxy() -> Option<String> {
    if let Some(xray_port) = detect_xray_socks_port() {
        info!("Found XRAY SOCKS5 on port {}", xray_port);
        return Some(format!("socks5h://127.0.0.1:{}", xray_port));
    }

    let common_ports = [
        1080,  // Standard SOCKS5
        7890,  // Clash
        10808, // V2RayN
        1081,
        7891,
    ];

    for port in common_ports {
        if test_socks5_port(port) {
            info!("Found SOCKS5 on common port {}", port);
            return Some(format!("socks5h://127.0.0.1:{}", port));
        }
    }

    debug!("No SOCKS5 proxy detected");
    None
}

fn detect_xray_socks_port() -> Option<u16> {
    let mut config_paths = vec![std::path::PathBuf::from("/tmp/xray_config.json")];
    if let Some(home) = dirs::home_dir() {
        config_paths.push(home.join(".config/xray/config.json"));
    }

    config_paths.into_iter().find_map(|path| {
        let content = std::fs::read_to_string(&path).ok()?;
        let port = socks_port_from_xray(&content)?;
        debug!("Found SOCKS5 inbound in {}", path.display());
        Some(port)
    })
}

fn socks_port_from_xray(content: &str) -> Option<u16> {
    let json: serde_json::Value = serde_json::from_str(content).ok()?;
    json["inbounds"]
        .as_array()?
        .iter()
        .filter(|inbound| inbound["protocol"].as_str() == Some("socks"))
        .find_map(|inbound| inbound["port"].as_u64())
        .and_then(|p| u16::try_from(p).ok())
}

fn test_socks5_port(port: u16) -> bool {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    TcpStream::connect_timeout(&addr, Duration::from_millis(200)).is_ok()
}

/// Proxy arguments for yt-dlp / gallery-dl
pub fn get_proxy_args(config: &NetworkConfig) -> Vec<String> {
    match &config.proxy {
        Some(proxy) => vec!["--proxy".to_string(), proxy.clone()],
        None => Vec::new(),
    }
}

/// Timeout and retry arguments for yt-dlp
pub fn get_timeout_args(config: &NetworkConfig) -> Vec<String> {
    vec![
        "--socket-timeout".to_string(),
        config.timeout.as_secs().max(1).to_string(),
        "--retries".to_string(),
        config.retries.to_string(),
    ]
}
