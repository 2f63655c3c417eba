// Shared HTTP client for the API-backed extractors

use std::path::{Path, PathBuf};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH};
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::errors::DownloadError;
use super::progress::ProgressSink;
use crate::config::{PlatformProfile, SizeLimits};

/// What happened to a single file fetch
#[derive(Debug, Clone, PartialEq)]
pub enum FetchResult {
    Saved { path: PathBuf, bytes: u64 },
    /// Left out because of a size limit
    Skipped { reason: String },
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    max_bytes: Option<u64>,
    min_bytes: Option<u64>,
}

impl HttpFetcher {
    /// Client configured from a platform profile: UA, headers, proxy, timeouts.
    pub fn new(profile: &PlatformProfile, limits: &SizeLimits) -> Result<Self, DownloadError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &profile.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(n), Ok(v)) => {
                    headers.insert(n, v);
                }
                _ => warn!("Skipping invalid header {}: {}", name, value),
            }
        }

        let mut builder = reqwest::Client::builder()
            .user_agent(profile.user_agent.clone())
            .default_headers(headers)
            .timeout(profile.timeout)
            .connect_timeout(profile.connect_timeout)
            .danger_accept_invalid_certs(!profile.verify_ssl);

        if let Some(proxy_url) = profile.proxy.as_deref() {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| DownloadError::InvalidUrl(format!("proxy {}: {}", proxy_url, e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| DownloadError::ExecutionError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            max_bytes: limits.max_bytes(),
            min_bytes: limits.min_bytes(),
        })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// GET a JSON document, mapping non-success statuses to `DownloadError::Http`.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        bearer: Option<&str>,
    ) -> Result<T, DownloadError> {
        let mut request = self.client.get(url);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| DownloadError::ParseError(format!("{}: {}", url, e)))
    }

    /// Stream `url` into `dest`, honouring the configured size limits.
    ///
    /// Data goes to `<dest>.part` first and is renamed on success.
    pub async fn download_file(
        &self,
        url: &str,
        dest: &Path,
        progress: &ProgressSink,
    ) -> Result<FetchResult, DownloadError> {
        let mut response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let expected = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        if let Some(reason) = expected.and_then(|len| self.violates_limits(len, true)) {
            debug!("Skipping {}: {}", url, reason);
            return Ok(FetchResult::Skipped { reason });
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let part = part_path(dest);
        let mut file = tokio::fs::File::create(&part).await?;
        let mut written: u64 = 0;

        loop {
            let chunk = match response.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&part).await;
                    return Err(e.into());
                }
            };

            written += chunk.len() as u64;
            if let Some(max) = self.max_bytes {
                if written > max {
                    drop(file);
                    let _ = tokio::fs::remove_file(&part).await;
                    return Ok(FetchResult::Skipped {
                        reason: format!("larger than {} bytes", max),
                    });
                }
            }
            file.write_all(&chunk).await?;

            if let Some(total) = expected.filter(|t| *t > 0) {
                progress.emit(written as f32 * 100.0 / total as f32, format!("{} / {} bytes", written, total));
            }
        }

        file.flush().await?;
        drop(file);

        if let Some(reason) = self.violates_limits(written, false) {
            let _ = tokio::fs::remove_file(&part).await;
            return Ok(FetchResult::Skipped { reason });
        }

        tokio::fs::rename(&part, dest).await?;
        Ok(FetchResult::Saved {
            path: dest.to_path_buf(),
            bytes: written,
        })
    }

    fn violates_limits(&self, len: u64, announced: bool) -> Option<String> {
        if let Some(max) = self.max_bytes {
            if len > max {
                return Some(format!("{} bytes exceeds limit of {}", len, max));
            }
        }
        // An announced length of 0 is usually a missing header, not an empty file
        if let Some(min) = self.min_bytes {
            if len < min && !(announced && len == 0) {
                return Some(format!("{} bytes is below minimum of {}", len, min));
            }
        }
        None
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

/// File extension from a media URL, ignoring query strings
pub fn extension_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last = path.rsplit('/').next()?;
    let (_, ext) = last.rsplit_once('.')?;
    let ext = ext.to_lowercase();
    (!ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric())).then_some(ext)
}
