// Redgifs extractor - native client for the public v2 API

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info, warn};

use super::traits::{ExtractContext, Extractor};
use crate::downloader::errors::DownloadError;
use crate::downloader::http::{extension_from_url, FetchResult, HttpFetcher};
use crate::downloader::models::{DownloadOutcome, DownloadRequest, MediaInfo};
use crate::files::{sanitize_filename, FileManager};
use crate::platform::Platform;

const PAGE_SIZE: u32 = 80;
const REFERER: &str = "https://www.redgifs.com/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedgifsTarget {
    Gif(String),
    User(String),
}

impl RedgifsTarget {
    /// `/watch/<id>` and `/i/<id>` are single gifs; `/users/<name>`, `@name`
    /// or a bare name is a user listing.
    pub fn parse(input: &str) -> Result<Self, DownloadError> {
        let trimmed = input.trim();
        let tail = |marker: &str| {
            trimmed
                .split(marker)
                .nth(1)
                .and_then(|rest| rest.split(['?', '#', '/']).next())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        if let Some(id) = tail("/watch/").or_else(|| tail("/i/")) {
            return Ok(Self::Gif(id.to_lowercase()));
        }
        if let Some(user) = tail("/users/") {
            return Ok(Self::User(user));
        }

        let bare = trimmed.trim_start_matches('@');
        if !bare.is_empty() && !bare.contains('/') && !bare.contains('.') {
            return Ok(Self::User(bare.to_string()));
        }

        Err(DownloadError::InvalidUrl(format!("Not a Redgifs gif or user: {}", input)))
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct GifResponse {
    gif: Gif,
}

#[derive(Debug, Clone, Deserialize)]
struct Gif {
    id: String,
    #[serde(default)]
    urls: GifUrls,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(rename = "userName", default)]
    user_name: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct GifUrls {
    hd: Option<String>,
    sd: Option<String>,
    thumbnail: Option<String>,
    poster: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserPage {
    #[serde(default)]
    gifs: Vec<Gif>,
    #[serde(default)]
    pages: Option<u32>,
}

impl Gif {
    /// Used when the API does not answer for a known id
    fn fallback(id: &str) -> Self {
        Self {
            id: id.to_string(),
            urls: GifUrls {
                hd: Some(format!("https://thumbs2.redgifs.com/{}.mp4", id)),
                sd: Some(format!("https://thumbs2.redgifs.com/{}-mobile.mp4", id)),
                thumbnail: None,
                poster: None,
            },
            tags: Vec::new(),
            user_name: None,
            duration: None,
        }
    }

    fn media_url(&self, prefer_hd: bool) -> Option<&str> {
        let (first, second) = if prefer_hd {
            (&self.urls.hd, &self.urls.sd)
        } else {
            (&self.urls.sd, &self.urls.hd)
        };
        first.as_deref().or(second.as_deref())
    }

    fn file_name(&self, url: &str, max_len: usize) -> String {
        let ext = extension_from_url(url).unwrap_or_else(|| "mp4".to_string());
        let stem = if self.tags.is_empty() {
            format!("redgifs_{}", self.id)
        } else {
            format!("{}_{}", self.tags.iter().take(3).cloned().collect::<Vec<_>>().join(" "), self.id)
        };
        sanitize_filename(&format!("{}.{}", stem, ext), max_len)
    }
}

#[derive(Default)]
pub struct RedgifsExtractor;

impl RedgifsExtractor {
    pub fn new() -> Self {
        Self
    }

    fn fetcher(ctx: &ExtractContext) -> Result<HttpFetcher, DownloadError> {
        let mut profile = ctx.profile.clone();
        profile
            .headers
            .entry("Referer".to_string())
            .or_insert_with(|| REFERER.to_string());
        HttpFetcher::new(&profile, &ctx.settings.size_limits)
    }

    async fn token(fetcher: &HttpFetcher, api_base: &str) -> Option<String> {
        let url = format!("{}/auth/temporary", api_base);
        match fetcher.get_json::<TokenResponse>(&url, None).await {
            Ok(t) => Some(t.token),
            Err(e) => {
                warn!("Could not obtain Redgifs token, continuing anonymously: {}", e);
                None
            }
        }
    }

    async fn gif(fetcher: &HttpFetcher, api_base: &str, token: Option<&str>, id: &str) -> Gif {
        let url = format!("{}/gifs/{}", api_base, id);
        match fetcher.get_json::<GifResponse>(&url, token).await {
            Ok(resp) => resp.gif,
            Err(e) => {
                debug!("Redgifs lookup for {} failed ({}), using CDN fallback", id, e);
                Gif::fallback(id)
            }
        }
    }

    async fn user_gifs(
        fetcher: &HttpFetcher,
        api_base: &str,
        token: Option<&str>,
        user: &str,
        limit: u32,
        ctx: &ExtractContext,
    ) -> Result<Vec<Gif>, DownloadError> {
        let mut gifs: Vec<Gif> = Vec::new();
        let mut page = 1u32;

        loop {
            if limit > 0 && gifs.len() >= limit as usize {
                break;
            }

            let url = format!("{}/users/{}/gifs?page={}&count={}", api_base, user, page, PAGE_SIZE);
            let batch = match fetcher.get_json::<UserPage>(&url, token).await {
                Ok(batch) => batch,
                Err(e) if page == 1 => return Err(e),
                Err(e) => {
                    debug!("Stopping at page {} for {}: {}", page, user, e);
                    break;
                }
            };

            if batch.gifs.is_empty() {
                break;
            }
            let total_pages = batch.pages;
            gifs.extend(batch.gifs);
            ctx.progress.emit(0.0, format!("Listed {} gifs from {}", gifs.len(), user));

            if total_pages.map_or(false, |p| page >= p) {
                break;
            }
            page += 1;
            tokio::time::sleep(ctx.profile.min_request_delay).await;
        }

        if limit > 0 {
            gifs.truncate(limit as usize);
        }
        info!("Retrieved {} gifs from {}", gifs.len(), user);
        Ok(gifs)
    }

    async fn save_gifs(
        fetcher: &HttpFetcher,
        gifs: &[Gif],
        dir: &Path,
        ctx: &ExtractContext,
    ) -> Result<DownloadOutcome, DownloadError> {
        let settings = &ctx.settings;
        let prefer_hd = settings.redgifs.prefer_hd;
        let max_len = settings.file_handling.max_filename_length;
        let mut outcome = DownloadOutcome::new("redgifs-api");
        let mut last_error = None;

        let files = FileManager::new(settings);
        for (idx, gif) in gifs.iter().enumerate() {
            ctx.progress.emit_items(idx, gifs.len(), format!("gif {}/{}", idx + 1, gifs.len()));

            let Some(url) = gif.media_url(prefer_hd) else {
                warn!("No media URL for gif {}", gif.id);
                outcome.skipped += 1;
                continue;
            };
            let dest = dir.join(gif.file_name(url, max_len));
            if files.should_skip(&dest) {
                outcome.skipped += 1;
                continue;
            }

            match fetcher.download_file(url, &dest, &ctx.progress).await {
                Ok(FetchResult::Saved { path, .. }) => outcome.files.push(path),
                Ok(FetchResult::Skipped { reason }) => {
                    debug!("Skipped gif {}: {}", gif.id, reason);
                    outcome.skipped += 1;
                }
                Err(e) => {
                    warn!("Failed to download gif {}: {}", gif.id, e);
                    last_error = Some(e);
                }
            }

            if idx + 1 < gifs.len() {
                tokio::time::sleep(ctx.profile.min_request_delay).await;
            }
        }

        // Only a total failure is an error; partial listings still count
        match last_error {
            Some(e) if outcome.files.is_empty() && outcome.skipped == 0 => Err(e),
            _ => Ok(outcome),
        }
    }
}

#[async_trait]
impl Extractor for RedgifsExtractor {
    fn name(&self) -> &'static str {
        "redgifs-api"
    }

    fn supports(&self, platform: Platform) -> bool {
        platform == Platform::Redgifs
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn fetch_info(
        &self,
        request: &DownloadRequest,
        ctx: &ExtractContext,
    ) -> Result<MediaInfo, DownloadError> {
        let fetcher = Self::fetcher(ctx)?;
        let api_base = ctx.settings.redgifs.api_base.trim_end_matches('/').to_string();
        let token = Self::token(&fetcher, &api_base).await;

        match RedgifsTarget::parse(&request.url)? {
            RedgifsTarget::Gif(id) => {
                let gif = Self::gif(&fetcher, &api_base, token.as_deref(), &id).await;
                let mut info = MediaInfo::new(Platform::Redgifs, gif.id.clone(), request.url.clone());
                info.title = if gif.tags.is_empty() { gif.id.clone() } else { gif.tags.join(", ") };
                info.uploader = gif.user_name.clone().unwrap_or_default();
                info.duration_secs = gif.duration;
                info.thumbnail = gif.urls.thumbnail.clone().or(gif.urls.poster.clone());
                Ok(info)
            }
            RedgifsTarget::User(user) => {
                let limit = ctx.listing_limit(request, ctx.settings.redgifs.limit);
                let gifs = Self::user_gifs(&fetcher, &api_base, token.as_deref(), &user, limit, ctx).await?;
                let mut info = MediaInfo::new(Platform::Redgifs, user.clone(), request.url.clone());
                info.title = format!("{} (user)", user);
                info.uploader = user;
                info.item_count = gifs.len();
                Ok(info)
            }
        }
    }

    async fn download(
        &self,
        request: &DownloadRequest,
        ctx: &ExtractContext,
    ) -> Result<DownloadOutcome, DownloadError> {
        let fetcher = Self::fetcher(ctx)?;
        let api_base = ctx.settings.redgifs.api_base.trim_end_matches('/').to_string();
        let token = Self::token(&fetcher, &api_base).await;
        let base_dir = ctx.output_dir(request)?;

        match RedgifsTarget::parse(&request.url)? {
            RedgifsTarget::Gif(id) => {
                let gif = Self::gif(&fetcher, &api_base, token.as_deref(), &id).await;
                Self::save_gifs(&fetcher, std::slice::from_ref(&gif), &base_dir, ctx).await
            }
            RedgifsTarget::User(user) => {
                let limit = ctx.listing_limit(request, ctx.settings.redgifs.limit);
                let gifs = Self::user_gifs(&fetcher, &api_base, token.as_deref(), &user, limit, ctx).await?;
                if gifs.is_empty() {
                    return Err(DownloadError::Unknown(format!("No gifs found for {}", user)));
                }
                let dir = base_dir.join(sanitize_filename(&user, 100));
                std::fs::create_dir_all(&dir)?;
                Self::save_gifs(&fetcher, &gifs, &dir, ctx).await
            }
        }
    }
}
