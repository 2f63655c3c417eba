// Reddit extractor - subreddit listings and single posts via the public JSON API

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info, warn};

use super::traits::{ExtractContext, Extractor};
use crate::downloader::errors::DownloadError;
use crate::downloader::http::{extension_from_url, FetchResult, HttpFetcher};
use crate::downloader::models::{DownloadOutcome, DownloadRequest, MediaInfo};
use crate::files::{sanitize_filename, FileManager};
use crate::platform::Platform;

const REDDIT_BASE: &str = "https://www.reddit.com";
const MAX_PAGE: u32 = 100;
const TITLE_CHARS: usize = 50;
const DIRECT_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "mp4", "webm", "mov"];
const IMAGE_HOSTS: &[&str] = &["i.redd.it", "i.imgur.com", "imgur.com"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedditTarget {
    Subreddit(String),
    /// Permalink of a single post, without trailing slash
    Post(String),
}

impl RedditTarget {
    pub fn parse(input: &str) -> Result<Self, DownloadError> {
        let trimmed = input.trim().trim_end_matches('/');
        let path = trimmed
            .split_once("reddit.com")
            .map(|(_, rest)| rest)
            .unwrap_or(trimmed);
        let path = path.split(['?', '#']).next().unwrap_or(path);

        if path.contains("/comments/") {
            let permalink = if trimmed.starts_with("http") {
                trimmed.split(['?', '#']).next().unwrap_or(trimmed).to_string()
            } else {
                format!("{}{}", REDDIT_BASE, path)
            };
            return Ok(Self::Post(permalink));
        }

        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        match segments.as_slice() {
            ["r", name, ..] if !name.is_empty() => Ok(Self::Subreddit(name.to_string())),
            [name] if !name.contains('.') && !name.contains(':') => Ok(Self::Subreddit(name.to_string())),
            _ => Err(DownloadError::InvalidUrl(format!("Not a subreddit or post: {}", input))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Child>,
    after: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Child {
    data: Post,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Post {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub over_18: bool,
    #[serde(default)]
    pub is_video: bool,
    #[serde(default)]
    pub is_gallery: bool,
    #[serde(default)]
    pub media: Option<Value>,
    #[serde(default)]
    pub gallery_data: Option<Value>,
    #[serde(default)]
    pub media_metadata: Option<Value>,
}

/// One file to fetch for a post
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    pub url: String,
    pub file_name: String,
}

impl Post {
    pub fn passes_filters(&self, min_score: i64, skip_nsfw: bool) -> bool {
        self.score >= min_score && !(skip_nsfw && self.over_18)
    }

    fn stem(&self) -> String {
        let title: String = self.title.chars().take(TITLE_CHARS).collect();
        let title = title.trim();
        if title.is_empty() {
            self.id.clone()
        } else {
            format!("{}_{}", title, self.id)
        }
    }

    fn video_url(&self) -> Option<String> {
        self.media
            .as_ref()?
            .pointer("/reddit_video/fallback_url")?
            .as_str()
            .map(str::to_string)
    }

    /// Gallery images in post order
    fn gallery_urls(&self) -> Vec<String> {
        let Some(meta) = self.media_metadata.as_ref().and_then(Value::as_object) else {
            return Vec::new();
        };

        let ordered: Vec<&str> = self
            .gallery_data
            .as_ref()
            .and_then(|g| g.get("items"))
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(|i| i.get("media_id")?.as_str()).collect())
            .unwrap_or_else(|| meta.keys().map(String::as_str).collect());

        ordered
            .into_iter()
            .filter_map(|id| meta.get(id)?.pointer("/s/u")?.as_str())
            .map(|u| u.replace("&amp;", "&"))
            .collect()
    }

    /// Files to download for this post; empty means unsupported or link-only
    pub fn media_items(&self, max_len: usize) -> Vec<MediaItem> {
        let stem = self.stem();
        let name = |suffix: &str, ext: &str| sanitize_filename(&format!("{}{}.{}", stem, suffix, ext), max_len);

        if self.is_video {
            if let Some(url) = self.video_url() {
                return vec![MediaItem {
                    file_name: name("", "mp4"),
                    url,
                }];
            }
        }

        let gallery = self.gallery_urls();
        if !gallery.is_empty() {
            return gallery
                .into_iter()
                .enumerate()
                .map(|(i, url)| {
                    let ext = extension_from_url(&url).unwrap_or_else(|| "jpg".to_string());
                    MediaItem {
                        file_name: name(&format!("_{:03}", i + 1), &ext),
                        url,
                    }
                })
                .collect();
        }

        let ext = extension_from_url(&self.url);
        let direct = ext.as_deref().map_or(false, |e| DIRECT_EXTENSIONS.contains(&e));
        let image_host = IMAGE_HOSTS.iter().any(|h| self.domain.eq_ignore_ascii_case(h));

        match ext {
            Some(ext) if direct => vec![MediaItem {
                file_name: name("", &ext),
                url: self.url.clone(),
            }],
            // i.redd.it serves bare image ids occasionally
            None if image_host && self.domain.starts_with("i.") => vec![MediaItem {
                file_name: name("", "jpg"),
                url: self.url.clone(),
            }],
            _ => Vec::new(),
        }
    }
}

fn listing_url(sub: &str, sort: &str, batch: u32, after: Option<&str>) -> String {
    let mut url = format!("{}/r/{}/{}.json?limit={}&raw_json=1", REDDIT_BASE, sub, sort, batch);
    if let Some(after) = after {
        url.push_str("&after=");
        url.push_str(after);
    }
    url
}

/// Posts from a single post's JSON document: `[post listing, comments listing]`
fn posts_from_post_document(doc: Vec<Listing>) -> Vec<Post> {
    doc.into_iter()
        .next()
        .map(|l| l.data.children.into_iter().map(|c| c.data).collect())
        .unwrap_or_default()
}

#[derive(Default)]
pub struct RedditExtractor;

impl RedditExtractor {
    pub fn new() -> Self {
        Self
    }

    async fn subreddit_posts(
        fetcher: &HttpFetcher,
        sub: &str,
        limit: u32,
        ctx: &ExtractContext,
    ) -> Result<Vec<Post>, DownloadError> {
        let sort = ctx.settings.reddit.sort.as_str();
        let mut posts = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let batch = if limit == 0 {
                MAX_PAGE
            } else {
                MAX_PAGE.min(limit.saturating_sub(posts.len() as u32))
            };
            if batch == 0 {
                break;
            }

            let url = listing_url(sub, sort, batch, after.as_deref());
            debug!("Fetching {}", url);
            let listing: Listing = fetcher.get_json(&url, None).await?;
            let received = listing.data.children.len();
            posts.extend(listing.data.children.into_iter().map(|c| c.data));
            ctx.progress.emit(0.0, format!("Listed {} posts from r/{}", posts.len(), sub));

            after = listing.data.after;
            if after.is_none() || received == 0 {
                break;
            }
            tokio::time::sleep(ctx.profile.min_request_delay).await;
        }

        info!("Retrieved {} posts from r/{}", posts.len(), sub);
        Ok(posts)
    }

    async fn single_post(fetcher: &HttpFetcher, permalink: &str) -> Result<Vec<Post>, DownloadError> {
        let url = format!("{}.json?raw_json=1", permalink);
        let doc: Vec<Listing> = fetcher.get_json(&url, None).await?;
        let posts = posts_from_post_document(doc);
        if posts.is_empty() {
            return Err(DownloadError::ParseError(format!("No post found at {}", permalink)));
        }
        Ok(posts)
    }

    async fn posts_for(
        fetcher: &HttpFetcher,
        request: &DownloadRequest,
        ctx: &ExtractContext,
    ) -> Result<(RedditTarget, Vec<Post>), DownloadError> {
        let target = RedditTarget::parse(&request.url)?;
        let posts = match &target {
            RedditTarget::Subreddit(sub) => {
                let limit = ctx.listing_limit(request, ctx.settings.reddit.limit);
                Self::subreddit_posts(fetcher, sub, limit, ctx).await?
            }
            RedditTarget::Post(permalink) => Self::single_post(fetcher, permalink).await?,
        };
        Ok((target, posts))
    }

    async fn save_posts(
        fetcher: &HttpFetcher,
        posts: &[Post],
        dir: &Path,
        ctx: &ExtractContext,
    ) -> Result<DownloadOutcome, DownloadError> {
        let settings = &ctx.settings;
        let reddit = &settings.reddit;
        let max_len = settings.file_handling.max_filename_length;
        let mut outcome = DownloadOutcome::new("reddit-api");
        let mut last_error = None;

        let files = FileManager::new(settings);
        for (idx, post) in posts.iter().enumerate() {
            ctx.progress.emit_items(idx, posts.len(), format!("post {}/{}", idx + 1, posts.len()));

            if !post.passes_filters(reddit.min_score, reddit.skip_nsfw) {
                outcome.skipped += 1;
                continue;
            }

            let items = post.media_items(max_len);
            if items.is_empty() {
                debug!("No downloadable media in post {} ({})", post.id, post.domain);
                outcome.skipped += 1;
                continue;
            }

            for item in items {
                let dest = dir.join(&item.file_name);
                if files.should_skip(&dest) {
                    outcome.skipped += 1;
                    continue;
                }
                match fetcher.download_file(&item.url, &dest, &ctx.progress).await {
                    Ok(FetchResult::Saved { path, .. }) => outcome.files.push(path),
                    Ok(FetchResult::Skipped { reason }) => {
                        debug!("Skipped {}: {}", item.url, reason);
                        outcome.skipped += 1;
                    }
                    Err(e) => {
                        warn!("Failed to download {} from post {}: {}", item.url, post.id, e);
                        last_error = Some(e);
                    }
                }
            }

            if idx + 1 < posts.len() {
                tokio::time::sleep(ctx.profile.min_request_delay).await;
            }
        }

        match last_error {
            Some(e) if outcome.files.is_empty() && outcome.skipped == 0 => Err(e),
            _ => Ok(outcome),
        }
    }
}

#[async_trait]
impl Extractor for RedditExtractor {
    fn name(&self) -> &'static str {
        "reddit-api"
    }

    fn supports(&self, platform: Platform) -> bool {
        platform == Platform::Reddit
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn fetch_info(
        &self,
        request: &DownloadRequest,
        ctx: &ExtractContext,
    ) -> Result<MediaInfo, DownloadError> {
        let fetcher = HttpFetcher::new(&ctx.profile, &ctx.settings.size_limits)?;
        let (target, posts) = Self::posts_for(&fetcher, request, ctx).await?;

        let info = match target {
            RedditTarget::Subreddit(sub) => {
                let mut info = MediaInfo::new(Platform::Reddit, sub.clone(), request.url.clone());
                info.title = format!("r/{}", sub);
                info.item_count = posts.len();
                info
            }
            RedditTarget::Post(permalink) => {
                let post = &posts[0];
                let mut info = MediaInfo::new(Platform::Reddit, post.id.clone(), permalink);
                info.title = post.title.clone();
                info.uploader = post.author.clone();
                info.item_count = post.media_items(usize::MAX).len();
                info.thumbnail = Some(post.url.clone()).filter(|u| !u.is_empty());
                info
            }
        };
        Ok(info)
    }

    async fn download(
        &self,
        request: &DownloadRequest,
        ctx: &ExtractContext,
    ) -> Result<DownloadOutcome, DownloadError> {
        let fetcher = HttpFetcher::new(&ctx.profile, &ctx.settings.size_limits)?;
        let (target, posts) = Self::posts_for(&fetcher, request, ctx).await?;

        let base = ctx.output_dir(request)?;
        let dir = match &target {
            RedditTarget::Subreddit(sub) => base.join(format!("r_{}", sanitize_filename(sub, 100))),
            RedditTarget::Post(_) => base,
        };
        std::fs::create_dir_all(&dir)?;

        Self::save_posts(&fetcher, &posts, &dir, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(json: &str) -> Post {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_parse_targets() {
        assert_eq!(RedditTarget::parse("r/pics").unwrap(), RedditTarget::Subreddit("pics".into()));
        assert_eq!(RedditTarget::parse("pics").unwrap(), RedditTarget::Subreddit("pics".into()));
        assert_eq!(
            RedditTarget::parse("https://www.reddit.com/r/EarthPorn/top/?t=week").unwrap(),
            RedditTarget::Subreddit("EarthPorn".into())
        );
        assert_eq!(
            RedditTarget::parse("https://old.reddit.com/r/pics/comments/abc123/some_title/").unwrap(),
            RedditTarget::Post("https://old.reddit.com/r/pics/comments/abc123/some_title".into())
        );
        assert!(RedditTarget::parse("https://example.com/foo/bar").is_err());
    }

    #[test]
    fn test_listing_url() {
        assert_eq!(
            listing_url("pics", "hot", 25, None),
            "https://www.reddit.com/r/pics/hot.json?limit=25&raw_json=1"
        );
        assert_eq!(
            listing_url("pics", "new", 100, Some("t3_x")),
            "https://www.reddit.com/r/pics/new.json?limit=100&raw_json=1&after=t3_x"
        );
    }

    #[test]
    fn test_filters() {
        let p = post(r#"{"id":"a","score":5,"over_18":true}"#);
        assert!(p.passes_filters(0, false));
        assert!(!p.passes_filters(0, true));
        assert!(!p.passes_filters(10, false));
    }

    #[test]
    fn test_video_post() {
        let p = post(
            r#"{"id":"v1","title":"A clip","url":"https://v.redd.it/v1","domain":"v.redd.it","is_video":true,
                "media":{"reddit_video":{"fallback_url":"https://v.redd.it/v1/DASH_720.mp4?source=fallback"}}}"#,
        );
        let items = p.media_items(200);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].url, "https://v.redd.it/v1/DASH_720.mp4?source=fallback");
        assert_eq!(items[0].file_name, "A clip_v1.mp4");
    }

    #[test]
    fn test_gallery_post_keeps_order_and_unescapes() {
        let p = post(
            r#"{"id":"g1","title":"Gallery","url":"https://www.reddit.com/gallery/g1","domain":"reddit.com",
                "gallery_data":{"items":[{"media_id":"m2"},{"media_id":"m1"}]},
                "media_metadata":{
                    "m1":{"s":{"u":"https://preview.redd.it/m1.png?width=10&amp;s=x"}},
                    "m2":{"s":{"u":"https://preview.redd.it/m2.jpg?width=10&amp;s=y"}}}}"#,
        );
        let items = p.media_items(200);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].url, "https://preview.redd.it/m2.jpg?width=10&s=y");
        assert_eq!(items[0].file_name, "Gallery_g1_001.jpg");
        assert_eq!(items[1].file_name, "Gallery_g1_002.png");
    }

    #[test]
    fn test_direct_and_unsupported_links() {
        let image = post(r#"{"id":"i1","title":"Pic","url":"https://i.redd.it/xyz.jpeg","domain":"i.redd.it"}"#);
        assert_eq!(image.media_items(200)[0].file_name, "Pic_i1.jpeg");

        let article = post(r#"{"id":"l1","title":"News","url":"https://news.example.com/story","domain":"news.example.com"}"#);
        assert!(article.media_items(200).is_empty());

        let imgur_page = post(r#"{"id":"p1","title":"Album","url":"https://imgur.com/a/xyz","domain":"imgur.com"}"#);
        assert!(imgur_page.media_items(200).is_empty());
    }

    #[test]
    fn test_long_titles_are_cut() {
        let title = "x".repeat(120);
        let p = post(&format!(
            r#"{{"id":"t1","title":"{}","url":"https://i.redd.it/a.png","domain":"i.redd.it"}}"#,
            title
        ));
        assert_eq!(p.media_items(200)[0].file_name, format!("{}_t1.png", "x".repeat(50)));
    }

    #[test]
    fn test_single_post_document() {
        let json = r#"[
            {"kind":"Listing","data":{"after":null,"children":[{"kind":"t3","data":{"id":"abc","title":"T"}}]}},
            {"kind":"Listing","data":{"after":null,"children":[]}}
        ]"#;
        let doc: Vec<Listing> = serde_json::from_str(json).unwrap();
        let posts = posts_from_post_document(doc);
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].id, "abc");
    }
}
