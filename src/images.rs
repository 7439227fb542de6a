//! Image search across interchangeable sources and concurrent download.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use regex::Regex;
use reqwest::header::USER_AGENT;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheStore, image_urls_key};
use crate::error::{PipelineError, Result};
use crate::orchestrator::CancelSignal;

const IMAGE_EXTENSIONS: [&str; 6] = [".png", ".jpg", ".jpeg", ".gif", ".bmp", ".webp"];
const UNSPLASH_PHOTO_PREFIX: &str = "https://images.unsplash.com/photo-";
const BROWSER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/137.0.0.0 Safari/537.36";

static UNSAFE_FILENAME_CHARS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\-.]").unwrap());

#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Short stable name, also used in cache keys.
    fn name(&self) -> &'static str;

    async fn search(&self, subject: &str) -> Result<Vec<String>>;
}

#[derive(Debug, Deserialize)]
struct WikimediaResponse {
    #[serde(default)]
    query: Option<WikimediaQuery>,
}

#[derive(Debug, Deserialize)]
struct WikimediaQuery {
    #[serde(default)]
    pages: HashMap<String, WikimediaPage>,
}

#[derive(Debug, Deserialize)]
struct WikimediaPage {
    #[serde(default)]
    imageinfo: Vec<WikimediaImageInfo>,
}

#[derive(Debug, Deserialize)]
struct WikimediaImageInfo {
    thumburl: Option<String>,
    url: Option<String>,
}

pub struct WikimediaSource {
    client: reqwest::Client,
}

impl WikimediaSource {
    const ENDPOINT: &'static str = "https://commons.wikimedia.org/w/api.php";

    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn parse_wikimedia(body: &str) -> Result<Vec<String>> {
    let parsed: WikimediaResponse =
        serde_json::from_str(body).map_err(|e| PipelineError::external("wikimedia", e))?;
    let mut pages: Vec<(String, WikimediaPage)> = parsed
        .query
        .map(|q| q.pages.into_iter().collect())
        .unwrap_or_default();
    // Page ids are map keys; sort for a stable order across runs.
    pages.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(pages
        .into_iter()
        .filter_map(|(_, page)| page.imageinfo.into_iter().next())
        .filter_map(|info| info.thumburl.or(info.url))
        .collect())
}

#[async_trait]
impl ImageSource for WikimediaSource {
    fn name(&self) -> &'static str {
        "wikimedia"
    }

    async fn search(&self, subject: &str) -> Result<Vec<String>> {
        let params = [
            ("action", "query"),
            ("format", "json"),
            ("generator", "images"),
            ("titles", subject),
            ("prop", "imageinfo"),
            ("redirects", "1"),
            ("gimlimit", "200"),
            ("iiprop", "url"),
        ];
        let body = self
            .client
            .get(Self::ENDPOINT)
            .query(&params)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PipelineError::external("wikimedia", e))?
            .text()
            .await
            .map_err(|e| PipelineError::external("wikimedia", e))?;
        parse_wikimedia(&body)
    }
}

#[derive(Debug, Deserialize)]
struct UnsplashResponse {
    #[serde(default)]
    results: Vec<UnsplashPhoto>,
}

#[derive(Debug, Deserialize)]
struct UnsplashPhoto {
    urls: Option<UnsplashUrls>,
}

#[derive(Debug, Deserialize)]
struct UnsplashUrls {
    regular: Option<String>,
}

pub struct UnsplashSource {
    client: reqwest::Client,
    access_key: Option<String>,
}

impl UnsplashSource {
    const ENDPOINT: &'static str = "https://api.unsplash.com/search/photos";

    pub fn new(client: reqwest::Client, access_key: Option<String>) -> Self {
        Self { client, access_key }
    }
}

fn parse_unsplash(body: &str) -> Result<Vec<String>> {
    let parsed: UnsplashResponse =
        serde_json::from_str(body).map_err(|e| PipelineError::external("unsplash", e))?;
    Ok(parsed
        .results
        .into_iter()
        .filter_map(|p| p.urls.and_then(|u| u.regular))
        .collect())
}

#[async_trait]
impl ImageSource for UnsplashSource {
    fn name(&self) -> &'static str {
        "unsplash"
    }

    async fn search(&self, subject: &str) -> Result<Vec<String>> {
        let access_key = self.access_key.as_deref().ok_or_else(|| {
            PipelineError::Configuration(
                "Unsplash API access key not found. Please set the UNSPLASH_ACCESS_KEY environment variable."
                    .into(),
            )
        })?;
        let params = [("query", subject), ("per_page", "25"), ("client_id", access_key)];
        let body = self
            .client
            .get(Self::ENDPOINT)
            .query(&params)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PipelineError::external("unsplash", e))?
            .text()
            .await
            .map_err(|e| PipelineError::external("unsplash", e))?;
        parse_unsplash(&body)
    }
}

/// Asks each source in priority order; the first non-empty answer wins.
/// Cached answers are used before the network. A configuration error stops
/// the search, any other failure moves on to the next source.
pub async fn find_image_urls(
    sources: &[Box<dyn ImageSource>],
    cache: &CacheStore,
    subject: &str,
) -> Result<Vec<String>> {
    for source in sources {
        let key = image_urls_key(source.name(), subject);
        if let Some(urls) = cache.get::<Vec<String>>(&key).filter(|u| !u.is_empty()) {
            info!("Using cached {} URLs for {}", source.name(), subject);
            return Ok(urls);
        }

        match source.search(subject).await {
            Ok(urls) if !urls.is_empty() => {
                info!("Found {} image URLs on {}", urls.len(), source.name());
                cache.set(&key, &urls);
                return Ok(urls);
            }
            Ok(_) => warn!("No images found on {} for {}", source.name(), subject),
            Err(e) if e.is_fatal_config() => return Err(e),
            Err(e) => warn!("Failed to retrieve image URLs from {}: {}", source.name(), e),
        }
    }
    error!("No image source returned URLs for {}", subject);
    Err(PipelineError::external(
        "image search",
        format!("no source returned images for {}", subject),
    ))
}

/// File name for a downloadable image URL, or `None` for URLs that are not
/// images.
pub fn image_file_name(url: &str, subject: &str) -> Option<String> {
    let raw = if let Some(rest) = url.strip_prefix(UNSPLASH_PHOTO_PREFIX) {
        let id = rest.split('?').next().unwrap_or(rest);
        format!("{}.{}.jpeg", subject, id)
    } else {
        let lower = url.to_ascii_lowercase();
        if !IMAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
            return None;
        }
        url.rsplit('/').next().unwrap_or(url).to_string()
    };
    Some(sanitize_file_name(&raw))
}

/// Replaces anything outside `[\w\-.]` with `_`.
pub fn sanitize_file_name(raw: &str) -> String {
    UNSAFE_FILENAME_CHARS.replace_all(raw, "_").into_owned()
}

pub struct ImageDownloader {
    client: reqwest::Client,
    out_dir: PathBuf,
    concurrency: usize,
}

impl ImageDownloader {
    pub fn new(client: reqwest::Client, out_dir: impl Into<PathBuf>, concurrency: usize) -> Self {
        Self {
            client,
            out_dir: out_dir.into(),
            concurrency: concurrency.max(1),
        }
    }

    /// Downloads up to `concurrency` images at a time. Failed downloads are
    /// skipped; the successes come back in the order of `urls`, each file
    /// at most once.
    pub async fn download_all(
        &self,
        urls: &[String],
        subject: &str,
        cancel: &CancelSignal,
    ) -> Result<Vec<PathBuf>> {
        tokio::fs::create_dir_all(&self.out_dir)
            .await
            .map_err(|e| PipelineError::io("creating image output dir", e))?;

        // Each job owns its inputs so the whole fan-out stays `Send`.
        let jobs: Vec<_> = urls
            .iter()
            .enumerate()
            .map(|(i, url)| {
                let client = self.client.clone();
                let out_dir = self.out_dir.clone();
                let url = url.clone();
                let subject = subject.to_string();
                let cancel = cancel.clone();
                async move {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    download_one(&client, &out_dir, &url, &subject, i)
                        .await
                        .map(|p| (i, p))
                }
            })
            .collect();
        let results: Vec<Option<(usize, PathBuf)>> = stream::iter(jobs)
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled("images"));
        }
        let mut finished: Vec<(usize, PathBuf)> = results.into_iter().flatten().collect();
        finished.sort_by_key(|(i, _)| *i);
        let mut seen = HashSet::new();
        let paths: Vec<PathBuf> = finished
            .into_iter()
            .map(|(_, p)| p)
            .filter(|p| seen.insert(p.clone()))
            .collect();
        info!("Downloaded {} of {} images", paths.len(), urls.len());
        Ok(paths)
    }
}

/// Fetches one image into `out_dir`, reusing a file already there. The body
/// goes to a per-job temp file that is renamed into place once complete.
async fn download_one(
    client: &reqwest::Client,
    out_dir: &Path,
    url: &str,
    subject: &str,
    job: usize,
) -> Option<PathBuf> {
    let Some(name) = image_file_name(url, subject) else {
        debug!("Skipping non-image URL: {}", url);
        return None;
    };
    let path = out_dir.join(&name);
    if tokio::fs::try_exists(&path).await.unwrap_or(false) {
        debug!("Image already exists: {}", path.display());
        return Some(path);
    }

    let bytes = match fetch(client, url).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Error requesting {}: {}", url, e);
            return None;
        }
    };
    let tmp = out_dir.join(format!(".{}.{}.part", name, job));
    let saved = match tokio::fs::write(&tmp, &bytes).await {
        Ok(()) => tokio::fs::rename(&tmp, &path).await,
        Err(e) => Err(e),
    };
    if let Err(e) = saved {
        warn!("Error saving image {}: {}", path.display(), e);
        let _ = tokio::fs::remove_file(&tmp).await;
        return None;
    }
    Some(path)
}

async fn fetch(client: &reqwest::Client, url: &str) -> reqwest::Result<Vec<u8>> {
    let bytes = client
        .get(url)
        .header(USER_AGENT, BROWSER_AGENT)
        .send()
        .await?
        .error_for_status()?
        .bytes()
        .await?;
    Ok(bytes.to_vec())
}
