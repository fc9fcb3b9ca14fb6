//! Media materialization: fetch-to-disk with caching and cleanup.
//!
//! Given an ad, yields a local path whose file exists and is non-empty, or
//! fails. `file://` URLs bypass the cache entirely (local test injection).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::ads::AdStorage;
use crate::client::RetryPolicy;
use crate::{Ad, AgentError, Result};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("mnemocast-agent/", env!("CARGO_PKG_VERSION"));

pub struct Downloader {
    storage: std::sync::Arc<AdStorage>,
    http: reqwest::Client,
    policy: RetryPolicy,
}

impl Downloader {
    pub fn new(storage: std::sync::Arc<AdStorage>, policy: RetryPolicy) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            storage,
            http,
            policy,
        })
    }

    /// Resolve an ad to a local media path, downloading when necessary.
    pub async fn ensure_local(&self, ad: &Ad) -> Result<PathBuf> {
        // Local injection path: no cache involved.
        if let Some(local) = ad.content_url.strip_prefix("file://") {
            let path = PathBuf::from(local);
            if path.is_file() {
                debug!(ad = %ad.id, path = %path.display(), "using injected local file");
                return Ok(path);
            }
            return Err(AgentError::LocalMissing(path));
        }

        let target = self.target_path(ad);
        if is_valid_cache_entry(&target) {
            debug!(ad = %ad.id, path = %target.display(), "media cache hit");
            return Ok(target);
        }

        self.storage.ensure_ad_media_dir(&ad.id)?;

        let mut last_err: Option<AgentError> = None;
        for attempt in 0..=self.policy.attempts {
            if attempt > 0 {
                let delay = self.policy.backoff(attempt);
                debug!(ad = %ad.id, attempt, ?delay, "retrying media download");
                tokio::time::sleep(delay).await;
            }

            match self.fetch_to_disk(&ad.content_url, &target).await {
                Ok(bytes) => {
                    info!(ad = %ad.id, bytes, path = %target.display(), "media downloaded");
                    return Ok(target);
                }
                Err(e) => {
                    warn!(ad = %ad.id, attempt = attempt + 1, error = %e, "download attempt failed");
                    last_err = Some(e);
                }
            }
        }

        Err(AgentError::Download {
            ad_id: ad.id.clone(),
            reason: last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".into()),
        })
    }

    /// A previously cached path for the ad, if present and non-empty.
    pub fn cached_path(&self, ad: &Ad) -> Option<PathBuf> {
        let target = self.target_path(ad);
        is_valid_cache_entry(&target).then_some(target)
    }

    pub fn is_cached(&self, ad: &Ad) -> bool {
        self.cached_path(ad).is_some()
    }

    fn target_path(&self, ad: &Ad) -> PathBuf {
        let ext = file_extension(&ad.content_url, &ad.kind);
        self.storage
            .ad_media_path(&ad.id, &format!("{}{}", ad.id, ext))
    }

    /// Stream one GET response to the target path. Non-200 statuses and
    /// empty bodies count as attempt failures.
    async fn fetch_to_disk(&self, url: &str, target: &Path) -> Result<u64> {
        let mut response = self.http.get(url).send().await?;
        if response.status() != reqwest::StatusCode::OK {
            return Err(AgentError::Server {
                status: response.status().as_u16(),
                body: String::new(),
            });
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::File::create(target).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);
        crate::set_permissions(target, 0o644)?;

        if written == 0 {
            let _ = tokio::fs::remove_file(target).await;
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "zero-length download",
            )
            .into());
        }
        Ok(written)
    }

    /// Delete media directories for ads no longer authorized. Returns how
    /// many directories were removed.
    pub async fn cleanup_old_media(&self, current_ids: &HashSet<String>) -> Result<usize> {
        let media_dir = self.storage.media_dir().to_path_buf();
        let mut entries = match tokio::fs::read_dir(&media_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if current_ids.contains(&name) {
                continue;
            }
            match tokio::fs::remove_dir_all(entry.path()).await {
                Ok(()) => {
                    removed += 1;
                    info!(ad = %name, "removed stale media directory");
                }
                Err(e) => warn!(ad = %name, error = %e, "failed to remove stale media"),
            }
        }
        Ok(removed)
    }
}

/// A cache entry is valid iff the file exists with non-zero size.
fn is_valid_cache_entry(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
}

/// Extension from the URL path suffix (query stripped), else from the type
/// tag via a fixed table.
fn file_extension(url: &str, kind: &str) -> String {
    let base = url.split(['?', '#']).next().unwrap_or(url);
    if let Some(ext) = Path::new(base).extension().and_then(|e| e.to_str()) {
        if !ext.is_empty() && !ext.contains('/') {
            return format!(".{ext}");
        }
    }

    match kind.to_ascii_lowercase().as_str() {
        "image" => ".jpg".into(),
        "video" => ".mp4".into(),
        "html" => ".html".into(),
        "text" => ".txt".into(),
        _ => ".bin".into(),
    }
}
