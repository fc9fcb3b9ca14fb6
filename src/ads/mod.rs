//! On-disk layout for the ad manifest and per-ad media directories.
//!
//! ```text
//! <root>/ads/
//!   current_ads.json         manifest wrapper, owner-only
//!   media/<ad-id>/<file>     downloaded media, world-readable
//! ```

pub mod fetcher;

pub use fetcher::{AdFetcher, FetchSnapshot};

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Ad, AdManifest, Result, StorageRoot};

const MANIFEST_FILE: &str = "current_ads.json";

/// The manifest as persisted: the server record plus a local fetch stamp
/// and the ad count.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredManifest {
    pub fetched_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playlist_id: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub ads: Vec<Ad>,
    pub ads_count: usize,
}

impl From<StoredManifest> for AdManifest {
    fn from(stored: StoredManifest) -> Self {
        AdManifest {
            ads: stored.ads,
            playlist_id: stored.playlist_id,
            updated_at: stored.updated_at,
        }
    }
}

pub struct AdStorage {
    ads_dir: PathBuf,
    manifest_file: PathBuf,
    media_dir: PathBuf,
}

impl AdStorage {
    pub fn new(root: &StorageRoot) -> Self {
        let ads_dir = root.join("ads");
        Self {
            manifest_file: ads_dir.join(MANIFEST_FILE),
            media_dir: ads_dir.join("media"),
            ads_dir,
        }
    }

    /// Persist the manifest durably; a concurrent reader never sees a
    /// truncated file because the write goes through a sibling temp name.
    pub fn save_manifest(&self, manifest: &AdManifest) -> Result<()> {
        std::fs::create_dir_all(&self.ads_dir)?;
        crate::set_permissions(&self.ads_dir, 0o755)?;
        std::fs::create_dir_all(&self.media_dir)?;
        crate::set_permissions(&self.media_dir, 0o755)?;

        let stored = StoredManifest {
            fetched_at: Utc::now(),
            playlist_id: manifest.playlist_id.clone(),
            updated_at: manifest.updated_at,
            ads_count: manifest.ads.len(),
            ads: manifest.ads.clone(),
        };
        let data = serde_json::to_vec_pretty(&stored)?;
        crate::write_atomic(&self.manifest_file, &data, 0o600)?;
        Ok(())
    }

    pub fn load_manifest(&self) -> Result<AdManifest> {
        let data = std::fs::read_to_string(&self.manifest_file)?;
        let stored: StoredManifest = serde_json::from_str(&data)?;
        Ok(stored.into())
    }

    pub fn exists(&self) -> bool {
        self.manifest_file.exists()
    }

    pub fn ads_dir(&self) -> &Path {
        &self.ads_dir
    }

    pub fn media_dir(&self) -> &Path {
        &self.media_dir
    }

    /// Path of a media file inside an ad's own directory.
    pub fn ad_media_path(&self, ad_id: &str, file_name: &str) -> PathBuf {
        self.media_dir.join(ad_id).join(file_name)
    }

    pub fn ensure_ad_media_dir(&self, ad_id: &str) -> Result<PathBuf> {
        let dir = self.media_dir.join(ad_id);
        std::fs::create_dir_all(&dir)?;
        crate::set_permissions(&dir, 0o755)?;
        Ok(dir)
    }
}
