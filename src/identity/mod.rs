//! Persistence of the server-assigned screen identity.
//!
//! The identity is created from the server's `connect` response and
//! rewritten on every successful authentication. Records written under the
//! earlier layout (a nested `location` object) are migrated to the flat
//! layout on load.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;

use crate::{AgentError, Result, ScreenIdentity, StorageRoot};

const IDENTITY_FILE: &str = "identity.json";

/// Layout used by early builds: location fields nested under `location`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyIdentity {
    id: String,
    name: String,
    location: LegacyLocation,
    #[serde(default)]
    classification: Option<i32>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyLocation {
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    area: Option<String>,
    #[serde(default)]
    venue_type: Option<String>,
}

pub struct IdentityStore {
    root: PathBuf,
    identity_file: PathBuf,
}

impl IdentityStore {
    pub fn new(root: &StorageRoot) -> Self {
        Self {
            root: root.path().to_path_buf(),
            identity_file: root.join(IDENTITY_FILE),
        }
    }

    /// Load the stored identity, migrating legacy records in place.
    pub fn load(&self) -> Result<ScreenIdentity> {
        let data = match std::fs::read_to_string(&self.identity_file) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AgentError::InvalidIdentity("identity file not found".into()));
            }
            Err(e) => return Err(e.into()),
        };

        if let Ok(legacy) = serde_json::from_str::<LegacyIdentity>(&data) {
            let migrated = self.migrate_legacy(legacy)?;
            migrated.validate()?;
            return Ok(migrated);
        }

        let identity: ScreenIdentity = serde_json::from_str(&data)?;
        identity.validate()?;
        Ok(identity)
    }

    pub fn save(&self, identity: &ScreenIdentity) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        crate::set_permissions(&self.root, 0o755)?;
        let data = serde_json::to_vec_pretty(identity)?;
        crate::write_atomic(&self.identity_file, &data, 0o600)?;
        Ok(())
    }

    pub fn exists(&self) -> bool {
        self.identity_file.exists()
    }

    /// Merge a fresh server record over the stored identity, creating it
    /// when absent, and stamp the update time.
    pub fn update_from_server(&self, screen: &ScreenIdentity) -> Result<ScreenIdentity> {
        let mut identity = screen.clone();
        if let Ok(existing) = self.load() {
            identity.created_at = existing.created_at;
            if identity.last_seen.is_none() {
                identity.last_seen = existing.last_seen;
            }
        }
        identity.updated_at = Utc::now();
        self.save(&identity)?;
        Ok(identity)
    }

    /// Stamp `lastSeen` after a successful heartbeat. A missing identity is
    /// not an error; the record appears after the first `connect`.
    pub fn touch_last_seen(&self) -> Result<()> {
        let mut identity = match self.load() {
            Ok(identity) => identity,
            Err(AgentError::InvalidIdentity(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        identity.last_seen = Some(Utc::now());
        identity.updated_at = Utc::now();
        self.save(&identity)
    }

    fn migrate_legacy(&self, legacy: LegacyIdentity) -> Result<ScreenIdentity> {
        let now = Utc::now();
        let identity = ScreenIdentity {
            id: legacy.id,
            name: legacy.name,
            country: Some("Unknown".into()),
            city: legacy.location.city,
            area: legacy.location.area,
            venue_type: legacy.location.venue_type,
            timezone: Some("UTC".into()),
            width: Some(1920),
            height: Some(1080),
            is_audible: false,
            is_online: false,
            last_seen: legacy.last_seen,
            classification: legacy.classification.unwrap_or(1),
            created_at: legacy.created_at.unwrap_or(now),
            updated_at: now,
        };
        self.save(&identity)?;
        info!(id = %identity.id, "migrated identity record to flat layout");
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_identity() -> ScreenIdentity {
        ScreenIdentity {
            id: "scr-1".into(),
            name: "Lobby".into(),
            country: Some("India".into()),
            city: Some("Chennai".into()),
            area: Some("Airport".into()),
            venue_type: Some("airport".into()),
            timezone: Some("Asia/Kolkata".into()),
            width: Some(1920),
            height: Some(1080),
            is_audible: false,
            is_online: true,
            last_seen: None,
            classification: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn save_then_load_roundtrip() {
        let dir = tempdir().expect("tempdir");
        let store = IdentityStore::new(&StorageRoot::new(dir.path()));

        store.save(&sample_identity()).expect("save");
        let loaded = store.load().expect("load");

        assert_eq!(loaded.id, "scr-1");
        assert_eq!(loaded.name, "Lobby");
        assert_eq!(loaded.city.as_deref(), Some("Chennai"));
    }

    #[test]
    fn load_missing_file_reports_invalid_identity() {
        let dir = tempdir().expect("tempdir");
        let store = IdentityStore::new(&StorageRoot::new(dir.path()));
        assert!(matches!(
            store.load(),
            Err(AgentError::InvalidIdentity(_))
        ));
    }

    #[test]
    fn legacy_record_is_migrated_and_rewritten() {
        let dir = tempdir().expect("tempdir");
        let store = IdentityStore::new(&StorageRoot::new(dir.path()));

        let legacy = serde_json::json!({
            "id": "scr-old",
            "name": "Old Screen",
            "location": {
                "city": "Chennai",
                "area": "T Nagar",
                "venueType": "mall"
            },
            "classification": 2,
            "createdAt": "2023-01-01T00:00:00Z"
        });
        std::fs::write(
            dir.path().join(IDENTITY_FILE),
            serde_json::to_vec(&legacy).expect("encode"),
        )
        .expect("write legacy");

        let migrated = store.load().expect("load migrates");
        assert_eq!(migrated.city.as_deref(), Some("Chennai"));
        assert_eq!(migrated.venue_type.as_deref(), Some("mall"));
        assert_eq!(migrated.timezone.as_deref(), Some("UTC"));
        assert_eq!(migrated.width, Some(1920));
        assert_eq!(migrated.height, Some(1080));
        assert_eq!(migrated.classification, 2);

        // The rewritten file must parse as the flat layout.
        let raw = std::fs::read_to_string(dir.path().join(IDENTITY_FILE)).expect("read");
        let reparsed: ScreenIdentity = serde_json::from_str(&raw).expect("flat layout");
        assert_eq!(reparsed.id, "scr-old");
    }

    #[test]
    fn update_from_server_preserves_created_at() {
        let dir = tempdir().expect("tempdir");
        let store = IdentityStore::new(&StorageRoot::new(dir.path()));

        let mut first = sample_identity();
        first.created_at = "2022-06-01T00:00:00Z".parse().expect("timestamp");
        store.save(&first).expect("save");

        let mut from_server = sample_identity();
        from_server.name = "Lobby East".into();
        from_server.created_at = Utc::now();
        let updated = store.update_from_server(&from_server).expect("update");

        assert_eq!(updated.name, "Lobby East");
        assert_eq!(updated.created_at, first.created_at);
    }

    #[test]
    fn touch_last_seen_sets_timestamp() {
        let dir = tempdir().expect("tempdir");
        let store = IdentityStore::new(&StorageRoot::new(dir.path()));

        store.save(&sample_identity()).expect("save");
        store.touch_last_seen().expect("touch");

        let loaded = store.load().expect("load");
        assert!(loaded.last_seen.is_some());
    }

    #[test]
    fn touch_last_seen_without_identity_is_noop() {
        let dir = tempdir().expect("tempdir");
        let store = IdentityStore::new(&StorageRoot::new(dir.path()));
        store.touch_last_seen().expect("no identity yet");
        assert!(!store.exists());
    }
}
