pub mod ads;
pub mod client;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod identity;
pub mod player;
pub mod vault;

pub use error::{AgentError, Result};

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

/// Root of the agent's on-disk state (`~/.mnemocast` in production).
///
/// Every component takes a `StorageRoot` instead of reaching for `$HOME`
/// itself, so tests can point the whole agent at a temporary directory.
#[derive(Debug, Clone)]
pub struct StorageRoot(PathBuf);

impl StorageRoot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// Resolve the default root under the user's home directory.
    pub fn from_home() -> Result<Self> {
        let dirs = directories::BaseDirs::new()
            .ok_or_else(|| AgentError::Startup("home directory not obtainable".into()))?;
        Ok(Self(dirs.home_dir().join(".mnemocast")))
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    pub fn join(&self, name: impl AsRef<Path>) -> PathBuf {
        self.0.join(name)
    }
}

/// One unit of content scheduled for this screen.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ad {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Type tag: `image`, `video`, `html`, `text`, or a media-extension alias.
    #[serde(rename = "type")]
    pub kind: String,
    /// Remote `http(s)://` URL, or `file://` path for local injection.
    pub content_url: String,
    /// Display duration in seconds; the scheduler clamps and defaults this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Higher priority ads are selected first; absent means 0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl Ad {
    pub fn priority_or_default(&self) -> i32 {
        self.priority.unwrap_or(0)
    }
}

/// The server's ordered list of ads currently authorized for this screen.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdManifest {
    #[serde(default)]
    pub ads: Vec<Ad>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playlist_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl AdManifest {
    /// Manifest synthesized for a `204 No Content` delivery response.
    pub fn empty(updated_at: DateTime<Utc>) -> Self {
        Self {
            ads: Vec::new(),
            playlist_id: None,
            updated_at,
        }
    }

    pub fn ad_ids(&self) -> std::collections::HashSet<String> {
        self.ads.iter().map(|ad| ad.id.clone()).collect()
    }
}

/// Server-assigned descriptor of this device. Created on first successful
/// authentication and rewritten on every subsequent one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenIdentity {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default)]
    pub is_audible: bool,
    #[serde(default)]
    pub is_online: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default = "default_classification")]
    pub classification: i32,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_classification() -> i32 {
    1
}

impl ScreenIdentity {
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(AgentError::InvalidIdentity("missing screen id".into()));
        }
        if self.name.is_empty() {
            return Err(AgentError::InvalidIdentity("missing screen name".into()));
        }
        Ok(())
    }

    /// Human-readable location summary for status output.
    pub fn location_summary(&self) -> Option<String> {
        let parts: Vec<&str> = [&self.country, &self.city, &self.area]
            .into_iter()
            .filter_map(|p| p.as_deref())
            .filter(|p| !p.is_empty() && *p != "Unknown")
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    }
}

/// The `(screen-id, passkey)` pair assigned by the server. The passkey never
/// appears in logs; serialization exists only so the vault can persist the
/// record encrypted.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub screen_id: String,
    pub passkey: SecretString,
}

impl Credentials {
    pub fn new(screen_id: impl Into<String>, passkey: impl Into<String>) -> Self {
        Self {
            screen_id: screen_id.into(),
            passkey: SecretString::new(passkey.into()),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.screen_id.is_empty() && !self.passkey.expose_secret().is_empty()
    }

    /// First-4/last-4 masking for display; short passkeys stay fully hidden.
    pub fn masked_passkey(&self) -> String {
        let passkey = self.passkey.expose_secret();
        if passkey.len() > 8 {
            format!("{}...{}", &passkey[..4], &passkey[passkey.len() - 4..])
        } else {
            "[hidden]".to_string()
        }
    }
}

impl Serialize for Credentials {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut record = serializer.serialize_struct("Credentials", 2)?;
        record.serialize_field("screenId", &self.screen_id)?;
        record.serialize_field("passkey", self.passkey.expose_secret())?;
        record.end()
    }
}

pub const DEFAULT_SERVER_URL: &str = "http://10.42.0.1:8080";
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_AD_FETCH_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 5;

/// Runtime tuning knobs, persisted as `config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeConfig {
    pub ad_server_url: String,
    /// Seconds between heartbeats.
    pub heartbeat_interval: u64,
    /// Seconds between manifest fetches.
    pub ad_fetch_interval: u64,
    pub retry_attempts: u32,
    /// Base seconds between retries; backoff is linear in the attempt number.
    pub retry_delay: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            ad_server_url: DEFAULT_SERVER_URL.to_string(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            ad_fetch_interval: DEFAULT_AD_FETCH_INTERVAL_SECS,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY_SECS,
        }
    }
}

impl RuntimeConfig {
    pub fn heartbeat_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.heartbeat_interval)
    }

    pub fn ad_fetch_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.ad_fetch_interval)
    }

    pub fn retry_policy(&self) -> client::RetryPolicy {
        client::RetryPolicy {
            attempts: self.retry_attempts,
            base_delay: std::time::Duration::from_secs(self.retry_delay),
        }
    }
}

/// Write `data` to a sibling temporary file and rename it into place, so a
/// concurrent reader never observes a truncated record.
pub(crate) fn write_atomic(path: &Path, data: &[u8], mode: u32) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    set_permissions(&tmp, mode)?;
    std::fs::rename(&tmp, path)
}

#[cfg(unix)]
pub(crate) fn set_permissions(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
pub(crate) fn set_permissions(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ad_json_uses_server_field_names() {
        let ad = Ad {
            id: "ad-1".into(),
            title: Some("Lobby banner".into()),
            kind: "image".into(),
            content_url: "http://cdn/x.jpg".into(),
            duration: Some(10),
            start_time: None,
            end_time: None,
            priority: Some(2),
            metadata: None,
        };

        let json = serde_json::to_value(&ad).expect("serialize ad");
        assert_eq!(json["type"], "image");
        assert_eq!(json["contentUrl"], "http://cdn/x.jpg");
        assert_eq!(json["priority"], 2);
        assert!(json.get("startTime").is_none());
    }

    #[test]
    fn manifest_roundtrip_preserves_order() {
        let manifest = AdManifest {
            ads: vec![
                Ad {
                    id: "b".into(),
                    title: None,
                    kind: "video".into(),
                    content_url: "http://cdn/b.mp4".into(),
                    duration: None,
                    start_time: None,
                    end_time: None,
                    priority: None,
                    metadata: None,
                },
                Ad {
                    id: "a".into(),
                    title: None,
                    kind: "image".into(),
                    content_url: "http://cdn/a.jpg".into(),
                    duration: Some(15),
                    start_time: None,
                    end_time: None,
                    priority: Some(1),
                    metadata: None,
                },
            ],
            playlist_id: Some("pl-1".into()),
            updated_at: Utc::now(),
        };

        let json = serde_json::to_string(&manifest).expect("serialize");
        let parsed: AdManifest = serde_json::from_str(&json).expect("parse");
        let ids: Vec<_> = parsed.ads.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(parsed.playlist_id.as_deref(), Some("pl-1"));
    }

    #[test]
    fn passkey_is_masked_for_display() {
        let creds = Credentials::new("scr-1", "pk-1234567890");
        assert_eq!(creds.masked_passkey(), "pk-1...7890");

        let short = Credentials::new("scr-1", "tiny");
        assert_eq!(short.masked_passkey(), "[hidden]");
    }

    #[test]
    fn passkey_never_appears_in_debug_output() {
        let creds = Credentials::new("scr-1", "super-secret-passkey");
        let debug = format!("{creds:?}");
        assert!(!debug.contains("super-secret-passkey"));
    }

    #[test]
    fn config_defaults_match_documented_values() {
        let config = RuntimeConfig::default();
        assert_eq!(config.heartbeat_interval, 30);
        assert_eq!(config.ad_fetch_interval, 60);
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.retry_delay, 5);
    }
}
