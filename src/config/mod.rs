//! Runtime configuration persistence.
//!
//! `config.json` carries the tuning knobs; zero-valued fields on load are
//! replaced by their defaults and the file is rewritten so operators see
//! the effective values.

use std::path::PathBuf;

use tracing::warn;

use crate::{Result, RuntimeConfig, StorageRoot};

const CONFIG_FILE: &str = "config.json";

pub struct ConfigStore {
    root: PathBuf,
    config_file: PathBuf,
}

impl ConfigStore {
    pub fn new(root: &StorageRoot) -> Self {
        Self {
            root: root.path().to_path_buf(),
            config_file: root.join(CONFIG_FILE),
        }
    }

    /// Load the configuration, creating the default file when absent.
    pub fn load(&self) -> Result<RuntimeConfig> {
        let data = match std::fs::read_to_string(&self.config_file) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = RuntimeConfig::default();
                self.save(&config)?;
                return Ok(config);
            }
            Err(e) => return Err(e.into()),
        };

        let mut config: RuntimeConfig = serde_json::from_str(&data)?;
        if self.apply_defaults(&mut config) {
            if let Err(e) = self.save(&config) {
                warn!(error = %e, "failed to rewrite config with defaults");
            }
        }
        Ok(config)
    }

    pub fn save(&self, config: &RuntimeConfig) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        crate::set_permissions(&self.root, 0o755)?;
        let data = serde_json::to_vec_pretty(config)?;
        crate::write_atomic(&self.config_file, &data, 0o600)?;
        Ok(())
    }

    /// Replace zero-valued knobs with defaults; returns whether anything
    /// changed and the file needs rewriting.
    fn apply_defaults(&self, config: &mut RuntimeConfig) -> bool {
        let defaults = RuntimeConfig::default();
        let mut changed = false;

        if config.ad_server_url.is_empty() {
            config.ad_server_url = defaults.ad_server_url;
            changed = true;
        }
        if config.heartbeat_interval == 0 {
            config.heartbeat_interval = defaults.heartbeat_interval;
            changed = true;
        }
        if config.ad_fetch_interval == 0 {
            config.ad_fetch_interval = defaults.ad_fetch_interval;
            changed = true;
        }
        if config.retry_attempts == 0 {
            config.retry_attempts = defaults.retry_attempts;
            changed = true;
        }
        if config.retry_delay == 0 {
            config.retry_delay = defaults.retry_delay;
            changed = true;
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_default_config_when_missing() {
        let dir = tempdir().expect("tempdir");
        let store = ConfigStore::new(&StorageRoot::new(dir.path()));

        let config = store.load().expect("load creates default");
        assert_eq!(config.heartbeat_interval, 30);
        assert!(dir.path().join(CONFIG_FILE).exists());
    }

    #[test]
    fn zero_fields_replaced_and_file_rewritten() {
        let dir = tempdir().expect("tempdir");
        let store = ConfigStore::new(&StorageRoot::new(dir.path()));

        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"adServerUrl":"http://ads.example:8080","heartbeatInterval":0,"adFetchInterval":0,"retryAttempts":0,"retryDelay":0}"#,
        )
        .expect("write sparse config");

        let config = store.load().expect("load");
        assert_eq!(config.ad_server_url, "http://ads.example:8080");
        assert_eq!(config.heartbeat_interval, 30);
        assert_eq!(config.ad_fetch_interval, 60);
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.retry_delay, 5);

        // Rewritten file carries the effective values.
        let raw = std::fs::read_to_string(dir.path().join(CONFIG_FILE)).expect("read");
        let reparsed: RuntimeConfig = serde_json::from_str(&raw).expect("parse");
        assert_eq!(reparsed.heartbeat_interval, 30);
    }

    #[test]
    fn custom_values_survive_roundtrip() {
        let dir = tempdir().expect("tempdir");
        let store = ConfigStore::new(&StorageRoot::new(dir.path()));

        let mut config = RuntimeConfig::default();
        config.heartbeat_interval = 15;
        config.retry_attempts = 6;
        store.save(&config).expect("save");

        let loaded = store.load().expect("load");
        assert_eq!(loaded.heartbeat_interval, 15);
        assert_eq!(loaded.retry_attempts, 6);
    }

    #[test]
    fn malformed_config_is_a_parse_error() {
        let dir = tempdir().expect("tempdir");
        let store = ConfigStore::new(&StorageRoot::new(dir.path()));

        std::fs::write(dir.path().join(CONFIG_FILE), "{ not json").expect("write");
        assert!(store.load().is_err());
    }
}
