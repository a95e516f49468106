//! Sync configuration.
//!
//! This module handles loading and saving the sync configuration to/from a
//! JSON file. Three credentials gate all network activity:
//! - doc_id: names the shared remote object (`{doc_id}.json.enc`)
//! - passphrase: seals/opens the encryption envelope (never sent anywhere)
//! - shared_secret: gates signed-URL issuance at the proxy

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SyncResult;
use crate::validation;

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_sign_ttl_ms() -> u64 {
    5_000
}

fn default_edit_idle_ms() -> u64 {
    8_000
}

/// Sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Document id shared across a user's devices
    #[serde(default)]
    pub doc_id: String,
    /// Envelope passphrase (client-side only)
    #[serde(default)]
    pub passphrase: String,
    /// Shared secret for the signing proxy
    #[serde(default)]
    pub shared_secret: String,
    /// Whether the background poll loop runs
    #[serde(default)]
    pub auto: bool,
    /// Base URL of the signing proxy ("" = same origin)
    #[serde(default)]
    pub base_url: String,
    /// Poll cadence for the background pull loop
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Reuse window for cached download descriptors
    #[serde(default = "default_sign_ttl_ms")]
    pub sign_ttl_ms: u64,
    /// Idle window after which an edit session auto-ends
    #[serde(default = "default_edit_idle_ms")]
    pub edit_idle_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            doc_id: String::new(),
            passphrase: String::new(),
            shared_secret: String::new(),
            auto: false,
            base_url: String::new(),
            poll_interval_ms: default_poll_interval_ms(),
            sign_ttl_ms: default_sign_ttl_ms(),
            edit_idle_ms: default_edit_idle_ms(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from a JSON file. A missing file yields defaults;
    /// an unreadable file is an error (better to surface than to silently
    /// sync against an empty doc_id).
    pub fn load(path: &Path) -> SyncResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &Path) -> SyncResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// All three credentials present. Network operations are no-ops until
    /// this holds.
    pub fn credentials_ready(&self) -> bool {
        !self.doc_id.is_empty() && !self.passphrase.is_empty() && !self.shared_secret.is_empty()
    }

    /// Validate the credential fields that name remote state.
    pub fn validate(&self) -> SyncResult<()> {
        validation::validate_doc_id(&self.doc_id)
    }

    /// Remote object key for this document.
    pub fn object_key(&self) -> String {
        format!("{}.json.enc", self.doc_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert!(!config.credentials_ready());
        assert!(!config.auto);
        assert_eq!(config.poll_interval_ms, 1_000);
        assert_eq!(config.sign_ttl_ms, 5_000);
        assert_eq!(config.edit_idle_ms, 8_000);
    }

    #[test]
    fn test_credentials_ready() {
        let mut config = SyncConfig::default();
        assert!(!config.credentials_ready());
        config.doc_id = "household-2024".to_string();
        config.passphrase = "correct horse".to_string();
        assert!(!config.credentials_ready());
        config.shared_secret = "proxy secret".to_string();
        assert!(config.credentials_ready());
    }

    #[test]
    fn test_object_key() {
        let config = SyncConfig {
            doc_id: "household-2024".to_string(),
            ..Default::default()
        };
        assert_eq!(config.object_key(), "household-2024.json.enc");
    }

    #[test]
    fn test_validate_rejects_bad_doc_id() {
        let config = SyncConfig {
            doc_id: "a b".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = SyncConfig::load(&dir.path().join("nope.json")).unwrap();
        assert!(!config.credentials_ready());
    }

    #[test]
    fn test_config_persistence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync.json");

        {
            let config = SyncConfig {
                doc_id: "household-2024".to_string(),
                passphrase: "pw".to_string(),
                shared_secret: "secret".to_string(),
                auto: true,
                ..Default::default()
            };
            config.save(&path).unwrap();
        }

        let config = SyncConfig::load(&path).unwrap();
        assert_eq!(config.doc_id, "household-2024");
        assert!(config.auto);
        assert!(config.credentials_ready());
    }

    #[test]
    fn test_partial_file_gets_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync.json");
        fs::write(&path, r#"{"doc_id":"household-2024"}"#).unwrap();
        let config = SyncConfig::load(&path).unwrap();
        assert_eq!(config.doc_id, "household-2024");
        assert_eq!(config.poll_interval_ms, 1_000);
    }
}
