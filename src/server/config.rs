//! Server configuration: environment plus a YAML key file.
//!
//! Environment variables:
//! - `FITSYNC_PORT`: port to listen on (default: 8080)
//! - `FITSYNC_DATA_DIR`: directory for the document database
//!   (default: platform data dir + `fitsync-server`)
//! - `FITSYNC_SERVER_CONFIG`: path to the YAML file
//!   (default: platform config dir + `fitsync-server/config.yaml`)
//!
//! Config file format:
//!
//! ```yaml
//! api_keys:
//!   - key: "your-secret-key-here"
//!     user_id: "user1"
//! shared_collections:
//!   - exercises
//!   - templates
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::sync::registry::{StorageLayout, DEFAULT_TABLES};

/// API key entry in config
#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeyEntry {
    pub key: String,
    pub user_id: String,
}

/// Config file structure
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfigFile {
    #[serde(default)]
    pub api_keys: Vec<ApiKeyEntry>,
    /// Top-level collections any authenticated user may read and write.
    #[serde(default = "default_shared_collections")]
    pub shared_collections: Vec<String>,
}

impl Default for ServerConfigFile {
    fn default() -> Self {
        Self {
            api_keys: Vec::new(),
            shared_collections: default_shared_collections(),
        }
    }
}

/// The shared halves of the default bifurcated tables.
pub fn default_shared_collections() -> Vec<String> {
    DEFAULT_TABLES
        .iter()
        .filter_map(|t| match t.layout {
            StorageLayout::Bifurcated { shared, .. } => Some(shared.to_string()),
            _ => None,
        })
        .collect()
}

impl ServerConfigFile {
    /// Loads the file, falling back to an empty key list when it is missing
    /// or malformed.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_yaml::from_str::<ServerConfigFile>(&contents) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {}", path.display(), e);
                tracing::warn!("No API keys loaded - all authenticated requests will fail");
                Self::default()
            }
        }
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,
    /// Directory holding the document database
    pub data_dir: PathBuf,
    /// Path to config file
    pub config_path: PathBuf,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let port = std::env::var("FITSYNC_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let data_dir = std::env::var("FITSYNC_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("fitsync-server")
            });

        let config_path = std::env::var("FITSYNC_SERVER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("fitsync-server")
                    .join("config.yaml")
            });

        Self {
            port,
            data_dir,
            config_path,
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("documents.db")
    }
}

/// Authenticated user info, added to request extensions after auth
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub user_id: String,
}

/// API key store - maps key -> AuthUser
#[derive(Debug, Clone, Default)]
pub struct ApiKeyStore {
    keys: HashMap<String, AuthUser>,
}

impl ApiKeyStore {
    pub fn from_entries(entries: Vec<ApiKeyEntry>) -> Self {
        let keys: HashMap<String, AuthUser> = entries
            .into_iter()
            .map(|entry| {
                (
                    entry.key,
                    AuthUser {
                        user_id: entry.user_id,
                    },
                )
            })
            .collect();
        tracing::info!("Loaded {} API key(s)", keys.len());
        Self { keys }
    }

    /// Validate an API key and return the associated user
    pub fn validate(&self, key: &str) -> Option<AuthUser> {
        self.keys.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
