//! Configuration loading (§10.4): JSON file + environment overrides, parsed
//! through a small CLI for the listen address, config path, and log filter.

use crate::object::{BucketType, Permission};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Filesystem,
    Database,
}

impl Default for StorageBackend {
    fn default() -> Self {
        StorageBackend::Memory
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserConfig {
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub permissions: Vec<BucketPermissionConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BucketPermissionConfig {
    pub bucket_pattern: String,
    pub permissions: Vec<Permission>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BucketDefaults {
    #[serde(default = "default_bucket_type")]
    pub bucket_type: BucketType,
    pub storage_class: Option<String>,
}

fn default_bucket_type() -> BucketType {
    BucketType::GeneralPurpose
}

impl Default for BucketDefaults {
    fn default() -> Self {
        BucketDefaults {
            bucket_type: default_bucket_type(),
            storage_class: None,
        }
    }
}

/// The §6 "Environment" configuration surface.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage_backend: StorageBackend,
    #[serde(default = "default_data_root")]
    pub filesystem_data_root: PathBuf,
    #[serde(default)]
    pub database_connection_string: Option<String>,
    #[serde(default)]
    pub auth_enabled: bool,
    #[serde(default)]
    pub users: Vec<UserConfig>,
    #[serde(default)]
    pub bucket_defaults: BucketDefaults,
    #[serde(default = "default_cache_size_bytes")]
    pub metadata_cache_size_bytes: usize,
}

fn default_data_root() -> PathBuf {
    PathBuf::from("./lamina-data")
}

fn default_cache_size_bytes() -> usize {
    16 * 1024 * 1024
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage_backend: StorageBackend::default(),
            filesystem_data_root: default_data_root(),
            database_connection_string: None,
            auth_enabled: false,
            users: Vec::new(),
            bucket_defaults: BucketDefaults::default(),
            metadata_cache_size_bytes: default_cache_size_bytes(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

impl Config {
    pub fn load(path: Option<&PathBuf>) -> Result<Config, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                serde_json::from_str(&text)?
            }
            None => Config::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(backend) = std::env::var("LAMINA_STORAGE_BACKEND") {
            self.storage_backend = match backend.to_lowercase().as_str() {
                "filesystem" => StorageBackend::Filesystem,
                "database" => StorageBackend::Database,
                _ => StorageBackend::Memory,
            };
        }
        if let Ok(root) = std::env::var("LAMINA_DATA_ROOT") {
            self.filesystem_data_root = PathBuf::from(root);
        }
        if let Ok(conn) = std::env::var("LAMINA_DATABASE_URL") {
            self.database_connection_string = Some(conn);
        }
        if let Ok(flag) = std::env::var("LAMINA_AUTH_ENABLED") {
            self.auth_enabled = flag == "1" || flag.eq_ignore_ascii_case("true");
        }
        if let Ok(size) = std::env::var("LAMINA_METADATA_CACHE_BYTES") {
            if let Ok(parsed) = size.parse() {
                self.metadata_cache_size_bytes = parsed;
            }
        }
    }

    pub fn user_table(&self) -> BTreeMap<String, crate::object::S3User> {
        self.users
            .iter()
            .map(|u| {
                (
                    u.access_key_id.clone(),
                    crate::object::S3User {
                        access_key_id: u.access_key_id.clone(),
                        secret_access_key: u.secret_access_key.clone(),
                        display_name: u.display_name.clone(),
                        permissions: u
                            .permissions
                            .iter()
                            .map(|p| crate::object::BucketPermission {
                                bucket_pattern: p.bucket_pattern.clone(),
                                permissions: p.permissions.clone(),
                            })
                            .collect(),
                    },
                )
            })
            .collect()
    }
}

#[derive(Parser, Debug)]
#[command(name = "laminad", about = "S3-API-compatible object storage server")]
pub struct Cli {
    /// Path to a JSON configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:9000")]
    pub listen: String,

    /// `tracing-subscriber` env-filter directive string.
    #[arg(long, default_value = "info")]
    pub log_filter: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_memory_backend() {
        let config = Config::default();
        assert_eq!(config.storage_backend, StorageBackend::Memory);
        assert!(!config.auth_enabled);
    }

    #[test]
    fn parses_minimal_json_document() {
        let json = r#"{"storage_backend": "filesystem", "filesystem_data_root": "/tmp/lamina"}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.storage_backend, StorageBackend::Filesystem);
        assert_eq!(config.filesystem_data_root, PathBuf::from("/tmp/lamina"));
    }
}
