use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::quota::QuotaPolicy;

pub const DB_FILE_NAME: &str = "cuisto.sqlite3";
const APP_DIR_NAME: &str = "cuisto";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database: DatabaseConfig,
    pub images: ImageConfig,
    pub quota: QuotaPolicy,
}

impl StorageConfig {
    /// Private in-memory database; nothing touches the filesystem.
    pub fn in_memory() -> Self {
        Self {
            database: DatabaseConfig::in_memory(),
            ..Self::default()
        }
    }

    pub fn at_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            database: DatabaseConfig::at_path(dir.as_ref().join(DB_FILE_NAME)),
            ..Self::default()
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read storage config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parse storage config {}", path.display()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `None` selects a private in-memory database.
    pub path: Option<PathBuf>,
    /// Byte budget for stored recipe payloads; `None` means unbounded.
    pub quota_bytes: Option<u64>,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            ..Self::default()
        }
    }

    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn with_quota_bytes(mut self, quota: u64) -> Self {
        self.quota_bytes = Some(quota);
        self
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: Some(default_db_path()),
            quota_bytes: None,
            max_connections: 4,
        }
    }
}

/// `<data dir>/cuisto/cuisto.sqlite3`, or under the temp dir when the
/// platform has no data dir.
pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
        .join(DB_FILE_NAME)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub primary_quality: u8,
    /// Optional cap on the longest edge of the stored primary image.
    pub primary_max_edge: Option<u32>,
    pub illustration_quality: u8,
    pub thumbnail_quality: u8,
    pub thumbnail_max_edge: u32,
    pub decode_timeout_ms: u64,
}

impl ImageConfig {
    pub fn decode_timeout(&self) -> Duration {
        Duration::from_millis(self.decode_timeout_ms)
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            primary_quality: 85,
            primary_max_edge: None,
            illustration_quality: 80,
            thumbnail_quality: 70,
            thumbnail_max_edge: 200,
            decode_timeout_ms: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_documented_tiers() {
        let config = StorageConfig::default();
        assert_eq!(config.images.primary_quality, 85);
        assert_eq!(config.images.illustration_quality, 80);
        assert_eq!(config.images.thumbnail_quality, 70);
        assert_eq!(config.images.thumbnail_max_edge, 200);
        assert!(config.database.quota_bytes.is_none());
        assert!(config
            .database
            .path
            .as_deref()
            .is_some_and(|p| p.ends_with(DB_FILE_NAME)));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("storage.json");
        std::fs::write(
            &path,
            r#"{"database": {"path": null, "quota_bytes": 1048576}, "quota": {"truncate_to": 2}}"#,
        )
        .expect("write config");

        let config = StorageConfig::from_json_file(&path).expect("load config");
        assert!(config.database.path.is_none());
        assert_eq!(config.database.quota_bytes, Some(1_048_576));
        assert_eq!(config.database.max_connections, 4);
        assert_eq!(config.quota.truncate_to, 2);
        assert_eq!(config.quota.keep_full_newest, 3);
        assert_eq!(config.images.thumbnail_max_edge, 200);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let dir = tempdir().expect("tempdir");
        let err = StorageConfig::from_json_file(dir.path().join("absent.json"))
            .expect_err("missing file");
        assert!(err.to_string().contains("read storage config"));
    }
}
