use serde::Serialize;
use sqlx::SqlitePool;
use ts_rs::TS;

use crate::config::DatabaseConfig;
use crate::{store, AppResult};

/// Budget assumed for in-memory databases, which have no filesystem to ask.
pub const IN_MEMORY_ESTIMATE_BYTES: u64 = 50 * 1024 * 1024;

const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct StorageUsage {
    #[ts(type = "number")]
    pub used: u64,
    #[ts(type = "number")]
    pub available: u64,
    pub percentage: f64,
}

impl StorageUsage {
    pub fn new(used: u64, available: u64) -> Self {
        let percentage = if used == 0 {
            0.0
        } else if available == 0 {
            100.0
        } else {
            (used as f64 / available as f64 * 100.0).min(100.0)
        };
        Self {
            used,
            available,
            percentage,
        }
    }
}

pub async fn storage_usage(pool: &SqlitePool, config: &DatabaseConfig) -> AppResult<StorageUsage> {
    let used = store::used_bytes(pool).await?;
    let available = match (config.quota_bytes, &config.path) {
        (Some(quota), _) => quota,
        (None, Some(path)) => {
            let dir = path.parent().unwrap_or(path.as_path());
            match fs2::available_space(dir) {
                Ok(free) => free.saturating_add(used),
                Err(err) => {
                    tracing::debug!(
                        target: "cuisto",
                        event = "free_space_unavailable",
                        path = %dir.display(),
                        error = %err
                    );
                    IN_MEMORY_ESTIMATE_BYTES.max(used)
                }
            }
        }
        (None, None) => IN_MEMORY_ESTIMATE_BYTES.max(used),
    };
    Ok(StorageUsage::new(used, available))
}

/// Human-readable byte count: 1024 base, one decimal, `.0` dropped.
pub fn format_storage_size(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = (value * 10.0).round() / 10.0;
    if rounded.fract() == 0.0 {
        format!("{} {}", rounded as u64, UNITS[unit])
    } else {
        format!("{rounded:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_sizes() {
        assert_eq!(format_storage_size(0), "0 B");
        assert_eq!(format_storage_size(512), "512 B");
        assert_eq!(format_storage_size(1536), "1.5 KB");
        assert_eq!(format_storage_size(12 * 1024 * 1024), "12 MB");
        assert_eq!(format_storage_size(1_288_490_189), "1.2 GB");
        assert_eq!(format_storage_size(3 * 1024 * 1024 * 1024 * 1024), "3072 GB");
    }

    #[test]
    fn percentage_is_bounded() {
        assert_eq!(StorageUsage::new(50, 200).percentage, 25.0);
        assert_eq!(StorageUsage::new(500, 200).percentage, 100.0);
        assert_eq!(StorageUsage::new(0, 0).percentage, 0.0);
        assert_eq!(StorageUsage::new(1, 0).percentage, 100.0);
    }
}
