use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use crate::db::Database;
use crate::legacy::{LegacyStore, LEGACY_API_KEY};
use crate::time::now_ms;
use crate::{store, AppResult};

/// Settings key holding the API credential.
pub const API_KEY_SETTING: &str = "apiKey";

/// Synchronous view of the credential, kept in step with every
/// successful write.
#[derive(Debug, Default)]
pub struct CredentialCache {
    value: RwLock<Option<String>>,
}

impl CredentialCache {
    pub fn get(&self) -> Option<String> {
        self.value.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Swap in `next`, returning what was cached before.
    fn replace(&self, next: Option<String>) -> Option<String> {
        let mut guard = self.value.write().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *guard, next)
    }
}

#[derive(Clone)]
pub struct SettingsRepository {
    db: Database,
    cache: Arc<CredentialCache>,
    legacy: Arc<dyn LegacyStore>,
}

impl SettingsRepository {
    pub fn new(db: Database, legacy: Arc<dyn LegacyStore>) -> Self {
        Self {
            db,
            cache: Arc::new(CredentialCache::default()),
            legacy,
        }
    }

    /// Store the credential. The cache reflects the new value before the
    /// durable write is awaited and is rolled back if that write fails.
    pub async fn set(&self, value: &str) -> AppResult<()> {
        let previous = self.cache.replace(Some(value.to_string()));
        if let Err(err) = self.write(Some(value)).await {
            self.cache.replace(previous);
            warn!(target: "cuisto", event = "settings_write_failed", op = "set", error = %err);
            return Err(err);
        }
        self.mirror(Some(value));
        info!(target: "cuisto", event = "credential_set");
        Ok(())
    }

    pub async fn unset(&self) -> AppResult<()> {
        let previous = self.cache.replace(None);
        if let Err(err) = self.write(None).await {
            self.cache.replace(previous);
            warn!(target: "cuisto", event = "settings_write_failed", op = "unset", error = %err);
            return Err(err);
        }
        self.mirror(None);
        info!(target: "cuisto", event = "credential_unset");
        Ok(())
    }

    /// Durable read from the settings table.
    pub async fn get(&self) -> AppResult<Option<String>> {
        let pool = self.db.open().await?;
        store::get_setting(&pool, API_KEY_SETTING).await
    }

    pub fn get_cached(&self) -> Option<String> {
        self.cache.get()
    }

    pub fn is_configured(&self) -> bool {
        self.get_cached()
            .is_some_and(|value| !value.trim().is_empty())
    }

    /// Load the cache from the settings table, falling back to the legacy
    /// copy when the table has no value yet.
    pub async fn prime(&self) -> AppResult<Option<String>> {
        let value = match self.get().await? {
            Some(value) => Some(value),
            None => self.legacy.get(LEGACY_API_KEY),
        };
        self.cache.replace(value.clone());
        Ok(value)
    }

    async fn write(&self, value: Option<&str>) -> AppResult<()> {
        let pool = self.db.open().await?;
        match value {
            Some(value) => store::put_setting(&pool, API_KEY_SETTING, value, now_ms()).await,
            None => store::delete_setting(&pool, API_KEY_SETTING).await.map(|_| ()),
        }
    }

    fn mirror(&self, value: Option<&str>) {
        let result = match value {
            Some(value) => self.legacy.set(LEGACY_API_KEY, value),
            None => self.legacy.remove(LEGACY_API_KEY),
        };
        if let Err(err) = result {
            warn!(target: "cuisto", event = "legacy_mirror_failed", error = %err);
        }
    }
}
