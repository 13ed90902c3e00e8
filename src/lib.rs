//! Local persistence for the cuisto recipe app: recipes with their images,
//! the API credential, and the upgrade path from the old flat layout.

use std::sync::Arc;

pub mod codec;
pub mod config;
pub mod db;
mod error;
pub mod id;
pub mod imaging;
pub mod legacy;
pub mod logging;
pub mod migrate;
pub mod model;
pub mod quota;
pub mod recipes;
pub mod settings;
pub mod store;
pub mod time;
pub mod usage;

pub use codec::{decode_to_data_uri, encode_to_binary, Binary};
pub use config::{DatabaseConfig, ImageConfig, StorageConfig};
pub use db::Database;
pub use error::{AppError, AppResult};
pub use imaging::{ImageInput, ImagePipeline};
pub use legacy::{FileLegacyStore, LegacyImportReport, LegacyStore, MemoryLegacyStore};
pub use model::{
    Category, DraftRecipe, FullRecipe, IngredientGroup, SavedRecipe, Step, SummaryRecipe,
};
pub use quota::QuotaPolicy;
pub use recipes::RecipeRepository;
pub use settings::SettingsRepository;
pub use usage::{format_storage_size, StorageUsage};

/// Owns the database handle and both repositories. An application holds
/// one of these for its lifetime.
#[derive(Clone)]
pub struct Storage {
    db: Database,
    recipes: RecipeRepository,
    settings: SettingsRepository,
    legacy: Arc<dyn LegacyStore>,
}

impl Storage {
    /// Open the database, import legacy data and prime the credential cache.
    ///
    /// Only an unusable database is fatal; a failed legacy import is logged
    /// and the storage is returned empty but usable.
    pub async fn init(config: StorageConfig, legacy: Arc<dyn LegacyStore>) -> AppResult<Self> {
        let db = Database::new(config.database.clone());
        db.open().await?;
        let storage = Self {
            recipes: RecipeRepository::new(
                db.clone(),
                ImagePipeline::new(config.images.clone()),
                config.quota,
            ),
            settings: SettingsRepository::new(db.clone(), legacy.clone()),
            db,
            legacy,
        };
        storage.run_legacy_import().await;
        storage.settings.prime().await?;
        tracing::info!(
            target: "cuisto",
            event = "storage_ready",
            credential_configured = storage.settings.is_configured()
        );
        Ok(storage)
    }

    /// Import whatever the legacy store still holds. Safe to repeat.
    pub async fn run_legacy_import(&self) -> LegacyImportReport {
        legacy::import_legacy(&self.db, &self.settings, self.legacy.as_ref()).await
    }

    pub fn recipes(&self) -> &RecipeRepository {
        &self.recipes
    }

    pub fn settings(&self) -> &SettingsRepository {
        &self.settings
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub async fn close(&self) {
        self.db.close().await;
    }
}
