use std::sync::Arc;

use anyhow::Result;
use cuisto_store::legacy::{
    FileLegacyStore, LegacyStore, MemoryLegacyStore, LEGACY_API_KEY, LEGACY_RECIPES_KEY,
};
use cuisto_store::model::Category;
use cuisto_store::StorageConfig;
use serde_json::json;
use tempfile::tempdir;

#[path = "util.rs"]
mod util;

fn legacy_recipes() -> String {
    json!([
        {
            "id": "legacy-1",
            "title": "Tarte Tatin",
            "category": "DESSERTS",
            "servings": "8",
            "prepTime": "20 min",
            "ingredients": [{"section": "Pâte", "items": ["1 pâte brisée"]}],
            "instructions": ["Caraméliser", "Enfourner"],
            "thumbnail": util::png_data_uri(50, 50),
            "savedAt": "2023-11-05T18:30:00.000Z"
        },
        {
            "title": "Salade niçoise",
            "category": "ENTRÉES",
            "instructions": [{"text": "Assembler"}]
        }
    ])
    .to_string()
}

fn seeded() -> Arc<MemoryLegacyStore> {
    Arc::new(MemoryLegacyStore::with_entries([
        (LEGACY_API_KEY, "sk-legacy".to_string()),
        (LEGACY_RECIPES_KEY, legacy_recipes()),
    ]))
}

#[tokio::test]
async fn init_imports_credential_and_recipes() -> Result<()> {
    let legacy = seeded();
    let storage = util::storage_with(StorageConfig::in_memory(), legacy.clone()).await;

    assert_eq!(storage.settings().get().await?.as_deref(), Some("sk-legacy"));
    assert_eq!(storage.settings().get_cached().as_deref(), Some("sk-legacy"));
    assert_eq!(legacy.get(LEGACY_API_KEY).as_deref(), Some("sk-legacy"));
    assert_eq!(legacy.get(LEGACY_RECIPES_KEY), None);

    let list = storage.recipes().list().await?;
    assert_eq!(list.len(), 2);
    let tatin = storage.recipes().get("legacy-1").await?.expect("kept its id");
    assert_eq!(tatin.details.category, Category::Dessert);
    assert_eq!(tatin.details.prep_duration.as_deref(), Some("20 min"));
    assert_eq!(tatin.saved_at, 1_699_209_000_000);
    assert!(tatin.primary_image.is_none());
    assert!(tatin.steps.iter().all(|s| s.illustration.is_none()));
    assert_eq!(tatin.steps.len(), 2);
    util::decode_uri(tatin.thumbnail_image.as_deref().expect("thumbnail carried over"));

    let salade = list
        .iter()
        .find(|s| s.title == "Salade niçoise")
        .expect("imported without an id");
    assert!(!salade.id.is_empty());
    assert_eq!(salade.category, Category::Starter);
    Ok(())
}

#[tokio::test]
async fn import_is_idempotent() -> Result<()> {
    let legacy = seeded();
    let storage = util::storage_with(StorageConfig::in_memory(), legacy.clone()).await;
    assert_eq!(storage.recipes().count().await?, 2);

    let again = storage.run_legacy_import().await;
    assert!(!again.credential_imported);
    assert_eq!(again.recipes_imported, 0);
    assert_eq!(storage.recipes().count().await?, 2);

    // The same list showing up again lands on the same ids.
    legacy.set(LEGACY_RECIPES_KEY, &legacy_recipes())?;
    let replay = storage.run_legacy_import().await;
    assert_eq!(replay.recipes_imported, 2);
    assert_eq!(storage.recipes().count().await?, 2);
    Ok(())
}

#[tokio::test]
async fn unreadable_legacy_data_is_left_in_place() -> Result<()> {
    let legacy = Arc::new(MemoryLegacyStore::with_entries([(
        LEGACY_RECIPES_KEY,
        "[{\"title\": ",
    )]));
    let storage = util::storage_with(StorageConfig::in_memory(), legacy.clone()).await;
    assert_eq!(storage.recipes().count().await?, 0);
    assert_eq!(legacy.get(LEGACY_RECIPES_KEY).as_deref(), Some("[{\"title\": "));

    // The store is still usable.
    storage.recipes().save(&util::draft("Omelette")).await?;
    assert_eq!(storage.recipes().count().await?, 1);
    Ok(())
}

#[tokio::test]
async fn empty_or_missing_legacy_data_is_a_noop() -> Result<()> {
    let storage = util::memory_storage().await;
    let report = storage.run_legacy_import().await;
    assert_eq!(report, Default::default());

    let legacy = Arc::new(MemoryLegacyStore::with_entries([
        (LEGACY_RECIPES_KEY, "[]"),
        (LEGACY_API_KEY, "   "),
    ]));
    let storage = util::storage_with(StorageConfig::in_memory(), legacy.clone()).await;
    assert_eq!(storage.recipes().count().await?, 0);
    assert_eq!(storage.settings().get().await?, None);
    assert_eq!(legacy.get(LEGACY_RECIPES_KEY), None);
    Ok(())
}

#[tokio::test]
async fn file_backed_legacy_store_is_rewritten_after_import() -> Result<()> {
    let dir = tempdir()?;
    let legacy_path = dir.path().join("local_storage.json");
    std::fs::write(
        &legacy_path,
        serde_json::to_string(&json!({
            LEGACY_API_KEY: "sk-file",
            LEGACY_RECIPES_KEY: legacy_recipes(),
        }))?,
    )?;

    let legacy = Arc::new(FileLegacyStore::open(&legacy_path)?);
    let storage = util::storage_with(StorageConfig::at_dir(dir.path()), legacy).await;
    assert_eq!(storage.recipes().count().await?, 2);
    storage.close().await;

    let reopened = FileLegacyStore::open(&legacy_path)?;
    assert_eq!(reopened.get(LEGACY_RECIPES_KEY), None);
    assert_eq!(reopened.get(LEGACY_API_KEY).as_deref(), Some("sk-file"));
    Ok(())
}
