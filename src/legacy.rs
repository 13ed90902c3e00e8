//! Import from the flat key/value layout that predates the SQLite store.
//!
//! The old layout kept the credential under one key and every saved recipe
//! as a JSON array under another. Import runs on every start and is a no-op
//! once the recipe list has been removed. Recipes come across without their
//! primary image or illustrations: the old layout never stored them.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::codec::encode_to_binary;
use crate::db::Database;
use crate::id::legacy_uuid_v5;
use crate::model::{Category, IngredientGroup, RecipeDetails, Step};
use crate::settings::SettingsRepository;
use crate::store::{self, StoredRecipe, StoredStep};
use crate::time::{now_ms, parse_timestamp_ms};
use crate::AppResult;

pub const LEGACY_API_KEY: &str = "cuisto_api_key";
pub const LEGACY_RECIPES_KEY: &str = "cuisto_saved_recipes";

/// A flat string-to-string store with synchronous access.
pub trait LegacyStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
    fn remove(&self, key: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryLegacyStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryLegacyStore {
    pub fn with_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: Mutex::new(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }
}

impl LegacyStore for MemoryLegacyStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        Ok(())
    }
}

/// A JSON object on disk, rewritten whole through a temp file and rename.
#[derive(Debug)]
pub struct FileLegacyStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileLegacyStore {
    /// Load `path`; a missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => BTreeMap::new(),
            Ok(raw) => serde_json::from_str(&raw)
                .with_context(|| format!("parse legacy store {}", path.display()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                return Err(err).with_context(|| format!("read legacy store {}", path.display()))
            }
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update(&self, apply: impl FnOnce(&mut BTreeMap<String, String>)) -> anyhow::Result<()> {
        let mut guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut next = guard.clone();
        apply(&mut next);
        write_atomically(&self.path, &next)?;
        *guard = next;
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_atomically(path: &Path, entries: &BTreeMap<String, String>) -> anyhow::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    let tmp = tmp_path(path);
    let body = serde_json::to_vec_pretty(entries)?;
    fs::write(&tmp, body).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("rename into {}", path.display()))?;
    Ok(())
}

impl LegacyStore for FileLegacyStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        if self.get(key).is_none() {
            return Ok(());
        }
        self.update(|entries| {
            entries.remove(key);
        })
    }
}

/// Shape of one entry in the old recipe list.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyRecipe {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    servings: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    prep_time: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    cook_time: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    rest_time: Option<String>,
    #[serde(default)]
    chef_comment: Option<String>,
    #[serde(default)]
    ingredients: Vec<IngredientGroup>,
    #[serde(default)]
    instructions: Vec<Step>,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    saved_at: Option<String>,
    #[serde(default, alias = "createdAt")]
    generated_at: Option<String>,
}

/// Accept strings or numbers; anything else reads as absent.
fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyImportReport {
    pub credential_imported: bool,
    pub recipes_imported: usize,
}

/// Move legacy data into the store. Never fails: problems are logged and
/// the legacy data is left where it was for the next attempt.
pub async fn import_legacy(
    db: &Database,
    settings: &SettingsRepository,
    legacy: &dyn LegacyStore,
) -> LegacyImportReport {
    let mut report = LegacyImportReport::default();

    match import_credential(settings, legacy).await {
        Ok(imported) => report.credential_imported = imported,
        Err(err) => {
            error!(target: "cuisto", event = "legacy_credential_import_failed", error = %err);
        }
    }

    match import_recipes(db, legacy).await {
        Ok(count) => report.recipes_imported = count,
        Err(err) => {
            error!(target: "cuisto", event = "legacy_recipes_import_failed", error = %err);
        }
    }

    if report.credential_imported || report.recipes_imported > 0 {
        info!(
            target: "cuisto",
            event = "legacy_import_complete",
            credential = report.credential_imported,
            recipes = report.recipes_imported
        );
    }
    report
}

async fn import_credential(
    settings: &SettingsRepository,
    legacy: &dyn LegacyStore,
) -> AppResult<bool> {
    let Some(value) = legacy.get(LEGACY_API_KEY) else {
        return Ok(false);
    };
    if value.trim().is_empty() {
        return Ok(false);
    }
    if settings.get().await?.as_deref() == Some(value.as_str()) {
        return Ok(false);
    }
    // `set` mirrors back into the legacy store, which keeps its copy.
    settings.set(&value).await?;
    Ok(true)
}

async fn import_recipes(db: &Database, legacy: &dyn LegacyStore) -> anyhow::Result<usize> {
    let Some(raw) = legacy.get(LEGACY_RECIPES_KEY) else {
        return Ok(0);
    };
    let entries: Vec<Value> = if raw.trim().is_empty() {
        Vec::new()
    } else {
        serde_json::from_str(&raw).context("parse legacy recipe list")?
    };
    if entries.is_empty() {
        legacy.remove(LEGACY_RECIPES_KEY)?;
        return Ok(0);
    }

    let now = now_ms();
    let records = entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            to_record(entry, now).with_context(|| format!("legacy recipe #{index}"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let pool = db.open().await?;
    // Legacy data already lived on the device; it is brought over whole.
    store::put_recipes(&pool, &records, None).await?;
    legacy.remove(LEGACY_RECIPES_KEY)?;
    Ok(records.len())
}

fn to_record(entry: Value, now: i64) -> anyhow::Result<StoredRecipe> {
    let id = match entry.get("id") {
        Some(Value::String(id)) if !id.trim().is_empty() => id.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        // Same entry, same id: a repeated import upserts instead of duplicating.
        _ => legacy_uuid_v5(&serde_json::to_vec(&entry)?),
    };
    let legacy: LegacyRecipe = serde_json::from_value(entry)?;
    let saved_at = legacy
        .saved_at
        .as_deref()
        .and_then(parse_timestamp_ms)
        .unwrap_or(now);
    if let Some(thumbnail) = legacy.thumbnail.as_deref() {
        if encode_to_binary(thumbnail).is_none() {
            warn!(target: "cuisto", event = "legacy_thumbnail_unreadable", recipe_id = %id);
        }
    }

    Ok(StoredRecipe {
        saved_at,
        details: RecipeDetails {
            title: legacy.title.unwrap_or_default(),
            category: legacy
                .category
                .as_deref()
                .map(Category::parse_loose)
                .unwrap_or_default(),
            servings: legacy.servings,
            prep_duration: legacy.prep_time,
            cook_duration: legacy.cook_time,
            rest_duration: legacy.rest_time,
            chef_comment: legacy.chef_comment,
            ingredient_groups: legacy.ingredients,
            created_at: legacy.generated_at,
        },
        steps: legacy
            .instructions
            .into_iter()
            .map(|step| StoredStep {
                text: step.text,
                illustration: None,
            })
            .collect(),
        primary_image: None,
        thumbnail: legacy.thumbnail.as_deref().and_then(encode_to_binary),
        id,
    })
}
