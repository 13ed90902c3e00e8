//! Row-level primitives over the `recipes`, `recipe_steps` and `settings`
//! tables. Each function is one atomic unit of work.

use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::{error, warn};

use crate::codec::Binary;
use crate::model::{Category, IngredientGroup, RecipeDetails};
use crate::quota::{Degradation, RecordMeta};
use crate::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredStep {
    pub text: String,
    pub illustration: Option<Binary>,
}

/// A recipe as persisted: images are binary, never data URIs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecipe {
    pub id: String,
    pub saved_at: i64,
    pub details: RecipeDetails,
    pub steps: Vec<StoredStep>,
    pub primary_image: Option<Binary>,
    pub thumbnail: Option<Binary>,
}

impl StoredRecipe {
    /// Bytes this record counts against the quota.
    fn payload_bytes(&self, ingredients_json_len: usize) -> u64 {
        let d = &self.details;
        let text = [
            Some(d.title.as_str()),
            d.servings.as_deref(),
            d.prep_duration.as_deref(),
            d.cook_duration.as_deref(),
            d.rest_duration.as_deref(),
            d.chef_comment.as_deref(),
            d.created_at.as_deref(),
        ]
        .iter()
        .flatten()
        .map(|s| s.len())
        .sum::<usize>();
        let steps = self
            .steps
            .iter()
            .map(|s| s.text.len() + s.illustration.as_ref().map_or(0, Binary::len))
            .sum::<usize>();
        let images = self.primary_image.as_ref().map_or(0, Binary::len)
            + self.thumbnail.as_ref().map_or(0, Binary::len);
        (text + ingredients_json_len + steps + images) as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSummary {
    pub id: String,
    pub title: String,
    pub category: Category,
    pub servings: Option<String>,
    pub prep_duration: Option<String>,
    pub cook_duration: Option<String>,
    pub saved_at: i64,
    pub thumbnail: Option<Binary>,
}

fn binary(mime: Option<String>, bytes: Option<Vec<u8>>) -> Option<Binary> {
    match (mime, bytes) {
        (Some(mime), Some(bytes)) => Some(Binary::new(mime, bytes)),
        _ => None,
    }
}

async fn rollback(tx: Transaction<'_, Sqlite>, op: &'static str) {
    if let Err(rb) = tx.rollback().await {
        error!(target: "cuisto", event = "db_tx_rollback_failed", op = op, error = %rb);
    } else {
        warn!(target: "cuisto", event = "db_tx_rollback", op = op);
    }
}

/// Upsert one recipe and replace its steps.
pub async fn put_recipe(
    pool: &SqlitePool,
    record: &StoredRecipe,
    quota_bytes: Option<u64>,
) -> AppResult<()> {
    put_recipes(pool, std::slice::from_ref(record), quota_bytes).await
}

/// Upsert several recipes in a single transaction: all land or none do.
pub async fn put_recipes(
    pool: &SqlitePool,
    records: &[StoredRecipe],
    quota_bytes: Option<u64>,
) -> AppResult<()> {
    let mut tx = pool.begin().await?;
    for record in records {
        if let Err(err) = write_recipe(&mut tx, record, quota_bytes).await {
            rollback(tx, "put_recipes").await;
            return Err(err.with_context("recipe_id", record.id.clone()));
        }
    }
    tx.commit().await?;
    Ok(())
}

async fn write_recipe(
    conn: &mut SqliteConnection,
    record: &StoredRecipe,
    quota_bytes: Option<u64>,
) -> AppResult<()> {
    let d = &record.details;
    let ingredients = serde_json::to_string(&d.ingredient_groups)?;
    let size = record.payload_bytes(ingredients.len());

    if let Some(budget) = quota_bytes {
        let used: i64 =
            sqlx::query_scalar("SELECT COALESCE(SUM(stored_bytes), 0) FROM recipes WHERE id != ?1")
                .bind(&record.id)
                .fetch_one(&mut *conn)
                .await?;
        let needed = used.max(0) as u64 + size;
        if needed > budget {
            return Err(AppError::quota_exceeded(needed, budget));
        }
    }

    sqlx::query("DELETE FROM recipe_steps WHERE recipe_id = ?1")
        .bind(&record.id)
        .execute(&mut *conn)
        .await?;

    sqlx::query(
        "INSERT INTO recipes (id, title, category, servings, prep_duration, cook_duration, \
           rest_duration, chef_comment, ingredient_groups, created_at, saved_at, \
           primary_image_mime, primary_image, thumbnail_mime, thumbnail, stored_bytes) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16) \
         ON CONFLICT(id) DO UPDATE SET \
           title = excluded.title, category = excluded.category, servings = excluded.servings, \
           prep_duration = excluded.prep_duration, cook_duration = excluded.cook_duration, \
           rest_duration = excluded.rest_duration, chef_comment = excluded.chef_comment, \
           ingredient_groups = excluded.ingredient_groups, created_at = excluded.created_at, \
           saved_at = excluded.saved_at, primary_image_mime = excluded.primary_image_mime, \
           primary_image = excluded.primary_image, thumbnail_mime = excluded.thumbnail_mime, \
           thumbnail = excluded.thumbnail, stored_bytes = excluded.stored_bytes",
    )
    .bind(&record.id)
    .bind(&d.title)
    .bind(d.category.as_str())
    .bind(d.servings.as_deref())
    .bind(d.prep_duration.as_deref())
    .bind(d.cook_duration.as_deref())
    .bind(d.rest_duration.as_deref())
    .bind(d.chef_comment.as_deref())
    .bind(&ingredients)
    .bind(d.created_at.as_deref())
    .bind(record.saved_at)
    .bind(record.primary_image.as_ref().map(|b| b.mime.as_str()))
    .bind(record.primary_image.as_ref().map(|b| b.bytes.as_slice()))
    .bind(record.thumbnail.as_ref().map(|b| b.mime.as_str()))
    .bind(record.thumbnail.as_ref().map(|b| b.bytes.as_slice()))
    .bind(size as i64)
    .execute(&mut *conn)
    .await?;

    for (position, step) in record.steps.iter().enumerate() {
        sqlx::query(
            "INSERT INTO recipe_steps (recipe_id, position, text, illustration_mime, illustration) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&record.id)
        .bind(position as i64)
        .bind(&step.text)
        .bind(step.illustration.as_ref().map(|b| b.mime.as_str()))
        .bind(step.illustration.as_ref().map(|b| b.bytes.as_slice()))
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub async fn get_recipe(pool: &SqlitePool, id: &str) -> AppResult<Option<StoredRecipe>> {
    let mut conn = pool.acquire().await?;
    let row = sqlx::query(
        "SELECT id, title, category, servings, prep_duration, cook_duration, rest_duration, \
           chef_comment, ingredient_groups, created_at, saved_at, primary_image_mime, \
           primary_image, thumbnail_mime, thumbnail \
         FROM recipes WHERE id = ?1",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    let Some(row) = row else {
        return Ok(None);
    };

    let ingredients_raw: String = row.try_get("ingredient_groups")?;
    let ingredient_groups: Vec<IngredientGroup> = serde_json::from_str(&ingredients_raw)
        .map_err(|err| AppError::from(err).with_context("recipe_id", id.to_string()))?;
    let category: String = row.try_get("category")?;

    let steps = sqlx::query(
        "SELECT text, illustration_mime, illustration FROM recipe_steps \
         WHERE recipe_id = ?1 ORDER BY position",
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(|step| {
        Ok(StoredStep {
            text: step.try_get("text")?,
            illustration: binary(
                step.try_get("illustration_mime")?,
                step.try_get("illustration")?,
            ),
        })
    })
    .collect::<Result<Vec<_>, sqlx::Error>>()?;

    Ok(Some(StoredRecipe {
        id: row.try_get("id")?,
        saved_at: row.try_get("saved_at")?,
        details: RecipeDetails {
            title: row.try_get("title")?,
            category: Category::parse_loose(&category),
            servings: row.try_get("servings")?,
            prep_duration: row.try_get("prep_duration")?,
            cook_duration: row.try_get("cook_duration")?,
            rest_duration: row.try_get("rest_duration")?,
            chef_comment: row.try_get("chef_comment")?,
            ingredient_groups,
            created_at: row.try_get("created_at")?,
        },
        steps,
        primary_image: binary(row.try_get("primary_image_mime")?, row.try_get("primary_image")?),
        thumbnail: binary(row.try_get("thumbnail_mime")?, row.try_get("thumbnail")?),
    }))
}

/// Every recipe, newest first, without primary images or illustrations.
pub async fn list_summaries(pool: &SqlitePool) -> AppResult<Vec<StoredSummary>> {
    let rows = sqlx::query(
        "SELECT id, title, category, servings, prep_duration, cook_duration, saved_at, \
           thumbnail_mime, thumbnail \
         FROM recipes ORDER BY saved_at DESC, id DESC",
    )
    .fetch_all(pool)
    .await?;
    rows.into_iter()
        .map(|row| {
            let category: String = row.try_get("category")?;
            Ok(StoredSummary {
                id: row.try_get("id")?,
                title: row.try_get("title")?,
                category: Category::parse_loose(&category),
                servings: row.try_get("servings")?,
                prep_duration: row.try_get("prep_duration")?,
                cook_duration: row.try_get("cook_duration")?,
                saved_at: row.try_get("saved_at")?,
                thumbnail: binary(row.try_get("thumbnail_mime")?, row.try_get("thumbnail")?),
            })
        })
        .collect::<Result<Vec<_>, sqlx::Error>>()
        .map_err(AppError::from)
}

pub async fn recipe_metas(pool: &SqlitePool) -> AppResult<Vec<RecordMeta>> {
    let rows = sqlx::query(
        "SELECT id, saved_at, primary_image IS NOT NULL AS has_primary \
         FROM recipes ORDER BY saved_at DESC, id DESC",
    )
    .fetch_all(pool)
    .await?;
    rows.into_iter()
        .map(|row| {
            Ok(RecordMeta {
                id: row.try_get("id")?,
                saved_at: row.try_get("saved_at")?,
                has_primary_image: row.try_get::<i64, _>("has_primary")? != 0,
            })
        })
        .collect::<Result<Vec<_>, sqlx::Error>>()
        .map_err(AppError::from)
}

/// Remove a recipe and its steps. `false` when nothing matched.
pub async fn delete_recipe(pool: &SqlitePool, id: &str) -> AppResult<bool> {
    Ok(delete_recipes(pool, &[id.to_string()]).await? > 0)
}

pub async fn delete_recipes(pool: &SqlitePool, ids: &[String]) -> AppResult<u64> {
    if ids.is_empty() {
        return Ok(0);
    }
    let mut tx = pool.begin().await?;
    let mut removed = 0;
    for id in ids {
        match delete_one(&mut tx, id).await {
            Ok(count) => removed += count,
            Err(err) => {
                rollback(tx, "delete_recipes").await;
                return Err(err.into());
            }
        }
    }
    tx.commit().await?;
    Ok(removed)
}

async fn delete_one(conn: &mut SqliteConnection, id: &str) -> Result<u64, sqlx::Error> {
    sqlx::query("DELETE FROM recipe_steps WHERE recipe_id = ?1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    let done = sqlx::query("DELETE FROM recipes WHERE id = ?1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(done.rows_affected())
}

/// Drop the primary image of each listed recipe, keeping its thumbnail.
pub async fn strip_primary_images(pool: &SqlitePool, ids: &[String]) -> AppResult<u64> {
    if ids.is_empty() {
        return Ok(0);
    }
    let mut tx = pool.begin().await?;
    let mut stripped = 0;
    for id in ids {
        match strip_one(&mut tx, id).await {
            Ok(count) => stripped += count,
            Err(err) => {
                rollback(tx, "strip_primary_images").await;
                return Err(err.into());
            }
        }
    }
    tx.commit().await?;
    Ok(stripped)
}

async fn strip_one(conn: &mut SqliteConnection, id: &str) -> Result<u64, sqlx::Error> {
    // Right-hand sides see the pre-update row, so the subtraction uses the old blob.
    let done = sqlx::query(
        "UPDATE recipes \
         SET stored_bytes = MAX(stored_bytes - COALESCE(LENGTH(primary_image), 0), 0), \
           primary_image = NULL, primary_image_mime = NULL \
         WHERE id = ?1 AND primary_image IS NOT NULL",
    )
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(done.rows_affected())
}

/// Apply a degradation plan to the stored records and write `record`, all in
/// one transaction. When the write still does not fit, the plan is rolled
/// back with it and the stored records are left as they were.
pub async fn put_recipe_degraded(
    pool: &SqlitePool,
    record: &StoredRecipe,
    plan: &Degradation,
    quota_bytes: Option<u64>,
) -> AppResult<()> {
    let mut tx = pool.begin().await?;
    if let Err(err) = degrade_then_write(&mut tx, record, plan, quota_bytes).await {
        rollback(tx, "put_recipe_degraded").await;
        return Err(err.with_context("recipe_id", record.id.clone()));
    }
    tx.commit().await?;
    Ok(())
}

async fn degrade_then_write(
    conn: &mut SqliteConnection,
    record: &StoredRecipe,
    plan: &Degradation,
    quota_bytes: Option<u64>,
) -> AppResult<()> {
    for id in &plan.strip_primary {
        strip_one(conn, id).await?;
    }
    for id in &plan.evict {
        delete_one(conn, id).await?;
    }
    write_recipe(conn, record, quota_bytes).await
}

pub async fn clear_recipes(pool: &SqlitePool) -> AppResult<u64> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM recipe_steps").execute(&mut *tx).await?;
    let done = sqlx::query("DELETE FROM recipes").execute(&mut *tx).await?;
    tx.commit().await?;
    Ok(done.rows_affected())
}

pub async fn count_recipes(pool: &SqlitePool) -> AppResult<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM recipes")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

pub async fn latest_saved_at(pool: &SqlitePool) -> AppResult<Option<i64>> {
    let latest: Option<i64> = sqlx::query_scalar("SELECT MAX(saved_at) FROM recipes")
        .fetch_one(pool)
        .await?;
    Ok(latest)
}

/// Sum of the payload bytes counted against the quota.
pub async fn used_bytes(pool: &SqlitePool) -> AppResult<u64> {
    let used: i64 = sqlx::query_scalar("SELECT COALESCE(SUM(stored_bytes), 0) FROM recipes")
        .fetch_one(pool)
        .await?;
    Ok(used.max(0) as u64)
}

pub async fn put_setting(pool: &SqlitePool, key: &str, value: &str, now: i64) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
    )
    .bind(key)
    .bind(value)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_setting(pool: &SqlitePool, key: &str) -> AppResult<Option<String>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?1")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value)
}

pub async fn delete_setting(pool: &SqlitePool, key: &str) -> AppResult<bool> {
    let done = sqlx::query("DELETE FROM settings WHERE key = ?1")
        .bind(key)
        .execute(pool)
        .await?;
    Ok(done.rows_affected() > 0)
}
