//! Recipe persistence: image normalisation on the way in, data URIs on the
//! way out, and the quota fallback ladder around every write.

use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::codec::decode_to_data_uri;
use crate::db::Database;
use crate::id::new_uuid_v7;
use crate::imaging::ImagePipeline;
use crate::model::{DraftRecipe, FullRecipe, SavedRecipe, Step, SummaryRecipe};
use crate::quota::{QuotaPolicy, Tier};
use crate::store::{self, StoredRecipe, StoredStep};
use crate::time::now_ms;
use crate::usage::{self, StorageUsage};
use crate::{AppError, AppResult};

#[derive(Clone)]
pub struct RecipeRepository {
    db: Database,
    pipeline: ImagePipeline,
    policy: QuotaPolicy,
}

impl RecipeRepository {
    pub fn new(db: Database, pipeline: ImagePipeline, policy: QuotaPolicy) -> Self {
        Self {
            db,
            pipeline,
            policy,
        }
    }

    pub fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }

    /// Persist a draft and return it with its id and final `saved_at`.
    ///
    /// Images are re-encoded before the write; a thumbnail is derived from
    /// the compressed primary image. When the write does not fit the quota
    /// the degradation tiers are applied in order, retrying after each.
    pub async fn save(&self, draft: &DraftRecipe) -> AppResult<SavedRecipe> {
        let pool = self.db.open().await?;
        let id = draft
            .id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(new_uuid_v7);

        let images = self.pipeline.config().clone();
        let primary_image = match draft.primary_image.as_deref() {
            Some(uri) => {
                self.pipeline
                    .compress(uri.into(), images.primary_quality, images.primary_max_edge)
                    .await
            }
            None => None,
        };
        let thumbnail = match &primary_image {
            Some(primary) => {
                self.pipeline
                    .make_thumbnail(primary.into(), images.thumbnail_max_edge)
                    .await
            }
            None => None,
        };
        let mut steps = Vec::with_capacity(draft.steps.len());
        for step in &draft.steps {
            let illustration = match step.illustration.as_deref() {
                Some(uri) => {
                    self.pipeline
                        .compress(uri.into(), images.illustration_quality, None)
                        .await
                }
                None => None,
            };
            steps.push(StoredStep {
                text: step.text.clone(),
                illustration,
            });
        }

        let saved_at = next_saved_at(&pool).await?;
        let mut record = StoredRecipe {
            id,
            saved_at,
            details: draft.details.clone(),
            steps,
            primary_image,
            thumbnail,
        };
        let tier = self.put_with_fallback(&pool, &mut record).await?;

        info!(
            target: "cuisto",
            event = "recipe_saved",
            recipe_id = %record.id,
            saved_at = record.saved_at,
            steps = record.steps.len(),
            has_primary_image = record.primary_image.is_some(),
            has_thumbnail = record.thumbnail.is_some(),
            tier = tier.map_or("none", Tier::as_str)
        );

        Ok(SavedRecipe {
            id: record.id,
            saved_at: record.saved_at,
            details: draft.details.clone(),
            steps: draft.steps.clone(),
            primary_image: draft.primary_image.clone(),
        })
    }

    /// Returns the tier that made the write fit, if any was needed.
    async fn put_with_fallback(
        &self,
        pool: &SqlitePool,
        record: &mut StoredRecipe,
    ) -> AppResult<Option<Tier>> {
        let quota = self.db.config().quota_bytes;
        match store::put_recipe(pool, record, quota).await {
            Ok(()) => return Ok(None),
            Err(err) if err.is_quota_exceeded() => {
                warn!(
                    target: "cuisto",
                    event = "quota_exceeded",
                    recipe_id = %record.id,
                    error = %err
                );
            }
            Err(err) => return Err(err),
        }

        // Each tier starts from the stored state; a tier that does not make
        // the write fit is rolled back before the next one is planned.
        for tier in Tier::ORDER {
            let metas = store::recipe_metas(pool).await?;
            let plan = tier.plan(&metas, &record.id, &self.policy);
            if plan.is_noop() {
                continue;
            }
            let primary_image = if plan.strip_incoming_primary {
                record.primary_image.take()
            } else {
                None
            };
            match store::put_recipe_degraded(pool, record, &plan, quota).await {
                Ok(()) => {
                    info!(
                        target: "cuisto",
                        event = "quota_tier_applied",
                        tier = tier.as_str(),
                        recipe_id = %record.id,
                        stripped = plan.strip_primary.len(),
                        evicted = plan.evict.len(),
                        strip_incoming_primary = plan.strip_incoming_primary
                    );
                    return Ok(Some(tier));
                }
                Err(err) if err.is_quota_exceeded() => {
                    info!(
                        target: "cuisto",
                        event = "quota_tier_insufficient",
                        tier = tier.as_str(),
                        recipe_id = %record.id
                    );
                    if primary_image.is_some() {
                        record.primary_image = primary_image;
                    }
                }
                Err(err) => return Err(err),
            }
        }

        warn!(
            target: "cuisto",
            event = "storage_exhausted",
            recipe_id = %record.id
        );
        Err(AppError::storage_exhausted().with_context("recipe_id", record.id.clone()))
    }

    pub async fn get(&self, id: &str) -> AppResult<Option<FullRecipe>> {
        let pool = self.db.open().await?;
        let Some(stored) = store::get_recipe(&pool, id).await? else {
            return Ok(None);
        };
        Ok(Some(FullRecipe {
            primary_image: decode_to_data_uri(stored.primary_image.as_ref()),
            thumbnail_image: decode_to_data_uri(stored.thumbnail.as_ref()),
            steps: stored
                .steps
                .iter()
                .map(|step| Step {
                    text: step.text.clone(),
                    illustration: decode_to_data_uri(step.illustration.as_ref()),
                })
                .collect(),
            id: stored.id,
            saved_at: stored.saved_at,
            details: stored.details,
        }))
    }

    /// Summaries newest first; only thumbnails are decoded.
    pub async fn list(&self) -> AppResult<Vec<SummaryRecipe>> {
        let pool = self.db.open().await?;
        let summaries = store::list_summaries(&pool).await?;
        Ok(summaries
            .into_iter()
            .map(|s| SummaryRecipe {
                thumbnail_image: decode_to_data_uri(s.thumbnail.as_ref()),
                id: s.id,
                title: s.title,
                category: s.category,
                servings: s.servings,
                prep_duration: s.prep_duration,
                cook_duration: s.cook_duration,
                saved_at: s.saved_at,
            })
            .collect())
    }

    pub async fn delete_by_id(&self, id: &str) -> AppResult<bool> {
        let pool = self.db.open().await?;
        let removed = store::delete_recipe(&pool, id).await?;
        if removed {
            info!(target: "cuisto", event = "recipe_deleted", recipe_id = %id);
        }
        Ok(removed)
    }

    pub async fn count(&self) -> AppResult<i64> {
        let pool = self.db.open().await?;
        store::count_recipes(&pool).await
    }

    pub async fn clear_all(&self) -> AppResult<bool> {
        let pool = self.db.open().await?;
        let removed = store::clear_recipes(&pool).await?;
        info!(target: "cuisto", event = "recipes_cleared", removed = removed);
        Ok(true)
    }

    pub async fn storage_usage(&self) -> AppResult<StorageUsage> {
        let pool = self.db.open().await?;
        usage::storage_usage(&pool, self.db.config()).await
    }
}

/// Strictly after every stored record, even when the clock lags.
async fn next_saved_at(pool: &SqlitePool) -> AppResult<i64> {
    let now = now_ms();
    Ok(match store::latest_saved_at(pool).await? {
        Some(latest) if latest >= now => latest + 1,
        _ => now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::model::RecipeDetails;

    fn repo(config: DatabaseConfig, policy: QuotaPolicy) -> RecipeRepository {
        RecipeRepository::new(Database::new(config), ImagePipeline::default(), policy)
    }

    fn draft(title: &str) -> DraftRecipe {
        DraftRecipe {
            details: RecipeDetails {
                title: title.to_string(),
                ..RecipeDetails::default()
            },
            steps: vec![Step::text("Mélanger")],
            ..DraftRecipe::default()
        }
    }

    #[tokio::test]
    async fn blank_id_is_replaced() {
        let repo = repo(DatabaseConfig::in_memory(), QuotaPolicy::default());
        let mut d = draft("Velouté");
        d.id = Some("   ".into());
        let saved = repo.save(&d).await.expect("save");
        assert!(!saved.id.trim().is_empty());
        assert_ne!(saved.id, "   ");
    }

    #[tokio::test]
    async fn supplied_id_upserts() {
        let repo = repo(DatabaseConfig::in_memory(), QuotaPolicy::default());
        let mut d = draft("Gratin");
        d.id = Some("fixed".into());
        let first = repo.save(&d).await.expect("first save");
        d.details.title = "Gratin dauphinois".into();
        let second = repo.save(&d).await.expect("second save");
        assert_eq!(first.id, second.id);
        assert!(second.saved_at > first.saved_at);
        assert_eq!(repo.count().await.expect("count"), 1);
        let stored = repo.get("fixed").await.expect("get").expect("present");
        assert_eq!(stored.details.title, "Gratin dauphinois");
    }

    #[tokio::test]
    async fn saved_at_is_strictly_increasing() {
        let repo = repo(DatabaseConfig::in_memory(), QuotaPolicy::default());
        let mut last = i64::MIN;
        for n in 0..5 {
            let saved = repo.save(&draft(&format!("Plat {n}"))).await.expect("save");
            assert!(saved.saved_at > last);
            last = saved.saved_at;
        }
    }

    #[tokio::test]
    async fn unparseable_primary_image_is_dropped() {
        let repo = repo(DatabaseConfig::in_memory(), QuotaPolicy::default());
        let mut d = draft("Quiche");
        d.primary_image = Some("not a data uri".into());
        let saved = repo.save(&d).await.expect("save");
        let full = repo.get(&saved.id).await.expect("get").expect("present");
        assert!(full.primary_image.is_none());
        assert!(full.thumbnail_image.is_none());
        // The caller's draft comes back as given.
        assert_eq!(saved.primary_image.as_deref(), Some("not a data uri"));
    }

    #[tokio::test]
    async fn exhausted_when_record_alone_exceeds_quota() {
        let repo = repo(
            DatabaseConfig::in_memory().with_quota_bytes(64),
            QuotaPolicy::default(),
        );
        let mut d = draft("Pot-au-feu");
        d.details.chef_comment = Some("x".repeat(500));
        let err = repo.save(&d).await.expect_err("cannot fit");
        assert!(err.is_storage_exhausted());
        assert_eq!(repo.count().await.expect("count"), 0);
    }

    #[tokio::test]
    async fn missing_records_report_absent() {
        let repo = repo(DatabaseConfig::in_memory(), QuotaPolicy::default());
        assert!(repo.get("nope").await.expect("get").is_none());
        assert!(!repo.delete_by_id("nope").await.expect("delete"));
        assert!(repo.list().await.expect("list").is_empty());
        assert!(repo.clear_all().await.expect("clear"));
    }
}
