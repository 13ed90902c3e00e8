//! Schema upgrades keyed on SQLite's `user_version`.
//!
//! Every step is additive and safe to replay: tables and indexes use
//! `IF NOT EXISTS`, and `ALTER TABLE .. ADD COLUMN` is skipped when the
//! column is already present.

use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub sql: &'static str,
}

pub static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "0001_recipes_settings.sql",
        sql: include_str!("../migrations/0001_recipes_settings.sql"),
    },
    Migration {
        version: 2,
        name: "0002_recipes_stored_bytes.sql",
        sql: include_str!("../migrations/0002_recipes_stored_bytes.sql"),
    },
];

/// Version the code expects after all upgrades have run.
pub const SCHEMA_VERSION: i64 = 2;

static ADD_COLUMN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^ALTER\s+TABLE\s+(\w+)\s+ADD\s+COLUMN\s+(\w+)").expect("valid regex")
});

fn preview(sql: &str) -> String {
    let one_line = sql.replace(['\n', '\t'], " ");
    let trimmed = one_line.trim();
    if trimmed.chars().count() > 160 {
        let cut: String = trimmed.chars().take(160).collect();
        format!("{cut}…")
    } else {
        trimmed.to_string()
    }
}

fn statements(raw_sql: &str) -> Vec<String> {
    let cleaned = raw_sql
        .lines()
        .filter(|line| {
            let t = line.trim_start();
            !(t.is_empty() || t.starts_with("--"))
        })
        .collect::<Vec<_>>()
        .join("\n");
    cleaned
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub async fn current_version(pool: &SqlitePool) -> anyhow::Result<i64> {
    let version: i64 = sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(pool)
        .await?;
    Ok(version)
}

pub async fn apply_migrations(pool: &SqlitePool) -> anyhow::Result<i64> {
    apply_steps(pool, MIGRATIONS).await
}

/// Run every step newer than the stored version, each in its own
/// transaction that also bumps `user_version`. Returns the final version.
pub async fn apply_steps(pool: &SqlitePool, steps: &[Migration]) -> anyhow::Result<i64> {
    let mut version = current_version(pool).await?;
    let target = steps.iter().map(|m| m.version).max().unwrap_or(version);
    if version > target {
        warn!(
            target: "cuisto",
            event = "schema_newer_than_code",
            stored_version = version,
            code_version = target
        );
        return Ok(version);
    }

    let start = version;
    for step in steps.iter().filter(|m| m.version > start) {
        let mut tx = pool.begin().await?;
        for stmt in statements(step.sql) {
            if let Some(caps) = ADD_COLUMN_RE.captures(&stmt) {
                let table = caps.get(1).map_or("", |m| m.as_str());
                let column = caps.get(2).map_or("", |m| m.as_str());
                if column_exists(&mut tx, table, column).await? {
                    info!(
                        target: "cuisto",
                        event = "migration_stmt_skip",
                        file = %step.name,
                        sql = %preview(&stmt)
                    );
                    continue;
                }
            }
            info!(
                target: "cuisto",
                event = "migration_stmt",
                file = %step.name,
                sql = %preview(&stmt)
            );
            if let Err(e) = sqlx::query(&stmt).execute(&mut *tx).await {
                error!(
                    target: "cuisto",
                    event = "migration_stmt_error",
                    file = %step.name,
                    sql = %preview(&stmt),
                    error = %e
                );
                return Err(e.into());
            }
        }
        // PRAGMA arguments cannot be bound; the version is an integer we own.
        sqlx::query(&format!("PRAGMA user_version = {}", step.version))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        version = step.version;
        info!(
            target: "cuisto",
            event = "migration_step_applied",
            file = %step.name,
            version = step.version
        );
    }

    Ok(version)
}

async fn column_exists(
    tx: &mut Transaction<'_, Sqlite>,
    table: &str,
    column: &str,
) -> anyhow::Result<bool> {
    let found: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM pragma_table_info(?1) WHERE name = ?2")
            .bind(table)
            .bind(column)
            .fetch_optional(&mut **tx)
            .await?;
    Ok(found.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statements_skip_comments_and_blank_lines() {
        let sql = "-- header\nCREATE TABLE a (x INTEGER);\n\n  -- note\nCREATE INDEX i ON a(x);\n";
        let stmts = statements(sql);
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].starts_with("CREATE TABLE a"));
        assert!(stmts[1].starts_with("CREATE INDEX i"));
    }

    #[test]
    fn add_column_statements_are_recognised() {
        let caps = ADD_COLUMN_RE
            .captures("alter table recipes add column stored_bytes INTEGER")
            .expect("matches");
        assert_eq!(&caps[1], "recipes");
        assert_eq!(&caps[2], "stored_bytes");
        assert!(ADD_COLUMN_RE.captures("CREATE TABLE t (x)").is_none());
    }

    #[test]
    fn schema_version_matches_last_migration() {
        assert_eq!(
            MIGRATIONS.last().map(|m| m.version),
            Some(SCHEMA_VERSION)
        );
        assert!(MIGRATIONS.windows(2).all(|w| w[0].version < w[1].version));
    }

    #[test]
    fn preview_truncates_long_sql() {
        let long = "x".repeat(400);
        assert!(preview(&long).ends_with('…'));
        assert_eq!(preview("SELECT\n1"), "SELECT 1");
    }
}
