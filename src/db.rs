use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite, SqlitePool};

use crate::config::DatabaseConfig;
use crate::{migrate, AppError, AppResult};

type OpenFuture = Shared<BoxFuture<'static, AppResult<SqlitePool>>>;

enum OpenState {
    Closed,
    Opening { generation: u64, fut: OpenFuture },
    Ready(SqlitePool),
}

struct Inner {
    config: DatabaseConfig,
    state: Mutex<OpenState>,
    generation: Mutex<u64>,
}

/// Lazily opened, schema-upgraded SQLite handle.
///
/// Concurrent `open` calls made while the first open is in flight all await
/// the same future, so connection setup and upgrades run once. A failed open
/// is reported to every waiter and leaves the handle closed; the next call
/// starts a fresh attempt.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

impl Database {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(OpenState::Closed),
                generation: Mutex::new(0),
            }),
        }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.inner.config
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.lock_state(), OpenState::Ready(_))
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, OpenState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub async fn open(&self) -> AppResult<SqlitePool> {
        let (generation, fut) = {
            let mut state = self.lock_state();
            match &*state {
                OpenState::Ready(pool) => return Ok(pool.clone()),
                OpenState::Opening { generation, fut } => (*generation, fut.clone()),
                OpenState::Closed => {
                    let generation = {
                        let mut counter =
                            self.inner.generation.lock().unwrap_or_else(|e| e.into_inner());
                        *counter += 1;
                        *counter
                    };
                    let config = self.inner.config.clone();
                    let fut = async move { open_sqlite_pool(&config).await }
                        .boxed()
                        .shared();
                    *state = OpenState::Opening {
                        generation,
                        fut: fut.clone(),
                    };
                    (generation, fut)
                }
            }
        };

        let result = fut.await;

        let mut state = self.lock_state();
        let current = matches!(
            &*state,
            OpenState::Opening { generation: g, .. } if *g == generation
        );
        if current {
            *state = match &result {
                Ok(pool) => OpenState::Ready(pool.clone()),
                Err(_) => OpenState::Closed,
            };
        }
        result
    }

    /// Close the pool and return to the closed state.
    pub async fn close(&self) {
        let previous = std::mem::replace(&mut *self.lock_state(), OpenState::Closed);
        if let OpenState::Ready(pool) = previous {
            pool.close().await;
        }
    }
}

async fn open_sqlite_pool(config: &DatabaseConfig) -> AppResult<SqlitePool> {
    let pool = connect(config)
        .await
        .map_err(AppError::store_unavailable)?;
    let version = migrate::apply_migrations(&pool).await.map_err(|err| {
        tracing::error!(target: "cuisto", event = "schema_upgrade_failed", error = %err);
        AppError::store_unavailable(err)
    })?;
    log_effective_pragmas(&pool, version).await;
    Ok(pool)
}

async fn connect(config: &DatabaseConfig) -> AppResult<SqlitePool> {
    let (opts, max_connections) = match &config.path {
        Some(db_path) => {
            if let Some(dir) = db_path.parent() {
                std::fs::create_dir_all(dir).map_err(|e| {
                    tracing::error!(
                        target: "cuisto",
                        event = "db_dir_create_failed",
                        error = %e,
                        path = %dir.display()
                    );
                    AppError::from(e).with_context("path", dir.display().to_string())
                })?;
            }
            tracing::info!(target: "cuisto", event = "db_path", path = %db_path.display());
            let opts = SqliteConnectOptions::new()
                .filename(db_path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Full);
            (opts, config.max_connections.max(1))
        }
        // Every in-memory connection is its own database, so keep exactly one.
        None => (SqliteConnectOptions::from_str("sqlite::memory:")?, 1),
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .idle_timeout(None::<Duration>)
        .max_lifetime(None::<Duration>)
        .after_connect(|conn, _| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys=ON;")
                    .execute(&mut *conn)
                    .await?;
                sqlx::query("PRAGMA busy_timeout = 5000;")
                    .execute(&mut *conn)
                    .await?;
                Ok::<_, sqlx::Error>(())
            })
        })
        .connect_with(opts)
        .await?;
    Ok(pool)
}

async fn log_effective_pragmas(pool: &Pool<Sqlite>, schema_version: i64) {
    use tracing::{info, warn};

    let (sqlite_ver,): (String,) = sqlx::query_as("select sqlite_version()")
        .fetch_one(pool)
        .await
        .unwrap_or((String::from("unknown"),));

    let jm: (String,) = sqlx::query_as("PRAGMA journal_mode;")
        .fetch_one(pool)
        .await
        .unwrap_or((String::from("unknown"),));

    let fks: (i64,) = sqlx::query_as("PRAGMA foreign_keys;")
        .fetch_one(pool)
        .await
        .unwrap_or((i64::MIN,));

    info!(
        target: "cuisto",
        event = "db_open",
        sqlite_version = %sqlite_ver,
        journal_mode = %jm.0,
        foreign_keys = %fks.0,
        schema_version = schema_version
    );

    if !jm.0.eq_ignore_ascii_case("wal") && !jm.0.eq_ignore_ascii_case("memory") {
        warn!(
            target: "cuisto",
            event = "db_open_warning",
            msg = "journal_mode != WAL; running with reduced crash safety"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn open_is_idempotent() {
        let db = Database::new(DatabaseConfig::in_memory());
        assert!(!db.is_ready());
        let first = db.open().await.expect("open");
        sqlx::query("INSERT INTO settings (key, value, updated_at) VALUES ('k', 'v', 0)")
            .execute(&first)
            .await
            .expect("insert");
        let second = db.open().await.expect("reopen");
        let value: String = sqlx::query_scalar("SELECT value FROM settings WHERE key = 'k'")
            .fetch_one(&second)
            .await
            .expect("same database");
        assert_eq!(value, "v");
        assert!(db.is_ready());
    }

    #[tokio::test]
    async fn open_runs_all_upgrades() {
        let db = Database::new(DatabaseConfig::in_memory());
        let pool = db.open().await.expect("open");
        let version = migrate::current_version(&pool).await.expect("version");
        assert_eq!(version, migrate::SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn failed_open_can_be_retried() {
        let dir = tempdir().expect("tempdir");
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").expect("write blocker");

        let db = Database::new(DatabaseConfig::at_path(blocker.join("cuisto.sqlite3")));
        let err = db.open().await.err().expect("open should fail");
        assert!(err.is_store_unavailable());
        assert!(!db.is_ready());

        std::fs::remove_file(&blocker).expect("remove blocker");
        db.open().await.expect("retry succeeds");
        assert!(db.is_ready());
        db.close().await;
        assert!(!db.is_ready());
    }
}
