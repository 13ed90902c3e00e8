use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;

use anyhow::Error as AnyhowError;
use serde::{Deserialize, Serialize};
use serde_json::error::Category as JsonCategory;
use serde_json::Error as SerdeJsonError;
use sqlx::Error as SqlxError;
use std::io::Error as IoError;
use ts_rs::TS;

/// SQLite primary result code for `SQLITE_FULL`.
const SQLITE_FULL: &str = "13";

/// A structured storage error that can be serialized and surfaced to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct AppError {
    /// Machine readable error code.
    pub code: String,
    /// Human friendly message that can be shown directly to the user.
    pub message: String,
    /// Arbitrary key/value pairs that provide additional context.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    #[ts(optional, as = "Option<HashMap<String, String>>")]
    pub context: HashMap<String, String>,
    /// Optional nested cause that preserves the error chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub cause: Option<Box<AppError>>,
}

pub type AppResult<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Code for upstream errors that carry no code of their own.
    pub const INTERNAL_CODE: &'static str = "STORE/INTERNAL";
    /// The database could not be opened or upgraded.
    pub const STORE_UNAVAILABLE_CODE: &'static str = "STORE/UNAVAILABLE";
    /// A single write was rejected because the storage budget is spent.
    pub const QUOTA_EXCEEDED_CODE: &'static str = "STORE/QUOTA_EXCEEDED";
    /// Every degradation tier was tried and the write still did not fit.
    pub const STORAGE_EXHAUSTED_CODE: &'static str = "STORE/EXHAUSTED";

    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError {
            code: code.into(),
            message: message.into(),
            context: HashMap::new(),
            cause: None,
        }
    }

    pub fn store_unavailable(cause: impl Into<AppError>) -> Self {
        AppError::new(Self::STORE_UNAVAILABLE_CODE, "Could not open the recipe store")
            .with_cause(cause)
    }

    pub fn quota_exceeded(needed: u64, budget: u64) -> Self {
        AppError::new(Self::QUOTA_EXCEEDED_CODE, "Storage quota exceeded")
            .with_context("needed_bytes", needed.to_string())
            .with_context("quota_bytes", budget.to_string())
    }

    pub fn storage_exhausted() -> Self {
        AppError::new(Self::STORAGE_EXHAUSTED_CODE, "Could not save: storage is full")
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn is_quota_exceeded(&self) -> bool {
        self.code == Self::QUOTA_EXCEEDED_CODE
    }

    pub fn is_storage_exhausted(&self) -> bool {
        self.code == Self::STORAGE_EXHAUSTED_CODE
    }

    pub fn is_store_unavailable(&self) -> bool {
        self.code == Self::STORE_UNAVAILABLE_CODE
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_cause(mut self, cause: impl Into<AppError>) -> Self {
        self.cause = Some(Box::new(cause.into()));
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.context.is_empty() {
            write!(f, "[{}] {}", self.code, self.message)
        } else {
            write!(f, "[{}] {} ({:?})", self.code, self.message, self.context)
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

impl From<AnyhowError> for AppError {
    fn from(error: AnyhowError) -> Self {
        fn convert(err: &(dyn StdError + 'static)) -> AppError {
            if let Some(app) = err.downcast_ref::<AppError>() {
                return app.clone();
            }

            let mut root = AppError::new(AppError::INTERNAL_CODE, err.to_string());
            if let Some(source) = err.source() {
                root.cause = Some(Box::new(convert(source)));
            }
            root
        }

        convert(error.as_ref())
    }
}

impl From<IoError> for AppError {
    fn from(error: IoError) -> Self {
        let code = format!("IO/{:?}", error.kind());
        let mut app_error = AppError::new(code, error.to_string());
        if let Some(os_code) = error.raw_os_error() {
            app_error = app_error.with_context("os_code", os_code.to_string());
        }
        app_error
    }
}

impl From<SerdeJsonError> for AppError {
    fn from(error: SerdeJsonError) -> Self {
        let code = match error.classify() {
            JsonCategory::Io => "JSON/IO",
            JsonCategory::Syntax => "JSON/SYNTAX",
            JsonCategory::Data => "JSON/DATA",
            JsonCategory::Eof => "JSON/EOF",
        };
        let app_error = AppError::new(code, error.to_string());
        if error.line() == 0 {
            return app_error;
        }
        app_error
            .with_context("line", error.line().to_string())
            .with_context("column", error.column().to_string())
    }
}

impl From<SqlxError> for AppError {
    fn from(error: SqlxError) -> Self {
        match error {
            SqlxError::Io(err) => AppError::from(err).with_context("source", "sqlx"),
            SqlxError::Database(db) => {
                let code = db.code().map(|code| code.into_owned());
                match code.as_deref() {
                    // A full disk is reported like a spent budget.
                    Some(SQLITE_FULL) => AppError::new(Self::QUOTA_EXCEEDED_CODE, db.message())
                        .with_context("sqlite_code", SQLITE_FULL),
                    Some(code) => AppError::new(format!("SQLITE/{code}"), db.message()),
                    None => AppError::new("SQLX/DATABASE", db.message()),
                }
            }
            SqlxError::PoolClosed => AppError::new("STORE/CLOSED", "The recipe store is closed"),
            other => AppError::new("SQLX/ERROR", other.to_string()),
        }
    }
}
