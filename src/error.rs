use serde_json::json;

/// Failure surfaced to the caller as `{code, message, details?}`.
#[derive(Debug, Clone)]
pub struct AppError {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl AppError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(what: &str, id: &str) -> Self {
        Self::new("not_found", format!("{} not found", what)).with_details(json!({ "id": id }))
    }

    pub fn invalid_transition(entity: &str, from: &str, to: &str) -> Self {
        Self::new(
            "invalid_transition",
            format!("{} cannot move from {} to {}", entity, from, to),
        )
        .with_details(json!({ "from": from, "to": to }))
    }

    pub fn db(e: rusqlite::Error) -> Self {
        if is_foreign_key_violation(&e) {
            return Self::new("restricted", "operation violates a foreign key constraint");
        }
        Self::new("db_query_failed", e.to_string())
    }

    pub fn internal(e: anyhow::Error) -> Self {
        Self::new("internal", format!("{e:#}"))
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::db(e)
    }
}

fn is_foreign_key_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY
    )
}

pub type AppResult<T> = Result<T, AppError>;
