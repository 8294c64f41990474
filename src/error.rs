use thiserror::Error;

/// Errors surfaced by the alert engine, the transit directory and the stores.
///
/// The request layer decides how each variant is rendered; nothing here knows
/// about transport status codes.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store error")]
    Store(#[source] sqlx::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                let what = db_err.constraint().unwrap_or("unique constraint").to_string();
                return Self::Conflict(format!("duplicate value violates {}", what));
            }
            if db_err.is_foreign_key_violation() {
                let what = db_err.constraint().unwrap_or("foreign key").to_string();
                return Self::NotFound(format!("referenced record missing ({})", what));
            }
        }
        if let sqlx::Error::RowNotFound = err {
            return Self::NotFound("record".to_string());
        }
        Self::Store(err)
    }
}
