//! Error taxonomy for node and action execution
//!
//! Infrastructure failures (SQLite, serialization) travel as `anyhow::Error`.
//! The types here classify what went wrong *inside* a workflow so the engine
//! can decide between retrying, failing, or completing.

use thiserror::Error;

/// Failure of a single node attempt
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NodeError {
    /// The workflow definition is wrong (missing wait mode, unknown operator, ...)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A template or timestamp could not be resolved
    #[error("resolution error: {0}")]
    Resolution(String),

    /// An action failed in a way that may succeed later
    #[error("transient action error: {0}")]
    Transient(String),
}

impl NodeError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn resolution(msg: impl Into<String>) -> Self {
        Self::Resolution(msg.into())
    }

    /// Only transient failures are eligible for the retry policy
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Short machine-readable kind, stored alongside log rows
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Resolution(_) => "resolution",
            Self::Transient(_) => "transient",
        }
    }
}

/// Failure reported by an action executor
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActionError {
    /// Parameters are missing or malformed; retrying cannot help
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// Delivery or storage failed; the attempt may be retried
    #[error("{0}")]
    Failed(String),
}

impl ActionError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidParams(msg.into())
    }

    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

impl From<ActionError> for NodeError {
    fn from(err: ActionError) -> Self {
        match err {
            ActionError::InvalidParams(msg) => NodeError::Configuration(msg),
            ActionError::Failed(msg) => NodeError::Transient(msg),
        }
    }
}

/// Constraint violations are deterministic: the same write fails the same way
fn is_constraint_violation(err: &sqlx::Error) -> bool {
    use sqlx::error::ErrorKind;

    match err {
        sqlx::Error::Database(db) => matches!(
            db.kind(),
            ErrorKind::UniqueViolation
                | ErrorKind::ForeignKeyViolation
                | ErrorKind::NotNullViolation
                | ErrorKind::CheckViolation
        ),
        _ => false,
    }
}

impl From<sqlx::Error> for ActionError {
    fn from(err: sqlx::Error) -> Self {
        if is_constraint_violation(&err) {
            ActionError::InvalidParams(format!("constraint violated: {err}"))
        } else {
            ActionError::Failed(format!("database error: {err}"))
        }
    }
}

impl From<anyhow::Error> for ActionError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<sqlx::Error>() {
            Ok(db) => db.into(),
            Err(err) => ActionError::Failed(err.to_string()),
        }
    }
}
