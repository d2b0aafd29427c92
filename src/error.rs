use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("signal pattern must not be empty")]
    EmptyPattern,

    #[error("invalid regex in pattern '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },

    #[error("unknown signal kind: {0}")]
    UnknownKind(String),

    #[error("duplicate signal: {id}")]
    DuplicateSignal { id: i64 },

    #[error("store error: {0}")]
    Store(String),

    #[error("store call '{operation}' timed out after {timeout_ms}ms")]
    StoreTimeout {
        operation: &'static str,
        timeout_ms: u64,
    },
}

impl From<sqlx::Error> for SignalError {
    fn from(e: sqlx::Error) -> Self {
        SignalError::Store(e.to_string())
    }
}
