use thiserror::Error;

/// Main error type for nanocrud core operations
#[derive(Debug, Error)]
pub enum NanocrudError {
    #[error("invalid collection name: {0}")]
    InvalidName(String),

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("corrupt datafile {path}: {bad} of {total} lines unreadable")]
    Corrupt {
        path: String,
        bad: usize,
        total: usize,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl NanocrudError {
    /// Stable error code for structured responses
    pub fn error_code(&self) -> &'static str {
        match self {
            NanocrudError::InvalidName(_) => "invalid_name",
            NanocrudError::InvalidArgs(_) => "invalid_args",
            NanocrudError::Conflict(_) => "conflict",
            NanocrudError::Corrupt { .. } => "corrupt_datafile",
            NanocrudError::Io(_) => "io_error",
            NanocrudError::Json(_) => "invalid_args",
            NanocrudError::TomlParse(_) => "invalid_args",
            NanocrudError::Internal(_) => "internal_error",
        }
    }

    /// Whether the caller is at fault (bad name, bad query, malformed JSON)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            NanocrudError::InvalidName(_)
                | NanocrudError::InvalidArgs(_)
                | NanocrudError::Conflict(_)
                | NanocrudError::Json(_)
        )
    }

    /// Shorthand for an `InvalidArgs` error
    pub fn invalid(msg: impl Into<String>) -> Self {
        NanocrudError::InvalidArgs(msg.into())
    }
}
