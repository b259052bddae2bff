use thiserror::Error;

#[derive(Error, Debug)]
pub enum MarketAiError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Database pool not initialized")]
    NotInitialized,

    #[error("Query contains disallowed statements")]
    DisallowedStatement { reason: String },

    #[error("{0}")]
    Connection(String),

    #[error("{0}")]
    Execution(String),

    #[error("Database returned empty schema. Please check if the database contains tables.")]
    EmptySchema,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MarketAiError {
    /// Wraps a driver error, keeping only the server's message when there is one.
    pub fn execution(err: sqlx::Error) -> Self {
        match err.as_database_error() {
            Some(db_err) => Self::Execution(db_err.message().to_string()),
            None => Self::Execution(err.to_string()),
        }
    }

    pub fn is_user_error(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }
}

impl From<MarketAiError> for rmcp::ErrorData {
    fn from(err: MarketAiError) -> Self {
        if err.is_user_error() {
            rmcp::ErrorData::invalid_params(err.to_string(), None)
        } else {
            rmcp::ErrorData::internal_error(err.to_string(), None)
        }
    }
}
