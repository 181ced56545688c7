use thiserror::Error;

#[derive(Debug, Error)]
pub enum MuseError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("LLM provider error: {0}")]
    LlmProvider(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Clock error: {0}")]
    Clock(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MuseError {
    /// Short error code string used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            MuseError::Config(_) => "CONFIG_ERROR",
            MuseError::Validation(_) => "VALIDATION_ERROR",
            MuseError::Database(_) => "DATABASE_ERROR",
            MuseError::Search(_) => "SEARCH_ERROR",
            MuseError::LlmProvider(_) => "LLM_PROVIDER_ERROR",
            MuseError::Archive(_) => "ARCHIVE_ERROR",
            MuseError::Clock(_) => "CLOCK_ERROR",
            MuseError::Crypto(_) => "CRYPTO_ERROR",
            MuseError::Serialization(_) => "SERIALIZATION_ERROR",
            MuseError::Io(_) => "IO_ERROR",
            MuseError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, MuseError>;
