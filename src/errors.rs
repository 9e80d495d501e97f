use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(String),
    #[error("Mail provider error: {0}")]
    Provider(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    /// Wraps a storage-layer failure, preserving the anyhow context chain.
    pub fn db(err: anyhow::Error) -> Self {
        AppError::Database(format!("{err:#}"))
    }

    pub fn provider(err: anyhow::Error) -> Self {
        AppError::Provider(format!("{err:#}"))
    }
}
