use homefront_scanner::ScanError;
use thiserror::Error;

/// Setup-level failures. Per-target problems never surface here.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error("Invalid target list {path}: {message}")]
    TargetList { path: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
