use thiserror::Error;

/// Convenient alias for fallible results returned throughout the crate.
pub type Result<T> = std::result::Result<T, FieldOpsError>;

#[derive(Error, Debug)]
pub enum FieldOpsError {
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Image error: {0}")]
    ImageError(#[from] image::ImageError),
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("Database error: {0}")]
    DatabaseError(#[from] rocksdb::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Unsupported file type: {content_type}. Supported: {supported}")]
    UnsupportedMediaType {
        content_type: String,
        supported: String,
    },
    #[error("File too large. Maximum size: {limit} bytes")]
    PayloadTooLarge { limit: usize },
    #[error("OCR error: {0}")]
    OcrError(String),
    #[error("Remote API returned {status}: {body}")]
    RemoteError { status: u16, body: String },
    #[error("Xero is not connected")]
    NotConnected,
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Internal error: {0}")]
    InternalError(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl FieldOpsError {
    /// Whether a failed remote call is worth repeating.
    pub fn is_transient(&self) -> bool {
        match self {
            FieldOpsError::RemoteError { status, .. } => *status == 429 || *status >= 500,
            FieldOpsError::HttpError(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}
