use thiserror::Error;

#[derive(Error, Debug)]
pub enum RestoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Processing failed: {0}")]
    ProcessingError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("ExifTool error: {0}")]
    ExifTool(#[from] crate::exiftool::ExifToolError),
}

pub type Result<T> = std::result::Result<T, RestoreError>;
