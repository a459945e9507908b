use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParseError(#[from] toml::de::Error),

    #[error("Corrupt slice {}: {reason}", path.display())]
    CorruptSlice { path: PathBuf, reason: String },

    #[error("Codec error for key {key:?}: {reason}")]
    Codec { key: String, reason: String },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Store is locked by another process: {}", .0.display())]
    Locked(PathBuf),

    #[error("Layout mismatch at {}: {reason}", path.display())]
    LayoutMismatch { path: PathBuf, reason: String },

    #[error("Migration source not found: {}", .0.display())]
    MissingSource(PathBuf),

    #[error("Migration incomplete: expected {expected} keys, copied {copied}")]
    MigrationIncomplete { expected: usize, copied: usize },

    #[error("Store is closed")]
    Closed,

    #[error("{0}")]
    Other(String),
}
