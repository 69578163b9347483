use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SecretError {
    #[error("Failed to read secret file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed secret file {path:?}: {source}")]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid secret reference: {0:?} must be a plain file name")]
    InvalidRef(String),
}
