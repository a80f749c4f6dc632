use std::path::PathBuf;

/// Error types for reference operations.
#[derive(Debug, thiserror::Error)]
pub enum RefError {
    #[error("invalid ref name: {0}")]
    InvalidName(String),

    #[error("ref not found: {0}")]
    NotFound(String),

    #[error("not a valid ref: {name}: '{content}'")]
    Malformed { name: String, content: String },

    #[error("cannot lock '{path}'")]
    LockFailed { path: PathBuf },

    #[error("unable to write '{path}': {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("symbolic refs cannot be peeled")]
    PeelNotSupported,

    #[error("no new value provided for update of '{0}'")]
    NoNewValue(String),

    #[error("lock file error: {0}")]
    Lock(#[from] refdb_utils::LockError),

    #[error(transparent)]
    Hash(#[from] refdb_hash::HashError),

    #[error("I/O error on {path}: {source}")]
    IoPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
