//! Error types for recordar

use std::path::PathBuf;

/// Result type alias for recordar operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while configuring or running incremental stages
///
/// Every variant aborts the current stage. Recovery across restarts happens
/// through checkpoint probing, never by retrying in-process.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unknown strategy name, invalid hyperparameter or inconsistent options
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Bootstrap from a base stage was requested but no base checkpoint exists
    #[error("Base model not found: {}", path.display())]
    MissingBaseCheckpoint {
        /// Directory that was expected to hold the base checkpoint
        path: PathBuf,
    },

    /// Degenerate or inconsistent data (too few samples, label out of range, shape mismatch)
    #[error("Data error: {0}")]
    Data(String),

    /// Malformed checkpoint or weights that do not fit the model
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_base_names_path() {
        let err = Error::MissingBaseCheckpoint {
            path: PathBuf::from("result/demo/base_10/seed_1993/x/group_1/checkpoints/1st_stage"),
        };
        let msg = err.to_string();
        assert!(msg.contains("Base model not found"));
        assert!(msg.contains("group_1/checkpoints/1st_stage"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(ref m) if m.contains("gone")));
    }
}
