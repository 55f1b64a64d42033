//! Error types for snapshot and seed pack operations.

use std::io;
use thiserror::Error;

/// Errors that can occur during snapshot and seed pack operations.
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// Manifest is malformed or missing required fields.
    #[error("Invalid manifest: {0}")]
    ManifestInvalid(String),

    /// Stored file does not match the checksum recorded in its manifest.
    #[error("Checksum mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    /// Target container is not running.
    #[error("Container {0} is not running")]
    ContainerNotRunning(String),

    /// An in-container dump or restore command failed.
    #[error("{engine} command failed: {message}")]
    EngineExecutionFailure { engine: String, message: String },

    /// Compressor or decompressor failure.
    #[error("Compression error: {0}")]
    CompressionError(String),

    /// I/O error during file operations.
    #[error(transparent)]
    FileSystemError(#[from] io::Error),

    /// JSON serialization error.
    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),

    /// No snapshot matched the selection criteria.
    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    /// No seed pack with the given name exists.
    #[error("Seed pack not found: {0}")]
    PackNotFound(String),

    /// A seed pack with the same name and version already exists.
    #[error("Seed pack already exists: {0} (use force to overwrite)")]
    PackAlreadyExists(String),

    /// The seed pack exists but not in the requested version.
    #[error("Version {version} of seed pack {pack} not found")]
    VersionNotFound { pack: String, version: String },

    /// A required seed pack dependency is not installed.
    #[error("Unsatisfied dependency: {0}")]
    DependencyUnsatisfied(String),

    /// The operation was cancelled or exceeded its deadline.
    #[error("Operation cancelled or timed out: {0}")]
    CancelledOrTimedOut(String),

    /// Configuration could not be loaded or a service could not be resolved.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The engine identifier has no registered strategy.
    #[error("Unsupported database engine: {0}")]
    UnsupportedEngine(String),
}

impl SnapshotError {
    pub(crate) fn engine(engine: impl Into<String>, message: impl Into<String>) -> Self {
        SnapshotError::EngineExecutionFailure {
            engine: engine.into(),
            message: message.into(),
        }
    }

    pub(crate) fn task_join(e: tokio::task::JoinError) -> Self {
        SnapshotError::FileSystemError(io::Error::other(format!("Task join error: {}", e)))
    }
}
