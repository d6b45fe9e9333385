//! Error types for the command-line front end.

use std::path::PathBuf;

use sqlmirror_core::error::ModelError;

/// Errors that can occur while loading inputs or writing scripts.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Reading or writing a file failed.
    #[error("IO error on '{path}': {source}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The input document is not valid JSON or does not match the format.
    #[error("Failed to parse migration input '{path}': {source}")]
    Json {
        /// Input document.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },

    /// The diff does not fit the snapshots it claims to connect.
    #[error("Invalid migration: {0}")]
    Model(#[from] ModelError),

    /// The input is well-formed but unusable.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for CLI operations.
pub type Result<T> = std::result::Result<T, CliError>;
