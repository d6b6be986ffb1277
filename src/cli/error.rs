//! CLI error types and conversions

use crate::archiver::ArchiveError;
use crate::registry::RegistryError;
use crate::source::SourceError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Registry error
    #[error("registry error: {0}")]
    RegistryError(#[from] RegistryError),

    /// Fatal archive error
    #[error("archive error: {0}")]
    ArchiveError(#[from] ArchiveError),

    /// Source construction error
    #[error("source error: {0}")]
    SourceError(#[from] SourceError),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigurationError(String),
}
