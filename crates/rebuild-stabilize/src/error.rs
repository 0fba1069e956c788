use rebuild_archive::ArchiveError;
use thiserror::Error;

/// Errors surfaced by stabilization and summarization.
#[derive(Debug, Error)]
pub enum StabilizeError {
    /// The requested format cannot be stabilized or summarized.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A user-declared rule failed validation: empty reason, empty path
    /// list, empty path string, uncompilable pattern, or an entry with zero
    /// or more than one rule shape.
    #[error("invalid custom stabilizer: {0}")]
    InvalidCustomStabilizer(String),

    #[error(transparent)]
    Archive(#[from] ArchiveError),
}
