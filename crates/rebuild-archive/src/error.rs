use thiserror::Error;

/// Errors surfaced by the archive codecs.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The input carried an archive tag, compression method, or header
    /// variant this toolchain does not handle.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A tar member used a GNU extension the codec refuses to rewrite.
    #[error("unsupported tar entry type {typeflag:?} for {name:?}")]
    UnsupportedTarType { name: String, typeflag: char },

    /// Structural corruption: truncated records, bad signatures, checksum
    /// mismatches, header fields that contradict each other.
    #[error("malformed archive: {0}")]
    Malformed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ArchiveError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }
}
