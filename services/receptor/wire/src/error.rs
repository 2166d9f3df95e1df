//! Multipart stream error types.

use thiserror::Error;

/// Coarse classification of a [`WireError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A payload could not be serialized
    Encoding,
    /// Local file or sink I/O failed
    Io,
    /// Observed size or digest disagrees with the part header
    Integrity,
    /// Caller supplied an unusable argument
    InvalidArgument,
    /// Stream structure could not be parsed
    Malformed,
}

/// Multipart stream errors
#[derive(Error, Debug)]
pub enum WireError {
    /// Structured payload could not be serialized
    #[error("encoding failed for part '{part}': {reason}")]
    Encoding {
        /// Part being encoded
        part: String,
        /// What went wrong
        reason: String,
    },

    /// A structured list held an element that is not a message
    #[error("unsupported element in part '{part}': expected message at index {index}, got {found}")]
    UnsupportedElement {
        /// Part being encoded
        part: String,
        /// Offending position in the list
        index: usize,
        /// Description of what was found instead
        found: &'static str,
    },

    /// I/O failure while building or reading a stream
    #[error("{op} failed for '{part}': {source}")]
    Io {
        /// Part (or path) the operation concerned
        part: String,
        /// Operation that failed
        op: &'static str,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Malformed stream structure
    #[error("malformed stream: {0}")]
    Malformed(String),

    /// Size or digest mismatch for a part
    #[error("integrity check failed for part '{part}': declared {expected_size} bytes / {expected_hash}, observed {actual_size} bytes / {actual_hash}")]
    Integrity {
        /// Part whose body disagrees with its header
        part: String,
        /// Declared size
        expected_size: u64,
        /// Observed size
        actual_size: u64,
        /// Declared hash
        expected_hash: String,
        /// Observed hash
        actual_hash: String,
    },
}

impl WireError {
    /// Wrap an I/O error with the part and operation it happened in
    pub fn io(part: impl Into<String>, op: &'static str, source: std::io::Error) -> Self {
        WireError::Io {
            part: part.into(),
            op,
            source,
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            WireError::Encoding { .. } | WireError::UnsupportedElement { .. } => ErrorKind::Encoding,
            WireError::Io { .. } => ErrorKind::Io,
            WireError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            WireError::Malformed(_) => ErrorKind::Malformed,
            WireError::Integrity { .. } => ErrorKind::Integrity,
        }
    }

    /// Whether the error came from a missing file
    pub fn is_not_found(&self) -> bool {
        matches!(self, WireError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}
