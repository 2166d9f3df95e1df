//! Transport error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while moving a spool to or from the collector
#[derive(Error, Debug)]
pub enum TransportError {
    /// The streaming call could not be opened
    #[error("failed to open report stream: {0}")]
    Open(String),

    /// A unit could not be sent; the stream is abandoned
    #[error("failed to send chunk {chunk}: {reason}")]
    Send {
        /// Zero-based unit index (the boundary declaration is unit 0)
        chunk: u64,
        /// Underlying cause
        reason: String,
    },

    /// Closing the send side or receiving the acknowledgement failed
    #[error("failed to close report stream: {0}")]
    Close(String),

    /// Local spool I/O failed
    #[error("spool {op} failed for {}: {source}", path.display())]
    Spool {
        /// Spool path
        path: PathBuf,
        /// Operation that failed
        op: &'static str,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The caller cancelled the transmission
    #[error("report stream cancelled")]
    Cancelled,

    /// The unit sequence violated the stream protocol
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The collector rejected the call
    #[error("collector returned status: {0}")]
    Status(#[from] tonic::Status),
}

impl TransportError {
    /// Wrap a spool I/O error
    pub fn spool(path: impl Into<PathBuf>, op: &'static str, source: std::io::Error) -> Self {
        TransportError::Spool {
            path: path.into(),
            op,
            source,
        }
    }

    /// Whether the error came from cancellation rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransportError::Cancelled)
    }
}
