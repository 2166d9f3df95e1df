//! Reporting error types.

use receptor_grpc::TransportError;
use receptor_wire::WireError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while packaging or reporting an evidence bundle
#[derive(Error, Debug)]
pub enum ReportError {
    /// Building or reading the multipart stream failed
    #[error(transparent)]
    Wire(#[from] WireError),

    /// Transmission failed; the bundle is undelivered
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Spool or source file I/O failed
    #[error("{op} failed for {}: {source}", path.display())]
    Io {
        /// File concerned
        path: PathBuf,
        /// Operation that failed
        op: &'static str,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The bundle carries no evidence to report
    #[error("bundle has no evidence")]
    EmptyBundle,

    /// Packaging was cancelled before the spool was complete
    #[error("bundle packaging cancelled")]
    Cancelled,

    /// The evidence model could not be turned into parts
    #[error("evidence encoding failed: {0}")]
    Encoding(String),
}

impl ReportError {
    /// Wrap an I/O error with the file and operation it happened in
    pub fn io(path: impl Into<PathBuf>, op: &'static str, source: std::io::Error) -> Self {
        ReportError::Io {
            path: path.into(),
            op,
            source,
        }
    }

    /// Whether the failure happened after the bundle was handed to the transport
    pub fn is_transport(&self) -> bool {
        matches!(self, ReportError::Transport(_))
    }
}
