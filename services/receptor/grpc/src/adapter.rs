//! Chunked transmission of a finished spool over one streaming call.
//!
//! ```text
//! Init -> SendBoundary -> StreamBody -> Close -> Completed
//!   \          \              \           \
//!    +----------+--------------+-----------+--> Failed
//! ```
//!
//! The declaration unit always goes first and exactly once. Every payload
//! unit is `chunk_size` bytes except possibly the last; an empty spool sends
//! no payload units. A failed send abandons the call with no retry.

use crate::error::TransportError;
use crate::proto::receptor_v1::ReportChunk;
use crate::stream::{CancelSignal, ReportStream, StreamOpener};
use bytes::Bytes;
use std::future::Future;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

/// Default payload unit size (1 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Adapter progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    /// Nothing sent yet
    Init,
    /// Sending the boundary declaration
    SendBoundary,
    /// Sending spool bytes
    StreamBody,
    /// Waiting for the acknowledgement
    Close,
    /// Acknowledged
    Completed,
    /// Abandoned
    Failed,
}

/// Outcome of a completed transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransmitSummary {
    /// Payload units sent (excluding the declaration)
    pub chunks: u64,
    /// Payload bytes sent
    pub bytes: u64,
}

/// Sends a spool as declaration unit + fixed-size payload units
pub struct ChunkedStreamAdapter<'a> {
    opener: &'a dyn StreamOpener,
    chunk_size: usize,
    cancel: CancelSignal,
    state: AdapterState,
}

impl<'a> ChunkedStreamAdapter<'a> {
    /// Create an adapter; a `chunk_size` of zero selects [`DEFAULT_CHUNK_SIZE`]
    pub fn new(opener: &'a dyn StreamOpener, chunk_size: usize) -> Self {
        Self {
            opener,
            chunk_size: if chunk_size == 0 { DEFAULT_CHUNK_SIZE } else { chunk_size },
            cancel: CancelSignal::never(),
            state: AdapterState::Init,
        }
    }

    /// Abort promptly when `cancel` fires
    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    /// Current state
    pub fn state(&self) -> AdapterState {
        self.state
    }

    /// Payload unit size in effect
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Transmit the spool at `spool_path`, declaring it with `content_type`.
    ///
    /// The spool itself is left in place; its owner removes it.
    pub async fn transmit(&mut self, spool_path: &Path, content_type: &str) -> Result<TransmitSummary, TransportError> {
        if self.state != AdapterState::Init {
            return Err(TransportError::Protocol(format!(
                "adapter already used (state {:?})",
                self.state
            )));
        }
        match self.run(spool_path, content_type).await {
            Ok(summary) => {
                self.transition(AdapterState::Completed);
                info!(
                    spool = %spool_path.display(),
                    chunks = summary.chunks,
                    bytes = summary.bytes,
                    "Spool transmitted"
                );
                Ok(summary)
            }
            Err(e) => {
                self.transition(AdapterState::Failed);
                warn!(spool = %spool_path.display(), error = %e, "Spool transmission failed");
                Err(e)
            }
        }
    }

    async fn run(&mut self, spool_path: &Path, content_type: &str) -> Result<TransmitSummary, TransportError> {
        let mut cancel = self.cancel.clone();
        let opener = self.opener;

        let mut stream = guarded(&mut cancel, opener.open()).await??;

        self.transition(AdapterState::SendBoundary);
        let declaration = ReportChunk {
            content: Bytes::copy_from_slice(content_type.as_bytes()),
            is_boundary: true,
        };
        send_unit(&mut cancel, stream.as_mut(), declaration, 0).await?;

        self.transition(AdapterState::StreamBody);
        let mut file = guarded(&mut cancel, File::open(spool_path))
            .await?
            .map_err(|e| TransportError::spool(spool_path, "open", e))?;

        let mut buf = vec![0u8; self.chunk_size];
        let mut summary = TransmitSummary { chunks: 0, bytes: 0 };
        loop {
            let n = guarded(&mut cancel, fill(&mut file, &mut buf))
                .await?
                .map_err(|e| TransportError::spool(spool_path, "read", e))?;
            if n == 0 {
                break;
            }
            let unit = ReportChunk {
                content: Bytes::copy_from_slice(&buf[..n]),
                is_boundary: false,
            };
            send_unit(&mut cancel, stream.as_mut(), unit, summary.chunks + 1).await?;
            summary.chunks += 1;
            summary.bytes += n as u64;
            if n < buf.len() {
                break;
            }
        }

        self.transition(AdapterState::Close);
        guarded(&mut cancel, stream.close_and_receive()).await??;
        Ok(summary)
    }

    fn transition(&mut self, next: AdapterState) {
        debug!(from = ?self.state, to = ?next, "Adapter state change");
        self.state = next;
    }
}

/// Run `fut` unless cancellation fires first
async fn guarded<F: Future>(cancel: &mut CancelSignal, fut: F) -> Result<F::Output, TransportError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransportError::Cancelled),
        out = fut => Ok(out),
    }
}

async fn send_unit(
    cancel: &mut CancelSignal,
    stream: &mut dyn ReportStream,
    unit: ReportChunk,
    index: u64,
) -> Result<(), TransportError> {
    match guarded(cancel, stream.send(unit)).await? {
        Ok(()) => Ok(()),
        Err(TransportError::Status(status)) => Err(TransportError::Status(status)),
        Err(e) => Err(TransportError::Send {
            chunk: index,
            reason: e.to_string(),
        }),
    }
}

/// Read until `buf` is full or the file ends
async fn fill(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
