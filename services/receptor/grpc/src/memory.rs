//! In-memory [`StreamOpener`] that records every unit it is sent.
//!
//! Used for dry runs against a loopback collector and in tests, where it can be
//! told to fail a chosen call at open, mid-stream, or at close.

use crate::error::TransportError;
use crate::proto::receptor_v1::ReportChunk;
use crate::stream::{ReportStream, StreamOpener};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// How a scripted call fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// `open` fails
    Open,
    /// The send of the unit with this index fails
    Send(u64),
    /// The collector rejects the call while the unit with this index is sent
    Reject(u64),
    /// Close is rejected by the collector
    Close,
}

/// Units received by one call
#[derive(Debug, Clone, Default)]
pub struct RecordedStream {
    /// Units in arrival order
    pub units: Vec<ReportChunk>,
    /// Whether the call was closed and acknowledged
    pub acknowledged: bool,
}

impl RecordedStream {
    /// Content type carried by the declaration unit, if the first unit is one
    pub fn content_type(&self) -> Option<String> {
        self.units
            .first()
            .filter(|unit| unit.is_boundary)
            .map(|unit| String::from_utf8_lossy(&unit.content).into_owned())
    }

    /// Payload units concatenated in order
    pub fn payload(&self) -> Vec<u8> {
        self.units
            .iter()
            .filter(|unit| !unit.is_boundary)
            .flat_map(|unit| unit.content.iter().copied())
            .collect()
    }
}

#[derive(Debug, Default)]
struct Shared {
    opened: usize,
    streams: Vec<Arc<Mutex<RecordedStream>>>,
}

/// Recording opener with scripted failures keyed by call index
#[derive(Debug, Clone, Default)]
pub struct MemoryOpener {
    shared: Arc<Mutex<Shared>>,
    failures: Arc<HashMap<usize, FailureMode>>,
}

impl MemoryOpener {
    /// Opener whose calls all succeed
    pub fn new() -> Self {
        Self::default()
    }

    /// Opener where the `n`th call (zero-based, in open order) fails as described
    pub fn with_failures(failures: impl IntoIterator<Item = (usize, FailureMode)>) -> Self {
        Self {
            shared: Arc::default(),
            failures: Arc::new(failures.into_iter().collect()),
        }
    }

    /// Snapshot of every call opened so far, including failed ones
    pub fn streams(&self) -> Vec<RecordedStream> {
        let shared = lock(&self.shared);
        shared.streams.iter().map(|s| lock(s).clone()).collect()
    }

    /// Number of `open` attempts
    pub fn opened(&self) -> usize {
        lock(&self.shared).opened
    }
}

#[async_trait]
impl StreamOpener for MemoryOpener {
    async fn open(&self) -> Result<Box<dyn ReportStream>, TransportError> {
        let (index, record) = {
            let mut shared = lock(&self.shared);
            let index = shared.opened;
            shared.opened += 1;
            let record = Arc::new(Mutex::new(RecordedStream::default()));
            shared.streams.push(Arc::clone(&record));
            (index, record)
        };

        let failure = self.failures.get(&index).copied();
        if failure == Some(FailureMode::Open) {
            return Err(TransportError::Open(format!("scripted open failure for call {}", index)));
        }
        Ok(Box::new(MemoryStream {
            record,
            sent: 0,
            failure,
        }))
    }
}

struct MemoryStream {
    record: Arc<Mutex<RecordedStream>>,
    sent: u64,
    failure: Option<FailureMode>,
}

#[async_trait]
impl ReportStream for MemoryStream {
    async fn send(&mut self, chunk: ReportChunk) -> Result<(), TransportError> {
        let index = self.sent;
        self.sent += 1;
        if self.failure == Some(FailureMode::Send(index)) {
            return Err(TransportError::Close("scripted send failure".to_string()));
        }
        if self.failure == Some(FailureMode::Reject(index)) {
            return Err(TransportError::Status(tonic::Status::permission_denied(
                "scripted rejection",
            )));
        }
        lock(&self.record).units.push(chunk);
        Ok(())
    }

    async fn close_and_receive(self: Box<Self>) -> Result<(), TransportError> {
        if self.failure == Some(FailureMode::Close) {
            return Err(TransportError::Status(tonic::Status::invalid_argument(
                "scripted rejection",
            )));
        }
        lock(&self.record).acknowledged = true;
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn unit(content: &'static [u8], is_boundary: bool) -> ReportChunk {
        ReportChunk {
            content: Bytes::from_static(content),
            is_boundary,
        }
    }

    #[tokio::test]
    async fn test_records_units_per_call() {
        let opener = MemoryOpener::new();
        let mut stream = opener.open().await.unwrap();
        stream.send(unit(b"ct", true)).await.unwrap();
        stream.send(unit(b"ab", false)).await.unwrap();
        stream.send(unit(b"c", false)).await.unwrap();
        stream.close_and_receive().await.unwrap();

        let streams = opener.streams();
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].content_type().as_deref(), Some("ct"));
        assert_eq!(streams[0].payload(), b"abc");
        assert!(streams[0].acknowledged);
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let opener = MemoryOpener::with_failures([(0, FailureMode::Open), (1, FailureMode::Send(1)), (2, FailureMode::Close)]);

        assert!(matches!(opener.open().await, Err(TransportError::Open(_))));

        let mut second = opener.open().await.unwrap();
        second.send(unit(b"ct", true)).await.unwrap();
        assert!(second.send(unit(b"x", false)).await.is_err());

        let third = opener.open().await.unwrap();
        assert!(matches!(third.close_and_receive().await, Err(TransportError::Status(_))));
        assert_eq!(opener.opened(), 3);
    }
}
