//! Streaming-call abstraction and cancellation.
//!
//! [`StreamOpener`] / [`ReportStream`] are the seams the adapter drives; the
//! tonic implementation bridges them onto a spawned `StreamReport` call
//! through an mpsc channel.

use crate::client::ReceptorClient;
use crate::error::TransportError;
use crate::proto::receptor_v1::ReportChunk;
use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

/// Units buffered between the adapter and the gRPC call
const CHANNEL_DEPTH: usize = 16;

/// One open outbound streaming call
#[async_trait]
pub trait ReportStream: Send {
    /// Send one unit
    async fn send(&mut self, chunk: ReportChunk) -> Result<(), TransportError>;

    /// Close the send side and wait for the collector's acknowledgement
    async fn close_and_receive(self: Box<Self>) -> Result<(), TransportError>;
}

/// Opens outbound streaming calls
#[async_trait]
pub trait StreamOpener: Send + Sync {
    /// Open a new call
    async fn open(&self) -> Result<Box<dyn ReportStream>, TransportError>;
}

/// [`StreamOpener`] backed by a connected [`ReceptorClient`]
#[derive(Debug, Clone)]
pub struct TonicOpener {
    client: ReceptorClient,
}

impl TonicOpener {
    /// Wrap a connected client
    pub fn new(client: ReceptorClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StreamOpener for TonicOpener {
    async fn open(&self) -> Result<Box<dyn ReportStream>, TransportError> {
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        let mut client = self.client.clone();
        let call = tokio::spawn(async move { client.stream_report(ReceiverStream::new(rx)).await });
        debug!("StreamReport call opened");
        Ok(Box::new(TonicReportStream {
            tx: Some(tx),
            call: Some(call),
        }))
    }
}

struct TonicReportStream {
    tx: Option<mpsc::Sender<ReportChunk>>,
    call: Option<JoinHandle<Result<tonic::Response<()>, tonic::Status>>>,
}

#[async_trait]
impl ReportStream for TonicReportStream {
    async fn send(&mut self, chunk: ReportChunk) -> Result<(), TransportError> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| TransportError::Protocol("send after close".to_string()))?;
        if tx.send(chunk).await.is_ok() {
            return Ok(());
        }
        // The call finished early; its status says why
        self.tx.take();
        let ended = || TransportError::Close("call ended before the stream was complete".to_string());
        match self.call.take() {
            Some(call) => match call.await {
                Ok(Err(status)) => Err(TransportError::Status(status)),
                Ok(Ok(_)) => Err(ended()),
                Err(e) if e.is_cancelled() => Err(ended()),
                Err(e) => Err(TransportError::Close(format!("call task failed: {}", e))),
            },
            None => Err(ended()),
        }
    }

    async fn close_and_receive(mut self: Box<Self>) -> Result<(), TransportError> {
        // Dropping the sender ends the request stream
        self.tx.take();
        let call = self
            .call
            .take()
            .ok_or_else(|| TransportError::Protocol("stream already closed".to_string()))?;
        match call.await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(status)) => Err(TransportError::Status(status)),
            Err(e) => Err(TransportError::Close(format!("call task failed: {}", e))),
        }
    }
}

impl Drop for TonicReportStream {
    fn drop(&mut self) {
        // An unclosed stream must not reach the collector as a complete one
        if let Some(call) = self.call.take() {
            warn!("Aborting unfinished StreamReport call");
            call.abort();
        }
    }
}

/// Cancellation observed by in-flight transmissions
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

/// Trigger side of a [`CancelSignal`]
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// Create a linked handle and signal
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

impl CancelHandle {
    /// Cancel every clone of the linked signal
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl CancelSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is requested; pending forever if the handle is dropped first
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::never()
    }
}
