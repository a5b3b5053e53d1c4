use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::error::{TransportError, TransportResult};
use crate::protocol::WireFormat;
use crate::request::ChatRequest;

pub type TransportWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Raw output of one streaming request, in the order the server wrote it.
#[derive(Debug)]
pub enum ChunkEvent {
    Data(Bytes),
    /// The server closed the body normally.
    End,
    Failed(TransportError),
}

/// Sending half held by a transport worker.
pub type ChunkSender = mpsc::UnboundedSender<ChunkEvent>;

/// Fires once when the consumer cancels or drops its [`ChunkStream`].
pub type CancelSignal = oneshot::Receiver<()>;

pub struct ChunkStream {
    turn_id: u64,
    events: mpsc::UnboundedReceiver<ChunkEvent>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

pub struct TransportStreamHandle {
    pub stream: ChunkStream,
    pub worker: TransportWorker,
}

impl ChunkStream {
    fn new(
        turn_id: u64,
        events: mpsc::UnboundedReceiver<ChunkEvent>,
        cancel_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            turn_id,
            events,
            cancel_tx: Some(cancel_tx),
        }
    }

    pub fn turn_id(&self) -> u64 {
        self.turn_id
    }

    /// Resolves to `None` once the worker is gone and every chunk was read.
    pub async fn recv(&mut self) -> Option<ChunkEvent> {
        self.events.recv().await
    }

    /// Asks the worker to close the connection. Returns false if it was
    /// already cancelled or the worker has finished.
    pub fn cancel(&mut self) -> bool {
        self.events.close();
        self.cancel_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }
}

impl Drop for ChunkStream {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

/// Opens one streaming request per turn.
pub trait ChatTransport: Send + Sync {
    fn name(&self) -> &str;

    /// Framing of the bodies this transport yields.
    fn wire_format(&self) -> WireFormat;

    /// Prepares the request. No I/O happens until the returned worker is
    /// polled; it must be spawned for chunks to arrive.
    fn open(&self, request: ChatRequest) -> TransportResult<TransportStreamHandle>;
}

pub fn make_chunk_stream(turn_id: u64) -> (ChunkSender, ChunkStream, CancelSignal) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (
        event_tx,
        ChunkStream::new(turn_id, event_rx, cancel_tx),
        cancel_rx,
    )
}
