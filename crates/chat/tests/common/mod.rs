#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use ray_chat::{ChatSession, ConversationSnapshot, Subscription, TurnConfig};
use ray_llm::{
    CancelSignal, ChatRequest, ChatTransport, ChunkEvent, ChunkSender, TransportResult,
    TransportStreamHandle, WireFormat, make_chunk_stream,
};
use tokio::sync::mpsc;
use tokio::time::timeout;

pub const WAIT: Duration = Duration::from_secs(2);
pub const ENDPOINT: &str = "http://chat.test/api/chat";

/// One `open` call, handed to the test so it can play the server.
pub struct OpenedStream {
    pub request: ChatRequest,
    pub chunks: ChunkSender,
    pub cancel: CancelSignal,
}

impl OpenedStream {
    pub fn send(&self, raw: &str) {
        self.chunks
            .send(ChunkEvent::Data(Bytes::copy_from_slice(raw.as_bytes())))
            .expect("controller should still be reading this stream");
    }

    pub fn end(&self) {
        self.chunks
            .send(ChunkEvent::End)
            .expect("controller should still be reading this stream");
    }
}

/// Transport whose bodies are written by the test instead of a server.
pub struct ScriptedTransport {
    format: WireFormat,
    opened: mpsc::UnboundedSender<OpenedStream>,
}

impl ScriptedTransport {
    pub fn new(format: WireFormat) -> (Self, mpsc::UnboundedReceiver<OpenedStream>) {
        let (opened, opened_rx) = mpsc::unbounded_channel();
        (Self { format, opened }, opened_rx)
    }
}

impl ChatTransport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    fn wire_format(&self) -> WireFormat {
        self.format
    }

    fn open(&self, request: ChatRequest) -> TransportResult<TransportStreamHandle> {
        let (chunks, stream, cancel) = make_chunk_stream(request.turn_id);
        let _ = self.opened.send(OpenedStream {
            request,
            chunks,
            cancel,
        });

        Ok(TransportStreamHandle {
            stream,
            worker: Box::pin(async {}),
        })
    }
}

pub struct Harness {
    pub session: ChatSession,
    pub streams: mpsc::UnboundedReceiver<OpenedStream>,
    pub snapshots: mpsc::UnboundedReceiver<Arc<ConversationSnapshot>>,
    /// Every snapshot received so far, in delivery order.
    pub seen: Vec<Arc<ConversationSnapshot>>,
    pub subscription: Subscription,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_format(WireFormat::DataStream)
    }

    pub fn with_format(format: WireFormat) -> Self {
        let (transport, streams) = ScriptedTransport::new(format);
        Self::with_transport(Arc::new(transport), streams)
    }

    pub fn with_transport(
        transport: Arc<dyn ChatTransport>,
        streams: mpsc::UnboundedReceiver<OpenedStream>,
    ) -> Self {
        let session = ChatSession::spawn(transport);
        let (snapshot_tx, snapshots) = mpsc::unbounded_channel();
        let subscription = session.subscribe(move |snapshot| {
            let _ = snapshot_tx.send(Arc::new(snapshot.clone()));
        });

        Self {
            session,
            streams,
            snapshots,
            seen: Vec::new(),
            subscription,
        }
    }

    pub async fn next_stream(&mut self) -> OpenedStream {
        timeout(WAIT, self.streams.recv())
            .await
            .expect("transport was not opened in time")
            .expect("transport channel closed")
    }

    /// Reads snapshots until one satisfies `predicate`.
    pub async fn wait_for<F>(&mut self, predicate: F) -> Arc<ConversationSnapshot>
    where
        F: Fn(&ConversationSnapshot) -> bool,
    {
        loop {
            let snapshot = timeout(WAIT, self.snapshots.recv())
                .await
                .expect("no matching snapshot in time")
                .expect("snapshot channel closed");
            self.seen.push(Arc::clone(&snapshot));
            if predicate(&snapshot) {
                return snapshot;
            }
        }
    }

    pub async fn wait_idle_after_failure(&mut self) -> Arc<ConversationSnapshot> {
        self.wait_for(|snapshot| snapshot.status.failure().is_some())
            .await;
        self.wait_for(|snapshot| snapshot.status.is_idle()).await
    }

    pub fn failed_snapshots(&self) -> usize {
        self.seen
            .iter()
            .filter(|snapshot| snapshot.status.failure().is_some())
            .count()
    }
}

pub fn config() -> TurnConfig {
    TurnConfig::new(ENDPOINT, "gpt-4o-mini")
}
