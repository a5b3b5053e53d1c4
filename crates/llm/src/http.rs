use std::time::Duration;

use futures::StreamExt;
use reqwest::header::ACCEPT;
use snafu::{IntoError, ResultExt};

use crate::error::{
    BuildClientSnafu, ConnectSnafu, EmptyBodySnafu, HttpStatusSnafu, ReadBodySnafu,
    TimeoutSnafu, TransportError, TransportResult,
};
use crate::protocol::WireFormat;
use crate::request::ChatRequest;
use crate::transport::{
    CancelSignal, ChatTransport, ChunkEvent, ChunkSender, TransportStreamHandle,
    TransportWorker, make_chunk_stream,
};

pub const HTTP_TRANSPORT_NAME: &str = "http";

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Bytes of an error response kept for the failure message.
pub const ERROR_BODY_LIMIT: usize = 4 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTransportConfig {
    pub wire_format: WireFormat,
    pub connect_timeout: Duration,
    /// Upper bound on waiting for the response status line and headers.
    pub response_timeout: Duration,
    /// Upper bound on the silence between two body chunks.
    pub idle_timeout: Duration,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            wire_format: WireFormat::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

impl HttpTransportConfig {
    pub fn with_wire_format(mut self, wire_format: WireFormat) -> Self {
        self.wire_format = wire_format;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }
}

pub struct HttpTransport {
    config: HttpTransportConfig,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("config", &self.config)
            .finish()
    }
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> TransportResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .context(BuildClientSnafu {
                stage: "build-http-client",
            })?;

        Ok(Self { config, client })
    }

    async fn send_request(
        client: &reqwest::Client,
        config: &HttpTransportConfig,
        request: &ChatRequest,
    ) -> TransportResult<reqwest::Response> {
        let pending = client
            .post(&request.endpoint)
            .header(ACCEPT, "text/event-stream, text/plain, */*")
            .json(&request.body)
            .send();

        let response = tokio::time::timeout(config.response_timeout, pending)
            .await
            .map_err(|_| {
                TimeoutSnafu {
                    stage: "await-response-headers",
                    after: config.response_timeout,
                }
                .build()
            })?
            .context(ConnectSnafu {
                stage: "send-chat-request",
                endpoint: request.endpoint.clone(),
            })?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let body = Self::read_error_body(response, config.idle_timeout).await;
            return HttpStatusSnafu {
                stage: "chat-http-status",
                status: status.as_u16(),
                body,
            }
            .fail();
        }

        Ok(response)
    }

    /// Reads at most [`ERROR_BODY_LIMIT`] bytes of an error response. The
    /// status alone fails the turn, so a stalled body yields an empty string.
    async fn read_error_body(response: reqwest::Response, idle_timeout: Duration) -> String {
        let collect = async move {
            let mut body = Box::pin(response.bytes_stream());
            let mut collected = Vec::new();
            while collected.len() < ERROR_BODY_LIMIT {
                match body.next().await {
                    Some(Ok(chunk)) => collected.extend_from_slice(&chunk),
                    Some(Err(_)) | None => break,
                }
            }
            collected.truncate(ERROR_BODY_LIMIT);
            String::from_utf8_lossy(&collected).into_owned()
        };

        match tokio::time::timeout(idle_timeout, collect).await {
            Ok(body) => body,
            Err(_) => {
                tracing::debug!(after = ?idle_timeout, "error response body stalled");
                String::new()
            }
        }
    }

    fn emit_failure(chunk_tx: &ChunkSender, error: TransportError) {
        let _ = chunk_tx.send(ChunkEvent::Failed(error));
    }

    async fn run_chunk_worker(
        client: reqwest::Client,
        config: HttpTransportConfig,
        request: ChatRequest,
        chunk_tx: ChunkSender,
        mut cancel_rx: CancelSignal,
    ) {
        let turn_id = request.turn_id;

        let response = tokio::select! {
            _ = &mut cancel_rx => {
                tracing::debug!(turn_id, "chat request cancelled before response");
                return;
            }
            result = Self::send_request(&client, &config, &request) => match result {
                Ok(response) => response,
                Err(error) => {
                    tracing::warn!(
                        turn_id,
                        endpoint = %request.endpoint,
                        model_id = %request.model_id(),
                        error = %error,
                        "failed to open chat stream"
                    );
                    Self::emit_failure(&chunk_tx, error);
                    return;
                }
            }
        };

        let mut body = Box::pin(response.bytes_stream());
        let mut received_bytes = 0usize;

        loop {
            tokio::select! {
                _ = &mut cancel_rx => {
                    // Dropping the body here closes the connection.
                    tracing::debug!(turn_id, received_bytes, "chat stream cancelled");
                    return;
                }
                next_chunk = tokio::time::timeout(config.idle_timeout, body.next()) => {
                    match next_chunk {
                        Ok(Some(Ok(chunk))) => {
                            received_bytes += chunk.len();
                            if chunk_tx.send(ChunkEvent::Data(chunk)).is_err() {
                                return;
                            }
                        }
                        Ok(Some(Err(source))) => {
                            tracing::warn!(
                                turn_id,
                                received_bytes,
                                error = %source,
                                "chat stream body failed"
                            );
                            let error = ReadBodySnafu { stage: "read-body-chunk" }
                                .into_error(source);
                            Self::emit_failure(&chunk_tx, error);
                            return;
                        }
                        Ok(None) => break,
                        Err(_) => {
                            tracing::warn!(turn_id, received_bytes, "chat stream went idle");
                            let error = TimeoutSnafu {
                                stage: "await-body-chunk",
                                after: config.idle_timeout,
                            }
                            .build();
                            Self::emit_failure(&chunk_tx, error);
                            return;
                        }
                    }
                }
            }
        }

        if received_bytes == 0 {
            Self::emit_failure(
                &chunk_tx,
                EmptyBodySnafu {
                    stage: "read-body-end",
                }
                .build(),
            );
            return;
        }

        tracing::debug!(turn_id, received_bytes, "chat stream body complete");
        let _ = chunk_tx.send(ChunkEvent::End);
    }
}

impl ChatTransport for HttpTransport {
    fn name(&self) -> &str {
        HTTP_TRANSPORT_NAME
    }

    fn wire_format(&self) -> WireFormat {
        self.config.wire_format
    }

    fn open(&self, request: ChatRequest) -> TransportResult<TransportStreamHandle> {
        let (chunk_tx, stream, cancel_rx) = make_chunk_stream(request.turn_id);
        let worker: TransportWorker = Box::pin(Self::run_chunk_worker(
            self.client.clone(),
            self.config,
            request,
            chunk_tx,
            cancel_rx,
        ));

        Ok(TransportStreamHandle { stream, worker })
    }
}
