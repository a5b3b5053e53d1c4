//! Transport and wire decoding for streamed chat responses.

mod error;
mod http;
mod model;
pub mod protocol;
mod request;
mod transport;

pub use error::{
    BuildClientSnafu, ConnectSnafu, DisconnectedSnafu, EmptyBodySnafu, HttpStatusSnafu,
    ReadBodySnafu, TimeoutSnafu, TransportError, TransportErrorKind, TransportResult,
};
pub use http::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_IDLE_TIMEOUT, DEFAULT_RESPONSE_TIMEOUT, ERROR_BODY_LIMIT,
    HTTP_TRANSPORT_NAME, HttpTransport, HttpTransportConfig,
};
pub use model::{DEFAULT_MODEL, Model, default_models, find_model};
pub use protocol::{FrameDecoder, StreamErrorKind, StreamEvent, WireFormat};
pub use request::{ChatRequest, ChatRequestBody, Role, WireMessage};
pub use transport::{
    CancelSignal, ChatTransport, ChunkEvent, ChunkSender, ChunkStream, TransportStreamHandle,
    TransportWorker, make_chunk_stream,
};
