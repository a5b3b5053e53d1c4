use std::time::Duration;

use snafu::Snafu;

pub type TransportResult<T> = Result<T, TransportError>;

/// Coarse classification the turn controller maps onto user-visible failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    Connection,
    Timeout,
    EmptyBody,
}

// Selectors are public so out-of-tree `ChatTransport` implementations report
// failures in the same vocabulary as the HTTP transport.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TransportError {
    #[snafu(display("failed to build http client on `{stage}`: {source}"))]
    BuildClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("request to {endpoint} failed on `{stage}`: {source}"))]
    Connect {
        stage: &'static str,
        endpoint: String,
        source: reqwest::Error,
    },
    #[snafu(display("chat endpoint returned status {status}: {body}"))]
    HttpStatus {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display("failed to read response body on `{stage}`: {source}"))]
    ReadBody {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("connection lost on `{stage}`: {details}"))]
    Disconnected {
        stage: &'static str,
        details: String,
    },
    #[snafu(display("timed out after {after:?} on `{stage}`"))]
    Timeout {
        stage: &'static str,
        after: Duration,
    },
    #[snafu(display("chat endpoint returned an empty response body"))]
    EmptyBody { stage: &'static str },
}

impl TransportError {
    pub fn kind(&self) -> TransportErrorKind {
        match self {
            Self::Connect { source, .. } | Self::ReadBody { source, .. } if source.is_timeout() => {
                TransportErrorKind::Timeout
            }
            Self::Timeout { .. } => TransportErrorKind::Timeout,
            Self::EmptyBody { .. } => TransportErrorKind::EmptyBody,
            Self::BuildClient { .. }
            | Self::Connect { .. }
            | Self::HttpStatus { .. }
            | Self::ReadBody { .. }
            | Self::Disconnected { .. } => TransportErrorKind::Connection,
        }
    }

    pub fn stage(&self) -> &'static str {
        match self {
            Self::BuildClient { stage, .. }
            | Self::Connect { stage, .. }
            | Self::HttpStatus { stage, .. }
            | Self::ReadBody { stage, .. }
            | Self::Disconnected { stage, .. }
            | Self::Timeout { stage, .. }
            | Self::EmptyBody { stage } => stage,
        }
    }
}
