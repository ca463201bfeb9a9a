use std::io;

use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum IoPhase {
    Write,
    Read,
}

impl std::fmt::Display for IoPhase {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Write => "write",
            Self::Read => "read",
        };
        formatter.write_str(text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HostCopyErrorCode {
    SchemeMismatch,
    Acquire,
    Deadline,
    WriteRequest,
    ReadHeader,
    InvalidHeader,
    ConnectionClosed,
    BodyTooLarge,
    UnexpectedEof,
    ChunkTerminator,
    InvalidChunkSize,
    ReadBody,
    WriteBody,
}

impl HostCopyErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SchemeMismatch => "scheme_mismatch",
            Self::Acquire => "acquire",
            Self::Deadline => "deadline",
            Self::WriteRequest => "write_request",
            Self::ReadHeader => "read_header",
            Self::InvalidHeader => "invalid_header",
            Self::ConnectionClosed => "connection_closed",
            Self::BodyTooLarge => "body_too_large",
            Self::UnexpectedEof => "unexpected_eof",
            Self::ChunkTerminator => "chunk_terminator",
            Self::InvalidChunkSize => "invalid_chunk_size",
            Self::ReadBody => "read_body",
            Self::WriteBody => "write_body",
        }
    }
}

/// Marks the `ReadHeader` source raised when the server hung up before the
/// first response byte, as opposed to an `UnexpectedEof` from the transport.
#[derive(Debug, Error)]
#[error("server closed connection before returning the first response byte")]
pub(crate) struct NoResponseBytes;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HostCopyError {
    #[error("request scheme {scheme} does not match client transport {expected}")]
    SchemeMismatch {
        scheme: String,
        expected: &'static str,
    },
    #[error("failed to acquire connection: {source}")]
    Acquire {
        #[source]
        source: io::Error,
    },
    #[error("failed to set {phase} deadline: {source}")]
    Deadline {
        phase: IoPhase,
        #[source]
        source: io::Error,
    },
    #[error("failed to write request: {source}")]
    WriteRequest {
        #[source]
        source: io::Error,
    },
    #[error("failed to read response header: {source}")]
    ReadHeader {
        #[source]
        source: io::Error,
    },
    #[error("invalid response header: {message}")]
    InvalidHeader { message: String },
    #[error("the server closed connection before returning the first response byte")]
    ConnectionClosed,
    #[error("response body too large (limit {limit_bytes} bytes)")]
    BodyTooLarge { limit_bytes: u64 },
    #[error("unexpected end of stream after {copied_bytes} of {expected_bytes} body bytes")]
    UnexpectedEof {
        expected_bytes: u64,
        copied_bytes: u64,
    },
    #[error("cannot find crlf at the end of chunk")]
    ChunkTerminator,
    #[error("invalid chunk size line: {message}")]
    InvalidChunkSize { message: String },
    #[error("failed to read response body: {source}")]
    ReadBody {
        #[source]
        source: io::Error,
    },
    #[error("failed to write response body to sink: {source}")]
    WriteBody {
        #[source]
        source: io::Error,
    },
}

impl HostCopyError {
    pub const fn code(&self) -> HostCopyErrorCode {
        match self {
            Self::SchemeMismatch { .. } => HostCopyErrorCode::SchemeMismatch,
            Self::Acquire { .. } => HostCopyErrorCode::Acquire,
            Self::Deadline { .. } => HostCopyErrorCode::Deadline,
            Self::WriteRequest { .. } => HostCopyErrorCode::WriteRequest,
            Self::ReadHeader { .. } => HostCopyErrorCode::ReadHeader,
            Self::InvalidHeader { .. } => HostCopyErrorCode::InvalidHeader,
            Self::ConnectionClosed => HostCopyErrorCode::ConnectionClosed,
            Self::BodyTooLarge { .. } => HostCopyErrorCode::BodyTooLarge,
            Self::UnexpectedEof { .. } => HostCopyErrorCode::UnexpectedEof,
            Self::ChunkTerminator => HostCopyErrorCode::ChunkTerminator,
            Self::InvalidChunkSize { .. } => HostCopyErrorCode::InvalidChunkSize,
            Self::ReadBody { .. } => HostCopyErrorCode::ReadBody,
            Self::WriteBody { .. } => HostCopyErrorCode::WriteBody,
        }
    }

    /// Whether the server hung up before sending a single byte of the response.
    ///
    /// Servers close idle keep-alive connections on their own schedule, so
    /// this is the one failure that is safe to retry for any request method.
    pub fn is_peer_closed(&self) -> bool {
        match self {
            Self::ReadHeader { source } => source
                .get_ref()
                .is_some_and(|inner| inner.is::<NoResponseBytes>()),
            Self::ConnectionClosed => true,
            _ => false,
        }
    }

    pub(crate) fn no_response_bytes() -> Self {
        Self::ReadHeader {
            source: io::Error::new(io::ErrorKind::UnexpectedEof, NoResponseBytes),
        }
    }

    pub(crate) fn invalid_header(message: impl Into<String>) -> Self {
        Self::InvalidHeader {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_chunk_size(message: impl Into<String>) -> Self {
        Self::InvalidChunkSize {
            message: message.into(),
        }
    }
}
