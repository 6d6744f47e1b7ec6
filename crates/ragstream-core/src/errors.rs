use std::time::Duration;

use crate::frame::MsgType;

/// An inbound frame that cannot be turned into a query. Always non-fatal:
/// the frame is dropped and the connection keeps reading.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("unexpected msgType {0:?}, only client frames are accepted")]
    UnexpectedType(MsgType),
    #[error("empty payload")]
    EmptyPayload,
    #[error("binary frames are not supported")]
    Binary,
}

impl DecodeError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::UnexpectedType(_) => "unexpected_type",
            Self::EmptyPayload => "empty_payload",
            Self::Binary => "binary",
        }
    }
}

/// Failure to turn text into a vector.
#[derive(Clone, Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding input is empty")]
    EmptyInput,
    #[error("network error: {0}")]
    Network(String),
    #[error("embedding backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("undecodable embedding response: {0}")]
    Decode(String),
    #[error("embedding backend returned an empty vector")]
    EmptyVector,
    #[error("embedding timed out after {0:?}")]
    Timeout(Duration),
}

impl EmbeddingError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::EmptyInput => "empty_input",
            Self::Network(_) => "network_error",
            Self::Status { .. } => "bad_status",
            Self::Decode(_) => "decode_error",
            Self::EmptyVector => "empty_vector",
            Self::Timeout(_) => "timeout",
        }
    }
}

/// Failure anywhere on the retrieval side (embedding included).
#[derive(Clone, Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),
    #[error("vector index unreachable: {0}")]
    Unreachable(String),
    #[error("collection not found: {0}")]
    CollectionNotFound(String),
    #[error("vector index returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed index response: {0}")]
    Malformed(String),
    #[error("top_k must be at least 1")]
    InvalidTopK,
    #[error("retrieval timed out after {0:?}")]
    Timeout(Duration),
}

impl RetrievalError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Embedding(e) => e.error_kind(),
            Self::Unreachable(_) => "unreachable",
            Self::CollectionNotFound(_) => "collection_not_found",
            Self::Status { .. } => "bad_status",
            Self::Malformed(_) => "malformed",
            Self::InvalidTopK => "invalid_top_k",
            Self::Timeout(_) => "timeout",
        }
    }

    /// Classify an HTTP status from the index backend.
    pub fn from_status(status: u16, collection: &str, body: String) -> Self {
        match status {
            404 => Self::CollectionNotFound(collection.to_string()),
            _ => Self::Status { status, body },
        }
    }
}

/// Failure of a generation call. Terminates that one generation task only.
#[derive(Clone, Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("network error: {0}")]
    Network(String),
    #[error("generation backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("undecodable fragment: {0}")]
    Decode(String),
    #[error("generation backend reported: {0}")]
    Backend(String),
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),
    #[error("empty response")]
    EmptyResponse,
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),
}

impl GenerationError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network_error",
            Self::Status { .. } => "bad_status",
            Self::Decode(_) => "decode_error",
            Self::Backend(_) => "backend_error",
            Self::StreamInterrupted(_) => "stream_interrupted",
            Self::EmptyResponse => "empty_response",
            Self::Timeout(_) => "timeout",
        }
    }
}

/// Read or write failure on the client connection. Fatal to the session.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("read failed: {0}")]
    Read(String),
    #[error("write failed: {0}")]
    Write(String),
}

impl ConnectionError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Read(_) => "read_failed",
            Self::Write(_) => "write_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retrieval_wraps_embedding_kind() {
        let err: RetrievalError = EmbeddingError::EmptyVector.into();
        assert_eq!(err.error_kind(), "empty_vector");
        assert!(err.to_string().contains("embedding failed"));
    }

    #[test]
    fn retrieval_from_status_mapping() {
        assert!(matches!(
            RetrievalError::from_status(404, "pages", "missing".into()),
            RetrievalError::CollectionNotFound(c) if c == "pages"
        ));
        assert!(matches!(
            RetrievalError::from_status(500, "pages", "boom".into()),
            RetrievalError::Status { status: 500, .. }
        ));
    }

    #[test]
    fn generation_error_kinds() {
        assert_eq!(GenerationError::EmptyResponse.error_kind(), "empty_response");
        assert_eq!(
            GenerationError::Timeout(Duration::from_secs(1)).error_kind(),
            "timeout"
        );
        assert_eq!(GenerationError::Decode("x".into()).error_kind(), "decode_error");
    }

    #[test]
    fn decode_error_display() {
        let err = DecodeError::UnexpectedType(MsgType::Server);
        assert!(err.to_string().contains("Server"));
        assert_eq!(err.error_kind(), "unexpected_type");
    }

    #[test]
    fn errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<EmbeddingError>();
        assert_send_sync::<RetrievalError>();
        assert_send_sync::<GenerationError>();
        assert_send_sync::<ConnectionError>();
    }
}
