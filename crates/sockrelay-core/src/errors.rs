//! Error taxonomy for the relay.
//!
//! Every variant here is local to a single peer session: the session that
//! hits one is torn down and the process keeps serving new connections.

use std::time::Duration;

use thiserror::Error;

/// Frame encoding or decoding failure.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The outbound batch could not be serialized.
    #[error("failed to encode batch: {0}")]
    Encode(#[source] serde_json::Error),
    /// The inbound payload is not a JSON array of messages.
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),
}

/// Engine queue failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The engine did not accept an inbound message in time.
    #[error("inbound queue stalled for {0:?}")]
    ForwardTimeout(Duration),
    /// The engine side of a queue has been dropped.
    #[error("engine queue closed")]
    EngineClosed,
}

/// Session-fatal relay error.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Frame codec error.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// Engine queue error.
    #[error(transparent)]
    Queue(#[from] QueueError),
    /// A frame write did not complete before the deadline.
    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),
    /// The transport rejected a frame write.
    #[error("write failed: {0}")]
    Write(String),
    /// The transport reported a read error.
    #[error("read failed: {0}")]
    Read(String),
}

impl RelayError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Codec(CodecError::Encode(_)) => "encode",
            Self::Codec(CodecError::Malformed(_)) => "malformed_frame",
            Self::Queue(QueueError::ForwardTimeout(_)) => "forward_timeout",
            Self::Queue(QueueError::EngineClosed) => "engine_closed",
            Self::WriteTimeout(_) => "write_timeout",
            Self::Write(_) => "write_failed",
            Self::Read(_) => "read_failed",
        }
    }
}
