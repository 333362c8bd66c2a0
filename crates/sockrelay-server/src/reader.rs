//! Inbound reader: the single reader on a peer socket.
//!
//! Each frame is decoded in full as a JSON array before any of its messages
//! is forwarded. Forwarding blocks on the bounded inbound queue, so a slow
//! engine stalls frame reads from the peer; a stall longer than the forward
//! timeout ends the session.

use std::fmt::Display;
use std::time::Duration;

use axum::extract::ws::Message;
use futures::{Stream, StreamExt};
use metrics::counter;
use sockrelay_core::{CodecError, QueueError, RelayQueues, decode_frame};
use tracing::{debug, trace};

use crate::session::CloseReason;

/// Why the reader stopped.
#[derive(Debug)]
pub enum ReaderExit {
    /// The peer sent a close frame or the stream ended.
    PeerClosed,
    /// The transport reported a read error.
    ReadError(String),
    /// A frame payload was not a JSON array of messages.
    Malformed(CodecError),
    /// Forwarding to the engine failed.
    Forward(QueueError),
}

impl ReaderExit {
    /// Session close reason for this exit.
    pub fn close_reason(&self) -> CloseReason {
        match self {
            Self::PeerClosed | Self::ReadError(_) => CloseReason::PeerDisconnected,
            Self::Malformed(_) => CloseReason::MalformedFrame,
            Self::Forward(QueueError::ForwardTimeout(_)) => CloseReason::ForwardStalled,
            Self::Forward(QueueError::EngineClosed) => CloseReason::EngineClosed,
        }
    }
}

/// Read frames until the stream ends or fails, forwarding each decoded
/// message to the engine in frame order.
pub async fn run_reader<St, E>(mut stream: St, queues: &RelayQueues, forward_timeout: Duration) -> ReaderExit
where
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    loop {
        let decoded = match stream.next().await {
            None | Some(Ok(Message::Close(_))) => return ReaderExit::PeerClosed,
            Some(Err(e)) => return ReaderExit::ReadError(e.to_string()),
            Some(Ok(Message::Text(text))) => decode_frame(text.as_str().as_bytes()),
            Some(Ok(Message::Binary(data))) => decode_frame(&data),
            // answered by the transport
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
        };

        let messages = match decoded {
            Ok(messages) => messages,
            Err(e) => return ReaderExit::Malformed(e),
        };

        counter!("relay_frames_received_total").increment(1);
        counter!("relay_messages_received_total").increment(messages.len() as u64);
        debug!(items = messages.len(), "frame received");

        for message in messages {
            trace!(server_id = message.server_id, exit = message.exit, "forwarding");
            if let Err(e) = queues.forward(message, forward_timeout).await {
                return ReaderExit::Forward(e);
            }
        }
    }
}
