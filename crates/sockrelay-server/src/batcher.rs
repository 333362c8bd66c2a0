//! Outbound batcher: the single writer on a peer socket.
//!
//! ```text
//! wait(first | done) ─► window [first, first + coalesce) ─► encode ─► write ─┐
//!        ▲                                                                   │
//!        └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The window opens when the first message of a batch arrives and is never
//! extended. Within it the batcher waits on the queue with a timer-bounded
//! receive, so a lone message is flushed exactly one window after arrival.

use std::fmt::Display;

use axum::extract::ws::Message;
use futures::{Sink, SinkExt};
use metrics::counter;
use sockrelay_core::{OutboundLease, OutboundMessage, RelayError, encode_batch};
use tokio::time::{Instant, timeout, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::RelayConfig;

/// Initial allocation for a batch; grows up to `max_items`.
const INITIAL_BATCH_CAPACITY: usize = 32;

/// Why the batcher returned without error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatcherExit {
    /// The session's termination signal fired.
    Cancelled,
    /// Every engine-side outbound sender was dropped.
    EngineClosed,
}

/// An ordered group of 1..=`max_items` outbound messages.
#[derive(Debug)]
pub struct Batch {
    messages: Vec<OutboundMessage>,
    max_items: usize,
}

impl Batch {
    /// Start a batch with its first message.
    pub fn new(first: OutboundMessage, max_items: usize) -> Self {
        let max_items = max_items.max(1);
        let mut messages = Vec::with_capacity(max_items.min(INITIAL_BATCH_CAPACITY));
        messages.push(first);
        Self { messages, max_items }
    }

    /// Append a message. Returns it back if the batch is full.
    pub fn push(&mut self, message: OutboundMessage) -> Result<(), OutboundMessage> {
        if self.is_full() {
            return Err(message);
        }
        self.append(message);
        Ok(())
    }

    // callers check `is_full` first
    fn append(&mut self, message: OutboundMessage) {
        debug_assert!(!self.is_full());
        self.messages.push(message);
    }

    /// Whether the batch holds `max_items` messages.
    pub fn is_full(&self) -> bool {
        self.messages.len() >= self.max_items
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Always `false`: a batch holds at least its first message.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Messages in arrival order.
    pub fn messages(&self) -> &[OutboundMessage] {
        &self.messages
    }
}

/// Run the batcher until `done` fires, the engine goes away, or a write
/// fails.
///
/// Once `done` has fired no further frame is written, even if a batch was
/// being collected.
pub async fn run_batcher<S>(
    sink: &mut S,
    lease: &mut OutboundLease,
    config: &RelayConfig,
    done: &CancellationToken,
) -> Result<BatcherExit, RelayError>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    loop {
        let first = tokio::select! {
            biased;
            () = done.cancelled() => return Ok(BatcherExit::Cancelled),
            msg = lease.recv() => match msg {
                Some(msg) => msg,
                None => return Ok(BatcherExit::EngineClosed),
            },
        };

        let batch = collect_batch(first, lease, config).await;
        if done.is_cancelled() {
            debug!(items = batch.len(), "session ended during coalescing window, batch dropped");
            return Ok(BatcherExit::Cancelled);
        }
        write_batch(sink, &batch, config).await?;
    }
}

/// Gather messages behind `first` until the batch is full or the window
/// closes.
pub async fn collect_batch(first: OutboundMessage, lease: &mut OutboundLease, config: &RelayConfig) -> Batch {
    let deadline = Instant::now() + config.coalesce_window;
    let mut batch = Batch::new(first, config.max_items);

    while !batch.is_full() && Instant::now() < deadline {
        match timeout_at(deadline, lease.recv()).await {
            Ok(Some(msg)) => batch.append(msg),
            // engine closed: flush what we have, the next wait reports it
            Ok(None) | Err(_) => break,
        }
    }
    batch
}

/// Encode `batch` and write it as one text frame under the write deadline.
pub async fn write_batch<S>(sink: &mut S, batch: &Batch, config: &RelayConfig) -> Result<(), RelayError>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let payload = encode_batch(batch.messages())?;
    let bytes = payload.len();

    match timeout(config.write_timeout, sink.send(Message::Text(payload.into()))).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(RelayError::Write(e.to_string())),
        Err(_) => return Err(RelayError::WriteTimeout(config.write_timeout)),
    }

    counter!("relay_frames_sent_total").increment(1);
    counter!("relay_messages_sent_total").increment(batch.len() as u64);
    debug!(items = batch.len(), bytes, "batch sent");
    Ok(())
}
