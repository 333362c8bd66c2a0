//! Engine-facing message queues.
//!
//! The proxy engine owns two ordered queues that outlive any single peer
//! session:
//!
//! ```text
//! engine producers ─► outbound (unbounded) ─► [lease] ─► batcher ─► peer
//! engine consumer  ◄─ inbound (bounded)    ◄─ reader  ◄─────────── peer
//! ```
//!
//! The outbound receiver sits behind an async mutex; a session holds the
//! [`OutboundLease`] for its whole lifetime, so there is never more than one
//! consumer draining it. The inbound side is bounded and forwarding blocks
//! with a timeout once it is full.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc};

use crate::errors::QueueError;
use crate::messages::{InboundMessage, OutboundMessage};

/// Default inbound queue capacity.
pub const DEFAULT_INBOUND_CAPACITY: usize = 1024;

/// Both ends of a freshly created queue pair.
pub struct EngineQueues {
    /// Relay side, handed to the server.
    pub relay: RelayQueues,
    /// Engine side, handed to the proxy engine.
    pub engine: EngineHandle,
}

impl EngineQueues {
    /// Create the queue pair. `inbound_capacity` bounds peer → engine
    /// messages awaiting the engine; it is clamped to at least 1.
    pub fn new(inbound_capacity: usize) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(inbound_capacity.max(1));
        Self {
            relay: RelayQueues {
                outbound: Arc::new(Mutex::new(outbound_rx)),
                inbound: inbound_tx,
            },
            engine: EngineHandle {
                outbound: outbound_tx,
                inbound: inbound_rx,
            },
        }
    }
}

impl Default for EngineQueues {
    fn default() -> Self {
        Self::new(DEFAULT_INBOUND_CAPACITY)
    }
}

/// Engine side of the queues.
pub struct EngineHandle {
    /// Messages destined for the peer. Cloneable for multiple producers.
    pub outbound: mpsc::UnboundedSender<OutboundMessage>,
    /// Messages received from the peer, in frame order.
    pub inbound: mpsc::Receiver<InboundMessage>,
}

/// Relay side of the queues. Cheap to clone and shared by every session.
#[derive(Clone)]
pub struct RelayQueues {
    outbound: Arc<Mutex<mpsc::UnboundedReceiver<OutboundMessage>>>,
    inbound: mpsc::Sender<InboundMessage>,
}

impl RelayQueues {
    /// Wait for exclusive consumer access to the outbound queue.
    pub async fn lease_outbound(&self) -> OutboundLease {
        OutboundLease {
            rx: Arc::clone(&self.outbound).lock_owned().await,
        }
    }

    /// Forward one message to the engine, waiting at most `timeout` for
    /// queue space.
    pub async fn forward(&self, message: InboundMessage, timeout: Duration) -> Result<(), QueueError> {
        match self.inbound.send_timeout(message, timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(QueueError::ForwardTimeout(timeout)),
            Err(SendTimeoutError::Closed(_)) => Err(QueueError::EngineClosed),
        }
    }
}

/// Exclusive consumer access to the outbound queue, released on drop.
pub struct OutboundLease {
    rx: OwnedMutexGuard<mpsc::UnboundedReceiver<OutboundMessage>>,
}

impl OutboundLease {
    /// Wait for the next message. `None` once the engine has dropped every
    /// outbound sender and the queue is empty.
    pub async fn recv(&mut self) -> Option<OutboundMessage> {
        self.rx.recv().await
    }

    /// Messages currently waiting.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether no message is waiting.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
