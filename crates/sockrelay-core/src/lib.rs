//! # sockrelay-core
//!
//! Shared building blocks for the relay:
//!
//! - [`messages`]: proxied-traffic records exchanged with the peer
//! - [`codec`]: JSON-array frame encoding and decoding
//! - [`queues`]: the engine-facing message queues
//! - [`ids`]: branded identifiers
//! - [`errors`]: the relay error taxonomy

#![deny(unsafe_code)]

pub mod codec;
pub mod errors;
pub mod ids;
pub mod messages;
pub mod queues;

pub use codec::{decode_frame, encode_batch};
pub use errors::{CodecError, QueueError, RelayError};
pub use ids::SessionId;
pub use messages::{InboundMessage, OutboundMessage};
pub use queues::{EngineHandle, EngineQueues, OutboundLease, RelayQueues};
