//! # sockrelay-server
//!
//! Bridges the proxy engine's message queues to one remote peer over a
//! WebSocket.
//!
//! - [`batcher`]: coalesces outbound messages into size- and time-bounded
//!   frames (the only writer on the socket)
//! - [`reader`]: decodes inbound frames and feeds the engine (the only reader)
//! - [`relay`]: per-connection coordinator tying both halves to a [`Session`]
//! - [`session`]: lifecycle state machine and the session registry
//! - [`server`]: axum router, `/ws` upgrade and `/health`
//! - [`shutdown`]: graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod batcher;
pub mod config;
pub mod reader;
pub mod relay;
pub mod server;
pub mod session;
pub mod shutdown;

pub use config::{RelayConfig, ServerConfig};
pub use server::{AppState, ServerHandle, build_router, start};
pub use session::{CloseReason, Session, SessionRegistry, SessionState};
pub use shutdown::{ShutdownCoordinator, ShutdownReport};
