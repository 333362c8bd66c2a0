//! Per-connection coordinator.
//!
//! 1. Spawns the inbound reader on the stream half; its exit is the
//!    session's disconnect signal
//! 2. Takes the outbound lease and runs the batcher on the sink half
//! 3. On any exit: drains the session, closes the sink once, waits for the
//!    reader up to the drain timeout, then marks the session closed

use std::fmt::Display;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use metrics::{counter, gauge, histogram};
use sockrelay_core::RelayQueues;
use tokio::time::timeout;
use tracing::{Instrument, debug, info, instrument, warn};

use crate::batcher::{BatcherExit, run_batcher};
use crate::config::RelayConfig;
use crate::reader::{ReaderExit, run_reader};
use crate::session::{CloseReason, Session, SessionRegistry};

/// Run a WebSocket session from upgrade through disconnect.
#[instrument(skip_all, fields(session_id = %session.id()))]
pub async fn run_session(
    socket: WebSocket,
    session: Arc<Session>,
    queues: RelayQueues,
    config: RelayConfig,
    registry: Arc<SessionRegistry>,
) {
    info!("peer connected");
    counter!("relay_sessions_total").increment(1);
    gauge!("relay_sessions_active").increment(1.0);

    let (sink, stream) = socket.split();
    let reason = drive_session(sink, stream, Arc::clone(&session), queues, config).await;

    registry.unregister(session.id());
    gauge!("relay_sessions_active").decrement(1.0);
    histogram!("relay_session_duration_seconds").record(session.age().as_secs_f64());
    let duration_ms = u64::try_from(session.age().as_millis()).unwrap_or(u64::MAX);
    info!(reason = %reason, duration_ms, "peer disconnected");
}

/// Drive both relay halves over an already split connection.
///
/// Returns the reason recorded when the session left `Active`. On return the
/// sink has been closed and the session is `Closed`.
pub async fn drive_session<S, St, E>(
    mut sink: S,
    stream: St,
    session: Arc<Session>,
    queues: RelayQueues,
    config: RelayConfig,
) -> CloseReason
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
    St: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: Display + Send + 'static,
{
    let done = session.done().clone();

    let mut reader = {
        let session = Arc::clone(&session);
        let queues = queues.clone();
        let forward_timeout = config.forward_timeout;
        tokio::spawn(
            async move {
                let exit = run_reader(stream, &queues, forward_timeout).await;
                log_reader_exit(&exit);
                let _ = session.begin_draining(exit.close_reason());
            }
            .in_current_span(),
        )
    };

    // a superseded session must not wait behind the lease forever
    let lease = tokio::select! {
        biased;
        () = done.cancelled() => None,
        lease = queues.lease_outbound() => Some(lease),
    };

    if let Some(mut lease) = lease {
        if session.activate() {
            debug!("outbound lease acquired, session active");
        }
        match run_batcher(&mut sink, &mut lease, &config, &done).await {
            Ok(BatcherExit::Cancelled) => {}
            Ok(BatcherExit::EngineClosed) => {
                warn!("engine outbound queue closed");
                let _ = session.begin_draining(CloseReason::EngineClosed);
            }
            Err(e) => {
                warn!(error = %e, kind = e.error_kind(), "outbound write failed");
                let _ = session.begin_draining(CloseReason::from(&e));
            }
        }
    }

    let reason = session.close_reason().unwrap_or(CloseReason::Shutdown);

    let close = Message::Close(Some(CloseFrame {
        code: reason.close_code(),
        reason: reason.as_str().into(),
    }));
    let closing = async {
        sink.send(close).await?;
        sink.close().await
    };
    if !matches!(timeout(config.write_timeout, closing).await, Ok(Ok(()))) {
        debug!("close frame not delivered");
    }

    if timeout(config.drain_timeout, &mut reader).await.is_err() {
        debug!("reader still blocked after drain timeout, aborting");
        reader.abort();
    }

    let _ = session.close();
    reason
}

fn log_reader_exit(exit: &ReaderExit) {
    match exit {
        ReaderExit::PeerClosed => debug!("peer closed the connection"),
        ReaderExit::ReadError(e) => debug!(error = %e, "read failed"),
        ReaderExit::Malformed(e) => warn!(error = %e, "malformed frame from peer"),
        ReaderExit::Forward(e) => warn!(error = %e, "inbound forward failed"),
    }
}
