//! Receive loop for one WebSocket.
//!
//! `AwaitingMessage` waits on the next frame. A decodable query moves to
//! `Dispatching`, which spawns a generation task into the connection's
//! tracker and returns straight to `AwaitingMessage`. Any read failure, a
//! close frame, liveness expiry or server shutdown moves to `Closed`: the
//! connection token is cancelled and the session waits for its tasks.

use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::stream::SplitStream;
use futures::StreamExt;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn, Instrument};

use ragstream_core::errors::{ConnectionError, DecodeError};
use ragstream_core::frame::InboundMessage;

use crate::connection::{run_writer, Connection};
use crate::generation::GenerationTask;
use crate::server::AppState;

/// Why the receive loop stopped.
#[derive(Debug)]
enum CloseReason {
    ClientClosed,
    Cancelled,
    Read(ConnectionError),
}

pub async fn serve_socket(socket: WebSocket, state: AppState) {
    let (connection, rx) = state.registry.register();
    let span = tracing::info_span!("connection", connection_id = %connection.id);

    async move {
        info!("client connected");
        state.metrics.counter_inc("connections_total", &[], 1);
        state.metrics.gauge_inc("connections_active", &[], 1.0);

        let (ws_tx, ws_rx) = socket.split();
        let writer = tokio::spawn(
            run_writer(ws_tx, rx, Arc::clone(&connection), state.heartbeat_interval)
                .in_current_span(),
        );

        let tracker = TaskTracker::new();
        let reason = receive_loop(ws_rx, &connection, &state, &tracker).await;

        connection.close();
        tracker.close();
        tracker.wait().await;

        match writer.await {
            Ok(Err(e)) => debug!(error = %e, "writer ended with error"),
            Err(e) => warn!(error = %e, "writer task panicked"),
            Ok(Ok(())) => {}
        }

        state.metrics.gauge_inc("connections_active", &[], -1.0);
        state.registry.unregister(&connection.id);
        match reason {
            CloseReason::Read(e) => info!(error = %e, "client disconnected"),
            other => info!(reason = ?other, "client disconnected"),
        }
    }
    .instrument(span)
    .await
}

async fn receive_loop(
    mut ws_rx: SplitStream<WebSocket>,
    connection: &Arc<Connection>,
    state: &AppState,
    tracker: &TaskTracker,
) -> CloseReason {
    loop {
        let frame = tokio::select! {
            biased;
            _ = connection.cancel_token().cancelled() => return CloseReason::Cancelled,
            frame = ws_rx.next() => frame,
        };

        match frame {
            Some(Ok(WsMessage::Text(text))) => match InboundMessage::decode(text.as_str()) {
                Ok(message) => dispatch(message, connection, state, tracker),
                Err(e) => drop_frame(state, &e),
            },
            Some(Ok(WsMessage::Binary(_))) => drop_frame(state, &DecodeError::Binary),
            Some(Ok(WsMessage::Pong(_))) => connection.record_pong(),
            Some(Ok(WsMessage::Ping(_))) => {}
            Some(Ok(WsMessage::Close(_))) | None => return CloseReason::ClientClosed,
            Some(Err(e)) => return CloseReason::Read(ConnectionError::Read(e.to_string())),
        }
    }
}

fn dispatch(
    message: InboundMessage,
    connection: &Arc<Connection>,
    state: &AppState,
    tracker: &TaskTracker,
) {
    debug!(
        client_id = %message.correlation.client_id,
        message_id = message.correlation.message_id,
        payload_len = message.payload.len(),
        "query received"
    );

    let task = GenerationTask {
        connection_id: connection.id.clone(),
        correlation: message.correlation,
        payload: message.payload,
        pipeline: Arc::clone(&state.pipeline),
        metrics: Arc::clone(&state.metrics),
        tx: connection.sender(),
        cancel: connection.cancel_token().child_token(),
    };
    tracker.spawn(task.run().in_current_span());
}

fn drop_frame(state: &AppState, error: &DecodeError) {
    warn!(error = %error, "dropping undecodable frame");
    state
        .metrics
        .counter_inc("frames_dropped_total", &[("reason", error.error_kind())], 1);
}
