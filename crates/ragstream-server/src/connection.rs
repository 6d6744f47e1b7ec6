use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::stream::SplitSink;
use futures::SinkExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use ragstream_core::errors::ConnectionError;
use ragstream_core::ids::ConnectionId;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(90);

/// One accepted WebSocket.
pub struct Connection {
    pub id: ConnectionId,
    tx: mpsc::Sender<String>,
    cancel: CancellationToken,
    last_pong: AtomicU64,
    client_timeout: Duration,
}

impl Connection {
    fn new(
        id: ConnectionId,
        tx: mpsc::Sender<String>,
        cancel: CancellationToken,
        client_timeout: Duration,
    ) -> Self {
        Self {
            id,
            tx,
            cancel,
            last_pong: AtomicU64::new(now_secs()),
            client_timeout,
        }
    }

    /// Queue handle for outbound frames. Closed once the writer exits.
    pub fn sender(&self) -> mpsc::Sender<String> {
        self.tx.clone()
    }

    /// Cancelled when the connection closes or the server shuts down.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < self.client_timeout.as_secs()
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Every open connection, for counting, health and liveness sweeps.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<Connection>>,
    max_send_queue: usize,
    client_timeout: Duration,
    shutdown: CancellationToken,
}

impl ConnectionRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self::with_shutdown(max_send_queue, CLIENT_TIMEOUT, CancellationToken::new())
    }

    /// Connection tokens are children of `shutdown`.
    pub fn with_shutdown(
        max_send_queue: usize,
        client_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            connections: DashMap::new(),
            max_send_queue,
            client_timeout,
            shutdown,
        }
    }

    pub fn register(&self) -> (Arc<Connection>, mpsc::Receiver<String>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let connection = Arc::new(Connection::new(
            id.clone(),
            tx,
            self.shutdown.child_token(),
            self.client_timeout,
        ));
        self.connections.insert(id, Arc::clone(&connection));
        (connection, rx)
    }

    /// Remove and close a connection.
    pub fn unregister(&self, id: &ConnectionId) {
        if let Some((_, connection)) = self.connections.remove(id) {
            connection.close();
        }
    }

    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(id).map(|c| Arc::clone(c.value()))
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Close connections that stopped answering pings.
    pub fn cleanup_dead_connections(&self) -> usize {
        let dead: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|entry| !entry.value().is_alive())
            .map(|entry| entry.key().clone())
            .collect();

        for id in &dead {
            self.unregister(id);
            tracing::info!(connection_id = %id, "closed unresponsive connection");
        }
        dead.len()
    }
}

/// Sole owner of the socket sink. Forwards queued frames and pings until
/// the queue closes, a write fails, or the connection is cancelled.
pub async fn run_writer(
    mut ws_tx: SplitSink<WebSocket, WsMessage>,
    mut rx: mpsc::Receiver<String>,
    connection: Arc<Connection>,
    heartbeat: Duration,
) -> Result<(), ConnectionError> {
    let mut ping_interval = tokio::time::interval(heartbeat);
    ping_interval.tick().await;

    let result = loop {
        tokio::select! {
            biased;
            _ = connection.cancel_token().cancelled() => break Ok(()),
            msg = rx.recv() => {
                let Some(text) = msg else { break Ok(()) };
                if let Err(e) = ws_tx.send(WsMessage::Text(text.into())).await {
                    break Err(ConnectionError::Write(e.to_string()));
                }
            }
            _ = ping_interval.tick() => {
                if let Err(e) = ws_tx.send(WsMessage::Ping(Vec::new().into())).await {
                    break Err(ConnectionError::Write(e.to_string()));
                }
                tracing::trace!(connection_id = %connection.id, "sent ping");
            }
        }
    };

    // A failed write ends the session too.
    connection.close();
    let _ = ws_tx.close().await;
    result
}

/// Periodically sweep connections that missed their pongs.
pub fn start_cleanup_task(
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = registry.cleanup_dead_connections();
                    if removed > 0 {
                        tracing::info!(removed, "dead connection sweep");
                    }
                }
            }
        }
    })
}
