use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use ragstream_engine::RagPipeline;
use ragstream_telemetry::MetricsRecorder;

use crate::connection::{self, ConnectionRegistry, CLIENT_TIMEOUT, HEARTBEAT_INTERVAL};
use crate::handlers;
use crate::session;

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_send_queue: usize,
    pub heartbeat_interval: Duration,
    pub client_timeout: Duration,
    pub cleanup_interval: Duration,
    /// Bounds the non-streaming HTTP query endpoint.
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            max_send_queue: 256,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            client_timeout: CLIENT_TIMEOUT,
            cleanup_interval: Duration::from_secs(60),
            request_timeout: Duration::from_secs(300),
        }
    }
}

/// Shared state passed to every handler and session.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<RagPipeline>,
    pub registry: Arc<ConnectionRegistry>,
    pub metrics: Arc<MetricsRecorder>,
    pub heartbeat_interval: Duration,
}

pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(handlers::health))
        .route(
            "/v1/query",
            post(handlers::query).layer(TimeoutLayer::new(request_timeout)),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind, spawn the server and the liveness sweep. Port 0 picks a free port.
pub async fn start(
    config: ServerConfig,
    pipeline: Arc<RagPipeline>,
    metrics: Arc<MetricsRecorder>,
) -> Result<ServerHandle, std::io::Error> {
    let shutdown = CancellationToken::new();
    let registry = Arc::new(ConnectionRegistry::with_shutdown(
        config.max_send_queue,
        config.client_timeout,
        shutdown.clone(),
    ));

    let cleanup = connection::start_cleanup_task(
        Arc::clone(&registry),
        config.cleanup_interval,
        shutdown.clone(),
    );

    let state = AppState {
        pipeline: Arc::clone(&pipeline),
        registry: Arc::clone(&registry),
        metrics,
        heartbeat_interval: config.heartbeat_interval,
    };

    let router = build_router(state, config.request_timeout);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(
        addr = %local_addr,
        generation_model = pipeline.generation_model(),
        embedding_model = pipeline.embedding_model(),
        collection = pipeline.collection(),
        "ragstream server started"
    );

    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "server exited with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        registry,
        shutdown,
        server,
        _cleanup: cleanup,
    })
}

/// Returned by [`start`]; keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    registry: Arc<ConnectionRegistry>,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
    _cleanup: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub fn connections(&self) -> usize {
        self.registry.count()
    }

    /// Stop accepting, cancel every connection and wait for the listener.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.server.await {
            tracing::warn!(error = %e, "server task ended abnormally");
        }
        tracing::info!("ragstream server stopped");
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| session::serve_socket(socket, state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragstream_engine::PipelineConfig;
    use ragstream_index::MockIndex;
    use ragstream_llm::{MockEmbedder, MockGenerator, MockResponse};

    fn pipeline(generator: MockGenerator) -> Arc<RagPipeline> {
        Arc::new(RagPipeline::new(
            Arc::new(MockEmbedder::new(vec![0.1, 0.2])),
            Arc::new(MockIndex::new(vec![
                ragstream_core::passage::RetrievedPassage::new(12, "Do your duty."),
            ])),
            Arc::new(generator),
            PipelineConfig::default(),
        ))
    }

    async fn start_test_server(generator: MockGenerator) -> ServerHandle {
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            ..Default::default()
        };
        start(config, pipeline(generator), Arc::new(MetricsRecorder::new()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let handle = start_test_server(MockGenerator::new(vec![])).await;
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["connections"], 0);
        assert_eq!(body["generation_model"], "mock-model");
        assert_eq!(body["embedding_model"], "mock-embed");
        assert!(body["metrics"]["samples"].is_array());

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn query_endpoint_returns_answer_and_sources() {
        let handle =
            start_test_server(MockGenerator::new(vec![MockResponse::fragments(["Act well."])]))
                .await;

        let resp = reqwest::Client::new()
            .post(format!("http://127.0.0.1:{}/v1/query", handle.port))
            .json(&serde_json::json!({ "query": "What is duty?" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["answer"], "Act well.");
        assert_eq!(body["grounded"], true);
        assert_eq!(body["sources"][0]["rank"], 12);
        assert_eq!(body["sources"][0]["content"], "Do your duty.");
    }

    #[tokio::test]
    async fn query_endpoint_maps_generation_failure() {
        let handle = start_test_server(MockGenerator::new(vec![MockResponse::Error(
            ragstream_core::errors::GenerationError::Network("refused".into()),
        )]))
        .await;

        let resp = reqwest::Client::new()
            .post(format!("http://127.0.0.1:{}/v1/query", handle.port))
            .json(&serde_json::json!({ "query": "What is duty?" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 502);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["kind"], "network_error");
    }

    #[tokio::test]
    async fn query_endpoint_rejects_blank_query() {
        let handle = start_test_server(MockGenerator::new(vec![])).await;
        let resp = reqwest::Client::new()
            .post(format!("http://127.0.0.1:{}/v1/query", handle.port))
            .json(&serde_json::json!({ "query": "   " }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }
}
