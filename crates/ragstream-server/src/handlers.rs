use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use ragstream_core::errors::GenerationError;

use crate::server::AppState;

/// Liveness plus a metrics snapshot.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "connections": state.registry.count(),
        "generation_model": state.pipeline.generation_model(),
        "embedding_model": state.pipeline.embedding_model(),
        "collection": state.pipeline.collection(),
        "metrics": state.metrics.snapshot(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
}

pub enum ApiError {
    BadRequest(String),
    Generation(GenerationError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::BadRequest(error) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error,
                    kind: "bad_request",
                },
            ),
            Self::Generation(e) => {
                let status = match e {
                    GenerationError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                    _ => StatusCode::BAD_GATEWAY,
                };
                (
                    status,
                    ErrorBody {
                        kind: e.error_kind(),
                        error: e.to_string(),
                    },
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

/// Non-streaming answer: `{answer, sources, grounded}`.
pub async fn query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.query.trim().is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".into()));
    }

    state.metrics.counter_inc("queries_total", &[], 1);
    match state.pipeline.answer(&request.query).await {
        Ok(answer) => Ok(Json(answer)),
        Err(e) => {
            warn!(error = %e, kind = e.error_kind(), "query failed");
            state
                .metrics
                .counter_inc("generation_failures_total", &[("kind", e.error_kind())], 1);
            Err(ApiError::Generation(e))
        }
    }
}
