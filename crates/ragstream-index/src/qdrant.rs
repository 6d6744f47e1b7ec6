//! Similarity search against a Qdrant collection over its REST API.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use ragstream_core::errors::RetrievalError;
use ragstream_core::passage::RetrievedPassage;
use ragstream_core::provider::VectorIndex;

pub const DEFAULT_QDRANT_URL: &str = "http://localhost:6333";
pub const DEFAULT_COLLECTION: &str = "test_collection";

const CONTENT_KEY: &str = "pageContent";
const PAGE_KEY: &str = "pageNum";

#[derive(Clone, Debug)]
pub struct QdrantConfig {
    pub url: String,
    pub collection: String,
    /// Sent as the `api-key` header when set.
    pub api_key: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_QDRANT_URL.into(),
            collection: DEFAULT_COLLECTION.into(),
            api_key: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    vector: &'a [f32],
    limit: usize,
    with_payload: bool,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    result: Vec<ScoredPoint>,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    id: Value,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    payload: Option<serde_json::Map<String, Value>>,
}

pub struct QdrantIndex {
    client: reqwest::Client,
    config: QdrantConfig,
}

impl QdrantIndex {
    pub fn new(config: QdrantConfig) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .unwrap_or_default();
        Self { client, config }
    }

    fn search_url(&self) -> String {
        format!(
            "{}/collections/{}/points/search",
            self.config.url.trim_end_matches('/'),
            self.config.collection
        )
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    fn collection(&self) -> &str {
        &self.config.collection
    }

    #[instrument(skip_all, fields(collection = %self.config.collection, top_k = top_k))]
    async fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedPassage>, RetrievalError> {
        if top_k == 0 {
            return Err(RetrievalError::InvalidTopK);
        }

        let body = SearchRequest {
            vector: query_vector,
            limit: top_k,
            with_payload: true,
        };

        let mut request = self
            .client
            .post(self.search_url())
            .timeout(self.config.request_timeout)
            .json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.header("api-key", key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                RetrievalError::Timeout(self.config.request_timeout)
            } else {
                RetrievalError::Unreachable(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "vector search rejected");
            return Err(RetrievalError::from_status(
                status.as_u16(),
                &self.config.collection,
                body,
            ));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::Malformed(e.to_string()))?;

        let passages = parsed
            .result
            .into_iter()
            .enumerate()
            .map(|(rank, point)| to_passage(rank, point))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(hits = passages.len(), "vector search complete");
        Ok(passages)
    }
}

/// Page comes from `pageNum`, then a numeric point id, then the 1-based rank.
fn to_passage(rank: usize, point: ScoredPoint) -> Result<RetrievedPassage, RetrievalError> {
    let payload = point.payload.unwrap_or_default();

    let content = payload
        .get(CONTENT_KEY)
        .and_then(Value::as_str)
        .ok_or_else(|| {
            RetrievalError::Malformed(format!("point {} has no {CONTENT_KEY}", point.id))
        })?;

    let page = payload
        .get(PAGE_KEY)
        .and_then(as_page)
        .or_else(|| as_page(&point.id))
        .unwrap_or(rank as u64 + 1);

    Ok(RetrievedPassage::new(page, content).with_score(point.score))
}

fn as_page(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
