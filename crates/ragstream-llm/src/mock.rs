use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;

use ragstream_core::errors::{EmbeddingError, GenerationError};
use ragstream_core::provider::{Embedder, Generator};
use ragstream_core::stream::{FragmentStream, GenerationFragment};

/// Pre-programmed generation behavior for deterministic tests.
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Yield each string as one fragment, then end.
    Fragments(Vec<String>),
    /// Sleep before each fragment.
    Paced(Duration, Vec<String>),
    /// Yield the fragments, then a terminal error.
    FailAfter(Vec<String>, GenerationError),
    /// Yield the fragments, then never end.
    Stall(Vec<String>),
    /// `generate()` itself fails.
    Error(GenerationError),
    /// Wait, then resolve the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    pub fn fragments<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Fragments(parts.into_iter().map(Into::into).collect())
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

fn text_items(parts: Vec<String>) -> Vec<Result<GenerationFragment, GenerationError>> {
    parts
        .into_iter()
        .map(|p| Ok(GenerationFragment::text(p)))
        .collect()
}

/// Unrolls nested delays iteratively to avoid recursive async.
async fn resolve_response(response: MockResponse) -> Result<FragmentStream, GenerationError> {
    let mut current = response;
    loop {
        match current {
            MockResponse::Fragments(parts) => {
                return Ok(Box::pin(stream::iter(text_items(parts))));
            }
            MockResponse::Paced(delay, parts) => {
                return Ok(Box::pin(stream::iter(parts).then(move |p| async move {
                    tokio::time::sleep(delay).await;
                    Ok(GenerationFragment::text(p))
                })));
            }
            MockResponse::FailAfter(parts, error) => {
                return Ok(Box::pin(
                    stream::iter(text_items(parts)).chain(stream::once(async move { Err(error) })),
                ));
            }
            MockResponse::Stall(parts) => {
                return Ok(Box::pin(
                    stream::iter(text_items(parts)).chain(stream::pending()),
                ));
            }
            MockResponse::Error(e) => return Err(e),
            MockResponse::Delay(duration, inner) => {
                tokio::time::sleep(duration).await;
                current = *inner;
            }
        }
    }
}

type Router = Box<dyn Fn(&str) -> MockResponse + Send + Sync>;

enum Script {
    Sequence(Vec<MockResponse>),
    Always(MockResponse),
    Routed(Router),
}

/// Generator returning scripted responses, recording every prompt it sees.
pub struct MockGenerator {
    script: Script,
    call_count: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl MockGenerator {
    /// One response per call, in order. Calls past the end fail.
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self::with_script(Script::Sequence(responses))
    }

    /// The same response for every call.
    pub fn always(response: MockResponse) -> Self {
        Self::with_script(Script::Always(response))
    }

    /// Pick the response from the prompt. Useful when calls race.
    pub fn routed(router: impl Fn(&str) -> MockResponse + Send + Sync + 'static) -> Self {
        Self::with_script(Script::Routed(Box::new(router)))
    }

    fn with_script(script: Script) -> Self {
        Self {
            script,
            call_count: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl Generator for MockGenerator {
    fn model(&self) -> &str {
        "mock-model"
    }

    async fn generate(&self, prompt: &str) -> Result<FragmentStream, GenerationError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.prompts.lock().push(prompt.to_string());

        let response = match &self.script {
            Script::Sequence(responses) => responses.get(idx).cloned().ok_or_else(|| {
                GenerationError::Backend(format!(
                    "MockGenerator: no response configured for call {idx}"
                ))
            })?,
            Script::Always(response) => response.clone(),
            Script::Routed(router) => router(prompt),
        };

        resolve_response(response).await
    }
}

/// Embedder returning a fixed vector or a fixed error.
pub struct MockEmbedder {
    result: Result<Vec<f32>, EmbeddingError>,
    delay: Option<Duration>,
    call_count: AtomicUsize,
}

impl MockEmbedder {
    pub fn new(vector: Vec<f32>) -> Self {
        Self {
            result: Ok(vector),
            delay: None,
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: EmbeddingError) -> Self {
        Self {
            result: Err(error),
            delay: None,
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    fn model(&self) -> &str {
        "mock-embed"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.result.clone()
    }
}
