use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Future, Stream};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use ragstream_core::errors::{GenerationError, RetrievalError};
use ragstream_core::passage::RetrievedPassage;
use ragstream_core::provider::{Embedder, Generator, VectorIndex};
use ragstream_core::stream::FragmentStream;

use crate::prompt::PromptComposer;
use crate::segmenter::{ResidualPolicy, SentenceSegmenter};

pub const DEFAULT_TOP_K: usize = 3;

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub top_k: usize,
    /// Bounds embed + search together.
    pub retrieval_timeout: Duration,
    /// Bounds one whole generation, first byte to last sentence.
    pub generation_timeout: Duration,
    pub residual: ResidualPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            retrieval_timeout: Duration::from_secs(10),
            generation_timeout: Duration::from_secs(300),
            residual: ResidualPolicy::Discard,
        }
    }
}

/// Prompt ready for generation, with the passages behind it.
#[derive(Clone, Debug)]
pub struct Augmented {
    pub prompt: String,
    pub passages: Vec<RetrievedPassage>,
    /// False when retrieval failed and the raw query is used as the prompt.
    pub grounded: bool,
    pub retrieval_error: Option<RetrievalError>,
}

/// Full (non-streaming) answer.
#[derive(Clone, Debug, Serialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<RetrievedPassage>,
    pub grounded: bool,
}

/// Retrieve, augment, generate. Shared by every connection.
pub struct RagPipeline {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    generator: Arc<dyn Generator>,
    composer: PromptComposer,
    config: PipelineConfig,
}

impl RagPipeline {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        generator: Arc<dyn Generator>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            generator,
            composer: PromptComposer::default(),
            config,
        }
    }

    pub fn with_composer(mut self, composer: PromptComposer) -> Self {
        self.composer = composer;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn generation_model(&self) -> &str {
        self.generator.model()
    }

    pub fn embedding_model(&self) -> &str {
        self.embedder.model()
    }

    pub fn collection(&self) -> &str {
        self.index.collection()
    }

    /// Embed the query and search the index, within `retrieval_timeout`.
    #[instrument(skip_all, fields(top_k = self.config.top_k))]
    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedPassage>, RetrievalError> {
        let search = async {
            let vector = self.embedder.embed(query).await?;
            self.index.search(&vector, self.config.top_k).await
        };

        let passages = tokio::time::timeout(self.config.retrieval_timeout, search)
            .await
            .map_err(|_| RetrievalError::Timeout(self.config.retrieval_timeout))??;

        debug!(hits = passages.len(), "retrieval complete");
        Ok(passages)
    }

    /// Compose the prompt. Retrieval failure degrades to the raw query.
    pub async fn augment(&self, query: &str) -> Augmented {
        match self.retrieve(query).await {
            Ok(passages) => Augmented {
                prompt: self.composer.compose(query, &passages),
                passages,
                grounded: true,
                retrieval_error: None,
            },
            Err(e) => {
                warn!(error = %e, kind = e.error_kind(), "retrieval failed, answering ungrounded");
                Augmented {
                    prompt: query.to_string(),
                    passages: Vec::new(),
                    grounded: false,
                    retrieval_error: Some(e),
                }
            }
        }
    }

    /// Open a generation stream and segment it into sentences. One
    /// `generation_timeout` covers opening the stream and draining it.
    pub async fn stream_sentences(&self, prompt: &str) -> Result<SentenceStream, GenerationError> {
        let timeout = self.config.generation_timeout;
        let deadline = Instant::now() + timeout;
        let fragments = tokio::time::timeout_at(deadline, self.generator.generate(prompt))
            .await
            .map_err(|_| GenerationError::Timeout(timeout))??;
        Ok(SentenceStream::new(
            fragments,
            SentenceSegmenter::new(self.config.residual),
            deadline,
            timeout,
        ))
    }

    /// Whole answer in one call, for the HTTP query endpoint.
    #[instrument(skip_all)]
    pub async fn answer(&self, query: &str) -> Result<Answer, GenerationError> {
        let augmented = self.augment(query).await;
        let timeout = self.config.generation_timeout;
        let answer = tokio::time::timeout(timeout, self.generator.complete(&augmented.prompt))
            .await
            .map_err(|_| GenerationError::Timeout(timeout))??;

        Ok(Answer {
            answer,
            sources: augmented.passages,
            grounded: augmented.grounded,
        })
    }
}

/// Completed sentences from one generation.
///
/// Ends with `None` after the upstream finishes (flushing the residual per
/// policy), or with exactly one `Err` on upstream failure or when the
/// deadline passes. Residual text is never emitted after an error.
pub struct SentenceStream {
    inner: FragmentStream,
    segmenter: SentenceSegmenter,
    deadline: Pin<Box<tokio::time::Sleep>>,
    timeout: Duration,
    upstream_done: bool,
    finished: bool,
}

impl SentenceStream {
    /// `timeout` is only reported in the error; `deadline` is what fires.
    pub fn new(
        inner: FragmentStream,
        segmenter: SentenceSegmenter,
        deadline: Instant,
        timeout: Duration,
    ) -> Self {
        Self {
            inner,
            segmenter,
            deadline: Box::pin(tokio::time::sleep_until(deadline)),
            timeout,
            upstream_done: false,
            finished: false,
        }
    }
}

impl Stream for SentenceStream {
    type Item = Result<String, GenerationError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        loop {
            if self.upstream_done {
                self.finished = true;
                let residual = self.segmenter.finish();
                return Poll::Ready(residual.map(Ok));
            }

            if self.deadline.as_mut().poll(cx).is_ready() {
                self.finished = true;
                return Poll::Ready(Some(Err(GenerationError::Timeout(self.timeout))));
            }

            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(fragment))) => {
                    if fragment.done {
                        self.upstream_done = true;
                    }
                    if let Some(sentence) = self.segmenter.feed(&fragment.text) {
                        return Poll::Ready(Some(Ok(sentence)));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    self.finished = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    self.upstream_done = true;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
