use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use ragstream_core::errors::GenerationError;
use ragstream_core::frame::Correlation;
use ragstream_core::ids::{ConnectionId, GenerationId};
use ragstream_engine::RagPipeline;
use ragstream_telemetry::MetricsRecorder;

/// One query in flight on one connection.
pub struct GenerationTask {
    pub connection_id: ConnectionId,
    pub correlation: Correlation,
    pub payload: String,
    pub pipeline: Arc<RagPipeline>,
    pub metrics: Arc<MetricsRecorder>,
    pub tx: mpsc::Sender<String>,
    pub cancel: CancellationToken,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Completed { sentences: usize },
    Failed { kind: &'static str },
    /// The outbound queue closed under us.
    Disconnected,
    Cancelled,
}

enum StreamEnd {
    Done(usize),
    Failed(GenerationError),
    QueueClosed,
    Cancelled,
}

impl GenerationTask {
    /// Retrieve, augment, generate and write one frame per sentence.
    pub async fn run(self) -> Outcome {
        let generation_id = GenerationId::new();
        let span = tracing::info_span!(
            "generation",
            generation_id = %generation_id,
            connection_id = %self.connection_id,
            client_id = %self.correlation.client_id,
            message_id = self.correlation.message_id
        );
        self.run_inner().instrument(span).await
    }

    async fn run_inner(self) -> Outcome {
        let started = Instant::now();
        self.metrics.counter_inc("queries_total", &[], 1);

        let end = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            end = self.stream_answer() => Some(end),
        };

        let outcome = match end {
            None | Some(StreamEnd::Cancelled) => {
                debug!("generation cancelled");
                Outcome::Cancelled
            }
            Some(StreamEnd::Done(sentences)) => {
                info!(sentences, "generation complete");
                Outcome::Completed { sentences }
            }
            Some(StreamEnd::QueueClosed) => {
                debug!("outbound queue closed, dropping generation");
                Outcome::Disconnected
            }
            Some(StreamEnd::Failed(e)) => {
                let kind = e.error_kind();
                warn!(error = %e, kind, "generation failed");
                self.metrics
                    .counter_inc("generation_failures_total", &[("kind", kind)], 1);
                self.send_error_frame(&e).await;
                Outcome::Failed { kind }
            }
        };

        self.metrics.histogram_observe(
            "generation_duration_ms",
            &[],
            started.elapsed().as_secs_f64() * 1000.0,
        );
        outcome
    }

    async fn stream_answer(&self) -> StreamEnd {
        let augmented = self.pipeline.augment(&self.payload).await;
        if let Some(e) = &augmented.retrieval_error {
            self.metrics
                .counter_inc("retrieval_failures_total", &[("kind", e.error_kind())], 1);
        }
        debug!(
            grounded = augmented.grounded,
            passages = augmented.passages.len(),
            prompt_len = augmented.prompt.len(),
            "prompt ready"
        );

        let mut sentences = match self.pipeline.stream_sentences(&augmented.prompt).await {
            Ok(s) => s,
            Err(e) => return StreamEnd::Failed(e),
        };

        let mut count = 0;
        while let Some(item) = sentences.next().await {
            let sentence = match item {
                Ok(s) => s,
                Err(e) => return StreamEnd::Failed(e),
            };
            // A closed connection takes no further frames.
            if self.cancel.is_cancelled() {
                return StreamEnd::Cancelled;
            }
            let frame = self.correlation.reply(sentence).to_json();
            if self.tx.send(frame).await.is_err() {
                return StreamEnd::QueueClosed;
            }
            count += 1;
            self.metrics.counter_inc("sentences_emitted_total", &[], 1);
        }
        StreamEnd::Done(count)
    }

    /// Best effort. Skipped once the connection is cancelled.
    async fn send_error_frame(&self, error: &GenerationError) {
        let frame = self.correlation.error_reply(error.to_string()).to_json();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {}
            result = self.tx.send(frame) => {
                if result.is_err() {
                    debug!("error frame not delivered, queue closed");
                }
            }
        }
    }
}
