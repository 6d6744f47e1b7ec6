use async_trait::async_trait;
use futures::StreamExt;

use crate::errors::{EmbeddingError, GenerationError, RetrievalError};
use crate::passage::RetrievedPassage;
use crate::stream::FragmentStream;

/// Turns text into a fixed-length vector via a remote embedding model.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Similarity search over stored passages.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Name of the collection being searched, for logs and health output.
    fn collection(&self) -> &str;

    /// Top-`top_k` passages in the backend's order (descending similarity).
    /// An empty index yields an empty `Vec`, not an error.
    async fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedPassage>, RetrievalError>;
}

/// Streaming text generation backend.
#[async_trait]
pub trait Generator: Send + Sync {
    fn model(&self) -> &str;

    /// Open one streaming generation call. Errors here mean the call never
    /// started (connection failure, non-success status).
    async fn generate(&self, prompt: &str) -> Result<FragmentStream, GenerationError>;

    /// Generate the whole answer at once. The default drains [`generate`].
    ///
    /// [`generate`]: Generator::generate
    async fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
        let mut stream = self.generate(prompt).await?;
        let mut text = String::new();
        while let Some(fragment) = stream.next().await {
            text.push_str(&fragment?.text);
        }
        if text.is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::GenerationFragment;

    struct Fixed(Vec<Result<GenerationFragment, GenerationError>>);

    #[async_trait]
    impl Generator for Fixed {
        fn model(&self) -> &str {
            "fixed"
        }

        async fn generate(&self, _prompt: &str) -> Result<FragmentStream, GenerationError> {
            Ok(Box::pin(futures::stream::iter(self.0.clone())))
        }
    }

    #[tokio::test]
    async fn complete_concatenates_fragments() {
        let gen = Fixed(vec![
            Ok(GenerationFragment::text("Hello ")),
            Ok(GenerationFragment::text("world.")),
        ]);
        assert_eq!(gen.complete("q").await.unwrap(), "Hello world.");
    }

    #[tokio::test]
    async fn complete_propagates_stream_error() {
        let gen = Fixed(vec![
            Ok(GenerationFragment::text("partial")),
            Err(GenerationError::Decode("bad line".into())),
        ]);
        assert!(matches!(
            gen.complete("q").await,
            Err(GenerationError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn complete_rejects_empty_output() {
        let gen = Fixed(vec![]);
        assert!(matches!(
            gen.complete("q").await,
            Err(GenerationError::EmptyResponse)
        ));
    }
}
