use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use ragstream_core::errors::RetrievalError;
use ragstream_core::passage::RetrievedPassage;
use ragstream_core::provider::VectorIndex;

/// In-memory index returning a fixed passage list (or a fixed error).
pub struct MockIndex {
    result: Result<Vec<RetrievedPassage>, RetrievalError>,
    delay: Option<Duration>,
    call_count: AtomicUsize,
    last_top_k: Mutex<Option<usize>>,
}

impl MockIndex {
    pub fn new(passages: Vec<RetrievedPassage>) -> Self {
        Self {
            result: Ok(passages),
            delay: None,
            call_count: AtomicUsize::new(0),
            last_top_k: Mutex::new(None),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn failing(error: RetrievalError) -> Self {
        Self {
            result: Err(error),
            ..Self::empty()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn last_top_k(&self) -> Option<usize> {
        *self.last_top_k.lock()
    }
}

#[async_trait]
impl VectorIndex for MockIndex {
    fn collection(&self) -> &str {
        "mock"
    }

    async fn search(
        &self,
        _query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedPassage>, RetrievalError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        *self.last_top_k.lock() = Some(top_k);

        if top_k == 0 {
            return Err(RetrievalError::InvalidTopK);
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut passages = self.result.clone()?;
        passages.truncate(top_k);
        Ok(passages)
    }
}
