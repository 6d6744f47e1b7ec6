use std::pin::Pin;

use futures::Stream;

use crate::errors::GenerationError;

/// One incremental piece of generated text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerationFragment {
    pub text: String,
    /// The backend marked this as its final fragment.
    pub done: bool,
}

impl GenerationFragment {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            done: false,
        }
    }
}

/// Lazy, finite sequence of fragments. At most one `Err` item is produced,
/// and it is always the last item.
pub type FragmentStream =
    Pin<Box<dyn Stream<Item = Result<GenerationFragment, GenerationError>> + Send>>;
