pub mod pipeline;
pub mod prompt;
pub mod segmenter;

pub use pipeline::{Answer, Augmented, PipelineConfig, RagPipeline, SentenceStream};
pub use prompt::PromptComposer;
pub use segmenter::{ResidualPolicy, SentenceSegmenter};
