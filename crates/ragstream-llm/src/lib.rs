//! Ollama-compatible embedding and streaming generation clients.

pub mod config;
pub mod embeddings;
pub mod generate;
pub mod mock;
pub mod ndjson;

pub use config::OllamaConfig;
pub use embeddings::{OllamaEmbedder, MAX_EMBED_INPUT_CHARS};
pub use generate::OllamaGenerator;
pub use mock::{MockEmbedder, MockGenerator, MockResponse};
pub use ndjson::NdjsonStream;
