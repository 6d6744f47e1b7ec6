use std::time::Duration;

pub const DEFAULT_GENERATE_URL: &str = "http://localhost:11434/api/generate";
pub const DEFAULT_EMBED_URL: &str = "http://localhost:11434/api/embeddings";
pub const DEFAULT_GENERATION_MODEL: &str = "llama3.1";
pub const DEFAULT_EMBEDDING_MODEL: &str = "mxbai-embed-large";

/// Instruction `mxbai-embed-large` expects in front of retrieval queries.
pub const DEFAULT_QUERY_INSTRUCTION: &str =
    "Represent this sentence for searching relevant passages: ";

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Endpoints and models for an Ollama-compatible backend.
#[derive(Clone, Debug)]
pub struct OllamaConfig {
    pub generate_url: String,
    pub embed_url: String,
    pub generation_model: String,
    pub embedding_model: String,
    /// Prepended to text before embedding. Empty disables it.
    pub query_instruction: String,
    pub connect_timeout: Duration,
    /// Bounds the embedding call and the non-streaming completion call.
    pub request_timeout: Duration,
    /// Max silence between two chunks of a generation stream.
    pub idle_timeout: Duration,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            generate_url: DEFAULT_GENERATE_URL.into(),
            embed_url: DEFAULT_EMBED_URL.into(),
            generation_model: DEFAULT_GENERATION_MODEL.into(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.into(),
            query_instruction: DEFAULT_QUERY_INSTRUCTION.into(),
            connect_timeout: CONNECT_TIMEOUT,
            request_timeout: REQUEST_TIMEOUT,
            idle_timeout: STREAM_IDLE_TIMEOUT,
        }
    }
}

pub(crate) fn http_client(config: &OllamaConfig) -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(config.connect_timeout)
        .build()
        .unwrap_or_default()
}
