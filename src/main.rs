use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::Level;

use ragstream_core::provider::{Embedder, Generator, VectorIndex};
use ragstream_engine::{PipelineConfig, PromptComposer, RagPipeline, ResidualPolicy};
use ragstream_index::{QdrantConfig, QdrantIndex};
use ragstream_llm::{OllamaConfig, OllamaEmbedder, OllamaGenerator};
use ragstream_server::ServerConfig;
use ragstream_telemetry::{init_telemetry, LogFormat, TelemetryConfig};

/// Streaming retrieval-augmented answers over WebSocket.
#[derive(Parser, Debug)]
#[command(name = "ragstream", version, about)]
struct Args {
    #[arg(long, env = "RAGSTREAM_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "RAGSTREAM_PORT", default_value_t = 8080)]
    port: u16,

    /// Streaming generation endpoint.
    #[arg(long, env = "LLAMA_URL", default_value = ragstream_llm::config::DEFAULT_GENERATE_URL)]
    llama_url: String,

    #[arg(long, env = "EMBEDDING_URL", default_value = ragstream_llm::config::DEFAULT_EMBED_URL)]
    embedding_url: String,

    #[arg(long, env = "GENERATION_MODEL", default_value = ragstream_llm::config::DEFAULT_GENERATION_MODEL)]
    generation_model: String,

    #[arg(long, env = "EMBEDDING_MODEL", default_value = ragstream_llm::config::DEFAULT_EMBEDDING_MODEL)]
    embedding_model: String,

    #[arg(long, env = "QDRANT_URL", default_value = ragstream_index::qdrant::DEFAULT_QDRANT_URL)]
    qdrant_url: String,

    #[arg(long, env = "QDRANT_COLLECTION", default_value = ragstream_index::qdrant::DEFAULT_COLLECTION)]
    qdrant_collection: String,

    #[arg(long, env = "QDRANT_API_KEY", hide_env_values = true)]
    qdrant_api_key: Option<String>,

    /// Passages retrieved per query.
    #[arg(long, env = "TOP_K", default_value_t = 3, value_parser = clap::value_parser!(u64).range(1..))]
    top_k: u64,

    #[arg(long, env = "RETRIEVAL_TIMEOUT_SECS", default_value_t = 10)]
    retrieval_timeout_secs: u64,

    #[arg(long, env = "GENERATION_TIMEOUT_SECS", default_value_t = 300)]
    generation_timeout_secs: u64,

    /// Emit trailing text that never reached sentence punctuation.
    #[arg(long, env = "FLUSH_RESIDUAL")]
    flush_residual: bool,

    /// Overrides the prompt template. Must contain `{query}` and `{context}`.
    #[arg(long, env = "PROMPT_TEMPLATE")]
    prompt_template: Option<String>,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: Level,

    /// `json` or `pretty`.
    #[arg(long, env = "LOG_FORMAT", default_value = "json")]
    log_format: LogFormat,
}

impl Args {
    fn ollama_config(&self) -> OllamaConfig {
        OllamaConfig {
            generate_url: self.llama_url.clone(),
            embed_url: self.embedding_url.clone(),
            generation_model: self.generation_model.clone(),
            embedding_model: self.embedding_model.clone(),
            ..OllamaConfig::default()
        }
    }

    fn qdrant_config(&self) -> QdrantConfig {
        QdrantConfig {
            url: self.qdrant_url.clone(),
            collection: self.qdrant_collection.clone(),
            api_key: self.qdrant_api_key.clone(),
            ..QdrantConfig::default()
        }
    }

    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            top_k: self.top_k as usize,
            retrieval_timeout: Duration::from_secs(self.retrieval_timeout_secs),
            generation_timeout: Duration::from_secs(self.generation_timeout_secs),
            residual: if self.flush_residual {
                ResidualPolicy::Flush
            } else {
                ResidualPolicy::Discard
            },
        }
    }

    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            request_timeout: Duration::from_secs(self.generation_timeout_secs),
            ..ServerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let telemetry = init_telemetry(TelemetryConfig {
        log_level: args.log_level,
        module_levels: vec![
            ("hyper".into(), Level::WARN),
            ("reqwest".into(), Level::WARN),
        ],
        format: args.log_format,
    });

    tracing::info!("starting ragstream");

    let ollama = args.ollama_config();
    let embedder: Arc<dyn Embedder> = Arc::new(OllamaEmbedder::new(ollama.clone()));
    let generator: Arc<dyn Generator> = Arc::new(OllamaGenerator::new(ollama));
    let index: Arc<dyn VectorIndex> = Arc::new(QdrantIndex::new(args.qdrant_config()));

    let mut pipeline = RagPipeline::new(embedder, index, generator, args.pipeline_config());
    if let Some(template) = &args.prompt_template {
        if !template.contains("{query}") || !template.contains("{context}") {
            anyhow::bail!("prompt template must contain {{query}} and {{context}}");
        }
        pipeline = pipeline.with_composer(PromptComposer::new(template.clone()));
    }

    let handle = ragstream_server::start(
        args.server_config(),
        Arc::new(pipeline),
        telemetry.metrics(),
    )
    .await
    .with_context(|| format!("failed to bind {}:{}", args.host, args.port))?;

    tracing::info!(port = handle.port, "ragstream ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}
