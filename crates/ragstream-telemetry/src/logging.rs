use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Output format for the stdout log layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line, with span context.
    #[default]
    Json,
    /// Human-readable, for local development.
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Build the filter directive string from a default level and per-module
/// overrides, e.g. `info,ragstream_llm=debug`.
pub fn filter_directives(level: Level, module_levels: &[(String, Level)]) -> String {
    let mut directives = level.to_string().to_lowercase();
    for (module, level) in module_levels {
        directives.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    directives
}

/// `RUST_LOG` wins when set; otherwise the configured directives apply.
pub fn build_env_filter(level: Level, module_levels: &[(String, Level)]) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(level, module_levels)))
}
