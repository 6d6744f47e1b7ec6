use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use ragstream_core::errors::GenerationError;
use ragstream_core::provider::Generator;
use ragstream_core::stream::FragmentStream;

use crate::config::{http_client, OllamaConfig};
use crate::ndjson::NdjsonStream;

const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompleteResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    error: Option<String>,
}

/// Streaming text generation against an Ollama-style `/api/generate`.
pub struct OllamaGenerator {
    client: reqwest::Client,
    config: OllamaConfig,
}

impl OllamaGenerator {
    pub fn new(config: OllamaConfig) -> Self {
        Self {
            client: http_client(&config),
            config,
        }
    }

    async fn post(
        &self,
        prompt: &str,
        stream: bool,
    ) -> Result<reqwest::Response, GenerationError> {
        let body = GenerateRequest {
            model: &self.config.generation_model,
            prompt,
            stream,
        };

        let mut request = self.client.post(&self.config.generate_url).json(&body);
        if !stream {
            request = request.timeout(self.config.request_timeout);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                GenerationError::Timeout(self.config.request_timeout)
            } else {
                GenerationError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            truncate_in_place(&mut body, MAX_ERROR_BODY);
            warn!(status = status.as_u16(), body = %body, "generation request rejected");
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model(&self) -> &str {
        &self.config.generation_model
    }

    #[instrument(skip_all, fields(model = %self.config.generation_model, prompt_len = prompt.len()))]
    async fn generate(&self, prompt: &str) -> Result<FragmentStream, GenerationError> {
        let response = self.post(prompt, true).await?;
        debug!("generation stream opened");
        Ok(Box::pin(NdjsonStream::new(
            response.bytes_stream(),
            self.config.idle_timeout,
        )))
    }

    #[instrument(skip_all, fields(model = %self.config.generation_model, prompt_len = prompt.len()))]
    async fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
        let response = self.post(prompt, false).await?;
        let parsed: CompleteResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                GenerationError::Timeout(self.config.request_timeout)
            } else {
                GenerationError::Decode(e.to_string())
            }
        })?;

        if let Some(error) = parsed.error {
            return Err(GenerationError::Backend(error));
        }
        if parsed.response.is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        Ok(parsed.response)
    }
}

fn truncate_in_place(s: &mut String, max_bytes: usize) {
    if s.len() <= max_bytes {
        return;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> OllamaConfig {
        OllamaConfig {
            generate_url: format!("{}/api/generate", server.uri()),
            ..OllamaConfig::default()
        }
    }

    fn ndjson(lines: &[&str]) -> String {
        lines.iter().map(|l| format!("{l}\n")).collect()
    }

    #[tokio::test]
    async fn streams_fragments_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({
                "model": "llama3.1",
                "prompt": "Answer the query: karma",
                "stream": true
            })))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                ndjson(&[
                    r#"{"response":"Karma is action. "}"#,
                    r#"{"response":"It binds."}"#,
                    r#"{"response":"","done":true}"#,
                ]),
                "application/x-ndjson",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let generator = OllamaGenerator::new(config_for(&server));
        let stream = generator.generate("Answer the query: karma").await.unwrap();
        let fragments: Vec<_> = stream.collect().await;

        let texts: Vec<String> = fragments.into_iter().map(|f| f.unwrap().text).collect();
        assert_eq!(texts, vec!["Karma is action. ", "It binds.", ""]);
    }

    #[tokio::test]
    async fn non_success_status_fails_before_streaming() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model crashed"))
            .mount(&server)
            .await;

        let generator = OllamaGenerator::new(config_for(&server));
        let err = match generator.generate("q").await {
            Err(e) => e,
            Ok(_) => panic!("expected status error"),
        };
        assert!(
            matches!(&err, GenerationError::Status { status: 500, body } if body == "model crashed")
        );
    }

    #[tokio::test]
    async fn backend_error_line_ends_stream() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                ndjson(&[
                    r#"{"response":"Partial "}"#,
                    r#"{"error":"out of memory"}"#,
                ]),
                "application/x-ndjson",
            ))
            .mount(&server)
            .await;

        let generator = OllamaGenerator::new(config_for(&server));
        let items: Vec<_> = generator.generate("q").await.unwrap().collect().await;
        assert_eq!(items.len(), 2);
        assert!(matches!(&items[1], Err(GenerationError::Backend(m)) if m == "out of memory"));
    }

    #[tokio::test]
    async fn unreachable_backend_is_network_error() {
        let config = OllamaConfig {
            generate_url: "http://127.0.0.1:1/api/generate".into(),
            ..OllamaConfig::default()
        };
        let generator = OllamaGenerator::new(config);
        assert!(matches!(
            generator.generate("q").await,
            Err(GenerationError::Network(_))
        ));
    }

    #[tokio::test]
    async fn complete_uses_non_streaming_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({ "stream": false })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "llama3.1",
                "response": "Detachment brings peace.",
                "done": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        let generator = OllamaGenerator::new(config_for(&server));
        let answer = generator.complete("q").await.unwrap();
        assert_eq!(answer, "Detachment brings peace.");
    }

    #[tokio::test]
    async fn complete_empty_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "response": "", "done": true })),
            )
            .mount(&server)
            .await;

        let generator = OllamaGenerator::new(config_for(&server));
        assert!(matches!(
            generator.complete("q").await,
            Err(GenerationError::EmptyResponse)
        ));
    }

    #[test]
    fn truncate_respects_char_boundary() {
        let mut s = "aé".to_string();
        truncate_in_place(&mut s, 2);
        assert_eq!(s, "a");
    }
}
