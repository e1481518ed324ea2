//! HTTP generation client speaking a messages-style completion protocol.

use crate::generation::{GenerationClient, GenerationError, GenerationOutput};
use crate::model::TokenUsage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Serialize)]
struct GenerationRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: [Message<'a>; 1],
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct GenerationResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: UsageBlock,
}

#[derive(Deserialize)]
struct ContentBlock {
    text: String,
}

#[derive(Default, Deserialize)]
struct UsageBlock {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// Client for a messages-style `/v1/messages` completion endpoint.
pub struct HttpGenerationClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpGenerationClient {
    /// Build a client for `base_url` (no trailing slash) and `model`.
    pub fn new(base_url: &str, model: &str, api_key: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            endpoint: format!("{}/v1/messages", base_url.trim_end_matches('/')),
            model: model.to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl GenerationClient for HttpGenerationClient {
    async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<GenerationOutput, GenerationError> {
        let mut request = self.http.post(&self.endpoint).json(&GenerationRequest {
            model: &self.model,
            max_tokens,
            temperature,
            messages: [Message {
                role: "user",
                content: prompt,
            }],
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|err| GenerationError::Request(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(GenerationError::Status(status.as_u16()));
        }
        let body: GenerationResponse = response
            .json()
            .await
            .map_err(|err| GenerationError::Malformed(err.to_string()))?;
        let text = body
            .content
            .into_iter()
            .next()
            .map(|block| block.text)
            .ok_or_else(|| GenerationError::Malformed("empty content array".to_string()))?;
        Ok(GenerationOutput {
            text,
            usage: TokenUsage {
                input_tokens: body.usage.input_tokens,
                output_tokens: body.usage.output_tokens,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    #[tokio::test]
    async fn generates_via_http() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/v1/messages").json_body(json!({
                "model": "test-gen",
                "max_tokens": 100,
                "temperature": 0.1,
                "messages": [{ "role": "user", "content": "say hi" }]
            }));
            then.status(200).json_body(json!({
                "content": [{ "text": "hi" }],
                "usage": { "input_tokens": 4, "output_tokens": 1 }
            }));
        });

        let client = HttpGenerationClient::new(&server.base_url(), "test-gen", None);
        let output = client.generate("say hi", 100, 0.1).await.unwrap();
        assert_eq!(output.text, "hi");
        assert_eq!(output.usage.total(), 5);
        mock.assert();
    }

    #[tokio::test]
    async fn provider_failure_is_not_retried() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/v1/messages");
            then.status(500);
        });

        let client = HttpGenerationClient::new(&server.base_url(), "test-gen", None);
        assert!(matches!(
            client.generate("say hi", 100, 0.1).await,
            Err(GenerationError::Status(500))
        ));
        mock.assert_hits(1);
    }

    #[tokio::test]
    async fn missing_usage_defaults_to_zero() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/messages");
            then.status(200)
                .json_body(json!({ "content": [{ "text": "hi" }] }));
        });

        let client = HttpGenerationClient::new(&server.base_url(), "test-gen", None);
        let output = client.generate("say hi", 100, 0.1).await.unwrap();
        assert_eq!(output.usage, TokenUsage::zero());
    }
}
