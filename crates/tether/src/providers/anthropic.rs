use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;

use super::base::{Provider, Usage};
use super::configs::{AnthropicProviderConfig, ANTHROPIC_API_VERSION, DEFAULT_MAX_TOKENS};
use crate::models::message::Message;
use crate::models::role::Role;
use crate::models::tool::{Tool, ToolCall};

pub struct AnthropicProvider {
    client: Client,
    config: AnthropicProviderConfig,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self { client, config })
    }

    fn get_usage(data: &Value) -> Usage {
        let input_tokens = data["usage"]["input_tokens"].as_i64().map(|n| n as i32);
        let output_tokens = data["usage"]["output_tokens"].as_i64().map(|n| n as i32);
        let total_tokens = match (input_tokens, output_tokens) {
            (Some(input), Some(output)) => Some(input + output),
            _ => None,
        };
        Usage::new(input_tokens, output_tokens, total_tokens)
    }

    fn messages_to_anthropic_spec(messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .map(|message| {
                let role = match message.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                // History turns are plain text; tool requests never get stored
                json!({
                    "role": role,
                    "content": message.text(),
                })
            })
            .collect()
    }

    fn tools_to_anthropic_spec(tools: &[Tool]) -> Vec<Value> {
        tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "input_schema": tool.input_schema,
                })
            })
            .collect()
    }

    fn response_to_message(response: &Value) -> Result<Message> {
        let blocks = response
            .get("content")
            .and_then(|c| c.as_array())
            .ok_or_else(|| anyhow!("Invalid response format from Anthropic API"))?;

        let mut message = Message::assistant();
        for block in blocks {
            match block.get("type").and_then(|t| t.as_str()) {
                Some("text") => {
                    let text = block["text"]
                        .as_str()
                        .ok_or_else(|| anyhow!("Text block without text"))?;
                    message = message.with_text(text);
                }
                Some("tool_use") => {
                    let name = block["name"]
                        .as_str()
                        .ok_or_else(|| anyhow!("Tool use block without a name"))?;
                    let id = block["id"].as_str().unwrap_or_default();
                    let arguments = block.get("input").cloned().unwrap_or_else(|| json!({}));
                    message = message.with_tool_request(id, ToolCall::new(name, arguments));
                }
                other => {
                    tracing::debug!(block_type = ?other, "skipping unsupported content block");
                }
            }
        }
        Ok(message)
    }

    async fn post(&self, payload: Value) -> Result<Value> {
        let url = format!("{}/v1/messages", self.config.host.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_API_VERSION)
            .json(&payload)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(response.json().await?),
            status if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() >= 500 => {
                Err(anyhow!("Server error: {}", status))
            }
            status => {
                let error_text = response.text().await?;
                Err(anyhow!("Request failed: {} - {}", status, error_text))
            }
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<(Message, Usage)> {
        let mut payload = json!({
            "model": self.config.model,
            "messages": Self::messages_to_anthropic_spec(messages),
            "max_tokens": self.config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        });

        if let Some(object) = payload.as_object_mut() {
            if !tools.is_empty() {
                object.insert("tools".to_string(), json!(Self::tools_to_anthropic_spec(tools)));
            }
            if !system.is_empty() {
                object.insert("system".to_string(), json!(system));
            }
            if let Some(temp) = self.config.temperature {
                object.insert("temperature".to_string(), json!(temp));
            }
        }

        let response = self.post(payload).await?;

        let message = Self::response_to_message(&response)?;
        let usage = Self::get_usage(&response);

        Ok((message, usage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::MessageContent;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn setup_mock_server(status: u16, response_body: Value) -> (MockServer, AnthropicProvider) {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test_api_key"))
            .and(header("anthropic-version", ANTHROPIC_API_VERSION))
            .respond_with(ResponseTemplate::new(status).set_body_json(response_body))
            .mount(&mock_server)
            .await;

        let config = AnthropicProviderConfig {
            host: mock_server.uri(),
            api_key: "test_api_key".to_string(),
            model: "claude-3-5-sonnet-20241022".to_string(),
            temperature: Some(0.7),
            max_tokens: None,
        };

        let provider = AnthropicProvider::new(config).unwrap();
        (mock_server, provider)
    }

    #[tokio::test]
    async fn test_complete_basic() -> Result<()> {
        let response_body = json!({
            "id": "msg_123",
            "type": "message",
            "role": "assistant",
            "content": [{
                "type": "text",
                "text": "Hello! How can I assist you today?"
            }],
            "model": "claude-3-5-sonnet-20241022",
            "stop_reason": "end_turn",
            "usage": {
                "input_tokens": 12,
                "output_tokens": 15
            }
        });

        let (_server, provider) = setup_mock_server(200, response_body).await;

        let messages = vec![Message::user().with_text("Hello?")];
        let (message, usage) = provider.complete("", &messages, &[]).await?;

        assert_eq!(message.role, Role::Assistant);
        assert_eq!(
            message.content,
            vec![MessageContent::text("Hello! How can I assist you today?")]
        );
        assert_eq!(usage.input_tokens, Some(12));
        assert_eq!(usage.output_tokens, Some(15));
        assert_eq!(usage.total_tokens, Some(27));
        Ok(())
    }

    #[tokio::test]
    async fn test_complete_with_tool_use() -> Result<()> {
        let response_body = json!({
            "content": [
                {"type": "text", "text": "Let me search."},
                {
                    "type": "tool_use",
                    "id": "toolu_01",
                    "name": "search",
                    "input": {"query": "meaning of life"}
                }
            ]
        });
        let (_server, provider) = setup_mock_server(200, response_body).await;

        let tools = vec![Tool::new(
            "search",
            "Search the web",
            json!({"type": "object", "properties": {"query": {"type": "string"}}}),
        )];
        let (message, usage) = provider
            .complete("", &[Message::user().with_text("what is it?")], &tools)
            .await?;

        assert_eq!(message.text(), "Let me search.");
        let requests: Vec<_> = message.tool_requests().collect();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].id, "toolu_01");
        assert_eq!(requests[0].tool_call.name, "search");
        assert_eq!(
            requests[0].tool_call.arguments,
            json!({"query": "meaning of life"})
        );
        assert_eq!(usage.total_tokens, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_request_payload() -> Result<()> {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(body_partial_json(json!({
                "model": "claude-test",
                "max_tokens": 1000,
                "system": "Be brief.",
                "messages": [
                    {"role": "user", "content": "hi"},
                    {"role": "assistant", "content": "hello"},
                    {"role": "user", "content": "42"}
                ],
                "tools": [{
                    "name": "search",
                    "description": "Search",
                    "input_schema": {"type": "object"}
                }]
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"content": [{"type": "text", "text": "ok"}]})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let mut config = AnthropicProviderConfig::new("key");
        config.host = mock_server.uri();
        config.model = "claude-test".to_string();
        let provider = AnthropicProvider::new(config)?;

        let messages = vec![
            Message::user().with_text("hi"),
            Message::assistant().with_text("hello"),
            Message::user().with_text("42"),
        ];
        let tools = vec![Tool::new("search", "Search", json!({"type": "object"}))];
        let (message, _) = provider.complete("Be brief.", &messages, &tools).await?;
        assert_eq!(message.text(), "ok");
        Ok(())
    }

    #[tokio::test]
    async fn test_error_status() {
        let (_server, provider) =
            setup_mock_server(400, json!({"error": {"message": "bad request"}})).await;

        let err = provider
            .complete("", &[Message::user().with_text("hi")], &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("400"));
        assert!(err.to_string().contains("bad request"));
    }

    #[tokio::test]
    async fn test_malformed_response() {
        let (_server, provider) = setup_mock_server(200, json!({"unexpected": true})).await;

        let err = provider
            .complete("", &[Message::user().with_text("hi")], &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Invalid response format"));
    }

    #[test]
    fn test_unknown_blocks_are_skipped() -> Result<()> {
        let message = AnthropicProvider::response_to_message(&json!({
            "content": [
                {"type": "thinking", "thinking": "hmm"},
                {"type": "text", "text": "answer"}
            ]
        }))?;
        assert_eq!(message.content, vec![MessageContent::text("answer")]);

        let empty = AnthropicProvider::response_to_message(&json!({"content": []}))?;
        assert!(empty.content.is_empty());
        Ok(())
    }
}
