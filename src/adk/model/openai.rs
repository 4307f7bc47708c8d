// SPDX-License-Identifier: MIT

//! OpenAI Model - chat completions API implementation

use super::{Content, GenerationConfig, Model, ModelResponse, Part, TokenUsage};
use crate::adk::error::ModelError;
use crate::adk::tool::Tool;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::sync::Arc;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI chat model implementation
pub struct OpenAIModel {
    client: Client,
    api_key: String,
    model_name: String,
    base_url: String,
}

impl OpenAIModel {
    /// Create a new OpenAIModel from explicit settings
    pub fn new(
        api_key: impl Into<String>,
        model_name: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, ModelError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ModelError::ApiKeyMissing("openai".to_string()));
        }

        Ok(Self {
            client: Client::new(),
            api_key,
            model_name: model_name.into(),
            base_url: base_url.into(),
        })
    }

    /// Convert internal Content to OpenAI message format
    fn content_to_openai_message(content: &Content) -> serde_json::Value {
        let role = match content.role.as_str() {
            "system" => "system",
            "user" => "user",
            "model" => "assistant",
            other => other,
        };

        for part in &content.parts {
            if let Part::FunctionResponse {
                name,
                response,
                call_id,
            } = part
            {
                return json!({
                    "role": "tool",
                    "tool_call_id": call_id.clone().unwrap_or_else(|| name.clone()),
                    "content": serde_json::to_string(response).unwrap_or_default()
                });
            }
        }

        let mut tool_calls = Vec::new();
        let mut text_content = String::new();

        for part in &content.parts {
            match part {
                Part::Text(t) => text_content.push_str(t),
                Part::FunctionCall {
                    name,
                    args,
                    call_id,
                } => {
                    tool_calls.push(json!({
                        "id": call_id.clone().unwrap_or_else(|| name.clone()),
                        "type": "function",
                        "function": {
                            "name": name,
                            "arguments": serde_json::to_string(args).unwrap_or_default()
                        }
                    }));
                }
                Part::FunctionResponse { .. } => {}
            }
        }

        if !tool_calls.is_empty() {
            json!({
                "role": role,
                "content": if text_content.is_empty() { serde_json::Value::Null } else { json!(text_content) },
                "tool_calls": tool_calls
            })
        } else {
            json!({
                "role": role,
                "content": text_content
            })
        }
    }

    /// Convert tools to OpenAI function format
    fn tools_to_openai_format(tools: &[Arc<dyn Tool>]) -> Vec<serde_json::Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name(),
                        "description": t.description(),
                        "parameters": t.schema()
                    }
                })
            })
            .collect()
    }

    /// Parse OpenAI response into Content and usage
    fn parse_openai_response(response: &serde_json::Value) -> Result<ModelResponse, ModelError> {
        let choice = response["choices"]
            .as_array()
            .and_then(|c| c.first())
            .ok_or_else(|| ModelError::InvalidResponse("No choices in OpenAI response".into()))?;

        let message = &choice["message"];
        let mut parts = Vec::new();

        if let Some(content) = message["content"].as_str() {
            if !content.is_empty() {
                parts.push(Part::Text(content.to_string()));
            }
        }

        if let Some(tool_calls) = message["tool_calls"].as_array() {
            for tc in tool_calls {
                let name = tc["function"]["name"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                let args_str = tc["function"]["arguments"].as_str().unwrap_or("{}");
                let args: serde_json::Value = serde_json::from_str(args_str).unwrap_or(json!({}));

                parts.push(Part::FunctionCall {
                    name,
                    args,
                    call_id: tc["id"].as_str().map(str::to_string),
                });
            }
        }

        let usage = TokenUsage::new(
            response["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
            response["usage"]["completion_tokens"].as_u64().unwrap_or(0),
        );

        Ok(ModelResponse {
            content: Content {
                role: "model".to_string(),
                parts,
            },
            usage,
        })
    }

    /// Map a non-success status to an error kind
    fn classify_error(
        status: u16,
        retry_after_secs: Option<u64>,
        body: &serde_json::Value,
        raw: &str,
    ) -> ModelError {
        let code = body["error"]["code"].as_str().unwrap_or_default();
        let message = body["error"]["message"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| raw.chars().take(200).collect());

        match status {
            401 | 403 => ModelError::Unauthorized(message),
            429 if code == "insufficient_quota" => ModelError::QuotaExceeded(message),
            429 => ModelError::RateLimited { retry_after_secs },
            400 | 422 => ModelError::InvalidResponse(message),
            _ => ModelError::Transport(format!("status {}: {}", status, message)),
        }
    }
}

#[async_trait]
impl Model for OpenAIModel {
    async fn generate_content(
        &self,
        history: &[Content],
        config: Option<&GenerationConfig>,
        tools: Option<&[Arc<dyn Tool>]>,
    ) -> Result<ModelResponse, ModelError> {
        let url = format!("{}/chat/completions", self.base_url);

        let messages: Vec<serde_json::Value> = history
            .iter()
            .map(Self::content_to_openai_message)
            .collect();

        let mut body = json!({
            "model": self.model_name,
            "messages": messages
        });

        if let Some(cfg) = config {
            if let Some(temp) = cfg.temperature {
                body["temperature"] = json!(temp);
            }
            if let Some(max_tokens) = cfg.max_output_tokens {
                body["max_tokens"] = json!(max_tokens);
            }
            if let Some(top_p) = cfg.top_p {
                body["top_p"] = json!(top_p);
            }
            if let Some(schema) = &cfg.response_schema {
                body["response_format"] = json!({
                    "type": "json_schema",
                    "json_schema": {
                        "name": schema.name,
                        "schema": schema.schema,
                        "strict": false
                    }
                });
            }
        }

        if let Some(tools) = tools {
            if !tools.is_empty() {
                body["tools"] = json!(Self::tools_to_openai_format(tools));
                body["tool_choice"] = json!("auto");
            }
        }

        log::debug!(
            "OpenAI request body: {}",
            serde_json::to_string_pretty(&body).unwrap_or_default()
        );

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let text = resp.text().await?;
            let parsed: serde_json::Value = serde_json::from_str(&text).unwrap_or_default();
            return Err(Self::classify_error(
                status.as_u16(),
                retry_after,
                &parsed,
                &text,
            ));
        }

        let resp_json: serde_json::Value = resp.json().await?;
        log::debug!("OpenAI response: {}", resp_json);

        Self::parse_openai_response(&resp_json)
    }
}
