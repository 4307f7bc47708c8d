// SPDX-License-Identifier: MIT

//! Structured model calls
//!
//! Sends a system/user prompt pair with a JSON schema derived from the
//! target type and decodes the reply into that type.

use super::{Content, GenerationConfig, Model, OutputSchema, TokenUsage};
use crate::adk::error::ModelError;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;

/// A decoded structured reply
#[derive(Debug, Clone)]
pub struct StructuredReply<T> {
    pub value: T,
    pub usage: TokenUsage,
}

/// Build the output schema for `T`, named after the type
pub fn output_schema_for<T: JsonSchema>() -> OutputSchema {
    let root = schemars::schema_for!(T);
    OutputSchema {
        name: T::schema_name(),
        schema: serde_json::to_value(root).unwrap_or_default(),
    }
}

/// Call the model and decode its reply into `T`.
///
/// A reply that does not decode is a [`ModelError::MalformedOutput`]
/// carrying the usage of that reply.
pub async fn call_structured<T>(
    model: &dyn Model,
    system_prompt: &str,
    user_prompt: &str,
) -> Result<StructuredReply<T>, ModelError>
where
    T: DeserializeOwned + JsonSchema,
{
    let config = GenerationConfig {
        temperature: Some(0.0),
        response_schema: Some(output_schema_for::<T>()),
        ..Default::default()
    };

    let history = [Content::system(system_prompt), Content::user(user_prompt)];

    log::debug!(
        "Structured call for {}: {}",
        T::schema_name(),
        preview(user_prompt, 80)
    );

    let response = model.generate_content(&history, Some(&config), None).await?;
    let text = response.content.text();
    let value = decode_json::<T>(&text).map_err(|e| e.with_usage(response.usage))?;

    Ok(StructuredReply {
        value,
        usage: response.usage,
    })
}

/// Decode JSON text, tolerating a surrounding markdown code fence
pub fn decode_json<T: DeserializeOwned>(text: &str) -> Result<T, ModelError> {
    let cleaned = strip_code_fence(text);
    serde_json::from_str(cleaned).map_err(|e| {
        ModelError::MalformedOutput {
            message: format!("{} (reply: {})", e, preview(cleaned, 120)),
            usage: TokenUsage::default(),
        }
    })
}

fn strip_code_fence(text: &str) -> &str {
    let mut cleaned = text.trim();
    if let Some(rest) = cleaned.strip_prefix("```json") {
        cleaned = rest;
    } else if let Some(rest) = cleaned.strip_prefix("```") {
        cleaned = rest;
    }
    if let Some(rest) = cleaned.strip_suffix("```") {
        cleaned = rest;
    }
    cleaned.trim()
}

pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}
