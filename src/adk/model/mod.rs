// SPDX-License-Identifier: MIT

//! Model module - defines LLM model trait and implementations
//!
//! This module provides the core Model trait and shared types.
//! - [openai] - OpenAI's chat completions API
//! - [structured] - schema-constrained calls that decode into Rust types

pub mod openai;
pub mod structured;

pub use structured::{call_structured, StructuredReply};

use crate::adk::error::ModelError;
use crate::adk::tool::Tool;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Configuration for model generation
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GenerationConfig {
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub top_p: Option<f32>,
    /// JSON schema the reply must follow
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<OutputSchema>,
}

/// A named JSON schema for structured output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputSchema {
    pub name: String,
    pub schema: serde_json::Value,
}

/// A message in the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    pub role: String,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            parts: vec![Part::Text(text.into())],
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            parts: vec![Part::Text(text.into())],
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: "model".to_string(),
            parts: vec![Part::Text(text.into())],
        }
    }

    /// Concatenated text parts
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Function calls requested in this message, in order
    pub fn function_calls(&self) -> Vec<(&str, &serde_json::Value)> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::FunctionCall { name, args, .. } => Some((name.as_str(), args)),
                _ => None,
            })
            .collect()
    }

    pub fn has_function_calls(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, Part::FunctionCall { .. }))
    }
}

/// Parts of a message: text, function calls and their responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Part {
    /// Regular text output from the model
    Text(String),
    /// Function/tool call requested by the model
    FunctionCall {
        name: String,
        args: serde_json::Value,
        /// Provider call id, echoed back with the function response
        #[serde(skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
    },
    /// Response from executing a function/tool
    FunctionResponse {
        name: String,
        response: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
    },
}

/// Token counts reported by the provider for one call
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// A model reply together with its usage
#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub content: Content,
    pub usage: TokenUsage,
}

/// Core trait for LLM model implementations
///
/// Every successful call must report usage so the usage ledger stays exact.
#[async_trait]
pub trait Model: Send + Sync {
    async fn generate_content(
        &self,
        history: &[Content],
        config: Option<&GenerationConfig>,
        tools: Option<&[Arc<dyn Tool>]>,
    ) -> Result<ModelResponse, ModelError>;
}
