// SPDX-License-Identifier: MIT

//! State of one agent-loop run

use crate::adk::model::{Content, Part, TokenUsage};
use crate::nowwhat::geocode::Coordinates;
use crate::nowwhat::workflow::state::{GraphState, Pricing, StepRecord, UsageLedger};
use serde_json::{json, Value};
use std::time::{Duration, Instant};

/// Shared state of one agent run. Only the `agent` and `tools` steps
/// change it, through [`AgentUpdate`].
#[derive(Debug, Clone)]
pub struct AgentRunState {
    pub run_id: String,
    pub user_query: String,
    pub user_location: Option<Coordinates>,
    /// Conversation without the system prompt, which is rebuilt per call
    pub messages: Vec<Content>,
    pub tool_call_count: u32,
    pub started_at: Instant,
    pub done: bool,
    pub final_result: Option<Value>,
    pub usage: UsageLedger,
    pub steps: Vec<StepRecord>,
}

impl AgentRunState {
    pub fn new(
        run_id: impl Into<String>,
        user_query: impl Into<String>,
        user_location: Option<Coordinates>,
        pricing: Pricing,
    ) -> Self {
        let user_query = user_query.into();
        let mut request = format!("사용자 요청: {}", user_query);
        if let Some(at) = user_location {
            request.push_str(&format!(
                "\n사용자 위치 좌표: 위도={}, 경도={}",
                at.latitude, at.longitude
            ));
        }

        Self {
            run_id: run_id.into(),
            user_query,
            user_location,
            messages: vec![Content::user(request)],
            tool_call_count: 0,
            started_at: Instant::now(),
            done: false,
            final_result: None,
            usage: UsageLedger::new(pricing),
            steps: Vec::new(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn last_message(&self) -> Option<&Content> {
        self.messages.last()
    }
}

/// Partial update produced by one agent-loop step
#[derive(Debug, Default)]
pub struct AgentUpdate {
    /// Appended to the conversation
    pub messages: Vec<Content>,
    /// Added to the tool-call counter
    pub tool_calls: u32,
    pub done: Option<bool>,
    pub final_result: Option<Value>,
    pub usage: Option<TokenUsage>,
}

impl GraphState for AgentRunState {
    type Update = AgentUpdate;

    fn merge(&mut self, update: AgentUpdate) {
        self.messages.extend(update.messages);
        self.tool_call_count += update.tool_calls;
        if let Some(done) = update.done {
            self.done = done;
        }
        if update.final_result.is_some() {
            self.final_result = update.final_result;
        }
        if let Some(usage) = update.usage {
            self.usage.record("agent", usage);
        }
    }

    fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    fn steps_mut(&mut self) -> &mut Vec<StepRecord> {
        &mut self.steps
    }
}

/// Flatten a message for API responses
pub fn message_json(content: &Content) -> Value {
    let role = match content.role.as_str() {
        "model" => "assistant",
        other => other,
    };

    let mut message = json!({ "role": role, "content": content.text() });
    let calls: Vec<Value> = content
        .parts
        .iter()
        .filter_map(|p| match p {
            Part::FunctionCall { name, args, .. } => Some(json!({"name": name, "args": args})),
            _ => None,
        })
        .collect();
    if !calls.is_empty() {
        message["tool_calls"] = Value::Array(calls);
    }

    for part in &content.parts {
        if let Part::FunctionResponse { name, response, .. } = part {
            message["name"] = json!(name);
            message["content"] = response.clone();
        }
    }
    message
}
