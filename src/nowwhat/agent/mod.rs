// SPDX-License-Identifier: MIT

//! Tool-calling ReAct agent
//!
//! ```text
//! agent --tools--> tools --> agent
//! agent --end--> END
//! ```
//!
//! `agent` ends the run when the model answers without tool calls, calls
//! `terminate`, or a safety limit (tool calls, wall clock) is reached.
//! Limits are checked before each model call.

mod nodes;
pub mod state;

pub use nodes::{AGENT, TIMEOUT_MESSAGE, TOOLS, TOOL_LIMIT_MESSAGE};
pub use state::{message_json, AgentRunState, AgentUpdate};

use crate::adk::error::GraphError;
use crate::adk::model::Model;
use crate::nowwhat::config::ReactSettings;
use crate::nowwhat::geocode::Coordinates;
use crate::nowwhat::tools::ToolRegistry;
use crate::nowwhat::workflow::graph::{
    CompiledGraph, GraphBuilder, RouteDecision, RouteLabel, RunOutcome, Target,
};
use crate::nowwhat::workflow::state::Pricing;
use nodes::{AgentStep, ToolsStep};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentRoute {
    Tools,
    End,
}

impl RouteLabel for AgentRoute {
    const ALL: &'static [Self] = &[AgentRoute::Tools, AgentRoute::End];

    fn as_str(&self) -> &'static str {
        match self {
            AgentRoute::Tools => "tools",
            AgentRoute::End => "end",
        }
    }
}

fn route_agent(state: &AgentRunState) -> RouteDecision<AgentRoute> {
    if state.done {
        return RouteDecision::domain(AgentRoute::End);
    }
    match state.last_message() {
        Some(m) if m.has_function_calls() => RouteDecision::domain(AgentRoute::Tools),
        _ => RouteDecision::domain(AgentRoute::End),
    }
}

pub fn build_agent_graph(
    model: Arc<dyn Model>,
    tools: ToolRegistry,
    settings: &ReactSettings,
) -> Result<CompiledGraph<AgentRunState>, GraphError> {
    // One agent step per tool execution, plus the closing agent step
    let max_steps = 2 * settings.max_tool_calls as usize + 2;

    GraphBuilder::new("react")
        .add_node(
            AGENT,
            AgentStep {
                model,
                tools: tools.clone(),
                settings: settings.clone(),
            },
        )
        .add_node(
            TOOLS,
            ToolsStep {
                tools,
                settings: settings.clone(),
            },
        )
        .set_entry(AGENT)
        .add_conditional_edges(
            AGENT,
            route_agent,
            [
                (AgentRoute::Tools, Target::node(TOOLS)),
                (AgentRoute::End, Target::End),
            ],
        )
        .add_edge(TOOLS, Target::node(AGENT))
        .with_max_steps(max_steps)
        .compile()
}

pub struct ReactAgent {
    graph: CompiledGraph<AgentRunState>,
    tools: ToolRegistry,
    pricing: Pricing,
}

impl ReactAgent {
    pub fn new(
        model: Arc<dyn Model>,
        tools: ToolRegistry,
        settings: ReactSettings,
        pricing: Pricing,
    ) -> Result<Self, GraphError> {
        Ok(Self {
            graph: build_agent_graph(model, tools.clone(), &settings)?,
            tools,
            pricing,
        })
    }

    /// Tools the model may call
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Run the loop to completion. `Err` only on the step ceiling.
    pub async fn run_query(
        &self,
        query: &str,
        location: Option<Coordinates>,
    ) -> Result<RunOutcome<AgentRunState>, GraphError> {
        let run_id = Uuid::new_v4().to_string();
        log::info!("Agent run {} started for '{}'", run_id, query);
        let state = AgentRunState::new(run_id, query.trim(), location, self.pricing.clone());
        let outcome = self.graph.invoke(state).await?;
        log::info!(
            "Agent run {} finished after {} tool calls",
            outcome.state.run_id,
            outcome.state.tool_call_count
        );
        Ok(outcome)
    }
}

/// Best textual answer of a finished run
pub fn answer_text(state: &AgentRunState) -> String {
    match &state.final_result {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Object(map)) if map.get("answer").is_some_and(Value::is_string) => map
            .get("answer")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        Some(Value::Null) | None => state
            .messages
            .iter()
            .rev()
            .find(|m| m.role == "model")
            .map(|m| m.text())
            .unwrap_or_default(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adk::error::{ModelError, NowWhatError};
    use crate::adk::model::{Content, GenerationConfig, ModelResponse, Part, TokenUsage};
    use crate::adk::tool::Tool;
    use crate::nowwhat::tools::TerminateTool;
    use crate::nowwhat::workflow::graph::{visited, RunStatus};
    use async_trait::async_trait;
    use once_cell::sync::Lazy;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    static SCHEMA: Lazy<Value> = Lazy::new(|| json!({"type": "object", "properties": {}}));

    /// Replays scripted replies, then repeats the last one
    struct Scripted {
        replies: Mutex<Vec<Content>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(replies: Vec<Content>) -> Self {
            Self {
                replies: Mutex::new(replies),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Model for Scripted {
        async fn generate_content(
            &self,
            history: &[Content],
            _config: Option<&GenerationConfig>,
            _tools: Option<&[Arc<dyn Tool>]>,
        ) -> Result<ModelResponse, ModelError> {
            assert_eq!(history[0].role, "system");
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut replies = self.replies.lock().unwrap();
            let content = if replies.len() > 1 {
                replies.remove(0)
            } else {
                replies[0].clone()
            };
            Ok(ModelResponse {
                content,
                usage: TokenUsage::new(100, 10),
            })
        }
    }

    struct Down;

    #[async_trait]
    impl Model for Down {
        async fn generate_content(
            &self,
            _history: &[Content],
            _config: Option<&GenerationConfig>,
            _tools: Option<&[Arc<dyn Tool>]>,
        ) -> Result<ModelResponse, ModelError> {
            Err(ModelError::Transport("connection reset".into()))
        }
    }

    struct Counting {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl Tool for Counting {
        fn name(&self) -> &str {
            "lookup"
        }
        fn description(&self) -> &str {
            "Counts its calls"
        }
        fn schema(&self) -> &Value {
            &SCHEMA
        }
        async fn execute(&self, _input: Value) -> Result<Value, NowWhatError> {
            let n = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(json!({"n": n}))
        }
    }

    fn call(name: &str, args: Value) -> Content {
        Content {
            role: "model".to_string(),
            parts: vec![Part::FunctionCall {
                name: name.to_string(),
                args,
                call_id: None,
            }],
        }
    }

    fn agent(model: Arc<dyn Model>, tool: Arc<Counting>, settings: ReactSettings) -> ReactAgent {
        let tools: Vec<Arc<dyn Tool>> = vec![tool, Arc::new(TerminateTool)];
        ReactAgent::new(
            model,
            ToolRegistry::from_tools(tools),
            settings,
            Pricing::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_tool_call_cap() {
        let model = Arc::new(Scripted::new(vec![call("lookup", json!({}))]));
        let tool = Arc::new(Counting {
            runs: AtomicUsize::new(0),
        });
        let agent = agent(model.clone(), tool.clone(), ReactSettings::default());

        let outcome = agent.run_query("근처 맛집", None).await.unwrap();
        let state = &outcome.state;

        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(tool.runs.load(Ordering::SeqCst), 20);
        assert_eq!(state.tool_call_count, 20);
        assert!(state.done);
        assert_eq!(state.messages.last().unwrap().text(), TOOL_LIMIT_MESSAGE);
        // The capped agent step does not call the model
        assert_eq!(model.calls.load(Ordering::SeqCst), 20);
        assert_eq!(state.usage.records().len(), 20);
        assert_eq!(visited(state).len(), 41);
    }

    #[tokio::test]
    async fn test_terminate_sets_final_result() {
        let model = Arc::new(Scripted::new(vec![
            call("lookup", json!({})),
            call("terminate", json!({"result": {"answer": "가능동 고기집"}})),
        ]));
        let tool = Arc::new(Counting {
            runs: AtomicUsize::new(0),
        });
        let agent = agent(model, tool.clone(), ReactSettings::default());

        let outcome = agent.run_query("가능동 삼겹살", None).await.unwrap();
        let state = &outcome.state;
        assert!(state.done);
        assert_eq!(state.tool_call_count, 1);
        assert_eq!(tool.runs.load(Ordering::SeqCst), 1);
        assert_eq!(state.final_result, Some(json!({"answer": "가능동 고기집"})));
        assert_eq!(visited(state), vec![AGENT, TOOLS, AGENT]);
        assert_eq!(answer_text(state), "가능동 고기집");
    }

    #[tokio::test]
    async fn test_direct_answer_ends_run() {
        let model = Arc::new(Scripted::new(vec![Content::model("안녕하세요")]));
        let tool = Arc::new(Counting {
            runs: AtomicUsize::new(0),
        });
        let agent = agent(model, tool, ReactSettings::default());

        let outcome = agent.run_query("안녕", None).await.unwrap();
        assert!(outcome.state.done);
        assert_eq!(answer_text(&outcome.state), "안녕하세요");
    }

    #[tokio::test]
    async fn test_timeout_checked_before_model_call() {
        let model = Arc::new(Scripted::new(vec![call("lookup", json!({}))]));
        let tool = Arc::new(Counting {
            runs: AtomicUsize::new(0),
        });
        let settings = ReactSettings {
            timeout_secs: 0,
            ..Default::default()
        };
        let agent = agent(model.clone(), tool, settings);

        let outcome = agent.run_query("q", None).await.unwrap();
        assert!(outcome.state.done);
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.state.messages.last().unwrap().text(), TIMEOUT_MESSAGE);
    }

    #[tokio::test]
    async fn test_model_failure_is_degraded() {
        let tool = Arc::new(Counting {
            runs: AtomicUsize::new(0),
        });
        let agent = agent(Arc::new(Down), tool, ReactSettings::default());

        let outcome = agent.run_query("q", None).await.unwrap();
        assert!(matches!(outcome.status, RunStatus::Degraded { .. }));
        assert!(outcome.state.done);
        assert!(outcome.state.messages.last().unwrap().text().starts_with("오류가 발생했습니다"));
    }
}
