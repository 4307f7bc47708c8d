// SPDX-License-Identifier: MIT

//! The two steps of the agent loop

use super::state::{AgentRunState, AgentUpdate};
use crate::adk::error::NowWhatError;
use crate::adk::model::{Content, GenerationConfig, Model, Part};
use crate::adk::tool::Tool;
use crate::nowwhat::config::ReactSettings;
use crate::nowwhat::tools::{ToolRegistry, TERMINATE_TOOL};
use crate::nowwhat::workflow::graph::{Node, NodeOutput};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

pub const AGENT: &str = "agent";
pub const TOOLS: &str = "tools";

pub const TOOL_LIMIT_MESSAGE: &str =
    "최대 도구 호출 횟수에 도달했습니다. 현재까지의 결과를 반환합니다.";
pub const TIMEOUT_MESSAGE: &str = "타임아웃이 발생했습니다. 현재까지의 결과를 반환합니다.";
const SKIPPED_OBSERVATION: &str = "도구 호출 한도에 도달하여 실행하지 않았습니다.";

fn system_prompt(tools: &[Arc<dyn Tool>], state: &AgentRunState, settings: &ReactSettings) -> String {
    let tool_lines = tools
        .iter()
        .map(|t| format!("- {}: {}", t.name(), t.description()))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"당신은 맛집과 장소를 찾아주는 도우미입니다.
필요하면 도구를 호출하고, 결과를 관찰한 뒤 다음 행동을 결정하세요.

사용 가능한 도구:
{}

규칙:
- 충분한 정보를 얻으면 {} 도구를 호출하고 result에 최종 결과를 담으세요
- 도구 없이 답할 수 있으면 바로 답하세요
- 도구 호출: {}/{}회, 경과 시간: {}초/{}초"#,
        tool_lines,
        TERMINATE_TOOL,
        state.tool_call_count,
        settings.max_tool_calls,
        state.elapsed().as_secs(),
        settings.timeout_secs
    )
}

fn stop(message: &str) -> AgentUpdate {
    AgentUpdate {
        messages: vec![Content::model(message)],
        done: Some(true),
        ..Default::default()
    }
}

/// Decide: answer directly, call tools, or terminate
pub struct AgentStep {
    pub model: Arc<dyn Model>,
    pub tools: ToolRegistry,
    pub settings: ReactSettings,
}

#[async_trait]
impl Node<AgentRunState> for AgentStep {
    async fn run(&self, state: &AgentRunState) -> Result<NodeOutput<AgentUpdate>, NowWhatError> {
        // Limits are checked before the model call
        if state.tool_call_count >= self.settings.max_tool_calls {
            log::warn!(
                "Run {} reached the tool-call limit ({}/{})",
                state.run_id,
                state.tool_call_count,
                self.settings.max_tool_calls
            );
            return Ok(NodeOutput::new(stop(TOOL_LIMIT_MESSAGE))
                .with_snapshot(json!({"limit": "max_tool_calls"})));
        }
        if state.elapsed() >= self.settings.timeout() {
            log::warn!(
                "Run {} timed out after {}s",
                state.run_id,
                state.elapsed().as_secs()
            );
            return Ok(NodeOutput::new(stop(TIMEOUT_MESSAGE))
                .with_snapshot(json!({"limit": "timeout"})));
        }

        let tools = self.tools.list().await;
        let mut history = vec![Content::system(system_prompt(&tools, state, &self.settings))];
        history.extend(state.messages.iter().cloned());

        let config = GenerationConfig {
            temperature: Some(0.0),
            ..Default::default()
        };
        let response = match self
            .model
            .generate_content(&history, Some(&config), Some(&tools))
            .await
        {
            Ok(r) => r,
            Err(e) => {
                log::error!("Agent model call failed: {}", e);
                let message = format!("오류가 발생했습니다: {}", e);
                return Ok(NodeOutput::new(stop(&message)).degraded(e.to_string()));
            }
        };

        let content = response.content;
        let calls: Vec<&str> = content.function_calls().iter().map(|(n, _)| *n).collect();
        let terminate = content.parts.iter().find_map(|p| match p {
            Part::FunctionCall { name, args, .. } if name == TERMINATE_TOOL => {
                Some(args.get("result").cloned().unwrap_or(Value::Null))
            }
            _ => None,
        });
        let snapshot = json!({"tool_calls": calls});

        let mut update = AgentUpdate {
            usage: Some(response.usage),
            ..Default::default()
        };
        if let Some(result) = terminate {
            log::info!("Run {} terminated by the model", state.run_id);
            update.done = Some(true);
            update.final_result = Some(result);
        } else if calls.is_empty() {
            update.done = Some(true);
            update.final_result = Some(json!({"answer": content.text()}));
        } else {
            log::info!("Model requested {}", calls.join(", "));
        }
        update.messages.push(content);

        Ok(NodeOutput::new(update).with_snapshot(snapshot))
    }
}

/// Execute the tool calls of the last model message
pub struct ToolsStep {
    pub tools: ToolRegistry,
    pub settings: ReactSettings,
}

impl ToolsStep {
    async fn invoke(&self, name: &str, args: Value) -> Value {
        let Some(tool) = self.tools.get(name).await else {
            log::warn!("Model called unknown tool {}", name);
            return json!({"error": NowWhatError::tool_not_found(name).to_string()});
        };

        match tool.execute(args).await {
            Ok(result) => result,
            Err(e) => {
                log::warn!("Tool {} failed: {}", name, e);
                json!({"error": e.to_string()})
            }
        }
    }
}

#[async_trait]
impl Node<AgentRunState> for ToolsStep {
    async fn run(&self, state: &AgentRunState) -> Result<NodeOutput<AgentUpdate>, NowWhatError> {
        let Some(last) = state.last_message() else {
            return Ok(NodeOutput::new(AgentUpdate::default()));
        };

        let budget = self
            .settings
            .max_tool_calls
            .saturating_sub(state.tool_call_count);
        let mut executed = 0;
        let mut messages = Vec::new();

        for part in &last.parts {
            let Part::FunctionCall {
                name,
                args,
                call_id,
            } = part
            else {
                continue;
            };

            let response = if executed < budget {
                executed += 1;
                log::debug!("Executing {}({})", name, args);
                self.invoke(name, args.clone()).await
            } else {
                json!({"error": SKIPPED_OBSERVATION})
            };
            messages.push(Content {
                role: "tool".to_string(),
                parts: vec![Part::FunctionResponse {
                    name: name.clone(),
                    response,
                    call_id: call_id.clone(),
                }],
            });
        }

        let requested = messages.len();
        Ok(NodeOutput::new(AgentUpdate {
            messages,
            tool_calls: executed,
            ..Default::default()
        })
        .with_snapshot(json!({"requested": requested, "executed": executed})))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nowwhat::workflow::state::Pricing;
    use once_cell::sync::Lazy;

    static SCHEMA: Lazy<Value> = Lazy::new(|| json!({"type": "object", "properties": {}}));

    struct Failing;

    #[async_trait]
    impl Tool for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        fn schema(&self) -> &Value {
            &SCHEMA
        }
        async fn execute(&self, _input: Value) -> Result<Value, NowWhatError> {
            Err(NowWhatError::api("mock", "unavailable"))
        }
    }

    fn call(name: &str) -> Part {
        Part::FunctionCall {
            name: name.to_string(),
            args: json!({}),
            call_id: Some(format!("id-{}", name)),
        }
    }

    fn state_with_calls(parts: Vec<Part>, count: u32) -> AgentRunState {
        let mut state = AgentRunState::new("run", "q", None, Pricing::default());
        state.tool_call_count = count;
        state.messages.push(Content {
            role: "model".to_string(),
            parts,
        });
        state
    }

    fn tools_step(max: u32) -> ToolsStep {
        ToolsStep {
            tools: ToolRegistry::from_tools([Arc::new(Failing) as Arc<dyn Tool>]),
            settings: ReactSettings {
                max_tool_calls: max,
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_tool_errors_become_observations() {
        let state = state_with_calls(vec![call("failing"), call("missing")], 0);
        let output = tools_step(20).run(&state).await.unwrap();
        let update = output.update;

        assert_eq!(update.tool_calls, 2);
        assert_eq!(update.messages.len(), 2);
        match &update.messages[0].parts[0] {
            Part::FunctionResponse { response, call_id, .. } => {
                assert!(response["error"].as_str().unwrap().contains("unavailable"));
                assert_eq!(call_id.as_deref(), Some("id-failing"));
            }
            other => panic!("unexpected part {:?}", other),
        }
        match &update.messages[1].parts[0] {
            Part::FunctionResponse { response, .. } => {
                assert!(response["error"].as_str().unwrap().contains("not found"))
            }
            other => panic!("unexpected part {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_calls_beyond_budget_are_skipped() {
        let state = state_with_calls(vec![call("failing"), call("failing"), call("failing")], 18);
        let update = tools_step(20).run(&state).await.unwrap().update;

        assert_eq!(update.tool_calls, 2);
        assert_eq!(update.messages.len(), 3);
        match &update.messages[2].parts[0] {
            Part::FunctionResponse { response, .. } => {
                assert_eq!(response["error"], SKIPPED_OBSERVATION)
            }
            other => panic!("unexpected part {:?}", other),
        }
    }
}
