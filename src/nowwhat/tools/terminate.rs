// SPDX-License-Identifier: MIT

use crate::adk::error::NowWhatError;
use crate::adk::tool::Tool;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde_json::{json, Value};

/// Name the agent loop watches for as its completion signal
pub const TERMINATE_TOOL: &str = "terminate";

static TERMINATE_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "result": {
                "type": "object",
                "description": "Final answer for the user: recommended places and a short summary"
            }
        },
        "required": ["result"]
    })
});

/// Ends the agent loop and hands back the final result
pub struct TerminateTool;

#[async_trait]
impl Tool for TerminateTool {
    fn name(&self) -> &str {
        TERMINATE_TOOL
    }

    fn description(&self) -> &str {
        "Call this when the task is complete. Pass the final answer as `result`."
    }

    fn schema(&self) -> &Value {
        &TERMINATE_SCHEMA
    }

    async fn execute(&self, input: Value) -> Result<Value, NowWhatError> {
        let result = input.get("result").cloned().unwrap_or(Value::Null);
        Ok(json!({"status": "terminated", "result": result}))
    }
}
