// SPDX-License-Identifier: MIT

use crate::adk::tool::Tool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared, name-keyed set of tools
#[derive(Clone)]
pub struct ToolRegistry {
    tools: Arc<RwLock<HashMap<String, Arc<dyn Tool>>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Registry over an already-built tool set
    pub fn from_tools(tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        let tools = tools
            .into_iter()
            .map(|t| (t.name().to_string(), t))
            .collect();
        Self {
            tools: Arc::new(RwLock::new(tools)),
        }
    }

    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let mut tools = self.tools.write().await;
        log::debug!("Registering tool {}", tool.name());
        tools.insert(tool.name().to_string(), tool);
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let tools = self.tools.read().await;
        tools.get(name).cloned()
    }

    /// All tools, sorted by name so the model sees a stable list
    pub async fn list(&self) -> Vec<Arc<dyn Tool>> {
        let tools = self.tools.read().await;
        let mut all: Vec<Arc<dyn Tool>> = tools.values().cloned().collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adk::error::NowWhatError;
    use async_trait::async_trait;
    use once_cell::sync::Lazy;
    use serde_json::{json, Value};

    static MOCK_SCHEMA: Lazy<Value> = Lazy::new(|| {
        json!({
            "type": "object",
            "properties": {}
        })
    });

    struct MockTool {
        name: String,
        description: String,
    }

    impl MockTool {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                description: format!("Mock tool: {}", name),
            }
        }
    }

    #[async_trait]
    impl Tool for MockTool {
        fn name(&self) -> &str {
            &self.name
        }

        fn description(&self) -> &str {
            &self.description
        }

        fn schema(&self) -> &Value {
            &MOCK_SCHEMA
        }

        async fn execute(&self, _input: Value) -> Result<Value, NowWhatError> {
            Ok(json!({"result": "mock"}))
        }
    }

    #[tokio::test]
    async fn test_register_and_get_tool() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(MockTool::new("reverse_geocode"))).await;

        let retrieved = registry.get("reverse_geocode").await;
        assert!(retrieved.is_some());
        assert_eq!(retrieved.unwrap().name(), "reverse_geocode");
        assert!(registry.get("nonexistent").await.is_none());
    }

    #[tokio::test]
    async fn test_list_is_sorted() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(MockTool::new("terminate"))).await;
        registry.register(Arc::new(MockTool::new("reverse_geocode"))).await;

        let names: Vec<String> = registry
            .list()
            .await
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        assert_eq!(names, vec!["reverse_geocode", "terminate"]);
    }

    #[tokio::test]
    async fn test_from_tools_keys_by_name() {
        let registry = ToolRegistry::from_tools([
            Arc::new(MockTool::new("terminate")) as Arc<dyn Tool>,
            Arc::new(MockTool::new("reverse_geocode")),
        ]);

        assert!(registry.get("terminate").await.is_some());
        assert_eq!(registry.list().await.len(), 2);
    }

    #[tokio::test]
    async fn test_registry_is_clone() {
        let registry = ToolRegistry::new();
        let cloned = registry.clone();

        cloned.register(Arc::new(MockTool::new("terminate"))).await;
        assert!(registry.get("terminate").await.is_some());
    }
}
