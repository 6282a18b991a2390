// Copyright (c) 2026 The qi-prompt Authors
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::{Tool, ToolDescriptor, ToolError, ToolProvider, ToolRequest, ToolResult};

/// Central registry holding all locally available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Registry pre-loaded with the built-in file and shell tools.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register(crate::ReadFileTool);
        reg.register(crate::WriteFileTool);
        reg.register(crate::ListDirTool);
        reg.register(crate::ShellTool::default());
        reg
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolProvider for ToolRegistry {
    fn list_available_tools(&self) -> Vec<ToolDescriptor> {
        let mut descriptors: Vec<ToolDescriptor> = self
            .tools
            .values()
            .map(|t| ToolDescriptor {
                name: t.name().to_string(),
                category: t.category().to_string(),
                description: t.description().to_string(),
                capabilities: t.capabilities(),
            })
            .collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    async fn execute_tool(&self, req: ToolRequest) -> Result<ToolResult, ToolError> {
        match self.tools.get(&req.name) {
            Some(tool) => Ok(tool.execute(&req).await),
            None => Err(ToolError::Unknown(req.name)),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn category(&self) -> &str {
            "test"
        }
        fn description(&self) -> &str {
            "echoes its arguments"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn execute(&self, req: &ToolRequest) -> ToolResult {
            ToolResult::ok(req, format!("echo:{}", req.args))
        }
    }

    #[tokio::test]
    async fn registered_tool_executes() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool);
        let result = reg
            .execute_tool(ToolRequest {
                id: "1".into(),
                name: "echo".into(),
                args: json!({"x": 1}),
            })
            .await
            .unwrap();
        assert!(result.content.starts_with("echo:"));
    }

    #[tokio::test]
    async fn unknown_tool_is_a_provider_error() {
        let reg = ToolRegistry::new();
        let err = reg
            .execute_tool(ToolRequest {
                id: "1".into(),
                name: "ghost".into(),
                args: json!({}),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Unknown(_)));
    }

    #[test]
    fn descriptors_are_sorted_by_name() {
        let reg = ToolRegistry::with_builtins();
        let names: Vec<String> = reg
            .list_available_tools()
            .iter()
            .map(|d| d.name.clone())
            .collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert!(names.contains(&"read_file".to_string()));
        assert!(names.contains(&"write_file".to_string()));
    }
}
