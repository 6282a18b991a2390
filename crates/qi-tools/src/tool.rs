// Copyright (c) 2026 The qi-prompt Authors
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;

/// Declared capabilities of a tool.
#[derive(Debug, Clone, Default)]
pub struct ToolCapabilities {
    /// Advisory execution budget.  The engine races the execution against
    /// this (or its own node timeout, whichever is tighter).
    pub max_execution_time_ms: Option<u64>,
    /// Free-form capability tags ("filesystem", "network", "mutating", ...).
    pub tags: Vec<String>,
}

/// Tool metadata surfaced by `list_available_tools` and the `tools` command.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub category: String,
    pub description: String,
    pub capabilities: ToolCapabilities,
}

/// A single tool invocation.
#[derive(Debug, Clone)]
pub struct ToolRequest {
    /// Caller-chosen id, forwarded verbatim into the result.
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments.
    pub args: Value,
}

/// The outcome of one tool execution.
///
/// Tool-level failures (file missing, command exited non-zero) are carried
/// as `is_error = true` with a readable message, so they can append to a
/// workflow's tool-result list like any other result.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub request_id: String,
    pub tool: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(req: &ToolRequest, content: impl Into<String>) -> Self {
        Self {
            request_id: req.id.clone(),
            tool: req.name.clone(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn err(req: &ToolRequest, message: impl Into<String>) -> Self {
        Self {
            request_id: req.id.clone(),
            tool: req.name.clone(),
            content: message.into(),
            is_error: true,
        }
    }
}

/// Provider-level failures: the request never reached a tool.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    Unknown(String),
}

impl ToolError {
    pub fn code(&self) -> &'static str {
        "TOOL_ERROR"
    }
}

/// Trait every tool implements.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn category(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the arguments object.
    fn parameters_schema(&self) -> Value;
    fn capabilities(&self) -> ToolCapabilities {
        ToolCapabilities::default()
    }
    /// Execute.  Failures are wrapped in [`ToolResult::err`].
    async fn execute(&self, req: &ToolRequest) -> ToolResult;
}

/// Abstract handle to external tools, as seen by the workflow engine.
/// Implementations outside the core may bridge to tool servers over
/// whatever transport they like; the engine only needs this contract.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    fn list_available_tools(&self) -> Vec<ToolDescriptor>;
    async fn execute_tool(&self, req: ToolRequest) -> Result<ToolResult, ToolError>;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
