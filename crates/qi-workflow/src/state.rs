// Copyright (c) 2026 The qi-prompt Authors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One appended tool result.  The list is the workflow's synchronisation
/// point: append is commutative, so parallel tool nodes may interleave.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultEntry {
    pub node_id: String,
    pub tool: String,
    pub content: String,
    pub is_error: bool,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    pub started_at: DateTime<Utc>,
    pub current_stage: String,
    /// Ordered record of stages entered.
    pub processing_steps: Vec<String>,
    /// Performance counters (nodes run, tool calls, retries, ...).
    pub counters: BTreeMap<String, u64>,
    pub updated_at: DateTime<Utc>,
}

/// Execution state of a running workflow.
///
/// The tool-result list grows only through [`WorkflowState::append_tool_result`]
/// and metadata timestamps never move backwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub input: String,
    /// Extraction pattern that produced the spec ("llm", "skeleton", ...).
    pub pattern: String,
    pub domain: String,
    tool_results: Vec<ToolResultEntry>,
    pub reasoning_output: Option<String>,
    pub output: Option<String>,
    pub metadata: WorkflowMetadata,
    /// Scratch register written by processing nodes and read through
    /// `$derived` parameter references.  Not part of snapshots.
    #[serde(skip)]
    pub(crate) derived: Option<String>,
}

impl WorkflowState {
    pub fn new(input: impl Into<String>, pattern: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            input: input.into(),
            pattern: pattern.into(),
            domain: String::new(),
            tool_results: Vec::new(),
            reasoning_output: None,
            output: None,
            metadata: WorkflowMetadata {
                started_at: now,
                current_stage: "created".into(),
                processing_steps: Vec::new(),
                counters: BTreeMap::new(),
                updated_at: now,
            },
            derived: None,
        }
    }

    /// The append-only reducer over tool results.
    pub fn append_tool_result(&mut self, entry: ToolResultEntry) {
        self.tool_results.push(entry);
        self.bump_counter("tool_calls");
        self.touch();
    }

    pub fn tool_results(&self) -> &[ToolResultEntry] {
        &self.tool_results
    }

    pub fn tool_error_count(&self) -> usize {
        self.tool_results.iter().filter(|r| r.is_error).count()
    }

    pub fn last_tool_content(&self) -> Option<&str> {
        self.tool_results.last().map(|r| r.content.as_str())
    }

    /// Enter a stage: records the step and advances `updated_at`.
    pub fn advance_stage(&mut self, stage: &str) {
        self.metadata.current_stage = stage.to_string();
        self.metadata.processing_steps.push(stage.to_string());
        self.touch();
    }

    pub fn bump_counter(&mut self, key: &str) {
        *self.metadata.counters.entry(key.to_string()).or_insert(0) += 1;
    }

    /// `updated_at` is monotone even if the wall clock steps backwards.
    fn touch(&mut self) {
        let now = Utc::now();
        if now > self.metadata.updated_at {
            self.metadata.updated_at = now;
        }
    }

    /// Snapshot of the reducers' outputs only — safe to show mid-execution
    /// without exposing in-progress writes.
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            stage: self.metadata.current_stage.clone(),
            steps: self.metadata.processing_steps.clone(),
            tool_results: self.tool_results.clone(),
            reasoning_output: self.reasoning_output.clone(),
            output: self.output.clone(),
        }
    }
}

/// Point-in-time view carried by progress events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub stage: String,
    pub steps: Vec<String>,
    pub tool_results: Vec<ToolResultEntry>,
    pub reasoning_output: Option<String>,
    pub output: Option<String>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
