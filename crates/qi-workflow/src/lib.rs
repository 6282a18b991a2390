// Copyright (c) 2026 The qi-prompt Authors
//
// SPDX-License-Identifier: Apache-2.0
//! The workflow engine: typed DAG specs extracted from natural language,
//! compiled once per structural hash, and executed with bounded tool
//! fan-out, checkpointed state, streaming progress, and cooperative
//! cancellation.

mod engine;
mod extract;
mod spec;
mod state;

pub use engine::{EngineConfig, ExecEvent, WorkflowEngine, WorkflowStatus};
pub use extract::{ExtractError, Extraction, Extractor};
pub use spec::{NodeKind, SpecError, WorkflowEdge, WorkflowNode, WorkflowSpec};
pub use state::{StateSnapshot, ToolResultEntry, WorkflowMetadata, WorkflowState};
