// Copyright (c) 2026 The qi-prompt Authors
//
// SPDX-License-Identifier: Apache-2.0
//! The coordination layer: the category-tagged error model, the hierarchical
//! UI state machine, the command registry, and the orchestrator — the single
//! consumer of the message queue.

mod app_state;
mod commands;
mod error;
mod orchestrator;

pub use app_state::{shared_app_state, AppState, ReadySub, SharedAppState, StateError};
pub use commands::{
    builtin_registry, handler, CommandContext, CommandRegistry, CommandResult, CommandSpec,
    Handler,
};
pub use error::{ErrorCategory, QiError};
pub use orchestrator::Orchestrator;
