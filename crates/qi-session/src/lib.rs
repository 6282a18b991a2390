// Copyright (c) 2026 The qi-prompt Authors
//
// SPDX-License-Identifier: Apache-2.0
//! Session state: conversation history, context memory, file references,
//! and best-effort snapshot persistence.

mod session;
mod store;

pub use session::{ConversationEntry, SessionState};
pub use store::{SessionSummary, StateStore};
