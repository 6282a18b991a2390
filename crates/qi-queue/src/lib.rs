// Copyright (c) 2026 The qi-prompt Authors
//
// SPDX-License-Identifier: Apache-2.0
//! Single-writer, single-reader asynchronous message queue.
//!
//! Every request enters the pipeline as a [`Message`] on one
//! [`MessageQueue`].  A single consumer loop (the orchestrator) dequeues
//! messages strictly in priority-then-sequence order; responses fan out to
//! read-only subscribers.  One consumer means one handler per message, which
//! is what rules out duplicate concurrent model calls by construction.

mod message;
mod queue;

pub use message::{Message, MessageId, MessageKind, Payload, Priority};
pub use queue::{MessageIter, MessageQueue, QueueError, QueueStats};
