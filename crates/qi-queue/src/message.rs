// Copyright (c) 2026 The qi-prompt Authors
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

pub type MessageId = Uuid;

/// Dequeue priority.  Higher values win at dequeue time; an in-progress
/// handler is never interrupted by a later high-priority message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

/// The closed set of message kinds that flow through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    UserInput,
    Cancel,
    ConfigReload,
    SessionReset,
    Progress,
    PartialResult,
    FinalResult,
    Error,
    StatusRequest,
    StatusResponse,
}

impl MessageKind {
    /// Response kinds are fanned out to subscribers rather than delivered to
    /// the single consumer.
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            MessageKind::Progress
                | MessageKind::PartialResult
                | MessageKind::FinalResult
                | MessageKind::Error
                | MessageKind::StatusResponse
        )
    }
}

/// Kind-specific payload.  The message kind is derived from the payload
/// variant, so a payload can never be paired with the wrong kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Payload {
    UserInput {
        text: String,
    },
    /// Cancel the in-flight request.  `target` narrows the cancellation to a
    /// specific request; `None` cancels whatever is currently running.
    Cancel {
        target: Option<MessageId>,
    },
    ConfigReload,
    SessionReset,
    Progress {
        stage: String,
        detail: Option<String>,
    },
    PartialResult {
        text: String,
    },
    FinalResult {
        success: bool,
        content: String,
        data: Option<serde_json::Value>,
    },
    Error {
        category: String,
        code: String,
        message: String,
        /// Diagnostic context, rendered only under `--debug`.
        context: Option<String>,
    },
    StatusRequest,
    StatusResponse {
        report: String,
    },
}

impl Payload {
    pub fn kind(&self) -> MessageKind {
        match self {
            Payload::UserInput { .. } => MessageKind::UserInput,
            Payload::Cancel { .. } => MessageKind::Cancel,
            Payload::ConfigReload => MessageKind::ConfigReload,
            Payload::SessionReset => MessageKind::SessionReset,
            Payload::Progress { .. } => MessageKind::Progress,
            Payload::PartialResult { .. } => MessageKind::PartialResult,
            Payload::FinalResult { .. } => MessageKind::FinalResult,
            Payload::Error { .. } => MessageKind::Error,
            Payload::StatusRequest => MessageKind::StatusRequest,
            Payload::StatusResponse { .. } => MessageKind::StatusResponse,
        }
    }
}

/// The unit that flows through the queue.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: MessageId,
    /// Monotone sequence number assigned at enqueue.  Within a priority,
    /// lower sequence numbers dequeue first.
    pub seq: u64,
    pub priority: Priority,
    pub payload: Payload,
    /// Links response messages to the originating request.
    pub correlation_id: Option<MessageId>,
    pub enqueued_at: DateTime<Utc>,
    /// Messages still buffered past their TTL are dropped at dequeue time.
    pub ttl: Option<Duration>,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.ttl {
            Some(ttl) => {
                let age = now.signed_duration_since(self.enqueued_at);
                age.to_std().map(|a| a > ttl).unwrap_or(false)
            }
            None => false,
        }
    }

    /// Short task label for UI display, derived from the payload.
    pub fn task_snippet(&self) -> String {
        let text = match &self.payload {
            Payload::UserInput { text } => text.as_str(),
            Payload::StatusRequest => "status",
            Payload::ConfigReload => "config reload",
            Payload::SessionReset => "session reset",
            _ => "",
        };
        let mut snippet: String = text.chars().take(32).collect();
        if text.chars().count() > 32 {
            snippet.push('…');
        }
        snippet
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
