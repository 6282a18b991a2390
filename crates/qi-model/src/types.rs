// Copyright (c) 2026 The qi-prompt Authors
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

// ─── Message types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message sent to a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Request sent to a model provider.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    /// Overrides the provider's default model for this call only.
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// Caller-supplied per-request options.
#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// A single streamed event from the model.
#[derive(Debug, Clone)]
pub enum ResponseEvent {
    /// A text delta, in provider emission order.
    TextDelta(String),
    /// The stream finished; aggregate metadata for the completion.
    Done(CompletionMeta),
}

/// Aggregate metadata carried by the final stream marker.
#[derive(Debug, Clone, Default)]
pub struct CompletionMeta {
    pub model: String,
    pub provider: String,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub elapsed_ms: u64,
}

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Provider-layer failures.  `is_failover()` marks the classes the fallback
/// chain may recover from by trying the next provider.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("transport error talking to {provider}: {message}")]
    Transport { provider: String, message: String },

    #[error("provider {provider} is overloaded: {message}")]
    Overloaded { provider: String, message: String },

    #[error("provider {provider} is unavailable: {message}")]
    Unavailable { provider: String, message: String },

    #[error("provider {provider} rejected credentials: {message}")]
    Auth { provider: String, message: String },

    #[error("provider {provider} returned an invalid response: {message}")]
    InvalidResponse { provider: String, message: String },

    #[error("all providers exhausted (tried: {})", tried.join(", "))]
    Exhausted { tried: Vec<String> },

    #[error("no provider named '{0}' is configured")]
    UnknownProvider(String),

    #[error("no providers are enabled")]
    NoneEnabled,
}

impl ModelError {
    /// Whether the fallback chain should move on to the next provider.
    pub fn is_failover(&self) -> bool {
        matches!(
            self,
            ModelError::Transport { .. }
                | ModelError::Overloaded { .. }
                | ModelError::Unavailable { .. }
        )
    }

    pub fn code(&self) -> &'static str {
        match self {
            ModelError::Transport { .. } => "PROVIDER_TRANSPORT",
            ModelError::Overloaded { .. } => "PROVIDER_OVERLOADED",
            ModelError::Unavailable { .. } => "PROVIDER_UNAVAILABLE",
            ModelError::Auth { .. } => "PROVIDER_AUTH",
            ModelError::InvalidResponse { .. } => "PROVIDER_INVALID_RESPONSE",
            ModelError::Exhausted { .. } => "ALL_PROVIDERS_EXHAUSTED",
            ModelError::UnknownProvider(_) => "UNKNOWN_PROVIDER",
            ModelError::NoneEnabled => "NO_PROVIDERS_ENABLED",
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
