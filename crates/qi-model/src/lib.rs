// Copyright (c) 2026 The qi-prompt Authors
//
// SPDX-License-Identifier: Apache-2.0
mod anthropic;
mod handler;
mod mock;
mod openai_compat;
mod provider;
mod types;

pub use anthropic::AnthropicProvider;
pub use handler::{ProviderInfo, ProviderRegistry};
pub use mock::{MockProvider, ScriptedMockProvider};
pub use openai_compat::OpenAiCompatProvider;
pub use provider::{ModelProvider, ProviderKind, ResponseStream};
pub use types::{
    ChatMessage, CompletionMeta, CompletionOptions, CompletionRequest, ModelError, ResponseEvent,
    Role,
};
