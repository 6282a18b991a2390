// Copyright (c) 2026 The qi-prompt Authors
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::{CompletionRequest, ModelError, ResponseEvent};

pub type ResponseStream =
    Pin<Box<dyn Stream<Item = Result<ResponseEvent, ModelError>> + Send>>;

/// Tagged provider locality.  Enumerated at config load; there is no runtime
/// provider discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Local,
    Remote,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Local => write!(f, "local"),
            ProviderKind::Remote => write!(f, "remote"),
        }
    }
}

/// Uniform completion interface over one configured LLM backend.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Configured provider name (unique per installation).
    fn name(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    /// Default model used when the request carries no override.
    fn model_name(&self) -> &str;

    /// Models this provider offers.
    fn models(&self) -> &[String];

    /// Send a completion request and return a streaming response.
    ///
    /// The stream yields [`ResponseEvent::TextDelta`] items in provider
    /// emission order, terminated by [`ResponseEvent::Done`] carrying the
    /// aggregate metadata.
    async fn complete(&self, req: CompletionRequest) -> Result<ResponseStream, ModelError>;
}
