// Copyright (c) 2026 The qi-prompt Authors
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use tracing::{debug, warn};

use qi_config::{Config, ProviderSchema};

use crate::{
    provider::ResponseStream, AnthropicProvider, ChatMessage, CompletionOptions,
    CompletionRequest, MockProvider, ModelError, ModelProvider, OpenAiCompatProvider,
    ProviderKind, ResponseEvent,
};

/// Summary of one configured provider, for the `providers` command.
#[derive(Debug, Clone)]
pub struct ProviderInfo {
    pub name: String,
    pub kind: ProviderKind,
    pub models: Vec<String>,
    pub active: bool,
}

/// The prompt handler: a set of opened provider handles plus the fallback
/// chain over them.
///
/// The chain is the configuration order.  A request starts at the active
/// provider and walks the rest once each on transport-level failures; a
/// non-transport failure (bad credentials, invalid response) stops the walk
/// immediately.  The same provider is never retried within one request.
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn ModelProvider>>,
    active: Mutex<usize>,
    /// Model override selected by the `model` command; applies to the active
    /// provider and changes only between requests.
    model_override: Mutex<Option<String>>,
}

impl ProviderRegistry {
    /// Validate provider definitions against the schema and open handles for
    /// the enabled entries.
    pub fn from_config(config: &Config, schema: &ProviderSchema) -> anyhow::Result<Self> {
        let mut providers: Vec<Arc<dyn ModelProvider>> = Vec::new();
        for p in config.providers.iter().filter(|p| p.enabled) {
            schema
                .validate_provider(p)
                .map_err(|m| anyhow::anyhow!(m))?;
            let locality = schema
                .kinds
                .get(&p.kind)
                .map(|k| k.locality.as_str())
                .unwrap_or("remote");
            let kind = if locality == "local" {
                ProviderKind::Local
            } else {
                ProviderKind::Remote
            };
            let handle: Arc<dyn ModelProvider> = match p.kind.as_str() {
                "anthropic" => Arc::new(AnthropicProvider::from_config(p)),
                "mock" => Arc::new(MockProvider::named(&p.name)),
                // "openai", "local", and other OpenAI-compatible kinds all
                // speak the chat-completions wire format.
                _ => Arc::new(OpenAiCompatProvider::from_config(p, kind)),
            };
            debug!(name = %p.name, kind = %p.kind, "provider opened");
            providers.push(handle);
        }
        if providers.is_empty() {
            anyhow::bail!("no providers are enabled");
        }
        Ok(Self {
            providers,
            active: Mutex::new(0),
            model_override: Mutex::new(None),
        })
    }

    /// Build a registry from concrete handles (tests and offline demos).
    pub fn from_providers(providers: Vec<Arc<dyn ModelProvider>>) -> Result<Self, ModelError> {
        if providers.is_empty() {
            return Err(ModelError::NoneEnabled);
        }
        Ok(Self {
            providers,
            active: Mutex::new(0),
            model_override: Mutex::new(None),
        })
    }

    pub fn available(&self) -> Vec<ProviderInfo> {
        let active = *self.active.lock().unwrap();
        self.providers
            .iter()
            .enumerate()
            .map(|(i, p)| ProviderInfo {
                name: p.name().to_string(),
                kind: p.kind(),
                models: p.models().to_vec(),
                active: i == active,
            })
            .collect()
    }

    pub fn active_name(&self) -> String {
        let active = *self.active.lock().unwrap();
        self.providers[active].name().to_string()
    }

    /// The model the next request will use.
    pub fn active_model(&self) -> String {
        if let Some(m) = self.model_override.lock().unwrap().clone() {
            return m;
        }
        let active = *self.active.lock().unwrap();
        self.providers[active].model_name().to_string()
    }

    /// Switch the active provider.  Takes effect on the next request; an
    /// in-flight request keeps the provider it started with.
    pub fn set_active(&self, name: &str) -> Result<(), ModelError> {
        let idx = self
            .providers
            .iter()
            .position(|p| p.name() == name)
            .ok_or_else(|| ModelError::UnknownProvider(name.to_string()))?;
        *self.active.lock().unwrap() = idx;
        *self.model_override.lock().unwrap() = None;
        Ok(())
    }

    /// Switch the active model within the active provider's model list.
    pub fn set_model(&self, model: &str) -> Result<(), ModelError> {
        let active = *self.active.lock().unwrap();
        let provider = &self.providers[active];
        if !provider.models().iter().any(|m| m == model) {
            return Err(ModelError::InvalidResponse {
                provider: provider.name().to_string(),
                message: format!(
                    "model '{model}' is not offered (available: {})",
                    provider.models().join(", ")
                ),
            });
        }
        *self.model_override.lock().unwrap() = Some(model.to_string());
        Ok(())
    }

    /// Open a completion stream, walking the fallback chain.
    ///
    /// Returns the stream plus the name of the provider that accepted the
    /// request.
    pub async fn complete_stream(
        &self,
        messages: Vec<ChatMessage>,
        options: CompletionOptions,
    ) -> Result<(String, ResponseStream), ModelError> {
        let start = *self.active.lock().unwrap();
        let model_override = self.model_override.lock().unwrap().clone();
        let n = self.providers.len();
        let mut tried = Vec::new();

        for step in 0..n {
            let idx = (start + step) % n;
            let provider = &self.providers[idx];
            let req = CompletionRequest {
                messages: messages.clone(),
                // The model override only makes sense on the provider it was
                // selected for; fallbacks use their own default model.
                model: if idx == start {
                    options.model.clone().or_else(|| model_override.clone())
                } else {
                    None
                },
                max_tokens: options.max_tokens,
                temperature: options.temperature,
            };
            match provider.complete(req).await {
                Ok(stream) => {
                    if step > 0 {
                        debug!(provider = provider.name(), "fallback provider accepted request");
                    }
                    return Ok((provider.name().to_string(), stream));
                }
                Err(e) if e.is_failover() => {
                    warn!(provider = provider.name(), error = %e, "provider failed, walking chain");
                    tried.push(provider.name().to_string());
                }
                Err(e) => return Err(e),
            }
        }
        Err(ModelError::Exhausted { tried })
    }

    /// Single-shot completion: collect the stream into the final text.
    pub async fn complete(
        &self,
        text: &str,
        options: CompletionOptions,
    ) -> Result<String, ModelError> {
        let (_, mut stream) = self
            .complete_stream(vec![ChatMessage::user(text)], options)
            .await?;
        let mut out = String::new();
        while let Some(ev) = stream.next().await {
            match ev? {
                ResponseEvent::TextDelta(t) => out.push_str(&t),
                ResponseEvent::Done(_) => break,
            }
        }
        Ok(out)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
