// Copyright (c) 2026 The qi-prompt Authors
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use std::time::Instant;
use tracing::debug;

use qi_config::ProviderConfig;

use crate::{
    provider::{ProviderKind, ResponseStream},
    CompletionMeta, CompletionRequest, ModelError, ResponseEvent, Role,
};

/// Provider speaking the OpenAI chat-completions wire format.
///
/// Covers hosted OpenAI as well as any local server exposing the same
/// endpoint (llama.cpp, Ollama, LM Studio); locality is decided by the
/// configured kind, not by the URL.
pub struct OpenAiCompatProvider {
    name: String,
    kind: ProviderKind,
    models: Vec<String>,
    api_key: Option<String>,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn from_config(cfg: &ProviderConfig, kind: ProviderKind) -> Self {
        let api_key = cfg
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok());
        Self {
            name: cfg.name.clone(),
            kind,
            models: cfg.models.clone(),
            api_key,
            base_url: cfg
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".into()),
            max_tokens: cfg.max_tokens.unwrap_or(4096),
            temperature: cfg.temperature.unwrap_or(0.2),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl crate::ModelProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }
    fn kind(&self) -> ProviderKind {
        self.kind
    }
    fn model_name(&self) -> &str {
        self.models.first().map(String::as_str).unwrap_or_default()
    }
    fn models(&self) -> &[String] {
        &self.models
    }

    async fn complete(&self, req: CompletionRequest) -> Result<ResponseStream, ModelError> {
        let model = req
            .model
            .clone()
            .unwrap_or_else(|| self.model_name().to_string());

        let messages: Vec<Value> = req
            .messages
            .iter()
            .map(|m| {
                json!({
                    "role": match m.role {
                        Role::System => "system",
                        Role::User => "user",
                        Role::Assistant => "assistant",
                    },
                    "content": m.content,
                })
            })
            .collect();

        let body = json!({
            "model": model,
            "messages": messages,
            "max_tokens": req.max_tokens.unwrap_or(self.max_tokens),
            "temperature": req.temperature.unwrap_or(self.temperature),
            "stream": true,
        });

        debug!(provider = %self.name, model = %model, "sending chat-completions request");
        let started = Instant::now();

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let resp = builder.send().await.map_err(|e| ModelError::Transport {
            provider: self.name.clone(),
            message: e.to_string(),
        })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => ModelError::Auth {
                    provider: self.name.clone(),
                    message: format!("{status}: {text}"),
                },
                429 => ModelError::Overloaded {
                    provider: self.name.clone(),
                    message: format!("{status}: {text}"),
                },
                s if s >= 500 => ModelError::Unavailable {
                    provider: self.name.clone(),
                    message: format!("{status}: {text}"),
                },
                _ => ModelError::InvalidResponse {
                    provider: self.name.clone(),
                    message: format!("{status}: {text}"),
                },
            });
        }

        let provider = self.name.clone();
        let byte_stream = resp.bytes_stream();
        let event_stream = byte_stream
            .scan(
                SseState {
                    buf: String::new(),
                    provider: provider.clone(),
                    model,
                    started,
                    done_sent: false,
                },
                |state, chunk| {
                    let events = match chunk {
                        Ok(bytes) => {
                            state.buf.push_str(&String::from_utf8_lossy(&bytes));
                            state.drain_lines()
                        }
                        Err(e) => vec![Err(ModelError::Transport {
                            provider: state.provider.clone(),
                            message: e.to_string(),
                        })],
                    };
                    futures::future::ready(Some(events))
                },
            )
            .flat_map(futures::stream::iter);

        Ok(Box::pin(event_stream))
    }
}

struct SseState {
    buf: String,
    provider: String,
    model: String,
    started: Instant,
    done_sent: bool,
}

impl SseState {
    fn drain_lines(&mut self) -> Vec<Result<ResponseEvent, ModelError>> {
        let mut events = Vec::new();
        while let Some(pos) = self.buf.find('\n') {
            let line = self.buf[..pos].trim_end_matches('\r').to_string();
            self.buf.drain(..=pos);
            let Some(data) = line.strip_prefix("data: ") else {
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                if !self.done_sent {
                    self.done_sent = true;
                    events.push(Ok(ResponseEvent::Done(CompletionMeta {
                        model: self.model.clone(),
                        provider: self.provider.clone(),
                        input_tokens: None,
                        output_tokens: None,
                        elapsed_ms: self.started.elapsed().as_millis() as u64,
                    })));
                }
                continue;
            }
            let Ok(v) = serde_json::from_str::<Value>(data) else {
                continue;
            };
            if let Some(text) = v["choices"][0]["delta"]["content"].as_str() {
                if !text.is_empty() {
                    events.push(Ok(ResponseEvent::TextDelta(text.to_string())));
                }
            }
        }
        events
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> SseState {
        SseState {
            buf: String::new(),
            provider: "local".into(),
            model: "llama3.2".into(),
            started: Instant::now(),
            done_sent: false,
        }
    }

    #[test]
    fn delta_content_parses() {
        let mut s = state();
        s.buf
            .push_str("data: {\"choices\":[{\"delta\":{\"content\":\"hey\"}}]}\n");
        let events = s.drain_lines();
        assert!(matches!(
            events[0].as_ref().unwrap(),
            ResponseEvent::TextDelta(t) if t == "hey"
        ));
    }

    #[test]
    fn done_sentinel_emits_final_marker_once() {
        let mut s = state();
        s.buf.push_str("data: [DONE]\ndata: [DONE]\n");
        let events = s.drain_lines();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0].as_ref().unwrap(),
            ResponseEvent::Done(meta) if meta.model == "llama3.2"
        ));
    }

    #[test]
    fn empty_deltas_are_skipped() {
        let mut s = state();
        s.buf
            .push_str("data: {\"choices\":[{\"delta\":{\"content\":\"\"}}]}\n");
        assert!(s.drain_lines().is_empty());
    }
}
