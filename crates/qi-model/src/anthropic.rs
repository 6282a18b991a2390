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

pub struct AnthropicProvider {
    name: String,
    models: Vec<String>,
    api_key: Option<String>,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn from_config(cfg: &ProviderConfig) -> Self {
        let api_key = cfg
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok());
        Self {
            name: cfg.name.clone(),
            models: cfg.models.clone(),
            api_key,
            base_url: cfg
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.anthropic.com".into()),
            max_tokens: cfg.max_tokens.unwrap_or(4096),
            temperature: cfg.temperature.unwrap_or(0.2),
            client: reqwest::Client::new(),
        }
    }

    fn transport(&self, message: impl std::fmt::Display) -> ModelError {
        ModelError::Transport {
            provider: self.name.clone(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl crate::ModelProvider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }
    fn kind(&self) -> ProviderKind {
        ProviderKind::Remote
    }
    fn model_name(&self) -> &str {
        self.models.first().map(String::as_str).unwrap_or_default()
    }
    fn models(&self) -> &[String] {
        &self.models
    }

    async fn complete(&self, req: CompletionRequest) -> Result<ResponseStream, ModelError> {
        let key = self.api_key.as_deref().ok_or_else(|| ModelError::Auth {
            provider: self.name.clone(),
            message: "API key environment variable not set".into(),
        })?;

        let model = req
            .model
            .clone()
            .unwrap_or_else(|| self.model_name().to_string());

        // Anthropic takes the system prompt out-of-band.
        let system_text: String = req
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let messages: Vec<Value> = req
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                json!({
                    "role": match m.role { Role::Assistant => "assistant", _ => "user" },
                    "content": m.content,
                })
            })
            .collect();

        let mut body = json!({
            "model": model,
            "messages": messages,
            "max_tokens": req.max_tokens.unwrap_or(self.max_tokens),
            "temperature": req.temperature.unwrap_or(self.temperature),
            "stream": true,
        });
        if !system_text.is_empty() {
            body["system"] = json!(system_text);
        }

        debug!(provider = %self.name, model = %model, "sending anthropic request");
        let started = Instant::now();

        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport(e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => ModelError::Auth {
                    provider: self.name.clone(),
                    message: format!("{status}: {text}"),
                },
                429 | 529 => ModelError::Overloaded {
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
        // SSE lines can be split across TCP chunks, so a remainder buffer is
        // carried forward; only complete '\n'-terminated lines are parsed.
        let event_stream = byte_stream
            .scan(
                SseState {
                    buf: String::new(),
                    provider: provider.clone(),
                    model,
                    started,
                    input_tokens: None,
                    output_tokens: None,
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
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
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
            let Ok(v) = serde_json::from_str::<Value>(data.trim()) else {
                continue;
            };
            match v["type"].as_str().unwrap_or("") {
                "content_block_delta" => {
                    if v["delta"]["type"].as_str() == Some("text_delta") {
                        let text = v["delta"]["text"].as_str().unwrap_or("").to_string();
                        events.push(Ok(ResponseEvent::TextDelta(text)));
                    }
                }
                "message_start" => {
                    self.input_tokens = v["message"]["usage"]["input_tokens"]
                        .as_u64()
                        .map(|t| t as u32);
                }
                "message_delta" => {
                    if let Some(t) = v["usage"]["output_tokens"].as_u64() {
                        self.output_tokens = Some(t as u32);
                    }
                }
                "message_stop" => {
                    events.push(Ok(ResponseEvent::Done(CompletionMeta {
                        model: self.model.clone(),
                        provider: self.provider.clone(),
                        input_tokens: self.input_tokens,
                        output_tokens: self.output_tokens,
                        elapsed_ms: self.started.elapsed().as_millis() as u64,
                    })));
                }
                _ => {}
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
            provider: "anthropic".into(),
            model: "claude-sonnet-4-5".into(),
            started: Instant::now(),
            input_tokens: None,
            output_tokens: None,
        }
    }

    #[test]
    fn text_delta_lines_parse() {
        let mut s = state();
        s.buf.push_str(
            "data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"hi\"}}\n",
        );
        let events = s.drain_lines();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0].as_ref().unwrap(),
            ResponseEvent::TextDelta(t) if t == "hi"
        ));
    }

    #[test]
    fn partial_line_is_carried_forward() {
        let mut s = state();
        s.buf.push_str("data: {\"type\":\"content_bl");
        assert!(s.drain_lines().is_empty());
        s.buf
            .push_str("ock_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"x\"}}\n");
        assert_eq!(s.drain_lines().len(), 1);
    }

    #[test]
    fn message_stop_emits_done_with_usage() {
        let mut s = state();
        s.buf.push_str(concat!(
            "data: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":12}}}\n",
            "data: {\"type\":\"message_delta\",\"usage\":{\"output_tokens\":34}}\n",
            "data: {\"type\":\"message_stop\"}\n",
        ));
        let events = s.drain_lines();
        let last = events.last().unwrap().as_ref().unwrap();
        match last {
            ResponseEvent::Done(meta) => {
                assert_eq!(meta.input_tokens, Some(12));
                assert_eq!(meta.output_tokens, Some(34));
                assert_eq!(meta.provider, "anthropic");
            }
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[test]
    fn non_data_lines_are_ignored() {
        let mut s = state();
        s.buf.push_str("event: message_start\n: keepalive\n\n");
        assert!(s.drain_lines().is_empty());
    }
}
