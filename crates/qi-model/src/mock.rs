// Copyright (c) 2026 The qi-prompt Authors
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use crate::{
    provider::{ProviderKind, ResponseStream},
    CompletionMeta, CompletionRequest, ModelError, ResponseEvent, Role,
};

/// Deterministic mock provider for tests.  Echoes the last user message back
/// as the assistant response, split into two deltas so streaming consumers
/// are exercised.
pub struct MockProvider {
    name: String,
    models: Vec<String>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            name: "mock".into(),
            models: vec!["mock-model".into()],
        }
    }
}

impl MockProvider {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl crate::ModelProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }
    fn model_name(&self) -> &str {
        &self.models[0]
    }
    fn models(&self) -> &[String] {
        &self.models
    }

    async fn complete(&self, req: CompletionRequest) -> Result<ResponseStream, ModelError> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_else(|| "[no input]".into());

        let events: Vec<Result<ResponseEvent, ModelError>> = vec![
            Ok(ResponseEvent::TextDelta("MOCK: ".into())),
            Ok(ResponseEvent::TextDelta(reply)),
            Ok(ResponseEvent::Done(CompletionMeta {
                model: self.models[0].clone(),
                provider: self.name.clone(),
                input_tokens: Some(10),
                output_tokens: Some(10),
                elapsed_ms: 1,
            })),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

/// A pre-scripted mock.  Each `complete` call pops the next script from the
/// front of the queue, so tests can stage exact event sequences — including
/// failures — without network access.
pub struct ScriptedMockProvider {
    name: String,
    models: Vec<String>,
    scripts: Arc<Mutex<Vec<Script>>>,
    /// Number of `complete` calls observed, for duplicate-call assertions.
    pub calls: Arc<Mutex<u32>>,
    /// The last request seen, so tests can inspect what was sent.
    pub last_request: Arc<Mutex<Option<CompletionRequest>>>,
}

enum Script {
    Events(Vec<ResponseEvent>),
    Fail(fn(&str) -> ModelError),
}

impl ScriptedMockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            models: vec!["scripted-mock-model".into()],
            scripts: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(Mutex::new(0)),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// Append a script that streams `text` as one delta then completes.
    pub fn then_text(self, text: impl Into<String>) -> Self {
        let meta = CompletionMeta {
            model: self.models[0].clone(),
            provider: self.name.clone(),
            input_tokens: Some(5),
            output_tokens: Some(5),
            elapsed_ms: 1,
        };
        self.scripts.lock().unwrap().push(Script::Events(vec![
            ResponseEvent::TextDelta(text.into()),
            ResponseEvent::Done(meta),
        ]));
        self
    }

    /// Append a script whose `complete` call fails before streaming starts.
    pub fn then_fail(self, make: fn(&str) -> ModelError) -> Self {
        self.scripts.lock().unwrap().push(Script::Fail(make));
        self
    }

    pub fn call_count(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl crate::ModelProvider for ScriptedMockProvider {
    fn name(&self) -> &str {
        &self.name
    }
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }
    fn model_name(&self) -> &str {
        &self.models[0]
    }
    fn models(&self) -> &[String] {
        &self.models
    }

    async fn complete(&self, req: CompletionRequest) -> Result<ResponseStream, ModelError> {
        *self.calls.lock().unwrap() += 1;
        *self.last_request.lock().unwrap() = Some(req);
        let script = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                Script::Events(vec![
                    ResponseEvent::TextDelta("[no more scripts]".into()),
                    ResponseEvent::Done(CompletionMeta::default()),
                ])
            } else {
                scripts.remove(0)
            }
        };
        match script {
            Script::Events(events) => {
                let wrapped: Vec<Result<ResponseEvent, ModelError>> =
                    events.into_iter().map(Ok).collect();
                Ok(Box::pin(stream::iter(wrapped)))
            }
            Script::Fail(make) => Err(make(&self.name)),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
