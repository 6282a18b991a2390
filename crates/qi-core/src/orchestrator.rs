// Copyright (c) 2026 The qi-prompt Authors
//
// SPDX-License-Identifier: Apache-2.0
//! The single consumer of the message queue.
//!
//! Exactly one handler is in flight at any time: the loop dequeues a
//! message, drives its handler to a terminal state, and only then dequeues
//! the next.  While a handler runs, the loop keeps draining the queue just
//! enough to observe `Cancel` messages (firing the handler's cancellation
//! token) — everything else waits in a local backlog in dequeue order.
//! This is the design that rules out duplicate concurrent model calls.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use qi_classifier::{Classifier, Extracted};
use qi_context::{assemble_context, expand_references, DEFAULT_MAX_FILE_BYTES};
use qi_model::{ChatMessage, CompletionOptions, ProviderRegistry, ResponseEvent};
use qi_queue::{Message, MessageId, MessageIter, MessageKind, MessageQueue, Payload, Priority};
use qi_session::StateStore;
use qi_tools::ToolProvider;
use qi_workflow::{ExecEvent, Extraction, Extractor, WorkflowEngine, WorkflowStatus};

use crate::{
    CommandContext, CommandRegistry, ErrorCategory, QiError, SharedAppState,
};

/// Terminal outcome of one request handler.
enum Outcome {
    /// Completed; the assistant text to append to the conversation, if any.
    Completed(Option<String>),
    /// Cancelled; partial text already shown is kept, never retracted.
    Cancelled(Option<String>),
    Failed(QiError),
}

pub struct Orchestrator {
    queue: Arc<MessageQueue>,
    classifier: Classifier,
    commands: Arc<CommandRegistry>,
    providers: Arc<ProviderRegistry>,
    engine: Arc<WorkflowEngine>,
    extractor: Extractor,
    sessions: Arc<StateStore>,
    tools: Arc<dyn ToolProvider>,
    app_state: SharedAppState,
    workspace_root: PathBuf,
    /// Token budget for assembled prompt context.
    context_budget: usize,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<MessageQueue>,
        classifier: Classifier,
        commands: Arc<CommandRegistry>,
        providers: Arc<ProviderRegistry>,
        engine: Arc<WorkflowEngine>,
        extractor: Extractor,
        sessions: Arc<StateStore>,
        tools: Arc<dyn ToolProvider>,
        app_state: SharedAppState,
        workspace_root: PathBuf,
    ) -> Self {
        Self {
            queue,
            classifier,
            commands,
            providers,
            engine,
            extractor,
            sessions,
            tools,
            app_state,
            workspace_root,
            context_budget: 4_000,
        }
    }

    /// Consume the queue until it is destroyed.  Claims the single iterator
    /// slot; a second orchestrator on the same queue fails loudly.
    pub async fn run(&self) -> Result<(), QiError> {
        let mut iter = self.queue.iterate()?;
        let mut backlog: VecDeque<Message> = VecDeque::new();
        info!("orchestrator started");

        loop {
            let msg = match backlog.pop_front() {
                Some(m) => m,
                None => match iter.next().await {
                    Some(m) => m,
                    None => break,
                },
            };

            match msg.kind() {
                MessageKind::UserInput => {
                    self.start_busy(&msg);
                    let outcome = self.drive_user_input(&msg, &mut iter, &mut backlog).await;
                    self.finish_request(&msg, outcome);
                }
                // Nothing is in flight between handlers, so a Cancel arriving
                // here has nothing to stop.
                MessageKind::Cancel => debug!("cancel with no handler in flight, dropped"),
                MessageKind::ConfigReload => {
                    let _ = self.queue.enqueue_correlated(
                        Payload::FinalResult {
                            success: true,
                            content: "configuration is fixed after startup; reload acknowledged, \
                                      restart to apply file changes"
                                .into(),
                            data: None,
                        },
                        Priority::Normal,
                        msg.id,
                    );
                }
                MessageKind::SessionReset => {
                    let old = self.sessions.reset();
                    if let Err(e) = self.sessions.persist(&old) {
                        warn!(error = %e, "snapshot of discarded session failed");
                    }
                    let _ = self.queue.enqueue_correlated(
                        Payload::FinalResult {
                            success: true,
                            content: format!(
                                "session {} closed; now on {}",
                                old.id,
                                self.sessions.current_id()
                            ),
                            data: None,
                        },
                        Priority::Normal,
                        msg.id,
                    );
                }
                MessageKind::StatusRequest => {
                    let _ = self.queue.enqueue_correlated(
                        Payload::StatusResponse {
                            report: self.status_line(),
                        },
                        Priority::Normal,
                        msg.id,
                    );
                }
                // Response kinds never reach the consumer side.
                _ => {}
            }
        }
        info!("orchestrator stopped (queue destroyed)");
        Ok(())
    }

    // ── Request driving ──────────────────────────────────────────────────────

    /// Run the handler for one `UserInput` while watching the queue for
    /// `Cancel`.  Non-cancel messages dequeued meanwhile keep their order in
    /// the backlog.
    async fn drive_user_input(
        &self,
        msg: &Message,
        iter: &mut MessageIter<'_>,
        backlog: &mut VecDeque<Message>,
    ) -> Outcome {
        let cancel = CancellationToken::new();
        let fut = self.handle_user_input(msg, cancel.clone());
        tokio::pin!(fut);
        let mut queue_gone = false;
        loop {
            if queue_gone {
                return (&mut fut).await;
            }
            tokio::select! {
                outcome = &mut fut => return outcome,
                next = iter.next() => match next {
                    Some(m) if m.kind() == MessageKind::Cancel => {
                        debug!(request = %msg.id, "cancellation requested");
                        cancel.cancel();
                    }
                    Some(m) => backlog.push_back(m),
                    None => {
                        // Queue destroyed mid-request: cancel and let the
                        // handler reach its terminal state.
                        cancel.cancel();
                        queue_gone = true;
                    }
                },
            }
        }
    }

    async fn handle_user_input(&self, msg: &Message, cancel: CancellationToken) -> Outcome {
        let Payload::UserInput { text } = &msg.payload else {
            return Outcome::Completed(None);
        };
        self.sessions.add_entry("user", text.clone());

        let classification = self.classifier.classify(text, None).await;
        debug!(
            input_type = ?classification.input_type,
            confidence = classification.confidence,
            method = classification.method.as_str(),
            "input classified"
        );

        match classification.extracted {
            Extracted::Command { name, argv } => {
                let result = self
                    .commands
                    .execute(&name, argv, self.command_context())
                    .await;
                let content = result.message.clone();
                let _ = self.queue.enqueue_correlated(
                    Payload::FinalResult {
                        success: result.success,
                        content: result.message,
                        data: result.data,
                    },
                    Priority::Normal,
                    msg.id,
                );
                Outcome::Completed(Some(content))
            }
            Extracted::Prompt { text } => self.handle_prompt(msg.id, &text, &cancel).await,
            Extracted::Workflow { hint } => match self.extractor.extract(text, &hint).await {
                Ok(extraction) => {
                    self.handle_workflow(msg.id, text, extraction, &cancel).await
                }
                Err(e) => {
                    // Extraction failure falls back to prompt handling.
                    warn!(error = %e, "workflow extraction failed, handling as prompt");
                    self.handle_prompt(msg.id, text, &cancel).await
                }
            },
        }
    }

    async fn handle_prompt(
        &self,
        request_id: MessageId,
        text: &str,
        cancel: &CancellationToken,
    ) -> Outcome {
        let (expanded, files) =
            expand_references(text, &self.workspace_root, DEFAULT_MAX_FILE_BYTES);
        self.sessions.with_session(|s| {
            for f in files.iter().filter(|f| f.resolved()) {
                if !s.file_refs.contains(&f.reference) {
                    s.file_refs.push(f.reference.clone());
                }
            }
        });

        let context = assemble_context(&expanded, &files, &[], self.context_budget);
        let mut messages = Vec::new();
        if !context.is_empty() {
            messages.push(ChatMessage::system(format!(
                "Use the following context when answering.\n\n{}",
                context.render()
            )));
        }
        messages.push(ChatMessage::user(expanded));

        let (provider, mut stream) = match self
            .providers
            .complete_stream(messages, CompletionOptions::default())
            .await
        {
            Ok(opened) => opened,
            Err(e) => return Outcome::Failed(e.into()),
        };
        let _ = self.queue.enqueue_correlated(
            Payload::Progress {
                stage: "prompt".into(),
                detail: Some(provider),
            },
            Priority::Normal,
            request_id,
        );

        let mut full = String::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Outcome::Cancelled((!full.is_empty()).then_some(full));
                }
                ev = stream.next() => match ev {
                    Some(Ok(ResponseEvent::TextDelta(delta))) => {
                        full.push_str(&delta);
                        let _ = self.queue.enqueue_correlated(
                            Payload::PartialResult { text: delta },
                            Priority::Normal,
                            request_id,
                        );
                    }
                    Some(Ok(ResponseEvent::Done(meta))) => {
                        let _ = self.queue.enqueue_correlated(
                            Payload::FinalResult {
                                success: true,
                                content: full.clone(),
                                data: Some(json!({
                                    "provider": meta.provider,
                                    "model": meta.model,
                                    "input_tokens": meta.input_tokens,
                                    "output_tokens": meta.output_tokens,
                                    "elapsed_ms": meta.elapsed_ms,
                                })),
                            },
                            Priority::Normal,
                            request_id,
                        );
                        return Outcome::Completed(Some(full));
                    }
                    Some(Err(e)) => return Outcome::Failed(e.into()),
                    None => {
                        // Provider stream ended without its final marker;
                        // treat what arrived as the completion.
                        let _ = self.queue.enqueue_correlated(
                            Payload::FinalResult {
                                success: true,
                                content: full.clone(),
                                data: None,
                            },
                            Priority::Normal,
                            request_id,
                        );
                        return Outcome::Completed(Some(full));
                    }
                },
            }
        }
    }

    async fn handle_workflow(
        &self,
        request_id: MessageId,
        text: &str,
        extraction: Extraction,
        cancel: &CancellationToken,
    ) -> Outcome {
        let Extraction { spec, pattern } = extraction;
        debug!(workflow = %spec.name, pattern = %pattern, nodes = spec.nodes.len(), "executing workflow");
        self.sessions
            .with_session(|s| s.active_workflow = Some(spec.clone()));

        let mut rx = match self.engine.execute(&spec, text, &pattern, cancel.clone()) {
            Ok(rx) => rx,
            Err(e) => {
                self.sessions.with_session(|s| s.active_workflow = None);
                return Outcome::Failed(e.into());
            }
        };

        let mut seen_results = 0usize;
        while let Some(ev) = rx.recv().await {
            match ev {
                ExecEvent::Node {
                    node_id,
                    snapshot,
                    is_complete,
                } => {
                    let _ = self.queue.enqueue_correlated(
                        Payload::Progress {
                            stage: node_id,
                            detail: is_complete.then(|| "complete".to_string()),
                        },
                        Priority::Normal,
                        request_id,
                    );
                    // New tool results stream out as partials as they land.
                    for r in snapshot.tool_results.iter().skip(seen_results) {
                        let _ = self.queue.enqueue_correlated(
                            Payload::PartialResult {
                                text: format!("[{}] {}\n", r.tool, first_line(&r.content)),
                            },
                            Priority::Normal,
                            request_id,
                        );
                    }
                    seen_results = seen_results.max(snapshot.tool_results.len());
                }
                ExecEvent::Finished { status, state } => {
                    self.sessions.with_session(|s| s.active_workflow = None);
                    match status {
                        WorkflowStatus::Completed => {
                            let mut content = state.output.clone().unwrap_or_default();
                            let tool_lines: Vec<String> = state
                                .tool_results()
                                .iter()
                                .map(|r| format!("[{}] {}", r.tool, first_line(&r.content)))
                                .collect();
                            if !tool_lines.is_empty() {
                                content.push_str("\n\ntool results:\n");
                                content.push_str(&tool_lines.join("\n"));
                            }
                            let _ = self.queue.enqueue_correlated(
                                Payload::FinalResult {
                                    success: true,
                                    content: content.clone(),
                                    data: Some(json!({
                                        "pattern": state.pattern,
                                        "steps": state.metadata.processing_steps,
                                        "counters": state.metadata.counters,
                                    })),
                                },
                                Priority::Normal,
                                request_id,
                            );
                            return Outcome::Completed(Some(content));
                        }
                        WorkflowStatus::Cancelled => {
                            let partial = (!state.tool_results().is_empty()).then(|| {
                                state
                                    .tool_results()
                                    .iter()
                                    .map(|r| format!("[{}] {}", r.tool, first_line(&r.content)))
                                    .collect::<Vec<_>>()
                                    .join("\n")
                            });
                            return Outcome::Cancelled(partial);
                        }
                        WorkflowStatus::Failed { code, message } => {
                            let category = match code.as_str() {
                                "VALIDATION_FAILED" => ErrorCategory::Validation,
                                "CANCELLED" => ErrorCategory::Cancelled,
                                _ => ErrorCategory::Business,
                            };
                            return Outcome::Failed(QiError::new(category, code, message));
                        }
                    }
                }
            }
        }
        self.sessions.with_session(|s| s.active_workflow = None);
        Outcome::Failed(QiError::system(
            "WORKFLOW_ABORTED",
            "workflow event stream ended without a terminal state",
        ))
    }

    // ── Bookkeeping ──────────────────────────────────────────────────────────

    fn start_busy(&self, msg: &Message) {
        let mut state = self.app_state.lock().expect("app state lock");
        if let Err(e) = state.start_task(msg.task_snippet()) {
            // Would mean two handlers in flight; the loop structure forbids
            // it, so surface loudly in logs if it ever shows up.
            warn!(error = %e, "START_TASK rejected");
        }
    }

    /// The one place failures become `Error` messages on the queue, and the
    /// one place the UI returns to ready.generic.
    fn finish_request(&self, msg: &Message, outcome: Outcome) {
        let errored = matches!(outcome, Outcome::Failed(_));
        // Return to ready.generic before the terminal message goes out, so
        // a subscriber that redraws on it already sees the ready state.
        {
            let mut state = self.app_state.lock().expect("app state lock");
            let _ = if errored {
                state.task_error()
            } else {
                state.task_complete()
            };
        }
        match outcome {
            Outcome::Completed(text) => {
                if let Some(text) = text {
                    self.sessions.add_entry("assistant", text);
                }
            }
            Outcome::Cancelled(partial) => {
                if let Some(partial) = partial {
                    self.sessions.with_session(|s| {
                        let mut meta = std::collections::BTreeMap::new();
                        meta.insert("cancelled".to_string(), "true".to_string());
                        s.add_entry_with_metadata("assistant", partial, meta);
                    });
                }
                // Terminal signal through the same channel; not an error to
                // the user and no FinalResult is emitted.
                let e = QiError::cancelled();
                let _ = self.queue.enqueue_correlated(
                    Payload::Error {
                        category: e.category.as_str().into(),
                        code: e.code,
                        message: e.message,
                        context: None,
                    },
                    Priority::Normal,
                    msg.id,
                );
            }
            Outcome::Failed(e) => {
                info!(code = %e.code, category = %e.category, "request failed: {}", e.message);
                self.sessions
                    .add_entry("system", format!("error {}: {}", e.code, e.message));
                let _ = self.queue.enqueue_correlated(
                    Payload::Error {
                        category: e.category.as_str().into(),
                        code: e.code,
                        message: e.message,
                        context: e.context,
                    },
                    Priority::Normal,
                    msg.id,
                );
            }
        }
    }

    fn command_context(&self) -> CommandContext {
        CommandContext {
            providers: self.providers.clone(),
            tools: self.tools.clone(),
            sessions: self.sessions.clone(),
            queue: self.queue.clone(),
            workspace_root: self.workspace_root.clone(),
            specs: self.commands.specs(),
            status_line: self.status_line(),
        }
    }

    fn status_line(&self) -> String {
        let state = self.app_state.lock().expect("app state lock");
        format!("state: {}", state.describe())
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
