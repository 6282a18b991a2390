// Copyright (c) 2026 The qi-prompt Authors
//
// SPDX-License-Identifier: MIT
/// End-to-end tests for the request pipeline using the mock model provider:
/// driver-side enqueues in, rendered message stream out.
use std::sync::Arc;
use std::time::Duration;

use qi_classifier::{Classifier, InputType};
use qi_config::ClassifierConfig;
use qi_core::{builtin_registry, shared_app_state, Orchestrator, SharedAppState};
use qi_model::{ProviderRegistry, ResponseEvent, ScriptedMockProvider};
use qi_queue::{Message, MessageKind, MessageQueue, Payload, Priority};
use qi_session::StateStore;
use qi_tools::{ToolProvider, ToolRegistry};
use qi_workflow::{EngineConfig, Extractor, WorkflowEngine};

struct Pipeline {
    queue: Arc<MessageQueue>,
    app_state: SharedAppState,
    sessions: Arc<StateStore>,
    orchestrator: tokio::task::JoinHandle<Result<(), qi_core::QiError>>,
    _workspace: tempfile::TempDir,
}

impl Pipeline {
    fn start(providers: Arc<ProviderRegistry>) -> Self {
        let workspace = tempfile::tempdir().unwrap();
        Self::start_in(providers, workspace)
    }

    fn start_in(providers: Arc<ProviderRegistry>, workspace: tempfile::TempDir) -> Self {
        let queue = Arc::new(MessageQueue::new());
        let tools: Arc<dyn ToolProvider> = Arc::new(ToolRegistry::with_builtins());
        let sessions =
            Arc::new(StateStore::with_dir(workspace.path().join(".sessions")).unwrap());
        let app_state = shared_app_state();
        let orchestrator = Arc::new(Orchestrator::new(
            queue.clone(),
            Classifier::new(ClassifierConfig::default()),
            Arc::new(builtin_registry()),
            providers.clone(),
            Arc::new(WorkflowEngine::new(
                tools.clone(),
                Some(providers),
                EngineConfig::default(),
            )),
            Extractor::new(None, 1),
            sessions.clone(),
            tools,
            app_state.clone(),
            workspace.path().to_path_buf(),
        ));
        let handle = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move { orchestrator.run().await }
        });
        Self {
            queue,
            app_state,
            sessions,
            orchestrator: handle,
            _workspace: workspace,
        }
    }

    fn send(&self, text: &str) {
        self.queue
            .enqueue(
                Payload::UserInput { text: text.into() },
                Priority::Normal,
            )
            .unwrap();
    }

    /// Stop the pipeline.  Returns the workspace so callers inspecting
    /// on-disk artifacts can keep it alive past the shutdown.
    async fn shutdown(self) -> tempfile::TempDir {
        self.queue.destroy();
        self.orchestrator.await.unwrap().unwrap();
        self._workspace
    }
}

fn mock_providers(replies: &[&str]) -> (Arc<ScriptedMockProvider>, Arc<ProviderRegistry>) {
    let mut p = ScriptedMockProvider::new("mock");
    for r in replies {
        p = p.then_text(*r);
    }
    let p = Arc::new(p);
    let registry = Arc::new(ProviderRegistry::from_providers(vec![p.clone()]).unwrap());
    (p, registry)
}

/// Drain the outbound stream until (and including) the next terminal
/// message (FinalResult or Error).
async fn collect_request(rx: &mut tokio::sync::broadcast::Receiver<Message>) -> Vec<Message> {
    let mut out = Vec::new();
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("terminal message before timeout")
            .expect("stream open");
        let kind = msg.kind();
        out.push(msg);
        if matches!(kind, MessageKind::FinalResult | MessageKind::Error) {
            return out;
        }
    }
}

// ── Scenario 1: /help ────────────────────────────────────────────────────────

#[tokio::test]
async fn help_command_round_trip() {
    let (_, providers) = mock_providers(&[]);
    let pipeline = Pipeline::start(providers);
    let mut rx = pipeline.queue.subscribe();

    pipeline.send("/help");
    let messages = collect_request(&mut rx).await;

    match &messages.last().unwrap().payload {
        Payload::FinalResult { success, content, .. } => {
            assert!(*success);
            assert!(content.contains("help"));
        }
        other => panic!("expected FinalResult, got {other:?}"),
    }
    assert!(!pipeline.app_state.lock().unwrap().is_busy());
    // user turn + assistant turn
    assert_eq!(pipeline.sessions.current().entries().len(), 2);
    pipeline.shutdown().await;
}

// ── Scenario 2: plain prompt ─────────────────────────────────────────────────

#[tokio::test]
async fn plain_prompt_streams_then_completes() {
    let classifier = Classifier::new(ClassifierConfig::default());
    let classification = classifier.classify("hi", None).await;
    assert_eq!(classification.input_type, InputType::Prompt);
    assert!(classification.confidence >= 0.5);

    let (_, providers) = mock_providers(&["well hello"]);
    let pipeline = Pipeline::start(providers);
    let mut rx = pipeline.queue.subscribe();

    pipeline.send("hi");
    let messages = collect_request(&mut rx).await;

    let partial_text: String = messages
        .iter()
        .filter_map(|m| match &m.payload {
            Payload::PartialResult { text } => Some(text.clone()),
            _ => None,
        })
        .collect();
    assert!(!partial_text.is_empty(), "expected non-empty partial deltas");

    match &messages.last().unwrap().payload {
        Payload::FinalResult { success, content, .. } => {
            assert!(*success);
            assert_eq!(content, &partial_text);
        }
        other => panic!("expected FinalResult, got {other:?}"),
    }
    pipeline.shutdown().await;
}

// ── Scenario 3: file reference ───────────────────────────────────────────────

#[tokio::test]
async fn file_reference_embeds_content_in_context() {
    let workspace = tempfile::tempdir().unwrap();
    std::fs::write(
        workspace.path().join("README.md"),
        "# qi-prompt\nA pipeline demo readme.\n",
    )
    .unwrap();

    let (provider, registry) = mock_providers(&["summarized"]);
    let pipeline = Pipeline::start_in(registry, workspace);
    let mut rx = pipeline.queue.subscribe();

    pipeline.send("@README.md summarize this");
    let messages = collect_request(&mut rx).await;
    assert!(matches!(
        messages.last().unwrap().payload,
        Payload::FinalResult { success: true, .. }
    ));

    // The assembled context reached the provider with a labelled fragment.
    let seen = provider.last_request.lock().unwrap();
    let request = seen.as_ref().expect("provider was called");
    let system = &request.messages[0];
    assert!(system.content.contains("README.md"), "fragment label missing");
    assert!(
        system.content.contains("pipeline demo readme"),
        "file content not embedded"
    );
    pipeline.shutdown().await;
}

// ── Scenario 4: workflow ─────────────────────────────────────────────────────

#[tokio::test]
async fn read_then_write_workflow_executes_tools_in_order() {
    let workspace = tempfile::tempdir().unwrap();
    let src = workspace.path().join("src/a.ts");
    std::fs::create_dir_all(src.parent().unwrap()).unwrap();
    std::fs::write(&src, "export const x = 1;").unwrap();
    let dst = workspace.path().join("src/b.ts");

    let (_, providers) = mock_providers(&[]);
    let pipeline = Pipeline::start_in(providers, workspace);
    let mut rx = pipeline.queue.subscribe();

    pipeline.send(&format!(
        "read {} then write {} with the reversed content",
        src.display(),
        dst.display()
    ));
    let messages = collect_request(&mut rx).await;

    // Progress events arrive in topological order: read before write.
    let stages: Vec<String> = messages
        .iter()
        .filter_map(|m| match &m.payload {
            Payload::Progress { stage, detail } if detail.is_none() => Some(stage.clone()),
            _ => None,
        })
        .collect();
    let pos = |prefix: &str| stages.iter().position(|s| s.starts_with(prefix));
    assert!(pos("read-").is_some(), "stages: {stages:?}");
    assert!(pos("read-") < pos("process"), "stages: {stages:?}");
    assert!(pos("process") < pos("write-"), "stages: {stages:?}");

    match &messages.last().unwrap().payload {
        Payload::FinalResult { success, content, .. } => {
            assert!(*success, "workflow failed: {content}");
            assert!(
                content.contains(&dst.display().to_string()),
                "final result must contain the written path: {content}"
            );
        }
        other => panic!("expected FinalResult, got {other:?}"),
    }
    assert_eq!(
        std::fs::read_to_string(&dst).unwrap(),
        ";1 = x tsnoc tropxe"
    );
    pipeline.shutdown().await;
}

// ── Scenario 5: unknown command ──────────────────────────────────────────────

#[tokio::test]
async fn unknown_command_fails_without_an_error_message() {
    let classifier = Classifier::new(ClassifierConfig::default());
    let classification = classifier.classify("/unknown-command", None).await;
    assert_eq!(classification.input_type, InputType::Command);
    assert_eq!(classification.confidence, 1.0);

    let (_, providers) = mock_providers(&[]);
    let pipeline = Pipeline::start(providers);
    let mut rx = pipeline.queue.subscribe();

    pipeline.send("/unknown-command");
    let messages = collect_request(&mut rx).await;

    assert!(
        !messages.iter().any(|m| m.kind() == MessageKind::Error),
        "unknown command must not produce an Error message"
    );
    match &messages.last().unwrap().payload {
        Payload::FinalResult { success, content, .. } => {
            assert!(!*success);
            assert_eq!(content, "unknown command");
        }
        other => panic!("expected FinalResult, got {other:?}"),
    }
    pipeline.shutdown().await;
}

// ── Scenario 6: cancellation ─────────────────────────────────────────────────

/// A provider that streams deltas forever; only cancellation ends it.
struct EndlessProvider;

#[async_trait::async_trait]
impl qi_model::ModelProvider for EndlessProvider {
    fn name(&self) -> &str {
        "endless"
    }
    fn kind(&self) -> qi_model::ProviderKind {
        qi_model::ProviderKind::Local
    }
    fn model_name(&self) -> &str {
        "endless-model"
    }
    fn models(&self) -> &[String] {
        static MODELS: std::sync::OnceLock<Vec<String>> = std::sync::OnceLock::new();
        MODELS.get_or_init(|| vec!["endless-model".into()])
    }
    async fn complete(
        &self,
        _req: qi_model::CompletionRequest,
    ) -> Result<qi_model::ResponseStream, qi_model::ModelError> {
        let stream = futures::stream::unfold(0u64, |n| async move {
            tokio::time::sleep(Duration::from_millis(25)).await;
            Some((Ok(ResponseEvent::TextDelta(format!("delta{n} "))), n + 1))
        });
        Ok(Box::pin(stream))
    }
}

#[tokio::test]
async fn cancel_reaches_terminal_state_without_final_result() {
    let providers =
        Arc::new(ProviderRegistry::from_providers(vec![Arc::new(EndlessProvider)]).unwrap());
    let pipeline = Pipeline::start(providers);
    let mut rx = pipeline.queue.subscribe();

    pipeline.send("compose a very long essay about queues");
    tokio::time::sleep(Duration::from_millis(100)).await;
    pipeline
        .queue
        .enqueue(Payload::Cancel { target: None }, Priority::Critical)
        .unwrap();

    let messages = collect_request(&mut rx).await;
    assert!(
        !messages
            .iter()
            .any(|m| m.kind() == MessageKind::FinalResult),
        "cancelled request must not emit FinalResult"
    );
    match &messages.last().unwrap().payload {
        Payload::Error { category, code, .. } => {
            assert_eq!(category, "CANCELLED");
            assert_eq!(code, "CANCELLED");
        }
        other => panic!("expected CANCELLED terminal, got {other:?}"),
    }
    assert!(!pipeline.app_state.lock().unwrap().is_busy());
    pipeline.shutdown().await;
}

// ── Ordering invariants ──────────────────────────────────────────────────────

#[tokio::test]
async fn requests_are_serialized_without_interleaving() {
    let (_, providers) = mock_providers(&["reply one", "reply two", "reply three"]);
    let pipeline = Pipeline::start(providers);
    let mut rx = pipeline.queue.subscribe();

    pipeline.send("first question");
    pipeline.send("second question");
    pipeline.send("third question");

    let mut correlations = Vec::new();
    for _ in 0..3 {
        let messages = collect_request(&mut rx).await;
        let ids: Vec<_> = messages.iter().filter_map(|m| m.correlation_id).collect();
        assert!(
            ids.windows(2).all(|w| w[0] == w[1]),
            "messages from different requests interleaved"
        );
        correlations.push(ids[0]);
    }
    // Three distinct requests, handled strictly in order.
    assert_eq!(correlations.len(), 3);
    assert!(correlations.windows(2).all(|w| w[0] != w[1]));
    pipeline.shutdown().await;
}

#[tokio::test]
async fn status_request_round_trip() {
    let (_, providers) = mock_providers(&[]);
    let pipeline = Pipeline::start(providers);
    let mut rx = pipeline.queue.subscribe();

    pipeline
        .queue
        .enqueue(Payload::StatusRequest, Priority::Normal)
        .unwrap();
    let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    match &msg.payload {
        Payload::StatusResponse { report } => assert!(report.contains("ready.generic")),
        other => panic!("expected StatusResponse, got {other:?}"),
    }
    pipeline.shutdown().await;
}

#[tokio::test]
async fn session_snapshot_survives_pipeline_restart() {
    let workspace = tempfile::tempdir().unwrap();
    let snapshot_dir = workspace.path().join(".sessions");

    let (_, providers) = mock_providers(&["noted"]);
    let pipeline = Pipeline::start_in(providers, workspace);
    let mut rx = pipeline.queue.subscribe();
    pipeline.send("remember this exchange");
    collect_request(&mut rx).await;

    let before = pipeline.sessions.current();
    pipeline.sessions.persist(&before).unwrap();
    let _workspace = pipeline.shutdown().await;

    let store = StateStore::with_dir(&snapshot_dir).unwrap();
    let restored = store.restore_latest().unwrap().expect("snapshot present");
    assert_eq!(restored.id, before.id);
    assert_eq!(restored.entries().len(), before.entries().len());
    assert_eq!(restored.entries()[0].content, "remember this exchange");
}
