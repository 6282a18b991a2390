// Copyright (c) 2026 The qi-prompt Authors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use lru::LruCache;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use qi_context::{assemble_context, RetrievalHit};
use qi_model::{CompletionOptions, ProviderRegistry};
use qi_tools::{ToolProvider, ToolRequest};

use crate::{
    NodeKind, SpecError, StateSnapshot, ToolResultEntry, WorkflowEdge, WorkflowNode, WorkflowSpec,
    WorkflowState,
};

/// Token budget for the context assembled ahead of a reasoning node.
const REASONING_BUDGET_TOKENS: usize = 2_000;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Cap on concurrent tool invocations within one workflow.
    pub max_concurrent_tools: usize,
    pub node_timeout: Duration,
    pub plan_cache_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tools: 10,
            node_timeout: Duration::from_secs(30),
            plan_cache_size: 32,
        }
    }
}

impl From<&qi_config::WorkflowConfig> for EngineConfig {
    fn from(cfg: &qi_config::WorkflowConfig) -> Self {
        Self {
            max_concurrent_tools: cfg.max_concurrent_tools.max(1),
            node_timeout: Duration::from_millis(cfg.node_timeout_ms),
            plan_cache_size: cfg.plan_cache_size.max(1),
        }
    }
}

/// Terminal state of one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowStatus {
    Completed,
    Cancelled,
    Failed { code: String, message: String },
}

/// Streamed execution events: one per node entry, one per node completion,
/// plus the final marker.  Snapshots expose only the reducers' outputs.
#[derive(Debug)]
pub enum ExecEvent {
    Node {
        node_id: String,
        snapshot: StateSnapshot,
        is_complete: bool,
    },
    Finished {
        status: WorkflowStatus,
        state: Box<WorkflowState>,
    },
}

/// A validated spec compiled for execution.  Cached per structural hash.
struct CompiledPlan {
    levels: Vec<Vec<String>>,
    nodes: HashMap<String, WorkflowNode>,
    incoming: HashMap<String, Vec<WorkflowEdge>>,
    outgoing: HashMap<String, Vec<WorkflowEdge>>,
}

pub struct WorkflowEngine {
    tools: Arc<dyn ToolProvider>,
    models: Option<Arc<ProviderRegistry>>,
    config: EngineConfig,
    plans: Mutex<LruCache<String, Arc<CompiledPlan>>>,
}

impl WorkflowEngine {
    pub fn new(
        tools: Arc<dyn ToolProvider>,
        models: Option<Arc<ProviderRegistry>>,
        config: EngineConfig,
    ) -> Self {
        let cache_size = NonZeroUsize::new(config.plan_cache_size.max(1)).expect("nonzero");
        Self {
            tools,
            models,
            config,
            plans: Mutex::new(LruCache::new(cache_size)),
        }
    }

    fn compile(&self, spec: &WorkflowSpec) -> Result<Arc<CompiledPlan>, SpecError> {
        let hash = spec.structural_hash();
        if let Some(plan) = self.plans.lock().expect("plan cache lock").get(&hash) {
            debug!(hash = %&hash[..12], "compiled plan cache hit");
            return Ok(plan.clone());
        }
        spec.validate()?;
        let levels = spec.topo_levels()?;
        let nodes: HashMap<String, WorkflowNode> = spec
            .nodes
            .iter()
            .map(|n| (n.id.clone(), n.clone()))
            .collect();
        let mut incoming: HashMap<String, Vec<WorkflowEdge>> = HashMap::new();
        let mut outgoing: HashMap<String, Vec<WorkflowEdge>> = HashMap::new();
        for e in spec.effective_edges() {
            incoming.entry(e.to.clone()).or_default().push(e.clone());
            outgoing.entry(e.from.clone()).or_default().push(e);
        }
        let plan = Arc::new(CompiledPlan {
            levels,
            nodes,
            incoming,
            outgoing,
        });
        self.plans
            .lock()
            .expect("plan cache lock")
            .put(hash, plan.clone());
        Ok(plan)
    }

    /// Start executing `spec`.  Returns the lazy event stream; the driver
    /// task ends when the stream reports a terminal status or every
    /// receiver is gone.
    pub fn execute(
        &self,
        spec: &WorkflowSpec,
        input: &str,
        pattern: &str,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<ExecEvent>, SpecError> {
        let plan = self.compile(spec)?;
        let (tx, rx) = mpsc::channel(256);
        let driver = Driver {
            plan,
            tools: self.tools.clone(),
            models: self.models.clone(),
            config: self.config.clone(),
            tool_permits: Arc::new(Semaphore::new(self.config.max_concurrent_tools)),
            cancel,
            tx,
        };
        let state = WorkflowState::new(input, pattern);
        tokio::spawn(driver.run(state));
        Ok(rx)
    }
}

// ── Driver ───────────────────────────────────────────────────────────────────

struct Driver {
    plan: Arc<CompiledPlan>,
    tools: Arc<dyn ToolProvider>,
    models: Option<Arc<ProviderRegistry>>,
    config: EngineConfig,
    tool_permits: Arc<Semaphore>,
    cancel: CancellationToken,
    tx: mpsc::Sender<ExecEvent>,
}

/// Effects a node produces; applied to state by the driver only, so state
/// writes are serialized even when node bodies run in parallel.
#[derive(Debug, Default)]
struct NodeEffect {
    tool_results: Vec<ToolResultEntry>,
    derived: Option<String>,
    reasoning: Option<String>,
    output: Option<String>,
    decision: Option<bool>,
}

#[derive(Debug)]
struct NodeFailure {
    code: &'static str,
    message: String,
    /// Error tool results to append even on failure (partials preserved).
    tool_results: Vec<ToolResultEntry>,
}

/// Cheap read-only view of state handed to node bodies.  Parallel siblings
/// all see the same pre-level view.
#[derive(Debug, Clone)]
struct StateView {
    input: String,
    derived: Option<String>,
    reasoning: Option<String>,
    last_tool: Option<String>,
    tool_texts: Vec<String>,
    tool_errors: usize,
}

impl StateView {
    fn of(state: &WorkflowState) -> Self {
        Self {
            input: state.input.clone(),
            derived: state.derived.clone(),
            reasoning: state.reasoning_output.clone(),
            last_tool: state.last_tool_content().map(str::to_string),
            tool_texts: state
                .tool_results()
                .iter()
                .filter(|r| !r.is_error)
                .map(|r| r.content.clone())
                .collect(),
            tool_errors: state.tool_error_count(),
        }
    }

    /// The text processing and output nodes operate on: the scratch register
    /// when set, else the accumulated tool output, else the raw input.
    fn working_text(&self) -> String {
        if let Some(d) = &self.derived {
            return d.clone();
        }
        if !self.tool_texts.is_empty() {
            return self.tool_texts.join("\n");
        }
        self.input.clone()
    }
}

impl Driver {
    async fn run(self, mut state: WorkflowState) {
        let mut skipped: HashSet<String> = HashSet::new();
        let mut dead_edges: HashSet<(String, String)> = HashSet::new();

        for level in self.plan.levels.clone() {
            if self.cancel.is_cancelled() {
                self.finish(WorkflowStatus::Cancelled, state).await;
                return;
            }

            // Resolve skips for this level first: a node whose live incoming
            // edges are all gone (dead branch or skipped parent) is skipped,
            // and the skip propagates through its outgoing edges.
            let mut parallel: Vec<WorkflowNode> = Vec::new();
            let mut sequential: Vec<WorkflowNode> = Vec::new();
            for id in &level {
                let node = self.plan.nodes[id].clone();
                if self.is_skipped(id, &skipped, &dead_edges) {
                    skipped.insert(id.clone());
                    state.bump_counter("nodes_skipped");
                    continue;
                }
                match node.kind {
                    NodeKind::Tool | NodeKind::Processing => parallel.push(node),
                    _ => sequential.push(node),
                }
            }

            // Sibling tool/processing nodes fan out concurrently, bounded by
            // the tool semaphore; everything else runs in declaration order.
            if parallel.len() == 1 {
                sequential.insert(0, parallel.pop().expect("len checked"));
            }

            if !parallel.is_empty() {
                let view = StateView::of(&state);
                let mut running = FuturesUnordered::new();
                for node in parallel {
                    if !self.emit_entry(&node.id, &state).await {
                        return;
                    }
                    let fut = self.run_node(node.clone(), view.clone());
                    running.push(async move {
                        let outcome = fut.await;
                        (node, outcome)
                    });
                }
                while let Some((node, outcome)) = running.next().await {
                    if self.cancel.is_cancelled() {
                        self.finish(WorkflowStatus::Cancelled, state).await;
                        return;
                    }
                    match self.settle(&node, outcome, &mut state).await {
                        Settled::Continue => {}
                        Settled::Abort(status) => {
                            drop(running);
                            self.finish(status, state).await;
                            return;
                        }
                        Settled::ChannelGone => return,
                    }
                }
            }

            for node in sequential {
                if self.cancel.is_cancelled() {
                    self.finish(WorkflowStatus::Cancelled, state).await;
                    return;
                }
                if !self.emit_entry(&node.id, &state).await {
                    return;
                }
                let view = StateView::of(&state);
                let outcome = self.run_node(node.clone(), view).await;
                if let Some(decided) = outcome.as_ref().ok().and_then(|e| e.decision) {
                    self.prune_branches(&node.id, decided, &mut dead_edges);
                }
                match self.settle(&node, outcome, &mut state).await {
                    Settled::Continue => {}
                    Settled::Abort(status) => {
                        self.finish(status, state).await;
                        return;
                    }
                    Settled::ChannelGone => return,
                }
            }
        }

        if state.output.is_none() {
            self.finish(
                WorkflowStatus::Failed {
                    code: "VALIDATION_FAILED".into(),
                    message: "no output node was reached".into(),
                },
                state,
            )
            .await;
            return;
        }
        self.finish(WorkflowStatus::Completed, state).await;
    }

    fn is_skipped(
        &self,
        id: &str,
        skipped: &HashSet<String>,
        dead_edges: &HashSet<(String, String)>,
    ) -> bool {
        let Some(incoming) = self.plan.incoming.get(id) else {
            return false;
        };
        if incoming.is_empty() {
            return false;
        }
        incoming.iter().all(|e| {
            skipped.contains(&e.from) || dead_edges.contains(&(e.from.clone(), e.to.clone()))
        })
    }

    /// Kill the outgoing branch edges whose condition label does not match
    /// the decision outcome.
    fn prune_branches(
        &self,
        decision_id: &str,
        decided: bool,
        dead_edges: &mut HashSet<(String, String)>,
    ) {
        let label = if decided { "true" } else { "false" };
        if let Some(out) = self.plan.outgoing.get(decision_id) {
            for e in out {
                if let Some(cond) = &e.condition {
                    if cond != label {
                        dead_edges.insert((e.from.clone(), e.to.clone()));
                    }
                }
            }
        }
    }

    async fn emit_entry(&self, node_id: &str, state: &WorkflowState) -> bool {
        self.tx
            .send(ExecEvent::Node {
                node_id: node_id.to_string(),
                snapshot: state.snapshot(),
                is_complete: false,
            })
            .await
            .is_ok()
    }

    async fn finish(&self, status: WorkflowStatus, mut state: WorkflowState) {
        let stage = match &status {
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Cancelled => "cancelled",
            WorkflowStatus::Failed { .. } => "failed",
        };
        state.advance_stage(stage);
        let _ = self
            .tx
            .send(ExecEvent::Finished {
                status,
                state: Box::new(state),
            })
            .await;
    }

    /// Apply a node outcome to state and emit its completion event.
    async fn settle(
        &self,
        node: &WorkflowNode,
        outcome: Result<NodeEffect, NodeFailure>,
        state: &mut WorkflowState,
    ) -> Settled {
        match outcome {
            Ok(effect) => {
                for r in effect.tool_results {
                    state.append_tool_result(r);
                }
                if let Some(d) = effect.derived {
                    state.derived = Some(d);
                }
                if let Some(r) = effect.reasoning {
                    state.reasoning_output = Some(r);
                }
                if let Some(o) = effect.output {
                    state.output = Some(o);
                }
                state.advance_stage(&node.id);
                state.bump_counter("nodes_completed");
                let sent = self
                    .tx
                    .send(ExecEvent::Node {
                        node_id: node.id.clone(),
                        snapshot: state.snapshot(),
                        is_complete: true,
                    })
                    .await
                    .is_ok();
                if sent {
                    Settled::Continue
                } else {
                    Settled::ChannelGone
                }
            }
            Err(failure) => {
                for r in failure.tool_results {
                    state.append_tool_result(r);
                }
                if node.best_effort {
                    warn!(node = %node.id, code = failure.code, "best-effort node failed, continuing");
                    state.bump_counter("best_effort_failures");
                    state.advance_stage(&node.id);
                    let sent = self
                        .tx
                        .send(ExecEvent::Node {
                            node_id: node.id.clone(),
                            snapshot: state.snapshot(),
                            is_complete: true,
                        })
                        .await
                        .is_ok();
                    if sent {
                        Settled::Continue
                    } else {
                        Settled::ChannelGone
                    }
                } else {
                    Settled::Abort(WorkflowStatus::Failed {
                        code: failure.code.into(),
                        message: failure.message,
                    })
                }
            }
        }
    }

    /// Run one node body, including per-node retries, the timeout race, and
    /// the cancellation race.
    async fn run_node(
        &self,
        node: WorkflowNode,
        view: StateView,
    ) -> Result<NodeEffect, NodeFailure> {
        let mut attempt = 0u32;
        // Error results from failed attempts still append to the tool-result
        // list; the reducer is append-only even across retries.
        let mut prior_errors: Vec<ToolResultEntry> = Vec::new();
        loop {
            let run = self.run_node_once(&node, &view);
            let result = tokio::select! {
                _ = self.cancel.cancelled() => Err(NodeFailure {
                    code: "CANCELLED",
                    message: "cancelled".into(),
                    tool_results: Vec::new(),
                }),
                res = tokio::time::timeout(self.config.node_timeout, run) => match res {
                    Ok(inner) => inner,
                    Err(_) => Err(NodeFailure {
                        code: "NODE_TIMEOUT",
                        message: format!("node '{}' exceeded its deadline", node.id),
                        tool_results: Vec::new(),
                    }),
                },
            };
            match result {
                Ok(mut effect) => {
                    if !prior_errors.is_empty() {
                        prior_errors.append(&mut effect.tool_results);
                        effect.tool_results = prior_errors;
                    }
                    return Ok(effect);
                }
                Err(mut failure) => {
                    if attempt < node.retries && failure.code != "CANCELLED" {
                        attempt += 1;
                        prior_errors.append(&mut failure.tool_results);
                        debug!(node = %node.id, attempt, "retrying node");
                        continue;
                    }
                    let mut all = prior_errors;
                    all.append(&mut failure.tool_results);
                    failure.tool_results = all;
                    return Err(failure);
                }
            }
        }
    }

    async fn run_node_once(
        &self,
        node: &WorkflowNode,
        view: &StateView,
    ) -> Result<NodeEffect, NodeFailure> {
        match node.kind {
            NodeKind::Input => Ok(NodeEffect::default()),

            NodeKind::Processing => {
                let op = node.str_param("operation").unwrap_or("identity");
                let text = view.working_text();
                let result = match op {
                    "reverse" => text.chars().rev().collect(),
                    "uppercase" => text.to_uppercase(),
                    "lowercase" => text.to_lowercase(),
                    "sort-lines" => {
                        let mut lines: Vec<&str> = text.lines().collect();
                        lines.sort_unstable();
                        let mut s = lines.join("\n");
                        s.push('\n');
                        s
                    }
                    _ => text,
                };
                Ok(NodeEffect {
                    derived: Some(result),
                    ..Default::default()
                })
            }

            NodeKind::Tool => self.run_tool_node(node, view).await,

            NodeKind::Reasoning => {
                let Some(models) = &self.models else {
                    return Err(NodeFailure {
                        code: "REASONING_FAILED",
                        message: "no model provider available".into(),
                        tool_results: Vec::new(),
                    });
                };
                let hits: Vec<RetrievalHit> = view
                    .tool_texts
                    .iter()
                    .enumerate()
                    .map(|(i, t)| RetrievalHit {
                        source: format!("tool-result-{i}"),
                        text: t.clone(),
                        relevance: 0.9,
                    })
                    .collect();
                let context = assemble_context(&view.input, &[], &hits, REASONING_BUDGET_TOKENS);
                let prompt = if context.is_empty() {
                    view.input.clone()
                } else {
                    format!("{}\n{}", context.render(), view.input)
                };
                match models.complete(&prompt, CompletionOptions::default()).await {
                    Ok(text) => Ok(NodeEffect {
                        reasoning: Some(text),
                        ..Default::default()
                    }),
                    Err(e) => Err(NodeFailure {
                        code: "REASONING_FAILED",
                        message: e.to_string(),
                        tool_results: Vec::new(),
                    }),
                }
            }

            NodeKind::Decision => {
                let expr = node.str_param("condition").unwrap_or("has_results");
                Ok(NodeEffect {
                    decision: Some(eval_condition(view, expr)),
                    ..Default::default()
                })
            }

            NodeKind::Validation => {
                let expr = node.str_param("assert").unwrap_or("no_tool_errors");
                if eval_condition(view, expr) {
                    Ok(NodeEffect::default())
                } else {
                    Err(NodeFailure {
                        code: "VALIDATION_FAILED",
                        message: format!("assertion '{expr}' failed at node '{}'", node.id),
                        tool_results: Vec::new(),
                    })
                }
            }

            NodeKind::Output => Ok(NodeEffect {
                output: Some(view.working_text()),
                ..Default::default()
            }),
        }
    }

    async fn run_tool_node(
        &self,
        node: &WorkflowNode,
        view: &StateView,
    ) -> Result<NodeEffect, NodeFailure> {
        let tool = node
            .str_param("tool")
            .map(str::to_string)
            .or_else(|| node.required_tools.first().cloned())
            .ok_or_else(|| NodeFailure {
                code: "TOOL_ERROR",
                message: format!("tool node '{}' names no tool", node.id),
                tool_results: Vec::new(),
            })?;
        let args = node
            .params
            .get("args")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));
        let args = substitute_refs(args, view);

        // The fan-out bound: parallel tool nodes queue on this semaphore.
        let _permit = self
            .tool_permits
            .acquire()
            .await
            .expect("semaphore never closed");

        let request = ToolRequest {
            id: uuid::Uuid::new_v4().to_string(),
            name: tool.clone(),
            args,
        };
        match self.tools.execute_tool(request).await {
            Ok(result) => {
                let entry = ToolResultEntry {
                    node_id: node.id.clone(),
                    tool: result.tool.clone(),
                    content: result.content.clone(),
                    is_error: result.is_error,
                    at: Utc::now(),
                };
                if result.is_error {
                    Err(NodeFailure {
                        code: "TOOL_ERROR",
                        message: result.content,
                        tool_results: vec![entry],
                    })
                } else {
                    Ok(NodeEffect {
                        tool_results: vec![entry],
                        ..Default::default()
                    })
                }
            }
            Err(e) => Err(NodeFailure {
                code: "TOOL_ERROR",
                message: e.to_string(),
                tool_results: vec![ToolResultEntry {
                    node_id: node.id.clone(),
                    tool,
                    content: e.to_string(),
                    is_error: true,
                    at: Utc::now(),
                }],
            }),
        }
    }
}

enum Settled {
    Continue,
    Abort(WorkflowStatus),
    ChannelGone,
}

/// Replace `$input`, `$derived`, `$last_result`, `$reasoning` string values
/// in tool arguments with the corresponding state values.
fn substitute_refs(args: serde_json::Value, view: &StateView) -> serde_json::Value {
    match args {
        serde_json::Value::String(s) => {
            let replaced = match s.as_str() {
                "$input" => view.input.clone(),
                "$derived" => view.derived.clone().unwrap_or_default(),
                "$last_result" => view.last_tool.clone().unwrap_or_default(),
                "$reasoning" => view.reasoning.clone().unwrap_or_default(),
                _ => s,
            };
            serde_json::Value::String(replaced)
        }
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, substitute_refs(v, view)))
                .collect(),
        ),
        serde_json::Value::Array(items) => serde_json::Value::Array(
            items.into_iter().map(|v| substitute_refs(v, view)).collect(),
        ),
        other => other,
    }
}

/// Evaluate a simple condition over state: either a named predicate or a
/// `<field> <op> <number>` comparison.
fn eval_condition(view: &StateView, expr: &str) -> bool {
    let parts: Vec<&str> = expr.split_whitespace().collect();
    match parts.as_slice() {
        ["has_results"] => !view.tool_texts.is_empty(),
        ["no_tool_errors"] => view.tool_errors == 0,
        ["has_derived"] => view.derived.as_deref().is_some_and(|d| !d.is_empty()),
        ["has_reasoning"] => view.reasoning.is_some(),
        ["output_nonempty"] => !view.working_text().trim().is_empty(),
        [field, op, value] => {
            let lhs = match *field {
                "tool_results" => view.tool_texts.len(),
                "tool_errors" => view.tool_errors,
                _ => return false,
            };
            let Ok(rhs) = value.parse::<usize>() else {
                return false;
            };
            match *op {
                "==" => lhs == rhs,
                "!=" => lhs != rhs,
                ">" => lhs > rhs,
                ">=" => lhs >= rhs,
                "<" => lhs < rhs,
                "<=" => lhs <= rhs,
                _ => false,
            }
        }
        _ => false,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
