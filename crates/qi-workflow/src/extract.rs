// Copyright (c) 2026 The qi-prompt Authors
//
// SPDX-License-Identifier: Apache-2.0
//! Spec extraction: natural language → [`WorkflowSpec`].
//!
//! The model path binds the output to the spec's JSON schema and validates
//! post-hoc — malformed output is rejected and retried once with a tighter
//! prompt, never papered over.  The rule-based skeleton is the fallback and
//! needs no model at all.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use qi_classifier::WorkflowHint;
use qi_model::{CompletionOptions, ProviderRegistry};

use crate::{NodeKind, WorkflowEdge, WorkflowNode, WorkflowSpec};

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("workflow extraction failed: {0}")]
    Failed(String),
}

impl ExtractError {
    pub fn code(&self) -> &'static str {
        "EXTRACTION_FAILED"
    }
}

/// A successful extraction: the spec plus the pattern that produced it.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub spec: WorkflowSpec,
    /// "llm" or "skeleton".
    pub pattern: String,
}

const EXTRACT_PROMPT: &str = r#"Convert the task below into a workflow graph.
Respond with only a JSON object of this exact shape:
{
  "name": "<short-name>",
  "nodes": [
    {"id": "<unique>", "kind": "input|processing|tool|reasoning|output|decision|validation",
     "params": {}, "required_tools": [], "depends_on": []}
  ],
  "edges": [{"from": "<id>", "to": "<id>"}]
}
Rules: exactly one "input" node; at least one "output" node; no cycles;
no nested workflows — flatten multi-stage tasks into a single graph.
Tool nodes name their tool in params.tool ("read_file", "write_file",
"list_dir", "shell") with arguments in params.args.

Task:
"#;

pub struct Extractor {
    models: Option<Arc<ProviderRegistry>>,
    retries: u32,
    deadline: Duration,
}

impl Extractor {
    pub fn new(models: Option<Arc<ProviderRegistry>>, retries: u32) -> Self {
        Self {
            models,
            retries,
            deadline: Duration::from_secs(10),
        }
    }

    /// Extract a validated spec from `text`.
    ///
    /// Fails only when neither path can produce one: the model path failed
    /// (or is absent) and the rule skeleton has no indicators to build from.
    /// The caller falls back to prompt handling on failure.
    pub async fn extract(
        &self,
        text: &str,
        hint: &WorkflowHint,
    ) -> Result<Extraction, ExtractError> {
        if let Some(models) = &self.models {
            let mut feedback: Option<String> = None;
            for attempt in 0..=self.retries {
                match self.extract_llm(models, text, feedback.as_deref()).await {
                    Ok(spec) => {
                        debug!(attempt, "llm extraction produced a valid spec");
                        return Ok(Extraction {
                            spec,
                            pattern: "llm".into(),
                        });
                    }
                    Err(e) => {
                        warn!(attempt, error = %e, "llm extraction rejected");
                        feedback = Some(e);
                    }
                }
            }
        }

        if hint.verbs.is_empty() && hint.paths.is_empty() {
            return Err(ExtractError::Failed(
                "no workflow indicators and no usable model output".into(),
            ));
        }
        Ok(Extraction {
            spec: rule_skeleton(text, hint),
            pattern: "skeleton".into(),
        })
    }

    async fn extract_llm(
        &self,
        models: &Arc<ProviderRegistry>,
        text: &str,
        feedback: Option<&str>,
    ) -> Result<WorkflowSpec, String> {
        let mut prompt = format!("{EXTRACT_PROMPT}{text}");
        if let Some(fb) = feedback {
            // Tighter retry prompt: name the previous failure explicitly.
            prompt.push_str(&format!(
                "\n\nYour previous attempt was rejected: {fb}\nReturn corrected JSON only."
            ));
        }
        let reply = tokio::time::timeout(
            self.deadline,
            models.complete(&prompt, CompletionOptions::default()),
        )
        .await
        .map_err(|_| "model deadline expired".to_string())?
        .map_err(|e| e.to_string())?;

        parse_spec(&reply)
    }
}

/// Parse and validate model output.  Unknown node kinds (including any
/// nested-workflow construct) fail serde and land here as rejections.
fn parse_spec(reply: &str) -> Result<WorkflowSpec, String> {
    let start = reply.find('{').ok_or("no JSON object in output")?;
    let end = reply.rfind('}').ok_or("no JSON object in output")?;
    if end <= start {
        return Err("no JSON object in output".into());
    }
    let spec: WorkflowSpec = serde_json::from_str(&reply[start..=end])
        .map_err(|e| format!("schema mismatch: {e}"))?;
    spec.validate().map_err(|e| e.to_string())?;
    Ok(spec)
}

/// Verbs whose effect is producing content for later steps.
fn is_read_verb(verb: &str) -> bool {
    matches!(verb, "read" | "list" | "search" | "fetch")
}

/// Verbs whose effect is materializing content somewhere.
fn is_write_verb(verb: &str) -> bool {
    matches!(verb, "write" | "create")
}

/// The rule-based fallback skeleton: input → read tools → processing →
/// write tools → output, degenerating to input → processing → output when
/// no tool verbs were detected.
pub fn rule_skeleton(text: &str, hint: &WorkflowHint) -> WorkflowSpec {
    let mut nodes = vec![WorkflowNode::new("input", NodeKind::Input)];
    let mut edges: Vec<WorkflowEdge> = Vec::new();
    let mut read_ids: Vec<String> = Vec::new();
    let mut write_ids: Vec<String> = Vec::new();

    let mut path_iter = hint.paths.iter();
    for (i, verb) in hint.verbs.iter().enumerate() {
        let path = path_iter.next().cloned();
        if is_read_verb(verb) {
            let id = format!("read-{i}");
            let (tool, args) = match (verb.as_str(), &path) {
                ("list", Some(p)) => ("list_dir", serde_json::json!({ "path": p })),
                (_, Some(p)) => ("read_file", serde_json::json!({ "path": p })),
                (_, None) => continue,
            };
            let mut node = WorkflowNode::new(&id, NodeKind::Tool)
                .with_param("tool", tool)
                .with_param("args", args);
            node.required_tools = vec![tool.to_string()];
            nodes.push(node);
            read_ids.push(id);
        } else if is_write_verb(verb) {
            let Some(p) = path else { continue };
            let id = format!("write-{i}");
            let mut node = WorkflowNode::new(&id, NodeKind::Tool)
                .with_param("tool", "write_file")
                .with_param("args", serde_json::json!({ "path": p, "text": "$derived" }));
            node.required_tools = vec!["write_file".to_string()];
            nodes.push(node);
            write_ids.push(id);
        }
    }

    let operation = detect_operation(text);
    nodes.push(
        WorkflowNode::new("process", NodeKind::Processing).with_param("operation", operation),
    );
    nodes.push(WorkflowNode::new("output", NodeKind::Output));

    if read_ids.is_empty() {
        edges.push(edge("input", "process"));
    } else {
        for id in &read_ids {
            edges.push(edge("input", id));
            edges.push(edge(id, "process"));
        }
    }
    if write_ids.is_empty() {
        edges.push(edge("process", "output"));
    } else {
        for id in &write_ids {
            edges.push(edge("process", id));
            edges.push(edge(id, "output"));
        }
    }

    let spec = WorkflowSpec {
        name: "skeleton".into(),
        nodes,
        edges,
    };
    debug_assert!(spec.validate().is_ok(), "skeleton must always validate");
    spec
}

fn edge(from: &str, to: &str) -> WorkflowEdge {
    WorkflowEdge {
        from: from.into(),
        to: to.into(),
        condition: None,
    }
}

/// Pick the processing operation from wording cues.
fn detect_operation(text: &str) -> &'static str {
    let lower = text.to_lowercase();
    if lower.contains("revers") {
        "reverse"
    } else if lower.contains("upper") {
        "uppercase"
    } else if lower.contains("lower") {
        "lowercase"
    } else if lower.contains("sort") {
        "sort-lines"
    } else {
        "identity"
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn hint(verbs: &[&str], paths: &[&str]) -> WorkflowHint {
        WorkflowHint {
            verbs: verbs.iter().map(|s| s.to_string()).collect(),
            paths: paths.iter().map(|s| s.to_string()).collect(),
            score: 0.9,
        }
    }

    #[test]
    fn skeleton_read_then_write_has_both_tool_nodes() {
        let spec = rule_skeleton(
            "read src/a.ts then write src/b.ts with the reversed content",
            &hint(&["read", "write"], &["src/a.ts", "src/b.ts"]),
        );
        assert!(spec.validate().is_ok());
        let tools: Vec<&WorkflowNode> = spec
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKind::Tool)
            .collect();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].str_param("tool"), Some("read_file"));
        assert_eq!(tools[1].str_param("tool"), Some("write_file"));
        // Reversal detected from the wording.
        let process = spec.node("process").unwrap();
        assert_eq!(process.str_param("operation"), Some("reverse"));
    }

    #[test]
    fn skeleton_orders_read_before_process_before_write() {
        let spec = rule_skeleton(
            "read a.txt then write b.txt",
            &hint(&["read", "write"], &["a.txt", "b.txt"]),
        );
        let order = spec.topo_order().unwrap();
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        assert!(pos("read-0") < pos("process"));
        assert!(pos("process") < pos("write-1"));
        assert!(pos("write-1") < pos("output"));
    }

    #[test]
    fn skeleton_without_verbs_is_minimal_chain() {
        let spec = rule_skeleton("do the thing", &hint(&[], &[]));
        assert!(spec.validate().is_ok());
        assert_eq!(spec.nodes.len(), 3); // input, process, output
    }

    #[test]
    fn skeleton_write_without_path_is_skipped() {
        let spec = rule_skeleton("write something", &hint(&["write"], &[]));
        assert!(spec.validate().is_ok());
        assert!(!spec.nodes.iter().any(|n| n.kind == NodeKind::Tool));
    }

    #[test]
    fn parse_spec_accepts_valid_json_with_prose() {
        let reply = r#"Here you go:
{"name":"t","nodes":[
  {"id":"in","kind":"input"},
  {"id":"out","kind":"output"}],
 "edges":[{"from":"in","to":"out"}]}"#;
        let spec = parse_spec(reply).unwrap();
        assert_eq!(spec.nodes.len(), 2);
    }

    #[test]
    fn parse_spec_rejects_unknown_node_kind() {
        // A nested-workflow construct appears as an unknown kind and is
        // rejected rather than flattened silently.
        let reply = r#"{"name":"t","nodes":[{"id":"in","kind":"workflow"}],"edges":[]}"#;
        assert!(parse_spec(reply).unwrap_err().contains("schema mismatch"));
    }

    #[test]
    fn parse_spec_rejects_structurally_invalid_graphs() {
        let reply = r#"{"name":"t","nodes":[
  {"id":"in","kind":"input"},
  {"id":"out","kind":"output"}],
 "edges":[{"from":"in","to":"ghost"}]}"#;
        assert!(parse_spec(reply).unwrap_err().contains("missing node"));
    }

    #[tokio::test]
    async fn extract_without_models_uses_skeleton() {
        let ex = Extractor::new(None, 1);
        let result = ex
            .extract("read a.txt then write b.txt", &hint(&["read", "write"], &["a.txt", "b.txt"]))
            .await
            .unwrap();
        assert_eq!(result.pattern, "skeleton");
        assert!(result.spec.validate().is_ok());
    }

    #[tokio::test]
    async fn extract_without_models_or_indicators_fails() {
        let ex = Extractor::new(None, 1);
        let err = ex.extract("hello", &hint(&[], &[])).await.unwrap_err();
        assert_eq!(err.code(), "EXTRACTION_FAILED");
    }

    #[tokio::test]
    async fn extract_falls_back_when_model_output_is_garbage() {
        use qi_model::{ProviderRegistry, ScriptedMockProvider};
        let p = std::sync::Arc::new(
            ScriptedMockProvider::new("m")
                .then_text("not json at all")
                .then_text("still not json"),
        );
        let models =
            std::sync::Arc::new(ProviderRegistry::from_providers(vec![p.clone()]).unwrap());
        let ex = Extractor::new(Some(models), 1);
        let result = ex
            .extract("read a.txt", &hint(&["read"], &["a.txt"]))
            .await
            .unwrap();
        assert_eq!(result.pattern, "skeleton");
        // First attempt plus exactly one tighter-prompt retry.
        assert_eq!(p.call_count(), 2);
    }

    #[tokio::test]
    async fn extract_uses_valid_model_output() {
        use qi_model::{ProviderRegistry, ScriptedMockProvider};
        let json = r#"{"name":"m","nodes":[
  {"id":"in","kind":"input"},
  {"id":"out","kind":"output"}],
 "edges":[{"from":"in","to":"out"}]}"#;
        let p = std::sync::Arc::new(ScriptedMockProvider::new("m").then_text(json));
        let models = std::sync::Arc::new(ProviderRegistry::from_providers(vec![p]).unwrap());
        let ex = Extractor::new(Some(models), 1);
        let result = ex.extract("task", &hint(&[], &[])).await.unwrap();
        assert_eq!(result.pattern, "llm");
        assert_eq!(result.spec.name, "m");
    }
}
