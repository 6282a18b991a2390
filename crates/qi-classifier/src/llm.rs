// Copyright (c) 2026 The qi-prompt Authors
//
// SPDX-License-Identifier: MIT
//! Model-backed classification.  Strictly deadline-bounded: a slow or
//! unreachable provider degrades to the rule-based result, never to a hang.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use qi_model::{CompletionOptions, ProviderRegistry};

use crate::{ClassificationResult, Extracted, InputType, Method};

const CLASSIFY_PROMPT: &str = "Classify the user input below as exactly one of: \
\"command\", \"prompt\", or \"workflow\".\n\
A workflow is a multi-step task that needs tools (reading/writing files, running \
commands); a prompt is a question or request answerable with text alone.\n\
Respond with only a JSON object: {\"type\": \"...\", \"confidence\": 0.0-1.0}\n\n\
Input:\n";

#[derive(Debug, Deserialize)]
struct LlmVerdict {
    #[serde(rename = "type")]
    input_type: String,
    confidence: f64,
}

/// Ask the model to classify.  Returns `None` on deadline expiry, transport
/// failure, or unparseable output — the caller falls back to rule-based.
pub(crate) async fn classify(
    models: &Arc<ProviderRegistry>,
    text: &str,
    deadline: Duration,
    rule: &ClassificationResult,
) -> Option<ClassificationResult> {
    let prompt = format!("{CLASSIFY_PROMPT}{text}");
    let fut = models.complete(&prompt, CompletionOptions::default());
    let reply = match tokio::time::timeout(deadline, fut).await {
        Ok(Ok(reply)) => reply,
        Ok(Err(e)) => {
            debug!(error = %e, "llm classification failed");
            return None;
        }
        Err(_) => return None,
    };

    let verdict = parse_verdict(&reply)?;
    let input_type = match verdict.input_type.as_str() {
        "workflow" => InputType::Workflow,
        "prompt" => InputType::Prompt,
        // Commands are detected by prefix before any model is consulted; a
        // "command" verdict here has nothing to extract, so discard it.
        _ => return None,
    };

    // The model gives a type and a confidence; extraction data still comes
    // from the rule pass (verbs, paths, normalized text).
    let extracted = match input_type {
        InputType::Workflow => match &rule.extracted {
            Extracted::Workflow { hint } => Extracted::Workflow { hint: hint.clone() },
            _ => Extracted::Workflow {
                hint: Default::default(),
            },
        },
        _ => Extracted::Prompt {
            text: text.trim().to_string(),
        },
    };

    Some(ClassificationResult {
        input_type,
        confidence: verdict.confidence.clamp(0.0, 1.0),
        method: Method::LlmDirect,
        extracted,
        reasoning: Some("model verdict".into()),
    })
}

/// Pull the first JSON object out of the reply.  Models wrap JSON in prose
/// and code fences often enough that strict parsing alone is not viable.
fn parse_verdict(reply: &str) -> Option<LlmVerdict> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&reply[start..=end]).ok()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bare_json() {
        let v = parse_verdict(r#"{"type":"workflow","confidence":0.9}"#).unwrap();
        assert_eq!(v.input_type, "workflow");
        assert_eq!(v.confidence, 0.9);
    }

    #[test]
    fn parse_json_wrapped_in_prose_and_fences() {
        let reply = "Sure! Here's my answer:\n```json\n{\"type\": \"prompt\", \"confidence\": 0.7}\n```\n";
        let v = parse_verdict(reply).unwrap();
        assert_eq!(v.input_type, "prompt");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_verdict("no json here").is_none());
        assert!(parse_verdict("{not json}").is_none());
        assert!(parse_verdict("}{").is_none());
    }
}
