// Copyright (c) 2026 The qi-prompt Authors
//
// SPDX-License-Identifier: Apache-2.0
//! Three-way input classification: command / prompt / workflow.
//!
//! The rule-based method is always present and pure CPU; model-backed
//! methods (llm-direct, hybrid) honor a deadline and fall back to the
//! rule-based result on timeout, so classification never blocks the
//! pipeline on a slow provider.

mod llm;
mod rule;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use qi_config::ClassifierConfig;
use qi_model::ProviderRegistry;

pub use rule::split_args;

/// What the input is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Command,
    Prompt,
    Workflow,
}

/// Which method produced a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    RuleBased,
    LlmDirect,
    Hybrid,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::RuleBased => "rule-based",
            Method::LlmDirect => "llm-direct",
            Method::Hybrid => "hybrid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rule-based" => Some(Method::RuleBased),
            "llm-direct" => Some(Method::LlmDirect),
            "hybrid" => Some(Method::Hybrid),
            _ => None,
        }
    }
}

/// Data extracted alongside the type decision.
#[derive(Debug, Clone)]
pub enum Extracted {
    Command { name: String, argv: Vec<String> },
    Prompt { text: String },
    Workflow { hint: WorkflowHint },
}

/// Indicator summary handed to workflow extraction as a starting point.
#[derive(Debug, Clone, Default)]
pub struct WorkflowHint {
    /// Tool verbs found in the input, in order of appearance.
    pub verbs: Vec<String>,
    /// Path-looking tokens (file extensions or `@` sigils, sigil stripped).
    pub paths: Vec<String>,
    /// The weighted workflow score that triggered the classification.
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct ClassificationResult {
    pub input_type: InputType,
    /// In [0, 1].  Command detection by prefix is always 1.0.
    pub confidence: f64,
    pub method: Method,
    pub extracted: Extracted,
    /// Triggered-indicator trace, for `--debug` rendering only.
    pub reasoning: Option<String>,
}

/// The classifier: rule-based core plus optional model-backed methods.
pub struct Classifier {
    config: ClassifierConfig,
    models: Option<Arc<ProviderRegistry>>,
}

impl Classifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            config,
            models: None,
        }
    }

    /// Enable llm-direct / hybrid methods backed by the given registry.
    pub fn with_models(config: ClassifierConfig, models: Arc<ProviderRegistry>) -> Self {
        Self {
            config,
            models: Some(models),
        }
    }

    /// Classify `text`.
    ///
    /// `method` names a preferred method; when absent the configured
    /// priority list decides.  Inputs with the command prefix always resolve
    /// rule-based regardless of the requested method — prefix detection is
    /// exact and instant, and no model opinion can override it.
    pub async fn classify(&self, text: &str, method: Option<Method>) -> ClassificationResult {
        let rule = rule::classify(text, &self.config);
        if rule.input_type == InputType::Command {
            return rule;
        }

        let chosen = match method {
            Some(m) => m,
            None => self.first_configured_method(),
        };
        match chosen {
            Method::RuleBased => rule,
            Method::LlmDirect => self.classify_llm(text, rule).await,
            Method::Hybrid => self.classify_hybrid(text, rule).await,
        }
    }

    fn first_configured_method(&self) -> Method {
        self.config
            .method_priority
            .iter()
            .filter_map(|m| Method::parse(m))
            .find(|m| *m == Method::RuleBased || self.models.is_some())
            .unwrap_or(Method::RuleBased)
    }

    async fn classify_llm(
        &self,
        text: &str,
        rule: ClassificationResult,
    ) -> ClassificationResult {
        let Some(models) = &self.models else {
            return rule;
        };
        let deadline = Duration::from_millis(self.config.llm_timeout_ms);
        match llm::classify(models, text, deadline, &rule).await {
            Some(llm_result) => resolve_disagreement(rule, llm_result),
            None => {
                debug!("llm-direct classification timed out, using rule-based result");
                rule
            }
        }
    }

    /// Hybrid: accept a confident rule-based read immediately, escalate
    /// ambiguous inputs to the model.
    async fn classify_hybrid(
        &self,
        text: &str,
        rule: ClassificationResult,
    ) -> ClassificationResult {
        if rule.confidence >= 0.8 || self.models.is_none() {
            let mut result = rule;
            result.method = Method::Hybrid;
            return result;
        }
        let mut result = self.classify_llm(text, rule).await;
        result.method = Method::Hybrid;
        result
    }
}

/// When methods disagree, take the highest-confidence result, breaking ties
/// in favor of rule-based.
fn resolve_disagreement(
    rule: ClassificationResult,
    other: ClassificationResult,
) -> ClassificationResult {
    if other.confidence > rule.confidence {
        other
    } else {
        rule
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
