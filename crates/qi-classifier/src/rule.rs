// Copyright (c) 2026 The qi-prompt Authors
//
// SPDX-License-Identifier: MIT
//! Rule-based classification: weighted indicators, no I/O, sub-millisecond.

use std::sync::OnceLock;

use regex::Regex;

use qi_config::ClassifierConfig;

use crate::{ClassificationResult, Extracted, InputType, Method, WorkflowHint};

/// Multi-step connectives that suggest a sequenced task.
const CONNECTIVES: &[&str] = &[
    "then",
    "after that",
    "and then",
    "finally",
    "followed by",
    "afterwards",
];

/// Imperative verbs that map onto tool invocations.
const TOOL_VERBS: &[&str] = &[
    "read", "write", "run", "execute", "create", "delete", "remove", "list", "search", "fetch",
    "copy", "move", "rename", "build", "install",
];

fn file_ext_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b[\w./-]+\.(rs|ts|js|tsx|jsx|py|go|c|h|cpp|hpp|java|rb|sh|md|toml|yaml|yml|json|txt|html|css|sql|lock)\b",
        )
        .expect("static regex")
    })
}

/// Classify without touching the model layer.
pub(crate) fn classify(text: &str, config: &ClassifierConfig) -> ClassificationResult {
    let trimmed = text.trim();

    if trimmed.is_empty() {
        return ClassificationResult {
            input_type: InputType::Prompt,
            confidence: 0.0,
            method: Method::RuleBased,
            extracted: Extracted::Prompt { text: String::new() },
            reasoning: Some("empty input".into()),
        };
    }

    if let Some(rest) = trimmed.strip_prefix('/') {
        let mut argv = split_args(rest);
        let name = if argv.is_empty() {
            String::new()
        } else {
            argv.remove(0)
        };
        return ClassificationResult {
            input_type: InputType::Command,
            confidence: 1.0,
            method: Method::RuleBased,
            extracted: Extracted::Command { name, argv },
            reasoning: Some("command prefix".into()),
        };
    }

    let (score, hint, trace) = workflow_score(trimmed, config);
    let prompt_score = 1.0 - score;

    // Workflow needs the weighted score to clear the threshold, and a clear
    // margin over the prompt reading — ambiguity resolves to prompt because a
    // prompt never executes tools.
    let is_workflow =
        score > config.workflow_threshold && (score - prompt_score).abs() > config.tie_margin;

    if is_workflow {
        ClassificationResult {
            input_type: InputType::Workflow,
            confidence: score.min(0.99),
            method: Method::RuleBased,
            extracted: Extracted::Workflow { hint },
            reasoning: Some(trace),
        }
    } else {
        ClassificationResult {
            input_type: InputType::Prompt,
            confidence: prompt_score.clamp(0.5, 0.95),
            method: Method::RuleBased,
            extracted: Extracted::Prompt {
                text: trimmed.to_string(),
            },
            reasoning: Some(trace),
        }
    }
}

/// Weighted workflow score in [0, 1] plus the extraction hint.
///
/// Connectives and tool verbs score per distinct match, capped at two each,
/// so "read X then write Y" outweighs a prompt that merely mentions a file.
fn workflow_score(text: &str, config: &ClassifierConfig) -> (f64, WorkflowHint, String) {
    let w = &config.weights;
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower.split_whitespace().collect();
    let mut score = 0.0;
    let mut trace = Vec::new();
    let mut hint = WorkflowHint::default();

    let connectives: Vec<&str> = CONNECTIVES
        .iter()
        .filter(|c| contains_phrase(&lower, &words, c))
        .copied()
        .collect();
    if !connectives.is_empty() {
        let n = connectives.len().min(2) as f64;
        score += w.connective * n;
        trace.push(format!("connectives({})", connectives.join(",")));
    }

    let verbs: Vec<&str> = TOOL_VERBS
        .iter()
        .filter(|v| words.contains(*v))
        .copied()
        .collect();
    if !verbs.is_empty() {
        let n = verbs.len().min(2) as f64;
        score += w.tool_verb * n;
        trace.push(format!("verbs({})", verbs.join(",")));
        hint.verbs = verbs.iter().map(|v| v.to_string()).collect();
    }

    // Whole tokens, not regex matches: an absolute path must keep its
    // leading slash when it flows into extraction.
    let mut paths: Vec<String> = text
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| matches!(c, ',' | ';' | ':' | '(' | ')' | '"' | '\'')))
        .filter(|t| !t.starts_with('@') && file_ext_re().is_match(t))
        .map(|t| t.to_string())
        .collect();
    if !paths.is_empty() {
        score += w.file_extension;
        trace.push(format!("files({})", paths.join(",")));
    }

    let sigils: Vec<String> = text
        .split_whitespace()
        .filter_map(|t| t.strip_prefix('@'))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect();
    if !sigils.is_empty() {
        score += w.path_sigil;
        trace.push(format!("sigils({})", sigils.join(",")));
        for s in &sigils {
            if !paths.contains(s) {
                paths.push(s.clone());
            }
        }
    }
    hint.paths = paths;

    if text.matches('"').count() >= 2 || text.matches('\'').count() >= 2 {
        score += w.quoted_span;
        trace.push("quoted".into());
    }

    if words.len() > w.long_input_words {
        score += w.long_input;
        trace.push(format!("long({} words)", words.len()));
    }

    let score = score.min(1.0);
    hint.score = score;
    (score, hint, format!("score={score:.2} [{}]", trace.join(" ")))
}

fn contains_phrase(lower: &str, words: &[&str], phrase: &str) -> bool {
    if phrase.contains(' ') {
        lower.contains(phrase)
    } else {
        words.contains(&phrase)
    }
}

/// POSIX-style argv tokenizer.
///
/// Double- and single-quoted spans form single tokens; a backslash escapes
/// the following character outside single quotes; unquoted whitespace
/// separates tokens.
pub fn split_args(input: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut has_token = false;
    let mut in_single = false;
    let mut in_double = false;
    let mut escaped = false;

    for c in input.chars() {
        if escaped {
            cur.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if !in_single => {
                escaped = true;
                has_token = true;
            }
            '\'' if !in_double => {
                in_single = !in_single;
                has_token = true;
            }
            '"' if !in_single => {
                in_double = !in_double;
                has_token = true;
            }
            c if c.is_whitespace() && !in_single && !in_double => {
                if has_token {
                    out.push(std::mem::take(&mut cur));
                    has_token = false;
                }
            }
            c => {
                cur.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        out.push(cur);
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
