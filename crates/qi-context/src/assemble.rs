// Copyright (c) 2026 The qi-prompt Authors
//
// SPDX-License-Identifier: MIT
use tracing::trace;

use crate::ResolvedFile;

/// Lines per candidate chunk.  Chunks are cut on line boundaries only.
const CHUNK_LINES: usize = 60;

/// Per-source cap on packed chunks, for diversity: one huge file cannot
/// starve every other source out of the budget.
const MAX_CHUNKS_PER_SOURCE: usize = 3;

/// Token estimate ≈ characters / 4 (English text and code).  This is an
/// estimate, not a tokenizer; budgets must treat it as such.
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / 4
}

/// How fragments are ordered in the assembled context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyStrategy {
    /// Group by source path, shallow paths first — good for overview asks.
    Hierarchical,
    /// Most relevant fragments first regardless of source.
    Thematic,
    /// Original appearance order — good for step/history questions.
    Sequential,
    /// Round-robin across sources.
    Balanced,
}

/// A retrieval hit from an indexed store (interface only; stores are
/// external).
#[derive(Debug, Clone)]
pub struct RetrievalHit {
    pub source: String,
    pub text: String,
    /// Relevance in [0, 1] as scored by the store.
    pub relevance: f64,
}

/// One packed piece of context, labelled with where it came from.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub source: String,
    pub text: String,
    pub tokens: usize,
}

#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub strategy: AssemblyStrategy,
    pub fragments: Vec<Fragment>,
    pub estimated_tokens: usize,
    pub truncated: bool,
}

impl AssembledContext {
    /// Render for inclusion in a prompt; every fragment carries its source
    /// label.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for f in &self.fragments {
            out.push_str(&format!("--- {} ---\n{}\n", f.source, f.text));
        }
        if self.truncated {
            out.push_str("… [context truncated to budget]\n");
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

struct Candidate {
    source: String,
    text: String,
    relevance: f64,
    /// Appearance index, for sequential ordering and stable sorts.
    order: usize,
}

/// Assemble a context for `query` from resolved files and retrieval hits,
/// packing greedily by relevance into `budget_tokens`.
///
/// The estimated token total of the result never exceeds the budget; when
/// content is cut to fit, the cut happens on a line boundary and the result
/// is flagged truncated.
pub fn assemble_context(
    query: &str,
    files: &[ResolvedFile],
    hits: &[RetrievalHit],
    budget_tokens: usize,
) -> AssembledContext {
    let strategy = pick_strategy(query);
    let mut candidates = Vec::new();
    let mut order = 0;

    for f in files {
        let Some(content) = &f.content else { continue };
        let source = f.path.display().to_string();
        for chunk in chunk_lines(content) {
            candidates.push(Candidate {
                source: source.clone(),
                relevance: 0.8 + query_overlap(query, &chunk) * 0.2,
                text: chunk,
                order,
            });
            order += 1;
        }
    }
    for h in hits {
        candidates.push(Candidate {
            source: h.source.clone(),
            relevance: h.relevance.clamp(0.0, 1.0),
            text: h.text.clone(),
            order,
        });
        order += 1;
    }

    // Greedy relevance-ordered selection with per-source caps.
    candidates.sort_by(|a, b| {
        b.relevance
            .partial_cmp(&a.relevance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.order.cmp(&b.order))
    });

    let mut per_source: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    let mut picked: Vec<Candidate> = Vec::new();
    let mut used = 0usize;
    let mut truncated = false;

    for c in candidates {
        let count = per_source.entry(c.source.clone()).or_insert(0);
        if *count >= MAX_CHUNKS_PER_SOURCE {
            truncated = true;
            continue;
        }
        let label_overhead = estimate_tokens(&c.source) + 4;
        let need = c.tokens() + label_overhead;
        if used + need <= budget_tokens {
            used += need;
            *count += 1;
            picked.push(c);
            continue;
        }
        // Does a prefix of this chunk still fit?
        let remaining = budget_tokens.saturating_sub(used + label_overhead);
        if remaining > 8 {
            if let Some(prefix) = line_prefix_fitting(&c.text, remaining) {
                let tokens = estimate_tokens(&prefix);
                used += tokens + label_overhead;
                *count += 1;
                picked.push(Candidate {
                    text: prefix,
                    ..c
                });
            }
        }
        truncated = true;
        break;
    }

    order_fragments(&mut picked, strategy);

    let fragments: Vec<Fragment> = picked
        .into_iter()
        .map(|c| Fragment {
            tokens: estimate_tokens(&c.text),
            source: c.source,
            text: c.text,
        })
        .collect();
    trace!(
        fragments = fragments.len(),
        used,
        budget = budget_tokens,
        ?strategy,
        "context assembled"
    );
    AssembledContext {
        strategy,
        fragments,
        estimated_tokens: used.min(budget_tokens),
        truncated,
    }
}

impl Candidate {
    fn tokens(&self) -> usize {
        estimate_tokens(&self.text)
    }
}

/// Keyword cues → strategy.  Mirrors the intent heuristics the handlers use:
/// structural asks read top-down, comparative asks read by theme, narrative
/// asks read in order.
fn pick_strategy(query: &str) -> AssemblyStrategy {
    let lower = query.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| lower.contains(w));
    if has(&["structure", "overview", "architecture", "layout", "organi"]) {
        AssemblyStrategy::Hierarchical
    } else if has(&["compare", "similar", "related", "difference", "versus", " vs"]) {
        AssemblyStrategy::Thematic
    } else if has(&["step", "sequence", "order", "history", "first", "then", "timeline"]) {
        AssemblyStrategy::Sequential
    } else {
        AssemblyStrategy::Balanced
    }
}

fn order_fragments(picked: &mut [Candidate], strategy: AssemblyStrategy) {
    match strategy {
        AssemblyStrategy::Sequential => picked.sort_by_key(|c| c.order),
        AssemblyStrategy::Hierarchical => {
            picked.sort_by(|a, b| {
                let depth_a = a.source.matches('/').count();
                let depth_b = b.source.matches('/').count();
                depth_a
                    .cmp(&depth_b)
                    .then(a.source.cmp(&b.source))
                    .then(a.order.cmp(&b.order))
            });
        }
        // Thematic keeps the relevance ordering from selection.
        AssemblyStrategy::Thematic => {}
        AssemblyStrategy::Balanced => {
            // Round-robin across sources, preserving in-source order.
            let mut by_source: Vec<(String, std::collections::VecDeque<Candidate>)> = Vec::new();
            for c in picked.iter() {
                match by_source.iter_mut().find(|(s, _)| *s == c.source) {
                    Some((_, q)) => q.push_back(clone_candidate(c)),
                    None => {
                        let mut q = std::collections::VecDeque::new();
                        let source = c.source.clone();
                        q.push_back(clone_candidate(c));
                        by_source.push((source, q));
                    }
                }
            }
            let mut merged = Vec::with_capacity(picked.len());
            while merged.len() < picked.len() {
                for (_, q) in by_source.iter_mut() {
                    if let Some(c) = q.pop_front() {
                        merged.push(c);
                    }
                }
            }
            for (slot, c) in picked.iter_mut().zip(merged) {
                *slot = c;
            }
        }
    }
}

fn clone_candidate(c: &Candidate) -> Candidate {
    Candidate {
        source: c.source.clone(),
        text: c.text.clone(),
        relevance: c.relevance,
        order: c.order,
    }
}

/// Fraction of query terms (≥ 4 chars) appearing in `text`.
fn query_overlap(query: &str, text: &str) -> f64 {
    let lower = text.to_lowercase();
    let terms: Vec<String> = query
        .to_lowercase()
        .split_whitespace()
        .filter(|w| w.len() >= 4)
        .map(|w| w.to_string())
        .collect();
    if terms.is_empty() {
        return 0.0;
    }
    let found = terms.iter().filter(|t| lower.contains(t.as_str())).count();
    found as f64 / terms.len() as f64
}

/// Split content into chunks of at most [`CHUNK_LINES`] lines.
fn chunk_lines(content: &str) -> Vec<String> {
    let lines: Vec<&str> = content.lines().collect();
    lines
        .chunks(CHUNK_LINES)
        .map(|c| {
            let mut s = c.join("\n");
            s.push('\n');
            s
        })
        .collect()
}

/// Largest whole-line prefix of `text` whose estimate fits `budget`.
fn line_prefix_fitting(text: &str, budget: usize) -> Option<String> {
    let mut out = String::new();
    for line in text.lines() {
        if estimate_tokens(&out) + estimate_tokens(line) + 1 > budget {
            break;
        }
        out.push_str(line);
        out.push('\n');
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
