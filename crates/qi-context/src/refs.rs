// Copyright (c) 2026 The qi-prompt Authors
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use tracing::debug;

/// Per-file read cap.  Oversize files are truncated on a line boundary with
/// an explicit marker rather than silently shortened.
pub const DEFAULT_MAX_FILE_BYTES: usize = 64 * 1024;

/// One `@path` reference after resolution.
#[derive(Debug, Clone)]
pub struct ResolvedFile {
    /// The reference exactly as typed (without the `@`).
    pub reference: String,
    /// Workspace-relative path it resolved to.
    pub path: PathBuf,
    /// File contents; `None` when the reference did not resolve.
    pub content: Option<String>,
    pub truncated: bool,
}

impl ResolvedFile {
    pub fn resolved(&self) -> bool {
        self.content.is_some()
    }
}

/// Find `@`-prefixed tokens in `text`, resolve them against `root`, and read
/// their contents (bounded by `max_file_bytes`).
///
/// Returns the text with unresolved references marked inline — the model
/// sees the failure instead of a silently dropped token — plus the resolved
/// file list in order of first appearance.
pub fn expand_references(
    text: &str,
    root: &Path,
    max_file_bytes: usize,
) -> (String, Vec<ResolvedFile>) {
    let mut files: Vec<ResolvedFile> = Vec::new();
    let mut out_tokens: Vec<String> = Vec::new();

    for token in text.split_whitespace() {
        let Some(reference) = strip_sigil(token) else {
            out_tokens.push(token.to_string());
            continue;
        };
        if files.iter().any(|f| f.reference == reference) {
            out_tokens.push(token.to_string());
            continue;
        }
        let resolved = resolve_one(reference, root, max_file_bytes);
        if resolved.resolved() {
            out_tokens.push(token.to_string());
        } else {
            out_tokens.push(format!("@{reference} [unresolved reference: file not found]"));
        }
        files.push(resolved);
    }

    (out_tokens.join(" "), files)
}

/// A token is a reference when it starts with `@` followed by a path-looking
/// remainder.  A bare `@` or an email-style token is left alone.
fn strip_sigil(token: &str) -> Option<&str> {
    let rest = token.strip_prefix('@')?;
    let rest = rest.trim_end_matches(|c: char| matches!(c, ',' | ';' | ':' | ')' | '?'));
    if rest.is_empty() || rest.contains('@') {
        return None;
    }
    Some(rest)
}

fn resolve_one(reference: &str, root: &Path, max_file_bytes: usize) -> ResolvedFile {
    let expanded = shellexpand::tilde(reference).to_string();
    let candidate = if Path::new(&expanded).is_absolute() {
        PathBuf::from(&expanded)
    } else {
        root.join(&expanded)
    };

    if !candidate.is_file() {
        debug!(reference, "file reference did not resolve");
        return ResolvedFile {
            reference: reference.to_string(),
            path: candidate,
            content: None,
            truncated: false,
        };
    }

    match std::fs::read_to_string(&candidate) {
        Ok(content) => {
            let (content, truncated) = truncate_on_line_boundary(content, max_file_bytes);
            ResolvedFile {
                reference: reference.to_string(),
                path: candidate,
                content: Some(content),
                truncated,
            }
        }
        Err(e) => {
            debug!(reference, error = %e, "file reference read failed");
            ResolvedFile {
                reference: reference.to_string(),
                path: candidate,
                content: None,
                truncated: false,
            }
        }
    }
}

/// Cut `content` at the last full line within `max_bytes` and append a
/// truncation marker.
fn truncate_on_line_boundary(content: String, max_bytes: usize) -> (String, bool) {
    if content.len() <= max_bytes {
        return (content, false);
    }
    // The byte cap may land mid-codepoint; back up to a char boundary first.
    let mut end = max_bytes;
    while !content.is_char_boundary(end) {
        end -= 1;
    }
    let cut = content[..end].rfind('\n').map(|i| i + 1).unwrap_or(end);
    let mut truncated = content[..cut].to_string();
    truncated.push_str("… [truncated]\n");
    (truncated, true)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn workspace() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let mut f = std::fs::File::create(dir.path().join("README.md")).unwrap();
        writeln!(f, "# Demo\nSome readme content.").unwrap();
        dir
    }

    #[test]
    fn resolves_existing_file_and_keeps_token() {
        let dir = workspace();
        let (text, files) =
            expand_references("@README.md summarize this", dir.path(), DEFAULT_MAX_FILE_BYTES);
        assert_eq!(text, "@README.md summarize this");
        assert_eq!(files.len(), 1);
        assert!(files[0].resolved());
        assert!(files[0].content.as_ref().unwrap().contains("readme content"));
    }

    #[test]
    fn unresolved_reference_is_marked_inline() {
        let dir = workspace();
        let (text, files) = expand_references("@missing.txt help", dir.path(), 1024);
        assert!(text.contains("[unresolved reference"));
        assert_eq!(files.len(), 1);
        assert!(!files[0].resolved());
    }

    #[test]
    fn duplicate_references_resolve_once() {
        let dir = workspace();
        let (_, files) =
            expand_references("@README.md and @README.md again", dir.path(), 1024);
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn oversize_file_is_truncated_with_marker_on_line_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let big: String = (0..200).map(|i| format!("line {i}\n")).collect();
        std::fs::write(dir.path().join("big.txt"), &big).unwrap();
        let (_, files) = expand_references("@big.txt", dir.path(), 100);
        let f = &files[0];
        assert!(f.truncated);
        let content = f.content.as_ref().unwrap();
        assert!(content.ends_with("… [truncated]\n"));
        // Every retained line is complete.
        let body = content.trim_end_matches("… [truncated]\n");
        assert!(body.ends_with('\n'));
        assert!(body.len() <= 100);
    }

    #[test]
    fn email_like_tokens_are_not_references() {
        let dir = workspace();
        let (text, files) = expand_references("mail user@example.com", dir.path(), 1024);
        assert_eq!(text, "mail user@example.com");
        assert!(files.is_empty());
    }

    #[test]
    fn bare_sigil_is_not_a_reference() {
        let dir = workspace();
        let (_, files) = expand_references("look @ this", dir.path(), 1024);
        assert!(files.is_empty());
    }

    #[test]
    fn trailing_punctuation_is_stripped_from_reference() {
        let dir = workspace();
        let (_, files) = expand_references("see @README.md, please", dir.path(), 1024);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].reference, "README.md");
        assert!(files[0].resolved());
    }
}
