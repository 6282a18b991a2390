// Copyright (c) 2026 The qi-prompt Authors
//
// SPDX-License-Identifier: MIT
use std::path::Path;

use walkdir::WalkDir;

/// Directories that never contribute useful project structure.
const SKIP_DIRS: &[&str] = &[".git", "target", "node_modules", ".venv", "__pycache__", "dist"];

/// Capture a bounded directory-tree listing rooted at `root`.
///
/// Hidden files and build artifacts are skipped; output stops after
/// `max_entries` lines with an elision marker so a huge workspace cannot
/// flood a prompt.
pub fn capture_structure(root: &Path, max_depth: usize, max_entries: usize) -> String {
    let mut out = String::new();
    let mut count = 0usize;

    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            !name.starts_with('.') && !SKIP_DIRS.contains(&name.as_ref())
        });

    for entry in walker.flatten() {
        if count >= max_entries {
            out.push_str("… [listing truncated]\n");
            break;
        }
        let depth = entry.depth();
        let name = entry.file_name().to_string_lossy();
        let marker = if entry.file_type().is_dir() { "/" } else { "" };
        out.push_str(&"  ".repeat(depth.saturating_sub(1)));
        out.push_str(&format!("{name}{marker}\n"));
        count += 1;
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        std::fs::create_dir_all(dir.path().join("target/debug")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "fn main() {}\n").unwrap();
        std::fs::write(dir.path().join("src/nested/deep.rs"), "\n").unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]\n").unwrap();
        std::fs::write(dir.path().join(".hidden"), "\n").unwrap();
        dir
    }

    #[test]
    fn lists_files_and_marks_directories() {
        let dir = workspace();
        let tree = capture_structure(dir.path(), 3, 100);
        assert!(tree.contains("src/"));
        assert!(tree.contains("main.rs"));
        assert!(tree.contains("Cargo.toml"));
    }

    #[test]
    fn skips_hidden_and_build_dirs() {
        let dir = workspace();
        let tree = capture_structure(dir.path(), 3, 100);
        assert!(!tree.contains(".hidden"));
        assert!(!tree.contains("target"));
    }

    #[test]
    fn respects_max_depth() {
        let dir = workspace();
        let tree = capture_structure(dir.path(), 1, 100);
        assert!(tree.contains("src/"));
        assert!(!tree.contains("deep.rs"));
    }

    #[test]
    fn truncates_after_max_entries() {
        let dir = workspace();
        let tree = capture_structure(dir.path(), 3, 2);
        assert!(tree.contains("[listing truncated]"));
        assert!(tree.lines().count() <= 3);
    }
}
