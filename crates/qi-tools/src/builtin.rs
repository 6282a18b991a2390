// Copyright (c) 2026 The qi-prompt Authors
//
// SPDX-License-Identifier: MIT
//! Built-in tools: file read/write, directory listing, shell execution.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::{Tool, ToolCapabilities, ToolRequest, ToolResult};

const READ_LIMIT: usize = 200_000;

fn str_arg<'a>(req: &'a ToolRequest, key: &str) -> Option<&'a str> {
    req.args.get(key).and_then(|v| v.as_str())
}

// ── read_file ────────────────────────────────────────────────────────────────

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }
    fn category(&self) -> &str {
        "filesystem"
    }
    fn description(&self) -> &str {
        "Read a UTF-8 text file and return its contents."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path to read" }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }
    fn capabilities(&self) -> ToolCapabilities {
        ToolCapabilities {
            max_execution_time_ms: Some(5_000),
            tags: vec!["filesystem".into()],
        }
    }

    async fn execute(&self, req: &ToolRequest) -> ToolResult {
        let Some(path) = str_arg(req, "path") else {
            return ToolResult::err(req, "missing 'path'");
        };
        debug!(path, "read_file tool");
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                let content = if text.len() > READ_LIMIT {
                    let mut end = READ_LIMIT;
                    while !text.is_char_boundary(end) {
                        end -= 1;
                    }
                    format!("{}...[truncated]", &text[..end])
                } else {
                    text.to_string()
                };
                ToolResult::ok(req, content)
            }
            Err(e) => ToolResult::err(req, format!("read error: {e}")),
        }
    }
}

// ── write_file ───────────────────────────────────────────────────────────────

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }
    fn category(&self) -> &str {
        "filesystem"
    }
    fn description(&self) -> &str {
        "Write text to a file, creating parent directories as needed."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path to write" },
                "text": { "type": "string", "description": "Content to write" },
                "append": { "type": "boolean", "description": "Append instead of overwrite" }
            },
            "required": ["path", "text"],
            "additionalProperties": false
        })
    }
    fn capabilities(&self) -> ToolCapabilities {
        ToolCapabilities {
            max_execution_time_ms: Some(5_000),
            tags: vec!["filesystem".into(), "mutating".into()],
        }
    }

    async fn execute(&self, req: &ToolRequest) -> ToolResult {
        let Some(path) = str_arg(req, "path") else {
            return ToolResult::err(req, "missing 'path'");
        };
        let Some(text) = str_arg(req, "text") else {
            return ToolResult::err(req, "missing 'text'");
        };
        let append = req
            .args
            .get("append")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        debug!(path, append, bytes = text.len(), "write_file tool");

        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    return ToolResult::err(req, format!("mkdir error: {e}"));
                }
            }
        }
        let result = if append {
            use tokio::io::AsyncWriteExt;
            match tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
            {
                Ok(mut f) => f.write_all(text.as_bytes()).await,
                Err(e) => Err(e),
            }
        } else {
            tokio::fs::write(path, text).await
        };
        match result {
            Ok(()) => ToolResult::ok(req, format!("wrote {} bytes to {path}", text.len())),
            Err(e) => ToolResult::err(req, format!("write error: {e}")),
        }
    }
}

// ── list_dir ─────────────────────────────────────────────────────────────────

pub struct ListDirTool;

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }
    fn category(&self) -> &str {
        "filesystem"
    }
    fn description(&self) -> &str {
        "List the entries of a directory."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory path" }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }
    fn capabilities(&self) -> ToolCapabilities {
        ToolCapabilities {
            max_execution_time_ms: Some(5_000),
            tags: vec!["filesystem".into()],
        }
    }

    async fn execute(&self, req: &ToolRequest) -> ToolResult {
        let Some(path) = str_arg(req, "path") else {
            return ToolResult::err(req, "missing 'path'");
        };
        let mut entries = match tokio::fs::read_dir(path).await {
            Ok(rd) => rd,
            Err(e) => return ToolResult::err(req, format!("list error: {e}")),
        };
        let mut names = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let mut name = entry.file_name().to_string_lossy().to_string();
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                name.push('/');
            }
            names.push(name);
        }
        names.sort();
        ToolResult::ok(req, names.join("\n"))
    }
}

// ── shell ────────────────────────────────────────────────────────────────────

pub struct ShellTool {
    shell: String,
}

impl Default for ShellTool {
    fn default() -> Self {
        Self {
            shell: "/bin/sh".into(),
        }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }
    fn category(&self) -> &str {
        "process"
    }
    fn description(&self) -> &str {
        "Run a shell command and return combined stdout/stderr."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Command line to run" }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }
    fn capabilities(&self) -> ToolCapabilities {
        ToolCapabilities {
            max_execution_time_ms: Some(30_000),
            tags: vec!["process".into(), "mutating".into()],
        }
    }

    async fn execute(&self, req: &ToolRequest) -> ToolResult {
        let Some(command) = str_arg(req, "command") else {
            return ToolResult::err(req, "missing 'command'");
        };
        debug!(command, "shell tool");
        let output = tokio::process::Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .output()
            .await;
        match output {
            Ok(out) => {
                let mut text = String::from_utf8_lossy(&out.stdout).to_string();
                let stderr = String::from_utf8_lossy(&out.stderr);
                if !stderr.is_empty() {
                    text.push_str(&stderr);
                }
                if out.status.success() {
                    ToolResult::ok(req, text)
                } else {
                    ToolResult::err(
                        req,
                        format!("exit {}: {text}", out.status.code().unwrap_or(-1)),
                    )
                }
            }
            Err(e) => ToolResult::err(req, format!("spawn error: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn req(name: &str, args: Value) -> ToolRequest {
        ToolRequest {
            id: "t1".into(),
            name: name.into(),
            args,
        }
    }

    #[tokio::test]
    async fn write_then_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        let path_str = path.to_string_lossy().to_string();

        let w = WriteFileTool
            .execute(&req("write_file", json!({ "path": path_str, "text": "roundtrip" })))
            .await;
        assert!(!w.is_error, "write failed: {}", w.content);

        let r = ReadFileTool
            .execute(&req("read_file", json!({ "path": path_str })))
            .await;
        assert!(!r.is_error);
        assert_eq!(r.content, "roundtrip");
    }

    #[tokio::test]
    async fn write_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/c.txt");
        let out = WriteFileTool
            .execute(&req(
                "write_file",
                json!({ "path": path.to_string_lossy(), "text": "x" }),
            ))
            .await;
        assert!(!out.is_error);
        assert!(path.is_file());
    }

    #[tokio::test]
    async fn append_mode_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        let path_str = path.to_string_lossy().to_string();
        for _ in 0..2 {
            WriteFileTool
                .execute(&req(
                    "write_file",
                    json!({ "path": path_str, "text": "x", "append": true }),
                ))
                .await;
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "xx");
    }

    #[tokio::test]
    async fn read_missing_file_is_soft_error() {
        let out = ReadFileTool
            .execute(&req("read_file", json!({ "path": "/tmp/qi_missing_xyz" })))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("read error"));
    }

    #[tokio::test]
    async fn missing_required_arg_is_soft_error() {
        let out = ReadFileTool.execute(&req("read_file", json!({}))).await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn list_dir_marks_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("f.txt"), "x").unwrap();
        let out = ListDirTool
            .execute(&req("list_dir", json!({ "path": dir.path().to_string_lossy() })))
            .await;
        assert!(!out.is_error);
        assert_eq!(out.content, "f.txt\nsub/");
    }

    #[tokio::test]
    async fn shell_runs_command() {
        let out = ShellTool::default()
            .execute(&req("shell", json!({ "command": "echo qi_$((40+2))" })))
            .await;
        assert!(!out.is_error);
        assert!(out.content.contains("qi_42"));
    }

    #[tokio::test]
    async fn shell_nonzero_exit_is_soft_error() {
        let out = ShellTool::default()
            .execute(&req("shell", json!({ "command": "exit 3" })))
            .await;
        assert!(out.is_error);
        assert!(out.content.starts_with("exit 3"));
    }
}
