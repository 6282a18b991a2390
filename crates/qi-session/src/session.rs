// Copyright (c) 2026 The qi-prompt Authors
//
// SPDX-License-Identifier: MIT
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use qi_workflow::WorkflowSpec;

/// One turn in the conversation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEntry {
    /// "user" | "assistant" | "system"
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Per-session, conversation-scoped state.
///
/// Entries are append-only within a running session; the whole struct is the
/// snapshot document written to disk (self-describing JSON with ISO-8601
/// timestamps).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    entries: Vec<ConversationEntry>,
    #[serde(default)]
    pub context_memory: BTreeMap<String, String>,
    #[serde(default)]
    pub file_refs: Vec<String>,
    #[serde(default)]
    pub active_workflow: Option<WorkflowSpec>,
}

impl SessionState {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            last_active: now,
            entries: Vec::new(),
            context_memory: BTreeMap::new(),
            file_refs: Vec::new(),
            active_workflow: None,
        }
    }

    pub fn add_entry(&mut self, role: &str, content: impl Into<String>) {
        self.entries.push(ConversationEntry {
            role: role.to_string(),
            content: content.into(),
            timestamp: Utc::now(),
            metadata: BTreeMap::new(),
        });
        self.touch();
    }

    pub fn add_entry_with_metadata(
        &mut self,
        role: &str,
        content: impl Into<String>,
        metadata: BTreeMap<String, String>,
    ) {
        self.entries.push(ConversationEntry {
            role: role.to_string(),
            content: content.into(),
            timestamp: Utc::now(),
            metadata,
        });
        self.touch();
    }

    pub fn entries(&self) -> &[ConversationEntry] {
        &self.entries
    }

    pub fn set_memory(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.context_memory.insert(key.into(), value.into());
        self.touch();
    }

    pub fn get_memory(&self, key: &str) -> Option<&str> {
        self.context_memory.get(key).map(String::as_str)
    }

    /// User-entry texts, newest last — seeds the line editor's history when a
    /// session is restored.
    pub fn user_inputs(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.role == "user")
            .map(|e| e.content.clone())
            .collect()
    }

    fn touch(&mut self) {
        let now = Utc::now();
        if now > self.last_active {
            self.last_active = now;
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
