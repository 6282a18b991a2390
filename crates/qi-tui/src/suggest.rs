// Copyright (c) 2026 The qi-prompt Authors
//
// SPDX-License-Identifier: MIT

/// One suggestible command.
#[derive(Debug, Clone)]
pub struct SuggestionItem {
    pub name: String,
    pub description: String,
}

/// The command-suggestion panel.  Active only while the line is an
/// unfinished `/command` prefix; Up/Down navigate it instead of history
/// while it is showing.
#[derive(Debug, Default)]
pub struct SuggestionPanel {
    commands: Vec<SuggestionItem>,
    matches: Vec<usize>,
    selected: usize,
    active: bool,
}

impl SuggestionPanel {
    pub fn new(commands: Vec<SuggestionItem>) -> Self {
        Self {
            commands,
            matches: Vec::new(),
            selected: 0,
            active: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active && !self.matches.is_empty()
    }

    /// Refresh against the current line.  The panel shows while the buffer
    /// is `/prefix` with no space yet (arguments end suggestion mode).
    pub fn update(&mut self, line: &str) {
        let showing = line.starts_with('/') && !line.contains(' ');
        if !showing {
            self.active = false;
            self.matches.clear();
            return;
        }
        let prefix = &line[1..];
        let previous = self.selected_name();
        self.matches = self
            .commands
            .iter()
            .enumerate()
            .filter(|(_, c)| c.name.starts_with(prefix))
            .map(|(i, _)| i)
            .collect();
        self.active = true;
        // Keep the selection stable across keystrokes when possible.
        self.selected = previous
            .and_then(|name| {
                self.matches
                    .iter()
                    .position(|&i| self.commands[i].name == name)
            })
            .unwrap_or(0);
    }

    pub fn next(&mut self) {
        if !self.matches.is_empty() {
            self.selected = (self.selected + 1) % self.matches.len();
        }
    }

    pub fn prev(&mut self) {
        if !self.matches.is_empty() {
            self.selected = (self.selected + self.matches.len() - 1) % self.matches.len();
        }
    }

    fn selected_name(&self) -> Option<String> {
        self.matches
            .get(self.selected)
            .map(|&i| self.commands[i].name.clone())
    }

    /// Accept the selected suggestion: the full `/name ` ready for arguments.
    pub fn accept(&mut self) -> Option<String> {
        let name = self.selected_name()?;
        self.active = false;
        self.matches.clear();
        Some(format!("/{name} "))
    }

    /// Visible rows: (name, description, selected).
    pub fn rows(&self) -> Vec<(&str, &str, bool)> {
        self.matches
            .iter()
            .enumerate()
            .map(|(pos, &i)| {
                (
                    self.commands[i].name.as_str(),
                    self.commands[i].description.as_str(),
                    pos == self.selected,
                )
            })
            .collect()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
