// Copyright (c) 2026 The qi-prompt Authors
//
// SPDX-License-Identifier: MIT
use unicode_width::UnicodeWidthStr;

/// A single-line edit buffer with history.
///
/// The cursor is a byte offset that always sits on a `char` boundary.
#[derive(Debug, Default)]
pub struct LineEditor {
    buffer: String,
    cursor: usize,
    history: Vec<String>,
    /// `None` when editing a fresh line; `Some(i)` while browsing history.
    history_pos: Option<usize>,
    /// The in-progress line stashed while browsing history.
    stash: String,
}

impl LineEditor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed history (oldest first), e.g. from a restored session.
    pub fn seed_history(&mut self, entries: Vec<String>) {
        self.history = entries;
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Display width of the text left of the cursor.
    pub fn cursor_col(&self) -> usize {
        self.buffer[..self.cursor].width()
    }

    pub fn insert(&mut self, c: char) {
        self.buffer.insert(self.cursor, c);
        self.cursor += c.len_utf8();
    }

    pub fn insert_str(&mut self, s: &str) {
        self.buffer.insert_str(self.cursor, s);
        self.cursor += s.len();
    }

    /// Replace the whole line (suggestion acceptance).
    pub fn set(&mut self, text: &str) {
        self.buffer = text.to_string();
        self.cursor = self.buffer.len();
        self.history_pos = None;
    }

    pub fn backspace(&mut self) {
        if let Some(prev) = self.prev_boundary() {
            self.buffer.remove(prev);
            self.cursor = prev;
        }
    }

    pub fn delete(&mut self) {
        if self.cursor < self.buffer.len() {
            self.buffer.remove(self.cursor);
        }
    }

    pub fn left(&mut self) {
        if let Some(prev) = self.prev_boundary() {
            self.cursor = prev;
        }
    }

    pub fn right(&mut self) {
        if let Some(next) = self.next_boundary() {
            self.cursor = next;
        }
    }

    pub fn home(&mut self) {
        self.cursor = 0;
    }

    pub fn end(&mut self) {
        self.cursor = self.buffer.len();
    }

    /// Jump to the start of the previous word.
    pub fn word_left(&mut self) {
        let before = &self.buffer[..self.cursor];
        let trimmed = before.trim_end_matches(|c: char| c.is_whitespace());
        let word_start = trimmed
            .rfind(|c: char| c.is_whitespace())
            .map(|i| i + 1)
            .unwrap_or(0);
        self.cursor = word_start;
    }

    /// Jump past the end of the next word.
    pub fn word_right(&mut self) {
        let after = &self.buffer[self.cursor..];
        let skip_ws = after.len() - after.trim_start_matches(|c: char| c.is_whitespace()).len();
        let rest = &after[skip_ws..];
        let word_len = rest.find(|c: char| c.is_whitespace()).unwrap_or(rest.len());
        self.cursor += skip_ws + word_len;
    }

    /// Submit: push a non-empty line to history and reset the editor.
    pub fn take(&mut self) -> String {
        let line = std::mem::take(&mut self.buffer);
        self.cursor = 0;
        self.history_pos = None;
        self.stash.clear();
        if !line.trim().is_empty() && self.history.last() != Some(&line) {
            self.history.push(line.clone());
        }
        line
    }

    pub fn history_up(&mut self) {
        if self.history.is_empty() {
            return;
        }
        let next_pos = match self.history_pos {
            None => {
                self.stash = self.buffer.clone();
                self.history.len() - 1
            }
            Some(0) => 0,
            Some(i) => i - 1,
        };
        self.history_pos = Some(next_pos);
        self.buffer = self.history[next_pos].clone();
        self.cursor = self.buffer.len();
    }

    pub fn history_down(&mut self) {
        let Some(pos) = self.history_pos else {
            return;
        };
        if pos + 1 < self.history.len() {
            self.history_pos = Some(pos + 1);
            self.buffer = self.history[pos + 1].clone();
        } else {
            self.history_pos = None;
            self.buffer = std::mem::take(&mut self.stash);
        }
        self.cursor = self.buffer.len();
    }

    fn prev_boundary(&self) -> Option<usize> {
        self.buffer[..self.cursor].char_indices().last().map(|(i, _)| i)
    }

    fn next_boundary(&self) -> Option<usize> {
        self.buffer[self.cursor..]
            .chars()
            .next()
            .map(|c| self.cursor + c.len_utf8())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn editor_with(text: &str) -> LineEditor {
        let mut e = LineEditor::new();
        for c in text.chars() {
            e.insert(c);
        }
        e
    }

    #[test]
    fn insert_appends_at_cursor() {
        let mut e = editor_with("ac");
        e.left();
        e.insert('b');
        assert_eq!(e.buffer(), "abc");
    }

    #[test]
    fn backspace_removes_before_cursor() {
        let mut e = editor_with("abc");
        e.backspace();
        assert_eq!(e.buffer(), "ab");
        e.home();
        e.backspace(); // nothing to remove at start
        assert_eq!(e.buffer(), "ab");
    }

    #[test]
    fn delete_removes_at_cursor() {
        let mut e = editor_with("abc");
        e.home();
        e.delete();
        assert_eq!(e.buffer(), "bc");
        e.end();
        e.delete(); // nothing past the end
        assert_eq!(e.buffer(), "bc");
    }

    #[test]
    fn multibyte_chars_edit_cleanly() {
        let mut e = editor_with("héllo");
        e.home();
        e.right();
        e.right();
        e.backspace(); // removes 'é'
        assert_eq!(e.buffer(), "hllo");
        e.insert('ü');
        assert_eq!(e.buffer(), "hüllo");
    }

    #[test]
    fn word_jumps() {
        let mut e = editor_with("one two  three");
        e.word_left();
        assert_eq!(&e.buffer()[e_cursor(&e)..], "three");
        e.word_left();
        assert_eq!(&e.buffer()[e_cursor(&e)..], "two  three");
        e.word_left();
        assert_eq!(e_cursor(&e), 0);
        e.word_right();
        assert_eq!(&e.buffer()[..e_cursor(&e)], "one");
        e.word_right();
        assert_eq!(&e.buffer()[..e_cursor(&e)], "one two");
    }

    fn e_cursor(e: &LineEditor) -> usize {
        e.cursor
    }

    #[test]
    fn take_pushes_history_and_resets() {
        let mut e = editor_with("first");
        assert_eq!(e.take(), "first");
        assert!(e.is_empty());
        e.insert_str("second");
        e.take();
        e.history_up();
        assert_eq!(e.buffer(), "second");
        e.history_up();
        assert_eq!(e.buffer(), "first");
    }

    #[test]
    fn take_skips_blank_and_duplicate_history() {
        let mut e = editor_with("   ");
        e.take();
        e.insert_str("same");
        e.take();
        e.insert_str("same");
        e.take();
        assert_eq!(e.history.len(), 1);
    }

    #[test]
    fn history_down_restores_stashed_line() {
        let mut e = LineEditor::new();
        e.insert_str("old");
        e.take();
        e.insert_str("in progress");
        e.history_up();
        assert_eq!(e.buffer(), "old");
        e.history_down();
        assert_eq!(e.buffer(), "in progress");
    }

    #[test]
    fn history_up_stops_at_oldest() {
        let mut e = LineEditor::new();
        e.seed_history(vec!["a".into(), "b".into()]);
        e.history_up();
        e.history_up();
        e.history_up();
        assert_eq!(e.buffer(), "a");
    }

    #[test]
    fn cursor_col_uses_display_width() {
        let mut e = editor_with("日本");
        assert_eq!(e.cursor_col(), 4); // two double-width chars
        e.left();
        assert_eq!(e.cursor_col(), 2);
    }
}
