// Copyright (c) 2026 The qi-prompt Authors
//
// SPDX-License-Identifier: MIT
use std::io::{stdout, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use crossterm::{
    cursor,
    event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{self, Clear, ClearType},
};
use futures::StreamExt;
use tokio::sync::broadcast;
use tracing::debug;
use unicode_width::UnicodeWidthStr;

use qi_core::SharedAppState;
use qi_queue::{Message, MessageQueue, Payload, Priority};

use crate::{
    make_renderer,
    suggest::SuggestionItem,
    Framework, LineEditor, Renderer, SuggestionPanel,
};

/// Second Ctrl-C within this window shuts the process down.
const CTRL_C_WINDOW: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub framework: Framework,
    pub debug: bool,
    pub hotkeys: bool,
}

/// What a key event asks the driver to do.
#[derive(Debug, PartialEq, Eq)]
enum Action {
    None,
    Redraw,
    Submit,
    CancelRequest,
    Shutdown,
}

/// The terminal input loop: owns the line editor and the UI state machine's
/// sub-state cycling, enqueues intent messages, renders the outbound stream.
pub struct Driver {
    queue: Arc<MessageQueue>,
    app_state: SharedAppState,
    editor: LineEditor,
    suggestions: SuggestionPanel,
    renderer: Box<dyn Renderer>,
    options: DriverOptions,
    last_ctrl_c: Option<Instant>,
    /// Whether partials have streamed since the last terminal message; used
    /// to avoid reprinting the full text the user already watched arrive.
    streaming: bool,
}

impl Driver {
    pub fn new(
        queue: Arc<MessageQueue>,
        app_state: SharedAppState,
        commands: Vec<SuggestionItem>,
        history: Vec<String>,
        options: DriverOptions,
    ) -> Self {
        let mut editor = LineEditor::new();
        editor.seed_history(history);
        Self {
            queue,
            app_state,
            editor,
            suggestions: SuggestionPanel::new(commands),
            renderer: make_renderer(options.framework),
            options,
            last_ctrl_c: None,
            streaming: false,
        }
    }

    /// Run until shutdown (double Ctrl-C, Ctrl-D, or queue closure).
    pub async fn run(&mut self) -> anyhow::Result<()> {
        terminal::enable_raw_mode().context("enabling raw mode")?;
        let result = self.event_loop().await;
        let _ = terminal::disable_raw_mode();
        println!();
        result
    }

    async fn event_loop(&mut self) -> anyhow::Result<()> {
        let mut keys = EventStream::new();
        let mut outbound = self.queue.subscribe();
        let mut out = stdout();
        self.draw_prompt(&mut out)?;

        loop {
            tokio::select! {
                ev = keys.next() => match ev {
                    Some(Ok(Event::Key(key))) => match self.handle_key(key) {
                        Action::None => {}
                        Action::Redraw => self.draw_prompt(&mut out)?,
                        Action::Submit => self.submit(&mut out)?,
                        Action::CancelRequest => {
                            let _ = self
                                .queue
                                .enqueue(Payload::Cancel { target: None }, Priority::Critical);
                            self.renderer.notice(&mut out, "cancelling")?;
                        }
                        Action::Shutdown => {
                            self.renderer.notice(&mut out, "shutting down")?;
                            return Ok(());
                        }
                    },
                    Some(Ok(_)) => {} // resize, focus, paste — nothing to do
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(()),
                },
                msg = outbound.recv() => match msg {
                    Ok(m) => self.render_message(&mut out, m)?,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!(missed = n, "outbound stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                },
            }
        }
    }

    // ── Key bindings ─────────────────────────────────────────────────────────

    fn handle_key(&mut self, key: KeyEvent) -> Action {
        if key.kind != KeyEventKind::Press {
            return Action::None;
        }
        let busy = self.app_state.lock().expect("app state lock").is_busy();

        // Ctrl-C: cancel in-flight work; a second press within the window
        // shuts down.
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            let now = Instant::now();
            let double = self
                .last_ctrl_c
                .is_some_and(|last| now.duration_since(last) < CTRL_C_WINDOW);
            self.last_ctrl_c = Some(now);
            if double {
                return Action::Shutdown;
            }
            return if busy {
                Action::CancelRequest
            } else {
                Action::Redraw
            };
        }

        match (key.modifiers, key.code) {
            (KeyModifiers::CONTROL, KeyCode::Char('d')) if self.editor.is_empty() => {
                Action::Shutdown
            }
            (_, KeyCode::Enter) => Action::Submit,
            (_, KeyCode::BackTab) => {
                // Cycle the ready sub-state; a no-op while busy.
                if !self.options.hotkeys || busy {
                    return Action::None;
                }
                let mut state = self.app_state.lock().expect("app state lock");
                let _ = state.cycle_substate();
                Action::Redraw
            }
            (_, KeyCode::Tab) => {
                if self.options.hotkeys {
                    if let Some(accepted) = self.suggestions.accept() {
                        self.editor.set(&accepted);
                        return Action::Redraw;
                    }
                }
                Action::None
            }
            (_, KeyCode::Up) => {
                if self.suggestions.is_active() {
                    self.suggestions.prev();
                } else {
                    self.editor.history_up();
                    self.suggestions.update(self.editor.buffer());
                }
                Action::Redraw
            }
            (_, KeyCode::Down) => {
                if self.suggestions.is_active() {
                    self.suggestions.next();
                } else {
                    self.editor.history_down();
                    self.suggestions.update(self.editor.buffer());
                }
                Action::Redraw
            }
            (KeyModifiers::CONTROL, KeyCode::Left) => {
                self.editor.word_left();
                Action::Redraw
            }
            (KeyModifiers::CONTROL, KeyCode::Right) => {
                self.editor.word_right();
                Action::Redraw
            }
            (_, KeyCode::Left) => {
                self.editor.left();
                Action::Redraw
            }
            (_, KeyCode::Right) => {
                self.editor.right();
                Action::Redraw
            }
            (_, KeyCode::Home) => {
                self.editor.home();
                Action::Redraw
            }
            (_, KeyCode::End) => {
                self.editor.end();
                Action::Redraw
            }
            (_, KeyCode::Backspace) => {
                self.editor.backspace();
                self.suggestions.update(self.editor.buffer());
                Action::Redraw
            }
            (_, KeyCode::Delete) => {
                self.editor.delete();
                self.suggestions.update(self.editor.buffer());
                Action::Redraw
            }
            (mods, KeyCode::Char(c))
                if mods.is_empty() || mods == KeyModifiers::SHIFT =>
            {
                self.editor.insert(c);
                self.suggestions.update(self.editor.buffer());
                Action::Redraw
            }
            _ => Action::None,
        }
    }

    // ── Submission & rendering ───────────────────────────────────────────────

    fn submit(&mut self, out: &mut impl Write) -> anyhow::Result<()> {
        let line = self.editor.take();
        self.suggestions.update("");
        if line.trim().is_empty() {
            self.draw_prompt(out)?;
            return Ok(());
        }
        // Commit the echoed line.
        execute!(out, Clear(ClearType::FromCursorDown))?;
        write!(out, "\r\n")?;
        let busy = self.app_state.lock().expect("app state lock").is_busy();
        match self
            .queue
            .enqueue(Payload::UserInput { text: line }, Priority::Normal)
        {
            Ok(_) if busy => self.renderer.notice(out, "queued")?,
            Ok(_) => {}
            Err(e) => self.renderer.notice(out, &format!("input dropped: {e}"))?,
        }
        self.draw_prompt(out)?;
        Ok(())
    }

    fn render_message(&mut self, out: &mut impl Write, msg: Message) -> anyhow::Result<()> {
        match msg.payload {
            Payload::Progress { stage, detail } => {
                self.clear_input_line(out)?;
                self.renderer.progress(out, &stage, detail.as_deref())?;
            }
            Payload::PartialResult { text } => {
                if !self.streaming {
                    self.clear_input_line(out)?;
                    self.streaming = true;
                }
                self.renderer.partial(out, &text)?;
            }
            Payload::FinalResult { success, content, .. } => {
                // Streamed text stays on screen; only print the content when
                // it did not already stream, plus the failure notice.
                if self.streaming {
                    self.streaming = false;
                    write!(out, "\r\n")?;
                    if !success {
                        self.renderer.final_result(out, false, &content)?;
                    }
                } else {
                    self.clear_input_line(out)?;
                    self.renderer.final_result(out, success, &content)?;
                }
                self.draw_prompt(out)?;
            }
            Payload::Error {
                category,
                code,
                message,
                context,
            } => {
                if self.streaming {
                    self.streaming = false;
                    write!(out, "\r\n")?;
                } else {
                    self.clear_input_line(out)?;
                }
                self.renderer.error(
                    out,
                    &category,
                    &code,
                    &message,
                    context.as_deref(),
                    self.options.debug,
                )?;
                self.draw_prompt(out)?;
            }
            Payload::StatusResponse { report } => {
                self.clear_input_line(out)?;
                self.renderer.status(out, &report)?;
                self.draw_prompt(out)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn clear_input_line(&self, out: &mut impl Write) -> anyhow::Result<()> {
        execute!(out, cursor::MoveToColumn(0), Clear(ClearType::FromCursorDown))?;
        Ok(())
    }

    /// Repaint the prompt line and (when active) the suggestion panel below
    /// it, leaving the cursor at its position in the edit buffer.
    fn draw_prompt(&mut self, out: &mut impl Write) -> anyhow::Result<()> {
        let state = self.app_state.lock().expect("app state lock").clone();
        execute!(out, cursor::MoveToColumn(0), Clear(ClearType::FromCursorDown))?;
        let prefix = self.renderer.prompt_prefix(&state);
        if prefix.is_empty() {
            // Busy: no input line, output streams freely.
            out.flush()?;
            return Ok(());
        }
        write!(out, "{prefix}{}", self.editor.buffer())?;

        if self.suggestions.is_active() {
            let rows = self.suggestions.rows();
            let rendered: Vec<String> = rows
                .iter()
                .take(5)
                .map(|(name, desc, selected)| {
                    if *selected {
                        format!("[/{name}] {desc}")
                    } else {
                        format!(" /{name}  {desc}")
                    }
                })
                .collect();
            write!(out, "\r\n{}", rendered.join("  "))?;
            execute!(out, cursor::MoveUp(1))?;
        }

        let col = visible_width(&prefix) + self.editor.cursor_col();
        execute!(out, cursor::MoveToColumn(col as u16))?;
        out.flush()?;
        Ok(())
    }
}

/// Display width of `s` with ANSI escape sequences stripped.
fn visible_width(s: &str) -> usize {
    let mut width = 0;
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' {
            // Skip a CSI sequence through its final byte.
            for e in chars.by_ref() {
                if e.is_ascii_alphabetic() {
                    break;
                }
            }
            continue;
        }
        width += UnicodeWidthStr::width(c.to_string().as_str());
    }
    width
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
