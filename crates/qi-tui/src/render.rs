// Copyright (c) 2026 The qi-prompt Authors
//
// SPDX-License-Identifier: MIT
use std::io::{self, Write};

use crossterm::style::Stylize;

use qi_core::AppState;

/// Rendering backend, selectable with `--framework`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framework {
    /// Plain text, no styling — pipeline- and screen-reader-friendly.
    Readline,
    /// Styled output everywhere.
    Rich,
    /// Styled chrome, plain streaming text.  The default.
    Hybrid,
}

impl Framework {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "readline" => Some(Framework::Readline),
            "rich" => Some(Framework::Rich),
            "hybrid" => Some(Framework::Hybrid),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Framework::Readline => "readline",
            Framework::Rich => "rich",
            Framework::Hybrid => "hybrid",
        }
    }
}

/// The rendering contract all backends satisfy; they differ only in visual
/// style.  Raw mode needs explicit `\r\n`, which `line()` takes care of.
pub trait Renderer: Send {
    /// The prompt prefix, reflecting the UI state.
    fn prompt_prefix(&self, state: &AppState) -> String;

    /// One streamed text delta.  Appends without repainting — that is what
    /// keeps streaming flicker-free.
    fn partial(&mut self, out: &mut dyn Write, text: &str) -> io::Result<()>;

    fn final_result(&mut self, out: &mut dyn Write, success: bool, content: &str)
        -> io::Result<()>;

    fn progress(&mut self, out: &mut dyn Write, stage: &str, detail: Option<&str>)
        -> io::Result<()>;

    fn error(
        &mut self,
        out: &mut dyn Write,
        category: &str,
        code: &str,
        message: &str,
        context: Option<&str>,
        debug: bool,
    ) -> io::Result<()>;

    fn status(&mut self, out: &mut dyn Write, report: &str) -> io::Result<()>;

    /// Driver-local notices ("queued", shutdown hints).
    fn notice(&mut self, out: &mut dyn Write, text: &str) -> io::Result<()>;
}

/// Write `text` converting bare newlines for raw mode, with a trailing
/// newline.
fn line(out: &mut dyn Write, text: &str) -> io::Result<()> {
    for part in text.split('\n') {
        out.write_all(part.as_bytes())?;
        out.write_all(b"\r\n")?;
    }
    out.flush()
}

fn stream(out: &mut dyn Write, text: &str) -> io::Result<()> {
    out.write_all(text.replace('\n', "\r\n").as_bytes())?;
    out.flush()
}

// ── Readline (plain) ─────────────────────────────────────────────────────────

pub struct PlainRenderer;

impl Renderer for PlainRenderer {
    fn prompt_prefix(&self, state: &AppState) -> String {
        match state.ready_sub() {
            Some(sub) => format!("qi [{}]> ", sub.as_str()),
            None => String::new(),
        }
    }

    fn partial(&mut self, out: &mut dyn Write, text: &str) -> io::Result<()> {
        stream(out, text)
    }

    fn final_result(
        &mut self,
        out: &mut dyn Write,
        success: bool,
        content: &str,
    ) -> io::Result<()> {
        if !success {
            line(out, &format!("error: {content}"))
        } else if content.is_empty() {
            line(out, "")
        } else {
            line(out, content)
        }
    }

    fn progress(
        &mut self,
        out: &mut dyn Write,
        stage: &str,
        detail: Option<&str>,
    ) -> io::Result<()> {
        match detail {
            Some(d) => line(out, &format!("… {stage} ({d})")),
            None => line(out, &format!("… {stage}")),
        }
    }

    fn error(
        &mut self,
        out: &mut dyn Write,
        category: &str,
        code: &str,
        message: &str,
        context: Option<&str>,
        debug: bool,
    ) -> io::Result<()> {
        line(out, &format!("[{category}] {code}: {message}"))?;
        if debug {
            if let Some(ctx) = context {
                line(out, &format!("  context: {ctx}"))?;
            }
        }
        Ok(())
    }

    fn status(&mut self, out: &mut dyn Write, report: &str) -> io::Result<()> {
        line(out, report)
    }

    fn notice(&mut self, out: &mut dyn Write, text: &str) -> io::Result<()> {
        line(out, &format!("({text})"))
    }
}

// ── Rich ─────────────────────────────────────────────────────────────────────

/// Styled backend.  `styled_stream` controls whether streamed text itself is
/// tinted (rich) or left plain (hybrid).
pub struct RichRenderer {
    styled_stream: bool,
}

impl RichRenderer {
    pub fn new(styled_stream: bool) -> Self {
        Self { styled_stream }
    }
}

impl Renderer for RichRenderer {
    fn prompt_prefix(&self, state: &AppState) -> String {
        match state.ready_sub() {
            Some(sub) => format!("{} {} ", format!("qi[{}]", sub.as_str()).dark_cyan(), "›".bold()),
            None => String::new(),
        }
    }

    fn partial(&mut self, out: &mut dyn Write, text: &str) -> io::Result<()> {
        if self.styled_stream {
            stream(out, &format!("{}", text.dark_green()))
        } else {
            stream(out, text)
        }
    }

    fn final_result(
        &mut self,
        out: &mut dyn Write,
        success: bool,
        content: &str,
    ) -> io::Result<()> {
        if !success {
            return line(out, &format!("{} {content}", "✗".red()));
        }
        if content.is_empty() {
            return line(out, "");
        }
        line(out, content)
    }

    fn progress(
        &mut self,
        out: &mut dyn Write,
        stage: &str,
        detail: Option<&str>,
    ) -> io::Result<()> {
        let tail = detail.map(|d| format!(" ({d})")).unwrap_or_default();
        line(out, &format!("{} {stage}{tail}", "…".dark_yellow()))
    }

    fn error(
        &mut self,
        out: &mut dyn Write,
        category: &str,
        code: &str,
        message: &str,
        context: Option<&str>,
        debug: bool,
    ) -> io::Result<()> {
        let head = format!("[{category}] {code}").red().bold();
        line(out, &format!("{head} {message}"))?;
        if debug {
            if let Some(ctx) = context {
                line(out, &format!("{}", format!("  context: {ctx}").dark_grey()))?;
            }
        }
        Ok(())
    }

    fn status(&mut self, out: &mut dyn Write, report: &str) -> io::Result<()> {
        line(out, &format!("{}", report.dark_cyan()))
    }

    fn notice(&mut self, out: &mut dyn Write, text: &str) -> io::Result<()> {
        line(out, &format!("{}", format!("({text})").dark_grey()))
    }
}

/// Build the backend for a framework selection.
pub fn make_renderer(framework: Framework) -> Box<dyn Renderer> {
    match framework {
        Framework::Readline => Box::new(PlainRenderer),
        Framework::Rich => Box::new(RichRenderer::new(true)),
        Framework::Hybrid => Box::new(RichRenderer::new(false)),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use qi_core::{AppState, ReadySub};

    fn rendered(f: impl FnOnce(&mut Vec<u8>)) -> String {
        let mut buf = Vec::new();
        f(&mut buf);
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn framework_parse_round_trips() {
        for f in [Framework::Readline, Framework::Rich, Framework::Hybrid] {
            assert_eq!(Framework::parse(f.as_str()), Some(f));
        }
        assert_eq!(Framework::parse("curses"), None);
    }

    #[test]
    fn plain_partial_is_verbatim_with_crlf() {
        let out = rendered(|buf| PlainRenderer.partial(buf, "a\nb").unwrap());
        assert_eq!(out, "a\r\nb");
    }

    #[test]
    fn plain_final_failure_is_prefixed() {
        let out = rendered(|buf| PlainRenderer.final_result(buf, false, "nope").unwrap());
        assert!(out.starts_with("error: nope"));
    }

    #[test]
    fn plain_error_hides_context_without_debug() {
        let out = rendered(|buf| {
            PlainRenderer
                .error(buf, "BUSINESS", "X", "msg", Some("secret"), false)
                .unwrap()
        });
        assert!(out.contains("[BUSINESS] X: msg"));
        assert!(!out.contains("secret"));
    }

    #[test]
    fn plain_error_shows_context_with_debug() {
        let out = rendered(|buf| {
            PlainRenderer
                .error(buf, "SYSTEM", "X", "msg", Some("details"), true)
                .unwrap()
        });
        assert!(out.contains("details"));
    }

    #[test]
    fn prompt_prefix_reflects_substate() {
        let plain = PlainRenderer;
        assert_eq!(
            plain.prompt_prefix(&AppState::Ready(ReadySub::Planning)),
            "qi [planning]> "
        );
        // Busy: no prompt line at all.
        let mut busy = AppState::new();
        busy.start_task("x").unwrap();
        assert!(plain.prompt_prefix(&busy).is_empty());
    }

    #[test]
    fn hybrid_streams_plain_text() {
        let out = rendered(|buf| RichRenderer::new(false).partial(buf, "plain").unwrap());
        assert_eq!(out, "plain");
    }

    #[test]
    fn rich_streams_styled_text() {
        let out = rendered(|buf| RichRenderer::new(true).partial(buf, "tinted").unwrap());
        assert!(out.contains("tinted"));
        assert!(out.contains('\u{1b}'), "expected ANSI styling");
    }

    #[test]
    fn all_backends_satisfy_the_same_contract() {
        for framework in [Framework::Readline, Framework::Rich, Framework::Hybrid] {
            let mut renderer = make_renderer(framework);
            let out = rendered(|buf| {
                renderer.progress(buf, "stage", Some("detail")).unwrap();
                renderer.partial(buf, "text").unwrap();
                renderer.final_result(buf, true, "done").unwrap();
                renderer.status(buf, "report").unwrap();
                renderer.notice(buf, "queued").unwrap();
            });
            for needle in ["stage", "text", "done", "report", "queued"] {
                assert!(out.contains(needle), "{framework:?} missing {needle}");
            }
        }
    }
}
