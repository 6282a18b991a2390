// Copyright (c) 2026 The qi-prompt Authors
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde_json::json;
use tracing::debug;

use qi_model::ProviderRegistry;
use qi_queue::MessageQueue;
use qi_session::StateStore;
use qi_tools::ToolProvider;

use crate::{ErrorCategory, QiError};

/// Uniform command outcome.  An unknown command is a `success = false`
/// result, never an error.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub success: bool,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

impl CommandResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
        }
    }

    pub fn ok_with_data(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

/// Command metadata and argument bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: String,
    pub description: String,
    pub category: String,
    pub usage: String,
    pub min_args: usize,
    pub max_args: Option<usize>,
}

impl CommandSpec {
    pub fn new(name: &str, description: &str, category: &str, usage: &str) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            category: category.into(),
            usage: usage.into(),
            min_args: 0,
            max_args: None,
        }
    }

    pub fn args(mut self, min: usize, max: Option<usize>) -> Self {
        self.min_args = min;
        self.max_args = max;
        self
    }
}

/// Everything a command handler may reach.  Built per invocation by the
/// orchestrator.
#[derive(Clone)]
pub struct CommandContext {
    pub providers: Arc<ProviderRegistry>,
    pub tools: Arc<dyn ToolProvider>,
    pub sessions: Arc<StateStore>,
    pub queue: Arc<MessageQueue>,
    pub workspace_root: PathBuf,
    /// Snapshot of registered command specs (for `help`).
    pub specs: Vec<CommandSpec>,
    /// One-line pipeline status supplied by the orchestrator (for `status`).
    pub status_line: String,
}

/// Boxed async command handler.  Clone the `Arc` to re-register the same
/// handler idempotently.
pub type Handler =
    Arc<dyn Fn(CommandContext, Vec<String>) -> BoxFuture<'static, CommandResult> + Send + Sync>;

struct Registered {
    spec: CommandSpec,
    handler: Handler,
}

/// Built-in and app-registered commands, keyed by name.
pub struct CommandRegistry {
    commands: Mutex<HashMap<String, Registered>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            commands: Mutex::new(HashMap::new()),
        }
    }

    /// Register a command.  Idempotent for the same (spec, handler) pair;
    /// a different handler or signature under an existing name fails with
    /// `COMMAND_CONFLICT` and leaves the original intact.
    pub fn register(&self, spec: CommandSpec, handler: Handler) -> Result<(), QiError> {
        let mut commands = self.commands.lock().expect("command registry lock");
        if let Some(existing) = commands.get(&spec.name) {
            if existing.spec == spec && Arc::ptr_eq(&existing.handler, &handler) {
                return Ok(());
            }
            return Err(QiError::new(
                ErrorCategory::Validation,
                "COMMAND_CONFLICT",
                format!("command '{}' is already registered with a different signature", spec.name),
            ));
        }
        debug!(command = %spec.name, "command registered");
        commands.insert(spec.name.clone(), Registered { spec, handler });
        Ok(())
    }

    pub fn specs(&self) -> Vec<CommandSpec> {
        let mut specs: Vec<CommandSpec> = self
            .commands
            .lock()
            .expect("command registry lock")
            .values()
            .map(|r| r.spec.clone())
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Find, validate, and invoke.  Every failure mode is a `CommandResult`.
    pub async fn execute(
        &self,
        name: &str,
        argv: Vec<String>,
        ctx: CommandContext,
    ) -> CommandResult {
        let (spec, handler) = {
            let commands = self.commands.lock().expect("command registry lock");
            match commands.get(name) {
                Some(r) => (r.spec.clone(), r.handler.clone()),
                None => return CommandResult::fail("unknown command"),
            }
        };
        if argv.len() < spec.min_args || spec.max_args.is_some_and(|max| argv.len() > max) {
            return CommandResult::fail(format!("usage: {}", spec.usage));
        }
        handler(ctx, argv).await
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Wrap a closure as a [`Handler`].
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(CommandContext, Vec<String>) -> BoxFuture<'static, CommandResult>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

/// The minimum built-in command set.  Registration stays open to the
/// application layer on top of these.
pub fn builtin_registry() -> CommandRegistry {
    let registry = CommandRegistry::new();

    registry
        .register(
            CommandSpec::new("help", "List available commands", "general", "/help"),
            handler(|ctx, _argv| {
                Box::pin(async move {
                    let mut lines = vec!["help — available commands:".to_string()];
                    let mut category = String::new();
                    for spec in &ctx.specs {
                        if spec.category != category {
                            category = spec.category.clone();
                            lines.push(format!("[{category}]"));
                        }
                        lines.push(format!("  /{:<10} {}", spec.name, spec.description));
                    }
                    CommandResult::ok(lines.join("\n"))
                })
            }),
        )
        .expect("builtin registration");

    registry
        .register(
            CommandSpec::new("status", "Show pipeline and session status", "general", "/status"),
            handler(|ctx, _argv| {
                Box::pin(async move {
                    let session = ctx.sessions.current();
                    let stats = ctx.queue.stats();
                    let report = format!(
                        "{}\nsession {} ({} entries)\nprovider {} (model {})\nqueue: {} enqueued, {} dequeued, {} expired, {} cancelled",
                        ctx.status_line,
                        session.id,
                        session.entries().len(),
                        ctx.providers.active_name(),
                        ctx.providers.active_model(),
                        stats.enqueued,
                        stats.dequeued,
                        stats.expired,
                        stats.cancelled,
                    );
                    CommandResult::ok(report)
                })
            }),
        )
        .expect("builtin registration");

    registry
        .register(
            CommandSpec::new("model", "Show or switch the active model", "providers", "/model [name]")
                .args(0, Some(1)),
            handler(|ctx, argv| {
                Box::pin(async move {
                    match argv.first() {
                        None => CommandResult::ok(format!(
                            "active model: {} (provider {})",
                            ctx.providers.active_model(),
                            ctx.providers.active_name()
                        )),
                        Some(model) => match ctx.providers.set_model(model) {
                            Ok(()) => CommandResult::ok(format!("model switched to {model}")),
                            Err(e) => CommandResult::fail(e.to_string()),
                        },
                    }
                })
            }),
        )
        .expect("builtin registration");

    registry
        .register(
            CommandSpec::new(
                "providers",
                "List providers or switch the active one",
                "providers",
                "/providers [name]",
            )
            .args(0, Some(1)),
            handler(|ctx, argv| {
                Box::pin(async move {
                    if let Some(name) = argv.first() {
                        return match ctx.providers.set_active(name) {
                            Ok(()) => CommandResult::ok(format!("active provider: {name}")),
                            Err(e) => CommandResult::fail(e.to_string()),
                        };
                    }
                    let lines: Vec<String> = ctx
                        .providers
                        .available()
                        .iter()
                        .map(|p| {
                            format!(
                                "{} {} ({}) models: {}",
                                if p.active { "*" } else { " " },
                                p.name,
                                p.kind,
                                p.models.join(", ")
                            )
                        })
                        .collect();
                    CommandResult::ok(format!("providers:\n{}", lines.join("\n")))
                })
            }),
        )
        .expect("builtin registration");

    registry
        .register(
            CommandSpec::new("tools", "List available tools", "tools", "/tools"),
            handler(|ctx, _argv| {
                Box::pin(async move {
                    let tools = ctx.tools.list_available_tools();
                    if tools.is_empty() {
                        return CommandResult::ok("no tools available");
                    }
                    let lines: Vec<String> = tools
                        .iter()
                        .map(|t| format!("{:<12} [{}] {}", t.name, t.category, t.description))
                        .collect();
                    CommandResult::ok(format!("tools:\n{}", lines.join("\n")))
                })
            }),
        )
        .expect("builtin registration");

    registry
        .register(
            CommandSpec::new("workflows", "Show the active workflow", "workflow", "/workflows"),
            handler(|ctx, _argv| {
                Box::pin(async move {
                    let session = ctx.sessions.current();
                    match &session.active_workflow {
                        Some(spec) => CommandResult::ok_with_data(
                            format!(
                                "active workflow '{}': {} nodes, {} edges",
                                spec.name,
                                spec.nodes.len(),
                                spec.edges.len()
                            ),
                            json!({ "workflow": spec }),
                        ),
                        None => CommandResult::ok("no active workflow"),
                    }
                })
            }),
        )
        .expect("builtin registration");

    registry
        .register(
            CommandSpec::new("files", "List active file references", "context", "/files"),
            handler(|ctx, _argv| {
                Box::pin(async move {
                    let refs = ctx.sessions.current().file_refs;
                    if refs.is_empty() {
                        CommandResult::ok("no active file references")
                    } else {
                        CommandResult::ok(format!("file references:\n{}", refs.join("\n")))
                    }
                })
            }),
        )
        .expect("builtin registration");

    registry
        .register(
            CommandSpec::new("project", "Show the project structure", "context", "/project"),
            handler(|ctx, _argv| {
                Box::pin(async move {
                    let tree = qi_context::capture_structure(&ctx.workspace_root, 3, 200);
                    if tree.is_empty() {
                        CommandResult::ok("project directory is empty")
                    } else {
                        CommandResult::ok(format!("project structure:\n{tree}"))
                    }
                })
            }),
        )
        .expect("builtin registration");

    registry
        .register(
            CommandSpec::new(
                "session",
                "Manage session snapshots (list, save, reset)",
                "session",
                "/session [list|save|reset]",
            )
            .args(0, Some(1)),
            handler(|ctx, argv| {
                Box::pin(async move {
                    match argv.first().map(String::as_str) {
                        None | Some("list") => match ctx.sessions.list() {
                            Ok(list) if list.is_empty() => CommandResult::ok("no saved sessions"),
                            Ok(list) => {
                                let lines: Vec<String> = list
                                    .iter()
                                    .map(|s| {
                                        format!(
                                            "{} ({} entries, last active {})",
                                            s.id,
                                            s.entries,
                                            s.last_active.format("%Y-%m-%d %H:%M:%S")
                                        )
                                    })
                                    .collect();
                                CommandResult::ok(format!("sessions:\n{}", lines.join("\n")))
                            }
                            Err(e) => CommandResult::fail(format!("listing sessions: {e}")),
                        },
                        Some("save") => match ctx.sessions.persist_current() {
                            Ok(path) => {
                                CommandResult::ok(format!("session saved to {}", path.display()))
                            }
                            Err(e) => CommandResult::fail(format!("saving session: {e}")),
                        },
                        Some("reset") => {
                            let old = ctx.sessions.reset();
                            CommandResult::ok(format!(
                                "session {} destroyed; started {}",
                                old.id,
                                ctx.sessions.current_id()
                            ))
                        }
                        Some(other) => CommandResult::fail(format!("unknown action '{other}'")),
                    }
                })
            }),
        )
        .expect("builtin registration");

    registry
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
