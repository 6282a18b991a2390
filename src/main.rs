// Copyright (c) 2026 The qi-prompt Authors
//
// SPDX-License-Identifier: MIT
mod cli;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::Cli;
use qi_classifier::Classifier;
use qi_core::{builtin_registry, shared_app_state, Orchestrator};
use qi_model::ProviderRegistry;
use qi_queue::MessageQueue;
use qi_session::StateStore;
use qi_tools::{ToolProvider, ToolRegistry};
use qi_tui::{Driver, DriverOptions, Framework, SuggestionItem};
use qi_workflow::{EngineConfig, Extractor, WorkflowEngine};

/// Exit code for bad arguments or missing required files (clap uses the
/// same code for its own parse failures).
const EXIT_USAGE: i32 = 2;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(env_path) = &cli.env_path {
        if let Err(e) = load_env_file(env_path) {
            eprintln!("qi-prompt: {e}");
            std::process::exit(EXIT_USAGE);
        }
    }

    let config = match qi_config::load(&cli.config_path) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("qi-prompt: {e}");
            std::process::exit(EXIT_USAGE);
        }
    };

    // Writing to stderr corrupts the raw-mode display, so tracing output is
    // suppressed in the TUI unless the caller opts in: QI_LOG_FILE writes to
    // that file, --debug writes to stderr.
    init_logging(cli.debug, &config.logging);

    let schema = match qi_config::load_provider_schema(&cli.schema_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("qi-prompt: {e}");
            std::process::exit(EXIT_USAGE);
        }
    };
    let providers = match ProviderRegistry::from_config(&config, &schema) {
        Ok(p) => Arc::new(p),
        Err(e) => {
            eprintln!("qi-prompt: {e:#}");
            std::process::exit(EXIT_USAGE);
        }
    };

    let framework = cli
        .framework
        .map(|f| f.as_str().to_string())
        .unwrap_or_else(|| config.ui.framework.clone());
    let framework = Framework::parse(&framework)
        .with_context(|| format!("unknown framework '{framework}'"))?;

    let workspace_root = std::env::current_dir().context("resolving working directory")?;
    let queue = Arc::new(MessageQueue::new());
    let tools: Arc<dyn ToolProvider> = Arc::new(ToolRegistry::with_builtins());
    let sessions = Arc::new(StateStore::new(&config.session)?);
    let app_state = shared_app_state();
    let commands = Arc::new(builtin_registry());

    // Best-effort restore of the most recent session; prune stale snapshots
    // when a retention TTL is configured.
    if let Some(ttl) = config.session.ttl_secs {
        match sessions.prune_older_than(Duration::from_secs(ttl)) {
            Ok(n) if n > 0 => info!(pruned = n, "stale session snapshots removed"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "snapshot pruning failed"),
        }
    }
    let history = match sessions.restore_latest() {
        Ok(Some(state)) => {
            info!(session = %state.id, "session restored from snapshot");
            state.user_inputs()
        }
        Ok(None) => Vec::new(),
        Err(e) => {
            warn!(error = %e, "session restore failed, starting fresh");
            Vec::new()
        }
    };

    let classifier = Classifier::with_models(config.classifier.clone(), providers.clone());
    let engine = Arc::new(WorkflowEngine::new(
        tools.clone(),
        Some(providers.clone()),
        EngineConfig::from(&config.workflow),
    ));
    let extractor = Extractor::new(Some(providers.clone()), config.workflow.extraction_retries);

    let orchestrator = Arc::new(Orchestrator::new(
        queue.clone(),
        classifier,
        commands.clone(),
        providers,
        engine,
        extractor,
        sessions.clone(),
        tools,
        app_state.clone(),
        workspace_root,
    ));
    let orchestrator_task = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.run().await }
    });

    let autosnapshot = StateStore::spawn_autosnapshot(
        sessions.clone(),
        Duration::from_secs(config.session.autosave_interval_secs.max(1)),
    );

    let suggestions: Vec<SuggestionItem> = commands
        .specs()
        .into_iter()
        .map(|s| SuggestionItem {
            name: s.name,
            description: s.description,
        })
        .collect();
    let mut driver = Driver::new(
        queue.clone(),
        app_state,
        suggestions,
        history,
        DriverOptions {
            framework,
            debug: cli.debug,
            hotkeys: config.ui.hotkeys,
        },
    );

    let run_result = driver.run().await;

    // Graceful shutdown: stop the pipeline, snapshot the session.
    queue.destroy();
    autosnapshot.abort();
    if let Err(e) = sessions.persist_current() {
        warn!(error = %e, "final session snapshot failed");
    }
    match orchestrator_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "orchestrator ended with error"),
        Err(e) => warn!(error = %e, "orchestrator task panicked"),
    }

    run_result
}

fn init_logging(debug: bool, logging: &qi_config::LoggingConfig) {
    // Tracing written to stderr corrupts the raw-mode display, so logging is
    // suppressed unless the caller opts in:
    //   • QI_LOG_FILE=/path/to/file → logs go to that file
    //   • RUST_LOG=...              → respects the env filter
    //   • --debug                   → stderr (accepting some display noise)
    let level = if debug { "debug" } else { logging.level.as_str() };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    if let Ok(path) = std::env::var("QI_LOG_FILE") {
        use std::sync::Mutex;
        if let Ok(file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
        {
            let layer = fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .with_writer(Mutex::new(file));
            let _ = if logging.pretty {
                tracing_subscriber::registry()
                    .with(layer.pretty())
                    .with(filter)
                    .try_init()
            } else {
                tracing_subscriber::registry().with(layer).with(filter).try_init()
            };
            return;
        }
    }
    if debug {
        let _ = tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .try_init();
        return;
    }
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::filter::LevelFilter::OFF)
        .try_init();
}

/// Load a KEY=VALUE file into the process environment.  Lines starting with
/// `#` and blank lines are skipped; existing variables are not overwritten.
fn load_env_file(path: &Path) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading env file {}", path.display()))?;
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            anyhow::bail!(
                "invalid env file {} line {}: expected KEY=VALUE",
                path.display(),
                lineno + 1
            );
        };
        let key = key.trim();
        let value = value.trim().trim_matches('"');
        if std::env::var_os(key).is_none() {
            std::env::set_var(key, value);
        }
    }
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn env_file_sets_missing_variables() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "# comment\nQI_TEST_ENV_A=hello\n\nQI_TEST_ENV_B=\"quoted\"").unwrap();
        load_env_file(f.path()).unwrap();
        assert_eq!(std::env::var("QI_TEST_ENV_A").unwrap(), "hello");
        assert_eq!(std::env::var("QI_TEST_ENV_B").unwrap(), "quoted");
        std::env::remove_var("QI_TEST_ENV_A");
        std::env::remove_var("QI_TEST_ENV_B");
    }

    #[test]
    fn env_file_does_not_overwrite_existing() {
        std::env::set_var("QI_TEST_ENV_KEEP", "original");
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "QI_TEST_ENV_KEEP=overwritten").unwrap();
        load_env_file(f.path()).unwrap();
        assert_eq!(std::env::var("QI_TEST_ENV_KEEP").unwrap(), "original");
        std::env::remove_var("QI_TEST_ENV_KEEP");
    }

    #[test]
    fn env_file_rejects_malformed_lines() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "NOT A PAIR").unwrap();
        assert!(load_env_file(f.path()).is_err());
    }

    #[test]
    fn missing_env_file_is_an_error() {
        assert!(load_env_file(Path::new("/tmp/qi_no_such_env_file")).is_err());
    }
}
