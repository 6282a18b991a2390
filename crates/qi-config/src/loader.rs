// Copyright (c) 2026 The qi-prompt Authors
//
// SPDX-License-Identifier: MIT
use std::path::Path;

use tracing::debug;

use crate::{Config, ProviderSchema};

/// Errors surfaced while loading configuration.  All variants carry the
/// `INVALID_CONFIG` category when rendered to the user.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(String),
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config in {path}: {message}")]
    Invalid { path: String, message: String },
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        "INVALID_CONFIG"
    }
}

/// Load and validate the main configuration file.
///
/// Environment overrides (`QI_*`) apply after the file parse, so a deployment
/// can pin individual settings without editing the file:
///
/// - `QI_LOG_LEVEL` → `logging.level`
/// - `QI_UI_FRAMEWORK` → `ui.framework`
/// - `QI_SNAPSHOT_DIR` → `session.snapshot_dir`
/// - `QI_WORKFLOW_MAX_TOOLS` → `workflow.max_concurrent_tools`
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let text = read(path)?;
    let mut config: Config =
        serde_yaml::from_str(&text).map_err(|e| ConfigError::Invalid {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
    apply_env_overrides(&mut config);
    validate(&config).map_err(|message| ConfigError::Invalid {
        path: path.display().to_string(),
        message,
    })?;
    debug!(path = %path.display(), providers = config.providers.len(), "config loaded");
    Ok(config)
}

/// Load and parse the provider-schema document (`--schema-path`).
pub fn load_provider_schema(path: &Path) -> Result<ProviderSchema, ConfigError> {
    let text = read(path)?;
    let schema: ProviderSchema =
        serde_yaml::from_str(&text).map_err(|e| ConfigError::Invalid {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
    if schema.kinds.is_empty() {
        return Err(ConfigError::Invalid {
            path: path.display().to_string(),
            message: "provider schema declares no kinds".into(),
        });
    }
    Ok(schema)
}

fn read(path: &Path) -> Result<String, ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::NotFound(path.display().to_string()));
    }
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(v) = std::env::var("QI_LOG_LEVEL") {
        config.logging.level = v;
    }
    if let Ok(v) = std::env::var("QI_UI_FRAMEWORK") {
        config.ui.framework = v;
    }
    if let Ok(v) = std::env::var("QI_SNAPSHOT_DIR") {
        config.session.snapshot_dir = Some(v);
    }
    if let Ok(v) = std::env::var("QI_WORKFLOW_MAX_TOOLS") {
        if let Ok(n) = v.parse::<usize>() {
            config.workflow.max_concurrent_tools = n;
        }
    }
}

/// Structural checks that serde cannot express.
fn validate(config: &Config) -> Result<(), String> {
    if !(0.0..=1.0).contains(&config.classifier.workflow_threshold) {
        return Err(format!(
            "classifier.workflow_threshold must be in [0,1], got {}",
            config.classifier.workflow_threshold
        ));
    }
    if config.workflow.max_concurrent_tools == 0 {
        return Err("workflow.max_concurrent_tools must be at least 1".into());
    }
    match config.ui.framework.as_str() {
        "readline" | "rich" | "hybrid" => {}
        other => return Err(format!("ui.framework '{other}' is not a known backend")),
    }
    let mut names = std::collections::HashSet::new();
    for p in &config.providers {
        if !names.insert(p.name.as_str()) {
            return Err(format!("duplicate provider name '{}'", p.name));
        }
    }
    for m in &config.classifier.method_priority {
        match m.as_str() {
            "rule-based" | "llm-direct" | "hybrid" => {}
            other => {
                return Err(format!("classifier.method_priority '{other}' is not a method"))
            }
        }
    }
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
