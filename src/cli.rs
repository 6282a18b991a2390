// Copyright (c) 2026 The qi-prompt Authors
//
// SPDX-License-Identifier: MIT
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Interactive AI coding assistant.
///
/// Reads lines from the terminal, classifies each as a command, prompt, or
/// workflow, and routes it through a single-consumer request pipeline.
#[derive(Parser, Debug)]
#[command(name = "qi-prompt", version, about, max_term_width = 100)]
pub struct Cli {
    /// Rendering backend.  Overrides `ui.framework` from the config file.
    #[arg(long, value_enum)]
    pub framework: Option<FrameworkArg>,

    /// Configuration file (YAML).
    #[arg(long = "config-path", value_name = "PATH")]
    pub config_path: PathBuf,

    /// Provider-schema file (YAML) declaring the known provider kinds.
    #[arg(long = "schema-path", value_name = "PATH")]
    pub schema_path: PathBuf,

    /// Environment-variable file (KEY=VALUE lines) loaded before startup.
    #[arg(long = "env-path", value_name = "PATH")]
    pub env_path: Option<PathBuf>,

    /// Verbose diagnostic output (also reveals error context in the UI).
    #[arg(long)]
    pub debug: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FrameworkArg {
    /// Plain line-oriented output.
    Readline,
    /// Styled output everywhere.
    Rich,
    /// Styled chrome with plain streaming text (default).
    Hybrid,
}

impl FrameworkArg {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameworkArg::Readline => "readline",
            FrameworkArg::Rich => "rich",
            FrameworkArg::Hybrid => "hybrid",
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
