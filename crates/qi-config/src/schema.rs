// Copyright (c) 2026 The qi-prompt Authors
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `bool::default()`
/// (i.e. `false`), so fields that should be on by default need a named
/// function.
fn default_true() -> bool {
    true
}

/// Top-level configuration.
///
/// Unknown keys at any level are rejected (`deny_unknown_fields`): a typo in
/// a config file is an error at load time, never a silently ignored setting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Ordered provider definitions.  The order of this list is the fallback
    /// chain: when the active provider fails with a transport-level error the
    /// next enabled entry is tried, once each.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub ui: UiConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ── Providers ────────────────────────────────────────────────────────────────

/// One LLM provider definition.
///
/// ```yaml
/// providers:
///   - name: main
///     type: anthropic
///     models: [claude-sonnet-4-5]
///     api_key_env: ANTHROPIC_API_KEY
///   - name: fallback
///     type: local
///     base_url: http://localhost:11434/v1
///     models: [llama3.2]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Unique name referenced by the `model` / `providers` commands.
    pub name: String,
    /// Provider kind.  Must be declared in the provider schema file;
    /// common values: "anthropic" | "openai" | "local" | "mock".
    #[serde(rename = "type")]
    pub kind: String,
    /// Base URL override.  Required for `local`; optional elsewhere.
    pub base_url: Option<String>,
    /// Models offered by this provider; the first entry is the default.
    #[serde(default)]
    pub models: Vec<String>,
    /// Environment variable holding the API key (read at startup).
    pub api_key_env: Option<String>,
    /// Declared capabilities, matched against the provider schema.
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Maximum tokens to request in a single completion.
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0–2.0).
    pub temperature: Option<f32>,
}

// ── Classifier ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassifierConfig {
    /// Method preference order.  The first available method that meets the
    /// confidence threshold wins; later entries are fallbacks.
    /// Values: "rule-based" | "llm-direct" | "hybrid".
    #[serde(default = "default_method_priority")]
    pub method_priority: Vec<String>,
    /// Weighted workflow score above which input is classified as a workflow.
    #[serde(default = "default_workflow_threshold")]
    pub workflow_threshold: f64,
    /// When workflow and prompt scores are within this margin, prompt wins
    /// (no tool execution on an ambiguous read).
    #[serde(default = "default_tie_margin")]
    pub tie_margin: f64,
    /// Deadline for model-backed classification methods; on expiry the
    /// rule-based result is returned instead.
    #[serde(default = "default_llm_timeout_ms")]
    pub llm_timeout_ms: u64,
    /// Indicator weights for the rule-based scorer.  Defaults follow the
    /// shipped calibration; override per-installation when tuning.
    #[serde(default)]
    pub weights: ClassifierWeights,
}

fn default_method_priority() -> Vec<String> {
    vec!["rule-based".into()]
}
fn default_workflow_threshold() -> f64 {
    0.7
}
fn default_tie_margin() -> f64 {
    0.05
}
fn default_llm_timeout_ms() -> u64 {
    1500
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            method_priority: default_method_priority(),
            workflow_threshold: default_workflow_threshold(),
            tie_margin: default_tie_margin(),
            llm_timeout_ms: default_llm_timeout_ms(),
            weights: ClassifierWeights::default(),
        }
    }
}

/// Per-indicator weights for the rule-based workflow scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassifierWeights {
    /// Multi-step connectives: "then", "after that", "and then", "finally".
    #[serde(default = "default_w_connective")]
    pub connective: f64,
    /// Imperative tool verbs: "read", "write", "run", "create", "delete"...
    #[serde(default = "default_w_tool_verb")]
    pub tool_verb: f64,
    /// Tokens that look like file names (known source extensions).
    #[serde(default = "default_w_file_ext")]
    pub file_extension: f64,
    /// `@path` file-reference sigils.
    #[serde(default = "default_w_path_sigil")]
    pub path_sigil: f64,
    /// Quoted argument spans.
    #[serde(default = "default_w_quoted")]
    pub quoted_span: f64,
    /// Word count above `long_input_words`.
    #[serde(default = "default_w_long_input")]
    pub long_input: f64,
    #[serde(default = "default_long_input_words")]
    pub long_input_words: usize,
}

fn default_w_connective() -> f64 {
    0.30
}
fn default_w_tool_verb() -> f64 {
    0.25
}
fn default_w_file_ext() -> f64 {
    0.15
}
fn default_w_path_sigil() -> f64 {
    0.10
}
fn default_w_quoted() -> f64 {
    0.10
}
fn default_w_long_input() -> f64 {
    0.10
}
fn default_long_input_words() -> usize {
    12
}

impl Default for ClassifierWeights {
    fn default() -> Self {
        Self {
            connective: default_w_connective(),
            tool_verb: default_w_tool_verb(),
            file_extension: default_w_file_ext(),
            path_sigil: default_w_path_sigil(),
            quoted_span: default_w_quoted(),
            long_input: default_w_long_input(),
            long_input_words: default_long_input_words(),
        }
    }
}

// ── Workflow ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowConfig {
    /// Cap on concurrent tool invocations within one workflow execution.
    #[serde(default = "default_max_concurrent_tools")]
    pub max_concurrent_tools: usize,
    /// Per-node execution deadline.
    #[serde(default = "default_node_timeout_ms")]
    pub node_timeout_ms: u64,
    /// How many tighter-prompt retries extraction gets before falling back
    /// to the rule-based skeleton.
    #[serde(default = "default_extraction_retries")]
    pub extraction_retries: u32,
    /// Size of the compiled-plan cache (keyed by structural hash).
    #[serde(default = "default_plan_cache_size")]
    pub plan_cache_size: usize,
}

fn default_max_concurrent_tools() -> usize {
    10
}
fn default_node_timeout_ms() -> u64 {
    30_000
}
fn default_extraction_retries() -> u32 {
    1
}
fn default_plan_cache_size() -> usize {
    32
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tools: default_max_concurrent_tools(),
            node_timeout_ms: default_node_timeout_ms(),
            extraction_retries: default_extraction_retries(),
            plan_cache_size: default_plan_cache_size(),
        }
    }
}

// ── UI ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UiConfig {
    /// Default rendering backend; overridden by `--framework`.
    /// Values: "readline" | "rich" | "hybrid".
    #[serde(default = "default_framework")]
    pub framework: String,
    /// Disable to ignore Shift-Tab / Tab shortcuts (plain line entry only).
    #[serde(default = "default_true")]
    pub hotkeys: bool,
}

fn default_framework() -> String {
    "hybrid".into()
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            framework: default_framework(),
            hotkeys: true,
        }
    }
}

// ── Session ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Directory holding one snapshot file per session.
    /// Defaults to `$XDG_DATA_HOME/qi-prompt/sessions`.
    pub snapshot_dir: Option<String>,
    /// Seconds between automatic session snapshots.
    #[serde(default = "default_autosave_secs")]
    pub autosave_interval_secs: u64,
    /// Optional snapshot retention; snapshots older than this are pruned at
    /// startup.  `None` keeps everything.
    pub ttl_secs: Option<u64>,
}

fn default_autosave_secs() -> u64 {
    30
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            snapshot_dir: None,
            autosave_interval_secs: default_autosave_secs(),
            ttl_secs: None,
        }
    }
}

// ── Logging ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level filter: "error" | "warn" | "info" | "debug" | "trace".
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Human-oriented multi-line output instead of compact single lines.
    #[serde(default)]
    pub pretty: bool,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            pretty: false,
        }
    }
}

// ── Provider schema ──────────────────────────────────────────────────────────

/// The provider-schema document (`--schema-path`): declares which provider
/// kinds exist and what each requires.  Configured providers are validated
/// against this at startup; a provider whose `type` is absent here fails
/// closed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderSchema {
    #[serde(default = "default_schema_version")]
    pub version: u32,
    /// Keyed by provider kind ("anthropic", "openai", "local", "mock"...).
    #[serde(default)]
    pub kinds: std::collections::BTreeMap<String, ProviderKindSchema>,
}

fn default_schema_version() -> u32 {
    1
}

/// Static capability descriptor for one provider kind.  Replaces runtime
/// reflection: the closed set of kinds is enumerated at config load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderKindSchema {
    /// "local" or "remote".
    #[serde(default = "default_locality")]
    pub locality: String,
    /// Whether providers of this kind must carry an `api_key_env`.
    #[serde(default)]
    pub requires_api_key: bool,
    /// Whether providers of this kind must carry a `base_url`.
    #[serde(default)]
    pub requires_base_url: bool,
    /// Capabilities every provider of this kind is assumed to have.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

fn default_locality() -> String {
    "remote".into()
}

impl ProviderSchema {
    /// Validate one provider definition against this schema.
    pub fn validate_provider(&self, p: &ProviderConfig) -> Result<(), String> {
        let Some(kind) = self.kinds.get(&p.kind) else {
            return Err(format!(
                "provider '{}' has unknown type '{}' (schema declares: {})",
                p.name,
                p.kind,
                self.kinds.keys().cloned().collect::<Vec<_>>().join(", ")
            ));
        };
        if kind.requires_api_key && p.api_key_env.is_none() {
            return Err(format!(
                "provider '{}' (type '{}') requires api_key_env",
                p.name, p.kind
            ));
        }
        if kind.requires_base_url && p.base_url.is_none() {
            return Err(format!(
                "provider '{}' (type '{}') requires base_url",
                p.name, p.kind
            ));
        }
        if p.models.is_empty() {
            return Err(format!("provider '{}' declares no models", p.name));
        }
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
