// Copyright (c) 2026 The qi-prompt Authors
//
// SPDX-License-Identifier: Apache-2.0
use qi_config::ConfigError;
use qi_model::ModelError;
use qi_queue::QueueError;
use qi_tools::ToolError;
use qi_workflow::{ExtractError, SpecError};

/// Error taxonomy.  Categories steer rendering and recovery, not types:
/// every failure that crosses the orchestrator boundary carries one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad user input, bad config, bad workflow spec.  Never fatal.
    Validation,
    /// Semantic failure in a handler; ends the request, session intact.
    Business,
    /// Infrastructure broke; may end the session, not always the process.
    System,
    /// A tool or provider rejected credentials or policy.
    Authorization,
    /// Cooperative cancellation; terminal but not an error to the user.
    Cancelled,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "VALIDATION",
            ErrorCategory::Business => "BUSINESS",
            ErrorCategory::System => "SYSTEM",
            ErrorCategory::Authorization => "AUTHORIZATION",
            ErrorCategory::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The uniform failure carrier.  Handlers return these; only the
/// orchestrator turns them into `Error` messages on the queue.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct QiError {
    pub category: ErrorCategory,
    /// Stable machine-readable code ("QUEUE_CLOSED", "EXTRACTION_FAILED"...).
    pub code: String,
    pub message: String,
    /// Diagnostic context rendered only under `--debug`.
    pub context: Option<String>,
}

impl QiError {
    pub fn new(
        category: ErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorCategory::Cancelled, "CANCELLED", "request cancelled")
    }

    pub fn validation(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Validation, code, message)
    }

    pub fn business(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Business, code, message)
    }

    pub fn system(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::System, code, message)
    }
}

impl From<QueueError> for QiError {
    fn from(e: QueueError) -> Self {
        // Queue invariant violations are loud SYSTEM failures with enough
        // context to diagnose, per the propagation policy.
        Self::new(ErrorCategory::System, e.code(), e.to_string())
    }
}

impl From<ModelError> for QiError {
    fn from(e: ModelError) -> Self {
        let category = match &e {
            ModelError::Auth { .. } => ErrorCategory::Authorization,
            ModelError::Transport { .. } | ModelError::Unavailable { .. } => ErrorCategory::System,
            ModelError::UnknownProvider(_) | ModelError::NoneEnabled => ErrorCategory::Validation,
            ModelError::Overloaded { .. }
            | ModelError::InvalidResponse { .. }
            | ModelError::Exhausted { .. } => ErrorCategory::Business,
        };
        Self::new(category, e.code(), e.to_string())
    }
}

impl From<ConfigError> for QiError {
    fn from(e: ConfigError) -> Self {
        Self::new(ErrorCategory::Validation, e.code(), e.to_string())
    }
}

impl From<SpecError> for QiError {
    fn from(e: SpecError) -> Self {
        Self::new(ErrorCategory::Validation, e.code(), e.to_string())
    }
}

impl From<ExtractError> for QiError {
    fn from(e: ExtractError) -> Self {
        Self::new(ErrorCategory::Business, e.code(), e.to_string())
    }
}

impl From<ToolError> for QiError {
    fn from(e: ToolError) -> Self {
        Self::new(ErrorCategory::Business, e.code(), e.to_string())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_errors_map_to_system() {
        let e: QiError = QueueError::Closed.into();
        assert_eq!(e.category, ErrorCategory::System);
        assert_eq!(e.code, "QUEUE_CLOSED");
    }

    #[test]
    fn auth_model_errors_map_to_authorization() {
        let e: QiError = ModelError::Auth {
            provider: "p".into(),
            message: "401".into(),
        }
        .into();
        assert_eq!(e.category, ErrorCategory::Authorization);
    }

    #[test]
    fn exhausted_maps_to_business_with_stable_code() {
        let e: QiError = ModelError::Exhausted { tried: vec![] }.into();
        assert_eq!(e.category, ErrorCategory::Business);
        assert_eq!(e.code, "ALL_PROVIDERS_EXHAUSTED");
    }

    #[test]
    fn spec_errors_map_to_validation() {
        let e: QiError = SpecError::Cycle.into();
        assert_eq!(e.category, ErrorCategory::Validation);
        assert_eq!(e.code, "INVALID_WORKFLOW_SPEC");
    }

    #[test]
    fn cancelled_is_its_own_category() {
        let e = QiError::cancelled();
        assert_eq!(e.category, ErrorCategory::Cancelled);
        assert_eq!(e.category.as_str(), "CANCELLED");
    }

    #[test]
    fn display_is_code_then_message() {
        let e = QiError::business("SOME_CODE", "went sideways");
        assert_eq!(e.to_string(), "SOME_CODE: went sideways");
    }
}
