// Copyright (c) 2026 The qi-prompt Authors
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

/// Sub-state available while ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadySub {
    Planning,
    Editing,
    Generic,
}

impl ReadySub {
    /// planning → editing → generic → planning
    pub fn next(self) -> Self {
        match self {
            ReadySub::Planning => ReadySub::Editing,
            ReadySub::Editing => ReadySub::Generic,
            ReadySub::Generic => ReadySub::Planning,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReadySub::Planning => "planning",
            ReadySub::Editing => "editing",
            ReadySub::Generic => "generic",
        }
    }
}

/// The hierarchical UI state.  Busy means exactly one request is in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppState {
    Busy {
        task: String,
        since: DateTime<Utc>,
    },
    Ready(ReadySub),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("a task is already in flight")]
    AlreadyBusy,
    #[error("no task is in flight")]
    NotBusy,
    #[error("sub-state cycling is only legal while ready")]
    BusyNoCycle,
}

impl AppState {
    /// Initial state: ready.generic.
    pub fn new() -> Self {
        AppState::Ready(ReadySub::Generic)
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, AppState::Busy { .. })
    }

    pub fn ready_sub(&self) -> Option<ReadySub> {
        match self {
            AppState::Ready(sub) => Some(*sub),
            AppState::Busy { .. } => None,
        }
    }

    /// START_TASK: any ready sub-state → busy.
    pub fn start_task(&mut self, task: impl Into<String>) -> Result<(), StateError> {
        match self {
            AppState::Busy { .. } => Err(StateError::AlreadyBusy),
            AppState::Ready(_) => {
                *self = AppState::Busy {
                    task: task.into(),
                    since: Utc::now(),
                };
                Ok(())
            }
        }
    }

    /// TASK_COMPLETE: busy → ready.generic.
    pub fn task_complete(&mut self) -> Result<(), StateError> {
        self.finish()
    }

    /// TASK_ERROR: busy → ready.generic.
    pub fn task_error(&mut self) -> Result<(), StateError> {
        self.finish()
    }

    fn finish(&mut self) -> Result<(), StateError> {
        match self {
            AppState::Busy { .. } => {
                *self = AppState::Ready(ReadySub::Generic);
                Ok(())
            }
            AppState::Ready(_) => Err(StateError::NotBusy),
        }
    }

    /// CYCLE_SUBSTATE: only legal while ready.
    pub fn cycle_substate(&mut self) -> Result<ReadySub, StateError> {
        match self {
            AppState::Busy { .. } => Err(StateError::BusyNoCycle),
            AppState::Ready(sub) => {
                let next = sub.next();
                *self = AppState::Ready(next);
                Ok(next)
            }
        }
    }

    /// One-line rendering for the status line.
    pub fn describe(&self) -> String {
        match self {
            AppState::Busy { task, since } => {
                let secs = Utc::now().signed_duration_since(*since).num_seconds();
                format!("busy ({task}, {secs}s)")
            }
            AppState::Ready(sub) => format!("ready.{}", sub.as_str()),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedAppState = Arc<Mutex<AppState>>;

pub fn shared_app_state() -> SharedAppState {
    Arc::new(Mutex::new(AppState::new()))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_is_ready_generic() {
        let s = AppState::new();
        assert_eq!(s.ready_sub(), Some(ReadySub::Generic));
        assert!(!s.is_busy());
    }

    #[test]
    fn start_task_from_any_ready_substate() {
        for sub in [ReadySub::Planning, ReadySub::Editing, ReadySub::Generic] {
            let mut s = AppState::Ready(sub);
            assert!(s.start_task("work").is_ok());
            assert!(s.is_busy());
        }
    }

    #[test]
    fn start_task_while_busy_is_rejected() {
        let mut s = AppState::new();
        s.start_task("one").unwrap();
        assert_eq!(s.start_task("two"), Err(StateError::AlreadyBusy));
    }

    #[test]
    fn complete_and_error_both_land_in_ready_generic() {
        let mut s = AppState::Ready(ReadySub::Planning);
        s.start_task("x").unwrap();
        s.task_complete().unwrap();
        assert_eq!(s.ready_sub(), Some(ReadySub::Generic));

        let mut s = AppState::Ready(ReadySub::Editing);
        s.start_task("x").unwrap();
        s.task_error().unwrap();
        assert_eq!(s.ready_sub(), Some(ReadySub::Generic));
    }

    #[test]
    fn finish_without_task_is_rejected() {
        let mut s = AppState::new();
        assert_eq!(s.task_complete(), Err(StateError::NotBusy));
    }

    #[test]
    fn cycle_walks_planning_editing_generic() {
        let mut s = AppState::Ready(ReadySub::Planning);
        assert_eq!(s.cycle_substate().unwrap(), ReadySub::Editing);
        assert_eq!(s.cycle_substate().unwrap(), ReadySub::Generic);
        assert_eq!(s.cycle_substate().unwrap(), ReadySub::Planning);
    }

    #[test]
    fn cycle_while_busy_is_rejected() {
        let mut s = AppState::new();
        s.start_task("x").unwrap();
        assert_eq!(s.cycle_substate(), Err(StateError::BusyNoCycle));
    }

    #[test]
    fn busy_records_task_name() {
        let mut s = AppState::new();
        s.start_task("summarize README").unwrap();
        match s {
            AppState::Busy { ref task, .. } => assert_eq!(task, "summarize README"),
            _ => panic!("expected busy"),
        }
        assert!(s.describe().starts_with("busy (summarize README"));
    }
}
