//! Repair outcomes per block start

use chrono::{DateTime, Utc};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepairStatus {
    #[default]
    NotStarted,
    Success,
    Failed,
}

impl std::fmt::Display for RepairStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepairStatus::NotStarted => write!(f, "not-started"),
            RepairStatus::Success => write!(f, "success"),
            RepairStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RepairState {
    pub status: RepairStatus,
    pub num_failures: u32,
}

/// Outcome of every block start attempted so far. A missing entry means the
/// block was never attempted.
#[derive(Debug, Default)]
pub struct RepairLedger {
    states: HashMap<DateTime<Utc>, RepairState>,
}

impl RepairLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, t: DateTime<Utc>) -> RepairState {
        self.states.get(&t).copied().unwrap_or_default()
    }

    /// Never attempted, or failed with retries left.
    pub fn needs_repair(&self, t: DateTime<Utc>, max_retries: u32) -> bool {
        match self.states.get(&t) {
            None => true,
            Some(state) => {
                state.status == RepairStatus::Failed && state.num_failures < max_retries
            }
        }
    }

    pub fn record_success(&mut self, t: DateTime<Utc>) {
        self.states.entry(t).or_default().status = RepairStatus::Success;
    }

    pub fn record_failure(&mut self, t: DateTime<Utc>) {
        let state = self.states.entry(t).or_default();
        state.status = RepairStatus::Failed;
        state.num_failures += 1;
    }

    /// Drop entries for block starts before `t`; returns how many were removed.
    pub fn prune_before(&mut self, t: DateTime<Utc>) -> usize {
        let before = self.states.len();
        self.states.retain(|start, _| *start >= t);
        before - self.states.len()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
