//! Atomic counters describing what a cache did with its refresh attempts.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Refresh outcome counters for one cache instance.
#[derive(Debug, Default)]
pub struct RefreshTracker {
    refreshes_started: AtomicU64,
    refreshes_succeeded: AtomicU64,
    refreshes_failed: AtomicU64,
    /// Successful results not stored because a newer result was already in place.
    commits_superseded: AtomicU64,
    /// Read-path refresh attempts that found no free slot.
    slot_unavailable: AtomicU64,
    errors_replayed: AtomicU64,
}

impl RefreshTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_started(&self) {
        self.refreshes_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.refreshes_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.refreshes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_superseded(&self) {
        self.commits_superseded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_slot_unavailable(&self) {
        self.slot_unavailable.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replay(&self) {
        self.errors_replayed.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot the current counters.
    pub fn summary(&self) -> RefreshSummary {
        RefreshSummary {
            refreshes_started: self.refreshes_started.load(Ordering::Relaxed),
            refreshes_succeeded: self.refreshes_succeeded.load(Ordering::Relaxed),
            refreshes_failed: self.refreshes_failed.load(Ordering::Relaxed),
            commits_superseded: self.commits_superseded.load(Ordering::Relaxed),
            slot_unavailable: self.slot_unavailable.load(Ordering::Relaxed),
            errors_replayed: self.errors_replayed.load(Ordering::Relaxed),
        }
    }
}

/// Immutable snapshot of tracker counters for display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    pub refreshes_started: u64,
    pub refreshes_succeeded: u64,
    pub refreshes_failed: u64,
    pub commits_superseded: u64,
    pub slot_unavailable: u64,
    pub errors_replayed: u64,
}

impl RefreshSummary {
    /// Adds another summary's counters to this one.
    pub fn merge(&mut self, other: &RefreshSummary) {
        self.refreshes_started += other.refreshes_started;
        self.refreshes_succeeded += other.refreshes_succeeded;
        self.refreshes_failed += other.refreshes_failed;
        self.commits_superseded += other.commits_superseded;
        self.slot_unavailable += other.slot_unavailable;
        self.errors_replayed += other.errors_replayed;
    }
}
