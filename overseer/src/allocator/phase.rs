/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Per-target phase bookkeeping.

use std::fmt;

use serde::Serialize;
use tracing::info;

use crate::job::{JobType, PerJob, ProcessHandle};

/// `Weaken → Grow → Hack → Done`, never backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Bring stability down to its minimum.
    Weaken,
    /// Replenish yield toward its maximum.
    Grow,
    /// Extract once, with compensating Stabilize.
    Hack,
    /// Terminal.
    Done,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Weaken => "weaken",
            Phase::Grow => "grow",
            Phase::Hack => "hack",
            Phase::Done => "done",
        }
    }

    /// Job types whose allocation fractions this phase tracks.
    pub fn jobs(self) -> &'static [JobType] {
        match self {
            Phase::Weaken => &[JobType::Stabilize],
            Phase::Grow => &[JobType::Replenish, JobType::Stabilize],
            Phase::Hack => &[JobType::Extract, JobType::Stabilize],
            Phase::Done => &[],
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── PhaseState ────────────────────────────────────────────────────────────────

/// Where one target stands in its lifecycle.
///
/// `allocation[job]` is the share of the current round's work for `job`
/// already dispatched, in `[0, 1]`.  Only the allocator mutates it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseState {
    id: usize,
    target: String,
    phase: Phase,
    allocation: PerJob<f64>,
    handles: Vec<ProcessHandle>,
    sleep_ticks: u64,
}

impl PhaseState {
    pub fn new(id: usize, target: impl Into<String>) -> Self {
        Self {
            id,
            target: target.into(),
            phase: Phase::Weaken,
            allocation: PerJob::default(),
            handles: Vec::new(),
            sleep_ticks: 0,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn allocation(&self, job: JobType) -> f64 {
        self.allocation[job]
    }

    pub fn allocations(&self) -> PerJob<f64> {
        self.allocation
    }

    pub fn handles(&self) -> &[ProcessHandle] {
        &self.handles
    }

    /// Ticks until the slowest job dispatched for this target finishes.
    pub fn sleep_ticks(&self) -> u64 {
        self.sleep_ticks
    }

    /// Every job the current phase tracks is fully dispatched.
    pub fn fully_allocated(&self) -> bool {
        let jobs = self.phase.jobs();
        !jobs.is_empty() && jobs.iter().all(|&job| self.allocation[job] >= 1.0)
    }

    // ── Mutation (allocator only) ─────────────────────────────────────────────

    /// Credit `granted` of the `requested` threads topping up `job`.
    ///
    /// A zero request means nothing was outstanding, so the job counts as
    /// fully allocated.
    pub(crate) fn record_grant(&mut self, job: JobType, requested: u64, granted: u64) {
        let fraction = &mut self.allocation[job];
        if requested == 0 || granted >= requested {
            *fraction = 1.0;
        } else {
            let remaining = 1.0 - *fraction;
            *fraction = (*fraction + remaining * granted as f64 / requested as f64).min(1.0);
        }
    }

    pub(crate) fn push_handle(&mut self, handle: ProcessHandle) {
        self.handles.push(handle);
    }

    pub(crate) fn set_sleep_ticks(&mut self, ticks: u64) {
        self.sleep_ticks = ticks;
    }

    /// Forget handles whose processes have exited.
    pub(crate) fn prune(&mut self, is_alive: impl Fn(ProcessHandle) -> bool) {
        self.handles.retain(|&h| is_alive(h));
    }

    pub(crate) fn take_handles(&mut self) -> Vec<ProcessHandle> {
        std::mem::take(&mut self.handles)
    }

    /// Zero the fractions of the current phase so a fresh round is sized
    /// from the target's new state.
    pub(crate) fn start_round(&mut self) {
        for &job in self.phase.jobs() {
            self.allocation[job] = 0.0;
        }
    }

    /// Move to `to` and return the handles the caller must cancel.
    ///
    /// Entering a working phase cancels everything outstanding and clears
    /// the fractions.  Entering `Done` cancels nothing: the final Hack
    /// round is left to finish.  Moves that are not forward are ignored.
    pub(crate) fn advance(&mut self, to: Phase) -> Vec<ProcessHandle> {
        if to <= self.phase {
            return Vec::new();
        }
        info!(
            target = %self.target,
            from = %self.phase,
            to = %to,
            "phase transition"
        );
        self.phase = to;
        if to == Phase::Done {
            self.handles.clear();
            return Vec::new();
        }
        self.allocation = PerJob::default();
        std::mem::take(&mut self.handles)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_are_ordered() {
        assert!(Phase::Weaken < Phase::Grow);
        assert!(Phase::Grow < Phase::Hack);
        assert!(Phase::Hack < Phase::Done);
    }

    #[test]
    fn partial_grants_top_up_toward_one() {
        let mut s = PhaseState::new(0, "t");
        s.record_grant(JobType::Stabilize, 20, 10);
        assert!((s.allocation(JobType::Stabilize) - 0.5).abs() < 1e-12);

        // Next request covers the remaining half; a quarter of it lands
        s.record_grant(JobType::Stabilize, 10, 5);
        assert!((s.allocation(JobType::Stabilize) - 0.75).abs() < 1e-12);

        s.record_grant(JobType::Stabilize, 5, 5);
        assert_eq!(s.allocation(JobType::Stabilize), 1.0);
        assert!(s.fully_allocated());
    }

    #[test]
    fn zero_request_counts_as_allocated() {
        let mut s = PhaseState::new(0, "t");
        s.record_grant(JobType::Stabilize, 0, 0);
        assert_eq!(s.allocation(JobType::Stabilize), 1.0);
    }

    #[test]
    fn advance_cancels_handles_and_resets_fractions() {
        let mut s = PhaseState::new(0, "t");
        s.record_grant(JobType::Stabilize, 4, 4);
        s.push_handle(11);
        s.push_handle(12);

        let cancelled = s.advance(Phase::Grow);
        assert_eq!(cancelled, vec![11, 12]);
        assert_eq!(s.phase(), Phase::Grow);
        assert!(s.handles().is_empty());
        assert_eq!(s.allocations(), PerJob::default());
    }

    #[test]
    fn advance_never_regresses() {
        let mut s = PhaseState::new(0, "t");
        s.advance(Phase::Hack);
        s.push_handle(5);
        assert!(s.advance(Phase::Grow).is_empty());
        assert!(s.advance(Phase::Hack).is_empty());
        assert_eq!(s.phase(), Phase::Hack);
        assert_eq!(s.handles(), &[5]);
    }

    #[test]
    fn done_keeps_final_jobs_running() {
        let mut s = PhaseState::new(0, "t");
        s.advance(Phase::Hack);
        s.push_handle(9);
        assert!(s.advance(Phase::Done).is_empty());
        assert_eq!(s.phase(), Phase::Done);
        assert!(s.advance(Phase::Weaken).is_empty(), "done is absorbing");
    }

    #[test]
    fn start_round_clears_only_current_phase_jobs() {
        let mut s = PhaseState::new(0, "t");
        s.advance(Phase::Grow);
        s.record_grant(JobType::Replenish, 3, 3);
        s.record_grant(JobType::Stabilize, 1, 1);
        s.record_grant(JobType::Extract, 1, 1);
        s.start_round();
        assert_eq!(s.allocation(JobType::Replenish), 0.0);
        assert_eq!(s.allocation(JobType::Stabilize), 0.0);
        assert_eq!(s.allocation(JobType::Extract), 1.0);
    }
}
