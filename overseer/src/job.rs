/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Core job, target and host data structures shared by both schedulers.
//!
//! ```text
//! EffectOracle ──(TargetState)──►  scheduler  ──(JobType, threads)──►  ProcessLauncher
//!                                     ▲                                      │
//!                                     └──────(f64 on ChannelId)──────────────┘
//! ```
//!
//! The three job types always travel together, so per-type bookkeeping lives
//! in a [`PerJob`] (three named fields) rather than in maps keyed by strings.

use std::fmt;
use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

/// Opaque handle of a launched worker process (or of a scheduler instance
/// itself when it owns channels).  `0` is never a valid handle.
pub type ProcessHandle = u64;

/// Small integer identifier of a single-slot result channel.
pub type ChannelId = u32;

// ── JobType ───────────────────────────────────────────────────────────────────

/// The three batch job types the schedulers launch against a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Lowers the target's stability back toward its minimum.
    Stabilize,
    /// Multiplies the target's current yield back toward its maximum.
    Replenish,
    /// Removes yield from the target.
    Extract,
}

impl JobType {
    /// All job types, in the order the schedulers iterate them.
    pub const ALL: [JobType; 3] = [JobType::Stabilize, JobType::Replenish, JobType::Extract];

    pub fn as_str(self) -> &'static str {
        match self {
            JobType::Stabilize => "stabilize",
            JobType::Replenish => "replenish",
            JobType::Extract => "extract",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── PerJob ────────────────────────────────────────────────────────────────────

/// One value per [`JobType`].
///
/// Indexable by `JobType`, so code that treats all three types alike can loop
/// over [`JobType::ALL`] while code that needs one type reads the named field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerJob<T> {
    pub stabilize: T,
    pub replenish: T,
    pub extract: T,
}

impl<T> PerJob<T> {
    pub fn new(stabilize: T, replenish: T, extract: T) -> Self {
        Self {
            stabilize,
            replenish,
            extract,
        }
    }

    /// Build a `PerJob` by evaluating `f` once per job type.
    pub fn from_fn(mut f: impl FnMut(JobType) -> T) -> Self {
        Self {
            stabilize: f(JobType::Stabilize),
            replenish: f(JobType::Replenish),
            extract: f(JobType::Extract),
        }
    }

    pub fn get(&self, job: JobType) -> &T {
        match job {
            JobType::Stabilize => &self.stabilize,
            JobType::Replenish => &self.replenish,
            JobType::Extract => &self.extract,
        }
    }

    pub fn get_mut(&mut self, job: JobType) -> &mut T {
        match job {
            JobType::Stabilize => &mut self.stabilize,
            JobType::Replenish => &mut self.replenish,
            JobType::Extract => &mut self.extract,
        }
    }

    /// Iterate `(job type, value)` pairs in [`JobType::ALL`] order.
    pub fn iter(&self) -> impl Iterator<Item = (JobType, &T)> {
        JobType::ALL.into_iter().map(move |job| (job, self.get(job)))
    }

    pub fn map<U>(&self, mut f: impl FnMut(JobType, &T) -> U) -> PerJob<U> {
        PerJob::from_fn(|job| f(job, self.get(job)))
    }
}

impl<T> Index<JobType> for PerJob<T> {
    type Output = T;

    fn index(&self, job: JobType) -> &T {
        self.get(job)
    }
}

impl<T> IndexMut<JobType> for PerJob<T> {
    fn index_mut(&mut self, job: JobType) -> &mut T {
        self.get_mut(job)
    }
}

// ── TargetState ───────────────────────────────────────────────────────────────

/// Snapshot of a remote target as reported by the effect oracle.
///
/// Re-read at the top of every control tick; nothing here is cached across
/// ticks by the schedulers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetState {
    pub name: String,

    /// Current stability.  Jobs may push it transiently above the minimum;
    /// Stabilize jobs bring it back down.
    pub current_stability: f64,
    pub min_stability: f64,

    /// `0 ≤ current_yield ≤ max_yield`.
    pub current_yield: f64,
    pub max_yield: f64,

    /// Growth-rate coefficient of the target (higher grows faster).
    pub growth_rate: f64,
}

impl TargetState {
    /// `current_yield / max_yield`, or `0.0` for a target with no yield.
    pub fn yield_fraction(&self) -> f64 {
        if self.max_yield <= 0.0 {
            0.0
        } else {
            self.current_yield / self.max_yield
        }
    }

    /// How far stability sits above its minimum (never negative).
    pub fn instability_margin(&self) -> f64 {
        (self.current_stability - self.min_stability).max(0.0)
    }
}

// ── HostSnapshot ──────────────────────────────────────────────────────────────

/// Capacity of one compute host, captured once per tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostSnapshot {
    pub name: String,
    pub total_capacity: f64,
    pub used_capacity: f64,
}

impl HostSnapshot {
    /// Spare capacity, clamped at zero (`used ≤ total` is only a soft
    /// assumption and rounding can violate it).
    pub fn spare(&self) -> f64 {
        (self.total_capacity - self.used_capacity).max(0.0)
    }

    /// Spare capacity as a fraction of the total, `0.0` for an empty host.
    pub fn spare_fraction(&self) -> f64 {
        if self.total_capacity <= 0.0 {
            0.0
        } else {
            self.spare() / self.total_capacity
        }
    }

    /// A host is usable for a job type only if one thread of it fits.
    pub fn is_usable_for(&self, unit_cost: f64) -> bool {
        self.spare() >= unit_cost
    }
}

// ── Thread helpers ────────────────────────────────────────────────────────────

/// Round a fractional thread requirement up to whole threads.
///
/// Oracle answers that are negative, NaN or infinite floor to `0` so thread
/// computations never fail.
pub fn whole_threads(raw: f64) -> u64 {
    if !raw.is_finite() || raw <= 0.0 {
        0
    } else {
        raw.ceil() as u64
    }
}

/// Threads of cost `unit_cost` that fit inside `capacity`.
pub fn threads_within(capacity: f64, unit_cost: f64) -> u64 {
    if unit_cost <= 0.0 || !capacity.is_finite() || capacity <= 0.0 {
        0
    } else {
        (capacity / unit_cost).floor() as u64
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn target(stability: f64, min: f64, current: f64, max: f64) -> TargetState {
        TargetState {
            name: "t".into(),
            current_stability: stability,
            min_stability: min,
            current_yield: current,
            max_yield: max,
            growth_rate: 10.0,
        }
    }

    // ── PerJob ────────────────────────────────────────────────────────────────

    #[test]
    fn per_job_index_matches_named_fields() {
        let mut p = PerJob::new(1, 2, 3);
        assert_eq!(p[JobType::Stabilize], 1);
        assert_eq!(p[JobType::Replenish], 2);
        assert_eq!(p[JobType::Extract], 3);

        p[JobType::Replenish] = 20;
        assert_eq!(p.replenish, 20);
    }

    #[test]
    fn per_job_iterates_in_all_order() {
        let p = PerJob::from_fn(|job| job.as_str().len());
        let jobs: Vec<JobType> = p.iter().map(|(job, _)| job).collect();
        assert_eq!(jobs, JobType::ALL.to_vec());
    }

    #[test]
    fn per_job_map_preserves_slots() {
        let p = PerJob::new(1.0, 2.0, 3.0).map(|_, v| v * 10.0);
        assert_eq!(p, PerJob::new(10.0, 20.0, 30.0));
    }

    // ── TargetState ───────────────────────────────────────────────────────────

    #[test]
    fn yield_fraction_handles_zero_max() {
        assert_eq!(target(10.0, 5.0, 0.0, 0.0).yield_fraction(), 0.0);
        assert!((target(10.0, 5.0, 50.0, 200.0).yield_fraction() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn instability_margin_is_never_negative() {
        assert_eq!(target(4.0, 5.0, 1.0, 1.0).instability_margin(), 0.0);
        assert_eq!(target(50.0, 10.0, 1.0, 1.0).instability_margin(), 40.0);
    }

    // ── HostSnapshot ──────────────────────────────────────────────────────────

    #[test]
    fn host_spare_clamps_over_commit() {
        let host = HostSnapshot {
            name: "h".into(),
            total_capacity: 32.0,
            used_capacity: 33.5,
        };
        assert_eq!(host.spare(), 0.0);
        assert!(!host.is_usable_for(1.0));
    }

    #[test]
    fn host_usable_only_when_one_thread_fits() {
        let host = HostSnapshot {
            name: "h".into(),
            total_capacity: 10.0,
            used_capacity: 8.0,
        };
        assert!(host.is_usable_for(2.0));
        assert!(!host.is_usable_for(2.5));
        assert!((host.spare_fraction() - 0.2).abs() < 1e-12);
    }

    // ── Thread helpers ────────────────────────────────────────────────────────

    #[test]
    fn whole_threads_rounds_up_and_floors_garbage() {
        assert_eq!(whole_threads(19.01), 20);
        assert_eq!(whole_threads(20.0), 20);
        assert_eq!(whole_threads(-3.0), 0);
        assert_eq!(whole_threads(f64::NAN), 0);
        assert_eq!(whole_threads(f64::INFINITY), 0);
    }

    #[test]
    fn threads_within_floors() {
        assert_eq!(threads_within(100.0, 10.0), 10);
        assert_eq!(threads_within(99.9, 10.0), 9);
        assert_eq!(threads_within(5.0, 0.0), 0);
    }
}
