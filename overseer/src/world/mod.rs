/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Contracts of the collaborators both schedulers consume.
//!
//! The scheduling core never talks to targets, hosts or processes directly.
//! Everything it needs is behind four traits:
//!
//! | Trait | Provides |
//! |---|---|
//! | [`EffectOracle`] | target snapshots, per-thread effects, inverses, durations, unit costs |
//! | [`CapacityProvider`] | host list with total / used capacity |
//! | [`ProcessLauncher`] | launch, cancel, liveness of worker processes |
//! | [`ResultChannels`] | non-blocking read of single-slot result channels |
//!
//! All methods take `&self`; implementations that keep mutable state (such as
//! [`sim::SimWorld`]) use interior mutability.  The schedulers themselves are
//! single-threaded decision makers and hold no locks.

pub mod sim;

use thiserror::Error;

use crate::job::{ChannelId, HostSnapshot, JobType, ProcessHandle, TargetState};

// ── Effect oracle ─────────────────────────────────────────────────────────────

/// Pure model of what jobs do to a target.
///
/// Answers are deterministic for a given target snapshot but may change from
/// one tick to the next (durations shrink as the operator's skill rises).
pub trait EffectOracle {
    /// Current state of `target`, or `None` if the target is unknown.
    fn observe(&self, target: &str) -> Option<TargetState>;

    /// Effect of one thread of `job` against `target`: stability removed
    /// (Stabilize), yield multiplier (Replenish) or yield removed (Extract).
    fn effect_per_thread(&self, job: JobType, target: &TargetState) -> f64;

    /// Fractional threads of `job` needed to produce `desired_effect`.
    fn threads_for(&self, job: JobType, target: &TargetState, desired_effect: f64) -> f64;

    /// Run time of one `job` against `target`, in ticks.
    fn duration(&self, job: JobType, target: &TargetState) -> f64;

    /// Capacity consumed by one thread of `job`.
    fn unit_cost(&self, job: JobType) -> f64;

    /// Stability added to a target by `threads` threads of `job`.
    /// Stabilize adds none.
    fn stability_cost(&self, job: JobType, threads: f64) -> f64;
}

// ── Capacity provider ─────────────────────────────────────────────────────────

pub trait CapacityProvider {
    /// Hosts known to the provider, in iteration order.
    fn hosts(&self) -> Vec<String>;

    fn total_capacity(&self, host: &str) -> f64;

    /// Includes this scheduler's own overhead and any reserved margin.
    fn used_capacity(&self, host: &str) -> f64;

    fn snapshot(&self, host: &str) -> HostSnapshot {
        HostSnapshot {
            name: host.to_string(),
            total_capacity: self.total_capacity(host),
            used_capacity: self.used_capacity(host),
        }
    }
}

// ── Process launcher ──────────────────────────────────────────────────────────

/// Parameters of one worker launch.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchRequest<'a> {
    pub job: JobType,
    pub host: &'a str,
    pub threads: u64,
    pub target: &'a str,
    /// Channel the worker reports its effect on, if any.
    pub channel: Option<ChannelId>,
}

/// Why a worker could not be started.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LaunchError {
    #[error("refusing to launch a job with zero threads")]
    ZeroThreads,

    #[error("unknown host '{0}'")]
    UnknownHost(String),

    #[error("unknown target '{0}'")]
    UnknownTarget(String),

    #[error("host '{host}' needs {required:.2} capacity but only has {spare:.2} spare")]
    InsufficientCapacity {
        host: String,
        required: f64,
        spare: f64,
    },

    #[error("launcher rejected the job: {0}")]
    Rejected(String),
}

pub trait ProcessLauncher {
    fn launch(&self, request: &LaunchRequest<'_>) -> Result<ProcessHandle, LaunchError>;

    /// Terminate a worker.  Unknown or already finished handles are ignored.
    fn cancel(&self, handle: ProcessHandle);

    fn is_alive(&self, handle: ProcessHandle) -> bool;

    /// Terminate every worker on `host`.
    fn cancel_all(&self, host: &str);
}

// ── Result channels ───────────────────────────────────────────────────────────

pub trait ResultChannels {
    /// Take the last unread value from `channel`, if any.  Never blocks.
    fn try_read(&self, channel: ChannelId) -> Option<f64>;

    /// Discard any leftover value.
    fn clear(&self, channel: ChannelId) {
        let _ = self.try_read(channel);
    }
}

// ── World ─────────────────────────────────────────────────────────────────────

/// Everything a scheduler instance needs from the outside.
pub trait World: EffectOracle + CapacityProvider + ProcessLauncher + ResultChannels {}

impl<T> World for T where T: EffectOracle + CapacityProvider + ProcessLauncher + ResultChannels {}
