/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Deterministic in-memory world.
//!
//! [`SimWorld`] implements every collaborator trait over one shared state so
//! both schedulers can be exercised end to end: launched jobs hold
//! `threads × unit_cost` capacity on their host for `duration` ticks, then
//! apply their effect to the target, release the capacity and write their
//! effect magnitude to their channel.
//!
//! The clock is either advanced explicitly ([`SimWorld::advance`], used by the
//! tests) or follows wall time at a fixed tick length (used by the CLI).
//!
//! Effect model per thread (`g = growth_rate / 1000`):
//!
//! | Job | Target effect | Stability cost |
//! |---|---|---|
//! | Stabilize | stability −= `stabilize_per_thread` (not below minimum) | 0 |
//! | Replenish | yield = `(yield + threads) · (1 + g)^threads` (capped at max) | `replenish_stability_cost` |
//! | Extract | yield −= yield · `extract_fraction_per_thread` | `extract_stability_cost` |

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{CapacityProvider, EffectOracle, LaunchError, LaunchRequest, ProcessLauncher, ResultChannels};
use crate::job::{ChannelId, JobType, PerJob, ProcessHandle, TargetState};

// ── Configuration ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimHost {
    pub name: String,
    pub total_capacity: f64,
    /// Capacity already in use by things the schedulers do not control.
    #[serde(default)]
    pub used_capacity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimTarget {
    pub name: String,
    pub stability: f64,
    pub min_stability: f64,
    pub current_yield: f64,
    pub max_yield: f64,
    #[serde(default = "default_growth_rate")]
    pub growth_rate: f64,
    /// Base job durations in ticks.
    pub stabilize_time: f64,
    pub replenish_time: f64,
    pub extract_time: f64,
}

fn default_growth_rate() -> f64 {
    20.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimEffects {
    pub stabilize_per_thread: f64,
    pub extract_fraction_per_thread: f64,
    pub replenish_stability_cost: f64,
    pub extract_stability_cost: f64,
    pub unit_costs: PerJob<f64>,
}

impl Default for SimEffects {
    fn default() -> Self {
        Self {
            stabilize_per_thread: 0.05,
            extract_fraction_per_thread: 0.002,
            replenish_stability_cost: 0.004,
            extract_stability_cost: 0.002,
            unit_costs: PerJob::new(1.75, 1.75, 1.7),
        }
    }
}

/// The `world:` section of the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    pub hosts: Vec<SimHost>,
    pub targets: Vec<SimTarget>,
    pub effects: SimEffects,
}

// ── Internal state ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct RunningJob {
    handle: ProcessHandle,
    job: JobType,
    host: String,
    target: String,
    threads: u64,
    channel: Option<ChannelId>,
    cost: f64,
    finishes_at: u64,
}

#[derive(Debug)]
struct SimState {
    now: u64,
    next_handle: ProcessHandle,
    hosts: Vec<SimHost>,
    targets: BTreeMap<String, SimTarget>,
    running: Vec<RunningJob>,
    channels: HashMap<ChannelId, f64>,
    controllers: HashSet<ProcessHandle>,
    duration_scale: f64,
    fail_launches: bool,
}

impl SimState {
    fn host(&self, name: &str) -> Option<&SimHost> {
        self.hosts.iter().find(|h| h.name == name)
    }

    fn used_on(&self, host: &SimHost) -> f64 {
        host.used_capacity
            + self
                .running
                .iter()
                .filter(|j| j.host == host.name)
                .map(|j| j.cost)
                .sum::<f64>()
    }

    fn advance_to(&mut self, tick: u64, effects: &SimEffects) {
        while self.now < tick {
            self.now += 1;
            let now = self.now;
            let (done, still): (Vec<_>, Vec<_>) =
                self.running.drain(..).partition(|j| j.finishes_at <= now);
            self.running = still;
            for job in done {
                self.complete(job, effects);
            }
        }
    }

    fn complete(&mut self, job: RunningJob, effects: &SimEffects) {
        let Some(target) = self.targets.get_mut(&job.target) else {
            return;
        };
        let threads = job.threads as f64;

        let result = match job.job {
            JobType::Stabilize => {
                let reduction = threads * effects.stabilize_per_thread;
                target.stability = (target.stability - reduction).max(target.min_stability);
                reduction
            }
            JobType::Replenish => {
                let per_thread = 1.0 + target.growth_rate / 1000.0;
                let multiplier = per_thread.powf(threads);
                let before = target.current_yield;
                let after = ((before + threads) * multiplier).min(target.max_yield);
                target.current_yield = after;
                target.stability += threads * effects.replenish_stability_cost;
                if before > 0.0 {
                    after / before
                } else {
                    multiplier
                }
            }
            JobType::Extract => {
                let fraction = (threads * effects.extract_fraction_per_thread).min(1.0);
                let amount = target.current_yield * fraction;
                target.current_yield -= amount;
                target.stability += threads * effects.extract_stability_cost;
                amount
            }
        };

        trace!(
            handle = job.handle,
            job = %job.job,
            target = %job.target,
            threads = job.threads,
            result,
            "sim job finished"
        );

        if let Some(channel) = job.channel {
            self.channels.insert(channel, result);
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Clock {
    Manual,
    Wall { start: Instant, tick: Duration },
}

// ── SimWorld ──────────────────────────────────────────────────────────────────

/// Simulated targets, hosts, processes and channels behind one lock.
#[derive(Debug)]
pub struct SimWorld {
    effects: SimEffects,
    clock: Clock,
    state: Mutex<SimState>,
}

impl SimWorld {
    /// World whose clock only moves through [`advance`](Self::advance).
    pub fn new(config: WorldConfig) -> Self {
        Self::with_clock(config, Clock::Manual)
    }

    /// World whose clock follows wall time, one tick per `tick`.
    pub fn with_wall_clock(config: WorldConfig, tick: Duration) -> Self {
        Self::with_clock(
            config,
            Clock::Wall {
                start: Instant::now(),
                tick: tick.max(Duration::from_millis(1)),
            },
        )
    }

    fn with_clock(config: WorldConfig, clock: Clock) -> Self {
        let targets = config
            .targets
            .into_iter()
            .map(|t| (t.name.clone(), t))
            .collect();
        Self {
            effects: config.effects,
            clock,
            state: Mutex::new(SimState {
                now: 0,
                next_handle: 1,
                hosts: config.hosts,
                targets,
                running: Vec::new(),
                channels: HashMap::new(),
                controllers: HashSet::new(),
                duration_scale: 1.0,
                fail_launches: false,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Clock::Wall { start, tick } = self.clock {
            let elapsed = (start.elapsed().as_nanos() / tick.as_nanos().max(1)) as u64;
            state.advance_to(elapsed, &self.effects);
        }
        state
    }

    /// Move the clock forward `ticks` ticks, completing due jobs.
    pub fn advance(&self, ticks: u64) {
        let mut state = self.state();
        let to = state.now + ticks;
        state.advance_to(to, &self.effects);
    }

    pub fn now(&self) -> u64 {
        self.state().now
    }

    /// Register a long-lived controller process (a scheduler instance) and
    /// return its handle.  It stays alive until [`terminate`](Self::terminate).
    pub fn spawn_controller(&self) -> ProcessHandle {
        let mut state = self.state();
        let handle = state.next_handle;
        state.next_handle += 1;
        state.controllers.insert(handle);
        handle
    }

    pub fn terminate(&self, handle: ProcessHandle) {
        self.state().controllers.remove(&handle);
    }

    /// Scale every job duration; the operator's skill shrinking durations is
    /// modelled by lowering this below `1.0`.
    #[cfg(test)]
    pub(crate) fn set_duration_scale(&self, scale: f64) {
        self.state().duration_scale = scale.max(0.0);
    }

    /// Make every subsequent launch fail.
    pub fn set_launch_failure(&self, fail: bool) {
        self.state().fail_launches = fail;
    }

    pub fn set_target_yield(&self, target: &str, current_yield: f64) {
        if let Some(t) = self.state().targets.get_mut(target) {
            t.current_yield = current_yield.clamp(0.0, t.max_yield);
        }
    }

    pub fn set_target_stability(&self, target: &str, stability: f64) {
        if let Some(t) = self.state().targets.get_mut(target) {
            t.stability = stability;
        }
    }

    /// Put a value on a channel as a finished worker would.
    pub fn write_channel(&self, channel: ChannelId, value: f64) {
        self.state().channels.insert(channel, value);
    }

    pub fn running_jobs(&self) -> usize {
        self.state().running.len()
    }

    /// Threads of `job` currently running against `target`.
    pub fn running_threads(&self, job: JobType, target: &str) -> u64 {
        self.state()
            .running
            .iter()
            .filter(|j| j.job == job && j.target == target)
            .map(|j| j.threads)
            .sum()
    }
}

// ── Collaborator impls ────────────────────────────────────────────────────────

impl EffectOracle for SimWorld {
    fn observe(&self, target: &str) -> Option<TargetState> {
        self.state().targets.get(target).map(|t| TargetState {
            name: t.name.clone(),
            current_stability: t.stability,
            min_stability: t.min_stability,
            current_yield: t.current_yield,
            max_yield: t.max_yield,
            growth_rate: t.growth_rate,
        })
    }

    fn effect_per_thread(&self, job: JobType, target: &TargetState) -> f64 {
        match job {
            JobType::Stabilize => self.effects.stabilize_per_thread,
            JobType::Replenish => 1.0 + target.growth_rate / 1000.0,
            JobType::Extract => target.current_yield * self.effects.extract_fraction_per_thread,
        }
    }

    fn threads_for(&self, job: JobType, target: &TargetState, desired_effect: f64) -> f64 {
        match job {
            JobType::Stabilize => desired_effect / self.effects.stabilize_per_thread,
            JobType::Replenish => {
                if desired_effect <= 1.0 {
                    0.0
                } else {
                    desired_effect.ln() / (1.0 + target.growth_rate / 1000.0).ln()
                }
            }
            JobType::Extract => {
                let per_thread = self.effect_per_thread(JobType::Extract, target);
                if per_thread <= 0.0 {
                    0.0
                } else {
                    desired_effect / per_thread
                }
            }
        }
    }

    fn duration(&self, job: JobType, target: &TargetState) -> f64 {
        let state = self.state();
        let Some(t) = state.targets.get(&target.name) else {
            return 1.0;
        };
        let base = match job {
            JobType::Stabilize => t.stabilize_time,
            JobType::Replenish => t.replenish_time,
            JobType::Extract => t.extract_time,
        };
        base * state.duration_scale
    }

    fn unit_cost(&self, job: JobType) -> f64 {
        self.effects.unit_costs[job]
    }

    fn stability_cost(&self, job: JobType, threads: f64) -> f64 {
        match job {
            JobType::Stabilize => 0.0,
            JobType::Replenish => threads * self.effects.replenish_stability_cost,
            JobType::Extract => threads * self.effects.extract_stability_cost,
        }
    }
}

impl CapacityProvider for SimWorld {
    fn hosts(&self) -> Vec<String> {
        self.state().hosts.iter().map(|h| h.name.clone()).collect()
    }

    fn total_capacity(&self, host: &str) -> f64 {
        self.state()
            .host(host)
            .map(|h| h.total_capacity)
            .unwrap_or(0.0)
    }

    fn used_capacity(&self, host: &str) -> f64 {
        let state = self.state();
        state.host(host).map(|h| state.used_on(h)).unwrap_or(0.0)
    }
}

impl ProcessLauncher for SimWorld {
    fn launch(&self, request: &LaunchRequest<'_>) -> Result<ProcessHandle, LaunchError> {
        let mut state = self.state();

        if state.fail_launches {
            return Err(LaunchError::Rejected("launch failures injected".into()));
        }
        if request.threads == 0 {
            return Err(LaunchError::ZeroThreads);
        }
        let host = state
            .host(request.host)
            .ok_or_else(|| LaunchError::UnknownHost(request.host.to_string()))?;
        let spare = host.total_capacity - state.used_on(host);
        let base_duration = {
            let t = state
                .targets
                .get(request.target)
                .ok_or_else(|| LaunchError::UnknownTarget(request.target.to_string()))?;
            match request.job {
                JobType::Stabilize => t.stabilize_time,
                JobType::Replenish => t.replenish_time,
                JobType::Extract => t.extract_time,
            }
        };

        let required = request.threads as f64 * self.effects.unit_costs[request.job];
        if required > spare + 1e-9 {
            return Err(LaunchError::InsufficientCapacity {
                host: request.host.to_string(),
                required,
                spare: spare.max(0.0),
            });
        }

        let ticks = (base_duration * state.duration_scale).ceil().max(1.0) as u64;
        let handle = state.next_handle;
        state.next_handle += 1;
        let finishes_at = state.now + ticks;
        state.running.push(RunningJob {
            handle,
            job: request.job,
            host: request.host.to_string(),
            target: request.target.to_string(),
            threads: request.threads,
            channel: request.channel,
            cost: required,
            finishes_at,
        });

        debug!(
            handle,
            job = %request.job,
            host = request.host,
            target = request.target,
            threads = request.threads,
            finishes_at,
            "sim job launched"
        );
        Ok(handle)
    }

    fn cancel(&self, handle: ProcessHandle) {
        let mut state = self.state();
        state.running.retain(|j| j.handle != handle);
        state.controllers.remove(&handle);
    }

    fn is_alive(&self, handle: ProcessHandle) -> bool {
        let state = self.state();
        state.controllers.contains(&handle) || state.running.iter().any(|j| j.handle == handle)
    }

    fn cancel_all(&self, host: &str) {
        self.state().running.retain(|j| j.host != host);
    }
}

impl ResultChannels for SimWorld {
    fn try_read(&self, channel: ChannelId) -> Option<f64> {
        self.state().channels.remove(&channel)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
