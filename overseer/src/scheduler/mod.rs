/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Single-target continuous scheduler.
//!
//! [`ContinuousScheduler`] drives one target from one host indefinitely.
//! Every control tick it runs one synchronous pass:
//!
//! 1. Observe the target and recompute the launch cadence
//!    ([`tuning::cadence`]).
//! 2. Estimate steady-state threads for Extract, Replenish and Stabilize and
//!    fold them into per-job [`RollingAverage`]s.
//! 3. Launch each job type whose cadence slot falls on this tick.
//! 4. Read the three result channels and compute planned-vs-actual deltas.
//! 5. Project steady-state capacity use and, if the host disagrees with the
//!    projection and a full Replenish cycle has passed since the last
//!    change, re-tune and reset the averages.
//!
//! Before the first tick [`converge`](ContinuousScheduler::converge) runs
//! the tuning step repeatedly until projected usage lands in the band.
//!
//! # Failure semantics
//!
//! | Condition | Handling |
//! |---|---|
//! | Launch refused by the launcher | `warn!`, slot skipped until its next cadence tick |
//! | No convergence within the iteration cap | `warn!`, continue with last values |
//! | `extract_fraction` reaches its floor | [`SchedulerError::ExtractFractionUnderflow`] |
//!
//! The scheduler never cancels its own jobs; stopping it only stops new
//! launches.

pub mod error;
pub mod tuning;

pub use error::SchedulerError;

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::averager::RollingAverage;
use crate::channel::{ChannelAllocator, ChannelStore};
use crate::config::ContinuousConfig;
use crate::job::{whole_threads, ChannelId, JobType, PerJob, ProcessHandle, TargetState};
use crate::world::{LaunchRequest, World};

use tuning::{
    band_position, cadence, launch_period, Adjustment, BandPosition, CapacityProjection,
    JobProjection, Tunables,
};

// ── Reports ───────────────────────────────────────────────────────────────────

/// Latest nonzero value read from a job type's channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChannelReading {
    pub value: f64,
    /// Scheduler tick at which the value was read.
    pub tick: u64,
}

/// What one call to [`ContinuousScheduler::step`] did.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub tick: u64,
    /// Threads launched per job type (0 when not launched).
    pub launched: PerJob<u64>,
    pub adjustment: Adjustment,
    pub usage_ratio: f64,
}

/// Outcome of the start-up convergence loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Convergence {
    pub iterations: u32,
    pub converged: bool,
    pub usage_ratio: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub channel: ChannelId,
    pub average: RollingAverage,
    pub ticks_per_launch: f64,
    /// Effect the current estimate aims for: yield removed (Extract), yield
    /// multiplier (Replenish) or stability removed per launch (Stabilize).
    pub planned: f64,
    pub result: Option<ChannelReading>,
    /// `(actual − planned) / planned`; `None` before the first result.
    pub delta: Option<f64>,
    pub projection: JobProjection,
    pub live_processes: usize,
    pub launch_failures: u64,
}

/// Serialisable snapshot of everything the status feed shows.
#[derive(Debug, Clone, Serialize)]
pub struct ContinuousStatus {
    pub target: String,
    pub host: String,
    pub tick: u64,
    pub tunables: Tunables,
    pub jobs: PerJob<JobStatus>,
    /// Projected steady-state cost over the capacity available at start-up.
    pub projected_usage: f64,
    /// Host used / total capacity right now.
    pub actual_usage: f64,
    pub capacity_limit: f64,
}

// ── ContinuousScheduler ───────────────────────────────────────────────────────

pub struct ContinuousScheduler<W: World> {
    world: Arc<W>,
    config: ContinuousConfig,
    target: String,
    host: String,
    channels: PerJob<ChannelId>,

    tunables: Tunables,
    averages: PerJob<RollingAverage>,
    ticks_per: PerJob<f64>,
    planned: PerJob<f64>,
    results: PerJob<Option<ChannelReading>>,
    deltas: PerJob<Option<f64>>,
    projection: CapacityProjection,
    /// Spare capacity of the host when the scheduler started.
    capacity_limit: f64,

    live: PerJob<Vec<ProcessHandle>>,
    launch_failures: PerJob<u64>,
    tick: u64,
    last_adjust_tick: u64,
}

impl<W: World> ContinuousScheduler<W> {
    /// Set up a scheduler for `target` on `host`, leasing one result channel
    /// per job type for `owner` and draining any stale values on them.
    ///
    /// # Errors
    /// Unknown target or host, or a failure of the channel table.
    pub fn new<S: ChannelStore>(
        world: Arc<W>,
        config: ContinuousConfig,
        target: impl Into<String>,
        host: impl Into<String>,
        owner: ProcessHandle,
        allocator: &ChannelAllocator<S>,
    ) -> Result<Self, SchedulerError> {
        let target = target.into();
        let host = host.into();

        let state = world
            .observe(&target)
            .ok_or_else(|| SchedulerError::UnknownTarget(target.clone()))?;
        if !world.hosts().iter().any(|h| *h == host) {
            return Err(SchedulerError::UnknownHost(host));
        }

        let mut channels = PerJob::default();
        for job in JobType::ALL {
            let id = allocator.allocate(owner, |h| world.is_alive(h))?;
            world.clear(id);
            channels[job] = id;
        }

        let capacity_limit = world.snapshot(&host).spare();
        let tunables = Tunables::from_config(&config);
        let durations = PerJob::from_fn(|job| world.duration(job, &state));
        let ticks_per = cadence(&durations, tunables.duration_multiplier);

        info!(
            target = %target,
            host = %host,
            capacity = capacity_limit,
            channels = ?channels,
            "continuous scheduler ready"
        );

        Ok(Self {
            world,
            config,
            target,
            host,
            channels,
            tunables,
            averages: PerJob::default(),
            ticks_per,
            planned: PerJob::default(),
            results: PerJob::default(),
            deltas: PerJob::default(),
            projection: CapacityProjection::default(),
            capacity_limit,
            live: PerJob::default(),
            launch_failures: PerJob::default(),
            tick: 0,
            last_adjust_tick: 0,
        })
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn tunables(&self) -> Tunables {
        self.tunables
    }

    pub fn channels(&self) -> PerJob<ChannelId> {
        self.channels
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn average(&self, job: JobType) -> &RollingAverage {
        &self.averages[job]
    }

    pub fn delta(&self, job: JobType) -> Option<f64> {
        self.deltas[job]
    }

    /// Projected steady-state cost over the start-up capacity.
    pub fn usage_ratio(&self) -> f64 {
        self.projection.usage_ratio(self.capacity_limit)
    }

    // ── Convergence ───────────────────────────────────────────────────────────

    /// Tune until projected usage sits inside the band, at most
    /// `convergence_iterations` times.  Not converging is not an error.
    ///
    /// # Errors
    /// [`SchedulerError::ExtractFractionUnderflow`] if tuning runs out of
    /// extract fraction, or an unknown target.
    pub fn converge(&mut self) -> Result<Convergence, SchedulerError> {
        let state = self.observe()?;
        self.prime(&state);

        let mut iterations = 0;
        loop {
            let usage_ratio = self.usage_ratio();
            if band_position(usage_ratio, &self.config) == BandPosition::Within {
                info!(
                    target = %self.target,
                    iterations,
                    usage_ratio,
                    extract_fraction = self.tunables.extract_fraction,
                    duration_multiplier = self.tunables.duration_multiplier,
                    "tuning converged"
                );
                return Ok(Convergence {
                    iterations,
                    converged: true,
                    usage_ratio,
                });
            }
            if iterations >= self.config.convergence_iterations {
                warn!(
                    target = %self.target,
                    iterations,
                    usage_ratio,
                    "tuning did not converge; continuing with last values"
                );
                return Ok(Convergence {
                    iterations,
                    converged: false,
                    usage_ratio,
                });
            }
            iterations += 1;
            self.converge_step(&state, usage_ratio)?;
        }
    }

    fn prime(&mut self, state: &TargetState) {
        self.refresh_cadence(state);
        self.estimate_threads(state);
        self.project(state);
    }

    fn converge_step(
        &mut self,
        state: &TargetState,
        usage_ratio: f64,
    ) -> Result<Adjustment, SchedulerError> {
        let adjustment = self.retune(state, usage_ratio)?;
        self.estimate_threads(state);
        self.project(state);
        Ok(adjustment)
    }

    // ── Control loop ──────────────────────────────────────────────────────────

    /// Converge, then tick every `tick_ms` until `max_ticks` ticks have run
    /// (or forever).
    ///
    /// # Errors
    /// The first fatal [`SchedulerError`].
    pub async fn run(&mut self, max_ticks: Option<u64>) -> Result<(), SchedulerError> {
        let interval = self.config.tick_interval();
        self.converge()?;

        loop {
            if max_ticks.is_some_and(|max| self.tick >= max) {
                info!(target = %self.target, ticks = self.tick, "tick budget reached");
                return Ok(());
            }
            let started = Instant::now();
            self.step()?;
            tokio::time::sleep(interval.saturating_sub(started.elapsed())).await;
        }
    }

    /// One control tick.
    ///
    /// # Errors
    /// A fatal tuning failure, or the target disappearing.
    pub fn step(&mut self) -> Result<TickReport, SchedulerError> {
        let state = self.observe()?;

        self.refresh_cadence(&state);
        self.estimate_threads(&state);
        let launched = self.launch_due(&state);
        self.ingest_results();
        self.project(&state);
        let adjustment = self.audit(&state)?;
        self.prune_finished();

        let report = TickReport {
            tick: self.tick,
            launched,
            adjustment,
            usage_ratio: self.usage_ratio(),
        };
        debug!(
            target = %self.target,
            tick = self.tick,
            launched = ?report.launched,
            usage_ratio = report.usage_ratio,
            stability = state.current_stability,
            yield_fraction = state.yield_fraction(),
            "tick"
        );

        self.tick += 1;
        Ok(report)
    }

    pub fn status(&self) -> ContinuousStatus {
        let host = self.world.snapshot(&self.host);
        let actual_usage = if host.total_capacity > 0.0 {
            host.used_capacity / host.total_capacity
        } else {
            0.0
        };

        ContinuousStatus {
            target: self.target.clone(),
            host: self.host.clone(),
            tick: self.tick,
            tunables: self.tunables,
            jobs: PerJob::from_fn(|job| JobStatus {
                channel: self.channels[job],
                average: self.averages[job],
                ticks_per_launch: self.ticks_per[job],
                planned: self.planned[job],
                result: self.results[job],
                delta: self.deltas[job],
                projection: self.projection.per_job[job],
                live_processes: self.live[job].len(),
                launch_failures: self.launch_failures[job],
            }),
            projected_usage: self.usage_ratio(),
            actual_usage,
            capacity_limit: self.capacity_limit,
        }
    }

    // ── Tick phases ───────────────────────────────────────────────────────────

    fn observe(&self) -> Result<TargetState, SchedulerError> {
        self.world
            .observe(&self.target)
            .ok_or_else(|| SchedulerError::UnknownTarget(self.target.clone()))
    }

    fn durations(&self, state: &TargetState) -> PerJob<f64> {
        PerJob::from_fn(|job| self.world.duration(job, state))
    }

    fn refresh_cadence(&mut self, state: &TargetState) {
        self.ticks_per = cadence(&self.durations(state), self.tunables.duration_multiplier);
    }

    fn estimate_threads(&mut self, state: &TargetState) {
        // Extract: a fixed share of max yield, paused while depleted
        let amount = self.tunables.extract_fraction * state.max_yield;
        let extract = whole_threads(self.world.threads_for(JobType::Extract, state, amount));
        self.averages.extract.update(extract as f64);
        if state.yield_fraction() < self.config.depletion_threshold {
            debug!(
                target = %self.target,
                yield_fraction = state.yield_fraction(),
                "target depleted; extraction paused"
            );
            self.averages.extract.reset();
        }
        self.planned.extract = amount;

        // Replenish: recover depletion and counteract the next extraction
        let safety = 1.0 / state.yield_fraction().max(self.config.replenish_floor);
        let counteract = if state.current_yield > 0.0 {
            (amount / state.current_yield) / self.ticks_per.replenish
        } else {
            0.0
        };
        let multiplier = safety + counteract;
        let replenish =
            whole_threads(self.world.threads_for(JobType::Replenish, state, multiplier));
        self.averages.replenish.update(replenish as f64);
        self.planned.replenish = multiplier;

        // Stabilize: undo what the other two add, plus part of the margin
        let margin = state.instability_margin() * self.config.stability_margin_fraction;
        let added = self
            .world
            .stability_cost(JobType::Extract, self.averages.extract.mean())
            / self.ticks_per.extract
            + self
                .world
                .stability_cost(JobType::Replenish, self.averages.replenish.mean())
                / self.ticks_per.replenish
            + margin;
        let per_launch = added / self.ticks_per.stabilize;
        let stabilize =
            whole_threads(self.world.threads_for(JobType::Stabilize, state, per_launch));
        self.averages.stabilize.update(stabilize as f64);
        self.planned.stabilize = per_launch;

        debug!(
            target = %self.target,
            extract,
            replenish,
            stabilize,
            multiplier,
            stability_per_launch = per_launch,
            "thread estimates"
        );
    }

    fn launch_due(&mut self, state: &TargetState) -> PerJob<u64> {
        let mut launched = PerJob::default();
        let first_replenish_lands = self.world.duration(JobType::Replenish, state);

        for job in JobType::ALL {
            if self.tick % launch_period(self.ticks_per[job]) != 0 {
                continue;
            }
            // Let the first replenishment land before extracting
            if job == JobType::Extract && (self.tick as f64) <= first_replenish_lands {
                continue;
            }

            let threads = self.averages[job].ceil_threads();
            if threads == 0 {
                debug!(target = %self.target, job = %job, "no threads to launch");
                continue;
            }

            let request = LaunchRequest {
                job,
                host: &self.host,
                threads,
                target: &self.target,
                channel: Some(self.channels[job]),
            };
            match self.world.launch(&request) {
                Ok(handle) => {
                    debug!(
                        target = %self.target,
                        job = %job,
                        threads,
                        handle,
                        "launched"
                    );
                    self.live[job].push(handle);
                    launched[job] = threads;
                }
                Err(e) => {
                    let spare = self.world.snapshot(&self.host).spare();
                    warn!(
                        target = %self.target,
                        host = %self.host,
                        job = %job,
                        threads,
                        requested = threads as f64 * self.world.unit_cost(job),
                        spare,
                        error = %e,
                        "launch failed; skipping until next cadence slot"
                    );
                    self.launch_failures[job] += 1;
                }
            }
        }
        launched
    }

    fn ingest_results(&mut self) {
        for job in JobType::ALL {
            if let Some(value) = self.world.try_read(self.channels[job]) {
                if value != 0.0 {
                    self.results[job] = Some(ChannelReading {
                        value,
                        tick: self.tick,
                    });
                }
            }

            let planned = self.planned[job];
            self.deltas[job] = match self.results[job] {
                Some(reading) if planned.abs() > f64::EPSILON => {
                    Some((reading.value - planned) / planned)
                }
                _ => None,
            };
        }
    }

    fn project(&mut self, state: &TargetState) {
        let durations = self.durations(state);
        let threads = self.averages.map(|_, avg| avg.ceil_threads());
        let unit_costs = PerJob::from_fn(|job| self.world.unit_cost(job));
        self.projection =
            CapacityProjection::compute(&durations, &self.ticks_per, &threads, &unit_costs);
    }

    /// Re-tune when the host's real spare capacity confirms the projection
    /// is off, at most once per Replenish duration.
    fn audit(&mut self, state: &TargetState) -> Result<Adjustment, SchedulerError> {
        let usage_ratio = self.usage_ratio();
        let spare_fraction = self.world.snapshot(&self.host).spare_fraction();
        let lower = self.config.lower_band;
        let upper = self.config.upper_band;

        let under = usage_ratio < lower && spare_fraction > lower;
        let over = usage_ratio > upper && spare_fraction < 1.0 - upper;
        if !(under || over) {
            return Ok(Adjustment::None);
        }

        let cycle = self.world.duration(JobType::Replenish, state);
        if ((self.tick - self.last_adjust_tick) as f64) <= cycle {
            return Ok(Adjustment::None);
        }

        let adjustment = self.retune(state, usage_ratio)?;
        self.last_adjust_tick = self.tick;
        Ok(adjustment)
    }

    fn retune(
        &mut self,
        state: &TargetState,
        usage_ratio: f64,
    ) -> Result<Adjustment, SchedulerError> {
        let adjustment = tuning::tune(
            &mut self.tunables,
            &self.config,
            usage_ratio,
            &self.ticks_per,
            &self.target,
        )?;
        self.refresh_cadence(state);
        for job in JobType::ALL {
            self.averages[job].reset();
        }
        Ok(adjustment)
    }

    fn prune_finished(&mut self) {
        for job in JobType::ALL {
            self.live[job].retain(|&h| self.world.is_alive(h));
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
