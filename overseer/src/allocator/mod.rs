/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Multi-target phased allocator.
//!
//! [`PhasedAllocator`] moves every target through
//! `Weaken → Grow → Hack → Done` across a pool of hosts.  Each tick:
//!
//! 1. Drop handles of finished jobs; stop if no target is left.
//! 2. Observe every target and apply due phase transitions.  Entering a
//!    working phase cancels the target's outstanding jobs.
//! 3. Snapshot host capacity once ([`HostPool`]) and dispatch, in order,
//!    Hack targets, Grow targets and Weaken targets.  Grow and Weaken are
//!    skipped once no host can fit one more job.
//! 4. Retire targets that reached `Done`.
//!
//! | Phase | Dispatches | Complete when |
//! |---|---|---|
//! | Weaken | Stabilize for `stability − min` | deficit ≤ `weaken_margin` |
//! | Grow | Replenish toward `growth_multiplier` + compensating Stabilize | yield ≥ `grow_complete_fraction × max` |
//! | Hack | Extract for `extraction_fraction × max` + 1 Stabilize per `hack_stabilize_ratio` | both fully allocated |
//!
//! Requests are topped up: a job type that was granted part of its threads
//! only asks for the remainder on later ticks.  Once a Weaken or Grow round
//! is fully dispatched and all of its jobs have finished without meeting the
//! phase objective, a new round is sized from the target's current state.
//!
//! A launch that fails after the pool granted it is fatal
//! ([`AllocatorError::LaunchFailed`]).

pub mod error;
pub mod phase;
pub mod pool;

pub use error::AllocatorError;
pub use phase::{Phase, PhaseState};
pub use pool::HostPool;

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, error, info};

use crate::config::PhasedConfig;
use crate::job::{whole_threads, JobType, PerJob, TargetState};
use crate::world::{LaunchRequest, World};

use pool::split_proportional;

// ── Reports ───────────────────────────────────────────────────────────────────

/// Threads requested for and granted to one job type of one target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dispatch {
    pub target: String,
    pub job: JobType,
    pub requested: u64,
    pub granted: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    pub target: String,
    pub from: Phase,
    pub to: Phase,
}

/// What one call to [`PhasedAllocator::step`] did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhasedTick {
    pub tick: u64,
    pub transitions: Vec<Transition>,
    pub dispatches: Vec<Dispatch>,
    /// No target is left in a working phase.
    pub finished: bool,
}

/// One status-feed row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetStatus {
    pub id: usize,
    pub target: String,
    pub phase: Phase,
    pub allocation: PerJob<f64>,
    pub outstanding: usize,
    pub sleep_ticks: u64,
}

// ── PhasedAllocator ───────────────────────────────────────────────────────────

pub struct PhasedAllocator<W: World> {
    world: Arc<W>,
    config: PhasedConfig,
    active: Vec<PhaseState>,
    finished: Vec<PhaseState>,
    tick: u64,
}

impl<W: World> PhasedAllocator<W> {
    /// Start every target in `Weaken`.
    ///
    /// # Errors
    /// [`AllocatorError::UnknownTarget`] for a target the oracle does not know.
    pub fn new<I, S>(world: Arc<W>, config: PhasedConfig, targets: I) -> Result<Self, AllocatorError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut active = Vec::new();
        for (id, name) in targets.into_iter().enumerate() {
            let name = name.into();
            let state = world
                .observe(&name)
                .ok_or_else(|| AllocatorError::UnknownTarget(name.clone()))?;
            let mut phase = PhaseState::new(id, name);
            phase.set_sleep_ticks(ceil_ticks(world.duration(JobType::Stabilize, &state)));
            active.push(phase);
        }

        info!(
            targets = active.len(),
            excluded_hosts = ?config.excluded_hosts,
            "phased allocator ready"
        );
        Ok(Self {
            world,
            config,
            active,
            finished: Vec::new(),
            tick: 0,
        })
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn is_finished(&self) -> bool {
        self.active.is_empty()
    }

    pub fn phase_of(&self, target: &str) -> Option<Phase> {
        self.active
            .iter()
            .chain(&self.finished)
            .find(|s| s.target() == target)
            .map(PhaseState::phase)
    }

    /// Cancel every process on every non-excluded host.
    pub fn kill_all(&self) {
        for host in self.world.hosts() {
            if self.config.excluded_hosts.contains(&host) {
                continue;
            }
            info!(host = %host, "cancelling all processes");
            self.world.cancel_all(&host);
        }
    }

    /// Cancel every outstanding job of every active target.
    pub fn shutdown(&mut self) {
        for state in &mut self.active {
            for handle in state.take_handles() {
                self.world.cancel(handle);
            }
        }
    }

    /// Tick every `tick_ms` until all targets are done or `max_ticks` ticks
    /// have run.  A fatal error cancels all outstanding jobs first.
    ///
    /// # Errors
    /// The first fatal [`AllocatorError`].
    pub async fn run(&mut self, max_ticks: Option<u64>) -> Result<(), AllocatorError> {
        let interval = self.config.tick_interval();
        loop {
            if max_ticks.is_some_and(|max| self.tick >= max) {
                info!(ticks = self.tick, "tick budget reached");
                return Ok(());
            }
            let started = Instant::now();
            match self.step() {
                Ok(report) if report.finished => {
                    info!(ticks = self.tick, "no more targets to work on");
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "phased allocator halted");
                    self.shutdown();
                    return Err(e);
                }
            }
            tokio::time::sleep(interval.saturating_sub(started.elapsed())).await;
        }
    }

    /// One control tick.
    ///
    /// # Errors
    /// A failed launch, or a target the oracle no longer knows.
    pub fn step(&mut self) -> Result<PhasedTick, AllocatorError> {
        let mut report = PhasedTick {
            tick: self.tick,
            ..PhasedTick::default()
        };
        self.tick += 1;

        let world = &*self.world;
        let config = &self.config;

        for state in &mut self.active {
            state.prune(|h| world.is_alive(h));
        }
        if self.active.is_empty() {
            report.finished = true;
            return Ok(report);
        }

        let observed = self
            .active
            .iter()
            .map(|s| {
                world
                    .observe(s.target())
                    .ok_or_else(|| AllocatorError::UnknownTarget(s.target().to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        // ── Transitions ───────────────────────────────────────────────────────
        for (state, target) in self.active.iter_mut().zip(&observed) {
            while let Some(next) = transition_due(state, target, config) {
                let from = state.phase();
                for handle in state.advance(next) {
                    world.cancel(handle);
                }
                report.transitions.push(Transition {
                    target: state.target().to_string(),
                    from,
                    to: next,
                });
            }

            let in_round_phase = matches!(state.phase(), Phase::Weaken | Phase::Grow);
            if in_round_phase && state.fully_allocated() && state.handles().is_empty() {
                debug!(
                    target = %state.target(),
                    phase = %state.phase(),
                    "round finished short of objective; starting another"
                );
                state.start_round();
            }
        }

        // ── Dispatch ──────────────────────────────────────────────────────────
        let max_unit = JobType::ALL
            .iter()
            .map(|&job| world.unit_cost(job))
            .fold(0.0, f64::max);
        let mut pass = DispatchPass {
            world,
            config,
            pool: HostPool::snapshot(world, &config.excluded_hosts),
            dispatches: Vec::new(),
            transitions: Vec::new(),
        };

        for phase in [Phase::Hack, Phase::Grow, Phase::Weaken] {
            if phase != Phase::Hack && !pass.pool.can_fund(max_unit) {
                debug!(phase = %phase, "host capacity exhausted; skipping");
                break;
            }
            for (state, target) in self.active.iter_mut().zip(&observed) {
                if state.phase() == phase {
                    pass.dispatch(state, target)?;
                }
            }
        }
        report.dispatches = pass.dispatches;
        report.transitions.extend(pass.transitions);

        // ── Retire ────────────────────────────────────────────────────────────
        let (done, active): (Vec<_>, Vec<_>) = std::mem::take(&mut self.active)
            .into_iter()
            .partition(|s| s.phase() == Phase::Done);
        self.active = active;
        self.finished.extend(done);
        report.finished = self.active.is_empty();

        debug!(
            tick = report.tick,
            active = self.active.len(),
            finished = self.finished.len(),
            dispatches = report.dispatches.len(),
            granted = report.dispatches.iter().map(|d| d.granted).sum::<u64>(),
            "tick"
        );
        Ok(report)
    }

    /// One row per target, active and finished, in configuration order.
    pub fn status(&self) -> Vec<TargetStatus> {
        let mut rows: Vec<TargetStatus> = self
            .active
            .iter()
            .chain(&self.finished)
            .map(|s| TargetStatus {
                id: s.id(),
                target: s.target().to_string(),
                phase: s.phase(),
                allocation: s.allocations(),
                outstanding: s.handles().len(),
                sleep_ticks: s.sleep_ticks(),
            })
            .collect();
        rows.sort_by_key(|r| r.id);
        rows
    }
}

fn transition_due(state: &PhaseState, target: &TargetState, config: &PhasedConfig) -> Option<Phase> {
    match state.phase() {
        Phase::Weaken if target.instability_margin() <= config.weaken_margin => Some(Phase::Grow),
        Phase::Grow if target.current_yield >= config.grow_complete_fraction * target.max_yield => {
            Some(Phase::Hack)
        }
        Phase::Hack if state.fully_allocated() => Some(Phase::Done),
        _ => None,
    }
}

/// Remaining threads of a `full`-thread request that is `fraction` done.
fn top_up(full: u64, fraction: f64) -> u64 {
    whole_threads(full as f64 * (1.0 - fraction))
}

fn ceil_ticks(duration: f64) -> u64 {
    if duration.is_finite() && duration > 0.0 {
        duration.ceil() as u64
    } else {
        0
    }
}

// ── Dispatch pass ─────────────────────────────────────────────────────────────

/// State of the dispatch half of one tick.
struct DispatchPass<'a, W: World> {
    world: &'a W,
    config: &'a PhasedConfig,
    pool: HostPool,
    dispatches: Vec<Dispatch>,
    transitions: Vec<Transition>,
}

impl<W: World> DispatchPass<'_, W> {
    fn dispatch(&mut self, state: &mut PhaseState, target: &TargetState) -> Result<(), AllocatorError> {
        match state.phase() {
            Phase::Weaken => self.weaken(state, target),
            Phase::Grow => self.grow(state, target),
            Phase::Hack => self.hack(state, target),
            Phase::Done => Ok(()),
        }
    }

    fn weaken(&mut self, state: &mut PhaseState, target: &TargetState) -> Result<(), AllocatorError> {
        let per_thread = self.world.effect_per_thread(JobType::Stabilize, target);
        let full = if per_thread > 0.0 {
            whole_threads(target.instability_margin() / per_thread)
        } else {
            0
        };
        let requested = top_up(full, state.allocation(JobType::Stabilize));
        debug!(
            target = %target.name,
            deficit = target.instability_margin(),
            full,
            requested,
            "weaken"
        );

        let granted = self.fill(state, JobType::Stabilize, requested)?;
        state.record_grant(JobType::Stabilize, requested, granted);
        self.note(state, target, JobType::Stabilize, requested, granted);
        Ok(())
    }

    fn grow(&mut self, state: &mut PhaseState, target: &TargetState) -> Result<(), AllocatorError> {
        let replenish_full = whole_threads(self.world.threads_for(
            JobType::Replenish,
            target,
            self.config.growth_multiplier,
        ));
        let per_thread = self.world.effect_per_thread(JobType::Stabilize, target);
        let stabilize_full = if per_thread > 0.0 {
            whole_threads(
                self.world
                    .stability_cost(JobType::Replenish, replenish_full as f64)
                    / per_thread,
            )
        } else {
            0
        };
        self.paired(state, target, JobType::Replenish, replenish_full, stabilize_full)
    }

    fn hack(&mut self, state: &mut PhaseState, target: &TargetState) -> Result<(), AllocatorError> {
        let desired = self.config.extraction_fraction * target.max_yield;
        let extract_full = whole_threads(self.world.threads_for(JobType::Extract, target, desired));
        let stabilize_full = extract_full.div_ceil(self.config.hack_stabilize_ratio.max(1));
        self.paired(state, target, JobType::Extract, extract_full, stabilize_full)?;

        if state.fully_allocated() {
            state.advance(Phase::Done);
            self.transitions.push(Transition {
                target: target.name.clone(),
                from: Phase::Hack,
                to: Phase::Done,
            });
        }
        Ok(())
    }

    /// Dispatch `primary` together with compensating Stabilize threads,
    /// splitting by demand when the pool cannot hold both.
    fn paired(
        &mut self,
        state: &mut PhaseState,
        target: &TargetState,
        primary: JobType,
        primary_full: u64,
        stabilize_full: u64,
    ) -> Result<(), AllocatorError> {
        let primary_req = top_up(primary_full, state.allocation(primary));
        let stabilize_req = top_up(stabilize_full, state.allocation(JobType::Stabilize));

        let unit = self
            .world
            .unit_cost(primary)
            .max(self.world.unit_cost(JobType::Stabilize));
        let available = self.pool.threads_available(unit);
        let (primary_share, stabilize_share) =
            split_proportional(primary_req, stabilize_req, available);
        if (primary_share, stabilize_share) != (primary_req, stabilize_req) {
            debug!(
                target = %target.name,
                job = %primary,
                available,
                primary_req,
                stabilize_req,
                primary_share,
                stabilize_share,
                "capacity short; splitting by demand"
            );
        }

        let stabilize_granted = self.fill(state, JobType::Stabilize, stabilize_share)?;
        let primary_granted = self.fill(state, primary, primary_share)?;

        state.record_grant(primary, primary_req, primary_granted);
        state.record_grant(JobType::Stabilize, stabilize_req, stabilize_granted);
        self.note(state, target, primary, primary_req, primary_granted);
        self.note(state, target, JobType::Stabilize, stabilize_req, stabilize_granted);
        Ok(())
    }

    /// Launch up to `threads` threads of `job` from the pool, host by host.
    fn fill(&mut self, state: &mut PhaseState, job: JobType, threads: u64) -> Result<u64, AllocatorError> {
        if threads == 0 {
            return Ok(0);
        }
        let unit = self.world.unit_cost(job);
        let target = state.target().to_string();
        let mut granted = 0;

        for grant in self.pool.take(threads, unit) {
            let request = LaunchRequest {
                job,
                host: &grant.host,
                threads: grant.threads,
                target: &target,
                channel: None,
            };
            match self.world.launch(&request) {
                Ok(handle) => {
                    debug!(
                        target = %target,
                        host = %grant.host,
                        job = %job,
                        threads = grant.threads,
                        handle,
                        "dispatched"
                    );
                    state.push_handle(handle);
                    granted += grant.threads;
                }
                Err(source) => {
                    error!(
                        target = %target,
                        host = %grant.host,
                        job = %job,
                        threads = grant.threads,
                        spare = grant.spare,
                        error = %source,
                        "launch failed"
                    );
                    return Err(AllocatorError::LaunchFailed {
                        job,
                        target,
                        host: grant.host,
                        threads: grant.threads,
                        spare: grant.spare,
                        source,
                    });
                }
            }
        }
        Ok(granted)
    }

    fn note(
        &mut self,
        state: &mut PhaseState,
        target: &TargetState,
        job: JobType,
        requested: u64,
        granted: u64,
    ) {
        if requested == 0 {
            return;
        }
        if granted > 0 {
            let wait = ceil_ticks(self.world.duration(job, target));
            state.set_sleep_ticks(wait.max(state.sleep_ticks()));
        }
        self.dispatches.push(Dispatch {
            target: target.name.clone(),
            job,
            requested,
            granted,
        });
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::sim::{SimEffects, SimHost, SimTarget, SimWorld, WorldConfig};
    use crate::world::{CapacityProvider, EffectOracle, ProcessLauncher};

    fn sim_host(name: &str, capacity: f64) -> SimHost {
        SimHost {
            name: name.into(),
            total_capacity: capacity,
            used_capacity: 0.0,
        }
    }

    fn sim_target(name: &str, stability: f64, min: f64, current: f64, max: f64) -> SimTarget {
        SimTarget {
            name: name.into(),
            stability,
            min_stability: min,
            current_yield: current,
            max_yield: max,
            growth_rate: 20.0,
            stabilize_time: 4.0,
            replenish_time: 6.0,
            extract_time: 3.0,
        }
    }

    fn world(hosts: Vec<SimHost>, targets: Vec<SimTarget>, effects: SimEffects) -> Arc<SimWorld> {
        Arc::new(SimWorld::new(WorldConfig {
            hosts,
            targets,
            effects,
        }))
    }

    fn allocator(world: &Arc<SimWorld>, targets: &[&str]) -> PhasedAllocator<SimWorld> {
        PhasedAllocator::new(
            Arc::clone(world),
            PhasedConfig::default(),
            targets.iter().copied(),
        )
        .unwrap()
    }

    fn dispatched(report: &PhasedTick, job: JobType) -> (u64, u64) {
        report
            .dispatches
            .iter()
            .filter(|d| d.job == job)
            .fold((0, 0), |(r, g), d| (r + d.requested, g + d.granted))
    }

    // ── Scenario A ────────────────────────────────────────────────────────────

    #[test]
    fn weaken_sizes_stabilize_from_deficit() {
        let effects = SimEffects {
            stabilize_per_thread: 2.0,
            ..SimEffects::default()
        };
        let w = world(
            vec![sim_host("n1", 1_000.0)],
            vec![sim_target("t", 50.0, 10.0, 500.0, 1_000.0)],
            effects,
        );
        let mut a = allocator(&w, &["t"]);

        let report = a.step().unwrap();
        assert_eq!(dispatched(&report, JobType::Stabilize), (20, 20));
        assert_eq!(w.running_threads(JobType::Stabilize, "t"), 20);
        assert_eq!(a.phase_of("t"), Some(Phase::Weaken));

        // Jobs land: 50 − 20×2 = 10, deficit 0
        w.advance(4);
        let report = a.step().unwrap();
        assert_eq!(
            report.transitions,
            vec![Transition {
                target: "t".into(),
                from: Phase::Weaken,
                to: Phase::Grow,
            }]
        );
        assert_eq!(a.phase_of("t"), Some(Phase::Grow));
    }

    #[test]
    fn weaken_ends_at_margin_and_cancels_outstanding_jobs() {
        let effects = SimEffects {
            stabilize_per_thread: 2.0,
            ..SimEffects::default()
        };
        let w = world(
            vec![sim_host("n1", 1_000.0)],
            vec![sim_target("t", 50.0, 10.0, 500.0, 1_000.0)],
            effects,
        );
        let mut a = allocator(&w, &["t"]);
        a.step().unwrap();
        assert!(w.running_jobs() > 0);

        // Deficit 4.5 is within the margin of 5
        w.set_target_stability("t", 14.5);
        let report = a.step().unwrap();
        assert_eq!(a.phase_of("t"), Some(Phase::Grow));
        assert_eq!(w.running_threads(JobType::Stabilize, "t"), dispatched(&report, JobType::Stabilize).1);
        assert_eq!(
            w.running_threads(JobType::Replenish, "t"),
            dispatched(&report, JobType::Replenish).1
        );
    }

    // ── Scenario C ────────────────────────────────────────────────────────────

    #[test]
    fn two_hosts_of_100_grant_at_most_20_threads_of_cost_10() {
        let effects = SimEffects {
            unit_costs: PerJob::new(10.0, 10.0, 10.0),
            ..SimEffects::default()
        };
        let w = world(
            vec![sim_host("n1", 100.0), sim_host("n2", 100.0)],
            vec![sim_target("t", 105.0, 5.0, 500.0, 1_000.0)],
            effects,
        );
        let mut a = allocator(&w, &["t"]);

        let report = a.step().unwrap();
        // 100 deficit / 0.05 per thread
        assert_eq!(dispatched(&report, JobType::Stabilize), (2_000, 20));
        assert_eq!(w.used_capacity("n1"), 100.0);
        assert_eq!(w.used_capacity("n2"), 100.0);
        let s = &a.status()[0];
        assert!((s.allocation.stabilize - 0.01).abs() < 1e-12);
        assert_eq!(s.outstanding, 2, "one process per host");

        // Nothing left to grant until jobs finish
        let report = a.step().unwrap();
        assert!(report.dispatches.is_empty());
    }

    // ── Capacity ──────────────────────────────────────────────────────────────

    #[test]
    fn grants_never_exceed_spare_capacity() {
        let w = world(
            vec![sim_host("n1", 50.0), sim_host("n2", 30.0)],
            vec![
                sim_target("a", 40.0, 5.0, 100.0, 1_000.0),
                sim_target("b", 25.0, 5.0, 100.0, 1_000.0),
            ],
            SimEffects::default(),
        );
        let mut a = allocator(&w, &["a", "b"]);

        for _ in 0..20 {
            let spare: f64 = ["n1", "n2"].iter().map(|h| w.snapshot(h).spare()).sum();
            let report = a.step().unwrap();
            let cost: f64 = report
                .dispatches
                .iter()
                .map(|d| d.granted as f64 * w.unit_cost(d.job))
                .sum();
            assert!(cost <= spare + 1e-9, "granted {cost} of {spare} spare");
            for h in ["n1", "n2"] {
                let snap = w.snapshot(h);
                assert!(snap.used_capacity <= snap.total_capacity + 1e-9);
            }
            w.advance(1);
        }
    }

    #[test]
    fn scarce_capacity_is_split_between_grow_jobs() {
        // Weaken is already satisfied, so the first tick is a Grow
        let w = world(
            vec![sim_host("n1", 10.0)],
            vec![sim_target("t", 5.0, 5.0, 10.0, 1_000.0)],
            SimEffects {
                stabilize_per_thread: 0.25,
                replenish_stability_cost: 0.25,
                ..SimEffects::default()
            },
        );
        let mut a = allocator(&w, &["t"]);

        let report = a.step().unwrap();
        assert_eq!(a.phase_of("t"), Some(Phase::Grow));
        let (rep_req, rep_granted) = dispatched(&report, JobType::Replenish);
        let (stab_req, stab_granted) = dispatched(&report, JobType::Stabilize);
        // 12 Replenish threads add 3 stability → 12 Stabilize threads; only 5 fit
        assert_eq!((rep_req, stab_req), (12, 12));
        assert!(rep_granted >= 1 && stab_granted >= 1, "neither side starves");
        assert_eq!(rep_granted + stab_granted, 5);

        let s = &a.status()[0];
        assert!(s.allocation.replenish > 0.0 && s.allocation.replenish < 1.0);
        assert!(s.allocation.stabilize > 0.0 && s.allocation.stabilize < 1.0);
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    #[test]
    fn target_moves_through_every_phase_in_order() {
        let w = world(
            vec![sim_host("home", 32.0), sim_host("n1", 200.0)],
            vec![sim_target("t", 12.0, 5.0, 500.0, 1_000.0)],
            SimEffects::default(),
        );
        let mut a = allocator(&w, &["t"]);

        let mut seen = vec![Phase::Weaken];
        let mut finished = false;
        for _ in 0..200 {
            let report = a.step().unwrap();
            let phase = a.phase_of("t").unwrap();
            assert!(phase >= *seen.last().unwrap(), "phase regressed to {phase}");
            if phase != *seen.last().unwrap() {
                seen.push(phase);
            }
            assert_eq!(w.used_capacity("home"), 0.0, "excluded host was used");
            if report.finished {
                finished = true;
                break;
            }
            w.advance(1);
        }

        assert!(finished, "allocator never finished");
        assert_eq!(seen, vec![Phase::Weaken, Phase::Grow, Phase::Hack, Phase::Done]);
        assert!(a.is_finished());
        // Final Hack jobs are left running
        assert!(w.running_threads(JobType::Extract, "t") > 0);

        let report = a.step().unwrap();
        assert!(report.finished);
        assert!(report.dispatches.is_empty());
    }

    #[test]
    fn hack_dispatches_one_stabilize_per_six_extract() {
        // At minimum stability and full yield the target goes straight to Hack
        let w = world(
            vec![sim_host("n1", 1_000.0)],
            vec![sim_target("t", 5.0, 5.0, 1_000.0, 1_000.0)],
            SimEffects::default(),
        );
        let mut a = allocator(&w, &["t"]);

        let report = a.step().unwrap();
        // 10% of 1000 at 2 per thread
        assert_eq!(dispatched(&report, JobType::Extract), (50, 50));
        assert_eq!(dispatched(&report, JobType::Stabilize), (9, 9));
        assert_eq!(a.phase_of("t"), Some(Phase::Done));
        assert!(report.finished);
        let to: Vec<Phase> = report.transitions.iter().map(|t| t.to).collect();
        assert_eq!(to, vec![Phase::Grow, Phase::Hack, Phase::Done]);
    }

    // ── Failures ──────────────────────────────────────────────────────────────

    #[test]
    fn launch_failure_is_fatal() {
        let w = world(
            vec![sim_host("n1", 100.0)],
            vec![sim_target("t", 50.0, 5.0, 500.0, 1_000.0)],
            SimEffects::default(),
        );
        w.set_launch_failure(true);
        let mut a = allocator(&w, &["t"]);

        match a.step() {
            Err(AllocatorError::LaunchFailed {
                job,
                target,
                host,
                threads,
                ..
            }) => {
                assert_eq!(job, JobType::Stabilize);
                assert_eq!(target, "t");
                assert_eq!(host, "n1");
                assert_eq!(threads, 57);
            }
            other => panic!("expected launch failure, got {other:?}"),
        }
    }

    #[test]
    fn unknown_target_is_rejected() {
        let w = world(vec![sim_host("n1", 10.0)], vec![], SimEffects::default());
        let err = PhasedAllocator::new(Arc::clone(&w), PhasedConfig::default(), ["ghost"])
            .err()
            .unwrap();
        assert!(matches!(err, AllocatorError::UnknownTarget(t) if t == "ghost"));
    }

    #[test]
    fn shutdown_cancels_outstanding_jobs() {
        let w = world(
            vec![sim_host("n1", 100.0)],
            vec![sim_target("t", 50.0, 5.0, 500.0, 1_000.0)],
            SimEffects::default(),
        );
        let mut a = allocator(&w, &["t"]);
        a.step().unwrap();
        assert!(w.running_jobs() > 0);

        a.shutdown();
        assert_eq!(w.running_jobs(), 0);
        assert_eq!(a.status()[0].outstanding, 0);
    }

    #[test]
    fn kill_all_spares_excluded_hosts() {
        let w = world(
            vec![sim_host("home", 32.0), sim_host("n1", 32.0)],
            vec![sim_target("t", 50.0, 5.0, 500.0, 1_000.0)],
            SimEffects::default(),
        );
        for host in ["home", "n1"] {
            w.launch(&LaunchRequest {
                job: JobType::Stabilize,
                host,
                threads: 1,
                target: "t",
                channel: None,
            })
            .unwrap();
        }

        let a = allocator(&w, &["t"]);
        a.kill_all();
        assert_eq!(w.running_jobs(), 1);
        assert!(w.used_capacity("home") > 0.0);
        assert_eq!(w.used_capacity("n1"), 0.0);
    }

    #[test]
    fn status_lists_targets_in_order() {
        let w = world(
            vec![sim_host("n1", 100.0)],
            vec![
                sim_target("a", 50.0, 5.0, 500.0, 1_000.0),
                sim_target("b", 5.0, 5.0, 1_000.0, 1_000.0),
            ],
            SimEffects::default(),
        );
        let mut a = allocator(&w, &["a", "b"]);
        a.step().unwrap();

        let rows = a.status();
        let names: Vec<&str> = rows.iter().map(|r| r.target.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(rows[0].phase, Phase::Weaken);
        assert!(rows[0].sleep_ticks >= 4);
        assert!(serde_yaml::to_string(&rows).is_ok());
    }

    #[tokio::test]
    async fn run_exits_when_every_target_is_done() {
        let w = world(
            vec![sim_host("n1", 1_000.0)],
            vec![sim_target("t", 5.0, 5.0, 1_000.0, 1_000.0)],
            SimEffects::default(),
        );
        let config = PhasedConfig {
            tick_ms: 1,
            ..PhasedConfig::default()
        };
        let mut a = PhasedAllocator::new(Arc::clone(&w), config, ["t"]).unwrap();
        a.run(Some(50)).await.unwrap();
        assert!(a.is_finished());
        assert_eq!(a.tick(), 1);
    }

    #[tokio::test]
    async fn run_cancels_everything_on_fatal_error() {
        let w = world(
            vec![sim_host("n1", 500.0), sim_host("n2", 500.0)],
            vec![sim_target("t", 50.0, 5.0, 500.0, 1_000.0)],
            SimEffects::default(),
        );
        let config = PhasedConfig {
            tick_ms: 1,
            ..PhasedConfig::default()
        };
        let mut a = PhasedAllocator::new(Arc::clone(&w), config, ["t"]).unwrap();
        a.step().unwrap();
        assert_eq!(w.running_jobs(), 2);

        // Free n2 so the next tick tries to top up there
        w.cancel_all("n2");
        w.set_launch_failure(true);
        let err = a.run(Some(5)).await.unwrap_err();
        assert!(matches!(err, AllocatorError::LaunchFailed { ref host, .. } if host == "n2"));
        assert_eq!(w.running_jobs(), 0, "n1 job left running");
    }
}
