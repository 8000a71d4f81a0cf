/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Launch cadence, capacity projection and the self-tuning step.
//!
//! Everything here is a pure function of its arguments so the control loop
//! and the start-up convergence loop share one implementation.
//!
//! # Cadence
//!
//! Extract is the anchor.  With `a = max(extract_duration × multiplier, 1)`,
//! each job type launches every
//!
//! | Job | Ticks per launch |
//! |---|---|
//! | Extract | `a` |
//! | Replenish | `max(a² / replenish_duration, 1)` |
//! | Stabilize | `max(a² / stabilize_duration, 1)` |
//!
//! so raising the multiplier slows every job type down together.
//!
//! # Tuning step
//!
//! Projected usage outside `[lower_band, upper_band]` triggers one step:
//!
//! * If Replenish and Stabilize both launch less often than every 2 ticks, or
//!   the multiplier is above 1, the multiplier moves by
//!   `duration_step × clamp(distance, 1, 10)` (proportionally), where
//!   `distance` is the deviation from the nearest band edge in band widths.
//! * Otherwise `extract_fraction` moves by the fixed `extract_fraction_step`.
//!   Reaching `min_extract_fraction` is fatal.

use serde::Serialize;
use tracing::{error, info};

use super::error::SchedulerError;
use crate::config::ContinuousConfig;
use crate::job::PerJob;

/// Upper clamp of the proportional multiplier step, in band widths.
const MAX_DURATION_STEPS: f64 = 10.0;

/// Float slack when comparing `extract_fraction` against its floor.
const FRACTION_EPSILON: f64 = 1e-9;

// ── Tunables ──────────────────────────────────────────────────────────────────

/// The two levers the self-tuner adjusts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Tunables {
    /// Share of max yield each Extract job aims to remove.
    pub extract_fraction: f64,
    /// Stretch applied to the cadence anchor; above 1 slows everything down.
    pub duration_multiplier: f64,
}

impl Tunables {
    pub fn from_config(config: &ContinuousConfig) -> Self {
        Self {
            extract_fraction: config.initial_extract_fraction,
            duration_multiplier: config.initial_duration_multiplier,
        }
    }
}

// ── Cadence ───────────────────────────────────────────────────────────────────

/// Ticks between launches of each job type, never below 1.
pub fn cadence(durations: &PerJob<f64>, multiplier: f64) -> PerJob<f64> {
    let anchor = (durations.extract * multiplier).max(1.0);
    let relative = |duration: f64| {
        if duration > 0.0 && duration.is_finite() {
            (anchor * anchor / duration).max(1.0)
        } else {
            1.0
        }
    };
    PerJob::new(
        relative(durations.stabilize),
        relative(durations.replenish),
        anchor,
    )
}

/// Whole ticks between launches, the modulus used by the launch gate.
pub fn launch_period(ticks_per: f64) -> u64 {
    if ticks_per.is_finite() && ticks_per >= 1.0 {
        ticks_per.floor() as u64
    } else {
        1
    }
}

// ── Projection ────────────────────────────────────────────────────────────────

/// Projected load of one job type over one of its own durations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct JobProjection {
    /// Instances of the job alive at once in steady state.
    pub instances: f64,
    pub threads: f64,
    pub cost: f64,
}

/// Projected steady-state capacity use of the whole cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CapacityProjection {
    pub per_job: PerJob<JobProjection>,
    pub total_cost: f64,
}

impl CapacityProjection {
    /// `instances = duration / launch_period`, `threads = instances ×
    /// threads_per_launch`, `cost = threads × unit_cost`.
    pub fn compute(
        durations: &PerJob<f64>,
        ticks_per: &PerJob<f64>,
        threads_per_launch: &PerJob<u64>,
        unit_costs: &PerJob<f64>,
    ) -> Self {
        let per_job = PerJob::from_fn(|job| {
            let instances = durations[job].max(0.0) / launch_period(ticks_per[job]) as f64;
            let threads = instances * threads_per_launch[job] as f64;
            JobProjection {
                instances,
                threads,
                cost: threads * unit_costs[job],
            }
        });
        let total_cost = per_job.iter().map(|(_, p)| p.cost).sum();
        Self {
            per_job,
            total_cost,
        }
    }

    /// Projected cost as a fraction of `capacity`.  An empty host is
    /// infinitely over-committed by any positive cost.
    pub fn usage_ratio(&self, capacity: f64) -> f64 {
        if capacity > 0.0 {
            self.total_cost / capacity
        } else if self.total_cost > 0.0 {
            f64::INFINITY
        } else {
            0.0
        }
    }
}

// ── Band ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BandPosition {
    Below,
    Within,
    Above,
}

pub fn band_position(usage_ratio: f64, config: &ContinuousConfig) -> BandPosition {
    if usage_ratio > config.upper_band {
        BandPosition::Above
    } else if usage_ratio < config.lower_band {
        BandPosition::Below
    } else {
        BandPosition::Within
    }
}

// ── Tuning step ───────────────────────────────────────────────────────────────

/// What one tuning step changed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Adjustment {
    None,
    DurationMultiplier { from: f64, to: f64 },
    ExtractFraction { from: f64, to: f64 },
}

/// Apply one tuning step for `usage_ratio` and report what changed.
///
/// # Errors
/// [`SchedulerError::ExtractFractionUnderflow`] when the step would take
/// `extract_fraction` to `min_extract_fraction` or below.  `tunables` is
/// left unchanged in that case.
pub fn tune(
    tunables: &mut Tunables,
    config: &ContinuousConfig,
    usage_ratio: f64,
    ticks_per: &PerJob<f64>,
    target: &str,
) -> Result<Adjustment, SchedulerError> {
    let position = band_position(usage_ratio, config);
    if position == BandPosition::Within {
        return Ok(Adjustment::None);
    }
    let above = position == BandPosition::Above;

    let room_to_slow =
        (ticks_per.replenish > 2.0 && ticks_per.stabilize > 2.0) || tunables.duration_multiplier > 1.0;

    if room_to_slow {
        let edge = if above {
            config.upper_band
        } else {
            config.lower_band
        };
        let width = config.upper_band - config.lower_band;
        let distance = if usage_ratio.is_finite() {
            ((usage_ratio - edge).abs() / width).clamp(1.0, MAX_DURATION_STEPS)
        } else {
            MAX_DURATION_STEPS
        };
        let factor = 1.0 + config.duration_step * distance;

        let from = tunables.duration_multiplier;
        let to = if above { from * factor } else { from / factor };
        tunables.duration_multiplier = to;

        info!(
            target = target,
            usage_ratio,
            from,
            to,
            "duration multiplier adjusted"
        );
        return Ok(Adjustment::DurationMultiplier { from, to });
    }

    let from = tunables.extract_fraction;
    let to = if above {
        from - config.extract_fraction_step
    } else {
        from + config.extract_fraction_step
    };
    if to < config.min_extract_fraction + FRACTION_EPSILON {
        error!(
            target = target,
            extract_fraction = to,
            floor = config.min_extract_fraction,
            usage_ratio,
            "extract fraction underflow"
        );
        return Err(SchedulerError::ExtractFractionUnderflow {
            target: target.to_string(),
            fraction: to,
            floor: config.min_extract_fraction,
        });
    }
    tunables.extract_fraction = to;

    info!(
        target = target,
        usage_ratio,
        from,
        to,
        "extract fraction adjusted"
    );
    Ok(Adjustment::ExtractFraction { from, to })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
