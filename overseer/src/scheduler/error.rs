/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Errors that stop a [`ContinuousScheduler`](super::ContinuousScheduler).
//!
//! Launch failures are not here: the continuous loop treats them as soft and
//! retries at the job type's next cadence slot.

use thiserror::Error;

use crate::channel::ChannelError;

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The self-tuner had to lower `extract_fraction` to or below its floor.
    /// The host cannot sustain even the smallest extraction for `target`.
    #[error(
        "extract fraction for target '{target}' fell to {:.4}% (floor {:.4}%): host capacity cannot sustain the cycle",
        fraction * 100.0,
        floor * 100.0
    )]
    ExtractFractionUnderflow {
        target: String,
        fraction: f64,
        floor: f64,
    },

    /// Leasing the scheduler's result channels failed.
    #[error("result channel allocation failed: {0}")]
    ChannelAllocation(#[from] ChannelError),

    /// The oracle does not know the target (at start-up or mid-run).
    #[error("unknown target '{0}'")]
    UnknownTarget(String),

    #[error("unknown host '{0}'")]
    UnknownHost(String),
}
