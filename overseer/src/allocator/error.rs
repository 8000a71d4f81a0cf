/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Errors that halt a [`PhasedAllocator`](super::PhasedAllocator).
//!
//! Unlike the continuous scheduler, the allocator has no retry path for a
//! failed launch: the grant was already counted against the target's
//! allocation fraction, so carrying on would silently corrupt it.

use thiserror::Error;

use crate::job::JobType;
use crate::world::LaunchError;

#[derive(Debug, Error)]
pub enum AllocatorError {
    #[error(
        "could not launch {threads} {job} thread(s) against '{target}' on host '{host}' ({spare:.2} spare): {source}"
    )]
    LaunchFailed {
        job: JobType,
        target: String,
        host: String,
        threads: u64,
        /// Spare capacity the pool snapshot credited the host with.
        spare: f64,
        #[source]
        source: LaunchError,
    },

    #[error("unknown target '{0}'")]
    UnknownTarget(String),
}
