/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Per-tick host capacity snapshot.
//!
//! The allocator snapshots every non-excluded host once at the top of a
//! tick and then deducts from the snapshot as it grants threads, so grants
//! within one tick can never add up to more than the hosts had spare.

use serde::Serialize;
use tracing::debug;

use crate::job::{threads_within, HostSnapshot};
use crate::world::CapacityProvider;

/// Threads granted on one host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Grant {
    pub host: String,
    pub threads: u64,
    /// Spare capacity of the host before this grant.
    pub spare: f64,
}

#[derive(Debug, Clone, Default)]
pub struct HostPool {
    hosts: Vec<HostSnapshot>,
}

impl HostPool {
    /// Snapshot every host of `provider` except `excluded`, in provider order.
    pub fn snapshot<C: CapacityProvider + ?Sized>(provider: &C, excluded: &[String]) -> Self {
        let hosts = provider
            .hosts()
            .into_iter()
            .filter(|h| !excluded.contains(h))
            .map(|h| provider.snapshot(&h))
            .collect();
        Self { hosts }
    }

    #[cfg(test)]
    pub(crate) fn from_hosts(hosts: Vec<HostSnapshot>) -> Self {
        Self { hosts }
    }

    #[cfg(test)]
    pub(crate) fn hosts(&self) -> &[HostSnapshot] {
        &self.hosts
    }

    /// Spare capacity summed over hosts that can hold at least one thread
    /// of cost `unit_cost`.
    pub fn usable_spare(&self, unit_cost: f64) -> f64 {
        self.hosts
            .iter()
            .filter(|h| h.is_usable_for(unit_cost))
            .map(HostSnapshot::spare)
            .sum()
    }

    /// Whether one more job of cost `unit_cost` still fits somewhere.
    pub fn can_fund(&self, unit_cost: f64) -> bool {
        self.usable_spare(unit_cost) > unit_cost
    }

    /// Whole threads of cost `unit_cost` the pool could still hold.
    pub fn threads_available(&self, unit_cost: f64) -> u64 {
        self.hosts
            .iter()
            .map(|h| threads_within(h.spare(), unit_cost))
            .sum()
    }

    /// Grant up to `threads` threads, walking hosts in order and filling each
    /// as far as it goes.  The grants are deducted from the snapshot.
    pub fn take(&mut self, threads: u64, unit_cost: f64) -> Vec<Grant> {
        let mut remaining = threads;
        let mut grants = Vec::new();

        for host in self.hosts.iter_mut() {
            if remaining == 0 {
                break;
            }
            if !host.is_usable_for(unit_cost) {
                continue;
            }
            let fits = threads_within(host.spare(), unit_cost);
            let granted = remaining.min(fits);
            if granted == 0 {
                continue;
            }

            grants.push(Grant {
                host: host.name.clone(),
                threads: granted,
                spare: host.spare(),
            });
            host.used_capacity += granted as f64 * unit_cost;
            remaining -= granted;
        }

        debug!(
            requested = threads,
            granted = threads - remaining,
            hosts = grants.len(),
            "pool grant"
        );
        grants
    }
}

/// Split `available` threads between two demands in proportion to their
/// size, rounding to the nearest thread.  When both demands are nonzero and
/// at least two threads are available, neither side gets zero.
pub fn split_proportional(primary: u64, secondary: u64, available: u64) -> (u64, u64) {
    let total = primary.saturating_add(secondary);
    if total <= available {
        return (primary, secondary);
    }

    let (avail, prim, tot) = (available as u128, primary as u128, total as u128);
    let mut p = ((2 * avail * prim + tot) / (2 * tot)) as u64;
    let mut s = available - p;

    if p == 0 && primary > 0 && s > 1 {
        p = 1;
        s -= 1;
    }
    if s == 0 && secondary > 0 && p > 1 {
        s = 1;
        p -= 1;
    }
    (p, s)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
