/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Overseer – capacity-bounded Stabilize / Replenish / Extract scheduler
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── job          – job types, per-job values, target / host snapshots
//! ├── averager     – rolling mean of thread estimates
//! ├── channel/     – result-channel id leasing (file or in-memory table)
//! ├── config/      – YAML configuration (tunables + simulated world)
//! ├── world/       – collaborator traits + in-process simulator
//! ├── scheduler/   – single-target continuous scheduler
//! └── allocator/   – multi-target phased allocator
//! ```

pub mod allocator;
pub mod averager;
pub mod channel;
pub mod config;
pub mod job;
pub mod scheduler;
pub mod world;
