/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Result-channel allocation.
//!
//! Worker processes report a single number back to the scheduler that
//! launched them through a small-integer channel.  Several scheduler
//! instances may run at once, so channel ids are leased from a persisted
//! table of `(channel, owner)` pairs:
//!
//! ```yaml
//! channels:
//!   1: 4411      # channel 1 is owned by process 4411
//!   2: 4411
//!   3: 4411
//! ```
//!
//! Each allocation reads the table, drops leases whose owner is no longer
//! alive, hands out `max(channel) + 1` (or `1` for an empty table) and writes
//! the table back.  The table is the only source of truth; one allocator at a
//! time is assumed to be writing it.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::job::{ChannelId, ProcessHandle};

// ── Errors ────────────────────────────────────────────────────────────────────

/// Failures reading or writing the persisted channel table.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel table I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("channel table {path} is malformed: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("channel id space exhausted")]
    Exhausted,
}

// ── ChannelTable ──────────────────────────────────────────────────────────────

/// Keyed record store: channel id → owning process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelTable {
    #[serde(default)]
    channels: BTreeMap<ChannelId, ProcessHandle>,
}

impl ChannelTable {
    pub fn owner(&self, channel: ChannelId) -> Option<ProcessHandle> {
        self.channels.get(&channel).copied()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn leases(&self) -> impl Iterator<Item = (ChannelId, ProcessHandle)> + '_ {
        self.channels.iter().map(|(&c, &o)| (c, o))
    }

    fn highest_channel(&self) -> Option<ChannelId> {
        self.channels.keys().next_back().copied()
    }
}

// ── Stores ────────────────────────────────────────────────────────────────────

/// Where the channel table lives between allocations.
pub trait ChannelStore {
    fn load(&self) -> Result<ChannelTable, ChannelError>;
    fn save(&self, table: &ChannelTable) -> Result<(), ChannelError>;
}

/// YAML file store.  A missing file is an empty table.
#[derive(Debug, Clone)]
pub struct FileChannelStore {
    path: PathBuf,
}

impl FileChannelStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> ChannelError {
        ChannelError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl ChannelStore for FileChannelStore {
    fn load(&self) -> Result<ChannelTable, ChannelError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ChannelTable::default())
            }
            Err(e) => return Err(self.io_err(e)),
        };
        if content.trim().is_empty() {
            return Ok(ChannelTable::default());
        }
        serde_yaml::from_str(&content).map_err(|source| ChannelError::Malformed {
            path: self.path.clone(),
            source,
        })
    }

    fn save(&self, table: &ChannelTable) -> Result<(), ChannelError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }
        let content = serde_yaml::to_string(table).map_err(|source| ChannelError::Malformed {
            path: self.path.clone(),
            source,
        })?;

        // Write-then-rename so a crash never leaves a half-written table
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, content).map_err(|e| self.io_err(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))
    }
}

/// Process-local store, used when no table path is configured.
#[derive(Debug, Default)]
pub struct MemoryChannelStore {
    table: Mutex<ChannelTable>,
}

impl MemoryChannelStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChannelStore for MemoryChannelStore {
    fn load(&self) -> Result<ChannelTable, ChannelError> {
        Ok(self
            .table
            .lock()
            .map(|t| t.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone()))
    }

    fn save(&self, table: &ChannelTable) -> Result<(), ChannelError> {
        match self.table.lock() {
            Ok(mut t) => *t = table.clone(),
            Err(poisoned) => *poisoned.into_inner() = table.clone(),
        }
        Ok(())
    }
}

// ── ChannelAllocator ──────────────────────────────────────────────────────────

/// Leases channel ids to scheduler instances.
pub struct ChannelAllocator<S: ChannelStore> {
    store: S,
}

impl<S: ChannelStore> ChannelAllocator<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Lease a fresh channel to `owner`.
    ///
    /// Leases whose owner `is_alive` reports dead are reclaimed first, so an
    /// id becomes reusable once every process above it has exited.  The
    /// returned id is never one still held by a live owner.
    pub fn allocate(
        &self,
        owner: ProcessHandle,
        is_alive: impl Fn(ProcessHandle) -> bool,
    ) -> Result<ChannelId, ChannelError> {
        let mut table = self.store.load()?;

        let before = table.len();
        table.channels.retain(|_, o| is_alive(*o));
        let reclaimed = before - table.len();
        if reclaimed > 0 {
            debug!(reclaimed, "dropped channel leases of dead owners");
        }

        let channel = match table.highest_channel() {
            Some(highest) => highest.checked_add(1).ok_or(ChannelError::Exhausted)?,
            None => 1,
        };
        table.channels.insert(channel, owner);
        self.store.save(&table)?;

        info!(channel, owner, live_leases = table.len(), "channel allocated");
        Ok(channel)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
