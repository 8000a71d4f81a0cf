/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use overseer::allocator::PhasedAllocator;
use overseer::channel::{ChannelAllocator, ChannelStore, FileChannelStore, MemoryChannelStore};
use overseer::config::OverseerConfig;
use overseer::scheduler::ContinuousScheduler;
use overseer::world::sim::SimWorld;

// ── CLI argument definition ───────────────────────────────────────────────────

/// Overseer job scheduler, running against the simulated world described
/// in the configuration file.
///
/// Example:
///   overseer -c overseer.yaml --ticks 600 continuous --target alpha --host n1
///   overseer -c overseer.yaml phased alpha beta --kill-all
#[derive(Debug, Parser)]
#[command(
    name = "overseer",
    about = "Overseer – capacity-bounded job scheduler",
    long_about = None,
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Stop after this many control ticks.
    #[arg(short = 't', long = "ticks")]
    ticks: Option<u64>,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Debug, Subcommand)]
enum Mode {
    /// Drive one target from one host indefinitely.
    Continuous {
        #[arg(long)]
        target: String,

        #[arg(long)]
        host: String,

        /// Persist channel leases in this YAML file instead of in memory.
        #[arg(long = "channel-table")]
        channel_table: Option<PathBuf>,
    },

    /// Take targets through Weaken, Grow and Hack across all hosts.
    Phased {
        /// Targets to work on; defaults to every configured target.
        targets: Vec<String>,

        /// Cancel every process on non-excluded hosts before starting.
        #[arg(long = "kill-all", default_value_t = false)]
        kill_all: bool,

        /// Additional hosts to leave alone.
        #[arg(long = "exclude")]
        exclude: Vec<String>,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Level is controlled by the RUST_LOG env-var (e.g. RUST_LOG=debug).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    info!(config = ?cli.config, ticks = ?cli.ticks, "Overseer starting up...");

    // ── Load configuration ────────────────────────────────────────────────────
    let config = match &cli.config {
        Some(path) => match OverseerConfig::load_from_file(path) {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load configuration: {:#}", e);
                process::exit(1);
            }
        },
        None => {
            warn!("No configuration file provided, using defaults (empty world)");
            OverseerConfig::default()
        }
    };

    let OverseerConfig {
        continuous,
        mut phased,
        world,
    } = config;

    match cli.mode {
        Mode::Continuous {
            target,
            host,
            channel_table,
        } => {
            let world = Arc::new(SimWorld::with_wall_clock(world, continuous.tick_interval()));
            let result = match channel_table {
                Some(path) => {
                    let store = FileChannelStore::new(path);
                    info!(path = %store.path().display(), "using file-backed channel table");
                    let channels = ChannelAllocator::new(store);
                    run_continuous(world, continuous, target, host, &channels, cli.ticks).await
                }
                None => {
                    let channels = ChannelAllocator::new(MemoryChannelStore::new());
                    run_continuous(world, continuous, target, host, &channels, cli.ticks).await
                }
            };
            if let Err(e) = result {
                error!("Continuous scheduler stopped: {:#}", e);
                process::exit(1);
            }
        }

        Mode::Phased {
            targets,
            kill_all,
            exclude,
        } => {
            let targets = if targets.is_empty() {
                world.targets.iter().map(|t| t.name.clone()).collect()
            } else {
                targets
            };
            phased.excluded_hosts.extend(exclude);

            let world = Arc::new(SimWorld::with_wall_clock(world, phased.tick_interval()));
            if let Err(e) = run_phased(world, phased, targets, kill_all, cli.ticks).await {
                error!("Phased allocator stopped: {:#}", e);
                process::exit(1);
            }
        }
    }
}

async fn run_continuous<S: ChannelStore>(
    world: Arc<SimWorld>,
    config: overseer::config::ContinuousConfig,
    target: String,
    host: String,
    channels: &ChannelAllocator<S>,
    ticks: Option<u64>,
) -> anyhow::Result<()> {
    let owner = world.spawn_controller();
    let mut scheduler =
        ContinuousScheduler::new(Arc::clone(&world), config, target, host, owner, channels)?;

    let result = scheduler.run(ticks).await;
    world.terminate(owner);

    let status = scheduler.status();
    info!(
        target = %status.target,
        ticks = status.tick,
        world_tick = world.now(),
        extract_fraction = status.tunables.extract_fraction,
        duration_multiplier = status.tunables.duration_multiplier,
        projected_usage = status.projected_usage,
        actual_usage = status.actual_usage,
        "continuous scheduler summary"
    );
    for (job, s) in status.jobs.iter() {
        info!(
            "  [{job}]  channel={ch}  avg={avg:.2}  every={every}t  live={live}  failures={fail}",
            ch = s.channel,
            avg = s.average.mean(),
            every = s.ticks_per_launch,
            live = s.live_processes,
            fail = s.launch_failures,
        );
    }
    Ok(result?)
}

async fn run_phased(
    world: Arc<SimWorld>,
    config: overseer::config::PhasedConfig,
    targets: Vec<String>,
    kill_all: bool,
    ticks: Option<u64>,
) -> anyhow::Result<()> {
    let mut allocator = PhasedAllocator::new(Arc::clone(&world), config, targets)?;
    if kill_all {
        allocator.kill_all();
    }

    let result = allocator.run(ticks).await;

    info!(
        ticks = allocator.tick(),
        world_tick = world.now(),
        finished = allocator.is_finished(),
        "phased allocator summary"
    );
    for row in allocator.status() {
        info!(
            "  [{target}]  phase={phase}  stabilize={s:.2}  replenish={r:.2}  extract={e:.2}  outstanding={out}",
            target = row.target,
            phase = row.phase,
            s = row.allocation.stabilize,
            r = row.allocation.replenish,
            e = row.allocation.extract,
            out = row.outstanding,
        );
    }
    Ok(result?)
}
