/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Overseer configuration loading and validation.
//!
//! A single YAML file with three optional sections.  Every field has a
//! default, so an empty file (or no file at all) is a valid configuration:
//!
//! ```yaml
//! continuous:
//!   tick_ms: 1000
//!   initial_extract_fraction: 0.01
//!   lower_band: 0.70
//!   upper_band: 0.90
//! phased:
//!   growth_multiplier: 1.25
//!   extraction_fraction: 0.10
//!   excluded_hosts: [home]
//! world:
//!   hosts:
//!     - { name: home, total_capacity: 32 }
//!     - { name: node01, total_capacity: 128 }
//!   targets:
//!     - name: alpha
//!       stability: 25
//!       min_stability: 5
//!       current_yield: 40000
//!       max_yield: 1000000
//!       stabilize_time: 160
//!       replenish_time: 128
//!       extract_time: 40
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::world::sim::WorldConfig;

// ── Continuous scheduler ──────────────────────────────────────────────────────

/// Tunables of the single-target continuous scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContinuousConfig {
    /// Control interval in milliseconds.
    pub tick_ms: u64,
    pub initial_extract_fraction: f64,
    pub extract_fraction_step: f64,
    /// Reaching this extract fraction is fatal.
    pub min_extract_fraction: f64,
    pub initial_duration_multiplier: f64,
    /// Proportional multiplier step per band-width of deviation.
    pub duration_step: f64,
    pub lower_band: f64,
    pub upper_band: f64,
    /// Yield fraction under which extraction pauses.
    pub depletion_threshold: f64,
    /// Floor applied to the yield fraction when sizing Replenish.
    pub replenish_floor: f64,
    /// Share of the current instability margin added to Stabilize sizing.
    pub stability_margin_fraction: f64,
    pub convergence_iterations: u32,
}

impl Default for ContinuousConfig {
    fn default() -> Self {
        Self {
            tick_ms: 1000,
            initial_extract_fraction: 0.01,
            extract_fraction_step: 0.0015,
            min_extract_fraction: 0.001,
            initial_duration_multiplier: 1.0,
            duration_step: 0.01,
            lower_band: 0.70,
            upper_band: 0.90,
            depletion_threshold: 0.60,
            replenish_floor: 0.80,
            stability_margin_fraction: 0.10,
            convergence_iterations: 100,
        }
    }
}

impl ContinuousConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.tick_ms == 0 {
            bail!("continuous.tick_ms must be > 0");
        }
        if !(self.lower_band > 0.0 && self.lower_band < self.upper_band && self.upper_band <= 1.0) {
            bail!(
                "continuous band must satisfy 0 < lower_band < upper_band <= 1 (got {} .. {})",
                self.lower_band,
                self.upper_band
            );
        }
        if self.min_extract_fraction <= 0.0 {
            bail!("continuous.min_extract_fraction must be > 0");
        }
        if self.min_extract_fraction >= self.initial_extract_fraction {
            bail!(
                "continuous.min_extract_fraction ({}) must be below initial_extract_fraction ({})",
                self.min_extract_fraction,
                self.initial_extract_fraction
            );
        }
        if self.extract_fraction_step <= 0.0 || self.duration_step <= 0.0 {
            bail!("continuous tuning steps must be > 0");
        }
        if self.initial_duration_multiplier <= 0.0 {
            bail!("continuous.initial_duration_multiplier must be > 0");
        }
        if self.replenish_floor <= 0.0 {
            bail!("continuous.replenish_floor must be > 0");
        }
        Ok(())
    }
}

// ── Phased allocator ──────────────────────────────────────────────────────────

/// Tunables of the multi-target phased allocator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhasedConfig {
    pub tick_ms: u64,
    /// Yield multiplier the Grow phase dispatches Replenish threads toward.
    pub growth_multiplier: f64,
    /// Share of max yield the Hack phase extracts.
    pub extraction_fraction: f64,
    /// Remaining stability deficit at which Weaken is complete.
    pub weaken_margin: f64,
    /// Yield fraction at which Grow is complete.
    pub grow_complete_fraction: f64,
    /// Extract threads per compensating Stabilize thread in Hack.
    pub hack_stabilize_ratio: u64,
    pub excluded_hosts: Vec<String>,
}

impl Default for PhasedConfig {
    fn default() -> Self {
        Self {
            tick_ms: 1000,
            growth_multiplier: 1.25,
            extraction_fraction: 0.10,
            weaken_margin: 5.0,
            grow_complete_fraction: 0.95,
            hack_stabilize_ratio: 6,
            excluded_hosts: vec!["home".to_string()],
        }
    }
}

impl PhasedConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.tick_ms == 0 {
            bail!("phased.tick_ms must be > 0");
        }
        if self.growth_multiplier < 1.0 {
            bail!(
                "phased.growth_multiplier must be >= 1 (got {})",
                self.growth_multiplier
            );
        }
        if self.extraction_fraction < 0.0 {
            bail!(
                "phased.extraction_fraction must be >= 0 (got {})",
                self.extraction_fraction
            );
        }
        if self.hack_stabilize_ratio == 0 {
            bail!("phased.hack_stabilize_ratio must be >= 1");
        }
        Ok(())
    }
}

// ── OverseerConfig ────────────────────────────────────────────────────────────

/// The whole configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverseerConfig {
    pub continuous: ContinuousConfig,
    pub phased: PhasedConfig,
    pub world: WorldConfig,
}

impl OverseerConfig {
    /// Parse and validate `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not valid YAML, or
    /// holds values [`validate`](Self::validate) rejects.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("Loading overseer configuration from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open configuration file: {}", path.display()))?;

        let config: OverseerConfig = if content.trim().is_empty() {
            OverseerConfig::default()
        } else {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML file: {}", path.display()))?
        };

        config
            .validate()
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;

        for host in &config.world.hosts {
            debug!(
                host = %host.name,
                total = host.total_capacity,
                used = host.used_capacity,
                "configured host"
            );
        }
        info!(
            hosts = config.world.hosts.len(),
            targets = config.world.targets.len(),
            "configuration loaded"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.continuous.validate()?;
        self.phased.validate()?;

        for host in &self.world.hosts {
            if host.total_capacity < 0.0 || host.used_capacity < 0.0 {
                bail!("host '{}' has negative capacity", host.name);
            }
        }
        for target in &self.world.targets {
            if target.max_yield < 0.0 || target.current_yield < 0.0 {
                bail!("target '{}' has negative yield", target.name);
            }
            if target.current_yield > target.max_yield {
                bail!(
                    "target '{}' current_yield {} exceeds max_yield {}",
                    target.name,
                    target.current_yield,
                    target.max_yield
                );
            }
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn yaml_tempfile(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = OverseerConfig::default();
        assert_eq!(cfg.continuous.initial_extract_fraction, 0.01);
        assert_eq!(cfg.continuous.extract_fraction_step, 0.0015);
        assert_eq!(cfg.continuous.min_extract_fraction, 0.001);
        assert_eq!(cfg.continuous.convergence_iterations, 100);
        assert_eq!(cfg.phased.growth_multiplier, 1.25);
        assert_eq!(cfg.phased.hack_stabilize_ratio, 6);
        assert_eq!(cfg.phased.excluded_hosts, vec!["home".to_string()]);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn load_full_yaml() {
        let yaml = r#"
continuous:
  tick_ms: 250
  lower_band: 0.6
  upper_band: 0.8
phased:
  growth_multiplier: 1.5
  excluded_hosts: []
world:
  hosts:
    - { name: node01, total_capacity: 128 }
    - { name: node02, total_capacity: 64, used_capacity: 8 }
  targets:
    - name: alpha
      stability: 25
      min_stability: 5
      current_yield: 40000
      max_yield: 1000000
      stabilize_time: 160
      replenish_time: 128
      extract_time: 40
  effects:
    stabilize_per_thread: 2.0
"#;
        let f = yaml_tempfile(yaml);
        let cfg = OverseerConfig::load_from_file(f.path()).unwrap();

        assert_eq!(cfg.continuous.tick_interval(), Duration::from_millis(250));
        assert_eq!(cfg.continuous.lower_band, 0.6);
        // Unset fields keep their defaults
        assert_eq!(cfg.continuous.depletion_threshold, 0.60);
        assert_eq!(cfg.phased.growth_multiplier, 1.5);
        assert!(cfg.phased.excluded_hosts.is_empty());

        assert_eq!(cfg.world.hosts.len(), 2);
        assert_eq!(cfg.world.hosts[0].used_capacity, 0.0);
        assert_eq!(cfg.world.hosts[1].used_capacity, 8.0);
        assert_eq!(cfg.world.targets[0].growth_rate, 20.0);
        assert_eq!(cfg.world.effects.stabilize_per_thread, 2.0);
        assert_eq!(cfg.world.effects.unit_costs.extract, 1.7);
    }

    #[test]
    fn bundled_sample_config_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/overseer.yaml");
        let cfg = OverseerConfig::load_from_file(&path).unwrap();
        let names: Vec<&str> = cfg.world.targets.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
        assert_eq!(cfg.world.hosts[0].name, "home");
        assert_eq!(cfg.phased.excluded_hosts, vec!["home".to_string()]);
    }

    #[test]
    fn empty_file_is_default_config() {
        let f = yaml_tempfile("");
        let cfg = OverseerConfig::load_from_file(f.path()).unwrap();
        assert_eq!(cfg, OverseerConfig::default());
    }

    #[test]
    fn missing_file_returns_error() {
        let result = OverseerConfig::load_from_file(Path::new("/nonexistent/path/overseer.yaml"));
        assert!(result.is_err());
    }

    #[test]
    fn malformed_yaml_returns_error() {
        let f = yaml_tempfile("this is: not: valid: yaml: content:::");
        assert!(OverseerConfig::load_from_file(f.path()).is_err());
    }

    #[test]
    fn growth_multiplier_below_one_is_rejected() {
        let f = yaml_tempfile("phased:\n  growth_multiplier: 0.9\n");
        let err = OverseerConfig::load_from_file(f.path()).unwrap_err();
        assert!(format!("{err:#}").contains("growth_multiplier"));
    }

    #[test]
    fn negative_extraction_fraction_is_rejected() {
        let mut cfg = OverseerConfig::default();
        cfg.phased.extraction_fraction = -0.1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn inverted_band_is_rejected() {
        let mut cfg = OverseerConfig::default();
        cfg.continuous.lower_band = 0.9;
        cfg.continuous.upper_band = 0.7;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn min_extract_fraction_must_be_below_initial() {
        let mut cfg = OverseerConfig::default();
        cfg.continuous.min_extract_fraction = 0.02;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn target_yield_above_max_is_rejected() {
        let yaml = r#"
world:
  targets:
    - { name: t, stability: 1, min_stability: 1, current_yield: 10, max_yield: 5,
        stabilize_time: 1, replenish_time: 1, extract_time: 1 }
"#;
        let f = yaml_tempfile(yaml);
        assert!(OverseerConfig::load_from_file(f.path()).is_err());
    }
}
