//! Runs one simulation shape over a range of seeds and reports which seeds
//! broke an invariant. Any failing seed replays exactly with
//! [`replay_seed`].

use std::ops::Range;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::oracle::{InvariantViolation, OracleResult};
use crate::{SimulationConfig, SimulationResult, Simulator};

/// A seed range plus the simulation every seed runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignConfig {
    pub seeds: Range<u64>,
    /// Applied to every run; its own `seed` is ignored.
    pub template: SimulationConfig,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            seeds: 0..100,
            template: SimulationConfig {
                agent_count: 5,
                rounds: 20,
                ..SimulationConfig::default()
            },
        }
    }
}

impl CampaignConfig {
    /// Campaign over `seeds` with the default simulation.
    #[must_use]
    pub fn over(seeds: Range<u64>) -> Self {
        Self {
            seeds,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn run_for(&self, seed: u64) -> SimulationConfig {
        SimulationConfig {
            seed,
            ..self.template.clone()
        }
    }

    /// # Errors
    ///
    /// Rejects an empty seed range, and templates without agents or rounds.
    pub fn validate(&self) -> Result<()> {
        if self.seeds.is_empty() {
            bail!("campaign has no seeds ({:?})", self.seeds);
        }
        if self.template.agent_count == 0 {
            bail!("campaign template has no agents");
        }
        if self.template.rounds == 0 {
            bail!("campaign template has no rounds");
        }
        Ok(())
    }
}

/// A seed that broke at least one invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedSeed {
    pub seed: u64,
    pub violations: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignReport {
    pub runs: usize,
    pub clean_runs: usize,
    /// Lowest failing seed.
    pub lowest_failing: Option<u64>,
    pub failed: Vec<FailedSeed>,
    /// Seeds whose trace went through a dropped, duplicated, reordered,
    /// partitioned, or frozen step.
    pub seeds_with_faults: usize,
}

impl CampaignReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// A seed's full run with the oracle's verdict on it.
#[derive(Debug, Clone)]
pub struct SeedRun {
    pub result: SimulationResult,
    pub oracle: OracleResult,
}

/// Run every seed of `config`.
///
/// # Errors
///
/// Invalid configuration, or a log error a simulation could not absorb.
/// Invariant violations are reported, not returned as errors.
pub fn run_campaign(config: &CampaignConfig) -> Result<CampaignReport> {
    config.validate()?;

    let mut report = CampaignReport::default();
    for seed in config.seeds.clone() {
        let run = replay_seed(seed, config)?;
        report.runs += 1;
        report.seeds_with_faults += usize::from(run.result.interesting_state_reached);

        if run.oracle.passed {
            report.clean_runs += 1;
            continue;
        }
        warn!(seed, violations = run.oracle.violations.len(), "seed broke an invariant");
        report.lowest_failing.get_or_insert(seed);
        report.failed.push(FailedSeed {
            seed,
            violations: run
                .oracle
                .violations
                .iter()
                .map(InvariantViolation::to_string)
                .collect(),
        });
    }

    info!(
        runs = report.runs,
        clean = report.clean_runs,
        with_faults = report.seeds_with_faults,
        "campaign finished"
    );
    Ok(report)
}

/// The violations one seed produces; empty when it passes.
///
/// # Errors
///
/// As for [`replay_seed`].
pub fn violations_for(seed: u64, config: &CampaignConfig) -> Result<Vec<InvariantViolation>> {
    Ok(replay_seed(seed, config)?.oracle.violations)
}

/// Run one seed of `config` and keep everything it produced.
///
/// # Errors
///
/// Invalid configuration or a simulation failure.
pub fn replay_seed(seed: u64, config: &CampaignConfig) -> Result<SeedRun> {
    config.validate()?;
    let result = Simulator::new(config.run_for(seed))?.run()?;
    let oracle = result.check();
    Ok(SeedRun { result, oracle })
}
