#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use driftlog_sim::campaign::{CampaignConfig, run_campaign};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let seeds = match std::env::args().nth(1) {
        Some(arg) => arg
            .parse::<u64>()
            .with_context(|| format!("seed count must be a number, got {arg:?}"))?,
        None => 100,
    };

    let report = run_campaign(&CampaignConfig::over(0..seeds))?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Some(seed) = report.lowest_failing {
        bail!(
            "{} of {} seeds failed; replay with seed {seed}",
            report.failed.len(),
            report.runs
        );
    }
    Ok(())
}
