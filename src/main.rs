use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::info;

mod apa;
mod certainty;
mod config;
mod ef;
mod integrate;
mod lifecycle;
mod load;
mod matcher;
mod model;
mod ownership;
mod production;

use config::Paths;

/// Pipeline stage to run. Stages form a strict dependency chain; `all` runs
/// them in order. Each stage reads complete inputs and regenerates its
/// outputs wholesale, so re-running any stage is idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Stage {
    /// Plant-to-company mapping with equity shares and cross-checks
    Ownership,
    /// Merge production sources and resolve one figure per company-year
    Production,
    /// Asset-based emissions calculation
    Apa,
    /// Multi-source integration with certainty scores and defaults
    Integrate,
    /// All stages in dependency order
    All,
}

#[derive(Parser, Debug)]
#[command(name = "asset-emissions-pipeline")]
#[command(about = "Multi-source company emissions integration pipeline: \
    entity matching, ownership resolution, asset-based emissions calculation, \
    and cross-source comparison over flat CSV tables.")]
struct Cli {
    /// Stage(s) to run
    #[arg(short, long, value_enum, default_value = "all")]
    stage: Stage,

    /// Directory containing the input CSV extracts
    #[arg(short, long, default_value = "data")]
    data_dir: PathBuf,

    /// Directory for output CSV tables
    #[arg(short, long, default_value = "outputs")]
    out_dir: PathBuf,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let start = Instant::now();

    let paths = Paths::new(&cli.data_dir, &cli.out_dir);
    std::fs::create_dir_all(&paths.out_dir)
        .with_context(|| format!("failed to create output directory {}", paths.out_dir.display()))?;

    // Fail-fast: the first stage error aborts the run, so later stages never
    // consume partial input.
    let selected = |stage: Stage| cli.stage == stage || cli.stage == Stage::All;

    if selected(Stage::Ownership) {
        info!("--- ownership mapping ---");
        ownership::run(&paths)?;
    }
    if selected(Stage::Production) {
        info!("--- production resolution ---");
        production::run(&paths)?;
    }
    if selected(Stage::Apa) {
        info!("--- APA emissions calculation ---");
        apa::run(&paths)?;
    }
    if selected(Stage::Integrate) {
        info!("--- multi-source integration ---");
        integrate::run(&paths)?;
    }

    info!("pipeline complete in {:.2?}", start.elapsed());
    Ok(())
}
