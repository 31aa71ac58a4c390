//! Observation reader.
//!
//! Loads one observation space on a number of in-process ranks, logs what
//! each rank kept and optionally writes the distributed observations back
//! out through the I/O pool.

mod config_loader;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use obs_distribution::LocalWorld;
use obs_frame::{FrameError, ObsSpace, ObsWriter};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "obs-reader")]
#[command(about = "Read, quality-check and distribute observations across ranks")]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/obs-reader.yaml")]
    config: PathBuf,

    /// Number of in-process ranks
    #[arg(short, long, default_value_t = 1)]
    ranks: usize,

    /// Output store (overrides obsdataout.path)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// What one rank ended up with.
#[derive(Debug)]
struct RankSummary {
    rank: usize,
    nlocs: usize,
    patch_nlocs: usize,
    nrecs: usize,
    gnlocs: usize,
    gnlocs_outside_window: usize,
    written: Option<PathBuf>,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if args.ranks == 0 {
        anyhow::bail!("--ranks must be at least 1");
    }

    let config = config_loader::load_obs_space_config(&args.config)?;
    let output = args
        .output
        .clone()
        .or_else(|| config.obsdataout.as_ref().map(|out| out.path.clone()));
    let writer = ObsWriter::from_config(&config);

    info!(
        obs_space = %config.name,
        ranks = args.ranks,
        distribution = %config.distribution.name,
        engine = config.obsdatain.engine.as_str(),
        output = ?output,
        "Starting observation reader"
    );

    let summaries = LocalWorld::run(args.ranks, |comm| {
        let rank = comm.rank();
        let space = ObsSpace::from_config(&config, comm)?;

        let mut patch = vec![false; space.nlocs()];
        space.distribution().patch_obs(&mut patch);

        let written = match &output {
            Some(path) => writer.write(&space, None, path)?,
            None => None,
        };

        Ok::<_, FrameError>(RankSummary {
            rank,
            nlocs: space.nlocs(),
            patch_nlocs: patch.iter().filter(|p| **p).count(),
            nrecs: space.nrecs(),
            gnlocs: space.gnlocs(),
            gnlocs_outside_window: space.gnlocs_outside_window(),
            written,
        })
    })
    .with_context(|| format!("Failed to process observation space '{}'", config.name))?;

    for summary in &summaries {
        info!(
            rank = summary.rank,
            nlocs = summary.nlocs,
            patch_nlocs = summary.patch_nlocs,
            nrecs = summary.nrecs,
            written = ?summary.written,
            "Rank summary"
        );
    }

    let gnlocs = summaries.first().map(|s| s.gnlocs).unwrap_or(0);
    let outside = summaries
        .first()
        .map(|s| s.gnlocs_outside_window)
        .unwrap_or(0);
    let patch_total: usize = summaries.iter().map(|s| s.patch_nlocs).sum();
    info!(
        gnlocs,
        gnlocs_outside_window = outside,
        patch_total,
        "Observation reader finished"
    );
    Ok(())
}
