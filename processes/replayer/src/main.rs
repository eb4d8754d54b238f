//! 'main' for the Tessera replayer process
//! Rebuilds chain state by feeding a recorded block log through the
//! ingestion pipeline

use std::path::Path;

use anyhow::Result;
use clap::Parser;
use config::{Config, Environment, File};
use tessera_common::ChainParams;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod kv_engine;
mod playback;
mod replayer_config;

use playback::{replay, BlockLog};
use replayer_config::ReplayerConfig;

#[derive(Debug, clap::Parser)]
struct Args {
    #[arg(long, value_name = "PATH", default_values_t = vec!["replayer.toml".to_string()])]
    config: Vec<String>,

    /// Block log to replay, overriding the configured one
    #[arg(long, value_name = "PATH")]
    blocks: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("Tessera replayer process");

    let mut builder = Config::builder();
    for file in &args.config {
        builder = builder.add_source(File::with_name(file));
    }
    let config = builder.add_source(Environment::with_prefix("TESSERA")).build()?;

    let params = ChainParams::from_config(&config)?;
    let mut cfg = ReplayerConfig::new(&config);
    if let Some(blocks) = args.blocks {
        cfg.block_log = blocks;
    }

    let log = BlockLog::load(Path::new(&cfg.block_log))?;
    info!(
        blocks = log.blocks.len(),
        witnesses = log.witnesses.len(),
        finality = %params.finality_rule,
        "Loaded block log"
    );

    let summary = replay(log, &params, &cfg)?;
    if summary.orphaned > 0 {
        info!(count = summary.orphaned, "Blocks left waiting for a parent");
    }

    info!("Exiting");
    Ok(())
}
