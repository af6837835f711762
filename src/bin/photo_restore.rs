// photo_restore - restore capture metadata lost by a flattening media export

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use photo_restore::{pipeline, Config};

#[derive(Parser)]
#[command(
    name = "photo_restore",
    version,
    about = "Restore capture timestamps and GPS locations from a flattened media export"
)]
struct Args {
    /// Export tree to ingest
    #[arg(long)]
    input: PathBuf,

    /// Output directory: content-addressed store plus the persisted record sets
    #[arg(long)]
    output: PathBuf,

    /// Config file (TOML); built-in defaults when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Pipeline stage to run; later stages read the record sets of earlier ones
    #[arg(long, value_enum, default_value = "all")]
    stage: StageArg,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StageArg {
    All,
    Ingest,
    Extract,
    Locate,
    Merge,
}

impl From<StageArg> for pipeline::Stage {
    fn from(stage: StageArg) -> Self {
        match stage {
            StageArg::All => pipeline::Stage::All,
            StageArg::Ingest => pipeline::Stage::Ingest,
            StageArg::Extract => pipeline::Stage::Extract,
            StageArg::Locate => pipeline::Stage::Locate,
            StageArg::Merge => pipeline::Stage::Merge,
        }
    }
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // Configuration errors are fatal before any file I/O
    let config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => {
            let config = Config::default();
            config.validate()?;
            config
        }
    };

    info!("📸 photo_restore starting");
    info!("   input:  {}", args.input.display());
    info!("   output: {}", args.output.display());

    pipeline::run_stage(&config, args.stage.into(), &args.input, &args.output)
        .context("pipeline run failed")?;

    Ok(())
}
