//! Pipeline orchestration
//!
//! Stages run strictly in sequence; each consumes the durable output of the
//! previous one, so any stage can be re-run on its own against the persisted
//! record sets. Run-wide state (counters, extension census) lives in a
//! RunContext passed through the stages, never in module-level statics, so
//! concurrent runs in tests cannot interfere.

use std::fs;
use std::path::Path;

use crate::classify::ExtensionScan;
use crate::config::Config;
use crate::error::{RestoreError, Result};
use crate::merge::MergeOutcome;
use crate::{extract, ingest, locate, merge, report, store};

/// Run-scoped counters, filled in by whichever stages actually ran
#[derive(Debug, Default, Clone)]
pub struct RunStats {
    pub total_files: u64,
    pub media_files: u64,
    pub copied: u64,
    pub duplicates: u64,
    pub skipped_unknown: u64,
    pub ingest_errors: u64,

    pub extracted: u64,
    pub with_embedded_datetime: u64,
    pub with_embedded_gps: u64,
    pub unreadable_embedded: u64,

    pub sidecars_found: u64,
    pub sidecars_missing: u64,

    pub fully_resolved: u64,
    pub partial: u64,
    pub conflicts: u64,
    pub gaps: u64,
    pub writeback_written: u64,
    pub writeback_errors: u64,
    pub writeback_skipped: u64,
}

/// State for one pipeline run, threaded through the stages
#[derive(Debug, Default)]
pub struct RunContext {
    pub stats: RunStats,
    pub extensions: ExtensionScan,
}

/// A re-runnable pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    All,
    Ingest,
    Extract,
    Locate,
    Merge,
}

/// Run the full pipeline: ingest, extract, locate, merge, report
pub fn run_all(config: &Config, input_dir: &Path, output_dir: &Path) -> Result<RunContext> {
    fs::create_dir_all(output_dir)?;
    let pool = build_pool(config)?;
    let mut ctx = RunContext::default();

    let outcome: MergeOutcome = pool.install(|| -> Result<MergeOutcome> {
        let pairs = ingest::run_ingest(config, input_dir, output_dir, &mut ctx)?;
        let mut metadata = extract::run_extract(config, &pairs, output_dir, &mut ctx)?;
        let locations = locate::run_locate(config, &pairs, output_dir, &mut ctx)?;
        merge::run_merge(config, &mut metadata, &locations, output_dir, &mut ctx)
    })?;

    report::write_report(output_dir, &outcome)?;
    report::log_summary(&ctx);
    Ok(ctx)
}

/// Run one stage against the durable outputs already on disk
pub fn run_stage(
    config: &Config,
    stage: Stage,
    input_dir: &Path,
    output_dir: &Path,
) -> Result<RunContext> {
    if stage == Stage::All {
        return run_all(config, input_dir, output_dir);
    }

    fs::create_dir_all(output_dir)?;
    let pool = build_pool(config)?;
    let mut ctx = RunContext::default();

    match stage {
        Stage::All => unreachable!(),
        Stage::Ingest => {
            pool.install(|| ingest::run_ingest(config, input_dir, output_dir, &mut ctx))?;
        }
        Stage::Extract => {
            let pairs = store::load_pairs(output_dir)?;
            pool.install(|| extract::run_extract(config, &pairs, output_dir, &mut ctx))?;
        }
        Stage::Locate => {
            let pairs = store::load_pairs(output_dir)?;
            pool.install(|| locate::run_locate(config, &pairs, output_dir, &mut ctx))?;
        }
        Stage::Merge => {
            let mut metadata = store::load_metadata(output_dir)?;
            let locations = store::load_sidecar_locations(output_dir)?;
            let outcome = pool.install(|| {
                merge::run_merge(config, &mut metadata, &locations, output_dir, &mut ctx)
            })?;
            report::write_report(output_dir, &outcome)?;
        }
    }

    report::log_summary(&ctx);
    Ok(ctx)
}

fn build_pool(config: &Config) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(config.run.concurrency)
        .build()
        .map_err(|e| RestoreError::ProcessingError(format!("thread pool: {}", e)))
}
