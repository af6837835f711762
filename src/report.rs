//! Restoration audit report and run summary
//!
//! The audit is rendered for the operator: conflicts first (both candidate
//! values with provenance), then gaps. It is rebuilt from scratch on every
//! merge run.

use std::fmt::Write as _;
use std::path::Path;

use tracing::{info, warn};

use crate::error::Result;
use crate::merge::MergeOutcome;
use crate::pipeline::RunContext;
use crate::store::{self, REPORT_FILE};

pub fn write_report(output_dir: &Path, outcome: &MergeOutcome) -> Result<()> {
    let report = render_report(outcome);
    store::atomic_write(&output_dir.join(REPORT_FILE), report.as_bytes())?;
    Ok(())
}

pub fn render_report(outcome: &MergeOutcome) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "Restoration audit");
    let _ = writeln!(out, "=================");
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "fully resolved: {}   partial: {}",
        outcome.fully_resolved, outcome.partial
    );
    let _ = writeln!(out);

    let _ = writeln!(out, "Conflicts ({})", outcome.conflicts.len());
    let _ = writeln!(out, "-----------------");
    for conflict in &outcome.conflicts {
        let _ = writeln!(out, "{}", conflict.destination);
        let _ = writeln!(out, "  file:  {}", conflict.filename);
        let _ = writeln!(out, "  field: {}", conflict.field);
        let _ = writeln!(out, "    embedded: {}", conflict.embedded_value);
        let _ = writeln!(out, "    sidecar:  {}", conflict.sidecar_value);
        for (name, value) in &conflict.known {
            let _ = writeln!(out, "  known {}: {}", name, value);
        }
        let _ = writeln!(out);
    }
    if outcome.conflicts.is_empty() {
        let _ = writeln!(out, "(none)");
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "Gaps ({})", outcome.gaps.len());
    let _ = writeln!(out, "-----------------");
    for gap in &outcome.gaps {
        let _ = writeln!(out, "{}", gap.destination);
        let _ = writeln!(out, "  file:    {}", gap.filename);
        let _ = writeln!(out, "  missing: {}", gap.field);
        if let Some(note) = &gap.note {
            let _ = writeln!(out, "  note:    {}", note);
        }
        for (name, value) in &gap.known {
            let _ = writeln!(out, "  known {}: {}", name, value);
        }
        let _ = writeln!(out);
    }
    if outcome.gaps.is_empty() {
        let _ = writeln!(out, "(none)");
    }

    out
}

/// Operator-facing summary of whatever stages ran
pub fn log_summary(ctx: &RunContext) {
    let stats = &ctx.stats;

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("📊 Run summary");
    if stats.total_files > 0 {
        info!(
            "   scanned {} files, {} media, {} stored, {} duplicate sources",
            stats.total_files, stats.media_files, stats.copied, stats.duplicates
        );
        info!(
            "   skipped: {} unknown type, {} unreadable",
            stats.skipped_unknown, stats.ingest_errors
        );
        let top: Vec<String> = ctx
            .extensions
            .counts_by_frequency()
            .iter()
            .take(5)
            .map(|(ext, count)| format!("{} ({})", ext, count))
            .collect();
        if !top.is_empty() {
            info!("   extensions seen: {}", top.join(", "));
        }
    }
    if stats.extracted > 0 {
        info!(
            "   embedded metadata: {} with datetime, {} with GPS, {} unreadable",
            stats.with_embedded_datetime, stats.with_embedded_gps, stats.unreadable_embedded
        );
    }
    if stats.sidecars_found + stats.sidecars_missing > 0 {
        info!(
            "   sidecars: {} found, {} missing",
            stats.sidecars_found, stats.sidecars_missing
        );
    }
    if stats.fully_resolved + stats.partial > 0 {
        info!(
            "   merge: {} fully resolved, {} partial ({} conflicts, {} gaps)",
            stats.fully_resolved, stats.partial, stats.conflicts, stats.gaps
        );
        info!(
            "   write-back: {} written, {} failed, {} skipped",
            stats.writeback_written, stats.writeback_errors, stats.writeback_skipped
        );
    }

    if ctx.extensions.has_unknown() {
        let unknown: Vec<&str> = ctx.extensions.unknown_extensions().collect();
        warn!("❓ extensions not classified as media: {}", unknown.join(", "));
    }
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}
