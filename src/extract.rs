//! Embedded metadata extraction
//!
//! For every distinct stored file, reads the embedded capture timestamp and
//! GPS fields and produces an `embedded`-tagged CaptureMetadata partial.
//! Files with no readable embedded metadata yield an all-null partial;
//! absence is routine, not an error.

use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::Result;
use crate::exiftool;
use crate::model::{CaptureMetadata, Pair, Provenance, EXIF_DATETIME_FORMAT};
use crate::pipeline::RunContext;
use crate::store::{self, MetadataMap};

/// Stage entry point: one record per distinct stored filename
pub fn run_extract(
    config: &Config,
    pairs: &[Pair],
    output_dir: &Path,
    ctx: &mut RunContext,
) -> Result<MetadataMap> {
    let timeout = Duration::from_secs(config.run.tool_timeout_secs);

    let mut stored: Vec<(&str, &str)> = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for pair in pairs {
        if seen.insert(pair.filename.as_str()) {
            stored.push((pair.filename.as_str(), pair.destination.as_str()));
        }
    }

    let metadata: MetadataMap = stored
        .par_iter()
        .map(|&(filename, destination)| {
            let meta = extract_one(Path::new(destination), timeout);
            (filename.to_string(), meta)
        })
        .collect::<Vec<_>>()
        .into_iter()
        .collect();

    ctx.stats.extracted = metadata.len() as u64;
    ctx.stats.with_embedded_datetime = metadata
        .values()
        .filter(|m| m.embedded_capture_datetime().is_some())
        .count() as u64;
    ctx.stats.with_embedded_gps = metadata.values().filter(|m| m.location.exif_gps).count() as u64;
    ctx.stats.unreadable_embedded = metadata
        .values()
        .filter(|m| m.unreadable_sources.contains(&Provenance::Embedded))
        .count() as u64;

    store::save_metadata(output_dir, &metadata)?;
    info!(
        "extract: {} stored files, {} with embedded datetime, {} with embedded GPS, {} unreadable",
        ctx.stats.extracted,
        ctx.stats.with_embedded_datetime,
        ctx.stats.with_embedded_gps,
        ctx.stats.unreadable_embedded
    );

    Ok(metadata)
}

/// Build the embedded-tagged partial for one stored file
fn extract_one(destination: &Path, timeout: Duration) -> CaptureMetadata {
    let mut meta = CaptureMetadata::default();

    match exiftool::read_embedded(destination, timeout) {
        Ok(tags) => {
            if !tags.is_empty() {
                meta.add_source(Provenance::Embedded);
            }
            meta.datetime.exif_datetime = tags.datetime;
            meta.datetime.exif_datetime_original = tags.datetime_original;
            meta.datetime.exif_datetime_digitized = tags.datetime_digitized;
            if let Some(gps) = tags.gps {
                meta.location.latitude = Some(gps.latitude);
                meta.location.longitude = Some(gps.longitude);
                meta.location.altitude = gps.altitude;
                meta.location.exif_gps = true;
            }
        }
        Err(e) => {
            // Present but unparseable; distinct from "no metadata"
            debug!("embedded metadata unreadable for {}: {}", destination.display(), e);
            meta.mark_unreadable(Provenance::Embedded);
        }
    }

    // Filesystem creation time of the stored copy. This is copy time, not
    // capture time; recorded for completeness and never merged.
    meta.datetime.file_creation_time = file_creation_time(destination);

    meta.sync_derived();
    meta
}

fn file_creation_time(path: &Path) -> Option<String> {
    let fs_meta = fs::metadata(path).ok()?;
    let created = fs_meta.created().or_else(|_| fs_meta.modified()).ok()?;
    let dt: DateTime<Utc> = created.into();
    Some(dt.naive_utc().format(EXIF_DATETIME_FORMAT).to_string())
}
