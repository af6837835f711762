//! Conflict-aware metadata merge
//!
//! Combines the embedded and sidecar views of every stored file into one
//! resolved CaptureMetadata. A field present in exactly one source is taken;
//! a field absent in both becomes a GapEntry; a disagreement beyond
//! tolerance becomes a ConflictEntry with both values and provenance, and
//! the resolved value stays unset rather than guessed. Resolved fields
//! the stored copy lacks are written back into its embedded metadata.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::exiftool::{self, GpsReading};
use crate::model::{parse_datetime, CaptureMetadata, Provenance};
use crate::pipeline::RunContext;
use crate::sidecar::{self, SidecarMetadata};
use crate::store::{self, MetadataMap, SidecarLocationMap};

/// Coordinates closer than this are the same place (absorbs rounding)
const COORD_TOLERANCE_DEG: f64 = 1e-5;

/// EXIF altitude rationals round below this
const ALTITUDE_TOLERANCE_M: f64 = 0.5;

/// Field-level disagreement between the two sources
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictEntry {
    pub destination: String,
    pub filename: String,
    pub field: String,
    pub embedded_value: String,
    pub sidecar_value: String,
    /// Values already resolved for this file, for report context
    pub known: BTreeMap<String, String>,
}

/// Field null in both sources
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GapEntry {
    pub destination: String,
    pub filename: String,
    pub field: String,
    /// Extra context, e.g. a sidecar that was present but unparseable
    pub note: Option<String>,
    pub known: BTreeMap<String, String>,
}

/// Everything the merge stage produces in one run
#[derive(Debug, Default)]
pub struct MergeOutcome {
    /// Files resolved with no gaps or conflicts
    pub fully_resolved: u64,

    /// Files written with at least one field still open
    pub partial: u64,

    pub conflicts: Vec<ConflictEntry>,
    pub gaps: Vec<GapEntry>,
}

/// Per-field resolution over the two tagged candidates
enum Resolution<T> {
    Value(T),
    Gap,
    Conflict(T, T),
}

fn resolve<T: Clone>(
    embedded: Option<T>,
    sidecar: Option<T>,
    equal: impl Fn(&T, &T) -> bool,
) -> Resolution<T> {
    match (embedded, sidecar) {
        (Some(e), Some(s)) if equal(&e, &s) => Resolution::Value(e),
        (Some(e), Some(s)) => Resolution::Conflict(e, s),
        (Some(e), None) => Resolution::Value(e),
        (None, Some(s)) => Resolution::Value(s),
        (None, None) => Resolution::Gap,
    }
}

/// Datetimes compare at whole-second granularity, the coarser of what the
/// two source formats carry
fn datetimes_equal(a: &String, b: &String) -> bool {
    match (parse_datetime(a), parse_datetime(b)) {
        (Some(da), Some(db)) => da == db,
        _ => a == b,
    }
}

fn coords_equal(a: &f64, b: &f64) -> bool {
    (a - b).abs() <= COORD_TOLERANCE_DEG
}

fn altitudes_equal(a: &f64, b: &f64) -> bool {
    (a - b).abs() <= ALTITUDE_TOLERANCE_M
}

/// What write-back needs for one file, decided during the merge pass
struct WritePlan {
    destination: String,
    datetime: Option<String>,
    gps: Option<GpsReading>,
}

/// Stage entry point.
///
/// Consumes the durable outputs of every prior stage, rewrites
/// metadata.json with the composite records, and enriches the stored copies
/// in place. The audit lists are a full re-derivation: running the merge
/// twice on unchanged inputs yields identical reports.
pub fn run_merge(
    config: &Config,
    metadata: &mut MetadataMap,
    locations: &SidecarLocationMap,
    output_dir: &Path,
    ctx: &mut RunContext,
) -> Result<MergeOutcome> {
    let mut outcome = MergeOutcome::default();
    let mut writes: Vec<WritePlan> = Vec::new();

    for (filename, meta) in metadata.iter_mut() {
        let location = locations.get(filename);
        let destination = store_path(output_dir, filename);

        let (sidecar_meta, sidecar_note) = load_sidecar(filename, location, meta);
        let file = merge_one(filename, &destination, meta, &sidecar_meta, sidecar_note);

        if file.conflicts.is_empty() && file.gaps.is_empty() {
            outcome.fully_resolved += 1;
        } else {
            outcome.partial += 1;
        }
        outcome.conflicts.extend(file.conflicts);
        outcome.gaps.extend(file.gaps);

        if file.write.datetime.is_some() || file.write.gps.is_some() {
            writes.push(file.write);
        }
    }

    write_back(config, &writes, ctx);

    store::save_metadata(output_dir, metadata)?;

    ctx.stats.fully_resolved = outcome.fully_resolved;
    ctx.stats.partial = outcome.partial;
    ctx.stats.conflicts = outcome.conflicts.len() as u64;
    ctx.stats.gaps = outcome.gaps.len() as u64;

    info!(
        "merge: {} fully resolved, {} partial, {} conflicts, {} gaps",
        outcome.fully_resolved,
        outcome.partial,
        outcome.conflicts.len(),
        outcome.gaps.len()
    );

    Ok(outcome)
}

fn store_path(output_dir: &Path, filename: &str) -> String {
    output_dir.join("images").join(filename).display().to_string()
}

/// Parse this file's sidecar, if one was located and still exists
fn load_sidecar(
    filename: &str,
    location: Option<&crate::model::SidecarLocation>,
    meta: &mut CaptureMetadata,
) -> (SidecarMetadata, Option<String>) {
    let Some(location) = location else {
        return (SidecarMetadata::default(), None);
    };
    if !location.found {
        return (SidecarMetadata::default(), None);
    }
    if !location.file_exists {
        return (
            SidecarMetadata::default(),
            Some("sidecar matched by name but no longer exists".to_string()),
        );
    }

    let path = location.metadata_file.as_deref().unwrap_or_default();
    match sidecar::parse_sidecar_file(Path::new(path)) {
        Ok(parsed) => (parsed, None),
        Err(e) => {
            warn!("sidecar unreadable for {}: {}", filename, e);
            meta.mark_unreadable(Provenance::Sidecar);
            (
                SidecarMetadata::default(),
                Some("sidecar present but unparseable".to_string()),
            )
        }
    }
}

struct FileMerge {
    conflicts: Vec<ConflictEntry>,
    gaps: Vec<GapEntry>,
    write: WritePlan,
}

/// Merge one stored file's two views and decide its write-back plan
fn merge_one(
    filename: &str,
    destination: &str,
    meta: &mut CaptureMetadata,
    sidecar_meta: &SidecarMetadata,
    sidecar_note: Option<String>,
) -> FileMerge {
    // Fold the sidecar observations into the persisted record first
    meta.datetime.json_datetime = sidecar_meta.datetime.clone();
    meta.location.json_location = sidecar_meta.declared_location;
    if sidecar_meta.datetime.is_some() || sidecar_meta.latitude.is_some() {
        meta.add_source(Provenance::Sidecar);
    }

    let embedded_datetime = meta.embedded_capture_datetime().map(|s| s.to_string());
    let embedded_gps = meta.location.exif_gps;

    let mut conflicts = Vec::new();
    let mut gaps = Vec::new();
    let mut write = WritePlan {
        destination: destination.to_string(),
        datetime: None,
        gps: None,
    };

    // Datetime: capture-time sources only; the copy time never participates
    match resolve(
        embedded_datetime.clone(),
        sidecar_meta.datetime.clone(),
        datetimes_equal,
    ) {
        Resolution::Value(value) => {
            if embedded_datetime.is_none() {
                write.datetime = Some(value);
            }
        }
        Resolution::Gap => gaps.push(GapEntry {
            destination: destination.to_string(),
            filename: filename.to_string(),
            field: "datetime".to_string(),
            note: sidecar_note.clone(),
            known: BTreeMap::new(),
        }),
        Resolution::Conflict(e, s) => conflicts.push(ConflictEntry {
            destination: destination.to_string(),
            filename: filename.to_string(),
            field: "datetime".to_string(),
            embedded_value: e,
            sidecar_value: s,
            known: BTreeMap::new(),
        }),
    }

    // Coordinates resolve as one logical location; altitude rides along
    let (embedded_lat, embedded_lon, embedded_alt) = if embedded_gps {
        (
            meta.location.latitude,
            meta.location.longitude,
            meta.location.altitude,
        )
    } else {
        (None, None, None)
    };

    let lat = resolve(embedded_lat, sidecar_meta.latitude, coords_equal);
    let lon = resolve(embedded_lon, sidecar_meta.longitude, coords_equal);

    match (lat, lon) {
        (Resolution::Value(lat), Resolution::Value(lon)) => {
            let altitude = match resolve(embedded_alt, sidecar_meta.altitude, altitudes_equal) {
                Resolution::Value(alt) => Some(alt),
                Resolution::Conflict(e, s) => {
                    conflicts.push(conflict_entry(
                        destination, filename, "altitude", e, s,
                    ));
                    None
                }
                Resolution::Gap => None,
            };

            meta.location.latitude = Some(lat);
            meta.location.longitude = Some(lon);
            if altitude.is_some() {
                meta.location.altitude = altitude;
            }

            if !embedded_gps {
                write.gps = Some(GpsReading {
                    latitude: lat,
                    longitude: lon,
                    altitude,
                });
            }
        }
        (Resolution::Gap, Resolution::Gap) => gaps.push(GapEntry {
            destination: destination.to_string(),
            filename: filename.to_string(),
            field: "location".to_string(),
            note: sidecar_note,
            known: BTreeMap::new(),
        }),
        (lat, lon) => {
            // At least one axis disagreed; report whatever conflicted and
            // leave the whole location unresolved rather than half-moving it
            if let Resolution::Conflict(e, s) = lat {
                conflicts.push(conflict_entry(destination, filename, "latitude", e, s));
            }
            if let Resolution::Conflict(e, s) = lon {
                conflicts.push(conflict_entry(destination, filename, "longitude", e, s));
            }
        }
    }

    meta.sync_derived();

    // Context for the report: what this file does know
    let known = known_fields(meta);
    for c in &mut conflicts {
        c.known = known.clone();
    }
    for g in &mut gaps {
        g.known = known.clone();
    }

    FileMerge {
        conflicts,
        gaps,
        write,
    }
}

fn conflict_entry(
    destination: &str,
    filename: &str,
    field: &str,
    embedded: f64,
    sidecar: f64,
) -> ConflictEntry {
    ConflictEntry {
        destination: destination.to_string(),
        filename: filename.to_string(),
        field: field.to_string(),
        embedded_value: embedded.to_string(),
        sidecar_value: sidecar.to_string(),
        known: BTreeMap::new(),
    }
}

fn known_fields(meta: &CaptureMetadata) -> BTreeMap<String, String> {
    let mut known = BTreeMap::new();
    if let Some(dt) = meta.embedded_capture_datetime() {
        known.insert("datetime (embedded)".to_string(), dt.to_string());
    }
    if let Some(dt) = &meta.datetime.json_datetime {
        known.insert("datetime (sidecar)".to_string(), dt.clone());
    }
    if let (Some(lat), Some(lon)) = (meta.location.latitude, meta.location.longitude) {
        known.insert("location".to_string(), format!("{}, {}", lat, lon));
    }
    if let Some(alt) = meta.location.altitude {
        known.insert("altitude".to_string(), format!("{} m", alt));
    }
    known
}

/// Enrich the stored copies with the fields they lack. Per-file failures
/// are logged and counted, never fatal; nothing is ever written to an
/// original source file.
fn write_back(config: &Config, writes: &[WritePlan], ctx: &mut RunContext) {
    if writes.is_empty() {
        return;
    }
    if !exiftool::exiftool_available() {
        warn!(
            "exiftool not available, skipping embedded write-back for {} files",
            writes.len()
        );
        ctx.stats.writeback_skipped = writes.len() as u64;
        return;
    }

    let timeout = Duration::from_secs(config.run.tool_timeout_secs);
    let failures: u64 = writes
        .par_iter()
        .map(|plan| {
            match exiftool::write_embedded(
                Path::new(&plan.destination),
                plan.datetime.as_deref(),
                plan.gps.as_ref(),
                timeout,
            ) {
                Ok(()) => 0u64,
                Err(e) => {
                    warn!("write-back failed for {}: {}", plan.destination, e);
                    1
                }
            }
        })
        .sum();

    ctx.stats.writeback_written = writes.len() as u64 - failures;
    ctx.stats.writeback_errors = failures;
}
