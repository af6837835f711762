//! Persisted data model for the restoration pipeline
//!
//! These are the durable record shapes written between stages: `Pair`
//! (pair.json), `CaptureMetadata` (metadata.json) and `SidecarLocation`
//! (supplemental_file_location.json). Absent values serialize as explicit
//! `null`, never omitted keys, so record sets are diffable across runs.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// EXIF datetime string format, shared by every datetime field we persist
pub const EXIF_DATETIME_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

/// Parse a datetime observation. Accepts the EXIF form and, for tolerant
/// ingestion of tool output, an ISO-8601-ish form with an optional offset
/// suffix (the offset is dropped; values are compared as naive timestamps).
pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();

    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, EXIF_DATETIME_FORMAT) {
        return Some(dt);
    }

    let without_offset = raw
        .split_once('+')
        .map(|(head, _)| head)
        .unwrap_or(raw)
        .trim_end_matches('Z');
    NaiveDateTime::parse_from_str(&without_offset.replace('T', " "), "%Y-%m-%d %H:%M:%S").ok()
}

/// One ingested file: original source mapped to its content-addressed copy.
///
/// Two pairs with equal `hash` reference byte-identical content and share one
/// `destination`. Every source is recorded, including duplicate content, so
/// later stages can attempt sidecar lookup against any original location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pair {
    /// Absolute original path
    pub source: String,

    /// Absolute path inside the content-addressed store
    pub destination: String,

    /// Destination basename: hash + lowercased extension
    pub filename: String,

    /// md5 digest of the file bytes, hex
    pub hash: String,
}

/// Provenance tag for a metadata value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Embedded,
    Sidecar,
}

/// Datetime observations for one stored file, one slot per source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DateTimeFields {
    /// EXIF DateTime tag ("YYYY:MM:DD HH:MM:SS")
    pub exif_datetime: Option<String>,

    /// EXIF DateTimeOriginal (capture time)
    pub exif_datetime_original: Option<String>,

    /// EXIF DateTimeDigitized
    pub exif_datetime_digitized: Option<String>,

    /// Filesystem creation time of the stored copy. Reflects copy time, not
    /// capture time; collected for completeness and excluded from merging.
    pub file_creation_time: Option<String>,

    /// Capture time declared by the sidecar document
    pub json_datetime: Option<String>,
}

/// Location observations for one stored file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationFields {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,

    /// The embedded metadata carried GPS coordinates
    pub exif_gps: bool,

    /// The sidecar declared a location block, even if its coordinates were
    /// zero or absent
    pub json_location: bool,
}

/// One logical metadata record per stored filename
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureMetadata {
    pub datetime: DateTimeFields,
    pub location: LocationFields,

    /// Derived: at least one datetime sub-field is non-null. Recomputed by
    /// `sync_derived`, never set directly.
    pub has_datetime: bool,

    /// Derived: latitude and longitude are both non-null
    pub has_location: bool,

    /// Sources that actually contributed at least one value
    pub metadata_sources: Vec<Provenance>,

    /// Sources that were present but unparseable (distinct from absent)
    pub unreadable_sources: Vec<Provenance>,
}

impl CaptureMetadata {
    /// Recompute the derived booleans from the raw fields.
    ///
    /// This is the only place the flags are assigned, which keeps them equal
    /// to the disjunction over the contributing fields at all times.
    pub fn sync_derived(&mut self) {
        let dt = &self.datetime;
        self.has_datetime = dt.exif_datetime.is_some()
            || dt.exif_datetime_original.is_some()
            || dt.exif_datetime_digitized.is_some()
            || dt.file_creation_time.is_some()
            || dt.json_datetime.is_some();
        self.has_location = self.location.latitude.is_some() && self.location.longitude.is_some();
    }

    /// Record a contributing source, keeping the set free of duplicates
    pub fn add_source(&mut self, source: Provenance) {
        if !self.metadata_sources.contains(&source) {
            self.metadata_sources.push(source);
        }
    }

    /// Record a present-but-unparseable source
    pub fn mark_unreadable(&mut self, source: Provenance) {
        if !self.unreadable_sources.contains(&source) {
            self.unreadable_sources.push(source);
        }
    }

    /// Best embedded capture-time candidate: original, then digitized, then
    /// the plain DateTime tag. The filesystem creation time never qualifies.
    pub fn embedded_capture_datetime(&self) -> Option<&str> {
        self.datetime
            .exif_datetime_original
            .as_deref()
            .or(self.datetime.exif_datetime_digitized.as_deref())
            .or(self.datetime.exif_datetime.as_deref())
    }
}

/// Sidecar lookup outcome for one stored filename
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidecarLocation {
    /// The original source whose directory was searched (the matching one,
    /// when several sources share the stored file)
    pub original_source: String,

    /// Path of the matched sidecar document, if any
    pub metadata_file: Option<String>,

    /// Name of the matching rule, if any
    pub metadata_type: Option<String>,

    pub found: bool,

    /// Re-validated at lookup time, independent of `found`
    pub file_exists: bool,
}

impl SidecarLocation {
    pub fn not_found(original_source: String) -> Self {
        Self {
            original_source,
            metadata_file: None,
            metadata_type: None,
            found: false,
            file_exists: false,
        }
    }
}
