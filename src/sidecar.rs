//! Sidecar document parsing
//!
//! Parses the export tool's per-file JSON sidecar into the same metadata
//! shape the embedded extractor produces. The epoch `timestamp` string is
//! preferred over the locale-formatted variant; coordinates of exactly
//! (0.0, 0.0) mean "no fix" and are treated as absent while the declaration
//! flag stays true.

use std::fs;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime};
use serde::Deserialize;

use crate::error::{RestoreError, Result};
use crate::model::EXIF_DATETIME_FORMAT;

/// Metadata recovered from one sidecar document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SidecarMetadata {
    /// Capture time, normalized to the EXIF string format
    pub datetime: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,

    /// The document declared a location block at all, valid fix or not
    pub declared_location: bool,
}

#[derive(Debug, Deserialize)]
struct SidecarDocument {
    #[serde(rename = "photoTakenTime")]
    photo_taken_time: Option<TimeBlock>,

    #[serde(rename = "geoData")]
    geo_data: Option<GeoBlock>,

    #[serde(rename = "geoDataExif")]
    geo_data_exif: Option<GeoBlock>,
}

#[derive(Debug, Deserialize)]
struct TimeBlock {
    timestamp: Option<String>,
    formatted: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct GeoBlock {
    latitude: Option<f64>,
    longitude: Option<f64>,
    altitude: Option<f64>,
}

impl GeoBlock {
    /// Coordinates, unless the block is the tool's (0.0, 0.0) placeholder
    fn coordinates(&self) -> Option<(f64, f64, Option<f64>)> {
        let (lat, lon) = (self.latitude?, self.longitude?);
        if lat == 0.0 && lon == 0.0 {
            return None;
        }
        Some((lat, lon, self.altitude))
    }
}

/// Parse a located sidecar document.
///
/// An unreadable or malformed document is an error here; the caller records
/// it as an all-null partial with the unreadable marker so the merge stage
/// can tell "no sidecar" from "sidecar present but unparseable".
pub fn parse_sidecar_file(path: &Path) -> Result<SidecarMetadata> {
    let raw = fs::read_to_string(path)?;
    parse_sidecar_str(&raw)
}

pub fn parse_sidecar_str(raw: &str) -> Result<SidecarMetadata> {
    let doc: SidecarDocument = serde_json::from_str(raw)?;

    let datetime = doc.photo_taken_time.as_ref().and_then(parse_taken_time);

    let declared_location = doc.geo_data.is_some() || doc.geo_data_exif.is_some();
    let coordinates = doc
        .geo_data
        .as_ref()
        .and_then(GeoBlock::coordinates)
        .or_else(|| doc.geo_data_exif.as_ref().and_then(GeoBlock::coordinates));

    let (latitude, longitude, altitude) = match coordinates {
        Some((lat, lon, alt)) => (Some(lat), Some(lon), alt),
        None => (None, None, None),
    };

    Ok(SidecarMetadata {
        datetime,
        latitude,
        longitude,
        altitude,
        declared_location,
    })
}

fn parse_taken_time(block: &TimeBlock) -> Option<String> {
    // Epoch seconds first: unambiguous and timezone-free
    if let Some(ts) = block.timestamp.as_deref() {
        if let Ok(secs) = ts.parse::<i64>() {
            if let Some(dt) = DateTime::from_timestamp(secs, 0) {
                return Some(dt.naive_utc().format(EXIF_DATETIME_FORMAT).to_string());
            }
        }
    }

    // Fallback: "2018/11/12 3:42:35 UTC"
    let formatted = block.formatted.as_deref()?;
    let trimmed = formatted.trim_end_matches("UTC").trim();
    NaiveDateTime::parse_from_str(trimmed, "%Y/%m/%d %H:%M:%S")
        .ok()
        .map(|dt| dt.format(EXIF_DATETIME_FORMAT).to_string())
}

/// Malformed-document check used in tests and by callers that want to
/// distinguish parse failures from I/O failures
pub fn is_parse_error(err: &RestoreError) -> bool {
    matches!(err, RestoreError::Json(_))
}
