//! ExifTool command wrapper utilities
//!
//! All embedded-metadata reads and writes go through the system `exiftool`
//! binary; a pure-Rust kamadak-exif fallback covers image reads when the tool
//! is not installed. Invocations are bounded by a wall-clock timeout.

use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ExifToolError {
    #[error("exiftool not found in system PATH")]
    NotInstalled,

    #[error("exiftool execution failed: {0}")]
    ExecutionFailed(String),

    #[error("exiftool timed out after {0}s")]
    TimedOut(u64),

    #[error("Invalid output: {0}")]
    InvalidOutput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// GPS coordinates in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsReading {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
}

/// Embedded tags relevant to restoration, already normalized
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddedTags {
    /// EXIF DateTime, "YYYY:MM:DD HH:MM:SS"
    pub datetime: Option<String>,
    pub datetime_original: Option<String>,
    pub datetime_digitized: Option<String>,
    pub gps: Option<GpsReading>,
}

impl EmbeddedTags {
    pub fn is_empty(&self) -> bool {
        self.datetime.is_none()
            && self.datetime_original.is_none()
            && self.datetime_digitized.is_none()
            && self.gps.is_none()
    }
}

pub struct ExifToolCommand {
    args: Vec<String>,
    timeout: Duration,
}

impl ExifToolCommand {
    pub fn new(timeout: Duration) -> Self {
        Self {
            args: Vec::new(),
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: &[&str]) -> Self {
        self.args.extend(args.iter().map(|s| s.to_string()));
        self
    }

    pub fn file(mut self, path: impl AsRef<Path>) -> Self {
        self.args.push(path.as_ref().display().to_string());
        self
    }

    /// Run exiftool, killing the child if it outlives the timeout
    pub fn execute(self) -> Result<Vec<u8>, ExifToolError> {
        if !exiftool_available() {
            return Err(ExifToolError::NotInstalled);
        }

        let mut child = Command::new("exiftool")
            .args(&self.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait()? {
                Some(status) => break status,
                None if Instant::now() >= deadline => {
                    child.kill().ok();
                    child.wait().ok();
                    return Err(ExifToolError::TimedOut(self.timeout.as_secs()));
                }
                None => std::thread::sleep(Duration::from_millis(20)),
            }
        };

        let mut stdout = Vec::new();
        if let Some(mut out) = child.stdout.take() {
            out.read_to_end(&mut stdout)?;
        }

        if !status.success() {
            let mut stderr = String::new();
            if let Some(mut err) = child.stderr.take() {
                err.read_to_string(&mut stderr).ok();
            }
            return Err(ExifToolError::ExecutionFailed(stderr.trim().to_string()));
        }

        Ok(stdout)
    }
}

pub fn exiftool_available() -> bool {
    Command::new("exiftool")
        .arg("-ver")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Read the restoration-relevant embedded tags of a media file.
///
/// Prefers exiftool (`-j -n`, all formats); falls back to kamadak-exif for
/// anything exiftool cannot be asked about. `Ok` with an empty `EmbeddedTags`
/// means the file is readable but carries no capture metadata; `Err` means
/// the embedded metadata is present but unreadable.
pub fn read_embedded(path: &Path, timeout: Duration) -> Result<EmbeddedTags, ExifToolError> {
    if exiftool_available() {
        read_with_exiftool(path, timeout)
    } else {
        debug!("exiftool not available, reading {} with kamadak-exif", path.display());
        read_with_kamadak(path)
    }
}

fn read_with_exiftool(path: &Path, timeout: Duration) -> Result<EmbeddedTags, ExifToolError> {
    let stdout = ExifToolCommand::new(timeout)
        .args(&["-j", "-G", "-n"])
        .file(path)
        .execute()?;

    let parsed: Vec<serde_json::Map<String, Value>> = serde_json::from_slice(&stdout)
        .map_err(|e| ExifToolError::InvalidOutput(e.to_string()))?;
    let tags = parsed
        .into_iter()
        .next()
        .ok_or_else(|| ExifToolError::InvalidOutput("no metadata object".to_string()))?;

    let get_str = |key: &str| -> Option<String> {
        tags.get(key).and_then(|v| {
            if v.is_string() {
                v.as_str().map(|s| s.to_string())
            } else if v.is_null() {
                None
            } else {
                Some(v.to_string().trim_matches('"').to_string())
            }
        })
    };
    let get_f64 = |key: &str| -> Option<f64> {
        tags.get(key)
            .and_then(|v| v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
    };

    // With -n, composite GPS values are already signed decimal degrees
    let gps = match (
        get_f64("Composite:GPSLatitude"),
        get_f64("Composite:GPSLongitude"),
    ) {
        (Some(latitude), Some(longitude)) => Some(GpsReading {
            latitude,
            longitude,
            altitude: get_f64("Composite:GPSAltitude"),
        }),
        _ => None,
    };

    Ok(EmbeddedTags {
        datetime: get_str("EXIF:ModifyDate"),
        datetime_original: get_str("EXIF:DateTimeOriginal")
            .or_else(|| get_str("QuickTime:CreateDate")),
        datetime_digitized: get_str("EXIF:CreateDate"),
        gps,
    })
}

fn read_with_kamadak(path: &Path) -> Result<EmbeddedTags, ExifToolError> {
    use std::fs::File;
    use std::io::BufReader;

    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let exif_data = match exif::Reader::new().read_from_container(&mut reader) {
        Ok(data) => data,
        // No EXIF container at all is routine absence, not corruption
        Err(exif::Error::NotFound(_)) => return Ok(EmbeddedTags::default()),
        Err(e) => return Err(ExifToolError::InvalidOutput(e.to_string())),
    };

    let get_str = |tag: exif::Tag| -> Option<String> {
        exif_data
            .get_field(tag, exif::In::PRIMARY)
            .map(|f| f.display_value().to_string().trim_matches('"').to_string())
    };

    Ok(EmbeddedTags {
        datetime: get_str(exif::Tag::DateTime),
        datetime_original: get_str(exif::Tag::DateTimeOriginal),
        datetime_digitized: get_str(exif::Tag::DateTimeDigitized),
        gps: parse_kamadak_gps(&exif_data),
    })
}

/// DMS rationals plus hemisphere refs to signed decimal degrees
fn parse_kamadak_gps(exif_data: &exif::Exif) -> Option<GpsReading> {
    let lat = exif_data.get_field(exif::Tag::GPSLatitude, exif::In::PRIMARY)?;
    let lon = exif_data.get_field(exif::Tag::GPSLongitude, exif::In::PRIMARY)?;
    let lat_ref = exif_data.get_field(exif::Tag::GPSLatitudeRef, exif::In::PRIMARY);
    let lon_ref = exif_data.get_field(exif::Tag::GPSLongitudeRef, exif::In::PRIMARY);

    let parse_dms = |field: &exif::Field| -> Option<f64> {
        match &field.value {
            exif::Value::Rational(v) if v.len() >= 3 => {
                Some(v[0].to_f64() + v[1].to_f64() / 60.0 + v[2].to_f64() / 3600.0)
            }
            _ => None,
        }
    };

    let mut latitude = parse_dms(lat)?;
    let mut longitude = parse_dms(lon)?;

    if let Some(r) = lat_ref {
        if r.display_value().to_string().contains('S') {
            latitude = -latitude;
        }
    }
    if let Some(r) = lon_ref {
        if r.display_value().to_string().contains('W') {
            longitude = -longitude;
        }
    }

    let altitude = exif_data
        .get_field(exif::Tag::GPSAltitude, exif::In::PRIMARY)
        .and_then(|f| match &f.value {
            exif::Value::Rational(v) if !v.is_empty() => Some(v[0].to_f64()),
            _ => None,
        });

    Some(GpsReading {
        latitude,
        longitude,
        altitude,
    })
}

/// Write resolved fields back into a stored file's embedded metadata.
///
/// Mutates the content-addressed copy in place (`-overwrite_original`), never
/// an original source file.
pub fn write_embedded(
    path: &Path,
    datetime: Option<&str>,
    gps: Option<&GpsReading>,
    timeout: Duration,
) -> Result<(), ExifToolError> {
    if datetime.is_none() && gps.is_none() {
        return Ok(());
    }

    let mut cmd = ExifToolCommand::new(timeout).arg("-overwrite_original");

    if let Some(dt) = datetime {
        cmd = cmd
            .arg(format!("-EXIF:DateTime={}", dt))
            .arg(format!("-EXIF:DateTimeOriginal={}", dt))
            .arg(format!("-EXIF:DateTimeDigitized={}", dt));
    }

    if let Some(gps) = gps {
        let (lat_deg, lat_min, lat_sec) = decimal_to_dms(gps.latitude);
        let (lon_deg, lon_min, lon_sec) = decimal_to_dms(gps.longitude);
        let lat_ref = if gps.latitude >= 0.0 { "N" } else { "S" };
        let lon_ref = if gps.longitude >= 0.0 { "E" } else { "W" };

        cmd = cmd
            .arg(format!("-EXIF:GPSLatitude={}deg {}' {:.2}\"", lat_deg, lat_min, lat_sec))
            .arg(format!("-EXIF:GPSLatitudeRef={}", lat_ref))
            .arg(format!("-EXIF:GPSLongitude={}deg {}' {:.2}\"", lon_deg, lon_min, lon_sec))
            .arg(format!("-EXIF:GPSLongitudeRef={}", lon_ref));

        if let Some(alt) = gps.altitude {
            cmd = cmd
                .arg(format!("-EXIF:GPSAltitude={}", alt))
                .arg("-EXIF:GPSAltitudeRef=0");
        }
    }

    cmd.file(path).execute()?;
    Ok(())
}

/// Decimal degrees to (degrees, minutes, seconds), unsigned
fn decimal_to_dms(decimal_deg: f64) -> (u32, u32, f64) {
    let abs = decimal_deg.abs();
    let degrees = abs.floor();
    let minutes_float = (abs - degrees) * 60.0;
    let minutes = minutes_float.floor();
    let seconds = (minutes_float - minutes) * 60.0;
    (degrees as u32, minutes as u32, seconds)
}
