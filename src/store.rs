//! Durable record sets persisted between stages
//!
//! Every stage writes its full output through `atomic_write_json`: the bytes
//! land in a `.tmp` sibling first and are renamed into place, so an aborted
//! run never leaves a half-written record set for the next stage to consume.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;
use crate::model::{CaptureMetadata, Pair, SidecarLocation};

pub const PAIR_FILE: &str = "pair.json";
pub const METADATA_FILE: &str = "metadata.json";
pub const SIDECAR_LOCATION_FILE: &str = "supplemental_file_location.json";
pub const REPORT_FILE: &str = "result_report.txt";

/// Stored-file maps keyed by filename; BTreeMap keeps output ordering stable
/// across runs
pub type MetadataMap = BTreeMap<String, CaptureMetadata>;
pub type SidecarLocationMap = BTreeMap<String, SidecarLocation>;

pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = tmp_path(path);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    atomic_write(path, json.as_bytes())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

pub fn save_pairs(output_dir: &Path, pairs: &[Pair]) -> Result<()> {
    atomic_write_json(&output_dir.join(PAIR_FILE), &pairs)
}

pub fn load_pairs(output_dir: &Path) -> Result<Vec<Pair>> {
    read_json(&output_dir.join(PAIR_FILE))
}

pub fn save_metadata(output_dir: &Path, metadata: &MetadataMap) -> Result<()> {
    atomic_write_json(&output_dir.join(METADATA_FILE), metadata)
}

pub fn load_metadata(output_dir: &Path) -> Result<MetadataMap> {
    read_json(&output_dir.join(METADATA_FILE))
}

pub fn save_sidecar_locations(output_dir: &Path, locations: &SidecarLocationMap) -> Result<()> {
    atomic_write_json(&output_dir.join(SIDECAR_LOCATION_FILE), locations)
}

pub fn load_sidecar_locations(output_dir: &Path) -> Result<SidecarLocationMap> {
    read_json(&output_dir.join(SIDECAR_LOCATION_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_pair_roundtrip() {
        let dir = TempDir::new().unwrap();
        let pairs = vec![Pair {
            source: "/in/a.jpg".to_string(),
            destination: "/out/images/abc.jpg".to_string(),
            filename: "abc.jpg".to_string(),
            hash: "abc".to_string(),
        }];

        save_pairs(dir.path(), &pairs).unwrap();
        let loaded = load_pairs(dir.path()).unwrap();
        assert_eq!(loaded, pairs);
    }

    #[test]
    fn test_atomic_write_leaves_no_tmp_file() {
        let dir = TempDir::new().unwrap();
        save_pairs(dir.path(), &[]).unwrap();

        let entries: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec![PAIR_FILE.to_string()]);
    }

    #[test]
    fn test_metadata_map_ordering_is_stable() {
        let dir = TempDir::new().unwrap();
        let mut map = MetadataMap::new();
        map.insert("b.jpg".to_string(), Default::default());
        map.insert("a.jpg".to_string(), Default::default());
        save_metadata(dir.path(), &map).unwrap();

        let raw = fs::read_to_string(dir.path().join(METADATA_FILE)).unwrap();
        let a = raw.find("a.jpg").unwrap();
        let b = raw.find("b.jpg").unwrap();
        assert!(a < b);
    }
}
