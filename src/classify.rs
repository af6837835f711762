//! Media classification by file extension
//!
//! Extension tables come from configuration; unknown extensions are never an
//! error. The run keeps a census of every extension seen so the operator can
//! review what was skipped.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::config::{normalize_extension, Config};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Unknown,
}

pub struct FileClassifier {
    image_extensions: BTreeSet<String>,
    video_extensions: BTreeSet<String>,
}

impl FileClassifier {
    pub fn from_config(config: &Config) -> Self {
        Self {
            image_extensions: config.image_extensions(),
            video_extensions: config.video_extensions(),
        }
    }

    /// Classify a path by its extension, case-insensitively
    pub fn classify(&self, path: &Path) -> MediaKind {
        match extension_of(path) {
            Some(ext) if self.image_extensions.contains(&ext) => MediaKind::Image,
            Some(ext) if self.video_extensions.contains(&ext) => MediaKind::Video,
            _ => MediaKind::Unknown,
        }
    }
}

/// Normalized extension of a path (".jpg"), if it has one
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(normalize_extension)
}

/// Census of extensions observed during a full-tree scan
#[derive(Debug, Default)]
pub struct ExtensionScan {
    counts: BTreeMap<String, u64>,
    unknown: BTreeSet<String>,
}

impl ExtensionScan {
    pub fn record(&mut self, path: &Path, kind: MediaKind) {
        if let Some(ext) = extension_of(path) {
            *self.counts.entry(ext.clone()).or_insert(0) += 1;
            if kind == MediaKind::Unknown {
                self.unknown.insert(ext);
            }
        }
    }

    /// Extensions that classified as unknown, for operator review
    pub fn unknown_extensions(&self) -> impl Iterator<Item = &str> {
        self.unknown.iter().map(|s| s.as_str())
    }

    /// Count of files seen per extension, most frequent first
    pub fn counts_by_frequency(&self) -> Vec<(&str, u64)> {
        let mut counts: Vec<(&str, u64)> =
            self.counts.iter().map(|(e, c)| (e.as_str(), *c)).collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        counts
    }

    pub fn has_unknown(&self) -> bool {
        !self.unknown.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn classifier() -> FileClassifier {
        FileClassifier::from_config(&Config::default())
    }

    #[test]
    fn test_classify_by_extension() {
        let c = classifier();
        assert_eq!(c.classify(Path::new("/a/photo.jpg")), MediaKind::Image);
        assert_eq!(c.classify(Path::new("/a/clip.MP4")), MediaKind::Video);
        assert_eq!(c.classify(Path::new("/a/notes.txt")), MediaKind::Unknown);
        assert_eq!(c.classify(Path::new("/a/noext")), MediaKind::Unknown);
    }

    #[test]
    fn test_classify_is_case_insensitive() {
        let c = classifier();
        assert_eq!(c.classify(Path::new("IMG.JPEG")), MediaKind::Image);
        assert_eq!(c.classify(Path::new("IMG.HeIc")), MediaKind::Image);
    }

    #[test]
    fn test_scan_reports_unknown_extensions() {
        let c = classifier();
        let mut scan = ExtensionScan::default();
        for name in ["a.jpg", "b.jpg", "c.txt", "d.json", "e.mp4"] {
            let path = PathBuf::from(name);
            let kind = c.classify(&path);
            scan.record(&path, kind);
        }

        let unknown: Vec<&str> = scan.unknown_extensions().collect();
        assert_eq!(unknown, vec![".json", ".txt"]);
        assert_eq!(scan.counts_by_frequency()[0], (".jpg", 2));
    }
}
