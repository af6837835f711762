//! Run configuration loaded from config.toml
//!
//! Supplies the image/video extension tables, the ordered sidecar-matching
//! rule list, and the run-level knobs (concurrency, retries, tool timeout).
//! Validation is fatal at startup, before any file I/O.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{RestoreError, Result};
use crate::locate::KNOWN_RULES;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub file_types: FileTypes,

    #[serde(default)]
    pub sidecar: SidecarConfig,

    #[serde(default)]
    pub run: RunConfig,
}

/// Extension tables for media classification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileTypes {
    pub image_extensions: Vec<String>,
    pub video_extensions: Vec<String>,
}

/// Sidecar discovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidecarConfig {
    /// Matching rules tried in order; first match wins
    pub rules: Vec<String>,

    /// Suffix the export tool appends to the media filename
    #[serde(default = "default_sidecar_suffix")]
    pub suffix: String,

    /// Filename budget the export tool applies before the final ".json"
    #[serde(default = "default_max_name_len")]
    pub max_name_len: usize,
}

/// Run-level resource limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Worker threads for per-file fan-out
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Attempts for transient I/O failures (parse errors are never retried)
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Backoff between retry attempts, in milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Wall-clock limit for a single external tool invocation, in seconds
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

fn default_sidecar_suffix() -> String {
    ".supplemental-metadata".to_string()
}

fn default_max_name_len() -> usize {
    46
}

fn default_concurrency() -> usize {
    8
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    200
}

fn default_tool_timeout_secs() -> u64 {
    30
}

impl Default for FileTypes {
    fn default() -> Self {
        let exts = |list: &[&str]| list.iter().map(|e| e.to_string()).collect();
        Self {
            image_extensions: exts(&[
                ".jpg", ".jpeg", ".png", ".gif", ".bmp", ".tiff", ".tif", ".webp", ".heic",
                ".heif", ".raw", ".cr2", ".nef", ".arw", ".dng", ".jp2",
            ]),
            video_extensions: exts(&[
                ".mp4", ".avi", ".mov", ".mkv", ".wmv", ".flv", ".webm", ".m4v", ".mp",
            ]),
        }
    }
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            rules: vec![
                "exact".to_string(),
                "numeric_suffix".to_string(),
                "truncated".to_string(),
            ],
            suffix: default_sidecar_suffix(),
            max_name_len: default_max_name_len(),
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            file_types: FileTypes::default(),
            sidecar: SidecarConfig::default(),
            run: RunConfig::default(),
        }
    }
}

impl Config {
    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would make the run meaningless
    pub fn validate(&self) -> Result<()> {
        if self.file_types.image_extensions.is_empty() && self.file_types.video_extensions.is_empty()
        {
            return Err(RestoreError::Config(
                "no image or video extensions configured".to_string(),
            ));
        }

        if self.sidecar.rules.is_empty() {
            return Err(RestoreError::Config(
                "sidecar rule list is empty".to_string(),
            ));
        }
        for rule in &self.sidecar.rules {
            if !KNOWN_RULES.contains(&rule.as_str()) {
                return Err(RestoreError::Config(format!(
                    "unknown sidecar rule '{}', known rules: {}",
                    rule,
                    KNOWN_RULES.join(", ")
                )));
            }
        }

        if self.sidecar.max_name_len == 0 {
            return Err(RestoreError::Config(
                "sidecar.max_name_len must be greater than zero".to_string(),
            ));
        }
        if self.run.concurrency == 0 {
            return Err(RestoreError::Config(
                "run.concurrency must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Image extensions, normalized (lowercase, leading dot)
    pub fn image_extensions(&self) -> BTreeSet<String> {
        self.file_types
            .image_extensions
            .iter()
            .map(|e| normalize_extension(e))
            .collect()
    }

    /// Video extensions, normalized (lowercase, leading dot)
    pub fn video_extensions(&self) -> BTreeSet<String> {
        self.file_types
            .video_extensions
            .iter()
            .map(|e| normalize_extension(e))
            .collect()
    }
}

/// Normalize an extension to lowercase with a leading dot
pub fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{}", ext)
    }
}
