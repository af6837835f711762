//! Sidecar discovery
//!
//! For every Pair the original directory is searched for a companion
//! metadata document. Export-tool naming conventions vary by version, so the
//! matching logic is an ordered list of independent strategies selected by
//! name from configuration; new conventions are added by appending a
//! strategy, never by editing control flow. Each strategy is a pure function
//! from (media filename, directory listing) to an optional candidate name;
//! the first match wins.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use rayon::prelude::*;
use tracing::info;

use crate::config::Config;
use crate::error::{RestoreError, Result};
use crate::model::{Pair, SidecarLocation};
use crate::pipeline::RunContext;
use crate::store::{self, SidecarLocationMap};

/// Rule names accepted in `[sidecar].rules`, in their canonical order
pub const KNOWN_RULES: &[&str] = &["exact", "numeric_suffix", "truncated"];

/// One naming convention: derive the sidecar name a media file would have
/// under this convention, and return it if the directory actually holds it
trait MatchRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn find(&self, media_name: &str, listing: &BTreeSet<String>) -> Option<String>;
}

/// `<media filename><suffix>.json` next to the media file
struct ExactRule {
    suffix: String,
}

impl MatchRule for ExactRule {
    fn name(&self) -> &'static str {
        "exact"
    }

    fn find(&self, media_name: &str, listing: &BTreeSet<String>) -> Option<String> {
        let candidate = format!("{}{}.json", media_name, self.suffix);
        listing.contains(&candidate).then_some(candidate)
    }
}

/// The export tool appends a numeric "(n)" duplicate marker to the media
/// stem but not to the sidecar: media `IMG_0001(1).jpg` keeps sidecar
/// `IMG_0001.jpg<suffix>.json`
struct NumericSuffixRule {
    suffix: String,
}

impl MatchRule for NumericSuffixRule {
    fn name(&self) -> &'static str {
        "numeric_suffix"
    }

    fn find(&self, media_name: &str, listing: &BTreeSet<String>) -> Option<String> {
        let stripped = strip_numeric_suffix(media_name)?;
        let candidate = format!("{}{}.json", stripped, self.suffix);
        listing.contains(&candidate).then_some(candidate)
    }
}

/// Overlong sidecar names are cut to the tool's filename budget before the
/// final ".json"
struct TruncatedRule {
    suffix: String,
    max_name_len: usize,
}

impl MatchRule for TruncatedRule {
    fn name(&self) -> &'static str {
        "truncated"
    }

    fn find(&self, media_name: &str, listing: &BTreeSet<String>) -> Option<String> {
        let full = format!("{}{}", media_name, self.suffix);
        if full.chars().count() <= self.max_name_len {
            // Nothing to truncate; the exact rule already covered this name
            return None;
        }
        let truncated: String = full.chars().take(self.max_name_len).collect();
        let candidate = format!("{}.json", truncated);
        listing.contains(&candidate).then_some(candidate)
    }
}

/// Strip a trailing "(n)" duplicate marker from the stem of a media
/// filename: "IMG_0001(1).jpg" -> "IMG_0001.jpg". Returns None when the
/// name carries no marker.
fn strip_numeric_suffix(media_name: &str) -> Option<String> {
    let (stem, ext) = match media_name.rfind('.') {
        Some(idx) => (&media_name[..idx], &media_name[idx..]),
        None => (media_name, ""),
    };

    let open = stem.rfind('(')?;
    let inner = &stem[open + 1..];
    let inner = inner.strip_suffix(')')?;
    if inner.is_empty() || !inner.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    Some(format!("{}{}", &stem[..open], ext))
}

pub struct SidecarLocator {
    rules: Vec<Box<dyn MatchRule>>,
}

impl SidecarLocator {
    /// Build the rule list named by the configuration, in order
    pub fn from_config(config: &Config) -> Result<Self> {
        let suffix = config.sidecar.suffix.clone();
        let mut rules: Vec<Box<dyn MatchRule>> = Vec::new();

        for name in &config.sidecar.rules {
            let rule: Box<dyn MatchRule> = match name.as_str() {
                "exact" => Box::new(ExactRule {
                    suffix: suffix.clone(),
                }),
                "numeric_suffix" => Box::new(NumericSuffixRule {
                    suffix: suffix.clone(),
                }),
                "truncated" => Box::new(TruncatedRule {
                    suffix: suffix.clone(),
                    max_name_len: config.sidecar.max_name_len,
                }),
                other => {
                    return Err(RestoreError::Config(format!(
                        "unknown sidecar rule '{}'",
                        other
                    )))
                }
            };
            rules.push(rule);
        }

        if rules.is_empty() {
            return Err(RestoreError::Config(
                "sidecar rule list is empty".to_string(),
            ));
        }

        Ok(Self { rules })
    }

    /// Apply the rules in order against an in-memory directory listing
    pub fn apply_rules(
        &self,
        media_name: &str,
        listing: &BTreeSet<String>,
    ) -> Option<(String, &'static str)> {
        for rule in &self.rules {
            if let Some(candidate) = rule.find(media_name, listing) {
                return Some((candidate, rule.name()));
            }
        }
        None
    }

    /// Search one original source's directory for its sidecar
    fn locate_source(&self, source: &Path) -> Option<SidecarLocation> {
        let dir = source.parent()?;
        let media_name = source.file_name()?.to_str()?;
        let listing = read_listing(dir);

        let (candidate, rule_name) = self.apply_rules(media_name, &listing)?;
        let metadata_file = dir.join(&candidate);
        // found by name; existence re-checked independently
        let file_exists = metadata_file.is_file();

        Some(SidecarLocation {
            original_source: source.display().to_string(),
            metadata_file: Some(metadata_file.display().to_string()),
            metadata_type: Some(rule_name.to_string()),
            found: true,
            file_exists,
        })
    }

    /// Locate sidecars for every stored filename, trying each of its
    /// original sources in ingest order
    pub fn locate_all(&self, pairs: &[Pair]) -> SidecarLocationMap {
        let mut sources_by_file: BTreeMap<&str, Vec<&Pair>> = BTreeMap::new();
        for pair in pairs {
            sources_by_file
                .entry(pair.filename.as_str())
                .or_default()
                .push(pair);
        }

        sources_by_file
            .par_iter()
            .map(|(filename, sources)| {
                let location = sources
                    .iter()
                    .find_map(|pair| self.locate_source(Path::new(&pair.source)))
                    .unwrap_or_else(|| {
                        SidecarLocation::not_found(sources[0].source.clone())
                    });
                (filename.to_string(), location)
            })
            .collect::<Vec<_>>()
            .into_iter()
            .collect()
    }
}

fn read_listing(dir: &Path) -> BTreeSet<String> {
    let mut listing = BTreeSet::new();
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            if let Ok(name) = entry.file_name().into_string() {
                listing.insert(name);
            }
        }
    }
    listing
}

/// Stage entry point: locate, persist, and count
pub fn run_locate(
    config: &Config,
    pairs: &[Pair],
    output_dir: &Path,
    ctx: &mut RunContext,
) -> Result<SidecarLocationMap> {
    let locator = SidecarLocator::from_config(config)?;
    let locations = locator.locate_all(pairs);

    ctx.stats.sidecars_found = locations.values().filter(|l| l.found).count() as u64;
    ctx.stats.sidecars_missing = locations.len() as u64 - ctx.stats.sidecars_found;

    store::save_sidecar_locations(output_dir, &locations)?;
    info!(
        "locate: {} sidecars found, {} without sidecar",
        ctx.stats.sidecars_found, ctx.stats.sidecars_missing
    );

    Ok(locations)
}
