//! Content-addressed ingest
//!
//! Walks the input tree, classifies every regular file, hashes media files
//! and copies each distinct content once into the flat store as
//! `<hash><ext>`. Every source is recorded as a Pair, duplicates included,
//! and the full ordered Pair set is the stage's durable output (pair.json).

use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};
use walkdir::WalkDir;

use crate::classify::{FileClassifier, MediaKind};
use crate::config::Config;
use crate::error::Result;
use crate::model::Pair;
use crate::pipeline::RunContext;
use crate::retry::with_retry;
use crate::store;

/// Reset the store directory and ingest the input tree.
///
/// A single unreadable source is logged and skipped; it never aborts the
/// walk. Re-running on an unchanged input yields a byte-identical Pair set.
pub fn run_ingest(
    config: &Config,
    input_dir: &Path,
    output_dir: &Path,
    ctx: &mut RunContext,
) -> Result<Vec<Pair>> {
    let store_dir = output_dir.join("images");
    reset_store(&store_dir)?;

    let classifier = FileClassifier::from_config(config);
    let backoff = Duration::from_millis(config.run.retry_backoff_ms);

    let mut pairs: Vec<Pair> = Vec::new();
    let mut seen_hashes: std::collections::HashSet<String> = std::collections::HashSet::new();

    for entry in WalkDir::new(input_dir).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("walk error, skipping entry: {}", e);
                ctx.stats.ingest_errors += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let source = entry.path();
        let kind = classifier.classify(source);
        ctx.extensions.record(source, kind);
        ctx.stats.total_files += 1;

        if kind == MediaKind::Unknown {
            ctx.stats.skipped_unknown += 1;
            continue;
        }
        ctx.stats.media_files += 1;

        let hash = match with_retry(config.run.retry_attempts, backoff, || hash_file(source)) {
            Ok(hash) => hash,
            Err(e) => {
                warn!("unreadable source {}, skipped: {}", source.display(), e);
                ctx.stats.ingest_errors += 1;
                continue;
            }
        };

        let ext = source
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_lowercase()))
            .unwrap_or_default();
        let filename = format!("{}{}", hash, ext);
        let destination = store_dir.join(&filename);

        if seen_hashes.insert(hash.clone()) {
            if let Err(e) = with_retry(config.run.retry_attempts, backoff, || {
                fs::copy(source, &destination).map(|_| ())
            }) {
                warn!("copy failed for {}, skipped: {}", source.display(), e);
                ctx.stats.ingest_errors += 1;
                seen_hashes.remove(&hash);
                continue;
            }
            ctx.stats.copied += 1;
        } else {
            ctx.stats.duplicates += 1;
        }

        pairs.push(Pair {
            source: source.display().to_string(),
            destination: destination.display().to_string(),
            filename,
            hash,
        });
    }

    store::save_pairs(output_dir, &pairs)?;
    info!(
        "ingest: {} media files, {} stored, {} duplicate sources, {} skipped",
        ctx.stats.media_files, ctx.stats.copied, ctx.stats.duplicates, ctx.stats.ingest_errors
    );

    Ok(pairs)
}

/// md5 of the file bytes, streamed
fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut context = md5::Context::new();
    let mut buf = [0u8; 8192];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        context.consume(&buf[..n]);
    }

    Ok(format!("{:x}", context.compute()))
}

fn reset_store(store_dir: &Path) -> Result<()> {
    if store_dir.exists() {
        fs::remove_dir_all(store_dir)?;
    }
    fs::create_dir_all(store_dir)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn run(input: &Path, output: &Path) -> (Vec<Pair>, RunContext) {
        let config = Config::default();
        let mut ctx = RunContext::default();
        let pairs = run_ingest(&config, input, output, &mut ctx).unwrap();
        (pairs, ctx)
    }

    #[test]
    fn test_hash_is_content_only() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.jpg");
        let b = dir.path().join("b.jpg");
        fs::write(&a, b"same bytes").unwrap();
        fs::write(&b, b"same bytes").unwrap();

        assert_eq!(hash_file(&a).unwrap(), hash_file(&b).unwrap());
        assert_eq!(hash_file(&a).unwrap().len(), 32);
    }

    #[test]
    fn test_duplicates_share_one_stored_file() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        fs::create_dir(input.path().join("album")).unwrap();
        fs::write(input.path().join("one.jpg"), b"identical").unwrap();
        fs::write(input.path().join("album/two.jpg"), b"identical").unwrap();
        fs::write(input.path().join("other.jpg"), b"different").unwrap();

        let (pairs, ctx) = run(input.path(), output.path());

        assert_eq!(pairs.len(), 3, "every source gets a Pair");
        assert_eq!(ctx.stats.copied, 2);
        assert_eq!(ctx.stats.duplicates, 1);

        let stored: Vec<_> = fs::read_dir(output.path().join("images"))
            .unwrap()
            .collect();
        assert_eq!(stored.len(), 2, "one physical file per distinct hash");

        let dup: Vec<&Pair> = pairs.iter().filter(|p| p.hash == pairs[0].hash).collect();
        assert!(dup.iter().all(|p| p.destination == dup[0].destination));
    }

    #[test]
    fn test_unknown_extensions_skipped_but_reported() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        fs::write(input.path().join("photo.jpg"), b"img").unwrap();
        fs::write(input.path().join("notes.txt"), b"txt").unwrap();

        let (pairs, ctx) = run(input.path(), output.path());

        assert_eq!(pairs.len(), 1);
        assert_eq!(ctx.stats.skipped_unknown, 1);
        let unknown: Vec<&str> = ctx.extensions.unknown_extensions().collect();
        assert_eq!(unknown, vec![".txt"]);
    }

    #[test]
    fn test_ingest_is_idempotent() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        fs::write(input.path().join("a.jpg"), b"aaa").unwrap();
        fs::write(input.path().join("b.png"), b"bbb").unwrap();

        let (first, _) = run(input.path(), output.path());
        let (second, _) = run(input.path(), output.path());
        assert_eq!(first, second);
    }

    #[test]
    fn test_extension_lowercased_in_store() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        fs::write(input.path().join("SHOT.JPG"), b"data").unwrap();

        let (pairs, _) = run(input.path(), output.path());
        assert!(pairs[0].filename.ends_with(".jpg"));
    }
}
