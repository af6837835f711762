//! End-to-end tests for the restoration pipeline

use std::fs;
use std::io::Cursor;
use std::path::Path;

use tempfile::TempDir;

use photo_restore::pipeline::{run_all, run_stage, Stage};
use photo_restore::{store, Config, Provenance};

/// Build a minimal JPEG carrying the given EXIF fields
fn jpeg_with_exif(fields: &[exif::Field]) -> Vec<u8> {
    use exif::experimental::Writer;

    let mut writer = Writer::new();
    for field in fields {
        writer.push_field(field);
    }
    let mut cursor = Cursor::new(Vec::new());
    writer.write(&mut cursor, false).unwrap();
    let payload = cursor.into_inner();

    let mut jpeg = vec![0xFF, 0xD8];
    jpeg.extend([0xFF, 0xE1]);
    jpeg.extend(((payload.len() + 8) as u16).to_be_bytes());
    jpeg.extend(b"Exif\0\0");
    jpeg.extend(&payload);
    jpeg.extend([0xFF, 0xD9]);
    jpeg
}

fn ascii_field(tag: exif::Tag, value: &str) -> exif::Field {
    exif::Field {
        tag,
        ifd_num: exif::In::PRIMARY,
        value: exif::Value::Ascii(vec![value.as_bytes().to_vec()]),
    }
}

fn rational_field(tag: exif::Tag, values: &[(u32, u32)]) -> exif::Field {
    exif::Field {
        tag,
        ifd_num: exif::In::PRIMARY,
        value: exif::Value::Rational(
            values
                .iter()
                .map(|&(num, denom)| exif::Rational { num, denom })
                .collect(),
        ),
    }
}

/// JPEG with GPS coordinates and no capture datetime
fn jpeg_with_gps_only(lat_dms: [(u32, u32); 3], lon_dms: [(u32, u32); 3]) -> Vec<u8> {
    jpeg_with_exif(&[
        rational_field(exif::Tag::GPSLatitude, &lat_dms),
        ascii_field(exif::Tag::GPSLatitudeRef, "N"),
        rational_field(exif::Tag::GPSLongitude, &lon_dms),
        ascii_field(exif::Tag::GPSLongitudeRef, "E"),
    ])
}

fn jpeg_with_datetime(dt: &str) -> Vec<u8> {
    jpeg_with_exif(&[ascii_field(exif::Tag::DateTimeOriginal, dt)])
}

fn sidecar_with_timestamp(timestamp: &str) -> String {
    format!(
        r#"{{"photoTakenTime": {{"timestamp": "{}"}}, "geoData": {{"latitude": 0.0, "longitude": 0.0, "altitude": 0.0}}}}"#,
        timestamp
    )
}

#[test]
fn test_duplicate_content_merges_both_sources() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();

    // Identical bytes in two places: GPS embedded, no datetime
    let jpeg = jpeg_with_gps_only(
        [(35, 1), (39, 1), (30, 1)],
        [(139, 1), (44, 1), (43, 1)],
    );
    let album = input.path().join("album");
    fs::create_dir(&album).unwrap();
    fs::write(input.path().join("shot.jpg"), &jpeg).unwrap();
    fs::write(album.join("copy.jpg"), &jpeg).unwrap();

    // Only the album copy kept its sidecar, and it only knows the timestamp
    fs::write(
        album.join("copy.jpg.supplemental-metadata.json"),
        sidecar_with_timestamp("1672574400"),
    )
    .unwrap();

    let ctx = run_all(&Config::default(), input.path(), output.path()).unwrap();

    // Dedup invariant: one stored file, two Pairs
    let pairs = store::load_pairs(output.path()).unwrap();
    assert_eq!(pairs.len(), 2);
    assert_eq!(pairs[0].hash, pairs[1].hash);
    let stored: Vec<_> = fs::read_dir(output.path().join("images")).unwrap().collect();
    assert_eq!(stored.len(), 1);

    // Sidecar found through the album source
    let locations = store::load_sidecar_locations(output.path()).unwrap();
    let location = locations.values().next().unwrap();
    assert!(location.found);
    assert!(location.file_exists);
    assert!(location.original_source.ends_with("copy.jpg"));

    // One fully resolved record holding both fields, from both sources
    assert_eq!(ctx.stats.fully_resolved, 1);
    assert_eq!(ctx.stats.conflicts, 0);
    assert_eq!(ctx.stats.gaps, 0);

    let metadata = store::load_metadata(output.path()).unwrap();
    let meta = metadata.values().next().unwrap();
    assert!(meta.has_datetime);
    assert!(meta.has_location);
    assert_eq!(meta.datetime.json_datetime.as_deref(), Some("2023:01:01 12:00:00"));
    assert!(meta.location.exif_gps);
    assert!((meta.location.latitude.unwrap() - 35.6583).abs() < 0.001);
    assert!(meta.metadata_sources.contains(&Provenance::Embedded));
    assert!(meta.metadata_sources.contains(&Provenance::Sidecar));
}

#[test]
fn test_conflicting_datetime_is_reported_not_resolved() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();

    fs::write(
        input.path().join("shot.jpg"),
        jpeg_with_datetime("2023:01:01 12:00:00"),
    )
    .unwrap();
    // Sidecar disagrees by five minutes: 1672574700 = 2023-01-01T12:05:00Z
    fs::write(
        input.path().join("shot.jpg.supplemental-metadata.json"),
        sidecar_with_timestamp("1672574700"),
    )
    .unwrap();

    let ctx = run_all(&Config::default(), input.path(), output.path()).unwrap();

    assert_eq!(ctx.stats.conflicts, 1);
    assert_eq!(ctx.stats.fully_resolved, 0);
    assert_eq!(ctx.stats.partial, 1);

    let report = fs::read_to_string(output.path().join(store::REPORT_FILE)).unwrap();
    assert!(report.contains("Conflicts (1)"));
    assert!(report.contains("12:05:00"), "sidecar candidate listed");
    assert!(report.contains("datetime"));
}

#[test]
fn test_gap_reported_when_nothing_knows_location() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();

    fs::write(
        input.path().join("shot.jpg"),
        jpeg_with_datetime("2023:01:01 12:00:00"),
    )
    .unwrap();

    let ctx = run_all(&Config::default(), input.path(), output.path()).unwrap();

    assert_eq!(ctx.stats.gaps, 1);
    let metadata = store::load_metadata(output.path()).unwrap();
    let meta = metadata.values().next().unwrap();
    assert!(!meta.has_location);

    let report = fs::read_to_string(output.path().join(store::REPORT_FILE)).unwrap();
    assert!(report.contains("missing: location"));
}

#[test]
fn test_numeric_suffix_sidecar_matched_end_to_end() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();

    fs::write(
        input.path().join("IMG_0001(1).jpg"),
        jpeg_with_datetime("2023:06:01 08:00:00"),
    )
    .unwrap();
    fs::write(
        input.path().join("IMG_0001.jpg.supplemental-metadata.json"),
        // 1685606400 = 2023-06-01T08:00:00Z, agreeing with the embedded tag
        sidecar_with_timestamp("1685606400"),
    )
    .unwrap();

    run_all(&Config::default(), input.path(), output.path()).unwrap();

    let locations = store::load_sidecar_locations(output.path()).unwrap();
    let location = locations.values().next().unwrap();
    assert!(location.found);
    assert_eq!(location.metadata_type.as_deref(), Some("numeric_suffix"));
    assert!(location
        .metadata_file
        .as_deref()
        .unwrap()
        .ends_with("IMG_0001.jpg.supplemental-metadata.json"));
}

#[test]
fn test_repeat_runs_yield_identical_outputs() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();

    fs::write(input.path().join("a.jpg"), jpeg_with_datetime("2021:03:03 10:00:00")).unwrap();
    fs::write(input.path().join("b.jpg"), b"not really a jpeg").unwrap();

    run_all(&Config::default(), input.path(), output.path()).unwrap();
    let pairs_first = fs::read_to_string(output.path().join(store::PAIR_FILE)).unwrap();
    let report_first = fs::read_to_string(output.path().join(store::REPORT_FILE)).unwrap();

    run_all(&Config::default(), input.path(), output.path()).unwrap();
    let pairs_second = fs::read_to_string(output.path().join(store::PAIR_FILE)).unwrap();
    let report_second = fs::read_to_string(output.path().join(store::REPORT_FILE)).unwrap();

    assert_eq!(pairs_first, pairs_second);
    assert_eq!(report_first, report_second);
}

#[test]
fn test_stages_rerun_independently_from_record_sets() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();

    fs::write(
        input.path().join("shot.jpg"),
        jpeg_with_datetime("2022:09:10 17:45:00"),
    )
    .unwrap();
    fs::write(
        input.path().join("shot.jpg.supplemental-metadata.json"),
        // 1662831900 = 2022-09-10T17:45:00Z
        sidecar_with_timestamp("1662831900"),
    )
    .unwrap();

    let config = Config::default();
    run_stage(&config, Stage::Ingest, input.path(), output.path()).unwrap();
    assert!(output.path().join(store::PAIR_FILE).exists());

    run_stage(&config, Stage::Extract, input.path(), output.path()).unwrap();
    assert!(output.path().join(store::METADATA_FILE).exists());

    run_stage(&config, Stage::Locate, input.path(), output.path()).unwrap();
    assert!(output.path().join(store::SIDECAR_LOCATION_FILE).exists());

    let ctx = run_stage(&config, Stage::Merge, input.path(), output.path()).unwrap();
    assert_eq!(ctx.stats.conflicts, 0);
    assert!(output.path().join(store::REPORT_FILE).exists());

    let metadata = store::load_metadata(output.path()).unwrap();
    let meta = metadata.values().next().unwrap();
    assert!(meta.has_datetime);
    assert_eq!(
        meta.datetime.json_datetime.as_deref(),
        Some("2022:09:10 17:45:00")
    );
}

#[test]
fn test_unparseable_sidecar_distinct_from_missing() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();

    fs::write(input.path().join("broken.jpg"), jpeg_with_datetime("2020:01:01 00:00:00")).unwrap();
    fs::write(
        input.path().join("broken.jpg.supplemental-metadata.json"),
        "{ this is not json",
    )
    .unwrap();

    run_all(&Config::default(), input.path(), output.path()).unwrap();

    let metadata = store::load_metadata(output.path()).unwrap();
    let meta = metadata.values().next().unwrap();
    assert!(meta.unreadable_sources.contains(&Provenance::Sidecar));

    let report = fs::read_to_string(output.path().join(store::REPORT_FILE)).unwrap();
    assert!(report.contains("unparseable"));
}
