//! Tests for codebook and configuration loading.

use std::fs;
use std::path::Path;

use oct_codebook::{CodebookError, load_codebook, load_config, parse_config};
use oct_model::Entity;

const CODEBOOK: &str = r#"{
    "version": "2025.3",
    "variables": [
        {"name": "case_id", "var_raw": "CASE_ID", "raw": true,
         "fc": {"crashes": true, "parties": true, "victims": true, "collisions": true}},
        {"name": "coll_severity", "var_raw": "COLLISION_SEVERITY", "raw": true,
         "fc": {"crashes": true, "collisions": true}, "label_type": "ordinal",
         "recode": {"0": 0, "1": 4}, "labels": {"0": "No Injury", "4": "Fatal"}}
    ],
    "drop": {"crashes": ["PRIMARY_RD"]}
}"#;

fn write(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn loads_codebook_with_fingerprint() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "cb.json", CODEBOOK);
    let loaded = load_codebook(&path).expect("load codebook");
    assert_eq!(loaded.codebook.version(), "2025.3");
    assert_eq!(loaded.fingerprint.len(), 64);
    assert_eq!(loaded.codebook.selected(Entity::Crashes).len(), 2);

    let again = load_codebook(&path).unwrap();
    assert_eq!(loaded.fingerprint, again.fingerprint);
}

#[test]
fn ordinal_code_without_label_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let broken = CODEBOOK.replace(r#""4": "Fatal""#, r#""3": "Fatal""#);
    let path = write(dir.path(), "cb.json", &broken);
    let err = load_codebook(&path).unwrap_err();
    assert!(
        matches!(&err, CodebookError::InvalidVariable { variable, .. } if variable == "coll_severity"),
        "unexpected error: {err}"
    );
}

#[test]
fn raw_column_selected_twice_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let twice = CODEBOOK.replace(
        r#"{"name": "coll_severity", "var_raw": "COLLISION_SEVERITY""#,
        r#"{"name": "case_no", "var_raw": "CASE_ID", "raw": true, "fc": {"crashes": true}},
        {"name": "coll_severity", "var_raw": "COLLISION_SEVERITY""#,
    );
    let path = write(dir.path(), "cb.json", &twice);
    let err = load_codebook(&path).unwrap_err();
    assert!(
        matches!(&err, CodebookError::InvalidVariable { variable, message, .. }
            if variable == "case_no" && message.contains("case_id")),
        "unexpected error: {err}"
    );
}

#[test]
fn missing_codebook_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_codebook(&dir.path().join("missing.json")).unwrap_err();
    assert!(matches!(err, CodebookError::Io { .. }));
}

#[test]
fn config_paths_resolve_against_file_directory() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(
        dir.path(),
        "octraffic.toml",
        "[project]\nyears = [2020]\n\n[paths]\nraw_dir = \"raw\"\ncities = \"gis/cities.csv\"\n",
    );
    let config = load_config(&path).expect("load config");
    assert_eq!(config.paths.raw_dir, dir.path().join("raw"));
    assert_eq!(config.paths.cities, Some(dir.path().join("gis/cities.csv")));
    assert_eq!(config.project.years, vec![2020]);
}

#[test]
fn invalid_band_is_rejected() {
    let text = "[recode.party_age_group]\nedges = [0.0, 18.0]\nlabels = [\"young\"]\n";
    let err = parse_config(text, Path::new("inline.toml")).unwrap_err();
    assert!(matches!(err, CodebookError::Model { .. }));
}

#[test]
fn malformed_toml_is_reported() {
    let err = parse_config("[project\nyears = ", Path::new("inline.toml")).unwrap_err();
    assert!(matches!(err, CodebookError::Toml { .. }));
}
