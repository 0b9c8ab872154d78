//! Atomic table and feature writers.
//!
//! Every writer goes through [`write_atomic`]: the content is written to a
//! `.tmp` sibling, synced, and renamed over the target. A failure removes
//! the temporary file and leaves any previous output untouched.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use geojson::{Feature, FeatureCollection, Geometry, JsonObject, JsonValue, Value};
use oct_common::any_to_string;
use polars::prelude::{AnyValue, CsvWriter, DataFrame, SerWriter};
use tracing::{debug, info};

use crate::error::{Result, SpatialError};
use crate::filter::{PROJ_X, PROJ_Y};

pub const RAW_DIR: &str = "raw";
pub const TABLES_DIR: &str = "tables";
pub const FEATURES_DIR: &str = "features";

pub fn raw_table_path(output_dir: &Path, name: &str) -> PathBuf {
    output_dir.join(RAW_DIR).join(format!("{name}.csv"))
}

pub fn table_path(output_dir: &Path, name: &str) -> PathBuf {
    output_dir.join(TABLES_DIR).join(format!("{name}.csv"))
}

pub fn feature_path(output_dir: &Path, name: &str) -> PathBuf {
    output_dir.join(FEATURES_DIR).join(format!("{name}.geojson"))
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Writes `path` through a synced temporary sibling and an atomic rename.
pub fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| SpatialError::io("create directory", parent, e))?;
    }
    let temp = temp_path(path);
    let result = write_temp(&temp, write);
    if let Err(err) = result {
        let _ = fs::remove_file(&temp);
        return Err(err);
    }
    fs::rename(&temp, path).map_err(|e| {
        let _ = fs::remove_file(&temp);
        SpatialError::AtomicWriteFailed {
            temp_path: temp.clone(),
            target_path: path.to_path_buf(),
            source: e,
        }
    })?;
    debug!(path = %path.display(), "wrote file");
    Ok(())
}

fn write_temp<F>(temp: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let file = File::create(temp).map_err(|e| SpatialError::io("create", temp, e))?;
    let mut writer = BufWriter::new(file);
    write(&mut writer)?;
    writer.flush().map_err(|e| SpatialError::io("write", temp, e))?;
    let file = writer
        .into_inner()
        .map_err(|e| SpatialError::io("write", temp, e.into_error()))?;
    file.sync_all().map_err(|e| SpatialError::io("sync", temp, e))
}

/// Writes a table as CSV with a header row.
pub fn write_csv(df: &DataFrame, path: &Path) -> Result<()> {
    let mut data = df.clone();
    write_atomic(path, |writer| {
        CsvWriter::new(writer)
            .include_header(true)
            .finish(&mut data)
            .map_err(|source| SpatialError::Table {
                path: path.to_path_buf(),
                source,
            })
    })?;
    info!(path = %path.display(), rows = df.height(), "wrote table");
    Ok(())
}

fn any_to_json(value: AnyValue<'_>) -> JsonValue {
    match value {
        AnyValue::Null => JsonValue::Null,
        AnyValue::Boolean(b) => JsonValue::Bool(b),
        AnyValue::Int8(v) => JsonValue::from(v),
        AnyValue::Int16(v) => JsonValue::from(v),
        AnyValue::Int32(v) => JsonValue::from(v),
        AnyValue::Int64(v) => JsonValue::from(v),
        AnyValue::UInt8(v) => JsonValue::from(v),
        AnyValue::UInt16(v) => JsonValue::from(v),
        AnyValue::UInt32(v) => JsonValue::from(v),
        AnyValue::UInt64(v) => JsonValue::from(v),
        AnyValue::Float32(v) => serde_json::Number::from_f64(f64::from(v)).map_or(JsonValue::Null, JsonValue::Number),
        AnyValue::Float64(v) => serde_json::Number::from_f64(v).map_or(JsonValue::Null, JsonValue::Number),
        AnyValue::String(s) => JsonValue::String(s.to_string()),
        other => JsonValue::String(any_to_string(other)),
    }
}

/// Builds a point FeatureCollection from the projected columns of `df`.
///
/// Every other column becomes a feature property. The collection carries a
/// named CRS member for `srid`.
pub fn feature_collection(df: &DataFrame, srid: u32) -> Result<FeatureCollection> {
    for column in [PROJ_X, PROJ_Y] {
        if df.column(column).is_err() {
            return Err(SpatialError::MissingColumn {
                column: column.to_string(),
            });
        }
    }
    let xs = oct_common::f64_column(df, PROJ_X)?;
    let ys = oct_common::f64_column(df, PROJ_Y)?;
    let properties: Vec<_> = df
        .get_columns()
        .iter()
        .filter(|c| c.name().as_str() != PROJ_X && c.name().as_str() != PROJ_Y)
        .collect();

    let mut features = Vec::with_capacity(df.height());
    for row in 0..df.height() {
        let (Some(x), Some(y)) = (xs[row], ys[row]) else {
            continue;
        };
        let mut props = JsonObject::new();
        for column in &properties {
            let value = column.get(row).unwrap_or(AnyValue::Null);
            props.insert(column.name().to_string(), any_to_json(value));
        }
        features.push(Feature {
            bbox: None,
            geometry: Some(Geometry::new(Value::Point(vec![x, y]))),
            id: None,
            properties: Some(props),
            foreign_members: None,
        });
    }

    let mut crs_properties = JsonObject::new();
    crs_properties.insert(
        "name".to_string(),
        JsonValue::String(format!("urn:ogc:def:crs:EPSG::{srid}")),
    );
    let mut crs = JsonObject::new();
    crs.insert("type".to_string(), JsonValue::String("name".to_string()));
    crs.insert("properties".to_string(), JsonValue::Object(crs_properties));
    let mut foreign_members = JsonObject::new();
    foreign_members.insert("crs".to_string(), JsonValue::Object(crs));

    Ok(FeatureCollection {
        bbox: None,
        features,
        foreign_members: Some(foreign_members),
    })
}

/// Writes the projected points of `df` as a GeoJSON FeatureCollection.
pub fn write_features(df: &DataFrame, path: &Path, srid: u32) -> Result<()> {
    let collection = feature_collection(df, srid)?;
    let count = collection.features.len();
    write_atomic(path, |writer| {
        serde_json::to_writer(writer, &collection).map_err(|source| SpatialError::Json {
            path: path.to_path_buf(),
            source,
        })
    })?;
    info!(path = %path.display(), features = count, srid, "wrote features");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_path_is_a_sibling() {
        let temp = temp_path(Path::new("/out/tables/crashes.csv"));
        assert_eq!(temp, PathBuf::from("/out/tables/crashes.csv.tmp"));
    }

    #[test]
    fn failed_write_leaves_neither_temp_nor_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = table_path(dir.path(), "crashes");

        let err = write_atomic(&path, |writer| {
            writer.write_all(b"case_id\n1901\n").unwrap();
            Err(SpatialError::MissingColumn {
                column: "cid".to_string(),
            })
        })
        .unwrap_err();

        assert!(matches!(err, SpatialError::MissingColumn { .. }));
        assert!(!temp_path(&path).exists());
        assert!(!path.exists());
    }

    #[test]
    fn floats_that_are_not_finite_become_null() {
        assert_eq!(any_to_json(AnyValue::Float64(f64::NAN)), JsonValue::Null);
        assert_eq!(any_to_json(AnyValue::Int64(7)), JsonValue::from(7));
        assert_eq!(any_to_json(AnyValue::String("Irvine")), JsonValue::from("Irvine"));
    }
}
