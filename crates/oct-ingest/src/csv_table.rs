use std::collections::BTreeSet;
use std::path::Path;

use csv::ReaderBuilder;
use polars::prelude::{Column, DataFrame, IntoColumn, NamedFrom, Series};

use crate::error::{IngestError, Result};

/// A raw extract held as nullable strings, one `Vec` per row.
#[derive(Debug, Clone, Default)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl CsvTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Values of one column, in row order.
    pub fn column_values(&self, idx: usize) -> impl Iterator<Item = Option<&str>> + '_ {
        self.rows
            .iter()
            .map(move |row| row.get(idx).and_then(|v| v.as_deref()))
    }

    /// Builds a DataFrame with one String column per header.
    pub fn to_frame(&self) -> Result<DataFrame> {
        let mut columns: Vec<Column> = Vec::with_capacity(self.headers.len());
        for (idx, header) in self.headers.iter().enumerate() {
            let values: Vec<Option<&str>> = self.column_values(idx).collect();
            columns.push(Series::new(header.as_str().into(), values).into_column());
        }
        Ok(DataFrame::new(columns)?)
    }
}

fn normalize_header(raw: &str) -> String {
    raw.trim().trim_matches('\u{feff}').trim().to_string()
}

fn is_missing(value: &str, na_values: &[String]) -> bool {
    let trimmed = value.trim();
    na_values.iter().any(|na| na == trimmed)
}

/// Reads a headed CSV file.
///
/// Headers are trimmed and a leading byte-order mark is removed. A cell
/// whose trimmed text equals one of `na_values` becomes `None`; every other
/// cell is kept verbatim so whitespace handling stays with the normalizer.
/// Empty lines are skipped by the reader; a line of separators only is an
/// all-null record.
pub fn read_csv_table(path: &Path, na_values: &[String]) -> Result<CsvTable> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| IngestError::csv(path, e))?;
    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| IngestError::csv(path, e))?
        .iter()
        .map(normalize_header)
        .collect();
    let mut seen = BTreeSet::new();
    for header in &headers {
        if !seen.insert(header.as_str()) {
            return Err(IngestError::DuplicateHeader {
                path: path.to_path_buf(),
                column: header.clone(),
            });
        }
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| IngestError::csv(path, e))?;
        let row: Vec<Option<String>> = (0..headers.len())
            .map(|idx| {
                let value = record.get(idx).unwrap_or("");
                if is_missing(value, na_values) {
                    None
                } else {
                    Some(value.to_string())
                }
            })
            .collect();
        rows.push(row);
    }
    Ok(CsvTable { headers, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn na() -> Vec<String> {
        vec![String::new(), "NA".to_string()]
    }

    #[test]
    fn header_bom_is_stripped_and_na_becomes_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Crashes_2020.csv");
        fs::write(&path, "\u{feff}CASE_ID , WEATHER_1\n100, A \n101,NA\n,\n102,\n").unwrap();

        let table = read_csv_table(&path, &na()).unwrap();
        assert_eq!(table.headers, vec!["CASE_ID", "WEATHER_1"]);
        assert_eq!(table.len(), 4);
        assert_eq!(table.rows[0], vec![Some("100".to_string()), Some(" A ".to_string())]);
        assert_eq!(table.rows[1][1], None);
        assert_eq!(table.rows[2], vec![None, None]);
        assert_eq!(table.rows[3], vec![Some("102".to_string()), None]);
    }

    #[test]
    fn separator_only_lines_are_records_and_empty_lines_are_not() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Parties_2021.csv");
        fs::write(&path, "CASE_ID,PARTY_NUMBER\n1,1\n\n,\n,\n2,1\n").unwrap();

        let table = read_csv_table(&path, &na()).unwrap();
        assert_eq!(table.len(), 4);
        assert_eq!(table.rows[1], vec![None, None]);
        assert_eq!(table.rows[2], vec![None, None]);
    }

    #[test]
    fn duplicate_header_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dup.csv");
        fs::write(&path, "A,B,A\n1,2,3\n").unwrap();
        assert!(matches!(
            read_csv_table(&path, &na()),
            Err(IngestError::DuplicateHeader { column, .. }) if column == "A"
        ));
    }

    #[test]
    fn to_frame_keeps_nulls() {
        let table = CsvTable {
            headers: vec!["CASE_ID".to_string()],
            rows: vec![vec![Some("1".to_string())], vec![None]],
        };
        let df = table.to_frame().unwrap();
        assert_eq!(df.height(), 2);
        assert_eq!(df.column("CASE_ID").unwrap().null_count(), 1);
    }
}
