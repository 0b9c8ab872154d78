//! Typed column accessors and row-level rebuild helpers.
//!
//! Stages never mutate a column in place: they read it into a `Vec`, compute
//! the new values and write a fresh `Series` back with `with_column`.

use polars::prelude::{
    AnyValue, BooleanChunked, Column, DataFrame, DataType, IntoColumn, NamedFrom,
    NewChunkedArray, PlSmallStr, PolarsResult, Series,
};

use crate::polars::{any_to_f64, any_to_i64, any_to_opt_string};

pub fn has_column(df: &DataFrame, name: &str) -> bool {
    df.column(name).is_ok()
}

/// Reads a column as trimmed optional strings. Blank cells become `None`.
pub fn opt_string_column(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<String>>> {
    let column = df.column(name)?;
    let mut values = Vec::with_capacity(df.height());
    for idx in 0..df.height() {
        values.push(any_to_opt_string(column.get(idx).unwrap_or(AnyValue::Null)));
    }
    Ok(values)
}

pub fn i64_column(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<i64>>> {
    let column = df.column(name)?;
    let mut values = Vec::with_capacity(df.height());
    for idx in 0..df.height() {
        values.push(any_to_i64(column.get(idx).unwrap_or(AnyValue::Null)));
    }
    Ok(values)
}

pub fn f64_column(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<f64>>> {
    let column = df.column(name)?;
    let mut values = Vec::with_capacity(df.height());
    for idx in 0..df.height() {
        values.push(any_to_f64(column.get(idx).unwrap_or(AnyValue::Null)));
    }
    Ok(values)
}

pub fn set_string_column(
    df: &mut DataFrame,
    name: &str,
    values: Vec<Option<String>>,
) -> PolarsResult<()> {
    df.with_column(Series::new(name.into(), values))?;
    Ok(())
}

pub fn set_i64_column(df: &mut DataFrame, name: &str, values: Vec<Option<i64>>) -> PolarsResult<()> {
    df.with_column(Series::new(name.into(), values))?;
    Ok(())
}

pub fn set_f64_column(df: &mut DataFrame, name: &str, values: Vec<Option<f64>>) -> PolarsResult<()> {
    df.with_column(Series::new(name.into(), values))?;
    Ok(())
}

pub fn set_bool_column(df: &mut DataFrame, name: &str, values: Vec<bool>) -> PolarsResult<()> {
    df.with_column(Series::new(name.into(), values))?;
    Ok(())
}

/// Keeps the rows whose mask entry is `true`.
pub fn filter_rows(df: &DataFrame, keep: &[bool]) -> PolarsResult<DataFrame> {
    let mask = BooleanChunked::from_slice("keep".into(), keep);
    df.filter(&mask)
}

/// Builds a new series by picking rows from `column`.
///
/// `None` positions produce nulls, which is how outer-join expansions fill
/// the side that has no matching row. The dtype is widened to one of
/// String, Int64, Float64 or Boolean.
pub fn gather_column(column: &Column, rows: &[Option<usize>]) -> PolarsResult<Series> {
    let name = column.name().clone();
    let pick = |row: Option<usize>| match row {
        Some(idx) => column.get(idx).unwrap_or(AnyValue::Null),
        None => AnyValue::Null,
    };
    let series = match column.dtype() {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => {
            let values: Vec<Option<i64>> = rows.iter().map(|r| any_to_i64(pick(*r))).collect();
            Series::new(name, values)
        }
        DataType::Float32 | DataType::Float64 => {
            let values: Vec<Option<f64>> = rows.iter().map(|r| any_to_f64(pick(*r))).collect();
            Series::new(name, values)
        }
        DataType::Boolean => {
            let values: Vec<Option<bool>> = rows
                .iter()
                .map(|r| match pick(*r) {
                    AnyValue::Boolean(b) => Some(b),
                    _ => None,
                })
                .collect();
            Series::new(name, values)
        }
        _ => {
            let values: Vec<Option<String>> =
                rows.iter().map(|r| any_to_opt_string(pick(*r))).collect();
            Series::new(name, values)
        }
    };
    Ok(series)
}

/// Gathers every column of `df` (except `skip`) at the given row positions.
pub fn gather_frame(df: &DataFrame, rows: &[Option<usize>], skip: &[&str]) -> PolarsResult<Vec<Column>> {
    let mut columns = Vec::with_capacity(df.width());
    for column in df.get_columns() {
        if skip.contains(&column.name().as_str()) {
            continue;
        }
        columns.push(gather_column(column, rows)?.into_column());
    }
    Ok(columns)
}

/// Reorders columns so that `preferred` names present in `df` come first, in
/// the given order, followed by every other column in its existing order.
pub fn reorder_columns(df: &DataFrame, preferred: &[String]) -> PolarsResult<DataFrame> {
    let existing: Vec<String> = df
        .get_column_names()
        .iter()
        .map(ToString::to_string)
        .collect();
    let mut order: Vec<PlSmallStr> = Vec::with_capacity(existing.len());
    for name in preferred {
        if existing.contains(name) && !order.iter().any(|o| o.as_str() == name) {
            order.push(PlSmallStr::from(name.as_str()));
        }
    }
    for name in &existing {
        if !order.iter().any(|o| o.as_str() == name) {
            order.push(PlSmallStr::from(name.as_str()));
        }
    }
    df.select(order)
}
