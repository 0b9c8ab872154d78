use std::collections::BTreeMap;

use comfy_table::modifiers::{UTF8_ROUND_CORNERS, UTF8_SOLID_INNER_BORDERS};
use comfy_table::presets::{UTF8_FULL, UTF8_FULL_CONDENSED};
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};

use oct_codebook::CodebookReport;
use oct_ingest::RawTables;
use oct_model::{DataStatus, PipelineConfig, YearRecord};

use crate::pipeline::RunOutcome;

pub fn print_run_summary(outcome: &RunOutcome) {
    println!("Run: {}", outcome.run_id);
    println!("Years: {}-{}", outcome.years.0, outcome.years.1);
    println!("Output: {}", outcome.output_dir.display());
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Table"),
        header_cell("Rows in"),
        header_cell("Rows out"),
    ]);
    apply_summary_table_style(&mut table);
    align_column(&mut table, 1, CellAlignment::Right);
    align_column(&mut table, 2, CellAlignment::Right);
    for summary in &outcome.tables {
        table.add_row(vec![
            Cell::new(summary.name)
                .fg(Color::Blue)
                .add_attribute(Attribute::Bold),
            summary.rows_in.map_or_else(|| dim_cell("-"), Cell::new),
            Cell::new(summary.rows_out),
        ]);
    }
    println!("{table}");

    let mut quality = Table::new();
    quality.set_header(vec![header_cell("Check"), header_cell("Count")]);
    apply_summary_table_style(&mut quality);
    align_column(&mut quality, 1, CellAlignment::Right);
    for (label, count, color) in [
        ("Crashes excluded by the spatial filter", outcome.excluded, Color::Yellow),
        ("Unknown categorical codes", outcome.unknown_codes, Color::Yellow),
        ("Invalid collision datetimes", outcome.invalid_datetime, Color::Yellow),
        ("Cities filled from boundaries", outcome.boundary_filled, Color::Green),
        ("Crash cities without reference data", outcome.unmatched_cities, Color::Yellow),
    ] {
        quality.add_row(vec![Cell::new(label), count_cell(count, color)]);
    }
    println!("{quality}");
}

pub fn print_raw_summary(tables: &RawTables, config: &PipelineConfig) {
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Year"),
        header_cell("Crashes"),
        header_cell("Parties"),
        header_cell("Victims"),
        header_cell("Date start"),
        header_cell("Date end"),
        header_cell("Status"),
    ]);
    apply_summary_table_style(&mut table);
    for column in 1..=3 {
        align_column(&mut table, column, CellAlignment::Right);
    }
    for summary in &tables.years {
        let start = summary.date_start_str();
        let start_cell = if summary.range_inferred {
            dim_cell(start)
        } else {
            Cell::new(start)
        };
        table.add_row(vec![
            Cell::new(summary.year).add_attribute(Attribute::Bold),
            Cell::new(summary.counts.crashes),
            Cell::new(summary.counts.parties),
            Cell::new(summary.counts.victims),
            start_cell,
            Cell::new(summary.date_end_str()),
            status_cell(config.project.status_for(summary.year)),
        ]);
    }
    println!("{table}");
}

/// Prints the provenance snapshot, optionally limited to one year.
pub fn print_provenance(snapshot: &BTreeMap<i32, YearRecord>, year: Option<i32>) {
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Year"),
        header_cell("Status"),
        header_cell("Range"),
        header_cell("Reported"),
        header_cell("Normalized"),
        header_cell("Geocoded"),
        header_cell("Excluded"),
        header_cell("Unknown"),
        header_cell("Invalid dt"),
        header_cell("Updated"),
        header_cell("Exported"),
    ]);
    apply_table_style(&mut table);
    for column in 3..=8 {
        align_column(&mut table, column, CellAlignment::Right);
    }
    let records = snapshot
        .values()
        .filter(|record| year.is_none_or(|y| record.year == y));
    let mut rows = 0usize;
    for record in records {
        rows += 1;
        let range = match (&record.date_start, &record.date_end) {
            (Some(start), Some(end)) => Cell::new(format!("{start} to {end}")),
            _ => dim_cell("-"),
        };
        let unknown: u64 = record.unknown_codes.values().sum();
        table.add_row(vec![
            Cell::new(record.year).add_attribute(Attribute::Bold),
            status_cell(record.status),
            range,
            Cell::new(counts_text(&record.reported)),
            Cell::new(counts_text(&record.normalized)),
            Cell::new(counts_text(&record.geocoded)),
            count_cell(record.excluded.total(), Color::Yellow),
            count_cell(unknown, Color::Yellow),
            count_cell(record.invalid_datetime, Color::Yellow),
            optional_cell(record.date_updated.as_deref()),
            optional_cell(record.date_gp.as_deref()),
        ]);
    }
    if rows == 0 {
        match year {
            Some(y) => println!("No provenance recorded for {y}."),
            None => println!("No provenance recorded yet."),
        }
        return;
    }
    println!("{table}");
}

pub fn print_codebook_report(report: &CodebookReport) {
    println!("Codebook {} ({} variables)", report.version, report.variables);
    println!("Fingerprint: {}", report.fingerprint);
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Entity"),
        header_cell("Raw"),
        header_cell("Derived"),
        header_cell("Labelled"),
        header_cell("Ordinal"),
        header_cell("Dropped"),
        header_cell("Passthrough"),
    ]);
    apply_table_style(&mut table);
    for column in 1..=6 {
        align_column(&mut table, column, CellAlignment::Right);
    }
    for (entity, counts) in &report.entities {
        table.add_row(vec![
            Cell::new(entity.as_str()).fg(Color::Blue),
            Cell::new(counts.raw),
            Cell::new(counts.derived),
            Cell::new(counts.labelled),
            Cell::new(counts.ordinal),
            Cell::new(counts.dropped),
            Cell::new(counts.passthrough),
        ]);
    }
    println!("{table}");
    if !report.warnings.is_empty() {
        eprintln!("Warnings:");
        for warning in &report.warnings {
            eprintln!("- {warning}");
        }
    }
}

fn counts_text(counts: &oct_model::EntityCounts) -> String {
    format!("{} / {} / {}", counts.crashes, counts.parties, counts.victims)
}

fn status_cell(status: DataStatus) -> Cell {
    match status {
        DataStatus::Final => Cell::new("final").fg(Color::Green),
        DataStatus::Provisional => Cell::new("provisional").fg(Color::Yellow),
        DataStatus::Unknown => dim_cell("unknown"),
    }
}

fn optional_cell(value: Option<&str>) -> Cell {
    value.map_or_else(|| dim_cell("-"), Cell::new)
}

fn count_cell(count: u64, color: Color) -> Cell {
    if count > 0 {
        Cell::new(count).fg(color).add_attribute(Attribute::Bold)
    } else {
        dim_cell(count)
    }
}

fn header_cell(label: &str) -> Cell {
    Cell::new(label)
        .fg(Color::Cyan)
        .add_attribute(Attribute::Bold)
}

fn dim_cell<T: ToString>(value: T) -> Cell {
    Cell::new(value).fg(Color::DarkGrey)
}

fn align_column(table: &mut Table, index: usize, alignment: CellAlignment) {
    if let Some(column) = table.column_mut(index) {
        column.set_cell_alignment(alignment);
    }
}

fn apply_table_style(table: &mut Table) {
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(140);
}

fn apply_summary_table_style(table: &mut Table) {
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .apply_modifier(UTF8_SOLID_INNER_BORDERS)
        .set_content_arrangement(ContentArrangement::DynamicFullWidth)
        .set_width(120);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_counts_render_in_source_order() {
        let counts = oct_model::EntityCounts::new(10, 14, 9);
        assert_eq!(counts_text(&counts), "10 / 14 / 9");
    }
}
