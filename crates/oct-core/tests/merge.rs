//! Tests for the entity merger over small derived tables.

use chrono::{TimeZone, Utc};
use geo::{MultiPolygon, polygon};
use oct_common::{i64_column, opt_string_column};
use oct_core::{
    COMBINED_NUM, CoreError, MergeInputs, MergedTables, RunContext, check_integrity, merge_entities,
};
use oct_model::{Codebook, CodebookDocument, CodebookEntry, Entity, LabelType, PipelineConfig};
use oct_spatial::BoundaryIndex;
use oct_transform::{EntityFrame, TransformContext, TransformError};
use polars::prelude::{Column, DataFrame, IntoColumn, NamedFrom, Series};

const ALL: [Entity; 4] = [
    Entity::Crashes,
    Entity::Parties,
    Entity::Victims,
    Entity::Collisions,
];

fn codebook(with_combined: bool) -> Codebook {
    let mut variables = vec![
        CodebookEntry::new("cid").in_entities(&ALL),
        CodebookEntry::new("pid").in_entities(&[Entity::Parties, Entity::Victims, Entity::Collisions]),
        CodebookEntry::new("vid").in_entities(&[Entity::Victims, Entity::Collisions]),
        CodebookEntry::new("case_id").with_raw("CASE_ID").in_entities(&ALL),
        CodebookEntry::new("city")
            .with_raw("CITY")
            .in_entities(&[Entity::Crashes, Entity::Collisions]),
    ];
    if with_combined {
        variables.push(
            CodebookEntry::new("combined_ind")
                .in_entities(&[Entity::Collisions])
                .with_codes(
                    LabelType::Nominal,
                    &[
                        ("111", 1, "Crash, Party, Victim"),
                        ("110", 2, "Crash, Party"),
                        ("100", 3, "Crash Only"),
                        ("11", 4, "Party, Victim"),
                        ("10", 5, "Party Only"),
                        ("1", 6, "Victim Only"),
                    ],
                ),
        );
    }
    Codebook::new(CodebookDocument {
        version: "test".to_string(),
        variables,
        drop: Default::default(),
        passthrough: Default::default(),
    })
    .expect("codebook")
}

fn strings(name: &str, values: &[Option<&str>]) -> Column {
    let owned: Vec<Option<String>> = values.iter().map(|v| v.map(ToString::to_string)).collect();
    Series::new(name.into(), owned).into_column()
}

fn ints(name: &str, values: &[i64]) -> Column {
    Series::new(name.into(), values.to_vec()).into_column()
}

fn crashes() -> EntityFrame {
    let data = DataFrame::new(vec![
        ints("cid", &[0, 1, 2]),
        strings("case_id", &[Some("1001"), Some("1002"), Some("1003")]),
        ints("year", &[2020, 2020, 2021]),
        strings("city", &[Some("Irvine"), None, Some("Tustin")]),
        strings("point_x", &[Some("-117.82"), Some("-117.87"), Some("-117.80")]),
        strings("point_y", &[Some("33.68"), Some("33.74"), Some("33.74")]),
        strings("coll_severity", &[Some("Fatal"), Some("Minor Injury"), None]),
    ])
    .expect("crashes");
    EntityFrame::new(Entity::Crashes, data)
}

fn parties() -> EntityFrame {
    let data = DataFrame::new(vec![
        ints("pid", &[0, 1, 2]),
        ints("cid", &[0, 0, 1]),
        strings("case_id", &[Some("1001"), Some("1001"), Some("1002")]),
        ints("year", &[2020, 2020, 2020]),
        strings("party_type", &[Some("Driver"), Some("Driver"), Some("Pedestrian")]),
    ])
    .expect("parties");
    EntityFrame::new(Entity::Parties, data)
}

fn victims(pids: &[i64]) -> EntityFrame {
    let data = DataFrame::new(vec![
        ints("vid", &[0, 1, 2]),
        ints("pid", pids),
        ints("cid", &[0, 0, 1]),
        strings("case_id", &[Some("1001"), Some("1001"), Some("1002")]),
        ints("year", &[2020, 2020, 2020]),
        ints("victim_killed_ind", &[1, 0, 0]),
        ints("victim_severe_ind", &[0, 1, 0]),
        ints("victim_visible_ind", &[0, 0, 0]),
        ints("victim_pain_ind", &[0, 0, 1]),
        ints("victim_ped_ind", &[0, 0, 1]),
        ints("victim_bic_ind", &[0, 0, 0]),
        ints("victim_mc_ind", &[0, 0, 0]),
    ])
    .expect("victims");
    EntityFrame::new(Entity::Victims, data)
}

fn cities() -> DataFrame {
    DataFrame::new(vec![
        strings("city", &[Some("IRVINE"), Some("Santa Ana")]),
        strings("city_pop", &[Some("307670"), Some("310227")]),
        strings("year", &[Some("1971"), Some("1886")]),
    ])
    .expect("cities")
}

fn roads() -> DataFrame {
    DataFrame::new(vec![
        strings("place_name", &[Some("Irvine"), Some("Irvine"), Some("Tustin"), None]),
        strings("road_cat", &[Some("Primary"), Some("Local"), Some("Local"), Some("Local")]),
        strings("road_length", &[Some("120.0"), Some("80.0"), Some("40.0"), Some("5.0")]),
    ])
    .expect("roads")
}

fn boundaries() -> BoundaryIndex {
    let santa_ana = MultiPolygon(vec![polygon![
        (x: -117.95, y: 33.70),
        (x: -117.85, y: 33.70),
        (x: -117.85, y: 33.78),
        (x: -117.95, y: 33.78),
        (x: -117.95, y: 33.70),
    ]]);
    BoundaryIndex::from_polygons(vec![("SANTA ANA".to_string(), santa_ana)])
}

fn run() -> RunContext {
    let started = Utc.with_ymd_and_hms(2026, 5, 1, 8, 30, 5).unwrap();
    RunContext::new(started, (2020, 2021), None)
}

fn merge(codebook: &Codebook, victim_pids: &[i64]) -> oct_core::Result<MergedTables> {
    let config = PipelineConfig::default();
    let ctx = TransformContext::new(codebook, &config);
    let cities = cities();
    let roads = roads();
    let index = boundaries();
    merge_entities(
        MergeInputs {
            crashes: crashes(),
            parties: parties(),
            victims: victims(victim_pids),
            cities: Some(&cities),
            roads: Some(&roads),
            boundaries: Some(&index),
        },
        &ctx,
        &run(),
    )
}

fn texts(df: &DataFrame, name: &str) -> Vec<Option<String>> {
    opt_string_column(df, name).expect(name)
}

fn owned(values: &[Option<&str>]) -> Vec<Option<String>> {
    values.iter().map(|v| v.map(ToString::to_string)).collect()
}

#[test]
fn collisions_keep_one_row_per_crash_with_reference_columns() {
    let merged = merge(&codebook(true), &[0, 0, 2]).expect("merge");
    let collisions = &merged.collisions.data;

    assert_eq!(collisions.height(), 3);
    assert_eq!(
        texts(collisions, "city"),
        owned(&[Some("Irvine"), Some("Santa Ana"), Some("Tustin")])
    );
    assert_eq!(
        texts(collisions, "city_pop"),
        owned(&[Some("307670"), Some("310227"), None])
    );
    assert_eq!(
        i64_column(collisions, "year").unwrap(),
        vec![Some(2020), Some(2020), Some(2021)]
    );
    assert_eq!(
        i64_column(collisions, "roads_primary").unwrap(),
        vec![Some(1), None, Some(0)]
    );
    assert_eq!(
        i64_column(collisions, "party_count").unwrap(),
        vec![Some(2), Some(1), Some(0)]
    );
    assert_eq!(
        i64_column(collisions, "number_killed").unwrap(),
        vec![Some(1), Some(0), Some(0)]
    );
    assert_eq!(merged.report.boundary_filled, 1);
    assert_eq!(merged.report.unmatched_cities, 1);
    assert_eq!(
        texts(collisions, "crash_tag")[0].as_deref(),
        Some("crashes:2020-2021:20260501T083005Z")
    );
    assert!(collisions.column("party_tag").is_err());
    assert_eq!(collisions.get_column_names()[0].as_str(), "cid");
}

#[test]
fn detail_expands_in_id_order_with_first_flags() {
    let merged = merge(&codebook(true), &[0, 0, 2]).expect("merge");
    let detail = &merged.detail.data;

    assert_eq!(detail.height(), 5);
    assert_eq!(merged.report.detail_rows, 5);
    assert_eq!(
        i64_column(detail, "pid").unwrap(),
        vec![Some(0), Some(0), Some(1), Some(2), None]
    );
    assert_eq!(
        i64_column(detail, "vid").unwrap(),
        vec![Some(0), Some(1), None, Some(2), None]
    );
    assert_eq!(
        i64_column(detail, COMBINED_NUM).unwrap(),
        vec![Some(1), Some(6), Some(5), Some(1), Some(3)]
    );
    assert_eq!(
        texts(detail, "combined_ind"),
        owned(&[
            Some("Crash, Party, Victim"),
            Some("Victim Only"),
            Some("Party Only"),
            Some("Crash, Party, Victim"),
            Some("Crash Only"),
        ])
    );
    assert_eq!(
        texts(detail, "party_type")[3].as_deref(),
        Some("Pedestrian")
    );
    for tag in ["crash_tag", "party_tag", "victim_tag"] {
        assert!(detail.column(tag).is_ok(), "{tag}");
    }
}

#[test]
fn crash_columns_propagate_to_children() {
    let merged = merge(&codebook(true), &[0, 0, 2]).expect("merge");

    let parties = &merged.parties.data;
    assert_eq!(
        texts(parties, "city"),
        owned(&[Some("Irvine"), Some("Irvine"), Some("Santa Ana")])
    );
    assert_eq!(
        texts(parties, "coll_severity"),
        owned(&[Some("Fatal"), Some("Fatal"), Some("Minor Injury")])
    );
    assert!(parties.column("party_tag").is_ok());
    assert!(parties.column("victim_tag").is_err());

    let victims = &merged.victims.data;
    assert_eq!(texts(victims, "point_x")[2].as_deref(), Some("-117.87"));
    assert_eq!(
        texts(victims, "victim_tag")[0].as_deref(),
        Some("victims:2020-2021:20260501T083005Z")
    );
}

#[test]
fn victims_of_another_crash_fail_integrity() {
    let err = check_integrity(&crashes(), &parties(), &victims(&[0, 2, 2])).unwrap_err();
    assert!(matches!(
        err,
        CoreError::Integrity {
            entity: Entity::Victims,
            ..
        }
    ));
}

#[test]
fn combined_indicator_table_is_required() {
    let err = merge(&codebook(false), &[0, 0, 2]).unwrap_err();
    assert!(matches!(
        err,
        CoreError::Transform(TransformError::MissingVariable { ref variable }) if variable == "combined_ind"
    ));
}

#[test]
fn duplicate_cities_are_rejected() {
    let codebook = codebook(true);
    let config = PipelineConfig::default();
    let ctx = TransformContext::new(&codebook, &config);
    let cities = DataFrame::new(vec![strings("city", &[Some("Irvine"), Some("IRVINE")])]).unwrap();
    let err = merge_entities(
        MergeInputs {
            crashes: crashes(),
            parties: parties(),
            victims: victims(&[0, 0, 2]),
            cities: Some(&cities),
            roads: None,
            boundaries: None,
        },
        &ctx,
        &run(),
    )
    .unwrap_err();
    assert!(matches!(err, CoreError::DuplicateCity { ref city } if city == "Irvine"));
}
