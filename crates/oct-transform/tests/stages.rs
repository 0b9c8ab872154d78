//! Normalization, temporal, severity and recode stages run in pipeline order
//! over a small three-year extract.

use oct_common::{i64_column, opt_string_column};
use oct_model::{
    Codebook, CodebookDocument, CodebookEntry, Entity, KeyRule, LabelType, PipelineConfig,
};
use oct_transform::{
    NormalizedTables, RawInput, TransformContext, TransformError, derive_severity,
    derive_temporal, normalize, recode_all,
};
use polars::prelude::*;

const ALL: [Entity; 3] = [Entity::Crashes, Entity::Parties, Entity::Victims];

fn codebook() -> Codebook {
    let mut role = CodebookEntry::new("victim_role")
        .with_raw("VICTIM_ROLE")
        .in_entities(&[Entity::Victims]);
    role.label_type = Some(LabelType::Nominal);
    for (code, label) in [("1", "Driver"), ("2", "Passenger"), ("3", "Pedestrian"), ("4", "Bicyclist")] {
        role.labels.insert(code.to_string(), label.to_string());
    }

    let weather = [("A", 1, "Clear"), ("B", 2, "Cloudy"), ("C", 3, "Raining")];
    let document = CodebookDocument {
        version: "test".to_string(),
        variables: vec![
            CodebookEntry::new("case_id").with_raw("CASE_ID").in_entities(&ALL),
            CodebookEntry::new("party_number")
                .with_raw("PARTY_NUMBER")
                .in_entities(&[Entity::Parties, Entity::Victims]),
            CodebookEntry::new("coll_date")
                .with_raw("COLLISION_DATE")
                .in_entities(&[Entity::Crashes]),
            CodebookEntry::new("coll_time")
                .with_raw("COLLISION_TIME")
                .in_entities(&[Entity::Crashes]),
            CodebookEntry::new("city").with_raw("CITY").in_entities(&[Entity::Crashes]),
            CodebookEntry::new("coll_severity")
                .with_raw("COLLISION_SEVERITY")
                .in_entities(&[Entity::Crashes])
                .with_codes(
                    LabelType::Ordinal,
                    &[
                        ("0", 0, "Property Damage Only"),
                        ("4", 1, "Minor Injury"),
                        ("3", 2, "Visible Injury"),
                        ("2", 3, "Severe Injury"),
                        ("1", 4, "Fatal"),
                    ],
                ),
            CodebookEntry::new("weather_1")
                .with_raw("WEATHER_1")
                .in_entities(&[Entity::Crashes])
                .with_codes(LabelType::Nominal, &weather),
            CodebookEntry::new("weather_2")
                .with_raw("WEATHER_2")
                .in_entities(&[Entity::Crashes])
                .with_codes(LabelType::Nominal, &weather),
            CodebookEntry::new("party_age")
                .with_raw("PARTY_AGE")
                .in_entities(&[Entity::Parties]),
            CodebookEntry::new("stwd_vehicle_type")
                .with_raw("STWD_VEHICLE_TYPE")
                .in_entities(&[Entity::Parties])
                .with_codes(
                    LabelType::Nominal,
                    &[("A", 1, "Passenger Car"), ("C", 3, "Motorcycle")],
                ),
            role,
            CodebookEntry::new("victim_age")
                .with_raw("VICTIM_AGE")
                .in_entities(&[Entity::Victims]),
            CodebookEntry::new("victim_degree_of_injury")
                .with_raw("VICTIM_DEGREE_OF_INJURY")
                .in_entities(&[Entity::Victims])
                .with_codes(
                    LabelType::Ordinal,
                    &[
                        ("0", 0, "No Injury"),
                        ("4", 1, "Complaint of Pain"),
                        ("3", 2, "Visible Injury"),
                        ("2", 3, "Severe Injury"),
                        ("1", 4, "Killed"),
                    ],
                ),
            CodebookEntry::new("victim_degree_of_injury_bin")
                .in_entities(&[Entity::Victims])
                .with_codes(
                    LabelType::Binary,
                    &[("1", 1, "Killed or Severe"), ("2", 1, "Killed or Severe"), ("0", 0, "Other")],
                ),
        ],
        drop: [(Entity::Crashes, vec!["JURIS".to_string()])].into_iter().collect(),
        passthrough: Default::default(),
    };
    Codebook::new(document).unwrap()
}

fn strings(name: &str, values: &[Option<&str>]) -> Column {
    let owned: Vec<Option<String>> = values.iter().map(|v| v.map(ToString::to_string)).collect();
    Series::new(name.into(), owned).into_column()
}

fn years(values: &[i64]) -> Column {
    Series::new("year".into(), values.to_vec()).into_column()
}

fn raw_input() -> RawInput {
    let crashes = DataFrame::new(vec![
        strings("CASE_ID", &[Some("1001"), Some("1002"), Some("1003")]),
        strings(
            "COLLISION_DATE",
            &[Some("2020-03-09"), Some("2020-07-04"), Some("2021-01-01")],
        ),
        strings("COLLISION_TIME", &[Some("0815"), Some("1730"), Some("2500")]),
        strings("CITY", &[Some(" IRVINE "), Some("santa ana"), Some("ANAHEIM")]),
        strings("COLLISION_SEVERITY", &[Some("1"), Some("0"), Some("2")]),
        strings("WEATHER_1", &[Some("A"), Some("Z"), Some("A")]),
        strings("WEATHER_2", &[Some("B"), Some("A"), None]),
        strings("JURIS", &[Some("3001"), Some("3002"), Some("3003")]),
        years(&[2020, 2020, 2021]),
    ])
    .unwrap();
    let parties = DataFrame::new(vec![
        strings("CASE_ID", &[Some("1001"), Some("1001"), Some("1002"), Some("1003")]),
        strings("PARTY_NUMBER", &[Some("1"), Some("2"), Some("1"), Some("1")]),
        strings("PARTY_AGE", &[Some("34"), Some("998"), Some("61"), Some("19")]),
        strings("STWD_VEHICLE_TYPE", &[Some("A"), Some("C"), Some("A"), Some("A")]),
        years(&[2020, 2020, 2020, 2021]),
    ])
    .unwrap();
    let victims = DataFrame::new(vec![
        strings("CASE_ID", &[Some("1001"), Some("1001"), Some("1001"), Some("1003")]),
        strings("PARTY_NUMBER", &[Some("1"), Some("2"), Some("1.0"), Some("1")]),
        strings("VICTIM_ROLE", &[Some("1"), Some("2"), Some("3"), Some("1")]),
        strings("VICTIM_AGE", &[Some("45"), Some("999"), Some("30"), Some("17")]),
        strings("VICTIM_DEGREE_OF_INJURY", &[Some("1"), Some("2"), Some("1"), Some("3")]),
        years(&[2020, 2020, 2020, 2021]),
    ])
    .unwrap();
    RawInput {
        crashes,
        parties,
        victims,
    }
}

fn run_stages(config: &PipelineConfig, codebook: &Codebook) -> (NormalizedTables, u64, u64) {
    let ctx = TransformContext::new(codebook, config);
    let mut tables = normalize(raw_input(), &ctx).unwrap();
    let temporal = derive_temporal(&mut tables.crashes, &config.temporal).unwrap();
    let severity = derive_severity(
        &mut tables.crashes,
        &mut tables.parties,
        &mut tables.victims,
        &ctx,
    )
    .unwrap();
    assert!(severity.unknown_by_year.is_empty());
    let recode = recode_all(
        &mut tables.crashes,
        &mut tables.parties,
        &mut tables.victims,
        &ctx,
    )
    .unwrap();
    (tables, temporal.total_invalid(), recode.total())
}

fn ints(df: &DataFrame, name: &str) -> Vec<Option<i64>> {
    i64_column(df, name).unwrap()
}

fn texts(df: &DataFrame, name: &str) -> Vec<Option<String>> {
    opt_string_column(df, name).unwrap()
}

#[test]
fn normalize_renames_and_assigns_ids() {
    let codebook = codebook();
    let config = PipelineConfig::default();
    let ctx = TransformContext::new(&codebook, &config);
    let tables = normalize(raw_input(), &ctx).unwrap();

    let crashes = &tables.crashes.data;
    assert!(crashes.column("JURIS").is_err());
    assert!(crashes.column("CASE_ID").is_err());
    assert_eq!(ints(crashes, "cid"), vec![Some(0), Some(1), Some(2)]);
    assert_eq!(
        texts(crashes, "city"),
        vec![
            Some("Irvine".to_string()),
            Some("Santa Ana".to_string()),
            Some("Anaheim".to_string())
        ]
    );

    let parties = &tables.parties.data;
    assert_eq!(ints(parties, "cid"), vec![Some(0), Some(0), Some(1), Some(2)]);
    assert_eq!(ints(parties, "pid"), vec![Some(0), Some(1), Some(2), Some(3)]);

    // "1.0" resolves to party 1 of case 1001.
    let victims = &tables.victims.data;
    assert_eq!(ints(victims, "pid"), vec![Some(0), Some(1), Some(0), Some(3)]);
    assert_eq!(ints(victims, "vid"), vec![Some(0), Some(1), Some(2), Some(3)]);

    let y2020 = tables.counts.get(&2020).unwrap();
    assert_eq!((y2020.crashes, y2020.parties, y2020.victims), (2, 3, 3));
}

#[test]
fn unknown_raw_column_is_rejected() {
    let codebook = codebook();
    let config = PipelineConfig::default();
    let ctx = TransformContext::new(&codebook, &config);
    let mut input = raw_input();
    input
        .crashes
        .with_column(Series::new("MYSTERY".into(), vec!["x"; 3]))
        .unwrap();
    let err = normalize(input, &ctx).unwrap_err();
    assert!(matches!(err, TransformError::UnknownRawColumn { ref column, .. } if column == "MYSTERY"));
}

#[test]
fn duplicate_case_ids_need_a_key_rule() {
    let codebook = codebook();
    let mut input = raw_input();
    // Reuse 1001 in 2021 for the crash and its children.
    let fix = |df: &mut DataFrame, ids: &[Option<&str>]| {
        df.with_column(Series::new(
            "CASE_ID".into(),
            ids.iter().map(|v| v.map(ToString::to_string)).collect::<Vec<_>>(),
        ))
        .unwrap();
    };
    fix(&mut input.crashes, &[Some("1001"), Some("1002"), Some("1001")]);
    fix(&mut input.parties, &[Some("1001"), Some("1001"), Some("1002"), Some("1001")]);
    fix(&mut input.victims, &[Some("1001"), Some("1001"), Some("1001"), Some("1001")]);

    let mut config = PipelineConfig::default();
    let ctx = TransformContext::new(&codebook, &config);
    let err = normalize(input.clone(), &ctx).unwrap_err();
    match err {
        TransformError::DuplicateCaseId { case_id, years } => {
            assert_eq!(case_id, "1001");
            assert_eq!(years, vec![2020, 2021]);
        }
        other => panic!("unexpected error: {other}"),
    }

    config.keys.rules.push(KeyRule {
        year: 2021,
        prefix: "21-".to_string(),
    });
    let ctx = TransformContext::new(&codebook, &config);
    let tables = normalize(input, &ctx).unwrap();
    assert_eq!(
        texts(&tables.crashes.data, "case_id")[2].as_deref(),
        Some("21-1001")
    );
    assert_eq!(ints(&tables.victims.data, "cid")[3], Some(2));
}

#[test]
fn orphan_victim_aborts_normalization() {
    let codebook = codebook();
    let config = PipelineConfig::default();
    let ctx = TransformContext::new(&codebook, &config);
    let mut input = raw_input();
    input
        .victims
        .with_column(Series::new(
            "PARTY_NUMBER".into(),
            vec![Some("1"), Some("2"), Some("7"), Some("1")],
        ))
        .unwrap();
    let err = normalize(input, &ctx).unwrap_err();
    assert!(matches!(err, TransformError::UnresolvedParty { row: 2, .. }));
}

#[test]
fn null_party_numbers_are_reported_by_row() {
    let codebook = codebook();
    let config = PipelineConfig::default();
    let ctx = TransformContext::new(&codebook, &config);
    let mut input = raw_input();
    input
        .parties
        .with_column(Series::new(
            "PARTY_NUMBER".into(),
            vec![Some("1"), None, Some("1"), None],
        ))
        .unwrap();
    let err = normalize(input, &ctx).unwrap_err();
    match err {
        TransformError::MissingPartyNumber { entity, case_id, row } => {
            assert_eq!(entity, Entity::Parties);
            assert_eq!(case_id, "1001");
            assert_eq!(row, 1);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn temporal_features_and_invalid_rows() {
    let codebook = codebook();
    let config = PipelineConfig::default();
    let (tables, invalid, _) = run_stages(&config, &codebook);
    let crashes = &tables.crashes.data;

    assert_eq!(invalid, 1);
    assert_eq!(texts(crashes, "coll_time")[0].as_deref(), Some("08:15:00"));
    assert_eq!(
        texts(crashes, "date_datetime")[0].as_deref(),
        Some("2020-03-09T08:15:00")
    );
    assert_eq!(texts(crashes, "dt_zone")[0].as_deref(), Some("PDT"));
    assert_eq!(ints(crashes, "dt_dst")[0], Some(1));
    assert_eq!(ints(crashes, "rush_hours_bin"), vec![Some(1), Some(0), None]);
    assert_eq!(texts(crashes, "dt_week_day")[1].as_deref(), Some("Saturday"));

    let valid = crashes.column("dt_valid").unwrap();
    assert_eq!(valid.get(2).unwrap(), AnyValue::Boolean(false));
    assert_eq!(ints(crashes, "dt_hour")[2], None);
    assert_eq!(
        texts(crashes, "rush_hours")[2].as_deref(),
        Some(config.temporal.rush_hours.unknown_label.as_str())
    );
}

#[test]
fn severity_counts_and_ranks() {
    let codebook = codebook();
    let config = PipelineConfig::default();
    let (tables, _, _) = run_stages(&config, &codebook);
    let crashes = &tables.crashes.data;

    assert_eq!(ints(crashes, "victim_count"), vec![Some(3), Some(0), Some(1)]);
    assert_eq!(ints(crashes, "party_count"), vec![Some(2), Some(1), Some(1)]);
    assert_eq!(ints(crashes, "number_killed"), vec![Some(2), Some(0), Some(0)]);
    assert_eq!(ints(crashes, "count_severe_inj"), vec![Some(1), Some(0), Some(0)]);
    assert_eq!(ints(crashes, "count_ped_killed")[0], Some(1));
    assert_eq!(ints(crashes, "count_mc_inj")[0], Some(1));
    assert_eq!(ints(crashes, "count_car_killed")[0], Some(1));
    assert_eq!(ints(crashes, "count_car_inj")[0], Some(0));
    assert_eq!(ints(crashes, "count_veh_fatal")[0], Some(1));
    assert_eq!(ints(crashes, "count_veh_inj")[0], Some(1));

    assert_eq!(
        texts(crashes, "coll_severity"),
        vec![
            Some("Fatal".to_string()),
            Some("Property Damage Only".to_string()),
            Some("Severe Injury".to_string())
        ]
    );
    assert_eq!(ints(crashes, "coll_severity_num"), vec![Some(4), Some(0), Some(3)]);
    assert_eq!(ints(crashes, "coll_severity_hs"), vec![Some(1), Some(5), Some(2)]);
    assert_eq!(ints(crashes, "coll_severity_bin"), vec![Some(1), Some(0), Some(1)]);
    assert_eq!(ints(crashes, "coll_severity_rank"), vec![Some(7), Some(0), Some(0)]);
    assert_eq!(ints(crashes, "ind_fatal"), vec![Some(1), Some(0), Some(0)]);
    assert_eq!(ints(crashes, "ind_severe"), vec![Some(0), Some(0), Some(1)]);
    assert_eq!(ints(crashes, "ind_multi"), vec![Some(1), Some(0), Some(0)]);
}

#[test]
fn recode_labels_and_counts_unknown_codes() {
    let codebook = codebook();
    let config = PipelineConfig::default();
    let (tables, _, unknown) = run_stages(&config, &codebook);
    let crashes = &tables.crashes.data;

    assert_eq!(unknown, 1);
    assert_eq!(
        texts(crashes, "weather_1"),
        vec![
            Some("Clear".to_string()),
            Some("Unknown".to_string()),
            Some("Clear".to_string())
        ]
    );
    assert_eq!(ints(crashes, "weather_comb"), vec![Some(12), None, Some(10)]);

    let parties = &tables.parties.data;
    assert_eq!(ints(parties, "party_age")[1], None);
    assert_eq!(texts(parties, "party_age_group")[2].as_deref(), Some("55-64"));
    assert_eq!(texts(parties, "stwd_vehicle_type")[1].as_deref(), Some("Motorcycle"));

    let victims = &tables.victims.data;
    assert_eq!(texts(victims, "victim_role")[2].as_deref(), Some("Pedestrian"));
    assert_eq!(ints(victims, "victim_age")[1], None);
    assert_eq!(texts(victims, "victim_age_group")[3].as_deref(), Some("0-17"));
    assert_eq!(
        ints(victims, "victim_degree_of_injury_bin"),
        vec![Some(1), Some(1), Some(1), Some(0)]
    );
    assert_eq!(texts(victims, "victim_degree_of_injury")[0].as_deref(), Some("Killed"));
}

#[test]
fn missing_severity_variable_is_an_error() {
    let mut document = codebook().document().clone();
    document.variables.retain(|v| v.name != "coll_severity");
    // The raw column is still in the extract, so keep it as a passthrough.
    document
        .passthrough
        .insert(Entity::Crashes, vec!["COLLISION_SEVERITY".to_string()]);
    let codebook = Codebook::new(document).unwrap();
    let config = PipelineConfig::default();
    let ctx = TransformContext::new(&codebook, &config);
    let mut tables = normalize(raw_input(), &ctx).unwrap();
    let err = derive_severity(
        &mut tables.crashes,
        &mut tables.parties,
        &mut tables.victims,
        &ctx,
    )
    .unwrap_err();
    assert!(matches!(err, TransformError::MissingVariable { ref variable } if variable == "coll_severity"));
}
