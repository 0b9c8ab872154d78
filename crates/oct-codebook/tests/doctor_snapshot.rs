//! Tests for the codebook doctor report.

use std::collections::BTreeMap;

use oct_codebook::CodebookReport;
use oct_model::{Codebook, CodebookDocument, CodebookEntry, Entity, LabelType};

#[test]
fn doctor_report_snapshot_is_stable() {
    let all = [
        Entity::Crashes,
        Entity::Parties,
        Entity::Victims,
        Entity::Collisions,
    ];
    let mut rank = CodebookEntry::new("coll_severity_rank")
        .in_entities(&[Entity::Crashes, Entity::Collisions]);
    rank.label_type = Some(LabelType::Ordinal);
    rank.labels.insert("0".to_string(), "No injury".to_string());

    let mut document = CodebookDocument {
        version: "test".to_string(),
        variables: vec![
            CodebookEntry::new("case_id").with_raw("CASE_ID").in_entities(&all),
            CodebookEntry::new("weather_1")
                .with_raw("WEATHER_1")
                .in_entities(&[Entity::Crashes, Entity::Collisions])
                .with_codes(LabelType::Nominal, &[("A", 1, "Clear"), ("B", 2, "Cloudy")]),
            rank,
        ],
        drop: BTreeMap::from([(Entity::Crashes, vec!["PRIMARY_RD".to_string()])]),
        passthrough: BTreeMap::new(),
    };
    document.variables[1]
        .labels
        .insert("3".to_string(), "Raining".to_string());
    let codebook = Codebook::new(document).unwrap();

    let report = CodebookReport::from_codebook(&codebook, "abc");
    insta::assert_json_snapshot!(report, @r###"
    {
      "schema": "octraffic.codebook-doctor",
      "schema_version": 1,
      "version": "test",
      "fingerprint": "abc",
      "variables": 3,
      "entities": {
        "crashes": {
          "raw": 2,
          "derived": 1,
          "labelled": 2,
          "ordinal": 1,
          "dropped": 1,
          "passthrough": 0
        },
        "parties": {
          "raw": 1,
          "derived": 0,
          "labelled": 0,
          "ordinal": 0,
          "dropped": 0,
          "passthrough": 0
        },
        "victims": {
          "raw": 1,
          "derived": 0,
          "labelled": 0,
          "ordinal": 0,
          "dropped": 0,
          "passthrough": 0
        },
        "collisions": {
          "raw": 2,
          "derived": 1,
          "labelled": 2,
          "ordinal": 1,
          "dropped": 0,
          "passthrough": 0
        }
      },
      "warnings": [
        "weather_1: label 3 is never produced by recode"
      ]
    }
    "###);
}
