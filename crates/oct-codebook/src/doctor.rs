#![deny(unsafe_code)]

use std::collections::BTreeMap;

use oct_model::{Codebook, Entity, LabelType};

/// Summary of a codebook, printed by `octraffic codebook`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CodebookReport {
    pub schema: String,
    pub schema_version: u32,
    pub version: String,
    pub fingerprint: String,
    pub variables: usize,
    pub entities: BTreeMap<Entity, EntityCounts>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct EntityCounts {
    pub raw: usize,
    pub derived: usize,
    pub labelled: usize,
    pub ordinal: usize,
    pub dropped: usize,
    pub passthrough: usize,
}

impl CodebookReport {
    pub fn from_codebook(codebook: &Codebook, fingerprint: &str) -> Self {
        let mut entities = BTreeMap::new();
        for entity in [
            Entity::Crashes,
            Entity::Parties,
            Entity::Victims,
            Entity::Collisions,
        ] {
            let mut counts = EntityCounts::default();
            for entry in codebook.variables().iter().filter(|e| e.fc.contains(entity)) {
                if entry.raw {
                    counts.raw += 1;
                } else {
                    counts.derived += 1;
                }
                if entry.is_labelled() {
                    counts.labelled += 1;
                }
                if entry.label_type == Some(LabelType::Ordinal) {
                    counts.ordinal += 1;
                }
            }
            counts.dropped = codebook.drop_list(entity).len();
            counts.passthrough = codebook.passthrough(entity).len();
            entities.insert(entity, counts);
        }

        let mut warnings = Vec::new();
        for entry in codebook.variables() {
            if !entry.recode.is_empty() && entry.labels.is_empty() {
                warnings.push(format!("{}: recode table has no labels", entry.name));
            }
            for key in entry.labels.keys() {
                let used = entry.recode.values().any(|code| code.to_string() == *key);
                if !entry.recode.is_empty() && !used {
                    warnings.push(format!("{}: label {key} is never produced by recode", entry.name));
                }
            }
        }

        Self {
            schema: "octraffic.codebook-doctor".to_string(),
            schema_version: 1,
            version: codebook.version().to_string(),
            fingerprint: fingerprint.to_string(),
            variables: codebook.len(),
            entities,
            warnings,
        }
    }
}
