//! Declarative codebook: column renames, drop and passthrough lists, and
//! categorical code tables.
//!
//! The codebook is loaded once per run and handed to every stage by shared
//! reference. Nothing in it changes while the pipeline executes.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::entity::Entity;
use crate::error::{ModelError, Result};

/// How the labels of a categorical variable are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelType {
    Binary,
    Nominal,
    Ordinal,
}

/// Feature-class membership of a variable.
///
/// Accepts either booleans or the `0`/`1` integers used by older codebooks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureClasses {
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub crashes: bool,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub parties: bool,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub victims: bool,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub collisions: bool,
}

impl FeatureClasses {
    pub fn contains(&self, entity: Entity) -> bool {
        match entity {
            Entity::Crashes => self.crashes,
            Entity::Parties => self.parties,
            Entity::Victims => self.victims,
            Entity::Collisions => self.collisions,
        }
    }
}

fn deserialize_flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }
    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Int(i) => i != 0,
    })
}

/// One codebook variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodebookEntry {
    /// Name of the variable after normalization.
    pub name: String,
    /// Column name in the raw extract, when the variable is read from one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub var_raw: Option<String>,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub raw: bool,
    #[serde(default)]
    pub fc: FeatureClasses,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_type: Option<LabelType>,
    /// Raw code to numeric category.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub recode: BTreeMap<String, i64>,
    /// Numeric category (as a string key) to label.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub var_alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub var_desc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub var_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub var_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl CodebookEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            var_raw: None,
            raw: false,
            fc: FeatureClasses::default(),
            label_type: None,
            recode: BTreeMap::new(),
            labels: BTreeMap::new(),
            var_alias: None,
            var_desc: None,
            var_class: None,
            var_type: None,
            source: None,
            notes: None,
        }
    }

    #[must_use]
    pub fn with_raw(mut self, raw: impl Into<String>) -> Self {
        self.var_raw = Some(raw.into());
        self.raw = true;
        self
    }

    #[must_use]
    pub fn in_entities(mut self, entities: &[Entity]) -> Self {
        for entity in entities {
            match entity {
                Entity::Crashes => self.fc.crashes = true,
                Entity::Parties => self.fc.parties = true,
                Entity::Victims => self.fc.victims = true,
                Entity::Collisions => self.fc.collisions = true,
            }
        }
        self
    }

    #[must_use]
    pub fn with_codes(mut self, label_type: LabelType, codes: &[(&str, i64, &str)]) -> Self {
        self.label_type = Some(label_type);
        for (raw, code, label) in codes {
            self.recode.insert((*raw).to_string(), *code);
            self.labels.insert(code.to_string(), (*label).to_string());
        }
        self
    }

    pub fn is_labelled(&self) -> bool {
        !self.labels.is_empty()
    }
}

/// Read-only view of a variable's code table.
#[derive(Debug, Clone, Copy)]
pub struct CodeTable<'a> {
    entry: &'a CodebookEntry,
}

impl<'a> CodeTable<'a> {
    pub fn name(&self) -> &'a str {
        &self.entry.name
    }

    /// Numeric category for a raw code. Lookup trims the raw value first.
    pub fn code_for(&self, raw: &str) -> Option<i64> {
        self.entry.recode.get(raw.trim()).copied()
    }

    /// True when raw values are already the numeric category codes.
    pub fn is_identity(&self) -> bool {
        self.entry.recode.is_empty()
    }

    pub fn label_for(&self, code: i64) -> Option<&'a str> {
        self.entry.labels.get(&code.to_string()).map(String::as_str)
    }

    /// Largest category code that has a label, or that appears in the recode map.
    pub fn max_code(&self) -> Option<i64> {
        let from_labels = self.entry.labels.keys().filter_map(|k| k.parse::<i64>().ok());
        let from_recode = self.entry.recode.values().copied();
        from_labels.chain(from_recode).max()
    }

    pub fn label_type(&self) -> Option<LabelType> {
        self.entry.label_type
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodebookDocument {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub variables: Vec<CodebookEntry>,
    #[serde(default)]
    pub drop: BTreeMap<Entity, Vec<String>>,
    #[serde(default)]
    pub passthrough: BTreeMap<Entity, Vec<String>>,
}

/// Immutable codebook registry built from a [`CodebookDocument`].
#[derive(Debug, Clone)]
pub struct Codebook {
    document: CodebookDocument,
    index: BTreeMap<String, usize>,
}

impl Codebook {
    /// Builds the registry, rejecting duplicate variable names and raw
    /// columns claimed twice within one entity.
    pub fn new(document: CodebookDocument) -> Result<Self> {
        let mut index = BTreeMap::new();
        for (pos, entry) in document.variables.iter().enumerate() {
            if index.insert(entry.name.clone(), pos).is_some() {
                return Err(ModelError::DuplicateVariable(entry.name.clone()));
            }
        }
        for entity in Entity::RAW {
            let mut claimed: BTreeMap<&str, &str> = BTreeMap::new();
            for entry in &document.variables {
                let Some(raw) = entry.var_raw.as_deref() else {
                    continue;
                };
                if !entry.raw || !entry.fc.contains(entity) {
                    continue;
                }
                if let Some(first) = claimed.insert(raw, &entry.name) {
                    return Err(ModelError::DuplicateRawColumn {
                        entity: entity.to_string(),
                        raw: raw.to_string(),
                        first: first.to_string(),
                        second: entry.name.clone(),
                    });
                }
            }
        }
        Ok(Self { document, index })
    }

    pub fn version(&self) -> &str {
        &self.document.version
    }

    pub fn document(&self) -> &CodebookDocument {
        &self.document
    }

    pub fn variables(&self) -> &[CodebookEntry] {
        &self.document.variables
    }

    pub fn len(&self) -> usize {
        self.document.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.document.variables.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&CodebookEntry> {
        self.index.get(name).map(|pos| &self.document.variables[*pos])
    }

    pub fn table(&self, name: &str) -> Option<CodeTable<'_>> {
        self.get(name).map(|entry| CodeTable { entry })
    }

    /// `(raw, new)` rename pairs for the raw variables of an entity, in codebook order.
    pub fn selected(&self, entity: Entity) -> Vec<(&str, &str)> {
        self.document
            .variables
            .iter()
            .filter(|entry| entry.raw && entry.fc.contains(entity))
            .filter_map(|entry| {
                entry
                    .var_raw
                    .as_deref()
                    .map(|raw| (raw, entry.name.as_str()))
            })
            .collect()
    }

    pub fn drop_list(&self, entity: Entity) -> &[String] {
        self.document
            .drop
            .get(&entity)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn passthrough(&self, entity: Entity) -> &[String] {
        self.document
            .passthrough
            .get(&entity)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Variable names belonging to an entity's feature class, in codebook order.
    pub fn column_order(&self, entity: Entity) -> Vec<String> {
        self.document
            .variables
            .iter()
            .filter(|entry| entry.fc.contains(entity))
            .map(|entry| entry.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document() -> CodebookDocument {
        CodebookDocument {
            version: "2025.3".to_string(),
            variables: vec![
                CodebookEntry::new("case_id")
                    .with_raw("CASE_ID")
                    .in_entities(&[Entity::Crashes, Entity::Parties, Entity::Victims]),
                CodebookEntry::new("weather_1")
                    .with_raw("WEATHER_1")
                    .in_entities(&[Entity::Crashes])
                    .with_codes(LabelType::Nominal, &[("A", 1, "Clear"), ("B", 2, "Cloudy")]),
            ],
            drop: BTreeMap::from([(Entity::Crashes, vec!["PRIMARY_RD".to_string()])]),
            passthrough: BTreeMap::new(),
        }
    }

    #[test]
    fn selected_pairs_follow_codebook_order() {
        let cb = Codebook::new(document()).unwrap();
        assert_eq!(
            cb.selected(Entity::Crashes),
            vec![("CASE_ID", "case_id"), ("WEATHER_1", "weather_1")]
        );
        assert_eq!(cb.selected(Entity::Parties), vec![("CASE_ID", "case_id")]);
        assert_eq!(cb.drop_list(Entity::Crashes), ["PRIMARY_RD".to_string()]);
        assert!(cb.passthrough(Entity::Victims).is_empty());
    }

    #[test]
    fn code_table_lookup() {
        let cb = Codebook::new(document()).unwrap();
        let table = cb.table("weather_1").unwrap();
        assert_eq!(table.code_for(" B "), Some(2));
        assert_eq!(table.code_for("Z"), None);
        assert_eq!(table.label_for(1), Some("Clear"));
        assert_eq!(table.max_code(), Some(2));
    }

    #[test]
    fn duplicate_variable_rejected() {
        let mut doc = document();
        doc.variables.push(CodebookEntry::new("case_id"));
        assert!(matches!(
            Codebook::new(doc),
            Err(ModelError::DuplicateVariable(name)) if name == "case_id"
        ));
    }

    #[test]
    fn duplicate_raw_column_rejected() {
        let mut doc = document();
        doc.variables.push(
            CodebookEntry::new("weather_a")
                .with_raw("WEATHER_1")
                .in_entities(&[Entity::Crashes]),
        );
        assert!(matches!(
            Codebook::new(doc),
            Err(ModelError::DuplicateRawColumn { .. })
        ));
    }
}
