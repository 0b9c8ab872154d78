use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use oct_model::{Codebook, CodebookDocument, Entity, LabelType, PipelineConfig};
use tracing::debug;

use crate::error::{CodebookError, Result};
use crate::hash::sha256_hex;

/// A codebook together with where it came from.
#[derive(Debug, Clone)]
pub struct LoadedCodebook {
    pub codebook: Codebook,
    /// SHA-256 of the file bytes.
    pub fingerprint: String,
    pub path: PathBuf,
}

/// Loads and validates the codebook JSON.
pub fn load_codebook(path: &Path) -> Result<LoadedCodebook> {
    let bytes = fs::read(path).map_err(|e| CodebookError::io(path, e))?;
    let document: CodebookDocument =
        serde_json::from_slice(&bytes).map_err(|source| CodebookError::Json {
            path: path.to_path_buf(),
            source,
        })?;
    let codebook = Codebook::new(document).map_err(|e| CodebookError::model(path, e))?;
    validate_codebook(&codebook, path)?;
    let fingerprint = sha256_hex(&bytes);
    debug!(
        path = %path.display(),
        version = codebook.version(),
        variables = codebook.len(),
        fingerprint = %fingerprint,
        "loaded codebook"
    );
    Ok(LoadedCodebook {
        codebook,
        fingerprint,
        path: path.to_path_buf(),
    })
}

/// Semantic checks that the serde layer cannot express.
///
/// Ordinal and binary variables must label every category they recode into,
/// and label keys must be integer category codes. A raw column may feed at
/// most one variable per entity.
pub fn validate_codebook(codebook: &Codebook, path: &Path) -> Result<()> {
    let invalid = |variable: &str, message: String| CodebookError::InvalidVariable {
        path: path.to_path_buf(),
        variable: variable.to_string(),
        message,
    };
    for entry in codebook.variables() {
        if entry.raw && entry.var_raw.is_none() {
            return Err(invalid(&entry.name, "raw variable has no var_raw".to_string()));
        }
        if let Some(key) = entry.labels.keys().find(|k| k.parse::<i64>().is_err()) {
            return Err(invalid(
                &entry.name,
                format!("label key {key:?} is not an integer category code"),
            ));
        }
        if matches!(entry.label_type, Some(LabelType::Ordinal | LabelType::Binary)) {
            for (raw, code) in &entry.recode {
                if !entry.labels.contains_key(&code.to_string()) {
                    return Err(invalid(
                        &entry.name,
                        format!("code {raw:?} recodes to {code}, which has no label"),
                    ));
                }
            }
        }
    }
    for entity in Entity::RAW {
        let mut owners: BTreeMap<&str, &str> = BTreeMap::new();
        for (raw, name) in codebook.selected(entity) {
            if let Some(first) = owners.insert(raw, name) {
                return Err(invalid(
                    name,
                    format!("raw column {raw:?} is already selected by {first} in {entity}"),
                ));
            }
        }
    }
    Ok(())
}

/// Loads the pipeline configuration from TOML.
///
/// Relative paths inside the file resolve against the file's directory.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    let text = fs::read_to_string(path).map_err(|e| CodebookError::io(path, e))?;
    let base = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let config = parse_config(&text, path)?.resolved(base);
    debug!(
        path = %path.display(),
        years = config.project.years.len(),
        "loaded pipeline configuration"
    );
    Ok(config)
}

/// Parses and validates configuration text. `origin` is used for diagnostics only.
pub fn parse_config(text: &str, origin: &Path) -> Result<PipelineConfig> {
    let config: PipelineConfig = toml::from_str(text).map_err(|source| CodebookError::Toml {
        path: origin.to_path_buf(),
        source,
    })?;
    config
        .validate()
        .map_err(|e| CodebookError::model(origin, e))?;
    Ok(config)
}
