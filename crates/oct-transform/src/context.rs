//! Read-only inputs shared by every transformation stage.

use oct_model::{CodeTable, Codebook, PipelineConfig};

use crate::error::{Result, TransformError};

/// Codebook and configuration for one pipeline run.
///
/// Both are borrowed immutably; no stage can change them.
#[derive(Debug, Clone, Copy)]
pub struct TransformContext<'a> {
    pub codebook: &'a Codebook,
    pub config: &'a PipelineConfig,
}

impl<'a> TransformContext<'a> {
    pub fn new(codebook: &'a Codebook, config: &'a PipelineConfig) -> Self {
        Self { codebook, config }
    }

    /// Code table of a codebook variable that a stage cannot work without.
    pub fn require_table(&self, variable: &str) -> Result<CodeTable<'a>> {
        self.codebook
            .table(variable)
            .ok_or_else(|| TransformError::MissingVariable {
                variable: variable.to_string(),
            })
    }
}
