#![deny(unsafe_code)]

//! Codebook registry and configuration loading.

pub mod doctor;
pub mod error;
pub mod hash;
pub mod loaders;
pub mod paths;

pub use crate::doctor::CodebookReport;
pub use crate::error::{CodebookError, Result};
pub use crate::loaders::{LoadedCodebook, load_codebook, load_config, parse_config, validate_codebook};
pub use crate::paths::{CONFIG_ENV_VAR, DEFAULT_CONFIG_FILE, config_path};
