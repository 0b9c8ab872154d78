//! Configuration file location.

use std::path::PathBuf;

/// Environment variable overriding the configuration file location.
pub const CONFIG_ENV_VAR: &str = "OCTRAFFIC_CONFIG";

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "octraffic.toml";

/// Resolve the configuration path.
///
/// Resolution order:
/// 1. an explicit path (the CLI `--config` flag)
/// 2. `OCTRAFFIC_CONFIG` environment variable
/// 3. `octraffic.toml` in the working directory
pub fn config_path(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(path) = explicit {
        return path;
    }
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        return PathBuf::from(path);
    }
    PathBuf::from(DEFAULT_CONFIG_FILE)
}
