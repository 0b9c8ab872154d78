//! Yearly extract discovery.

use std::path::{Path, PathBuf};

use oct_model::{Entity, IngestConfig};
use tracing::debug;

use crate::error::{IngestError, Result};

/// One per-year, per-entity extract on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YearFile {
    pub entity: Entity,
    pub year: i32,
    pub path: PathBuf,
}

/// Locates `{stem}_{year}.csv` for every raw entity and year.
///
/// All files are checked before any is read, so a missing extract aborts
/// the run before output is touched. Results are ordered by entity, then
/// year ascending.
pub fn discover_year_files(
    raw_dir: &Path,
    ingest: &IngestConfig,
    years: &[i32],
) -> Result<Vec<YearFile>> {
    if !raw_dir.is_dir() {
        return Err(IngestError::DirectoryNotFound {
            path: raw_dir.to_path_buf(),
        });
    }
    let mut sorted = years.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut files = Vec::with_capacity(Entity::RAW.len() * sorted.len());
    for entity in Entity::RAW {
        for &year in &sorted {
            let path = raw_dir.join(ingest.file_name(entity, year));
            if !path.is_file() {
                return Err(IngestError::MissingYearFile { entity, year, path });
            }
            files.push(YearFile { entity, year, path });
        }
    }
    debug!(dir = %raw_dir.display(), files = files.len(), "discovered yearly extracts");
    Ok(files)
}
