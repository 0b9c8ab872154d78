//! Entity frame: a Polars table tagged with the record set it holds.

use std::collections::BTreeMap;

use oct_common::i64_column;
use oct_model::Entity;
use polars::prelude::{DataFrame, PolarsResult};

/// Column holding the source year of each row.
pub const YEAR_COLUMN: &str = "year";

/// A crash, party or victim table passed between stages.
///
/// Stages take a frame by value or by reference and return a new one, so a
/// failed stage never leaves a half-updated table behind.
#[derive(Debug, Clone)]
pub struct EntityFrame {
    pub entity: Entity,
    pub data: DataFrame,
}

impl EntityFrame {
    pub fn new(entity: Entity, data: DataFrame) -> Self {
        Self { entity, data }
    }

    pub fn record_count(&self) -> usize {
        self.data.height()
    }

    /// Source year of every row. Rows without a year yield `None`.
    pub fn years(&self) -> PolarsResult<Vec<Option<i32>>> {
        if self.data.column(YEAR_COLUMN).is_err() {
            return Ok(vec![None; self.data.height()]);
        }
        Ok(i64_column(&self.data, YEAR_COLUMN)?
            .into_iter()
            .map(|y| y.and_then(|v| i32::try_from(v).ok()))
            .collect())
    }

    /// Row count per source year.
    pub fn year_counts(&self) -> PolarsResult<BTreeMap<i32, u64>> {
        let mut counts = BTreeMap::new();
        for year in self.years()?.into_iter().flatten() {
            *counts.entry(year).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::{IntoColumn, NamedFrom, Series};

    #[test]
    fn year_counts_group_rows() {
        let df = DataFrame::new(vec![
            Series::new(YEAR_COLUMN.into(), vec![Some(2020i64), Some(2020), Some(2021), None])
                .into_column(),
        ])
        .unwrap();
        let frame = EntityFrame::new(Entity::Crashes, df);
        let counts = frame.year_counts().unwrap();
        assert_eq!(counts.get(&2020), Some(&2));
        assert_eq!(counts.get(&2021), Some(&1));
        assert_eq!(frame.record_count(), 4);
    }
}
