use std::fmt;

use serde::{Deserialize, Serialize};

/// The record sets handled by the pipeline.
///
/// `Crashes`, `Parties` and `Victims` come from the yearly raw extracts;
/// `Collisions` is the merged crash-level table built by the entity merger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Entity {
    Crashes,
    Parties,
    Victims,
    Collisions,
}

impl Entity {
    /// Entities that have yearly raw extracts, in processing order.
    pub const RAW: [Entity; 3] = [Entity::Crashes, Entity::Parties, Entity::Victims];

    pub fn as_str(self) -> &'static str {
        match self {
            Entity::Crashes => "crashes",
            Entity::Parties => "parties",
            Entity::Victims => "victims",
            Entity::Collisions => "collisions",
        }
    }

    /// Surrogate identifier column owned by this entity.
    pub fn id_column(self) -> &'static str {
        match self {
            Entity::Crashes | Entity::Collisions => "cid",
            Entity::Parties => "pid",
            Entity::Victims => "vid",
        }
    }

    /// Processing-tag column attached to rows of this entity.
    pub fn tag_column(self) -> &'static str {
        match self {
            Entity::Crashes | Entity::Collisions => "crash_tag",
            Entity::Parties => "party_tag",
            Entity::Victims => "victim_tag",
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
