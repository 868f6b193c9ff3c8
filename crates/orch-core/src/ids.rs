//! Item kinds, identifiers and opaque backend handles.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::{invalid, OrchError};

/// Kind of entity managed by a platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ItemType {
    /// Named grouping of experiments.
    Suite,
    /// Set of simulations sharing common assets.
    Experiment,
    /// Single execution unit of a sweep.
    Simulation,
    /// Deduplicated group of assets.
    AssetCollection,
    /// Stand-alone execution unit outside the sweep model.
    WorkItem,
}

impl ItemType {
    /// All item kinds.
    pub const ALL: [ItemType; 5] = [
        ItemType::Suite,
        ItemType::Experiment,
        ItemType::Simulation,
        ItemType::AssetCollection,
        ItemType::WorkItem,
    ];

    /// Canonical name written in id files and metadata.
    pub fn as_str(self) -> &'static str {
        match self {
            ItemType::Suite => "Suite",
            ItemType::Experiment => "Experiment",
            ItemType::Simulation => "Simulation",
            ItemType::AssetCollection => "AssetCollection",
            ItemType::WorkItem => "WorkItem",
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemType {
    type Err = OrchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().replace(['_', '-'], "");
        ItemType::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(&needle))
            .ok_or_else(|| invalid("item_type.parse", format!("unknown item type {s:?}")))
    }
}

/// Generates a fresh canonical UUID string for backends that mint their own ids.
pub fn new_item_id() -> String {
    Uuid::new_v4().to_string()
}

/// Opaque backend representation of a persisted entity.
///
/// Backends stash whatever they need in `payload`; the core only reads `id`
/// and `item_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformObject {
    /// Backend identifier of the entity.
    pub id: String,
    /// Kind of the entity.
    pub item_type: ItemType,
    /// Backend specific payload.
    #[serde(default)]
    pub payload: Value,
}

impl PlatformObject {
    /// Creates a handle with an empty payload.
    pub fn new(id: impl Into<String>, item_type: ItemType) -> Self {
        Self {
            id: id.into(),
            item_type,
            payload: Value::Null,
        }
    }

    /// Attaches a backend payload.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Implemented by every entity that can be persisted by a platform.
pub trait Identified {
    /// Backend identifier, once assigned.
    fn id(&self) -> Option<&str>;
    /// Entity kind.
    fn item_type(&self) -> ItemType;
    /// Display name, used for id file names.
    fn name(&self) -> Option<&str> {
        None
    }
}
