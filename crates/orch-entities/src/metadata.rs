//! Serialized entity descriptors written next to jobs and read back by
//! backends when rebuilding entities.
//!
//! Unknown fields are ignored on load and every field added after the first
//! schema carries a default, so files written by other versions still decode.

use std::collections::BTreeMap;

use orch_assets::AssetRecord;
use orch_core::status::EntityStatus;
use orch_core::tags::Tags;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Descriptor of a simulation (`simulation_metadata.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationMetadata {
    /// Backend id.
    pub id: String,
    /// Parent experiment id.
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Tags.
    #[serde(default)]
    pub tags: Tags,
    /// Last known status.
    #[serde(default = "created")]
    pub status: EntityStatus,
    /// Registry name of the task.
    #[serde(default)]
    pub task_type: Option<String>,
    /// Task description produced by `Task::to_metadata`.
    #[serde(default)]
    pub task: Option<Value>,
    /// Name of the platform that created the simulation.
    #[serde(default)]
    pub platform: Option<String>,
    /// Transient assets written into the working directory.
    #[serde(default)]
    pub assets: Vec<AssetRecord>,
}

/// Descriptor of an experiment (`experiment_metadata.json`), without its
/// simulations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentMetadata {
    /// Backend id.
    pub id: String,
    /// Parent suite id.
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Tags.
    #[serde(default)]
    pub tags: Tags,
    /// Last known status.
    #[serde(default = "created")]
    pub status: EntityStatus,
    /// Registry name of the base task.
    #[serde(default)]
    pub task_type: Option<String>,
    /// Id of the common asset collection.
    #[serde(default)]
    pub assets_id: Option<String>,
    /// Common assets.
    #[serde(default)]
    pub assets: Vec<AssetRecord>,
    /// Name of the platform that created the experiment.
    #[serde(default)]
    pub platform: Option<String>,
}

/// Descriptor of a suite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteMetadata {
    /// Backend id.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Tags.
    #[serde(default)]
    pub tags: Tags,
    /// Last known status.
    #[serde(default = "created")]
    pub status: EntityStatus,
}

/// Descriptor of a work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItemMetadata {
    /// Backend id.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Tags.
    #[serde(default)]
    pub tags: Tags,
    /// Last known status.
    #[serde(default = "created")]
    pub status: EntityStatus,
    /// Rendered command.
    #[serde(default)]
    pub command: Option<Value>,
    /// Related entity ids, keyed by item type name.
    #[serde(default)]
    pub related: BTreeMap<String, Vec<String>>,
    /// Assets of the work item.
    #[serde(default)]
    pub assets: Vec<AssetRecord>,
}

fn created() -> EntityStatus {
    EntityStatus::Created
}
