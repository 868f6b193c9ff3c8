//! Reference backends and the descriptors they persist.

mod file;
mod memory;

pub use file::FileBackend;
pub use memory::{MemoryBackend, OpKind, OpRecord, SimulationScript};

use orch_assets::AssetRecord;
use orch_core::errors::{serde_error, ErrorInfo, OrchError};
use orch_core::ids::{ItemType, PlatformObject};
use orch_core::tags::Tags;
use orch_entities::{
    Experiment, ExperimentMetadata, Simulation, SimulationMetadata, Suite, SuiteMetadata, WorkItem, WorkItemMetadata,
};
use orch_task::TASK_TYPE_TAG;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Stored form of an asset collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct CollectionMetadata {
    pub id: String,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    pub assets: Vec<AssetRecord>,
}

pub(crate) fn describe_suite(suite: &Suite, id: &str) -> SuiteMetadata {
    SuiteMetadata {
        id: id.to_string(),
        name: suite.name.clone(),
        tags: suite.tags.clone(),
        status: suite.status(),
    }
}

pub(crate) fn describe_experiment(
    experiment: &Experiment,
    id: &str,
    platform: &str,
) -> Result<ExperimentMetadata, OrchError> {
    Ok(ExperimentMetadata {
        id: id.to_string(),
        parent_id: experiment.parent_id.clone(),
        name: experiment.name.clone(),
        tags: experiment.tags.clone(),
        status: experiment.status(),
        task_type: experiment.tags.get_str(TASK_TYPE_TAG).map(str::to_string),
        assets_id: experiment.assets_id().map(str::to_string),
        assets: experiment.common_assets.records()?,
        platform: Some(platform.to_string()),
    })
}

pub(crate) fn describe_simulation(
    simulation: &Simulation,
    id: &str,
    platform: &str,
) -> Result<SimulationMetadata, OrchError> {
    Ok(SimulationMetadata {
        id: id.to_string(),
        parent_id: simulation.parent_id.clone(),
        tags: simulation.tags.clone(),
        status: simulation.status(),
        task_type: Some(simulation.task_type().to_string()),
        task: Some(simulation.task.to_metadata()),
        platform: Some(platform.to_string()),
        assets: simulation.assets().records()?,
    })
}

pub(crate) fn describe_work_item(item: &WorkItem, id: &str) -> Result<WorkItemMetadata, OrchError> {
    let command = serde_json::to_value(&item.command).map_err(|err| serde_error("work_item.command", err))?;
    Ok(WorkItemMetadata {
        id: id.to_string(),
        name: item.name.clone(),
        tags: item.tags.clone(),
        status: item.status(),
        command: Some(command),
        related: item.related.to_named_map(),
        assets: item.assets.records()?,
    })
}

pub(crate) fn to_payload<T: Serialize>(metadata: &T) -> Result<serde_json::Value, OrchError> {
    serde_json::to_value(metadata).map_err(|err| serde_error("backend.payload", err))
}

pub(crate) fn from_payload<T: DeserializeOwned>(handle: &PlatformObject) -> Result<T, OrchError> {
    serde_json::from_value(handle.payload.clone())
        .map_err(|err| serde_error("backend.payload", err).for_entity(handle.id.clone()))
}

pub(crate) fn expect_type(handle: &PlatformObject, expected: ItemType) -> Result<(), OrchError> {
    if handle.item_type == expected {
        return Ok(());
    }
    Err(OrchError::Invalid(
        ErrorInfo::new("backend.item_type", "handle refers to another item type")
            .with_context("expected", expected.as_str())
            .with_context("actual", handle.item_type.as_str())
            .with_entity(handle.id.clone()),
    ))
}

pub(crate) fn require_id<'a>(id: Option<&'a str>, item_type: ItemType) -> Result<&'a str, OrchError> {
    id.ok_or_else(|| {
        OrchError::Invalid(
            ErrorInfo::new("backend.unsaved", "entity has not been created")
                .with_context("item_type", item_type.as_str()),
        )
    })
}

pub(crate) fn not_found(id: &str, item_type: ItemType) -> OrchError {
    OrchError::NotFound(
        ErrorInfo::new("backend.not_found", "no such item")
            .with_context("item_type", item_type.as_str())
            .with_entity(id),
    )
}

pub(crate) fn missing_file(id: &str, path: &str) -> OrchError {
    OrchError::AssetNotFound(
        ErrorInfo::new("backend.file_missing", "file not found for entity")
            .with_context("path", path)
            .with_entity(id),
    )
}

pub(crate) fn split_job_path(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some((dir, file)) => (dir, file),
        None => ("", path),
    }
}
