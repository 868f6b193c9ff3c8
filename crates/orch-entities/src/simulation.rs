//! A single simulation: one task, its tags and its transient assets.

use orch_assets::AssetCollection;
use orch_core::errors::{ErrorInfo, OrchError};
use orch_core::ids::{Identified, ItemType, PlatformObject};
use orch_core::status::{EntityStatus, Transition};
use orch_core::tags::Tags;
use orch_task::{CommandTask, Task, TaskRegistry};
use serde::Deserialize;
use tracing::warn;

use crate::lifecycle::apply_status;
use crate::metadata::SimulationMetadata;

/// One execution unit: a task instance plus its tags and status.
///
/// A simulation is freely mutable until a backend assigns its id; after that
/// its transient assets are frozen.
#[derive(Debug, Clone)]
pub struct Simulation {
    id: Option<String>,
    /// Id of the owning experiment.
    pub parent_id: Option<String>,
    /// Task this simulation runs; a structural copy of the base task.
    pub task: Box<dyn Task>,
    /// Tags, including those emitted by sweep callbacks.
    pub tags: Tags,
    status: EntityStatus,
    platform_object: Option<PlatformObject>,
    assets: AssetCollection,
}

impl Simulation {
    /// Fresh, unsaved simulation around `task`.
    pub fn new(task: Box<dyn Task>) -> Self {
        Self {
            id: None,
            parent_id: None,
            task,
            tags: Tags::new(),
            status: EntityStatus::Created,
            platform_object: None,
            assets: AssetCollection::new(),
        }
    }

    /// Convenience constructor from any concrete task.
    pub fn from_task<T: Task + 'static>(task: T) -> Self {
        Self::new(Box::new(task))
    }

    /// Backend id.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// True once a backend has persisted the simulation.
    pub fn is_created(&self) -> bool {
        self.id.is_some()
    }

    /// Current status.
    pub fn status(&self) -> EntityStatus {
        self.status
    }

    /// True for SUCCEEDED and FAILED.
    pub fn is_done(&self) -> bool {
        self.status.is_terminal()
    }

    /// True when the simulation succeeded.
    pub fn succeeded(&self) -> bool {
        self.status == EntityStatus::Succeeded
    }

    /// Applies a backend observation; backward moves are clamped and logged.
    pub fn observe_status(&mut self, observed: EntityStatus) -> Transition {
        apply_status(&mut self.status, observed, ItemType::Simulation, self.id.as_deref())
    }

    /// Assets gathered for the working directory.
    pub fn assets(&self) -> &AssetCollection {
        &self.assets
    }

    /// Cached backend handle.
    pub fn platform_object(&self) -> Option<&PlatformObject> {
        self.platform_object.as_ref()
    }

    /// Registry name of the task.
    pub fn task_type(&self) -> &'static str {
        self.task.task_type()
    }

    /// Runs the task's pre-creation step and gathers the transient assets.
    ///
    /// Tags set by hooks here override sweep callback tags.
    pub fn pre_creation(&mut self) -> Result<(), OrchError> {
        self.ensure_unsaved("pre_creation")?;
        self.task.pre_creation(&mut self.tags)?;
        self.assets = self.task.gather_transient_assets()?;
        Ok(())
    }

    /// Runs the task's post-creation hooks.
    pub fn post_creation(&mut self) -> Result<(), OrchError> {
        self.task.post_creation(&mut self.tags)
    }

    fn ensure_unsaved(&self, operation: &str) -> Result<(), OrchError> {
        match &self.id {
            None => Ok(()),
            Some(id) => Err(OrchError::Invalid(
                ErrorInfo::new("simulation.persisted", "simulation was already created")
                    .with_entity(id.clone())
                    .with_context("operation", operation),
            )),
        }
    }

    /// Records a successful backend creation: assigns the id, caches the
    /// handle and freezes the transient assets.
    pub fn mark_created(&mut self, handle: PlatformObject) {
        self.id = Some(handle.id.clone());
        self.assets.freeze();
        self.platform_object = Some(handle);
    }

    /// Marks a simulation that could not be created as FAILED.
    pub fn mark_create_failed(&mut self) {
        self.observe_status(EntityStatus::Failed);
    }

    /// Serializable descriptor.
    pub fn to_metadata(&self, platform: Option<&str>) -> Result<SimulationMetadata, OrchError> {
        let id = self.id.clone().ok_or_else(|| {
            OrchError::Invalid(ErrorInfo::new(
                "simulation.unsaved",
                "only created simulations have metadata",
            ))
        })?;
        Ok(SimulationMetadata {
            id,
            parent_id: self.parent_id.clone(),
            tags: self.tags.clone(),
            status: self.status,
            task_type: Some(self.task.task_type().to_string()),
            task: Some(self.task.to_metadata()),
            platform: platform.map(str::to_string),
            assets: self.assets.records()?,
        })
    }

    /// Rebuilds a simulation from stored metadata.
    ///
    /// Task metadata of an unknown kind falls back to a command task built
    /// from its `command` field, with a warning.
    pub fn from_metadata(
        metadata: &SimulationMetadata,
        registry: &TaskRegistry,
        handle: PlatformObject,
    ) -> Result<Self, OrchError> {
        let task = match &metadata.task {
            Some(task) => match registry.build(task) {
                Ok(task) => task,
                Err(OrchError::NotFound(info)) => {
                    warn!(id = %metadata.id, reason = %info, "rebuilding simulation with a command task");
                    fallback_task(task)
                }
                Err(err) => return Err(err.for_entity(metadata.id.clone())),
            },
            None => {
                warn!(id = %metadata.id, "simulation metadata carries no task");
                Box::new(CommandTask::default())
            }
        };
        Ok(Self {
            id: Some(metadata.id.clone()),
            parent_id: metadata.parent_id.clone(),
            task,
            tags: metadata.tags.clone(),
            status: metadata.status,
            platform_object: Some(handle),
            assets: AssetCollection::new(),
        })
    }
}

fn fallback_task(task: &serde_json::Value) -> Box<dyn Task> {
    #[derive(Deserialize)]
    struct CommandOnly {
        command: orch_task::CommandLine,
    }
    match serde_json::from_value::<CommandOnly>(task.clone()) {
        Ok(fields) => Box::new(CommandTask::new(fields.command)),
        Err(_) => Box::new(CommandTask::default()),
    }
}

impl Identified for Simulation {
    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn item_type(&self) -> ItemType {
        ItemType::Simulation
    }
}
