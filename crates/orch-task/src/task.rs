//! The task abstraction shared by every simulation and work item.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use orch_assets::AssetCollection;
use orch_core::errors::{ErrorInfo, OrchError};
use orch_core::tags::Tags;
use serde_json::{Map, Value};

use crate::command_line::CommandLine;

/// Tag carrying the registry name of the task an entity was built from.
pub const TASK_TYPE_TAG: &str = "task_type";

/// Callback run around simulation creation. Receives the simulation's task and
/// tags; an error fails only that simulation.
pub type TaskHook = Arc<dyn Fn(&mut dyn Task, &mut Tags) -> Result<(), OrchError> + Send + Sync>;

/// Read access to files of a persisted simulation.
pub trait FileSource {
    /// Returns the content of `path`, failing with `AssetNotFound` when absent.
    fn fetch(&self, path: &str) -> Result<Vec<u8>, OrchError>;
}

impl FileSource for BTreeMap<String, Vec<u8>> {
    fn fetch(&self, path: &str) -> Result<Vec<u8>, OrchError> {
        self.get(path).cloned().ok_or_else(|| {
            OrchError::AssetNotFound(
                ErrorInfo::new("task.file_missing", "file not available").with_context("path", path),
            )
        })
    }
}

/// State every task kind shares.
#[derive(Clone, Default)]
pub struct TaskCore {
    /// Command run for each simulation.
    pub command: CommandLine,
    /// Experiment-level assets shared by sibling simulations.
    pub common_assets: AssetCollection,
    /// Simulation-level assets.
    pub transient_assets: AssetCollection,
    /// Capability tags the backend must provide (`linux`, `docker`, `gpu`, ...).
    pub platform_requirements: BTreeSet<String>,
    pre_creation_hooks: Vec<TaskHook>,
    post_creation_hooks: Vec<TaskHook>,
}

impl fmt::Debug for TaskCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskCore")
            .field("command", &self.command.cmd())
            .field("common_assets", &self.common_assets.len())
            .field("transient_assets", &self.transient_assets.len())
            .field("platform_requirements", &self.platform_requirements)
            .field("pre_creation_hooks", &self.pre_creation_hooks.len())
            .field("post_creation_hooks", &self.post_creation_hooks.len())
            .finish()
    }
}

impl TaskCore {
    /// Core around `command`.
    pub fn new(command: CommandLine) -> Self {
        Self {
            command,
            ..Self::default()
        }
    }

    /// Appends a hook run before the simulation is created.
    pub fn add_pre_creation_hook(&mut self, hook: TaskHook) {
        self.pre_creation_hooks.push(hook);
    }

    /// Appends a hook run after the simulation is created.
    pub fn add_post_creation_hook(&mut self, hook: TaskHook) {
        self.post_creation_hooks.push(hook);
    }

    /// Registered pre-creation hooks, in order.
    pub fn pre_creation_hooks(&self) -> &[TaskHook] {
        &self.pre_creation_hooks
    }

    /// Registered post-creation hooks, in order.
    pub fn post_creation_hooks(&self) -> &[TaskHook] {
        &self.post_creation_hooks
    }

    pub(crate) fn requirements_json(&self) -> Value {
        Value::Array(
            self.platform_requirements
                .iter()
                .cloned()
                .map(Value::String)
                .collect(),
        )
    }
}

pub(crate) fn run_hooks(task: &mut dyn Task, hooks: &[TaskHook], tags: &mut Tags, site: &str) -> Result<(), OrchError> {
    for (idx, hook) in hooks.iter().enumerate() {
        hook(task, tags).map_err(|err| match err {
            OrchError::Hook(info) => OrchError::Hook(info),
            other => OrchError::Hook(
                ErrorInfo::new(format!("task.{site}"), "task hook failed")
                    .with_context("hook_index", idx.to_string())
                    .with_cause(other),
            ),
        })?;
    }
    Ok(())
}

/// A command plus the asset template and parameters it runs with.
///
/// Tasks are cloned structurally for every simulation a sweep produces.
pub trait Task: Send + Sync + fmt::Debug {
    /// Stable registry name, recorded in the `task_type` tag.
    fn task_type(&self) -> &'static str;

    /// Shared state.
    fn core(&self) -> &TaskCore;

    /// Mutable shared state.
    fn core_mut(&mut self) -> &mut TaskCore;

    /// Boxed structural copy.
    fn clone_box(&self) -> Box<dyn Task>;

    /// Downcasting support for hooks that target a concrete task kind.
    fn as_any(&self) -> &dyn Any;

    /// Mutable downcasting support.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Command run for each simulation.
    fn command(&self) -> &CommandLine {
        &self.core().command
    }

    /// Final experiment-level assets, just before upload.
    fn gather_common_assets(&mut self) -> Result<AssetCollection, OrchError> {
        Ok(self.core().common_assets.clone())
    }

    /// Final simulation-level assets, just before upload.
    fn gather_transient_assets(&mut self) -> Result<AssetCollection, OrchError> {
        Ok(self.core().transient_assets.clone())
    }

    /// Finalizes the task for one simulation, then runs the pre-creation hooks.
    fn pre_creation(&mut self, tags: &mut Tags) -> Result<(), OrchError> {
        let hooks = self.core().pre_creation_hooks.clone();
        run_hooks(self.as_task_mut(), &hooks, tags, "pre_creation")
    }

    /// Runs the post-creation hooks.
    fn post_creation(&mut self, tags: &mut Tags) -> Result<(), OrchError> {
        let hooks = self.core().post_creation_hooks.clone();
        run_hooks(self.as_task_mut(), &hooks, tags, "post_creation")
    }

    /// Rebuilds task state from a persisted simulation's tags and files.
    fn reload_from_simulation(&mut self, _tags: &Tags, _files: &dyn FileSource) -> Result<(), OrchError> {
        Ok(())
    }

    /// Serializable description used to rebuild the task through a registry.
    fn to_metadata(&self) -> Value;

    /// Parameter map, for tasks that carry one.
    fn parameters(&self) -> Option<&Map<String, Value>> {
        None
    }

    /// Sets one parameter and returns the tag patch describing it.
    fn set_parameter(&mut self, key: &str, _value: Value) -> Result<Tags, OrchError> {
        Err(OrchError::Unsupported(
            ErrorInfo::new("task.set_parameter", "task kind has no parameter map")
                .with_context("task_type", self.task_type())
                .with_context("key", key),
        ))
    }

    /// Upcast helper used by the default hook runners.
    fn as_task_mut(&mut self) -> &mut dyn Task;
}

impl Clone for Box<dyn Task> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}
