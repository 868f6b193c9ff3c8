//! Platform-level hooks invoked around creation and execution.

use std::fmt;
use std::sync::Arc;

use orch_assets::AssetCollection;
use orch_core::errors::{ErrorInfo, OrchError};
use orch_core::ids::{Identified, ItemType};
use orch_entities::{Experiment, Simulation, Suite, WorkItem};
use tracing::debug;

/// Point of the lifecycle where hooks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookSite {
    /// Before backend creation.
    PreCreate,
    /// After backend creation succeeded.
    PostCreate,
    /// Before execution starts.
    PreRun,
    /// After the run (and the optional wait) finished.
    PostRun,
}

impl HookSite {
    /// Name used in error codes and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            HookSite::PreCreate => "pre_create_item",
            HookSite::PostCreate => "post_create_item",
            HookSite::PreRun => "pre_run_item",
            HookSite::PostRun => "post_run_item",
        }
    }
}

/// Mutable view of the entity a hook receives.
pub enum ItemRef<'a> {
    /// A suite.
    Suite(&'a mut Suite),
    /// An experiment.
    Experiment(&'a mut Experiment),
    /// A simulation.
    Simulation(&'a mut Simulation),
    /// An asset collection.
    AssetCollection(&'a mut AssetCollection),
    /// A work item.
    WorkItem(&'a mut WorkItem),
}

impl ItemRef<'_> {
    /// Kind of the referenced entity.
    pub fn item_type(&self) -> ItemType {
        match self {
            ItemRef::Suite(_) => ItemType::Suite,
            ItemRef::Experiment(_) => ItemType::Experiment,
            ItemRef::Simulation(_) => ItemType::Simulation,
            ItemRef::AssetCollection(_) => ItemType::AssetCollection,
            ItemRef::WorkItem(_) => ItemType::WorkItem,
        }
    }

    /// Backend id, when assigned.
    pub fn id(&self) -> Option<&str> {
        match self {
            ItemRef::Suite(item) => item.id(),
            ItemRef::Experiment(item) => item.id(),
            ItemRef::Simulation(item) => item.id(),
            ItemRef::AssetCollection(item) => Identified::id(&**item),
            ItemRef::WorkItem(item) => item.id(),
        }
    }
}

/// A plugin reacting to lifecycle events. Every method defaults to a no-op.
pub trait PlatformHook: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Called before an entity is created.
    fn pre_create_item(&self, _item: &mut ItemRef<'_>) -> Result<(), OrchError> {
        Ok(())
    }

    /// Called after an entity was created.
    fn post_create_item(&self, _item: &mut ItemRef<'_>) -> Result<(), OrchError> {
        Ok(())
    }

    /// Called before an entity is started.
    fn pre_run_item(&self, _item: &mut ItemRef<'_>) -> Result<(), OrchError> {
        Ok(())
    }

    /// Called after an entity's run finished.
    fn post_run_item(&self, _item: &mut ItemRef<'_>) -> Result<(), OrchError> {
        Ok(())
    }
}

type HookFn = dyn Fn(&mut ItemRef<'_>) -> Result<(), OrchError> + Send + Sync;

/// Hook built from a closure bound to one site and, optionally, one kind.
pub struct FnHook {
    name: String,
    site: HookSite,
    item_type: Option<ItemType>,
    callback: Box<HookFn>,
}

impl FnHook {
    /// Hook running `callback` at `site` for every kind.
    pub fn new<F>(name: impl Into<String>, site: HookSite, callback: F) -> Self
    where
        F: Fn(&mut ItemRef<'_>) -> Result<(), OrchError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            site,
            item_type: None,
            callback: Box::new(callback),
        }
    }

    /// Restricts the hook to one kind.
    pub fn for_type(mut self, item_type: ItemType) -> Self {
        self.item_type = Some(item_type);
        self
    }

    fn call(&self, site: HookSite, item: &mut ItemRef<'_>) -> Result<(), OrchError> {
        if site != self.site || self.item_type.is_some_and(|kind| kind != item.item_type()) {
            return Ok(());
        }
        (self.callback)(item)
    }
}

impl PlatformHook for FnHook {
    fn name(&self) -> &str {
        &self.name
    }

    fn pre_create_item(&self, item: &mut ItemRef<'_>) -> Result<(), OrchError> {
        self.call(HookSite::PreCreate, item)
    }

    fn post_create_item(&self, item: &mut ItemRef<'_>) -> Result<(), OrchError> {
        self.call(HookSite::PostCreate, item)
    }

    fn pre_run_item(&self, item: &mut ItemRef<'_>) -> Result<(), OrchError> {
        self.call(HookSite::PreRun, item)
    }

    fn post_run_item(&self, item: &mut ItemRef<'_>) -> Result<(), OrchError> {
        self.call(HookSite::PostRun, item)
    }
}

/// Ordered list of registered hooks.
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: Vec<Arc<dyn PlatformHook>>,
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.hooks.iter().map(|hook| hook.name().to_string()))
            .finish()
    }
}

impl HookRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a hook; hooks run in registration order.
    pub fn register(&mut self, hook: Arc<dyn PlatformHook>) {
        self.hooks.push(hook);
    }

    /// Number of registered hooks.
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Runs every hook for `site`. The first failure stops the chain and is
    /// returned as a `Hook` error naming the hook and the entity.
    pub fn dispatch(&self, site: HookSite, item: &mut ItemRef<'_>) -> Result<(), OrchError> {
        for hook in &self.hooks {
            let result = match site {
                HookSite::PreCreate => hook.pre_create_item(item),
                HookSite::PostCreate => hook.post_create_item(item),
                HookSite::PreRun => hook.pre_run_item(item),
                HookSite::PostRun => hook.post_run_item(item),
            };
            if let Err(err) = result {
                let mut info = ErrorInfo::new(format!("hook.{}", site.as_str()), "platform hook failed")
                    .with_context("hook", hook.name())
                    .with_context("item_type", item.item_type().as_str())
                    .with_cause(&err);
                if let Some(id) = item.id() {
                    info = info.with_entity(id);
                }
                return Err(OrchError::Hook(info));
            }
            debug!(hook = hook.name(), site = site.as_str(), item_type = %item.item_type(), "hook ran");
        }
        Ok(())
    }
}
