//! The platform façade: one backend plus the caches, hooks and settings
//! every run shares.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use orch_assets::{AssetCollection, AssetRecord};
use orch_core::errors::{ErrorInfo, OrchError};
use orch_core::id_file::read_id_file;
use orch_core::ids::{Identified, ItemType, PlatformObject};
use orch_core::status::EntityStatus;
use orch_entities::{Experiment, Simulation, Suite, WorkItem};
use orch_task::Task;
use tracing::{debug, instrument};

use crate::cache::{CacheStats, FileCache};
use crate::config::PlatformConfig;
use crate::hooks::{HookRegistry, ItemRef, PlatformHook};
use crate::operations::{Backend, ItemOperations};
use crate::progress::ProgressSink;

const OBJECT_CACHE_ENTRIES: usize = 1024;

/// Files returned by retrieval calls, keyed by requested path.
pub type FileMap = BTreeMap<String, Arc<[u8]>>;

/// Entry point for every backend interaction.
pub struct Platform {
    name: String,
    backend: Arc<dyn Backend>,
    config: PlatformConfig,
    hooks: HookRegistry,
    cache: FileCache,
    objects: Mutex<LruCache<(ItemType, String), PlatformObject>>,
    progress: Option<ProgressSink>,
}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Platform")
            .field("name", &self.name)
            .field("backend", &self.backend.name())
            .field("hooks", &self.hooks)
            .finish()
    }
}

impl Platform {
    /// Platform over `backend` with default settings.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        let config = PlatformConfig::default();
        let capacity = NonZeroUsize::new(OBJECT_CACHE_ENTRIES).unwrap_or(NonZeroUsize::MIN);
        Self {
            name: backend.name().to_string(),
            cache: FileCache::new(&config.cache),
            backend,
            config,
            hooks: HookRegistry::new(),
            objects: Mutex::new(LruCache::new(capacity)),
            progress: None,
        }
    }

    /// Replaces the settings; the file cache is rebuilt with the new bounds.
    pub fn with_config(mut self, config: PlatformConfig) -> Self {
        self.cache = FileCache::new(&config.cache);
        self.config = config;
        self
    }

    /// Renames the platform, e.g. after the configuration block it came from.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Registers a hook.
    pub fn with_hook(mut self, hook: Arc<dyn PlatformHook>) -> Self {
        self.hooks.register(hook);
        self
    }

    /// Sends every run's progress events to `sink`.
    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    /// Platform name, recorded in metadata and id files.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Underlying backend.
    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    /// Settings.
    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    /// Registered hooks.
    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    pub(crate) fn progress_sink(&self) -> Option<&ProgressSink> {
        self.progress.as_ref()
    }

    /// File cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Item kinds the backend persists.
    pub fn supported_types(&self) -> BTreeSet<ItemType> {
        self.backend.supported_types()
    }

    /// True when the backend provides every capability in `requirements`.
    pub fn are_requirements_met(&self, requirements: &BTreeSet<String>) -> bool {
        let capabilities = self.backend.capabilities();
        requirements.iter().all(|req| capabilities.contains(req))
    }

    /// Fails with `Unsupported` when `task` needs capabilities the backend
    /// lacks.
    pub fn check_requirements(&self, task: &dyn Task) -> Result<(), OrchError> {
        let requirements = &task.core().platform_requirements;
        if self.are_requirements_met(requirements) {
            return Ok(());
        }
        let capabilities = self.backend.capabilities();
        let missing: Vec<&str> = requirements
            .iter()
            .filter(|req| !capabilities.contains(*req))
            .map(String::as_str)
            .collect();
        Err(OrchError::Unsupported(
            ErrorInfo::new("platform.requirements", "backend does not meet the task requirements")
                .with_context("platform", self.name.clone())
                .with_context("missing", missing.join(",")),
        ))
    }

    pub(crate) fn ensure_supported(&self, item_type: ItemType) -> Result<(), OrchError> {
        if self.supported_types().contains(&item_type) {
            Ok(())
        } else {
            Err(OrchError::Unsupported(
                ErrorInfo::new("platform.item_type", "backend does not support this item type")
                    .with_context("item_type", item_type.as_str())
                    .with_context("platform", self.name.clone()),
            ))
        }
    }

    fn objects(&self) -> std::sync::MutexGuard<'_, LruCache<(ItemType, String), PlatformObject>> {
        self.objects.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn remember(&self, handle: &PlatformObject) {
        self.objects()
            .put((handle.item_type, handle.id.clone()), handle.clone());
    }

    /// Handle of `id`, served from the object cache when possible.
    pub fn get_item(&self, id: &str, item_type: ItemType) -> Result<PlatformObject, OrchError> {
        if let Some(handle) = self.objects().get(&(item_type, id.to_string())).cloned() {
            return Ok(handle);
        }
        self.get_item_fresh(id, item_type)
    }

    /// Handle of `id`, always fetched from the backend.
    pub fn get_item_fresh(&self, id: &str, item_type: ItemType) -> Result<PlatformObject, OrchError> {
        self.ensure_supported(item_type)?;
        let handle = self.backend.get(id, item_type)?;
        self.remember(&handle);
        Ok(handle)
    }

    /// Handle named by an id file. The file must record the item type.
    pub fn get_item_from_id_file(&self, path: &Path) -> Result<PlatformObject, OrchError> {
        let record = read_id_file(path)?;
        let item_type = record.item_type.ok_or_else(|| {
            OrchError::Invalid(
                ErrorInfo::new("id_file.no_type", "id file does not record an item type")
                    .with_context("path", path.display().to_string()),
            )
        })?;
        self.get_item(&record.id, item_type)
    }

    /// Handles of the children of `id`.
    pub fn get_children(&self, id: &str, item_type: ItemType) -> Result<Vec<PlatformObject>, OrchError> {
        self.backend.children(id, item_type)
    }

    /// Handle of the parent of `id`.
    pub fn get_parent(&self, id: &str, item_type: ItemType) -> Result<Option<PlatformObject>, OrchError> {
        self.backend.parent(id, item_type)
    }

    /// Rebuilds a suite and its experiments (without simulations).
    pub fn get_suite(&self, id: &str) -> Result<Suite, OrchError> {
        let handle = self.get_item_fresh(id, ItemType::Suite)?;
        let mut suite = self.backend.suites().to_entity(&handle)?;
        for child in self.backend.suites().children(id)? {
            suite.add_experiment(self.backend.experiments().to_entity(&child)?)?;
        }
        Ok(suite)
    }

    /// Rebuilds an experiment, optionally with its simulations.
    pub fn get_experiment(&self, id: &str, with_children: bool) -> Result<Experiment, OrchError> {
        let handle = self.get_item_fresh(id, ItemType::Experiment)?;
        let mut experiment = self.backend.experiments().to_entity(&handle)?;
        if with_children {
            for child in self.backend.experiments().children(id)? {
                experiment.push_simulation(self.backend.simulations().to_entity(&child)?);
            }
        }
        Ok(experiment)
    }

    /// Rebuilds a simulation.
    pub fn get_simulation(&self, id: &str) -> Result<Simulation, OrchError> {
        let handle = self.get_item_fresh(id, ItemType::Simulation)?;
        self.backend.simulations().to_entity(&handle)
    }

    /// Rebuilds a work item.
    pub fn get_work_item(&self, id: &str) -> Result<WorkItem, OrchError> {
        let handle = self.get_item_fresh(id, ItemType::WorkItem)?;
        self.backend.work_items().to_entity(&handle)
    }

    /// Rebuilds an asset collection.
    pub fn get_asset_collection(&self, id: &str) -> Result<AssetCollection, OrchError> {
        let handle = self.get_item_fresh(id, ItemType::AssetCollection)?;
        self.backend.asset_collections().to_entity(&handle)
    }

    fn fetch_cached<E: Identified>(
        &self,
        ops: &dyn ItemOperations<E>,
        entity: &E,
        id: Option<&str>,
        files: &[&str],
    ) -> Result<FileMap, OrchError> {
        let Some(id) = id else {
            return Err(OrchError::Invalid(
                ErrorInfo::new("platform.unsaved", "files exist only for created entities")
                    .with_context("item_type", ops.item_type().as_str()),
            ));
        };
        let mut found = FileMap::new();
        let mut missing = Vec::new();
        for file in files {
            match self.cache.get(id, file) {
                Some(bytes) => {
                    found.insert((*file).to_string(), bytes);
                }
                None => missing.push((*file).to_string()),
            }
        }
        if !missing.is_empty() {
            debug!(entity = id, files = missing.len(), "fetching files from backend");
            for (path, content) in ops.get_assets(entity, &missing)? {
                let content: Arc<[u8]> = Arc::from(content);
                self.cache.insert(id, &path, Arc::clone(&content));
                found.insert(path, content);
            }
        }
        Ok(found)
    }

    /// Retrieves files of a simulation, going through the file cache.
    pub fn get_files(&self, simulation: &Simulation, files: &[&str]) -> Result<FileMap, OrchError> {
        self.fetch_cached(self.backend.simulations(), simulation, simulation.id(), files)
    }

    /// Retrieves files of a work item, going through the file cache.
    pub fn get_work_item_files(&self, item: &WorkItem, files: &[&str]) -> Result<FileMap, OrchError> {
        self.fetch_cached(self.backend.work_items(), item, item.id(), files)
    }

    /// Files of a simulation.
    pub fn list_assets(&self, simulation: &Simulation) -> Result<Vec<AssetRecord>, OrchError> {
        self.backend.simulations().list_assets(simulation)
    }

    /// Files of an experiment keyed by entity id; with `children`, every
    /// simulation's files are listed too.
    pub fn list_experiment_assets(
        &self,
        experiment: &Experiment,
        children: bool,
    ) -> Result<BTreeMap<String, Vec<AssetRecord>>, OrchError> {
        let mut listing = BTreeMap::new();
        if let Some(id) = experiment.id() {
            listing.insert(id.to_string(), self.backend.experiments().list_assets(experiment)?);
        }
        if children {
            for simulation in experiment.simulations() {
                if let Some(id) = simulation.id() {
                    listing.insert(id.to_string(), self.list_assets(simulation)?);
                }
            }
        }
        Ok(listing)
    }

    fn invalidate_if_finished(&self, id: Option<&str>, before: EntityStatus, after: EntityStatus) {
        if let Some(id) = id {
            if !before.is_terminal() && after.is_terminal() {
                self.cache.invalidate(id);
            }
        }
    }

    /// Refreshes one simulation.
    pub fn refresh_simulation(&self, simulation: &mut Simulation) -> Result<(), OrchError> {
        let before = simulation.status();
        self.backend.simulations().refresh_status(simulation)?;
        self.invalidate_if_finished(simulation.id(), before, simulation.status());
        Ok(())
    }

    /// Refreshes an experiment and its simulations.
    #[instrument(level = "debug", skip_all, fields(experiment = experiment.id().unwrap_or("-")))]
    pub fn refresh_experiment(&self, experiment: &mut Experiment) -> Result<(), OrchError> {
        let before: Vec<EntityStatus> = experiment.simulations().iter().map(Simulation::status).collect();
        self.backend.experiments().refresh_status(experiment)?;
        for (simulation, before) in experiment.simulations().iter().zip(before) {
            self.invalidate_if_finished(simulation.id(), before, simulation.status());
        }
        Ok(())
    }

    /// Refreshes a work item.
    pub fn refresh_work_item(&self, item: &mut WorkItem) -> Result<(), OrchError> {
        let before = item.status();
        self.backend.work_items().refresh_status(item)?;
        self.invalidate_if_finished(item.id(), before, item.status());
        Ok(())
    }

    /// Requests remote cancellation of an entity. Never called by the driver.
    pub fn cancel(&self, item: ItemRef<'_>) -> Result<(), OrchError> {
        match item {
            ItemRef::Suite(suite) => self.backend.suites().cancel(suite),
            ItemRef::Experiment(experiment) => self.backend.experiments().cancel(experiment),
            ItemRef::Simulation(simulation) => self.backend.simulations().cancel(simulation),
            ItemRef::AssetCollection(collection) => self.backend.asset_collections().cancel(collection),
            ItemRef::WorkItem(item) => self.backend.work_items().cancel(item),
        }
    }
}
