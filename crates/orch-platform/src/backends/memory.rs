//! In-process backend with scripted job outcomes and fault injection.
//!
//! Every item lives in one mutex-guarded map. Started simulations follow a
//! [`SimulationScript`] chosen from their tags: each status refresh consumes
//! one scripted status, and the script's output files appear once a terminal
//! status is reached.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use orch_assets::{Asset, AssetCollection, AssetRecord};
use orch_core::errors::{ErrorInfo, OrchError};
use orch_core::hash::md5_hex;
use orch_core::ids::{new_item_id, ItemType, PlatformObject};
use orch_core::status::EntityStatus;
use orch_core::tags::Tags;
use orch_entities::{
    Experiment, ExperimentMetadata, Simulation, SimulationMetadata, Suite, SuiteMetadata, WorkItem, WorkItemMetadata,
};
use orch_task::TaskRegistry;
use serde::Serialize;
use tracing::debug;

use super::{
    describe_experiment, describe_simulation, describe_suite, describe_work_item, expect_type, from_payload,
    missing_file, not_found, require_id, split_job_path, to_payload, CollectionMetadata,
};
use crate::operations::{Backend, BlobStore, ItemOperations};

/// Statuses a started job reports on successive refreshes, and the files it
/// leaves behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationScript {
    /// Reported statuses, one per refresh.
    pub statuses: Vec<EntityStatus>,
    /// Output files published on the first terminal status.
    pub files: BTreeMap<String, Vec<u8>>,
}

impl Default for SimulationScript {
    fn default() -> Self {
        Self::succeed()
    }
}

impl SimulationScript {
    /// Script reporting `statuses` with no output files.
    pub fn new(statuses: Vec<EntityStatus>) -> Self {
        Self {
            statuses,
            files: BTreeMap::new(),
        }
    }

    /// Runs, then succeeds with a `stdout.txt`.
    pub fn succeed() -> Self {
        Self::new(vec![EntityStatus::Running, EntityStatus::Succeeded]).with_file("stdout.txt", "done\n")
    }

    /// Runs, then fails with `message` in `stderr.txt`.
    pub fn fail(message: &str) -> Self {
        Self::new(vec![EntityStatus::Running, EntityStatus::Failed]).with_file("stderr.txt", message)
    }

    /// Keeps running forever.
    pub fn never_finish() -> Self {
        Self::new(vec![EntityStatus::Running])
    }

    /// Adds an output file.
    pub fn with_file(mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.files.insert(path.into(), content.into());
        self
    }
}

type ScriptFn = dyn Fn(&Tags) -> SimulationScript + Send + Sync;
type TagPredicate = dyn Fn(&Tags) -> bool + Send + Sync;

/// Kind of a logged backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// An item was persisted.
    Create,
    /// A blob was stored.
    Upload,
    /// Execution was started.
    Run,
    /// Status was refreshed.
    Refresh,
    /// Cancellation was requested.
    Cancel,
}

/// One entry of the call log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpRecord {
    /// What happened.
    pub op: OpKind,
    /// Kind of the item involved.
    pub item_type: ItemType,
    /// Item id, or the checksum for uploads.
    pub id: String,
}

struct Record {
    handle: PlatformObject,
    parent: Option<String>,
    children: Vec<String>,
    tags: Tags,
    status: EntityStatus,
    pending: VecDeque<EntityStatus>,
    files: BTreeMap<String, Vec<u8>>,
    outputs: BTreeMap<String, Vec<u8>>,
}

struct SimulationFault {
    matches: Arc<TagPredicate>,
    remaining: usize,
}

#[derive(Default)]
struct State {
    records: HashMap<String, Record>,
    blobs: HashMap<String, Arc<[u8]>>,
    uploads: HashMap<String, usize>,
    ops: Vec<OpRecord>,
    experiment_faults: usize,
    experiment_faults_transient: bool,
    simulation_faults: Vec<SimulationFault>,
}

impl State {
    fn log(&mut self, op: OpKind, item_type: ItemType, id: &str) {
        self.ops.push(OpRecord {
            op,
            item_type,
            id: id.to_string(),
        });
    }

    fn record(&self, id: &str, item_type: ItemType) -> Result<&Record, OrchError> {
        self.records
            .get(id)
            .filter(|record| record.handle.item_type == item_type)
            .ok_or_else(|| not_found(id, item_type))
    }

    fn record_mut(&mut self, id: &str, item_type: ItemType) -> Result<&mut Record, OrchError> {
        self.records
            .get_mut(id)
            .filter(|record| record.handle.item_type == item_type)
            .ok_or_else(|| not_found(id, item_type))
    }

    fn advance(&mut self, id: &str, item_type: ItemType) -> Result<EntityStatus, OrchError> {
        let record = self.record_mut(id, item_type)?;
        if record.status == EntityStatus::Created {
            return Ok(record.status);
        }
        if let Some(next) = record.pending.pop_front() {
            record.status = next;
            if next.is_terminal() {
                let outputs = std::mem::take(&mut record.outputs);
                record.files.extend(outputs);
            }
        }
        Ok(record.status)
    }
}

/// Backend keeping every item in memory.
pub struct MemoryBackend {
    name: String,
    state: Mutex<State>,
    registry: Arc<TaskRegistry>,
    capabilities: BTreeSet<String>,
    supported: BTreeSet<ItemType>,
    script: Arc<ScriptFn>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("name", &self.name)
            .field("items", &self.lock().records.len())
            .finish()
    }
}

impl MemoryBackend {
    /// Empty backend where every simulation succeeds.
    pub fn new() -> Self {
        Self {
            name: "memory".to_string(),
            state: Mutex::new(State::default()),
            registry: Arc::new(TaskRegistry::with_builtin()),
            capabilities: BTreeSet::new(),
            supported: ItemType::ALL.into_iter().collect(),
            script: Arc::new(|_: &Tags| SimulationScript::succeed()),
        }
    }

    /// Renames the backend.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Registry used to rebuild tasks.
    pub fn with_registry(mut self, registry: TaskRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Capability tags advertised to the requirements check.
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    /// Stops advertising support for `item_type`.
    pub fn without_item_type(mut self, item_type: ItemType) -> Self {
        self.supported.remove(&item_type);
        self
    }

    /// Chooses each started job's script from its tags.
    pub fn with_script<F>(mut self, script: F) -> Self
    where
        F: Fn(&Tags) -> SimulationScript + Send + Sync + 'static,
    {
        self.script = Arc::new(script);
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fails the next `count` experiment creations, with transient errors
    /// when `transient` is set.
    pub fn fail_next_experiment_creates(&self, count: usize, transient: bool) {
        let mut state = self.lock();
        state.experiment_faults = count;
        state.experiment_faults_transient = transient;
    }

    /// Fails the creation of simulations whose tags satisfy `matches`, at
    /// most `times` times in total.
    pub fn fail_simulation_creates_where<F>(&self, matches: F, times: usize)
    where
        F: Fn(&Tags) -> bool + Send + Sync + 'static,
    {
        self.lock().simulation_faults.push(SimulationFault {
            matches: Arc::new(matches),
            remaining: times,
        });
    }

    /// Times a blob with `checksum` was uploaded.
    pub fn upload_count(&self, checksum: &str) -> usize {
        self.lock().uploads.get(checksum).copied().unwrap_or(0)
    }

    /// Number of stored blobs.
    pub fn blob_count(&self) -> usize {
        self.lock().blobs.len()
    }

    /// Number of stored items of `item_type`.
    pub fn count(&self, item_type: ItemType) -> usize {
        self.lock()
            .records
            .values()
            .filter(|record| record.handle.item_type == item_type)
            .count()
    }

    /// Backend-side status of `id`.
    pub fn status_of(&self, id: &str) -> Option<EntityStatus> {
        self.lock().records.get(id).map(|record| record.status)
    }

    /// Every logged call, oldest first.
    pub fn op_log(&self) -> Vec<OpRecord> {
        self.lock().ops.clone()
    }

    fn insert<M: Serialize>(
        &self,
        id: String,
        item_type: ItemType,
        metadata: &M,
        parent: Option<(&str, ItemType)>,
        tags: &Tags,
        files: BTreeMap<String, Vec<u8>>,
    ) -> Result<PlatformObject, OrchError> {
        let handle = PlatformObject::new(id.clone(), item_type).with_payload(to_payload(metadata)?);
        let mut state = self.lock();
        if let Some((parent_id, parent_type)) = parent {
            state.record_mut(parent_id, parent_type)?.children.push(id.clone());
        }
        state.records.insert(
            id.clone(),
            Record {
                handle: handle.clone(),
                parent: parent.map(|(parent_id, _)| parent_id.to_string()),
                children: Vec::new(),
                tags: tags.clone(),
                status: EntityStatus::Created,
                pending: VecDeque::new(),
                files,
                outputs: BTreeMap::new(),
            },
        );
        state.log(OpKind::Create, item_type, &id);
        debug!(backend = %self.name, item_type = %item_type, id = %id, "item stored");
        Ok(handle)
    }

    fn handle(&self, id: &str, item_type: ItemType) -> Result<PlatformObject, OrchError> {
        self.lock().record(id, item_type).map(|record| record.handle.clone())
    }

    fn current_status(&self, handle: &PlatformObject) -> EntityStatus {
        self.lock()
            .records
            .get(&handle.id)
            .map(|record| record.status)
            .unwrap_or(EntityStatus::Created)
    }

    fn child_handles(&self, id: &str, item_type: ItemType) -> Result<Vec<PlatformObject>, OrchError> {
        let state = self.lock();
        let record = state.record(id, item_type)?;
        Ok(record
            .children
            .iter()
            .filter_map(|child| state.records.get(child))
            .map(|child| child.handle.clone())
            .collect())
    }

    fn parent_handle(&self, id: &str, item_type: ItemType) -> Result<Option<PlatformObject>, OrchError> {
        let state = self.lock();
        let record = state.record(id, item_type)?;
        Ok(record
            .parent
            .as_ref()
            .and_then(|parent| state.records.get(parent))
            .map(|parent| parent.handle.clone()))
    }

    fn start(&self, id: &str, item_type: ItemType) -> Result<(), OrchError> {
        let mut state = self.lock();
        let record = state.record_mut(id, item_type)?;
        if record.status != EntityStatus::Created {
            return Ok(());
        }
        let script = (self.script)(&record.tags);
        record.status = EntityStatus::Commissioning;
        record.pending = script.statuses.into();
        record.outputs = script.files;
        state.log(OpKind::Run, item_type, id);
        Ok(())
    }

    fn files(&self, id: &str, item_type: ItemType, paths: &[String]) -> Result<BTreeMap<String, Vec<u8>>, OrchError> {
        let state = self.lock();
        let record = state.record(id, item_type)?;
        paths
            .iter()
            .map(|path| {
                record
                    .files
                    .get(path)
                    .map(|content| (path.clone(), content.clone()))
                    .ok_or_else(|| missing_file(id, path))
            })
            .collect()
    }

    fn listing(&self, id: &str, item_type: ItemType) -> Result<Vec<AssetRecord>, OrchError> {
        let state = self.lock();
        let record = state.record(id, item_type)?;
        Ok(record
            .files
            .iter()
            .map(|(path, content)| {
                let (dir, file) = split_job_path(path);
                AssetRecord {
                    filename: file.to_string(),
                    relative_path: dir.to_string(),
                    checksum: md5_hex(content),
                    size: content.len() as u64,
                }
            })
            .collect())
    }

    fn cancel_item(&self, id: &str, item_type: ItemType) -> Result<EntityStatus, OrchError> {
        let mut state = self.lock();
        let record = state.record_mut(id, item_type)?;
        if !record.status.is_terminal() {
            record.status = EntityStatus::Failed;
            record.pending.clear();
        }
        let status = record.status;
        state.log(OpKind::Cancel, item_type, id);
        Ok(status)
    }

    fn log_refresh(&self, item_type: ItemType, id: &str) {
        self.lock().log(OpKind::Refresh, item_type, id);
    }
}

fn collect_files(collection: &AssetCollection) -> Result<BTreeMap<String, Vec<u8>>, OrchError> {
    collection
        .iter()
        .map(|asset| -> Result<(String, Vec<u8>), OrchError> { Ok((asset.job_path(), asset.bytes()?.to_vec())) })
        .collect()
}

impl ItemOperations<Suite> for MemoryBackend {
    fn item_type(&self) -> ItemType {
        ItemType::Suite
    }

    fn get(&self, id: &str) -> Result<PlatformObject, OrchError> {
        self.handle(id, ItemType::Suite)
    }

    fn create_item(&self, suite: &mut Suite) -> Result<PlatformObject, OrchError> {
        let id = new_item_id();
        let metadata = describe_suite(suite, &id);
        self.insert(id, ItemType::Suite, &metadata, None, &suite.tags, BTreeMap::new())
    }

    fn refresh_status(&self, suite: &mut Suite) -> Result<(), OrchError> {
        for experiment in suite.experiments_mut() {
            <Self as ItemOperations<Experiment>>::refresh_status(self, experiment)?;
        }
        Ok(())
    }

    fn to_entity(&self, handle: &PlatformObject) -> Result<Suite, OrchError> {
        expect_type(handle, ItemType::Suite)?;
        let mut metadata: SuiteMetadata = from_payload(handle)?;
        metadata.status = self.current_status(handle);
        Ok(Suite::from_metadata(&metadata, handle.clone()))
    }

    fn children(&self, id: &str) -> Result<Vec<PlatformObject>, OrchError> {
        self.child_handles(id, ItemType::Suite)
    }
}

impl ItemOperations<Experiment> for MemoryBackend {
    fn item_type(&self) -> ItemType {
        ItemType::Experiment
    }

    fn get(&self, id: &str) -> Result<PlatformObject, OrchError> {
        self.handle(id, ItemType::Experiment)
    }

    fn create_item(&self, experiment: &mut Experiment) -> Result<PlatformObject, OrchError> {
        {
            let mut state = self.lock();
            if state.experiment_faults > 0 {
                state.experiment_faults -= 1;
                let info = ErrorInfo::new("memory.experiment_create", "injected experiment create failure");
                return Err(if state.experiment_faults_transient {
                    OrchError::Transient(info)
                } else {
                    OrchError::BackendCreate(info)
                });
            }
        }
        let id = new_item_id();
        let metadata = describe_experiment(experiment, &id, &self.name)?;
        let parent = experiment.parent_id.as_deref().map(|parent| (parent, ItemType::Suite));
        self.insert(
            id,
            ItemType::Experiment,
            &metadata,
            parent,
            &experiment.tags,
            collect_files(&experiment.common_assets)?,
        )
    }

    fn run_item(&self, experiment: &mut Experiment) -> Result<(), OrchError> {
        let id = require_id(experiment.id(), ItemType::Experiment)?.to_string();
        for child in self.child_handles(&id, ItemType::Experiment)? {
            self.start(&child.id, ItemType::Simulation)?;
        }
        {
            let mut state = self.lock();
            state.record_mut(&id, ItemType::Experiment)?.status = EntityStatus::Commissioning;
            state.log(OpKind::Run, ItemType::Experiment, &id);
        }
        for simulation in experiment.simulations_mut() {
            if simulation.is_created() {
                simulation.observe_status(EntityStatus::Commissioning);
            }
        }
        Ok(())
    }

    fn refresh_status(&self, experiment: &mut Experiment) -> Result<(), OrchError> {
        let id = require_id(experiment.id(), ItemType::Experiment)?.to_string();
        self.log_refresh(ItemType::Experiment, &id);
        for simulation in experiment.simulations_mut() {
            if let Some(sim_id) = simulation.id() {
                let status = self.lock().advance(sim_id, ItemType::Simulation)?;
                simulation.observe_status(status);
            }
        }
        Ok(())
    }

    fn get_assets(&self, experiment: &Experiment, files: &[String]) -> Result<BTreeMap<String, Vec<u8>>, OrchError> {
        self.files(require_id(experiment.id(), ItemType::Experiment)?, ItemType::Experiment, files)
    }

    fn list_assets(&self, experiment: &Experiment) -> Result<Vec<AssetRecord>, OrchError> {
        self.listing(require_id(experiment.id(), ItemType::Experiment)?, ItemType::Experiment)
    }

    fn to_entity(&self, handle: &PlatformObject) -> Result<Experiment, OrchError> {
        expect_type(handle, ItemType::Experiment)?;
        let metadata: ExperimentMetadata = from_payload(handle)?;
        Ok(Experiment::from_metadata(&metadata, handle.clone()))
    }

    fn children(&self, id: &str) -> Result<Vec<PlatformObject>, OrchError> {
        self.child_handles(id, ItemType::Experiment)
    }

    fn parent(&self, id: &str) -> Result<Option<PlatformObject>, OrchError> {
        self.parent_handle(id, ItemType::Experiment)
    }

    fn cancel(&self, experiment: &mut Experiment) -> Result<(), OrchError> {
        for simulation in experiment.simulations_mut() {
            if let Some(id) = simulation.id().map(str::to_string) {
                let status = self.cancel_item(&id, ItemType::Simulation)?;
                simulation.observe_status(status);
            }
        }
        Ok(())
    }
}

impl ItemOperations<Simulation> for MemoryBackend {
    fn item_type(&self) -> ItemType {
        ItemType::Simulation
    }

    fn get(&self, id: &str) -> Result<PlatformObject, OrchError> {
        self.handle(id, ItemType::Simulation)
    }

    fn create_item(&self, simulation: &mut Simulation) -> Result<PlatformObject, OrchError> {
        {
            let mut state = self.lock();
            let fault = state
                .simulation_faults
                .iter_mut()
                .find(|fault| fault.remaining > 0 && (fault.matches)(&simulation.tags));
            if let Some(fault) = fault {
                fault.remaining -= 1;
                return Err(OrchError::BackendCreate(ErrorInfo::new(
                    "memory.simulation_create",
                    "injected simulation create failure",
                )));
            }
        }
        let id = new_item_id();
        let metadata = describe_simulation(simulation, &id, &self.name)?;
        let parent = simulation.parent_id.as_deref().map(|parent| (parent, ItemType::Experiment));
        self.insert(
            id,
            ItemType::Simulation,
            &metadata,
            parent,
            &simulation.tags,
            collect_files(simulation.assets())?,
        )
    }

    fn run_item(&self, simulation: &mut Simulation) -> Result<(), OrchError> {
        self.start(require_id(simulation.id(), ItemType::Simulation)?, ItemType::Simulation)?;
        simulation.observe_status(EntityStatus::Commissioning);
        Ok(())
    }

    fn refresh_status(&self, simulation: &mut Simulation) -> Result<(), OrchError> {
        let id = require_id(simulation.id(), ItemType::Simulation)?.to_string();
        let status = {
            let mut state = self.lock();
            state.log(OpKind::Refresh, ItemType::Simulation, &id);
            state.advance(&id, ItemType::Simulation)?
        };
        simulation.observe_status(status);
        Ok(())
    }

    fn get_assets(&self, simulation: &Simulation, files: &[String]) -> Result<BTreeMap<String, Vec<u8>>, OrchError> {
        self.files(require_id(simulation.id(), ItemType::Simulation)?, ItemType::Simulation, files)
    }

    fn list_assets(&self, simulation: &Simulation) -> Result<Vec<AssetRecord>, OrchError> {
        self.listing(require_id(simulation.id(), ItemType::Simulation)?, ItemType::Simulation)
    }

    fn to_entity(&self, handle: &PlatformObject) -> Result<Simulation, OrchError> {
        expect_type(handle, ItemType::Simulation)?;
        let mut metadata: SimulationMetadata = from_payload(handle)?;
        metadata.status = self.current_status(handle);
        Simulation::from_metadata(&metadata, &self.registry, handle.clone())
    }

    fn parent(&self, id: &str) -> Result<Option<PlatformObject>, OrchError> {
        self.parent_handle(id, ItemType::Simulation)
    }

    fn cancel(&self, simulation: &mut Simulation) -> Result<(), OrchError> {
        let status = self.cancel_item(require_id(simulation.id(), ItemType::Simulation)?, ItemType::Simulation)?;
        simulation.observe_status(status);
        Ok(())
    }
}

impl ItemOperations<AssetCollection> for MemoryBackend {
    fn item_type(&self) -> ItemType {
        ItemType::AssetCollection
    }

    fn get(&self, id: &str) -> Result<PlatformObject, OrchError> {
        self.handle(id, ItemType::AssetCollection)
    }

    fn create_item(&self, collection: &mut AssetCollection) -> Result<PlatformObject, OrchError> {
        let records = collection.records()?;
        {
            let state = self.lock();
            if let Some(record) = records.iter().find(|record| !state.blobs.contains_key(&record.checksum)) {
                return Err(OrchError::NotFound(
                    ErrorInfo::new("memory.blob_missing", "asset content was not uploaded")
                        .with_context("checksum", record.checksum.clone())
                        .with_context("filename", record.filename.clone()),
                ));
            }
        }
        let id = new_item_id();
        let metadata = CollectionMetadata {
            id: id.clone(),
            tags: collection.tags().clone(),
            assets: records,
        };
        self.insert(
            id,
            ItemType::AssetCollection,
            &metadata,
            None,
            collection.tags(),
            BTreeMap::new(),
        )
    }

    fn refresh_status(&self, _collection: &mut AssetCollection) -> Result<(), OrchError> {
        Ok(())
    }

    fn to_entity(&self, handle: &PlatformObject) -> Result<AssetCollection, OrchError> {
        expect_type(handle, ItemType::AssetCollection)?;
        let metadata: CollectionMetadata = from_payload(handle)?;
        let mut assets = Vec::with_capacity(metadata.assets.len());
        {
            let state = self.lock();
            for record in &metadata.assets {
                let content = state
                    .blobs
                    .get(&record.checksum)
                    .ok_or_else(|| missing_file(&handle.id, &record.filename))?;
                assets.push(Asset::from_content(
                    record.filename.clone(),
                    &record.relative_path,
                    content.to_vec(),
                )?);
            }
        }
        let mut collection = AssetCollection::from_assets(assets)?;
        collection.set_tags(metadata.tags)?;
        collection.set_id(handle.id.clone())?;
        collection.freeze();
        Ok(collection)
    }
}

impl ItemOperations<WorkItem> for MemoryBackend {
    fn item_type(&self) -> ItemType {
        ItemType::WorkItem
    }

    fn get(&self, id: &str) -> Result<PlatformObject, OrchError> {
        self.handle(id, ItemType::WorkItem)
    }

    fn create_item(&self, item: &mut WorkItem) -> Result<PlatformObject, OrchError> {
        let id = new_item_id();
        let metadata = describe_work_item(item, &id)?;
        self.insert(
            id,
            ItemType::WorkItem,
            &metadata,
            None,
            &item.tags,
            collect_files(&item.assets)?,
        )
    }

    fn run_item(&self, item: &mut WorkItem) -> Result<(), OrchError> {
        self.start(require_id(item.id(), ItemType::WorkItem)?, ItemType::WorkItem)?;
        item.observe_status(EntityStatus::Commissioning);
        Ok(())
    }

    fn refresh_status(&self, item: &mut WorkItem) -> Result<(), OrchError> {
        let id = require_id(item.id(), ItemType::WorkItem)?.to_string();
        let status = {
            let mut state = self.lock();
            state.log(OpKind::Refresh, ItemType::WorkItem, &id);
            state.advance(&id, ItemType::WorkItem)?
        };
        item.observe_status(status);
        Ok(())
    }

    fn get_assets(&self, item: &WorkItem, files: &[String]) -> Result<BTreeMap<String, Vec<u8>>, OrchError> {
        self.files(require_id(item.id(), ItemType::WorkItem)?, ItemType::WorkItem, files)
    }

    fn list_assets(&self, item: &WorkItem) -> Result<Vec<AssetRecord>, OrchError> {
        self.listing(require_id(item.id(), ItemType::WorkItem)?, ItemType::WorkItem)
    }

    fn to_entity(&self, handle: &PlatformObject) -> Result<WorkItem, OrchError> {
        expect_type(handle, ItemType::WorkItem)?;
        let mut metadata: WorkItemMetadata = from_payload(handle)?;
        metadata.status = self.current_status(handle);
        WorkItem::from_metadata(&metadata, handle.clone())
    }

    fn cancel(&self, item: &mut WorkItem) -> Result<(), OrchError> {
        let status = self.cancel_item(require_id(item.id(), ItemType::WorkItem)?, ItemType::WorkItem)?;
        item.observe_status(status);
        Ok(())
    }
}

impl BlobStore for MemoryBackend {
    fn contains(&self, checksum: &str) -> Result<bool, OrchError> {
        Ok(self.lock().blobs.contains_key(checksum))
    }

    fn put(&self, asset: &Asset) -> Result<(), OrchError> {
        let checksum = asset.checksum()?.to_string();
        let content = asset.bytes()?;
        let mut state = self.lock();
        state.blobs.insert(checksum.clone(), content);
        *state.uploads.entry(checksum.clone()).or_insert(0) += 1;
        state.log(OpKind::Upload, ItemType::AssetCollection, &checksum);
        Ok(())
    }
}

impl Backend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn suites(&self) -> &dyn ItemOperations<Suite> {
        self
    }

    fn experiments(&self) -> &dyn ItemOperations<Experiment> {
        self
    }

    fn simulations(&self) -> &dyn ItemOperations<Simulation> {
        self
    }

    fn asset_collections(&self) -> &dyn ItemOperations<AssetCollection> {
        self
    }

    fn work_items(&self) -> &dyn ItemOperations<WorkItem> {
        self
    }

    fn blobs(&self) -> &dyn BlobStore {
        self
    }

    fn supported_types(&self) -> BTreeSet<ItemType> {
        self.supported.clone()
    }

    fn capabilities(&self) -> BTreeSet<String> {
        self.capabilities.clone()
    }
}
