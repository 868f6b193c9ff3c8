//! Local job-directory backend.
//!
//! Layout under the root directory:
//!
//! ```text
//! .blobs/<md5>                      content-addressed asset store
//! .index/<id>.json                  one descriptor per item
//! <suite>/<experiment>/Assets/      common assets
//! <suite>/<experiment>/<simulation>/ transient assets, config, job output
//! work_items/<id>/                  work item directories
//! ```
//!
//! Jobs run as shell commands on a bounded worker pool. Each job directory
//! receives `stdout.txt`, `stderr.txt` and `job_status.txt` (`100` running,
//! `0` succeeded, `-1` failed).

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use chrono::Utc;
use orch_assets::{normalize_relative_path, Asset, AssetCollection, AssetRecord};
use orch_core::errors::{io_error, serde_error, ErrorInfo, OrchError};
use orch_core::hash::md5_file;
use orch_core::ids::{new_item_id, ItemType, PlatformObject};
use orch_core::serde::to_canonical_json_pretty;
use orch_core::status::EntityStatus;
use orch_entities::{
    Experiment, ExperimentMetadata, Simulation, SimulationMetadata, Suite, SuiteMetadata, WorkItem, WorkItemMetadata,
};
use orch_task::TaskRegistry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::{
    describe_experiment, describe_simulation, describe_suite, describe_work_item, expect_type, missing_file,
    not_found, require_id, to_payload, CollectionMetadata,
};
use crate::config::MetadataConfig;
use crate::operations::{Backend, BlobStore, ItemOperations};

const BLOB_DIR: &str = ".blobs";
const INDEX_DIR: &str = ".index";
const WORK_ITEM_DIR: &str = "work_items";
const ASSETS_DIR: &str = "Assets";
const STATUS_FILE: &str = "job_status.txt";
const STDOUT_FILE: &str = "stdout.txt";
const STDERR_FILE: &str = "stderr.txt";
const SIMULATION_METADATA_FILE: &str = "simulation_metadata.json";
const EXPERIMENT_METADATA_FILE: &str = "experiment_metadata.json";

const STATUS_RUNNING: &str = "100";
const STATUS_SUCCEEDED: &str = "0";
const STATUS_FAILED: &str = "-1";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    item_type: ItemType,
    #[serde(default)]
    dir: Option<PathBuf>,
    #[serde(default)]
    parent: Option<String>,
    #[serde(default)]
    children: Vec<String>,
    #[serde(default)]
    command: Option<String>,
    metadata: Value,
}

fn ensure_dir(path: &Path) -> Result<(), OrchError> {
    fs::create_dir_all(path).map_err(|err| io_error("file.mkdir", path.display(), err))
}

fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), OrchError> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let name = path.file_name().and_then(|s| s.to_str()).unwrap_or("tmpfile");
    let tmp = path.with_file_name(format!(".{}.tmp.{}.{}", name, std::process::id(), Utc::now().timestamp_micros()));
    let write = || -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    };
    write().map_err(|err| io_error("file.write", path.display(), err))
}

fn write_status(dir: &Path, code: &str) -> Result<(), OrchError> {
    atomic_write(&dir.join(STATUS_FILE), code.as_bytes())
}

fn read_status(dir: &Path) -> Result<Option<EntityStatus>, OrchError> {
    let path = dir.join(STATUS_FILE);
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_error("file.status", path.display(), err)),
    };
    Ok(match text.trim() {
        STATUS_RUNNING => Some(EntityStatus::Running),
        STATUS_SUCCEEDED => Some(EntityStatus::Succeeded),
        STATUS_FAILED => Some(EntityStatus::Failed),
        other => {
            warn!(path = %path.display(), code = other, "unknown job status code");
            None
        }
    })
}

fn shell(command: &str) -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }
}

fn execute(dir: &Path, command: &str) -> Result<bool, OrchError> {
    write_status(dir, STATUS_RUNNING)?;
    let stdout_path = dir.join(STDOUT_FILE);
    let stderr_path = dir.join(STDERR_FILE);
    let stdout = fs::File::create(&stdout_path).map_err(|err| io_error("file.stdout", stdout_path.display(), err))?;
    let stderr = fs::File::create(&stderr_path).map_err(|err| io_error("file.stderr", stderr_path.display(), err))?;
    let status = shell(command)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .status()
        .map_err(|err| io_error("file.spawn", dir.display(), err))?;
    Ok(status.success())
}

fn run_job(dir: PathBuf, command: String) {
    let code = match execute(&dir, &command) {
        Ok(true) => STATUS_SUCCEEDED,
        Ok(false) => STATUS_FAILED,
        Err(err) => {
            warn!(dir = %dir.display(), error = %err, "job could not be executed");
            STATUS_FAILED
        }
    };
    if let Err(err) = write_status(&dir, code) {
        warn!(dir = %dir.display(), error = %err, "job status could not be written");
    }
    debug!(dir = %dir.display(), code, "job finished");
}

fn write_assets(dir: &Path, collection: &AssetCollection) -> Result<(), OrchError> {
    for asset in collection.iter() {
        atomic_write(&dir.join(asset.job_path()), &asset.bytes()?)?;
    }
    Ok(())
}

#[derive(Default)]
struct InFlight {
    jobs: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    fn count(&self) -> MutexGuard<'_, usize> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn enter(&self) {
        *self.count() += 1;
    }

    fn leave(&self) {
        let mut jobs = self.count();
        *jobs = jobs.saturating_sub(1);
        if *jobs == 0 {
            self.idle.notify_all();
        }
    }

    fn wait_idle(&self) {
        let mut jobs = self.count();
        while *jobs > 0 {
            jobs = self.idle.wait(jobs).unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }
}

/// Backend writing job directories on the local filesystem and running each
/// job as a local process.
pub struct FileBackend {
    name: String,
    root: PathBuf,
    registry: Arc<TaskRegistry>,
    metadata: MetadataConfig,
    capabilities: BTreeSet<String>,
    workers: Arc<rayon::ThreadPool>,
    inflight: Arc<InFlight>,
    index_lock: Mutex<()>,
}

impl std::fmt::Debug for FileBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBackend")
            .field("name", &self.name)
            .field("root", &self.root)
            .field("workers", &self.workers.current_num_threads())
            .finish()
    }
}

fn build_pool(workers: usize) -> Result<rayon::ThreadPool, OrchError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|idx| format!("orch-job-{idx}"))
        .build()
        .map_err(|err| OrchError::Io(ErrorInfo::new("file.thread_pool", err.to_string())))
}

impl FileBackend {
    /// Backend rooted at `root`, created when missing. Jobs run on one worker
    /// per available CPU.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, OrchError> {
        let root = root.into();
        ensure_dir(&root.join(BLOB_DIR))?;
        ensure_dir(&root.join(INDEX_DIR))?;
        let workers = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Ok(Self {
            name: "file".to_string(),
            root,
            registry: Arc::new(TaskRegistry::with_builtin()),
            metadata: MetadataConfig::default(),
            capabilities: ["local".to_string(), std::env::consts::OS.to_string()].into_iter().collect(),
            workers: Arc::new(build_pool(workers)?),
            inflight: Arc::new(InFlight::default()),
            index_lock: Mutex::new(()),
        })
    }

    /// Limits the number of jobs running at once.
    pub fn with_workers(mut self, workers: usize) -> Result<Self, OrchError> {
        self.workers = Arc::new(build_pool(workers)?);
        Ok(self)
    }

    /// Chooses which metadata descriptors are written into job directories.
    pub fn with_metadata(mut self, metadata: MetadataConfig) -> Self {
        self.metadata = metadata;
        self
    }

    /// Registry used to rebuild tasks.
    pub fn with_registry(mut self, registry: TaskRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Blocks until every job started by this backend has finished.
    pub fn wait_idle(&self) {
        self.inflight.wait_idle();
    }

    /// Job directory of a stored item.
    pub fn job_dir(&self, id: &str) -> Result<PathBuf, OrchError> {
        let entry = self.read_entry(id)?;
        entry
            .dir
            .map(|dir| self.root.join(dir))
            .ok_or_else(|| not_found(id, entry.item_type))
    }

    fn lock_index(&self) -> MutexGuard<'_, ()> {
        self.index_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn entry_path(&self, id: &str) -> PathBuf {
        self.root.join(INDEX_DIR).join(format!("{id}.json"))
    }

    fn read_entry(&self, id: &str) -> Result<IndexEntry, OrchError> {
        let path = self.entry_path(id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(OrchError::NotFound(
                    ErrorInfo::new("file.not_found", "no such item").with_entity(id),
                ))
            }
            Err(err) => return Err(io_error("file.index_read", path.display(), err)),
        };
        serde_json::from_slice(&bytes).map_err(|err| serde_error("file.index", err).for_entity(id))
    }

    fn entry_of(&self, id: &str, item_type: ItemType) -> Result<IndexEntry, OrchError> {
        let entry = self.read_entry(id)?;
        if entry.item_type != item_type {
            return Err(not_found(id, item_type));
        }
        Ok(entry)
    }

    fn write_entry(&self, id: &str, entry: &IndexEntry) -> Result<(), OrchError> {
        let bytes = serde_json::to_vec_pretty(entry).map_err(|err| serde_error("file.index", err))?;
        atomic_write(&self.entry_path(id), &bytes)
    }

    fn handle_of(id: &str, entry: &IndexEntry) -> PlatformObject {
        PlatformObject::new(id, entry.item_type).with_payload(entry.metadata.clone())
    }

    fn handle(&self, id: &str, item_type: ItemType) -> Result<PlatformObject, OrchError> {
        let entry = self.entry_of(id, item_type)?;
        Ok(Self::handle_of(id, &entry))
    }

    /// Stores an index entry and links it under its parent.
    fn register(&self, id: &str, entry: IndexEntry, parent_type: ItemType) -> Result<PlatformObject, OrchError> {
        let _guard = self.lock_index();
        if let Some(parent) = &entry.parent {
            let mut parent_entry = self.entry_of(parent, parent_type)?;
            parent_entry.children.push(id.to_string());
            self.write_entry(parent, &parent_entry)?;
        }
        self.write_entry(id, &entry)?;
        debug!(item_type = %entry.item_type, id, "item indexed");
        Ok(Self::handle_of(id, &entry))
    }

    fn parent_dir(&self, parent: Option<&str>) -> Result<PathBuf, OrchError> {
        match parent {
            Some(parent) => self.job_dir(parent),
            None => Ok(self.root.clone()),
        }
    }

    fn relative(&self, dir: &Path) -> PathBuf {
        dir.strip_prefix(&self.root).map(Path::to_path_buf).unwrap_or_else(|_| dir.to_path_buf())
    }

    fn child_handles(&self, id: &str, item_type: ItemType) -> Result<Vec<PlatformObject>, OrchError> {
        let entry = self.entry_of(id, item_type)?;
        entry
            .children
            .iter()
            .map(|child| self.read_entry(child).map(|child_entry| Self::handle_of(child, &child_entry)))
            .collect()
    }

    fn parent_handle(&self, id: &str, item_type: ItemType) -> Result<Option<PlatformObject>, OrchError> {
        let entry = self.entry_of(id, item_type)?;
        match entry.parent {
            Some(parent) => {
                let parent_entry = self.read_entry(&parent)?;
                Ok(Some(Self::handle_of(&parent, &parent_entry)))
            }
            None => Ok(None),
        }
    }

    fn start(&self, id: &str) -> Result<bool, OrchError> {
        let dir = self.job_dir(id)?;
        if dir.join(STATUS_FILE).exists() {
            return Ok(false);
        }
        let entry = self.read_entry(id)?;
        let command = entry.command.unwrap_or_default();
        if command.trim().is_empty() {
            return Err(OrchError::Invalid(
                ErrorInfo::new("file.no_command", "item has no command to run").with_entity(id),
            ));
        }
        write_status(&dir, STATUS_RUNNING)?;
        let inflight = Arc::clone(&self.inflight);
        inflight.enter();
        self.workers.spawn(move || {
            run_job(dir, command);
            inflight.leave();
        });
        Ok(true)
    }

    fn files(&self, id: &str, paths: &[String]) -> Result<BTreeMap<String, Vec<u8>>, OrchError> {
        let dir = self.job_dir(id)?;
        paths
            .iter()
            .map(|path| {
                let relative = normalize_relative_path(path).map_err(|err| err.for_entity(id))?;
                if relative.is_empty() {
                    return Err(OrchError::Invalid(
                        ErrorInfo::new("file.path", "requested file path is empty").with_entity(id),
                    ));
                }
                let full = dir.join(&relative);
                match fs::read(&full) {
                    Ok(content) => Ok((path.clone(), content)),
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(missing_file(id, path)),
                    Err(err) => Err(io_error("file.read", full.display(), err)),
                }
            })
            .collect()
    }

    fn listing(&self, id: &str) -> Result<Vec<AssetRecord>, OrchError> {
        let dir = self.job_dir(id)?;
        let mut records = Vec::new();
        for entry in WalkDir::new(&dir).sort_by_file_name() {
            let entry = entry.map_err(|err| io_error("file.walk", dir.display(), err))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let relative = entry
                .path()
                .parent()
                .and_then(|parent| parent.strip_prefix(&dir).ok())
                .map(|parent| parent.to_string_lossy().replace('\\', "/"))
                .unwrap_or_default();
            let size = entry
                .metadata()
                .map_err(|err| io_error("file.stat", entry.path().display(), err))?
                .len();
            records.push(AssetRecord {
                filename: name,
                relative_path: relative,
                checksum: md5_file(entry.path())?,
                size,
            });
        }
        Ok(records)
    }

    fn observed_status(&self, id: &str) -> Result<Option<EntityStatus>, OrchError> {
        read_status(&self.job_dir(id)?)
    }

    fn blob_path(&self, checksum: &str) -> PathBuf {
        self.root.join(BLOB_DIR).join(checksum)
    }

    fn metadata_of<T: serde::de::DeserializeOwned>(handle: &PlatformObject) -> Result<T, OrchError> {
        serde_json::from_value(handle.payload.clone())
            .map_err(|err| serde_error("file.metadata", err).for_entity(handle.id.clone()))
    }
}

impl ItemOperations<Suite> for FileBackend {
    fn item_type(&self) -> ItemType {
        ItemType::Suite
    }

    fn get(&self, id: &str) -> Result<PlatformObject, OrchError> {
        self.handle(id, ItemType::Suite)
    }

    fn create_item(&self, suite: &mut Suite) -> Result<PlatformObject, OrchError> {
        let id = new_item_id();
        let dir = self.root.join(&id);
        ensure_dir(&dir)?;
        let entry = IndexEntry {
            item_type: ItemType::Suite,
            dir: Some(self.relative(&dir)),
            parent: None,
            children: Vec::new(),
            command: None,
            metadata: to_payload(&describe_suite(suite, &id))?,
        };
        self.register(&id, entry, ItemType::Suite)
    }

    fn refresh_status(&self, suite: &mut Suite) -> Result<(), OrchError> {
        for experiment in suite.experiments_mut() {
            <Self as ItemOperations<Experiment>>::refresh_status(self, experiment)?;
        }
        Ok(())
    }

    fn to_entity(&self, handle: &PlatformObject) -> Result<Suite, OrchError> {
        expect_type(handle, ItemType::Suite)?;
        let metadata: SuiteMetadata = Self::metadata_of(handle)?;
        Ok(Suite::from_metadata(&metadata, handle.clone()))
    }

    fn children(&self, id: &str) -> Result<Vec<PlatformObject>, OrchError> {
        self.child_handles(id, ItemType::Suite)
    }
}

impl ItemOperations<Experiment> for FileBackend {
    fn item_type(&self) -> ItemType {
        ItemType::Experiment
    }

    fn get(&self, id: &str) -> Result<PlatformObject, OrchError> {
        self.handle(id, ItemType::Experiment)
    }

    fn create_item(&self, experiment: &mut Experiment) -> Result<PlatformObject, OrchError> {
        let id = new_item_id();
        let dir = self.parent_dir(experiment.parent_id.as_deref())?.join(&id);
        ensure_dir(&dir)?;
        write_assets(&dir.join(ASSETS_DIR), &experiment.common_assets)?;
        let metadata = describe_experiment(experiment, &id, &self.name)?;
        if self.metadata.experiment {
            atomic_write(&dir.join(EXPERIMENT_METADATA_FILE), to_canonical_json_pretty(&metadata)?.as_bytes())?;
        }
        let entry = IndexEntry {
            item_type: ItemType::Experiment,
            dir: Some(self.relative(&dir)),
            parent: experiment.parent_id.clone(),
            children: Vec::new(),
            command: None,
            metadata: to_payload(&metadata)?,
        };
        self.register(&id, entry, ItemType::Suite)
    }

    fn run_item(&self, experiment: &mut Experiment) -> Result<(), OrchError> {
        let id = require_id(experiment.id(), ItemType::Experiment)?.to_string();
        let mut started = 0;
        for child in self.child_handles(&id, ItemType::Experiment)? {
            if self.start(&child.id)? {
                started += 1;
            }
        }
        debug!(experiment = %id, started, "jobs queued");
        for simulation in experiment.simulations_mut() {
            if simulation.is_created() {
                simulation.observe_status(EntityStatus::Commissioning);
            }
        }
        Ok(())
    }

    fn refresh_status(&self, experiment: &mut Experiment) -> Result<(), OrchError> {
        for simulation in experiment.simulations_mut() {
            let observed = match simulation.id() {
                Some(id) => self.observed_status(id)?,
                None => None,
            };
            if let Some(status) = observed {
                simulation.observe_status(status);
            }
        }
        Ok(())
    }

    fn get_assets(&self, experiment: &Experiment, files: &[String]) -> Result<BTreeMap<String, Vec<u8>>, OrchError> {
        self.files(require_id(experiment.id(), ItemType::Experiment)?, files)
    }

    fn list_assets(&self, experiment: &Experiment) -> Result<Vec<AssetRecord>, OrchError> {
        let id = require_id(experiment.id(), ItemType::Experiment)?;
        let children: BTreeSet<String> = self.entry_of(id, ItemType::Experiment)?.children.into_iter().collect();
        Ok(self
            .listing(id)?
            .into_iter()
            .filter(|record| {
                let top = record.relative_path.split('/').next().unwrap_or_default();
                !children.contains(top)
            })
            .collect())
    }

    fn to_entity(&self, handle: &PlatformObject) -> Result<Experiment, OrchError> {
        expect_type(handle, ItemType::Experiment)?;
        let metadata: ExperimentMetadata = Self::metadata_of(handle)?;
        Ok(Experiment::from_metadata(&metadata, handle.clone()))
    }

    fn children(&self, id: &str) -> Result<Vec<PlatformObject>, OrchError> {
        self.child_handles(id, ItemType::Experiment)
    }

    fn parent(&self, id: &str) -> Result<Option<PlatformObject>, OrchError> {
        self.parent_handle(id, ItemType::Experiment)
    }
}

impl ItemOperations<Simulation> for FileBackend {
    fn item_type(&self) -> ItemType {
        ItemType::Simulation
    }

    fn get(&self, id: &str) -> Result<PlatformObject, OrchError> {
        self.handle(id, ItemType::Simulation)
    }

    fn create_item(&self, simulation: &mut Simulation) -> Result<PlatformObject, OrchError> {
        let parent = simulation.parent_id.as_deref().ok_or_else(|| {
            OrchError::Invalid(ErrorInfo::new("file.orphan", "simulation has no parent experiment"))
        })?;
        let id = new_item_id();
        let dir = self.job_dir(parent)?.join(&id);
        ensure_dir(&dir)?;
        write_assets(&dir, simulation.assets())?;
        let metadata = describe_simulation(simulation, &id, &self.name)?;
        if self.metadata.simulation {
            atomic_write(&dir.join(SIMULATION_METADATA_FILE), to_canonical_json_pretty(&metadata)?.as_bytes())?;
        }
        let entry = IndexEntry {
            item_type: ItemType::Simulation,
            dir: Some(self.relative(&dir)),
            parent: Some(parent.to_string()),
            children: Vec::new(),
            command: Some(simulation.task.command().cmd()),
            metadata: to_payload(&metadata)?,
        };
        self.register(&id, entry, ItemType::Experiment)
    }

    fn run_item(&self, simulation: &mut Simulation) -> Result<(), OrchError> {
        self.start(require_id(simulation.id(), ItemType::Simulation)?)?;
        simulation.observe_status(EntityStatus::Commissioning);
        Ok(())
    }

    fn refresh_status(&self, simulation: &mut Simulation) -> Result<(), OrchError> {
        if let Some(status) = self.observed_status(require_id(simulation.id(), ItemType::Simulation)?)? {
            simulation.observe_status(status);
        }
        Ok(())
    }

    fn get_assets(&self, simulation: &Simulation, files: &[String]) -> Result<BTreeMap<String, Vec<u8>>, OrchError> {
        self.files(require_id(simulation.id(), ItemType::Simulation)?, files)
    }

    fn list_assets(&self, simulation: &Simulation) -> Result<Vec<AssetRecord>, OrchError> {
        self.listing(require_id(simulation.id(), ItemType::Simulation)?)
    }

    fn to_entity(&self, handle: &PlatformObject) -> Result<Simulation, OrchError> {
        expect_type(handle, ItemType::Simulation)?;
        let mut metadata: SimulationMetadata = Self::metadata_of(handle)?;
        if let Some(status) = self.observed_status(&handle.id)? {
            metadata.status = status;
        }
        Simulation::from_metadata(&metadata, &self.registry, handle.clone())
    }

    fn parent(&self, id: &str) -> Result<Option<PlatformObject>, OrchError> {
        self.parent_handle(id, ItemType::Simulation)
    }
}

impl ItemOperations<AssetCollection> for FileBackend {
    fn item_type(&self) -> ItemType {
        ItemType::AssetCollection
    }

    fn get(&self, id: &str) -> Result<PlatformObject, OrchError> {
        self.handle(id, ItemType::AssetCollection)
    }

    fn create_item(&self, collection: &mut AssetCollection) -> Result<PlatformObject, OrchError> {
        let records = collection.records()?;
        if let Some(record) = records.iter().find(|record| !self.blob_path(&record.checksum).exists()) {
            return Err(OrchError::NotFound(
                ErrorInfo::new("file.blob_missing", "asset content was not uploaded")
                    .with_context("checksum", record.checksum.clone())
                    .with_context("filename", record.filename.clone()),
            ));
        }
        let id = new_item_id();
        let metadata = CollectionMetadata {
            id: id.clone(),
            tags: collection.tags().clone(),
            assets: records,
        };
        let entry = IndexEntry {
            item_type: ItemType::AssetCollection,
            dir: None,
            parent: None,
            children: Vec::new(),
            command: None,
            metadata: to_payload(&metadata)?,
        };
        self.register(&id, entry, ItemType::AssetCollection)
    }

    fn refresh_status(&self, _collection: &mut AssetCollection) -> Result<(), OrchError> {
        Ok(())
    }

    fn to_entity(&self, handle: &PlatformObject) -> Result<AssetCollection, OrchError> {
        expect_type(handle, ItemType::AssetCollection)?;
        let metadata: CollectionMetadata = Self::metadata_of(handle)?;
        let assets = metadata
            .assets
            .iter()
            .map(|record| Asset::from_path_named(self.blob_path(&record.checksum), record.filename.clone(), &record.relative_path))
            .collect::<Result<Vec<_>, _>>()?;
        let mut collection = AssetCollection::from_assets(assets)?;
        collection.set_tags(metadata.tags)?;
        collection.set_id(handle.id.clone())?;
        collection.freeze();
        Ok(collection)
    }
}

impl ItemOperations<WorkItem> for FileBackend {
    fn item_type(&self) -> ItemType {
        ItemType::WorkItem
    }

    fn get(&self, id: &str) -> Result<PlatformObject, OrchError> {
        self.handle(id, ItemType::WorkItem)
    }

    fn create_item(&self, item: &mut WorkItem) -> Result<PlatformObject, OrchError> {
        let id = new_item_id();
        let dir = self.root.join(WORK_ITEM_DIR).join(&id);
        ensure_dir(&dir)?;
        write_assets(&dir, &item.assets)?;
        let entry = IndexEntry {
            item_type: ItemType::WorkItem,
            dir: Some(self.relative(&dir)),
            parent: None,
            children: Vec::new(),
            command: Some(item.command.cmd()),
            metadata: to_payload(&describe_work_item(item, &id)?)?,
        };
        self.register(&id, entry, ItemType::WorkItem)
    }

    fn run_item(&self, item: &mut WorkItem) -> Result<(), OrchError> {
        self.start(require_id(item.id(), ItemType::WorkItem)?)?;
        item.observe_status(EntityStatus::Commissioning);
        Ok(())
    }

    fn refresh_status(&self, item: &mut WorkItem) -> Result<(), OrchError> {
        if let Some(status) = self.observed_status(require_id(item.id(), ItemType::WorkItem)?)? {
            item.observe_status(status);
        }
        Ok(())
    }

    fn get_assets(&self, item: &WorkItem, files: &[String]) -> Result<BTreeMap<String, Vec<u8>>, OrchError> {
        self.files(require_id(item.id(), ItemType::WorkItem)?, files)
    }

    fn list_assets(&self, item: &WorkItem) -> Result<Vec<AssetRecord>, OrchError> {
        self.listing(require_id(item.id(), ItemType::WorkItem)?)
    }

    fn to_entity(&self, handle: &PlatformObject) -> Result<WorkItem, OrchError> {
        expect_type(handle, ItemType::WorkItem)?;
        let mut metadata: WorkItemMetadata = Self::metadata_of(handle)?;
        if let Some(status) = self.observed_status(&handle.id)? {
            metadata.status = status;
        }
        WorkItem::from_metadata(&metadata, handle.clone())
    }
}

impl BlobStore for FileBackend {
    fn contains(&self, checksum: &str) -> Result<bool, OrchError> {
        Ok(self.blob_path(checksum).is_file())
    }

    fn put(&self, asset: &Asset) -> Result<(), OrchError> {
        let path = self.blob_path(asset.checksum()?);
        atomic_write(&path, &asset.bytes()?)
    }
}

impl Backend for FileBackend {
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

    fn capabilities(&self) -> BTreeSet<String> {
        self.capabilities.clone()
    }
}
