//! Experiments: a named batch of simulations sharing one asset collection.
//!
//! Simulations come from a list, a template or a one-shot generator. A
//! template is materialized into a list the first time the experiment is created.

use std::fmt;

use orch_assets::AssetCollection;
use orch_core::errors::{invalid, ErrorInfo, OrchError};
use orch_core::ids::{Identified, ItemType, PlatformObject};
use orch_core::status::{EntityStatus, StatusSummary, Transition};
use orch_core::tags::Tags;
use orch_task::{Task, TASK_TYPE_TAG};
use tracing::debug;

use crate::lifecycle::apply_status;
use crate::metadata::ExperimentMetadata;
use crate::simulation::Simulation;
use crate::templated::{TemplatedIter, TemplatedSimulations};

type BoxedSimulations = Box<dyn Iterator<Item = Simulation> + Send>;

/// Where an experiment's simulations come from.
pub enum SimulationSource {
    /// Materialized simulations.
    List(Vec<Simulation>),
    /// Lazy, restartable sweep.
    Templated(TemplatedSimulations),
    /// One-shot producer. The first item is peeked for asset sampling and
    /// the producer is consumed exactly once.
    Generator {
        /// Item taken ahead of time by [`Experiment::sample_task`].
        peeked: Option<Box<Simulation>>,
        /// Remaining producer; `None` once consumed.
        rest: Option<BoxedSimulations>,
    },
}

impl fmt::Debug for SimulationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimulationSource::List(list) => f.debug_tuple("List").field(&list.len()).finish(),
            SimulationSource::Templated(template) => f.debug_tuple("Templated").field(template).finish(),
            SimulationSource::Generator { rest, .. } => f
                .debug_struct("Generator")
                .field("consumed", &rest.is_none())
                .finish(),
        }
    }
}

/// Owned stream of not-yet-created simulations handed to the driver.
pub enum PendingSimulations {
    /// Materialized simulations.
    List(std::vec::IntoIter<Simulation>),
    /// Lazy sweep.
    Templated(TemplatedIter<'static>),
    /// One-shot producer.
    Generator(std::iter::Chain<std::option::IntoIter<Simulation>, BoxedSimulations>),
}

impl Iterator for PendingSimulations {
    type Item = Result<Simulation, OrchError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            PendingSimulations::List(iter) => iter.next().map(Ok),
            PendingSimulations::Templated(iter) => iter.next(),
            PendingSimulations::Generator(iter) => iter.next().map(Ok),
        }
    }
}

impl fmt::Debug for PendingSimulations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PendingSimulations::List(iter) => f.debug_tuple("List").field(&iter.len()).finish(),
            PendingSimulations::Templated(iter) => f.debug_tuple("Templated").field(&iter.len()).finish(),
            PendingSimulations::Generator(_) => f.write_str("Generator"),
        }
    }
}

/// A set of simulations sharing one common asset collection.
#[derive(Debug)]
pub struct Experiment {
    id: Option<String>,
    /// Parent suite id.
    pub parent_id: Option<String>,
    /// Display name.
    pub name: String,
    /// Tags; inherited by every simulation the experiment produces.
    pub tags: Tags,
    /// Experiment-level assets, merged with the tasks' common assets.
    pub common_assets: AssetCollection,
    simulations: SimulationSource,
    status: EntityStatus,
    platform_object: Option<PlatformObject>,
    assets_id: Option<String>,
    /// Set while a driver holds the pending simulations.
    started: bool,
    generator_consumed: bool,
}

impl Experiment {
    fn with_source(name: impl Into<String>, simulations: SimulationSource) -> Self {
        Self {
            id: None,
            parent_id: None,
            name: name.into(),
            tags: Tags::new(),
            common_assets: AssetCollection::new(),
            simulations,
            status: EntityStatus::Created,
            platform_object: None,
            assets_id: None,
            started: false,
            generator_consumed: false,
        }
    }

    /// Experiment with no simulations yet.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_source(name, SimulationSource::List(Vec::new()))
    }

    /// Experiment running a single simulation of `task`.
    pub fn from_task(name: impl Into<String>, task: Box<dyn Task>) -> Self {
        Self::with_source(name, SimulationSource::List(vec![Simulation::new(task)]))
    }

    /// Experiment over a lazy sweep.
    pub fn from_template(name: impl Into<String>, template: TemplatedSimulations) -> Self {
        Self::with_source(name, SimulationSource::Templated(template))
    }

    /// Experiment over materialized simulations.
    pub fn from_simulations(name: impl Into<String>, simulations: Vec<Simulation>) -> Self {
        Self::with_source(name, SimulationSource::List(simulations))
    }

    /// Experiment over a one-shot producer.
    pub fn from_generator<I>(name: impl Into<String>, simulations: I) -> Self
    where
        I: Iterator<Item = Simulation> + Send + 'static,
    {
        Self::with_source(
            name,
            SimulationSource::Generator {
                peeked: None,
                rest: Some(Box::new(simulations)),
            },
        )
    }

    /// Rebuilds a persisted experiment from metadata; simulations are loaded
    /// separately.
    pub fn from_metadata(metadata: &ExperimentMetadata, handle: PlatformObject) -> Self {
        let mut experiment = Self::new(metadata.name.clone());
        experiment.id = Some(metadata.id.clone());
        experiment.parent_id = metadata.parent_id.clone();
        experiment.tags = metadata.tags.clone();
        experiment.status = metadata.status;
        experiment.assets_id = metadata.assets_id.clone();
        experiment.platform_object = Some(handle);
        experiment
    }

    /// Backend id.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Cached backend handle.
    pub fn platform_object(&self) -> Option<&PlatformObject> {
        self.platform_object.as_ref()
    }

    /// Id of the persisted common asset collection.
    pub fn assets_id(&self) -> Option<&str> {
        self.assets_id.as_deref()
    }

    /// Records the persisted common asset collection.
    pub fn set_assets_id(&mut self, id: impl Into<String>) {
        self.assets_id = Some(id.into());
    }

    /// Records a successful backend creation.
    pub fn mark_created(&mut self, handle: PlatformObject) {
        self.id = Some(handle.id.clone());
        self.platform_object = Some(handle);
    }

    /// Simulation source.
    pub fn source(&self) -> &SimulationSource {
        &self.simulations
    }

    /// Materialized simulations; empty for a lazy source that was not run.
    pub fn simulations(&self) -> &[Simulation] {
        match &self.simulations {
            SimulationSource::List(list) => list,
            _ => &[],
        }
    }

    /// Mutable materialized simulations.
    pub fn simulations_mut(&mut self) -> &mut [Simulation] {
        match &mut self.simulations {
            SimulationSource::List(list) => list,
            _ => &mut [],
        }
    }

    /// Appends a simulation. Only list-backed experiments accept additions,
    /// and only before a driver took their pending simulations.
    pub fn add_simulation(&mut self, simulation: Simulation) -> Result<(), OrchError> {
        if self.started {
            return Err(invalid(
                "experiment.started",
                "cannot add simulations while the experiment is being created",
            ));
        }
        match &mut self.simulations {
            SimulationSource::List(list) => {
                list.push(simulation);
                Ok(())
            }
            SimulationSource::Templated(template) => {
                template.add_simulation(simulation);
                Ok(())
            }
            SimulationSource::Generator { .. } => Err(OrchError::Unsupported(ErrorInfo::new(
                "experiment.generator_append",
                "generator-backed experiments do not accept additional simulations",
            ))),
        }
    }

    /// True once a generator source has been handed to a driver.
    pub fn generator_consumed(&self) -> bool {
        self.generator_consumed
    }

    /// Expected number of simulations, when known without consuming anything.
    pub fn expected_count(&self) -> Option<usize> {
        match &self.simulations {
            SimulationSource::List(list) => Some(list.len()),
            SimulationSource::Templated(template) => template.len().ok(),
            SimulationSource::Generator { .. } => None,
        }
    }

    /// A task representative of every simulation, used to gather common
    /// assets. Peeks (without losing) the first generator item.
    pub fn sample_task(&mut self) -> Result<Option<Box<dyn Task>>, OrchError> {
        match &mut self.simulations {
            SimulationSource::List(list) => Ok(list.first().map(|sim| sim.task.clone())),
            SimulationSource::Templated(template) => Ok(Some(template.base_task().clone_box())),
            SimulationSource::Generator { peeked, rest } => {
                if peeked.is_none() {
                    let Some(iter) = rest.as_mut() else {
                        return Err(consumed_error());
                    };
                    *peeked = iter.next().map(Box::new);
                }
                Ok(peeked.as_ref().map(|sim| sim.task.clone()))
            }
        }
    }

    /// Union of the experiment's common assets and the tasks' common assets.
    ///
    /// Every list simulation is inspected; lazy sources contribute one sample.
    /// Disagreeing content at one path fails with `ConflictingCommonAsset`.
    /// Also records the `task_type` tag.
    pub fn gather_common_assets(&mut self) -> Result<AssetCollection, OrchError> {
        let mut merged = AssetCollection::copy_of(&self.common_assets);
        let mut tasks: Vec<Box<dyn Task>> = match &self.simulations {
            SimulationSource::List(list) => list.iter().map(|sim| sim.task.clone()).collect(),
            _ => self.sample_task()?.into_iter().collect(),
        };
        if let Some(first) = tasks.first() {
            self.tags.insert(TASK_TYPE_TAG, first.task_type());
        }
        for task in &mut tasks {
            let common = task.gather_common_assets()?;
            merged.merge(&common).map_err(|err| match err {
                OrchError::DuplicateAsset(info) => OrchError::ConflictingCommonAsset(ErrorInfo {
                    message: "tasks disagree on a common asset".into(),
                    ..info
                }),
                other => other,
            })?;
        }
        debug!(experiment = %self.name, assets = merged.len(), "gathered common assets");
        Ok(merged)
    }

    /// Hands the not-yet-created simulations to a driver. The source becomes
    /// an empty list that receives the created simulations.
    pub fn take_pending(&mut self) -> Result<PendingSimulations, OrchError> {
        if self.generator_consumed {
            return Err(consumed_error());
        }
        let inherited = self.tags.clone();
        let pending = match std::mem::replace(&mut self.simulations, SimulationSource::List(Vec::new())) {
            SimulationSource::List(list) => {
                let (created, pending): (Vec<_>, Vec<_>) = list.into_iter().partition(Simulation::is_created);
                self.simulations = SimulationSource::List(created);
                let pending = pending
                    .into_iter()
                    .map(|mut sim| {
                        let mut tags = inherited.clone();
                        tags.merge(&sim.tags);
                        sim.tags = tags;
                        sim
                    })
                    .collect::<Vec<_>>();
                PendingSimulations::List(pending.into_iter())
            }
            SimulationSource::Templated(template) => {
                PendingSimulations::Templated(template.into_iter_with(inherited))
            }
            SimulationSource::Generator { peeked, rest } => {
                let Some(rest) = rest else {
                    self.simulations = SimulationSource::Generator { peeked: None, rest: None };
                    return Err(consumed_error());
                };
                self.generator_consumed = true;
                let rest: BoxedSimulations = Box::new(rest.map(move |mut sim| {
                    let mut tags = inherited.clone();
                    tags.merge(&sim.tags);
                    sim.tags = tags;
                    sim
                }));
                let first = peeked.map(|sim| {
                    let mut sim = *sim;
                    let mut tags = self.tags.clone();
                    tags.merge(&sim.tags);
                    sim.tags = tags;
                    sim
                });
                PendingSimulations::Generator(first.into_iter().chain(rest))
            }
        };
        self.started = true;
        Ok(pending)
    }

    /// Stores a created (or failed) simulation handed back by the driver.
    pub fn push_simulation(&mut self, simulation: Simulation) {
        if let SimulationSource::List(list) = &mut self.simulations {
            list.push(simulation);
        }
    }

    /// Marks the end of driver-side creation.
    pub fn finish_creation(&mut self) {
        self.started = false;
    }

    /// Counts of simulations by status.
    pub fn status_summary(&self) -> StatusSummary {
        StatusSummary::from_statuses(self.simulations().iter().map(Simulation::status))
    }

    /// Status derived from the simulations, never below the experiment's
    /// own backend status unless the simulations are all terminal.
    pub fn status(&self) -> EntityStatus {
        match self.status_summary().aggregate() {
            Some(aggregate) if aggregate.is_terminal() => aggregate,
            Some(aggregate) if aggregate.rank() > self.status.rank() => aggregate,
            _ => self.status,
        }
    }

    /// Applies an observation of the experiment's own status.
    pub fn observe_status(&mut self, observed: EntityStatus) -> Transition {
        apply_status(&mut self.status, observed, ItemType::Experiment, self.id.as_deref())
    }

    /// True when every simulation is terminal.
    pub fn done(&self) -> bool {
        let summary = self.status_summary();
        summary.total() > 0 && summary.terminal() == summary.total()
    }

    /// True when every simulation succeeded.
    pub fn succeeded(&self) -> bool {
        let summary = self.status_summary();
        summary.total() > 0 && summary.succeeded == summary.total()
    }

    /// Serializable descriptor, without simulations.
    pub fn to_metadata(&self, platform: Option<&str>) -> Result<ExperimentMetadata, OrchError> {
        let id = self
            .id
            .clone()
            .ok_or_else(|| invalid("experiment.unsaved", "only created experiments have metadata"))?;
        Ok(ExperimentMetadata {
            id,
            parent_id: self.parent_id.clone(),
            name: self.name.clone(),
            tags: self.tags.clone(),
            status: self.status(),
            task_type: self.tags.get_str(TASK_TYPE_TAG).map(str::to_string),
            assets_id: self.assets_id.clone(),
            assets: self.common_assets.records()?,
            platform: platform.map(str::to_string),
        })
    }
}

fn consumed_error() -> OrchError {
    OrchError::Invalid(
        ErrorInfo::new("experiment.generator_consumed", "simulation generator was already consumed")
            .with_hint("use a list or templated simulations for experiments that are iterated twice"),
    )
}

impl Identified for Experiment {
    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn item_type(&self) -> ItemType {
        ItemType::Experiment
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }
}
