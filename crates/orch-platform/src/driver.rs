//! The lifecycle driver: create, start and optionally wait for suites,
//! experiments and work items.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use orch_assets::{Asset, AssetCollection};
use orch_core::errors::{ErrorInfo, OrchError};
use orch_core::ids::{Identified, ItemType};
use orch_core::status::{EntityStatus, StatusSummary};
use orch_entities::{Experiment, Simulation, Suite, WorkItem};
use rayon::prelude::*;
use tracing::{debug, info, instrument, warn};

use crate::config::RunOptions;
use crate::context::resolve_platform;
use crate::hooks::{HookSite, ItemRef};
use crate::platform::Platform;
use crate::progress::{emit, ProgressEvent, ProgressSink};
use crate::retry::with_backoff;

/// Result of a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    /// Suite the experiments belong to.
    pub suite_id: Option<String>,
    /// Experiments run, in order.
    pub experiment_ids: Vec<String>,
    /// Final counts by status over every simulation (or work item).
    pub summary: StatusSummary,
    /// Per-entity failures the driver absorbed while creating.
    pub creation_failures: Vec<OrchError>,
    /// True when the run waited for completion.
    pub waited: bool,
    /// True when the wait ended on a cancel request.
    pub cancelled: bool,
}

impl RunReport {
    /// True when every simulation succeeded.
    pub fn succeeded(&self) -> bool {
        self.summary.total() > 0 && self.summary.succeeded == self.summary.total()
    }

    fn absorb(&mut self, other: RunReport) {
        self.experiment_ids.extend(other.experiment_ids);
        self.creation_failures.extend(other.creation_failures);
        self.summary.created += other.summary.created;
        self.summary.commissioning += other.summary.commissioning;
        self.summary.running += other.summary.running;
        self.summary.succeeded += other.summary.succeeded;
        self.summary.failed += other.summary.failed;
        self.waited |= other.waited;
        self.cancelled |= other.cancelled;
    }
}

/// How a wait ended when it did not time out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Everything reached a terminal status.
    Done,
    /// A cancel request was observed.
    Cancelled,
}

#[derive(Default)]
struct BatchOutcome {
    simulations: Vec<Simulation>,
    failures: Vec<OrchError>,
    created: usize,
    failed: usize,
}

fn pool(threads: usize) -> Result<rayon::ThreadPool, OrchError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .build()
        .map_err(|err| OrchError::Io(ErrorInfo::new("driver.thread_pool", err.to_string())))
}

fn require_id<'a>(entity: &'a dyn Identified) -> Result<&'a str, OrchError> {
    entity.id().ok_or_else(|| {
        OrchError::Invalid(
            ErrorInfo::new("driver.unsaved", "entity was expected to be created")
                .with_context("item_type", entity.item_type().as_str()),
        )
    })
}

impl Platform {
    fn sinks<'a>(&'a self, options: &'a RunOptions) -> Vec<&'a ProgressSink> {
        self.progress_sink().into_iter().chain(options.progress.as_ref()).collect()
    }

    /// Creates `suite` unless it already has an id.
    pub fn create_suite(&self, suite: &mut Suite) -> Result<(), OrchError> {
        if suite.id().is_some() {
            return Ok(());
        }
        self.ensure_supported(ItemType::Suite)?;
        suite.tags.validate(&self.config().tag_limits)?;
        self.hooks().dispatch(HookSite::PreCreate, &mut ItemRef::Suite(suite))?;
        let ops = self.backend().suites();
        ops.pre_create(suite)?;
        let handle = with_backoff(&self.config().backoff, "suite.create", || ops.platform_create(suite))?;
        self.remember(&handle);
        suite.mark_created(handle);
        ops.post_create(suite)?;
        self.hooks().dispatch(HookSite::PostCreate, &mut ItemRef::Suite(suite))?;
        debug!(suite = suite.id().unwrap_or("-"), name = %suite.name, "suite created");
        Ok(())
    }

    /// Uploads the blobs of `collection` the backend does not hold yet,
    /// several at a time. Returns the number of uploaded blobs.
    pub fn send_assets(&self, collection: &AssetCollection) -> Result<usize, OrchError> {
        let mut seen = BTreeSet::new();
        let mut unique: Vec<&Asset> = Vec::new();
        for asset in collection.iter() {
            if seen.insert(asset.checksum()?.to_string()) {
                unique.push(asset);
            }
        }
        let blobs = self.backend().blobs();
        let uploaded = pool(self.config().asset_upload_concurrency)?.install(|| {
            unique
                .par_iter()
                .map(|asset| -> Result<bool, OrchError> {
                    if blobs.contains(asset.checksum()?)? {
                        return Ok(false);
                    }
                    blobs.put(asset)?;
                    Ok(true)
                })
                .collect::<Result<Vec<bool>, OrchError>>()
        })?;
        let count = uploaded.into_iter().filter(|sent| *sent).count();
        debug!(assets = collection.len(), uploaded = count, "assets sent");
        Ok(count)
    }

    /// Uploads and registers `collection` unless it already has an id; the
    /// collection is frozen afterwards.
    pub fn create_asset_collection(&self, collection: &mut AssetCollection) -> Result<(), OrchError> {
        if collection.id().is_some() {
            return Ok(());
        }
        self.ensure_supported(ItemType::AssetCollection)?;
        self.send_assets(collection)?;
        self.hooks()
            .dispatch(HookSite::PreCreate, &mut ItemRef::AssetCollection(collection))?;
        let ops = self.backend().asset_collections();
        ops.pre_create(collection)?;
        let handle = with_backoff(&self.config().backoff, "asset_collection.create", || {
            ops.platform_create(collection)
        })?;
        collection.set_id(handle.id.clone())?;
        collection.freeze();
        self.remember(&handle);
        ops.post_create(collection)?;
        self.hooks()
            .dispatch(HookSite::PostCreate, &mut ItemRef::AssetCollection(collection))
    }

    /// Creates `experiment` with its merged common assets, unless it already
    /// has an id. Conflicting common assets fail before any backend call.
    pub fn create_experiment(&self, experiment: &mut Experiment, options: &RunOptions) -> Result<(), OrchError> {
        if experiment.id().is_some() {
            debug!(experiment = experiment.id().unwrap_or("-"), "experiment already created");
            return Ok(());
        }
        self.ensure_supported(ItemType::Experiment)?;
        if let Some(task) = experiment.sample_task()? {
            self.check_requirements(task.as_ref())?;
        }
        let mut assets = experiment.gather_common_assets()?;
        experiment.tags.validate(&self.config().tag_limits)?;
        self.hooks()
            .dispatch(HookSite::PreCreate, &mut ItemRef::Experiment(experiment))?;

        self.create_asset_collection(&mut assets)?;
        if let Some(id) = assets.id() {
            experiment.set_assets_id(id);
        }
        experiment.common_assets = assets;

        let ops = self.backend().experiments();
        ops.pre_create(experiment)?;
        let handle = with_backoff(&self.config().backoff, "experiment.create", || {
            ops.platform_create(experiment)
        })?;
        self.remember(&handle);
        experiment.mark_created(handle);
        ops.post_create(experiment)?;
        self.hooks()
            .dispatch(HookSite::PostCreate, &mut ItemRef::Experiment(experiment))?;
        emit(
            &self.sinks(options),
            ProgressEvent::ExperimentCreated {
                experiment: require_id(experiment)?.to_string(),
                assets_id: experiment.assets_id().map(str::to_string),
            },
        );
        Ok(())
    }

    fn prepare_simulation(&self, simulation: &mut Simulation) -> Result<(), OrchError> {
        simulation.pre_creation()?;
        self.hooks()
            .dispatch(HookSite::PreCreate, &mut ItemRef::Simulation(simulation))?;
        simulation.tags.validate(&self.config().tag_limits)?;
        self.backend().simulations().pre_create(simulation)
    }

    fn finish_simulation(&self, simulation: &mut Simulation) -> Result<(), OrchError> {
        simulation.post_creation()?;
        self.backend().simulations().post_create(simulation)?;
        self.hooks()
            .dispatch(HookSite::PostCreate, &mut ItemRef::Simulation(simulation))
    }

    fn create_batch(&self, batch: Vec<Simulation>, retries: u32) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        let mut done: Vec<(usize, Simulation)> = Vec::with_capacity(batch.len());
        let mut ready: Vec<(usize, Simulation)> = Vec::with_capacity(batch.len());
        for (idx, mut simulation) in batch.into_iter().enumerate() {
            match self.prepare_simulation(&mut simulation) {
                Ok(()) => ready.push((idx, simulation)),
                Err(err) => {
                    warn!(error = %err, "simulation failed before creation");
                    simulation.mark_create_failed();
                    outcome.failures.push(err);
                    outcome.failed += 1;
                    done.push((idx, simulation));
                }
            }
        }

        let ops = self.backend().simulations();
        let mut attempt = 0;
        while !ready.is_empty() {
            let (indices, mut simulations): (Vec<usize>, Vec<Simulation>) = ready.drain(..).unzip();
            let mut results = ops.batch_create(&mut simulations).into_iter();
            let mut retry = Vec::new();
            for (idx, mut simulation) in indices.into_iter().zip(simulations) {
                let result = results.next().unwrap_or_else(|| {
                    Err(OrchError::BatchPartial(ErrorInfo::new(
                        "simulation.batch_result",
                        "backend returned fewer results than simulations",
                    )))
                });
                match result {
                    Ok(handle) => {
                        self.remember(&handle);
                        simulation.mark_created(handle);
                        outcome.created += 1;
                        if let Err(err) = self.finish_simulation(&mut simulation) {
                            warn!(simulation = simulation.id().unwrap_or("-"), error = %err, "post-create step failed");
                            simulation.mark_create_failed();
                            outcome.failures.push(err);
                        }
                        done.push((idx, simulation));
                    }
                    Err(err) if attempt < retries => {
                        debug!(attempt, error = %err, "retrying simulation creation");
                        retry.push((idx, simulation));
                    }
                    Err(err) => {
                        let err = err.into_create_failure();
                        warn!(attempts = attempt + 1, error = %err, "simulation creation failed");
                        simulation.mark_create_failed();
                        outcome.failures.push(err);
                        outcome.failed += 1;
                        done.push((idx, simulation));
                    }
                }
            }
            ready = retry;
            attempt += 1;
        }

        done.sort_by_key(|(idx, _)| *idx);
        outcome.simulations = done.into_iter().map(|(_, simulation)| simulation).collect();
        outcome
    }

    /// Creates the pending simulations of a created experiment in batches.
    /// Disjoint batches run in parallel; output order follows the source.
    pub fn create_simulations(
        &self,
        experiment: &mut Experiment,
        options: &RunOptions,
        report: &mut RunReport,
    ) -> Result<(), OrchError> {
        let experiment_id = require_id(experiment)?.to_string();
        if experiment.generator_consumed() {
            debug!(experiment = %experiment_id, "generator already consumed, nothing to create");
            return Ok(());
        }
        let retries = options.retries.unwrap_or(self.config().retries);
        let batch_size = self.config().batch_size.max(1);
        let window = self.config().upload_concurrency.max(1);
        let expected = experiment.expected_count();
        let workers = pool(window)?;
        let mut pending = experiment.take_pending()?;

        let mut created = 0;
        let mut failed = 0;
        let mut source_error = None;
        let mut exhausted = false;
        while !exhausted && source_error.is_none() {
            let mut batches: Vec<Vec<Simulation>> = Vec::new();
            while batches.len() < window && !exhausted && source_error.is_none() {
                let mut batch = Vec::with_capacity(batch_size);
                while batch.len() < batch_size {
                    match pending.next() {
                        Some(Ok(mut simulation)) => {
                            simulation.parent_id = Some(experiment_id.clone());
                            batch.push(simulation);
                        }
                        Some(Err(err)) => {
                            source_error = Some(err);
                            break;
                        }
                        None => {
                            exhausted = true;
                            break;
                        }
                    }
                }
                if !batch.is_empty() {
                    batches.push(batch);
                }
            }
            if batches.is_empty() {
                break;
            }
            let outcomes: Vec<BatchOutcome> = workers.install(|| {
                batches
                    .into_par_iter()
                    .map(|batch| self.create_batch(batch, retries))
                    .collect()
            });
            for outcome in outcomes {
                created += outcome.created;
                failed += outcome.failed;
                report.creation_failures.extend(outcome.failures);
                for simulation in outcome.simulations {
                    experiment.push_simulation(simulation);
                }
            }
            emit(
                &self.sinks(options),
                ProgressEvent::SimulationsCreated {
                    experiment: experiment_id.clone(),
                    created,
                    failed,
                    expected,
                },
            );
        }
        experiment.finish_creation();
        match source_error {
            Some(err) => Err(err.for_entity(experiment_id)),
            None => Ok(()),
        }
    }

    fn start_experiment(&self, experiment: &mut Experiment, options: &RunOptions) -> Result<(), OrchError> {
        let startable = experiment
            .simulations()
            .iter()
            .any(|simulation| simulation.is_created() && simulation.status() == EntityStatus::Created);
        if !startable {
            debug!(experiment = experiment.id().unwrap_or("-"), status = %experiment.status(), "nothing to start");
            return Ok(());
        }
        self.hooks()
            .dispatch(HookSite::PreRun, &mut ItemRef::Experiment(experiment))?;
        for simulation in experiment.simulations_mut() {
            if simulation.is_created() && simulation.status() == EntityStatus::Created {
                self.hooks()
                    .dispatch(HookSite::PreRun, &mut ItemRef::Simulation(simulation))?;
            }
        }
        self.backend().experiments().run_item(experiment)?;
        experiment.observe_status(EntityStatus::Commissioning);
        emit(
            &self.sinks(options),
            ProgressEvent::RunStarted {
                experiment: require_id(experiment)?.to_string(),
            },
        );
        Ok(())
    }

    fn poll_until<F>(&self, label: &str, options: &RunOptions, mut step: F) -> Result<WaitOutcome, OrchError>
    where
        F: FnMut() -> Result<bool, OrchError>,
    {
        let timeout = options.timeout.unwrap_or_else(|| self.config().timeout());
        let interval = self
            .config()
            .clamp_interval(options.refresh_interval.unwrap_or_else(|| self.config().refresh_interval()));
        let start = Instant::now();
        loop {
            match step() {
                Ok(true) => return Ok(WaitOutcome::Done),
                Ok(false) => {}
                Err(err) if err.is_transient() => {
                    warn!(entity = label, error = %err, "status refresh failed, retrying on next poll");
                }
                Err(err) => return Err(err),
            }
            if options.cancel.is_cancelled() {
                info!(entity = label, "wait cancelled");
                return Ok(WaitOutcome::Cancelled);
            }
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(OrchError::WaitTimeout(
                    ErrorInfo::new("driver.wait_timeout", "entity did not finish before the deadline")
                        .with_context("timeout_ms", timeout.as_millis().to_string())
                        .with_entity(label),
                ));
            }
            if options.cancel.sleep(interval.min(timeout - elapsed)) {
                info!(entity = label, "wait cancelled");
                return Ok(WaitOutcome::Cancelled);
            }
        }
    }

    /// Polls `experiment` until every simulation is terminal, the deadline
    /// passes (`WaitTimeout`) or cancellation is requested.
    pub fn wait_till_done(&self, experiment: &mut Experiment, options: &RunOptions) -> Result<WaitOutcome, OrchError> {
        let label = require_id(experiment)?.to_string();
        let sinks = self.sinks(options);
        self.poll_until(&label, options, || {
            self.refresh_experiment(experiment)?;
            emit(
                &sinks,
                ProgressEvent::StatusRefreshed {
                    experiment: label.clone(),
                    summary: experiment.status_summary(),
                },
            );
            Ok(experiment.simulations().is_empty() || experiment.done())
        })
    }

    /// Runs one experiment through the whole lifecycle.
    #[instrument(skip_all, fields(experiment = %experiment.name))]
    pub fn run_experiment(&self, experiment: &mut Experiment, options: &RunOptions) -> Result<RunReport, OrchError> {
        let mut report = RunReport::default();
        if experiment.parent_id.is_none() {
            let mut suite = Suite::anonymous();
            self.create_suite(&mut suite)?;
            experiment.parent_id = suite.id().map(str::to_string);
        }
        report.suite_id = experiment.parent_id.clone();
        self.launch(experiment, options, &mut report)?;
        self.settle(experiment, options, &mut report)?;
        report.summary = experiment.status_summary();
        Ok(report)
    }

    fn launch(&self, experiment: &mut Experiment, options: &RunOptions, report: &mut RunReport) -> Result<(), OrchError> {
        self.create_experiment(experiment, options)?;
        report.experiment_ids.push(require_id(experiment)?.to_string());
        self.create_simulations(experiment, options, report)?;
        self.start_experiment(experiment, options)
    }

    fn settle(&self, experiment: &mut Experiment, options: &RunOptions, report: &mut RunReport) -> Result<(), OrchError> {
        if options.wait_until_done {
            report.waited = true;
            report.cancelled |= self.wait_till_done(experiment, options)? == WaitOutcome::Cancelled;
        }
        for simulation in experiment.simulations_mut() {
            if simulation.is_created() {
                self.hooks()
                    .dispatch(HookSite::PostRun, &mut ItemRef::Simulation(simulation))?;
            }
        }
        self.hooks()
            .dispatch(HookSite::PostRun, &mut ItemRef::Experiment(experiment))
    }

    /// Runs every experiment of `suite`; all experiments are launched before
    /// any of them is waited for.
    #[instrument(skip_all, fields(suite = %suite.name))]
    pub fn run_suite(&self, suite: &mut Suite, options: &RunOptions) -> Result<RunReport, OrchError> {
        self.create_suite(suite)?;
        let mut report = RunReport {
            suite_id: suite.id().map(str::to_string),
            ..RunReport::default()
        };
        self.hooks().dispatch(HookSite::PreRun, &mut ItemRef::Suite(suite))?;
        for experiment in suite.experiments_mut() {
            let mut partial = RunReport::default();
            self.launch(experiment, options, &mut partial)?;
            report.absorb(partial);
        }
        for experiment in suite.experiments_mut() {
            let mut partial = RunReport::default();
            self.settle(experiment, options, &mut partial)?;
            partial.summary = experiment.status_summary();
            report.absorb(partial);
            if report.cancelled {
                break;
            }
        }
        self.hooks().dispatch(HookSite::PostRun, &mut ItemRef::Suite(suite))?;
        Ok(report)
    }

    /// Runs a work item: create, start and optionally wait.
    #[instrument(skip_all, fields(work_item = %item.name))]
    pub fn run_work_item(&self, item: &mut WorkItem, options: &RunOptions) -> Result<RunReport, OrchError> {
        self.ensure_supported(ItemType::WorkItem)?;
        let ops = self.backend().work_items();
        if item.id().is_none() {
            item.pre_creation()?;
            item.tags.validate(&self.config().tag_limits)?;
            self.hooks().dispatch(HookSite::PreCreate, &mut ItemRef::WorkItem(item))?;
            self.send_assets(&item.assets)?;
            ops.pre_create(item)?;
            let handle = with_backoff(&self.config().backoff, "work_item.create", || ops.platform_create(item))?;
            self.remember(&handle);
            item.mark_created(handle);
            ops.post_create(item)?;
            self.hooks().dispatch(HookSite::PostCreate, &mut ItemRef::WorkItem(item))?;
        }
        if item.status() == EntityStatus::Created {
            self.hooks().dispatch(HookSite::PreRun, &mut ItemRef::WorkItem(item))?;
            ops.run_item(item)?;
            item.observe_status(EntityStatus::Commissioning);
        }
        let mut report = RunReport::default();
        if options.wait_until_done {
            report.waited = true;
            let label = require_id(item)?.to_string();
            let outcome = self.poll_until(&label, options, || {
                self.refresh_work_item(item)?;
                Ok(item.done())
            })?;
            report.cancelled = outcome == WaitOutcome::Cancelled;
        }
        self.hooks().dispatch(HookSite::PostRun, &mut ItemRef::WorkItem(item))?;
        report.summary = StatusSummary::from_statuses([item.status()]);
        Ok(report)
    }
}

/// Entities that can be run on a platform.
pub trait Runnable {
    /// Runs the entity on `platform`, or on the scoped or global platform
    /// when none is given.
    fn run(&mut self, platform: Option<&Arc<Platform>>, options: &RunOptions) -> Result<RunReport, OrchError>;
}

impl Runnable for Experiment {
    fn run(&mut self, platform: Option<&Arc<Platform>>, options: &RunOptions) -> Result<RunReport, OrchError> {
        resolve_platform(platform)?.run_experiment(self, options)
    }
}

impl Runnable for Suite {
    fn run(&mut self, platform: Option<&Arc<Platform>>, options: &RunOptions) -> Result<RunReport, OrchError> {
        resolve_platform(platform)?.run_suite(self, options)
    }
}

impl Runnable for WorkItem {
    fn run(&mut self, platform: Option<&Arc<Platform>>, options: &RunOptions) -> Result<RunReport, OrchError> {
        resolve_platform(platform)?.run_work_item(self, options)
    }
}
