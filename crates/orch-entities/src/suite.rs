use orch_core::errors::{invalid, OrchError};
use orch_core::ids::{Identified, ItemType, PlatformObject};
use orch_core::status::{EntityStatus, StatusSummary, Transition};
use orch_core::tags::Tags;

use crate::experiment::Experiment;
use crate::lifecycle::apply_status;
use crate::metadata::SuiteMetadata;

/// Name given to suites created implicitly for bare experiments.
pub const ANONYMOUS_SUITE_NAME: &str = "anonymous";

/// Named, ordered grouping of experiments.
#[derive(Debug)]
pub struct Suite {
    id: Option<String>,
    /// Display name.
    pub name: String,
    /// Tags.
    pub tags: Tags,
    experiments: Vec<Experiment>,
    status: EntityStatus,
    platform_object: Option<PlatformObject>,
}

impl Suite {
    /// Empty suite.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            tags: Tags::new(),
            experiments: Vec::new(),
            status: EntityStatus::Created,
            platform_object: None,
        }
    }

    /// Suite attached to experiments that were run without one.
    pub fn anonymous() -> Self {
        Self::new(ANONYMOUS_SUITE_NAME)
    }

    /// Rebuilds a persisted suite from metadata; experiments load separately.
    pub fn from_metadata(metadata: &SuiteMetadata, handle: PlatformObject) -> Self {
        let mut suite = Self::new(metadata.name.clone());
        suite.id = Some(metadata.id.clone());
        suite.tags = metadata.tags.clone();
        suite.status = metadata.status;
        suite.platform_object = Some(handle);
        suite
    }

    /// Backend id.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Cached backend handle.
    pub fn platform_object(&self) -> Option<&PlatformObject> {
        self.platform_object.as_ref()
    }

    /// Records a successful backend creation and re-parents the experiments.
    pub fn mark_created(&mut self, handle: PlatformObject) {
        self.id = Some(handle.id.clone());
        for experiment in &mut self.experiments {
            experiment.parent_id = Some(handle.id.clone());
        }
        self.platform_object = Some(handle);
    }

    /// Adds an experiment, pointing its parent id at this suite.
    pub fn add_experiment(&mut self, mut experiment: Experiment) -> Result<(), OrchError> {
        if let (Some(parent), Some(own)) = (&experiment.parent_id, &self.id) {
            if parent != own {
                return Err(invalid(
                    "suite.foreign_experiment",
                    format!("experiment belongs to suite {parent}"),
                ));
            }
        }
        experiment.parent_id = self.id.clone();
        self.experiments.push(experiment);
        Ok(())
    }

    /// Experiments in insertion order.
    pub fn experiments(&self) -> &[Experiment] {
        &self.experiments
    }

    /// Mutable experiments.
    pub fn experiments_mut(&mut self) -> &mut [Experiment] {
        &mut self.experiments
    }

    /// Status derived from the experiments, or the suite's own status when
    /// it has none.
    pub fn status(&self) -> EntityStatus {
        StatusSummary::from_statuses(self.experiments.iter().map(Experiment::status))
            .aggregate()
            .unwrap_or(self.status)
    }

    /// Applies an observation of the suite's own status.
    pub fn observe_status(&mut self, observed: EntityStatus) -> Transition {
        apply_status(&mut self.status, observed, ItemType::Suite, self.id.as_deref())
    }

    /// Serializable descriptor.
    pub fn to_metadata(&self) -> Result<SuiteMetadata, OrchError> {
        let id = self
            .id
            .clone()
            .ok_or_else(|| invalid("suite.unsaved", "only created suites have metadata"))?;
        Ok(SuiteMetadata {
            id,
            name: self.name.clone(),
            tags: self.tags.clone(),
            status: self.status(),
        })
    }
}

impl Identified for Suite {
    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn item_type(&self) -> ItemType {
        ItemType::Suite
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }
}
