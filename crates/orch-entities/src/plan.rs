//! Declarative sweep plans loaded from YAML.
//!
//! ```yaml
//! name: growth
//! command: python model.py --config config.json
//! parameters: {a: 0}
//! strategy:
//!   type: grid
//!   parameters:
//!     - {name: a, values: [0, 1]}
//!     - {name: b, values: [1, 9]}
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use orch_assets::{Asset, DirectoryOptions};
use orch_core::errors::{io_error, ErrorInfo, OrchError};
use orch_core::hash::stable_hash_string;
use orch_core::serde::from_yaml_slice;
use orch_core::tags::Tags;
use orch_task::json_task::DEFAULT_CONFIG_FILE;
use orch_task::{CommandLine, JsonConfiguredTask, Task};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::experiment::Experiment;
use crate::sweep::{too_large, ArmBuilder, SweepBuilder};
use crate::templated::TemplatedSimulations;

/// Tag holding the canonical hash of the plan an experiment was built from.
pub const PLAN_HASH_TAG: &str = "plan_hash";

/// One swept parameter with explicit values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanParameter {
    /// Parameter name in the task configuration.
    pub name: String,
    /// Ordered values.
    pub values: Vec<Value>,
}

/// Continuous parameter sampled by a Latin hypercube.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeParameter {
    /// Parameter name in the task configuration.
    pub name: String,
    /// Lower bound.
    pub min: f64,
    /// Upper bound.
    pub max: f64,
}

/// Expansion strategy of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SweepStrategy {
    /// Cartesian product, left-most parameter slowest.
    Grid {
        /// Axes.
        parameters: Vec<PlanParameter>,
    },
    /// Equal-length parameters zipped together.
    Zip {
        /// Axes.
        parameters: Vec<PlanParameter>,
    },
    /// Union of grids.
    Arm {
        /// One grid per arm.
        arms: Vec<Vec<PlanParameter>>,
    },
    /// Seeded Latin hypercube over continuous ranges.
    Lhs {
        /// Ranges.
        parameters: Vec<RangeParameter>,
        /// Number of samples.
        samples: usize,
        /// Sampling seed.
        #[serde(default)]
        seed: u64,
    },
}

/// Asset reference in a plan: a single file or a directory walk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlanAsset {
    /// Single file.
    File {
        /// Source path, relative to the plan file.
        path: PathBuf,
        /// Directory inside the job directory.
        #[serde(default)]
        relative_path: String,
    },
    /// Directory walk.
    Directory {
        /// Source directory, relative to the plan file.
        directory: PathBuf,
        /// Descend into sub-directories.
        #[serde(default = "default_true")]
        recursive: bool,
        /// Include globs.
        #[serde(default)]
        include: Vec<String>,
        /// Exclude globs.
        #[serde(default)]
        exclude: Vec<String>,
        /// Directory prefix inside the job directory.
        #[serde(default)]
        relative_path: Option<String>,
    },
}

fn default_true() -> bool {
    true
}

fn default_config_file() -> String {
    DEFAULT_CONFIG_FILE.to_string()
}

/// Declarative description of a JSON-configured sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepPlan {
    /// Experiment name.
    pub name: String,
    /// Command string, parsed like a shell would.
    pub command: String,
    /// Base parameters every simulation starts from.
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// Configuration file name.
    #[serde(default = "default_config_file")]
    pub config_file_name: String,
    /// Optional envelope key.
    #[serde(default)]
    pub envelope: Option<String>,
    /// Experiment tags.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Experiment-level assets.
    #[serde(default)]
    pub common_assets: Vec<PlanAsset>,
    /// Simulation-level assets.
    #[serde(default)]
    pub transient_assets: Vec<PlanAsset>,
    /// Capability tags the backend must provide.
    #[serde(default)]
    pub platform_requirements: Vec<String>,
    /// Expansion strategy.
    pub strategy: SweepStrategy,
}

fn plan_error(code: &str, message: impl Into<String>) -> OrchError {
    OrchError::Invalid(ErrorInfo::new(code, message))
}

fn check_names<'a>(names: impl Iterator<Item = &'a str>) -> Result<(), OrchError> {
    let mut seen = BTreeSet::new();
    for name in names {
        if name.is_empty() {
            return Err(plan_error("plan.empty_name", "parameter names must be non-empty"));
        }
        if !seen.insert(name) {
            return Err(OrchError::Invalid(
                ErrorInfo::new("plan.duplicate_parameter", "parameter swept twice")
                    .with_context("parameter", name),
            ));
        }
    }
    Ok(())
}

fn grid_builder(parameters: &[PlanParameter]) -> Result<SweepBuilder, OrchError> {
    let mut builder = SweepBuilder::cross();
    for parameter in parameters {
        builder.add_parameter(&parameter.name, parameter.values.clone())?;
    }
    Ok(builder)
}

fn lhs_values(parameters: &[RangeParameter], samples: usize, seed: u64) -> Vec<Vec<Value>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let base_slots: Vec<f64> = (0..samples)
        .map(|i| (i as f64 + 0.5) / samples as f64)
        .collect();
    parameters
        .iter()
        .map(|parameter| {
            let mut slots = base_slots.clone();
            slots.shuffle(&mut rng);
            slots
                .into_iter()
                .map(|frac| json!(parameter.min + frac * (parameter.max - parameter.min)))
                .collect()
        })
        .collect()
}

fn resolve(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

fn load_assets(base_dir: &Path, refs: &[PlanAsset]) -> Result<Vec<Asset>, OrchError> {
    let mut assets = Vec::new();
    for reference in refs {
        match reference {
            PlanAsset::File { path, relative_path } => {
                assets.push(Asset::from_path(resolve(base_dir, path), relative_path)?);
            }
            PlanAsset::Directory {
                directory,
                recursive,
                include,
                exclude,
                relative_path,
            } => {
                let options = DirectoryOptions {
                    recursive: *recursive,
                    prefix: relative_path.clone(),
                    include: include.clone(),
                    exclude: exclude.clone(),
                    ..DirectoryOptions::default()
                };
                assets.extend(orch_assets::collect_directory(&resolve(base_dir, directory), &options)?);
            }
        }
    }
    Ok(assets)
}

fn grid_count(parameters: &[PlanParameter]) -> Result<usize, OrchError> {
    if parameters.iter().any(|p| p.values.is_empty()) {
        return Ok(0);
    }
    parameters.iter().try_fold(1usize, |total, p| {
        total.checked_mul(p.values.len()).ok_or_else(|| too_large(&p.name))
    })
}

impl SweepPlan {
    /// Parses a YAML plan.
    pub fn from_yaml_str(text: &str) -> Result<Self, OrchError> {
        let plan: SweepPlan = from_yaml_slice(text.as_bytes())?;
        plan.validate()?;
        Ok(plan)
    }

    /// Loads and validates a YAML plan file.
    pub fn load(path: &Path) -> Result<Self, OrchError> {
        let bytes = fs::read(path).map_err(|err| io_error("plan.read", path.display(), err))?;
        let plan: SweepPlan = from_yaml_slice(&bytes)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Structural checks: parseable command, unique names, equal zip
    /// lengths and sane ranges.
    pub fn validate(&self) -> Result<(), OrchError> {
        CommandLine::from_string(&self.command)?;
        match &self.strategy {
            SweepStrategy::Grid { parameters } => {
                check_names(parameters.iter().map(|p| p.name.as_str()))?;
            }
            SweepStrategy::Zip { parameters } => {
                check_names(parameters.iter().map(|p| p.name.as_str()))?;
                if let Some(first) = parameters.first() {
                    if let Some(bad) = parameters.iter().find(|p| p.values.len() != first.values.len()) {
                        return Err(OrchError::Invalid(
                            ErrorInfo::new("plan.zip_length", "zip parameters need equal-length values")
                                .with_context("parameter", bad.name.clone())
                                .with_context("expected", first.values.len().to_string()),
                        ));
                    }
                }
            }
            SweepStrategy::Arm { arms } => {
                if arms.is_empty() {
                    return Err(plan_error("plan.no_arms", "arm strategy needs at least one arm"));
                }
                for arm in arms {
                    check_names(arm.iter().map(|p| p.name.as_str()))?;
                }
            }
            SweepStrategy::Lhs { parameters, samples, .. } => {
                check_names(parameters.iter().map(|p| p.name.as_str()))?;
                if *samples == 0 {
                    return Err(plan_error("plan.lhs_samples", "lhs needs at least one sample"));
                }
                if let Some(bad) = parameters.iter().find(|p| !(p.min <= p.max) || !p.min.is_finite() || !p.max.is_finite()) {
                    return Err(OrchError::Invalid(
                        ErrorInfo::new("plan.lhs_range", "lhs range must be finite with min <= max")
                            .with_context("parameter", bad.name.clone()),
                    ));
                }
            }
        }
        self.simulation_count()?;
        Ok(())
    }

    /// Canonical SHA-256 of the plan.
    pub fn plan_hash(&self) -> Result<String, OrchError> {
        stable_hash_string(self)
    }

    /// Number of simulations the plan expands to; `sweep.too_large` when it
    /// does not fit in `usize`.
    pub fn simulation_count(&self) -> Result<usize, OrchError> {
        match &self.strategy {
            SweepStrategy::Grid { parameters } => grid_count(parameters),
            SweepStrategy::Zip { parameters } => Ok(parameters.first().map_or(0, |p| p.values.len())),
            SweepStrategy::Arm { arms } => arms.iter().try_fold(0usize, |total, arm| {
                total.checked_add(grid_count(arm)?).ok_or_else(|| too_large(&self.name))
            }),
            SweepStrategy::Lhs { samples, .. } => Ok(*samples),
        }
    }

    /// Builds the experiment described by the plan. Relative asset paths are
    /// resolved against `base_dir`.
    pub fn build_experiment(&self, base_dir: &Path) -> Result<Experiment, OrchError> {
        self.validate()?;
        let mut task = JsonConfiguredTask::new(CommandLine::from_string(&self.command)?)
            .with_config_file_name(self.config_file_name.clone());
        if let Some(envelope) = &self.envelope {
            task = task.with_envelope(envelope.clone());
        }
        task = task.with_parameters(self.parameters.clone());
        {
            let core = task.core_mut();
            core.platform_requirements.extend(self.platform_requirements.iter().cloned());
            for asset in load_assets(base_dir, &self.common_assets)? {
                core.common_assets.add(asset)?;
            }
            for asset in load_assets(base_dir, &self.transient_assets)? {
                core.transient_assets.add(asset)?;
            }
        }

        let mut template = TemplatedSimulations::from_task(task);
        match &self.strategy {
            SweepStrategy::Grid { parameters } => {
                template.add_builder(grid_builder(parameters)?);
            }
            SweepStrategy::Zip { parameters } => {
                let mut builder = SweepBuilder::pair();
                for parameter in parameters {
                    builder.add_parameter(&parameter.name, parameter.values.clone())?;
                }
                template.add_builder(builder);
            }
            SweepStrategy::Arm { arms } => {
                let mut arm_builder = ArmBuilder::new();
                for arm in arms {
                    arm_builder.add_arm(grid_builder(arm)?);
                }
                template.add_builder(arm_builder);
            }
            SweepStrategy::Lhs {
                parameters,
                samples,
                seed,
            } => {
                let mut builder = SweepBuilder::pair();
                for (parameter, values) in parameters.iter().zip(lhs_values(parameters, *samples, *seed)) {
                    builder.add_parameter(&parameter.name, values)?;
                }
                template.add_builder(builder);
            }
        }

        let mut experiment = Experiment::from_template(self.name.clone(), template);
        experiment.tags = self.tags.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect::<Tags>();
        experiment.tags.insert(PLAN_HASH_TAG, self.plan_hash()?);
        Ok(experiment)
    }
}
