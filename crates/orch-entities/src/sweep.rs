//! Sweep builders: positional-index expansion of parameter axes.
//!
//! Cross builders enumerate the Cartesian product with the left-most
//! definition varying slowest. Pair builders zip equal-length definitions.
//! Arm builders concatenate the output of their children.

use std::fmt;
use std::sync::Arc;

use orch_core::errors::{ErrorInfo, OrchError};
use orch_core::tags::Tags;
use serde_json::{Map, Value};

use crate::simulation::Simulation;

pub(crate) fn too_large(builder: &str) -> OrchError {
    OrchError::Invalid(
        ErrorInfo::new("sweep.too_large", "sweep yields more simulations than can be indexed")
            .with_context("builder", builder),
    )
}

/// Callback applying one sweep value to a simulation and returning the tag
/// patch describing it.
pub type SweepCallback = Arc<dyn Fn(&mut Simulation, &Value) -> Result<Tags, OrchError> + Send + Sync>;

/// Sweep callback setting the task parameter `name` to the swept value.
pub fn set_parameter(name: impl Into<String>) -> SweepCallback {
    let name = name.into();
    Arc::new(move |simulation: &mut Simulation, value: &Value| {
        simulation.task.set_parameter(&name, value.clone())
    })
}

/// One axis of a sweep: a callback and the ordered values it is invoked with.
#[derive(Clone)]
pub struct SweepDefinition {
    name: String,
    callback: SweepCallback,
    values: Arc<Vec<Value>>,
}

impl SweepDefinition {
    /// Axis named `name` applying `callback` over `values`.
    pub fn new(name: impl Into<String>, callback: SweepCallback, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            callback,
            values: Arc::new(values),
        }
    }

    /// Axis name, used in logs and plan validation.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Values of the axis.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    fn apply(&self, simulation: &mut Simulation, idx: usize) -> Result<Tags, OrchError> {
        let value = self.values.get(idx).ok_or_else(|| {
            OrchError::Invalid(
                ErrorInfo::new("sweep.index", "sweep value index out of range")
                    .with_context("definition", self.name.clone())
                    .with_context("index", idx.to_string()),
            )
        })?;
        (self.callback)(simulation, value)
    }
}

impl fmt::Debug for SweepDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SweepDefinition")
            .field("name", &self.name)
            .field("values", &self.values.len())
            .finish()
    }
}

/// Composition mode of a [`SweepBuilder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepMode {
    /// Cartesian product of all definitions.
    Cross,
    /// Zip of equal-length definitions.
    Pair,
}

/// Ordered list of sweep definitions combined by a [`SweepMode`].
#[derive(Debug, Clone)]
pub struct SweepBuilder {
    mode: SweepMode,
    definitions: Vec<SweepDefinition>,
}

impl SweepBuilder {
    /// Empty cross builder.
    pub fn cross() -> Self {
        Self {
            mode: SweepMode::Cross,
            definitions: Vec::new(),
        }
    }

    /// Empty pair builder.
    pub fn pair() -> Self {
        Self {
            mode: SweepMode::Pair,
            definitions: Vec::new(),
        }
    }

    /// Composition mode.
    pub fn mode(&self) -> SweepMode {
        self.mode
    }

    /// Definitions in insertion order.
    pub fn definitions(&self) -> &[SweepDefinition] {
        &self.definitions
    }

    /// Appends a definition. Pair builders reject lengths that differ from
    /// the existing definitions; cross builders reject a definition whose
    /// product with the existing axes overflows.
    pub fn add_definition(&mut self, definition: SweepDefinition) -> Result<&mut Self, OrchError> {
        if self.mode == SweepMode::Cross && self.count()?.checked_mul(definition.values.len()).is_none() {
            return Err(too_large(&definition.name));
        }
        if self.mode == SweepMode::Pair {
            if let Some(first) = self.definitions.first() {
                if first.values.len() != definition.values.len() {
                    return Err(OrchError::Invalid(
                        ErrorInfo::new("sweep.pair_length", "pair sweeps need equal-length value lists")
                            .with_context("expected", first.values.len().to_string())
                            .with_context("found", definition.values.len().to_string())
                            .with_context("definition", definition.name.clone()),
                    ));
                }
            }
        }
        self.definitions.push(definition);
        Ok(self)
    }

    /// Appends a definition from a callback and its values.
    pub fn add_sweep_definition(
        &mut self,
        name: impl Into<String>,
        callback: SweepCallback,
        values: Vec<Value>,
    ) -> Result<&mut Self, OrchError> {
        self.add_definition(SweepDefinition::new(name, callback, values))
    }

    /// Sweeps task parameter `name` over `values` with [`set_parameter`].
    pub fn add_parameter(&mut self, name: &str, values: Vec<Value>) -> Result<&mut Self, OrchError> {
        self.add_sweep_definition(name, set_parameter(name), values)
    }

    /// Adds one definition whose callback receives several named values at
    /// once, as a JSON object. The named value lists are crossed internally,
    /// left-most slowest.
    pub fn add_multiple_parameter_definition(
        &mut self,
        name: impl Into<String>,
        callback: SweepCallback,
        parameters: Vec<(String, Vec<Value>)>,
    ) -> Result<&mut Self, OrchError> {
        let name = name.into();
        let mut combos = vec![Map::new()];
        for (key, values) in &parameters {
            let capacity = combos.len().checked_mul(values.len()).ok_or_else(|| too_large(&name))?;
            let mut next = Vec::with_capacity(capacity);
            for combo in &combos {
                for value in values {
                    let mut extended = combo.clone();
                    extended.insert(key.clone(), value.clone());
                    next.push(extended);
                }
            }
            combos = next;
        }
        let values = if parameters.is_empty() {
            Vec::new()
        } else {
            combos.into_iter().map(Value::Object).collect()
        };
        self.add_sweep_definition(name, callback, values)
    }

    /// Number of simulations this builder yields; `sweep.too_large` when
    /// the product does not fit in `usize`.
    pub fn count(&self) -> Result<usize, OrchError> {
        match self.mode {
            SweepMode::Cross => {
                if self.definitions.iter().any(|definition| definition.values.is_empty()) {
                    return Ok(0);
                }
                self.definitions.iter().try_fold(1usize, |total, definition| {
                    total
                        .checked_mul(definition.values.len())
                        .ok_or_else(|| too_large(&definition.name))
                })
            }
            SweepMode::Pair => Ok(self
                .definitions
                .first()
                .map(|definition| definition.values.len())
                .unwrap_or(0)),
        }
    }

    /// Value index of every definition for output position `index`.
    pub fn indices(&self, index: usize) -> Vec<usize> {
        match self.mode {
            SweepMode::Pair => vec![index; self.definitions.len()],
            SweepMode::Cross => {
                let mut remaining = index;
                let mut out = vec![0; self.definitions.len()];
                for (slot, definition) in out.iter_mut().zip(&self.definitions).rev() {
                    let len = definition.values.len().max(1);
                    *slot = remaining % len;
                    remaining /= len;
                }
                out
            }
        }
    }

    /// Applies the values at output position `index`, merging the returned
    /// patches in definition order.
    pub fn apply(&self, index: usize, simulation: &mut Simulation) -> Result<Tags, OrchError> {
        let mut patch = Tags::new();
        for (definition, value_idx) in self.definitions.iter().zip(self.indices(index)) {
            patch.merge(&definition.apply(simulation, value_idx)?);
        }
        Ok(patch)
    }
}

/// Union of several sweep builders.
#[derive(Debug, Clone, Default)]
pub struct ArmBuilder {
    arms: Vec<SweepBuilder>,
}

impl ArmBuilder {
    /// Empty arm builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an arm.
    pub fn add_arm(&mut self, arm: SweepBuilder) -> &mut Self {
        self.arms.push(arm);
        self
    }

    /// Arms in insertion order.
    pub fn arms(&self) -> &[SweepBuilder] {
        &self.arms
    }

    /// Total simulations over all arms.
    pub fn count(&self) -> Result<usize, OrchError> {
        self.arms.iter().try_fold(0usize, |total, arm| {
            total.checked_add(arm.count()?).ok_or_else(|| too_large("arm"))
        })
    }

    /// Applies output position `index`.
    pub fn apply(&self, index: usize, simulation: &mut Simulation) -> Result<Tags, OrchError> {
        let mut local = index;
        for arm in &self.arms {
            let count = arm.count()?;
            if local < count {
                return arm.apply(local, simulation);
            }
            local -= count;
        }
        Err(OrchError::Invalid(
            ErrorInfo::new("sweep.index", "arm builder index out of range")
                .with_context("index", index.to_string()),
        ))
    }
}

/// Any builder accepted by templated simulations.
#[derive(Debug, Clone)]
pub enum Builder {
    /// A single cross or pair builder.
    Sweep(SweepBuilder),
    /// A union of builders.
    Arm(ArmBuilder),
}

impl Builder {
    /// Number of simulations yielded.
    pub fn count(&self) -> Result<usize, OrchError> {
        match self {
            Builder::Sweep(builder) => builder.count(),
            Builder::Arm(builder) => builder.count(),
        }
    }

    /// Applies output position `index`.
    pub fn apply(&self, index: usize, simulation: &mut Simulation) -> Result<Tags, OrchError> {
        match self {
            Builder::Sweep(builder) => builder.apply(index, simulation),
            Builder::Arm(builder) => builder.apply(index, simulation),
        }
    }
}

impl From<SweepBuilder> for Builder {
    fn from(builder: SweepBuilder) -> Self {
        Builder::Sweep(builder)
    }
}

impl From<ArmBuilder> for Builder {
    fn from(builder: ArmBuilder) -> Self {
        Builder::Arm(builder)
    }
}
