//! Templated simulation sources: a base task expanded lazily by sweep builders.

use std::borrow::Cow;
use std::fmt;

use orch_core::errors::{ErrorInfo, OrchError};
use orch_core::tags::Tags;
use orch_task::Task;

use crate::simulation::Simulation;
use crate::sweep::{too_large, Builder};

/// Lazy sweep over a base task.
///
/// Output order: every builder in insertion order, then the extra
/// simulations. Without builders the base task yields one simulation.
/// Tags of a produced simulation are the inherited (experiment) tags, then
/// the template tags, then the callback patches.
#[derive(Clone)]
pub struct TemplatedSimulations {
    base_task: Box<dyn Task>,
    builders: Vec<Builder>,
    tags: Tags,
    extras: Vec<Simulation>,
}

impl fmt::Debug for TemplatedSimulations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplatedSimulations")
            .field("base_task", &self.base_task.task_type())
            .field("builders", &self.builders.len())
            .field("tags", &self.tags)
            .field("extras", &self.extras.len())
            .finish()
    }
}

impl TemplatedSimulations {
    /// Template around `base_task`.
    pub fn new(base_task: Box<dyn Task>) -> Self {
        Self {
            base_task,
            builders: Vec::new(),
            tags: Tags::new(),
            extras: Vec::new(),
        }
    }

    /// Template around a concrete task.
    pub fn from_task<T: Task + 'static>(task: T) -> Self {
        Self::new(Box::new(task))
    }

    /// Base task every simulation is copied from.
    pub fn base_task(&self) -> &dyn Task {
        self.base_task.as_ref()
    }

    /// Mutable base task.
    pub fn base_task_mut(&mut self) -> &mut dyn Task {
        self.base_task.as_mut()
    }

    /// Appends a builder.
    pub fn add_builder(&mut self, builder: impl Into<Builder>) -> &mut Self {
        self.builders.push(builder.into());
        self
    }

    /// Builders in order.
    pub fn builders(&self) -> &[Builder] {
        &self.builders
    }

    /// Tags applied to every produced simulation.
    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Mutable template tags.
    pub fn tags_mut(&mut self) -> &mut Tags {
        &mut self.tags
    }

    /// Appends a simulation produced after the builder output.
    pub fn add_simulation(&mut self, simulation: Simulation) -> &mut Self {
        self.extras.push(simulation);
        self
    }

    fn builder_total(&self) -> Result<usize, OrchError> {
        if self.builders.is_empty() {
            return Ok(1);
        }
        self.builders.iter().try_fold(0usize, |total, builder| {
            total.checked_add(builder.count()?).ok_or_else(|| too_large("template"))
        })
    }

    /// Number of simulations the template yields.
    pub fn len(&self) -> Result<usize, OrchError> {
        self.builder_total()?
            .checked_add(self.extras.len())
            .ok_or_else(|| too_large("template"))
    }

    /// True when nothing would be produced.
    pub fn is_empty(&self) -> Result<bool, OrchError> {
        Ok(self.len()? == 0)
    }

    /// Simulation at output position `index`.
    pub fn simulation_at(&self, index: usize, inherited: &Tags) -> Result<Simulation, OrchError> {
        let builder_total = self.builder_total()?;
        if index >= builder_total {
            let extra = self.extras.get(index - builder_total).ok_or_else(|| {
                OrchError::Invalid(
                    ErrorInfo::new("templated.index", "templated simulation index out of range")
                        .with_context("index", index.to_string())
                        .with_context("extras", self.extras.len().to_string()),
                )
            })?;
            let mut simulation = extra.clone();
            let mut tags = inherited.clone();
            tags.merge(&self.tags);
            tags.merge(&extra.tags);
            simulation.tags = tags;
            return Ok(simulation);
        }

        let mut simulation = Simulation::new(self.base_task.clone());
        let mut tags = inherited.clone();
        tags.merge(&self.tags);
        let mut local = index;
        for builder in &self.builders {
            let count = builder.count()?;
            if local < count {
                let patch = builder.apply(local, &mut simulation)?;
                tags.merge(&patch);
                break;
            }
            local -= count;
        }
        simulation.tags = tags;
        Ok(simulation)
    }

    /// Restartable iterator from the first position.
    pub fn iter(&self) -> TemplatedIter<'_> {
        self.iter_with(Tags::new())
    }

    /// Iterator whose simulations inherit `inherited` tags.
    pub fn iter_with(&self, inherited: Tags) -> TemplatedIter<'_> {
        TemplatedIter::new(Cow::Borrowed(self), inherited)
    }

    /// Owning iterator.
    pub fn into_iter_with(self, inherited: Tags) -> TemplatedIter<'static> {
        TemplatedIter::new(Cow::Owned(self), inherited)
    }
}

/// Positional iterator over a [`TemplatedSimulations`].
///
/// A template whose size cannot be computed yields its error once.
#[derive(Debug)]
pub struct TemplatedIter<'a> {
    template: Cow<'a, TemplatedSimulations>,
    inherited: Tags,
    next: usize,
    total: usize,
    failure: Option<OrchError>,
}

impl<'a> TemplatedIter<'a> {
    fn new(template: Cow<'a, TemplatedSimulations>, inherited: Tags) -> Self {
        let (total, failure) = match template.len() {
            Ok(total) => (total, None),
            Err(err) => (1, Some(err)),
        };
        Self {
            template,
            inherited,
            next: 0,
            total,
            failure,
        }
    }

    /// Rewinds to the first position.
    pub fn restart(&mut self) {
        self.next = 0;
    }

    /// Position of the next simulation.
    pub fn position(&self) -> usize {
        self.next
    }
}

impl Iterator for TemplatedIter<'_> {
    type Item = Result<Simulation, OrchError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.total {
            return None;
        }
        if let Some(err) = self.failure.take() {
            self.next = self.total;
            return Some(Err(err));
        }
        let item = self.template.simulation_at(self.next, &self.inherited);
        self.next += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.total - self.next;
        (left, Some(left))
    }
}

impl ExactSizeIterator for TemplatedIter<'_> {}
