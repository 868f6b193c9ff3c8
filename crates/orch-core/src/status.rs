//! Entity status machine shared by suites, experiments, simulations and work items.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{invalid, OrchError};

/// Lifecycle state of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityStatus {
    /// Persisted on the backend but not yet scheduled.
    Created,
    /// Accepted by the backend scheduler.
    Commissioning,
    /// Executing.
    Running,
    /// Finished successfully.
    Succeeded,
    /// Finished unsuccessfully, or never started.
    Failed,
}

/// Result of applying an observed status to the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The observed status was accepted.
    Applied(EntityStatus),
    /// The observed status equals the current one.
    Unchanged(EntityStatus),
    /// The observed status would move backwards; the current one is kept.
    Clamped {
        /// Status kept on the entity.
        kept: EntityStatus,
        /// Status reported by the backend.
        observed: EntityStatus,
    },
}

impl Transition {
    /// Status the entity holds after the transition.
    pub fn status(&self) -> EntityStatus {
        match *self {
            Transition::Applied(status) | Transition::Unchanged(status) => status,
            Transition::Clamped { kept, .. } => kept,
        }
    }
}

impl EntityStatus {
    /// All statuses, in progression order.
    pub const ALL: [EntityStatus; 5] = [
        EntityStatus::Created,
        EntityStatus::Commissioning,
        EntityStatus::Running,
        EntityStatus::Succeeded,
        EntityStatus::Failed,
    ];

    /// Position in the progression `CREATED < COMMISSIONING < RUNNING < terminal`.
    pub fn rank(self) -> u8 {
        match self {
            EntityStatus::Created => 0,
            EntityStatus::Commissioning => 1,
            EntityStatus::Running => 2,
            EntityStatus::Succeeded | EntityStatus::Failed => 3,
        }
    }

    /// True for `SUCCEEDED` and `FAILED`.
    pub fn is_terminal(self) -> bool {
        matches!(self, EntityStatus::Succeeded | EntityStatus::Failed)
    }

    /// Whether `self → next` is an allowed transition. Staying put is allowed.
    pub fn can_transition_to(self, next: EntityStatus) -> bool {
        if self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        next == EntityStatus::Failed || next.rank() > self.rank()
    }

    /// Applies a backend observation, clamping backward moves.
    pub fn advance(self, observed: EntityStatus) -> Transition {
        if observed == self {
            Transition::Unchanged(self)
        } else if self.can_transition_to(observed) {
            Transition::Applied(observed)
        } else {
            Transition::Clamped {
                kept: self,
                observed,
            }
        }
    }

    /// Canonical upper-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            EntityStatus::Created => "CREATED",
            EntityStatus::Commissioning => "COMMISSIONING",
            EntityStatus::Running => "RUNNING",
            EntityStatus::Succeeded => "SUCCEEDED",
            EntityStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityStatus {
    type Err = OrchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| invalid("status.parse", format!("unknown status {s:?}")))
    }
}

/// Counts of entities by status, used by progress and status reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    /// Entities in `CREATED`.
    pub created: usize,
    /// Entities in `COMMISSIONING`.
    pub commissioning: usize,
    /// Entities in `RUNNING`.
    pub running: usize,
    /// Entities in `SUCCEEDED`.
    pub succeeded: usize,
    /// Entities in `FAILED`.
    pub failed: usize,
}

impl StatusSummary {
    /// Builds a summary from an iterator of statuses.
    pub fn from_statuses<I: IntoIterator<Item = EntityStatus>>(statuses: I) -> Self {
        let mut summary = Self::default();
        for status in statuses {
            summary.record(status);
        }
        summary
    }

    /// Adds one entity to the summary.
    pub fn record(&mut self, status: EntityStatus) {
        match status {
            EntityStatus::Created => self.created += 1,
            EntityStatus::Commissioning => self.commissioning += 1,
            EntityStatus::Running => self.running += 1,
            EntityStatus::Succeeded => self.succeeded += 1,
            EntityStatus::Failed => self.failed += 1,
        }
    }

    /// Total number of entities recorded.
    pub fn total(&self) -> usize {
        self.created + self.commissioning + self.running + self.succeeded + self.failed
    }

    /// Number of entities in a terminal state.
    pub fn terminal(&self) -> usize {
        self.succeeded + self.failed
    }

    /// Aggregate status of a parent whose children are summarized here.
    ///
    /// Returns `None` when nothing was recorded.
    pub fn aggregate(&self) -> Option<EntityStatus> {
        let total = self.total();
        if total == 0 {
            return None;
        }
        let status = if self.terminal() == total {
            if self.failed > 0 {
                EntityStatus::Failed
            } else {
                EntityStatus::Succeeded
            }
        } else if self.running > 0 || self.terminal() > 0 {
            EntityStatus::Running
        } else if self.commissioning > 0 {
            EntityStatus::Commissioning
        } else {
            EntityStatus::Created
        };
        Some(status)
    }
}
