//! Entity model of an orchestrated sweep: suites, experiments, simulations,
//! work items, and the lazy builders that expand parameter sweeps.

pub mod experiment;
pub mod lifecycle;
pub mod metadata;
pub mod plan;
pub mod simulation;
pub mod suite;
pub mod sweep;
pub mod templated;
pub mod work_item;

pub use experiment::{Experiment, PendingSimulations, SimulationSource};
pub use lifecycle::apply_status;
pub use metadata::{ExperimentMetadata, SimulationMetadata, SuiteMetadata, WorkItemMetadata};
pub use plan::{PlanParameter, RangeParameter, SweepPlan, SweepStrategy};
pub use simulation::Simulation;
pub use suite::Suite;
pub use sweep::{set_parameter, ArmBuilder, Builder, SweepBuilder, SweepCallback, SweepDefinition, SweepMode};
pub use templated::{TemplatedIter, TemplatedSimulations};
pub use work_item::{FileFilter, RelatedItems, WorkItem};
