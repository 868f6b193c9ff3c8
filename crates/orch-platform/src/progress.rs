use std::sync::Arc;

use orch_core::status::StatusSummary;
use tracing::info;

/// Milestones reported while a run progresses.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// An experiment and its common assets were created.
    ExperimentCreated {
        /// Experiment id.
        experiment: String,
        /// Id of the common asset collection.
        assets_id: Option<String>,
    },
    /// A batch of simulations went through creation.
    SimulationsCreated {
        /// Parent experiment id.
        experiment: String,
        /// Simulations created so far.
        created: usize,
        /// Simulations that failed creation so far.
        failed: usize,
        /// Expected total, when the source knows it.
        expected: Option<usize>,
    },
    /// The experiment was started on the backend.
    RunStarted {
        /// Experiment id.
        experiment: String,
    },
    /// One poll of the wait loop finished.
    StatusRefreshed {
        /// Experiment id.
        experiment: String,
        /// Counts by status.
        summary: StatusSummary,
    },
}

/// Receiver of progress events.
pub type ProgressSink = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

pub(crate) fn emit(sinks: &[&ProgressSink], event: ProgressEvent) {
    match &event {
        ProgressEvent::ExperimentCreated { experiment, assets_id } => {
            info!(%experiment, assets = assets_id.as_deref().unwrap_or("-"), "experiment created");
        }
        ProgressEvent::SimulationsCreated {
            experiment,
            created,
            failed,
            expected,
        } => {
            info!(%experiment, created, failed, expected = ?expected, "simulation batch created");
        }
        ProgressEvent::RunStarted { experiment } => info!(%experiment, "experiment started"),
        ProgressEvent::StatusRefreshed { experiment, summary } => {
            info!(
                %experiment,
                running = summary.running,
                succeeded = summary.succeeded,
                failed = summary.failed,
                "status refreshed"
            );
        }
    }
    for sink in sinks {
        sink(&event);
    }
}
