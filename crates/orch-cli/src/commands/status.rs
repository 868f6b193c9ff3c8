use std::error::Error;
use std::path::PathBuf;

use clap::Args;
use orch_core::ids::ItemType;
use orch_core::status::{EntityStatus, StatusSummary};
use serde::Serialize;

use super::{print_json, BackendArgs};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Id file written by `orch run`.
    #[arg(long)]
    pub id_file: PathBuf,
    #[command(flatten)]
    pub backend: BackendArgs,
    /// List every simulation with its status.
    #[arg(long)]
    pub simulations: bool,
}

#[derive(Debug, Serialize)]
struct SimulationLine {
    id: String,
    status: EntityStatus,
    tags: orch_core::tags::Tags,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    experiment: String,
    name: String,
    status: EntityStatus,
    summary: StatusSummary,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    simulations: Vec<SimulationLine>,
}

/// Exits successfully when every simulation succeeded.
pub fn run(args: &StatusArgs) -> Result<bool, Box<dyn Error>> {
    let (platform, _) = args.backend.open()?;
    let handle = platform.get_item_from_id_file(&args.id_file)?;
    if handle.item_type != ItemType::Experiment {
        return Err(format!("{} does not point at an experiment", args.id_file.display()).into());
    }
    let experiment = platform.get_experiment(&handle.id, true)?;
    let simulations = if args.simulations {
        experiment
            .simulations()
            .iter()
            .map(|simulation| SimulationLine {
                id: simulation.id().unwrap_or_default().to_string(),
                status: simulation.status(),
                tags: simulation.tags.clone(),
            })
            .collect()
    } else {
        Vec::new()
    };
    print_json(&StatusReport {
        experiment: handle.id.clone(),
        name: experiment.name.clone(),
        status: experiment.status(),
        summary: experiment.status_summary(),
        simulations,
    })?;
    Ok(experiment.succeeded())
}
