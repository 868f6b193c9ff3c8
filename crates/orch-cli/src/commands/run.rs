use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use orch_core::id_file::{default_id_file_path, write_id_file};
use orch_core::status::StatusSummary;
use orch_entities::SweepPlan;
use orch_platform::RunOptions;
use serde::Serialize;
use tracing::{info, warn};

use super::{base_dir, print_json, BackendArgs};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Sweep plan describing the experiment.
    #[arg(long)]
    pub plan: PathBuf,
    #[command(flatten)]
    pub backend: BackendArgs,
    /// Block until every simulation finished.
    #[arg(long)]
    pub wait: bool,
    /// Give up waiting after this many seconds.
    #[arg(long)]
    pub timeout: Option<u64>,
    /// Where to write the experiment id file; defaults to the job directory.
    #[arg(long)]
    pub id_file: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct RunSummary {
    experiment: String,
    suite: Option<String>,
    id_file: PathBuf,
    waited: bool,
    summary: StatusSummary,
    creation_failures: Vec<String>,
}

/// Exits successfully when every simulation succeeded; without `--wait`,
/// when every simulation was created.
pub fn run(args: &RunArgs) -> Result<bool, Box<dyn Error>> {
    let plan = SweepPlan::load(&args.plan)?;
    let mut experiment = plan.build_experiment(&base_dir(&args.plan))?;
    let (platform, backend) = args.backend.open()?;

    let mut options = if args.wait {
        RunOptions::wait()
    } else {
        RunOptions::default()
    };
    if let Some(secs) = args.timeout {
        options = options.with_timeout(Duration::from_secs(secs));
    }

    info!(plan = %args.plan.display(), simulations = plan.simulation_count()?, "running plan");
    let report = platform.run_experiment(&mut experiment, &options)?;
    let id_file = match &args.id_file {
        Some(path) => path.clone(),
        None => default_id_file_path(&args.backend.jobs, &experiment)?,
    };
    write_id_file(&id_file, &experiment, Some(platform.name()), None)?;
    for failure in &report.creation_failures {
        warn!(error = %failure, "simulation was not created");
    }

    let ok = if report.waited {
        report.succeeded()
    } else {
        report.creation_failures.is_empty()
    };
    print_json(&RunSummary {
        experiment: experiment.id().unwrap_or_default().to_string(),
        suite: report.suite_id.clone(),
        id_file,
        waited: report.waited,
        summary: report.summary,
        creation_failures: report.creation_failures.iter().map(ToString::to_string).collect(),
    })?;
    if !report.waited {
        info!("waiting for local jobs to exit");
        backend.wait_idle();
    }
    Ok(ok)
}
