use std::error::Error;
use std::path::PathBuf;

use clap::Args;
use orch_entities::SweepPlan;
use serde::Serialize;

use super::print_json;

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Sweep plan to check.
    #[arg(long)]
    pub plan: PathBuf,
}

#[derive(Debug, Serialize)]
struct PlanSummary {
    name: String,
    simulations: usize,
    plan_hash: String,
}

pub fn run(args: &ValidateArgs) -> Result<bool, Box<dyn Error>> {
    let plan = SweepPlan::load(&args.plan)?;
    print_json(&PlanSummary {
        name: plan.name.clone(),
        simulations: plan.simulation_count()?,
        plan_hash: plan.plan_hash()?,
    })?;
    Ok(true)
}
