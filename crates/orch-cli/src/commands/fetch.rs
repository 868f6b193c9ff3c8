use std::error::Error;
use std::fs;
use std::path::PathBuf;

use clap::Args;
use tracing::info;

use super::BackendArgs;

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Simulation id.
    #[arg(long)]
    pub simulation: String,
    /// Files to copy, relative to the job directory.
    #[arg(long = "file", value_name = "PATH", required = true)]
    pub files: Vec<String>,
    /// Destination directory; files land in `<out>/<simulation>/`.
    #[arg(long)]
    pub out: PathBuf,
    #[command(flatten)]
    pub backend: BackendArgs,
}

pub fn run(args: &FetchArgs) -> Result<bool, Box<dyn Error>> {
    let (platform, _) = args.backend.open()?;
    let simulation = platform.get_simulation(&args.simulation)?;
    let wanted: Vec<&str> = args.files.iter().map(String::as_str).collect();
    let files = platform.get_files(&simulation, &wanted)?;
    let dest = args.out.join(&args.simulation);
    for (path, content) in &files {
        let target = dest.join(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, content)?;
        info!(file = %target.display(), bytes = content.len(), "fetched");
    }
    Ok(true)
}
