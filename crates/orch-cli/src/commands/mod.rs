pub mod fetch;
pub mod run;
pub mod status;
pub mod validate;

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Args;
use orch_platform::{FileBackend, Platform, PlatformConfig};
use serde::Serialize;

/// Options shared by every command that talks to a job directory.
#[derive(Args, Debug, Clone)]
pub struct BackendArgs {
    /// Root of the local job directory.
    #[arg(long, default_value = "jobs")]
    pub jobs: PathBuf,
    /// YAML platform configuration; missing fields take their defaults.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Jobs allowed to run at once.
    #[arg(long)]
    pub workers: Option<usize>,
}

impl BackendArgs {
    /// Platform over the job directory, plus the backend for callers that
    /// must outlive local jobs.
    pub fn open(&self) -> Result<(Platform, Arc<FileBackend>), Box<dyn Error>> {
        let config = match &self.config {
            Some(path) => PlatformConfig::load(path)?,
            None => PlatformConfig::default(),
        };
        let mut backend = FileBackend::open(&self.jobs)?;
        if let Some(workers) = self.workers {
            backend = backend.with_workers(workers)?;
        }
        let backend = Arc::new(backend);
        let platform = Platform::new(backend.clone()).with_config(config);
        Ok((platform, backend))
    }
}

pub fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn base_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}
