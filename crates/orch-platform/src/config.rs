//! Platform configuration and per-run options.

use std::fs;
use std::path::Path;
use std::time::Duration;

use orch_core::errors::{io_error, OrchError};
use orch_core::serde::from_yaml_slice;
use orch_core::tags::TagLimits;
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::progress::ProgressSink;

/// Exponential backoff applied to experiment creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Total attempts, the first one included.
    pub attempts: u32,
    /// Delay before the second attempt, in milliseconds.
    pub base_ms: u64,
    /// Upper bound of any single delay, in milliseconds.
    pub cap_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            attempts: 4,
            base_ms: 1_000,
            cap_ms: 30_000,
        }
    }
}

impl BackoffConfig {
    /// Delay slept after failed attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let ms = self.base_ms.saturating_mul(1u64 << exp).min(self.cap_ms);
        Duration::from_millis(ms)
    }
}

/// Bounds of the retrieved-file cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached files.
    pub max_entries: usize,
    /// Maximum cached bytes.
    pub max_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 256,
            max_bytes: 512 * 1024 * 1024,
        }
    }
}

/// Which metadata descriptors backends write next to jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// Write `simulation_metadata.json`.
    pub simulation: bool,
    /// Write `experiment_metadata.json`.
    pub experiment: bool,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            simulation: true,
            experiment: true,
        }
    }
}

fn default_upload_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(8)
}

/// Every tunable of a platform. All fields default, so partial YAML
/// documents are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Simulations per `batch_create` call.
    pub batch_size: usize,
    /// Batches created in parallel.
    pub upload_concurrency: usize,
    /// Assets uploaded in parallel within one collection.
    pub asset_upload_concurrency: usize,
    /// Default poll interval, in milliseconds.
    pub refresh_interval_ms: u64,
    /// Smallest poll interval honoured, in milliseconds.
    pub min_refresh_interval_ms: u64,
    /// Default wait deadline, in seconds.
    pub timeout_secs: u64,
    /// Extra creation attempts for simulations a batch failed to create.
    pub retries: u32,
    /// Experiment creation backoff.
    pub backoff: BackoffConfig,
    /// File cache bounds.
    pub cache: CacheConfig,
    /// Tag length limits enforced before creation.
    pub tag_limits: TagLimits,
    /// Metadata descriptors to write.
    pub write_metadata: MetadataConfig,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            upload_concurrency: default_upload_concurrency(),
            asset_upload_concurrency: 4,
            refresh_interval_ms: 5_000,
            min_refresh_interval_ms: 1_000,
            timeout_secs: 24 * 60 * 60,
            retries: 1,
            backoff: BackoffConfig::default(),
            cache: CacheConfig::default(),
            tag_limits: TagLimits::default(),
            write_metadata: MetadataConfig::default(),
        }
    }
}

impl PlatformConfig {
    /// Parses a (possibly partial) YAML document.
    pub fn from_yaml_str(text: &str) -> Result<Self, OrchError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        from_yaml_slice(text.as_bytes())
    }

    /// Loads a YAML configuration file.
    pub fn load(path: &Path) -> Result<Self, OrchError> {
        let bytes = fs::read(path).map_err(|err| io_error("config.read", path.display(), err))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        from_yaml_slice(&bytes)
    }

    /// Default poll interval.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    /// Default wait deadline.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Clamps a requested poll interval to the configured floor.
    pub fn clamp_interval(&self, requested: Duration) -> Duration {
        requested.max(Duration::from_millis(self.min_refresh_interval_ms))
    }
}

/// Per-invocation overrides of [`PlatformConfig`].
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Poll until every simulation is terminal.
    pub wait_until_done: bool,
    /// Wait deadline override.
    pub timeout: Option<Duration>,
    /// Poll interval override.
    pub refresh_interval: Option<Duration>,
    /// Simulation creation retries override.
    pub retries: Option<u32>,
    /// Cooperative cancel flag observed by the poll loop.
    pub cancel: CancelToken,
    /// Receiver of progress events for this run.
    pub progress: Option<ProgressSink>,
}

impl std::fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOptions")
            .field("wait_until_done", &self.wait_until_done)
            .field("timeout", &self.timeout)
            .field("refresh_interval", &self.refresh_interval)
            .field("retries", &self.retries)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl RunOptions {
    /// Options that wait for completion.
    pub fn wait() -> Self {
        Self {
            wait_until_done: true,
            ..Self::default()
        }
    }

    /// Sets the wait deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the poll interval.
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = Some(interval);
        self
    }

    /// Sets the simulation creation retries.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Shares `cancel` with the run.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Sends progress events to `sink`.
    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }
}
