//! Backend-neutral dispatch for orch: the operations every backend provides,
//! the `Platform` façade, the lifecycle driver and two reference backends.

pub mod backends;
pub mod cache;
pub mod cancel;
pub mod config;
pub mod context;
pub mod driver;
pub mod hooks;
pub mod operations;
pub mod platform;
pub mod progress;
pub mod retry;

pub use backends::{FileBackend, MemoryBackend, OpKind, OpRecord, SimulationScript};
pub use cache::{CacheStats, FileCache};
pub use cancel::CancelToken;
pub use config::{BackoffConfig, CacheConfig, MetadataConfig, PlatformConfig, RunOptions};
pub use context::{clear_global_platform, current_platform, enter, resolve_platform, set_global_platform, PlatformScope};
pub use driver::{RunReport, Runnable, WaitOutcome};
pub use hooks::{FnHook, HookRegistry, HookSite, ItemRef, PlatformHook};
pub use operations::{Backend, BlobStore, ItemOperations};
pub use platform::{FileMap, Platform};
pub use progress::{ProgressEvent, ProgressSink};
pub use retry::with_backoff;
