//! Platform resolution: explicit argument, then the scoped stack of the
//! current thread, then the single global platform.

use std::cell::RefCell;
use std::sync::{Arc, Mutex, OnceLock};

use orch_core::errors::{ErrorInfo, OrchError};

use crate::platform::Platform;

thread_local! {
    static STACK: RefCell<Vec<Arc<Platform>>> = const { RefCell::new(Vec::new()) };
}

fn global() -> &'static Mutex<Option<Arc<Platform>>> {
    static GLOBAL: OnceLock<Mutex<Option<Arc<Platform>>>> = OnceLock::new();
    GLOBAL.get_or_init(|| Mutex::new(None))
}

/// Registers the process-wide fallback platform, replacing any previous one.
pub fn set_global_platform(platform: Arc<Platform>) {
    let mut slot = global().lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    *slot = Some(platform);
}

/// Removes the process-wide fallback platform.
pub fn clear_global_platform() {
    let mut slot = global().lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    *slot = None;
}

/// Guard returned by [`enter`]; pops the platform when dropped.
#[derive(Debug)]
pub struct PlatformScope {
    _private: (),
}

impl Drop for PlatformScope {
    fn drop(&mut self) {
        STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Makes `platform` the current platform of this thread until the returned
/// guard is dropped. Scopes nest.
pub fn enter(platform: Arc<Platform>) -> PlatformScope {
    STACK.with(|stack| stack.borrow_mut().push(platform));
    PlatformScope { _private: () }
}

/// Innermost scoped platform of this thread.
pub fn current_platform() -> Option<Arc<Platform>> {
    STACK.with(|stack| stack.borrow().last().cloned())
}

/// Resolves the platform a run binds to.
pub fn resolve_platform(explicit: Option<&Arc<Platform>>) -> Result<Arc<Platform>, OrchError> {
    if let Some(platform) = explicit {
        return Ok(Arc::clone(platform));
    }
    if let Some(platform) = current_platform() {
        return Ok(platform);
    }
    let slot = global().lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    slot.clone().ok_or_else(|| {
        OrchError::NotFound(
            ErrorInfo::new("platform.unresolved", "no platform given, scoped or registered")
                .with_hint("pass a platform, enter a platform scope or register a global platform"),
        )
    })
}
