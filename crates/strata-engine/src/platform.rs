//! Injected platform services.
//!
//! Process-wide native facilities (thread priority adjustment today) are
//! modeled as an injected service with an explicit initialization lifecycle
//! rather than static loader state. The engine initializes the service it
//! was configured with during construction and never touches globals.

use crate::error::{EngineError, EngineResult};
use std::sync::atomic::{AtomicBool, Ordering};

/// Relative priority for engine-managed threads.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ThreadPriority {
    /// Default scheduling priority
    Normal,
    /// Elevated priority for latency-sensitive workers
    High,
}

/// Platform abstraction consumed by the engine.
///
/// Implementations must be safe to share across threads. `initialize` is
/// called exactly once per engine, before any other method.
pub trait PlatformServices: Send + Sync {
    /// Perform one-time setup. Called during engine construction.
    fn initialize(&self) -> EngineResult<()> {
        Ok(())
    }

    /// Adjust the calling thread's priority. Returns false when the
    /// platform does not support the request; never an error.
    fn set_thread_priority(&self, priority: ThreadPriority) -> bool;

    /// Human-readable service name for diagnostics
    fn name(&self) -> &str;
}

/// Default platform service backed by the host OS.
pub struct HostPlatform {
    initialized: AtomicBool,
}

impl HostPlatform {
    /// Create an uninitialized host platform service
    pub fn new() -> Self {
        Self {
            initialized: AtomicBool::new(false),
        }
    }

    /// Whether `initialize` has run
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }
}

impl Default for HostPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformServices for HostPlatform {
    fn initialize(&self) -> EngineResult<()> {
        if self.initialized.swap(true, Ordering::AcqRel) {
            return Err(EngineError::Config(
                "platform services initialized twice".to_string(),
            ));
        }
        Ok(())
    }

    #[cfg(unix)]
    fn set_thread_priority(&self, priority: ThreadPriority) -> bool {
        let nice = match priority {
            ThreadPriority::Normal => 0,
            ThreadPriority::High => -5,
        };
        // Raising priority needs privileges on most systems; a refusal is
        // reported, not fatal.
        unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, nice) == 0 }
    }

    #[cfg(not(unix))]
    fn set_thread_priority(&self, _priority: ThreadPriority) -> bool {
        false
    }

    fn name(&self) -> &str {
        "host"
    }
}

/// Platform service that supports nothing; useful in tests.
pub struct NoopPlatform;

impl PlatformServices for NoopPlatform {
    fn set_thread_priority(&self, _priority: ThreadPriority) -> bool {
        false
    }

    fn name(&self) -> &str {
        "noop"
    }
}
