//! Thread-local context binding with a single-thread fast path.
//!
//! [`AssumedSingleThread`] optimistically assumes one thread accesses the
//! cell: while that holds, the binding lives in a single slot with no
//! per-thread indirection. The first access from a second distinct thread
//! invalidates the assumption exactly once and every later access goes
//! through a true thread-indexed store. The degradation is one-way for the
//! lifetime of the cell.
//!
//! [`ContextLocalBinding`] layers the engine-worker special case on top:
//! pool workers keep their binding in a field on the thread itself (a
//! thread-local slot owned by the pool) and never touch the shared store.

use crate::context::Context;
use crate::pool;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

struct FastSlot<T> {
    first_thread: Option<ThreadId>,
    value: Option<T>,
}

/// A cell that assumes a single accessing thread until proven otherwise.
///
/// The fast slot is guarded by an uncontended mutex: the point of the fast
/// path is avoiding the per-thread map lookup, not avoiding synchronization
/// altogether. Once degraded, the slot is migrated into the map and the
/// assumption flag (checked with one atomic load) routes all traffic there.
pub struct AssumedSingleThread<T: Clone> {
    single_threaded: AtomicBool,
    fast: Mutex<FastSlot<T>>,
    degraded: DashMap<ThreadId, T>,
}

impl<T: Clone> AssumedSingleThread<T> {
    /// Create an empty cell with the single-thread assumption intact
    pub fn new() -> Self {
        Self {
            single_threaded: AtomicBool::new(true),
            fast: Mutex::new(FastSlot {
                first_thread: None,
                value: None,
            }),
            degraded: DashMap::new(),
        }
    }

    /// True while the single-thread assumption still holds
    pub fn is_single_threaded(&self) -> bool {
        self.single_threaded.load(Ordering::Acquire)
    }

    /// Value stored for the calling thread
    pub fn get(&self) -> Option<T> {
        let thread_id = std::thread::current().id();
        if self.single_threaded.load(Ordering::Acquire) {
            let mut fast = self.fast.lock();
            match fast.first_thread {
                None => return None,
                Some(first) if first == thread_id => return fast.value.clone(),
                Some(_) => {
                    // Second distinct thread observed: degrade exactly once.
                    self.invalidate(&mut fast);
                }
            }
        }
        self.degraded.get(&thread_id).map(|entry| entry.clone())
    }

    /// Store a value for the calling thread, returning the previous one.
    pub fn set(&self, value: Option<T>) -> Option<T> {
        let thread_id = std::thread::current().id();
        if self.single_threaded.load(Ordering::Acquire) {
            let mut fast = self.fast.lock();
            match fast.first_thread {
                None => {
                    fast.first_thread = Some(thread_id);
                    return std::mem::replace(&mut fast.value, value);
                }
                Some(first) if first == thread_id => {
                    return std::mem::replace(&mut fast.value, value);
                }
                Some(_) => {
                    self.invalidate(&mut fast);
                }
            }
        }
        match value {
            Some(v) => self.degraded.insert(thread_id, v),
            None => self.degraded.remove(&thread_id).map(|(_, v)| v),
        }
    }

    /// Migrate the fast slot into the per-thread store and drop the
    /// assumption. Runs at most once; caller holds the fast-slot lock.
    fn invalidate(&self, fast: &mut FastSlot<T>) {
        if let (Some(first), Some(value)) = (fast.first_thread, fast.value.take()) {
            self.degraded.insert(first, value);
        }
        self.single_threaded.store(false, Ordering::Release);
    }
}

impl<T: Clone> Default for AssumedSingleThread<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-thread "current context" binding for one engine.
pub struct ContextLocalBinding {
    store: AssumedSingleThread<Arc<Context>>,
}

impl ContextLocalBinding {
    /// Create an empty binding
    pub fn new() -> Self {
        Self {
            store: AssumedSingleThread::new(),
        }
    }

    /// Context currently bound to the calling thread, if any.
    pub fn get(&self) -> Option<Arc<Context>> {
        if pool::is_worker_thread() {
            return pool::worker_binding();
        }
        self.store.get()
    }

    /// Bind a context to the calling thread, returning the previous
    /// binding. Callers restore the previous value on leave.
    pub fn set(&self, value: Option<Arc<Context>>) -> Option<Arc<Context>> {
        if pool::is_worker_thread() {
            return pool::set_worker_binding(value);
        }
        self.store.set(value)
    }

    /// Unsupported: bindings are restored by a paired `set`, never removed.
    pub fn remove(&self) -> ! {
        panic!("ContextLocalBinding::remove is unsupported; restore the previous binding with set instead");
    }

    /// True while only one thread has ever touched the binding
    pub fn is_single_threaded(&self) -> bool {
        self.store.is_single_threaded()
    }
}

impl Default for ContextLocalBinding {
    fn default() -> Self {
        Self::new()
    }
}
