//! Speculative single-value caching.
//!
//! [`WeakAssumedValue`] caches a "probably constant" value behind an
//! invalidatable assumption, holding the value weakly so the cache never
//! keeps it alive. The state machine is {Unset, Speculated, Invalid}: the
//! tag lives in one atomic so the read fast path is a single acquire load,
//! and the slot itself is only written under a short-lived lock on state
//! transitions. A spurious race costs a redundant recomputation, never a
//! stale observation.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

const STATE_UNSET: u8 = 0;
const STATE_SPECULATED: u8 = 1;
const STATE_INVALID: u8 = 2;

/// A speculative single-value cache with weak retention.
///
/// Once two distinct values have been observed within one epoch, the cache
/// is permanently invalid until [`reset`](WeakAssumedValue::reset) starts a
/// fresh epoch. The cached value may be silently dropped when its weak
/// target is reclaimed; callers must treat `None` as "re-resolve".
pub struct WeakAssumedValue<T> {
    state: AtomicU8,
    slot: Mutex<Option<Weak<T>>>,
}

impl<T> WeakAssumedValue<T> {
    /// Create an empty (Unset) cache
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(STATE_UNSET),
            slot: Mutex::new(None),
        }
    }

    /// Return the speculated value, if the speculation is still valid and
    /// the value is still alive.
    pub fn get_constant(&self) -> Option<Arc<T>> {
        if self.state.load(Ordering::Acquire) != STATE_SPECULATED {
            return None;
        }
        self.slot.lock().as_ref().and_then(Weak::upgrade)
    }

    /// Record an observed value.
    ///
    /// The first value observed becomes the speculation. Re-observing the
    /// same `Arc` identity is a no-op. Observing a distinct identity (or a
    /// value whose predecessor was already reclaimed) invalidates exactly
    /// once; the cache then stays invalid until `reset`.
    pub fn update(&self, value: &Arc<T>) {
        match self.state.load(Ordering::Acquire) {
            STATE_INVALID => {}
            STATE_UNSET => {
                let mut slot = self.slot.lock();
                // Re-check under the lock: another thread may have raced us
                // through either transition.
                match self.state.load(Ordering::Acquire) {
                    STATE_UNSET => {
                        *slot = Some(Arc::downgrade(value));
                        self.state.store(STATE_SPECULATED, Ordering::Release);
                    }
                    STATE_SPECULATED => {
                        drop(slot);
                        self.check_same(value);
                    }
                    _ => {}
                }
            }
            STATE_SPECULATED => self.check_same(value),
            _ => unreachable!("corrupt WeakAssumedValue state"),
        }
    }

    fn check_same(&self, value: &Arc<T>) {
        let mut slot = self.slot.lock();
        if self.state.load(Ordering::Acquire) != STATE_SPECULATED {
            return;
        }
        let same = slot
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|current| Arc::ptr_eq(&current, value))
            // Reclaimed predecessor: identity can no longer be proven equal.
            .unwrap_or(false);
        if !same {
            *slot = None;
            self.state.store(STATE_INVALID, Ordering::Release);
        }
    }

    /// Invalidate the speculation unconditionally.
    pub fn invalidate(&self) {
        let mut slot = self.slot.lock();
        *slot = None;
        self.state.store(STATE_INVALID, Ordering::Release);
    }

    /// Start a fresh epoch: back to Unset, ready to speculate again.
    pub fn reset(&self) {
        let mut slot = self.slot.lock();
        *slot = None;
        self.state.store(STATE_UNSET, Ordering::Release);
    }

    /// True while the speculation holds (Speculated state).
    pub fn is_valid(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_SPECULATED
    }
}

impl<T> Default for WeakAssumedValue<T> {
    fn default() -> Self {
        Self::new()
    }
}
