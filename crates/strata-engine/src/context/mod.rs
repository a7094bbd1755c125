//! Guest execution contexts and per-thread bookkeeping.
//!
//! A [`Context`] is one isolated guest execution environment. It owns the
//! registry of threads that have ever entered it, its lifecycle state, and
//! the per-thread safepoint queues. The registry and state are guarded by
//! the context's own lock; per-thread flags are atomics so the safepoint
//! poll fast path never takes the lock.

pub mod binding;

use crate::config::EngineConfig;
use crate::safepoint::ActionTask;
use crossbeam::queue::SegQueue;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

/// Unique identifier for a context
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

impl ContextId {
    /// Generate a new unique ContextId
    pub fn new() -> Self {
        ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

/// Identity of a code-sharing layer.
///
/// Contexts in the same layer may share compiled code artifacts; a call
/// crossing layers is an internal-consistency error.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct LayerId(u64);

static NEXT_LAYER_ID: AtomicU64 = AtomicU64::new(1);

impl LayerId {
    /// Allocate a new layer identity
    pub fn new() -> Self {
        LayerId(NEXT_LAYER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for LayerId {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle state of a context.
///
/// Transitions are monotonic toward `Closed`/`Invalid`; a context never
/// returns to an earlier state.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ContextState {
    /// Accepting enters and executing normally
    Active,
    /// An orderly close is in progress
    Closing,
    /// Execution is being cancelled
    Cancelling,
    /// A hard exit is in progress
    Exiting,
    /// Fully closed; all threads have left
    Closed,
    /// Unusable after an internal failure
    Invalid,
}

impl ContextState {
    /// Rank used to enforce monotonic transitions
    fn rank(self) -> u8 {
        match self {
            ContextState::Active => 0,
            ContextState::Closing => 1,
            ContextState::Cancelling => 2,
            ContextState::Exiting => 3,
            ContextState::Closed => 4,
            ContextState::Invalid => 5,
        }
    }

    /// True once the context has started shutting down in any form.
    ///
    /// Threads blocked in a pause wake up when this becomes true; nothing
    /// waits on a context that will never resume it.
    pub fn is_terminating(self) -> bool {
        !matches!(self, ContextState::Active)
    }
}

impl std::fmt::Display for ContextState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ContextState::Active => "active",
            ContextState::Closing => "closing",
            ContextState::Cancelling => "cancelling",
            ContextState::Exiting => "exiting",
            ContextState::Closed => "closed",
            ContextState::Invalid => "invalid",
        };
        f.write_str(s)
    }
}

/// Per-thread bookkeeping for one context.
///
/// Created lazily the first time a thread enters; deactivated when the
/// thread fully leaves. All flags are atomics: the safepoint poll fast path
/// is a single acquire load of `poll_pending`.
#[derive(Debug)]
pub struct ThreadInfo {
    thread_id: ThreadId,
    active: AtomicBool,
    cancelled: AtomicBool,
    safepoint_active: AtomicBool,
    enter_depth: AtomicUsize,
    poll_pending: AtomicBool,
    pending: SegQueue<Arc<ActionTask>>,
}

impl ThreadInfo {
    fn new(thread_id: ThreadId) -> Self {
        Self {
            thread_id,
            active: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            safepoint_active: AtomicBool::new(false),
            enter_depth: AtomicUsize::new(0),
            poll_pending: AtomicBool::new(false),
            pending: SegQueue::new(),
        }
    }

    /// The native thread this entry belongs to
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// True while the thread is entered in the context
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// True once the thread has been asked to cancel
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Current enter depth (reentrant enters nest)
    pub fn enter_depth(&self) -> usize {
        self.enter_depth.load(Ordering::Acquire)
    }

    /// True while this thread is executing a safepoint action.
    /// Used to detect illegal recursive synchronous safepoints.
    pub fn in_safepoint(&self) -> bool {
        self.safepoint_active.load(Ordering::Acquire)
    }

    pub(crate) fn set_safepoint_active(&self, active: bool) {
        self.safepoint_active.store(active, Ordering::Release);
    }

    pub(crate) fn mark_cancelled(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub(crate) fn push_action(&self, task: Arc<ActionTask>) {
        self.pending.push(task);
        self.poll_pending.store(true, Ordering::Release);
    }

    pub(crate) fn has_pending(&self) -> bool {
        self.poll_pending.load(Ordering::Acquire)
    }

    pub(crate) fn drain_actions(&self) -> Vec<Arc<ActionTask>> {
        self.poll_pending.store(false, Ordering::Release);
        let mut drained = Vec::new();
        while let Some(task) = self.pending.pop() {
            drained.push(task);
        }
        drained
    }
}

struct ContextInner {
    state: ContextState,
    seen_threads: FxHashMap<ThreadId, Arc<ThreadInfo>>,
    closing_thread: Option<ThreadId>,
}

/// One guest execution environment.
pub struct Context {
    id: ContextId,
    sharing_layer: LayerId,
    config: Arc<EngineConfig>,
    inner: Mutex<ContextInner>,
    pending_actions: AtomicUsize,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("sharing_layer", &self.sharing_layer)
            .finish_non_exhaustive()
    }
}

impl Context {
    /// Create a context in the given sharing layer.
    pub fn new(sharing_layer: LayerId, config: Arc<EngineConfig>) -> Arc<Self> {
        Arc::new(Self {
            id: ContextId::new(),
            sharing_layer,
            config,
            inner: Mutex::new(ContextInner {
                state: ContextState::Active,
                seen_threads: FxHashMap::default(),
                closing_thread: None,
            }),
            pending_actions: AtomicUsize::new(0),
        })
    }

    /// Context identity
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// The sharing layer this context belongs to
    pub fn sharing_layer(&self) -> LayerId {
        self.sharing_layer
    }

    /// Engine configuration in effect for this context
    pub fn config(&self) -> &Arc<EngineConfig> {
        &self.config
    }

    /// Current lifecycle state
    pub fn state(&self) -> ContextState {
        self.inner.lock().state
    }

    /// Advance the lifecycle state.
    ///
    /// Transitions only move forward; an attempt to regress is ignored.
    /// Returns true if the state changed.
    pub fn set_state(&self, new: ContextState) -> bool {
        let mut inner = self.inner.lock();
        if new.rank() <= inner.state.rank() {
            return false;
        }
        inner.state = new;
        true
    }

    /// The thread performing the close, if a close has started
    pub fn closing_thread(&self) -> Option<ThreadId> {
        self.inner.lock().closing_thread
    }

    /// Bookkeeping entry for the calling thread, created on first use.
    pub fn current_thread_info(&self) -> Arc<ThreadInfo> {
        let thread_id = std::thread::current().id();
        let mut inner = self.inner.lock();
        inner
            .seen_threads
            .entry(thread_id)
            .or_insert_with(|| Arc::new(ThreadInfo::new(thread_id)))
            .clone()
    }

    /// Mark the calling thread as entered.
    ///
    /// Fails once the context is terminating, except for the closing thread
    /// itself (which must still be able to run cleanup).
    pub fn enter_thread(&self) -> Result<Arc<ThreadInfo>, ContextState> {
        let thread_id = std::thread::current().id();
        let mut inner = self.inner.lock();
        if inner.state.is_terminating() && inner.closing_thread != Some(thread_id) {
            return Err(inner.state);
        }
        let info = inner
            .seen_threads
            .entry(thread_id)
            .or_insert_with(|| Arc::new(ThreadInfo::new(thread_id)))
            .clone();
        info.enter_depth.fetch_add(1, Ordering::AcqRel);
        info.active.store(true, Ordering::Release);
        Ok(info)
    }

    /// Mark the calling thread as left. The entry deactivates when the
    /// outermost enter unwinds.
    pub fn leave_thread(&self, info: &Arc<ThreadInfo>) {
        let prev = info.enter_depth.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "leave without matching enter");
        if prev == 1 {
            info.active.store(false, Ordering::Release);
            self.maybe_finish_close();
        }
    }

    /// Snapshot of currently active threads, taken under the context lock.
    ///
    /// Threads that enter after the snapshot are not part of any action
    /// submitted against it.
    pub fn active_thread_snapshot(&self) -> Vec<Arc<ThreadInfo>> {
        let inner = self.inner.lock();
        inner
            .seen_threads
            .values()
            .filter(|info| info.is_active())
            .cloned()
            .collect()
    }

    /// Number of safepoint actions submitted but not yet fully completed.
    pub fn pending_action_count(&self) -> usize {
        self.pending_actions.load(Ordering::Acquire)
    }

    pub(crate) fn action_submitted(&self) {
        self.pending_actions.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn action_completed(&self) {
        let prev = self.pending_actions.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "completed more actions than were submitted");
    }

    /// Cooperative safepoint poll.
    ///
    /// Guest execution calls this at well-defined points (loop back-edges,
    /// call sites, allocations). Fast path is a single atomic load.
    #[inline(always)]
    pub fn poll_safepoint(self: &Arc<Self>, info: &Arc<ThreadInfo>) {
        if info.has_pending() {
            crate::safepoint::process_pending(self, info);
        }
    }

    /// Begin an orderly close on the calling thread.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.state.is_terminating() {
                return;
            }
            inner.closing_thread = Some(std::thread::current().id());
            inner.state = ContextState::Closing;
        }
        self.maybe_finish_close();
    }

    /// Cancel execution: the state moves to Cancelling and every seen
    /// thread is flagged.
    pub fn cancel(&self) {
        let mut inner = self.inner.lock();
        if inner.state.rank() >= ContextState::Cancelling.rank() {
            return;
        }
        inner.state = ContextState::Cancelling;
        for info in inner.seen_threads.values() {
            info.mark_cancelled();
        }
    }

    /// Begin a hard exit.
    pub fn exit(&self) {
        let mut inner = self.inner.lock();
        if inner.state.rank() >= ContextState::Exiting.rank() {
            return;
        }
        inner.state = ContextState::Exiting;
        for info in inner.seen_threads.values() {
            info.mark_cancelled();
        }
    }

    /// Mark the context unusable after an internal failure.
    pub fn invalidate(&self) {
        let mut inner = self.inner.lock();
        inner.state = ContextState::Invalid;
    }

    /// Finish the close once no thread remains entered.
    fn maybe_finish_close(&self) {
        let mut inner = self.inner.lock();
        if inner.state != ContextState::Closing {
            return;
        }
        let any_active = inner.seen_threads.values().any(|info| info.is_active());
        if !any_active {
            inner.state = ContextState::Closed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_context() -> Arc<Context> {
        Context::new(LayerId::new(), Arc::new(EngineConfig::new()))
    }

    #[test]
    fn test_context_starts_active() {
        let ctx = test_context();
        assert_eq!(ctx.state(), ContextState::Active);
        assert_eq!(ctx.pending_action_count(), 0);
        assert!(ctx.closing_thread().is_none());
    }

    #[test]
    fn test_state_is_monotonic() {
        let ctx = test_context();
        assert!(ctx.set_state(ContextState::Cancelling));
        // Regressing to Closing (lower rank) is ignored.
        assert!(!ctx.set_state(ContextState::Closing));
        assert_eq!(ctx.state(), ContextState::Cancelling);
        assert!(ctx.set_state(ContextState::Closed));
    }

    #[test]
    fn test_enter_leave_tracks_depth_and_activity() {
        let ctx = test_context();
        let info = ctx.enter_thread().unwrap();
        assert!(info.is_active());
        assert_eq!(info.enter_depth(), 1);

        // Reentrant enter nests.
        let inner = ctx.enter_thread().unwrap();
        assert_eq!(inner.enter_depth(), 2);

        ctx.leave_thread(&inner);
        assert!(info.is_active());
        ctx.leave_thread(&info);
        assert!(!info.is_active());
    }

    #[test]
    fn test_enter_rejected_after_close() {
        let ctx = test_context();
        ctx.cancel();
        let err = ctx.enter_thread().unwrap_err();
        assert_eq!(err, ContextState::Cancelling);
    }

    #[test]
    fn test_closing_thread_may_still_enter() {
        let ctx = test_context();
        // Keep another "thread" active so close does not finish immediately.
        let outer = ctx.enter_thread().unwrap();
        ctx.close();
        assert_eq!(ctx.state(), ContextState::Closing);
        // The closing thread (this one) can re-enter for cleanup.
        let cleanup = ctx.enter_thread().unwrap();
        ctx.leave_thread(&cleanup);
        ctx.leave_thread(&outer);
        assert_eq!(ctx.state(), ContextState::Closed);
    }

    #[test]
    fn test_close_with_no_threads_goes_straight_to_closed() {
        let ctx = test_context();
        ctx.close();
        assert_eq!(ctx.state(), ContextState::Closed);
    }

    #[test]
    fn test_cancel_flags_seen_threads() {
        let ctx = test_context();
        let info = ctx.enter_thread().unwrap();
        assert!(!info.is_cancelled());
        ctx.cancel();
        assert!(info.is_cancelled());
        ctx.leave_thread(&info);
    }

    #[test]
    fn test_snapshot_only_contains_active_threads() {
        let ctx = test_context();
        assert!(ctx.active_thread_snapshot().is_empty());

        let info = ctx.enter_thread().unwrap();
        assert_eq!(ctx.active_thread_snapshot().len(), 1);
        ctx.leave_thread(&info);
        assert!(ctx.active_thread_snapshot().is_empty());
    }

    #[test]
    fn test_thread_info_reused_per_thread() {
        let ctx = test_context();
        let a = ctx.current_thread_info();
        let b = ctx.current_thread_info();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
