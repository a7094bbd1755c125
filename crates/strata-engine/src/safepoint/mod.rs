//! Cooperative thread-local safepoint actions.
//!
//! A [`SafepointAction`] is a unit of work executed by every targeted thread
//! of a context the next time that thread polls for safepoints. Targets are
//! the active-thread snapshot taken under the context lock at submission;
//! threads entering afterward are not required to join.
//!
//! Two flavors:
//! - **Synchronous**: targeted threads barrier-join on a count-down latch
//!   after performing, so all of them resume together; the submitter's
//!   handle completes when the latch reaches zero. A synchronous safepoint
//!   triggered from inside another one on the same thread is a programming
//!   error and fails fatally.
//! - **Asynchronous**: each thread performs independently and decrements a
//!   completion counter; there is no barrier.
//!
//! All waits are bounded polls at the configured interval — responsiveness
//! to cancellation is preferred over blind blocking.

pub mod pause;

use crate::context::{Context, ThreadInfo};
use crate::error::{GuestError, SafepointError};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What a targeted thread sees while performing an action.
pub struct ThreadActionAccess {
    /// The context the action was submitted against
    pub context: Arc<Context>,
    /// The executing thread's bookkeeping entry
    pub thread: Arc<ThreadInfo>,
}

/// A broadcastable unit of work executed at safepoint polls.
pub trait SafepointAction: Send + Sync {
    /// Diagnostic name
    fn name(&self) -> &str {
        "anonymous"
    }

    /// Executed once on each targeted thread, at that thread's next poll.
    fn perform(&self, access: &ThreadActionAccess) -> Result<(), GuestError>;
}

/// Count-down latch used as the synchronous barrier.
///
/// `std::sync::Barrier` cannot release waiters early, so cancellation uses
/// a latch that can be forced open. Waits poll at a bounded interval.
pub(crate) struct CountDownLatch {
    count: Mutex<usize>,
    cond: Condvar,
}

impl CountDownLatch {
    fn new(count: usize) -> Self {
        Self {
            count: Mutex::new(count),
            cond: Condvar::new(),
        }
    }

    /// Arrive and block until every participant has arrived (or the latch
    /// was forced open).
    fn arrive_and_wait(&self, poll_interval: Duration) {
        let mut count = self.count.lock();
        if *count == 0 {
            return;
        }
        *count -= 1;
        if *count == 0 {
            self.cond.notify_all();
            return;
        }
        while *count > 0 {
            self.cond.wait_for(&mut count, poll_interval);
        }
    }

    /// Force the latch open, releasing all waiters.
    fn open(&self) {
        let mut count = self.count.lock();
        *count = 0;
        self.cond.notify_all();
    }
}

enum TaskKind {
    Sync { latch: CountDownLatch },
    Async,
}

/// One submitted safepoint action: the action itself plus completion state
/// shared between the targeted threads and the submitter's handle.
pub struct ActionTask {
    action: Arc<dyn SafepointAction>,
    kind: TaskKind,
    total: usize,
    observed: AtomicUsize,
    remaining: AtomicUsize,
    done: AtomicBool,
    cancelled: AtomicBool,
    errors: Mutex<Vec<GuestError>>,
}

impl ActionTask {
    fn new(action: Arc<dyn SafepointAction>, kind: TaskKind, total: usize) -> Self {
        Self {
            action,
            kind,
            total,
            observed: AtomicUsize::new(0),
            remaining: AtomicUsize::new(total),
            done: AtomicBool::new(total == 0),
            cancelled: AtomicBool::new(false),
            errors: Mutex::new(Vec::new()),
        }
    }

    fn is_sync(&self) -> bool {
        matches!(self.kind, TaskKind::Sync { .. })
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn observed_count(&self) -> usize {
        self.observed.load(Ordering::Acquire)
    }

    pub(crate) fn target_count(&self) -> usize {
        self.total
    }

    fn cancel(&self) {
        // Cancelling an already-completed action is a no-op.
        if self.done.load(Ordering::Acquire) {
            return;
        }
        self.cancelled.store(true, Ordering::Release);
        if let TaskKind::Sync { latch } = &self.kind {
            latch.open();
        }
    }
}

/// Future-like handle returned by submission.
pub struct ActionHandle {
    task: Arc<ActionTask>,
    poll_interval: Duration,
}

impl ActionHandle {
    /// Block until the action completes on all targeted threads.
    pub fn wait(&self) -> Result<(), SafepointError> {
        loop {
            if let Some(outcome) = self.try_outcome() {
                return outcome;
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    /// Like [`wait`](Self::wait), but gives up after `timeout`.
    ///
    /// A timeout is a retryable signal: the action may still complete
    /// later, and the caller may also choose to cancel.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<(), SafepointError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(outcome) = self.try_outcome() {
                return outcome;
            }
            if Instant::now() >= deadline {
                return Err(SafepointError::Timeout);
            }
            std::thread::sleep(self.poll_interval.min(deadline - Instant::now()));
        }
    }

    /// Cancel the action. Threads that have not yet observed it skip it;
    /// a forced-open barrier releases any thread already waiting.
    pub fn cancel(&self) {
        self.task.cancel();
    }

    /// True once the action completed or was cancelled
    pub fn is_done(&self) -> bool {
        self.task.done.load(Ordering::Acquire) || self.task.is_cancelled()
    }

    /// True if the action was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.task.is_cancelled()
    }

    pub(crate) fn task(&self) -> &Arc<ActionTask> {
        &self.task
    }

    fn try_outcome(&self) -> Option<Result<(), SafepointError>> {
        if self.task.is_cancelled() {
            return Some(Err(SafepointError::Cancelled));
        }
        if self.task.done.load(Ordering::Acquire) {
            let errors = self.task.errors.lock();
            if errors.is_empty() {
                return Some(Ok(()));
            }
            return Some(Err(SafepointError::combine(errors.clone())));
        }
        None
    }
}

/// Submit a synchronous (barrier-joined) action against the context's
/// current active threads.
pub fn submit_sync(context: &Arc<Context>, action: Arc<dyn SafepointAction>) -> ActionHandle {
    submit(context, action, true)
}

/// Submit an asynchronous action against the context's current active
/// threads.
pub fn submit_async(context: &Arc<Context>, action: Arc<dyn SafepointAction>) -> ActionHandle {
    submit(context, action, false)
}

fn submit(context: &Arc<Context>, action: Arc<dyn SafepointAction>, sync: bool) -> ActionHandle {
    // Snapshot under the context lock: a thread entering after this point
    // is not targeted.
    let targets = context.active_thread_snapshot();
    let total = targets.len();
    let kind = if sync {
        TaskKind::Sync {
            latch: CountDownLatch::new(total),
        }
    } else {
        TaskKind::Async
    };
    let task = Arc::new(ActionTask::new(action, kind, total));

    if total > 0 {
        context.action_submitted();
        for info in &targets {
            info.push_action(task.clone());
        }
    }

    ActionHandle {
        task,
        poll_interval: context.config().safepoint_poll_interval,
    }
}

/// Drain and execute the calling thread's pending actions.
///
/// Called from `Context::poll_safepoint` after the fast-path flag check.
#[cold]
pub(crate) fn process_pending(context: &Arc<Context>, info: &Arc<ThreadInfo>) {
    for task in info.drain_actions() {
        execute_task(context, info, &task);
    }
}

fn execute_task(context: &Arc<Context>, info: &Arc<ThreadInfo>, task: &Arc<ActionTask>) {
    let poll_interval = context.config().safepoint_poll_interval;

    if !task.is_cancelled() {
        if task.is_sync() && info.in_safepoint() {
            // Not recoverable: a synchronous safepoint from inside another
            // safepoint on the same thread can only deadlock the barrier.
            panic!(
                "recursive synchronous safepoint: thread is already executing action '{}'",
                task.action.name()
            );
        }

        info.set_safepoint_active(true);
        task.observed.fetch_add(1, Ordering::AcqRel);
        let access = ThreadActionAccess {
            context: context.clone(),
            thread: info.clone(),
        };
        let result = task.action.perform(&access);
        info.set_safepoint_active(false);

        if let Err(error) = result {
            task.errors.lock().push(error);
        }
    }

    let prev = task.remaining.fetch_sub(1, Ordering::AcqRel);
    if prev == 1 {
        task.done.store(true, Ordering::Release);
        context.action_completed();
    }

    if let TaskKind::Sync { latch } = &task.kind {
        if !task.is_cancelled() {
            latch.arrive_and_wait(poll_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::context::LayerId;

    fn fast_context() -> Arc<Context> {
        let config =
            EngineConfig::new().safepoint_poll_interval(Duration::from_millis(1));
        Context::new(LayerId::new(), Arc::new(config))
    }

    struct CountingAction {
        runs: AtomicUsize,
    }

    impl SafepointAction for CountingAction {
        fn name(&self) -> &str {
            "counting"
        }
        fn perform(&self, _access: &ThreadActionAccess) -> Result<(), GuestError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_no_active_threads_completes_immediately() {
        let ctx = fast_context();
        let action = Arc::new(CountingAction {
            runs: AtomicUsize::new(0),
        });
        let handle = submit_sync(&ctx, action.clone());
        assert!(handle.is_done());
        handle.wait().unwrap();
        assert_eq!(action.runs.load(Ordering::SeqCst), 0);
        assert_eq!(ctx.pending_action_count(), 0);
    }

    #[test]
    fn test_single_thread_sync_action_runs_at_poll() {
        let ctx = fast_context();
        let info = ctx.enter_thread().unwrap();
        let action = Arc::new(CountingAction {
            runs: AtomicUsize::new(0),
        });

        let handle = submit_sync(&ctx, action.clone());
        assert!(!handle.is_done());
        assert_eq!(ctx.pending_action_count(), 1);

        ctx.poll_safepoint(&info);
        assert_eq!(action.runs.load(Ordering::SeqCst), 1);
        handle.wait().unwrap();
        assert_eq!(ctx.pending_action_count(), 0);

        ctx.leave_thread(&info);
    }

    #[test]
    fn test_async_action_counts_down() {
        let ctx = fast_context();
        let info = ctx.enter_thread().unwrap();
        let action = Arc::new(CountingAction {
            runs: AtomicUsize::new(0),
        });

        let handle = submit_async(&ctx, action.clone());
        ctx.poll_safepoint(&info);
        handle.wait().unwrap();
        assert_eq!(action.runs.load(Ordering::SeqCst), 1);

        ctx.leave_thread(&info);
    }

    #[test]
    fn test_cancelled_action_is_skipped() {
        let ctx = fast_context();
        let info = ctx.enter_thread().unwrap();
        let action = Arc::new(CountingAction {
            runs: AtomicUsize::new(0),
        });

        let handle = submit_sync(&ctx, action.clone());
        handle.cancel();
        assert!(matches!(
            handle.wait(),
            Err(SafepointError::Cancelled)
        ));

        // The targeted thread skips the cancelled action at its next poll.
        ctx.poll_safepoint(&info);
        assert_eq!(action.runs.load(Ordering::SeqCst), 0);

        ctx.leave_thread(&info);
    }

    #[test]
    fn test_wait_timeout_when_thread_never_polls() {
        let ctx = fast_context();
        let _info = ctx.enter_thread().unwrap();
        let handle = submit_sync(
            &ctx,
            Arc::new(CountingAction {
                runs: AtomicUsize::new(0),
            }),
        );
        assert!(matches!(
            handle.wait_timeout(Duration::from_millis(20)),
            Err(SafepointError::Timeout)
        ));
    }

    struct FailingAction;

    impl SafepointAction for FailingAction {
        fn perform(&self, _access: &ThreadActionAccess) -> Result<(), GuestError> {
            Err(GuestError::Runtime("action failed".into()))
        }
    }

    #[test]
    fn test_perform_error_reaches_handle() {
        let ctx = fast_context();
        let info = ctx.enter_thread().unwrap();
        let handle = submit_sync(&ctx, Arc::new(FailingAction));
        ctx.poll_safepoint(&info);

        match handle.wait() {
            Err(SafepointError::ActionFailed { suppressed, .. }) => {
                assert!(suppressed.is_empty());
            }
            other => panic!("unexpected: {other:?}"),
        }
        ctx.leave_thread(&info);
    }

    struct RecursiveAction {
        context: Arc<Context>,
    }

    impl SafepointAction for RecursiveAction {
        fn perform(&self, access: &ThreadActionAccess) -> Result<(), GuestError> {
            // Submitting is fine; polling from inside the action is the
            // programming error.
            let _ = submit_sync(&self.context, Arc::new(FailingAction));
            self.context.poll_safepoint(&access.thread);
            Ok(())
        }
    }

    #[test]
    #[should_panic(expected = "recursive synchronous safepoint")]
    fn test_recursive_sync_safepoint_is_fatal() {
        let ctx = fast_context();
        let info = ctx.enter_thread().unwrap();
        let _handle = submit_sync(
            &ctx,
            Arc::new(RecursiveAction {
                context: ctx.clone(),
            }),
        );
        ctx.poll_safepoint(&info);
    }
}
