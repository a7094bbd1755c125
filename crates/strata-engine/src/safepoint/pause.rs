//! Pausing all threads of a context at a safepoint.
//!
//! Pause is a specialization of the synchronous safepoint: the action's
//! `perform` blocks the executing thread on a condvar until `resume()` is
//! called or the context begins terminating. The thread closing the context
//! is exempt — it must keep making progress toward the close.

use crate::context::Context;
use crate::error::{GuestError, SafepointError};
use crate::safepoint::{
    submit_sync, ActionHandle, SafepointAction, ThreadActionAccess,
};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct PauseShared {
    resumed: Mutex<bool>,
    cond: Condvar,
    cancelled: AtomicBool,
}

struct PauseAction {
    shared: Arc<PauseShared>,
}

impl SafepointAction for PauseAction {
    fn name(&self) -> &str {
        "pause"
    }

    fn perform(&self, access: &ThreadActionAccess) -> Result<(), GuestError> {
        // The closing thread observes the pause but never blocks in it.
        if access.context.closing_thread() == Some(access.thread.thread_id()) {
            return Ok(());
        }
        let poll_interval = access.context.config().safepoint_poll_interval;
        let mut resumed = self.shared.resumed.lock();
        while !*resumed {
            // Context shutdown takes precedence over an active pause: the
            // thread wakes and proceeds toward termination.
            if access.context.state().is_terminating() {
                break;
            }
            if self.shared.cancelled.load(Ordering::Acquire) {
                break;
            }
            self.shared
                .cond
                .wait_for(&mut resumed, poll_interval);
        }
        Ok(())
    }
}

/// Suspends all threads of a context at a safepoint until resumed.
pub struct PauseController;

impl PauseController {
    /// Pause every currently active thread of `context`.
    ///
    /// Returns immediately; use the handle to wait until all targeted
    /// threads have actually reached the pause.
    pub fn pause(context: &Arc<Context>) -> PauseHandle {
        let shared = Arc::new(PauseShared {
            resumed: Mutex::new(false),
            cond: Condvar::new(),
            cancelled: AtomicBool::new(false),
        });
        let action = Arc::new(PauseAction {
            shared: shared.clone(),
        });
        let handle = submit_sync(context, action);
        PauseHandle {
            poll_interval: context.config().safepoint_poll_interval,
            handle,
            shared,
        }
    }
}

/// Future-shaped handle controlling one pause.
pub struct PauseHandle {
    poll_interval: Duration,
    handle: ActionHandle,
    shared: Arc<PauseShared>,
}

impl PauseHandle {
    /// Block until every targeted thread has reached the pause.
    pub fn wait(&self) -> Result<(), SafepointError> {
        loop {
            if let Some(outcome) = self.try_outcome() {
                return outcome;
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    /// Like [`wait`](Self::wait), with a deadline. A timeout is retryable.
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

    /// Release all paused threads.
    pub fn resume(&self) {
        let mut resumed = self.shared.resumed.lock();
        *resumed = true;
        self.shared.cond.notify_all();
    }

    /// Release the pause and mark the handle cancelled (terminal).
    ///
    /// Already-observed side effects are not rolled back.
    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::Release);
        self.handle.cancel();
        self.shared.cond.notify_all();
    }

    /// True once all targeted threads paused, or the pause was cancelled
    /// or completed.
    pub fn is_done(&self) -> bool {
        self.all_paused() || self.handle.is_done()
    }

    /// True if the pause was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled()
    }

    /// Number of threads currently known to have reached the pause
    pub fn paused_count(&self) -> usize {
        self.handle.task().observed_count()
    }

    fn all_paused(&self) -> bool {
        self.handle.task().observed_count() == self.handle.task().target_count()
    }

    fn try_outcome(&self) -> Option<Result<(), SafepointError>> {
        if self.handle.is_cancelled() {
            return Some(Err(SafepointError::Cancelled));
        }
        if self.all_paused() {
            return Some(Ok(()));
        }
        None
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

    #[test]
    fn test_pause_with_no_threads_is_immediately_done() {
        let ctx = fast_context();
        let pause = PauseController::pause(&ctx);
        assert!(pause.is_done());
        pause.wait().unwrap();
    }

    #[test]
    fn test_cancel_before_any_thread_pauses() {
        let ctx = fast_context();
        let _info = ctx.enter_thread().unwrap();
        let pause = PauseController::pause(&ctx);

        pause.cancel();
        // wait() fails with a cancellation condition, it does not hang.
        assert!(matches!(pause.wait(), Err(SafepointError::Cancelled)));
        assert!(pause.is_done());
        assert!(pause.is_cancelled());
    }

    #[test]
    fn test_closing_thread_does_not_block_in_pause() {
        let ctx = fast_context();
        let info = ctx.enter_thread().unwrap();
        // This thread starts the close, so a pause must not block it.
        ctx.close();

        let pause = PauseController::pause(&ctx);
        ctx.poll_safepoint(&info);

        pause.wait_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(pause.paused_count(), 1);
        ctx.leave_thread(&info);
    }

    #[test]
    fn test_pause_releases_when_context_cancels() {
        let ctx = fast_context();

        let worker_ctx = ctx.clone();
        let worker = std::thread::spawn(move || {
            let info = worker_ctx.enter_thread().unwrap();
            // Poll until the pause has been drained and released.
            while !worker_ctx.state().is_terminating() {
                worker_ctx.poll_safepoint(&info);
                std::thread::sleep(Duration::from_millis(1));
            }
            worker_ctx.leave_thread(&info);
        });

        // Give the worker time to enter.
        while ctx.active_thread_snapshot().is_empty() {
            std::thread::sleep(Duration::from_millis(1));
        }

        let pause = PauseController::pause(&ctx);
        pause.wait_timeout(Duration::from_secs(5)).unwrap();

        // The worker is now blocked inside the pause. Cancelling the
        // context must wake it without an explicit resume.
        ctx.cancel();
        worker.join().unwrap();
    }
}
