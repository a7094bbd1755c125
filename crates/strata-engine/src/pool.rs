//! Engine-managed worker threads.
//!
//! Workers execute submitted jobs (guest entry points, async safepoint
//! follow-ups) and carry their current-context binding directly in a
//! thread-local slot. The context-local binding fast path special-cases
//! these threads: no shared lookup structure is ever consulted for a
//! worker.

use crate::config::EngineConfig;
use crate::context::Context;
use crate::platform::ThreadPriority;
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::cell::RefCell;
use std::sync::Arc;
use std::thread::JoinHandle;

/// A unit of work submitted to the pool
pub type Job = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
    /// Present only on pool worker threads. Holds the thread's current
    /// context binding directly, replacing the shared binding store.
    static WORKER_SLOT: RefCell<Option<Option<Arc<Context>>>> = const { RefCell::new(None) };
}

/// True if the calling thread is an engine-managed worker.
pub(crate) fn is_worker_thread() -> bool {
    WORKER_SLOT.with(|slot| slot.borrow().is_some())
}

/// Read the worker-local binding. Only call on worker threads.
pub(crate) fn worker_binding() -> Option<Arc<Context>> {
    WORKER_SLOT.with(|slot| {
        slot.borrow()
            .as_ref()
            .expect("not a worker thread")
            .clone()
    })
}

/// Replace the worker-local binding, returning the previous value.
/// Only call on worker threads.
pub(crate) fn set_worker_binding(value: Option<Arc<Context>>) -> Option<Arc<Context>> {
    WORKER_SLOT.with(|slot| {
        let mut slot = slot.borrow_mut();
        let cell = slot.as_mut().expect("not a worker thread");
        std::mem::replace(cell, value)
    })
}

/// Fixed-width pool of engine worker threads.
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `config.worker_threads` workers.
    pub fn new(config: &Arc<EngineConfig>) -> Self {
        let (sender, receiver) = unbounded::<Job>();
        let mut handles = Vec::with_capacity(config.worker_threads);

        for index in 0..config.worker_threads {
            let receiver: Receiver<Job> = receiver.clone();
            let config = config.clone();
            let handle = std::thread::Builder::new()
                .name(format!("strata-worker-{index}"))
                .spawn(move || {
                    WORKER_SLOT.with(|slot| *slot.borrow_mut() = Some(None));
                    if config.elevate_worker_priority {
                        config.platform.set_thread_priority(ThreadPriority::High);
                    }
                    worker_loop(index, receiver);
                })
                .expect("failed to spawn worker thread");
            handles.push(handle);
        }

        Self {
            sender: Some(sender),
            handles,
        }
    }

    /// Submit a job for execution on some worker.
    pub fn submit(&self, job: Job) {
        if let Some(sender) = &self.sender {
            // A send failure means the pool is shutting down; the job is
            // dropped, matching submit-after-shutdown semantics.
            let _ = sender.send(job);
        }
    }

    /// Number of worker threads
    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Stop accepting jobs and join all workers.
    pub fn shutdown(&mut self) {
        self.sender.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(index: usize, receiver: Receiver<Job>) {
    while let Ok(job) = receiver.recv() {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job));
        if let Err(payload) = result {
            let message = panic_message(&payload);
            eprintln!("Worker {index}: job panicked: {message}");
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic payload>"
    }
}
