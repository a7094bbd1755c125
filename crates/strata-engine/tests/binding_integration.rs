//! Cross-thread behavior of the per-thread context binding.

use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel;
use strata_engine::{Context, Engine, EngineConfig, HostAccessPolicy};

fn test_engine() -> Arc<Engine> {
    let config = EngineConfig::new()
        .worker_threads(2)
        .safepoint_poll_interval(Duration::from_millis(1));
    Engine::new(config, Arc::new(HostAccessPolicy::allow_all())).unwrap()
}

#[test]
fn binding_stays_on_the_fast_path_for_one_thread() {
    let engine = test_engine();
    let context = engine.create_context(engine.policy()).unwrap();

    assert!(engine.binding().get().is_none());
    assert!(engine.binding().set(Some(context.clone())).is_none());
    let bound = engine.binding().get().unwrap();
    assert!(Arc::ptr_eq(&bound, &context));
    assert!(engine.binding().is_single_threaded());

    engine.binding().set(None);
    assert!(engine.binding().get().is_none());
}

#[test]
fn second_application_thread_degrades_without_losing_values() {
    let engine = test_engine();
    let a = engine.create_context(engine.policy()).unwrap();
    let b = engine.create_context(engine.policy()).unwrap();

    engine.binding().set(Some(a.clone()));

    let remote_engine = engine.clone();
    let remote_b = b.clone();
    std::thread::spawn(move || {
        // A fresh thread starts unbound even while another thread holds a
        // binding.
        assert!(remote_engine.binding().get().is_none());
        remote_engine.binding().set(Some(remote_b.clone()));
        let bound = remote_engine.binding().get().unwrap();
        assert!(Arc::ptr_eq(&bound, &remote_b));
    })
    .join()
    .unwrap();

    assert!(!engine.binding().is_single_threaded());
    // The first thread's binding survived the degrade.
    let bound = engine.binding().get().unwrap();
    assert!(Arc::ptr_eq(&bound, &a));
}

#[test]
fn worker_threads_bypass_the_shared_store() {
    let engine = test_engine();
    let context = engine.create_context(engine.policy()).unwrap();
    engine.binding().set(Some(context.clone()));

    let (tx, rx) = channel::bounded::<Option<Arc<Context>>>(2);

    // Workers carry their binding in pool-owned thread state and never see
    // the application thread's binding.
    let remote_engine = engine.clone();
    let tx_initial = tx.clone();
    engine.submit(Box::new(move || {
        tx_initial.send(remote_engine.binding().get()).unwrap();
    }));
    assert!(rx.recv_timeout(Duration::from_secs(10)).unwrap().is_none());

    let remote_engine = engine.clone();
    let worker_context = engine.create_context(engine.policy()).unwrap();
    let bound_for_worker = worker_context.clone();
    engine.submit(Box::new(move || {
        remote_engine.binding().set(Some(bound_for_worker));
        tx.send(remote_engine.binding().get()).unwrap();
    }));
    let seen = rx.recv_timeout(Duration::from_secs(10)).unwrap().unwrap();
    assert!(Arc::ptr_eq(&seen, &worker_context));

    // Worker traffic never touches the shared store, so the fast path and
    // the application thread's binding are both intact.
    assert!(engine.binding().is_single_threaded());
    let bound = engine.binding().get().unwrap();
    assert!(Arc::ptr_eq(&bound, &context));

    engine.shutdown();
}
