//! Engine facade.
//!
//! An [`Engine`] groups the resources shared across its contexts: the
//! configuration, the single host access policy with its interop cache,
//! the per-thread context binding, the parse cache, and the worker pool.
//! Contexts created from one engine may share a code-sharing layer or get
//! a fresh one.

use crate::config::EngineConfig;
use crate::context::binding::ContextLocalBinding;
use crate::context::{Context, LayerId};
use crate::error::{EngineError, EngineResult};
use crate::interop::HostInteropCache;
use crate::parse_cache::SourceParseCache;
use crate::pool::WorkerPool;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use strata_sdk::HostAccessPolicy;

/// A polyglot engine instance.
pub struct Engine {
    config: Arc<EngineConfig>,
    policy: Arc<HostAccessPolicy>,
    interop: HostInteropCache,
    binding: ContextLocalBinding,
    parse_cache: SourceParseCache,
    pool: Mutex<WorkerPool>,
    contexts: Mutex<Vec<Weak<Context>>>,
}

impl Engine {
    /// Construct an engine bound to one access policy.
    ///
    /// Initializes the configured platform services and spawns the worker
    /// pool.
    pub fn new(config: EngineConfig, policy: Arc<HostAccessPolicy>) -> EngineResult<Arc<Self>> {
        config.platform.initialize()?;
        let config = Arc::new(config);
        let pool = WorkerPool::new(&config);
        Ok(Arc::new(Self {
            config: config.clone(),
            policy: policy.clone(),
            interop: HostInteropCache::new(policy),
            binding: ContextLocalBinding::new(),
            parse_cache: SourceParseCache::new(),
            pool: Mutex::new(pool),
            contexts: Mutex::new(Vec::new()),
        }))
    }

    /// Engine configuration
    pub fn config(&self) -> &Arc<EngineConfig> {
        &self.config
    }

    /// The access policy bound to this engine
    pub fn policy(&self) -> &Arc<HostAccessPolicy> {
        &self.policy
    }

    /// The shared host-interop cache
    pub fn interop(&self) -> &HostInteropCache {
        &self.interop
    }

    /// The per-thread current-context binding
    pub fn binding(&self) -> &ContextLocalBinding {
        &self.binding
    }

    /// The shared parse cache
    pub fn parse_cache(&self) -> &SourceParseCache {
        &self.parse_cache
    }

    /// Create a context in a fresh sharing layer.
    ///
    /// `policy` must be the engine's own policy: the interop cache is
    /// shared engine-wide, so a second configuration on the same engine is
    /// rejected here, at context-creation time.
    pub fn create_context(&self, policy: &Arc<HostAccessPolicy>) -> EngineResult<Arc<Context>> {
        self.create_context_in_layer(policy, LayerId::new())
    }

    /// Create a context in an explicit sharing layer, allowing it to share
    /// code with other contexts in that layer.
    pub fn create_context_in_layer(
        &self,
        policy: &Arc<HostAccessPolicy>,
        layer: LayerId,
    ) -> EngineResult<Arc<Context>> {
        if policy.id() != self.policy.id() {
            return Err(EngineError::Config(
                "a shared engine supports exactly one host access policy; \
                 all contexts must use the policy the engine was built with"
                    .to_string(),
            ));
        }
        let context = Context::new(layer, self.config.clone());
        self.contexts.lock().push(Arc::downgrade(&context));
        Ok(context)
    }

    /// Contexts created by this engine that are still alive.
    pub fn live_contexts(&self) -> Vec<Arc<Context>> {
        let mut contexts = self.contexts.lock();
        contexts.retain(|weak| weak.strong_count() > 0);
        contexts.iter().filter_map(Weak::upgrade).collect()
    }

    /// Context currently bound to the calling thread, if any.
    pub fn current_context(&self) -> Option<Arc<Context>> {
        self.binding.get()
    }

    /// Run a job on the engine worker pool.
    pub fn submit(&self, job: Box<dyn FnOnce() + Send + 'static>) {
        self.pool.lock().submit(job);
    }

    /// Shut the engine down: cancel live contexts and join the workers.
    pub fn shutdown(&self) {
        for context in self.live_contexts() {
            context.cancel();
        }
        self.pool.lock().shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn small_engine() -> Arc<Engine> {
        let config = EngineConfig::new()
            .worker_threads(1)
            .safepoint_poll_interval(Duration::from_millis(1));
        Engine::new(config, Arc::new(HostAccessPolicy::allow_all())).unwrap()
    }

    #[test]
    fn test_create_context_with_engine_policy() {
        let engine = small_engine();
        let policy = engine.policy().clone();
        let context = engine.create_context(&policy).unwrap();
        assert_eq!(engine.live_contexts().len(), 1);
        drop(context);
        assert!(engine.live_contexts().is_empty());
    }

    #[test]
    fn test_second_policy_rejected_at_context_creation() {
        let engine = small_engine();
        let other_policy = Arc::new(HostAccessPolicy::allow_all());
        let err = engine.create_context(&other_policy).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_contexts_can_share_a_layer() {
        let engine = small_engine();
        let policy = engine.policy().clone();
        let layer = LayerId::new();
        let a = engine.create_context_in_layer(&policy, layer).unwrap();
        let b = engine.create_context_in_layer(&policy, layer).unwrap();
        assert_eq!(a.sharing_layer(), b.sharing_layer());

        let c = engine.create_context(&policy).unwrap();
        assert_ne!(a.sharing_layer(), c.sharing_layer());
    }

    #[test]
    fn test_shutdown_cancels_contexts() {
        let engine = small_engine();
        let policy = engine.policy().clone();
        let context = engine.create_context(&policy).unwrap();
        engine.shutdown();
        assert!(context.state().is_terminating());
    }
}
