//! The guest↔host call boundary.
//!
//! Both directions share the same skeleton: resolve the context, decide
//! whether a thread-state transition (enter) is structurally necessary,
//! run the call body, and translate any error into the caller's exception
//! domain at exactly this boundary. Leave is guaranteed on every exit path
//! by an RAII scope.
//!
//! Per-callsite state follows the degrade-once rule used elsewhere in the
//! core: the context is speculated constant until a second distinct context
//! is seen, and "is enter needed" resolves from unresolved to a stable
//! answer at most once.

use crate::context::{Context, ThreadInfo};
use crate::engine::Engine;
use crate::error::{EngineError, EngineResult, GuestError};
use crate::speculate::WeakAssumedValue;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use strata_sdk::{InteropResult, Value};

const PROFILE_UNSET: u8 = 0;
const PROFILE_TRUE: u8 = 1;
const PROFILE_FALSE: u8 = 2;
const PROFILE_DYNAMIC: u8 = 3;

/// A profiled boolean that settles after its first contradiction.
///
/// Transitions: Unset → True/False on first observation, then → Dynamic
/// permanently if the other value is ever seen. Purely advisory: callers
/// still compute the real answer per call; the profile only records whether
/// the answer has been constant at this callsite.
pub struct BoolProfile {
    state: AtomicU8,
}

impl BoolProfile {
    /// New unresolved profile
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(PROFILE_UNSET),
        }
    }

    /// Record one observation
    pub fn profile(&self, value: bool) {
        let observed = if value { PROFILE_TRUE } else { PROFILE_FALSE };
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let next = match current {
                PROFILE_UNSET => observed,
                state if state == observed => return,
                PROFILE_DYNAMIC => return,
                _ => PROFILE_DYNAMIC,
            };
            match self.state.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// The stable answer, if the profile has settled on one
    pub fn constant_value(&self) -> Option<bool> {
        match self.state.load(Ordering::Acquire) {
            PROFILE_TRUE => Some(true),
            PROFILE_FALSE => Some(false),
            _ => None,
        }
    }
}

impl Default for BoolProfile {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for one entered context.
///
/// Holding the scope keeps the thread marked as entered and the binding
/// pointed at the context; dropping it polls pending safepoint actions,
/// leaves, and restores the previous binding — on every exit path,
/// including unwinds.
pub struct EnteredScope<'a> {
    engine: &'a Engine,
    context: Arc<Context>,
    thread: Arc<ThreadInfo>,
    entered: bool,
    previous_binding: Option<Arc<Context>>,
}

impl<'a> EnteredScope<'a> {
    /// Enter `context` on the calling thread if it is not already inside.
    pub fn enter(
        engine: &'a Engine,
        context: &Arc<Context>,
        enter_profile: &BoolProfile,
    ) -> EngineResult<Self> {
        let thread = context.current_thread_info();
        // Depth is per (context, thread): a positive depth means this
        // thread is already logically inside this very context.
        let needed = thread.enter_depth() == 0;
        enter_profile.profile(needed);

        if !needed {
            return Ok(Self {
                engine,
                context: context.clone(),
                thread,
                entered: false,
                previous_binding: None,
            });
        }

        let thread = context
            .enter_thread()
            .map_err(EngineError::ContextClosed)?;
        let previous_binding = engine.binding().set(Some(context.clone()));
        Ok(Self {
            engine,
            context: context.clone(),
            thread,
            entered: true,
            previous_binding,
        })
    }

    /// The entered context
    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// The calling thread's bookkeeping entry
    pub fn thread_info(&self) -> &Arc<ThreadInfo> {
        &self.thread
    }

    /// True if this scope performed the enter (outermost boundary)
    pub fn did_enter(&self) -> bool {
        self.entered
    }
}

impl Drop for EnteredScope<'_> {
    fn drop(&mut self) {
        if self.entered {
            // Run any action already broadcast at this thread before it
            // becomes invisible to the snapshot.
            self.context.poll_safepoint(&self.thread);
            self.context.leave_thread(&self.thread);
            self.engine.binding().set(self.previous_binding.take());
        }
    }
}

/// Per-callsite state for a host thread calling into guest code.
pub struct HostToGuestBoundary {
    context_profile: WeakAssumedValue<Context>,
    enter_needed: BoolProfile,
}

impl HostToGuestBoundary {
    /// New boundary with unresolved profiles
    pub fn new() -> Self {
        Self {
            context_profile: WeakAssumedValue::new(),
            enter_needed: BoolProfile::new(),
        }
    }

    /// True while this callsite has only ever seen one context
    pub fn context_is_constant(&self) -> bool {
        self.context_profile.is_valid()
    }

    /// The enter-needed profile for this callsite
    pub fn enter_profile(&self) -> &BoolProfile {
        &self.enter_needed
    }

    /// Execute `body` inside `context`, translating guest errors into the
    /// host domain on the way out.
    pub fn call<F>(&self, engine: &Engine, context: &Arc<Context>, body: F) -> EngineResult<Value>
    where
        F: FnOnce(&EnteredScope<'_>) -> Result<Value, GuestError>,
    {
        // Constant-context speculation: degrades once if a second distinct
        // context shows up at this callsite.
        self.context_profile.update(context);

        let scope = EnteredScope::enter(engine, context, &self.enter_needed)?;
        match body(&scope) {
            Ok(value) => {
                check_no_internal_leak(&value, "host");
                Ok(value)
            }
            // Guest exception crossing into host space: re-wrapped here,
            // never surfaced raw.
            Err(guest) => Err(EngineError::Guest(guest)),
        }
    }
}

impl Default for HostToGuestBoundary {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-callsite state for guest code calling into host code.
///
/// The entered-classification profile is advisory, like [`BoolProfile`]
/// generally: it records whether the callsite has only ever run on
/// already-entered threads, for compilers and diagnostics to consult.
/// Cleanup never depends on it; the RAII scope handles every exit path.
pub struct GuestToHostBoundary {
    entered_profile: BoolProfile,
}

impl GuestToHostBoundary {
    /// New boundary with an unresolved entered-profile
    pub fn new() -> Self {
        Self {
            entered_profile: BoolProfile::new(),
        }
    }

    /// The entered-classification profile for this callsite
    pub fn entered_profile(&self) -> &BoolProfile {
        &self.entered_profile
    }

    /// Execute a host call on behalf of guest code running in `caller`,
    /// against a callee bound to `callee`.
    ///
    /// Host failures are translated into the guest domain here. A
    /// sharing-layer mismatch is an internal consistency violation and
    /// fails fatally.
    pub fn call<F>(
        &self,
        caller: &Arc<Context>,
        callee: &Arc<Context>,
        body: F,
    ) -> Result<Value, GuestError>
    where
        F: FnOnce() -> InteropResult<Value>,
    {
        if caller.sharing_layer() != callee.sharing_layer() {
            panic!(
                "sharing layer mismatch: context {} and context {} may not share code",
                caller.id().as_u64(),
                callee.id().as_u64()
            );
        }

        let thread = callee.current_thread_info();
        self.entered_profile.profile(thread.enter_depth() > 0);

        match body() {
            Ok(value) => {
                check_no_internal_leak(&value, "guest");
                Ok(value)
            }
            // Host exception crossing into guest space: re-wrapped here.
            Err(host) => Err(GuestError::Host(host)),
        }
    }
}

impl Default for GuestToHostBoundary {
    fn default() -> Self {
        Self::new()
    }
}

fn check_no_internal_leak(value: &Value, destination: &str) {
    if value.is_engine_internal() {
        panic!("internal wrapper value leaked across the boundary into {destination} space");
    }
}
