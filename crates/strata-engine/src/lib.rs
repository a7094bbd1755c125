//! Strata Polyglot Engine Core
//!
//! This crate provides the coordination core of a polyglot execution
//! engine: many guest execution contexts, each possibly shared across
//! native threads, safely enter and leave execution, pause, cancel, or run
//! cooperative safepoint actions — combined with the host-interop layer
//! that converts between guest-visible values and host objects with cached
//! conversion paths.
//!
//! - **Contexts**: lifecycle state, per-thread bookkeeping, thread-local
//!   binding with a single-thread fast path (`context` module)
//! - **Safepoints**: synchronous/asynchronous broadcast actions and pause
//!   (`safepoint` module)
//! - **Boundaries**: the enter/leave protocol for both call directions,
//!   with exception translation (`boundary` module)
//! - **Interop**: cached host member resolution and target-type mappings
//!   (`interop` module), over the `strata-sdk` object model
//! - **Parsing**: the weakly-keyed source parse cache (`parse_cache`
//!   module)
//!
//! Guest languages plug in through the `language` module's traits; the
//! core never implements language semantics.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod boundary;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod interop;
pub mod language;
pub mod loader;
pub mod parse_cache;
pub mod platform;
pub mod pool;
pub mod safepoint;
pub mod speculate;

pub use boundary::{BoolProfile, EnteredScope, GuestToHostBoundary, HostToGuestBoundary};
pub use config::{EngineConfig, EngineOptions};
pub use context::binding::{AssumedSingleThread, ContextLocalBinding};
pub use context::{Context, ContextId, ContextState, LayerId, ThreadInfo};
pub use engine::Engine;
pub use error::{EngineError, EngineResult, GuestError, SafepointError};
pub use interop::{HostClassDescriptor, HostInteropCache, ResolvedMember};
pub use language::{CallTarget, Language, Source};
pub use loader::{AdapterCodeLoader, AdapterDefinition, LoadedAdapter, VtableAdapterLoader};
pub use parse_cache::SourceParseCache;
pub use platform::{HostPlatform, NoopPlatform, PlatformServices, ThreadPriority};
pub use safepoint::pause::{PauseController, PauseHandle};
pub use safepoint::{submit_async, submit_sync, ActionHandle, SafepointAction, ThreadActionAccess};
pub use speculate::WeakAssumedValue;

// Re-export SDK types (canonical definitions live in strata-sdk)
pub use strata_sdk::{
    ClassKey, HostAccessPolicy, HostClass, HostObject, HostRef, InteropError, InteropResult,
    MemberDescriptor, MemberKind, TargetMapping, TypeKey, Value,
};
