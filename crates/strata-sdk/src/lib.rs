//! Strata SDK - host-interop ABI for the Strata polyglot engine core
//!
//! This crate provides the types shared between the engine core and
//! embedders: the guest [`Value`] representation, the registered host object
//! model ([`HostObject`], [`HostClass`]), and the immutable
//! [`HostAccessPolicy`] with its ordered target-type mappings. Embedders
//! program against these types without depending on engine internals.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod error;
pub mod host;
pub mod policy;
pub mod value;

pub use error::{InteropError, InteropResult};
pub use host::{
    downcast, ClassKey, HostClass, HostClassBuilder, HostField, HostMember, HostMethod,
    HostObject, HostRef, MemberDescriptor, MemberKind,
};
pub use policy::{
    convert_first_match, HostAccessPolicy, HostAccessPolicyBuilder, PolicyId, TargetMapping,
    TypeKey,
};
pub use value::Value;
