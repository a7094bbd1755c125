//! Host object model.
//!
//! Rust has no runtime reflection, so host classes are *registered*: the
//! embedder describes each exposed class once — named fields with
//! getter/setter closures and named methods with invoker closures — and the
//! engine builds its cached accessors from that description. This plays the
//! role reflection-based member lookup plays in managed runtimes.

use crate::error::{InteropError, InteropResult};
use crate::value::Value;
use rustc_hash::FxHashMap;
use std::any::{Any, TypeId};
use std::sync::Arc;

/// A host object exposed to guest code.
///
/// Implementations carry their own state; the engine only ever sees them
/// through `dyn HostObject` and the accessors registered on the matching
/// [`HostClass`].
pub trait HostObject: Send + Sync + 'static {
    /// Name of the host class this object belongs to
    fn class_name(&self) -> &str;

    /// Key identifying the host class for cache lookups
    fn class_key(&self) -> ClassKey;

    /// Downcast support
    fn as_any(&self) -> &dyn Any;

    /// True for engine-internal wrapper objects that must never leak
    /// across a guest/host boundary.
    fn is_engine_internal(&self) -> bool {
        false
    }
}

/// Shared reference to a host object
pub type HostRef = Arc<dyn HostObject>;

/// Identity of a host class, used as a cache key.
///
/// Statically-known Rust types key by `TypeId`; dynamically loaded adapter
/// classes key by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClassKey {
    /// A concrete Rust type
    Type(TypeId),
    /// A dynamically generated adapter class
    Named(Arc<str>),
}

impl ClassKey {
    /// Class key for a concrete Rust type
    pub fn of<T: 'static>() -> Self {
        ClassKey::Type(TypeId::of::<T>())
    }

    /// Class key for a named adapter class
    pub fn named(name: &str) -> Self {
        ClassKey::Named(Arc::from(name))
    }
}

/// Kind of an exposed member
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MemberKind {
    /// A readable (and possibly writable) field
    Field,
    /// An invocable method
    Method,
}

/// Describes one exposed member, as seen by access-policy predicates.
#[derive(Debug, Clone)]
pub struct MemberDescriptor {
    /// Owning class name
    pub class: String,
    /// Member name
    pub name: String,
    /// Field or method
    pub kind: MemberKind,
    /// For fields: whether a setter exists
    pub writable: bool,
}

type FieldGetter = Arc<dyn Fn(&HostRef) -> InteropResult<Value> + Send + Sync>;
type FieldSetter = Arc<dyn Fn(&HostRef, Value) -> InteropResult<()> + Send + Sync>;
type MethodInvoker = Arc<dyn Fn(&HostRef, &[Value]) -> InteropResult<Value> + Send + Sync>;

/// A registered field accessor pair.
#[derive(Clone)]
pub struct HostField {
    /// Field name
    pub name: String,
    /// Read accessor
    pub getter: FieldGetter,
    /// Write accessor; absent for final fields
    pub setter: Option<FieldSetter>,
}

/// A registered method invoker.
#[derive(Clone)]
pub struct HostMethod {
    /// Method name
    pub name: String,
    /// Declared parameter count, if fixed
    pub arity: Option<usize>,
    /// Invoker closure
    pub invoke: MethodInvoker,
}

impl HostMethod {
    /// Invoke after checking the declared arity.
    pub fn call(&self, receiver: &HostRef, args: &[Value]) -> InteropResult<Value> {
        if let Some(expected) = self.arity {
            if args.len() != expected {
                return Err(InteropError::ArityMismatch {
                    expected,
                    got: args.len(),
                });
            }
        }
        (self.invoke)(receiver, args)
    }
}

/// One registered member of a host class.
#[derive(Clone)]
pub enum HostMember {
    /// Field with getter and optional setter
    Field(HostField),
    /// Invocable method
    Method(HostMethod),
}

impl HostMember {
    /// Member name
    pub fn name(&self) -> &str {
        match self {
            HostMember::Field(f) => &f.name,
            HostMember::Method(m) => &m.name,
        }
    }

    /// Member kind
    pub fn kind(&self) -> MemberKind {
        match self {
            HostMember::Field(_) => MemberKind::Field,
            HostMember::Method(_) => MemberKind::Method,
        }
    }

    /// Descriptor used for access-policy checks
    pub fn descriptor(&self, class: &str) -> MemberDescriptor {
        MemberDescriptor {
            class: class.to_string(),
            name: self.name().to_string(),
            kind: self.kind(),
            writable: matches!(self, HostMember::Field(f) if f.setter.is_some()),
        }
    }
}

/// A registered host class: the full member table for one exposed type.
#[derive(Clone)]
pub struct HostClass {
    key: ClassKey,
    name: String,
    members: FxHashMap<String, HostMember>,
}

impl HostClass {
    /// Start building a class for a concrete Rust type
    pub fn builder<T: HostObject>(name: &str) -> HostClassBuilder {
        HostClassBuilder::new(ClassKey::of::<T>(), name)
    }

    /// Start building a named (adapter) class
    pub fn named_builder(name: &str) -> HostClassBuilder {
        HostClassBuilder::new(ClassKey::named(name), name)
    }

    /// Class key
    pub fn key(&self) -> &ClassKey {
        &self.key
    }

    /// Class name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a member by name
    pub fn member(&self, name: &str) -> Option<&HostMember> {
        self.members.get(name)
    }

    /// Iterate all registered members
    pub fn members(&self) -> impl Iterator<Item = &HostMember> {
        self.members.values()
    }

    /// Number of registered members
    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}

/// Builder for [`HostClass`].
pub struct HostClassBuilder {
    key: ClassKey,
    name: String,
    members: FxHashMap<String, HostMember>,
}

impl HostClassBuilder {
    fn new(key: ClassKey, name: &str) -> Self {
        Self {
            key,
            name: name.to_string(),
            members: FxHashMap::default(),
        }
    }

    /// Register a read-only field
    pub fn field<G>(mut self, name: &str, getter: G) -> Self
    where
        G: Fn(&HostRef) -> InteropResult<Value> + Send + Sync + 'static,
    {
        self.members.insert(
            name.to_string(),
            HostMember::Field(HostField {
                name: name.to_string(),
                getter: Arc::new(getter),
                setter: None,
            }),
        );
        self
    }

    /// Register a read-write field
    pub fn field_mut<G, S>(mut self, name: &str, getter: G, setter: S) -> Self
    where
        G: Fn(&HostRef) -> InteropResult<Value> + Send + Sync + 'static,
        S: Fn(&HostRef, Value) -> InteropResult<()> + Send + Sync + 'static,
    {
        self.members.insert(
            name.to_string(),
            HostMember::Field(HostField {
                name: name.to_string(),
                getter: Arc::new(getter),
                setter: Some(Arc::new(setter)),
            }),
        );
        self
    }

    /// Register a method with a fixed arity
    pub fn method<F>(mut self, name: &str, arity: usize, invoke: F) -> Self
    where
        F: Fn(&HostRef, &[Value]) -> InteropResult<Value> + Send + Sync + 'static,
    {
        self.members.insert(
            name.to_string(),
            HostMember::Method(HostMethod {
                name: name.to_string(),
                arity: Some(arity),
                invoke: Arc::new(invoke),
            }),
        );
        self
    }

    /// Register a variadic method
    pub fn method_variadic<F>(mut self, name: &str, invoke: F) -> Self
    where
        F: Fn(&HostRef, &[Value]) -> InteropResult<Value> + Send + Sync + 'static,
    {
        self.members.insert(
            name.to_string(),
            HostMember::Method(HostMethod {
                name: name.to_string(),
                arity: None,
                invoke: Arc::new(invoke),
            }),
        );
        self
    }

    /// Finish building
    pub fn build(self) -> HostClass {
        HostClass {
            key: self.key,
            name: self.name,
            members: self.members,
        }
    }
}

/// Downcast a host reference to a concrete type.
///
/// Fails with `TypeMismatch` rather than panicking so a stale accessor
/// applied to the wrong receiver surfaces as a recoverable interop error.
pub fn downcast<T: HostObject>(receiver: &HostRef) -> InteropResult<&T> {
    receiver
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| InteropError::TypeMismatch {
            expected: std::any::type_name::<T>().to_string(),
            got: receiver.class_name().to_string(),
        })
}
