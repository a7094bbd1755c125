//! Host access policy and target-type mappings.
//!
//! An access policy bundles the member-visibility predicate with the ordered
//! list of target-type conversion rules. A policy is immutable once built and
//! is expected to be bound to exactly one engine; the engine enforces that at
//! context-creation time.

use crate::error::{InteropError, InteropResult};
use crate::host::{ClassKey, MemberDescriptor};
use crate::value::Value;
use std::any::TypeId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Unique identity of an access policy instance.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct PolicyId(u64);

static NEXT_POLICY_ID: AtomicU64 = AtomicU64::new(1);

impl PolicyId {
    fn new() -> Self {
        PolicyId(NEXT_POLICY_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Key identifying a declared host target type for conversion lookup.
///
/// Primitive Rust types normalize to their wide guest category: every
/// integer width keys as `Int`, every float width as `Float`, string-like
/// types as `Str`. Lookup therefore never depends on the exact primitive
/// width a mapping was declared with.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKey {
    /// Boolean target
    Bool,
    /// Any integer target
    Int,
    /// Any float target
    Float,
    /// String target
    Str,
    /// List target
    List,
    /// A registered host class target
    Class(ClassKey),
}

impl TypeKey {
    /// Normalized key for a concrete Rust type.
    ///
    /// Unrecognized types key as a host class of that type.
    pub fn of<T: 'static>() -> Self {
        let id = TypeId::of::<T>();
        if id == TypeId::of::<bool>() {
            TypeKey::Bool
        } else if id == TypeId::of::<i8>()
            || id == TypeId::of::<i16>()
            || id == TypeId::of::<i32>()
            || id == TypeId::of::<i64>()
            || id == TypeId::of::<i128>()
            || id == TypeId::of::<u8>()
            || id == TypeId::of::<u16>()
            || id == TypeId::of::<u32>()
            || id == TypeId::of::<u64>()
            || id == TypeId::of::<u128>()
            || id == TypeId::of::<isize>()
            || id == TypeId::of::<usize>()
        {
            TypeKey::Int
        } else if id == TypeId::of::<f32>() || id == TypeId::of::<f64>() {
            TypeKey::Float
        } else if id == TypeId::of::<String>() || id == TypeId::of::<&str>() {
            TypeKey::Str
        } else {
            TypeKey::Class(ClassKey::Type(id))
        }
    }
}

type AcceptsFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;
type ConvertFn = Arc<dyn Fn(&Value) -> InteropResult<Value> + Send + Sync>;

/// One declared guest-shape → host-target-type conversion rule.
///
/// Rules for the same target type are tried in declaration order; the first
/// rule whose `accepts` predicate matches (or, for rules without a
/// predicate, whose conversion succeeds) wins. First-match, not best-match.
#[derive(Clone)]
pub struct TargetMapping {
    /// Declared target type
    pub target: TypeKey,
    /// Optional guard predicate
    pub accepts: Option<AcceptsFn>,
    /// Conversion function
    pub convert: ConvertFn,
}

impl TargetMapping {
    /// Mapping with an explicit accepts predicate
    pub fn new<A, C>(target: TypeKey, accepts: A, convert: C) -> Self
    where
        A: Fn(&Value) -> bool + Send + Sync + 'static,
        C: Fn(&Value) -> InteropResult<Value> + Send + Sync + 'static,
    {
        Self {
            target,
            accepts: Some(Arc::new(accepts)),
            convert: Arc::new(convert),
        }
    }

    /// Mapping without a predicate; applies whenever its conversion succeeds
    pub fn implicit<C>(target: TypeKey, convert: C) -> Self
    where
        C: Fn(&Value) -> InteropResult<Value> + Send + Sync + 'static,
    {
        Self {
            target,
            accepts: None,
            convert: Arc::new(convert),
        }
    }
}

type AllowFn = Arc<dyn Fn(&MemberDescriptor) -> bool + Send + Sync>;

/// Immutable host-access configuration.
///
/// Supplies the member-visibility predicate and the ordered target-type
/// mapping list. Identity (`PolicyId`) is what the engine compares when
/// rejecting a second policy on a shared engine.
#[derive(Clone)]
pub struct HostAccessPolicy {
    id: PolicyId,
    allow: AllowFn,
    mappings: Vec<TargetMapping>,
}

impl HostAccessPolicy {
    /// Policy that exposes every registered member, with no mappings
    pub fn allow_all() -> Self {
        Self {
            id: PolicyId::new(),
            allow: Arc::new(|_| true),
            mappings: Vec::new(),
        }
    }

    /// Start building a custom policy
    pub fn builder() -> HostAccessPolicyBuilder {
        HostAccessPolicyBuilder {
            allow: Arc::new(|_| true),
            mappings: Vec::new(),
        }
    }

    /// Unique identity of this policy instance
    pub fn id(&self) -> PolicyId {
        self.id
    }

    /// Whether the policy exposes the given member
    pub fn allows(&self, member: &MemberDescriptor) -> bool {
        (self.allow)(member)
    }

    /// All declared mappings, in declaration order
    pub fn mappings(&self) -> &[TargetMapping] {
        &self.mappings
    }
}

/// Builder for [`HostAccessPolicy`].
pub struct HostAccessPolicyBuilder {
    allow: AllowFn,
    mappings: Vec<TargetMapping>,
}

impl HostAccessPolicyBuilder {
    /// Set the member-visibility predicate
    pub fn member_filter<F>(mut self, allow: F) -> Self
    where
        F: Fn(&MemberDescriptor) -> bool + Send + Sync + 'static,
    {
        self.allow = Arc::new(allow);
        self
    }

    /// Append a target-type mapping (declaration order is significant)
    pub fn target_mapping(mut self, mapping: TargetMapping) -> Self {
        self.mappings.push(mapping);
        self
    }

    /// Finish building
    pub fn build(self) -> HostAccessPolicy {
        HostAccessPolicy {
            id: PolicyId::new(),
            allow: self.allow,
            mappings: self.mappings,
        }
    }
}

/// Convert a guest value through the first matching rule of `mappings`.
///
/// Exposed here so the engine-side cache and direct embedder use share one
/// first-match implementation.
pub fn convert_first_match(mappings: &[TargetMapping], value: &Value) -> InteropResult<Value> {
    for mapping in mappings {
        match &mapping.accepts {
            Some(accepts) => {
                if accepts(value) {
                    return (mapping.convert)(value);
                }
            }
            None => {
                if let Ok(converted) = (mapping.convert)(value) {
                    return Ok(converted);
                }
            }
        }
    }
    Err(InteropError::UnsupportedType(format!(
        "no target mapping accepts a {} value",
        value.type_name()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemberKind;

    #[test]
    fn test_policy_ids_unique() {
        let a = HostAccessPolicy::allow_all();
        let b = HostAccessPolicy::allow_all();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_member_filter() {
        let policy = HostAccessPolicy::builder()
            .member_filter(|m| !m.name.starts_with('_'))
            .build();

        let visible = MemberDescriptor {
            class: "C".into(),
            name: "field".into(),
            kind: MemberKind::Field,
            writable: false,
        };
        let hidden = MemberDescriptor {
            class: "C".into(),
            name: "_secret".into(),
            kind: MemberKind::Field,
            writable: false,
        };
        assert!(policy.allows(&visible));
        assert!(!policy.allows(&hidden));
    }

    #[test]
    fn test_type_key_normalizes_primitives() {
        assert_eq!(TypeKey::of::<i8>(), TypeKey::Int);
        assert_eq!(TypeKey::of::<i32>(), TypeKey::Int);
        assert_eq!(TypeKey::of::<i64>(), TypeKey::Int);
        assert_eq!(TypeKey::of::<i128>(), TypeKey::Int);
        assert_eq!(TypeKey::of::<u16>(), TypeKey::Int);
        assert_eq!(TypeKey::of::<u64>(), TypeKey::Int);
        assert_eq!(TypeKey::of::<u128>(), TypeKey::Int);
        assert_eq!(TypeKey::of::<usize>(), TypeKey::Int);
        assert_eq!(TypeKey::of::<f32>(), TypeKey::Float);
        assert_eq!(TypeKey::of::<f64>(), TypeKey::Float);
        assert_eq!(TypeKey::of::<String>(), TypeKey::Str);
        assert_eq!(TypeKey::of::<bool>(), TypeKey::Bool);
    }

    #[test]
    fn test_mapping_declared_with_any_int_width_is_visible_to_int_lookup() {
        // Declaring under u64 and looking up under Int (or any other
        // width) must hit the same key.
        let policy = HostAccessPolicy::builder()
            .target_mapping(TargetMapping::implicit(TypeKey::of::<u64>(), |v| {
                v.as_int().map(Value::Int)
            }))
            .build();
        assert_eq!(policy.mappings()[0].target, TypeKey::Int);
        assert_eq!(policy.mappings()[0].target, TypeKey::of::<i32>());
    }

    #[test]
    fn test_first_match_order() {
        // A's predicate fails, B and C both pass; B wins because it is
        // declared first.
        let mappings = vec![
            TargetMapping::new(TypeKey::Int, |_| false, |_| Ok(Value::Int(1))),
            TargetMapping::new(TypeKey::Int, |_| true, |_| Ok(Value::Int(2))),
            TargetMapping::new(TypeKey::Int, |_| true, |_| Ok(Value::Int(3))),
        ];
        let out = convert_first_match(&mappings, &Value::Null).unwrap();
        assert_eq!(out, Value::Int(2));
    }

    #[test]
    fn test_implicit_mapping_applies_on_success() {
        let mappings = vec![
            TargetMapping::implicit(TypeKey::Int, |v| v.as_int().map(Value::Int)),
            TargetMapping::implicit(TypeKey::Int, |_| Ok(Value::Int(-1))),
        ];
        // First rule fails for a string, second catches it.
        assert_eq!(
            convert_first_match(&mappings, &Value::from("x")).unwrap(),
            Value::Int(-1)
        );
        // First rule succeeds for an int.
        assert_eq!(
            convert_first_match(&mappings, &Value::Int(9)).unwrap(),
            Value::Int(9)
        );
    }

    #[test]
    fn test_no_mapping_is_unsupported_type() {
        let err = convert_first_match(&[], &Value::Null).unwrap_err();
        assert!(matches!(err, InteropError::UnsupportedType(_)));
    }
}
