//! Cached host member resolution and target-type conversion.
//!
//! One [`HostInteropCache`] exists per access-policy configuration — shared
//! engine-wide, not per context, because the policy is immutable once the
//! engine is constructed. Accessors are built once per (class, member) pair
//! and the target-mapping table once per policy.

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use strata_sdk::{
    convert_first_match, ClassKey, HostAccessPolicy, HostClass, HostField, HostMember,
    HostMethod, HostRef, InteropError, InteropResult, MemberDescriptor, TargetMapping, TypeKey,
    Value,
};

/// Memoized, policy-filtered view of one host class's accessible members.
#[derive(Clone)]
pub struct HostClassDescriptor {
    /// Class name
    pub class_name: String,
    /// Members the policy exposes, in no particular order
    pub members: Vec<MemberDescriptor>,
}

/// A resolved accessor: field getter/setter pair or method invoker.
pub enum ResolvedMember {
    /// Field access path
    Field(HostField),
    /// Method invocation path
    Method(HostMethod),
}

impl std::fmt::Debug for ResolvedMember {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolvedMember::Field(field) => f.debug_tuple("Field").field(&field.name).finish(),
            ResolvedMember::Method(method) => f.debug_tuple("Method").field(&method.name).finish(),
        }
    }
}

impl ResolvedMember {
    /// Read a field value.
    pub fn read(&self, receiver: &HostRef) -> InteropResult<Value> {
        match self {
            ResolvedMember::Field(field) => (field.getter)(receiver),
            ResolvedMember::Method(method) => Err(InteropError::UnsupportedType(format!(
                "member '{}' is a method, not a readable field",
                method.name
            ))),
        }
    }

    /// Write a field value. Final (setter-less) fields report
    /// `UnknownIdentifier`, same as absent members.
    pub fn write(&self, receiver: &HostRef, value: Value) -> InteropResult<()> {
        match self {
            ResolvedMember::Field(field) => match &field.setter {
                Some(setter) => setter(receiver, value),
                None => Err(InteropError::UnknownIdentifier(field.name.clone())),
            },
            ResolvedMember::Method(method) => {
                Err(InteropError::UnknownIdentifier(method.name.clone()))
            }
        }
    }

    /// Invoke a method.
    pub fn invoke(&self, receiver: &HostRef, args: &[Value]) -> InteropResult<Value> {
        match self {
            ResolvedMember::Method(method) => method.call(receiver, args),
            ResolvedMember::Field(field) => Err(InteropError::UnsupportedType(format!(
                "member '{}' is a field, not an invocable method",
                field.name
            ))),
        }
    }
}

/// Per-policy cache of host classes, member accessors, and target mappings.
pub struct HostInteropCache {
    policy: Arc<HostAccessPolicy>,
    classes: DashMap<ClassKey, Arc<HostClass>>,
    descriptors: DashMap<ClassKey, Arc<HostClassDescriptor>>,
    members: DashMap<(ClassKey, String), Arc<ResolvedMember>>,
    mappings: OnceCell<FxHashMap<TypeKey, Vec<TargetMapping>>>,
}

impl HostInteropCache {
    /// Create a cache bound to one access policy.
    pub fn new(policy: Arc<HostAccessPolicy>) -> Self {
        Self {
            policy,
            classes: DashMap::new(),
            descriptors: DashMap::new(),
            members: DashMap::new(),
            mappings: OnceCell::new(),
        }
    }

    /// The policy this cache was built for
    pub fn policy(&self) -> &Arc<HostAccessPolicy> {
        &self.policy
    }

    /// Register a host class. Registering the same key again replaces the
    /// class and drops its memoized accessors.
    pub fn register_class(&self, class: HostClass) {
        let key = class.key().clone();
        self.descriptors.remove(&key);
        self.members.retain(|(member_key, _), _| member_key != &key);
        self.classes.insert(key, Arc::new(class));
    }

    /// Policy-filtered descriptor of a class's accessible members,
    /// memoized per class key for the lifetime of the policy.
    pub fn descriptor(&self, key: &ClassKey) -> InteropResult<Arc<HostClassDescriptor>> {
        if let Some(descriptor) = self.descriptors.get(key) {
            return Ok(descriptor.clone());
        }
        let class = self.class(key)?;
        let members = class
            .members()
            .map(|member| member.descriptor(class.name()))
            .filter(|descriptor| self.policy.allows(descriptor))
            .collect();
        let descriptor = Arc::new(HostClassDescriptor {
            class_name: class.name().to_string(),
            members,
        });
        self.descriptors.insert(key.clone(), descriptor.clone());
        Ok(descriptor)
    }

    /// Resolve a member accessor, building and caching it on first use.
    ///
    /// Policy denial surfaces as `UnknownIdentifier`, indistinguishable
    /// from an absent member: denial must reveal nothing about what
    /// exists.
    pub fn resolve_member(
        &self,
        key: &ClassKey,
        name: &str,
    ) -> InteropResult<Arc<ResolvedMember>> {
        let cache_key = (key.clone(), name.to_string());
        if let Some(resolved) = self.members.get(&cache_key) {
            return Ok(resolved.clone());
        }

        let class = self.class(key)?;
        let member = class
            .member(name)
            .ok_or_else(|| InteropError::UnknownIdentifier(name.to_string()))?;
        if !self.policy.allows(&member.descriptor(class.name())) {
            return Err(InteropError::UnknownIdentifier(name.to_string()));
        }
        let resolved = Arc::new(match member {
            HostMember::Field(field) => ResolvedMember::Field(field.clone()),
            HostMember::Method(method) => ResolvedMember::Method(method.clone()),
        });
        self.members.insert(cache_key, resolved.clone());
        Ok(resolved)
    }

    /// Read a member of a host object.
    pub fn read_member(&self, receiver: &HostRef, name: &str) -> InteropResult<Value> {
        self.resolve_member(&receiver.class_key(), name)?
            .read(receiver)
    }

    /// Write a member of a host object.
    pub fn write_member(
        &self,
        receiver: &HostRef,
        name: &str,
        value: Value,
    ) -> InteropResult<()> {
        self.resolve_member(&receiver.class_key(), name)?
            .write(receiver, value)
    }

    /// Invoke a member of a host object.
    pub fn invoke_member(
        &self,
        receiver: &HostRef,
        name: &str,
        args: &[Value],
    ) -> InteropResult<Value> {
        self.resolve_member(&receiver.class_key(), name)?
            .invoke(receiver, args)
    }

    /// Conversion rules declared for a target type, in declaration order.
    ///
    /// The table is built once per policy; the key is already normalized
    /// (all integer widths are `Int`, all float widths `Float`).
    pub fn target_mappings(&self, target: &TypeKey) -> &[TargetMapping] {
        self.mapping_table()
            .get(target)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Convert a guest value to a declared target type: first rule whose
    /// predicate matches (or whose implicit conversion succeeds) wins.
    pub fn convert_to_target(&self, target: &TypeKey, value: &Value) -> InteropResult<Value> {
        convert_first_match(self.target_mappings(target), value)
    }

    fn mapping_table(&self) -> &FxHashMap<TypeKey, Vec<TargetMapping>> {
        self.mappings.get_or_init(|| {
            let mut table: FxHashMap<TypeKey, Vec<TargetMapping>> = FxHashMap::default();
            for mapping in self.policy.mappings() {
                table
                    .entry(mapping.target.clone())
                    .or_default()
                    .push(mapping.clone());
            }
            table
        })
    }

    fn class(&self, key: &ClassKey) -> InteropResult<Arc<HostClass>> {
        self.classes
            .get(key)
            .map(|entry| entry.clone())
            .ok_or_else(|| InteropError::UnknownIdentifier(format!("{key:?}")))
    }
}
