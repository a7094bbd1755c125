//! Dynamic adapter loading.
//!
//! Guest code sometimes needs a host object implementing a set of named
//! operations supplied at runtime (an "adapter"). How such an
//! implementation comes to exist is platform-specific, so it sits behind a
//! small trait: a JIT-capable embedder can generate and link real code,
//! while the default loader builds a dispatch-table proxy that routes each
//! named operation through a registered closure.

use rustc_hash::FxHashMap;
use std::any::Any;
use std::sync::Arc;
use strata_sdk::{ClassKey, HostClass, HostObject, HostRef, InteropResult, Value};

/// One named operation of an adapter.
pub type AdapterMethod = Arc<dyn Fn(&[Value]) -> InteropResult<Value> + Send + Sync>;

/// Description of the adapter to produce: a class name plus its named
/// operations.
pub struct AdapterDefinition {
    /// Adapter class name; also its [`ClassKey::Named`] identity
    pub name: String,
    /// Named operations, with fixed arity where declared
    pub methods: Vec<(String, Option<usize>, AdapterMethod)>,
}

/// A produced adapter: the class to register with the interop cache plus a
/// constructor for instances.
pub struct LoadedAdapter {
    /// Member table for the interop cache
    pub class: HostClass,
    /// Instance factory
    pub construct: Arc<dyn Fn() -> HostRef + Send + Sync>,
}

/// Produces callable host implementations from adapter definitions.
pub trait AdapterCodeLoader: Send + Sync {
    /// Build an adapter class and instance factory from a definition.
    fn load(&self, definition: AdapterDefinition) -> InteropResult<LoadedAdapter>;
}

struct VtableAdapter {
    class_name: Arc<str>,
}

impl HostObject for VtableAdapter {
    fn class_name(&self) -> &str {
        &self.class_name
    }
    fn class_key(&self) -> ClassKey {
        ClassKey::Named(self.class_name.clone())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Default loader: a vtable-dispatch proxy, no code generation.
pub struct VtableAdapterLoader;

impl AdapterCodeLoader for VtableAdapterLoader {
    fn load(&self, definition: AdapterDefinition) -> InteropResult<LoadedAdapter> {
        let mut table: FxHashMap<String, (Option<usize>, AdapterMethod)> = FxHashMap::default();
        for (name, arity, method) in definition.methods {
            table.insert(name, (arity, method));
        }

        let mut builder = HostClass::named_builder(&definition.name);
        for (name, (arity, method)) in &table {
            let method = method.clone();
            match arity {
                Some(arity) => {
                    builder = builder.method(name, *arity, move |_, args| method(args));
                }
                None => {
                    builder = builder.method_variadic(name, move |_, args| method(args));
                }
            }
        }

        let class_name: Arc<str> = Arc::from(definition.name.as_str());
        let construct = Arc::new(move || -> HostRef {
            Arc::new(VtableAdapter {
                class_name: class_name.clone(),
            })
        });

        Ok(LoadedAdapter {
            class: builder.build(),
            construct,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interop::HostInteropCache;
    use strata_sdk::HostAccessPolicy;

    #[test]
    fn test_vtable_adapter_dispatches() {
        let loader = VtableAdapterLoader;
        let adapter = loader
            .load(AdapterDefinition {
                name: "Doubler".to_string(),
                methods: vec![(
                    "double".to_string(),
                    Some(1),
                    Arc::new(|args: &[Value]| Ok(Value::Int(args[0].as_int()? * 2))),
                )],
            })
            .unwrap();

        let cache = HostInteropCache::new(Arc::new(HostAccessPolicy::allow_all()));
        cache.register_class(adapter.class);

        let instance = (adapter.construct)();
        assert_eq!(instance.class_name(), "Doubler");
        assert_eq!(
            cache
                .invoke_member(&instance, "double", &[Value::Int(21)])
                .unwrap(),
            Value::Int(42)
        );
    }

    #[test]
    fn test_adapter_instances_share_class_key() {
        let loader = VtableAdapterLoader;
        let adapter = loader
            .load(AdapterDefinition {
                name: "Empty".to_string(),
                methods: vec![],
            })
            .unwrap();
        let a = (adapter.construct)();
        let b = (adapter.construct)();
        assert_eq!(a.class_key(), b.class_key());
        assert_eq!(a.class_key(), ClassKey::named("Empty"));
    }
}
