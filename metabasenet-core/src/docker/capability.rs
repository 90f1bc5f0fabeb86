//! Typed capability lookup
//!
//! Modules declare the capabilities they satisfy when attached; consumers
//! resolve a handle constrained to the capability trait. No module is ever
//! cast back to its concrete type.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of capability handles keyed by capability trait.
#[derive(Default)]
pub struct CapabilityRegistry {
    entries: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle for capability `C`.
    ///
    /// Returns `false` when the capability already has a provider; the
    /// first registration wins.
    pub fn provide<C: ?Sized + Send + Sync + 'static>(&mut self, handle: Arc<C>) -> bool {
        let id = TypeId::of::<C>();
        if self.entries.contains_key(&id) {
            return false;
        }
        self.entries.insert(id, Box::new(handle));
        true
    }

    /// Resolve the handle registered for capability `C`.
    pub fn resolve<C: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<C>> {
        self.entries
            .get(&TypeId::of::<C>())
            .and_then(|boxed| boxed.downcast_ref::<Arc<C>>())
            .cloned()
    }

    /// Number of registered capabilities
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct English;

    impl Greeter for English {
        fn greet(&self) -> String {
            "hello".into()
        }
    }

    struct French;

    impl Greeter for French {
        fn greet(&self) -> String {
            "bonjour".into()
        }
    }

    #[test]
    fn test_provide_and_resolve() {
        let mut registry = CapabilityRegistry::new();
        assert!(registry.provide::<dyn Greeter>(Arc::new(English)));

        let handle = registry.resolve::<dyn Greeter>().unwrap();
        assert_eq!(handle.greet(), "hello");
    }

    #[test]
    fn test_first_provider_wins() {
        let mut registry = CapabilityRegistry::new();
        assert!(registry.provide::<dyn Greeter>(Arc::new(English)));
        assert!(!registry.provide::<dyn Greeter>(Arc::new(French)));
        assert_eq!(registry.resolve::<dyn Greeter>().unwrap().greet(), "hello");
    }

    #[test]
    fn test_unregistered_capability_absent() {
        let registry = CapabilityRegistry::new();
        assert!(registry.resolve::<dyn Greeter>().is_none());
    }
}
