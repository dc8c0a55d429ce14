//! Behavior objects and item observers
//!
//! The inventory never looks inside a behavior. It constructs one on demand
//! from the class named by the item's asset, relays lifecycle notifications to
//! it and moves its opaque save bytes in and out of persistence.

use crate::identity::UniqueId;
use crate::item::Item;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Stateful behavior attached to an item
pub trait ItemBehavior: Send {
    /// Class name the behavior was registered under
    fn class_name(&self) -> &str;

    /// Item entered the inventory
    fn on_added(&mut self, _item: &Item) {}

    /// Item left the inventory
    fn on_removed(&mut self, _item: &Item) {}

    /// Item was equipped or unequipped
    fn on_equipped(&mut self, _item: &Item, _equipped: bool) {}

    /// Whether the behavior supports a named capability
    fn supports(&self, _capability: &str) -> bool {
        false
    }

    /// Opaque save payload
    fn save(&self) -> Vec<u8> {
        Vec::new()
    }

    /// Restore from a save payload
    fn load(&mut self, _bytes: &[u8]) {}
}

/// External object notified of item changes
pub trait ItemObserver: Send + Sync {
    /// Item state changed
    fn item_updated(&self, item: &Item);

    /// Item left the inventory
    fn item_removed(&self, _item: UniqueId) {}
}

/// Constructor for a behavior class
pub type BehaviorFactory = Box<dyn Fn() -> Box<dyn ItemBehavior> + Send + Sync>;

/// Behavior constructors keyed by class name
#[derive(Default)]
pub struct BehaviorRegistry {
    factories: HashMap<String, BehaviorFactory>,
}

impl BehaviorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor
    pub fn register<F>(&mut self, class: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn ItemBehavior> + Send + Sync + 'static,
    {
        self.factories.insert(class.into(), Box::new(factory));
    }

    /// Builder form of [`register`](Self::register)
    pub fn with<F>(mut self, class: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn ItemBehavior> + Send + Sync + 'static,
    {
        self.register(class, factory);
        self
    }

    /// Construct a behavior of `class`
    pub fn construct(&self, class: &str) -> Option<Box<dyn ItemBehavior>> {
        self.factories.get(class).map(|factory| factory())
    }

    /// Whether a class is registered
    pub fn contains(&self, class: &str) -> bool {
        self.factories.contains_key(class)
    }
}

impl fmt::Debug for BehaviorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BehaviorRegistry")
            .field("classes", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Observers attached to one item
pub(crate) type ObserverList = Vec<Arc<dyn ItemObserver>>;

#[cfg(test)]
mod tests {
    use super::*;

    struct Lantern {
        fuel: u8,
    }

    impl ItemBehavior for Lantern {
        fn class_name(&self) -> &str {
            "Lantern"
        }

        fn supports(&self, capability: &str) -> bool {
            capability == "Light"
        }

        fn save(&self) -> Vec<u8> {
            vec![self.fuel]
        }

        fn load(&mut self, bytes: &[u8]) {
            self.fuel = bytes.first().copied().unwrap_or_default();
        }
    }

    #[test]
    fn test_registry_constructs_by_class() {
        let registry = BehaviorRegistry::new().with("Lantern", || Box::new(Lantern { fuel: 3 }));
        assert!(registry.contains("Lantern"));
        let mut lantern = registry.construct("Lantern").unwrap();
        assert!(lantern.supports("Light"));
        assert_eq!(lantern.save(), vec![3]);
        lantern.load(&[9]);
        assert_eq!(lantern.save(), vec![9]);
        assert!(registry.construct("Torch").is_none());
    }
}
