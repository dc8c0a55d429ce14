//! Inventories held by one peer

use crate::error::MutationError;
use std::collections::HashMap;
use void_inventory::{InstanceId, Inventory};

/// Inventory instances keyed by id
#[derive(Default)]
pub struct InstanceSet {
    inventories: HashMap<InstanceId, Inventory>,
}

impl InstanceSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an inventory, replacing any previous copy
    pub fn insert(&mut self, inventory: Inventory) -> InstanceId {
        let id = inventory.id();
        self.inventories.insert(id, inventory);
        id
    }

    /// Remove an inventory
    pub fn remove(&mut self, id: InstanceId) -> Option<Inventory> {
        self.inventories.remove(&id)
    }

    pub fn get(&self, id: InstanceId) -> Option<&Inventory> {
        self.inventories.get(&id)
    }

    pub fn get_mut(&mut self, id: InstanceId) -> Option<&mut Inventory> {
        self.inventories.get_mut(&id)
    }

    /// Mutable access, or `UnknownInstance`
    pub fn require_mut(&mut self, id: InstanceId) -> Result<&mut Inventory, MutationError> {
        self.inventories.get_mut(&id).ok_or(MutationError::UnknownInstance(id))
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        self.inventories.contains_key(&id)
    }

    /// Ids in ascending order
    pub fn ids(&self) -> Vec<InstanceId> {
        let mut ids: Vec<InstanceId> = self.inventories.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.inventories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inventories.is_empty()
    }

    /// Run `f` with two distinct instances borrowed mutably at once.
    ///
    /// Returns `None` if the ids are equal or either is missing.
    pub fn with_pair<T>(
        &mut self,
        first: InstanceId,
        second: InstanceId,
        f: impl FnOnce(&mut Inventory, &mut Inventory) -> T,
    ) -> Option<T> {
        if first == second {
            return None;
        }
        let mut taken = self.inventories.remove(&second)?;
        let out = self.inventories.get_mut(&first).map(|inventory| f(inventory, &mut taken));
        self.inventories.insert(second, taken);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use void_inventory::{ItemCatalog, InventoryKind};

    fn inventory(raw: u64) -> Inventory {
        Inventory::new(InventoryKind::Storage, Arc::new(ItemCatalog::new())).with_id(InstanceId::from_raw(raw))
    }

    #[test]
    fn test_with_pair_returns_both_to_the_set() {
        let mut set = InstanceSet::new();
        set.insert(inventory(10));
        set.insert(inventory(11));
        let seen = set.with_pair(InstanceId::from_raw(10), InstanceId::from_raw(11), |a, b| (a.id(), b.id()));
        assert_eq!(seen, Some((InstanceId::from_raw(10), InstanceId::from_raw(11))));
        assert_eq!(set.len(), 2);
        assert!(set.contains(InstanceId::from_raw(11)));
    }

    #[test]
    fn test_with_pair_refuses_missing_or_equal() {
        let mut set = InstanceSet::new();
        set.insert(inventory(10));
        assert!(set.with_pair(InstanceId::from_raw(10), InstanceId::from_raw(10), |_, _| ()).is_none());
        assert!(set.with_pair(InstanceId::from_raw(10), InstanceId::from_raw(12), |_, _| ()).is_none());
        assert!(set.with_pair(InstanceId::from_raw(12), InstanceId::from_raw(10), |_, _| ()).is_none());
        assert_eq!(set.ids(), vec![InstanceId::from_raw(10)]);
    }
}
