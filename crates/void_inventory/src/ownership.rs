//! Ownership graph and identity index maintenance
//!
//! Containers form a forest: each is owned either by the instance or by
//! exactly one item, and items own the containers whose back-reference names
//! them. Indices into the container array shift whenever it changes, so
//! [`Inventory::refresh_indexes`] re-stamps every coordinate in one pass.

use crate::identity::{IndexReport, Location, Serial, UniqueId};
use crate::inventory::Inventory;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Problem found in the ownership forest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OwnershipViolation {
    /// Back-reference names an item that does not exist
    DanglingOwner { container: UniqueId, owner: Serial },
    /// Back-reference coordinates disagree with the owner's position
    StaleOwnerCoordinates { container: UniqueId },
    /// Following owners leads back to this container
    Cycle { container: UniqueId },
}

impl Inventory {
    /// Re-stamp container indices, item coordinates and owner back-references,
    /// and point the identity index at the new positions.
    pub fn refresh_indexes(&mut self) {
        for (ci, container) in self.containers.iter_mut().enumerate() {
            container.index = ci;
            if !container.id.serial.is_provisional() {
                self.index.insert(container.id.serial, Location::Container { container: ci });
            }
            for (ii, item) in container.items.iter_mut().enumerate() {
                item.container_index = ci;
                item.item_index = ii;
                if !item.id.serial.is_provisional() {
                    self.index.insert(item.id.serial, Location::Item { container: ci, item: ii });
                }
            }
        }
        for container in self.containers.iter_mut() {
            let Some(owner) = container.owner.as_mut() else {
                continue;
            };
            if let Some(Location::Item { container, item }) = self.index.get(owner.item) {
                owner.container_index = container;
                owner.item_index = item;
            }
        }
    }

    /// Rebuild the identity index from scratch
    pub fn rebuild_index(&mut self) {
        self.index.clear();
        for (ci, container) in self.containers.iter().enumerate() {
            if !container.id.serial.is_provisional() {
                self.index.insert(container.id.serial, Location::Container { container: ci });
            }
            for (ii, item) in container.items.iter().enumerate() {
                if !item.id.serial.is_provisional() {
                    self.index.insert(item.id.serial, Location::Item { container: ci, item: ii });
                }
            }
        }
    }

    /// Compare the identity index with the container array.
    ///
    /// Reports, never repairs.
    pub fn validate_index(&self) -> IndexReport {
        let mut report = IndexReport::default();
        let mut live = HashSet::new();
        for (ci, container) in self.containers.iter().enumerate() {
            live.insert(container.id.serial);
            match self.index.get(container.id.serial) {
                None => report.missing_containers.push(container.id),
                Some(location) if location != (Location::Container { container: ci }) => {
                    report.incorrect_locations.push(container.id)
                }
                Some(_) => {}
            }
            for (ii, item) in container.items.iter().enumerate() {
                live.insert(item.id.serial);
                match self.index.get(item.id.serial) {
                    None => report.missing_items.push(item.id),
                    Some(location) if location != (Location::Item { container: ci, item: ii }) => {
                        report.incorrect_locations.push(item.id)
                    }
                    Some(_) => {}
                }
            }
        }
        for (serial, _) in self.index.iter() {
            if !live.contains(&serial) {
                report.unknown.push(serial);
            }
        }
        report.unknown.sort();
        report
    }

    /// Check every back-reference for dangling owners, stale coordinates
    /// and cycles.
    pub fn ownership_violations(&self) -> Vec<OwnershipViolation> {
        let mut violations = Vec::new();
        for container in &self.containers {
            let Some(owner) = container.owner else {
                continue;
            };
            match self.index.get(owner.item) {
                Some(Location::Item { container: ci, item: ii }) => {
                    if owner.container_index != ci || owner.item_index != ii {
                        violations.push(OwnershipViolation::StaleOwnerCoordinates { container: container.id });
                    }
                }
                _ => violations.push(OwnershipViolation::DanglingOwner {
                    container: container.id,
                    owner: owner.item,
                }),
            }
        }
        for (start, container) in self.containers.iter().enumerate() {
            let mut current = start;
            let mut steps = 0;
            while let Some(owner_ci) = self.owner_container_of(current) {
                steps += 1;
                if owner_ci == start || steps > self.containers.len() {
                    violations.push(OwnershipViolation::Cycle { container: container.id });
                    break;
                }
                current = owner_ci;
            }
        }
        violations
    }

    /// Owning item of a container, `None` when owned by the instance
    pub fn owning_item(&self, container: UniqueId) -> Option<UniqueId> {
        let ci = self.container_index(container).ok()?;
        self.containers[ci]
            .owner
            .map(|owner| UniqueId::new(owner.item, self.id))
    }

    /// Containers directly owned by an item
    pub fn owned_containers(&self, item: UniqueId) -> Vec<UniqueId> {
        self.owned_container_indices(item.serial)
            .into_iter()
            .map(|ci| self.containers[ci].id)
            .collect()
    }

    /// Items inside the containers an item owns, optionally all the way down
    pub fn children_items(&self, item: UniqueId, recursive: bool) -> Vec<UniqueId> {
        let containers = if recursive {
            self.subtree_container_indices(item.serial)
        } else {
            self.owned_container_indices(item.serial)
        };
        containers
            .into_iter()
            .flat_map(|ci| self.containers[ci].items.iter().map(|i| i.id))
            .collect()
    }

    /// Chain of items owning this item's container, nearest first
    pub fn parent_items(&self, item: UniqueId) -> Vec<UniqueId> {
        let mut parents = Vec::new();
        let Ok((mut ci, _)) = self.item_location(item) else {
            return parents;
        };
        while let Some(owner) = self.containers[ci].owner {
            let Some(Location::Item { container, .. }) = self.index.get(owner.item) else {
                break;
            };
            let id = UniqueId::new(owner.item, self.id);
            if parents.contains(&id) || parents.len() > self.containers.len() {
                log::warn!("Ownership cycle while walking parents of {}", item);
                break;
            }
            parents.push(id);
            ci = container;
        }
        parents
    }

    /// Whether `container` is owned, directly or transitively, by `item`
    pub fn is_owned_by(&self, container: UniqueId, item: UniqueId) -> bool {
        let Ok(ci) = self.container_index(container) else {
            return false;
        };
        self.subtree_container_indices(item.serial).contains(&ci)
    }

    pub(crate) fn owned_container_indices(&self, item: Serial) -> Vec<usize> {
        self.containers
            .iter()
            .enumerate()
            .filter(|(_, c)| c.owner.map(|o| o.item) == Some(item))
            .map(|(ci, _)| ci)
            .collect()
    }

    /// Every container below an item, breadth first
    pub(crate) fn subtree_container_indices(&self, item: Serial) -> Vec<usize> {
        let mut found = self.owned_container_indices(item);
        let mut cursor = 0;
        while cursor < found.len() {
            let ci = found[cursor];
            cursor += 1;
            for child in &self.containers[ci].items {
                for owned in self.owned_container_indices(child.id.serial) {
                    if !found.contains(&owned) {
                        found.push(owned);
                    }
                }
            }
        }
        found
    }

    fn owner_container_of(&self, ci: usize) -> Option<usize> {
        let owner = self.containers.get(ci)?.owner?;
        self.index.get(owner.item).map(|l| l.container())
    }
}
