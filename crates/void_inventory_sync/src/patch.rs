//! Building and applying state patches

use crate::message::InstancePatch;
use std::collections::BTreeSet;
use void_inventory::{Container, Inventory, UniqueId};

/// Patch covering what `inventory` changed since its last
/// [`take_changes`](Inventory::take_changes) plus the `extra` containers a
/// mirror reported touching.
///
/// Containers that still exist are copied whole; the rest are listed as
/// removed. Instance annotations are included when they changed or when
/// `with_annotations` is set.
pub fn build_patch(inventory: &mut Inventory, extra: &[UniqueId], with_annotations: bool) -> InstancePatch {
    let changes = inventory.take_changes();
    let instance = inventory.id();
    let mut affected: BTreeSet<UniqueId> = changes.touched.union(&changes.removed).copied().collect();
    affected.extend(extra.iter().copied().filter(|id| id.instance == instance));

    let mut patch = InstancePatch {
        instance,
        ..Default::default()
    };
    for id in affected {
        match inventory.container(id) {
            Some(container) => patch.upserts.push(container.clone()),
            None => patch.removed.push(id),
        }
    }
    if changes.instance || with_annotations {
        patch.tags = Some(inventory.tags().clone());
        patch.tag_values = Some(inventory.tag_values().clone());
    }
    patch
}

/// Overwrite `inventory` with a patch.
///
/// Removed containers are dropped, upserted ones replace the local copy with
/// the same identity or are appended. The index and tile maps are rebuilt.
pub fn apply_patch(inventory: &mut Inventory, patch: &InstancePatch) {
    if patch.is_empty() {
        return;
    }
    let mut containers: Vec<Container> = inventory
        .containers()
        .iter()
        .filter(|c| !patch.removed.contains(&c.id))
        .cloned()
        .collect();
    for upsert in &patch.upserts {
        match containers.iter_mut().find(|c| c.id == upsert.id) {
            Some(slot) => *slot = upsert.clone(),
            None => containers.push(upsert.clone()),
        }
    }
    let tags = patch.tags.clone().unwrap_or_else(|| inventory.tags().clone());
    let tag_values = patch.tag_values.clone().unwrap_or_else(|| inventory.tag_values().clone());
    log::trace!(
        "Patching {}: {} upserts, {} removed",
        patch.instance,
        patch.upserts.len(),
        patch.removed.len()
    );
    inventory.restore(containers, tags, tag_values);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use void_inventory::{
        BehaviorRegistry, InstanceId, InventoryKind, ItemAsset, ItemBehavior, ItemCatalog, Seed, Spawn, Tag, TagOwner,
    };

    struct Lamp;

    impl ItemBehavior for Lamp {
        fn class_name(&self) -> &str {
            "Lamp"
        }
    }

    fn inventory() -> Inventory {
        let catalog = Arc::new(
            ItemCatalog::new()
                .with(ItemAsset::new("coin", "Coin").with_max_stack(50))
                .with(ItemAsset::new("lamp", "Lamp").with_behavior("Lamp"))
                .with(
                    ItemAsset::new("bag", "Bag")
                        .with_dimensions(2, 2)
                        .with_container(Container::new("Container.Bag").with_dimensions(2, 2)),
                ),
        );
        let behaviors = BehaviorRegistry::new().with("Lamp", || Box::new(Lamp) as Box<dyn ItemBehavior>);
        let mut inventory = Inventory::new(InventoryKind::Player, catalog)
            .with_id(InstanceId::from_raw(40))
            .with_behaviors(Arc::new(behaviors))
            .with_container(Container::new("Container.Main").with_dimensions(4, 4));
        inventory.initialize(Seed(40));
        inventory.take_changes();
        inventory
    }

    #[test]
    fn test_patch_copies_touched_containers() {
        let mut source = inventory();
        let mut copy = inventory();
        source.try_add_new_item(&Spawn::new("coin", 30), Seed(1)).unwrap();
        let patch = build_patch(&mut source, &[], false);
        assert_eq!(patch.upserts.len(), 1);
        assert!(patch.tags.is_none());
        apply_patch(&mut copy, &patch);
        assert_eq!(copy.containers(), source.containers());
    }

    #[test]
    fn test_patch_removes_dropped_containers() {
        let mut source = inventory();
        let bag = source.try_add_new_item(&Spawn::new("bag", 1), Seed(2)).unwrap().created[0];
        let mut copy = inventory();
        apply_patch(&mut copy, &build_patch(&mut source, &[], false));
        assert_eq!(copy.containers().len(), 2);

        source.remove_item(bag).unwrap();
        let patch = build_patch(&mut source, &[], false);
        assert_eq!(patch.removed.len(), 1);
        apply_patch(&mut copy, &patch);
        assert_eq!(copy.containers(), source.containers());
        assert!(copy.validate_index().is_consistent());
    }

    #[test]
    fn test_instance_annotations_travel_when_changed() {
        let mut source = inventory();
        let mut copy = inventory();
        source.add_tag(TagOwner::Instance, "Inventory.Shared").unwrap();
        let patch = build_patch(&mut source, &[], false);
        assert!(patch.upserts.is_empty());
        apply_patch(&mut copy, &patch);
        assert!(copy.tags().contains_exact(&Tag::new("Inventory.Shared")));
    }

    #[test]
    fn test_patch_keeps_behaviors_of_untouched_items() {
        let mut source = inventory();
        let mut copy = inventory();
        let lamp = source.try_add_new_item(&Spawn::new("lamp", 1), Seed(3)).unwrap().created[0];
        let bag = source.try_add_new_item(&Spawn::new("bag", 1), Seed(4)).unwrap().created[0];
        apply_patch(&mut copy, &build_patch(&mut source, &[], false));
        assert!(copy.behavior_mut(lamp).is_some());

        let pocket = source.owned_containers(bag)[0];
        source
            .try_add_new_item(&Spawn::new("coin", 5).into_container(pocket), Seed(5))
            .unwrap();
        let patch = build_patch(&mut source, &[], false);
        assert_eq!(patch.upserts.len(), 1);
        apply_patch(&mut copy, &patch);
        assert!(copy.has_behavior(lamp));

        source.remove_item(lamp).unwrap();
        apply_patch(&mut copy, &build_patch(&mut source, &[], false));
        assert!(!copy.has_behavior(lamp));
    }

    #[test]
    fn test_extra_ids_of_other_instances_are_ignored() {
        let mut source = inventory();
        let foreign = UniqueId::new(void_inventory::Serial::PROVISIONAL, InstanceId::from_raw(41));
        let patch = build_patch(&mut source, &[foreign], false);
        assert!(patch.is_empty());
    }
}
