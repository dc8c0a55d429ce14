//! Moving items between inventory instances
//!
//! Identities are only unique within an instance, so an item that crosses
//! over is re-identified in the receiving instance together with every
//! container it owns and everything inside them.

use crate::container::ContainerType;
use crate::error::{InventoryError, Result};
use crate::events::InventoryEvent;
use crate::identity::{Location, Seed, Serial, UniqueId};
use crate::inventory::Inventory;
use crate::rotation::Rotation;
use std::collections::HashMap;

/// Move an item, with its owned sub-tree, from one instance into a container
/// of another.
///
/// New serials are drawn from `seed` in a fixed order: the item first, then
/// each owned container followed by its items, breadth first. Both peers of a
/// confirmed move therefore agree on the new identities. Returns the item's
/// new identity.
pub fn transfer_item(
    from: &mut Inventory,
    to: &mut Inventory,
    item: UniqueId,
    container: UniqueId,
    tile: Option<usize>,
    rotation: Option<Rotation>,
    seed: Seed,
) -> Result<UniqueId> {
    from.queries.settle();
    to.queries.settle();

    let (sci, sii) = from.item_location(item)?;
    let tci = to.container_index(container)?;
    let moving = &from.containers[sci].items[sii];
    let asset = to.asset_of(moving)?;
    if !to.containers[tci].accepts(moving, &asset) {
        return Err(InventoryError::Incompatible {
            item: asset.id.clone(),
            container,
        });
    }
    let plan = to.plan_placement(tci, &asset, tile, rotation, moving.rotation, &[])?;
    let was_equipped_slot = from.containers[sci].kind == ContainerType::Equipment;

    let detached = from.detach(item)?;
    from.emit(InventoryEvent::ItemRemoved {
        item,
        asset: detached.item.asset.clone(),
        count: detached.item.count,
    });
    from.after_mutation();

    let mut rng = seed.rng();
    let mut remap: HashMap<Serial, Serial> = HashMap::new();
    let mut reassigned = Vec::new();

    let final_tile = to.commit_placement(tci, &plan, &asset);
    let mut moved = detached.item;
    let new_id = UniqueId::new(to.draw_serial(&mut rng), to.id);
    remap.insert(moved.id.serial, new_id.serial);
    reassigned.push((moved.id, new_id));
    moved.id = new_id;
    moved.tile = final_tile;
    moved.rotation = plan.rotation;
    let target = &mut to.containers[tci];
    target.items.push(moved);
    let tii = target.items.len() - 1;
    target.add_item_to_tile_map(tii, &asset);
    to.index.insert(new_id.serial, Location::Item { container: tci, item: tii });

    for mut owned in detached.containers {
        let ci = to.containers.len();
        let old = owned.id;
        owned.id = UniqueId::new(to.draw_serial(&mut rng), to.id);
        owned.index = ci;
        to.index.insert(owned.id.serial, Location::Container { container: ci });
        for (ii, child) in owned.items.iter_mut().enumerate() {
            let serial = to.draw_serial(&mut rng);
            remap.insert(child.id.serial, serial);
            let renamed = UniqueId::new(serial, to.id);
            reassigned.push((child.id, renamed));
            child.id = renamed;
            to.index.insert(serial, Location::Item { container: ci, item: ii });
        }
        if let Some(owner) = owned.owner.as_mut() {
            owner.item = remap.get(&owner.item).copied().unwrap_or(Serial::PROVISIONAL);
        }
        owned.rebuild_tile_map(&to.catalog);
        log::trace!("Container {} re-identified as {}", old, owned.id);
        to.containers.push(owned);
        to.mark_touched(ci);
    }
    to.refresh_indexes();

    for (serial, mut behavior) in detached.behaviors {
        let Some(renamed) = remap.get(&serial).copied() else {
            continue;
        };
        if let Ok((ci, ii)) = to.item_location(UniqueId::new(renamed, to.id)) {
            behavior.on_added(&to.containers[ci].items[ii]);
        }
        to.behaviors.insert(renamed, behavior);
    }

    to.emit(InventoryEvent::ItemAdded {
        item: new_id,
        container,
        tile: final_tile,
    });
    for (old, new) in &reassigned {
        to.emit(InventoryEvent::IdentityReassigned { old: *old, new: *new });
        if let Ok((ci, ii)) = to.item_location(*new) {
            to.item_updated(ci, ii);
        }
    }

    let now_equipped_slot = to.containers[tci].kind == ContainerType::Equipment;
    if was_equipped_slot != now_equipped_slot {
        to.sync_equipped(new_id, now_equipped_slot);
    }
    log::debug!("Transferred {} from {} to {} as {}", item, from.id, to.id, new_id);
    to.after_mutation();
    Ok(new_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Container;
    use crate::identity::InstanceId;
    use crate::inventory::InventoryKind;
    use crate::item::{ItemAsset, ItemCatalog};
    use crate::behavior::{BehaviorRegistry, ItemBehavior};
    use crate::item::Item;
    use crate::ops::Spawn;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct Compass {
        added: Arc<Mutex<Vec<UniqueId>>>,
    }

    impl ItemBehavior for Compass {
        fn class_name(&self) -> &str {
            "Compass"
        }

        fn on_added(&mut self, item: &Item) {
            self.added.lock().push(item.id);
        }
    }

    fn catalog() -> Arc<ItemCatalog> {
        Arc::new(
            ItemCatalog::new()
                .with(ItemAsset::new("apple", "Apple").with_max_stack(10))
                .with(ItemAsset::new("compass", "Compass").with_behavior("Compass"))
                .with(
                    ItemAsset::new("pouch", "Pouch")
                        .with_max_stack(1)
                        .with_container(Container::new("Container.Pouch").with_dimensions(2, 2)),
                ),
        )
    }

    fn inventory(catalog: &Arc<ItemCatalog>, kind: InventoryKind) -> Inventory {
        let mut inventory =
            Inventory::new(kind, catalog.clone()).with_container(Container::new("Container.Main").with_dimensions(4, 4));
        inventory.initialize(Seed(1));
        inventory
    }

    #[test]
    fn test_transfer_reassigns_subtree() {
        let catalog = catalog();
        let mut player = inventory(&catalog, InventoryKind::Player);
        let mut chest = inventory(&catalog, InventoryKind::Interactable);

        let pouch = player.try_add_new_item(&Spawn::new("pouch", 1), Seed(2)).unwrap().created[0];
        let pouch_container = player.owned_containers(pouch)[0];
        player
            .try_add_new_item(&Spawn::new("apple", 3).into_container(pouch_container), Seed(3))
            .unwrap();
        assert_eq!(player.containers().len(), 2);

        let target = chest.containers()[0].id;
        let moved = transfer_item(&mut player, &mut chest, pouch, target, None, None, Seed(4)).unwrap();

        assert_eq!(moved.instance, chest.id());
        assert_eq!(player.containers().len(), 1);
        assert!(player.item(pouch).is_none());
        assert_eq!(chest.containers().len(), 2);
        assert_eq!(chest.children_items(moved, true).len(), 1);
        assert!(chest.validate_index().is_consistent());
        assert!(chest.ownership_violations().is_empty());
        assert!(player.validate_index().is_consistent());
    }

    #[test]
    fn test_transferred_behavior_is_told_it_was_added() {
        let added = Arc::new(Mutex::new(Vec::new()));
        let log = added.clone();
        let registry = Arc::new(BehaviorRegistry::new().with("Compass", move || {
            Box::new(Compass { added: log.clone() }) as Box<dyn ItemBehavior>
        }));
        let catalog = catalog();
        let mut player = inventory(&catalog, InventoryKind::Player).with_behaviors(registry.clone());
        let mut chest = inventory(&catalog, InventoryKind::Interactable).with_behaviors(registry);

        let compass = player.try_add_new_item(&Spawn::new("compass", 1), Seed(2)).unwrap().created[0];
        assert!(player.behavior_mut(compass).is_some());
        assert_eq!(*added.lock(), vec![compass]);

        let target = chest.containers()[0].id;
        let moved = transfer_item(&mut player, &mut chest, compass, target, None, None, Seed(3)).unwrap();
        assert!(chest.has_behavior(moved));
        assert_eq!(*added.lock(), vec![compass, moved]);
    }

    #[test]
    fn test_transfer_is_deterministic() {
        let catalog = catalog();
        let run = || {
            let build = |raw| {
                let mut inventory = Inventory::new(InventoryKind::Storage, catalog.clone())
                    .with_id(InstanceId::from_raw(raw))
                    .with_container(Container::new("Container.Main").with_dimensions(4, 4));
                inventory.initialize(Seed(1));
                inventory
            };
            let mut a = build(900);
            let mut b = build(901);
            let apple = a.try_add_new_item(&Spawn::new("apple", 2), Seed(5)).unwrap().created[0];
            let target = b.containers()[0].id;
            transfer_item(&mut a, &mut b, apple, target, None, None, Seed(6)).unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_refused_transfer_changes_nothing() {
        let catalog = catalog();
        let mut a = inventory(&catalog, InventoryKind::Player);
        let mut b = Inventory::new(InventoryKind::Pickup, catalog.clone())
            .with_container(Container::new("Container.Tiny").with_dimensions(1, 1));
        b.initialize(Seed(1));
        let filler = b.try_add_new_item(&Spawn::new("apple", 10), Seed(2)).unwrap().created[0];
        let apple = a.try_add_new_item(&Spawn::new("apple", 10), Seed(3)).unwrap().created[0];
        let target = b.containers()[0].id;
        let result = transfer_item(&mut a, &mut b, apple, target, Some(0), None, Seed(4));
        assert_eq!(result, Err(InventoryError::NoSpace(target)));
        assert!(a.item(apple).is_some());
        assert_eq!(b.items().map(|i| i.id).collect::<Vec<_>>(), vec![filler]);
    }
}
