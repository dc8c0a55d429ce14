//! Replicated mutations
//!
//! A [`Mutation`] names an inventory operation by identities and parameters
//! only. Mirrors run it speculatively and authorities run it for real, both
//! through [`Mutation::execute`], so prediction and confirmation share one
//! code path. Anything random is drawn from the seed carried with the request.

use crate::error::MutationError;
use crate::instances::InstanceSet;
use serde::{Deserialize, Serialize};
use void_inventory::{
    transfer_item, AssetId, InstanceId, InventoryError, OverrideSettings, Rotation, Seed, SizeAdjustment, SortKey,
    Spawn, Tag, TagOwner, TagSet, UniqueId,
};

/// One inventory operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Mutation {
    /// Create new items. Authority only.
    Spawn { instance: InstanceId, spawn: Spawn },
    /// Remove an item and everything it owns
    Remove { item: UniqueId },
    /// Move an item; crosses instances when `to` lives in another one
    Move {
        item: UniqueId,
        to: UniqueId,
        tile: Option<usize>,
        rotation: Option<Rotation>,
    },
    /// Exchange two items' places
    Swap { a: UniqueId, b: UniqueId },
    /// Move as much of `from` onto `onto` as fits
    Stack { from: UniqueId, onto: UniqueId },
    /// Split `amount` off into a new stack
    Split {
        item: UniqueId,
        amount: u32,
        to: Option<UniqueId>,
        tile: Option<usize>,
    },
    IncreaseCount { item: UniqueId, amount: u32 },
    ReduceCount { item: UniqueId, amount: u32, remove_if_zero: bool },
    /// Take a count of an asset across stacks
    ReduceCountByAsset {
        instance: InstanceId,
        asset: AssetId,
        count: u32,
        container: Option<UniqueId>,
        remove_if_zero: bool,
    },
    SetEquipped { item: UniqueId, equipped: bool },
    UpdateOverrides { item: UniqueId, overrides: OverrideSettings },
    AddTag { instance: InstanceId, owner: TagOwner, tag: Tag },
    RemoveTag { instance: InstanceId, owner: TagOwner, tag: Tag },
    /// Set a tag value, optionally through a named calculation
    SetTagValue {
        instance: InstanceId,
        owner: TagOwner,
        tag: Tag,
        value: f32,
        add_if_not_found: bool,
        calculation: Option<String>,
    },
    RemoveTagValue { instance: InstanceId, owner: TagOwner, tag: Tag },
    AddTileTags { container: UniqueId, tile: usize, tags: TagSet },
    RemoveTileTags { container: UniqueId, tile: usize, tags: TagSet },
    AdjustContainerSize {
        container: UniqueId,
        adjustment: SizeAdjustment,
        clamp_to_items: bool,
    },
    SortContainer { container: UniqueId, key: SortKey },
}

impl Mutation {
    /// Instance the operation is addressed to
    pub fn instance(&self) -> InstanceId {
        match self {
            Self::Spawn { instance, .. }
            | Self::ReduceCountByAsset { instance, .. }
            | Self::AddTag { instance, .. }
            | Self::RemoveTag { instance, .. }
            | Self::SetTagValue { instance, .. }
            | Self::RemoveTagValue { instance, .. } => *instance,
            Self::Remove { item }
            | Self::Move { item, .. }
            | Self::Split { item, .. }
            | Self::IncreaseCount { item, .. }
            | Self::ReduceCount { item, .. }
            | Self::SetEquipped { item, .. }
            | Self::UpdateOverrides { item, .. } => item.instance,
            Self::Swap { a, .. } => a.instance,
            Self::Stack { from, .. } => from.instance,
            Self::AddTileTags { container, .. }
            | Self::RemoveTileTags { container, .. }
            | Self::AdjustContainerSize { container, .. }
            | Self::SortContainer { container, .. } => container.instance,
        }
    }

    /// Every instance the operation may change
    pub fn instances(&self) -> Vec<InstanceId> {
        let mut instances = vec![self.instance()];
        if let Self::Move { to, .. } = self {
            if to.instance != self.instance() {
                instances.push(to.instance);
            }
        }
        instances
    }

    /// Identities named by the operation
    pub fn subjects(&self) -> Vec<UniqueId> {
        let owner_id = |owner: &TagOwner| match owner {
            TagOwner::Item(id) | TagOwner::Container(id) => Some(*id),
            TagOwner::Instance => None,
        };
        match self {
            Self::Spawn { spawn, .. } => spawn.container.into_iter().collect(),
            Self::Remove { item }
            | Self::IncreaseCount { item, .. }
            | Self::ReduceCount { item, .. }
            | Self::SetEquipped { item, .. }
            | Self::UpdateOverrides { item, .. } => vec![*item],
            Self::Move { item, to, .. } => vec![*item, *to],
            Self::Swap { a, b } => vec![*a, *b],
            Self::Stack { from, onto } => vec![*from, *onto],
            Self::Split { item, to, .. } => std::iter::once(*item).chain(*to).collect(),
            Self::ReduceCountByAsset { container, .. } => container.iter().copied().collect(),
            Self::AddTag { owner, .. }
            | Self::RemoveTag { owner, .. }
            | Self::SetTagValue { owner, .. }
            | Self::RemoveTagValue { owner, .. } => owner_id(owner).into_iter().collect(),
            Self::AddTileTags { container, .. }
            | Self::RemoveTileTags { container, .. }
            | Self::AdjustContainerSize { container, .. }
            | Self::SortContainer { container, .. } => vec![*container],
        }
    }

    /// Whether only the authority may run this
    pub fn is_authority_only(&self) -> bool {
        matches!(self, Self::Spawn { .. })
    }

    /// Whether the instance's own tags or tag values may change
    pub fn touches_instance_annotations(&self) -> bool {
        matches!(
            self,
            Self::AddTag { owner: TagOwner::Instance, .. }
                | Self::RemoveTag { owner: TagOwner::Instance, .. }
                | Self::SetTagValue { owner: TagOwner::Instance, .. }
                | Self::RemoveTagValue { owner: TagOwner::Instance, .. }
        )
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Spawn { .. } => "spawn",
            Self::Remove { .. } => "remove",
            Self::Move { .. } => "move",
            Self::Swap { .. } => "swap",
            Self::Stack { .. } => "stack",
            Self::Split { .. } => "split",
            Self::IncreaseCount { .. } => "increase_count",
            Self::ReduceCount { .. } => "reduce_count",
            Self::ReduceCountByAsset { .. } => "reduce_count_by_asset",
            Self::SetEquipped { .. } => "set_equipped",
            Self::UpdateOverrides { .. } => "update_overrides",
            Self::AddTag { .. } => "add_tag",
            Self::RemoveTag { .. } => "remove_tag",
            Self::SetTagValue { .. } => "set_tag_value",
            Self::RemoveTagValue { .. } => "remove_tag_value",
            Self::AddTileTags { .. } => "add_tile_tags",
            Self::RemoveTileTags { .. } => "remove_tile_tags",
            Self::AdjustContainerSize { .. } => "adjust_container_size",
            Self::SortContainer { .. } => "sort_container",
        }
    }

    /// Run the operation against `set`.
    ///
    /// Returns identities created by it: spawned stacks, the new half of a
    /// split, or an item's new identity after crossing instances.
    pub fn execute(&self, set: &mut InstanceSet, seed: Seed) -> Result<Vec<UniqueId>, MutationError> {
        for instance in self.instances() {
            if !set.contains(instance) {
                return Err(MutationError::UnknownInstance(instance));
            }
        }
        if let Self::Move { item, to, tile, rotation } = self {
            if to.instance != item.instance {
                let moved = set
                    .with_pair(item.instance, to.instance, |from, into| {
                        transfer_item(from, into, *item, *to, *tile, *rotation, seed)
                    })
                    .ok_or(MutationError::UnknownInstance(to.instance))??;
                return Ok(vec![moved]);
            }
        }

        let inventory = set.require_mut(self.instance())?;
        let created = match self {
            Self::Spawn { spawn, .. } => inventory.try_add_new_item(spawn, seed)?.created,
            Self::Remove { item } => {
                inventory.remove_item(*item)?;
                Vec::new()
            }
            Self::Move { item, to, tile, rotation } => {
                inventory.move_item(*item, *to, *tile, *rotation)?;
                Vec::new()
            }
            Self::Swap { a, b } => {
                same_instance(*a, *b)?;
                inventory.swap_items(*a, *b)?;
                Vec::new()
            }
            Self::Stack { from, onto } => {
                same_instance(*from, *onto)?;
                inventory.stack_items(*from, *onto)?;
                Vec::new()
            }
            Self::Split { item, amount, to, tile } => {
                if let Some(to) = to {
                    same_instance(*item, *to)?;
                }
                vec![inventory.split_item(*item, *amount, *to, *tile, seed)?]
            }
            Self::IncreaseCount { item, amount } => {
                inventory.increase_count(*item, *amount)?;
                Vec::new()
            }
            Self::ReduceCount { item, amount, remove_if_zero } => {
                inventory.reduce_count(*item, *amount, *remove_if_zero)?;
                Vec::new()
            }
            Self::ReduceCountByAsset { asset, count, container, remove_if_zero, .. } => {
                inventory.reduce_count_by_asset(asset, *count, *container, *remove_if_zero)?;
                Vec::new()
            }
            Self::SetEquipped { item, equipped } => {
                inventory.set_equipped(*item, *equipped)?;
                Vec::new()
            }
            Self::UpdateOverrides { item, overrides } => {
                inventory.update_overrides(*item, overrides.clone())?;
                Vec::new()
            }
            Self::AddTag { owner, tag, .. } => {
                inventory.add_tag(*owner, tag.clone())?;
                Vec::new()
            }
            Self::RemoveTag { owner, tag, .. } => {
                inventory.remove_tag(*owner, tag)?;
                Vec::new()
            }
            Self::SetTagValue { owner, tag, value, add_if_not_found, calculation, .. } => {
                inventory.set_tag_value(*owner, tag.clone(), *value, *add_if_not_found, calculation.as_deref())?;
                Vec::new()
            }
            Self::RemoveTagValue { owner, tag, .. } => {
                inventory.remove_tag_value(*owner, tag)?;
                Vec::new()
            }
            Self::AddTileTags { container, tile, tags } => {
                inventory.add_tags_to_tile(*container, *tile, tags)?;
                Vec::new()
            }
            Self::RemoveTileTags { container, tile, tags } => {
                inventory.remove_tags_from_tile(*container, *tile, tags)?;
                Vec::new()
            }
            Self::AdjustContainerSize { container, adjustment, clamp_to_items } => {
                inventory.adjust_container_size(*container, *adjustment, *clamp_to_items)?;
                Vec::new()
            }
            Self::SortContainer { container, key } => {
                inventory.sort_container(*container, *key)?;
                Vec::new()
            }
        };
        Ok(created)
    }
}

fn same_instance(a: UniqueId, b: UniqueId) -> Result<(), InventoryError> {
    if a.instance == b.instance {
        Ok(())
    } else {
        Err(InventoryError::WrongInstance(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use void_inventory::{Container, Inventory, InventoryKind, ItemAsset, ItemCatalog};

    fn catalog() -> Arc<ItemCatalog> {
        Arc::new(ItemCatalog::new().with(ItemAsset::new("gem", "Gem").with_max_stack(20)))
    }

    fn set_with(raws: &[u64]) -> InstanceSet {
        let catalog = catalog();
        let mut set = InstanceSet::new();
        for raw in raws {
            let mut inventory = Inventory::new(InventoryKind::Storage, catalog.clone())
                .with_id(InstanceId::from_raw(*raw))
                .with_container(Container::new("Container.Main").with_dimensions(3, 3));
            inventory.initialize(Seed(*raw));
            set.insert(inventory);
        }
        set
    }

    fn spawn_gems(set: &mut InstanceSet, raw: u64, count: u32) -> UniqueId {
        Mutation::Spawn {
            instance: InstanceId::from_raw(raw),
            spawn: Spawn::new("gem", count),
        }
        .execute(set, Seed(7))
        .unwrap()[0]
    }

    #[test]
    fn test_instances_of_cross_move() {
        let a = UniqueId::new(void_inventory::Serial::PROVISIONAL, InstanceId::from_raw(1));
        let b = UniqueId::new(void_inventory::Serial::PROVISIONAL, InstanceId::from_raw(2));
        let local = Mutation::Move { item: a, to: a, tile: None, rotation: None };
        let cross = Mutation::Move { item: a, to: b, tile: None, rotation: None };
        assert_eq!(local.instances(), vec![InstanceId::from_raw(1)]);
        assert_eq!(cross.instances(), vec![InstanceId::from_raw(1), InstanceId::from_raw(2)]);
        assert_eq!(cross.subjects(), vec![a, b]);
    }

    #[test]
    fn test_split_reports_new_stack() {
        let mut set = set_with(&[1]);
        let gems = spawn_gems(&mut set, 1, 10);
        let created = Mutation::Split { item: gems, amount: 4, to: None, tile: None }
            .execute(&mut set, Seed(3))
            .unwrap();
        assert_eq!(created.len(), 1);
        let inventory = set.get(InstanceId::from_raw(1)).unwrap();
        assert_eq!(inventory.item(gems).unwrap().count, 6);
        assert_eq!(inventory.item(created[0]).unwrap().count, 4);
    }

    #[test]
    fn test_cross_instance_move_reidentifies() {
        let mut set = set_with(&[1, 2]);
        let gems = spawn_gems(&mut set, 1, 5);
        let target = set.get(InstanceId::from_raw(2)).unwrap().containers()[0].id;
        let created = Mutation::Move { item: gems, to: target, tile: None, rotation: None }
            .execute(&mut set, Seed(4))
            .unwrap();
        assert_eq!(created[0].instance, InstanceId::from_raw(2));
        assert!(set.get(InstanceId::from_raw(1)).unwrap().item(gems).is_none());
        assert_eq!(set.get(InstanceId::from_raw(2)).unwrap().item(created[0]).unwrap().count, 5);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_stack_across_instances_is_refused() {
        let mut set = set_with(&[1, 2]);
        let a = spawn_gems(&mut set, 1, 5);
        let b = spawn_gems(&mut set, 2, 5);
        let result = Mutation::Stack { from: a, onto: b }.execute(&mut set, Seed(1));
        assert_eq!(result, Err(MutationError::Inventory(InventoryError::WrongInstance(b))));
    }

    #[test]
    fn test_unknown_instance() {
        let mut set = set_with(&[1]);
        let result = Mutation::AddTag {
            instance: InstanceId::from_raw(9),
            owner: TagOwner::Instance,
            tag: Tag::new("Inventory.Locked"),
        }
        .execute(&mut set, Seed(1));
        assert_eq!(result, Err(MutationError::UnknownInstance(InstanceId::from_raw(9))));
    }
}
