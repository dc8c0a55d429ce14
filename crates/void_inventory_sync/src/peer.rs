//! Entry points shared by authorities and mirrors

use crate::error::Result;
use crate::message::{PeerId, RequestId, Role};
use crate::mutation::Mutation;
use void_inventory::{
    AssetId, InstanceId, Inventory, OverrideSettings, Rotation, Seed, SizeAdjustment, SortKey, Spawn, Tag,
    TagOwner, TagSet, UniqueId,
};

/// A peer that can issue inventory mutations.
///
/// On an authority a call executes immediately and is fanned out to
/// listeners. On a mirror it is predicted locally and sent for confirmation.
/// Either way the returned id correlates the call with its confirmation.
pub trait InventoryPeer {
    fn peer_id(&self) -> PeerId;

    fn role(&self) -> Role;

    /// Local copy of an instance
    fn inventory(&self, instance: InstanceId) -> Option<&Inventory>;

    /// Issue a mutation with an explicit shared seed
    fn submit_seeded(&mut self, mutation: Mutation, seed: Seed) -> Result<RequestId>;

    /// Issue a mutation with a fresh seed
    fn submit(&mut self, mutation: Mutation) -> Result<RequestId> {
        self.submit_seeded(mutation, Seed::random())
    }

    fn try_add_new_item(&mut self, instance: InstanceId, spawn: Spawn) -> Result<RequestId> {
        self.submit(Mutation::Spawn { instance, spawn })
    }

    fn remove_item(&mut self, item: UniqueId) -> Result<RequestId> {
        self.submit(Mutation::Remove { item })
    }

    fn move_item(
        &mut self,
        item: UniqueId,
        to: UniqueId,
        tile: Option<usize>,
        rotation: Option<Rotation>,
    ) -> Result<RequestId> {
        self.submit(Mutation::Move { item, to, tile, rotation })
    }

    fn swap_items(&mut self, a: UniqueId, b: UniqueId) -> Result<RequestId> {
        self.submit(Mutation::Swap { a, b })
    }

    fn stack_items(&mut self, from: UniqueId, onto: UniqueId) -> Result<RequestId> {
        self.submit(Mutation::Stack { from, onto })
    }

    fn split_item(&mut self, item: UniqueId, amount: u32, to: Option<UniqueId>, tile: Option<usize>) -> Result<RequestId> {
        self.submit(Mutation::Split { item, amount, to, tile })
    }

    fn increase_count(&mut self, item: UniqueId, amount: u32) -> Result<RequestId> {
        self.submit(Mutation::IncreaseCount { item, amount })
    }

    fn reduce_count(&mut self, item: UniqueId, amount: u32, remove_if_zero: bool) -> Result<RequestId> {
        self.submit(Mutation::ReduceCount { item, amount, remove_if_zero })
    }

    fn reduce_count_by_asset(
        &mut self,
        instance: InstanceId,
        asset: AssetId,
        count: u32,
        container: Option<UniqueId>,
        remove_if_zero: bool,
    ) -> Result<RequestId> {
        self.submit(Mutation::ReduceCountByAsset { instance, asset, count, container, remove_if_zero })
    }

    fn set_equipped(&mut self, item: UniqueId, equipped: bool) -> Result<RequestId> {
        self.submit(Mutation::SetEquipped { item, equipped })
    }

    fn update_overrides(&mut self, item: UniqueId, overrides: OverrideSettings) -> Result<RequestId> {
        self.submit(Mutation::UpdateOverrides { item, overrides })
    }

    fn add_tag(&mut self, instance: InstanceId, owner: TagOwner, tag: impl Into<Tag>) -> Result<RequestId>
    where
        Self: Sized,
    {
        self.submit(Mutation::AddTag { instance, owner, tag: tag.into() })
    }

    fn remove_tag(&mut self, instance: InstanceId, owner: TagOwner, tag: impl Into<Tag>) -> Result<RequestId>
    where
        Self: Sized,
    {
        self.submit(Mutation::RemoveTag { instance, owner, tag: tag.into() })
    }

    fn set_tag_value(
        &mut self,
        instance: InstanceId,
        owner: TagOwner,
        tag: impl Into<Tag>,
        value: f32,
        add_if_not_found: bool,
        calculation: Option<&str>,
    ) -> Result<RequestId>
    where
        Self: Sized,
    {
        self.submit(Mutation::SetTagValue {
            instance,
            owner,
            tag: tag.into(),
            value,
            add_if_not_found,
            calculation: calculation.map(str::to_string),
        })
    }

    fn remove_tag_value(&mut self, instance: InstanceId, owner: TagOwner, tag: impl Into<Tag>) -> Result<RequestId>
    where
        Self: Sized,
    {
        self.submit(Mutation::RemoveTagValue { instance, owner, tag: tag.into() })
    }

    fn add_tags_to_tile(&mut self, container: UniqueId, tile: usize, tags: TagSet) -> Result<RequestId> {
        self.submit(Mutation::AddTileTags { container, tile, tags })
    }

    fn remove_tags_from_tile(&mut self, container: UniqueId, tile: usize, tags: TagSet) -> Result<RequestId> {
        self.submit(Mutation::RemoveTileTags { container, tile, tags })
    }

    fn adjust_container_size(
        &mut self,
        container: UniqueId,
        adjustment: SizeAdjustment,
        clamp_to_items: bool,
    ) -> Result<RequestId> {
        self.submit(Mutation::AdjustContainerSize { container, adjustment, clamp_to_items })
    }

    fn sort_container(&mut self, container: UniqueId, key: SortKey) -> Result<RequestId> {
        self.submit(Mutation::SortContainer { container, key })
    }
}
