//! Structural operations
//!
//! Every entry point validates first and only then mutates, so a refused
//! operation leaves the instance untouched. Each one updates items, tile maps
//! and the identity index in the same call.

use crate::container::{ContainerType, GrowthDirection};
use crate::error::{InventoryError, Result};
use crate::events::InventoryEvent;
use crate::identity::{Seed, Serial, UniqueId};
use crate::inventory::Inventory;
use crate::item::{AssetId, Item, ItemAsset, OverrideSettings, RandomCount};
use crate::rotation::{Rotation, TileCoord};
use crate::shape::{Dimensions, SocketLocation};
use crate::tags::TagSet;
use crate::tilemap::{Placement, SpaceCheck, SpaceQuery, SINGLE_TILE};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Parameters of a new-item spawn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spawn {
    /// Asset to spawn
    pub asset: AssetId,
    /// How many
    pub count: RandomCount,
    /// Target container, `None` for the first that fits
    pub container: Option<UniqueId>,
    /// Target tile, `None` for the first free one
    pub tile: Option<usize>,
    /// Required rotation, `None` to search
    pub rotation: Option<Rotation>,
    /// Never top up existing stacks
    pub skip_stacking: bool,
}

impl Spawn {
    /// Spawn `count` of `asset` anywhere
    pub fn new(asset: impl Into<AssetId>, count: u32) -> Self {
        Self {
            asset: asset.into(),
            count: RandomCount::Exact(count),
            container: None,
            tile: None,
            rotation: None,
            skip_stacking: false,
        }
    }

    /// Use a count rule instead of an exact count
    pub fn with_count(mut self, count: RandomCount) -> Self {
        self.count = count;
        self
    }

    /// Target a container
    pub fn into_container(mut self, container: UniqueId) -> Self {
        self.container = Some(container);
        self
    }

    /// Target a tile
    pub fn at_tile(mut self, tile: usize) -> Self {
        self.tile = Some(tile);
        self
    }

    /// Require a rotation
    pub fn rotated(mut self, rotation: Rotation) -> Self {
        self.rotation = Some(rotation);
        self
    }

    /// Do not merge into existing stacks
    pub fn skip_stacking(mut self) -> Self {
        self.skip_stacking = true;
        self
    }
}

/// Result of [`Inventory::try_add_new_item`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddOutcome {
    /// Count resolved for the spawn
    pub requested: u32,
    /// New stacks created
    pub created: Vec<UniqueId>,
    /// Existing stacks topped up, with the amount added
    pub stacked: Vec<(UniqueId, u32)>,
    /// Count that found no room
    pub remaining: u32,
}

/// Result of [`Inventory::stack_items`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackOutcome {
    /// Amount moved onto the target
    pub moved: u32,
    /// Count left on the source, zero when it was removed
    pub from_remaining: u32,
    /// New count of the target
    pub onto_count: u32,
}

/// Signed growth of each edge of a container
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeAdjustment {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl SizeAdjustment {
    /// Grow or shrink only the right and bottom edges
    pub fn extend(x: i32, y: i32) -> Self {
        Self {
            right: x,
            bottom: y,
            ..Default::default()
        }
    }
}

/// Ordering used by [`Inventory::sort_container`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortKey {
    /// Display name
    Name,
    /// Type tag
    Type,
    /// Largest stacks first
    Count,
    /// Largest shapes first
    Size,
}

/// A free spot found by [`Inventory::first_available_container_and_tile`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoundSpace {
    pub container: UniqueId,
    /// `None` when the container has to grow first
    pub tile: Option<usize>,
    pub rotation: Rotation,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct PlacementPlan {
    pub tile: usize,
    pub rotation: Rotation,
    pub grow: u32,
}

/// Item detached from an instance together with everything it owns
pub(crate) struct Detached {
    pub item: Item,
    pub containers: Vec<crate::container::Container>,
    pub behaviors: Vec<(Serial, Box<dyn crate::behavior::ItemBehavior>)>,
}

fn rotation_order(requested: Option<Rotation>, current: Rotation, spatial: bool) -> Vec<Rotation> {
    match requested {
        Some(rotation) => vec![rotation],
        None if !spatial => vec![current],
        None => {
            let mut order = vec![current];
            order.extend(Rotation::ALL.into_iter().filter(|r| *r != current));
            order
        }
    }
}

impl Inventory {
    // ------------------------------------------------------------------
    // Placement
    // ------------------------------------------------------------------

    /// Find where an item can go without changing anything.
    ///
    /// Growth a placement needs is simulated on a copy of the container.
    pub(crate) fn plan_placement(
        &self,
        ci: usize,
        asset: &ItemAsset,
        tile: Option<usize>,
        rotation: Option<Rotation>,
        current: Rotation,
        ignore: &[Serial],
    ) -> Result<PlacementPlan> {
        let container = &self.containers[ci];
        let query = SpaceQuery::ignoring(ignore)
            .early_exit()
            .with_locked_tag(self.config.locked_tile_tag.as_ref());

        if let Some(tile) = tile {
            if container.supports_tile_map() && tile >= container.tile_count() {
                return Err(InventoryError::InvalidTile { container: container.id, tile });
            }
            return rotation_order(rotation, current, container.is_spatial())
                .into_iter()
                .find(|r| container.check_for_space(container.item_shape(asset, *r), tile, &query).fits)
                .map(|rotation| PlacementPlan { tile, rotation, grow: 0 })
                .ok_or(InventoryError::NoSpace(container.id));
        }

        let try_rotations = rotation.is_none() && self.config.rotate_new_items;
        let preferred = rotation.unwrap_or(current);
        let mut probe = Cow::Borrowed(container);
        let mut grown = 0;
        loop {
            match probe.first_available_tile(asset, preferred, try_rotations, &query) {
                Placement::At { tile, rotation } => {
                    return Ok(PlacementPlan { tile, rotation, grow: grown });
                }
                Placement::Grow if grown < self.config.max_growth_per_placement => {
                    probe.to_mut().grow(1, &self.catalog);
                    grown += 1;
                }
                _ => return Err(InventoryError::NoSpace(container.id)),
            }
        }
    }

    /// Apply the growth a plan needs and stretch the container over any part
    /// of the shape hanging past its growth edge. Returns the final tile.
    pub(crate) fn commit_placement(&mut self, ci: usize, plan: &PlacementPlan, asset: &ItemAsset) -> usize {
        let catalog = self.catalog.clone();
        let container = &mut self.containers[ci];
        if plan.grow > 0 {
            container.grow(plan.grow, &catalog);
        }
        let shape = container.item_shape(asset, plan.rotation);
        let span = container.span_of(shape, plan.tile);
        let dims = container.dimensions;
        let stretched = match container.growth {
            GrowthDirection::X if span.x > dims.x => Some(Dimensions::new(span.x, dims.y)),
            GrowthDirection::Y if span.y > dims.y => Some(Dimensions::new(dims.x, span.y)),
            _ => None,
        };
        let mut tile = plan.tile;
        if let Some(stretched) = stretched {
            let coord = container.tile_to_coord(plan.tile);
            container.resize(stretched, TileCoord::default(), &catalog);
            tile = container.coord_to_tile(coord).unwrap_or(plan.tile);
        }
        if plan.grow > 0 || stretched.is_some() {
            let event = InventoryEvent::ContainerResized {
                container: container.id,
                dimensions: container.dimensions,
            };
            self.emit(event);
        }
        tile
    }

    /// Push an item into a container at its planned tile.
    ///
    /// Provisional items receive a serial from `rng`; the containers the
    /// asset declares are created for it.
    pub(crate) fn insert_item<R: Rng + ?Sized>(&mut self, ci: usize, mut item: Item, rng: &mut R) -> UniqueId {
        if !item.id.is_valid() || item.id.instance != self.id {
            item.id = UniqueId::new(self.draw_serial(rng), self.id);
        }
        let id = item.id;
        let tile = item.tile;
        let asset = self.catalog.get(&item.asset).cloned();
        let container = &mut self.containers[ci];
        container.items.push(item);
        let ii = container.items.len() - 1;
        container.items[ii].container_index = ci;
        container.items[ii].item_index = ii;
        if let Some(asset) = asset.as_deref() {
            container.add_item_to_tile_map(ii, asset);
        }
        let container_id = container.id;
        self.index
            .insert(id.serial, crate::identity::Location::Item { container: ci, item: ii });
        self.instantiate_owned_containers(ci, ii, rng);
        self.emit(InventoryEvent::ItemAdded { item: id, container: container_id, tile });
        self.item_updated(ci, ii);
        id
    }

    /// Whether `item` may enter `container` under its compatibility rules
    pub fn check_compatibility(&self, item: UniqueId, container: UniqueId) -> bool {
        let (Ok((ci, ii)), Ok(target)) = (self.item_location(item), self.container_index(container)) else {
            return false;
        };
        let item = &self.containers[ci].items[ii];
        match self.asset_of(item) {
            Ok(asset) => {
                self.containers[target].accepts(item, &asset)
                    && !self.subtree_container_indices(item.id.serial).contains(&target)
            }
            Err(_) => false,
        }
    }

    /// Full space check for an item at a tile, listing every blocker
    pub fn check_space(
        &self,
        item: UniqueId,
        container: UniqueId,
        tile: usize,
        rotation: Rotation,
    ) -> Result<SpaceCheck> {
        let (ci, ii) = self.item_location(item)?;
        let target = self.container_index(container)?;
        let asset = self.asset_of(&self.containers[ci].items[ii])?;
        let ignore = [item.serial];
        let query = SpaceQuery::ignoring(&ignore).with_locked_tag(self.config.locked_tile_tag.as_ref());
        let c = &self.containers[target];
        Ok(c.check_for_space(c.item_shape(&asset, rotation), tile, &query))
    }

    /// First rotation at which an item fits at a tile, in canonical order
    pub fn check_all_rotations(&self, item: UniqueId, container: UniqueId, tile: usize) -> Result<Option<Rotation>> {
        let (ci, ii) = self.item_location(item)?;
        let target = self.container_index(container)?;
        let asset = self.asset_of(&self.containers[ci].items[ii])?;
        let ignore = [item.serial];
        let query = SpaceQuery::ignoring(&ignore).with_locked_tag(self.config.locked_tile_tag.as_ref());
        Ok(self.containers[target].check_all_rotations(&asset, tile, &query))
    }

    /// First free tile for an asset in a container
    pub fn first_available_tile(&self, asset: &AssetId, container: UniqueId) -> Result<Option<(usize, Rotation)>> {
        let ci = self.container_index(container)?;
        let asset = self
            .catalog
            .get(asset)
            .cloned()
            .ok_or_else(|| InventoryError::UnknownAsset(asset.clone()))?;
        let query = SpaceQuery::default().with_locked_tag(self.config.locked_tile_tag.as_ref());
        Ok(
            match self.containers[ci].first_available_tile(&asset, Rotation::Zero, self.config.rotate_new_items, &query) {
                Placement::At { tile, rotation } => Some((tile, rotation)),
                Placement::Grow | Placement::NoSpace => None,
            },
        )
    }

    /// First compatible container with room for an asset, in array order
    pub fn first_available_container_and_tile(&self, asset: &AssetId) -> Option<FoundSpace> {
        let asset = self.catalog.get(asset)?.clone();
        let probe = Item::new(&asset, 1);
        for (ci, container) in self.containers.iter().enumerate() {
            if !container.accepts(&probe, &asset) {
                continue;
            }
            if let Ok(plan) = self.plan_placement(ci, &asset, None, None, Rotation::Zero, &[]) {
                return Some(FoundSpace {
                    container: container.id,
                    tile: (plan.grow == 0).then_some(plan.tile),
                    rotation: plan.rotation,
                });
            }
        }
        None
    }

    // ------------------------------------------------------------------
    // Adding and removing
    // ------------------------------------------------------------------

    /// Spawn new items.
    ///
    /// Tops up existing stacks first unless told not to, then creates new
    /// stacks until the count is placed or no room is left. Count draws and
    /// new serials come from `seed`, so every peer reaches the same result.
    /// Raises `ItemFailedToSpawn` for any count that found no room.
    pub fn try_add_new_item(&mut self, spawn: &Spawn, seed: Seed) -> Result<AddOutcome> {
        self.queries.settle();
        let mut rng = seed.rng();
        let asset = self
            .catalog
            .get(&spawn.asset)
            .cloned()
            .ok_or_else(|| InventoryError::UnknownAsset(spawn.asset.clone()))?;
        let total = spawn.count.resolve(&asset, asset.default_count, &mut rng);
        if total == 0 {
            return Err(InventoryError::InvalidCount(0));
        }
        let targets: Vec<usize> = match spawn.container {
            Some(container) => vec![self.container_index(container)?],
            None => (0..self.containers.len()).collect(),
        };
        let probe = Item::new(&asset, total);
        if let Some(container) = spawn.container {
            if !self.containers[targets[0]].accepts(&probe, &asset) {
                return Err(InventoryError::Incompatible { item: asset.id.clone(), container });
            }
        }

        let mut outcome = AddOutcome {
            requested: total,
            remaining: total,
            ..Default::default()
        };

        if !spawn.skip_stacking && asset.is_stackable() {
            for &ci in &targets {
                for ii in 0..self.containers[ci].items.len() {
                    if outcome.remaining == 0 {
                        break;
                    }
                    let item = &self.containers[ci].items[ii];
                    if item.asset != asset.id {
                        continue;
                    }
                    let max = self.max_stack(&asset, &item.overrides);
                    if item.count >= max {
                        continue;
                    }
                    let add = outcome.remaining.min(max - item.count);
                    let old = item.count;
                    let id = item.id;
                    self.containers[ci].items[ii].count += add;
                    outcome.remaining -= add;
                    outcome.stacked.push((id, add));
                    self.emit(InventoryEvent::ItemCountChanged { item: id, old_count: old, new_count: old + add });
                    self.item_updated(ci, ii);
                }
            }
        }

        let mut tile = spawn.tile;
        while outcome.remaining > 0 {
            let amount = outcome
                .remaining
                .min(self.max_stack(&asset, &OverrideSettings::default()));
            let placed = targets.iter().find_map(|&ci| {
                if !self.containers[ci].accepts(&probe, &asset) {
                    return None;
                }
                self.plan_placement(ci, &asset, tile, spawn.rotation, Rotation::Zero, &[])
                    .ok()
                    .map(|plan| (ci, plan))
            });
            let Some((ci, plan)) = placed else {
                break;
            };
            let final_tile = self.commit_placement(ci, &plan, &asset);
            let item = Item::new(&asset, amount).at(final_tile).rotated(plan.rotation);
            let id = self.insert_item(ci, item, &mut rng);
            outcome.created.push(id);
            outcome.remaining -= amount;
            tile = None;
        }

        if outcome.remaining == total {
            self.emit(InventoryEvent::ItemFailedToSpawn { asset: asset.id.clone(), count: total });
            log::debug!("No room in {} for {} x{}", self.id, asset.id, total);
            return Err(InventoryError::Full(self.id));
        }
        if outcome.remaining > 0 {
            self.emit(InventoryEvent::ItemFailedToSpawn {
                asset: asset.id.clone(),
                count: outcome.remaining,
            });
        }
        self.after_mutation();
        Ok(outcome)
    }

    /// Add a container owned by the instance or by an item
    pub fn add_container(
        &mut self,
        mut container: crate::container::Container,
        owner: Option<UniqueId>,
        seed: Seed,
    ) -> Result<UniqueId> {
        self.queries.settle();
        let owner_ref = match owner {
            Some(owner) => {
                let (ci, ii) = self.item_location(owner)?;
                Some(crate::container::OwnerRef {
                    item: owner.serial,
                    container_index: ci,
                    item_index: ii,
                })
            }
            None => None,
        };
        let mut rng = seed.rng();
        container.id = UniqueId::new(self.draw_serial(&mut rng), self.id);
        container.owner = owner_ref;
        for item in container.items.iter_mut() {
            item.id = UniqueId::provisional();
        }
        let items = std::mem::take(&mut container.items);
        let id = container.id;
        let ci = self.containers.len();
        container.index = ci;
        container.rebuild_tile_map(&self.catalog);
        self.index
            .insert(id.serial, crate::identity::Location::Container { container: ci });
        self.containers.push(container);
        self.mark_touched(ci);
        for item in items {
            let Ok(asset) = self.asset_of(&item) else {
                log::warn!("Dropping item with unknown asset {} from new container", item.asset);
                continue;
            };
            match self.plan_placement(ci, &asset, Some(item.tile), Some(item.rotation), item.rotation, &[]) {
                Ok(plan) => {
                    let tile = self.commit_placement(ci, &plan, &asset);
                    self.insert_item(ci, item.at(tile), &mut rng);
                }
                Err(err) => log::warn!("Dropping {} from new container: {}", item.asset, err),
            }
        }
        self.after_mutation();
        Ok(id)
    }

    /// Remove a container, its items and every container they own
    pub fn remove_container(&mut self, container: UniqueId) -> Result<()> {
        self.queries.settle();
        let ci = self.container_index(container)?;
        let mut doomed = vec![ci];
        for item in &self.containers[ci].items {
            doomed.extend(self.subtree_container_indices(item.id.serial));
        }
        for &dci in &doomed {
            let items: Vec<Item> = self.containers[dci].items.clone();
            for item in items {
                self.destroy_item_state(&item);
            }
        }
        self.drop_containers(&doomed);
        self.refresh_indexes();
        self.after_mutation();
        Ok(())
    }

    /// Remove an item. Containers it owns are destroyed with everything in
    /// them.
    pub fn remove_item(&mut self, item: UniqueId) -> Result<Item> {
        self.queries.settle();
        let detached = self.detach(item)?;
        for container in &detached.containers {
            for child in &container.items {
                self.emit(InventoryEvent::ItemRemoved {
                    item: child.id,
                    asset: child.asset.clone(),
                    count: child.count,
                });
            }
        }
        for (serial, mut behavior) in detached.behaviors {
            let owner = std::iter::once(&detached.item)
                .chain(detached.containers.iter().flat_map(|c| c.items.iter()))
                .find(|i| i.id.serial == serial);
            if let Some(owner) = owner {
                behavior.on_removed(owner);
            }
        }
        self.emit(InventoryEvent::ItemRemoved {
            item: detached.item.id,
            asset: detached.item.asset.clone(),
            count: detached.item.count,
        });
        log::debug!("Removed {} and {} owned containers", item, detached.containers.len());
        self.after_mutation();
        Ok(detached.item)
    }

    /// Unlink an item and its owned sub-tree from this instance
    pub(crate) fn detach(&mut self, item: UniqueId) -> Result<Detached> {
        let (ci, ii) = self.item_location(item)?;
        let subtree = self.subtree_container_indices(item.serial);

        let mut behaviors = Vec::new();
        let mut containers = Vec::with_capacity(subtree.len());
        for &sci in &subtree {
            containers.push(self.containers[sci].clone());
            for child in self.containers[sci].items.clone() {
                if let Some(behavior) = self.behaviors.remove(&child.id.serial) {
                    behaviors.push((child.id.serial, behavior));
                }
                self.forget_item(&child);
            }
        }

        self.containers[ci].remove_from_tile_map(item.serial);
        let removed = self.containers[ci].items.remove(ii);
        if let Some(behavior) = self.behaviors.remove(&item.serial) {
            behaviors.push((item.serial, behavior));
        }
        self.forget_item(&removed);
        self.mark_touched(ci);
        self.drop_containers(&subtree);
        self.refresh_indexes();

        Ok(Detached { item: removed, containers, behaviors })
    }

    /// Remove an item's index entry, observers and query memberships
    fn forget_item(&mut self, item: &Item) {
        self.index.remove(item.id.serial);
        if let Some(observers) = self.observers.remove(&item.id.serial) {
            for observer in observers {
                observer.item_removed(item.id);
            }
        }
        self.queries.unregister_item(item.id.serial);
    }

    fn destroy_item_state(&mut self, item: &Item) {
        if let Some(mut behavior) = self.behaviors.remove(&item.id.serial) {
            behavior.on_removed(item);
        }
        self.forget_item(item);
        self.emit(InventoryEvent::ItemRemoved {
            item: item.id,
            asset: item.asset.clone(),
            count: item.count,
        });
    }

    fn drop_containers(&mut self, doomed: &[usize]) {
        let ids: Vec<UniqueId> = doomed.iter().map(|&ci| self.containers[ci].id).collect();
        for id in &ids {
            self.index.remove(id.serial);
            self.mark_removed(*id);
        }
        self.containers.retain(|c| !ids.contains(&c.id));
    }

    // ------------------------------------------------------------------
    // Moving
    // ------------------------------------------------------------------

    /// Move an item to another container or tile of this instance.
    ///
    /// Never stacks. With no rotation given the item keeps its rotation if it
    /// fits and otherwise tries the rest in canonical order.
    pub fn move_item(
        &mut self,
        item: UniqueId,
        to: UniqueId,
        tile: Option<usize>,
        rotation: Option<Rotation>,
    ) -> Result<()> {
        self.queries.settle();
        let (sci, sii) = self.item_location(item)?;
        let tci = self.container_index(to)?;
        let moving = &self.containers[sci].items[sii];
        let asset = self.asset_of(moving)?;
        if self.subtree_container_indices(item.serial).contains(&tci) {
            return Err(InventoryError::OwnershipCycle(item));
        }
        if !self.containers[tci].accepts(moving, &asset) {
            return Err(InventoryError::Incompatible { item: asset.id.clone(), container: to });
        }
        let plan = self.plan_placement(tci, &asset, tile, rotation, moving.rotation, &[item.serial])?;
        if sci == tci && plan.grow == 0 && plan.tile == moving.tile && plan.rotation == moving.rotation {
            return Ok(());
        }

        let from = self.containers[sci].id;
        self.containers[sci].remove_from_tile_map(item.serial);
        let mut moved = self.containers[sci].items.remove(sii);
        let final_tile = self.commit_placement(tci, &plan, &asset);
        moved.tile = final_tile;
        moved.rotation = plan.rotation;
        let target = &mut self.containers[tci];
        target.items.push(moved);
        let tii = target.items.len() - 1;
        target.add_item_to_tile_map(tii, &asset);
        self.refresh_indexes();
        self.mark_touched(sci);

        self.emit(InventoryEvent::ItemMoved { item, from, to, tile: final_tile });
        self.equip_transition(sci, tci, item);
        if let Ok((ci, ii)) = self.item_location(item) {
            self.item_updated(ci, ii);
        }
        self.after_mutation();
        Ok(())
    }

    /// Exchange the locations of two items
    pub fn swap_items(&mut self, a: UniqueId, b: UniqueId) -> Result<()> {
        self.queries.settle();
        if a == b {
            return Err(InventoryError::NoEffect);
        }
        let (aci, aii) = self.item_location(a)?;
        let (bci, bii) = self.item_location(b)?;
        let item_a = self.containers[aci].items[aii].clone();
        let item_b = self.containers[bci].items[bii].clone();
        let asset_a = self.asset_of(&item_a)?;
        let asset_b = self.asset_of(&item_b)?;
        let a_id = self.containers[aci].id;
        let b_id = self.containers[bci].id;

        if self.subtree_container_indices(a.serial).contains(&bci)
            || self.subtree_container_indices(b.serial).contains(&aci)
        {
            return Err(InventoryError::OwnershipCycle(a));
        }
        if !self.containers[bci].accepts(&item_a, &asset_a) {
            return Err(InventoryError::Incompatible { item: asset_a.id.clone(), container: b_id });
        }
        if !self.containers[aci].accepts(&item_b, &asset_b) {
            return Err(InventoryError::Incompatible { item: asset_b.id.clone(), container: a_id });
        }

        // Try the exchange on copies; commit only if both fit.
        let mut target_b = self.containers[bci].clone();
        target_b.remove_from_tile_map(a.serial);
        target_b.remove_from_tile_map(b.serial);
        let locked = self.config.locked_tile_tag.clone();
        let query = SpaceQuery::default().early_exit().with_locked_tag(locked.as_ref());
        let rot_a = rotation_order(None, item_a.rotation, target_b.is_spatial())
            .into_iter()
            .find(|r| target_b.check_for_space(target_b.item_shape(&asset_a, *r), item_b.tile, &query).fits)
            .ok_or(InventoryError::NoSpace(b_id))?;
        let mut placed_a = item_a.clone();
        placed_a.tile = item_b.tile;
        placed_a.rotation = rot_a;
        let a_tiles = target_b.item_tiles(&placed_a, Some(asset_a.as_ref()));

        let mut target_a = if aci == bci {
            target_b.clone()
        } else {
            let mut c = self.containers[aci].clone();
            c.remove_from_tile_map(a.serial);
            c
        };
        if aci == bci {
            for t in &a_tiles {
                target_a.tile_map[*t] = Some(a.serial);
            }
        }
        let rot_b = rotation_order(None, item_b.rotation, target_a.is_spatial())
            .into_iter()
            .find(|r| target_a.check_for_space(target_a.item_shape(&asset_b, *r), item_a.tile, &query).fits)
            .ok_or(InventoryError::NoSpace(a_id))?;

        let catalog = self.catalog.clone();
        if aci == bci {
            let c = &mut self.containers[aci];
            c.items[aii].tile = item_b.tile;
            c.items[aii].rotation = rot_a;
            c.items[bii].tile = item_a.tile;
            c.items[bii].rotation = rot_b;
            c.rebuild_tile_map(&catalog);
        } else {
            let mut moved_a = self.containers[aci].items.remove(aii);
            let mut moved_b = self.containers[bci].items.remove(bii);
            moved_a.tile = item_b.tile;
            moved_a.rotation = rot_a;
            moved_b.tile = item_a.tile;
            moved_b.rotation = rot_b;
            self.containers[bci].items.push(moved_a);
            self.containers[aci].items.push(moved_b);
            self.containers[aci].rebuild_tile_map(&catalog);
            self.containers[bci].rebuild_tile_map(&catalog);
        }
        self.refresh_indexes();
        self.mark_touched(aci);
        self.mark_touched(bci);
        self.emit(InventoryEvent::ItemsSwapped { a, b });
        if aci != bci {
            self.equip_transition(aci, bci, a);
            self.equip_transition(bci, aci, b);
        }
        self.after_mutation();
        Ok(())
    }

    fn equip_transition(&mut self, from_ci: usize, to_ci: usize, item: UniqueId) {
        let was = self.containers.get(from_ci).map(|c| c.kind == ContainerType::Equipment);
        let now = self.containers.get(to_ci).map(|c| c.kind == ContainerType::Equipment);
        let equipped = match (was, now) {
            (Some(false), Some(true)) => true,
            (Some(true), Some(false)) => false,
            _ => return,
        };
        self.sync_equipped(item, equipped);
    }

    /// Bring the equipped tag in line with the item's container.
    /// `NoEffect` means the tag already agreed.
    pub(crate) fn sync_equipped(&mut self, item: UniqueId, equipped: bool) {
        match self.set_equipped(item, equipped) {
            Ok(()) | Err(InventoryError::NoEffect) => {}
            Err(err) => log::warn!("Could not set equipped={} on {}: {}", equipped, item, err),
        }
    }

    // ------------------------------------------------------------------
    // Counts
    // ------------------------------------------------------------------

    /// Move as much of `from` onto `onto` as the max stack allows.
    ///
    /// The total count is conserved. A source that reaches zero is removed.
    pub fn stack_items(&mut self, from: UniqueId, onto: UniqueId) -> Result<StackOutcome> {
        self.queries.settle();
        let (fci, fii) = self.item_location(from)?;
        let (oci, oii) = self.item_location(onto)?;
        let source = &self.containers[fci].items[fii];
        let target = &self.containers[oci].items[oii];
        let asset = self.asset_of(target)?;
        let max = self.max_stack(&asset, &target.overrides);
        if !crate::item::can_stack(source, target, &asset, max) {
            return Err(InventoryError::CannotStack { from, onto });
        }
        let moved = source.count.min(max - target.count);
        let (from_old, onto_old) = (source.count, target.count);
        if moved == 0 {
            return Err(InventoryError::NoEffect);
        }

        self.containers[oci].items[oii].count += moved;
        self.containers[fci].items[fii].count -= moved;
        let outcome = StackOutcome {
            moved,
            from_remaining: from_old - moved,
            onto_count: onto_old + moved,
        };
        self.emit(InventoryEvent::ItemsStacked { from, onto, amount: moved });
        self.emit(InventoryEvent::ItemCountChanged {
            item: onto,
            old_count: onto_old,
            new_count: outcome.onto_count,
        });
        self.emit(InventoryEvent::ItemCountChanged {
            item: from,
            old_count: from_old,
            new_count: outcome.from_remaining,
        });
        self.item_updated(oci, oii);
        if outcome.from_remaining == 0 {
            self.remove_item(from)?;
        } else {
            self.item_updated(fci, fii);
            self.after_mutation();
        }
        Ok(outcome)
    }

    /// Split `amount` off a stack into a new stack.
    ///
    /// The amount must be below the stack count. The new stack goes to
    /// `to` (default: the same container) at `tile` or the first free tile.
    pub fn split_item(
        &mut self,
        item: UniqueId,
        amount: u32,
        to: Option<UniqueId>,
        tile: Option<usize>,
        seed: Seed,
    ) -> Result<UniqueId> {
        self.queries.settle();
        let (sci, sii) = self.item_location(item)?;
        let source = &self.containers[sci].items[sii];
        let asset = self.asset_of(source)?;
        if !asset.is_stackable() || amount == 0 || amount >= source.count {
            return Err(InventoryError::CannotSplit { requested: amount, available: source.count });
        }
        let tci = match to {
            Some(container) => self.container_index(container)?,
            None => sci,
        };
        if !self.containers[tci].accepts(source, &asset) {
            return Err(InventoryError::Incompatible {
                item: asset.id.clone(),
                container: self.containers[tci].id,
            });
        }
        if self.subtree_container_indices(item.serial).contains(&tci) {
            return Err(InventoryError::OwnershipCycle(item));
        }
        let plan = self.plan_placement(tci, &asset, tile, None, source.rotation, &[])?;
        let new_stack = source.split_off(amount);
        let old_count = source.count;

        let final_tile = self.commit_placement(tci, &plan, &asset);
        self.containers[sci].items[sii].count -= amount;
        let mut rng = seed.rng();
        let new_id = self.insert_item(tci, new_stack.at(final_tile).rotated(plan.rotation), &mut rng);
        self.emit(InventoryEvent::ItemSplit { source: item, new_item: new_id, amount });
        self.emit(InventoryEvent::ItemCountChanged {
            item,
            old_count,
            new_count: old_count - amount,
        });
        if let Ok((ci, ii)) = self.item_location(item) {
            self.item_updated(ci, ii);
        }
        self.after_mutation();
        Ok(new_id)
    }

    /// Raise a stack's count, clamped to its max stack. Returns the new count.
    pub fn increase_count(&mut self, item: UniqueId, amount: u32) -> Result<u32> {
        self.queries.settle();
        if amount == 0 {
            return Err(InventoryError::InvalidCount(0));
        }
        let (ci, ii) = self.item_location(item)?;
        let target = &self.containers[ci].items[ii];
        let asset = self.asset_of(target)?;
        let max = self.max_stack(&asset, &target.overrides);
        let old = target.count;
        let new = old.saturating_add(amount).min(max);
        if new == old {
            return Err(InventoryError::NoEffect);
        }
        self.containers[ci].items[ii].count = new;
        self.emit(InventoryEvent::ItemCountChanged { item, old_count: old, new_count: new });
        self.item_updated(ci, ii);
        self.after_mutation();
        Ok(new)
    }

    /// Lower a stack's count, never below zero. At zero the item is removed
    /// if `remove_if_zero`. Returns the new count.
    pub fn reduce_count(&mut self, item: UniqueId, amount: u32, remove_if_zero: bool) -> Result<u32> {
        self.queries.settle();
        if amount == 0 {
            return Err(InventoryError::InvalidCount(0));
        }
        let (ci, ii) = self.item_location(item)?;
        let old = self.containers[ci].items[ii].count;
        let new = old.saturating_sub(amount);
        self.containers[ci].items[ii].count = new;
        self.emit(InventoryEvent::ItemCountChanged { item, old_count: old, new_count: new });
        if new == 0 && remove_if_zero {
            self.remove_item(item)?;
        } else {
            self.item_updated(ci, ii);
            self.after_mutation();
        }
        Ok(new)
    }

    /// Stacks of an asset that together hold at least `count`, with the
    /// amount to take from each. `None` if there are not enough.
    pub fn items_by_count(
        &self,
        asset: &AssetId,
        count: u32,
        container: Option<UniqueId>,
    ) -> Option<Vec<(UniqueId, u32)>> {
        let scope: Vec<usize> = match container {
            Some(id) => vec![self.container_index(id).ok()?],
            None => (0..self.containers.len()).collect(),
        };
        let mut needed = count;
        let mut picked = Vec::new();
        for ci in scope {
            for item in &self.containers[ci].items {
                if needed == 0 {
                    break;
                }
                if item.asset != *asset || item.count == 0 {
                    continue;
                }
                let take = item.count.min(needed);
                picked.push((item.id, take));
                needed -= take;
            }
        }
        (needed == 0).then_some(picked)
    }

    /// Take `count` of an asset across stacks. Refused as a whole if there
    /// are not enough. Returns the stacks that were reduced.
    pub fn reduce_count_by_asset(
        &mut self,
        asset: &AssetId,
        count: u32,
        container: Option<UniqueId>,
        remove_if_zero: bool,
    ) -> Result<Vec<UniqueId>> {
        self.queries.settle();
        if count == 0 {
            return Err(InventoryError::InvalidCount(0));
        }
        let Some(picked) = self.items_by_count(asset, count, container) else {
            let available = self
                .items()
                .filter(|i| i.asset == *asset)
                .map(|i| i.count)
                .sum();
            return Err(InventoryError::NotEnoughItems { requested: count, available });
        };
        let mut reduced = Vec::with_capacity(picked.len());
        for (item, take) in picked {
            self.reduce_count(item, take, remove_if_zero)?;
            reduced.push(item);
        }
        Ok(reduced)
    }

    // ------------------------------------------------------------------
    // Item state
    // ------------------------------------------------------------------

    /// Flip the equipped tag and notify the behavior object
    pub fn set_equipped(&mut self, item: UniqueId, equipped: bool) -> Result<()> {
        self.queries.settle();
        let (ci, ii) = self.item_location(item)?;
        let tag = self.config.equipped_tag.clone();
        let tags = &mut self.containers[ci].items[ii].tags;
        let changed = if equipped { tags.add(tag) } else { tags.remove(&tag) };
        if !changed {
            return Err(InventoryError::NoEffect);
        }
        if let Some(behavior) = self.behaviors.get_mut(&item.serial) {
            behavior.on_equipped(&self.containers[ci].items[ii], equipped);
        }
        self.emit(if equipped {
            InventoryEvent::ItemEquipped { item }
        } else {
            InventoryEvent::ItemUnequipped { item }
        });
        self.item_updated(ci, ii);
        Ok(())
    }

    /// Replace an item's override settings
    pub fn update_overrides(&mut self, item: UniqueId, overrides: OverrideSettings) -> Result<()> {
        self.queries.settle();
        let (ci, ii) = self.item_location(item)?;
        if self.containers[ci].items[ii].overrides == overrides {
            return Err(InventoryError::NoEffect);
        }
        self.containers[ci].items[ii].overrides = overrides;
        self.item_updated(ci, ii);
        Ok(())
    }

    /// Container-space socket position of an item, clamped to the grid
    pub fn socket_location(&self, item: UniqueId, socket: &str) -> Option<SocketLocation> {
        let (ci, ii) = self.item_location(item).ok()?;
        let container = &self.containers[ci];
        let item = &container.items[ii];
        let asset = self.asset_of(item).ok()?;
        let socket = asset.socket(socket)?;
        let mut location = socket.locate(asset.shapes(), item.rotation, container.tile_to_coord(item.tile))?;
        let dims = container.effective_dimensions();
        location.target = TileCoord::new(
            location.target.x.clamp(0, dims.x as i32 - 1),
            location.target.y.clamp(0, dims.y as i32 - 1),
        );
        Some(location)
    }

    /// Tiles an item covers
    pub fn item_tile_indexes(&self, item: UniqueId) -> Vec<usize> {
        let Ok((ci, ii)) = self.item_location(item) else {
            return Vec::new();
        };
        let item = &self.containers[ci].items[ii];
        let asset = self.catalog.get(&item.asset).map(|a| a.as_ref());
        self.containers[ci].item_tiles(item, asset)
    }

    /// Items touching an item's tiles
    pub fn nearby_items(&self, item: UniqueId) -> Vec<UniqueId> {
        let Ok((ci, ii)) = self.item_location(item) else {
            return Vec::new();
        };
        let container = &self.containers[ci];
        container
            .nearby_items(&container.items[ii], &self.catalog)
            .into_iter()
            .map(|serial| UniqueId::new(serial, self.id))
            .collect()
    }

    // ------------------------------------------------------------------
    // Containers
    // ------------------------------------------------------------------

    /// Grow or shrink a container's edges. Never below 1x1.
    ///
    /// With `clamp_to_items` a shrink stops at the items' extent. Otherwise
    /// items pushed out are moved to the first free tile, and the whole resize
    /// is refused if any of them cannot be placed. Returns the new size.
    pub fn adjust_container_size(
        &mut self,
        container: UniqueId,
        adjustment: SizeAdjustment,
        clamp_to_items: bool,
    ) -> Result<Dimensions> {
        self.queries.settle();
        let ci = self.container_index(container)?;
        let c = &self.containers[ci];
        if c.kind == ContainerType::Equipment {
            return Err(InventoryError::InvalidResize(container));
        }
        let dims = c.dimensions;
        let (w, h) = (dims.x as i32, dims.y as i32);
        let mut adj = adjustment;

        if clamp_to_items && !c.items.is_empty() {
            let (mut min_x, mut min_y, mut max_x, mut max_y) = (i32::MAX, i32::MAX, i32::MIN, i32::MIN);
            for item in &c.items {
                let origin = c.tile_to_coord(item.tile);
                let shape = match self.catalog.get(&item.asset) {
                    Some(asset) => c.item_shape(asset, item.rotation),
                    None => SINGLE_TILE,
                };
                for offset in shape {
                    let coord = origin + *offset;
                    min_x = min_x.min(coord.x);
                    min_y = min_y.min(coord.y);
                    max_x = max_x.max(coord.x);
                    max_y = max_y.max(coord.y);
                }
            }
            adj.left = adj.left.max(-min_x);
            adj.top = adj.top.max(-min_y);
            adj.right = adj.right.max(max_x - (w - 1));
            adj.bottom = adj.bottom.max(max_y - (h - 1));
        }

        // Keep at least one column and row, giving up the far edge first.
        let mut new_w = w + adj.left + adj.right;
        if new_w < 1 {
            let deficit = 1 - new_w;
            let from_right = deficit.min((-adj.right).max(0));
            adj.right += from_right;
            adj.left += deficit - from_right;
            new_w = 1;
        }
        let mut new_h = h + adj.top + adj.bottom;
        if new_h < 1 {
            let deficit = 1 - new_h;
            let from_bottom = deficit.min((-adj.bottom).max(0));
            adj.bottom += from_bottom;
            adj.top += deficit - from_bottom;
            new_h = 1;
        }
        let new_dims = Dimensions::new(new_w as u32, new_h as u32);
        if new_dims == dims && adj.left == 0 && adj.top == 0 {
            return Err(InventoryError::NoEffect);
        }

        let backup = self.containers[ci].clone();
        let catalog = self.catalog.clone();
        let displaced = self.containers[ci].resize(new_dims, TileCoord::new(adj.left, adj.top), &catalog);
        for serial in displaced {
            let Some(ii) = self.containers[ci].item_position(serial) else {
                continue;
            };
            let item = &self.containers[ci].items[ii];
            let plan = self
                .asset_of(item)
                .and_then(|asset| {
                    self.plan_placement(ci, &asset, None, None, item.rotation, &[serial])
                        .map(|plan| (asset, plan))
                });
            match plan {
                Ok((asset, plan)) => {
                    let tile = self.commit_placement(ci, &plan, &asset);
                    let c = &mut self.containers[ci];
                    let ii = c.item_position(serial).unwrap_or(ii);
                    c.items[ii].tile = tile;
                    c.items[ii].rotation = plan.rotation;
                    c.add_item_to_tile_map(ii, &asset);
                }
                Err(_) => {
                    log::debug!("Resize of {} refused: {} has nowhere to go", container, serial);
                    self.containers[ci] = backup;
                    return Err(InventoryError::InvalidResize(container));
                }
            }
        }

        let dimensions = self.containers[ci].dimensions;
        self.mark_touched(ci);
        self.emit(InventoryEvent::ContainerResized { container, dimensions });
        self.after_mutation();
        Ok(dimensions)
    }

    /// Re-pack a container's items in `key` order from the first tile on.
    /// Refused, with nothing changed, if the items no longer fit.
    pub fn sort_container(&mut self, container: UniqueId, key: SortKey) -> Result<()> {
        self.queries.settle();
        let ci = self.container_index(container)?;
        let backup = self.containers[ci].clone();
        let catalog = self.catalog.clone();

        let mut items = std::mem::take(&mut self.containers[ci].items);
        let asset_of = |item: &Item| catalog.get(&item.asset).cloned();
        items.sort_by(|a, b| {
            let (aa, ba) = (asset_of(a), asset_of(b));
            let ordering = match key {
                SortKey::Name => {
                    let an = a.overrides.name.clone().or_else(|| aa.as_ref().map(|x| x.name.clone()));
                    let bn = b.overrides.name.clone().or_else(|| ba.as_ref().map(|x| x.name.clone()));
                    an.cmp(&bn)
                }
                SortKey::Type => aa.map(|x| x.type_tag.clone()).cmp(&ba.map(|x| x.type_tag.clone())),
                SortKey::Count => b.count.cmp(&a.count),
                SortKey::Size => {
                    let size = |x: Option<std::sync::Arc<ItemAsset>>| x.map(|x| x.shape(Rotation::Zero).len()).unwrap_or(1);
                    size(ba).cmp(&size(aa))
                }
            };
            ordering.then(a.id.serial.cmp(&b.id.serial))
        });
        self.containers[ci].rebuild_tile_map(&catalog);

        for mut item in items {
            let Some(asset) = asset_of(&item) else {
                self.containers[ci] = backup;
                return Err(InventoryError::UnknownAsset(item.asset));
            };
            match self.plan_placement(ci, &asset, None, None, item.rotation, &[]) {
                Ok(plan) => {
                    let tile = self.commit_placement(ci, &plan, &asset);
                    item.tile = tile;
                    item.rotation = plan.rotation;
                    let c = &mut self.containers[ci];
                    c.items.push(item);
                    let ii = c.items.len() - 1;
                    c.add_item_to_tile_map(ii, &asset);
                }
                Err(_) => {
                    self.containers[ci] = backup;
                    return Err(InventoryError::NoSpace(container));
                }
            }
        }
        self.refresh_indexes();
        self.mark_touched(ci);
        self.emit(InventoryEvent::ContainerSorted { container });
        self.after_mutation();
        Ok(())
    }

    /// Add tags to one tile
    pub fn add_tags_to_tile(&mut self, container: UniqueId, tile: usize, tags: &TagSet) -> Result<()> {
        self.queries.settle();
        let ci = self.container_index(container)?;
        let c = &mut self.containers[ci];
        if tile >= c.tile_count() {
            return Err(InventoryError::InvalidTile { container, tile });
        }
        match c.tile_tags.iter_mut().find(|t| t.tile == tile) {
            Some(entry) => entry.tags.extend(tags),
            None => c.tile_tags.push(crate::container::TileTag { tile, tags: tags.clone() }),
        }
        self.mark_touched(ci);
        Ok(())
    }

    /// Remove tags from one tile
    pub fn remove_tags_from_tile(&mut self, container: UniqueId, tile: usize, tags: &TagSet) -> Result<()> {
        self.queries.settle();
        let ci = self.container_index(container)?;
        let c = &mut self.containers[ci];
        let Some(entry) = c.tile_tags.iter_mut().find(|t| t.tile == tile) else {
            return Err(InventoryError::NoEffect);
        };
        for tag in tags.iter() {
            entry.tags.remove(tag);
        }
        c.tile_tags.retain(|t| !t.tags.is_empty());
        self.mark_touched(ci);
        Ok(())
    }
}
