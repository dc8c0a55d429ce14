//! Tile-map engine
//!
//! Coordinate math, collision queries and occupancy maintenance for a single
//! container. Everything here works on one [`Container`] plus the item
//! catalog; instance-wide orchestration lives on [`Inventory`](crate::Inventory).

use crate::container::{Container, GrowthDirection};
use crate::identity::Serial;
use crate::item::{Item, ItemAsset, ItemCatalog};
use crate::rotation::{Rotation, TileCoord};
use crate::shape::Dimensions;
use crate::tags::Tag;

pub(crate) const SINGLE_TILE: &[TileCoord] = &[TileCoord::new(0, 0)];

/// Options for a space check
#[derive(Debug, Clone, Copy, Default)]
pub struct SpaceQuery<'a> {
    /// Items whose tiles count as free
    pub ignore_items: &'a [Serial],
    /// Tiles that count as free
    pub ignore_tiles: &'a [usize],
    /// Stop at the first collision instead of collecting every blocker
    pub early_exit: bool,
    /// Tiles carrying this tag count as occupied
    pub locked_tag: Option<&'a Tag>,
}

impl<'a> SpaceQuery<'a> {
    /// Query ignoring the given items
    pub fn ignoring(items: &'a [Serial]) -> Self {
        Self {
            ignore_items: items,
            ..Default::default()
        }
    }

    /// Short-circuit on the first collision
    pub fn early_exit(mut self) -> Self {
        self.early_exit = true;
        self
    }

    /// Treat tiles tagged `tag` as occupied
    pub fn with_locked_tag(mut self, tag: Option<&'a Tag>) -> Self {
        self.locked_tag = tag;
        self
    }
}

/// Outcome of [`Container::check_for_space`]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpaceCheck {
    /// Whether the shape fits
    pub fits: bool,
    /// Top-left tile the shape fits at
    pub first_free: Option<usize>,
    /// Items in the way, empty when `early_exit` stopped the walk
    pub blocking: Vec<Serial>,
}

/// Outcome of a free-tile search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// The item fits here
    At { tile: usize, rotation: Rotation },
    /// No tile is free but the container may grow along its axis
    Grow,
    /// No tile is free
    NoSpace,
}

impl Container {
    /// Tile index to grid coordinate
    pub fn tile_to_coord(&self, tile: usize) -> TileCoord {
        let width = self.effective_dimensions().x.max(1) as usize;
        TileCoord::new((tile % width) as i32, (tile / width) as i32)
    }

    /// Grid coordinate to tile index, `None` when out of bounds
    pub fn coord_to_tile(&self, coord: TileCoord) -> Option<usize> {
        if !self.is_coord_valid(coord) {
            return None;
        }
        if let Some(tile) = self.coord_cache.get(&coord) {
            return Some(*tile);
        }
        Some(coord.y as usize * self.effective_dimensions().x as usize + coord.x as usize)
    }

    /// Whether the coordinate lies inside the grid
    pub fn is_coord_valid(&self, coord: TileCoord) -> bool {
        let dims = self.effective_dimensions();
        coord.x >= 0 && coord.y >= 0 && (coord.x as u32) < dims.x && (coord.y as u32) < dims.y
    }

    /// Shape an item takes in this container
    pub fn item_shape<'a>(&self, asset: &'a ItemAsset, rotation: Rotation) -> &'a [TileCoord] {
        if self.is_spatial() {
            asset.shape(rotation)
        } else {
            SINGLE_TILE
        }
    }

    /// In-bounds tiles covered by an item
    pub fn item_tiles(&self, item: &Item, asset: Option<&ItemAsset>) -> Vec<usize> {
        let shape = match asset {
            Some(asset) => self.item_shape(asset, item.rotation),
            None => SINGLE_TILE,
        };
        let origin = self.tile_to_coord(item.tile);
        shape
            .iter()
            .filter_map(|offset| self.coord_to_tile(origin + *offset))
            .collect()
    }

    /// Walk `shape` from `top_left` and report whether every tile is free.
    ///
    /// Tiles past the edge are accepted only along the growth axis.
    pub fn check_for_space(&self, shape: &[TileCoord], top_left: usize, query: &SpaceQuery<'_>) -> SpaceCheck {
        if !self.supports_tile_map() {
            return SpaceCheck {
                fits: true,
                first_free: Some(top_left),
                blocking: Vec::new(),
            };
        }
        let mut check = SpaceCheck::default();
        if top_left >= self.tile_count() {
            return check;
        }

        let dims = self.effective_dimensions();
        let origin = self.tile_to_coord(top_left);
        let mut fits = true;
        for offset in shape {
            let coord = origin + *offset;
            if coord.x < 0 || coord.y < 0 {
                return check;
            }
            let past_x = coord.x as u32 >= dims.x;
            let past_y = coord.y as u32 >= dims.y;
            if past_x || past_y {
                let allowed = match self.growth {
                    GrowthDirection::X => past_x && !past_y,
                    GrowthDirection::Y => past_y && !past_x,
                    GrowthDirection::Neither => false,
                };
                if !allowed {
                    fits = false;
                    if query.early_exit {
                        return check;
                    }
                }
                continue;
            }

            let Some(tile) = self.coord_to_tile(coord) else {
                continue;
            };
            if query.ignore_tiles.contains(&tile) {
                continue;
            }
            if let Some(locked) = query.locked_tag {
                if self.tile_has_tag(tile, locked) {
                    fits = false;
                    if query.early_exit {
                        return check;
                    }
                    continue;
                }
            }
            if let Some(Some(occupant)) = self.tile_map.get(tile) {
                if !query.ignore_items.contains(occupant) {
                    fits = false;
                    if query.early_exit {
                        return check;
                    }
                    if !check.blocking.contains(occupant) {
                        check.blocking.push(*occupant);
                    }
                }
            }
        }

        check.fits = fits;
        if fits {
            check.first_free = Some(top_left);
        }
        check
    }

    /// First rotation in canonical order at which the item fits
    pub fn check_all_rotations(&self, asset: &ItemAsset, top_left: usize, query: &SpaceQuery<'_>) -> Option<Rotation> {
        let query = SpaceQuery { early_exit: true, ..*query };
        Rotation::ALL
            .into_iter()
            .find(|rotation| self.check_for_space(self.item_shape(asset, *rotation), top_left, &query).fits)
    }

    /// Scan tiles in order for the first placement.
    ///
    /// With `try_rotations` every tile is tried in canonical rotation order,
    /// otherwise only `rotation`.
    pub fn first_available_tile(
        &self,
        asset: &ItemAsset,
        rotation: Rotation,
        try_rotations: bool,
        query: &SpaceQuery<'_>,
    ) -> Placement {
        if !self.supports_tile_map() {
            return Placement::At { tile: 0, rotation };
        }
        let query = SpaceQuery { early_exit: true, ..*query };
        for tile in 0..self.tile_count() {
            if try_rotations && self.is_spatial() {
                if let Some(rotation) = self.check_all_rotations(asset, tile, &query) {
                    return Placement::At { tile, rotation };
                }
            } else if self.check_for_space(self.item_shape(asset, rotation), tile, &query).fits {
                return Placement::At { tile, rotation };
            }
        }
        if self.growth != GrowthDirection::Neither {
            Placement::Grow
        } else {
            Placement::NoSpace
        }
    }

    /// Recompute the occupancy grid from `items`.
    ///
    /// Returns the items whose tiles were already taken; the first item wins.
    pub fn rebuild_tile_map(&mut self, catalog: &ItemCatalog) -> Vec<Serial> {
        self.rebuild_coord_cache();
        if !self.supports_tile_map() {
            self.tile_map.clear();
            return Vec::new();
        }
        self.tile_map = vec![None; self.tile_count()];
        let mut collisions = Vec::new();
        for i in 0..self.items.len() {
            let serial = self.items[i].id.serial;
            let asset = catalog.get(&self.items[i].asset);
            if asset.is_none() {
                log::warn!("Item {} references unknown asset {}", self.items[i].id, self.items[i].asset);
            }
            for tile in self.item_tiles(&self.items[i], asset.map(|a| a.as_ref())) {
                let current = self.tile_map[tile];
                match current {
                    Some(other) if other != serial => {
                        if !collisions.contains(&serial) {
                            collisions.push(serial);
                        }
                    }
                    _ => self.tile_map[tile] = Some(serial),
                }
            }
        }
        if !collisions.is_empty() {
            log::warn!("Container {} has overlapping items: {:?}", self.id, collisions);
        }
        collisions
    }

    /// Reconcile the grid with `items`: clear tiles of absent items and mark
    /// tiles of present ones. Falls back to a rebuild on a size mismatch.
    pub fn refresh_tile_map(&mut self, catalog: &ItemCatalog) {
        if !self.supports_tile_map() || self.tile_map.len() != self.tile_count() {
            self.rebuild_tile_map(catalog);
            return;
        }
        for slot in self.tile_map.iter_mut() {
            if let Some(serial) = *slot {
                if !self.items.iter().any(|i| i.id.serial == serial) {
                    *slot = None;
                }
            }
        }
        for i in 0..self.items.len() {
            let serial = self.items[i].id.serial;
            let asset = catalog.get(&self.items[i].asset).map(|a| a.as_ref());
            for tile in self.item_tiles(&self.items[i], asset) {
                if self.tile_map[tile].is_none() {
                    self.tile_map[tile] = Some(serial);
                }
            }
        }
    }

    /// Stamp one item's tiles
    pub fn add_item_to_tile_map(&mut self, item: usize, asset: &ItemAsset) {
        if !self.supports_tile_map() {
            return;
        }
        let Some(entry) = self.items.get(item) else {
            return;
        };
        let serial = entry.id.serial;
        for tile in self.item_tiles(entry, Some(asset)) {
            if let Some(slot) = self.tile_map.get_mut(tile) {
                *slot = Some(serial);
            }
        }
    }

    /// Clear every tile held by `serial`
    pub fn remove_from_tile_map(&mut self, serial: Serial) {
        for slot in self.tile_map.iter_mut() {
            if *slot == Some(serial) {
                *slot = None;
            }
        }
    }

    /// Item whose shape covers `tile`
    pub fn item_at(&self, tile: usize) -> Option<&Item> {
        let serial = (*self.tile_map.get(tile)?)?;
        self.items.iter().find(|i| i.id.serial == serial)
    }

    /// Number of free tiles
    pub fn free_tiles(&self) -> usize {
        self.tile_map.iter().filter(|t| t.is_none()).count()
    }

    /// Tiles inside the rectangle starting at `top_left`
    pub fn tiles_within(&self, top_left: usize, size: Dimensions) -> Vec<usize> {
        let origin = self.tile_to_coord(top_left);
        let mut tiles = Vec::new();
        for y in 0..size.y as i32 {
            for x in 0..size.x as i32 {
                if let Some(tile) = self.coord_to_tile(origin + TileCoord::new(x, y)) {
                    tiles.push(tile);
                }
            }
        }
        tiles
    }

    /// Move `tile` by `offset`, clamped to the grid
    pub fn apply_offset(&self, tile: usize, offset: TileCoord) -> usize {
        let dims = self.effective_dimensions();
        let coord = self.tile_to_coord(tile) + offset;
        let clamped = TileCoord::new(
            coord.x.clamp(0, dims.x as i32 - 1),
            coord.y.clamp(0, dims.y as i32 - 1),
        );
        self.coord_to_tile(clamped).unwrap_or(tile)
    }

    /// Tiles claimed by more than one item. Diagnostic only.
    pub fn overlapping_tiles(&self, catalog: &ItemCatalog) -> Vec<usize> {
        let mut counts = vec![0u32; self.tile_count()];
        for item in &self.items {
            let asset = catalog.get(&item.asset).map(|a| a.as_ref());
            for tile in self.item_tiles(item, asset) {
                counts[tile] += 1;
            }
        }
        counts
            .iter()
            .enumerate()
            .filter(|(_, c)| **c > 1)
            .map(|(tile, _)| tile)
            .collect()
    }

    /// Items whose tiles touch `item`'s tiles horizontally or vertically
    pub fn nearby_items(&self, item: &Item, catalog: &ItemCatalog) -> Vec<Serial> {
        let own = self.item_tiles(item, catalog.get(&item.asset).map(|a| a.as_ref()));
        let neighbours = [
            TileCoord::new(1, 0),
            TileCoord::new(-1, 0),
            TileCoord::new(0, 1),
            TileCoord::new(0, -1),
        ];
        let mut found = Vec::new();
        for tile in &own {
            let coord = self.tile_to_coord(*tile);
            for delta in neighbours {
                let Some(next) = self.coord_to_tile(coord + delta) else {
                    continue;
                };
                if let Some(Some(serial)) = self.tile_map.get(next) {
                    if *serial != item.id.serial && !found.contains(serial) {
                        found.push(*serial);
                    }
                }
            }
        }
        found
    }

    /// Whether the item's whole shape lies inside the grid
    pub fn item_in_bounds(&self, item: &Item, asset: &ItemAsset) -> bool {
        let origin = self.tile_to_coord(item.tile);
        self.item_shape(asset, item.rotation)
            .iter()
            .all(|offset| self.is_coord_valid(origin + *offset))
    }

    /// Farthest extent of a shape placed at `top_left`, as a size
    pub fn span_of(&self, shape: &[TileCoord], top_left: usize) -> Dimensions {
        let origin = self.tile_to_coord(top_left);
        let (mut x, mut y) = (0, 0);
        for offset in shape {
            let coord = origin + *offset;
            x = x.max(coord.x + 1);
            y = y.max(coord.y + 1);
        }
        Dimensions::new(x.max(0) as u32, y.max(0) as u32)
    }

    /// Resize the grid, shifting every item and tile tag by `shift`.
    ///
    /// Returns the items whose shape no longer lies inside the grid. Their
    /// tiles are left unstamped so the caller can relocate them.
    pub fn resize(&mut self, dimensions: Dimensions, shift: TileCoord, catalog: &ItemCatalog) -> Vec<Serial> {
        let dimensions = Dimensions::new(dimensions.x.max(1), dimensions.y.max(1));
        let coords: Vec<TileCoord> = self.items.iter().map(|i| self.tile_to_coord(i.tile) + shift).collect();
        let tag_coords: Vec<TileCoord> = self.tile_tags.iter().map(|t| self.tile_to_coord(t.tile) + shift).collect();

        self.dimensions = dimensions;
        self.coord_cache.clear();

        let mut displaced = Vec::new();
        for (item, coord) in self.items.iter_mut().zip(coords) {
            if coord.x >= 0 && coord.y >= 0 && (coord.x as u32) < dimensions.x && (coord.y as u32) < dimensions.y {
                item.tile = coord.y as usize * dimensions.x as usize + coord.x as usize;
            } else {
                displaced.push(item.id.serial);
            }
        }
        let mut kept_tags = Vec::new();
        for (mut tag, coord) in std::mem::take(&mut self.tile_tags).into_iter().zip(tag_coords) {
            if coord.x >= 0 && coord.y >= 0 && (coord.x as u32) < dimensions.x && (coord.y as u32) < dimensions.y {
                tag.tile = coord.y as usize * dimensions.x as usize + coord.x as usize;
                kept_tags.push(tag);
            }
        }
        self.tile_tags = kept_tags;

        for item in &self.items {
            if displaced.contains(&item.id.serial) {
                continue;
            }
            let in_bounds = match catalog.get(&item.asset) {
                Some(asset) => self.item_in_bounds(item, asset),
                None => true,
            };
            if !in_bounds {
                displaced.push(item.id.serial);
            }
        }

        self.rebuild_coord_cache();
        if self.supports_tile_map() {
            self.tile_map = vec![None; self.tile_count()];
            for i in 0..self.items.len() {
                if displaced.contains(&self.items[i].id.serial) {
                    continue;
                }
                if let Some(asset) = catalog.get(&self.items[i].asset) {
                    let asset = asset.clone();
                    self.add_item_to_tile_map(i, &asset);
                }
            }
        }
        displaced
    }

    /// Grow by `units` along the growth axis. Returns false if the container
    /// has no growth axis.
    pub fn grow(&mut self, units: u32, catalog: &ItemCatalog) -> bool {
        let dims = self.dimensions;
        let grown = match self.growth {
            GrowthDirection::X => Dimensions::new(dims.x + units, dims.y),
            GrowthDirection::Y => Dimensions::new(dims.x, dims.y + units),
            GrowthDirection::Neither => return false,
        };
        log::debug!("Container {} grows {:?} by {}", self.id, self.growth, units);
        self.resize(grown, TileCoord::default(), catalog);
        true
    }

    fn rebuild_coord_cache(&mut self) {
        self.coord_cache.clear();
        if !self.supports_tile_map() {
            return;
        }
        let width = self.effective_dimensions().x as usize;
        for tile in 0..self.tile_count() {
            self.coord_cache
                .insert(TileCoord::new((tile % width) as i32, (tile / width) as i32), tile);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerStyle;
    use crate::identity::{InstanceId, UniqueId};

    fn catalog() -> ItemCatalog {
        ItemCatalog::new()
            .with(ItemAsset::new("coin", "Coin").with_max_stack(100))
            .with(ItemAsset::new("bar", "Bar").with_dimensions(2, 1))
            .with(ItemAsset::new("ell", "Ell").with_dimensions(2, 2).with_disabled_tile(1, 0))
    }

    fn place(container: &mut Container, catalog: &ItemCatalog, asset: &str, serial: u32, tile: usize, rotation: Rotation) {
        let asset = catalog.get(&asset.into()).unwrap().clone();
        let mut item = Item::new(&asset, 1).at(tile).rotated(rotation);
        item.id = UniqueId::new(Serial::from_raw(serial), InstanceId::from_raw(1));
        container.items.push(item);
        let index = container.items.len() - 1;
        container.add_item_to_tile_map(index, &asset);
    }

    fn grid(x: u32, y: u32, catalog: &ItemCatalog) -> Container {
        let mut c = Container::new("Container.Test").with_dimensions(x, y);
        c.rebuild_tile_map(catalog);
        c
    }

    #[test]
    fn test_coordinate_conversion() {
        let catalog = catalog();
        let c = grid(4, 3, &catalog);
        assert_eq!(c.tile_to_coord(6), TileCoord::new(2, 1));
        assert_eq!(c.coord_to_tile(TileCoord::new(2, 1)), Some(6));
        assert_eq!(c.coord_to_tile(TileCoord::new(4, 0)), None);
        assert_eq!(c.coord_to_tile(TileCoord::new(-1, 0)), None);
    }

    #[test]
    fn test_check_for_space_reports_blockers() {
        let catalog = catalog();
        let mut c = grid(3, 3, &catalog);
        place(&mut c, &catalog, "coin", 11, 1, Rotation::Zero);
        let bar = catalog.get(&"bar".into()).unwrap();

        let blocked = c.check_for_space(bar.shape(Rotation::Zero), 0, &SpaceQuery::default());
        assert!(!blocked.fits);
        assert_eq!(blocked.blocking, vec![Serial::from_raw(11)]);
        assert_eq!(blocked.first_free, None);

        let ignored = c.check_for_space(bar.shape(Rotation::Zero), 0, &SpaceQuery::ignoring(&[Serial::from_raw(11)]));
        assert!(ignored.fits);
        assert_eq!(ignored.first_free, Some(0));

        let edge = c.check_for_space(bar.shape(Rotation::Zero), 2, &SpaceQuery::default());
        assert!(!edge.fits);
    }

    #[test]
    fn test_check_all_rotations_agrees_with_check_for_space() {
        let catalog = catalog();
        let mut c = grid(2, 2, &catalog);
        place(&mut c, &catalog, "coin", 5, 1, Rotation::Zero);
        let bar = catalog.get(&"bar".into()).unwrap();
        let rotation = c.check_all_rotations(bar, 0, &SpaceQuery::default()).unwrap();
        assert_eq!(rotation, Rotation::Ninety);
        assert!(c.check_for_space(bar.shape(rotation), 0, &SpaceQuery::default()).fits);
        assert!(!c.check_for_space(bar.shape(Rotation::Zero), 0, &SpaceQuery::default()).fits);
    }

    #[test]
    fn test_disabled_tiles_leave_room() {
        let catalog = catalog();
        let mut c = grid(2, 2, &catalog);
        place(&mut c, &catalog, "ell", 1, 0, Rotation::Zero);
        assert_eq!(c.tile_map[1], None);
        let coin = catalog.get(&"coin".into()).unwrap();
        assert_eq!(
            c.first_available_tile(coin, Rotation::Zero, false, &SpaceQuery::default()),
            Placement::At { tile: 1, rotation: Rotation::Zero }
        );
    }

    #[test]
    fn test_full_container_signals_growth() {
        let catalog = catalog();
        let coin = catalog.get(&"coin".into()).unwrap().clone();
        let mut fixed = grid(1, 1, &catalog);
        place(&mut fixed, &catalog, "coin", 1, 0, Rotation::Zero);
        assert_eq!(fixed.first_available_tile(&coin, Rotation::Zero, true, &SpaceQuery::default()), Placement::NoSpace);

        let mut growing = Container::new("Container.Belt")
            .with_dimensions(1, 1)
            .with_growth(GrowthDirection::X);
        growing.rebuild_tile_map(&catalog);
        place(&mut growing, &catalog, "coin", 1, 0, Rotation::Zero);
        assert_eq!(growing.first_available_tile(&coin, Rotation::Zero, true, &SpaceQuery::default()), Placement::Grow);
        assert!(growing.grow(1, &catalog));
        assert_eq!(growing.dimensions, Dimensions::new(2, 1));
        assert_eq!(
            growing.first_available_tile(&coin, Rotation::Zero, true, &SpaceQuery::default()),
            Placement::At { tile: 1, rotation: Rotation::Zero }
        );
    }

    #[test]
    fn test_growth_axis_allows_overflow() {
        let catalog = catalog();
        let bar = catalog.get(&"bar".into()).unwrap().clone();
        let mut c = Container::new("Container.Belt").with_dimensions(2, 1).with_growth(GrowthDirection::X);
        c.rebuild_tile_map(&catalog);
        assert!(c.check_for_space(bar.shape(Rotation::Zero), 1, &SpaceQuery::default()).fits);
        assert!(!c.check_for_space(bar.shape(Rotation::Ninety), 1, &SpaceQuery::default()).fits);
    }

    #[test]
    fn test_resize_restamps_tiles() {
        let catalog = catalog();
        let mut c = grid(2, 2, &catalog);
        place(&mut c, &catalog, "coin", 3, 3, Rotation::Zero);
        let displaced = c.resize(Dimensions::new(3, 2), TileCoord::new(1, 0), &catalog);
        assert!(displaced.is_empty());
        assert_eq!(c.items[0].tile, 5);
        assert_eq!(c.tile_map[5], Some(Serial::from_raw(3)));
        assert_eq!(c.tile_map.iter().filter(|t| t.is_some()).count(), 1);

        let displaced = c.resize(Dimensions::new(1, 1), TileCoord::default(), &catalog);
        assert_eq!(displaced, vec![Serial::from_raw(3)]);
    }

    #[test]
    fn test_rebuild_and_refresh_agree() {
        let catalog = catalog();
        let mut c = grid(4, 4, &catalog);
        place(&mut c, &catalog, "bar", 1, 0, Rotation::Ninety);
        place(&mut c, &catalog, "ell", 2, 5, Rotation::OneEighty);
        let rebuilt = c.tile_map.clone();
        c.items.remove(0);
        c.refresh_tile_map(&catalog);
        let refreshed = c.tile_map.clone();
        c.rebuild_tile_map(&catalog);
        assert_eq!(refreshed, c.tile_map);
        assert_ne!(rebuilt, c.tile_map);
        assert!(c.overlapping_tiles(&catalog).is_empty());
    }

    #[test]
    fn test_data_only_has_no_tile_map() {
        let catalog = catalog();
        let mut c = Container::new("Container.Data").with_style(ContainerStyle::DataOnly);
        c.rebuild_tile_map(&catalog);
        assert!(c.tile_map.is_empty());
        let bar = catalog.get(&"bar".into()).unwrap();
        assert!(c.check_for_space(bar.shape(Rotation::Zero), 0, &SpaceQuery::default()).fits);
    }

    #[test]
    fn test_apply_offset_clamps() {
        let catalog = catalog();
        let c = grid(3, 3, &catalog);
        assert_eq!(c.apply_offset(4, TileCoord::new(5, -5)), 2);
    }
}
