//! Item shapes baked for every rotation
//!
//! Shapes are computed once per asset. Each rotated table keeps the tile order
//! of the unrotated shape, so entry `k` of any rotation is the image of entry
//! `k` at 0°. Rotation lookups are table reads, never transforms.

use crate::rotation::{Rotation, TileCoord};
use serde::{Deserialize, Serialize};

/// Width and height of a grid or item footprint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub x: u32,
    pub y: u32,
}

impl Default for Dimensions {
    fn default() -> Self {
        Self { x: 1, y: 1 }
    }
}

impl Dimensions {
    /// Create dimensions
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Number of tiles covered
    pub fn area(&self) -> usize {
        self.x as usize * self.y as usize
    }

    /// Dimensions after rotation
    pub fn rotated(&self, rotation: Rotation) -> Dimensions {
        if rotation.is_sideways() {
            Dimensions::new(self.y, self.x)
        } else {
            *self
        }
    }
}

/// A shape pre-rotated to all four orientations
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BakedShapes {
    rotations: [Vec<TileCoord>; 4],
    dimensions: Dimensions,
}

impl BakedShapes {
    /// Bake the footprint of `dimensions` minus `disabled` tiles.
    ///
    /// The 0° shape lists tiles row by row. Every other rotation turns the
    /// shape about the origin and shifts it back so the bounding box starts at
    /// (0, 0).
    pub fn bake(dimensions: Dimensions, disabled: &[TileCoord]) -> Self {
        let dimensions = Dimensions::new(dimensions.x.max(1), dimensions.y.max(1));
        let mut base = Vec::with_capacity(dimensions.area());
        for y in 0..dimensions.y as i32 {
            for x in 0..dimensions.x as i32 {
                let tile = TileCoord::new(x, y);
                if !disabled.contains(&tile) {
                    base.push(tile);
                }
            }
        }
        if base.is_empty() {
            log::warn!("Shape of {}x{} has every tile disabled, keeping origin", dimensions.x, dimensions.y);
            base.push(TileCoord::default());
        }

        let w = dimensions.x as i32;
        let h = dimensions.y as i32;
        let rotate = |rotation: Rotation| -> Vec<TileCoord> {
            let shift = match rotation {
                Rotation::Zero => TileCoord::new(0, 0),
                Rotation::Ninety => TileCoord::new(h - 1, 0),
                Rotation::OneEighty => TileCoord::new(w - 1, h - 1),
                Rotation::TwoSeventy => TileCoord::new(0, w - 1),
            };
            base.iter()
                .map(|tile| tile.rotate_about(TileCoord::default(), rotation) + shift)
                .collect()
        };

        Self {
            rotations: [
                base.clone(),
                rotate(Rotation::Ninety),
                rotate(Rotation::OneEighty),
                rotate(Rotation::TwoSeventy),
            ],
            dimensions,
        }
    }

    /// Shape at `rotation`, relative to the item's top-left tile
    pub fn get(&self, rotation: Rotation) -> &[TileCoord] {
        &self.rotations[rotation.quarter_turns()]
    }

    /// Unrotated footprint
    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Position of a 0° tile in the shape table
    pub fn position_of(&self, tile: TileCoord) -> Option<usize> {
        self.rotations[0].iter().position(|t| *t == tile)
    }
}

/// Named attachment point on an item's shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Socket {
    /// Socket name
    pub name: String,
    /// Tile of the unrotated shape the socket sits on
    pub tile: TileCoord,
    /// Rotation the socket declares for itself
    pub rotation: Rotation,
    /// Optional offset from the socket tile
    pub offset: Option<TileCoord>,
}

impl Socket {
    /// Create a socket on `tile`
    pub fn new(name: impl Into<String>, tile: TileCoord) -> Self {
        Self {
            name: name.into(),
            tile,
            rotation: Rotation::Zero,
            offset: None,
        }
    }

    /// Set the socket's own rotation
    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    /// Set an offset from the socket tile
    pub fn with_offset(mut self, offset: TileCoord) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Container-space socket tile of an item whose top-left tile is
    /// `top_left` and whose rotation is `item_rotation`.
    ///
    /// The offset, if any, is applied before rotating around the socket tile
    /// by the combined socket and item rotation. Returns `None` if the socket
    /// tile is disabled in the shape.
    pub fn locate(
        &self,
        shapes: &BakedShapes,
        item_rotation: Rotation,
        top_left: TileCoord,
    ) -> Option<SocketLocation> {
        let position = shapes.position_of(self.tile)?;
        let tile = top_left + shapes.get(item_rotation)[position];
        let rotation = self.rotation.combine(item_rotation);
        let target = match self.offset {
            Some(offset) => (tile + offset).rotate_about(tile, rotation),
            None => tile,
        };
        Some(SocketLocation { tile, target, rotation })
    }
}

/// Resolved socket position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketLocation {
    /// Tile the socket sits on
    pub tile: TileCoord,
    /// Tile after applying the offset
    pub target: TileCoord,
    /// Combined rotation
    pub rotation: Rotation,
}
