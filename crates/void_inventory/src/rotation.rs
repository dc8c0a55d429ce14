//! Tile coordinates and quarter-turn rotations

use serde::{Deserialize, Serialize};
use std::ops::{Add, Sub};

/// Quarter-turn rotation of an item on a grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Rotation {
    Zero,
    Ninety,
    OneEighty,
    TwoSeventy,
}

impl Default for Rotation {
    fn default() -> Self {
        Self::Zero
    }
}

impl Rotation {
    /// Canonical try order used by rotation searches
    pub const ALL: [Rotation; 4] = [
        Rotation::Zero,
        Rotation::Ninety,
        Rotation::OneEighty,
        Rotation::TwoSeventy,
    ];

    /// Number of quarter turns
    pub fn quarter_turns(self) -> usize {
        match self {
            Self::Zero => 0,
            Self::Ninety => 1,
            Self::OneEighty => 2,
            Self::TwoSeventy => 3,
        }
    }

    /// Build from a number of quarter turns (wraps)
    pub fn from_quarter_turns(turns: usize) -> Self {
        Self::ALL[turns % 4]
    }

    /// Angle in degrees
    pub fn degrees(self) -> u32 {
        self.quarter_turns() as u32 * 90
    }

    /// Sum of two rotations
    pub fn combine(self, other: Rotation) -> Rotation {
        Self::from_quarter_turns(self.quarter_turns() + other.quarter_turns())
    }

    /// Whether the rotation swaps width and height
    pub fn is_sideways(self) -> bool {
        matches!(self, Self::Ninety | Self::TwoSeventy)
    }
}

/// Integer grid coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct TileCoord {
    pub x: i32,
    pub y: i32,
}

impl TileCoord {
    /// Create a coordinate
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Rotate around `anchor` by `rotation`, each quarter turn mapping
    /// (x, y) to (-y, x) relative to the anchor.
    pub fn rotate_about(self, anchor: TileCoord, rotation: Rotation) -> TileCoord {
        let mut rel = self - anchor;
        for _ in 0..rotation.quarter_turns() {
            rel = TileCoord::new(-rel.y, rel.x);
        }
        rel + anchor
    }
}

impl Add for TileCoord {
    type Output = TileCoord;

    fn add(self, rhs: TileCoord) -> TileCoord {
        TileCoord::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for TileCoord {
    type Output = TileCoord;

    fn sub(self, rhs: TileCoord) -> TileCoord {
        TileCoord::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// Rotate every tile of a shape about `anchor`
pub fn rotate_shape(shape: &[TileCoord], anchor: TileCoord, rotation: Rotation) -> Vec<TileCoord> {
    shape
        .iter()
        .map(|tile| tile.rotate_about(anchor, rotation))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_wraps() {
        assert_eq!(Rotation::TwoSeventy.combine(Rotation::OneEighty), Rotation::Ninety);
        assert_eq!(Rotation::Ninety.combine(Rotation::TwoSeventy), Rotation::Zero);
    }

    #[test]
    fn test_quarter_turn() {
        let tile = TileCoord::new(2, 1);
        assert_eq!(tile.rotate_about(TileCoord::default(), Rotation::Ninety), TileCoord::new(-1, 2));
        assert_eq!(tile.rotate_about(TileCoord::new(2, 1), Rotation::OneEighty), tile);
    }

    #[test]
    fn test_four_quarter_turns_round_trip() {
        let shape = vec![
            TileCoord::new(0, 0),
            TileCoord::new(1, 0),
            TileCoord::new(1, 1),
            TileCoord::new(1, 2),
        ];
        let anchor = TileCoord::new(1, 1);
        let mut rotated = shape.clone();
        for _ in 0..4 {
            rotated = rotate_shape(&rotated, anchor, Rotation::Ninety);
        }
        assert_eq!(rotated, shape);
    }
}
