//! Error types for the inventory engine

use crate::identity::{InstanceId, UniqueId};
use crate::item::AssetId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons an inventory operation is refused.
///
/// Every variant is a validation failure: the operation that returned it left
/// the inventory unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum InventoryError {
    /// Item not found in this instance
    #[error("Item not found: {0}")]
    UnknownItem(UniqueId),
    /// Container not found in this instance
    #[error("Container not found: {0}")]
    UnknownContainer(UniqueId),
    /// Container index out of range
    #[error("Container index out of range: {0}")]
    InvalidContainerIndex(usize),
    /// Asset not registered in the catalog
    #[error("Unknown item asset: {0}")]
    UnknownAsset(AssetId),
    /// Tile outside of the container
    #[error("Tile {tile} is outside of container {container}")]
    InvalidTile { container: UniqueId, tile: usize },
    /// Shape does not fit
    #[error("No space for item in container {0}")]
    NoSpace(UniqueId),
    /// Nothing of a spawn could be placed anywhere
    #[error("Inventory {0} has no room")]
    Full(InstanceId),
    /// Compatibility rules refused the item
    #[error("Item {item} is not allowed in container {container}")]
    Incompatible { item: AssetId, container: UniqueId },
    /// Count is zero or otherwise unusable
    #[error("Invalid count: {0}")]
    InvalidCount(u32),
    /// Items cannot be stacked together
    #[error("Item {from} cannot stack onto {onto}")]
    CannotStack { from: UniqueId, onto: UniqueId },
    /// Split amount must be in 1..count
    #[error("Cannot split {requested} from a stack of {available}")]
    CannotSplit { requested: u32, available: u32 },
    /// Not enough items across stacks
    #[error("Not enough items: requested {requested}, found {available}")]
    NotEnoughItems { requested: u32, available: u32 },
    /// Item would end up inside a container it owns
    #[error("Item {0} cannot be placed inside its own containers")]
    OwnershipCycle(UniqueId),
    /// Identity belongs to another instance
    #[error("Identity {0} belongs to another inventory")]
    WrongInstance(UniqueId),
    /// Container size adjustment refused
    #[error("Container {0} cannot be resized as requested")]
    InvalidResize(UniqueId),
    /// Tag value not present and not allowed to be added
    #[error("Tag value not found: {0}")]
    TagValueNotFound(String),
    /// Only the authority may run this operation
    #[error("Operation requires authority")]
    AuthorityOnly,
    /// Nothing would change
    #[error("Operation has no effect")]
    NoEffect,
}

/// Result type for inventory operations
pub type Result<T> = std::result::Result<T, InventoryError>;
