//! Events raised by inventory mutations

use crate::identity::UniqueId;
use crate::item::AssetId;
use crate::shape::Dimensions;
use crate::tags::Tag;
use serde::{Deserialize, Serialize};

/// Inventory events, buffered until drained
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InventoryEvent {
    /// Item entered a container
    ItemAdded {
        item: UniqueId,
        container: UniqueId,
        tile: usize,
    },
    /// Item left the inventory
    ItemRemoved {
        item: UniqueId,
        asset: AssetId,
        count: u32,
    },
    /// Item changed container, tile or rotation
    ItemMoved {
        item: UniqueId,
        from: UniqueId,
        to: UniqueId,
        tile: usize,
    },
    /// Two items exchanged places
    ItemsSwapped { a: UniqueId, b: UniqueId },
    /// Stack count changed
    ItemCountChanged {
        item: UniqueId,
        old_count: u32,
        new_count: u32,
    },
    /// Count moved from one stack onto another
    ItemsStacked {
        from: UniqueId,
        onto: UniqueId,
        amount: u32,
    },
    /// A new stack was split off
    ItemSplit {
        source: UniqueId,
        new_item: UniqueId,
        amount: u32,
    },
    /// Tag added or removed
    TagChanged {
        owner: TagOwner,
        tag: Tag,
        added: bool,
    },
    /// Tag value set or removed
    TagValueChanged {
        owner: TagOwner,
        tag: Tag,
        value: Option<f32>,
    },
    /// Container grew or shrank
    ContainerResized {
        container: UniqueId,
        dimensions: Dimensions,
    },
    /// Item equipped
    ItemEquipped { item: UniqueId },
    /// Item unequipped
    ItemUnequipped { item: UniqueId },
    /// A spawn could not place its item
    ItemFailedToSpawn { asset: AssetId, count: u32 },
    /// Item received a new identity
    IdentityReassigned { old: UniqueId, new: UniqueId },
    /// Container sorted
    ContainerSorted { container: UniqueId },
}

/// Entity that carries a tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TagOwner {
    Item(UniqueId),
    Container(UniqueId),
    Instance,
}
