//! Void Inventory - Spatial Inventory Core
//!
//! Grid inventories whose items have multi-tile shapes, can be rotated,
//! stacked and split, and may themselves own further containers.
//!
//! # Features
//!
//! - Stable identities per instance with an identity index for O(1) lookup
//! - Tile maps with baked rotated shapes, disabled tiles and infinite growth
//! - Ownership forest of items and the containers they carry
//! - Hierarchical tags and tag values with named calculation hooks
//! - Seeded, deterministic mutations for client-predicted networking
//! - Background query refresh over container snapshots
//! - JSON and binary saves
//!
//! # Example
//!
//! ```ignore
//! use void_inventory::prelude::*;
//! use std::sync::Arc;
//!
//! let catalog = ItemCatalog::new()
//!     .with(ItemAsset::new("rifle", "Rifle").with_dimensions(4, 2))
//!     .with(ItemAsset::new("ammo", "Ammo").with_max_stack(60));
//!
//! let mut inventory = Inventory::new(InventoryKind::Player, Arc::new(catalog))
//!     .with_container(Container::new("Container.Backpack").with_dimensions(6, 4));
//! inventory.initialize(Seed::random());
//!
//! let rifle = inventory.try_add_new_item(&Spawn::new("rifle", 1), Seed::random())?;
//! let ammo = inventory.try_add_new_item(&Spawn::new("ammo", 90), Seed::random())?;
//! assert_eq!(ammo.created.len(), 2);
//! ```

pub mod annotate;
pub mod behavior;
pub mod config;
pub mod container;
pub mod error;
pub mod events;
pub mod identity;
pub mod inventory;
pub mod item;
pub mod ops;
pub mod ownership;
pub mod query;
pub mod rotation;
pub mod save;
pub mod shape;
pub mod tags;
pub mod tilemap;
pub mod transfer;

pub mod prelude {
    pub use crate::annotate::TagValueScope;
    pub use crate::behavior::{BehaviorRegistry, ItemBehavior, ItemObserver};
    pub use crate::config::InventoryConfig;
    pub use crate::container::{
        CompatibilityRules, Container, ContainerStyle, ContainerType, GrowthDirection, OwnerRef, TileTag,
    };
    pub use crate::error::{InventoryError, Result};
    pub use crate::events::{InventoryEvent, TagOwner};
    pub use crate::identity::{IdentityIndex, IndexReport, InstanceId, Location, Seed, Serial, UniqueId};
    pub use crate::inventory::{ChangeSet, Inventory, InventoryKind};
    pub use crate::item::{can_stack, AssetId, Item, ItemAsset, ItemCatalog, OverrideSettings, RandomCount};
    pub use crate::ops::{AddOutcome, FoundSpace, SizeAdjustment, SortKey, Spawn, StackOutcome};
    pub use crate::ownership::OwnershipViolation;
    pub use crate::query::{ItemQuery, QueryId};
    pub use crate::rotation::{Rotation, TileCoord};
    pub use crate::save::{SaveError, SaveFormat, SaveState};
    pub use crate::shape::{BakedShapes, Dimensions, Socket, SocketLocation};
    pub use crate::tags::{
        CalculationRegistry, ClampToTagValue, Tag, TagQuery, TagSet, TagValue, TagValueCalculation,
        TagValueOwner, TagValues,
    };
    pub use crate::tilemap::{Placement, SpaceCheck, SpaceQuery};
    pub use crate::transfer::transfer_item;
}

pub use prelude::*;
