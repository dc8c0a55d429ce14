//! Item assets and item instances

use crate::container::Container;
use crate::identity::UniqueId;
use crate::rotation::{Rotation, TileCoord};
use crate::shape::{BakedShapes, Dimensions, Socket};
use crate::tags::{Tag, TagSet, TagValues};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Identifier of an item asset
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(String);

impl AssetId {
    /// Create an asset id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Id string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AssetId {
    fn from(s: &str) -> Self {
        AssetId::new(s)
    }
}

/// Static definition shared by every instance of an item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemAsset {
    /// Unique identifier
    pub id: AssetId,
    /// Display name
    pub name: String,
    /// Description
    pub description: String,
    /// Type tag (`Item.Type.*`)
    pub type_tag: Tag,
    /// Tags every new instance starts with
    pub default_tags: TagSet,
    /// Tag values every new instance starts with
    pub default_tag_values: TagValues,
    /// Footprint before rotation
    pub dimensions: Dimensions,
    /// Tiles of the footprint that are not part of the shape
    pub disabled_tiles: Vec<TileCoord>,
    /// Maximum stack size (1 = not stackable)
    pub max_stack: u32,
    /// Count used when a spawn asks for the default
    pub default_count: u32,
    /// Behavior class constructed on demand
    pub behavior_class: Option<String>,
    /// Behavior components attached to new instances
    pub components: Vec<String>,
    /// Named attachment points
    pub sockets: Vec<Socket>,
    /// Containers every new instance owns
    pub containers: Vec<Container>,
    #[serde(skip)]
    shapes: BakedShapes,
}

impl ItemAsset {
    /// Create a new 1x1, non-stackable asset
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: AssetId::new(id),
            name: name.into(),
            description: String::new(),
            type_tag: Tag::new("Item.Type"),
            default_tags: TagSet::new(),
            default_tag_values: TagValues::new(),
            dimensions: Dimensions::default(),
            disabled_tiles: Vec::new(),
            max_stack: 1,
            default_count: 1,
            behavior_class: None,
            components: Vec::new(),
            sockets: Vec::new(),
            containers: Vec::new(),
            shapes: BakedShapes::bake(Dimensions::default(), &[]),
        }
    }

    /// Set description
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    /// Set type tag
    pub fn with_type(mut self, tag: impl Into<Tag>) -> Self {
        self.type_tag = tag.into();
        self
    }

    /// Add a default tag
    pub fn with_tag(mut self, tag: impl Into<Tag>) -> Self {
        self.default_tags.add(tag.into());
        self
    }

    /// Add a default tag value
    pub fn with_tag_value(mut self, tag: impl Into<Tag>, value: f32) -> Self {
        self.default_tag_values.set(tag.into(), value, true);
        self
    }

    /// Set footprint
    pub fn with_dimensions(mut self, x: u32, y: u32) -> Self {
        self.dimensions = Dimensions::new(x.max(1), y.max(1));
        self.bake();
        self
    }

    /// Remove a tile from the footprint
    pub fn with_disabled_tile(mut self, x: i32, y: i32) -> Self {
        self.disabled_tiles.push(TileCoord::new(x, y));
        self.bake();
        self
    }

    /// Set max stack size
    pub fn with_max_stack(mut self, max: u32) -> Self {
        self.max_stack = max.max(1);
        self
    }

    /// Set default spawn count
    pub fn with_default_count(mut self, count: u32) -> Self {
        self.default_count = count;
        self
    }

    /// Set behavior class
    pub fn with_behavior(mut self, class: impl Into<String>) -> Self {
        self.behavior_class = Some(class.into());
        self
    }

    /// Attach a behavior component
    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.components.push(component.into());
        self
    }

    /// Add a socket
    pub fn with_socket(mut self, socket: Socket) -> Self {
        self.sockets.push(socket);
        self
    }

    /// Add a container every instance will own
    pub fn with_container(mut self, container: Container) -> Self {
        self.containers.push(container);
        self
    }

    /// Recompute rotated shapes after editing the footprint
    pub fn bake(&mut self) {
        self.shapes = BakedShapes::bake(self.dimensions, &self.disabled_tiles);
    }

    /// Baked shapes
    pub fn shapes(&self) -> &BakedShapes {
        &self.shapes
    }

    /// Shape at `rotation`
    pub fn shape(&self, rotation: Rotation) -> &[TileCoord] {
        self.shapes.get(rotation)
    }

    /// Check if stackable
    pub fn is_stackable(&self) -> bool {
        self.max_stack != 1
    }

    /// Find a socket by name
    pub fn socket(&self, name: &str) -> Option<&Socket> {
        self.sockets.iter().find(|s| s.name == name)
    }
}

/// Registry of item assets
#[derive(Debug, Clone, Default)]
pub struct ItemCatalog {
    assets: HashMap<AssetId, Arc<ItemAsset>>,
}

impl ItemCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an asset, baking its shapes
    pub fn register(&mut self, mut asset: ItemAsset) -> Arc<ItemAsset> {
        asset.bake();
        let asset = Arc::new(asset);
        if self.assets.insert(asset.id.clone(), asset.clone()).is_some() {
            log::debug!("Replaced item asset {}", asset.id);
        }
        asset
    }

    /// Builder form of [`register`](Self::register)
    pub fn with(mut self, asset: ItemAsset) -> Self {
        self.register(asset);
        self
    }

    /// Look up an asset
    pub fn get(&self, id: &AssetId) -> Option<&Arc<ItemAsset>> {
        self.assets.get(id)
    }

    /// Number of assets
    pub fn len(&self) -> usize {
        self.assets.len()
    }

    /// Whether the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

/// How a spawn picks its stack count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RandomCount {
    /// Use the asset's default count
    #[default]
    Default,
    /// Keep the count already on the item
    Keep,
    /// Exactly this many
    Exact(u32),
    /// Draw uniformly from `min..=max`
    Range { min: u32, max: u32 },
}

impl RandomCount {
    /// Resolve to a concrete count
    pub fn resolve<R: Rng + ?Sized>(&self, asset: &ItemAsset, current: u32, rng: &mut R) -> u32 {
        match *self {
            Self::Default => asset.default_count,
            Self::Keep => current,
            Self::Exact(count) => count,
            Self::Range { min, max } if min < max => rng.gen_range(min..=max),
            Self::Range { min, .. } => min,
        }
    }
}

/// Per-instance overrides of asset presentation and stacking
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideSettings {
    pub name: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    /// Currencies a vendor accepts for this item
    pub accepted_currencies: Vec<AssetId>,
    /// Max stack used by vendor and storage inventories. `-1` is unbounded.
    pub vendor_max_stack: Option<i32>,
}

/// An item instance inside a container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Identity
    pub id: UniqueId,
    /// Asset reference
    pub asset: AssetId,
    /// Index of the owning container
    pub container_index: usize,
    /// Index inside the owning container's item array
    pub item_index: usize,
    /// Top-left tile of the shape
    pub tile: usize,
    /// Rotation of the shape
    pub rotation: Rotation,
    /// Stack count
    pub count: u32,
    /// Tags
    pub tags: TagSet,
    /// Tag values
    pub tag_values: TagValues,
    /// Overrides
    pub overrides: OverrideSettings,
    /// Attached behavior components
    pub components: Vec<String>,
}

impl Item {
    /// Create a provisional item from an asset
    pub fn new(asset: &ItemAsset, count: u32) -> Self {
        Self {
            id: UniqueId::provisional(),
            asset: asset.id.clone(),
            container_index: 0,
            item_index: 0,
            tile: 0,
            rotation: Rotation::Zero,
            count,
            tags: asset.default_tags.clone(),
            tag_values: asset.default_tag_values.clone(),
            overrides: OverrideSettings::default(),
            components: asset.components.clone(),
        }
    }

    /// Set the top-left tile
    pub fn at(mut self, tile: usize) -> Self {
        self.tile = tile;
        self
    }

    /// Set rotation
    pub fn rotated(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    /// Add a tag
    pub fn with_tag(mut self, tag: impl Into<Tag>) -> Self {
        self.tags.add(tag.into());
        self
    }

    /// Set a tag value
    pub fn with_tag_value(mut self, tag: impl Into<Tag>, value: f32) -> Self {
        self.tag_values.set(tag.into(), value, true);
        self
    }

    /// Valid once it carries an asset and a real identity
    pub fn is_valid(&self) -> bool {
        !self.asset.as_str().is_empty() && self.id.is_valid()
    }

    /// Tag value lookup
    pub fn tag_value(&self, tag: &Tag) -> Option<f32> {
        self.tag_values.get(tag)
    }

    /// Tags plus the asset type tag, used by compatibility and type queries
    pub fn effective_tags(&self, asset: &ItemAsset) -> TagSet {
        let mut tags = self.tags.clone();
        tags.add(asset.type_tag.clone());
        tags
    }

    /// Copy of this item's annotations as a new provisional stack
    pub(crate) fn split_off(&self, count: u32) -> Item {
        Item {
            id: UniqueId::provisional(),
            count,
            components: Vec::new(),
            ..self.clone()
        }
    }
}

/// Whether `from` may stack onto `onto` under `max_stack`
pub fn can_stack(from: &Item, onto: &Item, asset: &ItemAsset, max_stack: u32) -> bool {
    from.asset == onto.asset
        && from.asset == asset.id
        && from.id != onto.id
        && asset.is_stackable()
        && onto.count < max_stack
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Seed;

    #[test]
    fn test_item_asset_builder() {
        let rifle = ItemAsset::new("rifle", "Rifle")
            .with_type("Item.Type.Weapon.Gun")
            .with_dimensions(4, 2)
            .with_disabled_tile(3, 1)
            .with_max_stack(1);

        assert_eq!(rifle.id, AssetId::new("rifle"));
        assert!(!rifle.is_stackable());
        assert_eq!(rifle.shape(Rotation::Zero).len(), 7);
        assert_eq!(rifle.shape(Rotation::Ninety).len(), 7);
    }

    #[test]
    fn test_catalog_bakes_on_register() {
        let mut catalog = ItemCatalog::new();
        let mut asset = ItemAsset::new("crate", "Crate");
        asset.dimensions = Dimensions::new(2, 2);
        let asset = catalog.register(asset);
        assert_eq!(asset.shape(Rotation::Zero).len(), 4);
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_random_count() {
        let asset = ItemAsset::new("arrow", "Arrow").with_max_stack(50).with_default_count(12);
        let mut rng = Seed(3).rng();
        assert_eq!(RandomCount::Default.resolve(&asset, 4, &mut rng), 12);
        assert_eq!(RandomCount::Keep.resolve(&asset, 4, &mut rng), 4);
        let drawn = RandomCount::Range { min: 5, max: 9 }.resolve(&asset, 4, &mut rng);
        assert!((5..=9).contains(&drawn));
        let again = RandomCount::Range { min: 5, max: 9 }.resolve(&asset, 4, &mut Seed(3).rng());
        assert_eq!(drawn, again);
    }

    #[test]
    fn test_can_stack() {
        let asset = ItemAsset::new("arrow", "Arrow").with_max_stack(10);
        let mut a = Item::new(&asset, 5);
        let mut b = Item::new(&asset, 3);
        a.id.serial = crate::identity::Serial::from_raw(1);
        b.id.serial = crate::identity::Serial::from_raw(2);
        assert!(can_stack(&a, &b, &asset, 10));
        b.count = 10;
        assert!(!can_stack(&a, &b, &asset, 10));
        assert!(!can_stack(&a, &a, &asset, 10));
    }
}
