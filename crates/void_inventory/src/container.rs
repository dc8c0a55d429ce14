//! Containers: typed, tagged grids of items

use crate::identity::{Serial, UniqueId};
use crate::item::{AssetId, Item, ItemAsset};
use crate::rotation::TileCoord;
use crate::shape::Dimensions;
use crate::tags::{Tag, TagSet, TagValues};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Container type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ContainerType {
    /// Regular storage
    #[default]
    Inventory,
    /// Holds a single equipped item
    Equipment,
    /// Represents the owning actor itself
    SelfProxy,
}

/// Layout style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ContainerStyle {
    /// Items occupy their full rotated shape
    #[default]
    Grid,
    /// Every item occupies one tile
    Traditional,
    /// No tile map, unbounded
    DataOnly,
}

/// Axis along which a container may grow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GrowthDirection {
    #[default]
    Neither,
    X,
    Y,
}

/// Rules an item must pass to enter a container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatibilityRules {
    /// Item must match every one of these
    pub required_tags: TagSet,
    /// Item must match none of these
    pub blocking_tags: TagSet,
    /// If set, the item type must match one of these
    pub type_tags: TagSet,
    /// If set, only these assets are allowed
    pub whitelist: Vec<AssetId>,
    /// Assets never allowed
    pub blacklist: Vec<AssetId>,
}

impl CompatibilityRules {
    /// Require a tag
    pub fn requiring(mut self, tag: impl Into<Tag>) -> Self {
        self.required_tags.add(tag.into());
        self
    }

    /// Block a tag
    pub fn blocking(mut self, tag: impl Into<Tag>) -> Self {
        self.blocking_tags.add(tag.into());
        self
    }

    /// Accept an item type (and its descendants)
    pub fn accepting_type(mut self, tag: impl Into<Tag>) -> Self {
        self.type_tags.add(tag.into());
        self
    }

    /// Allow an asset
    pub fn allowing(mut self, asset: impl Into<AssetId>) -> Self {
        self.whitelist.push(asset.into());
        self
    }

    /// Deny an asset
    pub fn denying(mut self, asset: impl Into<AssetId>) -> Self {
        self.blacklist.push(asset.into());
        self
    }

    /// Evaluate the rules
    pub fn allows(&self, item: &Item, asset: &ItemAsset) -> bool {
        if !self.whitelist.is_empty() && !self.whitelist.contains(&item.asset) {
            return false;
        }
        if self.blacklist.contains(&item.asset) {
            return false;
        }
        let tags = item.effective_tags(asset);
        if !tags.has_all(&self.required_tags) || tags.has_any(&self.blocking_tags) {
            return false;
        }
        self.type_tags.is_empty() || self.type_tags.iter().any(|t| asset.type_tag.matches(t))
    }
}

/// Tags attached to a single tile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileTag {
    pub tile: usize,
    pub tags: TagSet,
}

/// Back-reference from a container to the item that owns it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRef {
    /// Serial of the owning item
    pub item: Serial,
    /// Container index of the owning item
    pub container_index: usize,
    /// Item index of the owning item
    pub item_index: usize,
}

/// A container of items
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    /// Identity
    pub id: UniqueId,
    /// Identifier tag
    pub name: Tag,
    /// Type
    pub kind: ContainerType,
    /// Layout style
    pub style: ContainerStyle,
    /// Growth axis
    pub growth: GrowthDirection,
    /// Grid size
    pub dimensions: Dimensions,
    /// Items held
    pub items: Vec<Item>,
    /// Occupancy grid, `None` marks a free tile
    pub tile_map: Vec<Option<Serial>>,
    /// Tags
    pub tags: TagSet,
    /// Tag values
    pub tag_values: TagValues,
    /// Compatibility rules
    pub rules: CompatibilityRules,
    /// Per-tile tags
    pub tile_tags: Vec<TileTag>,
    /// Owning item, `None` when owned by the instance
    pub owner: Option<OwnerRef>,
    /// Position in the instance's container array
    pub index: usize,
    #[serde(skip)]
    pub(crate) coord_cache: HashMap<TileCoord, usize>,
}

impl PartialEq for Container {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.kind == other.kind
            && self.style == other.style
            && self.growth == other.growth
            && self.dimensions == other.dimensions
            && self.items == other.items
            && self.tile_map == other.tile_map
            && self.tags == other.tags
            && self.tag_values == other.tag_values
            && self.rules == other.rules
            && self.tile_tags == other.tile_tags
            && self.owner == other.owner
            && self.index == other.index
    }
}

impl Container {
    /// Create a 1x1 grid container
    pub fn new(name: impl Into<Tag>) -> Self {
        Self {
            id: UniqueId::provisional(),
            name: name.into(),
            kind: ContainerType::Inventory,
            style: ContainerStyle::Grid,
            growth: GrowthDirection::Neither,
            dimensions: Dimensions::default(),
            items: Vec::new(),
            tile_map: Vec::new(),
            tags: TagSet::new(),
            tag_values: TagValues::new(),
            rules: CompatibilityRules::default(),
            tile_tags: Vec::new(),
            owner: None,
            index: 0,
            coord_cache: HashMap::new(),
        }
    }

    /// Set grid size
    pub fn with_dimensions(mut self, x: u32, y: u32) -> Self {
        self.dimensions = Dimensions::new(x.max(1), y.max(1));
        self
    }

    /// Set type. Equipment containers are forced to 1x1.
    pub fn with_type(mut self, kind: ContainerType) -> Self {
        self.kind = kind;
        self
    }

    /// Set style
    pub fn with_style(mut self, style: ContainerStyle) -> Self {
        self.style = style;
        self
    }

    /// Set growth axis
    pub fn with_growth(mut self, growth: GrowthDirection) -> Self {
        self.growth = growth;
        self
    }

    /// Set compatibility rules
    pub fn with_rules(mut self, rules: CompatibilityRules) -> Self {
        self.rules = rules;
        self
    }

    /// Add a tag
    pub fn with_tag(mut self, tag: impl Into<Tag>) -> Self {
        self.tags.add(tag.into());
        self
    }

    /// Add a provisional item. Placement is validated by the initialization pass.
    pub fn with_item(mut self, item: Item) -> Self {
        self.items.push(item);
        self
    }

    /// Items occupy their full shape
    pub fn is_spatial(&self) -> bool {
        matches!(self.style, ContainerStyle::Grid | ContainerStyle::DataOnly)
            && self.kind != ContainerType::Equipment
    }

    /// Placement may extend past the current bounds
    pub fn is_infinite(&self) -> bool {
        self.style == ContainerStyle::DataOnly || self.growth != GrowthDirection::Neither
    }

    /// Whether the container keeps a tile map
    pub fn supports_tile_map(&self) -> bool {
        self.style != ContainerStyle::DataOnly
    }

    /// Grid size in effect (equipment is always 1x1)
    pub fn effective_dimensions(&self) -> Dimensions {
        if self.kind == ContainerType::Equipment {
            Dimensions::new(1, 1)
        } else {
            self.dimensions
        }
    }

    /// Number of tiles
    pub fn tile_count(&self) -> usize {
        self.effective_dimensions().area()
    }

    /// Whether the rules accept the item
    pub fn accepts(&self, item: &Item, asset: &ItemAsset) -> bool {
        self.rules.allows(item, asset)
    }

    /// Find an item by serial
    pub fn item_position(&self, serial: Serial) -> Option<usize> {
        self.items.iter().position(|i| i.id.serial == serial)
    }

    /// Whether the item is held here
    pub fn contains_item(&self, serial: Serial) -> bool {
        self.item_position(serial).is_some()
    }

    /// Tags on a tile
    pub fn tile_tags(&self, tile: usize) -> Option<&TagSet> {
        self.tile_tags.iter().find(|t| t.tile == tile).map(|t| &t.tags)
    }

    /// Whether a tile carries a tag
    pub fn tile_has_tag(&self, tile: usize, tag: &Tag) -> bool {
        self.tile_tags(tile).map(|tags| tags.has(tag)).unwrap_or(false)
    }
}
