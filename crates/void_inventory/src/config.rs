//! Inventory configuration

use crate::tags::Tag;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// TOML parse error
    #[error("Failed to parse inventory config: {0}")]
    Parse(#[from] toml::de::Error),
    /// TOML write error
    #[error("Failed to write inventory config: {0}")]
    Write(#[from] toml::ser::Error),
}

/// Per-instance inventory configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryConfig {
    /// Tag flipped on items that are equipped
    pub equipped_tag: Tag,

    /// Tiles carrying this tag count as occupied
    pub locked_tile_tag: Option<Tag>,

    /// Most units a container may grow while placing one item
    pub max_growth_per_placement: u32,

    /// Try every rotation when auto-placing items
    pub rotate_new_items: bool,

    /// Run the index validator after every structural mutation
    pub validate_after_mutation: bool,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            equipped_tag: Tag::new("Item.Status.Equipped"),
            locked_tile_tag: Some(Tag::new("Tile.Locked")),
            max_growth_per_placement: 64,
            rotate_new_items: true,
            validate_after_mutation: false,
        }
    }
}

impl InventoryConfig {
    /// Configuration that validates the index after every mutation
    pub fn debug() -> Self {
        Self {
            validate_after_mutation: true,
            ..Default::default()
        }
    }

    /// Configuration that never rotates auto-placed items
    pub fn fixed_rotation() -> Self {
        Self {
            rotate_new_items: false,
            ..Default::default()
        }
    }

    /// Set the equipped tag
    pub fn with_equipped_tag(mut self, tag: impl Into<Tag>) -> Self {
        self.equipped_tag = tag.into();
        self
    }

    /// Set or clear the locked tile tag
    pub fn with_locked_tile_tag(mut self, tag: Option<Tag>) -> Self {
        self.locked_tile_tag = tag;
        self
    }

    /// Set the growth cap
    pub fn with_max_growth(mut self, units: u32) -> Self {
        self.max_growth_per_placement = units;
        self
    }

    /// Parse from TOML
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Write as TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = InventoryConfig::from_toml_str(
            r#"
            equipped_tag = "Item.State.Worn"
            max_growth_per_placement = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.equipped_tag, Tag::new("Item.State.Worn"));
        assert_eq!(config.max_growth_per_placement, 4);
        assert!(config.rotate_new_items);
        assert_eq!(config.locked_tile_tag, Some(Tag::new("Tile.Locked")));
    }

    #[test]
    fn test_presets() {
        assert!(InventoryConfig::debug().validate_after_mutation);
        assert!(!InventoryConfig::fixed_rotation().rotate_new_items);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = InventoryConfig::default().with_max_growth(8);
        let text = config.to_toml_string().unwrap();
        assert_eq!(InventoryConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_invalid_toml() {
        assert!(InventoryConfig::from_toml_str("max_growth_per_placement = \"lots\"").is_err());
    }
}
