//! Save/load of inventory instances
//!
//! A save stores the container array with identities stripped. Owner
//! back-references keep their coordinates so the initialization pass can
//! resolve them again on load. Behavior objects are saved as opaque bytes
//! keyed by the coordinates of their item.

use crate::container::Container;
use crate::identity::{Location, Seed, Serial, UniqueId};
use crate::inventory::{Inventory, InventoryKind};
use crate::tags::{TagSet, TagValues};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Current save version
pub const SAVE_VERSION: u32 = 1;

/// Save system errors
#[derive(Debug, Error)]
pub enum SaveError {
    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    /// Version mismatch
    #[error("Version mismatch: save version {0}, current version {1}")]
    VersionMismatch(u32, u32),
}

/// Save file format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaveFormat {
    /// JSON (human readable)
    Json,
    /// Binary (compact)
    #[default]
    Binary,
}

/// Saved state of one behavior object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorRecord {
    pub container_index: usize,
    pub item_index: usize,
    pub class: String,
    pub data: Vec<u8>,
}

/// Persisted inventory instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveState {
    pub version: u32,
    pub kind: InventoryKind,
    pub containers: Vec<Container>,
    pub tags: TagSet,
    pub tag_values: TagValues,
    pub behaviors: Vec<BehaviorRecord>,
}

impl SaveState {
    /// Encode in `format`
    pub fn to_bytes(&self, format: SaveFormat) -> Result<Vec<u8>, SaveError> {
        match format {
            SaveFormat::Json => serde_json::to_vec_pretty(self).map_err(|e| SaveError::Serialization(e.to_string())),
            SaveFormat::Binary => bincode::serialize(self).map_err(|e| SaveError::Serialization(e.to_string())),
        }
    }

    /// Decode from `format`, refusing saves newer than this build
    pub fn from_bytes(bytes: &[u8], format: SaveFormat) -> Result<Self, SaveError> {
        let state: SaveState = match format {
            SaveFormat::Json => {
                serde_json::from_slice(bytes).map_err(|e| SaveError::Deserialization(e.to_string()))?
            }
            SaveFormat::Binary => {
                bincode::deserialize(bytes).map_err(|e| SaveError::Deserialization(e.to_string()))?
            }
        };
        if state.version > SAVE_VERSION {
            return Err(SaveError::VersionMismatch(state.version, SAVE_VERSION));
        }
        Ok(state)
    }

    /// Write to a file
    pub fn write_to(&self, path: impl AsRef<Path>, format: SaveFormat) -> Result<(), SaveError> {
        fs::write(path, self.to_bytes(format)?)?;
        Ok(())
    }

    /// Read from a file
    pub fn read_from(path: impl AsRef<Path>, format: SaveFormat) -> Result<Self, SaveError> {
        let bytes = fs::read(path)?;
        Self::from_bytes(&bytes, format)
    }
}

impl Inventory {
    /// Snapshot this instance for saving
    pub fn save_state(&self) -> SaveState {
        let containers = self
            .containers
            .iter()
            .map(|container| {
                let mut stripped = container.clone();
                stripped.id = UniqueId::provisional();
                stripped.tile_map.clear();
                if let Some(owner) = stripped.owner.as_mut() {
                    owner.item = Serial::PROVISIONAL;
                }
                for item in stripped.items.iter_mut() {
                    item.id = UniqueId::provisional();
                }
                stripped
            })
            .collect();

        let mut behaviors: Vec<BehaviorRecord> = self
            .behaviors
            .iter()
            .filter_map(|(serial, behavior)| match self.index.get(*serial) {
                Some(Location::Item { container, item }) => Some(BehaviorRecord {
                    container_index: container,
                    item_index: item,
                    class: behavior.class_name().to_string(),
                    data: behavior.save(),
                }),
                _ => None,
            })
            .collect();
        behaviors.sort_by_key(|r| (r.container_index, r.item_index));

        SaveState {
            version: SAVE_VERSION,
            kind: self.kind,
            containers,
            tags: self.tags.clone(),
            tag_values: self.tag_values.clone(),
            behaviors,
        }
    }

    /// Replace this instance's contents with a save.
    ///
    /// Identities are drawn fresh from `seed`. Behavior records whose class is
    /// not registered are skipped with a warning.
    pub fn load_state(&mut self, state: SaveState, seed: Seed) {
        self.queries.settle();
        self.kind = state.kind;
        self.containers = state.containers;
        self.tags = state.tags;
        self.tag_values = state.tag_values;
        self.behaviors.clear();
        self.observers.clear();
        self.events.clear();
        self.initialize(seed);

        for record in state.behaviors {
            let Some(item) = self
                .containers
                .get(record.container_index)
                .and_then(|c| c.items.get(record.item_index))
            else {
                log::warn!(
                    "Behavior record for missing item ({}, {})",
                    record.container_index,
                    record.item_index
                );
                continue;
            };
            let serial = item.id.serial;
            let Some(mut behavior) = self.behavior_registry.construct(&record.class) else {
                log::warn!("Behavior class {} is not registered", record.class);
                continue;
            };
            behavior.load(&record.data);
            self.behaviors.insert(serial, behavior);
        }
        log::debug!("Loaded inventory {} ({:?})", self.id, self.kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::{BehaviorRegistry, ItemBehavior};
    use crate::item::{ItemAsset, ItemCatalog};
    use crate::ops::Spawn;
    use std::sync::Arc;

    struct Torch {
        fuel: u8,
    }

    impl ItemBehavior for Torch {
        fn class_name(&self) -> &str {
            "Torch"
        }

        fn save(&self) -> Vec<u8> {
            vec![self.fuel]
        }

        fn load(&mut self, bytes: &[u8]) {
            self.fuel = bytes.first().copied().unwrap_or(0);
        }
    }

    fn catalog() -> Arc<ItemCatalog> {
        Arc::new(
            ItemCatalog::new()
                .with(ItemAsset::new("torch", "Torch").with_behavior("Torch"))
                .with(
                    ItemAsset::new("satchel", "Satchel")
                        .with_dimensions(2, 2)
                        .with_container(Container::new("Container.Satchel").with_dimensions(3, 3)),
                )
                .with(ItemAsset::new("coin", "Coin").with_max_stack(100)),
        )
    }

    fn inventory() -> Inventory {
        let registry = BehaviorRegistry::new().with("Torch", || Box::new(Torch { fuel: 0 }) as Box<dyn ItemBehavior>);
        let mut inventory = Inventory::new(InventoryKind::Player, catalog())
            .with_behaviors(Arc::new(registry))
            .with_container(Container::new("Container.Main").with_dimensions(5, 5));
        inventory.initialize(Seed(11));
        inventory
    }

    fn populated() -> Inventory {
        let mut inventory = inventory();
        let satchel = inventory.try_add_new_item(&Spawn::new("satchel", 1), Seed(1)).unwrap().created[0];
        let pocket = inventory.owned_containers(satchel)[0];
        inventory
            .try_add_new_item(&Spawn::new("coin", 40).into_container(pocket), Seed(2))
            .unwrap();
        inventory
    }

    #[test]
    fn test_save_strips_identities() {
        let state = populated().save_state();
        assert_eq!(state.version, SAVE_VERSION);
        assert!(state.containers.iter().all(|c| !c.id.is_valid()));
        assert!(state.containers.iter().flat_map(|c| c.items.iter()).all(|i| !i.id.is_valid()));
        let owned = state.containers.iter().find(|c| c.owner.is_some()).unwrap();
        assert_eq!(owned.owner.unwrap().container_index, 0);
    }

    #[test]
    fn test_load_restores_ownership() {
        let state = populated().save_state();
        for format in [SaveFormat::Json, SaveFormat::Binary] {
            let bytes = state.to_bytes(format).unwrap();
            let decoded = SaveState::from_bytes(&bytes, format).unwrap();
            let mut loaded = inventory();
            loaded.load_state(decoded, Seed(99));
            assert_eq!(loaded.containers().len(), 2);
            assert!(loaded.validate_index().is_consistent());
            assert!(loaded.ownership_violations().is_empty());
            let satchel = loaded.items().find(|i| i.asset.as_str() == "satchel").unwrap().id;
            let coins = loaded.children_items(satchel, false);
            assert_eq!(coins.len(), 1);
            assert_eq!(loaded.item(coins[0]).unwrap().count, 40);
        }
    }

    #[test]
    fn test_behavior_state_round_trips() {
        let mut source = inventory();
        let torch = source.try_add_new_item(&Spawn::new("torch", 1), Seed(3)).unwrap().created[0];
        source.behavior_mut(torch).unwrap().load(&[42]);
        let state = source.save_state();
        assert_eq!(state.behaviors.len(), 1);
        assert_eq!(state.behaviors[0].data, vec![42]);

        let mut loaded = inventory();
        loaded.load_state(state, Seed(4));
        let torch = loaded.items().next().unwrap().id;
        assert!(loaded.has_behavior(torch));
        assert_eq!(loaded.behavior_mut(torch).unwrap().save(), vec![42]);
    }

    #[test]
    fn test_newer_save_is_refused() {
        let mut state = inventory().save_state();
        state.version = SAVE_VERSION + 1;
        let bytes = state.to_bytes(SaveFormat::Binary).unwrap();
        assert!(matches!(
            SaveState::from_bytes(&bytes, SaveFormat::Binary),
            Err(SaveError::VersionMismatch(2, 1))
        ));
    }
}
