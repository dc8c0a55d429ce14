//! Identity layer
//!
//! Items and containers are named by a [`UniqueId`]: a serial number paired
//! with the inventory instance that owns it. The [`IdentityIndex`] maps each
//! serial to the entity's current array coordinates so lookups stay O(1) no
//! matter how the container array is reshuffled.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Identifier of one inventory instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct InstanceId(u64);

impl InstanceId {
    /// Sentinel for "no owning instance", used by stripped save data
    pub const NONE: InstanceId = InstanceId(0);

    /// Create a new unique instance ID
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Create from a raw value
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw value
    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Whether this names a real instance
    pub fn is_some(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "inv#{}", self.0)
    }
}

/// Serial number of an item or container within one instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Serial(u32);

impl Serial {
    /// Serial carried by entities that have not been through initialization
    pub const PROVISIONAL: Serial = Serial(0);

    /// Largest serial handed out by [`Serial::draw`]
    pub const MAX: u32 = i32::MAX as u32;

    /// Create from a raw value
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the raw value
    pub fn raw(&self) -> u32 {
        self.0
    }

    /// Whether this is the provisional sentinel
    pub fn is_provisional(&self) -> bool {
        self.0 == 0
    }

    /// Draw a serial from `rng`, retrying until `in_use` rejects it.
    pub fn draw<R: Rng + ?Sized>(rng: &mut R, mut in_use: impl FnMut(Serial) -> bool) -> Serial {
        loop {
            let candidate = Serial(rng.gen_range(1..=Self::MAX));
            if !in_use(candidate) {
                return candidate;
            }
        }
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identity of an item or container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct UniqueId {
    /// Serial number
    pub serial: Serial,
    /// Owning inventory instance
    pub instance: InstanceId,
}

impl UniqueId {
    /// Create a new identity
    pub const fn new(serial: Serial, instance: InstanceId) -> Self {
        Self { serial, instance }
    }

    /// Identity that has not been assigned yet
    pub const fn provisional() -> Self {
        Self {
            serial: Serial::PROVISIONAL,
            instance: InstanceId::NONE,
        }
    }

    /// Valid once both the serial and the owning instance are set
    pub fn is_valid(&self) -> bool {
        !self.serial.is_provisional() && self.instance.is_some()
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.instance, self.serial)
    }
}

/// Shared random seed carried with a mutation so every peer draws the same values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Seed(pub u64);

impl Seed {
    /// Fresh random seed
    pub fn random() -> Self {
        Self(rand::random())
    }

    /// Deterministic generator for this seed
    pub fn rng(&self) -> StdRng {
        StdRng::seed_from_u64(self.0)
    }
}

/// Where an entity currently lives in the container array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Location {
    /// A container at `containers[container]`
    Container { container: usize },
    /// An item at `containers[container].items[item]`
    Item { container: usize, item: usize },
}

impl Location {
    /// Whether the entry names a container
    pub fn is_container(&self) -> bool {
        matches!(self, Self::Container { .. })
    }

    /// Container index of the entry
    pub fn container(&self) -> usize {
        match *self {
            Self::Container { container } | Self::Item { container, .. } => container,
        }
    }

    /// Item index, if the entry names an item
    pub fn item(&self) -> Option<usize> {
        match *self {
            Self::Container { .. } => None,
            Self::Item { item, .. } => Some(item),
        }
    }
}

/// Hash index from serial to current location
#[derive(Debug, Clone, Default)]
pub struct IdentityIndex {
    entries: HashMap<Serial, Location>,
}

impl IdentityIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite an entry. Returns the previous location.
    pub fn insert(&mut self, serial: Serial, location: Location) -> Option<Location> {
        self.entries.insert(serial, location)
    }

    /// Remove an entry
    pub fn remove(&mut self, serial: Serial) -> Option<Location> {
        self.entries.remove(&serial)
    }

    /// Look up an entry
    pub fn get(&self, serial: Serial) -> Option<Location> {
        self.entries.get(&serial).copied()
    }

    /// Whether the serial is indexed
    pub fn contains(&self, serial: Serial) -> bool {
        self.entries.contains_key(&serial)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterate over entries
    pub fn iter(&self) -> impl Iterator<Item = (Serial, Location)> + '_ {
        self.entries.iter().map(|(s, l)| (*s, *l))
    }
}

/// Result of [`Inventory::validate_index`](crate::Inventory::validate_index)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexReport {
    /// Live containers with no index entry
    pub missing_containers: Vec<UniqueId>,
    /// Live items with no index entry
    pub missing_items: Vec<UniqueId>,
    /// Index entries naming nothing that exists
    pub unknown: Vec<Serial>,
    /// Entries whose recorded location disagrees with the array position
    pub incorrect_locations: Vec<UniqueId>,
}

impl IndexReport {
    /// All four categories are empty
    pub fn is_consistent(&self) -> bool {
        self.missing_containers.is_empty()
            && self.missing_items.is_empty()
            && self.unknown.is_empty()
            && self.incorrect_locations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provisional_is_invalid() {
        assert!(!UniqueId::provisional().is_valid());
        let id = UniqueId::new(Serial::from_raw(7), InstanceId::new());
        assert!(id.is_valid());
    }

    #[test]
    fn test_seeded_draw_is_deterministic() {
        let a = Serial::draw(&mut Seed(42).rng(), |_| false);
        let b = Serial::draw(&mut Seed(42).rng(), |_| false);
        assert_eq!(a, b);
        assert!(!a.is_provisional());
    }

    #[test]
    fn test_draw_skips_used_serials() {
        let first = Serial::draw(&mut Seed(9).rng(), |_| false);
        let second = Serial::draw(&mut Seed(9).rng(), |s| s == first);
        assert_ne!(first, second);
    }

    #[test]
    fn test_index_insert_remove() {
        let mut index = IdentityIndex::new();
        let serial = Serial::from_raw(3);
        assert!(index.insert(serial, Location::Item { container: 0, item: 2 }).is_none());
        assert_eq!(index.get(serial).and_then(|l| l.item()), Some(2));
        assert!(!index.get(serial).map(|l| l.is_container()).unwrap_or(true));
        assert!(index.remove(serial).is_some());
        assert!(index.is_empty());
    }
}
