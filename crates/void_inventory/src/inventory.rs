//! The inventory aggregate
//!
//! An [`Inventory`] owns one instance's container array, its identity index
//! and its annotations. Every operation takes the aggregate by reference; there
//! is no ambient state. Structural operations live in `ops`, ownership
//! bookkeeping in `ownership`, annotations in `annotate`.

use crate::behavior::{BehaviorRegistry, ItemBehavior, ItemObserver, ObserverList};
use crate::config::InventoryConfig;
use crate::container::{Container, OwnerRef};
use crate::error::{InventoryError, Result};
use crate::events::InventoryEvent;
use crate::identity::{IdentityIndex, InstanceId, Location, Seed, Serial, UniqueId};
use crate::item::{Item, ItemAsset, ItemCatalog, OverrideSettings};
use crate::query::{ItemQuery, QueryId, QueryManager};
use crate::tags::{CalculationRegistry, TagSet, TagValues};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// What an inventory instance belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum InventoryKind {
    /// A player's own inventory
    #[default]
    Player,
    /// A world object such as a chest
    Interactable,
    /// A vendor
    Vendor,
    /// Bulk storage
    Storage,
    /// A pickup lying in the world
    Pickup,
}

/// Containers touched since the last [`Inventory::take_changes`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Containers whose contents or layout changed
    pub touched: BTreeSet<UniqueId>,
    /// Containers that no longer exist
    pub removed: BTreeSet<UniqueId>,
    /// Instance tags or tag values changed
    pub instance: bool,
}

impl ChangeSet {
    /// Whether nothing changed
    pub fn is_empty(&self) -> bool {
        self.touched.is_empty() && self.removed.is_empty() && !self.instance
    }
}

/// One inventory instance
pub struct Inventory {
    pub(crate) id: InstanceId,
    pub(crate) kind: InventoryKind,
    pub(crate) containers: Vec<Container>,
    pub(crate) index: IdentityIndex,
    pub(crate) catalog: Arc<ItemCatalog>,
    pub(crate) config: InventoryConfig,
    pub(crate) tags: TagSet,
    pub(crate) tag_values: TagValues,
    pub(crate) events: Vec<InventoryEvent>,
    pub(crate) changes: ChangeSet,
    pub(crate) behaviors: HashMap<Serial, Box<dyn ItemBehavior>>,
    pub(crate) behavior_registry: Arc<BehaviorRegistry>,
    pub(crate) calculations: Arc<CalculationRegistry>,
    pub(crate) observers: HashMap<Serial, ObserverList>,
    pub(crate) queries: QueryManager,
    alive: Arc<()>,
}

impl Inventory {
    /// Create an empty inventory with a fresh instance id
    pub fn new(kind: InventoryKind, catalog: Arc<ItemCatalog>) -> Self {
        Self {
            id: InstanceId::new(),
            kind,
            containers: Vec::new(),
            index: IdentityIndex::new(),
            catalog,
            config: InventoryConfig::default(),
            tags: TagSet::new(),
            tag_values: TagValues::new(),
            events: Vec::new(),
            changes: ChangeSet::default(),
            behaviors: HashMap::new(),
            behavior_registry: Arc::new(BehaviorRegistry::new()),
            calculations: Arc::new(CalculationRegistry::new()),
            observers: HashMap::new(),
            queries: QueryManager::new(),
            alive: Arc::new(()),
        }
    }

    /// Use a specific instance id
    pub fn with_id(mut self, id: InstanceId) -> Self {
        self.id = id;
        self
    }

    /// Set configuration
    pub fn with_config(mut self, config: InventoryConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the behavior registry
    pub fn with_behaviors(mut self, registry: Arc<BehaviorRegistry>) -> Self {
        self.behavior_registry = registry;
        self
    }

    /// Set the tag-value calculation registry
    pub fn with_calculations(mut self, registry: Arc<CalculationRegistry>) -> Self {
        self.calculations = registry;
        self
    }

    /// Add a top-level container. It receives an identity in [`initialize`](Self::initialize).
    pub fn with_container(mut self, container: Container) -> Self {
        self.containers.push(container);
        self
    }

    /// Add an instance tag
    pub fn with_tag(mut self, tag: impl Into<crate::tags::Tag>) -> Self {
        self.tags.add(tag.into());
        self
    }

    /// Initialization pass.
    ///
    /// Gives every provisional container and item a real identity, resolves
    /// provisional owner references by their coordinates, creates the
    /// containers new items' assets declare, bakes tile maps and rebuilds the
    /// identity index.
    pub fn initialize(&mut self, seed: Seed) {
        let mut rng = seed.rng();
        self.queries.settle();

        // Existing identities first so fresh draws cannot collide with them.
        self.rebuild_index();
        let mut fresh_items = Vec::new();
        for ci in 0..self.containers.len() {
            if !self.containers[ci].id.is_valid() || self.containers[ci].id.instance != self.id {
                let serial = self.draw_serial(&mut rng);
                self.containers[ci].id = UniqueId::new(serial, self.id);
                self.index.insert(serial, Location::Container { container: ci });
            }
            for ii in 0..self.containers[ci].items.len() {
                let item = &self.containers[ci].items[ii];
                if !item.id.is_valid() || item.id.instance != self.id {
                    let serial = self.draw_serial(&mut rng);
                    self.containers[ci].items[ii].id = UniqueId::new(serial, self.id);
                    self.index.insert(serial, Location::Item { container: ci, item: ii });
                    fresh_items.push(serial);
                }
            }
        }

        for ci in 0..self.containers.len() {
            let Some(owner) = self.containers[ci].owner else {
                continue;
            };
            if !owner.item.is_provisional() {
                continue;
            }
            let resolved = self
                .containers
                .get(owner.container_index)
                .and_then(|c| c.items.get(owner.item_index))
                .map(|item| item.id.serial);
            match resolved {
                Some(serial) => {
                    self.containers[ci].owner = Some(OwnerRef { item: serial, ..owner });
                    fresh_items.retain(|s| *s != serial);
                }
                None => {
                    log::warn!(
                        "Container {} names owner ({}, {}) which does not exist",
                        self.containers[ci].id,
                        owner.container_index,
                        owner.item_index
                    );
                    self.containers[ci].owner = None;
                }
            }
        }

        for serial in fresh_items {
            if self.containers.iter().any(|c| c.owner.map(|o| o.item) == Some(serial)) {
                continue;
            }
            if let Some(Location::Item { container, item }) = self.index.get(serial) {
                self.instantiate_owned_containers(container, item, &mut rng);
            }
        }

        self.refresh_indexes();
        let catalog = self.catalog.clone();
        for container in &mut self.containers {
            container.rebuild_tile_map(&catalog);
        }
        self.rebuild_index();
        self.queries.refresh_blocking(&self.containers, &catalog);
        log::debug!(
            "Initialized inventory {} with {} containers and {} entities",
            self.id,
            self.containers.len(),
            self.index.len()
        );
    }

    /// Replace the container array with an authoritative copy.
    ///
    /// Used by mirrors; identities are kept as received.
    pub fn restore(&mut self, containers: Vec<Container>, tags: TagSet, tag_values: TagValues) {
        self.queries.settle();
        self.containers = containers;
        self.tags = tags;
        self.tag_values = tag_values;
        self.changes = ChangeSet::default();
        self.refresh_indexes();
        let catalog = self.catalog.clone();
        for container in &mut self.containers {
            container.refresh_tile_map(&catalog);
        }
        self.rebuild_index();
        let index = &self.index;
        self.behaviors
            .retain(|serial, _| matches!(index.get(*serial), Some(Location::Item { .. })));
        self.queries.refresh_blocking(&self.containers, &catalog);
    }

    /// Instance id
    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// Instance kind
    pub fn kind(&self) -> InventoryKind {
        self.kind
    }

    /// Configuration
    pub fn config(&self) -> &InventoryConfig {
        &self.config
    }

    /// Item catalog
    pub fn catalog(&self) -> &Arc<ItemCatalog> {
        &self.catalog
    }

    /// Calculation registry
    pub fn calculations(&self) -> &Arc<CalculationRegistry> {
        &self.calculations
    }

    /// All containers
    pub fn containers(&self) -> &[Container] {
        &self.containers
    }

    /// Container by array index
    pub fn container_at(&self, index: usize) -> Option<&Container> {
        self.containers.get(index)
    }

    /// Container by identity
    pub fn container(&self, id: UniqueId) -> Option<&Container> {
        self.container_index(id).ok().map(|ci| &self.containers[ci])
    }

    /// First container whose name matches `tag`
    pub fn container_named(&self, tag: &crate::tags::Tag) -> Option<&Container> {
        self.containers.iter().find(|c| c.name.matches(tag))
    }

    /// Item by identity
    pub fn item(&self, id: UniqueId) -> Option<&Item> {
        self.item_location(id)
            .ok()
            .map(|(ci, ii)| &self.containers[ci].items[ii])
    }

    /// Every item, container by container
    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.containers.iter().flat_map(|c| c.items.iter())
    }

    /// Identity index entry
    pub fn locate(&self, id: UniqueId) -> Option<Location> {
        if id.instance != self.id {
            return None;
        }
        self.index.get(id.serial)
    }

    /// Locate by scanning every container. Diagnostic only.
    pub fn locate_by_scan(&self, serial: Serial) -> Option<Location> {
        for (ci, container) in self.containers.iter().enumerate() {
            if container.id.serial == serial {
                return Some(Location::Container { container: ci });
            }
            if let Some(ii) = container.item_position(serial) {
                return Some(Location::Item { container: ci, item: ii });
            }
        }
        None
    }

    /// Instance tags
    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    /// Instance tag values
    pub fn tag_values(&self) -> &TagValues {
        &self.tag_values
    }

    /// Asset of an item
    pub fn asset_of(&self, item: &Item) -> Result<Arc<ItemAsset>> {
        self.catalog
            .get(&item.asset)
            .cloned()
            .ok_or_else(|| InventoryError::UnknownAsset(item.asset.clone()))
    }

    /// Max stack of an item in this instance.
    ///
    /// Vendor and storage inventories honor the item's override; `-1` there
    /// means unbounded.
    pub fn max_stack(&self, asset: &ItemAsset, overrides: &OverrideSettings) -> u32 {
        if matches!(self.kind, InventoryKind::Vendor | InventoryKind::Storage) {
            match overrides.vendor_max_stack {
                Some(v) if v < 0 => return Serial::MAX - 1,
                Some(v) if v > 0 => return v as u32,
                _ => {}
            }
        }
        asset.max_stack.max(1)
    }

    /// Events raised since the last drain
    pub fn events(&self) -> &[InventoryEvent] {
        &self.events
    }

    /// Take buffered events
    pub fn drain_events(&mut self) -> Vec<InventoryEvent> {
        std::mem::take(&mut self.events)
    }

    /// Take the set of containers touched since the last call
    pub fn take_changes(&mut self) -> ChangeSet {
        std::mem::take(&mut self.changes)
    }

    /// Register a filtered item view and fill it immediately
    pub fn register_query(&mut self, query: ItemQuery) -> QueryId {
        self.queries.settle();
        let id = self.queries.register(query);
        let catalog = self.catalog.clone();
        self.queries.refresh_blocking(&self.containers, &catalog);
        id
    }

    /// Drop a filtered item view
    pub fn unregister_query(&mut self, id: QueryId) -> bool {
        self.queries.unregister(id)
    }

    /// Current members of a query
    pub fn query_members(&mut self, id: QueryId) -> Vec<UniqueId> {
        self.queries.poll();
        self.queries
            .members(id)
            .into_iter()
            .map(|serial| UniqueId::new(serial, self.id))
            .collect()
    }

    /// Rebuild every query on a worker thread over a snapshot of the
    /// containers. The result lands before the next structural mutation.
    pub fn refresh_queries_async(&mut self) {
        self.queries.settle();
        let snapshot = Arc::new(self.containers.clone());
        self.queries
            .start_refresh(snapshot, self.catalog.clone(), Arc::downgrade(&self.alive));
    }

    /// Whether a background query refresh is outstanding
    pub fn is_refreshing_queries(&self) -> bool {
        self.queries.is_refreshing()
    }

    /// Behavior object of an item, constructed on first use. A freshly
    /// constructed behavior is told the item was added.
    ///
    /// Returns `None` with a warning when the asset names no behavior class or
    /// the class is not registered.
    pub fn behavior_mut(&mut self, id: UniqueId) -> Option<&mut (dyn ItemBehavior + 'static)> {
        let (ci, ii) = self.item_location(id).ok()?;
        if !self.behaviors.contains_key(&id.serial) {
            let asset = self.asset_of(&self.containers[ci].items[ii]).ok()?;
            let Some(class) = asset.behavior_class.as_deref() else {
                log::warn!("Item {} has no behavior class", id);
                return None;
            };
            let Some(mut behavior) = self.behavior_registry.construct(class) else {
                log::warn!("Behavior class {} is not registered", class);
                return None;
            };
            behavior.on_added(&self.containers[ci].items[ii]);
            self.behaviors.insert(id.serial, behavior);
        }
        self.behaviors.get_mut(&id.serial).map(|b| b.as_mut())
    }

    /// Whether a behavior object has been constructed for an item
    pub fn has_behavior(&self, id: UniqueId) -> bool {
        id.instance == self.id && self.behaviors.contains_key(&id.serial)
    }

    /// Attach an external observer to an item
    pub fn observe_item(&mut self, id: UniqueId, observer: Arc<dyn ItemObserver>) -> Result<()> {
        self.item_location(id)?;
        self.observers.entry(id.serial).or_default().push(observer);
        Ok(())
    }

    /// Detach every observer from an item
    pub fn clear_observers(&mut self, id: UniqueId) {
        self.observers.remove(&id.serial);
    }

    /// Item coordinates from the identity index
    pub(crate) fn item_location(&self, id: UniqueId) -> Result<(usize, usize)> {
        if id.instance != self.id {
            return Err(InventoryError::WrongInstance(id));
        }
        match self.index.get(id.serial) {
            Some(Location::Item { container, item }) => {
                let found = self
                    .containers
                    .get(container)
                    .and_then(|c| c.items.get(item))
                    .map(|i| i.id == id)
                    .unwrap_or(false);
                if found {
                    Ok((container, item))
                } else {
                    log::warn!("Identity index entry for {} is stale", id);
                    Err(InventoryError::UnknownItem(id))
                }
            }
            _ => Err(InventoryError::UnknownItem(id)),
        }
    }

    /// Container coordinate from the identity index
    pub(crate) fn container_index(&self, id: UniqueId) -> Result<usize> {
        if id.instance != self.id {
            return Err(InventoryError::WrongInstance(id));
        }
        match self.index.get(id.serial) {
            Some(Location::Container { container })
                if self.containers.get(container).map(|c| c.id == id).unwrap_or(false) =>
            {
                Ok(container)
            }
            _ => Err(InventoryError::UnknownContainer(id)),
        }
    }

    /// Draw an unused serial
    pub(crate) fn draw_serial<R: Rng + ?Sized>(&self, rng: &mut R) -> Serial {
        Serial::draw(rng, |s| self.index.contains(s))
    }

    pub(crate) fn emit(&mut self, event: InventoryEvent) {
        self.events.push(event);
    }

    pub(crate) fn mark_touched(&mut self, ci: usize) {
        if let Some(container) = self.containers.get(ci) {
            self.changes.touched.insert(container.id);
        }
    }

    pub(crate) fn mark_removed(&mut self, id: UniqueId) {
        self.changes.touched.remove(&id);
        self.changes.removed.insert(id);
    }

    /// Tell observers and queries that an item changed
    pub(crate) fn item_updated(&mut self, ci: usize, ii: usize) {
        let Some(item) = self.containers.get(ci).and_then(|c| c.items.get(ii)) else {
            return;
        };
        if let Some(observers) = self.observers.get(&item.id.serial) {
            for observer in observers {
                observer.item_updated(item);
            }
        }
        self.queries.register_item(item, &self.containers[ci], &self.catalog);
        self.mark_touched(ci);
    }

    /// Create the containers an item's asset declares, owned by that item
    pub(crate) fn instantiate_owned_containers<R: Rng + ?Sized>(&mut self, ci: usize, ii: usize, rng: &mut R) {
        let item = &self.containers[ci].items[ii];
        let Some(asset) = self.catalog.get(&item.asset).cloned() else {
            return;
        };
        let owner = OwnerRef {
            item: item.id.serial,
            container_index: ci,
            item_index: ii,
        };
        for template in &asset.containers {
            let mut container = template.clone();
            let serial = self.draw_serial(rng);
            container.id = UniqueId::new(serial, self.id);
            container.owner = Some(owner);
            let new_index = self.containers.len();
            container.index = new_index;
            self.index.insert(serial, Location::Container { container: new_index });
            for (item_index, item) in container.items.iter_mut().enumerate() {
                let serial = Serial::draw(rng, |s| self.index.contains(s));
                item.id = UniqueId::new(serial, self.id);
                item.container_index = new_index;
                item.item_index = item_index;
                self.index.insert(serial, Location::Item { container: new_index, item: item_index });
            }
            container.rebuild_tile_map(&self.catalog);
            self.changes.touched.insert(container.id);
            self.containers.push(container);
        }
    }

    /// Post-mutation hook: optional consistency check
    pub(crate) fn after_mutation(&mut self) {
        if !self.config.validate_after_mutation {
            return;
        }
        let report = self.validate_index();
        if !report.is_consistent() {
            log::warn!("Inventory {} index inconsistent: {:?}", self.id, report);
        }
        let violations = self.ownership_violations();
        if !violations.is_empty() {
            log::warn!("Inventory {} ownership violations: {:?}", self.id, violations);
        }
    }
}

impl fmt::Debug for Inventory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inventory")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("containers", &self.containers.len())
            .field("indexed", &self.index.len())
            .field("behaviors", &self.behaviors.len())
            .finish()
    }
}
