//! Filtered item views with background refresh
//!
//! An [`ItemQuery`] names the items matching a tag expression. Membership is
//! kept up to date incrementally as items come and go. A full rebuild can run
//! on a worker thread over a snapshot of the container array; the result is
//! handed back over a channel and applied on the mutation path.

use crate::container::Container;
use crate::identity::Serial;
use crate::item::{Item, ItemCatalog};
use crate::tags::{Tag, TagQuery};
use crossbeam_channel::{bounded, Receiver, TryRecvError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Weak};

/// Identifier of a registered query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryId(u32);

/// Named item filter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemQuery {
    /// Query name
    pub name: String,
    /// Tag expression evaluated against the item's tags and type
    pub filter: TagQuery,
    /// Container name tags to search, empty for all
    pub containers: Vec<Tag>,
}

impl ItemQuery {
    /// Create a query over every container
    pub fn new(name: impl Into<String>, filter: TagQuery) -> Self {
        Self {
            name: name.into(),
            filter,
            containers: Vec::new(),
        }
    }

    /// Restrict to containers whose name matches `tag`
    pub fn in_container(mut self, tag: impl Into<Tag>) -> Self {
        self.containers.push(tag.into());
        self
    }

    /// Whether `item` in `container` belongs to this query
    pub fn matches(&self, item: &Item, container: &Container, catalog: &ItemCatalog) -> bool {
        if !self.containers.is_empty() && !self.containers.iter().any(|t| container.name.matches(t)) {
            return false;
        }
        match catalog.get(&item.asset) {
            Some(asset) => self.filter.matches(&item.effective_tags(asset)),
            None => self.filter.matches(&item.tags),
        }
    }
}

type Registrations = HashMap<QueryId, BTreeSet<Serial>>;

fn scan(queries: &[(QueryId, ItemQuery)], containers: &[Container], catalog: &ItemCatalog) -> Registrations {
    let mut results: Registrations = queries.iter().map(|(id, _)| (*id, BTreeSet::new())).collect();
    for container in containers {
        for item in &container.items {
            for (id, query) in queries {
                if query.matches(item, container, catalog) {
                    if let Some(set) = results.get_mut(id) {
                        set.insert(item.id.serial);
                    }
                }
            }
        }
    }
    results
}

/// Registered queries and their current members
#[derive(Debug, Default)]
pub struct QueryManager {
    queries: Arc<RwLock<Vec<(QueryId, ItemQuery)>>>,
    registrations: Registrations,
    in_flight: Option<Receiver<Registrations>>,
    next_id: u32,
}

impl QueryManager {
    /// Create an empty manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a query. Members are filled by the next refresh.
    pub fn register(&mut self, query: ItemQuery) -> QueryId {
        self.next_id += 1;
        let id = QueryId(self.next_id);
        self.queries.write().push((id, query));
        self.registrations.insert(id, BTreeSet::new());
        id
    }

    /// Drop a query
    pub fn unregister(&mut self, id: QueryId) -> bool {
        let mut queries = self.queries.write();
        let before = queries.len();
        queries.retain(|(q, _)| *q != id);
        self.registrations.remove(&id);
        queries.len() != before
    }

    /// Query definition
    pub fn query(&self, id: QueryId) -> Option<ItemQuery> {
        self.queries.read().iter().find(|(q, _)| *q == id).map(|(_, q)| q.clone())
    }

    /// Number of registered queries
    pub fn len(&self) -> usize {
        self.queries.read().len()
    }

    /// Whether no query is registered
    pub fn is_empty(&self) -> bool {
        self.queries.read().is_empty()
    }

    /// Current members of a query
    pub fn members(&self, id: QueryId) -> Vec<Serial> {
        self.registrations
            .get(&id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Re-evaluate one item against every query. An outstanding refresh is
    /// applied first so its older snapshot cannot overwrite this edit.
    pub fn register_item(&mut self, item: &Item, container: &Container, catalog: &ItemCatalog) {
        self.settle();
        for (id, query) in self.queries.read().iter() {
            let set = self.registrations.entry(*id).or_default();
            if query.matches(item, container, catalog) {
                set.insert(item.id.serial);
            } else {
                set.remove(&item.id.serial);
            }
        }
    }

    /// Remove an item from every query
    pub fn unregister_item(&mut self, serial: Serial) {
        self.settle();
        for set in self.registrations.values_mut() {
            set.remove(&serial);
        }
    }

    /// Rebuild every registration on the calling thread
    pub fn refresh_blocking(&mut self, containers: &[Container], catalog: &ItemCatalog) {
        self.in_flight = None;
        let queries = self.queries.read().clone();
        self.registrations = scan(&queries, containers, catalog);
    }

    /// Rebuild every registration on a worker thread.
    ///
    /// The worker reads only `snapshot`. If `owner` is gone by the time the
    /// scan finishes the result is dropped.
    pub fn start_refresh(&mut self, snapshot: Arc<Vec<Container>>, catalog: Arc<ItemCatalog>, owner: Weak<()>) {
        let (tx, rx) = bounded(1);
        let queries = self.queries.read().clone();
        std::thread::spawn(move || {
            let results = scan(&queries, &snapshot, &catalog);
            if owner.upgrade().is_none() {
                log::debug!("Query refresh finished after its inventory was dropped, discarding");
                return;
            }
            let _ = tx.send(results);
        });
        self.in_flight = Some(rx);
    }

    /// Install a refresh result for the queries still registered. Queries
    /// registered after the scan started keep their current members.
    fn apply(&mut self, mut results: Registrations) {
        for (id, members) in self.registrations.iter_mut() {
            if let Some(fresh) = results.remove(id) {
                *members = fresh;
            }
        }
    }

    /// Whether a background refresh is outstanding
    pub fn is_refreshing(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Block until the outstanding refresh completes and apply it.
    /// Returns false if there was nothing to wait for.
    pub fn settle(&mut self) -> bool {
        let Some(rx) = self.in_flight.take() else {
            return false;
        };
        match rx.recv() {
            Ok(results) => {
                self.apply(results);
                true
            }
            Err(_) => {
                log::warn!("Query refresh worker exited without a result");
                false
            }
        }
    }

    /// Apply the outstanding refresh if it has completed
    pub fn poll(&mut self) -> bool {
        let Some(rx) = self.in_flight.as_ref() else {
            return false;
        };
        match rx.try_recv() {
            Ok(results) => {
                self.apply(results);
                self.in_flight = None;
                true
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Disconnected) => {
                self.in_flight = None;
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{InstanceId, UniqueId};
    use crate::item::ItemAsset;
    use crate::tags::TagSet;

    fn fixture() -> (ItemCatalog, Vec<Container>) {
        let catalog = ItemCatalog::new()
            .with(ItemAsset::new("apple", "Apple").with_type("Item.Type.Food.Fruit"))
            .with(ItemAsset::new("knife", "Knife").with_type("Item.Type.Weapon"));
        let apple = catalog.get(&"apple".into()).unwrap().clone();
        let knife = catalog.get(&"knife".into()).unwrap().clone();
        let mut pantry = Container::new("Container.Pantry").with_dimensions(3, 1);
        for (serial, asset) in [(1, &apple), (2, &knife), (3, &apple)] {
            let mut item = Item::new(asset, 1);
            item.id = UniqueId::new(Serial::from_raw(serial), InstanceId::from_raw(1));
            pantry.items.push(item);
        }
        (catalog, vec![pantry])
    }

    fn food() -> ItemQuery {
        let tags: TagSet = ["Item.Type.Food"].into_iter().collect();
        ItemQuery::new("food", TagQuery::AnyTagsMatch(tags))
    }

    #[test]
    fn test_blocking_refresh() {
        let (catalog, containers) = fixture();
        let mut manager = QueryManager::new();
        let id = manager.register(food());
        manager.refresh_blocking(&containers, &catalog);
        assert_eq!(manager.members(id), vec![Serial::from_raw(1), Serial::from_raw(3)]);
    }

    #[test]
    fn test_background_refresh_settles() {
        let (catalog, containers) = fixture();
        let owner = Arc::new(());
        let mut manager = QueryManager::new();
        let id = manager.register(food());
        manager.start_refresh(Arc::new(containers), Arc::new(catalog), Arc::downgrade(&owner));
        assert!(manager.is_refreshing());
        assert!(manager.settle());
        assert!(!manager.is_refreshing());
        assert_eq!(manager.members(id).len(), 2);
    }

    #[test]
    fn test_background_refresh_dropped_without_owner() {
        let (catalog, containers) = fixture();
        let owner = Arc::new(());
        let weak = Arc::downgrade(&owner);
        drop(owner);
        let mut manager = QueryManager::new();
        let id = manager.register(food());
        manager.start_refresh(Arc::new(containers), Arc::new(catalog), weak);
        assert!(!manager.settle());
        assert!(manager.members(id).is_empty());
    }

    #[test]
    fn test_incremental_edit_outlives_background_refresh() {
        let (catalog, containers) = fixture();
        let owner = Arc::new(());
        let mut manager = QueryManager::new();
        let id = manager.register(food());
        let snapshot = Arc::new(containers.clone());
        manager.start_refresh(snapshot, Arc::new(catalog.clone()), Arc::downgrade(&owner));
        manager.unregister_item(Serial::from_raw(1));
        assert!(!manager.is_refreshing());
        assert!(!manager.poll());
        assert_eq!(manager.members(id), vec![Serial::from_raw(3)]);
    }

    #[test]
    fn test_refresh_ignores_queries_dropped_meanwhile() {
        let (catalog, containers) = fixture();
        let owner = Arc::new(());
        let mut manager = QueryManager::new();
        let id = manager.register(food());
        manager.start_refresh(Arc::new(containers), Arc::new(catalog), Arc::downgrade(&owner));
        assert!(manager.unregister(id));
        assert!(manager.settle());
        assert!(manager.members(id).is_empty());
        assert!(manager.is_empty());
    }

    #[test]
    fn test_incremental_registration() {
        let (catalog, containers) = fixture();
        let mut manager = QueryManager::new();
        let id = manager.register(food().in_container("Container.Pantry"));
        let knife = &containers[0].items[1];
        manager.register_item(knife, &containers[0], &catalog);
        assert!(manager.members(id).is_empty());
        let apple = &containers[0].items[0];
        manager.register_item(apple, &containers[0], &catalog);
        assert_eq!(manager.members(id), vec![Serial::from_raw(1)]);
        manager.unregister_item(apple.id.serial);
        assert!(manager.members(id).is_empty());
    }
}
