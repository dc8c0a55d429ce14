//! Annotation layer
//!
//! Tags and tag values on items, containers and the instance itself. Setting
//! a tag value runs an optional named calculation hook before the value is
//! committed. Lookups are linear scans over the container array.

use crate::container::ContainerType;
use crate::error::{InventoryError, Result};
use crate::events::{InventoryEvent, TagOwner};
use crate::identity::UniqueId;
use crate::inventory::Inventory;
use crate::tags::{apply_calculation, Tag, TagQuery, TagSet, TagValue, TagValueOwner, TagValues};

/// Which owners [`Inventory::total_value_of_tag`] sums over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagValueScope {
    pub items: bool,
    pub containers: bool,
    pub instance: bool,
}

impl TagValueScope {
    /// Items, containers and the instance
    pub const ALL: TagValueScope = TagValueScope {
        items: true,
        containers: true,
        instance: true,
    };

    /// Items only
    pub const ITEMS: TagValueScope = TagValueScope {
        items: true,
        containers: false,
        instance: false,
    };
}

impl Default for TagValueScope {
    fn default() -> Self {
        Self::ALL
    }
}

#[derive(Clone, Copy)]
enum Slot {
    Item(usize, usize),
    Container(usize),
    Instance,
}

impl Inventory {
    fn slot(&self, owner: TagOwner) -> Result<Slot> {
        match owner {
            TagOwner::Item(id) => self.item_location(id).map(|(ci, ii)| Slot::Item(ci, ii)),
            TagOwner::Container(id) => self.container_index(id).map(Slot::Container),
            TagOwner::Instance => Ok(Slot::Instance),
        }
    }

    fn annotations_mut(&mut self, slot: Slot) -> (&mut TagSet, &mut TagValues) {
        match slot {
            Slot::Item(ci, ii) => {
                let item = &mut self.containers[ci].items[ii];
                (&mut item.tags, &mut item.tag_values)
            }
            Slot::Container(ci) => {
                let container = &mut self.containers[ci];
                (&mut container.tags, &mut container.tag_values)
            }
            Slot::Instance => (&mut self.tags, &mut self.tag_values),
        }
    }

    fn value_owner(&self, slot: Slot) -> TagValueOwner<'_> {
        match slot {
            Slot::Item(ci, ii) => TagValueOwner::Item(&self.containers[ci].items[ii]),
            Slot::Container(ci) => TagValueOwner::Container(&self.containers[ci]),
            Slot::Instance => TagValueOwner::Instance {
                tags: &self.tags,
                values: &self.tag_values,
            },
        }
    }

    fn annotation_changed(&mut self, slot: Slot) {
        match slot {
            Slot::Item(ci, ii) => self.item_updated(ci, ii),
            Slot::Container(ci) => self.mark_touched(ci),
            Slot::Instance => self.changes.instance = true,
        }
    }

    /// Add a tag to an item, a container or the instance
    pub fn add_tag(&mut self, owner: TagOwner, tag: impl Into<Tag>) -> Result<()> {
        self.queries.settle();
        let slot = self.slot(owner)?;
        let tag = tag.into();
        if !self.annotations_mut(slot).0.add(tag.clone()) {
            return Err(InventoryError::NoEffect);
        }
        self.emit(InventoryEvent::TagChanged { owner, tag, added: true });
        self.annotation_changed(slot);
        Ok(())
    }

    /// Remove a tag
    pub fn remove_tag(&mut self, owner: TagOwner, tag: &Tag) -> Result<()> {
        self.queries.settle();
        let slot = self.slot(owner)?;
        if !self.annotations_mut(slot).0.remove(tag) {
            return Err(InventoryError::NoEffect);
        }
        self.emit(InventoryEvent::TagChanged {
            owner,
            tag: tag.clone(),
            added: false,
        });
        self.annotation_changed(slot);
        Ok(())
    }

    /// Set a tag value.
    ///
    /// `calculation` names a hook in the calculation registry; an unknown
    /// name is logged and the value is stored as given. Returns the stored
    /// value, or `None` when the hook removed it.
    pub fn set_tag_value(
        &mut self,
        owner: TagOwner,
        tag: impl Into<Tag>,
        value: f32,
        add_if_not_found: bool,
        calculation: Option<&str>,
    ) -> Result<Option<f32>> {
        self.queries.settle();
        let slot = self.slot(owner)?;
        let tag = tag.into();
        let current = self.value_owner(slot).values().get(&tag);
        if current.is_none() && !add_if_not_found {
            log::debug!("Tag value {} not present on {:?}", tag, owner);
            return Err(InventoryError::TagValueNotFound(tag.to_string()));
        }

        let calculations = self.calculations.clone();
        let hook = calculation.and_then(|name| {
            let hook = calculations.get(name);
            if hook.is_none() {
                log::warn!("Tag value calculation {} is not registered", name);
            }
            hook
        });
        let proposed = TagValue::new(tag.clone(), value);
        let outcome = apply_calculation(hook.map(|h| h.as_ref()), proposed, self.value_owner(slot));

        let values = self.annotations_mut(slot).1;
        match outcome {
            Some(v) if current == Some(v) => return Err(InventoryError::NoEffect),
            Some(v) => {
                values.set(tag.clone(), v, true);
            }
            None if current.is_none() => return Err(InventoryError::NoEffect),
            None => {
                values.remove(&tag);
            }
        }
        self.emit(InventoryEvent::TagValueChanged {
            owner,
            tag,
            value: outcome,
        });
        self.annotation_changed(slot);
        Ok(outcome)
    }

    /// Remove a tag value. Returns the value it held.
    pub fn remove_tag_value(&mut self, owner: TagOwner, tag: &Tag) -> Result<f32> {
        self.queries.settle();
        let slot = self.slot(owner)?;
        let removed = self
            .annotations_mut(slot)
            .1
            .remove(tag)
            .ok_or_else(|| InventoryError::TagValueNotFound(tag.to_string()))?;
        self.emit(InventoryEvent::TagValueChanged {
            owner,
            tag: tag.clone(),
            value: None,
        });
        self.annotation_changed(slot);
        Ok(removed)
    }

    /// Tag value of an item, container or the instance
    pub fn tag_value_of(&self, owner: TagOwner, tag: &Tag) -> Option<f32> {
        let slot = self.slot(owner).ok()?;
        self.value_owner(slot).values().get(tag)
    }

    fn scope(&self, container: Option<UniqueId>) -> Vec<usize> {
        match container {
            Some(id) => self.container_index(id).map(|ci| vec![ci]).unwrap_or_default(),
            None => (0..self.containers.len()).collect(),
        }
    }

    fn collect_items<F>(&self, container: Option<UniqueId>, mut keep: F) -> Vec<UniqueId>
    where
        F: FnMut(&crate::item::Item, Option<&crate::item::ItemAsset>) -> bool,
    {
        let mut found = Vec::new();
        for ci in self.scope(container) {
            for item in &self.containers[ci].items {
                let asset = self.catalog.get(&item.asset).map(|a| a.as_ref());
                if keep(item, asset) {
                    found.push(item.id);
                }
            }
        }
        found
    }

    /// Items carrying `tag` or a descendant of it. The asset's type tag counts.
    pub fn items_by_tag(&self, tag: &Tag, container: Option<UniqueId>) -> Vec<UniqueId> {
        self.collect_items(container, |item, asset| {
            item.tags.has(tag) || asset.map_or(false, |a| a.type_tag.matches(tag))
        })
    }

    /// Items holding a value for `tag`, with that value
    pub fn items_by_tag_value(&self, tag: &Tag, container: Option<UniqueId>) -> Vec<(UniqueId, f32)> {
        self.scope(container)
            .into_iter()
            .flat_map(|ci| self.containers[ci].items.iter())
            .filter_map(|item| item.tag_value(tag).map(|v| (item.id, v)))
            .collect()
    }

    /// Items whose asset type is `type_tag` or a descendant of it
    pub fn items_by_type(&self, type_tag: &Tag, container: Option<UniqueId>) -> Vec<UniqueId> {
        self.collect_items(container, |_, asset| asset.map_or(false, |a| a.type_tag.matches(type_tag)))
    }

    /// Items whose tags satisfy a query
    pub fn items_by_query(&self, query: &TagQuery, container: Option<UniqueId>) -> Vec<UniqueId> {
        self.collect_items(container, |item, asset| match asset {
            Some(asset) => query.matches(&item.effective_tags(asset)),
            None => query.matches(&item.tags),
        })
    }

    /// Containers carrying `tag` or a descendant. The container name counts.
    pub fn containers_by_tag(&self, tag: &Tag) -> Vec<UniqueId> {
        self.containers
            .iter()
            .filter(|c| c.tags.has(tag) || c.name.matches(tag))
            .map(|c| c.id)
            .collect()
    }

    /// Containers holding a value for `tag`
    pub fn containers_by_tag_value(&self, tag: &Tag) -> Vec<(UniqueId, f32)> {
        self.containers
            .iter()
            .filter_map(|c| c.tag_values.get(tag).map(|v| (c.id, v)))
            .collect()
    }

    /// Containers whose tags satisfy a query
    pub fn containers_by_query(&self, query: &TagQuery) -> Vec<UniqueId> {
        self.containers
            .iter()
            .filter(|c| query.matches(&c.tags))
            .map(|c| c.id)
            .collect()
    }

    /// Containers of a type
    pub fn containers_by_type(&self, kind: ContainerType) -> Vec<UniqueId> {
        self.containers
            .iter()
            .filter(|c| c.kind == kind)
            .map(|c| c.id)
            .collect()
    }

    /// Sum of every value held for `tag` within `scope`
    pub fn total_value_of_tag(&self, tag: &Tag, scope: TagValueScope) -> f32 {
        let mut total = 0.0;
        if scope.items {
            total += self.items().filter_map(|i| i.tag_value(tag)).sum::<f32>();
        }
        if scope.containers {
            total += self.containers.iter().filter_map(|c| c.tag_values.get(tag)).sum::<f32>();
        }
        if scope.instance {
            total += self.tag_values.get(tag).unwrap_or(0.0);
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Container;
    use crate::identity::Seed;
    use crate::inventory::InventoryKind;
    use crate::item::{ItemAsset, ItemCatalog};
    use crate::ops::Spawn;
    use crate::query::ItemQuery;
    use crate::tags::{CalculationRegistry, ClampToTagValue};
    use std::sync::Arc;

    fn setup() -> (Inventory, UniqueId) {
        let catalog = ItemCatalog::new().with(
            ItemAsset::new("sword", "Sword")
                .with_type("Item.Type.Weapon.Sword")
                .with_tag_value("Item.Durability.Max", 100.0),
        );
        let calculations = CalculationRegistry::new().with("clamp_durability", ClampToTagValue::new("Item.Durability.Max"));
        let mut inventory = Inventory::new(InventoryKind::Player, Arc::new(catalog))
            .with_calculations(Arc::new(calculations))
            .with_container(Container::new("Container.Backpack").with_dimensions(4, 4));
        inventory.initialize(Seed(7));
        let outcome = inventory.try_add_new_item(&Spawn::new("sword", 1), Seed(8)).unwrap();
        (inventory, outcome.created[0])
    }

    #[test]
    fn test_add_and_remove_tag() {
        let (mut inventory, sword) = setup();
        inventory.add_tag(TagOwner::Item(sword), "Item.Status.Cursed").unwrap();
        assert_eq!(
            inventory.add_tag(TagOwner::Item(sword), "Item.Status.Cursed"),
            Err(InventoryError::NoEffect)
        );
        assert_eq!(inventory.items_by_tag(&Tag::new("Item.Status"), None), vec![sword]);
        inventory.remove_tag(TagOwner::Item(sword), &Tag::new("Item.Status.Cursed")).unwrap();
        assert!(inventory.items_by_tag(&Tag::new("Item.Status"), None).is_empty());
    }

    #[test]
    fn test_tag_edit_survives_background_query_refresh() {
        let (mut inventory, sword) = setup();
        let quest = inventory.register_query(ItemQuery::new(
            "quest",
            TagQuery::AnyTagsMatch(["Item.Quest"].into_iter().collect()),
        ));
        inventory.refresh_queries_async();
        inventory.add_tag(TagOwner::Item(sword), "Item.Quest").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(inventory.query_members(quest), vec![sword]);

        inventory.refresh_queries_async();
        inventory.remove_tag(TagOwner::Item(sword), &Tag::new("Item.Quest")).unwrap();
        assert!(inventory.query_members(quest).is_empty());
        assert!(!inventory.is_refreshing_queries());
    }

    #[test]
    fn test_type_tag_counts_for_lookups() {
        let (inventory, sword) = setup();
        assert_eq!(inventory.items_by_type(&Tag::new("Item.Type.Weapon"), None), vec![sword]);
        assert_eq!(inventory.items_by_tag(&Tag::new("Item.Type"), None), vec![sword]);
        let query = TagQuery::AllTagsMatch(["Item.Type.Weapon"].into_iter().collect());
        assert_eq!(inventory.items_by_query(&query, None), vec![sword]);
    }

    #[test]
    fn test_set_tag_value_requires_presence_unless_adding() {
        let (mut inventory, sword) = setup();
        let result = inventory.set_tag_value(TagOwner::Item(sword), "Item.Durability", 50.0, false, None);
        assert_eq!(result, Err(InventoryError::TagValueNotFound("Item.Durability".into())));
        let stored = inventory
            .set_tag_value(TagOwner::Item(sword), "Item.Durability", 50.0, true, None)
            .unwrap();
        assert_eq!(stored, Some(50.0));
    }

    #[test]
    fn test_calculation_hook_clamps() {
        let (mut inventory, sword) = setup();
        let stored = inventory
            .set_tag_value(TagOwner::Item(sword), "Item.Durability", 250.0, true, Some("clamp_durability"))
            .unwrap();
        assert_eq!(stored, Some(100.0));
        assert_eq!(inventory.tag_value_of(TagOwner::Item(sword), &Tag::new("Item.Durability")), Some(100.0));
    }

    #[test]
    fn test_unknown_calculation_stores_raw_value() {
        let (mut inventory, sword) = setup();
        let stored = inventory
            .set_tag_value(TagOwner::Item(sword), "Item.Durability", 250.0, true, Some("missing"))
            .unwrap();
        assert_eq!(stored, Some(250.0));
    }

    #[test]
    fn test_instance_annotations_mark_changes() {
        let (mut inventory, _) = setup();
        inventory.take_changes();
        inventory
            .set_tag_value(TagOwner::Instance, "Inventory.Gold", 30.0, true, None)
            .unwrap();
        assert!(inventory.take_changes().instance);
        assert_eq!(inventory.total_value_of_tag(&Tag::new("Inventory.Gold"), TagValueScope::ALL), 30.0);
        assert_eq!(inventory.total_value_of_tag(&Tag::new("Inventory.Gold"), TagValueScope::ITEMS), 0.0);
    }

    #[test]
    fn test_container_lookups() {
        let (mut inventory, _) = setup();
        let backpack = inventory.containers()[0].id;
        inventory.add_tag(TagOwner::Container(backpack), "Container.Waterproof").unwrap();
        assert_eq!(inventory.containers_by_tag(&Tag::new("Container")), vec![backpack]);
        assert_eq!(inventory.containers_by_type(ContainerType::Inventory), vec![backpack]);
        assert!(inventory.containers_by_type(ContainerType::Equipment).is_empty());
    }
}
