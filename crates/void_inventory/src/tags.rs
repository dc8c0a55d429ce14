//! Hierarchical tags, tag values and calculation hooks
//!
//! Tags are dot-path labels such as `Item.Type.Weapon.Gun`. A tag matches
//! itself and every tag below it, so a rule naming `Item.Type.Weapon` accepts
//! a gun. Lookups are linear scans; nothing here keeps a secondary index.

use crate::container::Container;
use crate::item::Item;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// Dot-path label
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(String);

impl Tag {
    /// Create a tag
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Tag path
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this tag equals `other` or lies below it
    pub fn matches(&self, other: &Tag) -> bool {
        self.0 == other.0
            || (self.0.len() > other.0.len()
                && self.0.starts_with(other.0.as_str())
                && self.0.as_bytes()[other.0.len()] == b'.')
    }

    /// Parent tag, if any
    pub fn parent(&self) -> Option<Tag> {
        self.0.rfind('.').map(|i| Tag(self.0[..i].to_string()))
    }

    /// Whether the tag is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Tag {
    fn from(s: &str) -> Self {
        Tag::new(s)
    }
}

/// Ordered set of tags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(BTreeSet<Tag>);

impl TagSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tag. Returns false if it was already present.
    pub fn add(&mut self, tag: Tag) -> bool {
        self.0.insert(tag)
    }

    /// Remove a tag. Returns false if it was absent.
    pub fn remove(&mut self, tag: &Tag) -> bool {
        self.0.remove(tag)
    }

    /// Exact membership
    pub fn contains_exact(&self, tag: &Tag) -> bool {
        self.0.contains(tag)
    }

    /// Whether any tag in the set matches `tag` hierarchically
    pub fn has(&self, tag: &Tag) -> bool {
        self.0.iter().any(|t| t.matches(tag))
    }

    /// Whether any tag of `other` is matched
    pub fn has_any(&self, other: &TagSet) -> bool {
        other.iter().any(|t| self.has(t))
    }

    /// Whether every tag of `other` is matched
    pub fn has_all(&self, other: &TagSet) -> bool {
        other.iter().all(|t| self.has(t))
    }

    /// Add every tag of `other`
    pub fn extend(&mut self, other: &TagSet) {
        self.0.extend(other.0.iter().cloned());
    }

    /// Iterate over tags
    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.0.iter()
    }

    /// Number of tags
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Tag> for TagSet {
    fn from_iter<I: IntoIterator<Item = Tag>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> FromIterator<&'a str> for TagSet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        Self(iter.into_iter().map(Tag::new).collect())
    }
}

/// Numeric value attached to a tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagValue {
    pub tag: Tag,
    pub value: f32,
}

impl TagValue {
    /// Create a tag value
    pub fn new(tag: impl Into<Tag>, value: f32) -> Self {
        Self { tag: tag.into(), value }
    }
}

impl From<String> for Tag {
    fn from(s: String) -> Self {
        Tag(s)
    }
}

/// List of tag values, keyed by exact tag
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagValues(Vec<TagValue>);

impl TagValues {
    /// Create an empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Value for an exact tag
    pub fn get(&self, tag: &Tag) -> Option<f32> {
        self.0.iter().find(|tv| tv.tag == *tag).map(|tv| tv.value)
    }

    /// Set a value. Returns false if the tag is absent and `add_if_not_found`
    /// is false.
    pub fn set(&mut self, tag: Tag, value: f32, add_if_not_found: bool) -> bool {
        if let Some(existing) = self.0.iter_mut().find(|tv| tv.tag == tag) {
            existing.value = value;
            return true;
        }
        if add_if_not_found {
            self.0.push(TagValue { tag, value });
            return true;
        }
        false
    }

    /// Remove a value. Returns the removed value.
    pub fn remove(&mut self, tag: &Tag) -> Option<f32> {
        let pos = self.0.iter().position(|tv| tv.tag == *tag)?;
        Some(self.0.remove(pos).value)
    }

    /// Whether an exact tag has a value
    pub fn contains(&self, tag: &Tag) -> bool {
        self.0.iter().any(|tv| tv.tag == *tag)
    }

    /// Iterate over values
    pub fn iter(&self) -> impl Iterator<Item = &TagValue> {
        self.0.iter()
    }

    /// Number of values
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no values
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<TagValue> for TagValues {
    fn from_iter<I: IntoIterator<Item = TagValue>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Boolean expression over a tag set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagQuery {
    /// At least one tag matches
    AnyTagsMatch(TagSet),
    /// Every tag matches
    AllTagsMatch(TagSet),
    /// No tag matches
    NoTagsMatch(TagSet),
    /// At least one sub-expression holds
    AnyExprMatch(Vec<TagQuery>),
    /// Every sub-expression holds
    AllExprMatch(Vec<TagQuery>),
    /// No sub-expression holds
    NoExprMatch(Vec<TagQuery>),
}

impl TagQuery {
    /// Evaluate against a tag set
    pub fn matches(&self, tags: &TagSet) -> bool {
        match self {
            Self::AnyTagsMatch(set) => tags.has_any(set),
            Self::AllTagsMatch(set) => tags.has_all(set),
            Self::NoTagsMatch(set) => !tags.has_any(set),
            Self::AnyExprMatch(exprs) => exprs.iter().any(|q| q.matches(tags)),
            Self::AllExprMatch(exprs) => exprs.iter().all(|q| q.matches(tags)),
            Self::NoExprMatch(exprs) => !exprs.iter().any(|q| q.matches(tags)),
        }
    }
}

/// Entity a tag value is being set on
#[derive(Debug, Clone, Copy)]
pub enum TagValueOwner<'a> {
    Item(&'a Item),
    Container(&'a Container),
    Instance { tags: &'a TagSet, values: &'a TagValues },
}

impl<'a> TagValueOwner<'a> {
    /// Tag values currently held by the owner
    pub fn values(&self) -> &'a TagValues {
        match self {
            Self::Item(item) => &item.tag_values,
            Self::Container(container) => &container.tag_values,
            Self::Instance { values, .. } => values,
        }
    }

    /// Tags currently held by the owner
    pub fn tags(&self) -> &'a TagSet {
        match self {
            Self::Item(item) => &item.tags,
            Self::Container(container) => &container.tags,
            Self::Instance { tags, .. } => tags,
        }
    }
}

/// Hook run before a tag value is committed
pub trait TagValueCalculation: Send + Sync {
    /// Value to store
    fn calculate(&self, tag_value: &TagValue, _owner: TagValueOwner<'_>) -> f32 {
        tag_value.value
    }

    /// Whether the tag value should be removed instead of stored
    fn should_be_removed(&self, _tag_value: &TagValue, _owner: TagValueOwner<'_>) -> bool {
        false
    }
}

/// Clamps a value between `min` and the owner's value for `max_tag`.
///
/// Removes the value once it reaches `min` if `remove_at_min` is set.
#[derive(Debug, Clone)]
pub struct ClampToTagValue {
    pub max_tag: Tag,
    pub min: f32,
    pub remove_at_min: bool,
}

impl ClampToTagValue {
    /// Clamp against `max_tag`, floor at zero
    pub fn new(max_tag: impl Into<Tag>) -> Self {
        Self {
            max_tag: max_tag.into(),
            min: 0.0,
            remove_at_min: false,
        }
    }

    /// Remove the value when it bottoms out
    pub fn removing_at_min(mut self) -> Self {
        self.remove_at_min = true;
        self
    }
}

impl TagValueCalculation for ClampToTagValue {
    fn calculate(&self, tag_value: &TagValue, owner: TagValueOwner<'_>) -> f32 {
        let value = tag_value.value.max(self.min);
        match owner.values().get(&self.max_tag) {
            Some(max) => value.min(max),
            None => value,
        }
    }

    fn should_be_removed(&self, tag_value: &TagValue, owner: TagValueOwner<'_>) -> bool {
        self.remove_at_min && self.calculate(tag_value, owner) <= self.min
    }
}

/// Calculation hooks addressable by name
#[derive(Default, Clone)]
pub struct CalculationRegistry {
    hooks: HashMap<String, Arc<dyn TagValueCalculation>>,
}

impl CalculationRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook under `name`
    pub fn register(&mut self, name: impl Into<String>, hook: impl TagValueCalculation + 'static) {
        self.hooks.insert(name.into(), Arc::new(hook));
    }

    /// Builder form of [`register`](Self::register)
    pub fn with(mut self, name: impl Into<String>, hook: impl TagValueCalculation + 'static) -> Self {
        self.register(name, hook);
        self
    }

    /// Look up a hook
    pub fn get(&self, name: &str) -> Option<&Arc<dyn TagValueCalculation>> {
        self.hooks.get(name)
    }

    /// Whether a hook is registered
    pub fn contains(&self, name: &str) -> bool {
        self.hooks.contains_key(name)
    }
}

impl fmt::Debug for CalculationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalculationRegistry")
            .field("hooks", &self.hooks.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Run an optional hook over a proposed value.
///
/// Returns `None` when the hook asks for removal.
pub fn apply_calculation(
    hook: Option<&dyn TagValueCalculation>,
    proposed: TagValue,
    owner: TagValueOwner<'_>,
) -> Option<f32> {
    match hook {
        None => Some(proposed.value),
        Some(hook) => {
            if hook.should_be_removed(&proposed, owner) {
                None
            } else {
                Some(hook.calculate(&proposed, owner))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hierarchical_match() {
        let gun = Tag::new("Item.Type.Weapon.Gun");
        assert!(gun.matches(&Tag::new("Item.Type.Weapon")));
        assert!(gun.matches(&gun));
        assert!(!gun.matches(&Tag::new("Item.Type.Weap")));
        assert!(!Tag::new("Item.Type").matches(&gun));
        assert_eq!(gun.parent(), Some(Tag::new("Item.Type.Weapon")));
    }

    #[test]
    fn test_tag_set_queries() {
        let tags: TagSet = ["Item.Type.Weapon.Gun", "Item.Rarity.Rare"].into_iter().collect();
        assert!(tags.has(&Tag::new("Item.Type")));
        let required: TagSet = ["Item.Type.Weapon", "Item.Rarity"].into_iter().collect();
        assert!(tags.has_all(&required));
        let blocking: TagSet = ["Item.Quest"].into_iter().collect();
        assert!(!tags.has_any(&blocking));
    }

    #[test]
    fn test_tag_query_expressions() {
        let tags: TagSet = ["Item.Type.Food", "Item.State.Cooked"].into_iter().collect();
        let query = TagQuery::AllExprMatch(vec![
            TagQuery::AnyTagsMatch(["Item.Type.Food"].into_iter().collect()),
            TagQuery::NoTagsMatch(["Item.State.Rotten"].into_iter().collect()),
        ]);
        assert!(query.matches(&tags));
        let rotten: TagSet = ["Item.Type.Food", "Item.State.Rotten"].into_iter().collect();
        assert!(!query.matches(&rotten));
    }

    #[test]
    fn test_tag_values_set_and_remove() {
        let mut values = TagValues::new();
        let durability = Tag::new("Item.Durability");
        assert!(!values.set(durability.clone(), 10.0, false));
        assert!(values.set(durability.clone(), 10.0, true));
        assert!(values.set(durability.clone(), 4.0, false));
        assert_eq!(values.get(&durability), Some(4.0));
        assert_eq!(values.remove(&durability), Some(4.0));
        assert!(values.is_empty());
    }

    #[test]
    fn test_clamp_calculation() {
        let values: TagValues = [TagValue::new("Item.MaxDurability", 50.0)].into_iter().collect();
        let tags = TagSet::new();
        let owner = TagValueOwner::Instance { tags: &tags, values: &values };
        let clamp = ClampToTagValue::new("Item.MaxDurability").removing_at_min();
        let hook: &dyn TagValueCalculation = &clamp;
        assert_eq!(apply_calculation(Some(hook), TagValue::new("Item.Durability", 80.0), owner), Some(50.0));
        assert_eq!(apply_calculation(Some(hook), TagValue::new("Item.Durability", -3.0), owner), None);
        assert_eq!(apply_calculation(None, TagValue::new("Item.Durability", -3.0), owner), Some(-3.0));
    }
}
