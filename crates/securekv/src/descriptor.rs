//! Key descriptors.
//!
//! A [`KeyDescriptor`] names one logical secret: the key string, the bridge
//! that converts its value, optional item metadata, and optional per-key
//! policy overrides. Descriptors are immutable once built and are usually
//! declared once, next to the code that uses them:
//!
//! ```rust
//! use securekv::{JsonKey, Key};
//!
//! let token = Key::<String>::new("api-token").label("API token");
//! let retries = Key::<u32>::new("retry-count");
//! let profile = JsonKey::<Vec<String>>::new("recent-files");
//! # let _ = (token, retries, profile);
//! ```

use std::fmt;
use std::marker::PhantomData;

use crate::attributes::{Accessibility, Attribute, AttributeSet, names};
use crate::bridge::{ArchiveBridge, JsonBridge, Storable, ValueBridge};

/// Optional item metadata written alongside the payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub label: Option<String>,
    pub comment: Option<String>,
    pub description: Option<String>,
    pub is_invisible: Option<bool>,
    pub is_negative: Option<bool>,
    pub generic: Option<Vec<u8>>,
    pub creator: Option<u32>,
    pub item_type: Option<u32>,
}

impl Metadata {
    /// Append the populated fields to `set`.
    pub(crate) fn append_to(&self, set: &mut AttributeSet) {
        set.push_opt(self.label.clone().map(Attribute::Label));
        set.push_opt(self.comment.clone().map(Attribute::Comment));
        set.push_opt(self.description.clone().map(Attribute::Description));
        set.push_opt(self.is_invisible.map(Attribute::IsInvisible));
        set.push_opt(self.is_negative.map(Attribute::IsNegative));
        set.push_opt(self.generic.clone().map(Attribute::Generic));
        set.push_opt(self.creator.map(Attribute::Creator));
        set.push_opt(self.item_type.map(Attribute::ItemType));
    }

    /// Native names of the fields left unset.
    pub(crate) fn unset_names(&self) -> Vec<&'static str> {
        [
            (self.label.is_none(), names::LABEL),
            (self.comment.is_none(), names::COMMENT),
            (self.description.is_none(), names::DESCRIPTION),
            (self.is_invisible.is_none(), names::IS_INVISIBLE),
            (self.is_negative.is_none(), names::IS_NEGATIVE),
            (self.generic.is_none(), names::GENERIC),
            (self.creator.is_none(), names::CREATOR),
            (self.item_type.is_none(), names::TYPE),
        ]
        .into_iter()
        .filter_map(|(unset, name)| unset.then_some(name))
        .collect()
    }
}

/// Identifies one stored value of type `V`, converted by bridge `B`.
pub struct KeyDescriptor<V, B> {
    key: String,
    bridge: B,
    metadata: Metadata,
    accessibility: Option<Accessibility>,
    synchronizable: Option<bool>,
    _value: PhantomData<fn() -> V>,
}

/// Descriptor using the value type's default bridge.
pub type Key<V> = KeyDescriptor<V, <V as Storable>::Bridge>;

/// Descriptor storing a serde type as JSON.
pub type JsonKey<V> = KeyDescriptor<V, JsonBridge>;

/// Descriptor storing an `rkyv` type as an archive.
pub type ArchivedKey<V> = KeyDescriptor<V, ArchiveBridge>;

impl<V, B> KeyDescriptor<V, B>
where
    B: ValueBridge<V> + Default,
{
    pub fn new(key: impl Into<String>) -> Self {
        Self::with_bridge(key, B::default())
    }
}

impl<V, B> KeyDescriptor<V, B>
where
    B: ValueBridge<V>,
{
    /// Descriptor with an explicit bridge instance.
    pub fn with_bridge(key: impl Into<String>, bridge: B) -> Self {
        Self {
            key: key.into(),
            bridge,
            metadata: Metadata::default(),
            accessibility: None,
            synchronizable: None,
            _value: PhantomData,
        }
    }
}

impl<V, B> KeyDescriptor<V, B> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn bridge(&self) -> &B {
        &self.bridge
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Per-key accessibility override; `None` defers to the store.
    pub fn accessibility_override(&self) -> Option<Accessibility> {
        self.accessibility
    }

    /// Per-key synchronizable override; `None` defers to the store.
    pub fn synchronizable_override(&self) -> Option<bool> {
        self.synchronizable
    }

    // -- Builder ------------------------------------------------------------

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.metadata.label = Some(label.into());
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.metadata.comment = Some(comment.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.metadata.description = Some(description.into());
        self
    }

    pub fn invisible(mut self, invisible: bool) -> Self {
        self.metadata.is_invisible = Some(invisible);
        self
    }

    pub fn negative(mut self, negative: bool) -> Self {
        self.metadata.is_negative = Some(negative);
        self
    }

    pub fn generic(mut self, generic: impl Into<Vec<u8>>) -> Self {
        self.metadata.generic = Some(generic.into());
        self
    }

    pub fn creator(mut self, creator: u32) -> Self {
        self.metadata.creator = Some(creator);
        self
    }

    pub fn item_type(mut self, item_type: u32) -> Self {
        self.metadata.item_type = Some(item_type);
        self
    }

    pub fn accessibility(mut self, accessibility: Accessibility) -> Self {
        self.accessibility = Some(accessibility);
        self
    }

    pub fn synchronizable(mut self, synchronizable: bool) -> Self {
        self.synchronizable = Some(synchronizable);
        self
    }
}

impl<V, B: Clone> Clone for KeyDescriptor<V, B> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            bridge: self.bridge.clone(),
            metadata: self.metadata.clone(),
            accessibility: self.accessibility,
            synchronizable: self.synchronizable,
            _value: PhantomData,
        }
    }
}

impl<V, B> fmt::Debug for KeyDescriptor<V, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyDescriptor")
            .field("key", &self.key)
            .field("value", &std::any::type_name::<V>())
            .field("metadata", &self.metadata)
            .field("accessibility", &self.accessibility)
            .field("synchronizable", &self.synchronizable)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{BridgeKind, NumericBridge, TextBridge};

    #[test]
    fn default_bridge_follows_value_type() {
        let key = Key::<u32>::new("count");
        assert_eq!(key.key(), "count");
        assert_eq!(<NumericBridge as ValueBridge<u32>>::KIND, BridgeKind::Numeric);
        let _: &NumericBridge = key.bridge();

        let text = Key::<String>::new("name");
        let _: &TextBridge = text.bridge();
    }

    #[test]
    fn builder_sets_metadata_and_overrides() {
        let key = Key::<String>::new("token")
            .label("Token")
            .comment("issued by ci")
            .description("bearer token")
            .invisible(true)
            .negative(false)
            .generic(vec![9, 9])
            .creator(1)
            .item_type(2)
            .accessibility(Accessibility::WhenUnlocked)
            .synchronizable(true);

        let meta = key.metadata();
        assert_eq!(meta.label.as_deref(), Some("Token"));
        assert_eq!(meta.comment.as_deref(), Some("issued by ci"));
        assert_eq!(meta.description.as_deref(), Some("bearer token"));
        assert_eq!(meta.is_invisible, Some(true));
        assert_eq!(meta.is_negative, Some(false));
        assert_eq!(meta.generic.as_deref(), Some(&[9u8, 9][..]));
        assert_eq!(meta.creator, Some(1));
        assert_eq!(meta.item_type, Some(2));
        assert_eq!(key.accessibility_override(), Some(Accessibility::WhenUnlocked));
        assert_eq!(key.synchronizable_override(), Some(true));
    }

    #[test]
    fn unset_metadata_adds_no_attributes() {
        let key = Key::<bool>::new("flag");
        let mut set = AttributeSet::new();
        key.metadata().append_to(&mut set);
        assert!(set.is_empty());
        assert_eq!(key.accessibility_override(), None);
    }

    #[test]
    fn metadata_appends_attributes() {
        let key = JsonKey::<Vec<String>>::new("recent").label("Recent").creator(7);
        let mut set = AttributeSet::new();
        key.metadata().append_to(&mut set);
        assert_eq!(set.label(), Some("Recent"));
        assert_eq!(set.creator(), Some(7));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn unset_names_cover_missing_fields() {
        let bare = Key::<bool>::new("flag");
        assert_eq!(bare.metadata().unset_names().len(), 8);

        let labelled = Key::<bool>::new("flag").label("Flag").creator(3);
        let unset = labelled.metadata().unset_names();
        assert!(!unset.contains(&names::LABEL));
        assert!(!unset.contains(&names::CREATOR));
        assert!(unset.contains(&names::COMMENT));
        assert_eq!(unset.len(), 6);
    }
}
