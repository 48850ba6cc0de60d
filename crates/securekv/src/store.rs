//! Typed CRUD over a vault.
//!
//! A [`SecureStore`] owns a [`StoreIdentity`] (item class, identity
//! attributes and policy defaults) and a [`Vault`]. Every operation composes
//! an [`AttributeSet`] from the identity and a [`KeyDescriptor`], makes one
//! vault round trip (two or more for `set`), and classifies the returned
//! status.
//!
//! # Upsert
//!
//! `set` probes for the item first:
//!
//! ```text
//! Start -> Probe -+-> found     -> Update -> Done
//!                 +-> not found -> Insert -> Done
//!                 +-> other     -> Error
//! ```
//!
//! An update replaces the whole item. When the stored item carries metadata
//! the new descriptor leaves unset, the item is deleted and re-inserted with
//! its creation date, and restored if the insert fails.
//!
//! An insert that loses a race with another writer surfaces
//! [`StoreError::Duplicate`]; nothing is retried automatically.

use std::sync::Arc;

use crate::attributes::{
    Accessibility, Attribute, AttributeSet, AuthScheme, ItemClass, MatchLimit, NativeQuery,
    NativeValue, ProtocolScheme, names,
};
use crate::bridge::ValueBridge;
use crate::config::StoreConfig;
use crate::descriptor::KeyDescriptor;
use crate::error::{Result, StoreError};
use crate::status::Status;
use crate::vault::{self, BackendError, MemoryVault, Payload, Vault};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Attributes that, together with the key, address an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityAttributes {
    /// Generic secret under a service name.
    Generic { service: String },
    /// Network credential for a server.
    Network(NetworkIdentity),
}

/// Server, protocol and optional qualifiers of a network credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkIdentity {
    pub server: String,
    pub protocol: ProtocolScheme,
    pub port: Option<u16>,
    pub path: Option<String>,
    pub auth_scheme: AuthScheme,
    pub security_domain: Option<String>,
}

impl NetworkIdentity {
    pub fn new(server: impl Into<String>, protocol: ProtocolScheme) -> Self {
        Self {
            server: server.into(),
            protocol,
            port: None,
            path: None,
            auth_scheme: AuthScheme::default(),
            security_domain: None,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn auth_scheme(mut self, scheme: AuthScheme) -> Self {
        self.auth_scheme = scheme;
        self
    }

    pub fn security_domain(mut self, domain: impl Into<String>) -> Self {
        self.security_domain = Some(domain.into());
        self
    }
}

/// Item class, identity and policy defaults shared by every key of a store.
///
/// Fixed for the lifetime of the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreIdentity {
    attributes: IdentityAttributes,
    accessibility: Accessibility,
    synchronizable: bool,
    access_group: Option<String>,
}

impl StoreIdentity {
    /// Generic secrets under `service`, with default policy.
    pub fn generic(service: impl Into<String>) -> Self {
        Self::with_attributes(IdentityAttributes::Generic {
            service: service.into(),
        })
    }

    /// Network credentials for `network`, with default policy.
    pub fn network(network: NetworkIdentity) -> Self {
        Self::with_attributes(IdentityAttributes::Network(network))
    }

    fn with_attributes(attributes: IdentityAttributes) -> Self {
        Self {
            attributes,
            accessibility: Accessibility::default(),
            synchronizable: false,
            access_group: None,
        }
    }

    /// Generic identity taking service and policy from `config`.
    pub fn from_config(config: &StoreConfig) -> Self {
        Self::generic(config.service.clone()).with_policy_from(config)
    }

    /// Network identity taking policy and auth scheme from `config`.
    pub fn network_from_config(
        config: &StoreConfig,
        server: impl Into<String>,
        protocol: ProtocolScheme,
    ) -> Self {
        let network = NetworkIdentity::new(server, protocol).auth_scheme(config.auth_scheme);
        Self::network(network).with_policy_from(config)
    }

    fn with_policy_from(mut self, config: &StoreConfig) -> Self {
        self.accessibility = config.accessibility;
        self.synchronizable = config.synchronizable;
        self.access_group = config.access_group.clone();
        self
    }

    pub fn accessibility(mut self, accessibility: Accessibility) -> Self {
        self.accessibility = accessibility;
        self
    }

    pub fn synchronizable(mut self, synchronizable: bool) -> Self {
        self.synchronizable = synchronizable;
        self
    }

    pub fn access_group(mut self, group: impl Into<String>) -> Self {
        self.access_group = Some(group.into());
        self
    }

    pub fn item_class(&self) -> ItemClass {
        match self.attributes {
            IdentityAttributes::Generic { .. } => ItemClass::GenericSecret,
            IdentityAttributes::Network(_) => ItemClass::NetworkSecret,
        }
    }

    pub fn attributes(&self) -> &IdentityAttributes {
        &self.attributes
    }

    pub fn default_accessibility(&self) -> Accessibility {
        self.accessibility
    }

    pub fn default_synchronizable(&self) -> bool {
        self.synchronizable
    }

    pub fn default_access_group(&self) -> Option<&str> {
        self.access_group.as_deref()
    }

    /// Class, identity, access group and sync: the query for every item of
    /// this identity in one sync domain.
    fn query(&self, synchronizable: bool) -> AttributeSet {
        let mut set = AttributeSet::new().with(Attribute::Class(self.item_class()));
        match &self.attributes {
            IdentityAttributes::Generic { service } => {
                set.push(Attribute::Service(service.clone()));
            }
            IdentityAttributes::Network(net) => {
                set.push(Attribute::Server(net.server.clone()));
                set.push(Attribute::Protocol(net.protocol));
                set.push_opt(net.port.map(Attribute::Port));
                set.push_opt(net.path.clone().map(Attribute::Path));
                set.push(Attribute::AuthenticationType(net.auth_scheme));
                set.push_opt(net.security_domain.clone().map(Attribute::SecurityDomain));
            }
        }
        set.push_opt(self.access_group.clone().map(Attribute::AccessGroup));
        set.push(Attribute::Synchronizable(synchronizable));
        set
    }
}

/// Sync is policy, not identity: bulk operations cover both domains.
const SYNC_DOMAINS: [bool; 2] = [false, true];

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Typed secure key-value store.
///
/// All calls are synchronous and complete after their vault round trips.
/// The store holds no lock of its own; share it freely across threads.
#[derive(Clone)]
pub struct SecureStore {
    identity: StoreIdentity,
    vault: Arc<dyn Vault>,
}

impl std::fmt::Debug for SecureStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureStore")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl SecureStore {
    pub fn new(identity: StoreIdentity, vault: Arc<dyn Vault>) -> Self {
        Self { identity, vault }
    }

    /// Store backed by a fresh [`MemoryVault`].
    pub fn in_memory(identity: StoreIdentity) -> Self {
        Self::new(identity, Arc::new(MemoryVault::new()))
    }

    /// Store for `config` over the platform vault.
    pub fn open(config: &StoreConfig) -> std::result::Result<Self, BackendError> {
        let vault = vault::platform_vault(config)?;
        Ok(Self::new(StoreIdentity::from_config(config), vault))
    }

    pub fn identity(&self) -> &StoreIdentity {
        &self.identity
    }

    pub fn vault(&self) -> &Arc<dyn Vault> {
        &self.vault
    }

    // -- Queries ------------------------------------------------------------

    fn effective_sync<V, B>(&self, key: &KeyDescriptor<V, B>) -> bool {
        key.synchronizable_override()
            .unwrap_or(self.identity.synchronizable)
    }

    /// Identity + key: addresses exactly one item.
    fn lookup<V, B>(&self, key: &KeyDescriptor<V, B>) -> AttributeSet {
        self.identity
            .query(self.effective_sync(key))
            .with(Attribute::Account(key.key().to_string()))
    }

    /// Payload plus policy and metadata attributes written on every save.
    fn write_attributes<V, B>(&self, key: &KeyDescriptor<V, B>, data: Vec<u8>) -> AttributeSet {
        let mut set = AttributeSet::new()
            .with(Attribute::ValueData(data))
            .with(Attribute::Accessible(
                key.accessibility_override()
                    .unwrap_or(self.identity.accessibility),
            ));
        key.metadata().append_to(&mut set);
        set
    }

    fn classify(&self, operation: &'static str, status: Status, key: Option<&str>) -> StoreError {
        let err = StoreError::from_status(status, key);
        if err.is_retryable() {
            tracing::warn!(operation, key = key.unwrap_or("*"), %status, "vault refused operation");
        } else {
            tracing::error!(operation, key = key.unwrap_or("*"), %status, "vault operation failed");
        }
        err
    }

    // -- CRUD ---------------------------------------------------------------

    /// Save `value` under `key`, updating the item in place if it exists.
    pub fn set<V, B>(&self, value: &V, key: &KeyDescriptor<V, B>) -> Result<()>
    where
        B: ValueBridge<V>,
    {
        let data = key.bridge().encode(value)?;
        tracing::trace!(key = %key.key(), bytes = data.len(), kind = %B::KIND, "encoded value");

        let lookup = self.lookup(key);
        let probe_query = lookup
            .clone()
            .with(Attribute::ReturnAttributes(true))
            .with(Attribute::ReturnData(true))
            .with(Attribute::MatchLimit(MatchLimit::One));
        let reply = self.vault.fetch(&probe_query.compose());
        let probe = Status::from_code(reply.status);
        tracing::debug!(key = %key.key(), status = %probe, "probed item");

        match probe {
            Status::Success => {
                if let Some(Payload::Attributes(stored)) = reply.payload {
                    let stale = key
                        .metadata()
                        .unset_names()
                        .into_iter()
                        .any(|name| stored.contains_key(name));
                    if stale {
                        return self.replace(key, lookup, data, stored);
                    }
                }
                let changes = self.write_attributes(key, data.clone());
                let status = Status::from_code(
                    self.vault.update(&lookup.compose(), &changes.compose()),
                );
                match status {
                    Status::Success => {
                        tracing::info!(key = %key.key(), "updated item");
                        Ok(())
                    }
                    // Removed between probe and update; the item is absent
                    // again, so the insert path applies.
                    Status::ItemNotFound => self.insert(key, lookup, data),
                    other => Err(self.classify("update", other, Some(key.key()))),
                }
            }
            Status::ItemNotFound => self.insert(key, lookup, data),
            other => Err(self.classify("probe", other, Some(key.key()))),
        }
    }

    fn insert<V, B>(
        &self,
        key: &KeyDescriptor<V, B>,
        lookup: AttributeSet,
        data: Vec<u8>,
    ) -> Result<()> {
        let mut record = lookup;
        record.extend(self.write_attributes(key, data));
        match Status::from_code(self.vault.insert(&record.compose())) {
            Status::Success => {
                tracing::info!(key = %key.key(), "inserted item");
                Ok(())
            }
            other => Err(self.classify("insert", other, Some(key.key()))),
        }
    }

    /// Delete and re-insert, dropping metadata the descriptor leaves unset.
    ///
    /// `stored` is the previous item with its payload; it is put back if the
    /// new record cannot be inserted.
    fn replace<V, B>(
        &self,
        key: &KeyDescriptor<V, B>,
        lookup: AttributeSet,
        data: Vec<u8>,
        stored: NativeQuery,
    ) -> Result<()> {
        match Status::from_code(self.vault.delete(&lookup.compose())) {
            Status::Success | Status::ItemNotFound => {}
            other => return Err(self.classify("replace", other, Some(key.key()))),
        }

        let mut record = lookup;
        record.extend(self.write_attributes(key, data));
        record.push_opt(
            AttributeSet::parse(&stored)
                .creation_date()
                .map(Attribute::CreationDate),
        );
        match Status::from_code(self.vault.insert(&record.compose())) {
            Status::Success => {
                tracing::info!(key = %key.key(), "replaced item");
                Ok(())
            }
            other => {
                let restored = Status::from_code(self.vault.insert(&stored));
                if restored != Status::Success {
                    tracing::error!(key = %key.key(), status = %restored, "previous item could not be restored");
                }
                Err(self.classify("replace", other, Some(key.key())))
            }
        }
    }

    /// Read the value stored under `key`; `None` if there is none.
    pub fn get<V, B>(&self, key: &KeyDescriptor<V, B>) -> Result<Option<V>>
    where
        B: ValueBridge<V>,
    {
        let query = self
            .lookup(key)
            .with(Attribute::ReturnData(true))
            .with(Attribute::MatchLimit(MatchLimit::One));
        let reply = self.vault.fetch(&query.compose());

        match Status::from_code(reply.status) {
            Status::Success => {}
            Status::ItemNotFound => {
                tracing::debug!(key = %key.key(), "item not found");
                return Ok(None);
            }
            other => return Err(self.classify("get", other, Some(key.key()))),
        }

        let bytes = match reply.payload {
            Some(Payload::Data(bytes)) => bytes,
            Some(Payload::Attributes(mut attrs)) => match attrs.remove(names::VALUE_DATA) {
                Some(NativeValue::Data(bytes)) => bytes,
                _ => return Err(missing_payload::<V, B>(key)),
            },
            _ => return Err(missing_payload::<V, B>(key)),
        };
        tracing::debug!(key = %key.key(), bytes = bytes.len(), "read item");

        key.bridge().decode(&bytes).map(Some).inspect_err(|err| {
            tracing::warn!(key = %key.key(), error = %err, "stored bytes rejected by bridge");
        })
    }

    /// Like [`get`](Self::get), falling back to `default` when absent.
    pub fn get_or<V, B>(&self, key: &KeyDescriptor<V, B>, default: V) -> Result<V>
    where
        B: ValueBridge<V>,
    {
        Ok(self.get(key)?.unwrap_or(default))
    }

    /// Whether an item exists under `key`.
    pub fn contains<V, B>(&self, key: &KeyDescriptor<V, B>) -> Result<bool> {
        let reply = self.vault.fetch(&self.lookup(key).compose());
        match Status::from_code(reply.status) {
            Status::Success => Ok(true),
            Status::ItemNotFound => Ok(false),
            other => Err(self.classify("contains", other, Some(key.key()))),
        }
    }

    /// Delete the item under `key`. Succeeds if it was already absent.
    pub fn remove<V, B>(&self, key: &KeyDescriptor<V, B>) -> Result<()> {
        match Status::from_code(self.vault.delete(&self.lookup(key).compose())) {
            Status::Success => {
                tracing::info!(key = %key.key(), "removed item");
                Ok(())
            }
            Status::ItemNotFound => {
                tracing::debug!(key = %key.key(), "remove: item already absent");
                Ok(())
            }
            other => Err(self.classify("remove", other, Some(key.key()))),
        }
    }

    /// Delete every item of this store's identity, synchronized or not.
    /// Succeeds on an empty store.
    pub fn remove_all(&self) -> Result<()> {
        for sync in SYNC_DOMAINS {
            let query = self.identity.query(sync);
            match Status::from_code(self.vault.delete(&query.compose())) {
                Status::Success | Status::ItemNotFound => {}
                other => return Err(self.classify("remove_all", other, None)),
            }
        }
        tracing::info!(class = %self.identity.item_class(), "removed all items");
        Ok(())
    }

    /// Stored attributes of the item under `key`, payload excluded.
    pub fn attributes<V, B>(&self, key: &KeyDescriptor<V, B>) -> Result<Option<AttributeSet>> {
        let query = self
            .lookup(key)
            .with(Attribute::ReturnAttributes(true))
            .with(Attribute::MatchLimit(MatchLimit::One));
        let reply = self.vault.fetch(&query.compose());
        match Status::from_code(reply.status) {
            Status::Success => match reply.payload {
                Some(Payload::Attributes(attrs)) => Ok(Some(AttributeSet::parse(&attrs))),
                _ => Err(self.classify("attributes", Status::Decode, Some(key.key()))),
            },
            Status::ItemNotFound => Ok(None),
            other => Err(self.classify("attributes", other, Some(key.key()))),
        }
    }

    /// Every key stored under this store's identity, sorted.
    pub fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for sync in SYNC_DOMAINS {
            let query = self
                .identity
                .query(sync)
                .with(Attribute::ReturnAttributes(true))
                .with(Attribute::MatchLimit(MatchLimit::All));
            let reply = self.vault.fetch(&query.compose());
            let items = match Status::from_code(reply.status) {
                Status::Success => match reply.payload {
                    Some(Payload::Items(items)) => items,
                    Some(Payload::Attributes(attrs)) => vec![attrs],
                    _ => Vec::new(),
                },
                Status::ItemNotFound => Vec::new(),
                other => return Err(self.classify("keys", other, None)),
            };
            keys.extend(
                items
                    .iter()
                    .filter_map(|attrs| AttributeSet::parse(attrs).account().map(str::to_string)),
            );
        }

        keys.sort();
        keys.dedup();
        tracing::debug!(count = keys.len(), "listed keys");
        Ok(keys)
    }
}

fn missing_payload<V, B: ValueBridge<V>>(key: &KeyDescriptor<V, B>) -> StoreError {
    tracing::warn!(key = %key.key(), "vault returned no payload for a data request");
    StoreError::InvalidDataCast {
        expected: B::KIND,
        reason: "vault returned no data".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Key;
    use crate::vault::VaultReply;

    fn store() -> SecureStore {
        SecureStore::in_memory(StoreIdentity::generic("test-service"))
    }

    #[test]
    fn set_then_get() {
        let store = store();
        let key = Key::<String>::new("greeting");
        store.set(&"hello".to_string(), &key).unwrap();
        assert_eq!(store.get(&key).unwrap().as_deref(), Some("hello"));
    }

    #[test]
    fn second_set_updates_in_place() {
        let vault = Arc::new(MemoryVault::new());
        let store = SecureStore::new(StoreIdentity::generic("svc"), vault.clone());
        let key = Key::<u64>::new("counter");
        store.set(&1, &key).unwrap();
        store.set(&2, &key).unwrap();
        assert_eq!(store.get(&key).unwrap(), Some(2));
        assert_eq!(vault.len(), 1);
    }

    #[test]
    fn missing_key_reads_none() {
        let store = store();
        let key = Key::<bool>::new("flag");
        assert_eq!(store.get(&key).unwrap(), None);
        assert!(!store.contains(&key).unwrap());
        assert!(store.get_or(&key, true).unwrap());
        store.remove(&key).unwrap();
        assert_eq!(store.attributes(&key).unwrap(), None);
    }

    #[test]
    fn identities_do_not_see_each_other() {
        let vault: Arc<dyn Vault> = Arc::new(MemoryVault::new());
        let a = SecureStore::new(StoreIdentity::generic("a"), vault.clone());
        let b = SecureStore::new(StoreIdentity::generic("b"), vault);
        let key = Key::<String>::new("shared-name");
        a.set(&"from a".to_string(), &key).unwrap();
        assert_eq!(b.get(&key).unwrap(), None);
        b.remove_all().unwrap();
        assert_eq!(a.get(&key).unwrap().as_deref(), Some("from a"));
    }

    #[test]
    fn network_identity_round_trip() {
        let identity = StoreIdentity::network(
            NetworkIdentity::new("example.com", ProtocolScheme::Https)
                .port(443)
                .path("/login")
                .auth_scheme(AuthScheme::HtmlForm),
        );
        assert_eq!(identity.item_class(), ItemClass::NetworkSecret);
        let store = SecureStore::in_memory(identity);
        let key = Key::<String>::new("alice");
        store.set(&"pw".to_string(), &key).unwrap();

        let attrs = store.attributes(&key).unwrap().unwrap();
        assert_eq!(attrs.server(), Some("example.com"));
        assert_eq!(attrs.protocol(), Some(ProtocolScheme::Https));
        assert_eq!(attrs.port(), Some(443));
        assert_eq!(attrs.path(), Some("/login"));
        assert_eq!(attrs.authentication_type(), Some(AuthScheme::HtmlForm));
        assert_eq!(attrs.account(), Some("alice"));
    }

    #[test]
    fn identity_from_config() {
        let config = StoreConfig {
            service: "cfg".into(),
            accessibility: Accessibility::WhenUnlocked,
            synchronizable: true,
            access_group: Some("grp".into()),
            ..StoreConfig::default()
        };
        let identity = StoreIdentity::from_config(&config);
        assert_eq!(
            identity.attributes(),
            &IdentityAttributes::Generic {
                service: "cfg".into()
            }
        );
        assert_eq!(identity.default_accessibility(), Accessibility::WhenUnlocked);
        assert!(identity.default_synchronizable());
        assert_eq!(identity.default_access_group(), Some("grp"));

        let network = StoreIdentity::network_from_config(
            &StoreConfig {
                auth_scheme: AuthScheme::HttpDigest,
                ..StoreConfig::default()
            },
            "host",
            ProtocolScheme::Http,
        );
        let IdentityAttributes::Network(net) = network.attributes() else {
            panic!("expected network identity");
        };
        assert_eq!(net.auth_scheme, AuthScheme::HttpDigest);
    }

    #[test]
    fn per_key_overrides_win() {
        let store = SecureStore::in_memory(
            StoreIdentity::generic("svc").accessibility(Accessibility::WhenUnlocked),
        );
        let plain = Key::<String>::new("plain");
        let strict = Key::<String>::new("strict")
            .accessibility(Accessibility::WhenPasscodeSetThisDeviceOnly);
        store.set(&"x".to_string(), &plain).unwrap();
        store.set(&"y".to_string(), &strict).unwrap();

        assert_eq!(
            store.attributes(&plain).unwrap().unwrap().accessibility(),
            Some(Accessibility::WhenUnlocked)
        );
        assert_eq!(
            store.attributes(&strict).unwrap().unwrap().accessibility(),
            Some(Accessibility::WhenPasscodeSetThisDeviceOnly)
        );
    }

    #[test]
    fn keys_are_listed_sorted() {
        let store = store();
        assert!(store.keys().unwrap().is_empty());
        for name in ["b", "c", "a"] {
            store.set(&1u8, &Key::<u8>::new(name)).unwrap();
        }
        assert_eq!(store.keys().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn bulk_operations_cover_both_sync_domains() {
        let store = store();
        let synced = Key::<String>::new("synced").synchronizable(true);
        let plain = Key::<String>::new("plain");
        store.set(&"a".to_string(), &synced).unwrap();
        store.set(&"b".to_string(), &plain).unwrap();
        assert_eq!(store.keys().unwrap(), vec!["plain", "synced"]);

        store.remove_all().unwrap();
        assert_eq!(store.get(&synced).unwrap(), None);
        assert_eq!(store.get(&plain).unwrap(), None);
        assert!(store.keys().unwrap().is_empty());
    }

    #[test]
    fn update_drops_metadata_left_unset() {
        let vault = Arc::new(MemoryVault::new());
        let store = SecureStore::new(StoreIdentity::generic("svc"), vault.clone());
        store
            .set(&"v1".to_string(), &Key::<String>::new("k").label("Old").comment("C"))
            .unwrap();
        let created = store
            .attributes(&Key::<String>::new("k"))
            .unwrap()
            .unwrap()
            .creation_date();

        let bare = Key::<String>::new("k");
        store.set(&"v2".to_string(), &bare).unwrap();
        let attrs = store.attributes(&bare).unwrap().unwrap();
        assert_eq!(attrs.label(), None);
        assert_eq!(attrs.comment(), None);
        assert_eq!(attrs.creation_date(), created);
        assert_eq!(store.get(&bare).unwrap().as_deref(), Some("v2"));
        assert_eq!(vault.len(), 1);
    }

    /// Holds one item; refuses every insert.
    struct RefusesInsert {
        inner: MemoryVault,
        refuse: std::sync::atomic::AtomicBool,
    }

    impl Vault for RefusesInsert {
        fn fetch(&self, query: &NativeQuery) -> VaultReply {
            self.inner.fetch(query)
        }
        fn insert(&self, record: &NativeQuery) -> i32 {
            if self.refuse.swap(false, std::sync::atomic::Ordering::SeqCst) {
                return -34;
            }
            self.inner.insert(record)
        }
        fn update(&self, query: &NativeQuery, changes: &NativeQuery) -> i32 {
            self.inner.update(query, changes)
        }
        fn delete(&self, query: &NativeQuery) -> i32 {
            self.inner.delete(query)
        }
    }

    #[test]
    fn failed_replace_restores_previous_item() {
        let vault = Arc::new(RefusesInsert {
            inner: MemoryVault::new(),
            refuse: std::sync::atomic::AtomicBool::new(false),
        });
        let store = SecureStore::new(StoreIdentity::generic("svc"), vault.clone());
        let labelled = Key::<String>::new("k").label("Old");
        store.set(&"v1".to_string(), &labelled).unwrap();

        vault.refuse.store(true, std::sync::atomic::Ordering::SeqCst);
        assert!(store.set(&"v2".to_string(), &Key::<String>::new("k")).is_err());

        assert_eq!(store.get(&labelled).unwrap().as_deref(), Some("v1"));
        let attrs = store.attributes(&labelled).unwrap().unwrap();
        assert_eq!(attrs.label(), Some("Old"));
    }

    /// A vault whose every call answers with one fixed status.
    struct FixedStatus(i32);

    impl Vault for FixedStatus {
        fn fetch(&self, _: &NativeQuery) -> VaultReply {
            VaultReply::status(self.0)
        }
        fn insert(&self, _: &NativeQuery) -> i32 {
            self.0
        }
        fn update(&self, _: &NativeQuery, _: &NativeQuery) -> i32 {
            self.0
        }
        fn delete(&self, _: &NativeQuery) -> i32 {
            self.0
        }
    }

    #[test]
    fn unexpected_status_is_preserved() {
        let store = SecureStore::new(StoreIdentity::generic("svc"), Arc::new(FixedStatus(-34018)));
        let key = Key::<String>::new("k");
        let err = store.get(&key).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Vault {
                status: Status::MissingEntitlement
            }
        ));
        assert!(!err.is_retryable());
        assert!(store.remove(&key).is_err());
        assert!(store.set(&"v".to_string(), &key).is_err());
    }

    #[test]
    fn locked_vault_is_retryable() {
        let store = SecureStore::new(StoreIdentity::generic("svc"), Arc::new(FixedStatus(-25308)));
        let err = store.set(&1u32, &Key::<u32>::new("k")).unwrap_err();
        assert!(matches!(err, StoreError::InteractionNotAllowed { .. }));
        assert!(err.is_retryable());
    }

    /// Probe says absent, but another writer got there first.
    struct LosesInsertRace;

    impl Vault for LosesInsertRace {
        fn fetch(&self, _: &NativeQuery) -> VaultReply {
            VaultReply::status(-25300)
        }
        fn insert(&self, _: &NativeQuery) -> i32 {
            -25299
        }
        fn update(&self, _: &NativeQuery, _: &NativeQuery) -> i32 {
            0
        }
        fn delete(&self, _: &NativeQuery) -> i32 {
            0
        }
    }

    #[test]
    fn insert_race_surfaces_duplicate() {
        let store = SecureStore::new(StoreIdentity::generic("svc"), Arc::new(LosesInsertRace));
        let err = store.set(&1u32, &Key::<u32>::new("raced")).unwrap_err();
        match err {
            StoreError::Duplicate { ref key } => assert_eq!(key, "raced"),
            other => panic!("expected duplicate, got {other:?}"),
        }
        assert!(err.is_retryable());
    }
}
