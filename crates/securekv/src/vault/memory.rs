//! In-process vault.
//!
//! Holds items in a mutex-guarded list and applies the shared matching rules.
//! Nothing survives the process. Useful for tests, for ephemeral secrets, and
//! for exercising lock-state handling: [`MemoryVault::lock`] makes every
//! primitive answer "interaction not allowed" until [`MemoryVault::unlock`].

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::attributes::NativeQuery;
use crate::status::OsStatus;

use super::matching::{
    self, DUPLICATE_ITEM, INTERACTION_NOT_ALLOWED, ITEM_NOT_FOUND, StoredItem, SUCCESS,
};
use super::{Vault, VaultReply};

/// Status returned when the item list mutex is poisoned.
const INTERNAL_COMPONENT: OsStatus = -2070;

/// Volatile vault backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryVault {
    items: Mutex<Vec<StoredItem>>,
    locked: AtomicBool,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emulate a locked device: every call fails with `-25308`.
    pub fn lock(&self) {
        self.locked.store(true, Ordering::SeqCst);
        tracing::debug!("memory vault locked");
    }

    pub fn unlock(&self) {
        self.locked.store(false, Ordering::SeqCst);
        tracing::debug!("memory vault unlocked");
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    /// Number of items currently held, across all classes.
    ///
    /// Still counts after a writer panicked while holding the list.
    pub fn len(&self) -> usize {
        match self.items.lock() {
            Ok(items) => items.len(),
            Err(poisoned) => {
                tracing::error!("memory vault mutex poisoned");
                poisoned.into_inner().len()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` against the item list unless the vault is locked.
    fn with_items<T>(
        &self,
        f: impl FnOnce(&mut Vec<StoredItem>) -> T,
        on_error: impl FnOnce(OsStatus) -> T,
    ) -> T {
        if self.is_locked() {
            return on_error(INTERACTION_NOT_ALLOWED);
        }
        match self.items.lock() {
            Ok(mut items) => f(&mut items),
            Err(_) => {
                tracing::error!("memory vault mutex poisoned");
                on_error(INTERNAL_COMPONENT)
            }
        }
    }
}

impl Vault for MemoryVault {
    fn fetch(&self, query: &NativeQuery) -> VaultReply {
        if let Err(status) = matching::require_class(query) {
            return VaultReply::status(status);
        }
        self.with_items(
            |items| {
                let found = items.iter().filter(|item| matching::matches(item, query));
                matching::fetch_reply(query, found)
            },
            VaultReply::status,
        )
    }

    fn insert(&self, record: &NativeQuery) -> OsStatus {
        if let Err(status) = matching::require_class(record) {
            return status;
        }
        let status = self.with_items(
            |items| {
                let item = StoredItem::from_record(record);
                if items
                    .iter()
                    .any(|existing| matching::same_primary_key(existing, &item))
                {
                    return DUPLICATE_ITEM;
                }
                items.push(item);
                SUCCESS
            },
            |status| status,
        );
        matching::trace_status("insert", status);
        status
    }

    fn update(&self, query: &NativeQuery, changes: &NativeQuery) -> OsStatus {
        if let Err(status) = matching::require_class(query) {
            return status;
        }
        if let Err(status) = matching::validate_changes(changes) {
            return status;
        }
        let status = self.with_items(
            |items| {
                let targets: Vec<usize> = items
                    .iter()
                    .enumerate()
                    .filter(|(_, item)| matching::matches(item, query))
                    .map(|(i, _)| i)
                    .collect();
                if targets.is_empty() {
                    return ITEM_NOT_FOUND;
                }

                // Stage every change first so a collision leaves the list
                // untouched.
                let staged: Vec<(usize, StoredItem)> = targets
                    .iter()
                    .map(|&i| (i, items[i].with_changes(changes)))
                    .collect();
                for (i, updated) in &staged {
                    let collides = items.iter().enumerate().any(|(j, other)| {
                        !targets.contains(&j) && matching::same_primary_key(other, updated)
                    });
                    let collides_staged = staged
                        .iter()
                        .any(|(k, other)| k != i && matching::same_primary_key(other, updated));
                    if collides || collides_staged {
                        return DUPLICATE_ITEM;
                    }
                }

                for (i, updated) in staged {
                    items[i] = updated;
                }
                SUCCESS
            },
            |status| status,
        );
        matching::trace_status("update", status);
        status
    }

    fn delete(&self, query: &NativeQuery) -> OsStatus {
        if let Err(status) = matching::require_class(query) {
            return status;
        }
        let status = self.with_items(
            |items| {
                let before = items.len();
                items.retain(|item| !matching::matches(item, query));
                if items.len() == before {
                    ITEM_NOT_FOUND
                } else {
                    SUCCESS
                }
            },
            |status| status,
        );
        matching::trace_status("delete", status);
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{Attribute, AttributeSet, ItemClass, MatchLimit, NativeValue};
    use crate::vault::Payload;

    fn lookup(account: &str) -> AttributeSet {
        AttributeSet::new()
            .with(Attribute::Class(ItemClass::GenericSecret))
            .with(Attribute::Service("svc".into()))
            .with(Attribute::Account(account.into()))
    }

    fn record(account: &str, data: &[u8]) -> NativeQuery {
        lookup(account)
            .with(Attribute::ValueData(data.to_vec()))
            .compose()
    }

    #[test]
    fn insert_fetch_delete() {
        let vault = MemoryVault::new();
        assert_eq!(vault.insert(&record("a", b"1")), SUCCESS);

        let reply = vault.fetch(&lookup("a").with(Attribute::ReturnData(true)).compose());
        assert_eq!(reply.status, SUCCESS);
        assert_eq!(reply.payload, Some(Payload::Data(b"1".to_vec())));

        assert_eq!(vault.delete(&lookup("a").compose()), SUCCESS);
        assert_eq!(vault.fetch(&lookup("a").compose()).status, ITEM_NOT_FOUND);
        assert_eq!(vault.delete(&lookup("a").compose()), ITEM_NOT_FOUND);
    }

    #[test]
    fn duplicate_insert_rejected() {
        let vault = MemoryVault::new();
        assert_eq!(vault.insert(&record("a", b"1")), SUCCESS);
        assert_eq!(vault.insert(&record("a", b"2")), DUPLICATE_ITEM);
        assert_eq!(vault.len(), 1);
    }

    #[test]
    fn query_without_class_is_a_param_error() {
        let vault = MemoryVault::new();
        let query = AttributeSet::new()
            .with(Attribute::Account("a".into()))
            .compose();
        assert_eq!(vault.fetch(&query).status, -50);
        assert_eq!(vault.insert(&query), -50);
        assert_eq!(vault.delete(&query), -50);
    }

    #[test]
    fn update_replaces_payload_in_place() {
        let vault = MemoryVault::new();
        vault.insert(&record("a", b"old"));
        let changes = AttributeSet::new()
            .with(Attribute::ValueData(b"new".to_vec()))
            .with(Attribute::Label("L".into()))
            .compose();
        assert_eq!(vault.update(&lookup("a").compose(), &changes), SUCCESS);
        assert_eq!(vault.len(), 1);

        let reply = vault.fetch(
            &lookup("a")
                .with(Attribute::ReturnAttributes(true))
                .with(Attribute::ReturnData(true))
                .compose(),
        );
        let Some(Payload::Attributes(attrs)) = reply.payload else {
            panic!("expected attributes");
        };
        assert_eq!(attrs["v_Data"], NativeValue::Data(b"new".to_vec()));
        assert_eq!(attrs["labl"], NativeValue::String("L".into()));
    }

    #[test]
    fn update_missing_item_is_not_found() {
        let vault = MemoryVault::new();
        let changes = AttributeSet::new()
            .with(Attribute::ValueData(b"x".to_vec()))
            .compose();
        assert_eq!(vault.update(&lookup("a").compose(), &changes), ITEM_NOT_FOUND);
    }

    #[test]
    fn update_into_existing_key_is_duplicate_and_atomic() {
        let vault = MemoryVault::new();
        vault.insert(&record("a", b"1"));
        vault.insert(&record("b", b"2"));
        let rename = AttributeSet::new()
            .with(Attribute::Account("b".into()))
            .compose();
        assert_eq!(vault.update(&lookup("a").compose(), &rename), DUPLICATE_ITEM);

        let reply = vault.fetch(&lookup("a").with(Attribute::ReturnData(true)).compose());
        assert_eq!(reply.payload, Some(Payload::Data(b"1".to_vec())));
    }

    #[test]
    fn match_all_lists_every_item() {
        let vault = MemoryVault::new();
        vault.insert(&record("a", b"1"));
        vault.insert(&record("b", b"2"));
        let query = AttributeSet::new()
            .with(Attribute::Class(ItemClass::GenericSecret))
            .with(Attribute::Service("svc".into()))
            .with(Attribute::MatchLimit(MatchLimit::All))
            .with(Attribute::ReturnAttributes(true))
            .compose();
        let Some(Payload::Items(items)) = vault.fetch(&query).payload else {
            panic!("expected items");
        };
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn len_survives_a_poisoned_list() {
        let vault = std::sync::Arc::new(MemoryVault::new());
        vault.insert(&record("a", b"1"));
        let holder = std::sync::Arc::clone(&vault);
        let _ = std::thread::spawn(move || {
            let _items = holder.items.lock().unwrap();
            panic!("writer died");
        })
        .join();

        assert!(vault.items.is_poisoned());
        assert_eq!(vault.len(), 1);
        assert!(!vault.is_empty());
    }

    #[test]
    fn locked_vault_refuses_everything() {
        let vault = MemoryVault::new();
        vault.insert(&record("a", b"1"));
        vault.lock();
        assert!(vault.is_locked());
        assert_eq!(vault.fetch(&lookup("a").compose()).status, INTERACTION_NOT_ALLOWED);
        assert_eq!(vault.insert(&record("b", b"2")), INTERACTION_NOT_ALLOWED);
        assert_eq!(vault.delete(&lookup("a").compose()), INTERACTION_NOT_ALLOWED);

        vault.unlock();
        assert_eq!(vault.fetch(&lookup("a").compose()).status, SUCCESS);
    }

    #[test]
    fn delete_by_service_clears_class() {
        let vault = MemoryVault::new();
        vault.insert(&record("a", b"1"));
        vault.insert(&record("b", b"2"));
        let all = AttributeSet::new()
            .with(Attribute::Class(ItemClass::GenericSecret))
            .with(Attribute::Service("svc".into()))
            .compose();
        assert_eq!(vault.delete(&all), SUCCESS);
        assert!(vault.is_empty());
    }
}
