//! Item matching rules shared by the emulated backends.
//!
//! These follow the platform keychain's behaviour closely enough that code
//! tested against [`MemoryVault`](super::MemoryVault) behaves the same on the
//! real thing:
//!
//! - a query must name a known item class, otherwise `-50`;
//! - an item matches when every non-control query attribute equals the
//!   item's (a missing `sync` counts as `false`);
//! - items are unique per class primary key, otherwise `-25299`;
//! - the vault stamps creation and modification dates itself.

use chrono::Utc;

use crate::attributes::{ItemClass, MatchLimit, NativeQuery, NativeValue, is_control_name, names};
use crate::status::{OsStatus, Status};

use super::{Payload, VaultReply};

pub(crate) const SUCCESS: OsStatus = 0;
pub(crate) const PARAM: OsStatus = -50;
pub(crate) const DUPLICATE_ITEM: OsStatus = -25299;
pub(crate) const ITEM_NOT_FOUND: OsStatus = -25300;
pub(crate) const INTERACTION_NOT_ALLOWED: OsStatus = -25308;
pub(crate) const DATA_NOT_AVAILABLE: OsStatus = -25316;
pub(crate) const IO: OsStatus = -36;

const GENERIC_PRIMARY_KEY: &[&str] = &[
    names::ACCOUNT,
    names::SERVICE,
    names::ACCESS_GROUP,
    names::SYNCHRONIZABLE,
];

const NETWORK_PRIMARY_KEY: &[&str] = &[
    names::ACCOUNT,
    names::SECURITY_DOMAIN,
    names::SERVER,
    names::PROTOCOL,
    names::AUTHENTICATION_TYPE,
    names::PORT,
    names::PATH,
    names::ACCESS_GROUP,
    names::SYNCHRONIZABLE,
];

/// One item as an emulated backend holds it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StoredItem {
    /// Every attribute except the payload, class included.
    pub attributes: NativeQuery,
    pub data: Vec<u8>,
}

impl StoredItem {
    /// Build a new item from an insert record, stamping its dates.
    pub fn from_record(record: &NativeQuery) -> Self {
        let mut attributes = NativeQuery::new();
        let mut data = Vec::new();
        for (name, value) in record {
            if name == names::VALUE_DATA {
                if let NativeValue::Data(bytes) = value {
                    data = bytes.clone();
                }
            } else if !is_control_name(name) {
                attributes.insert(name.clone(), value.clone());
            }
        }

        let now = NativeValue::Date(Utc::now());
        attributes
            .entry(names::CREATION_DATE.to_string())
            .or_insert_with(|| now.clone());
        attributes.insert(names::MODIFICATION_DATE.to_string(), now);

        Self { attributes, data }
    }

    /// A copy of this item with `changes` applied.
    pub fn with_changes(&self, changes: &NativeQuery) -> Self {
        let mut updated = self.clone();
        for (name, value) in changes {
            if name == names::VALUE_DATA {
                if let NativeValue::Data(bytes) = value {
                    updated.data = bytes.clone();
                }
            } else {
                updated.attributes.insert(name.clone(), value.clone());
            }
        }
        updated.attributes.insert(
            names::MODIFICATION_DATE.to_string(),
            NativeValue::Date(Utc::now()),
        );
        updated
    }

    pub fn class(&self) -> Option<ItemClass> {
        class_of(&self.attributes)
    }

    /// Attribute dictionary returned for `r_Attributes`.
    fn reply_attributes(&self, with_data: bool) -> NativeQuery {
        let mut attrs = self.attributes.clone();
        if with_data {
            attrs.insert(
                names::VALUE_DATA.to_string(),
                NativeValue::Data(self.data.clone()),
            );
        }
        attrs
    }
}

fn class_of(query: &NativeQuery) -> Option<ItemClass> {
    query
        .get(names::CLASS)
        .and_then(NativeValue::as_str)
        .and_then(ItemClass::from_native)
}

/// The item class a query addresses, or `-50` if it names none.
pub(crate) fn require_class(query: &NativeQuery) -> Result<ItemClass, OsStatus> {
    class_of(query).ok_or(PARAM)
}

fn flag(query: &NativeQuery, name: &str) -> bool {
    query
        .get(name)
        .and_then(NativeValue::as_bool)
        .unwrap_or(false)
}

fn match_limit(query: &NativeQuery) -> MatchLimit {
    query
        .get(names::MATCH_LIMIT)
        .and_then(NativeValue::as_str)
        .and_then(MatchLimit::from_native)
        .unwrap_or(MatchLimit::One)
}

/// `sync` absent on an item means "not synchronized".
fn normalized(attrs: &NativeQuery, name: &str) -> Option<NativeValue> {
    match attrs.get(name) {
        Some(value) if name == names::SYNCHRONIZABLE => value.as_bool().map(NativeValue::Bool),
        Some(value) => Some(value.clone()),
        None if name == names::SYNCHRONIZABLE => Some(NativeValue::Bool(false)),
        None => None,
    }
}

/// Whether `item` satisfies every attribute constraint in `query`.
pub(crate) fn matches(item: &StoredItem, query: &NativeQuery) -> bool {
    query
        .iter()
        .filter(|(name, _)| !is_control_name(name) && name.as_str() != names::VALUE_DATA)
        .all(|(name, wanted)| {
            let wanted = if name == names::SYNCHRONIZABLE {
                wanted.as_bool().map(NativeValue::Bool)
            } else {
                Some(wanted.clone())
            };
            wanted.is_some() && normalized(&item.attributes, name) == wanted
        })
}

/// Whether two items collide on their class primary key.
pub(crate) fn same_primary_key(a: &StoredItem, b: &StoredItem) -> bool {
    let (Some(class_a), Some(class_b)) = (a.class(), b.class()) else {
        return false;
    };
    if class_a != class_b {
        return false;
    }
    let key = match class_a {
        ItemClass::GenericSecret => GENERIC_PRIMARY_KEY,
        ItemClass::NetworkSecret => NETWORK_PRIMARY_KEY,
    };
    key.iter()
        .all(|name| normalized(&a.attributes, name) == normalized(&b.attributes, name))
}

/// Changes may not carry request flags or move an item to another class.
pub(crate) fn validate_changes(changes: &NativeQuery) -> Result<(), OsStatus> {
    if changes
        .keys()
        .any(|name| is_control_name(name) || name == names::CLASS)
    {
        return Err(PARAM);
    }
    Ok(())
}

/// Build the fetch reply for `found` (already filtered by `query`).
pub(crate) fn fetch_reply<'a>(
    query: &NativeQuery,
    found: impl IntoIterator<Item = &'a StoredItem>,
) -> VaultReply {
    let return_data = flag(query, names::RETURN_DATA);
    let return_attributes = flag(query, names::RETURN_ATTRIBUTES);
    let mut found = found.into_iter();

    match match_limit(query) {
        MatchLimit::One => {
            let Some(item) = found.next() else {
                return VaultReply::status(ITEM_NOT_FOUND);
            };
            let payload = match (return_attributes, return_data) {
                (true, with_data) => Some(Payload::Attributes(item.reply_attributes(with_data))),
                (false, true) => Some(Payload::Data(item.data.clone())),
                (false, false) => None,
            };
            VaultReply::success(payload)
        }
        MatchLimit::All => {
            let items: Vec<NativeQuery> = found
                .map(|item| item.reply_attributes(return_data))
                .collect();
            if items.is_empty() {
                return VaultReply::status(ITEM_NOT_FOUND);
            }
            let payload = (return_attributes || return_data).then_some(Payload::Items(items));
            VaultReply::success(payload)
        }
    }
}

/// Log a backend status other than success or not-found.
pub(crate) fn trace_status(operation: &'static str, status: OsStatus) {
    if status != SUCCESS && status != ITEM_NOT_FOUND {
        tracing::debug!(operation, status = %Status::from_code(status), "vault operation failed");
    }
}
