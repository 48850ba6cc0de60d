//! macOS Keychain Services backend.
//!
//! Native attribute names are the keychain's own constant strings, so a
//! composed query converts to a `CFDictionary` one entry at a time and calls
//! straight into `SecItemCopyMatching`, `SecItemAdd`, `SecItemUpdate` and
//! `SecItemDelete`. The keychain does its own encryption and locking.

use std::ffi::c_void;
use std::ptr;

use chrono::{DateTime, Utc};
use core_foundation::array::CFArray;
use core_foundation::base::{CFType, CFTypeRef, TCFType};
use core_foundation::boolean::CFBoolean;
use core_foundation::data::CFData;
use core_foundation::date::CFDate;
use core_foundation::dictionary::CFDictionary;
use core_foundation::number::CFNumber;
use core_foundation::string::CFString;
use security_framework_sys::keychain_item::{
    SecItemAdd, SecItemCopyMatching, SecItemDelete, SecItemUpdate,
};

use crate::attributes::{NativeQuery, NativeValue};
use crate::status::{OsStatus, Status};

use super::{Payload, Vault, VaultReply};

/// Seconds between the Unix epoch and the Core Foundation epoch (2001-01-01).
const CF_EPOCH_OFFSET: f64 = 978_307_200.0;

/// The system keychain.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeychainVault;

impl KeychainVault {
    pub fn new() -> Self {
        Self
    }
}

fn to_cf_value(value: &NativeValue) -> CFType {
    match value {
        NativeValue::String(s) => CFString::new(s).as_CFType(),
        NativeValue::Data(d) => CFData::from_buffer(d).as_CFType(),
        NativeValue::Number(n) => CFNumber::from(*n).as_CFType(),
        NativeValue::Bool(true) => CFBoolean::true_value().as_CFType(),
        NativeValue::Bool(false) => CFBoolean::false_value().as_CFType(),
        NativeValue::Date(at) => {
            let seconds = at.timestamp() as f64
                + f64::from(at.timestamp_subsec_nanos()) / 1e9
                - CF_EPOCH_OFFSET;
            CFDate::new(seconds).as_CFType()
        }
    }
}

fn to_cf_dictionary(query: &NativeQuery) -> CFDictionary<CFString, CFType> {
    let pairs: Vec<(CFString, CFType)> = query
        .iter()
        .map(|(name, value)| (CFString::new(name), to_cf_value(value)))
        .collect();
    CFDictionary::from_CFType_pairs(&pairs)
}

fn from_cf_value(value: &CFType) -> Option<NativeValue> {
    if let Some(s) = value.downcast::<CFString>() {
        return Some(NativeValue::String(s.to_string()));
    }
    if let Some(d) = value.downcast::<CFData>() {
        return Some(NativeValue::Data(d.bytes().to_vec()));
    }
    if let Some(b) = value.downcast::<CFBoolean>() {
        return Some(NativeValue::Bool(b.into()));
    }
    if let Some(n) = value.downcast::<CFNumber>() {
        return n.to_i64().map(NativeValue::Number);
    }
    if let Some(date) = value.downcast::<CFDate>() {
        let unix = date.abs_time() + CF_EPOCH_OFFSET;
        let secs = unix.floor();
        let nanos = ((unix - secs) * 1e9) as u32;
        return DateTime::<Utc>::from_timestamp(secs as i64, nanos).map(NativeValue::Date);
    }
    None
}

fn from_cf_dictionary(dict: &CFDictionary) -> NativeQuery {
    let (keys, values) = dict.get_keys_and_values();
    let mut out = NativeQuery::new();
    for (key, value) in keys.into_iter().zip(values) {
        // SAFETY: keychain result dictionaries are keyed by CFString and the
        // dictionary keeps both pointers alive for the duration of the call.
        let (key, value) = unsafe {
            (
                CFString::wrap_under_get_rule(key as _),
                CFType::wrap_under_get_rule(value as CFTypeRef),
            )
        };
        match from_cf_value(&value) {
            Some(native) => {
                out.insert(key.to_string(), native);
            }
            None => tracing::trace!(attribute = %key, "skipping unsupported keychain value"),
        }
    }
    out
}

/// One result element: either an attribute dictionary or bare data.
fn element_attributes(value: &CFType) -> Option<NativeQuery> {
    if let Some(dict) = value.downcast::<CFDictionary>() {
        return Some(from_cf_dictionary(&dict));
    }
    value.downcast::<CFData>().map(|data| {
        let mut attrs = NativeQuery::new();
        attrs.insert(
            crate::attributes::names::VALUE_DATA.to_string(),
            NativeValue::Data(data.bytes().to_vec()),
        );
        attrs
    })
}

fn payload_from(result: CFType) -> Option<Payload> {
    if let Some(data) = result.downcast::<CFData>() {
        return Some(Payload::Data(data.bytes().to_vec()));
    }
    if let Some(dict) = result.downcast::<CFDictionary>() {
        return Some(Payload::Attributes(from_cf_dictionary(&dict)));
    }
    if let Some(array) = result.downcast::<CFArray>() {
        let items = array
            .get_all_values()
            .into_iter()
            .filter_map(|element: *const c_void| {
                // SAFETY: the array retains its elements while we read them.
                let element = unsafe { CFType::wrap_under_get_rule(element as CFTypeRef) };
                element_attributes(&element)
            })
            .collect();
        return Some(Payload::Items(items));
    }
    tracing::warn!("keychain returned an unexpected result type");
    None
}

fn log_status(operation: &'static str, status: OsStatus) {
    if status != 0 {
        let message = security_framework::base::Error::from_code(status)
            .message()
            .unwrap_or_default();
        tracing::debug!(
            operation,
            status = %Status::from_code(status),
            %message,
            "keychain call failed"
        );
    }
}

impl Vault for KeychainVault {
    fn fetch(&self, query: &NativeQuery) -> VaultReply {
        let dict = to_cf_dictionary(query);
        let mut result: CFTypeRef = ptr::null();
        // SAFETY: `dict` outlives the call; `result` is only read on success
        // and then owned per the create rule.
        let status = unsafe { SecItemCopyMatching(dict.as_concrete_TypeRef(), &mut result) };
        log_status("fetch", status);
        if status != 0 {
            return VaultReply::status(status);
        }
        let payload = if result.is_null() {
            None
        } else {
            // SAFETY: a non-null result from SecItemCopyMatching is +1.
            payload_from(unsafe { CFType::wrap_under_create_rule(result) })
        };
        VaultReply::success(payload)
    }

    fn insert(&self, record: &NativeQuery) -> OsStatus {
        let dict = to_cf_dictionary(record);
        // SAFETY: `dict` outlives the call; no result is requested.
        let status = unsafe { SecItemAdd(dict.as_concrete_TypeRef(), ptr::null_mut()) };
        log_status("insert", status);
        status
    }

    fn update(&self, query: &NativeQuery, changes: &NativeQuery) -> OsStatus {
        let query = to_cf_dictionary(query);
        let changes = to_cf_dictionary(changes);
        // SAFETY: both dictionaries outlive the call.
        let status = unsafe {
            SecItemUpdate(query.as_concrete_TypeRef(), changes.as_concrete_TypeRef())
        };
        log_status("update", status);
        status
    }

    fn delete(&self, query: &NativeQuery) -> OsStatus {
        let dict = to_cf_dictionary(query);
        // SAFETY: `dict` outlives the call.
        let status = unsafe { SecItemDelete(dict.as_concrete_TypeRef()) };
        log_status("delete", status);
        status
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{Attribute, AttributeSet, ItemClass};

    #[test]
    fn values_round_trip_through_core_foundation() {
        let at = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        for value in [
            NativeValue::String("svc".into()),
            NativeValue::Data(vec![0, 1, 255]),
            NativeValue::Number(443),
            NativeValue::Bool(true),
            NativeValue::Date(at),
        ] {
            assert_eq!(from_cf_value(&to_cf_value(&value)), Some(value));
        }
    }

    #[test]
    fn dictionary_round_trip() {
        let query = AttributeSet::new()
            .with(Attribute::Class(ItemClass::GenericSecret))
            .with(Attribute::Service("svc".into()))
            .with(Attribute::Account("k".into()))
            .compose();
        let dict = to_cf_dictionary(&query);
        // SAFETY: reinterpreting a typed dictionary as an untyped one.
        let untyped: CFDictionary =
            unsafe { CFDictionary::wrap_under_get_rule(dict.as_concrete_TypeRef()) };
        assert_eq!(from_cf_dictionary(&untyped), query);
    }

    // These touch the login keychain; run manually with `--ignored`.

    #[test]
    #[ignore]
    fn keychain_insert_fetch_delete() {
        let vault = KeychainVault::new();
        let lookup = AttributeSet::new()
            .with(Attribute::Class(ItemClass::GenericSecret))
            .with(Attribute::Service("securekv-test".into()))
            .with(Attribute::Account("roundtrip".into()));
        vault.delete(&lookup.compose());

        let record = lookup
            .clone()
            .with(Attribute::ValueData(b"secret".to_vec()))
            .compose();
        assert_eq!(vault.insert(&record), 0);
        assert_eq!(vault.insert(&record), -25299);

        let reply = vault.fetch(&lookup.clone().with(Attribute::ReturnData(true)).compose());
        assert_eq!(reply.payload, Some(Payload::Data(b"secret".to_vec())));

        assert_eq!(vault.delete(&lookup.compose()), 0);
    }

    #[test]
    #[ignore]
    fn keychain_missing_item() {
        let vault = KeychainVault::new();
        let query = AttributeSet::new()
            .with(Attribute::Class(ItemClass::GenericSecret))
            .with(Attribute::Service("securekv-test".into()))
            .with(Attribute::Account("does-not-exist".into()))
            .compose();
        assert_eq!(vault.fetch(&query).status, -25300);
    }
}
