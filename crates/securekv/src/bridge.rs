//! Value bridges: typed values to and from stored bytes.
//!
//! A [`ValueBridge<V>`] is a stateless encode/decode pair for one value
//! category. Dispatch is static: a [`KeyDescriptor`](crate::KeyDescriptor)
//! names its bridge type when it is constructed, and the compiler resolves
//! the encode/decode calls from there. There is no runtime type inspection.
//!
//! Built-in bridges and their stored layout:
//!
//! | Bridge           | Values                              | Bytes |
//! |------------------|-------------------------------------|-------|
//! | [`NumericBridge`]| fixed-width integers and floats     | native-endian, exactly the type's width |
//! | [`BoolBridge`]   | `bool`                              | one byte, `0` or `1` |
//! | [`TextBridge`]   | `String`                            | UTF-8 |
//! | [`BytesBridge`]  | `Vec<u8>`                           | as is |
//! | [`JsonBridge`]   | any serde type                      | JSON document |
//! | [`ArchiveBridge`]| any `rkyv` archivable type          | `SKVA` header, version byte, `rkyv` archive |
//!
//! These layouts are what existing stored items contain; they must not
//! change. `usize` and `isize` have no default bridge since their width
//! varies by platform; store them as a fixed-width integer.
//!
//! Stored bytes carry no type tag. The numeric and boolean bridges can only
//! reject a foreign payload by its length: eight bytes of text decode as a
//! `u64`, and a one-byte `u8` decodes as a `bool` if it is `0` or `1`.
//!
//! Encode failures surface as [`StoreError::Conversion`]. Bytes a bridge
//! cannot accept surface as [`StoreError::InvalidDataCast`]; decoding never
//! pads, truncates, or otherwise coerces.

use std::fmt;

use rkyv::api::high::{HighDeserializer, HighSerializer, HighValidator};
use rkyv::bytecheck::CheckBytes;
use rkyv::rancor;
use rkyv::ser::allocator::ArenaHandle;
use rkyv::util::AlignedVec;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Result, StoreError};

/// Closed set of value categories, one per built-in bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BridgeKind {
    Numeric,
    Boolean,
    Text,
    Bytes,
    Structured,
    Archive,
    /// A bridge supplied outside this crate.
    Custom,
}

impl fmt::Display for BridgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Numeric => "numeric",
            Self::Boolean => "boolean",
            Self::Text => "text",
            Self::Bytes => "bytes",
            Self::Structured => "structured",
            Self::Archive => "archive",
            Self::Custom => "custom",
        })
    }
}

/// Encode/decode pair for values of type `V`.
pub trait ValueBridge<V>: Send + Sync {
    /// Category reported in errors and logs.
    const KIND: BridgeKind;

    /// Encode a value. Total over legal values of `V`.
    fn encode(&self, value: &V) -> Result<Vec<u8>>;

    /// Decode bytes produced by [`encode`](Self::encode).
    fn decode(&self, bytes: &[u8]) -> Result<V>;
}

/// Types with a default bridge, usable with [`Key<V>`](crate::Key).
pub trait Storable: Sized {
    type Bridge: ValueBridge<Self> + Default;
}

fn invalid(expected: BridgeKind, reason: impl Into<String>) -> StoreError {
    StoreError::InvalidDataCast {
        expected,
        reason: reason.into(),
    }
}

// ---------------------------------------------------------------------------
// Numeric
// ---------------------------------------------------------------------------

/// Raw native byte representation of fixed-width numbers.
#[derive(Debug, Clone, Copy, Default)]
pub struct NumericBridge;

macro_rules! numeric_bridge {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ValueBridge<$ty> for NumericBridge {
                const KIND: BridgeKind = BridgeKind::Numeric;

                fn encode(&self, value: &$ty) -> Result<Vec<u8>> {
                    Ok(value.to_ne_bytes().to_vec())
                }

                fn decode(&self, bytes: &[u8]) -> Result<$ty> {
                    const WIDTH: usize = std::mem::size_of::<$ty>();
                    let raw: [u8; WIDTH] = bytes.try_into().map_err(|_| {
                        invalid(
                            BridgeKind::Numeric,
                            format!(
                                "{} needs exactly {} bytes, got {}",
                                stringify!($ty),
                                WIDTH,
                                bytes.len()
                            ),
                        )
                    })?;
                    Ok(<$ty>::from_ne_bytes(raw))
                }
            }

            impl Storable for $ty {
                type Bridge = NumericBridge;
            }
        )*
    };
}

numeric_bridge!(
    i8, i16, i32, i64, i128, u8, u16, u32, u64, u128, f32, f64,
);

// ---------------------------------------------------------------------------
// Boolean
// ---------------------------------------------------------------------------

/// One byte, `0` or `1`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoolBridge;

impl ValueBridge<bool> for BoolBridge {
    const KIND: BridgeKind = BridgeKind::Boolean;

    fn encode(&self, value: &bool) -> Result<Vec<u8>> {
        Ok(vec![u8::from(*value)])
    }

    fn decode(&self, bytes: &[u8]) -> Result<bool> {
        match bytes {
            [0] => Ok(false),
            [1] => Ok(true),
            [other] => Err(invalid(
                BridgeKind::Boolean,
                format!("byte {other:#04x} is neither 0 nor 1"),
            )),
            _ => Err(invalid(
                BridgeKind::Boolean,
                format!("needs exactly 1 byte, got {}", bytes.len()),
            )),
        }
    }
}

impl Storable for bool {
    type Bridge = BoolBridge;
}

// ---------------------------------------------------------------------------
// Text
// ---------------------------------------------------------------------------

/// UTF-8 text.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextBridge;

impl ValueBridge<String> for TextBridge {
    const KIND: BridgeKind = BridgeKind::Text;

    fn encode(&self, value: &String) -> Result<Vec<u8>> {
        Ok(value.as_bytes().to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> Result<String> {
        String::from_utf8(bytes.to_vec()).map_err(|e| invalid(BridgeKind::Text, e.to_string()))
    }
}

impl Storable for String {
    type Bridge = TextBridge;
}

// ---------------------------------------------------------------------------
// Bytes
// ---------------------------------------------------------------------------

/// Raw bytes, stored unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesBridge;

impl ValueBridge<Vec<u8>> for BytesBridge {
    const KIND: BridgeKind = BridgeKind::Bytes;

    fn encode(&self, value: &Vec<u8>) -> Result<Vec<u8>> {
        Ok(value.clone())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

impl Storable for Vec<u8> {
    type Bridge = BytesBridge;
}

// ---------------------------------------------------------------------------
// Structured (JSON)
// ---------------------------------------------------------------------------

/// Serde types as a JSON document.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonBridge;

impl<V> ValueBridge<V> for JsonBridge
where
    V: Serialize + DeserializeOwned,
{
    const KIND: BridgeKind = BridgeKind::Structured;

    fn encode(&self, value: &V) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| StoreError::Conversion {
            kind: BridgeKind::Structured,
            reason: e.to_string(),
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<V> {
        serde_json::from_slice(bytes).map_err(|e| invalid(BridgeKind::Structured, e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Archive (rkyv)
// ---------------------------------------------------------------------------

/// Header that prefixes every archived payload.
const ARCHIVE_MAGIC: &[u8; 4] = b"SKVA";

/// Current archive envelope version.
const ARCHIVE_VERSION: u8 = 1;

const ARCHIVE_HEADER_LEN: usize = ARCHIVE_MAGIC.len() + 1;

/// Object graphs archived with `rkyv`, inside a small versioned envelope.
///
/// The archive is validated before it is deserialized, so bytes written by
/// any other bridge are rejected rather than reinterpreted.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveBridge;

impl<V> ValueBridge<V> for ArchiveBridge
where
    V: rkyv::Archive
        + for<'a> rkyv::Serialize<HighSerializer<AlignedVec, ArenaHandle<'a>, rancor::Error>>,
    V::Archived: for<'a> CheckBytes<HighValidator<'a, rancor::Error>>
        + rkyv::Deserialize<V, HighDeserializer<rancor::Error>>,
{
    const KIND: BridgeKind = BridgeKind::Archive;

    fn encode(&self, value: &V) -> Result<Vec<u8>> {
        let archived =
            rkyv::to_bytes::<rancor::Error>(value).map_err(|e| StoreError::Conversion {
                kind: BridgeKind::Archive,
                reason: e.to_string(),
            })?;

        let mut out = Vec::with_capacity(ARCHIVE_HEADER_LEN + archived.len());
        out.extend_from_slice(ARCHIVE_MAGIC);
        out.push(ARCHIVE_VERSION);
        out.extend_from_slice(&archived);

        tracing::trace!(archive_len = out.len(), "archived value");
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<V> {
        let Some(body) = bytes.strip_prefix(ARCHIVE_MAGIC.as_slice()) else {
            return Err(invalid(BridgeKind::Archive, "missing archive header"));
        };
        let Some((&version, body)) = body.split_first() else {
            return Err(invalid(BridgeKind::Archive, "truncated archive header"));
        };
        if version != ARCHIVE_VERSION {
            return Err(invalid(
                BridgeKind::Archive,
                format!("unsupported archive version {version}"),
            ));
        }

        // rkyv validates alignment; the vault hands back arbitrary buffers.
        let mut aligned: AlignedVec = AlignedVec::new();
        aligned.extend_from_slice(body);

        rkyv::from_bytes::<V, rancor::Error>(&aligned)
            .map_err(|e| invalid(BridgeKind::Archive, e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn round_trip<V, B>(bridge: &B, value: V)
    where
        V: PartialEq + fmt::Debug,
        B: ValueBridge<V>,
    {
        let bytes = bridge.encode(&value).unwrap();
        assert_eq!(bridge.decode(&bytes).unwrap(), value);
    }

    #[test]
    fn numeric_round_trips() {
        round_trip(&NumericBridge, 0i8);
        round_trip(&NumericBridge, -12_345i16);
        round_trip(&NumericBridge, i32::MIN);
        round_trip(&NumericBridge, i64::MAX);
        round_trip(&NumericBridge, -1i128);
        round_trip(&NumericBridge, u8::MAX);
        round_trip(&NumericBridge, 65_535u16);
        round_trip(&NumericBridge, 42u32);
        round_trip(&NumericBridge, u64::MAX);
        round_trip(&NumericBridge, u128::MAX);
        round_trip(&NumericBridge, 3.5f32);
        round_trip(&NumericBridge, -0.125f64);
    }

    #[test]
    fn numeric_layout_is_native_width() {
        let bytes = ValueBridge::<u32>::encode(&NumericBridge, &0x0102_0304).unwrap();
        assert_eq!(bytes, 0x0102_0304u32.to_ne_bytes());
        let bytes = ValueBridge::<f64>::encode(&NumericBridge, &1.0).unwrap();
        assert_eq!(bytes.len(), 8);
    }

    #[test]
    fn width_is_the_only_numeric_check() {
        let text = ValueBridge::<String>::encode(&TextBridge, &"eightchr".to_string()).unwrap();
        assert!(ValueBridge::<u64>::decode(&NumericBridge, &text).is_ok());
        assert!(ValueBridge::<u32>::decode(&NumericBridge, &text).is_err());
    }

    #[test]
    fn numeric_rejects_short_payload() {
        let err = ValueBridge::<u64>::decode(&NumericBridge, &[1, 2, 3]).unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidDataCast {
                expected: BridgeKind::Numeric,
                ..
            }
        ));
    }

    #[test]
    fn numeric_rejects_long_payload() {
        let err = ValueBridge::<u16>::decode(&NumericBridge, &[0; 4]).unwrap_err();
        assert!(matches!(err, StoreError::InvalidDataCast { .. }));
    }

    #[test]
    fn bool_layout_and_rejection() {
        assert_eq!(BoolBridge.encode(&true).unwrap(), vec![1]);
        assert_eq!(BoolBridge.encode(&false).unwrap(), vec![0]);
        round_trip(&BoolBridge, true);
        round_trip(&BoolBridge, false);

        assert!(matches!(
            BoolBridge.decode(&[2]),
            Err(StoreError::InvalidDataCast { .. })
        ));
        assert!(matches!(
            BoolBridge.decode(&[]),
            Err(StoreError::InvalidDataCast { .. })
        ));
    }

    #[test]
    fn text_round_trip_and_invalid_utf8() {
        round_trip(&TextBridge, String::from("héllo wörld"));
        round_trip(&TextBridge, String::new());

        let err = TextBridge.decode(&[0xff, 0xfe, 0xfd]).unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidDataCast {
                expected: BridgeKind::Text,
                ..
            }
        ));
    }

    #[test]
    fn bytes_are_identity() {
        let data = vec![0u8, 255, 17, 42];
        assert_eq!(BytesBridge.encode(&data).unwrap(), data);
        round_trip(&BytesBridge, data);
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        age: u32,
        tags: Vec<String>,
    }

    #[test]
    fn json_round_trip() {
        round_trip(
            &JsonBridge,
            Profile {
                name: "ada".into(),
                age: 36,
                tags: vec!["admin".into()],
            },
        );
    }

    #[test]
    fn json_rejects_text_payload() {
        let bytes = TextBridge.encode(&"not json".to_string()).unwrap();
        let err = ValueBridge::<Profile>::decode(&JsonBridge, &bytes).unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidDataCast {
                expected: BridgeKind::Structured,
                ..
            }
        ));
    }

    #[derive(Debug, PartialEq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
    struct Session {
        user: String,
        expires: i64,
        scopes: Vec<String>,
    }

    #[test]
    fn archive_round_trip() {
        round_trip(
            &ArchiveBridge,
            Session {
                user: "ada".into(),
                expires: 1_700_000_000,
                scopes: vec!["read".into(), "write".into()],
            },
        );
    }

    #[test]
    fn archive_has_header() {
        let session = Session {
            user: "u".into(),
            expires: 0,
            scopes: vec![],
        };
        let bytes = ArchiveBridge.encode(&session).unwrap();
        assert_eq!(&bytes[..4], b"SKVA");
        assert_eq!(bytes[4], 1);
    }

    #[test]
    fn archive_rejects_foreign_bytes() {
        let json = ValueBridge::<Profile>::encode(
            &JsonBridge,
            &Profile {
                name: "x".into(),
                age: 1,
                tags: vec![],
            },
        )
        .unwrap();
        let err = ValueBridge::<Session>::decode(&ArchiveBridge, &json).unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidDataCast {
                expected: BridgeKind::Archive,
                ..
            }
        ));

        let mut wrong_version = b"SKVA".to_vec();
        wrong_version.push(9);
        assert!(ValueBridge::<Session>::decode(&ArchiveBridge, &wrong_version).is_err());
    }

    #[test]
    fn text_bytes_rejected_by_numeric() {
        let bytes = TextBridge.encode(&"hello".to_string()).unwrap();
        assert!(ValueBridge::<u32>::decode(&NumericBridge, &bytes).is_err());
        assert!(BoolBridge.decode(&bytes).is_err());
    }
}
