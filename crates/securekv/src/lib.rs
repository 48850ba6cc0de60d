//! Typed secure key-value store over the platform credential vault.
//!
//! Client code declares typed keys once and then saves, reads and deletes
//! values by key. Every operation applies the store's policy attributes
//! (accessibility, sync, access group, and the service or server identity)
//! so items land in the vault consistently.
//!
//! # Modules
//!
//! - [`attributes`]: typed attribute entries and their native query form.
//! - [`descriptor`]: key descriptors with metadata and per-key overrides.
//! - [`bridge`]: value bridges converting typed values to stored bytes.
//! - [`store`]: the store itself and its identity.
//! - [`status`] / [`error`]: vault status codes and the error kinds they map to.
//! - [`vault`]: the vault protocol and its backends.
//! - [`config`]: store defaults loaded from TOML or the environment.
//! - [`observe`]: change notification for a single key.
//! - [`crypto`]: payload sealing for the file-backed vault.
//!
//! # Quick Start
//!
//! ```rust
//! use securekv::{JsonKey, Key, SecureStore, StoreIdentity};
//!
//! # fn example() -> securekv::Result<()> {
//! let store = SecureStore::in_memory(StoreIdentity::generic("com.example.app"));
//!
//! let token = Key::<String>::new("api-token").label("API token");
//! store.set(&"sk-123".to_string(), &token)?;
//! assert_eq!(store.get(&token)?.as_deref(), Some("sk-123"));
//!
//! let recent = JsonKey::<Vec<String>>::new("recent-files");
//! assert_eq!(store.get_or(&recent, Vec::new())?, Vec::<String>::new());
//!
//! store.remove(&token)?;
//! assert!(!store.contains(&token)?);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

pub mod attributes;
pub mod bridge;
pub mod config;
pub mod crypto;
pub mod descriptor;
pub mod error;
pub mod observe;
pub mod status;
pub mod store;
pub mod vault;

// Re-export the most commonly used types at the crate root for convenience.
pub use attributes::{
    Accessibility, Attribute, AttributeSet, AuthScheme, ItemClass, MatchLimit, NativeQuery,
    NativeValue, ProtocolScheme,
};
pub use bridge::{
    ArchiveBridge, BoolBridge, BridgeKind, BytesBridge, JsonBridge, NumericBridge, Storable,
    TextBridge, ValueBridge,
};
pub use config::{ConfigError, StoreConfig};
pub use descriptor::{ArchivedKey, JsonKey, Key, KeyDescriptor, Metadata};
pub use error::{Result, StoreError};
pub use observe::KeyObserver;
pub use status::{OsStatus, Status};
pub use store::{IdentityAttributes, NetworkIdentity, SecureStore, StoreIdentity};
pub use vault::{
    BackendError, MemoryVault, Payload, SqliteVault, Vault, VaultReply, platform_vault,
};

#[cfg(target_os = "macos")]
pub use vault::KeychainVault;
