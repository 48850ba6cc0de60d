//! The vault protocol and its backends.
//!
//! A vault is an opaque secure-storage service reached through four
//! primitives. Each takes a native query dictionary (a composed
//! [`AttributeSet`](crate::AttributeSet)) and answers with a raw status code,
//! plus a payload for fetches:
//!
//! | Primitive | Input                         | Output |
//! |-----------|-------------------------------|--------|
//! | fetch     | query                         | status + optional [`Payload`] |
//! | insert    | full record                   | status |
//! | update    | query + attributes to apply   | status |
//! | delete    | query                         | status |
//!
//! Backends:
//!
//! - [`MemoryVault`]: in-process emulation, for tests and ephemeral use.
//! - [`SqliteVault`]: encrypted file-backed vault for platforms without a
//!   system credential store.
//! - `KeychainVault` (macOS only): the system keychain.
//!
//! [`platform_vault`] picks the best one for the current platform.

mod matching;
mod memory;
mod sqlite;

#[cfg(target_os = "macos")]
mod keychain;

use std::sync::Arc;

use crate::attributes::NativeQuery;
use crate::config::StoreConfig;
use crate::crypto::CryptoError;
use crate::status::OsStatus;

pub use memory::MemoryVault;
pub use sqlite::SqliteVault;

#[cfg(target_os = "macos")]
pub use keychain::KeychainVault;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Abstraction over a platform credential vault.
///
/// Implementations must be `Send + Sync`; the store adds no locking of its
/// own, so any serialization is the backend's business. Every call completes
/// after one round trip.
pub trait Vault: Send + Sync {
    /// Look up items matching `query`.
    fn fetch(&self, query: &NativeQuery) -> VaultReply;

    /// Add a new item described by `record`.
    fn insert(&self, record: &NativeQuery) -> OsStatus;

    /// Apply `changes` to every item matching `query`.
    fn update(&self, query: &NativeQuery, changes: &NativeQuery) -> OsStatus;

    /// Remove every item matching `query`.
    fn delete(&self, query: &NativeQuery) -> OsStatus;
}

impl<T: Vault + ?Sized> Vault for Arc<T> {
    fn fetch(&self, query: &NativeQuery) -> VaultReply {
        (**self).fetch(query)
    }

    fn insert(&self, record: &NativeQuery) -> OsStatus {
        (**self).insert(record)
    }

    fn update(&self, query: &NativeQuery, changes: &NativeQuery) -> OsStatus {
        (**self).update(query, changes)
    }

    fn delete(&self, query: &NativeQuery) -> OsStatus {
        (**self).delete(query)
    }
}

/// Answer to a fetch.
#[derive(Clone, PartialEq)]
pub struct VaultReply {
    pub status: OsStatus,
    pub payload: Option<Payload>,
}

impl VaultReply {
    /// A reply carrying only a status.
    pub fn status(status: OsStatus) -> Self {
        Self {
            status,
            payload: None,
        }
    }

    /// A successful reply with `payload`.
    pub fn success(payload: Option<Payload>) -> Self {
        Self { status: 0, payload }
    }
}

impl std::fmt::Debug for VaultReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Payload bytes are secrets; only their shape is printed.
        let payload = match &self.payload {
            None => "none".to_string(),
            Some(Payload::Data(d)) => format!("data({} bytes)", d.len()),
            Some(Payload::Attributes(a)) => format!("attributes({} entries)", a.len()),
            Some(Payload::Items(items)) => format!("items({})", items.len()),
        };
        f.debug_struct("VaultReply")
            .field("status", &self.status)
            .field("payload", &payload)
            .finish()
    }
}

/// What a successful fetch returns, depending on the request flags.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// `r_Data` with a single match.
    Data(Vec<u8>),
    /// `r_Attributes` with a single match; includes `v_Data` when `r_Data`
    /// was also requested.
    Attributes(NativeQuery),
    /// `m_LimitAll`: one attribute dictionary per match.
    Items(Vec<NativeQuery>),
}

// ---------------------------------------------------------------------------
// Backend setup errors
// ---------------------------------------------------------------------------

/// Failure to open a vault backend.
///
/// Once a backend is open, its failures travel as status codes instead.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("vault schema migration failed: {reason}")]
    Migration { reason: String },
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// The best available vault for the current platform.
///
/// - **macOS**: [`KeychainVault`] (the system keychain).
/// - **Elsewhere**: [`SqliteVault`] at `<data_dir>/vault.db`, sealed with a
///   device-derived key.
pub fn platform_vault(config: &StoreConfig) -> Result<Arc<dyn Vault>, BackendError> {
    #[cfg(target_os = "macos")]
    {
        let _ = config;
        tracing::info!("using macOS keychain as vault");
        Ok(Arc::new(KeychainVault::new()))
    }

    #[cfg(not(target_os = "macos"))]
    {
        std::fs::create_dir_all(&config.data_dir)?;
        let path = config.data_dir.join("vault.db");
        tracing::info!(path = %path.display(), "using file-backed vault");
        let key = crate::crypto::device_key();
        Ok(Arc::new(SqliteVault::open(&path, &key)?))
    }
}
