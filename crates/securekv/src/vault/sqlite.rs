//! SQLite-backed encrypted vault.
//!
//! Stands in for the system credential store on platforms that lack one.
//! Payloads are sealed with AES-256-GCM before they are written; the
//! non-secret attributes are stored as JSON next to them so queries can be
//! matched without decrypting anything.
//!
//! # Schema
//!
//! - `items`: one row per item (`class`, `attributes` JSON, sealed `data`,
//!   `nonce`).
//! - `meta`: the PBKDF2 salt (passphrase-opened vaults) and a sealed key
//!   check used to reject a wrong key at open time.
//!
//! Backend failures become status codes: SQLite busy/locked is reported as
//! "interaction not allowed" (`-25308`), an unreadable payload as "data not
//! available" (`-25316`), anything else as an I/O error (`-36`).

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, ErrorCode, OptionalExtension, TransactionBehavior, params};

use crate::attributes::{NativeQuery, NativeValue, names};
use crate::crypto::{self, CryptoError};
use crate::status::OsStatus;

use super::matching::{
    self, DATA_NOT_AVAILABLE, DUPLICATE_ITEM, INTERACTION_NOT_ALLOWED, IO, ITEM_NOT_FOUND,
    StoredItem, SUCCESS,
};
use super::{BackendError, Vault, VaultReply};

const KEY_CHECK_PLAINTEXT: &[u8] = b"securekv key check v1";

/// Status returned when the connection mutex is poisoned.
const INTERNAL_COMPONENT: OsStatus = -2070;

/// Encrypted file-backed vault.
pub struct SqliteVault {
    conn: Mutex<Connection>,
    master_key: Vec<u8>,
}

impl std::fmt::Debug for SqliteVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteVault").finish_non_exhaustive()
    }
}

/// Why an operation could not produce a status on its own.
enum Failure {
    Db(rusqlite::Error),
    Status(OsStatus),
}

impl From<rusqlite::Error> for Failure {
    fn from(err: rusqlite::Error) -> Self {
        Self::Db(err)
    }
}

impl From<serde_json::Error> for Failure {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!(error = %err, "corrupt item attributes in vault database");
        Self::Status(DATA_NOT_AVAILABLE)
    }
}

impl Failure {
    fn into_status(self, operation: &'static str) -> OsStatus {
        match self {
            Self::Status(status) => status,
            Self::Db(rusqlite::Error::SqliteFailure(err, _))
                if matches!(err.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
            {
                tracing::warn!(operation, "vault database is locked");
                INTERACTION_NOT_ALLOWED
            }
            Self::Db(err) => {
                tracing::error!(operation, error = %err, "vault database failure");
                IO
            }
        }
    }
}

/// An item row with its payload still sealed.
struct Row {
    id: i64,
    item: StoredItem,
    sealed: Vec<u8>,
    nonce: Vec<u8>,
}

impl SqliteVault {
    /// Open (or create) a vault at `path`, sealed with a raw 256-bit key.
    ///
    /// A vault created with one key refuses to open with another.
    pub fn open(path: impl AsRef<Path>, master_key: &[u8]) -> Result<Self, BackendError> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "opening vault database");
        let conn = Connection::open(path)?;
        Self::configure_connection(&conn)?;
        Self::init(conn, master_key.to_vec())
    }

    /// Open a vault that lives only as long as this value.
    pub fn open_in_memory(master_key: &[u8]) -> Result<Self, BackendError> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, master_key.to_vec())
    }

    /// Open (or create) a vault at `path` whose key is derived from
    /// `passphrase`. The salt is generated on first open and kept in the
    /// database.
    pub fn open_with_passphrase(
        path: impl AsRef<Path>,
        passphrase: &str,
    ) -> Result<Self, BackendError> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "opening passphrase vault database");
        let conn = Connection::open(path)?;
        Self::configure_connection(&conn)?;
        Self::run_migrations(&conn)?;

        let salt: Option<Vec<u8>> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'kdf_salt'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        let salt = match salt {
            Some(salt) => salt,
            None => {
                let salt = crypto::random_bytes(crypto::SALT_LEN)?;
                conn.execute(
                    "INSERT INTO meta (key, value) VALUES ('kdf_salt', ?1)",
                    params![salt],
                )?;
                tracing::debug!("generated vault key derivation salt");
                salt
            }
        };

        let key = crypto::derive_key_with_salt(passphrase.as_bytes(), &salt);
        Self::init(conn, key.to_vec())
    }

    fn configure_connection(conn: &Connection) -> Result<(), BackendError> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 2000;
             PRAGMA secure_delete = ON;",
        )?;
        Ok(())
    }

    fn run_migrations(conn: &Connection) -> Result<(), BackendError> {
        tracing::debug!("running vault schema migrations");
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS meta (
                key   TEXT PRIMARY KEY,
                value BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS items (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                class      TEXT NOT NULL CHECK(class IN ('genp','inet')),
                attributes TEXT NOT NULL,
                data       BLOB NOT NULL,
                nonce      BLOB NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_items_class ON items(class);",
        )
        .map_err(|e| BackendError::Migration {
            reason: e.to_string(),
        })?;
        Ok(())
    }

    fn init(conn: Connection, master_key: Vec<u8>) -> Result<Self, BackendError> {
        if master_key.len() != crypto::KEY_LEN {
            return Err(CryptoError::KeyLength(master_key.len()).into());
        }
        Self::run_migrations(&conn)?;
        Self::verify_key(&conn, &master_key)?;
        tracing::info!("vault database ready");
        Ok(Self {
            conn: Mutex::new(conn),
            master_key,
        })
    }

    /// Store a sealed marker on first open; check it on later opens.
    fn verify_key(conn: &Connection, key: &[u8]) -> Result<(), BackendError> {
        let check: Option<Vec<u8>> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'key_check'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match check {
            Some(blob) => {
                if blob.len() < crypto::NONCE_LEN_BYTES {
                    return Err(CryptoError::Open.into());
                }
                let (nonce, sealed) = blob.split_at(crypto::NONCE_LEN_BYTES);
                let mut nonce_bytes = [0u8; crypto::NONCE_LEN_BYTES];
                nonce_bytes.copy_from_slice(nonce);
                let plain = crypto::decrypt(&nonce_bytes, sealed, key)?;
                if plain != KEY_CHECK_PLAINTEXT {
                    return Err(CryptoError::Open.into());
                }
            }
            None => {
                let (nonce, sealed) = crypto::encrypt(KEY_CHECK_PLAINTEXT, key)?;
                let mut blob = nonce.to_vec();
                blob.extend_from_slice(&sealed);
                conn.execute(
                    "INSERT INTO meta (key, value) VALUES ('key_check', ?1)",
                    params![blob],
                )?;
            }
        }
        Ok(())
    }

    // -- Internal helpers ---------------------------------------------------

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, Failure>,
        operation: &'static str,
    ) -> Result<T, OsStatus> {
        let mut conn = self.conn.lock().map_err(|_| {
            tracing::error!(operation, "vault connection mutex poisoned");
            INTERNAL_COMPONENT
        })?;
        f(&mut conn).map_err(|failure| failure.into_status(operation))
    }

    /// Every row of `class`, attributes decoded, payload still sealed.
    fn load_rows(conn: &Connection, class: &str) -> Result<Vec<Row>, Failure> {
        let mut stmt = conn
            .prepare("SELECT id, attributes, data, nonce FROM items WHERE class = ?1 ORDER BY id")?;
        let raw = stmt.query_map(params![class], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
                row.get::<_, Vec<u8>>(3)?,
            ))
        })?;

        let mut rows = Vec::new();
        for entry in raw {
            let (id, attributes, sealed, nonce) = entry?;
            let attributes: NativeQuery = serde_json::from_str(&attributes)?;
            rows.push(Row {
                id,
                item: StoredItem {
                    attributes,
                    data: Vec::new(),
                },
                sealed,
                nonce,
            });
        }
        Ok(rows)
    }

    fn open_payload(&self, row: &Row) -> Result<Vec<u8>, Failure> {
        let nonce: [u8; crypto::NONCE_LEN_BYTES] =
            row.nonce.as_slice().try_into().map_err(|_| {
                tracing::error!(id = row.id, "stored nonce has the wrong length");
                Failure::Status(DATA_NOT_AVAILABLE)
            })?;
        crypto::decrypt(&nonce, &row.sealed, &self.master_key).map_err(|e| {
            tracing::error!(id = row.id, error = %e, "cannot open stored payload");
            Failure::Status(DATA_NOT_AVAILABLE)
        })
    }

    fn seal(&self, data: &[u8]) -> Result<(Vec<u8>, Vec<u8>), Failure> {
        let (nonce, sealed) = crypto::encrypt(data, &self.master_key).map_err(|e| {
            tracing::error!(error = %e, "cannot seal payload");
            Failure::Status(DATA_NOT_AVAILABLE)
        })?;
        Ok((nonce.to_vec(), sealed))
    }
}

impl Vault for SqliteVault {
    fn fetch(&self, query: &NativeQuery) -> VaultReply {
        let class = match matching::require_class(query) {
            Ok(class) => class,
            Err(status) => return VaultReply::status(status),
        };
        let wants_data = query
            .get(names::RETURN_DATA)
            .and_then(NativeValue::as_bool)
            .unwrap_or(false);

        let result = self.with_conn(
            |conn| {
                let mut found = Vec::new();
                for row in Self::load_rows(conn, class.as_native())? {
                    if !matching::matches(&row.item, query) {
                        continue;
                    }
                    let mut item = row.item.clone();
                    if wants_data {
                        item.data = self.open_payload(&row)?;
                    }
                    found.push(item);
                }
                Ok(matching::fetch_reply(query, &found))
            },
            "fetch",
        );
        result.unwrap_or_else(VaultReply::status)
    }

    fn insert(&self, record: &NativeQuery) -> OsStatus {
        let class = match matching::require_class(record) {
            Ok(class) => class,
            Err(status) => return status,
        };

        let result = self.with_conn(
            |conn| {
                let item = StoredItem::from_record(record);
                let (nonce, sealed) = self.seal(&item.data)?;
                let attributes = serde_json::to_string(&item.attributes).map_err(|e| {
                    tracing::error!(error = %e, "cannot serialize item attributes");
                    Failure::Status(IO)
                })?;

                // Immediate: a second writer waits here rather than racing
                // between the duplicate check and the insert.
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let duplicate = Self::load_rows(&tx, class.as_native())?
                    .iter()
                    .any(|row| matching::same_primary_key(&row.item, &item));
                if duplicate {
                    return Ok(DUPLICATE_ITEM);
                }
                tx.execute(
                    "INSERT INTO items (class, attributes, data, nonce) VALUES (?1, ?2, ?3, ?4)",
                    params![class.as_native(), attributes, sealed, nonce],
                )?;
                tx.commit()?;
                Ok(SUCCESS)
            },
            "insert",
        );
        let status = result.unwrap_or_else(|status| status);
        matching::trace_status("insert", status);
        status
    }

    fn update(&self, query: &NativeQuery, changes: &NativeQuery) -> OsStatus {
        let class = match matching::require_class(query) {
            Ok(class) => class,
            Err(status) => return status,
        };
        if let Err(status) = matching::validate_changes(changes) {
            return status;
        }
        let new_payload = changes.get(names::VALUE_DATA).and_then(NativeValue::as_data);

        let result = self.with_conn(
            |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let rows = Self::load_rows(&tx, class.as_native())?;
                let (targets, others): (Vec<&Row>, Vec<&Row>) =
                    rows.iter().partition(|row| matching::matches(&row.item, query));
                if targets.is_empty() {
                    return Ok(ITEM_NOT_FOUND);
                }

                let staged: Vec<(&Row, StoredItem)> = targets
                    .iter()
                    .map(|row| (*row, row.item.with_changes(changes)))
                    .collect();
                for (row, updated) in &staged {
                    let collides = others
                        .iter()
                        .any(|other| matching::same_primary_key(&other.item, updated))
                        || staged.iter().any(|(other, candidate)| {
                            other.id != row.id && matching::same_primary_key(candidate, updated)
                        });
                    if collides {
                        return Ok(DUPLICATE_ITEM);
                    }
                }

                let sealed_payload = match new_payload {
                    Some(data) => Some(self.seal(data)?),
                    None => None,
                };
                for (row, updated) in &staged {
                    let attributes = serde_json::to_string(&updated.attributes)?;
                    match &sealed_payload {
                        Some((nonce, sealed)) => tx.execute(
                            "UPDATE items SET attributes = ?1, data = ?2, nonce = ?3 WHERE id = ?4",
                            params![attributes, sealed, nonce, row.id],
                        )?,
                        None => tx.execute(
                            "UPDATE items SET attributes = ?1 WHERE id = ?2",
                            params![attributes, row.id],
                        )?,
                    };
                }
                tx.commit()?;
                Ok(SUCCESS)
            },
            "update",
        );
        let status = result.unwrap_or_else(|status| status);
        matching::trace_status("update", status);
        status
    }

    fn delete(&self, query: &NativeQuery) -> OsStatus {
        let class = match matching::require_class(query) {
            Ok(class) => class,
            Err(status) => return status,
        };

        let result = self.with_conn(
            |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let ids: Vec<i64> = Self::load_rows(&tx, class.as_native())?
                    .into_iter()
                    .filter(|row| matching::matches(&row.item, query))
                    .map(|row| row.id)
                    .collect();
                if ids.is_empty() {
                    return Ok(ITEM_NOT_FOUND);
                }
                for id in &ids {
                    tx.execute("DELETE FROM items WHERE id = ?1", params![id])?;
                }
                tx.commit()?;
                tracing::debug!(count = ids.len(), "deleted vault rows");
                Ok(SUCCESS)
            },
            "delete",
        );
        let status = result.unwrap_or_else(|status| status);
        matching::trace_status("delete", status);
        status
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
