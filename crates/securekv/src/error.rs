//! Store error types.
//!
//! Every public operation of [`SecureStore`](crate::SecureStore) returns a
//! typed success or exactly one [`StoreError`]. The set of kinds is closed:
//! callers can match on it exhaustively and decide whether to present, log,
//! or retry. "Item not found" is deliberately absent; reads model it as
//! `None` and removals treat it as success.

use crate::bridge::BridgeKind;
use crate::status::Status;

/// Unified error type for the secure store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An insert lost a race with another writer for the same key.
    ///
    /// Retryable: the item now exists, so a second `set` takes the update
    /// path.
    #[error("item already exists: key={key}")]
    Duplicate { key: String },

    /// The vault is locked or otherwise inaccessible in the current context
    /// (for example a locked device or a background process).
    ///
    /// Retryable once the vault is unlocked.
    #[error("vault interaction not allowed: {status}")]
    InteractionNotAllowed { status: Status },

    /// A value could not be encoded into bytes.
    #[error("conversion failed for {kind} value: {reason}")]
    Conversion { kind: BridgeKind, reason: String },

    /// Stored bytes do not decode with the expected bridge.
    #[error("invalid data cast to {expected} value: {reason}")]
    InvalidDataCast { expected: BridgeKind, reason: String },

    /// Any other vault status. The code is preserved for diagnostics.
    #[error("vault error {}: {}", .status.code(), .status.description())]
    Vault { status: Status },
}

impl StoreError {
    /// Classify a non-success, non-absence vault status.
    ///
    /// `key` names the item involved, when there is one.
    pub fn from_status(status: Status, key: Option<&str>) -> Self {
        match status {
            Status::DuplicateItem => Self::Duplicate {
                key: key.unwrap_or_default().to_string(),
            },
            Status::InteractionNotAllowed => Self::InteractionNotAllowed { status },
            other => Self::Vault { status: other },
        }
    }

    /// Whether the same call may succeed if the caller retries it.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Duplicate { .. } | Self::InteractionNotAllowed { .. }
        )
    }

    /// The underlying vault status, for the kinds that came from one.
    pub fn status(&self) -> Option<Status> {
        match self {
            Self::Duplicate { .. } => Some(Status::DuplicateItem),
            Self::InteractionNotAllowed { status } | Self::Vault { status } => Some(*status),
            Self::Conversion { .. } | Self::InvalidDataCast { .. } => None,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_and_locked_are_retryable() {
        let dup = StoreError::from_status(Status::DuplicateItem, Some("token"));
        assert!(matches!(dup, StoreError::Duplicate { ref key } if key == "token"));
        assert!(dup.is_retryable());

        let locked = StoreError::from_status(Status::InteractionNotAllowed, None);
        assert!(matches!(locked, StoreError::InteractionNotAllowed { .. }));
        assert!(locked.is_retryable());
    }

    #[test]
    fn other_statuses_become_vault_errors() {
        let err = StoreError::from_status(Status::Param, Some("k"));
        assert!(matches!(err, StoreError::Vault { status: Status::Param }));
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "vault error -50: One or more parameters passed to a function were not valid."
        );

        let unknown = StoreError::from_status(Status::from_code(-1234), None);
        assert_eq!(unknown.status(), Some(Status::Unknown(-1234)));
        assert!(unknown.to_string().contains("-1234"));
    }

    #[test]
    fn conversion_kinds_have_no_status() {
        let err = StoreError::InvalidDataCast {
            expected: BridgeKind::Text,
            reason: "invalid utf-8".into(),
        };
        assert_eq!(err.status(), None);
        assert!(!err.is_retryable());
    }
}
