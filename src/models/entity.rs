use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;

use super::kind::EntityKind;

/// One component of a natural key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyPart {
    Int(i64),
    Text(String),
}

/// Business key identifying "the same" real-world entity across devices.
pub type NaturalKey = Vec<KeyPart>;

/// Reasons a single record is rejected during reconciliation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RecordError {
    #[error("{kind} record is missing {field}")]
    MissingField {
        kind: EntityKind,
        field: &'static str,
    },
    #[error("invalid mobile number '{0}' (need at least 10 digits)")]
    InvalidMobile(String),
    #[error("invalid customer id {0}")]
    InvalidCustomerId(i64),
    #[error("malformed {kind} record: {reason}")]
    Malformed { kind: EntityKind, reason: String },
}

/// Business payload of a synchronized entity kind.
///
/// The payload carries only business fields; sync metadata (local id, server
/// id, timestamps, status) lives in [`super::Record`] locally and in the wire
/// envelope on the network.
pub trait Entity:
    Serialize + DeserializeOwned + Clone + fmt::Debug + PartialEq + Send + Sync + Unpin + 'static
{
    const KIND: EntityKind;

    /// Values for [`EntityKind::key_columns`], in the same order.
    fn natural_key(&self) -> NaturalKey;

    /// Checks the fields the server requires before accepting a write.
    fn validate(&self) -> Result<(), RecordError>;

    /// Device-local id of the customer this record belongs to.
    fn customer_id(&self) -> Option<i64> {
        None
    }

    /// Server id of the customer this record belongs to, when known.
    fn customer_server_id(&self) -> Option<&str> {
        None
    }

    /// Points this record at a customer.
    fn link_customer(&mut self, _local_id: i64, _server_id: Option<String>) {}
}

pub(crate) fn require(kind: EntityKind, field: &'static str, value: &str) -> Result<(), RecordError> {
    if value.trim().is_empty() {
        return Err(RecordError::MissingField { kind, field });
    }
    Ok(())
}
