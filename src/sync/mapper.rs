//! Conversions between local records, wire records and server rows.

use crate::models::{Entity, Record};
use crate::server::storage::StoredRecord;

use super::protocol::WireRecord;

/// Builds the upload form of a local record.
pub fn to_wire<E: Entity>(record: &Record<E>) -> WireRecord<E> {
    WireRecord {
        id: record.server_id.clone(),
        local_id: Some(record.local_id),
        last_modified: record.last_modified,
        data: record.data.clone(),
    }
}

/// A client write as seen by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct Upload<E> {
    pub server_id: Option<String>,
    pub local_id: Option<i64>,
    /// The device's mutation time, used for last-write-wins.
    pub client_modified: i64,
    pub data: E,
}

pub fn into_upload<E>(wire: WireRecord<E>) -> Upload<E> {
    Upload {
        server_id: wire.id.filter(|id| !id.is_empty()),
        local_id: wire.local_id,
        client_modified: wire.last_modified,
        data: wire.data,
    }
}

/// Builds the response form of a stored row. `local_id` is set only when the
/// row was written from the requesting device in this request.
pub fn stored_to_wire<E>(stored: StoredRecord<E>, local_id: Option<i64>) -> WireRecord<E> {
    WireRecord {
        id: Some(stored.id),
        local_id,
        last_modified: stored.last_modified,
        data: stored.data,
    }
}

/// A server record as seen by the device.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRecord<E> {
    pub server_id: String,
    pub local_id: Option<i64>,
    pub last_modified: i64,
    pub data: E,
}

/// Returns `None` for records without a server id; the device cannot link them.
pub fn into_remote<E>(wire: WireRecord<E>) -> Option<RemoteRecord<E>> {
    let server_id = wire.id.filter(|id| !id.is_empty())?;
    Some(RemoteRecord {
        server_id,
        local_id: wire.local_id,
        last_modified: wire.last_modified,
        data: wire.data,
    })
}
