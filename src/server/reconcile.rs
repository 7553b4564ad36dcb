//! Server-side reconciliation of uploaded batches.
//!
//! Each uploaded record is upserted on its own; a bad record is logged and
//! counted but does not stop the rest of the batch. The response carries the
//! records processed in this request (with the uploader's `localId`) followed
//! by everything else modified since the caller's watermark.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;

use super::storage::{ServerStorage, StorageError};
use crate::models::{Customer, Entity, Measurement, Order, RecordError};
use crate::sync::mapper::{into_upload, stored_to_wire};
use crate::sync::protocol::{BatchSyncResponse, KindSyncResponse, WireRecord};

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ReconcileError {
    /// True when only the record is at fault and the batch can go on.
    pub fn is_record_error(&self) -> bool {
        match self {
            ReconcileError::Record(_) => true,
            ReconcileError::Storage(e) => e.is_record_error(),
        }
    }
}

/// Batch body as received. Records stay raw JSON until processed one by one
/// so a malformed record only rejects itself.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IncomingBatch {
    pub customers: Vec<Value>,
    pub orders: Vec<Value>,
    pub measurements: Vec<Value>,
    pub last_sync_timestamp: i64,
}

/// Per-kind batch body as received.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IncomingKindBatch {
    pub data: Vec<Value>,
    pub last_sync_timestamp: i64,
}

/// Result of reconciling one kind.
#[derive(Debug)]
pub struct KindOutcome<E> {
    pub records: Vec<WireRecord<E>>,
    pub accepted: usize,
    pub rejected: usize,
}

/// Parses, validates and stores one uploaded record.
pub async fn reconcile_one<E: Entity>(
    storage: &ServerStorage,
    value: Value,
) -> Result<WireRecord<E>, ReconcileError> {
    let wire: WireRecord<E> =
        serde_json::from_value(value).map_err(|e| RecordError::Malformed {
            kind: E::KIND,
            reason: e.to_string(),
        })?;
    wire.data.validate()?;

    let upload = into_upload(wire);
    let stored = storage.upsert(&upload).await?;
    tracing::debug!(
        "{} {} stored (local id {:?})",
        E::KIND,
        stored.id,
        upload.local_id
    );

    Ok(stored_to_wire(stored, upload.local_id))
}

/// Upserts every uploaded record of one kind, then appends the delta since
/// `since` minus the ids written here.
pub async fn reconcile_kind<E: Entity>(
    storage: &ServerStorage,
    uploads: Vec<Value>,
    since: i64,
) -> Result<KindOutcome<E>, StorageError> {
    let mut records = Vec::with_capacity(uploads.len());
    let mut written_ids = HashSet::new();
    let mut rejected = 0;

    for value in uploads {
        match reconcile_one::<E>(storage, value).await {
            Ok(wire) => {
                if let Some(id) = &wire.id {
                    written_ids.insert(id.clone());
                }
                records.push(wire);
            }
            Err(ReconcileError::Storage(e)) if !e.is_record_error() => return Err(e),
            Err(e) => {
                tracing::warn!("Skipping {} record: {}", E::KIND, e);
                rejected += 1;
            }
        }
    }

    let accepted = records.len();
    let delta = storage.modified_since::<E>(since, &written_ids).await?;
    records.extend(delta.into_iter().map(|stored| stored_to_wire(stored, None)));

    Ok(KindOutcome {
        records,
        accepted,
        rejected,
    })
}

fn rejection_message(rejected: usize) -> Option<String> {
    (rejected > 0).then(|| format!("{} record(s) rejected", rejected))
}

/// Handles a combined batch for all three kinds.
pub async fn reconcile_batch(
    storage: &ServerStorage,
    batch: IncomingBatch,
) -> Result<BatchSyncResponse, StorageError> {
    let server_timestamp = storage.delta_timestamp().await;
    let since = batch.last_sync_timestamp;

    let customers = reconcile_kind::<Customer>(storage, batch.customers, since).await?;
    let orders = reconcile_kind::<Order>(storage, batch.orders, since).await?;
    let measurements = reconcile_kind::<Measurement>(storage, batch.measurements, since).await?;

    let rejected = customers.rejected + orders.rejected + measurements.rejected;
    tracing::info!(
        "Batch sync since {}: {}/{}/{} uploaded (customers/orders/measurements), {} rejected, {} returned",
        since,
        customers.accepted,
        orders.accepted,
        measurements.accepted,
        rejected,
        customers.records.len() + orders.records.len() + measurements.records.len()
    );

    Ok(BatchSyncResponse {
        success: rejected == 0,
        customers: Some(customers.records),
        orders: Some(orders.records),
        measurements: Some(measurements.records),
        message: rejection_message(rejected),
        server_timestamp,
    })
}

/// Handles a batch for a single kind.
pub async fn reconcile_kind_batch<E: Entity>(
    storage: &ServerStorage,
    batch: IncomingKindBatch,
) -> Result<KindSyncResponse<E>, StorageError> {
    let server_timestamp = storage.delta_timestamp().await;
    let outcome = reconcile_kind::<E>(storage, batch.data, batch.last_sync_timestamp).await?;

    tracing::info!(
        "{} batch since {}: {} uploaded, {} rejected, {} returned",
        E::KIND,
        batch.last_sync_timestamp,
        outcome.accepted,
        outcome.rejected,
        outcome.records.len()
    );

    Ok(KindSyncResponse {
        success: outcome.rejected == 0,
        data: outcome.records,
        message: rejection_message(outcome.rejected),
        server_timestamp,
    })
}
