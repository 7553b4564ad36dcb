//! Sync client: runs one sync cycle against the server.
//!
//! A cycle uploads every PENDING or FAILED record in one batch, applies the
//! server's answer to the local store and, when everything was incorporated,
//! advances the watermark to the server's timestamp.

use std::collections::{HashMap, HashSet};
use std::fmt;
use tokio::sync::Mutex;

use super::device::DeviceState;
use super::mapper::{into_remote, to_wire, RemoteRecord};
use super::protocol::{BatchSyncRequest, KindSyncRequest, WireRecord};
use super::status::{
    StatusReporter, MSG_COMPLETED, MSG_FAILED, MSG_NO_NETWORK, MSG_PARTIAL,
};
use super::transport::{SyncTransport, TransportError};
use crate::db::{LocalStore, StoreError};
use crate::models::{Customer, Entity, Measurement, Order, Record};

/// Result of one sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Everything uploaded and incorporated; watermark advanced.
    Success,
    /// Response applied, but the server rejected something or a record could
    /// not be applied locally. Watermark unchanged.
    Partial,
    /// Transport or server failure. Nothing was changed locally.
    Failed,
    /// Server unreachable. Nothing was changed locally.
    NoNetwork,
}

impl SyncOutcome {
    pub fn should_retry(&self) -> bool {
        matches!(self, SyncOutcome::Failed | SyncOutcome::NoNetwork)
    }

    pub fn message(&self) -> &'static str {
        match self {
            SyncOutcome::Success => MSG_COMPLETED,
            SyncOutcome::Partial => MSG_PARTIAL,
            SyncOutcome::Failed => MSG_FAILED,
            SyncOutcome::NoNetwork => MSG_NO_NETWORK,
        }
    }

    fn is_success(&self) -> bool {
        matches!(self, SyncOutcome::Success | SyncOutcome::Partial)
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOutcome::Success => write!(f, "SUCCESS"),
            SyncOutcome::Partial => write!(f, "PARTIAL"),
            SyncOutcome::Failed => write!(f, "FAILED"),
            SyncOutcome::NoNetwork => write!(f, "NO_NETWORK"),
        }
    }
}

/// Errors that end a cycle early.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("local store error: {0}")]
    Store(#[from] StoreError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Drives sync cycles for one device.
pub struct SyncClient<T, D> {
    transport: T,
    device: D,
    store: LocalStore,
    guard: Mutex<()>,
    status: StatusReporter,
}

impl<T: SyncTransport, D: DeviceState> SyncClient<T, D> {
    pub fn new(transport: T, device: D, store: LocalStore) -> Self {
        Self {
            transport,
            device,
            store,
            guard: Mutex::new(()),
            status: StatusReporter::new(),
        }
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn status(&self) -> &StatusReporter {
        &self.status
    }

    /// Runs one full cycle. Concurrent calls wait for each other.
    pub async fn run_sync_cycle(&self) -> SyncOutcome {
        let _guard = self.guard.lock().await;
        self.status.begin();

        let outcome = match self.cycle().await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Sync cycle failed: {}", e);
                SyncOutcome::Failed
            }
        };

        tracing::info!("Sync cycle finished: {}", outcome);
        self.status.finish(outcome.is_success(), outcome.message());
        outcome
    }

    async fn cycle(&self) -> Result<SyncOutcome, SyncError> {
        if !self.device.is_network_available().await {
            tracing::info!("No network connection, skipping sync");
            return Ok(SyncOutcome::NoNetwork);
        }

        let watermark = self.store.sync_state().last_sync_timestamp().await?;
        let customers = self.pending::<Customer>().await?;
        let orders = self.pending::<Order>().await?;
        let measurements = self.pending::<Measurement>().await?;

        let request = BatchSyncRequest {
            customers: customers.iter().map(to_wire).collect(),
            orders: orders.iter().map(to_wire).collect(),
            measurements: measurements.iter().map(to_wire).collect(),
            last_sync_timestamp: watermark,
        };
        tracing::info!(
            "Uploading {} customer(s), {} order(s), {} measurement(s) since {}",
            request.customers.len(),
            request.orders.len(),
            request.measurements.len(),
            watermark
        );

        let response = match self.transport.batch_sync(&request).await {
            Ok(response) => response,
            Err(e) => return Ok(transport_outcome(e)),
        };

        // Customers first so orders and measurements can relink to them.
        let mut apply_failures = 0;
        apply_failures += self.apply_group(&customers, response.customers).await;
        apply_failures += self.apply_group(&orders, response.orders).await;
        apply_failures += self.apply_group(&measurements, response.measurements).await;

        if !response.success {
            tracing::warn!(
                "Server reported a partial sync: {}",
                response.message.as_deref().unwrap_or("no details")
            );
            return Ok(SyncOutcome::Partial);
        }
        if apply_failures > 0 {
            tracing::warn!("{} record(s) could not be applied locally", apply_failures);
            return Ok(SyncOutcome::Partial);
        }

        let watermark = self
            .store
            .sync_state()
            .advance_watermark(response.server_timestamp)
            .await?;
        tracing::debug!("Watermark now {}", watermark);

        Ok(SyncOutcome::Success)
    }

    /// Syncs a single kind through its own batch endpoint. The shared
    /// watermark is read but never advanced.
    pub async fn sync_kind<E: Entity>(&self) -> SyncOutcome {
        let _guard = self.guard.lock().await;

        let outcome = match self.kind_cycle::<E>().await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("{} sync failed: {}", E::KIND, e);
                SyncOutcome::Failed
            }
        };

        tracing::info!("{} sync finished: {}", E::KIND, outcome);
        outcome
    }

    async fn kind_cycle<E: Entity>(&self) -> Result<SyncOutcome, SyncError> {
        if !self.device.is_network_available().await {
            return Ok(SyncOutcome::NoNetwork);
        }

        let watermark = self.store.sync_state().last_sync_timestamp().await?;
        let pending = self.pending::<E>().await?;
        let request = KindSyncRequest {
            data: pending.iter().map(to_wire).collect(),
            last_sync_timestamp: watermark,
        };

        let response = match self.transport.sync_kind(&request).await {
            Ok(response) => response,
            Err(e) => return Ok(transport_outcome(e)),
        };

        let failures = self.apply_group(&pending, Some(response.data)).await;
        if response.success && failures == 0 {
            Ok(SyncOutcome::Success)
        } else {
            Ok(SyncOutcome::Partial)
        }
    }

    /// PENDING and FAILED records of one kind, with `customerServerId` filled
    /// in from already-synced customers.
    async fn pending<E: Entity>(&self) -> Result<Vec<Record<E>>, StoreError> {
        let mut records = self.store.repo::<E>().list_unsynced().await?;
        let customers = self.store.repo::<Customer>();

        for record in &mut records {
            if record.data.customer_server_id().is_some() {
                continue;
            }
            let Some(customer_id) = record.data.customer_id() else {
                continue;
            };
            if let Some(customer) = customers.get_by_id(customer_id).await? {
                if customer.server_id.is_some() {
                    record.data.link_customer(customer_id, customer.server_id);
                }
            }
        }

        Ok(records)
    }

    /// Applies one response group. Each record is applied on its own; the
    /// number of records that failed is returned. Uploaded records the server
    /// did not confirm are marked FAILED.
    async fn apply_group<E: Entity>(
        &self,
        uploaded: &[Record<E>],
        group: Option<Vec<WireRecord<E>>>,
    ) -> usize {
        let uploaded_modified: HashMap<i64, i64> = uploaded
            .iter()
            .map(|record| (record.local_id, record.last_modified))
            .collect();
        let mut confirmed = HashSet::new();
        let mut failures = 0;

        match group {
            Some(records) => {
                for wire in records {
                    let Some(remote) = into_remote(wire) else {
                        tracing::warn!("Ignoring {} without server id", E::KIND);
                        continue;
                    };
                    match self.apply_record(remote, &uploaded_modified).await {
                        Ok(Some(local_id)) => {
                            confirmed.insert(local_id);
                        }
                        Ok(None) => {}
                        Err(e) => {
                            tracing::warn!("Failed to apply {}: {}", E::KIND, e);
                            failures += 1;
                        }
                    }
                }
            }
            None => tracing::warn!("Response has no {} group", E::KIND),
        }

        let unconfirmed: Vec<i64> = uploaded_modified
            .keys()
            .copied()
            .filter(|local_id| !confirmed.contains(local_id))
            .collect();
        if !unconfirmed.is_empty() {
            tracing::warn!(
                "{} uploaded {} record(s) not confirmed, marking FAILED",
                unconfirmed.len(),
                E::KIND
            );
            if let Err(e) = self.store.repo::<E>().mark_failed(&unconfirmed).await {
                tracing::error!("Failed to mark {} records FAILED: {}", E::KIND, e);
                failures += 1;
            }
        }

        failures
    }

    /// Returns the local id when the record confirms one of this device's
    /// uploads.
    async fn apply_record<E: Entity>(
        &self,
        mut remote: RemoteRecord<E>,
        uploaded_modified: &HashMap<i64, i64>,
    ) -> Result<Option<i64>, StoreError> {
        let repo = self.store.repo::<E>();
        self.relink(&mut remote.data).await?;

        if let Some(local_id) = remote.local_id {
            if let Some(&snapshot) = uploaded_modified.get(&local_id) {
                if repo.confirm_upload(local_id, snapshot, &remote).await? {
                    tracing::debug!("{} {} -> {}", E::KIND, local_id, remote.server_id);
                    return Ok(Some(local_id));
                }
                tracing::warn!("{} {} disappeared during sync", E::KIND, local_id);
                return Ok(None);
            }
        }

        match repo.get_by_server_id(&remote.server_id).await? {
            Some(local) => {
                if !repo.overwrite_if_synced(local.local_id, &remote).await? {
                    tracing::debug!(
                        "{} {} has unsent local edits, keeping them",
                        E::KIND,
                        local.local_id
                    );
                }
            }
            None => {
                let local_id = repo.insert_remote(&remote).await?;
                tracing::debug!("{} {} inserted as {}", E::KIND, remote.server_id, local_id);
            }
        }

        Ok(None)
    }

    /// Points an order or measurement at the local copy of its customer.
    async fn relink<E: Entity>(&self, data: &mut E) -> Result<(), StoreError> {
        let Some(server_id) = data.customer_server_id().map(str::to_owned) else {
            return Ok(());
        };
        if let Some(customer) = self
            .store
            .repo::<Customer>()
            .get_by_server_id(&server_id)
            .await?
        {
            data.link_customer(customer.local_id, Some(server_id));
        }
        Ok(())
    }
}

fn transport_outcome(error: TransportError) -> SyncOutcome {
    if error.is_connectivity() {
        tracing::warn!("Server unreachable: {}", error);
        SyncOutcome::NoNetwork
    } else {
        tracing::error!("Sync request failed: {}", error);
        SyncOutcome::Failed
    }
}
