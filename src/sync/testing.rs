//! In-process server and device fixtures for end-to-end sync tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::{tempdir, TempDir};

use super::client::SyncClient;
use super::device::DeviceState;
use super::protocol::{BatchSyncRequest, BatchSyncResponse, KindSyncRequest, KindSyncResponse};
use super::transport::{SyncTransport, TransportError};
use crate::db::LocalStore;
use crate::models::{Customer, Entity, EntityKind, Order, Record};
use crate::server::reconcile::{reconcile_batch, reconcile_kind_batch, IncomingBatch, IncomingKindBatch};
use crate::server::{ServerStorage, StoredRecord};

#[derive(Default)]
struct Shared {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    slow: AtomicBool,
    fail_after_send: AtomicBool,
    last_response: Mutex<Option<BatchSyncResponse>>,
}

/// Passes requests straight to the reconciler, through a JSON round trip.
#[derive(Clone)]
pub(crate) struct LoopbackTransport {
    storage: ServerStorage,
    shared: Arc<Shared>,
}

impl LoopbackTransport {
    /// Lets the server process requests but loses the responses.
    pub(crate) fn fail_after_send(&self, fail: bool) {
        self.shared.fail_after_send.store(fail, Ordering::SeqCst);
    }

    /// Holds every batch request open for a while before answering.
    pub(crate) fn slow_calls(&self, slow: bool) {
        self.shared.slow.store(slow, Ordering::SeqCst);
    }

    async fn exchange(&self, request: &BatchSyncRequest) -> Result<BatchSyncResponse, TransportError> {
        if self.shared.slow.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        let batch: IncomingBatch = through_json(request)?;
        let response = reconcile_batch(&self.storage, batch)
            .await
            .map_err(|_| TransportError::Status(500))?;
        let response: BatchSyncResponse = through_json(&response)?;

        *self.shared.last_response.lock().unwrap() = Some(response.clone());
        if self.shared.fail_after_send.load(Ordering::SeqCst) {
            return Err(TransportError::Status(502));
        }
        Ok(response)
    }
}

fn through_json<A: serde::Serialize, B: serde::de::DeserializeOwned>(
    value: &A,
) -> Result<B, TransportError> {
    let bytes = serde_json::to_vec(value).map_err(|e| TransportError::Decode(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| TransportError::Decode(e.to_string()))
}

impl SyncTransport for LoopbackTransport {
    async fn batch_sync(
        &self,
        request: &BatchSyncRequest,
    ) -> Result<BatchSyncResponse, TransportError> {
        self.shared.calls.fetch_add(1, Ordering::SeqCst);
        let entered = self.shared.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.max_in_flight.fetch_max(entered, Ordering::SeqCst);

        let result = self.exchange(request).await;

        self.shared.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn sync_kind<E: Entity>(
        &self,
        request: &KindSyncRequest<E>,
    ) -> Result<KindSyncResponse<E>, TransportError> {
        self.shared.calls.fetch_add(1, Ordering::SeqCst);
        let batch: IncomingKindBatch = through_json(request)?;
        let response = reconcile_kind_batch::<E>(&self.storage, batch)
            .await
            .map_err(|_| TransportError::Status(500))?;
        if self.shared.fail_after_send.load(Ordering::SeqCst) {
            return Err(TransportError::Status(502));
        }
        through_json(&response)
    }
}

/// Device conditions switchable from tests.
pub(crate) struct FakeDevice {
    online: AtomicBool,
    battery_low: AtomicBool,
}

impl FakeDevice {
    pub(crate) fn new() -> Self {
        Self {
            online: AtomicBool::new(true),
            battery_low: AtomicBool::new(false),
        }
    }

    pub(crate) fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub(crate) fn set_battery_low(&self, low: bool) {
        self.battery_low.store(low, Ordering::SeqCst);
    }
}

impl DeviceState for FakeDevice {
    async fn is_network_available(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn is_battery_low(&self) -> bool {
        self.battery_low.load(Ordering::SeqCst)
    }
}

pub(crate) struct TestServer {
    storage: ServerStorage,
    shared: Arc<Shared>,
    _dir: TempDir,
}

impl TestServer {
    pub(crate) async fn new() -> Self {
        let dir = tempdir().unwrap();
        let (storage, _) = ServerStorage::open(&dir.path().join("server.db"))
            .await
            .unwrap();
        Self {
            storage,
            shared: Arc::new(Shared::default()),
            _dir: dir,
        }
    }

    pub(crate) fn transport(&self) -> LoopbackTransport {
        LoopbackTransport {
            storage: self.storage.clone(),
            shared: Arc::clone(&self.shared),
        }
    }

    pub(crate) fn transport_calls(&self) -> usize {
        self.shared.calls.load(Ordering::SeqCst)
    }

    /// Highest number of batch requests that were open at the same time.
    pub(crate) fn max_concurrent_calls(&self) -> usize {
        self.shared.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn last_response(&self) -> Option<BatchSyncResponse> {
        self.shared.last_response.lock().unwrap().clone()
    }

    pub(crate) async fn count(&self, kind: EntityKind) -> i64 {
        self.storage.count(kind).await.unwrap()
    }

    pub(crate) async fn customers(&self) -> Vec<StoredRecord<Customer>> {
        self.storage.list::<Customer>().await.unwrap()
    }
}

pub(crate) type TestClient = SyncClient<LoopbackTransport, FakeDevice>;

pub(crate) struct Device {
    pub(crate) client: Arc<TestClient>,
    _dir: TempDir,
}

impl Device {
    pub(crate) async fn connect(server: &TestServer) -> Self {
        let dir = tempdir().unwrap();
        let store = LocalStore::open(&dir.path().join("device.db")).await.unwrap();
        Self {
            client: Arc::new(SyncClient::new(server.transport(), FakeDevice::new(), store)),
            _dir: dir,
        }
    }

    pub(crate) fn transport(&self) -> &LoopbackTransport {
        self.client.transport()
    }

    pub(crate) fn set_online(&self, online: bool) {
        self.client.device().set_online(online);
    }

    pub(crate) async fn create_customer(
        &self,
        first_name: &str,
        last_name: &str,
        mobile: &str,
    ) -> Record<Customer> {
        self.client
            .store()
            .repo::<Customer>()
            .create(&Customer::new(first_name, last_name, mobile))
            .await
            .unwrap()
    }

    /// Creates a customer whose last local edit happened at `last_modified`.
    pub(crate) async fn insert_with_timestamp(&self, customer: &Customer, last_modified: i64) {
        let record = self
            .client
            .store()
            .repo::<Customer>()
            .create(customer)
            .await
            .unwrap();
        sqlx::query("UPDATE customers SET last_modified = ? WHERE id = ?")
            .bind(last_modified)
            .bind(record.local_id)
            .execute(self.client.store().pool())
            .await
            .unwrap();
    }

    pub(crate) async fn update_customer(&self, local_id: i64, customer: &Customer) {
        self.client
            .store()
            .repo::<Customer>()
            .update(local_id, customer)
            .await
            .unwrap();
    }

    pub(crate) async fn create_order(
        &self,
        customer_id: i64,
        customer_name: &str,
        order_date: &str,
        order_type: &str,
    ) -> Record<Order> {
        self.client
            .store()
            .repo::<Order>()
            .create(&Order::new(customer_id, customer_name, order_date, order_type))
            .await
            .unwrap()
    }

    pub(crate) async fn customer(&self, local_id: i64) -> Record<Customer> {
        self.client
            .store()
            .repo::<Customer>()
            .get_by_id(local_id)
            .await
            .unwrap()
            .unwrap()
    }

    pub(crate) async fn customers(&self) -> Vec<Record<Customer>> {
        self.client.store().repo::<Customer>().list().await.unwrap()
    }

    pub(crate) async fn orders(&self) -> Vec<Record<Order>> {
        self.client.store().repo::<Order>().list().await.unwrap()
    }

    pub(crate) async fn watermark(&self) -> i64 {
        self.client
            .store()
            .sync_state()
            .last_sync_timestamp()
            .await
            .unwrap()
    }
}
