//! JSON shapes exchanged between devices and the sync server.

use serde::{Deserialize, Serialize};

use crate::models::{Customer, Measurement, Order};

/// One entity on the wire: server/local identity plus the flattened payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireRecord<E> {
    /// Server id. Absent until the server has stored the record once.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "_id")]
    pub id: Option<String>,
    /// The uploading device's local id, echoed back so it can link identities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<i64>,
    #[serde(default)]
    pub last_modified: i64,
    #[serde(flatten)]
    pub data: E,
}

pub type CustomerWire = WireRecord<Customer>;
pub type OrderWire = WireRecord<Order>;
pub type MeasurementWire = WireRecord<Measurement>;

/// Body of `POST /api/sync/batch`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchSyncRequest {
    pub customers: Vec<CustomerWire>,
    pub orders: Vec<OrderWire>,
    pub measurements: Vec<MeasurementWire>,
    pub last_sync_timestamp: i64,
}

impl BatchSyncRequest {
    pub fn is_empty(&self) -> bool {
        self.customers.is_empty() && self.orders.is_empty() && self.measurements.is_empty()
    }
}

/// Response of `POST /api/sync/batch`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSyncResponse {
    pub success: bool,
    #[serde(default)]
    pub customers: Option<Vec<CustomerWire>>,
    #[serde(default)]
    pub orders: Option<Vec<OrderWire>>,
    #[serde(default)]
    pub measurements: Option<Vec<MeasurementWire>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub server_timestamp: i64,
}

/// Body of the per-kind `POST /api/{kind}/batch` endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KindSyncRequest<E> {
    pub data: Vec<WireRecord<E>>,
    #[serde(default)]
    pub last_sync_timestamp: i64,
}

/// Response of the per-kind batch endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KindSyncResponse<E> {
    pub success: bool,
    pub data: Vec<WireRecord<E>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub server_timestamp: i64,
}

/// Response of `GET /api/health`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
    pub timestamp: String,
}
