//! Device side of offline-first sync.
//!
//! Local records carry a [`SyncStatus`](crate::models::SyncStatus). A sync
//! cycle uploads every PENDING or FAILED record to the server in one batch,
//! attaches the server ids from the response, stores records that changed
//! on other devices and finally advances the device's watermark to the
//! server's timestamp.
//!
//! # Usage
//!
//! ```no_run
//! use perfectfit::db::LocalStore;
//! use perfectfit::sync::{HealthProbe, HttpTransport, SyncClient};
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = LocalStore::open("perfectfit.db".as_ref()).await?;
//! let transport = HttpTransport::new("http://localhost:3000", Duration::from_secs(30))?;
//! let device = HealthProbe::new("http://localhost:3000")?;
//! let client = SyncClient::new(transport, device, store);
//!
//! let outcome = client.run_sync_cycle().await;
//! println!("{}", outcome.message());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod device;
pub mod mapper;
pub mod protocol;
pub mod retry;
pub mod scheduler;
pub mod status;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{SyncClient, SyncError, SyncOutcome};
pub use device::{DeviceState, HealthProbe};
pub use protocol::{BatchSyncRequest, BatchSyncResponse, WireRecord};
pub use retry::{Backoff, RetryPolicy};
pub use scheduler::{SchedulerConfig, SyncScheduler};
pub use status::{format_last_sync, StatusReporter, StatusSnapshot};
pub use transport::{HttpTransport, SyncTransport, TransportError};
