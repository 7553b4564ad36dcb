//! Server side of the sync protocol: authoritative storage, reconciliation
//! of uploaded batches, duplicate cleanup and the HTTP routes.

pub mod clock;
pub mod dedup;
pub mod reconcile;
pub mod routes;
pub mod storage;

pub use clock::ServerClock;
pub use dedup::{find_duplicates, remove_duplicates, DedupReport, DuplicateGroup};
pub use reconcile::{reconcile_batch, reconcile_kind_batch, ReconcileError};
pub use routes::{router, ApiError, AppState};
pub use storage::{ServerStorage, StorageError, StoredRecord};
