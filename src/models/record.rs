use serde::{Deserialize, Serialize};

use super::sync_status::SyncStatus;

/// A locally stored entity together with its sync metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record<E> {
    /// Assigned by the local store; stable for the device's lifetime.
    pub local_id: i64,
    /// Assigned by the server on first successful upload.
    pub server_id: Option<String>,
    /// Epoch milliseconds of the last mutation.
    pub last_modified: i64,
    pub sync_status: SyncStatus,
    pub data: E,
}

impl<E> Record<E> {
    pub fn needs_sync(&self) -> bool {
        self.sync_status.needs_upload()
    }

    pub fn is_synced(&self) -> bool {
        self.sync_status == SyncStatus::Synced
    }
}
