//! User-facing sync status.

use chrono::{DateTime, Utc};
use tokio::sync::watch;

pub const MSG_SYNCING: &str = "Syncing...";
pub const MSG_COMPLETED: &str = "Sync completed";
pub const MSG_PARTIAL: &str = "Sync completed with some warnings";
pub const MSG_NO_NETWORK: &str = "No network connection";
pub const MSG_FAILED: &str = "Sync failed. Please try again.";

/// Snapshot of the sync state shown to the user.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSnapshot {
    pub is_syncing: bool,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub last_sync_success: bool,
    pub message: String,
}

/// Publishes [`StatusSnapshot`]s to any number of watchers.
#[derive(Debug)]
pub struct StatusReporter {
    sender: watch::Sender<StatusSnapshot>,
}

impl StatusReporter {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(StatusSnapshot::default());
        Self { sender }
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.sender.subscribe()
    }

    pub fn current(&self) -> StatusSnapshot {
        self.sender.borrow().clone()
    }

    pub fn begin(&self) {
        self.sender.send_modify(|status| {
            status.is_syncing = true;
            status.message = MSG_SYNCING.to_string();
        });
    }

    /// Ends a cycle. `last_sync_time` only moves on success.
    pub fn finish(&self, success: bool, message: &str) {
        self.sender.send_modify(|status| {
            status.is_syncing = false;
            status.last_sync_success = success;
            status.message = message.to_string();
            if success {
                status.last_sync_time = Some(Utc::now());
            }
        });
    }
}

impl Default for StatusReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Humanised "last synced" text.
pub fn format_last_sync(last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(last) = last else {
        return "Never synced".to_string();
    };

    let elapsed = now.signed_duration_since(last);
    let minutes = elapsed.num_minutes();
    let hours = elapsed.num_hours();
    let days = elapsed.num_days();

    if minutes < 1 {
        "Just now".to_string()
    } else if minutes < 60 {
        format!("{} minute{} ago", minutes, plural(minutes))
    } else if hours < 24 {
        format!("{} hour{} ago", hours, plural(hours))
    } else if days < 7 {
        format!("{} day{} ago", days, plural(days))
    } else {
        format!("On {}", last.format("%b %d, %Y"))
    }
}

fn plural(n: i64) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}
