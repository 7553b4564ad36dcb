use sqlx::SqlitePool;

use super::StoreError;

const LAST_SYNC_KEY: &str = "last_sync_timestamp";

/// Persists the device's sync watermark.
pub struct SyncStateRepository {
    pool: SqlitePool,
}

impl SyncStateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Last server timestamp fully incorporated by this device (0 if never synced).
    pub async fn last_sync_timestamp(&self) -> Result<i64, StoreError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT value FROM sync_state WHERE key = ?")
            .bind(LAST_SYNC_KEY)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(value,)| value).unwrap_or(0))
    }

    /// Moves the watermark forward. A smaller value never lowers it.
    pub async fn advance_watermark(&self, server_timestamp: i64) -> Result<i64, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sync_state (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = MAX(value, excluded.value)
            "#,
        )
        .bind(LAST_SYNC_KEY)
        .bind(server_timestamp)
        .execute(&self.pool)
        .await?;

        self.last_sync_timestamp().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_watermark_defaults_to_zero() {
        let temp_dir = tempdir().unwrap();
        let pool = init_db(&temp_dir.path().join("device.db")).await.unwrap();
        let repo = SyncStateRepository::new(pool);

        assert_eq!(repo.last_sync_timestamp().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_watermark_never_moves_backwards() {
        let temp_dir = tempdir().unwrap();
        let pool = init_db(&temp_dir.path().join("device.db")).await.unwrap();
        let repo = SyncStateRepository::new(pool);

        assert_eq!(repo.advance_watermark(2000).await.unwrap(), 2000);
        assert_eq!(repo.advance_watermark(1500).await.unwrap(), 2000);
        assert_eq!(repo.advance_watermark(2500).await.unwrap(), 2500);
    }
}
