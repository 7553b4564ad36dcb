use sqlx::SqlitePool;
use std::marker::PhantomData;
use std::str::FromStr;

use super::StoreError;
use crate::models::{Entity, Record, SyncStatus};
use crate::now_millis;
use crate::sync::mapper::RemoteRecord;

/// Local repository for one entity kind. The table is chosen by `E::KIND`.
pub struct EntityRepository<E> {
    pool: SqlitePool,
    _entity: PhantomData<E>,
}

#[derive(sqlx::FromRow)]
struct EntityRow {
    id: i64,
    server_id: Option<String>,
    body: String,
    last_modified: i64,
    sync_status: String,
}

impl<E: Entity> EntityRepository<E> {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            _entity: PhantomData,
        }
    }

    fn table() -> &'static str {
        E::KIND.collection()
    }

    /// Stores a new locally created record as PENDING.
    pub async fn create(&self, data: &E) -> Result<Record<E>, StoreError> {
        let body = serde_json::to_string(data)?;
        let sql = format!(
            "INSERT INTO {} (server_id, body, last_modified, sync_status) VALUES (NULL, ?, ?, 'PENDING')",
            Self::table()
        );

        let result = sqlx::query(&sql)
            .bind(&body)
            .bind(now_millis())
            .execute(&self.pool)
            .await?;

        self.get_by_id(result.last_insert_rowid())
            .await?
            .ok_or(StoreError::Database(sqlx::Error::RowNotFound))
    }

    /// Applies a local edit. The new `last_modified` is strictly greater than
    /// the previous one even if the device clock went backwards.
    pub async fn update(&self, local_id: i64, data: &E) -> Result<Record<E>, StoreError> {
        let body = serde_json::to_string(data)?;
        let sql = format!(
            r#"
            UPDATE {}
            SET body = ?, last_modified = MAX(?, last_modified + 1), sync_status = 'PENDING'
            WHERE id = ?
            "#,
            Self::table()
        );

        sqlx::query(&sql)
            .bind(&body)
            .bind(now_millis())
            .bind(local_id)
            .execute(&self.pool)
            .await?;

        self.get_by_id(local_id)
            .await?
            .ok_or(StoreError::Database(sqlx::Error::RowNotFound))
    }

    pub async fn get_by_id(&self, local_id: i64) -> Result<Option<Record<E>>, StoreError> {
        let sql = format!("SELECT * FROM {} WHERE id = ?", Self::table());
        let row: Option<EntityRow> = sqlx::query_as(&sql)
            .bind(local_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(hydrate).transpose()
    }

    pub async fn get_by_server_id(&self, server_id: &str) -> Result<Option<Record<E>>, StoreError> {
        let sql = format!(
            "SELECT * FROM {} WHERE server_id = ? ORDER BY id LIMIT 1",
            Self::table()
        );
        let row: Option<EntityRow> = sqlx::query_as(&sql)
            .bind(server_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(hydrate).transpose()
    }

    pub async fn list(&self) -> Result<Vec<Record<E>>, StoreError> {
        let sql = format!("SELECT * FROM {} ORDER BY id", Self::table());
        let rows: Vec<EntityRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(hydrate).collect()
    }

    /// Records with PENDING or FAILED status.
    pub async fn list_unsynced(&self) -> Result<Vec<Record<E>>, StoreError> {
        let sql = format!(
            "SELECT * FROM {} WHERE sync_status IN ('PENDING', 'FAILED') ORDER BY id",
            Self::table()
        );
        let rows: Vec<EntityRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(hydrate).collect()
    }

    pub async fn count_unsynced(&self) -> Result<i64, StoreError> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE sync_status IN ('PENDING', 'FAILED')",
            Self::table()
        );
        let (count,): (i64,) = sqlx::query_as(&sql).fetch_one(&self.pool).await?;
        Ok(count)
    }

    /// Attaches the server identity to a record this device uploaded.
    ///
    /// The server's fields and timestamp are adopted only when the record has
    /// not been edited since it was read for upload (`uploaded_modified`);
    /// otherwise the newer local edit stays PENDING. Returns false when the
    /// local record no longer exists.
    pub async fn confirm_upload(
        &self,
        local_id: i64,
        uploaded_modified: i64,
        remote: &RemoteRecord<E>,
    ) -> Result<bool, StoreError> {
        let body = serde_json::to_string(&remote.data)?;
        let sql = format!(
            r#"
            UPDATE {}
            SET server_id = ?,
                body = CASE WHEN last_modified <= ? THEN ? ELSE body END,
                sync_status = CASE WHEN last_modified <= ? THEN 'SYNCED' ELSE sync_status END,
                last_modified = CASE WHEN last_modified <= ? THEN ? ELSE last_modified END
            WHERE id = ?
            "#,
            Self::table()
        );

        let result = sqlx::query(&sql)
            .bind(&remote.server_id)
            .bind(uploaded_modified)
            .bind(&body)
            .bind(uploaded_modified)
            .bind(uploaded_modified)
            .bind(remote.last_modified)
            .bind(local_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Replaces a SYNCED record with the server's newer version. A record
    /// with unsent local edits is left alone. Returns true if overwritten.
    pub async fn overwrite_if_synced(
        &self,
        local_id: i64,
        remote: &RemoteRecord<E>,
    ) -> Result<bool, StoreError> {
        let body = serde_json::to_string(&remote.data)?;
        let sql = format!(
            r#"
            UPDATE {}
            SET server_id = ?, body = ?, last_modified = ?
            WHERE id = ? AND sync_status = 'SYNCED'
            "#,
            Self::table()
        );

        let result = sqlx::query(&sql)
            .bind(&remote.server_id)
            .bind(&body)
            .bind(remote.last_modified)
            .bind(local_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Inserts a record that originated on another device.
    pub async fn insert_remote(&self, remote: &RemoteRecord<E>) -> Result<i64, StoreError> {
        let body = serde_json::to_string(&remote.data)?;
        let sql = format!(
            "INSERT INTO {} (server_id, body, last_modified, sync_status) VALUES (?, ?, ?, 'SYNCED')",
            Self::table()
        );

        let result = sqlx::query(&sql)
            .bind(&remote.server_id)
            .bind(&body)
            .bind(remote.last_modified)
            .execute(&self.pool)
            .await?;

        Ok(result.last_insert_rowid())
    }

    /// Flags uploaded records the server did not confirm.
    pub async fn mark_failed(&self, local_ids: &[i64]) -> Result<(), StoreError> {
        let sql = format!(
            "UPDATE {} SET sync_status = 'FAILED' WHERE id = ? AND sync_status != 'SYNCED'",
            Self::table()
        );

        let mut tx = self.pool.begin().await?;
        for local_id in local_ids {
            sqlx::query(&sql).bind(local_id).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

fn hydrate<E: Entity>(row: EntityRow) -> Result<Record<E>, StoreError> {
    let sync_status = SyncStatus::from_str(&row.sync_status)
        .map_err(|_| StoreError::Status(row.sync_status.clone()))?;

    Ok(Record {
        local_id: row.id,
        server_id: row.server_id,
        last_modified: row.last_modified,
        sync_status,
        data: serde_json::from_str(&row.body)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use crate::models::{Customer, Order};
    use tempfile::{tempdir, TempDir};

    async fn setup() -> (TempDir, SqlitePool) {
        let temp_dir = tempdir().unwrap();
        let pool = init_db(&temp_dir.path().join("device.db")).await.unwrap();
        (temp_dir, pool)
    }

    fn remote(server_id: &str, last_modified: i64, data: Customer) -> RemoteRecord<Customer> {
        RemoteRecord {
            server_id: server_id.to_string(),
            local_id: None,
            last_modified,
            data,
        }
    }

    #[tokio::test]
    async fn test_create_is_pending_without_server_id() {
        let (_dir, pool) = setup().await;
        let repo = EntityRepository::<Customer>::new(pool);

        let record = repo
            .create(&Customer::new("Asha", "Rao", "9990001111"))
            .await
            .unwrap();

        assert!(record.local_id > 0);
        assert_eq!(record.server_id, None);
        assert_eq!(record.sync_status, SyncStatus::Pending);
        assert_eq!(record.data.first_name, "Asha");
    }

    #[tokio::test]
    async fn test_update_strictly_increases_last_modified() {
        let (_dir, pool) = setup().await;
        let repo = EntityRepository::<Customer>::new(pool.clone());
        let record = repo
            .create(&Customer::new("Asha", "Rao", "9990001111"))
            .await
            .unwrap();

        // Simulate a record whose timestamp came from a server clock ahead of ours.
        let future = now_millis() + 60_000;
        sqlx::query("UPDATE customers SET last_modified = ?, sync_status = 'SYNCED' WHERE id = ?")
            .bind(future)
            .bind(record.local_id)
            .execute(&pool)
            .await
            .unwrap();

        let mut edited = record.data.clone();
        edited.address = "12 MG Road".into();
        let updated = repo.update(record.local_id, &edited).await.unwrap();

        assert_eq!(updated.last_modified, future + 1);
        assert_eq!(updated.sync_status, SyncStatus::Pending);
        assert_eq!(updated.data.address, "12 MG Road");
    }

    #[tokio::test]
    async fn test_list_unsynced_includes_failed() {
        let (_dir, pool) = setup().await;
        let repo = EntityRepository::<Order>::new(pool);
        let first = repo
            .create(&Order::new(1, "Asha", "2024-05-01", "Blouse"))
            .await
            .unwrap();
        let second = repo
            .create(&Order::new(1, "Asha", "2024-05-02", "Kurti"))
            .await
            .unwrap();
        repo.mark_failed(&[second.local_id]).await.unwrap();

        let unsynced = repo.list_unsynced().await.unwrap();
        assert_eq!(unsynced.len(), 2);
        assert_eq!(unsynced[0].local_id, first.local_id);
        assert_eq!(unsynced[1].sync_status, SyncStatus::Failed);
        assert_eq!(repo.count_unsynced().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_confirm_upload_attaches_identity() {
        let (_dir, pool) = setup().await;
        let repo = EntityRepository::<Customer>::new(pool);
        let record = repo
            .create(&Customer::new("Asha", "Rao", "9990001111"))
            .await
            .unwrap();

        let confirmed = repo
            .confirm_upload(
                record.local_id,
                record.last_modified,
                &remote("srv-1", 5000, record.data.clone()),
            )
            .await
            .unwrap();
        assert!(confirmed);

        let stored = repo.get_by_id(record.local_id).await.unwrap().unwrap();
        assert_eq!(stored.server_id.as_deref(), Some("srv-1"));
        assert_eq!(stored.sync_status, SyncStatus::Synced);
        assert_eq!(stored.last_modified, 5000);
        assert!(repo.list_unsynced().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_confirm_upload_keeps_concurrent_edit() {
        let (_dir, pool) = setup().await;
        let repo = EntityRepository::<Customer>::new(pool);
        let record = repo
            .create(&Customer::new("Asha", "Rao", "9990001111"))
            .await
            .unwrap();

        let mut edited = record.data.clone();
        edited.address = "edited while syncing".into();
        repo.update(record.local_id, &edited).await.unwrap();

        repo.confirm_upload(
            record.local_id,
            record.last_modified,
            &remote("srv-1", 5000, record.data.clone()),
        )
        .await
        .unwrap();

        let stored = repo.get_by_id(record.local_id).await.unwrap().unwrap();
        assert_eq!(stored.server_id.as_deref(), Some("srv-1"));
        assert_eq!(stored.sync_status, SyncStatus::Pending);
        assert_eq!(stored.data.address, "edited while syncing");
    }

    #[tokio::test]
    async fn test_overwrite_only_touches_synced_records() {
        let (_dir, pool) = setup().await;
        let repo = EntityRepository::<Customer>::new(pool);

        let local_id = repo
            .insert_remote(&remote("srv-1", 100, Customer::new("Asha", "Rao", "9990001111")))
            .await
            .unwrap();

        let mut newer = Customer::new("Asha", "Rao", "9990001111");
        newer.address = "new address".into();
        assert!(repo
            .overwrite_if_synced(local_id, &remote("srv-1", 200, newer.clone()))
            .await
            .unwrap());

        let pending = repo.update(local_id, &Customer::new("Asha", "R.", "9990001111"))
            .await
            .unwrap();
        assert!(!repo
            .overwrite_if_synced(local_id, &remote("srv-1", 300, newer))
            .await
            .unwrap());

        let stored = repo.get_by_server_id("srv-1").await.unwrap().unwrap();
        assert_eq!(stored.local_id, local_id);
        assert_eq!(stored.data.last_name, "R.");
        assert_eq!(stored.last_modified, pending.last_modified);
    }
}
