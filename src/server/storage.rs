//! Authoritative server collections on SQLite.
//!
//! Each kind has its own table. The business payload is kept as JSON in
//! `body`; the natural-key columns are copied out of it so a unique index
//! can back the find-or-create upsert.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::clock::ServerClock;
use super::dedup::{remove_duplicates, DedupReport};
use crate::models::{Entity, EntityKind, KeyPart};
use crate::sync::mapper::Upload;

/// Errors from the server collections.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("failed to create data directory '{0}': {1}")]
    CreateDir(PathBuf, std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("failed to encode or decode record body: {0}")]
    Body(#[from] serde_json::Error),
    #[error("another {0} already has this natural key")]
    KeyConflict(EntityKind),
}

impl StorageError {
    /// True when the failure is about one record rather than the store.
    pub fn is_record_error(&self) -> bool {
        matches!(self, StorageError::KeyConflict(_))
    }
}

/// A record as stored on the server.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord<E> {
    pub id: String,
    /// `lastModified` of the device write that produced the stored fields.
    pub client_modified: i64,
    /// Server clock at the time of the last write.
    pub last_modified: i64,
    pub data: E,
}

#[derive(sqlx::FromRow)]
struct StoredRow {
    id: String,
    body: String,
    client_modified: i64,
    last_modified: i64,
}

impl StoredRow {
    fn hydrate<E: Entity>(self) -> Result<StoredRecord<E>, StorageError> {
        Ok(StoredRecord {
            id: self.id,
            client_modified: self.client_modified,
            last_modified: self.last_modified,
            data: serde_json::from_str(&self.body)?,
        })
    }
}

/// Opens the server database and applies migrations, nothing else.
pub async fn init_server_db(path: &Path) -> Result<SqlitePool, StorageError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::CreateDir(parent.to_path_buf(), e))?;
        }
    }

    let db_url = format!("sqlite:{}?mode=rwc", path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations/server").run(&pool).await?;

    Ok(pool)
}

/// Creates the unique natural-key index of every collection.
///
/// Fails if duplicates are still present; run [`remove_duplicates`] first.
pub async fn ensure_key_indexes(pool: &SqlitePool) -> Result<(), StorageError> {
    for kind in EntityKind::ALL {
        let sql = format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS uq_{table}_natural_key ON {table} ({columns})",
            table = kind.collection(),
            columns = kind.key_columns().join(", ")
        );
        sqlx::query(&sql).execute(pool).await?;
    }
    Ok(())
}

/// Server storage shared by all request handlers.
///
/// Writes are serialized through `write_lock` and stamped while holding it,
/// so `last_modified` order matches commit order. A timestamp taken with
/// [`ServerStorage::delta_timestamp`] is therefore never above a write that
/// has not committed yet.
#[derive(Debug, Clone)]
pub struct ServerStorage {
    pool: SqlitePool,
    clock: Arc<ServerClock>,
    write_lock: Arc<Mutex<()>>,
}

impl ServerStorage {
    /// Opens the database, removes natural-key duplicates left by older
    /// servers, then enforces uniqueness.
    pub async fn open(path: &Path) -> Result<(Self, Vec<DedupReport>), StorageError> {
        let pool = init_server_db(path).await?;
        let reports = remove_duplicates(&pool).await?;
        ensure_key_indexes(&pool).await?;

        let clock = Arc::new(ServerClock::new());
        for kind in EntityKind::ALL {
            let sql = format!(
                "SELECT COALESCE(MAX(last_modified), 0) FROM {}",
                kind.collection()
            );
            let (latest,): (i64,) = sqlx::query_as(&sql).fetch_one(&pool).await?;
            clock.observe(latest);
        }

        Ok((Self::from_pool(pool, clock), reports))
    }

    /// Wraps a pool that already has migrations and key indexes applied.
    pub fn from_pool(pool: SqlitePool, clock: Arc<ServerClock>) -> Self {
        Self {
            pool,
            clock,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn clock(&self) -> &ServerClock {
        &self.clock
    }

    /// Server time for a response's `serverTimestamp`. Waits for in-flight
    /// writes, so every record stamped at or below the returned value is
    /// already visible to the delta query that follows.
    pub async fn delta_timestamp(&self) -> i64 {
        let _guard = self.write_lock.lock().await;
        self.clock.tick()
    }

    /// Stores one client write and returns the resulting stored record.
    ///
    /// With a server id the record is updated in place; an unknown id falls
    /// back to the natural-key path. Either way the write only replaces the
    /// stored fields if it is at least as recent (by `client_modified`) as
    /// the write that produced them; otherwise the stored record is returned
    /// unchanged.
    pub async fn upsert<E: Entity>(
        &self,
        upload: &Upload<E>,
    ) -> Result<StoredRecord<E>, StorageError> {
        let _guard = self.write_lock.lock().await;

        if let Some(id) = &upload.server_id {
            if let Some(stored) = self.update_by_id(id, upload).await? {
                return Ok(stored);
            }
            if let Some(stored) = self.get::<E>(id).await? {
                tracing::debug!(
                    "{} {} kept: stored write is newer ({} > {})",
                    E::KIND,
                    id,
                    stored.client_modified,
                    upload.client_modified
                );
                return Ok(stored);
            }
            tracing::debug!("{} {} unknown, matching by natural key", E::KIND, id);
        }

        self.upsert_by_natural_key(upload).await
    }

    async fn update_by_id<E: Entity>(
        &self,
        id: &str,
        upload: &Upload<E>,
    ) -> Result<Option<StoredRecord<E>>, StorageError> {
        let assignments: Vec<String> = E::KIND
            .key_columns()
            .iter()
            .map(|column| format!("{} = ?", column))
            .collect();
        let sql = format!(
            r#"
            UPDATE {table}
            SET {assignments}, body = ?, client_modified = ?, last_modified = ?
            WHERE id = ? AND client_modified <= ?
            RETURNING id, body, client_modified, last_modified
            "#,
            table = E::KIND.collection(),
            assignments = assignments.join(", ")
        );

        let body = serde_json::to_string(&upload.data)?;
        let mut query = sqlx::query_as::<_, StoredRow>(&sql);
        for part in upload.data.natural_key() {
            query = bind_key(query, part);
        }
        let row = query
            .bind(body)
            .bind(upload.client_modified)
            .bind(self.clock.tick())
            .bind(id)
            .bind(upload.client_modified)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| key_conflict(E::KIND, e))?;

        row.map(StoredRow::hydrate).transpose()
    }

    async fn upsert_by_natural_key<E: Entity>(
        &self,
        upload: &Upload<E>,
    ) -> Result<StoredRecord<E>, StorageError> {
        let table = E::KIND.collection();
        let columns = E::KIND.key_columns();
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            r#"
            INSERT INTO {table} (id, {columns}, body, client_modified, last_modified)
            VALUES (?, {placeholders}, ?, ?, ?)
            ON CONFLICT ({columns}) DO UPDATE SET
                body = excluded.body,
                client_modified = excluded.client_modified,
                last_modified = excluded.last_modified
            WHERE excluded.client_modified >= {table}.client_modified
            RETURNING id, body, client_modified, last_modified
            "#,
            table = table,
            columns = columns.join(", "),
            placeholders = placeholders
        );

        let body = serde_json::to_string(&upload.data)?;
        let mut query =
            sqlx::query_as::<_, StoredRow>(&sql).bind(uuid::Uuid::new_v4().to_string());
        for part in upload.data.natural_key() {
            query = bind_key(query, part);
        }
        let row = query
            .bind(body)
            .bind(upload.client_modified)
            .bind(self.clock.tick())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| key_conflict(E::KIND, e))?;

        match row {
            Some(row) => row.hydrate(),
            None => {
                // The conflicting row won last-write-wins; hand it back as stored.
                self.find_by_natural_key(&upload.data)
                    .await?
                    .ok_or(StorageError::Database(sqlx::Error::RowNotFound))
            }
        }
    }

    pub async fn find_by_natural_key<E: Entity>(
        &self,
        data: &E,
    ) -> Result<Option<StoredRecord<E>>, StorageError> {
        let conditions: Vec<String> = E::KIND
            .key_columns()
            .iter()
            .map(|column| format!("{} = ?", column))
            .collect();
        let sql = format!(
            "SELECT id, body, client_modified, last_modified FROM {} WHERE {}",
            E::KIND.collection(),
            conditions.join(" AND ")
        );

        let mut query = sqlx::query_as::<_, StoredRow>(&sql);
        for part in data.natural_key() {
            query = bind_key(query, part);
        }
        let row = query.fetch_optional(&self.pool).await?;

        row.map(StoredRow::hydrate).transpose()
    }

    pub async fn get<E: Entity>(&self, id: &str) -> Result<Option<StoredRecord<E>>, StorageError> {
        let sql = format!(
            "SELECT id, body, client_modified, last_modified FROM {} WHERE id = ?",
            E::KIND.collection()
        );
        let row: Option<StoredRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(StoredRow::hydrate).transpose()
    }

    /// All records of a kind, newest first.
    pub async fn list<E: Entity>(&self) -> Result<Vec<StoredRecord<E>>, StorageError> {
        let sql = format!(
            "SELECT id, body, client_modified, last_modified FROM {} ORDER BY last_modified DESC",
            E::KIND.collection()
        );
        let rows: Vec<StoredRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(StoredRow::hydrate).collect()
    }

    /// Records modified after `since`, skipping `exclude` ids, oldest first.
    pub async fn modified_since<E: Entity>(
        &self,
        since: i64,
        exclude: &HashSet<String>,
    ) -> Result<Vec<StoredRecord<E>>, StorageError> {
        let sql = format!(
            r#"
            SELECT id, body, client_modified, last_modified FROM {}
            WHERE last_modified > ?
            ORDER BY last_modified
            "#,
            E::KIND.collection()
        );
        let rows: Vec<StoredRow> = sqlx::query_as(&sql)
            .bind(since)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .filter(|row| !exclude.contains(&row.id))
            .map(StoredRow::hydrate)
            .collect()
    }

    pub async fn count(&self, kind: EntityKind) -> Result<i64, StorageError> {
        let sql = format!("SELECT COUNT(*) FROM {}", kind.collection());
        let (count,): (i64,) = sqlx::query_as(&sql).fetch_one(&self.pool).await?;
        Ok(count)
    }
}

type RowQuery<'q> =
    sqlx::query::QueryAs<'q, sqlx::Sqlite, StoredRow, sqlx::sqlite::SqliteArguments<'q>>;

fn bind_key(query: RowQuery<'_>, part: KeyPart) -> RowQuery<'_> {
    match part {
        KeyPart::Int(value) => query.bind(value),
        KeyPart::Text(value) => query.bind(value),
    }
}

fn key_conflict(kind: EntityKind, error: sqlx::Error) -> StorageError {
    match &error {
        sqlx::Error::Database(db) if db.is_unique_violation() => StorageError::KeyConflict(kind),
        _ => StorageError::Database(error),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{Customer, Measurement, Order};
    use tempfile::{tempdir, TempDir};

    pub(crate) async fn test_storage() -> (TempDir, ServerStorage) {
        let temp_dir = tempdir().unwrap();
        let (storage, _) = ServerStorage::open(&temp_dir.path().join("server.db"))
            .await
            .unwrap();
        (temp_dir, storage)
    }

    fn upload<E>(server_id: Option<&str>, client_modified: i64, data: E) -> Upload<E> {
        Upload {
            server_id: server_id.map(String::from),
            local_id: Some(1),
            client_modified,
            data,
        }
    }

    #[tokio::test]
    async fn test_upsert_without_id_creates_record() {
        let (_dir, storage) = test_storage().await;

        let stored = storage
            .upsert(&upload(None, 1000, Customer::new("Asha", "Rao", "9990001111")))
            .await
            .unwrap();

        assert!(!stored.id.is_empty());
        assert_eq!(stored.client_modified, 1000);
        assert!(stored.last_modified > 0);
        assert_eq!(storage.count(EntityKind::Customer).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_same_natural_key_reuses_record() {
        let (_dir, storage) = test_storage().await;
        let first = storage
            .upsert(&upload(None, 1000, Customer::new("Asha", "Rao", "9990001111")))
            .await
            .unwrap();

        let mut again = Customer::new("Asha", "Rao", "9990001111");
        again.address = "MG Road".into();
        let second = storage.upsert(&upload(None, 1100, again)).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.data.address, "MG Road");
        assert!(second.last_modified > first.last_modified);
        assert_eq!(storage.count(EntityKind::Customer).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_older_write_does_not_replace_newer() {
        let (_dir, storage) = test_storage().await;
        let mut newer = Customer::new("Asha", "Rao", "9990001111");
        newer.address = "newer".into();
        let stored = storage.upsert(&upload(None, 2000, newer)).await.unwrap();

        let mut older = Customer::new("Asha", "Rao", "9990001111");
        older.address = "older".into();
        let by_key = storage.upsert(&upload(None, 1000, older.clone())).await.unwrap();
        let by_id = storage
            .upsert(&upload(Some(&stored.id), 1500, older))
            .await
            .unwrap();

        assert_eq!(by_key.data.address, "newer");
        assert_eq!(by_id.data.address, "newer");
        assert_eq!(by_id.last_modified, stored.last_modified);
    }

    #[tokio::test]
    async fn test_update_by_id_changes_key_columns() {
        let (_dir, storage) = test_storage().await;
        let stored = storage
            .upsert(&upload(None, 1000, Order::new(3, "Asha", "2024-05-01", "Blouse")))
            .await
            .unwrap();

        let moved = Order::new(3, "Asha", "2024-05-09", "Blouse");
        let updated = storage
            .upsert(&upload(Some(&stored.id), 1200, moved.clone()))
            .await
            .unwrap();

        assert_eq!(updated.id, stored.id);
        let found = storage.find_by_natural_key(&moved).await.unwrap().unwrap();
        assert_eq!(found.id, stored.id);
    }

    #[tokio::test]
    async fn test_unknown_id_falls_back_to_natural_key() {
        let (_dir, storage) = test_storage().await;
        let stored = storage
            .upsert(&upload(None, 1000, Measurement::for_customer(5)))
            .await
            .unwrap();

        let mut edit = Measurement::for_customer(5);
        edit.kurti.chest_round = "36".into();
        let result = storage
            .upsert(&upload(Some("missing-id"), 1100, edit))
            .await
            .unwrap();

        assert_eq!(result.id, stored.id);
        assert_eq!(result.data.kurti.chest_round, "36");
        assert_eq!(storage.count(EntityKind::Measurement).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_onto_existing_key_is_conflict() {
        let (_dir, storage) = test_storage().await;
        storage
            .upsert(&upload(None, 1000, Customer::new("Asha", "Rao", "9990001111")))
            .await
            .unwrap();
        let other = storage
            .upsert(&upload(None, 1000, Customer::new("Meera", "Nair", "8880001111")))
            .await
            .unwrap();

        let err = storage
            .upsert(&upload(
                Some(&other.id),
                1100,
                Customer::new("Asha", "Rao", "9990001111"),
            ))
            .await
            .unwrap_err();

        assert!(err.is_record_error());
    }

    #[tokio::test]
    async fn test_modified_since_excludes_ids() {
        let (_dir, storage) = test_storage().await;
        let before = storage.clock().tick();
        let a = storage
            .upsert(&upload(None, 1, Customer::new("Asha", "Rao", "9990001111")))
            .await
            .unwrap();
        let b = storage
            .upsert(&upload(None, 1, Customer::new("Meera", "Nair", "8880001111")))
            .await
            .unwrap();

        let exclude: HashSet<String> = [a.id.clone()].into_iter().collect();
        let delta = storage
            .modified_since::<Customer>(before, &exclude)
            .await
            .unwrap();

        assert_eq!(delta.len(), 1);
        assert_eq!(delta[0].id, b.id);
        assert!(storage
            .modified_since::<Customer>(b.last_modified, &HashSet::new())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_reopen_keeps_clock_ahead_of_stored_records() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("server.db");
        let last = {
            let (storage, _) = ServerStorage::open(&path).await.unwrap();
            storage
                .upsert(&upload(None, 1, Customer::new("Asha", "Rao", "9990001111")))
                .await
                .unwrap()
                .last_modified
        };

        let (storage, reports) = ServerStorage::open(&path).await.unwrap();
        assert!(storage.clock().tick() > last);
        assert!(reports.iter().all(|r| r.removed == 0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_find_or_create_keeps_one_record() {
        let (_dir, storage) = test_storage().await;
        let mut older = Customer::new("Asha", "Rao", "9990001111");
        older.address = "Old Market".into();
        let mut newer = Customer::new("Asha", "Rao", "9990001111");
        newer.address = "MG Road".into();
        let older = upload(None, 1000, older);
        let newer = upload(None, 2000, newer);

        let (a, b) = tokio::join!(storage.upsert(&older), storage.upsert(&newer));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.id, b.id);
        assert_eq!(storage.count(EntityKind::Customer).await.unwrap(), 1);
        let stored = storage.get::<Customer>(&a.id).await.unwrap().unwrap();
        assert_eq!(stored.client_modified, 2000);
        assert_eq!(stored.data.address, "MG Road");
    }
}
