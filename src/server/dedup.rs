//! Natural-key duplicate cleanup for the server collections.
//!
//! Rows that share a natural key are the same real-world entity. In each
//! such group the row with the greatest `last_modified` is kept (ties go to
//! the greatest id) and the others are deleted.

use sqlx::SqlitePool;

use super::storage::StorageError;
use crate::models::EntityKind;

/// One group of rows sharing a natural key.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateGroup {
    pub kind: EntityKind,
    /// Natural key values joined with `/`.
    pub key: String,
    pub keep: String,
    pub remove: Vec<String>,
}

/// Outcome of a cleanup pass for one kind.
#[derive(Debug, Clone, PartialEq)]
pub struct DedupReport {
    pub kind: EntityKind,
    pub duplicate_groups: usize,
    pub removed: u64,
}

const KEY_SEPARATOR: char = '\u{1f}';

#[derive(sqlx::FromRow)]
struct KeyedRow {
    id: String,
    natural_key: String,
}

/// Lists duplicate groups of one kind without changing anything.
pub async fn find_duplicates(
    pool: &SqlitePool,
    kind: EntityKind,
) -> Result<Vec<DuplicateGroup>, StorageError> {
    let key_expr = kind
        .key_columns()
        .iter()
        .map(|column| format!("CAST({} AS TEXT)", column))
        .collect::<Vec<_>>()
        .join(" || char(31) || ");
    let sql = format!(
        r#"
        SELECT id, {key_expr} AS natural_key
        FROM {table}
        ORDER BY natural_key, last_modified DESC, id DESC
        "#,
        key_expr = key_expr,
        table = kind.collection()
    );
    let rows: Vec<KeyedRow> = sqlx::query_as(&sql).fetch_all(pool).await?;

    let mut groups: Vec<DuplicateGroup> = Vec::new();
    let mut current: Option<DuplicateGroup> = None;

    for row in rows {
        match current.as_mut() {
            Some(group) if group.key == row.natural_key => group.remove.push(row.id),
            _ => {
                if let Some(done) = current.take() {
                    if !done.remove.is_empty() {
                        groups.push(done);
                    }
                }
                current = Some(DuplicateGroup {
                    kind,
                    key: row.natural_key,
                    keep: row.id,
                    remove: Vec::new(),
                });
            }
        }
    }
    if let Some(done) = current {
        if !done.remove.is_empty() {
            groups.push(done);
        }
    }

    for group in &mut groups {
        group.key = group.key.replace(KEY_SEPARATOR, "/");
    }

    Ok(groups)
}

/// Deletes the duplicate rows of every kind. Each kind runs in its own
/// transaction.
pub async fn remove_duplicates(pool: &SqlitePool) -> Result<Vec<DedupReport>, StorageError> {
    let mut reports = Vec::with_capacity(EntityKind::ALL.len());

    for kind in EntityKind::ALL {
        let groups = find_duplicates(pool, kind).await?;
        let delete_sql = format!("DELETE FROM {} WHERE id = ?", kind.collection());
        let mut removed = 0;

        let mut tx = pool.begin().await?;
        for group in &groups {
            tracing::info!(
                "{} {}: keeping {}, removing {} duplicate(s)",
                kind,
                group.key,
                group.keep,
                group.remove.len()
            );
            for id in &group.remove {
                removed += sqlx::query(&delete_sql)
                    .bind(id)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
            }
        }
        tx.commit().await?;

        if removed > 0 {
            tracing::info!("Removed {} duplicate {} record(s)", removed, kind);
        } else {
            tracing::debug!("No duplicate {} records", kind);
        }

        reports.push(DedupReport {
            kind,
            duplicate_groups: groups.len(),
            removed,
        });
    }

    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::storage::init_server_db;
    use tempfile::{tempdir, TempDir};

    async fn setup() -> (TempDir, SqlitePool) {
        let temp_dir = tempdir().unwrap();
        let pool = init_server_db(&temp_dir.path().join("server.db"))
            .await
            .unwrap();
        (temp_dir, pool)
    }

    async fn insert_customer(pool: &SqlitePool, id: &str, mobile: &str, last_modified: i64) {
        sqlx::query(
            "INSERT INTO customers (id, first_name, last_name, mobile, body, client_modified, last_modified) VALUES (?, 'Asha', 'Rao', ?, '{}', 0, ?)",
        )
        .bind(id)
        .bind(mobile)
        .bind(last_modified)
        .execute(pool)
        .await
        .unwrap();
    }

    async fn ids(pool: &SqlitePool, table: &str) -> Vec<String> {
        let sql = format!("SELECT id FROM {} ORDER BY id", table);
        sqlx::query_as::<_, (String,)>(&sql)
            .fetch_all(pool)
            .await
            .unwrap()
            .into_iter()
            .map(|(id,)| id)
            .collect()
    }

    #[tokio::test]
    async fn test_keeps_most_recent_of_each_group() {
        let (_dir, pool) = setup().await;
        insert_customer(&pool, "a", "9990001111", 100).await;
        insert_customer(&pool, "b", "9990001111", 300).await;
        insert_customer(&pool, "c", "9990001111", 200).await;
        insert_customer(&pool, "d", "8880001111", 50).await;

        let reports = remove_duplicates(&pool).await.unwrap();

        assert_eq!(ids(&pool, "customers").await, vec!["b", "d"]);
        let customers = reports
            .iter()
            .find(|r| r.kind == EntityKind::Customer)
            .unwrap();
        assert_eq!(customers.duplicate_groups, 1);
        assert_eq!(customers.removed, 2);
    }

    #[tokio::test]
    async fn test_find_duplicates_is_read_only() {
        let (_dir, pool) = setup().await;
        for (id, last_modified) in [("m1", 10), ("m2", 20)] {
            sqlx::query(
                "INSERT INTO measurements (id, customer_id, body, client_modified, last_modified) VALUES (?, 7, '{}', 0, ?)",
            )
            .bind(id)
            .bind(last_modified)
            .execute(&pool)
            .await
            .unwrap();
        }

        let groups = find_duplicates(&pool, EntityKind::Measurement).await.unwrap();

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].key, "7");
        assert_eq!(groups[0].keep, "m2");
        assert_eq!(groups[0].remove, vec!["m1".to_string()]);
        assert_eq!(ids(&pool, "measurements").await.len(), 2);
    }

    #[tokio::test]
    async fn test_orders_group_by_full_key() {
        let (_dir, pool) = setup().await;
        for (id, order_type) in [("o1", "Blouse"), ("o2", "Blouse"), ("o3", "Kurti")] {
            sqlx::query(
                "INSERT INTO orders (id, customer_id, order_date, order_type, body, client_modified, last_modified) VALUES (?, 1, '2024-05-01', ?, '{}', 0, 5)",
            )
            .bind(id)
            .bind(order_type)
            .execute(&pool)
            .await
            .unwrap();
        }

        remove_duplicates(&pool).await.unwrap();

        // Equal timestamps: the greatest id wins.
        assert_eq!(ids(&pool, "orders").await, vec!["o2", "o3"]);
    }

    #[tokio::test]
    async fn test_clean_collections_report_nothing() {
        let (_dir, pool) = setup().await;
        insert_customer(&pool, "a", "9990001111", 100).await;

        let reports = remove_duplicates(&pool).await.unwrap();

        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(|r| r.removed == 0 && r.duplicate_groups == 0));
    }
}
