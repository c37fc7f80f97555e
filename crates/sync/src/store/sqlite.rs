//! Embedded SQLite backend.
//!
//! Tables:
//! - `offline_projects`: one row per locally created project.
//! - `sync_queue`: one row per deferred mutation.
//!
//! The pool is opened once by [`SqliteStore::open`] and reused for every
//! operation.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use backbone_core::{LocalProjectId, QueueItemId};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use super::{LocalStore, StoreBackend, StoreError};
use crate::types::{MutationKind, PendingProject, SyncQueueItem};

/// SQLite-backed offline store.
///
/// This struct is cheap to clone and is safe to share across threads.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and ensure the schema.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    /// Use an existing pool; creates the tables if they are missing.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS offline_projects (
                local_id      TEXT PRIMARY KEY,
                remote_id     TEXT NULL,
                payload       TEXT NOT NULL,
                pending_sync  INTEGER NOT NULL,
                created_at    TEXT NOT NULL,
                synced_at     TEXT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_queue (
                id            TEXT PRIMARY KEY,
                kind          TEXT NOT NULL,
                payload       TEXT NOT NULL,
                created_at    TEXT NOT NULL,
                attempts      INTEGER NOT NULL DEFAULT 0,
                last_attempt  TEXT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl LocalStore for SqliteStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Sqlite
    }

    async fn put_project(&self, project: &PendingProject) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO offline_projects (
                local_id,
                remote_id,
                payload,
                pending_sync,
                created_at,
                synced_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(local_id)
            DO UPDATE SET
                remote_id = excluded.remote_id,
                payload = excluded.payload,
                pending_sync = excluded.pending_sync,
                synced_at = excluded.synced_at
            "#,
        )
        .bind(project.local_id.to_string())
        .bind(project.remote_id.as_deref())
        .bind(project.payload.to_string())
        .bind(project.pending_sync)
        .bind(fmt_time(project.created_at))
        .bind(project.synced_at.map(fmt_time))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_projects(&self) -> Result<Vec<PendingProject>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT local_id, remote_id, payload, pending_sync, created_at, synced_at
            FROM offline_projects
            ORDER BY created_at ASC, local_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(decode_rows(rows, "offline_projects", row_to_project))
    }

    async fn mark_synced(
        &self,
        local_id: LocalProjectId,
        remote_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let local = local_id.to_string();
        let remote = remote_id
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| local.clone());

        let result = sqlx::query(
            r#"
            UPDATE offline_projects
            SET pending_sync = 0,
                remote_id = ?2,
                synced_at = ?3
            WHERE local_id = ?1
            "#,
        )
        .bind(&local)
        .bind(&remote)
        .bind(fmt_time(at))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn push_item(&self, item: &SyncQueueItem) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sync_queue (id, kind, payload, created_at, attempts, last_attempt)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(item.id.to_string())
        .bind(item.kind.as_str())
        .bind(item.payload.to_string())
        .bind(fmt_time(item.created_at))
        .bind(i64::from(item.attempts))
        .bind(item.last_attempt.map(fmt_time))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_items(&self) -> Result<Vec<SyncQueueItem>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, kind, payload, created_at, attempts, last_attempt
            FROM sync_queue
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(decode_rows(rows, "sync_queue", row_to_item))
    }

    async fn remove_item(&self, id: QueueItemId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM sync_queue WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_attempt(&self, id: QueueItemId, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE sync_queue
            SET attempts = attempts + 1,
                last_attempt = ?2
            WHERE id = ?1
            "#,
        )
        .bind(id.to_string())
        .bind(fmt_time(at))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
fn fmt_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_time(value: &str, column: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("invalid {column} '{value}': {e}")))
}

fn parse_json(value: &str) -> Result<Value, StoreError> {
    Ok(serde_json::from_str(value)?)
}

/// Map a database row into a `PendingProject`.
/// Rows that fail to decode are logged and left out of the listing.
fn decode_rows<T>(
    rows: Vec<SqliteRow>,
    table: &'static str,
    decode: fn(SqliteRow) -> Result<T, StoreError>,
) -> Vec<T> {
    rows.into_iter()
        .filter_map(|row| {
            let key: Option<String> = row.try_get(0).ok();
            match decode(row) {
                Ok(record) => Some(record),
                Err(err) => {
                    tracing::warn!(table, key = ?key, error = %err, "skipping unreadable offline store row");
                    None
                }
            }
        })
        .collect()
}

fn row_to_project(row: SqliteRow) -> Result<PendingProject, StoreError> {
    let local_str: String = row.try_get("local_id")?;
    let local_id = LocalProjectId::from_str(&local_str)
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;

    let payload_str: String = row.try_get("payload")?;
    let created_at_str: String = row.try_get("created_at")?;
    let synced_at_str: Option<String> = row.try_get("synced_at")?;

    Ok(PendingProject {
        local_id,
        remote_id: row.try_get("remote_id")?,
        payload: parse_json(&payload_str)?,
        pending_sync: row.try_get("pending_sync")?,
        created_at: parse_time(&created_at_str, "created_at")?,
        synced_at: synced_at_str
            .map(|s| parse_time(&s, "synced_at"))
            .transpose()?,
    })
}

/// Map a database row into a `SyncQueueItem`.
fn row_to_item(row: SqliteRow) -> Result<SyncQueueItem, StoreError> {
    let id_str: String = row.try_get("id")?;
    let id = QueueItemId::from_str(&id_str).map_err(|e| StoreError::Corrupt(e.to_string()))?;

    let kind_str: String = row.try_get("kind")?;
    let kind = MutationKind::parse(&kind_str)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown mutation kind '{kind_str}'")))?;

    let payload_str: String = row.try_get("payload")?;
    let created_at_str: String = row.try_get("created_at")?;
    let attempts: i64 = row.try_get("attempts")?;
    let last_attempt_str: Option<String> = row.try_get("last_attempt")?;

    Ok(SyncQueueItem {
        id,
        kind,
        payload: parse_json(&payload_str)?,
        created_at: parse_time(&created_at_str, "created_at")?,
        attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
        last_attempt: last_attempt_str
            .map(|s| parse_time(&s, "last_attempt"))
            .transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn open_temp() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("offline.db")).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn projects_round_trip_and_mark_synced() {
        let (_dir, store) = open_temp().await;
        let project = PendingProject::new(json!({ "name": "Test Project 10:15:00" }));
        store.put_project(&project).await.unwrap();

        let listed = store.list_projects().await.unwrap();
        assert_eq!(listed, vec![project.clone()]);

        assert!(store.mark_synced(project.local_id, Some("srv-1"), Utc::now()).await.unwrap());
        let synced = &store.list_projects().await.unwrap()[0];
        assert!(!synced.pending_sync);
        assert_eq!(synced.remote_id.as_deref(), Some("srv-1"));
        assert!(synced.synced_at.is_some());
        assert!(synced.check_invariants().is_ok());

        assert!(!store.mark_synced(LocalProjectId::new(), None, Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn queue_lifecycle() {
        let (_dir, store) = open_temp().await;
        let first = SyncQueueItem::new(MutationKind::ProjectUpdate, json!({ "id": "a", "name": "x" }));
        let second = SyncQueueItem::new(MutationKind::ProjectDelete, json!({ "id": "abc123" }));
        store.push_item(&first).await.unwrap();
        store.push_item(&second).await.unwrap();

        let items = store.list_items().await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, first.id);

        assert!(store.record_attempt(second.id, Utc::now()).await.unwrap());
        assert!(store.record_attempt(second.id, Utc::now()).await.unwrap());
        let items = store.list_items().await.unwrap();
        let retried = items.iter().find(|i| i.id == second.id).unwrap();
        assert_eq!(retried.attempts, 2);
        assert!(retried.last_attempt.is_some());

        assert!(store.remove_item(first.id).await.unwrap());
        assert!(!store.remove_item(first.id).await.unwrap());
        assert_eq!(store.list_items().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unreadable_rows_do_not_hide_the_rest() {
        let (_dir, store) = open_temp().await;
        let projects: Vec<_> = (0..3)
            .map(|n| PendingProject::new(json!({ "name": format!("p{n}") })))
            .collect();
        for project in &projects {
            store.put_project(project).await.unwrap();
        }
        let items: Vec<_> = ["a", "b", "c"]
            .into_iter()
            .map(|id| SyncQueueItem::new(MutationKind::ProjectDelete, json!({ "id": id })))
            .collect();
        for item in &items {
            store.push_item(item).await.unwrap();
        }

        sqlx::query("UPDATE offline_projects SET payload = '{bad' WHERE local_id = ?1")
            .bind(projects[0].local_id.to_string())
            .execute(&store.pool)
            .await
            .unwrap();
        sqlx::query("UPDATE sync_queue SET kind = 'license_revoke' WHERE id = ?1")
            .bind(items[1].id.to_string())
            .execute(&store.pool)
            .await
            .unwrap();

        let listed: Vec<_> = store.list_projects().await.unwrap().into_iter().map(|p| p.local_id).collect();
        assert_eq!(listed.len(), 2);
        assert!(listed.contains(&projects[1].local_id));
        assert!(listed.contains(&projects[2].local_id));

        let queued: Vec<_> = store.list_items().await.unwrap().into_iter().map(|i| i.id).collect();
        assert_eq!(queued.len(), 2);
        assert!(queued.contains(&items[0].id));
        assert!(queued.contains(&items[2].id));
    }

    #[tokio::test]
    async fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offline.db");
        let item = SyncQueueItem::new(MutationKind::ProjectCreate, json!({ "name": "p" }));
        {
            let store = SqliteStore::open(&path).await.unwrap();
            store.push_item(&item).await.unwrap();
        }

        let reopened = SqliteStore::open(&path).await.unwrap();
        assert_eq!(reopened.list_items().await.unwrap(), vec![item]);
    }
}
