use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use sqlx::{Row, SqlitePool, migrate::Migrator, sqlite::SqliteConnectOptions};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::collection::Collection;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// A mirrored record: the backend's JSON object, plus the `synced` tag.
pub type Record = Map<String, Value>;

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("record encoding error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("timestamp format error: {0}")]
    TimeFormat(#[from] time::error::Format),
    #[error("timestamp parse error: {0}")]
    TimeParse(#[from] time::error::Parse),
    #[error("XDG data directory is unavailable")]
    MissingDataDir,
    #[error("unknown collection: {0}")]
    UnknownCollection(String),
    #[error("record in {collection} has no primary key")]
    MissingKey { collection: Collection },
    #[error("invalid sync status: {0}")]
    InvalidStatus(String),
}

/// Status stored next to the last sync time. Metadata is only written
/// after a complete run, so `idle` is the one state that reaches disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Idle,
}

impl SyncStatus {
    fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
        }
    }

    fn parse(value: &str) -> Result<Self, MirrorError> {
        match value {
            "idle" => Ok(SyncStatus::Idle),
            other => Err(MirrorError::InvalidStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncMeta {
    pub last_synced_at: OffsetDateTime,
    pub status: SyncStatus,
}

/// SQLite-backed local mirror of the backend's entity collections.
pub struct MirrorStore {
    pool: SqlitePool,
}

impl MirrorStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn open(db_path: &Path) -> Result<Self, MirrorError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn init(&self) -> Result<(), MirrorError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    /// Upserts every record by primary key inside one transaction.
    ///
    /// Either all records are stored or none are. Records sharing a key
    /// collapse to the last one; the count returned is of distinct keys.
    pub async fn bulk_put(
        &self,
        collection: Collection,
        records: &[Record],
    ) -> Result<usize, MirrorError> {
        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            let key = collection
                .key_for(record)
                .ok_or(MirrorError::MissingKey { collection })?;
            let synced = record
                .get("synced")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            rows.push((key, serde_json::to_string(record)?, synced));
        }

        let mut tx = self.pool.begin().await?;
        for (key, body, synced) in &rows {
            sqlx::query(
                "INSERT INTO records (collection, id, body, synced) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(collection, id) DO UPDATE SET
                    body = excluded.body,
                    synced = excluded.synced",
            )
            .bind(collection.as_str())
            .bind(key)
            .bind(body)
            .bind(if *synced { 1 } else { 0 })
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        let distinct: HashSet<&str> = rows.iter().map(|(key, _, _)| key.as_str()).collect();
        Ok(distinct.len())
    }

    pub async fn count(&self, collection: Collection) -> Result<i64, MirrorError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM records WHERE collection = ?1")
            .bind(collection.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    pub async fn to_array(&self, collection: Collection) -> Result<Vec<Record>, MirrorError> {
        let rows = sqlx::query("SELECT body FROM records WHERE collection = ?1 ORDER BY rowid ASC")
            .bind(collection.as_str())
            .fetch_all(&self.pool)
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let body: String = row.try_get("body")?;
            out.push(serde_json::from_str(&body)?);
        }
        Ok(out)
    }

    pub async fn get(&self, collection: Collection, id: &str) -> Result<Option<Record>, MirrorError> {
        let row = sqlx::query("SELECT body FROM records WHERE collection = ?1 AND id = ?2")
            .bind(collection.as_str())
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let body: String = row.try_get("body")?;
        Ok(Some(serde_json::from_str(&body)?))
    }

    pub async fn put_sync_meta(&self, key: &str, meta: &SyncMeta) -> Result<(), MirrorError> {
        sqlx::query(
            "INSERT INTO sync_meta (key, last_synced_at, status) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                last_synced_at = excluded.last_synced_at,
                status = excluded.status",
        )
        .bind(key)
        .bind(meta.last_synced_at.format(&Rfc3339)?)
        .bind(meta.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_sync_meta(&self, key: &str) -> Result<Option<SyncMeta>, MirrorError> {
        let row = sqlx::query("SELECT last_synced_at, status FROM sync_meta WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let last_synced_at: String = row.try_get("last_synced_at")?;
        let status: String = row.try_get("status")?;
        Ok(Some(SyncMeta {
            last_synced_at: OffsetDateTime::parse(&last_synced_at, &Rfc3339)?,
            status: SyncStatus::parse(&status)?,
        }))
    }
}

pub fn default_db_path() -> Result<PathBuf, MirrorError> {
    let mut path = dirs::data_dir().ok_or(MirrorError::MissingDataDir)?;
    path.push("casebook");
    path.push("mirror.db");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    async fn make_store() -> MirrorStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let store = MirrorStore::from_pool(pool);
        store.init().await.unwrap();
        store
    }

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[tokio::test]
    async fn collections_start_empty() {
        let store = make_store().await;
        for collection in Collection::ALL {
            assert_eq!(store.count(collection).await.unwrap(), 0);
            assert!(store.to_array(collection).await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn bulk_put_then_read_back() {
        let store = make_store().await;
        let records = vec![
            record(json!({ "id": "p1", "name": "Alpha", "synced": true })),
            record(json!({ "id": "p2", "name": "Beta", "synced": true, "tags": ["a"] })),
        ];

        assert_eq!(
            store.bulk_put(Collection::Projects, &records).await.unwrap(),
            2
        );
        assert_eq!(store.count(Collection::Projects).await.unwrap(), 2);
        assert_eq!(store.to_array(Collection::Projects).await.unwrap(), records);
        assert_eq!(store.count(Collection::Subprojects).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn bulk_put_overwrites_by_id() {
        let store = make_store().await;
        store
            .bulk_put(
                Collection::Services,
                &[
                    record(json!({ "id": "s1", "name": "Old" })),
                    record(json!({ "id": "s2", "name": "Kept" })),
                ],
            )
            .await
            .unwrap();
        store
            .bulk_put(
                Collection::Services,
                &[record(json!({ "id": "s1", "name": "New", "synced": true }))],
            )
            .await
            .unwrap();

        assert_eq!(store.count(Collection::Services).await.unwrap(), 2);
        let s1 = store.get(Collection::Services, "s1").await.unwrap().unwrap();
        assert_eq!(s1["name"], "New");
        assert_eq!(s1["synced"], true);
        let s2 = store.get(Collection::Services, "s2").await.unwrap().unwrap();
        assert_eq!(s2["name"], "Kept");
    }

    #[tokio::test]
    async fn bulk_put_counts_distinct_keys() {
        let store = make_store().await;
        let written = store
            .bulk_put(
                Collection::ProjectUsers,
                &[
                    record(json!({ "id": "u1", "projectId": "p1", "role": "viewer" })),
                    record(json!({ "userId": "u1", "projectId": "p1", "role": "editor" })),
                    record(json!({ "id": "u1", "projectId": "p2" })),
                ],
            )
            .await
            .unwrap();

        assert_eq!(written, 2);
        assert_eq!(store.count(Collection::ProjectUsers).await.unwrap(), 2);
        let p1 = store
            .get(Collection::ProjectUsers, "p1:u1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(p1["role"], "editor");
    }

    #[tokio::test]
    async fn same_id_in_different_collections_does_not_collide() {
        let store = make_store().await;
        store
            .bulk_put(Collection::Roles, &[record(json!({ "id": "1", "name": "admin" }))])
            .await
            .unwrap();
        store
            .bulk_put(
                Collection::Permissions,
                &[record(json!({ "id": "1", "name": "read" }))],
            )
            .await
            .unwrap();

        let role = store.get(Collection::Roles, "1").await.unwrap().unwrap();
        assert_eq!(role["name"], "admin");
        assert_eq!(store.count(Collection::Permissions).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn bulk_put_is_all_or_nothing() {
        let store = make_store().await;
        let err = store
            .bulk_put(
                Collection::Beneficiaries,
                &[
                    record(json!({ "id": "b1" })),
                    record(json!({ "firstName": "no id" })),
                ],
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            MirrorError::MissingKey {
                collection: Collection::Beneficiaries
            }
        ));
        assert_eq!(store.count(Collection::Beneficiaries).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sync_meta_round_trip() {
        let store = make_store().await;
        assert!(store.get_sync_meta("all").await.unwrap().is_none());

        let meta = SyncMeta {
            last_synced_at: OffsetDateTime::now_utc(),
            status: SyncStatus::Idle,
        };
        store.put_sync_meta("all", &meta).await.unwrap();
        assert_eq!(store.get_sync_meta("all").await.unwrap(), Some(meta.clone()));

        let later = SyncMeta {
            last_synced_at: meta.last_synced_at + time::Duration::seconds(5),
            status: SyncStatus::Idle,
        };
        store.put_sync_meta("all", &later).await.unwrap();
        assert_eq!(store.get_sync_meta("all").await.unwrap(), Some(later));
    }

    #[tokio::test]
    async fn unknown_stored_status_is_rejected() {
        let store = make_store().await;
        sqlx::query(
            "INSERT INTO sync_meta (key, last_synced_at, status)
             VALUES ('all', '2026-01-01T00:00:00Z', 'paused')",
        )
        .execute(&store.pool)
        .await
        .unwrap();

        let err = store.get_sync_meta("all").await.unwrap_err();
        assert!(matches!(err, MirrorError::InvalidStatus(ref s) if s == "paused"));
    }

    #[tokio::test]
    async fn open_creates_database_file() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested").join("mirror.db");
        {
            let store = MirrorStore::open(&db_path).await.unwrap();
            store
                .bulk_put(Collection::Kpis, &[record(json!({ "id": 7, "name": "reach" }))])
                .await
                .unwrap();
        }
        assert!(db_path.exists());

        let reopened = MirrorStore::open(&db_path).await.unwrap();
        let kpi = reopened.get(Collection::Kpis, "7").await.unwrap().unwrap();
        assert_eq!(kpi["name"], "reach");
    }
}
