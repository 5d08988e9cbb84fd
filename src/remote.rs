//! Row-oriented remote store and the adapter that maps snapshots onto it.
//!
//! A [`RowStore`] holds rows keyed by `(kind, owner, row id)` and supports
//! fetch-all, replace-all, update-by-id and delete-by-id. [`RemoteStore`]
//! wraps any row store as a [`StorageBackend`] so that callers keep dealing
//! in whole snapshots.

use crate::error::{StoreError, StoreResult};
use crate::storage::{EntityKind, Layout, StorageBackend, is_empty_snapshot};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs::{self, File, create_dir_all};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Row id used for kinds stored as one blob.
pub const SNAPSHOT_ROW_ID: &str = "snapshot";

const CHANGE_FEED_CAPACITY: usize = 64;
const ROWS_FILE: &str = "rows.json";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRow {
    pub id: String,
    pub owner_id: String,
    pub data: Value,
    pub updated_at: DateTime<Utc>,
}

impl RemoteRow {
    pub fn new(id: impl Into<String>, owner_id: &str, data: Value) -> Self {
        RemoteRow {
            id: id.into(),
            owner_id: owner_id.to_string(),
            data,
            updated_at: Utc::now(),
        }
    }
}

/// Emitted whenever rows for `(kind, owner)` change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: EntityKind,
    pub owner: String,
}

#[async_trait]
pub trait RowStore: Send + Sync {
    /// Rows in insertion order.
    async fn fetch_all(&self, kind: EntityKind, owner: &str) -> StoreResult<Vec<RemoteRow>>;

    async fn replace_all(
        &self,
        kind: EntityKind,
        owner: &str,
        rows: Vec<RemoteRow>,
    ) -> StoreResult<()>;

    /// Returns false when no row has that id.
    async fn update_by_id(&self, kind: EntityKind, owner: &str, row: RemoteRow)
    -> StoreResult<bool>;

    async fn delete_by_id(&self, kind: EntityKind, owner: &str, id: &str) -> StoreResult<bool>;

    /// A change feed, for stores that can push.
    fn subscribe(&self) -> Option<broadcast::Receiver<ChangeEvent>> {
        None
    }
}

type RowKey = (EntityKind, String);

/// On-disk form of one `(kind, owner)` bucket.
#[derive(Serialize, Deserialize)]
struct StoredRows {
    kind: EntityKind,
    owner: String,
    rows: Vec<RemoteRow>,
}

/// In-process row store with a change feed.
///
/// Used directly by tests and as the state behind the HTTP server. A store
/// made with [`MemoryRowStore::open`] rewrites `rows.json` after every
/// change and reloads it on the next open.
#[derive(Debug)]
pub struct MemoryRowStore {
    path: Option<PathBuf>,
    rows: RwLock<HashMap<RowKey, Vec<RemoteRow>>>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl Default for MemoryRowStore {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        MemoryRowStore {
            path: None,
            rows: RwLock::new(HashMap::new()),
            changes,
        }
    }
}

impl MemoryRowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or create) a file-backed store under `dir`.
    pub fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref();
        if !dir.exists() {
            create_dir_all(dir)?;
        }
        let path = dir.join(ROWS_FILE);
        let mut rows = HashMap::new();
        if path.exists() {
            let contents = fs::read_to_string(&path)?;
            if !contents.trim().is_empty() {
                let stored: Vec<StoredRows> = serde_json::from_str(&contents)?;
                for bucket in stored {
                    rows.insert((bucket.kind, bucket.owner), bucket.rows);
                }
            }
        }
        info!("opened row store {} ({} buckets)", path.display(), rows.len());
        Ok(MemoryRowStore {
            path: Some(path),
            rows: RwLock::new(rows),
            ..Self::default()
        })
    }

    fn flush(&self, all: &HashMap<RowKey, Vec<RemoteRow>>) -> StoreResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut stored: Vec<StoredRows> = all
            .iter()
            .map(|((kind, owner), rows)| StoredRows {
                kind: *kind,
                owner: owner.clone(),
                rows: rows.clone(),
            })
            .collect();
        stored.sort_by(|a, b| (a.kind, &a.owner).cmp(&(b.kind, &b.owner)));
        let json = serde_json::to_string_pretty(&stored)?;
        let tmp = path.with_extension("json.tmp");
        let result = File::create(&tmp)
            .and_then(|mut file| file.write_all(json.as_bytes()))
            .and_then(|_| fs::rename(&tmp, path));
        if let Err(e) = result {
            error!("failed to write {}: {}", path.display(), e);
            return Err(StoreError::Io(e));
        }
        Ok(())
    }

    fn notify(&self, kind: EntityKind, owner: &str) {
        // No receivers is fine.
        let _ = self.changes.send(ChangeEvent {
            kind,
            owner: owner.to_string(),
        });
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<RowKey, Vec<RemoteRow>>> {
        self.rows.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<RowKey, Vec<RemoteRow>>> {
        self.rows.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl RowStore for MemoryRowStore {
    async fn fetch_all(&self, kind: EntityKind, owner: &str) -> StoreResult<Vec<RemoteRow>> {
        Ok(self
            .read()
            .get(&(kind, owner.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn replace_all(
        &self,
        kind: EntityKind,
        owner: &str,
        rows: Vec<RemoteRow>,
    ) -> StoreResult<()> {
        {
            let mut all = self.write();
            if rows.is_empty() {
                all.remove(&(kind, owner.to_string()));
            } else {
                all.insert((kind, owner.to_string()), rows);
            }
            self.flush(&all)?;
        }
        self.notify(kind, owner);
        Ok(())
    }

    async fn update_by_id(
        &self,
        kind: EntityKind,
        owner: &str,
        row: RemoteRow,
    ) -> StoreResult<bool> {
        let updated = {
            let mut all = self.write();
            let updated = match all
                .get_mut(&(kind, owner.to_string()))
                .and_then(|rows| rows.iter_mut().find(|r| r.id == row.id))
            {
                Some(slot) => {
                    *slot = RemoteRow {
                        updated_at: Utc::now(),
                        ..row
                    };
                    true
                }
                None => false,
            };
            if updated {
                self.flush(&all)?;
            }
            updated
        };
        if updated {
            self.notify(kind, owner);
        }
        Ok(updated)
    }

    async fn delete_by_id(&self, kind: EntityKind, owner: &str, id: &str) -> StoreResult<bool> {
        let removed = {
            let mut all = self.write();
            let removed = match all.get_mut(&(kind, owner.to_string())) {
                Some(rows) => {
                    let before = rows.len();
                    rows.retain(|r| r.id != id);
                    before != rows.len()
                }
                None => false,
            };
            if removed {
                self.flush(&all)?;
            }
            removed
        };
        if removed {
            self.notify(kind, owner);
        }
        Ok(removed)
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<ChangeEvent>> {
        Some(self.changes.subscribe())
    }
}

/// Snapshot view over a [`RowStore`].
///
/// List kinds are stored one row per element, keyed by the element's `id`
/// field (elements without one get a fresh id). Budget tables are stored as
/// a single row under [`SNAPSHOT_ROW_ID`].
#[derive(Clone)]
pub struct RemoteStore {
    rows: Arc<dyn RowStore>,
}

impl RemoteStore {
    pub fn new(rows: Arc<dyn RowStore>) -> Self {
        RemoteStore { rows }
    }

    pub fn rows(&self) -> &Arc<dyn RowStore> {
        &self.rows
    }

    pub fn subscribe(&self) -> Option<broadcast::Receiver<ChangeEvent>> {
        self.rows.subscribe()
    }
}

fn element_id(element: &Value) -> String {
    match element.get("id") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => Uuid::new_v4().to_string(),
    }
}

#[async_trait]
impl StorageBackend for RemoteStore {
    async fn load(&self, kind: EntityKind, owner: &str) -> StoreResult<Option<Value>> {
        let rows = self.rows.fetch_all(kind, owner).await?;
        debug!("remote load {} for {}: {} rows", kind.as_str(), owner, rows.len());
        if rows.is_empty() {
            return Ok(None);
        }
        let snapshot = match kind.layout() {
            Layout::RowPerItem => Value::Array(rows.into_iter().map(|r| r.data).collect()),
            Layout::SingleBlob => match rows.into_iter().find(|r| r.id == SNAPSHOT_ROW_ID) {
                Some(row) => row.data,
                None => return Ok(None),
            },
        };
        Ok(Some(snapshot))
    }

    async fn save(&self, kind: EntityKind, owner: &str, snapshot: &Value) -> StoreResult<()> {
        let rows = match kind.layout() {
            Layout::SingleBlob if is_empty_snapshot(snapshot) => Vec::new(),
            Layout::SingleBlob => vec![RemoteRow::new(SNAPSHOT_ROW_ID, owner, snapshot.clone())],
            Layout::RowPerItem => match snapshot {
                Value::Array(items) => items
                    .iter()
                    .map(|item| RemoteRow::new(element_id(item), owner, item.clone()))
                    .collect(),
                Value::Null => Vec::new(),
                _ => return Err(StoreError::InvalidSnapshot(kind.as_str().to_string())),
            },
        };
        info!(
            "remote save {} for {}: {} rows",
            kind.as_str(),
            owner,
            rows.len()
        );
        self.rows.replace_all(kind, owner, rows).await
    }

    async fn remove(&self, kind: EntityKind, owner: &str) -> StoreResult<()> {
        self.rows.replace_all(kind, owner, Vec::new()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn list_kinds_become_one_row_per_item() {
        let rows = Arc::new(MemoryRowStore::new());
        let store = RemoteStore::new(rows.clone());
        let tasks = json!([{"id": "a", "title": "x"}, {"id": 7, "title": "y"}]);
        store.save(EntityKind::TodoTasks, "u1", &tasks).await.unwrap();

        let stored = rows.fetch_all(EntityKind::TodoTasks, "u1").await.unwrap();
        let ids: Vec<_> = stored.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "7"]);
        assert_eq!(
            store.load(EntityKind::TodoTasks, "u1").await.unwrap(),
            Some(tasks)
        );
        assert!(store.load(EntityKind::TodoTasks, "u2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn budget_tables_are_one_blob() {
        let rows = Arc::new(MemoryRowStore::new());
        let store = RemoteStore::new(rows.clone());
        let tables = json!([{"id": "tbl_1"}, {"id": "tbl_2"}]);
        store.save(EntityKind::BudgetTables, "u1", &tables).await.unwrap();

        let stored = rows.fetch_all(EntityKind::BudgetTables, "u1").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, SNAPSHOT_ROW_ID);
        assert_eq!(
            store.load(EntityKind::BudgetTables, "u1").await.unwrap(),
            Some(tables)
        );

        store.remove(EntityKind::BudgetTables, "u1").await.unwrap();
        assert!(!store.has_data(EntityKind::BudgetTables, "u1").await.unwrap());
    }

    #[tokio::test]
    async fn non_list_snapshot_is_rejected_for_list_kinds() {
        let store = RemoteStore::new(Arc::new(MemoryRowStore::new()));
        let err = store
            .save(EntityKind::KanbanTasks, "u1", &json!({"not": "a list"}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidSnapshot(_)));
    }

    #[tokio::test]
    async fn update_and_delete_by_id_notify_subscribers() {
        let rows = MemoryRowStore::new();
        let mut feed = rows.subscribe().unwrap();
        rows.replace_all(
            EntityKind::TodoTasks,
            "u1",
            vec![RemoteRow::new("a", "u1", json!({"done": false}))],
        )
        .await
        .unwrap();
        assert_eq!(feed.recv().await.unwrap().kind, EntityKind::TodoTasks);

        let changed = rows
            .update_by_id(
                EntityKind::TodoTasks,
                "u1",
                RemoteRow::new("a", "u1", json!({"done": true})),
            )
            .await
            .unwrap();
        assert!(changed);
        assert_eq!(feed.recv().await.unwrap().owner, "u1");

        let missing = rows
            .update_by_id(
                EntityKind::TodoTasks,
                "u1",
                RemoteRow::new("zzz", "u1", json!({})),
            )
            .await
            .unwrap();
        assert!(!missing);

        assert!(rows.delete_by_id(EntityKind::TodoTasks, "u1", "a").await.unwrap());
        assert!(!rows.delete_by_id(EntityKind::TodoTasks, "u1", "a").await.unwrap());
        assert!(rows.fetch_all(EntityKind::TodoTasks, "u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_backed_rows_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let tables = json!([{"id": "tbl_1", "name": "Rent"}]);
        {
            let rows = Arc::new(MemoryRowStore::open(dir.path()).unwrap());
            let store = RemoteStore::new(rows.clone());
            store.save(EntityKind::BudgetTables, "u1", &tables).await.unwrap();
            store
                .save(EntityKind::TodoTasks, "u1", &json!([{"id": "a"}, {"id": "b"}]))
                .await
                .unwrap();
            assert!(rows.delete_by_id(EntityKind::TodoTasks, "u1", "b").await.unwrap());
        }

        let rows = Arc::new(MemoryRowStore::open(dir.path()).unwrap());
        let store = RemoteStore::new(rows.clone());
        assert_eq!(
            store.load(EntityKind::BudgetTables, "u1").await.unwrap(),
            Some(tables)
        );
        assert_eq!(
            store.load(EntityKind::TodoTasks, "u1").await.unwrap(),
            Some(json!([{"id": "a"}]))
        );
        assert!(store.load(EntityKind::BudgetTables, "u2").await.unwrap().is_none());
    }
}
