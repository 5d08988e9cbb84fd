//! Storage backend adapter.
//!
//! Everything persisted is an opaque JSON snapshot addressed by
//! `(EntityKind, owner key)`. [`LocalStore`] keeps snapshots in a single
//! JSON key-value file on disk; the remote implementation lives in
//! [`crate::remote`].

use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use log::{debug, error};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{self, File, create_dir_all};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const LOCAL_FILE: &str = "local.json";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    BudgetTables,
    TodoTasks,
    KanbanTasks,
    JournalEntries,
    FocusSessions,
}

/// How a kind is laid out in the remote row store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layout {
    /// One row per list element, keyed by the element's `id`.
    RowPerItem,
    /// The whole snapshot as a single row.
    SingleBlob,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::BudgetTables,
        EntityKind::TodoTasks,
        EntityKind::KanbanTasks,
        EntityKind::JournalEntries,
        EntityKind::FocusSessions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::BudgetTables => "budget-tables",
            EntityKind::TodoTasks => "todo-tasks",
            EntityKind::KanbanTasks => "kanban-tasks",
            EntityKind::JournalEntries => "journal-entries",
            EntityKind::FocusSessions => "focus-sessions",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }

    pub fn layout(&self) -> Layout {
        match self {
            EntityKind::BudgetTables => Layout::SingleBlob,
            _ => Layout::RowPerItem,
        }
    }
}

/// A snapshot with nothing in it: absent, `null`, or an empty array/object.
pub fn is_empty_snapshot(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Uniform load/save of opaque snapshots.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// `None` when nothing is stored for this kind and owner.
    async fn load(&self, kind: EntityKind, owner: &str) -> StoreResult<Option<Value>>;

    /// Replace the stored snapshot wholesale.
    async fn save(&self, kind: EntityKind, owner: &str, snapshot: &Value) -> StoreResult<()>;

    async fn remove(&self, kind: EntityKind, owner: &str) -> StoreResult<()>;

    async fn has_data(&self, kind: EntityKind, owner: &str) -> StoreResult<bool> {
        Ok(self
            .load(kind, owner)
            .await?
            .is_some_and(|v| !is_empty_snapshot(&v)))
    }
}

/// Persistent local key-value store.
///
/// All keys live in one JSON object, rewritten in full on every change.
/// Snapshots are stored under `{scope}_{owner}_{kind}`; a few bare keys
/// (such as the guest id) are used directly through [`LocalStore::get`].
#[derive(Debug)]
pub struct LocalStore {
    path: Option<PathBuf>,
    scope: String,
    entries: Mutex<BTreeMap<String, Value>>,
}

impl LocalStore {
    /// Open (or create) the store under `dir`.
    pub fn open(dir: impl AsRef<Path>, scope: &str) -> StoreResult<Self> {
        let dir = dir.as_ref();
        if !dir.exists() {
            create_dir_all(dir)?;
        }
        let path = dir.join(LOCAL_FILE);
        let entries = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            if contents.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&contents)?
            }
        } else {
            BTreeMap::new()
        };
        Ok(LocalStore {
            path: Some(path),
            scope: scope.to_string(),
            entries: Mutex::new(entries),
        })
    }

    /// A store that never touches disk.
    pub fn in_memory(scope: &str) -> Self {
        LocalStore {
            path: None,
            scope: scope.to_string(),
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn key(&self, kind: EntityKind, owner: &str) -> String {
        format!("{}_{}_{}", self.scope, owner, kind.as_str())
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str().map(str::to_string))
    }

    pub fn set(&self, key: &str, value: Value) -> StoreResult<()> {
        let mut entries = self.lock();
        entries.insert(key.to_string(), value);
        self.flush(&entries)
    }

    pub fn delete(&self, key: &str) -> StoreResult<()> {
        let mut entries = self.lock();
        if entries.remove(key).is_some() {
            self.flush(&entries)?;
        }
        Ok(())
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Value>> {
        // A panic mid-write leaves the map itself intact.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn flush(&self, entries: &BTreeMap<String, Value>) -> StoreResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(entries)?;
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
}

#[async_trait]
impl StorageBackend for LocalStore {
    async fn load(&self, kind: EntityKind, owner: &str) -> StoreResult<Option<Value>> {
        let key = self.key(kind, owner);
        let found = self.get(&key);
        debug!("local load {} (found: {})", key, found.is_some());
        Ok(found)
    }

    async fn save(&self, kind: EntityKind, owner: &str, snapshot: &Value) -> StoreResult<()> {
        let key = self.key(kind, owner);
        debug!("local save {}", key);
        self.set(&key, snapshot.clone())
    }

    async fn remove(&self, kind: EntityKind, owner: &str) -> StoreResult<()> {
        self.delete(&self.key(kind, owner))
    }
}
