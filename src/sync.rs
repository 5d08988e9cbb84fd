//! Load/save facade over local and remote storage.
//!
//! [`DataSync`] picks the backend from the session identity: the remote
//! store once someone is signed in and a remote is configured, the local
//! store otherwise. Loads never fail; they log and fall back to an empty
//! snapshot. Saves report failures to the caller.

use crate::error::{StoreError, StoreResult};
use crate::identity::{AuthenticatedUser, IdentityResolver};
use crate::migration::{MigrationReport, migrate_guest_data};
use crate::recalc::Recalculator;
use crate::remote::{ChangeEvent, RemoteStore};
use crate::storage::{EntityKind, LocalStore, StorageBackend};
use crate::table::Table;
use crate::workbook::Workbook;
use log::{debug, error, warn};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

pub struct DataSync {
    local: Arc<LocalStore>,
    remote: Option<RemoteStore>,
    identity: IdentityResolver,
}

impl DataSync {
    pub fn new(local: Arc<LocalStore>, remote: Option<RemoteStore>, identity: IdentityResolver) -> Self {
        DataSync {
            local,
            remote,
            identity,
        }
    }

    pub fn identity(&self) -> &IdentityResolver {
        &self.identity
    }

    pub fn owner_key(&self) -> &str {
        self.identity.owner_key()
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    fn active_remote(&self) -> Option<&RemoteStore> {
        self.remote
            .as_ref()
            .filter(|_| self.identity.is_authenticated())
    }

    pub fn is_remote(&self) -> bool {
        self.active_remote().is_some()
    }

    fn backend(&self) -> &dyn StorageBackend {
        match self.active_remote() {
            Some(remote) => remote as &dyn StorageBackend,
            None => self.local.as_ref() as &dyn StorageBackend,
        }
    }

    /// The stored snapshot for `kind`, or an empty list.
    pub async fn load(&self, kind: EntityKind) -> Value {
        match self.backend().load(kind, self.owner_key()).await {
            Ok(Some(value)) => value,
            Ok(None) => Value::Array(Vec::new()),
            Err(e) => {
                error!("failed to load {} for {}: {}", kind.as_str(), self.owner_key(), e);
                Value::Array(Vec::new())
            }
        }
    }

    pub async fn save(&self, kind: EntityKind, snapshot: &Value) -> StoreResult<()> {
        self.backend()
            .save(kind, self.owner_key(), snapshot)
            .await
            .inspect_err(|e| {
                error!("failed to save {} for {}: {}", kind.as_str(), self.owner_key(), e)
            })
    }

    pub async fn load_tables(&self) -> Vec<Table> {
        let value = self.load(EntityKind::BudgetTables).await;
        match serde_json::from_value(value) {
            Ok(tables) => tables,
            Err(e) => {
                error!("stored budget tables for {} are unreadable: {}", self.owner_key(), e);
                Vec::new()
            }
        }
    }

    /// Load the owner's tables into a fresh workbook.
    pub async fn load_workbook(&self, recalc: Recalculator) -> Workbook {
        let tables = self.load_tables().await;
        debug!("loaded {} tables for {}", tables.len(), self.owner_key());
        Workbook::from_tables(tables, recalc)
    }

    pub async fn save_tables(&self, tables: &[Table]) -> StoreResult<()> {
        let value = serde_json::to_value(tables)?;
        self.save(EntityKind::BudgetTables, &value).await
    }

    pub async fn save_workbook(&self, workbook: &Workbook) -> StoreResult<()> {
        self.save_tables(workbook.tables()).await
    }

    /// Move to a signed-in identity and bring over any guest data.
    ///
    /// Without a remote store the identity changes and nothing is migrated.
    pub async fn sign_in(&mut self, user: AuthenticatedUser) -> StoreResult<MigrationReport> {
        self.identity.sign_in(&self.local, user)?;
        let (Some(remote), Some(guest)) = (self.active_remote(), self.identity.guest_id()) else {
            return Ok(MigrationReport::default());
        };
        migrate_guest_data(&self.local, remote, guest, self.identity.owner_key()).await
    }

    /// Re-run migration for the current session; a no-op once done.
    pub async fn migrate(&self) -> StoreResult<MigrationReport> {
        let remote = self.active_remote().ok_or(StoreError::Unauthorized)?;
        match self.identity.guest_id() {
            Some(guest) => {
                migrate_guest_data(&self.local, remote, guest, self.identity.owner_key()).await
            }
            None => Ok(MigrationReport::default()),
        }
    }

    /// Snapshots of the owner's tables as other writers change them.
    ///
    /// `None` when the session is local or the remote cannot push changes.
    pub fn subscribe(&self) -> Option<TableFeed> {
        let remote = self.active_remote()?;
        let events = remote.subscribe()?;
        Some(TableFeed {
            events,
            remote: remote.clone(),
            owner: self.owner_key().to_string(),
        })
    }
}

/// Stream of remote budget-table snapshots for one owner.
///
/// Each item is the complete table list; apply it with
/// [`Workbook::replace_tables`].
pub struct TableFeed {
    events: broadcast::Receiver<ChangeEvent>,
    remote: RemoteStore,
    owner: String,
}

impl TableFeed {
    /// Wait for the next change. `None` once the store goes away.
    pub async fn next(&mut self) -> Option<Vec<Table>> {
        loop {
            match self.events.recv().await {
                Ok(event) if event.kind == EntityKind::BudgetTables && event.owner == self.owner => {}
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("change feed lagged by {} events; reloading", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
            match self.remote.load(EntityKind::BudgetTables, &self.owner).await {
                Ok(value) => {
                    let value = value.unwrap_or(Value::Array(Vec::new()));
                    match serde_json::from_value(value) {
                        Ok(tables) => return Some(tables),
                        Err(e) => error!("ignoring unreadable remote snapshot: {}", e),
                    }
                }
                Err(e) => error!("failed to reload tables after change: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRowStore;
    use serde_json::json;

    fn guest_session(local: Arc<LocalStore>, remote: Option<RemoteStore>) -> DataSync {
        let identity = IdentityResolver::resolve(&local, None, None).unwrap();
        DataSync::new(local, remote, identity)
    }

    #[tokio::test]
    async fn guest_sessions_stay_local_even_with_a_remote() {
        let local = Arc::new(LocalStore::in_memory("user"));
        let rows = Arc::new(MemoryRowStore::new());
        let sync = guest_session(local.clone(), Some(RemoteStore::new(rows.clone())));
        assert!(!sync.is_remote());

        let mut book = Workbook::default();
        book.create_table(2, 2);
        sync.save_workbook(&book).await.unwrap();

        let key = local.key(EntityKind::BudgetTables, sync.owner_key());
        assert!(local.get(&key).is_some());
        assert_eq!(sync.load_tables().await.len(), 1);
    }

    #[tokio::test]
    async fn unreadable_snapshot_loads_as_empty() {
        let local = Arc::new(LocalStore::in_memory("user"));
        let sync = guest_session(local, None);
        sync.save(EntityKind::BudgetTables, &json!({"bogus": true}))
            .await
            .unwrap();
        assert!(sync.load_tables().await.is_empty());
        assert_eq!(sync.load(EntityKind::TodoTasks).await, json!([]));
    }

    #[tokio::test]
    async fn sign_in_migrates_and_switches_backend() {
        let local = Arc::new(LocalStore::in_memory("user"));
        let rows = Arc::new(MemoryRowStore::new());
        let mut sync = guest_session(local.clone(), Some(RemoteStore::new(rows.clone())));

        let mut book = Workbook::default();
        book.create_table(1, 1);
        book.create_table(1, 1);
        sync.save_workbook(&book).await.unwrap();

        let report = sync
            .sign_in(AuthenticatedUser { id: "u1".into() })
            .await
            .unwrap();
        assert_eq!(report.migrated, vec![EntityKind::BudgetTables]);
        assert!(sync.is_remote());
        assert_eq!(sync.load_tables().await.len(), 2);
        assert!(sync.migrate().await.unwrap().is_noop());
    }

    #[tokio::test]
    async fn feed_delivers_snapshots_from_other_writers() {
        let local = Arc::new(LocalStore::in_memory("user"));
        let rows = Arc::new(MemoryRowStore::new());
        let remote = RemoteStore::new(rows.clone());
        let mut sync = guest_session(local, Some(remote.clone()));
        sync.sign_in(AuthenticatedUser { id: "u1".into() })
            .await
            .unwrap();
        let mut feed = sync.subscribe().unwrap();

        // Another device writes for a different owner, then for ours.
        remote
            .save(EntityKind::BudgetTables, "u2", &json!([]))
            .await
            .unwrap();
        let mut other = Workbook::default();
        other.create_table(1, 1);
        let value = serde_json::to_value(other.tables()).unwrap();
        remote
            .save(EntityKind::BudgetTables, "u1", &value)
            .await
            .unwrap();

        let tables = feed.next().await.unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].id, other.tables()[0].id);
    }
}
