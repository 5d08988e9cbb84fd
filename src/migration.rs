//! One-time move of guest data into a signed-in account.

use crate::error::StoreResult;
use crate::storage::{EntityKind, LocalStore, StorageBackend, is_empty_snapshot};
use log::info;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Kinds copied to the remote store and cleared locally.
    pub migrated: Vec<EntityKind>,
    /// Kinds left alone because the account already had data for them.
    pub skipped: Vec<EntityKind>,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.migrated.is_empty()
    }
}

/// Copy every guest snapshot to `owner` in `remote`.
///
/// Per kind: nothing happens when the guest holds no data or the account
/// already has some. Otherwise the snapshot is written remotely and only
/// then removed locally, so a failed write leaves the guest copy in place
/// for the next attempt. Running it twice is a no-op.
pub async fn migrate_guest_data(
    local: &LocalStore,
    remote: &dyn StorageBackend,
    guest_id: &str,
    owner: &str,
) -> StoreResult<MigrationReport> {
    let mut report = MigrationReport::default();
    for kind in EntityKind::ALL {
        let Some(snapshot) = local.load(kind, guest_id).await? else {
            continue;
        };
        if is_empty_snapshot(&snapshot) {
            continue;
        }
        if remote.has_data(kind, owner).await? {
            info!(
                "{} already has {}; keeping guest copy local",
                owner,
                kind.as_str()
            );
            report.skipped.push(kind);
            continue;
        }
        remote.save(kind, owner, &snapshot).await?;
        local.remove(kind, guest_id).await?;
        info!("migrated {} from {} to {}", kind.as_str(), guest_id, owner);
        report.migrated.push(kind);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MemoryRowStore, RemoteStore};
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn migrates_once_then_does_nothing() {
        let local = LocalStore::in_memory("user");
        let remote = RemoteStore::new(Arc::new(MemoryRowStore::new()));
        let tables = json!([{"id": "tbl_a"}, {"id": "tbl_b"}]);
        local.save(EntityKind::BudgetTables, "g", &tables).await.unwrap();

        let report = migrate_guest_data(&local, &remote, "g", "u1").await.unwrap();
        assert_eq!(report.migrated, vec![EntityKind::BudgetTables]);
        assert_eq!(
            remote.load(EntityKind::BudgetTables, "u1").await.unwrap(),
            Some(tables)
        );
        assert!(local.load(EntityKind::BudgetTables, "g").await.unwrap().is_none());

        let again = migrate_guest_data(&local, &remote, "g", "u1").await.unwrap();
        assert!(again.is_noop());
    }

    #[tokio::test]
    async fn existing_account_data_is_not_clobbered() {
        let local = LocalStore::in_memory("user");
        let remote = RemoteStore::new(Arc::new(MemoryRowStore::new()));
        local
            .save(EntityKind::TodoTasks, "g", &json!([{"id": "guest-task"}]))
            .await
            .unwrap();
        local
            .save(EntityKind::BudgetTables, "g", &json!([{"id": "tbl_g"}]))
            .await
            .unwrap();
        remote
            .save(EntityKind::TodoTasks, "u1", &json!([{"id": "mine"}]))
            .await
            .unwrap();

        let report = migrate_guest_data(&local, &remote, "g", "u1").await.unwrap();
        assert_eq!(report.migrated, vec![EntityKind::BudgetTables]);
        assert_eq!(report.skipped, vec![EntityKind::TodoTasks]);
        assert_eq!(
            remote.load(EntityKind::TodoTasks, "u1").await.unwrap(),
            Some(json!([{"id": "mine"}]))
        );
        assert!(local.has_data(EntityKind::TodoTasks, "g").await.unwrap());
    }
}
