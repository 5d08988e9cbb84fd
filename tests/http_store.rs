#![cfg(feature = "web")]

use budget_sheet::StoreError;
use budget_sheet::http::{HttpRowStore, ServerState, router};
use budget_sheet::login::UserDirectory;
use budget_sheet::remote::{MemoryRowStore, RemoteRow, RemoteStore, RowStore};
use budget_sheet::storage::{EntityKind, StorageBackend};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

async fn start_server(dir: &std::path::Path) -> (String, JoinHandle<()>) {
    let state = Arc::new(ServerState {
        rows: Arc::new(MemoryRowStore::open(dir).unwrap()),
        users: UserDirectory::open(dir).unwrap(),
    });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    (format!("http://{}", addr), handle)
}

async fn spawn_server(dir: &std::path::Path) -> String {
    start_server(dir).await.0
}

#[tokio::test]
async fn signed_in_client_reads_and_writes_its_own_rows() {
    let dir = tempfile::tempdir().unwrap();
    let base = spawn_server(dir.path()).await;

    let ana = HttpRowStore::signup(&base, "ana", "ana@example.com", "pw1")
        .await
        .unwrap();
    HttpRowStore::signup(&base, "ben", "ben@example.com", "pw2")
        .await
        .unwrap();

    let client = HttpRowStore::login(&base, "ana", "pw1").await.unwrap();
    assert_eq!(client.user(), &ana);

    let store = RemoteStore::new(Arc::new(client));
    let tables = json!([{"id": "tbl_1", "name": "Rent"}]);
    store
        .save(EntityKind::BudgetTables, &ana.id, &tables)
        .await
        .unwrap();
    assert_eq!(
        store.load(EntityKind::BudgetTables, &ana.id).await.unwrap(),
        Some(tables)
    );

    // Ben's session cannot see Ana's rows.
    let ben = HttpRowStore::login(&base, "ben", "pw2").await.unwrap();
    let ben_id = ben.user().id.clone();
    assert!(
        ben.fetch_all(EntityKind::BudgetTables, &ben_id)
            .await
            .unwrap()
            .is_empty()
    );
    assert!(matches!(
        ben.fetch_all(EntityKind::BudgetTables, &ana.id).await,
        Err(StoreError::Unauthorized)
    ));
}

#[tokio::test]
async fn update_and_delete_by_id_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let base = spawn_server(dir.path()).await;
    HttpRowStore::signup(&base, "ana", "ana@example.com", "pw")
        .await
        .unwrap();
    let client = HttpRowStore::login(&base, "ana", "pw").await.unwrap();
    let owner = client.user().id.clone();

    client
        .replace_all(
            EntityKind::TodoTasks,
            &owner,
            vec![
                RemoteRow::new("a", &owner, json!({"id": "a", "done": false})),
                RemoteRow::new("b", &owner, json!({"id": "b", "done": false})),
            ],
        )
        .await
        .unwrap();

    let updated = client
        .update_by_id(
            EntityKind::TodoTasks,
            &owner,
            RemoteRow::new("a", &owner, json!({"id": "a", "done": true})),
        )
        .await
        .unwrap();
    assert!(updated);
    assert!(
        !client
            .update_by_id(EntityKind::TodoTasks, &owner, RemoteRow::new("x", &owner, json!({})))
            .await
            .unwrap()
    );
    assert!(client.delete_by_id(EntityKind::TodoTasks, &owner, "b").await.unwrap());

    let rows = client.fetch_all(EntityKind::TodoTasks, &owner).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].data, json!({"id": "a", "done": true}));
}

#[tokio::test]
async fn bad_credentials_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let base = spawn_server(dir.path()).await;
    HttpRowStore::signup(&base, "ana", "ana@example.com", "pw")
        .await
        .unwrap();
    assert!(matches!(
        HttpRowStore::login(&base, "ana", "nope").await,
        Err(StoreError::Unauthorized)
    ));
    assert!(matches!(
        HttpRowStore::signup(&base, "ana", "other@example.com", "pw").await,
        Err(StoreError::Status(400))
    ));
}

#[tokio::test]
async fn saved_rows_survive_a_server_restart() {
    let dir = tempfile::tempdir().unwrap();
    let (base, server) = start_server(dir.path()).await;
    let ana = HttpRowStore::signup(&base, "ana", "ana@example.com", "pw")
        .await
        .unwrap();
    let client = HttpRowStore::login(&base, "ana", "pw").await.unwrap();
    let tables = json!([{"id": "tbl_1", "name": "Rent"}]);
    RemoteStore::new(Arc::new(client))
        .save(EntityKind::BudgetTables, &ana.id, &tables)
        .await
        .unwrap();
    server.abort();
    let _ = server.await;

    let (base, _server) = start_server(dir.path()).await;
    let client = HttpRowStore::login(&base, "ana", "pw").await.unwrap();
    let store = RemoteStore::new(Arc::new(client));
    assert_eq!(
        store.load(EntityKind::BudgetTables, &ana.id).await.unwrap(),
        Some(tables)
    );
}
