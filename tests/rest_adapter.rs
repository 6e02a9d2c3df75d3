mod common;

use common::{rest_config, StubResponse, StubServer};
use propstore::ast::{LogicalQuery, Table};
use propstore::db::{FailureClass, RecordId};
use propstore::store::Store;
use serde_json::json;
use tempfile::tempdir;

#[tokio::test]
async fn test_requests_carry_credentials() {
    let dir = tempdir().unwrap();
    let server = StubServer::start(vec![StubResponse::json(200, json!([]))]).await;
    let store = Store::from_config(&rest_config(dir.path(), &server.base_url)).unwrap();

    store
        .fetch_all(&LogicalQuery::select(Table::Clients))
        .await
        .unwrap();

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.method, "GET");
    assert_eq!(request.target, "/clients?select=%2A");
    assert_eq!(request.header("apikey"), Some("test-key"));
    assert_eq!(request.header("authorization"), Some("Bearer test-key"));
    assert_eq!(request.header("accept"), Some("application/json"));
    assert_eq!(request.header("prefer"), None);
}

#[tokio::test]
async fn test_insert_asks_for_representation_and_returns_id() {
    let dir = tempdir().unwrap();
    let server = StubServer::start(vec![StubResponse::json(
        201,
        json!([{"id": 42, "nome": "Ana", "cpf_cnpj": "1", "data": {}}]),
    )])
    .await;
    let store = Store::from_config(&rest_config(dir.path(), &server.base_url)).unwrap();

    let id = store
        .insert(
            &LogicalQuery::insert(Table::Clients)
                .set("nome", "Ana")
                .set("cpf_cnpj", "1")
                .set("data", json!({"tipo": "PF"})),
        )
        .await
        .unwrap();
    assert_eq!(id, Some(RecordId::Int(42)));

    let request = &server.requests()[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.target, "/clients");
    assert_eq!(request.header("prefer"), Some("return=representation"));
    let body: serde_json::Value = serde_json::from_str(&request.body).unwrap();
    assert_eq!(body, json!({"nome": "Ana", "cpf_cnpj": "1", "data": {"tipo": "PF"}}));
}

#[tokio::test]
async fn test_update_matching_nothing_is_not_committed() {
    let dir = tempdir().unwrap();
    let server = StubServer::start(vec![StubResponse::json(200, json!([]))]).await;
    let store = Store::from_config(&rest_config(dir.path(), &server.base_url)).unwrap();

    let committed = store
        .commit(
            &LogicalQuery::update(Table::Clients)
                .set("nome", "Ghost")
                .filter("id", 999),
        )
        .await
        .unwrap();
    assert!(!committed);

    let request = &server.requests()[0];
    assert_eq!(request.method, "PATCH");
    assert_eq!(request.target, "/clients?id=eq.999");
}

#[tokio::test]
async fn test_count_is_the_number_of_returned_rows() {
    let dir = tempdir().unwrap();
    let server = StubServer::start(vec![StubResponse::json(
        200,
        json!([{"id": 1}, {"id": 2}, {"id": 3}]),
    )])
    .await;
    let store = Store::from_config(&rest_config(dir.path(), &server.base_url)).unwrap();

    let total = store
        .count(&LogicalQuery::count(Table::Clients).search("maria"))
        .await
        .unwrap();
    assert_eq!(total, 3);

    let request = &server.requests()[0];
    assert!(request.target.starts_with("/clients?select=id&or="));
    assert!(!request.target.contains("limit"));
}

#[tokio::test]
async fn test_rest_timestamps_are_normalized() {
    let dir = tempdir().unwrap();
    let server = StubServer::start(vec![StubResponse::json(
        200,
        json!([{
            "id": 5,
            "nome": "Ana",
            "created_at": "2024-02-03T04:05:06.789+00:00",
            "updated_at": "2024-02-03T01:05:06-03:00"
        }]),
    )])
    .await;
    let store = Store::from_config(&rest_config(dir.path(), &server.base_url)).unwrap();

    let record = store
        .fetch_one(&LogicalQuery::select(Table::Clients).filter("id", 5))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.created_at.as_deref(), Some("2024-02-03T04:05:06.789Z"));
    assert_eq!(record.updated_at.as_deref(), Some("2024-02-03T04:05:06Z"));
    assert!(server.requests()[0].target.contains("limit=1"));
}

#[tokio::test]
async fn test_server_error_is_classified() {
    let dir = tempdir().unwrap();
    let server = StubServer::start(vec![StubResponse::json(
        503,
        json!({"message": "upstream unavailable"}),
    )])
    .await;
    // Put the fallback file under a regular file so it cannot be created
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"").unwrap();
    let mut config = rest_config(dir.path(), &server.base_url);
    config.sqlite_path = blocker.join("store.db");
    let store = Store::from_config(&config).unwrap();

    let err = store
        .fetch_all(&LogicalQuery::select(Table::Clients))
        .await
        .unwrap_err();
    let trail = err.trail().unwrap();
    assert_eq!(
        trail.attempts()[0].failure.as_ref().map(|f| f.0),
        Some(FailureClass::Unreachable)
    );
    assert!(trail.fell_back());
    assert_eq!(err.class(), Some(FailureClass::Unreachable));
    assert!(trail.attempts()[0]
        .failure
        .as_ref()
        .is_some_and(|f| f.1.contains("upstream unavailable")));
}
