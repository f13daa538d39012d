// Integration tests for `SnapshotClient` using wiremock.
#![allow(clippy::unwrap_used)]

use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::json;
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use greenlink_api::{EntityId, Error, HttpConfig, ServerTimestamp, SnapshotClient, SnapshotFetcher};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, SnapshotClient) {
    let server = MockServer::start().await;
    let base = Url::parse(&format!("{}/", server.uri())).unwrap();
    let client = SnapshotClient::with_client(reqwest::Client::new(), base);
    (server, client)
}

// ── Happy-path tests ────────────────────────────────────────────────

#[tokio::test]
async fn test_fetch_bare_snapshot() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/zones/7/snapshot"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "state": { "ph": 6.2, "ec": 1.8, "pump": "running" },
            "server_ts": 100
        })))
        .mount(&server)
        .await;

    let snap = client.fetch_entity_snapshot(EntityId::new(7)).await.unwrap();
    assert_eq!(snap.server_ts, ServerTimestamp::new(100));
    assert_eq!(snap.state["pump"], "running");
}

#[tokio::test]
async fn test_fetch_wrapped_snapshot() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/zones/12/snapshot"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "state": { "valve": "closed" }, "server_timestamp": 4200 }
        })))
        .mount(&server)
        .await;

    let snap = client.fetch_entity_snapshot(EntityId::new(12)).await.unwrap();
    assert_eq!(snap.server_ts, ServerTimestamp::new(4200));
    assert_eq!(snap.state["valve"], "closed");
}

#[tokio::test]
async fn test_bearer_token_is_sent() {
    let server = MockServer::start().await;
    let base = Url::parse(&format!("{}/", server.uri())).unwrap();
    let token = SecretString::from("s3cret".to_string());
    let client = SnapshotClient::new(base, Some(&token), &HttpConfig::default()).unwrap();

    Mock::given(method("GET"))
        .and(path("/api/zones/1/snapshot"))
        .and(header("authorization", "Bearer s3cret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "state": {}, "server_ts": 1
        })))
        .expect(1)
        .mount(&server)
        .await;

    client.fetch_entity_snapshot(EntityId::new(1)).await.unwrap();
}

// ── Error-path tests ────────────────────────────────────────────────

#[tokio::test]
async fn test_not_found_maps_to_api_error() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/zones/99/snapshot"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({ "message": "Zone not found" })),
        )
        .mount(&server)
        .await;

    let err = client.fetch_entity_snapshot(EntityId::new(99)).await.unwrap_err();
    assert!(err.is_not_found());
    match err {
        Error::Api { status, message } => {
            assert_eq!(status, 404);
            assert_eq!(message, "Zone not found");
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/zones/3/snapshot"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = client.fetch_entity_snapshot(EntityId::new(3)).await.unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_malformed_body_keeps_raw_text() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/zones/5/snapshot"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = client.fetch_entity_snapshot(EntityId::new(5)).await.unwrap_err();
    match err {
        Error::Deserialization { body, .. } => assert_eq!(body, "<html>oops</html>"),
        other => panic!("expected Deserialization error, got {other:?}"),
    }
}
