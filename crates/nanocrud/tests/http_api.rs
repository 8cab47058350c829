//! HTTP surface tests, driven in-process through the router

use std::path::Path;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use libnanocrud_core::ServerConfig;
use nanocrud::Engine;
use serde_json::{json, Value};
use tempfile::tempdir;
use tower::ServiceExt;

async fn start(dir: &Path, keys: Option<Vec<String>>) -> (Engine, Router) {
    let mut config = ServerConfig::new(dir);
    config.keys = keys;
    let engine = Engine::start(config).await.unwrap();
    let router = engine.router().unwrap();
    (engine, router)
}

async fn call(
    router: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(match body {
            Some(value) => Body::from(value.to_string()),
            None => Body::empty(),
        })
        .unwrap();
    send(router, request).await
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_insert_then_find() {
    let dir = tempdir().unwrap();
    let (_engine, router) = start(dir.path(), None).await;

    let (status, doc) = call(&router, "POST", "/db/users", Some(json!({"name": "Ann"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(doc["name"], "Ann");
    assert_eq!(doc["_id"].as_str().unwrap().len(), 16);
    assert!(doc["createdAt"].is_string());
    assert_eq!(doc["createdAt"], doc["updatedAt"]);

    let (status, docs) = call(&router, "GET", "/db/users", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(docs.as_array().unwrap().len(), 1);
    assert_eq!(docs[0]["_id"], doc["_id"]);
}

#[tokio::test]
async fn test_find_with_query_and_pagination() {
    let dir = tempdir().unwrap();
    let (_engine, router) = start(dir.path(), None).await;

    let batch: Vec<Value> = (0..5).map(|i| json!({"n": i, "even": i % 2 == 0})).collect();
    let (status, inserted) = call(&router, "POST", "/db/nums", Some(Value::Array(batch))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(inserted.as_array().unwrap().len(), 5);

    let (_, evens) = call(&router, "GET", "/db/nums", Some(json!({"even": true}))).await;
    assert_eq!(evens.as_array().unwrap().len(), 3);

    let (_, big) = call(&router, "GET", "/db/nums", Some(json!({"n": {"$gte": 3}}))).await;
    assert_eq!(big.as_array().unwrap().len(), 2);

    let (_, page) = call(&router, "GET", "/db/nums?skip=1&limit=2", None).await;
    assert_eq!(page.as_array().unwrap().len(), 2);

    let (_, rest) = call(&router, "GET", "/db/nums?skip=4", None).await;
    assert_eq!(rest.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_update_by_query() {
    let dir = tempdir().unwrap();
    let (_engine, router) = start(dir.path(), None).await;
    call(&router, "POST", "/db/users", Some(json!([{"name": "Ann"}, {"name": "Bob"}]))).await;

    let (status, result) = call(
        &router,
        "POST",
        "/db/users/update",
        Some(json!({"where": {"name": "Ann"}, "with": {"$set": {"age": 31}}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result, json!({"numAffected": 1}));

    let (_, docs) = call(&router, "GET", "/db/users", Some(json!({"age": 31}))).await;
    assert_eq!(docs[0]["name"], "Ann");

    let (_, upserted) = call(
        &router,
        "POST",
        "/db/users/update",
        Some(json!({"where": {"name": "Cy"}, "with": {"$set": {"age": 5}}, "upsert": true})),
    )
    .await;
    assert_eq!(upserted["numAffected"], 1);
    assert_eq!(upserted["upserted"]["name"], "Cy");
}

#[tokio::test]
async fn test_update_requires_where_and_with() {
    let dir = tempdir().unwrap();
    let (_engine, router) = start(dir.path(), None).await;

    let (status, err) = call(
        &router,
        "POST",
        "/db/users/update",
        Some(json!({"with": {"a": 1}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["statusCode"], 400);
    assert!(err["message"].as_str().unwrap().contains("where"));

    let (status, _) = call(&router, "POST", "/db/users/update", Some(json!({"where": {}}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&router, "POST", "/db/users/update", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_delete_removes_all_matches() {
    let dir = tempdir().unwrap();
    let (_engine, router) = start(dir.path(), None).await;
    call(
        &router,
        "POST",
        "/db/tasks",
        Some(json!([{"done": true}, {"done": true}, {"done": false}])),
    )
    .await;

    let (status, result) = call(&router, "DELETE", "/db/tasks", Some(json!({"done": true}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result, json!({"numRemoved": 2}));

    let (_, result) = call(&router, "DELETE", "/db/tasks", None).await;
    assert_eq!(result, json!({"numRemoved": 1}));

    let (_, docs) = call(&router, "GET", "/db/tasks", None).await;
    assert_eq!(docs, json!([]));
}

#[tokio::test]
async fn test_client_errors() {
    let dir = tempdir().unwrap();
    let (_engine, router) = start(dir.path(), None).await;

    let (status, err) = call(&router, "GET", "/db/.git", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"], "Bad Request");

    let (status, _) = call(&router, "POST", "/db/users", Some(json!(42))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&router, "POST", "/db/users", Some(json!({"$bad": 1}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, doc) = call(&router, "POST", "/db/users", Some(json!({"_id": "fixed"}))).await;
    assert_eq!(doc["_id"], "fixed");
    let (status, _) = call(&router, "POST", "/db/users", Some(json!({"_id": "fixed"}))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = call(&router, "GET", "/db/users", Some(json!({"n": {"$regex": "x"}}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_bad_pagination_gets_json_error() {
    let dir = tempdir().unwrap();
    let (_engine, router) = start(dir.path(), None).await;

    for uri in ["/db/users?skip=abc", "/db/users?limit=-1"] {
        let (status, err) = call(&router, "GET", uri, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(err["statusCode"], 400);
        assert_eq!(err["error"], "Bad Request");
        assert!(err["message"].as_str().unwrap().contains("query string"));
    }
}

#[tokio::test]
async fn test_bearer_keys_enforced() {
    let dir = tempdir().unwrap();
    let (_engine, router) = start(dir.path(), Some(vec!["s3cret".to_string()])).await;

    let (status, err) = call(&router, "GET", "/db/users", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(err["statusCode"], 401);

    let wrong = Request::builder()
        .uri("/db/users")
        .header(header::AUTHORIZATION, "Bearer nope")
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&router, wrong).await.0, StatusCode::UNAUTHORIZED);

    let right = Request::builder()
        .method("POST")
        .uri("/db/users")
        .header(header::AUTHORIZATION, "Bearer s3cret")
        .body(Body::from(r#"{"name":"Ann"}"#))
        .unwrap();
    assert_eq!(send(&router, right).await.0, StatusCode::OK);
}
