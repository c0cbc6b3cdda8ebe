//! HTTP end-to-end tests against a live axum server.

#![cfg(feature = "http")]

use fastcrud::http::{build_router, CrudApp, CrudRouter, Deleted, ErrorBody};
use fastcrud::{Dispatcher, Document, MemoryStorage, Record, RecordId};
use serde_json::{json, Value};

/// Spin up the HTTP server on an OS-assigned port, returning the base URL.
async fn spawn_test_server() -> String {
    let crud = Dispatcher::blocking(MemoryStorage::<Document>::new());
    let app = build_router(crud);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://127.0.0.1:{port}/document")
}

async fn create(client: &reqwest::Client, base: &str, body: Value) -> Record<Document> {
    let resp = client.post(base).json(&body).send().await.unwrap();
    assert_eq!(resp.status(), 201);
    resp.json().await.unwrap()
}

#[tokio::test]
async fn create_get_put_delete_roundtrip() {
    let base = spawn_test_server().await;
    let client = reqwest::Client::new();

    let created = create(&client, &base, json!({"title": "draft", "n": 1})).await;
    assert_eq!(created.data.get("title"), Some(&json!("draft")));

    let resp = client.get(format!("{base}/{}", created.uid)).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let fetched: Record<Document> = resp.json().await.unwrap();
    assert_eq!(fetched, created);

    let resp = client
        .put(format!("{base}/{}", created.uid))
        .json(&json!({"title": "final"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let replaced: Record<Document> = resp.json().await.unwrap();
    assert_eq!(replaced.uid, created.uid);
    assert!(replaced.data.get("n").is_none());

    let resp = client.delete(format!("{base}/{}", created.uid)).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let deleted: Deleted = resp.json().await.unwrap();
    assert_eq!(deleted, Deleted { uid: created.uid, deleted: true });

    let resp = client.get(format!("{base}/{}", created.uid)).send().await.unwrap();
    assert_eq!(resp.status(), 404);
    let body: ErrorBody = resp.json().await.unwrap();
    assert_eq!(body.error, "not_found");
}

#[tokio::test]
async fn post_array_creates_many() {
    let base = spawn_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(&base)
        .json(&json!([{"title": "same"}, {"title": "same"}]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let created: Vec<Record<Document>> = resp.json().await.unwrap();
    assert_eq!(created.len(), 2);
    assert_ne!(created[0].uid, created[1].uid);
}

#[tokio::test]
async fn duplicate_uid_conflicts() {
    let base = spawn_test_server().await;
    let client = reqwest::Client::new();
    let id = RecordId::new();

    create(&client, &base, json!({"uid": id.to_string(), "title": "a"})).await;
    let resp = client
        .post(&base)
        .json(&json!({"uid": id.to_string(), "title": "b"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let body: ErrorBody = resp.json().await.unwrap();
    assert_eq!(body.error, "conflict");
}

#[tokio::test]
async fn filter_by_query_string() {
    let base = spawn_test_server().await;
    let client = reqwest::Client::new();
    create(&client, &base, json!({"title": "a", "n": 1})).await;
    let big = create(&client, &base, json!({"title": "b", "n": 10})).await;

    let resp = client
        .get(&base)
        .query(&[("field", "n"), ("value", "5"), ("opr", "gt")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let found: Vec<Record<Document>> = resp.json().await.unwrap();
    assert_eq!(found, vec![big]);

    let resp = client
        .get(&base)
        .query(&[("field", "title"), ("value", "zzz")])
        .send()
        .await
        .unwrap();
    let none: Vec<Record<Document>> = resp.json().await.unwrap();
    assert!(none.is_empty());

    let resp = client
        .get(&base)
        .query(&[("field", "n"), ("value", "5"), ("opr", "like")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: ErrorBody = resp.json().await.unwrap();
    assert_eq!(body.error, "invalid_operator");
}

#[tokio::test]
async fn patch_upserts_and_merges() {
    let base = spawn_test_server().await;
    let client = reqwest::Client::new();
    let id = RecordId::new();

    let resp = client
        .patch(format!("{base}/{id}"))
        .json(&json!({"title": "new"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let created: Record<Document> = resp.json().await.unwrap();
    assert_eq!(created.uid, id);

    let resp = client
        .patch(&base)
        .json(&json!([{"uid": id.to_string(), "n": 2}, {"title": "other"}]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let patched: Vec<Record<Document>> = resp.json().await.unwrap();
    assert_eq!(patched[0].data.get("title"), Some(&json!("new")));
    assert_eq!(patched[0].data.get("n"), Some(&json!(2)));
    assert_ne!(patched[1].uid, id);
}

#[tokio::test]
async fn bulk_put_and_delete() {
    let base = spawn_test_server().await;
    let client = reqwest::Client::new();
    let a = create(&client, &base, json!({"title": "a"})).await;
    let b = create(&client, &base, json!({"title": "b"})).await;

    let resp = client
        .put(&base)
        .json(&json!([
            {"uid": a.uid.to_string(), "title": "a2"},
            {"uid": b.uid.to_string(), "title": "b2"},
        ]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .delete(&base)
        .json(&json!([a.uid.to_string(), b.uid.to_string()]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let deleted: Vec<Deleted> = resp.json().await.unwrap();
    assert_eq!(deleted.len(), 2);
    assert!(deleted.iter().all(|d| d.deleted));

    let resp = client
        .delete(&base)
        .json(&json!([a.uid.to_string()]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn malformed_requests_are_rejected() {
    let base = spawn_test_server().await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{base}/not-a-uuid")).send().await.unwrap();
    assert_eq!(resp.status(), 422);

    let resp = client
        .post(&base)
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: ErrorBody = resp.json().await.unwrap();
    assert_eq!(body.error, "serialization");

    let resp = client.get(&base).send().await.unwrap();
    assert_eq!(resp.status(), 422);
}

#[tokio::test]
async fn undecodable_query_string_is_a_json_validation_error() {
    let base = spawn_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{base}?field=a&field=b"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 422);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "application/json"
    );
    let body: ErrorBody = resp.json().await.unwrap();
    assert_eq!(body.error, "validation");
    assert!(body.message.contains("query string"));
}

#[cfg(feature = "persistent")]
#[tokio::test]
async fn app_runs_backend_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let storage = fastcrud::LocalStorage::<Document>::named(
        "notes",
        fastcrud::LocalConfig::in_dir(dir.path()),
    )
    .unwrap();
    let app = CrudApp::new().mount(CrudRouter::new(Dispatcher::blocking(storage)).with_prefix("notes"));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(app.serve(listener, async {
        let _ = rx.await;
    }));

    let base = format!("http://127.0.0.1:{port}/notes");
    let client = reqwest::Client::new();
    let created = create(&client, &base, json!({"title": "kept"})).await;

    tx.send(()).unwrap();
    server.await.unwrap().unwrap();

    // The collection was stopped, so its lock is free and its log replays.
    let reopened = fastcrud::LocalStorage::<Document>::named(
        "notes",
        fastcrud::LocalConfig::in_dir(dir.path()),
    )
    .unwrap();
    fastcrud::Storage::start(&reopened).unwrap();
    assert_eq!(fastcrud::Storage::get(&reopened, created.uid).unwrap(), created);
}
