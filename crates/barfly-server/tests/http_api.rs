mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use barfly_geo::destination;
use barfly_server::app;
use common::{test_state, BELFAST};
use serde_json::{json, Value};
use tower::ServiceExt;

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn health_check_returns_ok() {
    let (state, _dir) = test_state();
    let app = app(state);

    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn session_lifecycle() {
    let (state, _dir) = test_state();
    let app = app(state);

    let (status, created) = send(
        &app,
        "POST",
        "/api/sessions",
        Some(json!({ "lat": BELFAST.lat, "lng": BELFAST.lng, "payload": { "pub": "The Crown" } })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["payload"]["pub"], "The Crown");
    assert_eq!(created["geohash"].as_str().unwrap().len(), 10);

    let (status, fetched) = send(&app, "GET", &format!("/api/sessions/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["id"], created["id"]);

    let (status, moved) = send(
        &app,
        "PATCH",
        &format!("/api/sessions/{id}/location"),
        Some(json!({ "lat": 51.5074, "lng": -0.1278 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(moved["geohash"].as_str().unwrap().starts_with("gcp"));
    assert!(moved["version"].as_u64().unwrap() > created["version"].as_u64().unwrap());

    let (status, updated) = send(
        &app,
        "PATCH",
        &format!("/api/sessions/{id}"),
        Some(json!({ "payload": { "pub": "The Spaniard" } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["payload"]["pub"], "The Spaniard");
    assert_eq!(updated["geohash"], moved["geohash"]);

    let (status, _) = send(&app, "DELETE", &format!("/api/sessions/{id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&app, "GET", &format!("/api/sessions/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().is_some());

    let (status, _) = send(&app, "DELETE", &format!("/api/sessions/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_locations_are_rejected() {
    let (state, _dir) = test_state();
    let app = app(state);

    let (status, body) = send(
        &app,
        "POST",
        "/api/sessions",
        Some(json!({ "lat": 91.0, "lng": 0.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("invalid"));
}

#[tokio::test]
async fn nearby_returns_sessions_inside_radius_nearest_first() {
    let (state, _dir) = test_state();
    let store = state.store.clone();
    let app = app(state);

    let far = store
        .create_session(destination(BELFAST, 120.0, 900.0), json!({ "name": "b" }))
        .await
        .unwrap()
        .record;
    let near = store
        .create_session(BELFAST, json!({ "name": "a" }))
        .await
        .unwrap()
        .record;
    store
        .create_session(destination(BELFAST, 240.0, 1_400.0), json!({ "name": "c" }))
        .await
        .unwrap();

    let uri = format!(
        "/api/sessions/nearby?lat={}&lng={}&radius=1000",
        BELFAST.lat, BELFAST.lng
    );
    let (status, body) = send(&app, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::OK);

    let results = body["results"].as_array().unwrap();
    let ids: Vec<&str> = results.iter().map(|r| r["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec![near.id.as_str(), far.id.as_str()]);

    let d0 = results[0]["distanceM"].as_f64().unwrap();
    let d1 = results[1]["distanceM"].as_f64().unwrap();
    assert!(d0 < 1.0);
    assert!((d1 - 900.0).abs() < 1.0);
}

#[tokio::test]
async fn nearby_rejects_bad_queries() {
    let (state, _dir) = test_state();
    let app = app(state);

    let (status, _) = send(&app, "GET", "/api/sessions/nearby?lat=0&lng=0&radius=0", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "GET", "/api/sessions/nearby?lat=95&lng=0&radius=10", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "GET", "/api/sessions/nearby?lat=0&lng=0", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn room_messages_are_sequenced_and_paged() {
    let (state, _dir) = test_state();
    let app = app(state);

    for n in 1..=3 {
        let (status, message) = send(
            &app,
            "POST",
            "/api/rooms/the-crown/messages",
            Some(json!({ "payload": { "text": format!("round {n}") } })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(message["sequence"], n);
        assert_eq!(message["room_id"], "the-crown");
    }

    let (status, page) = send(&app, "GET", "/api/rooms/the-crown/messages?after=1", None).await;
    assert_eq!(status, StatusCode::OK);
    let sequences: Vec<u64> = page["records"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["sequence"].as_u64().unwrap())
        .collect();
    assert_eq!(sequences, vec![2, 3]);
    assert!(page["next_page_token"].is_null());

    let (status, page) = send(&app, "GET", "/api/rooms/the-crown/messages?limit=1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["records"].as_array().unwrap().len(), 1);
    assert!(page["next_page_token"].is_string());

    let (status, page) = send(&app, "GET", "/api/rooms/elsewhere/messages", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(page["records"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn oversized_room_ids_are_rejected() {
    let (state, _dir) = test_state();
    let app = app(state);

    let uri = format!("/api/rooms/{}/messages", "r".repeat(200));
    let (status, _) = send(&app, "POST", &uri, Some(json!({ "payload": "hi" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
