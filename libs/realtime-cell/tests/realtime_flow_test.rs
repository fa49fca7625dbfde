use std::sync::Arc;

use assert_matches::assert_matches;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use tokio_test::assert_ok;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use realtime_cell::models::{ConnectionStatus, RealtimeError};
use realtime_cell::router::realtime_routes;
use realtime_cell::services::{ScheduleSyncBridge, StoreChangeFeed};
use shared_models::error::ConflictKind;
use shared_utils::test_utils::{JwtTestUtils, MockStoreResponses, TestConfig, TestUser};

fn realtime_app(config: &TestConfig, bridge: Arc<ScheduleSyncBridge>) -> Router {
    realtime_routes(config.to_arc(), bridge)
}

fn auth_header(config: &TestConfig) -> String {
    let user = TestUser::therapist("therapist@example.com");
    let token = JwtTestUtils::create_test_token(&user, &config.jwt_secret, Some(24));
    format!("Bearer {}", token)
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_status_reports_bridge_state() {
    let config = TestConfig::default();
    let bridge = Arc::new(ScheduleSyncBridge::default());
    bridge.set_status(ConnectionStatus::Connected).await;

    let app = realtime_app(&config, bridge);

    let request = Request::builder()
        .method("GET")
        .uri("/status")
        .header("authorization", auth_header(&config))
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json_response = body_json(response).await;
    assert_eq!(json_response["status"], "connected");
    assert_eq!(json_response["active_channels"], 0);
}

#[tokio::test]
async fn test_conflict_acknowledge_flow() {
    let config = TestConfig::default();
    let bridge = Arc::new(ScheduleSyncBridge::default());

    let record = bridge
        .record_conflict(ConflictKind::DoubleBooked, vec![Uuid::new_v4()], "lost the race")
        .await;

    let app = realtime_app(&config, bridge.clone());

    let request = Request::builder()
        .method("GET")
        .uri("/conflicts")
        .header("authorization", auth_header(&config))
        .body(Body::empty())
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let listed = body_json(response).await;
    assert_eq!(listed["total"], 1);
    assert_eq!(listed["active"], 1);
    assert_eq!(listed["conflicts"][0]["kind"], "DOUBLE_BOOKED");

    let request = Request::builder()
        .method("POST")
        .uri(&format!("/conflicts/{}/acknowledge", record.id))
        .header("authorization", auth_header(&config))
        .body(Body::empty())
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let acknowledged = body_json(response).await;
    assert_eq!(acknowledged["resolved"], true);

    // Unknown ids are a 404, not a silent success.
    let request = Request::builder()
        .method("POST")
        .uri(&format!("/conflicts/{}/acknowledge", Uuid::new_v4()))
        .header("authorization", auth_header(&config))
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_notification_dismiss_flow() {
    let config = TestConfig::default();
    let bridge = Arc::new(ScheduleSyncBridge::default());
    let notification = bridge.notify("Schedule changed", "Re-resolve the day", None).await;

    let app = realtime_app(&config, bridge.clone());

    let request = Request::builder()
        .method("POST")
        .uri(&format!("/notifications/{}/dismiss", notification.id))
        .header("authorization", auth_header(&config))
        .body(Body::empty())
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let request = Request::builder()
        .method("GET")
        .uri("/notifications")
        .header("authorization", auth_header(&config))
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let listed = body_json(response).await;
    assert_eq!(listed["total"], 0);
}

#[tokio::test]
async fn test_events_require_auth() {
    let config = TestConfig::default();
    let bridge = Arc::new(ScheduleSyncBridge::default());
    let app = realtime_app(&config, bridge);

    let request = Request::builder()
        .method("GET")
        .uri("/events")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_feed_translates_store_rows_into_events() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_store_url(&mock_server.uri()).to_app_config();
    let bridge = Arc::new(ScheduleSyncBridge::default());
    let therapist_id = Uuid::new_v4().to_string();
    let client_id = Uuid::new_v4().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/therapist_availability"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/schedule_overrides"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreResponses::appointment_row(
                &therapist_id,
                &client_id,
                "2025-03-10T09:00:00Z",
                50,
                "confirmed"
            )
        ])))
        .mount(&mock_server)
        .await;

    let mut feed = StoreChangeFeed::new(&config, bridge.clone())
        .since(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());

    let mut subscription = bridge.subscribe(None).await;

    let published = assert_ok!(feed.poll_once().await);
    assert_eq!(published, 1);

    let event = subscription.recv().await.unwrap();
    assert_eq!(event.therapist_id, Some(therapist_id.parse().unwrap()));
    assert_eq!(event.row["status"], "confirmed");

    let buffered = bridge.recent_events().await;
    assert_eq!(buffered.len(), 1);
}

#[tokio::test]
async fn test_feed_poll_error_surfaces_as_store_error() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_store_url(&mock_server.uri()).to_app_config();
    let bridge = Arc::new(ScheduleSyncBridge::default());

    Mock::given(method("GET"))
        .and(path("/rest/v1/therapist_availability"))
        .respond_with(ResponseTemplate::new(503).set_body_json(
            MockStoreResponses::error_response("store down", "503"),
        ))
        .mount(&mock_server)
        .await;

    let mut feed = StoreChangeFeed::new(&config, bridge.clone());

    let result = feed.poll_once().await;
    assert_matches!(result.unwrap_err(), RealtimeError::Store(_));
    // Nothing reached the buffers.
    assert!(bridge.recent_events().await.is_empty());
}
