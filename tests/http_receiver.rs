use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;
use vellum::application::context::NodeContext;
use vellum::cache::{CacheConfig, ChannelId};
use vellum::infra::http::{DeliveryTrace, HttpState, REQUEST_ID_HEADER, build_router};
use vellum::infra::memory::InMemoryContentStore;
use vellum_wire::{IdChangeEntry, NotificationEnvelope, TemplateChangeEntry, change_bits};

struct Fixture {
    node: NodeContext,
    router: Router,
    _templates: tempfile::TempDir,
}

fn fixture() -> Fixture {
    let templates = tempfile::tempdir().expect("template dir");
    let (node, _outbox) = NodeContext::build(
        Uuid::new_v4(),
        Arc::new(InMemoryContentStore::new()),
        &CacheConfig::default(),
        templates.path(),
        Vec::new(),
    )
    .expect("node");
    let router = build_router(HttpState {
        receiver: Arc::clone(&node.receiver),
        store: Arc::clone(&node.store),
    });
    Fixture {
        node,
        router,
        _templates: templates,
    }
}

async fn post(router: &Router, body: Vec<u8>) -> (StatusCode, Vec<u8>) {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/cluster/notifications")
        .header("content-type", "application/json")
        .body(Body::from(body))
        .expect("request");
    let response = router.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    (status, bytes.to_vec())
}

fn content_bytes(origin: Uuid, sequence: u64) -> Vec<u8> {
    NotificationEnvelope::new(
        origin,
        ChannelId::CONTENT.as_uuid(),
        sequence,
        &[IdChangeEntry {
            id: 7,
            change_types: change_bits::REFRESH_NODE,
        }],
    )
    .and_then(|envelope| envelope.to_bytes())
    .expect("envelope")
}

fn outcome(body: &[u8]) -> String {
    let value: Value = serde_json::from_slice(body).expect("json body");
    value["outcome"].as_str().expect("outcome").to_string()
}

#[tokio::test]
async fn applied_envelope_is_accepted() {
    let fixture = fixture();
    let origin = Uuid::new_v4();

    let (status, body) = post(&fixture.router, content_bytes(origin, 1)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(outcome(&body), "applied");
    assert_eq!(
        fixture.node.receiver.last_sequence(origin, ChannelId::CONTENT),
        Some(1)
    );
}

#[tokio::test]
async fn ignored_envelopes_answer_ok() {
    let fixture = fixture();
    let origin = Uuid::new_v4();

    post(&fixture.router, content_bytes(origin, 1)).await;
    let (status, body) = post(&fixture.router, content_bytes(origin, 1)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome(&body), "duplicate");

    let (status, body) = post(&fixture.router, content_bytes(fixture.node.node_id, 1)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome(&body), "self_origin");
}

#[tokio::test]
async fn gap_is_reported_as_resync() {
    let fixture = fixture();
    let origin = Uuid::new_v4();

    post(&fixture.router, content_bytes(origin, 1)).await;
    let (status, body) = post(&fixture.router, content_bytes(origin, 5)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(outcome(&body), "resynced");
}

#[tokio::test]
async fn malformed_envelopes_are_bad_requests() {
    let fixture = fixture();

    let (status, _) = post(&fixture.router, b"not json".to_vec()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let unknown_channel = NotificationEnvelope::new(
        Uuid::new_v4(),
        Uuid::new_v4(),
        1,
        &[IdChangeEntry {
            id: 1,
            change_types: change_bits::REFRESH_NODE,
        }],
    )
    .and_then(|envelope| envelope.to_bytes())
    .expect("envelope");
    let (status, _) = post(&fixture.router, unknown_channel).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let bad_bits = NotificationEnvelope::new(
        Uuid::new_v4(),
        ChannelId::CONTENT.as_uuid(),
        1,
        &[IdChangeEntry {
            id: 1,
            change_types: 0x40,
        }],
    )
    .and_then(|envelope| envelope.to_bytes())
    .expect("envelope");
    let (status, _) = post(&fixture.router, bad_bits).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn template_channel_is_refused() {
    let fixture = fixture();
    let envelope = NotificationEnvelope::new(
        Uuid::new_v4(),
        ChannelId::TEMPLATE.as_uuid(),
        1,
        &[TemplateChangeEntry {
            alias: None,
            change_types: change_bits::REFRESH_ALL,
        }],
    )
    .and_then(|envelope| envelope.to_bytes())
    .expect("envelope");

    let (status, body) = post(&fixture.router, envelope).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        String::from_utf8(body).expect("utf8"),
        "Channel is not shared between nodes"
    );
}

#[tokio::test]
async fn newer_envelope_version_is_unprocessable() {
    let fixture = fixture();
    let body = format!(
        r#"{{"version":2,"origin":"{}","channel":"{}","sequence":1,"payload":[]}}"#,
        Uuid::new_v4(),
        ChannelId::CONTENT.as_uuid()
    );

    let (status, _) = post(&fixture.router, body.into_bytes()).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn health_reports_no_content() {
    let fixture = fixture();
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .expect("request");
    let response = fixture.router.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let fixture = fixture();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/cluster/notifications")
        .body(Body::from(content_bytes(Uuid::new_v4(), 1)))
        .expect("request");
    let response = fixture.router.clone().oneshot(request).await.expect("response");

    let id = response
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .expect("request id header");
    assert!(Uuid::parse_str(id).is_ok());
}

#[tokio::test]
async fn rejected_delivery_keeps_caller_request_id_and_envelope_trace() {
    let fixture = fixture();
    let origin = Uuid::new_v4();
    let envelope = NotificationEnvelope::new(
        origin,
        ChannelId::TEMPLATE.as_uuid(),
        4,
        &[TemplateChangeEntry {
            alias: Some("page".to_string()),
            change_types: change_bits::REFRESH_NODE,
        }],
    )
    .and_then(|envelope| envelope.to_bytes())
    .expect("envelope");
    let request = Request::builder()
        .method(Method::POST)
        .uri("/cluster/notifications")
        .header(REQUEST_ID_HEADER, "peer-b-4")
        .body(Body::from(envelope))
        .expect("request");
    let response = fixture.router.clone().oneshot(request).await.expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.headers().get(REQUEST_ID_HEADER).map(|value| value.as_bytes()),
        Some(&b"peer-b-4"[..])
    );
    let trace = response
        .extensions()
        .get::<DeliveryTrace>()
        .copied()
        .expect("delivery trace");
    assert_eq!(trace.origin, origin);
    assert_eq!(trace.channel, ChannelId::TEMPLATE);
    assert_eq!(trace.sequence, 4);
}
