use std::time::Instant;

use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tracing::{error, warn};
use uuid::Uuid;
use vellum_wire::NotificationEnvelope;

use crate::application::error::ErrorReport;
use crate::cache::ChannelId;

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

const MAX_REQUEST_ID_LEN: usize = 64;

#[derive(Clone, Debug)]
pub struct RequestContext {
    pub request_id: String,
}

/// Which peer envelope a response belongs to; set by the notification handler.
#[derive(Clone, Copy, Debug)]
pub struct DeliveryTrace {
    pub origin: Uuid,
    pub channel: ChannelId,
    pub sequence: u64,
}

impl From<&NotificationEnvelope> for DeliveryTrace {
    fn from(envelope: &NotificationEnvelope) -> Self {
        Self {
            origin: envelope.origin,
            channel: ChannelId::from_uuid(envelope.channel),
            sequence: envelope.sequence,
        }
    }
}

/// Reuse the caller's request id when it sent a usable one.
fn request_id(request: &Request<Body>) -> String {
    request
        .headers()
        .get(&REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty() && value.len() <= MAX_REQUEST_ID_LEN)
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Tag every request with an id, echo it back, and log failures together with
/// the [`ErrorReport`] chain and the envelope they concern.
pub async fn trace_requests(mut request: Request<Body>, next: Next) -> Response {
    let request_id = request_id(&request);
    request.extensions_mut().insert(RequestContext {
        request_id: request_id.clone(),
    });
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let start = Instant::now();

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    let status = response.status();
    if !status.is_client_error() && !status.is_server_error() {
        return response;
    }

    let elapsed_ms = start.elapsed().as_millis();
    let (source, messages) = match response.extensions_mut().remove::<ErrorReport>() {
        Some(report) => (report.source, report.messages),
        None => ("unknown", Vec::new()),
    };
    let detail = messages
        .first()
        .cloned()
        .unwrap_or_else(|| "no diagnostic available".to_string());
    let trace = response.extensions().get::<DeliveryTrace>().copied();
    let origin = trace.map(|trace| trace.origin.to_string()).unwrap_or_default();
    let channel = trace.map(|trace| trace.channel.to_string()).unwrap_or_default();
    let sequence = trace.map(|trace| trace.sequence);

    if status.is_server_error() {
        error!(
            target: "vellum::http::response",
            status = status.as_u16(),
            %method,
            path = %path,
            elapsed_ms,
            source,
            %detail,
            chain = ?messages,
            request_id = %request_id,
            origin = %origin,
            channel = %channel,
            sequence = ?sequence,
            "Request failed"
        );
    } else {
        warn!(
            target: "vellum::http::response",
            status = status.as_u16(),
            %method,
            path = %path,
            elapsed_ms,
            source,
            %detail,
            chain = ?messages,
            request_id = %request_id,
            origin = %origin,
            channel = %channel,
            sequence = ?sequence,
            "Request rejected"
        );
    }

    response
}
