use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::debug;
use vellum_wire::NotificationEnvelope;

use crate::application::error::{ErrorReport, HttpError};
use crate::cluster::{ReceiveError, ReceiveOutcome};

use super::HttpState;
use super::middleware::DeliveryTrace;

#[derive(Debug, Serialize)]
struct ReceiveResponse {
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    purged: Option<usize>,
}

impl From<&ReceiveOutcome> for ReceiveResponse {
    fn from(outcome: &ReceiveOutcome) -> Self {
        match outcome {
            ReceiveOutcome::Applied(scope) => Self {
                outcome: "applied",
                purged: Some(scope.purged),
            },
            ReceiveOutcome::Resynced(scope) => Self {
                outcome: "resynced",
                purged: Some(scope.purged),
            },
            ReceiveOutcome::Duplicate => Self {
                outcome: "duplicate",
                purged: None,
            },
            ReceiveOutcome::SelfOrigin => Self {
                outcome: "self_origin",
                purged: None,
            },
        }
    }
}

/// Decode a peer envelope and apply it; 202 when caches changed, 200 when ignored.
pub(super) async fn receive_notification(
    State(state): State<HttpState>,
    body: Bytes,
) -> Result<Response, HttpError> {
    let envelope = NotificationEnvelope::from_bytes(&body).map_err(ReceiveError::from)?;
    debug!(
        origin = %envelope.origin,
        sequence = envelope.sequence,
        "Notification received"
    );
    let trace = DeliveryTrace::from(&envelope);
    let mut response = match state.receiver.receive(envelope) {
        Ok(outcome) => {
            let status = if outcome.was_applied() {
                StatusCode::ACCEPTED
            } else {
                StatusCode::OK
            };
            (status, Json(ReceiveResponse::from(&outcome))).into_response()
        }
        Err(err) => HttpError::from(err).into_response(),
    };
    response.extensions_mut().insert(trace);
    Ok(response)
}

pub(super) async fn health(State(state): State<HttpState>) -> Response {
    match state.store.health_check().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_error(
                "infra::http::health",
                StatusCode::SERVICE_UNAVAILABLE,
                &err,
            )
            .attach(&mut response);
            response
        }
    }
}
