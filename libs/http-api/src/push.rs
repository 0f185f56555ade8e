use std::collections::BTreeMap;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use sentiment_api::{Message, MessageId, PipelineError};

use crate::{status_for, AppState};

/// Largest push body: a 10 MB message in base64 plus the envelope.
pub(crate) const PUSH_BODY_LIMIT: usize = 16 * 1024 * 1024;

// ═══════════════════════════════════════════════════════════════
//  Push envelope
// ═══════════════════════════════════════════════════════════════

/// Body of a push delivery from the managed queue:
/// `{"message": {"data", "messageId", "publishTime", "attributes"}, "subscription"}`.
#[derive(Debug, Deserialize)]
pub struct PushEnvelope {
    pub message: PushMessage,
    #[serde(default)]
    pub subscription: Option<String>,
}

/// The queue also sends snake_case copies of `messageId` and
/// `publishTime`; unknown keys are ignored, so those are skipped.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    /// Base64 payload. Absent for an empty message.
    #[serde(default)]
    pub data: Option<String>,
    pub message_id: String,
    #[serde(default)]
    pub publish_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl PushEnvelope {
    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    /// Decode into a channel message. Fails only on invalid base64; text
    /// decoding is left to the enrichment service.
    pub fn into_message(self) -> Result<Message, PipelineError> {
        let PushMessage {
            data,
            message_id,
            publish_time,
            attributes,
        } = self.message;
        let payload = match data.as_deref() {
            Some(data) => base64::engine::general_purpose::STANDARD
                .decode(data)
                .map_err(|e| PipelineError::from(e).with_context(format!("message {message_id}")))?,
            None => Vec::new(),
        };
        Ok(Message::new(
            MessageId::new(message_id),
            payload,
            publish_time.unwrap_or_else(Utc::now),
        )
        .with_attributes(attributes))
    }
}

// ═══════════════════════════════════════════════════════════════
//  POST /push
// ═══════════════════════════════════════════════════════════════

/// 2xx acks the delivery; anything else makes the channel redeliver.
pub(crate) async fn handle_push(State(state): State<AppState>, body: Bytes) -> Response {
    let Some(enrichment) = state.enrichment.as_ref() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let envelope = match PushEnvelope::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!(error = %e, "malformed push envelope");
            let reason = format!("malformed push envelope: {e}");
            return (StatusCode::BAD_REQUEST, reason).into_response();
        }
    };
    let subscription = envelope.subscription.clone().unwrap_or_default();
    let message = match envelope.into_message() {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(%subscription, error = %e, "undecodable push envelope");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    let token = state.shutdown.child_token();
    match enrichment
        .handle_within(&message, state.invocation_timeout, &token)
        .await
    {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (status_for(&e), e.to_string()).into_response(),
    }
}
