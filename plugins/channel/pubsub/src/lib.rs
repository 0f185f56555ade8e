use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use base64::Engine;
use serde::{Deserialize, Serialize};

use sentiment_api::{MessageId, MessagePublisher, PipelineError};

pub const DEFAULT_ENDPOINT: &str = "https://pubsub.googleapis.com";

/// Largest payload the managed queue takes in one message.
pub const MAX_MESSAGE_BYTES: usize = 10_000_000;

#[derive(Debug, Clone)]
pub struct PubSubConfig {
    /// Base URL: production endpoint or `http://<emulator-host>`.
    pub endpoint: String,
    pub project_id: String,
    /// Bearer token. None for the emulator.
    pub access_token: Option<String>,
    pub timeout: Duration,
}

#[derive(Serialize)]
struct PublishRequest {
    messages: Vec<PubsubMessage>,
}

#[derive(Serialize)]
struct PubsubMessage {
    data: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

/// Publishes to a managed topic over the REST `:publish` call.
pub struct PubSubPublisher {
    client: reqwest::Client,
    base: String,
    access_token: Option<String>,
}

impl PubSubPublisher {
    pub fn new(config: PubSubConfig) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PipelineError::channel_unavailable(format!("build http client: {e}")))?;
        Ok(Self {
            client,
            base: format!(
                "{}/v1/projects/{}/topics",
                config.endpoint.trim_end_matches('/'),
                config.project_id
            ),
            access_token: config.access_token,
        })
    }

    async fn publish_once(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> Result<MessageId, PipelineError> {
        let body = PublishRequest {
            messages: vec![PubsubMessage {
                data: base64::engine::general_purpose::STANDARD.encode(payload),
            }],
        };
        let mut request = self
            .client
            .post(format!("{}/{topic}:publish", self.base))
            .json(&body);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PipelineError::channel_unavailable(format!("publish to {topic}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(PipelineError::channel_unavailable(format!(
                "publish to {topic} returned {status}: {}",
                detail.trim()
            )));
        }

        let parsed: PublishResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::channel_unavailable(format!("publish response: {e}")))?;
        parsed
            .message_ids
            .into_iter()
            .next()
            .map(MessageId::from)
            .ok_or_else(|| PipelineError::channel_unavailable("publish response has no message id"))
    }
}

impl MessagePublisher for PubSubPublisher {
    fn name(&self) -> &'static str {
        "pubsub"
    }

    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<MessageId, PipelineError>> + Send + '_>> {
        let topic = topic.to_string();
        Box::pin(async move {
            let bytes = payload.len();
            let id = self.publish_once(&topic, payload).await?;
            tracing::debug!(topic = %topic, message_id = %id, bytes, "published to managed topic");
            Ok(id)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::{Json, Router};
    use sentiment_api::ErrorKind;
    use serde_json::{json, Value};

    use super::*;

    #[derive(Default)]
    struct Seen {
        topic: String,
        data: Vec<u8>,
        auth: Option<String>,
    }

    async fn publish(
        State(seen): State<Arc<Mutex<Seen>>>,
        Path(topic): Path<String>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> axum::response::Response {
        let Some(topic) = topic.strip_suffix(":publish") else {
            return StatusCode::NOT_FOUND.into_response();
        };
        if topic == "missing" {
            return (StatusCode::NOT_FOUND, "Resource not found").into_response();
        }
        let data = body["messages"][0]["data"].as_str().unwrap_or_default();
        let mut seen = seen.lock().unwrap();
        seen.topic = topic.to_string();
        seen.data = base64::engine::general_purpose::STANDARD.decode(data).unwrap();
        seen.auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Json(json!({ "messageIds": ["4711"] })).into_response()
    }

    async fn spawn_fake() -> (String, Arc<Mutex<Seen>>) {
        let seen = Arc::new(Mutex::new(Seen::default()));
        let app = Router::new()
            .route("/v1/projects/demo/topics/{topic}", post(publish))
            .with_state(seen.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), seen)
    }

    fn publisher(endpoint: String, access_token: Option<&str>) -> PubSubPublisher {
        PubSubPublisher::new(PubSubConfig {
            endpoint,
            project_id: "demo".into(),
            access_token: access_token.map(str::to_string),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn publish_returns_assigned_id() {
        let (endpoint, seen) = spawn_fake().await;
        let id = publisher(endpoint, None)
            .publish("sentiment-input", b"I love this product".to_vec())
            .await
            .unwrap();
        assert_eq!(id.as_str(), "4711");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.topic, "sentiment-input");
        assert_eq!(seen.data, b"I love this product");
        assert_eq!(seen.auth, None);
    }

    #[tokio::test]
    async fn bearer_token_is_sent() {
        let (endpoint, seen) = spawn_fake().await;
        publisher(endpoint, Some("tok"))
            .publish("t", Vec::new())
            .await
            .unwrap();
        assert_eq!(seen.lock().unwrap().auth.as_deref(), Some("Bearer tok"));
    }

    #[tokio::test]
    async fn rejected_publish_is_channel_unavailable() {
        let (endpoint, _) = spawn_fake().await;
        let err = publisher(endpoint, None)
            .publish("missing", b"x".to_vec())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChannelUnavailable);
        assert!(err.message().contains("404"));
    }

    #[tokio::test]
    async fn unreachable_channel_is_channel_unavailable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = publisher(format!("http://{addr}"), None)
            .publish("t", b"x".to_vec())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChannelUnavailable);
    }
}
