mod push;
mod rest;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;

use pipeline::{EnrichmentService, IngressService};
use sentiment_api::{ErrorKind, PipelineError, RecordStore};
use topic_engine::TopicRegistry;

pub use push::{PushEnvelope, PushMessage};

/// Services behind the HTTP surface. Absent services leave their routes
/// unmounted, so one binary can serve any role.
#[derive(Clone)]
pub struct AppState {
    ingress: Option<Arc<IngressService>>,
    enrichment: Option<Arc<EnrichmentService>>,
    store: Option<Arc<dyn RecordStore>>,
    topics: Option<Arc<TopicRegistry>>,
    /// Largest ingress body; None = unbounded.
    ingress_body_limit: Option<usize>,
    invocation_timeout: Duration,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(invocation_timeout: Duration, shutdown: CancellationToken) -> Self {
        Self {
            ingress: None,
            enrichment: None,
            store: None,
            topics: None,
            ingress_body_limit: None,
            invocation_timeout,
            shutdown,
        }
    }

    pub fn with_ingress(mut self, ingress: Arc<IngressService>) -> Self {
        self.ingress = Some(ingress);
        self
    }

    /// Cap ingress bodies at the channel's message size limit.
    pub fn with_ingress_body_limit(mut self, max_bytes: usize) -> Self {
        self.ingress_body_limit = Some(max_bytes);
        self
    }

    /// Mounts `/push` and `/api/records`.
    pub fn with_enrichment(mut self, enrichment: Arc<EnrichmentService>) -> Self {
        self.store = Some(enrichment.store().clone());
        self.enrichment = Some(enrichment);
        self
    }

    /// Mounts the in-process topic inspection routes.
    pub fn with_topics(mut self, topics: Arc<TopicRegistry>) -> Self {
        self.topics = Some(topics);
        self
    }
}

/// HTTP status for a failed pipeline call. Any non-2xx answer to a push
/// delivery makes the channel retry it.
pub(crate) fn status_for(e: &PipelineError) -> StatusCode {
    match e.kind() {
        ErrorKind::InvalidPayload => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::ChannelUnavailable
        | ErrorKind::ScoringUnavailable
        | ErrorKind::StoreWriteFailed
        | ErrorKind::StoreReadFailed => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Cancelled => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::ConfigMissing => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn router(state: AppState) -> Router {
    let mut app = Router::new().route("/healthz", get(|| async { "ok" }));

    if state.ingress.is_some() {
        let limit = match state.ingress_body_limit {
            Some(max) => DefaultBodyLimit::max(max),
            None => DefaultBodyLimit::disable(),
        };
        app = app.route("/", any(handle_ingress).layer(limit));
    }
    if state.enrichment.is_some() {
        app = app
            .route(
                "/push",
                post(push::handle_push).layer(DefaultBodyLimit::max(push::PUSH_BODY_LIMIT)),
            )
            .route("/api/records", get(rest::handle_list_records));
    }
    if state.topics.is_some() {
        app = app
            .route("/api/topics", get(rest::handle_list_topics))
            .route("/api/topics/{name}", get(rest::handle_query_topic))
            .route("/api/topics/{name}/dead-letters", get(rest::handle_dead_letters));
    }

    app.with_state(state)
}

/// Serve the API on `0.0.0.0:port` until `shutdown` fires.
pub async fn run(port: u16, state: AppState, shutdown: CancellationToken) -> Result<(), String> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .map_err(|e| format!("bind api :{port}: {e}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| format!("axum serve: {e}"))?;

    Ok(())
}

// ═══════════════════════════════════════════════════════════════
//  ANY /  (ingress)
// ═══════════════════════════════════════════════════════════════

async fn handle_ingress(State(state): State<AppState>, body: Bytes) -> Response {
    let Some(ingress) = state.ingress.as_ref() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match ingress.publish(body.to_vec()).await {
        Ok(id) => format!("Message {id} published to {}", ingress.topic()).into_response(),
        Err(e) => {
            let status = match e.kind() {
                ErrorKind::ChannelUnavailable => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, e.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;

    use axum::body::Body;
    use axum::http::Request;
    use base64::Engine;
    use scorer_mock::MockScorer;
    use sentiment_api::{SentimentScore, SentimentScorer};
    use serde_json::Value;
    use store_memory::MemoryStore;
    use topic_engine::{Topic, TopicOptions};
    use tower::ServiceExt;

    use super::*;

    struct DownScorer;

    impl SentimentScorer for DownScorer {
        fn name(&self) -> &'static str {
            "down"
        }

        fn score<'a>(
            &'a self,
            _text: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<SentimentScore, PipelineError>> + Send + 'a>> {
            Box::pin(async { Err(PipelineError::scoring_unavailable("model offline")) })
        }
    }

    fn registry() -> Arc<TopicRegistry> {
        let mut registry = TopicRegistry::new();
        registry.register(Topic::new("sentiment-input", TopicOptions::default()));
        Arc::new(registry)
    }

    fn full_state(store: &MemoryStore, scorer: Arc<dyn SentimentScorer>) -> AppState {
        let registry = registry();
        AppState::new(Duration::from_secs(5), CancellationToken::new())
            .with_ingress(Arc::new(IngressService::new(registry.clone(), "sentiment-input")))
            .with_enrichment(Arc::new(EnrichmentService::new(
                scorer,
                Arc::new(store.clone()),
            )))
            .with_topics(registry)
    }

    fn push_body(text: &[u8]) -> String {
        let data = base64::engine::general_purpose::STANDARD.encode(text);
        // Same shape as a real push: camelCase plus snake_case copies.
        let message = format!(r#"{{"data":"{data}","messageId":"77","message_id":"77"}}"#);
        format!(r#"{{"message":{message},"subscription":"s"}}"#)
    }

    async fn send(
        app: Router,
        method: &str,
        uri: &str,
        body: impl Into<Body>,
    ) -> (StatusCode, String) {
        let response = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(body.into())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn ingress_publishes_and_reports_id() {
        let store = MemoryStore::new();
        let app = router(full_state(&store, Arc::new(MockScorer::new())));

        let (status, body) = send(app.clone(), "POST", "/", "I love this product").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "Message 1 published to sentiment-input");

        // Any method, empty body included.
        let (status, body) = send(app.clone(), "PUT", "/", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "Message 2 published to sentiment-input");

        let (status, body) = send(app, "GET", "/api/topics/sentiment-input", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        let messages: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(messages[0]["data"], "I love this product");
        assert_eq!(messages[1]["data"], "");
    }

    #[tokio::test]
    async fn ingress_failure_is_503_without_id() {
        let state = AppState::new(Duration::from_secs(5), CancellationToken::new()).with_ingress(
            Arc::new(IngressService::new(Arc::new(TopicRegistry::new()), "missing")),
        );
        let (status, body) = send(router(state), "POST", "/", "hello").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!body.starts_with("Message"));
    }

    #[tokio::test]
    async fn ingress_accepts_bodies_past_the_default_cap() {
        let payload = vec![b'a'; 3 * 1024 * 1024];
        let state = AppState::new(Duration::from_secs(5), CancellationToken::new())
            .with_ingress(Arc::new(IngressService::new(registry(), "sentiment-input")));
        let (status, body) = send(router(state), "POST", "/", payload).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "Message 1 published to sentiment-input");
    }

    #[tokio::test]
    async fn ingress_body_limit_follows_channel() {
        let state = AppState::new(Duration::from_secs(5), CancellationToken::new())
            .with_ingress(Arc::new(IngressService::new(registry(), "sentiment-input")))
            .with_ingress_body_limit(1024);
        let app = router(state);

        let (status, _) = send(app.clone(), "POST", "/", vec![b'a'; 1024]).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(app, "POST", "/", vec![b'a'; 2048]).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn push_accepts_large_envelope() {
        let store = MemoryStore::new();
        let app = router(full_state(&store, Arc::new(MockScorer::new())));

        let text = vec![b'a'; 3 * 1024 * 1024];
        let (status, _) = send(app, "POST", "/push", push_body(&text)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn push_scores_and_persists() {
        let store = MemoryStore::new();
        let app = router(full_state(&store, Arc::new(MockScorer::new())));

        let body = push_body(b"I love this product");
        let (status, _) = send(app.clone(), "POST", "/push", body).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(store.len().await, 1);

        let uri = "/api/records?limit=10&order=asc";
        let (status, body) = send(app, "GET", uri, Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        let records: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(records[0]["text"], "I love this product");
        assert_eq!(records[0]["score"], 0.0);
        assert!(records[0]["created"].is_string());
    }

    #[tokio::test]
    async fn push_status_codes() {
        let store = MemoryStore::new();
        let app = router(full_state(&store, Arc::new(MockScorer::new())));

        let (status, _) = send(app.clone(), "POST", "/push", "{").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(app.clone(), "POST", "/push", push_body(&[0xff, 0xfe])).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let down = router(full_state(&store, Arc::new(DownScorer)));
        let (status, body) = send(down, "POST", "/push", push_body(b"good")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.contains("scoring unavailable"));

        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn routes_follow_role() {
        let registry = registry();
        let ingress_only = AppState::new(Duration::from_secs(5), CancellationToken::new())
            .with_ingress(Arc::new(IngressService::new(registry, "sentiment-input")));
        let app = router(ingress_only);

        let (status, _) = send(app.clone(), "POST", "/push", push_body(b"good")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(app.clone(), "GET", "/api/records", Body::empty()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, body) = send(app, "GET", "/healthz", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn topic_inspection() {
        let store = MemoryStore::new();
        let app = router(full_state(&store, Arc::new(MockScorer::new())));

        let (status, body) = send(app.clone(), "GET", "/api/topics", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"["sentiment-input"]"#);

        let (status, _) = send(app.clone(), "GET", "/api/topics/nope", Body::empty()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(
            app,
            "GET",
            "/api/topics/sentiment-input/dead-letters",
            Body::empty(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "[]");
    }
}
