use std::sync::Arc;

use sentiment_api::{ErrorKind, MessageId, MessagePublisher, PipelineError};

/// Accepts raw payloads and hands each one to the channel exactly once.
pub struct IngressService {
    publisher: Arc<dyn MessagePublisher>,
    topic: String,
}

impl IngressService {
    pub fn new(publisher: Arc<dyn MessagePublisher>, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish the payload as-is. One attempt, no retry: a failure is
    /// reported to the caller as `ChannelUnavailable`.
    pub async fn publish(&self, payload: Vec<u8>) -> Result<MessageId, PipelineError> {
        let bytes = payload.len();
        match self.publisher.publish(&self.topic, payload).await {
            Ok(id) => {
                tracing::info!(
                    topic = %self.topic,
                    message_id = %id,
                    bytes,
                    channel = self.publisher.name(),
                    "message published"
                );
                Ok(id)
            }
            Err(e) => {
                let e = match e.kind() {
                    ErrorKind::ChannelUnavailable => e,
                    _ => PipelineError::channel_unavailable(e.message()),
                }
                .with_context(format!("publish to '{}'", self.topic));
                tracing::error!(
                    topic = %self.topic,
                    stage = e.stage(),
                    channel = self.publisher.name(),
                    error = %e,
                    "publish failed"
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;

    use topic_engine::{Topic, TopicOptions, TopicRegistry};

    use super::*;

    struct Failing {
        kind: ErrorKind,
        calls: Mutex<u32>,
    }

    impl MessagePublisher for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn publish(
            &self,
            _topic: &str,
            _payload: Vec<u8>,
        ) -> Pin<Box<dyn Future<Output = Result<MessageId, PipelineError>> + Send + '_>> {
            *self.calls.lock().unwrap() += 1;
            let kind = self.kind;
            Box::pin(async move { Err(PipelineError::new(kind, "broker down")) })
        }
    }

    #[tokio::test]
    async fn publishes_payload_unchanged() {
        let mut registry = TopicRegistry::new();
        registry.register(Topic::new("sentiment-input", TopicOptions::default()));
        let registry = Arc::new(registry);
        let mut sub = registry.subscribe("sentiment-input", 8).await.unwrap();

        let ingress = IngressService::new(registry.clone(), "sentiment-input");
        let id = ingress.publish(Vec::new()).await.unwrap();

        let delivery = sub.recv().await.unwrap();
        assert_eq!(delivery.message().id(), &id);
        assert!(delivery.message().payload().is_empty());
        delivery.ack();
    }

    #[tokio::test]
    async fn failure_is_channel_unavailable_without_retry() {
        let publisher = Arc::new(Failing {
            kind: ErrorKind::StoreWriteFailed,
            calls: Mutex::new(0),
        });
        let ingress = IngressService::new(publisher.clone(), "t");

        let err = ingress.publish(b"hello".to_vec()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChannelUnavailable);
        assert_eq!(err.message(), "publish to 't': broker down");
        assert_eq!(*publisher.calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn unknown_topic_is_channel_unavailable() {
        let ingress = IngressService::new(Arc::new(TopicRegistry::new()), "nowhere");
        let err = ingress.publish(b"x".to_vec()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChannelUnavailable);
    }
}
