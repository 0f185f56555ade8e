pub mod error;
mod log;

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};

use sentiment_api::{Message, MessageId, MessagePublisher, PipelineError};

pub use error::TopicError;
pub use log::TopicQuery;

use log::MessageLog;

// ═══════════════════════════════════════════════════════════════
//  Redelivery policy
// ═══════════════════════════════════════════════════════════════

/// How the channel retries a delivery that was nacked or dropped unsettled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedeliveryPolicy {
    /// Total delivery attempts, the first one included. Must be >= 1.
    pub max_delivery_attempts: u32,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self {
            max_delivery_attempts: 5,
            min_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RedeliveryPolicy {
    /// Delay before redelivering after the given failed attempt (1-based):
    /// `min_backoff * 2^(attempt-1)`, capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.min_backoff
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff)
    }
}

/// Per-topic options.
#[derive(Debug, Clone, Copy)]
pub struct TopicOptions {
    /// Size of the retained message log (0 = keep nothing).
    pub max_retained: usize,
    pub redelivery: RedeliveryPolicy,
}

impl Default for TopicOptions {
    fn default() -> Self {
        Self {
            max_retained: 10_000,
            redelivery: RedeliveryPolicy::default(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Dead letters
// ═══════════════════════════════════════════════════════════════

/// Message that exhausted its delivery attempts.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub message: Message,
    pub attempts: u32,
    pub dead_lettered_at: DateTime<Utc>,
}

/// State shared between a topic and the deliveries it hands out.
struct TopicState {
    name: String,
    policy: RedeliveryPolicy,
    max_retained: usize,
    dead_letters: Mutex<VecDeque<DeadLetter>>,
}

impl TopicState {
    fn dead_letter(&self, message: Message, attempts: u32) {
        tracing::error!(
            topic = %self.name,
            message_id = %message.id(),
            attempts,
            "delivery attempts exhausted, dead-lettering message"
        );
        let mut dead = self
            .dead_letters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if dead.len() >= self.max_retained.max(1) {
            dead.pop_front();
        }
        dead.push_back(DeadLetter {
            message,
            attempts,
            dead_lettered_at: Utc::now(),
        });
    }
}

// ═══════════════════════════════════════════════════════════════
//  Subscription / Delivery
// ═══════════════════════════════════════════════════════════════

struct Envelope {
    message: Message,
    attempt: u32,
}

struct Subscriber {
    tx: mpsc::Sender<Envelope>,
}

/// Stream of deliveries for one subscriber of a topic.
pub struct Subscription {
    rx: mpsc::Receiver<Envelope>,
    redeliver: mpsc::WeakSender<Envelope>,
    state: Arc<TopicState>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.state.name
    }

    /// Next delivery. None = topic dropped.
    pub async fn recv(&mut self) -> Option<Delivery> {
        let Envelope { message, attempt } = self.rx.recv().await?;
        Some(Delivery {
            message,
            attempt,
            settled: false,
            redeliver: self.redeliver.clone(),
            state: self.state.clone(),
        })
    }
}

/// One delivery of a message to one subscriber.
///
/// Must be settled with [`Delivery::ack`] or [`Delivery::nack`]. A delivery
/// dropped unsettled is treated as nacked, so a crashed or cancelled handler
/// still gets the message back.
pub struct Delivery {
    message: Message,
    attempt: u32,
    settled: bool,
    redeliver: mpsc::WeakSender<Envelope>,
    state: Arc<TopicState>,
}

impl Delivery {
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// 1-based delivery attempt.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn ack(mut self) {
        self.settled = true;
        tracing::debug!(
            topic = %self.state.name,
            message_id = %self.message.id(),
            attempt = self.attempt,
            "delivery acked"
        );
    }

    pub fn nack(mut self) {
        self.settled = true;
        self.schedule_redelivery();
    }

    fn schedule_redelivery(&self) {
        let policy = self.state.policy;
        if self.attempt >= policy.max_delivery_attempts {
            self.state.dead_letter(self.message.clone(), self.attempt);
            return;
        }

        let Some(tx) = self.redeliver.upgrade() else {
            tracing::warn!(
                topic = %self.state.name,
                message_id = %self.message.id(),
                "subscription closed, redelivery dropped"
            );
            return;
        };

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!(
                    topic = %self.state.name,
                    message_id = %self.message.id(),
                    "no runtime, redelivery dropped"
                );
                return;
            }
        };

        let delay = policy.backoff(self.attempt);
        let envelope = Envelope {
            message: self.message.clone(),
            attempt: self.attempt + 1,
        };
        tracing::info!(
            topic = %self.state.name,
            message_id = %self.message.id(),
            next_attempt = envelope.attempt,
            delay_ms = delay.as_millis() as u64,
            "scheduling redelivery"
        );
        let name = self.state.name.clone();
        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(envelope).await.is_err() {
                tracing::warn!(topic = %name, "subscriber closed during redelivery");
            }
        });
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if !self.settled {
            self.settled = true;
            tracing::warn!(
                topic = %self.state.name,
                message_id = %self.message.id(),
                "delivery dropped unsettled, treating as nack"
            );
            self.schedule_redelivery();
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Topic
// ═══════════════════════════════════════════════════════════════

/// Named at-least-once channel: retained log + subscribers with redelivery.
///
/// Every subscriber gets every message; unsettled or nacked deliveries come
/// back to the same subscriber until the policy gives up.
pub struct Topic {
    state: Arc<TopicState>,
    log: MessageLog,
    subscribers: RwLock<Vec<Subscriber>>,
    next_seq: AtomicU64,
}

impl Topic {
    pub fn new(name: impl Into<String>, options: TopicOptions) -> Self {
        Self {
            state: Arc::new(TopicState {
                name: name.into(),
                policy: options.redelivery,
                max_retained: options.max_retained,
                dead_letters: Mutex::new(VecDeque::new()),
            }),
            log: MessageLog::new(options.max_retained),
            subscribers: RwLock::new(Vec::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// Subscribe to the topic. Only messages published afterwards are delivered.
    pub async fn subscribe(&self, buffer: usize) -> Subscription {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let redeliver = tx.downgrade();
        self.subscribers.write().await.push(Subscriber { tx });
        Subscription {
            rx,
            redeliver,
            state: self.state.clone(),
        }
    }

    /// Publish a payload: assign id → retain → hand to every subscriber.
    ///
    /// Returns once the message is retained; fan-out happens in the
    /// background with back-pressure per subscriber.
    pub async fn publish(&self, payload: Vec<u8>) -> Message {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let message = Message::new(MessageId::new(seq.to_string()), payload, Utc::now());
        self.log.append(message.clone()).await;

        let mut subs = self.subscribers.write().await;
        subs.retain(|sub| !sub.tx.is_closed());
        for sub in subs.iter() {
            let tx = sub.tx.clone();
            let envelope = Envelope {
                message: message.clone(),
                attempt: 1,
            };
            let name = self.state.name.clone();
            tokio::spawn(async move {
                if tx.send(envelope).await.is_err() {
                    tracing::warn!(topic = %name, "subscriber closed during backpressure send");
                }
            });
        }

        message
    }

    /// Read the retained log.
    pub async fn query(&self, query: &TopicQuery) -> Vec<Message> {
        self.log.query(query).await
    }

    /// Messages that exhausted their delivery attempts, oldest first.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state
            .dead_letters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════════
//  TopicRegistry
// ═══════════════════════════════════════════════════════════════

/// Registry of all in-process topics. Built once at startup, then shared
/// behind an `Arc`; implements [`MessagePublisher`].
pub struct TopicRegistry {
    topics: HashMap<String, Arc<Topic>>,
}

impl Default for TopicRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self {
            topics: HashMap::new(),
        }
    }

    pub fn register(&mut self, topic: Topic) {
        let name = topic.name().to_string();
        self.topics.insert(name, Arc::new(topic));
    }

    pub fn topic(&self, name: &str) -> Result<Arc<Topic>, TopicError> {
        self.topics
            .get(name)
            .cloned()
            .ok_or_else(|| TopicError::NotFound(name.to_string()))
    }

    pub async fn subscribe(&self, topic: &str, buffer: usize) -> Result<Subscription, TopicError> {
        Ok(self.topic(topic)?.subscribe(buffer).await)
    }

    pub async fn query(&self, topic: &str, query: &TopicQuery) -> Result<Vec<Message>, TopicError> {
        Ok(self.topic(topic)?.query(query).await)
    }

    pub fn dead_letters(&self, topic: &str) -> Result<Vec<DeadLetter>, TopicError> {
        Ok(self.topic(topic)?.dead_letters())
    }

    /// Names of all topics, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topics.keys().cloned().collect();
        names.sort();
        names
    }
}

impl MessagePublisher for TopicRegistry {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<MessageId, PipelineError>> + Send + '_>> {
        let topic_arc = self.topic(topic);
        Box::pin(async move {
            let topic = topic_arc.map_err(TopicError::into_pipeline_error)?;
            let message = topic.publish(payload).await;
            Ok(message.id().clone())
        })
    }
}
