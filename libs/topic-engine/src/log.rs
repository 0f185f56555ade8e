use std::collections::VecDeque;

use tokio::sync::RwLock;

use sentiment_api::Message;

/// Parameters for reading the retained log of a topic.
#[derive(Debug, Clone, Default)]
pub struct TopicQuery {
    /// Start of the publish-time range (inclusive, Unix ms).
    pub from_ms: Option<i64>,
    /// End of the publish-time range (exclusive, Unix ms).
    pub to_ms: Option<i64>,
    /// Maximum number of messages. When set, the latest N are returned.
    pub limit: Option<usize>,
}

/// Bounded ring buffer of published messages, oldest first.
pub(crate) struct MessageLog {
    messages: RwLock<VecDeque<Message>>,
    max_retained: usize,
}

impl MessageLog {
    pub(crate) fn new(max_retained: usize) -> Self {
        Self {
            messages: RwLock::new(VecDeque::with_capacity(max_retained.min(65536))),
            max_retained,
        }
    }

    pub(crate) async fn append(&self, message: Message) {
        if self.max_retained == 0 {
            return;
        }
        let mut buf = self.messages.write().await;
        if buf.len() >= self.max_retained {
            buf.pop_front();
        }
        buf.push_back(message);
    }

    pub(crate) async fn query(&self, query: &TopicQuery) -> Vec<Message> {
        let buf = self.messages.read().await;
        let mut result: Vec<Message> = buf
            .iter()
            .filter(|m| {
                let ts = m.publish_time().timestamp_millis();
                if let Some(from) = query.from_ms {
                    if ts < from {
                        return false;
                    }
                }
                if let Some(to) = query.to_ms {
                    if ts >= to {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect();

        if let Some(limit) = query.limit {
            if result.len() > limit {
                result = result.split_off(result.len() - limit);
            }
        }
        result
    }
}
