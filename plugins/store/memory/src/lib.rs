use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::RwLock;

use sentiment_api::{
    NewSentimentRecord, PipelineError, RecordId, RecordQuery, RecordStore, SentimentRecord,
    SortOrder, StoreTransaction,
};

// ═══════════════════════════════════════════════════════════════
//  MemoryStore
// ═══════════════════════════════════════════════════════════════

struct Inner {
    records: Vec<SentimentRecord>,
    next_id: u64,
}

/// In-memory record store. For local runs and tests; nothing survives
/// a restart.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                records: Vec::new(),
                next_id: 1,
            })),
        }
    }

    /// Number of committed records.
    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl RecordStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn begin(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn StoreTransaction>, PipelineError>> + Send + '_>>
    {
        let inner = self.inner.clone();
        Box::pin(async move {
            Ok(Box::new(MemoryTransaction {
                inner,
                staged: Vec::new(),
            }) as Box<dyn StoreTransaction>)
        })
    }

    fn list(
        &self,
        query: &RecordQuery,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SentimentRecord>, PipelineError>> + Send + '_>> {
        let query = query.clone();
        Box::pin(async move {
            let buf = self.inner.read().await;
            let mut result = buf.records.clone();

            match query.order {
                SortOrder::Desc => result.reverse(),
                SortOrder::Asc => {}
            }
            if let Some(limit) = query.limit {
                result.truncate(limit);
            }
            Ok(result)
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryTransaction
// ═══════════════════════════════════════════════════════════════

/// Staged inserts, applied under one write lock on commit.
/// Dropping it simply forgets the staged records.
struct MemoryTransaction {
    inner: Arc<RwLock<Inner>>,
    staged: Vec<NewSentimentRecord>,
}

impl StoreTransaction for MemoryTransaction {
    fn insert(&mut self, record: NewSentimentRecord) -> Result<(), PipelineError> {
        self.staged.push(record);
        Ok(())
    }

    fn commit(
        self: Box<Self>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SentimentRecord>, PipelineError>> + Send>> {
        Box::pin(async move {
            let MemoryTransaction { inner, staged } = *self;
            let mut buf = inner.write().await;
            let mut committed = Vec::with_capacity(staged.len());
            for record in staged {
                let id = RecordId::new(buf.next_id.to_string());
                buf.next_id += 1;
                committed.push(SentimentRecord::from_new(id, record));
            }
            buf.records.extend(committed.iter().cloned());
            Ok(committed)
        })
    }

    fn rollback(
        self: Box<Self>,
    ) -> Pin<Box<dyn Future<Output = Result<(), PipelineError>> + Send>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use sentiment_api::SentimentScore;

    use super::*;

    fn record(text: &str) -> NewSentimentRecord {
        NewSentimentRecord {
            created_at: Utc::now(),
            text: text.to_string(),
            score: SentimentScore::NEUTRAL,
        }
    }

    #[tokio::test]
    async fn commit_assigns_ids_and_publishes_atomically() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert(record("one")).unwrap();
        tx.insert(record("two")).unwrap();
        assert!(store.is_empty().await);

        let committed = tx.commit().await.unwrap();
        assert_eq!(committed.len(), 2);
        assert_eq!(committed[0].id.as_str(), "1");
        assert_eq!(committed[1].id.as_str(), "2");
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn rollback_and_drop_discard() {
        let store = MemoryStore::new();

        let mut tx = store.begin().await.unwrap();
        tx.insert(record("rolled back")).unwrap();
        tx.rollback().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.insert(record("dropped")).unwrap();
        drop(tx);

        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn list_orders_and_limits() {
        let store = MemoryStore::new();
        for text in ["a", "b", "c"] {
            let mut tx = store.begin().await.unwrap();
            tx.insert(record(text)).unwrap();
            tx.commit().await.unwrap();
        }

        let newest = store
            .list(&RecordQuery { limit: Some(2), order: SortOrder::Desc })
            .await
            .unwrap();
        let texts: Vec<&str> = newest.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, ["c", "b"]);

        let oldest = store
            .list(&RecordQuery { limit: None, order: SortOrder::Asc })
            .await
            .unwrap();
        assert_eq!(oldest[0].text, "a");
        assert_eq!(oldest.len(), 3);
    }
}
