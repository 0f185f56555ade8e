use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use sentiment_api::{
    ErrorKind, Message, NewSentimentRecord, PipelineError, RecordStore, SentimentRecord,
    SentimentScorer,
};

// ═══════════════════════════════════════════════════════════════
//  Clock
// ═══════════════════════════════════════════════════════════════

/// UTC wall clock that never goes backwards, even if the system clock does.
/// Microsecond resolution, the coarsest any store keeps.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last_micros: AtomicI64,
}

impl MonotonicClock {
    pub fn now(&self) -> DateTime<Utc> {
        let wall = Utc::now();
        let micros = wall.timestamp_micros();
        let prev = self.last_micros.fetch_max(micros, Ordering::SeqCst);
        DateTime::from_timestamp_micros(prev.max(micros)).unwrap_or(wall)
    }
}

/// Keep `Cancelled` as is, force everything else into `kind`.
fn coerce(e: PipelineError, kind: ErrorKind) -> PipelineError {
    if e.kind() == kind || e.kind() == ErrorKind::Cancelled {
        e
    } else {
        PipelineError::new(kind, e.message())
    }
}

// ═══════════════════════════════════════════════════════════════
//  EnrichmentService
// ═══════════════════════════════════════════════════════════════

/// Scores one delivered message and persists the result in one store
/// transaction. Stateless between invocations apart from the clock.
pub struct EnrichmentService {
    scorer: Arc<dyn SentimentScorer>,
    store: Arc<dyn RecordStore>,
    clock: MonotonicClock,
}

impl EnrichmentService {
    pub fn new(scorer: Arc<dyn SentimentScorer>, store: Arc<dyn RecordStore>) -> Self {
        Self {
            scorer,
            store,
            clock: MonotonicClock::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Decode, score and persist `message`.
    ///
    /// Races the whole invocation against `token`: on cancellation the
    /// in-flight scorer or store call is dropped, an open transaction rolls
    /// back, and `Cancelled` is returned. Failures are logged here and
    /// returned, so the trigger can nack and let the channel redeliver.
    pub async fn handle(
        &self,
        message: &Message,
        token: &CancellationToken,
    ) -> Result<SentimentRecord, PipelineError> {
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(PipelineError::cancelled("invocation cancelled")),
            result = self.process(message) => result,
        };
        self.report(message, result)
    }

    /// [`handle`](Self::handle) bounded by `timeout`. Running out of time
    /// counts as cancellation.
    pub async fn handle_within(
        &self,
        message: &Message,
        timeout: Duration,
        token: &CancellationToken,
    ) -> Result<SentimentRecord, PipelineError> {
        match tokio::time::timeout(timeout, self.handle(message, token)).await {
            Ok(result) => result,
            Err(_) => self.report(
                message,
                Err(PipelineError::cancelled(format!(
                    "invocation exceeded {}ms",
                    timeout.as_millis()
                ))),
            ),
        }
    }

    async fn process(&self, message: &Message) -> Result<SentimentRecord, PipelineError> {
        let text = message.text()?;

        let score = self
            .scorer
            .score(text)
            .await
            .map_err(|e| coerce(e, ErrorKind::ScoringUnavailable))?;

        let record = NewSentimentRecord {
            created_at: self.clock.now(),
            text: text.to_string(),
            score,
        };

        // Every early return below drops `tx`, which rolls it back.
        let mut tx = self
            .store
            .begin()
            .await
            .map_err(|e| coerce(e, ErrorKind::StoreWriteFailed))?;
        tx.insert(record).map_err(|e| coerce(e, ErrorKind::StoreWriteFailed))?;
        let mut committed = tx
            .commit()
            .await
            .map_err(|e| coerce(e, ErrorKind::StoreWriteFailed))?;

        committed
            .pop()
            .ok_or_else(|| PipelineError::store_write_failed("commit returned no record"))
    }

    fn report(
        &self,
        message: &Message,
        result: Result<SentimentRecord, PipelineError>,
    ) -> Result<SentimentRecord, PipelineError> {
        match &result {
            Ok(record) => tracing::info!(
                message_id = %message.id(),
                record_id = %record.id,
                score = record.score,
                scorer = self.scorer.name(),
                store = self.store.name(),
                "message enriched"
            ),
            Err(e) => tracing::error!(
                message_id = %message.id(),
                stage = e.stage(),
                error = %e,
                "enrichment failed"
            ),
        }
        result
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::AtomicUsize;

    use scorer_mock::MockScorer;
    use sentiment_api::{
        MessageId, RecordQuery, SentimentScore, SortOrder, StoreTransaction,
    };
    use store_memory::MemoryStore;

    use super::*;

    pub(crate) fn message(id: &str, payload: &[u8]) -> Message {
        Message::new(MessageId::new(id), payload.to_vec(), Utc::now())
    }

    /// Scorer that always fails and counts calls.
    #[derive(Default)]
    pub(crate) struct DownScorer {
        pub(crate) calls: AtomicUsize,
    }

    impl SentimentScorer for DownScorer {
        fn name(&self) -> &'static str {
            "down"
        }

        fn score<'a>(
            &'a self,
            _text: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<SentimentScore, PipelineError>> + Send + 'a>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Err(PipelineError::scoring_unavailable("model offline")) })
        }
    }

    /// Scorer that never answers.
    struct HangingScorer;

    impl SentimentScorer for HangingScorer {
        fn name(&self) -> &'static str {
            "hanging"
        }

        fn score<'a>(
            &'a self,
            _text: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<SentimentScore, PipelineError>> + Send + 'a>> {
            Box::pin(std::future::pending())
        }
    }

    /// Store whose commits always fail. Reads go to `inner`.
    struct BrokenStore {
        inner: MemoryStore,
    }

    struct BrokenTransaction;

    impl StoreTransaction for BrokenTransaction {
        fn insert(&mut self, _record: NewSentimentRecord) -> Result<(), PipelineError> {
            Ok(())
        }

        fn commit(
            self: Box<Self>,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<SentimentRecord>, PipelineError>> + Send>>
        {
            Box::pin(async { Err(PipelineError::store_write_failed("disk full")) })
        }

        fn rollback(
            self: Box<Self>,
        ) -> Pin<Box<dyn Future<Output = Result<(), PipelineError>> + Send>> {
            Box::pin(async { Ok(()) })
        }
    }

    impl RecordStore for BrokenStore {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn begin(
            &self,
        ) -> Pin<Box<dyn Future<Output = Result<Box<dyn StoreTransaction>, PipelineError>> + Send + '_>>
        {
            Box::pin(async { Ok(Box::new(BrokenTransaction) as Box<dyn StoreTransaction>) })
        }

        fn list(
            &self,
            query: &RecordQuery,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<SentimentRecord>, PipelineError>> + Send + '_>>
        {
            self.inner.list(query)
        }
    }

    fn service(store: &MemoryStore) -> EnrichmentService {
        EnrichmentService::new(Arc::new(MockScorer::new()), Arc::new(store.clone()))
    }

    #[tokio::test]
    async fn persists_one_record_per_invocation() {
        let store = MemoryStore::new();
        let service = service(&store);
        let token = CancellationToken::new();

        let record = service
            .handle(&message("1", b"good morning"), &token)
            .await
            .unwrap();
        assert_eq!(record.text, "good morning");
        assert_eq!(record.score, 1.0);
        assert_eq!(store.len().await, 1);

        service.handle(&message("2", b"bad day"), &token).await.unwrap();
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn created_at_never_decreases() {
        let store = MemoryStore::new();
        let service = service(&store);
        let token = CancellationToken::new();
        for i in 0..50 {
            service
                .handle(&message(&i.to_string(), b"text"), &token)
                .await
                .unwrap();
        }

        let records = store
            .list(&RecordQuery { limit: None, order: SortOrder::Asc })
            .await
            .unwrap();
        assert_eq!(records.len(), 50);
        assert!(records.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }

    #[tokio::test]
    async fn scorer_failure_leaves_no_record() {
        let store = MemoryStore::new();
        let scorer = Arc::new(DownScorer::default());
        let service = EnrichmentService::new(scorer.clone(), Arc::new(store.clone()));

        let err = service
            .handle(&message("1", b"anything"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ScoringUnavailable);
        assert_eq!(scorer.calls.load(Ordering::SeqCst), 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn commit_failure_leaves_no_record() {
        let inner = MemoryStore::new();
        let service = EnrichmentService::new(
            Arc::new(MockScorer::new()),
            Arc::new(BrokenStore { inner: inner.clone() }),
        );

        let err = service
            .handle(&message("1", b"good"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreWriteFailed);
        assert!(service.store().list(&RecordQuery::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn undecodable_payload_skips_scorer() {
        let store = MemoryStore::new();
        let scorer = Arc::new(DownScorer::default());
        let service = EnrichmentService::new(scorer.clone(), Arc::new(store.clone()));

        let err = service
            .handle(&message("1", &[0xff, 0xfe]), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPayload);
        assert_eq!(scorer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancellation_and_timeout_report_cancelled() {
        let store = MemoryStore::new();
        let service = EnrichmentService::new(Arc::new(HangingScorer), Arc::new(store.clone()));

        let token = CancellationToken::new();
        let msg = message("1", b"slow");
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let err = service.handle(&msg, &token).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);

        let err = service
            .handle_within(&msg, Duration::from_millis(20), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn i_love_this_product_scores_neutral() {
        let store = MemoryStore::new();
        let record = service(&store)
            .handle(&message("1", b"I love this product"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(record.score, 0.0);
        assert_eq!(record.magnitude, None);
    }

    #[test]
    fn clock_is_monotonic() {
        let clock = MonotonicClock::default();
        // Pretend an earlier call saw a time far in the future.
        let future = Utc::now().timestamp_micros() + 60_000_000;
        clock.last_micros.store(future, Ordering::SeqCst);
        assert_eq!(clock.now().timestamp_micros(), future);
        assert!(clock.now().timestamp_micros() >= future);
    }
}
