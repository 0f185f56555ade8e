use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::record::{NewSentimentRecord, SentimentRecord};

/// Sort order by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Parameters for listing persisted records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordQuery {
    /// Maximum number of records. None = all.
    pub limit: Option<usize>,
    pub order: SortOrder,
}

/// Durable Store backend.
///
/// Writes only go through a [`StoreTransaction`]; the store assigns record
/// ids at commit time.
pub trait RecordStore: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Open a transaction. Failure maps to `StoreWriteFailed`.
    fn begin(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn StoreTransaction>, PipelineError>> + Send + '_>>;

    /// Read committed records. Failure maps to `StoreReadFailed`.
    fn list(
        &self,
        query: &RecordQuery,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SentimentRecord>, PipelineError>> + Send + '_>>;
}

/// Scoped store transaction: staged inserts become visible all together on
/// `commit`, or not at all.
///
/// Dropping a transaction without committing discards it. This is what makes
/// a cancelled invocation leave nothing behind.
pub trait StoreTransaction: Send {
    /// Stage a record for insertion.
    fn insert(&mut self, record: NewSentimentRecord) -> Result<(), PipelineError>;

    /// Apply every staged insert atomically. Returns the persisted records
    /// in staging order, with their assigned ids.
    fn commit(self: Box<Self>)
        -> Pin<Box<dyn Future<Output = Result<Vec<SentimentRecord>, PipelineError>> + Send>>;

    /// Discard every staged insert.
    fn rollback(self: Box<Self>)
        -> Pin<Box<dyn Future<Output = Result<(), PipelineError>> + Send>>;
}
