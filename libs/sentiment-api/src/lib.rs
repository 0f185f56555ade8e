pub mod channel;
pub mod error;
pub mod message;
pub mod record;
pub mod scoring;
pub mod store;

pub use channel::MessagePublisher;
pub use error::{ErrorKind, PipelineError};
pub use message::{Message, MessageId};
pub use record::{NewSentimentRecord, RecordId, SentimentRecord, SentimentScore};
pub use scoring::SentimentScorer;
pub use store::{RecordQuery, RecordStore, SortOrder, StoreTransaction};
