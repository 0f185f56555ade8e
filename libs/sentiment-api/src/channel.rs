use std::future::Future;
use std::pin::Pin;

use crate::error::PipelineError;
use crate::message::MessageId;

/// Publish side of the message channel.
///
/// Implementations: in-process `TopicRegistry`, REST `PubSubPublisher`.
/// One call is one publish attempt. Callers never retry through this trait.
pub trait MessagePublisher: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Publish `payload` to `topic`. Resolves once the channel accepted the
    /// message and returns the identifier the channel assigned to it.
    ///
    /// Transport failures and rejections map to `ChannelUnavailable`.
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<MessageId, PipelineError>> + Send + '_>>;
}
