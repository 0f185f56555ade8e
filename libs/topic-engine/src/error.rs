use sentiment_api::PipelineError;

#[derive(Debug, thiserror::Error)]
pub enum TopicError {
    #[error("topic '{0}' not found")]
    NotFound(String),
}

impl TopicError {
    /// Convert to PipelineError. Every topic failure is a channel failure
    /// from the caller's point of view.
    pub fn into_pipeline_error(self) -> PipelineError {
        PipelineError::channel_unavailable(self.to_string())
    }
}
