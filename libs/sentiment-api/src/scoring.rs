use std::future::Future;
use std::pin::Pin;

use crate::error::PipelineError;
use crate::record::SentimentScore;

/// Scoring function: computes a sentiment score for a piece of text.
///
/// Two implementations, picked once at startup from configuration:
/// the hosted NLP endpoint (`LanguageScorer`) and a pure test double
/// (`MockScorer`). Failures map to `ScoringUnavailable`.
pub trait SentimentScorer: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    fn score<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<SentimentScore, PipelineError>> + Send + 'a>>;
}
