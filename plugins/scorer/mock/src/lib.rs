use std::future::Future;
use std::pin::Pin;

use sentiment_api::{PipelineError, SentimentScore, SentimentScorer};

// ═══════════════════════════════════════════════════════════════
//  MockScorer
// ═══════════════════════════════════════════════════════════════

/// Deterministic stand-in for the hosted NLP endpoint. No I/O.
///
/// "bad" anywhere in the text → -1, otherwise "good" → +1, otherwise 0.
/// "bad" is checked first, so "bad and good" scores -1.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockScorer;

impl MockScorer {
    pub fn new() -> Self {
        Self
    }

    pub fn score_text(text: &str) -> SentimentScore {
        if text.contains("bad") {
            SentimentScore::NEGATIVE
        } else if text.contains("good") {
            SentimentScore::POSITIVE
        } else {
            SentimentScore::NEUTRAL
        }
    }
}

impl SentimentScorer for MockScorer {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn score<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<SentimentScore, PipelineError>> + Send + 'a>> {
        Box::pin(async move { Ok(Self::score_text(text)) })
    }
}
