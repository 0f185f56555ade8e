use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use sentiment_api::{PipelineError, SentimentScore, SentimentScorer};

pub const DEFAULT_ENDPOINT: &str = "https://language.googleapis.com";

// ═══════════════════════════════════════════════════════════════
//  Config
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct LanguageScorerConfig {
    /// Base URL, without the `/v1/...` path.
    pub endpoint: String,
    /// API key, sent as `?key=`. Takes precedence over `access_token`.
    pub api_key: Option<String>,
    /// OAuth bearer token.
    pub access_token: Option<String>,
    /// Per-request timeout, connect included.
    pub timeout: Duration,
}

impl Default for LanguageScorerConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            access_token: None,
            timeout: Duration::from_secs(10),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Wire types (documents:analyzeSentiment)
// ═══════════════════════════════════════════════════════════════

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeSentimentRequest<'a> {
    document: Document<'a>,
    encoding_type: &'static str,
}

#[derive(Serialize)]
struct Document<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeSentimentResponse {
    document_sentiment: Option<DocumentSentiment>,
}

/// Zero-valued fields are omitted by the service, hence the defaults.
#[derive(Deserialize)]
struct DocumentSentiment {
    #[serde(default)]
    score: f32,
    #[serde(default)]
    magnitude: f32,
}

// ═══════════════════════════════════════════════════════════════
//  LanguageScorer
// ═══════════════════════════════════════════════════════════════

/// Live scorer backed by a hosted natural-language REST endpoint.
pub struct LanguageScorer {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    access_token: Option<String>,
}

impl LanguageScorer {
    pub fn new(config: LanguageScorerConfig) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PipelineError::scoring_unavailable(format!("build http client: {e}")))?;
        Ok(Self {
            client,
            url: format!(
                "{}/v1/documents:analyzeSentiment",
                config.endpoint.trim_end_matches('/')
            ),
            api_key: config.api_key,
            access_token: config.access_token,
        })
    }

    async fn analyze(&self, text: &str) -> Result<SentimentScore, PipelineError> {
        let body = AnalyzeSentimentRequest {
            document: Document {
                kind: "PLAIN_TEXT",
                content: text,
            },
            encoding_type: "UTF8",
        };

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.query(&[("key", key)]);
        } else if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| {
                PipelineError::scoring_unavailable(format!("analyzeSentiment request: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(PipelineError::scoring_unavailable(format!(
                "analyzeSentiment returned {status}: {}",
                detail.trim()
            )));
        }

        let parsed: AnalyzeSentimentResponse = response
            .json()
            .await
            .map_err(|e| {
                PipelineError::scoring_unavailable(format!("analyzeSentiment body: {e}"))
            })?;
        let sentiment = parsed.document_sentiment.ok_or_else(|| {
            PipelineError::scoring_unavailable("analyzeSentiment response has no documentSentiment")
        })?;

        SentimentScore::new(sentiment.score)?.with_magnitude(sentiment.magnitude)
    }
}

impl SentimentScorer for LanguageScorer {
    fn name(&self) -> &'static str {
        "language"
    }

    fn score<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<SentimentScore, PipelineError>> + Send + 'a>> {
        Box::pin(async move {
            let score = self.analyze(text).await?;
            tracing::debug!(score = score.value(), magnitude = ?score.magnitude(), "scored text");
            Ok(score)
        })
    }
}
