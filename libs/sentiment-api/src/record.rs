use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

// ════════════════════════════════════════════════════════════════
//  SentimentScore
// ════════════════════════════════════════════════════════════════

/// Output of a scorer: polarity in [-1, 1] plus an optional
/// non-negative magnitude (overall emotional strength).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SentimentScore {
    value: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    magnitude: Option<f32>,
}

impl SentimentScore {
    pub const NEGATIVE: SentimentScore = SentimentScore { value: -1.0, magnitude: None };
    pub const NEUTRAL: SentimentScore = SentimentScore { value: 0.0, magnitude: None };
    pub const POSITIVE: SentimentScore = SentimentScore { value: 1.0, magnitude: None };

    /// Score without magnitude. Rejects NaN and values outside [-1, 1].
    pub fn new(value: f32) -> Result<Self, PipelineError> {
        if !value.is_finite() || !(-1.0..=1.0).contains(&value) {
            return Err(PipelineError::scoring_unavailable(format!(
                "score {value} outside [-1, 1]"
            )));
        }
        Ok(Self { value, magnitude: None })
    }

    pub fn with_magnitude(self, magnitude: f32) -> Result<Self, PipelineError> {
        if !magnitude.is_finite() || magnitude < 0.0 {
            return Err(PipelineError::scoring_unavailable(format!(
                "magnitude {magnitude} is negative or not finite"
            )));
        }
        Ok(Self { magnitude: Some(magnitude), ..self })
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn magnitude(&self) -> Option<f32> {
        self.magnitude
    }
}

// ════════════════════════════════════════════════════════════════
//  Records
// ════════════════════════════════════════════════════════════════

/// Store-assigned record identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Record staged in a store transaction, before the store assigns an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSentimentRecord {
    pub created_at: DateTime<Utc>,
    pub text: String,
    pub score: SentimentScore,
}

/// Persisted outcome of scoring one message.
///
/// Created exactly once per successfully processed delivery and never
/// updated afterwards. Field names on the wire match the stored entity:
/// `created`, `text`, `score`, `magnitude` (older entities call it `weight`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentRecord {
    pub id: RecordId,
    #[serde(rename = "created")]
    pub created_at: DateTime<Utc>,
    pub text: String,
    pub score: f32,
    #[serde(default, alias = "weight", skip_serializing_if = "Option::is_none")]
    pub magnitude: Option<f32>,
}

impl SentimentRecord {
    pub fn from_new(id: RecordId, record: NewSentimentRecord) -> Self {
        Self {
            id,
            created_at: record.created_at,
            text: record.text,
            score: record.score.value(),
            magnitude: record.score.magnitude(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn score_bounds() {
        assert!(SentimentScore::new(-1.0).is_ok());
        assert!(SentimentScore::new(1.0).is_ok());
        assert_eq!(SentimentScore::new(1.5).unwrap_err().kind(), ErrorKind::ScoringUnavailable);
        assert!(SentimentScore::new(f32::NAN).is_err());
        assert!(SentimentScore::NEUTRAL.with_magnitude(-0.1).is_err());
        assert_eq!(
            SentimentScore::new(0.4).unwrap().with_magnitude(2.5).unwrap().magnitude(),
            Some(2.5)
        );
    }

    #[test]
    fn record_wire_names() {
        let created_at = DateTime::parse_from_rfc3339("2024-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let record = SentimentRecord::from_new(
            RecordId::new("7"),
            NewSentimentRecord {
                created_at,
                text: "good".into(),
                score: SentimentScore::POSITIVE,
            },
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["id"], "7");
        assert_eq!(json["created"], "2024-03-01T10:00:00Z");
        assert_eq!(json["score"], 1.0);
        assert!(json.get("magnitude").is_none());

        let legacy: SentimentRecord = serde_json::from_value(serde_json::json!({
            "id": "8",
            "created": "2024-03-01T10:00:00Z",
            "text": "meh",
            "score": 0.0,
            "weight": 0.25,
        }))
        .unwrap();
        assert_eq!(legacy.magnitude, Some(0.25));
    }
}
