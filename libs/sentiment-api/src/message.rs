use std::collections::BTreeMap;
use std::fmt;

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Channel-assigned message identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One delivered unit of the channel: opaque payload plus the delivery
/// metadata the channel stamped on it.
///
/// Immutable once built. Only the enrichment side interprets the bytes,
/// via [`Message::text`].
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    id: MessageId,
    payload: Vec<u8>,
    publish_time: DateTime<Utc>,
    attributes: BTreeMap<String, String>,
}

impl Message {
    pub fn new(id: MessageId, payload: Vec<u8>, publish_time: DateTime<Utc>) -> Self {
        Self {
            id,
            payload,
            publish_time,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attributes(mut self, attributes: BTreeMap<String, String>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn id(&self) -> &MessageId {
        &self.id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn publish_time(&self) -> DateTime<Utc> {
        self.publish_time
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// Decode the payload as UTF-8 text.
    pub fn text(&self) -> Result<&str, PipelineError> {
        std::str::from_utf8(&self.payload)
            .map_err(|e| PipelineError::from(e).with_context(format!("message {}", self.id)))
    }
}

impl Serialize for Message {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("Message", 5)?;
        s.serialize_field("id", &self.id)?;
        s.serialize_field("publish_time", &self.publish_time)?;
        s.serialize_field("attributes", &self.attributes)?;
        match std::str::from_utf8(&self.payload) {
            // Inline text for readability
            Ok(text) => {
                s.serialize_field("encoding", "utf8")?;
                s.serialize_field("data", text)?;
            }
            Err(_) => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(&self.payload);
                s.serialize_field("encoding", "base64")?;
                s.serialize_field("data", &encoded)?;
            }
        }
        s.end()
    }
}
