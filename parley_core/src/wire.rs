//! Wire shapes exchanged with the generation service.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Speaker, Transcript};

/// Request body: the whole transcript as role-tagged content blocks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WirePayload {
    pub contents: Vec<WireContent>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WireContent {
    pub role: Speaker,
    pub parts: Vec<WirePart>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WirePart {
    pub text: String,
}

/// Encode the full transcript, one content block per turn, in order.
///
/// The service keeps no state between calls, so every request carries the
/// entire conversation.
#[must_use]
pub fn encode(transcript: &Transcript) -> WirePayload {
    WirePayload {
        contents: transcript
            .iter()
            .map(|turn| WireContent {
                role: turn.role(),
                parts: vec![WirePart {
                    text: turn.text().to_string(),
                }],
            })
            .collect(),
    }
}

/// Raw JSON body returned by the service.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceResponse {
    body: Value,
}

impl ServiceResponse {
    #[must_use]
    pub const fn new(body: Value) -> Self {
        Self { body }
    }

    /// Build the single-candidate response shape the service returns on success.
    #[must_use]
    pub fn with_text(text: &str) -> Self {
        Self::new(serde_json::json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [{ "text": text }]
                }
            }]
        }))
    }

    #[must_use]
    pub const fn body(&self) -> &Value {
        &self.body
    }
}

impl From<Value> for ServiceResponse {
    fn from(body: Value) -> Self {
        Self::new(body)
    }
}
