//! Turning service responses into transcript turns.
//!
//! Three outcomes are possible:
//! - a reply: the first candidate's first part carries text;
//! - a soft failure: the body is a JSON object but the expected structure is
//!   missing or empty, rendered as a fixed apology turn;
//! - a hard failure: the body is not a JSON object at all.

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::{ServiceResponse, Turn};

/// Text of the model turn appended when a response has no usable content.
pub const SOFT_FAILURE_TEXT: &str = "Sorry, I couldn't get a response. Please try again.";

/// Which level of the expected response structure was missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftFailure {
    /// `candidates` absent, not a list, or empty
    NoCandidates,
    /// first candidate has no `content` object
    MissingContent,
    /// `content.parts` absent, not a list, or empty
    NoParts,
    /// first part has no string `text`
    MissingText,
}

impl SoftFailure {
    #[must_use]
    pub const fn describe(self) -> &'static str {
        match self {
            Self::NoCandidates => "response has no candidates",
            Self::MissingContent => "first candidate has no content",
            Self::NoParts => "candidate content has no parts",
            Self::MissingText => "first content part has no text",
        }
    }
}

impl std::fmt::Display for SoftFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.describe())
    }
}

/// A successfully decoded response.
///
/// Both variants carry a model-role turn ready to append; the transcript
/// does not distinguish them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Reply(Turn),
    Fallback { turn: Turn, reason: SoftFailure },
}

/// The response could not be interpreted at all.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("response body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("response body is not a JSON object (found {0})")]
    NotAnObject(&'static str),
}

/// Decode a parsed service response.
pub fn decode(raw: &ServiceResponse) -> Result<Decoded, DecodeError> {
    let body = raw.body();
    if !body.is_object() {
        return Err(DecodeError::NotAnObject(json_kind(body)));
    }

    match first_text(body) {
        Ok(text) => Ok(Decoded::Reply(Turn::model(text))),
        Err(reason) => {
            warn!("Soft decode failure: {reason}");
            Ok(Decoded::Fallback {
                turn: Turn::model(SOFT_FAILURE_TEXT),
                reason,
            })
        }
    }
}

/// Decode a raw response body.
pub fn decode_str(raw: &str) -> Result<Decoded, DecodeError> {
    let body: Value = serde_json::from_str(raw)?;
    decode(&ServiceResponse::new(body))
}

fn first_text(body: &Value) -> Result<&str, SoftFailure> {
    let candidate = body["candidates"]
        .as_array()
        .and_then(|c| c.first())
        .ok_or(SoftFailure::NoCandidates)?;

    let content = candidate
        .get("content")
        .filter(|c| c.is_object())
        .ok_or(SoftFailure::MissingContent)?;

    let part = content["parts"]
        .as_array()
        .and_then(|p| p.first())
        .ok_or(SoftFailure::NoParts)?;

    part["text"].as_str().ok_or(SoftFailure::MissingText)
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
