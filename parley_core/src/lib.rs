#![deny(
    clippy::all,
    clippy::nursery,
    clippy::pedantic,
    clippy::style,
    clippy::complexity,
    clippy::perf,
    clippy::correctness,
    clippy::suspicious,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![allow(
    clippy::similar_names,
    clippy::missing_safety_doc,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod decode;
pub mod identity;
pub mod transcript;
pub mod wire;

pub use decode::{DecodeError, Decoded, SOFT_FAILURE_TEXT, SoftFailure, decode, decode_str};
pub use identity::{
    Identity, IdentityError, IdentityOrigin, IdentityProvider, IdentitySource,
    IdentitySubscription, TokenIdentitySource,
};
pub use transcript::{Transcript, TranscriptStats};
pub use wire::{ServiceResponse, WireContent, WirePart, WirePayload, encode};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Model,
}

impl Speaker {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Model => "model",
        }
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message in a conversation. Fields are read-only once built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Turn {
    role: Speaker,
    text: String,
}

impl Turn {
    #[must_use]
    pub fn new(role: Speaker, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }

    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Speaker::User, text)
    }

    #[must_use]
    pub fn model(text: impl Into<String>) -> Self {
        Self::new(Speaker::Model, text)
    }

    #[must_use]
    pub const fn role(&self) -> Speaker {
        self.role
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Failure of the remote call: non-2xx status, network error, timeout or a
/// body that is not JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub status: Option<u16>,
    pub message: String,
}

impl TransportError {
    #[must_use]
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "HTTP {status}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for TransportError {}

/// Performs the network call to the generation service.
///
/// Implementations own timeouts and HTTP semantics; the session controller
/// treats every error uniformly as a hard failure.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, payload: &WirePayload) -> Result<ServiceResponse, TransportError>;
}
