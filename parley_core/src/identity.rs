//! Identity bootstrap.
//!
//! The identity is an annotation for the presentation layer only. It is
//! resolved once, in the background, either from an [`IdentitySource`] or,
//! when that source is unavailable, from a locally generated fallback. The
//! session controller never waits on it and it never reaches the wire.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityOrigin {
    /// Issued by the identity source
    Remote,
    /// Generated on this machine because the source was unavailable
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    id: String,
    origin: IdentityOrigin,
    established_at: DateTime<Utc>,
}

impl Identity {
    #[must_use]
    pub fn remote(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            origin: IdentityOrigin::Remote,
            established_at: Utc::now(),
        }
    }

    /// Generate a fresh anonymous identity.
    #[must_use]
    pub fn local() -> Self {
        Self {
            id: format!("local-{}", Uuid::now_v7()),
            origin: IdentityOrigin::Local,
            established_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub const fn origin(&self) -> IdentityOrigin {
        self.origin
    }

    #[must_use]
    pub const fn established_at(&self) -> DateTime<Utc> {
        self.established_at
    }
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("no identity token configured")]
    MissingToken,

    #[error("identity provider rejected the sign-in: {0}")]
    Rejected(String),
}

/// Something that can sign a user in and hand back an opaque identity.
#[async_trait]
pub trait IdentitySource: Send + Sync {
    async fn sign_in(&self) -> Result<Identity, IdentityError>;
}

/// Derives a stable identity from a configured opaque token.
///
/// The token itself is never exposed; the identity is a fingerprint of it.
#[derive(Debug, Clone, Default)]
pub struct TokenIdentitySource {
    token: Option<String>,
}

impl TokenIdentitySource {
    #[must_use]
    pub const fn new(token: Option<String>) -> Self {
        Self { token }
    }
}

#[async_trait]
impl IdentitySource for TokenIdentitySource {
    async fn sign_in(&self) -> Result<Identity, IdentityError> {
        let token = self
            .token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(IdentityError::MissingToken)?;

        let digest = format!("{:x}", Sha256::digest(token.as_bytes()));
        Ok(Identity::remote(format!("user-{}", &digest[..16])))
    }
}

/// Holds the session identity once it is known.
///
/// Cloning yields another handle onto the same slot.
#[derive(Debug, Clone)]
pub struct IdentityProvider {
    slot: Arc<watch::Sender<Option<Identity>>>,
}

impl Default for IdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityProvider {
    #[must_use]
    pub fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            slot: Arc::new(slot),
        }
    }

    /// The identity, if bootstrap has completed.
    #[must_use]
    pub fn current(&self) -> Option<Identity> {
        self.slot.borrow().clone()
    }

    /// Observe the identity as it becomes available.
    #[must_use]
    pub fn subscribe(&self) -> IdentitySubscription {
        IdentitySubscription {
            rx: self.slot.subscribe(),
        }
    }

    /// Resolve the identity from `source`, falling back to a local identity.
    ///
    /// Only the first completed bootstrap is recorded; later calls return the
    /// identity already in place.
    pub async fn bootstrap(&self, source: &dyn IdentitySource) -> Identity {
        if let Some(existing) = self.current() {
            debug!("Identity already established: {}", existing.id());
            return existing;
        }

        let resolved = match source.sign_in().await {
            Ok(identity) => {
                info!("Signed in as {}", identity.id());
                identity
            }
            Err(e) => {
                warn!("Identity provider unavailable: {e}, using local identity");
                Identity::local()
            }
        };

        let mut established = resolved.clone();
        self.slot.send_if_modified(|slot| match slot {
            Some(existing) => {
                established = existing.clone();
                false
            }
            None => {
                *slot = Some(resolved);
                true
            }
        });
        established
    }
}

/// Subscription to identity changes. Dropping it or calling
/// [`IdentitySubscription::cancel`] stops observation.
#[derive(Debug)]
pub struct IdentitySubscription {
    rx: watch::Receiver<Option<Identity>>,
}

impl IdentitySubscription {
    #[must_use]
    pub fn current(&self) -> Option<Identity> {
        self.rx.borrow().clone()
    }

    /// Wait for the next published identity.
    ///
    /// Returns `None` once every provider handle has been dropped.
    pub async fn changed(&mut self) -> Option<Identity> {
        loop {
            if self.rx.changed().await.is_err() {
                return None;
            }
            if let Some(identity) = self.rx.borrow_and_update().clone() {
                return Some(identity);
            }
        }
    }

    pub fn cancel(self) {
        drop(self);
    }
}
