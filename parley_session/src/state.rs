//! Session state owned by the controller.
//!
//! Only the controller mutates a `SessionState`; everyone else receives
//! `SessionSnapshot` copies.

use chrono::{DateTime, Utc};

use parley_core::{Transcript, Turn};

/// Mutable state of one conversation session.
#[derive(Debug, Clone)]
pub struct SessionState {
    transcript: Transcript,
    busy: bool,
    pending_input: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SessionState {
    /// Create an idle session with an empty transcript.
    #[must_use]
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            transcript: Transcript::new(),
            busy: false,
            pending_input: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub const fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    #[must_use]
    pub const fn is_busy(&self) -> bool {
        self.busy
    }

    #[must_use]
    pub fn pending_input(&self) -> &str {
        &self.pending_input
    }

    pub(crate) fn append(&mut self, turn: Turn) {
        self.transcript = std::mem::take(&mut self.transcript).append(turn);
        self.updated_at = Utc::now();
    }

    pub(crate) const fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
    }

    pub(crate) fn set_pending_input(&mut self, text: String) {
        self.pending_input = text;
    }

    pub(crate) fn take_pending_input(&mut self) -> String {
        std::mem::take(&mut self.pending_input)
    }

    /// Read-only copy for observers.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            transcript: self.transcript.clone(),
            busy: self.busy,
            pending_input: self.pending_input.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of a session, safe to hand to rendering code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub transcript: Transcript,
    pub busy: bool,
    pub pending_input: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionSnapshot {
    /// Number of completed user/model exchanges.
    #[must_use]
    pub fn completed_exchanges(&self) -> usize {
        let stats = self.transcript.stats();
        stats.model_turns.min(stats.user_turns)
    }
}
