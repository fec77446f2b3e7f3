//! Append-only transcript of conversation turns.
//!
//! A `Transcript` is a cheap handle over shared storage. Appending produces a
//! new handle and leaves every previously cloned handle untouched, so a
//! snapshot taken before a request is dispatched keeps describing exactly what
//! was sent.

use std::sync::Arc;

use crate::{Speaker, Turn};

/// Ordered sequence of turns in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    turns: Arc<Vec<Turn>>,
}

impl Transcript {
    /// Create an empty transcript.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn and return the extended transcript.
    ///
    /// Storage is copied only when another handle still shares it.
    #[must_use]
    pub fn append(mut self, turn: Turn) -> Self {
        Arc::make_mut(&mut self.turns).push(turn);
        self
    }

    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Turn> {
        self.turns.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    #[must_use]
    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Get conversation statistics.
    #[must_use]
    pub fn stats(&self) -> TranscriptStats {
        let user_turns = self
            .turns
            .iter()
            .filter(|t| t.role() == Speaker::User)
            .count();

        TranscriptStats {
            total_turns: self.turns.len(),
            user_turns,
            model_turns: self.turns.len() - user_turns,
            total_characters: self.turns.iter().map(|t| t.text().chars().count()).sum(),
        }
    }
}

impl<'a> IntoIterator for &'a Transcript {
    type Item = &'a Turn;
    type IntoIter = std::slice::Iter<'a, Turn>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Statistics about a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscriptStats {
    pub total_turns: usize,
    pub user_turns: usize,
    pub model_turns: usize,
    pub total_characters: usize,
}
