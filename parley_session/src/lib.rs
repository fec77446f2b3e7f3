#![warn(
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

//! Conversation session management.
//!
//! The `SessionController` owns the transcript and the busy guard and drives
//! one request/response cycle at a time:
//!
//! 1. `begin` appends the user turn, raises the busy flag and encodes the
//!    whole transcript;
//! 2. `dispatch` runs the transport call without borrowing the controller;
//! 3. `resolve` decodes the result, appends exactly one model turn and
//!    lowers the busy flag.
//!
//! Presentation code observes state only through snapshots.

mod controller;
mod state;

pub use controller::{
    Completion, CompletionFuture, PendingRequest, Rejected, SessionConfig, SessionController,
    SessionError, TurnOutcome,
};
pub use state::{SessionSnapshot, SessionState};
