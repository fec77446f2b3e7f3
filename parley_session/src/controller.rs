//! Session controller for request/response turns.
//!
//! The `SessionController` is the only writer of session state. It enforces
//! the busy guard: between `begin` and `resolve` exactly one request is in
//! flight and further submissions are ignored rather than queued.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parley_core::{
    Decoded, ServiceResponse, SoftFailure, Transcript, Transport, TransportError, Turn,
    WirePayload, decode, encode,
};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::state::{SessionSnapshot, SessionState};

/// Request ids are unique across every controller in the process, so a
/// completion can only ever be resolved by the controller that began it.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

const ABANDONED: &str = "request abandoned before a reply arrived";

/// Explicit configuration handed to the controller at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Opaque identity token, used for display only
    pub identity_token: Option<String>,
    /// Endpoint of the generation service
    pub service_endpoint: String,
}

impl SessionConfig {
    #[must_use]
    pub fn new(service_endpoint: impl Into<String>) -> Self {
        Self {
            identity_token: None,
            service_endpoint: service_endpoint.into(),
        }
    }

    /// Set the identity token.
    #[must_use]
    pub fn with_identity_token(mut self, token: impl Into<String>) -> Self {
        self.identity_token = Some(token.into());
        self
    }
}

/// Why a submission was ignored. Neither case touches session state.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum Rejected {
    #[error("input is empty")]
    EmptyInput,

    #[error("a request is already in flight")]
    Busy,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("completion for request {0} does not match the request in flight")]
    UnknownRequest(u64),
}

/// A request accepted by `begin` and not yet resolved.
#[derive(Debug, PartialEq, Eq)]
pub struct PendingRequest {
    id: u64,
    payload: WirePayload,
}

impl PendingRequest {
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Encoding of the transcript as it stood when the request was accepted.
    #[must_use]
    pub const fn payload(&self) -> &WirePayload {
        &self.payload
    }

    /// Pair the transport result with this request.
    #[must_use]
    pub fn complete(self, result: Result<ServiceResponse, TransportError>) -> Completion {
        Completion {
            id: self.id,
            result,
        }
    }
}

/// Transport result for a pending request, ready for `resolve`.
#[derive(Debug)]
pub struct Completion {
    id: u64,
    result: Result<ServiceResponse, TransportError>,
}

impl Completion {
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }
}

pub type CompletionFuture = Pin<Box<dyn Future<Output = Completion> + Send + 'static>>;

/// Terminal outcome of one cycle, carrying the model turn that was appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Replied(Turn),
    SoftFailure { turn: Turn, reason: SoftFailure },
    Failed { turn: Turn, error: String },
}

impl TurnOutcome {
    #[must_use]
    pub const fn turn(&self) -> &Turn {
        match self {
            Self::Replied(turn) | Self::SoftFailure { turn, .. } | Self::Failed { turn, .. } => {
                turn
            }
        }
    }

    fn failed(error: String) -> Self {
        Self::Failed {
            turn: Turn::model(format!("Error: {error}")),
            error,
        }
    }
}

/// Owns one conversation and its single in-flight request.
pub struct SessionController<T: ?Sized = dyn Transport> {
    transport: Arc<T>,
    config: SessionConfig,
    state: SessionState,
    in_flight: Option<u64>,
    observers: watch::Sender<SessionSnapshot>,
}

impl<T> SessionController<T>
where
    T: Transport + ?Sized + 'static,
{
    /// Create a controller with an empty transcript.
    pub fn new(transport: Arc<T>, config: SessionConfig) -> Self {
        info!(
            "Creating session controller for endpoint: {}",
            config.service_endpoint
        );
        let state = SessionState::new();
        let (observers, _) = watch::channel(state.snapshot());

        Self {
            transport,
            config,
            state,
            in_flight: None,
            observers,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[must_use]
    pub const fn transcript(&self) -> &Transcript {
        self.state.transcript()
    }

    #[must_use]
    pub const fn is_busy(&self) -> bool {
        self.state.is_busy()
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.snapshot()
    }

    /// Receive a fresh snapshot after every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.observers.subscribe()
    }

    /// Record draft input. Allowed while busy; it is submitted later.
    pub fn set_pending_input(&mut self, text: impl Into<String>) {
        self.state.set_pending_input(text.into());
        self.publish();
    }

    /// Accept a submission: append the user turn and raise the busy flag.
    ///
    /// The returned request carries the encoding of the full transcript,
    /// including the turn just appended.
    pub fn begin(&mut self, text: &str) -> Result<PendingRequest, Rejected> {
        if text.trim().is_empty() {
            debug!("Ignoring empty submission");
            return Err(Rejected::EmptyInput);
        }
        if self.state.is_busy() {
            debug!("Ignoring submission while request is in flight");
            return Err(Rejected::Busy);
        }

        self.state.append(Turn::user(text));
        self.state.set_busy(true);
        self.state.take_pending_input();

        let id = NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed);
        self.in_flight = Some(id);

        let payload = encode(self.state.transcript());
        info!(
            "Request {id} accepted: {} turns in transcript",
            payload.contents.len()
        );
        self.publish();

        Ok(PendingRequest { id, payload })
    }

    /// Submit whatever is in the pending input.
    pub fn submit_pending(&mut self) -> Result<PendingRequest, Rejected> {
        let text = self.state.pending_input().to_string();
        self.begin(&text)
    }

    /// Run the transport call for `request`.
    ///
    /// The future does not borrow the controller, so the caller can keep
    /// handling input while it runs.
    pub fn dispatch(&self, request: PendingRequest) -> CompletionFuture {
        let transport = Arc::clone(&self.transport);
        Box::pin(async move {
            let result = transport.send(request.payload()).await;
            request.complete(result)
        })
    }

    /// Reconcile a completed request into the transcript.
    pub fn resolve(&mut self, completion: Completion) -> Result<TurnOutcome, SessionError> {
        if self.in_flight != Some(completion.id) {
            warn!("Discarding completion for unknown request {}", completion.id);
            return Err(SessionError::UnknownRequest(completion.id));
        }

        Ok(self.finish(completion.id, completion.result))
    }

    /// Give up on the request in flight, for instance after its
    /// `CompletionFuture` was dropped. Appends an error turn and clears busy.
    pub fn abandon(&mut self, id: u64) -> Result<TurnOutcome, SessionError> {
        if self.in_flight != Some(id) {
            warn!("Cannot abandon unknown request {id}");
            return Err(SessionError::UnknownRequest(id));
        }

        warn!("Request {id} abandoned");
        Ok(self.settle(id, TurnOutcome::failed(ABANDONED.to_string())))
    }

    /// Run a whole cycle: begin, call the transport, resolve.
    ///
    /// Dropping the returned future before it completes abandons the request,
    /// so the session is idle again either way.
    pub async fn submit(&mut self, text: &str) -> Result<TurnOutcome, Rejected> {
        let request = self.begin(text)?;
        let transport = Arc::clone(&self.transport);
        let mut guard = AbandonOnDrop {
            controller: self,
            id: Some(request.id),
        };

        let result = transport.send(request.payload()).await;

        guard.id = None;
        Ok(guard.controller.finish(request.id, result))
    }

    fn finish(&mut self, id: u64, result: Result<ServiceResponse, TransportError>) -> TurnOutcome {
        let outcome = match result {
            Ok(response) => match decode(&response) {
                Ok(Decoded::Reply(turn)) => TurnOutcome::Replied(turn),
                Ok(Decoded::Fallback { turn, reason }) => {
                    warn!("Request {id} returned no usable content: {reason}");
                    TurnOutcome::SoftFailure { turn, reason }
                }
                Err(e) => {
                    warn!("Request {id} returned an undecodable body: {e}");
                    TurnOutcome::failed(e.to_string())
                }
            },
            Err(e) => {
                warn!("Request {id} failed: {e}");
                TurnOutcome::failed(e.to_string())
            }
        };
        self.settle(id, outcome)
    }

    fn settle(&mut self, id: u64, outcome: TurnOutcome) -> TurnOutcome {
        self.state.append(outcome.turn().clone());
        self.state.set_busy(false);
        self.in_flight = None;
        debug!(
            "Request {id} resolved, transcript has {} turns",
            self.state.transcript().len()
        );
        self.publish();

        outcome
    }

    fn publish(&self) {
        self.observers.send_replace(self.state.snapshot());
    }
}

/// Settles the request of an interrupted `submit`.
struct AbandonOnDrop<'a, T>
where
    T: Transport + ?Sized + 'static,
{
    controller: &'a mut SessionController<T>,
    id: Option<u64>,
}

impl<T> Drop for AbandonOnDrop<'_, T>
where
    T: Transport + ?Sized + 'static,
{
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            let _ = self.controller.abandon(id);
        }
    }
}
