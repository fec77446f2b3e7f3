//! Integration tests for the session controller's request cycle.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use parley_core::{
    SOFT_FAILURE_TEXT, ServiceResponse, SoftFailure, Speaker, Transcript, Transport,
    TransportError, Turn, WirePayload, encode,
};
use parley_session::{Rejected, SessionConfig, SessionController, SessionError, TurnOutcome};
use serde_json::{Value, json};
use tokio::sync::oneshot;

type Reply = Result<ServiceResponse, TransportError>;

/// Replies from a fixed script and records every payload it was sent.
struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    seen: Mutex<Vec<WirePayload>>,
}

impl ScriptedTransport {
    fn new(replies: impl IntoIterator<Item = Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().collect()),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn seen(&self) -> Vec<WirePayload> {
        self.seen.lock().expect("payload log poisoned").clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, payload: &WirePayload) -> Result<ServiceResponse, TransportError> {
        self.seen
            .lock()
            .expect("payload log poisoned")
            .push(payload.clone());
        self.replies
            .lock()
            .expect("script poisoned")
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::network("script exhausted")))
    }
}

/// Holds the reply until the test releases it.
struct GatedTransport {
    gate: tokio::sync::Mutex<Option<oneshot::Receiver<Reply>>>,
}

#[async_trait]
impl Transport for GatedTransport {
    async fn send(&self, _payload: &WirePayload) -> Result<ServiceResponse, TransportError> {
        let rx = self.gate.lock().await.take();
        match rx {
            Some(rx) => rx
                .await
                .unwrap_or_else(|_| Err(TransportError::network("gate dropped"))),
            None => Err(TransportError::network("gate already used")),
        }
    }
}

/// Never answers within a test's lifetime.
struct StalledTransport;

#[async_trait]
impl Transport for StalledTransport {
    async fn send(&self, _payload: &WirePayload) -> Result<ServiceResponse, TransportError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(ServiceResponse::with_text("too late"))
    }
}

fn config() -> SessionConfig {
    SessionConfig::new("http://localhost/v1beta/models/test:generateContent")
}

fn roles_and_texts(transcript: &Transcript) -> Vec<(Speaker, String)> {
    transcript
        .iter()
        .map(|t| (t.role(), t.text().to_string()))
        .collect()
}

#[tokio::test]
async fn hello_round_trip() {
    let transport = ScriptedTransport::new([Ok(ServiceResponse::with_text("Hi there"))]);
    let mut controller = SessionController::new(Arc::clone(&transport), config());

    let request = controller.begin("Hello").expect("submission accepted");
    assert_eq!(
        roles_and_texts(controller.transcript()),
        [(Speaker::User, "Hello".to_string())]
    );
    assert!(controller.is_busy());

    let completion = controller.dispatch(request).await;
    let outcome = controller.resolve(completion).expect("completion matches");

    assert_eq!(outcome, TurnOutcome::Replied(Turn::model("Hi there")));
    assert_eq!(
        roles_and_texts(controller.transcript()),
        [
            (Speaker::User, "Hello".to_string()),
            (Speaker::Model, "Hi there".to_string()),
        ]
    );
    assert!(!controller.is_busy());

    let sent = transport.seen();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        serde_json::to_value(&sent[0]).expect("payload serializes"),
        json!({ "contents": [{ "role": "user", "parts": [{ "text": "Hello" }] }] })
    );
}

#[tokio::test]
async fn submission_while_busy_is_ignored() {
    let transport = ScriptedTransport::new([Ok(ServiceResponse::with_text("first reply"))]);
    let mut controller = SessionController::new(transport, config());

    let request = controller.begin("first").expect("submission accepted");
    let before = controller.snapshot();

    assert_eq!(controller.begin("second"), Err(Rejected::Busy));
    assert_eq!(controller.submit("third").await, Err(Rejected::Busy));

    assert_eq!(controller.snapshot(), before);
    assert!(controller.is_busy());

    let completion = controller.dispatch(request).await;
    controller.resolve(completion).expect("completion matches");
    assert_eq!(controller.transcript().len(), 2);
    assert!(!controller.is_busy());
}

#[tokio::test]
async fn blank_submission_is_ignored() {
    let transport = ScriptedTransport::new([]);
    let mut controller = SessionController::new(Arc::clone(&transport), config());
    controller.set_pending_input("keep me");
    let before = controller.snapshot();

    assert_eq!(controller.begin("   \n\t"), Err(Rejected::EmptyInput));
    assert_eq!(controller.submit("").await, Err(Rejected::EmptyInput));

    assert_eq!(controller.snapshot(), before);
    assert!(transport.seen().is_empty());
}

#[tokio::test]
async fn transport_failure_becomes_error_turn() {
    let transport =
        ScriptedTransport::new([Err(TransportError::http(500, "Internal error"))]);
    let mut controller = SessionController::new(transport, config());

    let outcome = controller.submit("Hello").await.expect("submission accepted");

    let TurnOutcome::Failed { turn, error } = outcome else {
        panic!("expected a failed outcome");
    };
    assert_eq!(turn.role(), Speaker::Model);
    assert!(turn.text().starts_with("Error: "));
    assert!(turn.text().contains("500"));
    assert!(error.contains("Internal error"));
    assert!(!controller.is_busy());
    assert_eq!(controller.transcript().len(), 2);
}

#[tokio::test]
async fn empty_candidates_become_apology_turn() {
    let transport = ScriptedTransport::new([Ok(ServiceResponse::new(json!({ "candidates": [] })))]);
    let mut controller = SessionController::new(transport, config());

    let outcome = controller.submit("Hello").await.expect("submission accepted");

    assert_eq!(
        outcome,
        TurnOutcome::SoftFailure {
            turn: Turn::model(SOFT_FAILURE_TEXT),
            reason: SoftFailure::NoCandidates,
        }
    );
    assert_eq!(
        controller.transcript().last(),
        Some(&Turn::model(SOFT_FAILURE_TEXT))
    );
    assert!(!controller.is_busy());
}

#[tokio::test]
async fn undecodable_body_becomes_error_turn() {
    let transport = ScriptedTransport::new([Ok(ServiceResponse::new(Value::Null))]);
    let mut controller = SessionController::new(transport, config());

    let outcome = controller.submit("Hello").await.expect("submission accepted");

    assert!(matches!(outcome, TurnOutcome::Failed { .. }));
    let last = controller.transcript().last().expect("model turn appended");
    assert!(last.text().starts_with("Error: "));
    assert!(last.text().contains("null"));
    assert!(!controller.is_busy());
}

#[tokio::test]
async fn every_submission_adds_exactly_two_turns() {
    let transport = ScriptedTransport::new([
        Ok(ServiceResponse::with_text("one")),
        Err(TransportError::network("connection reset")),
        Ok(ServiceResponse::new(json!({}))),
        Ok(ServiceResponse::new(json!("text"))),
    ]);
    let mut controller = SessionController::new(transport, config());

    for (i, text) in ["a", "b", "c", "d"].into_iter().enumerate() {
        let request = controller.begin(text).expect("submission accepted");
        assert_eq!(controller.transcript().len(), i * 2 + 1);

        let completion = controller.dispatch(request).await;
        controller.resolve(completion).expect("completion matches");
        assert_eq!(controller.transcript().len(), i * 2 + 2);
        assert!(!controller.is_busy());
    }

    let roles: Vec<Speaker> = controller.transcript().iter().map(Turn::role).collect();
    assert_eq!(
        roles,
        [
            Speaker::User,
            Speaker::Model,
            Speaker::User,
            Speaker::Model,
            Speaker::User,
            Speaker::Model,
            Speaker::User,
            Speaker::Model,
        ]
    );
}

#[tokio::test]
async fn full_transcript_is_resent_each_turn() {
    let transport = ScriptedTransport::new([
        Err(TransportError::http(503, "unavailable")),
        Ok(ServiceResponse::with_text("second answer")),
    ]);
    let mut controller = SessionController::new(Arc::clone(&transport), config());

    controller.submit("first").await.expect("submission accepted");
    let transcript_before_second = controller.transcript().clone();
    controller.submit("second").await.expect("submission accepted");

    let sent = transport.seen();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].contents.len(), 1);
    assert_eq!(sent[1].contents.len(), 3);
    assert_eq!(
        sent[1],
        encode(&transcript_before_second.append(Turn::user("second")))
    );
    assert_eq!(sent[1].contents[1].role, Speaker::Model);
    assert!(sent[1].contents[1].parts[0].text.contains("503"));
}

#[tokio::test]
async fn input_is_rejected_while_request_runs_in_background() {
    let (release, gate) = oneshot::channel();
    let transport = Arc::new(GatedTransport {
        gate: tokio::sync::Mutex::new(Some(gate)),
    });
    let mut controller = SessionController::new(transport, config());

    let request = controller.begin("Hello").expect("submission accepted");
    let running = tokio::spawn(controller.dispatch(request));

    controller.set_pending_input("typed while waiting");
    assert_eq!(controller.begin("again"), Err(Rejected::Busy));
    assert_eq!(controller.transcript().len(), 1);

    release
        .send(Ok(ServiceResponse::with_text("Hi there")))
        .expect("transport still waiting");
    let completion = running.await.expect("dispatch task finished");
    controller.resolve(completion).expect("completion matches");

    assert_eq!(controller.transcript().len(), 2);
    assert_eq!(controller.snapshot().pending_input, "typed while waiting");

    let request = controller.submit_pending().expect("draft submitted");
    assert_eq!(controller.snapshot().pending_input, "");
    assert_eq!(
        controller.transcript().last(),
        Some(&Turn::user("typed while waiting"))
    );
    assert_eq!(request.payload().contents.len(), 3);
}

#[tokio::test]
async fn completion_for_another_request_is_refused() {
    let transport = ScriptedTransport::new([
        Ok(ServiceResponse::with_text("a")),
        Ok(ServiceResponse::with_text("b")),
    ]);
    let mut first = SessionController::new(Arc::clone(&transport), config());
    let mut second = SessionController::new(Arc::clone(&transport), config());

    // Both sessions are fresh: each has exactly one request in flight.
    let stray = first.begin("question to first").expect("submission accepted");
    let own = second.begin("question to second").expect("submission accepted");
    assert_ne!(stray.id(), own.id());
    let before = second.snapshot();

    let completion = first.dispatch(stray).await;
    let id = completion.id();
    assert_eq!(second.resolve(completion), Err(SessionError::UnknownRequest(id)));

    assert_eq!(second.snapshot(), before);
    assert!(second.is_busy());

    let completion = second.dispatch(own).await;
    let outcome = second.resolve(completion).expect("own completion matches");
    assert_eq!(outcome, TurnOutcome::Replied(Turn::model("b")));
    assert_eq!(
        roles_and_texts(second.transcript()),
        [
            (Speaker::User, "question to second".to_string()),
            (Speaker::Model, "b".to_string()),
        ]
    );
}

#[tokio::test]
async fn interrupted_submit_returns_session_to_idle() {
    let mut controller = SessionController::new(Arc::new(StalledTransport), config());

    let interrupted =
        tokio::time::timeout(Duration::from_millis(50), controller.submit("Hello")).await;
    assert!(interrupted.is_err());

    assert!(!controller.is_busy());
    assert_eq!(controller.transcript().len(), 2);
    let last = controller.transcript().last().expect("error turn appended");
    assert_eq!(last.role(), Speaker::Model);
    assert!(last.text().starts_with("Error: request abandoned"));

    assert!(controller.begin("Hello again").is_ok());
}

#[tokio::test]
async fn dropped_dispatch_can_be_abandoned() {
    let mut controller = SessionController::new(Arc::new(StalledTransport), config());

    let request = controller.begin("Hello").expect("submission accepted");
    let id = request.id();
    drop(controller.dispatch(request));
    assert!(controller.is_busy());

    let outcome = controller.abandon(id).expect("request is in flight");
    assert!(matches!(outcome, TurnOutcome::Failed { .. }));
    assert!(!controller.is_busy());
    assert_eq!(controller.transcript().len(), 2);

    assert_eq!(controller.abandon(id), Err(SessionError::UnknownRequest(id)));
    assert_eq!(controller.transcript().len(), 2);
}

#[tokio::test]
async fn subscribers_observe_busy_transitions() {
    let transport = ScriptedTransport::new([Ok(ServiceResponse::with_text("Hi there"))]);
    let mut controller = SessionController::new(transport, config());
    let mut updates = controller.subscribe();
    assert!(!updates.borrow_and_update().busy);

    let request = controller.begin("Hello").expect("submission accepted");
    assert!(updates.has_changed().expect("controller alive"));
    {
        let snapshot = updates.borrow_and_update();
        assert!(snapshot.busy);
        assert_eq!(snapshot.transcript.len(), 1);
    }

    let completion = controller.dispatch(request).await;
    controller.resolve(completion).expect("completion matches");

    let snapshot = updates.borrow_and_update().clone();
    assert!(!snapshot.busy);
    assert_eq!(snapshot.transcript.len(), 2);
    assert_eq!(snapshot.completed_exchanges(), 1);
}
