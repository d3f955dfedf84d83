// Integration tests for the session controller state machine.
//
// Scripted fakes implement the component traits so the full lifecycle can be
// driven without a network, a speech endpoint, or a microphone.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;

use voicelink::{
    AudioFrame, EphemeralCredential, MicError, MicrophoneBackend, MicrophoneFactory,
    MintedSession, PeerConnector, PeerError, PeerEvent, PeerLink, SessionConfig,
    SessionController, SessionError, SessionEvent, SessionStatus, TokenError, TokenMinter,
};

#[derive(Default)]
struct FakeMinter {
    mints: AtomicUsize,
    fail: AtomicBool,
    model: std::sync::Mutex<Option<String>>,
}

#[async_trait::async_trait]
impl TokenMinter for FakeMinter {
    async fn mint(&self) -> Result<MintedSession, TokenError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TokenError::MintFailed("minting endpoint returned 503".into()));
        }
        let n = self.mints.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MintedSession {
            credential: EphemeralCredential::new(format!("ek_test_{n}")),
            model: self.model.lock().unwrap().clone(),
        })
    }
}

#[derive(Default)]
struct LinkState {
    closed: AtomicBool,
    mic_live: AtomicBool,
    sent: std::sync::Mutex<Vec<Value>>,
}

struct FakeLink {
    state: Arc<LinkState>,
}

#[async_trait::async_trait]
impl PeerLink for FakeLink {
    async fn send_event(&self, payload: &Value) {
        self.state.sent.lock().unwrap().push(payload.clone());
    }

    async fn start_microphone(&self, mut mic: Box<dyn MicrophoneBackend>) -> Result<(), MicError> {
        let _frames = mic.start().await?;
        self.state.mic_live.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.state.mic_live.store(false, Ordering::SeqCst);
        self.state.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct FakeConnector {
    opens: AtomicUsize,
    fail_next: AtomicBool,
    gate: std::sync::Mutex<Option<Arc<Notify>>>,
    credentials: std::sync::Mutex<Vec<String>>,
    links: std::sync::Mutex<Vec<Arc<LinkState>>>,
    peer_events: std::sync::Mutex<Option<mpsc::UnboundedSender<PeerEvent>>>,
}

impl FakeConnector {
    fn link(&self, index: usize) -> Arc<LinkState> {
        Arc::clone(&self.links.lock().unwrap()[index])
    }

    fn events(&self) -> mpsc::UnboundedSender<PeerEvent> {
        self.peer_events.lock().unwrap().clone().expect("no open link")
    }
}

#[async_trait::async_trait]
impl PeerConnector for FakeConnector {
    async fn connect(
        &self,
        credential: EphemeralCredential,
        _model: &str,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Box<dyn PeerLink>, PeerError> {
        self.credentials
            .lock()
            .unwrap()
            .push(credential.secret().to_string());

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(PeerError::NegotiationFailed("no usable answer".into()));
        }

        self.opens.fetch_add(1, Ordering::SeqCst);
        *self.peer_events.lock().unwrap() = Some(events);

        let state = Arc::new(LinkState::default());
        self.links.lock().unwrap().push(Arc::clone(&state));
        Ok(Box::new(FakeLink { state }))
    }
}

struct FakeMic {
    deny: bool,
    capturing: bool,
}

#[async_trait::async_trait]
impl MicrophoneBackend for FakeMic {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, MicError> {
        if self.deny {
            return Err(MicError::AccessDenied("permission prompt rejected".into()));
        }
        self.capturing = true;
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), MicError> {
        self.capturing = false;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "fake"
    }
}

#[derive(Default)]
struct FakeMicFactory {
    deny: AtomicBool,
    created: AtomicUsize,
}

impl MicrophoneFactory for FakeMicFactory {
    fn create(&self) -> Result<Box<dyn MicrophoneBackend>, MicError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeMic {
            deny: self.deny.load(Ordering::SeqCst),
            capturing: false,
        }))
    }
}

struct Harness {
    controller: Arc<SessionController>,
    minter: Arc<FakeMinter>,
    connector: Arc<FakeConnector>,
    mics: Arc<FakeMicFactory>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn harness() -> Harness {
    init_tracing();
    let minter = Arc::new(FakeMinter::default());
    let connector = Arc::new(FakeConnector::default());
    let mics = Arc::new(FakeMicFactory::default());
    let controller = Arc::new(SessionController::with_components(
        SessionConfig::default(),
        minter.clone(),
        connector.clone(),
        mics.clone(),
    ));
    Harness {
        controller,
        minter,
        connector,
        mics,
    }
}

async fn wait_for_status(controller: &SessionController, wanted: SessionStatus) {
    let mut rx = controller.subscribe_status();
    timeout(Duration::from_secs(5), rx.wait_for(|s| *s == wanted))
        .await
        .expect("timed out waiting for status")
        .expect("status channel closed");
}

fn drain_status_events(rx: &mut tokio::sync::broadcast::Receiver<SessionEvent>) -> Vec<SessionStatus> {
    let mut statuses = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let SessionEvent::Status(status) = event {
            statuses.push(status);
        }
    }
    statuses
}

#[tokio::test]
async fn connect_is_idempotent_and_mints_once() {
    let h = harness();

    h.controller.connect().await.unwrap();
    h.controller.connect().await.unwrap();
    h.controller.connect().await.unwrap();

    assert_eq!(h.minter.mints.load(Ordering::SeqCst), 1);
    assert_eq!(h.connector.opens.load(Ordering::SeqCst), 1);
    assert_eq!(h.controller.status(), SessionStatus::Ready);

    let snapshot = h.controller.snapshot().await;
    assert!(snapshot.id.is_some());
    assert_eq!(
        snapshot.remote_model,
        Some(SessionConfig::default().default_model)
    );
}

#[tokio::test]
async fn connect_while_connecting_is_a_noop() {
    let h = harness();
    let gate = Arc::new(Notify::new());
    *h.connector.gate.lock().unwrap() = Some(Arc::clone(&gate));

    let controller = Arc::clone(&h.controller);
    let first = tokio::spawn(async move { controller.connect().await });

    wait_for_status(&h.controller, SessionStatus::Connecting).await;

    // Second connect while the first is mid-negotiation: immediate no-op.
    h.controller.connect().await.unwrap();
    assert_eq!(h.minter.mints.load(Ordering::SeqCst), 1);

    gate.notify_one();
    first.await.unwrap().unwrap();

    assert_eq!(h.controller.status(), SessionStatus::Ready);
    assert_eq!(h.minter.mints.load(Ordering::SeqCst), 1);
    assert_eq!(h.connector.opens.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stop_is_idempotent_even_before_connect() {
    let h = harness();

    h.controller.stop().await;
    assert_eq!(h.controller.status(), SessionStatus::Stopped);

    h.controller.stop().await;
    assert_eq!(h.controller.status(), SessionStatus::Stopped);
}

#[tokio::test]
async fn stop_releases_the_connection() {
    let h = harness();

    h.controller.connect().await.unwrap();
    h.controller.stop().await;

    assert_eq!(h.controller.status(), SessionStatus::Stopped);
    assert!(h.connector.link(0).closed.load(Ordering::SeqCst));

    h.controller.stop().await;
    assert_eq!(h.controller.status(), SessionStatus::Stopped);
}

#[tokio::test]
async fn mint_failure_reaches_error_without_opening() {
    let h = harness();
    h.minter.fail.store(true, Ordering::SeqCst);

    let err = h.controller.connect().await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Token(TokenError::MintFailed(_))
    ));

    assert_eq!(h.controller.status(), SessionStatus::Error);
    assert_eq!(h.connector.opens.load(Ordering::SeqCst), 0);
    assert!(h.controller.snapshot().await.last_error.is_some());
}

#[tokio::test]
async fn signaling_failure_never_reuses_the_credential() {
    let h = harness();
    h.connector.fail_next.store(true, Ordering::SeqCst);

    let err = h.controller.connect().await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Peer(PeerError::NegotiationFailed(_))
    ));
    assert_eq!(h.controller.status(), SessionStatus::Error);

    // Retry is a caller decision; a new connect starts a new session with a
    // freshly minted credential.
    h.controller.connect().await.unwrap();
    assert_eq!(h.controller.status(), SessionStatus::Ready);

    let credentials = h.connector.credentials.lock().unwrap().clone();
    assert_eq!(credentials.len(), 2);
    assert_ne!(credentials[0], credentials[1]);
    assert_eq!(h.minter.mints.load(Ordering::SeqCst), 2);

    // The failed attempt cleared last_error on the way back out of `error`.
    assert!(h.controller.snapshot().await.last_error.is_none());
}

#[tokio::test]
async fn start_mic_from_idle_passes_through_ready() {
    let h = harness();
    let mut events = h.controller.subscribe_events();

    h.controller.start_mic().await.unwrap();

    assert_eq!(h.controller.status(), SessionStatus::Live);
    assert!(h.connector.link(0).mic_live.load(Ordering::SeqCst));

    let statuses = drain_status_events(&mut events);
    assert_eq!(
        statuses,
        vec![
            SessionStatus::Connecting,
            SessionStatus::Ready,
            SessionStatus::Live
        ]
    );
}

#[tokio::test]
async fn mic_denial_leaves_session_ready_and_retryable() {
    let h = harness();
    h.mics.deny.store(true, Ordering::SeqCst);

    let err = h.controller.start_mic().await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Microphone(MicError::AccessDenied(_))
    ));
    assert_eq!(h.controller.status(), SessionStatus::Ready);
    assert!(!h.connector.link(0).mic_live.load(Ordering::SeqCst));

    // Permission granted on a later attempt.
    h.mics.deny.store(false, Ordering::SeqCst);
    h.controller.start_mic().await.unwrap();
    assert_eq!(h.controller.status(), SessionStatus::Live);
    assert!(h.connector.link(0).mic_live.load(Ordering::SeqCst));
    assert_eq!(h.mics.created.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn teardown_mid_connecting_releases_everything() {
    let h = harness();
    let gate = Arc::new(Notify::new());
    *h.connector.gate.lock().unwrap() = Some(Arc::clone(&gate));

    let controller = Arc::clone(&h.controller);
    let pending = tokio::spawn(async move { controller.connect().await });

    wait_for_status(&h.controller, SessionStatus::Connecting).await;
    h.controller.stop().await;
    assert_eq!(h.controller.status(), SessionStatus::Stopped);

    // Negotiation finishes late; the superseded attempt must release the
    // connection it produced instead of installing it.
    gate.notify_one();
    pending.await.unwrap().unwrap();

    assert_eq!(h.controller.status(), SessionStatus::Stopped);
    assert!(h.connector.link(0).closed.load(Ordering::SeqCst));
    assert!(!h.connector.link(0).mic_live.load(Ordering::SeqCst));
    assert_eq!(h.mics.created.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn send_user_event_is_a_noop_without_a_connection() {
    let h = harness();

    // Idle: nothing to send on, nothing panics.
    h.controller.send_user_event(json!({"type": "ping"})).await;

    h.controller.connect().await.unwrap();
    h.controller
        .send_user_event(json!({"type": "response.create"}))
        .await;
    assert_eq!(h.connector.link(0).sent.lock().unwrap().len(), 1);

    h.controller.stop().await;
    h.controller.send_user_event(json!({"type": "ping"})).await;
    assert_eq!(h.connector.link(0).sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn connection_closed_surfaces_as_asynchronous_error() {
    let h = harness();
    h.controller.connect().await.unwrap();

    h.connector
        .events()
        .send(PeerEvent::Closed("ICE state failed".into()))
        .unwrap();

    wait_for_status(&h.controller, SessionStatus::Error).await;

    let snapshot = h.controller.snapshot().await;
    let last_error = snapshot.last_error.expect("last_error set");
    assert!(last_error.contains("connection closed"));
    assert!(h.connector.link(0).closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn transcript_keeps_latest_fragment_only() {
    let h = harness();
    h.controller.connect().await.unwrap();
    let mut events = h.controller.subscribe_events();

    let tx = h.connector.events();
    tx.send(PeerEvent::Transcript("hel".into())).unwrap();
    tx.send(PeerEvent::Transcript("lo".into())).unwrap();
    tx.send(PeerEvent::Message(json!({"type": "response.done"})))
        .unwrap();

    // Wait until all three routed through the pump.
    let mut seen = 0;
    while seen < 3 {
        match timeout(Duration::from_secs(5), events.recv()).await {
            Ok(Ok(
                SessionEvent::TranscriptDelta(_) | SessionEvent::Server(_),
            )) => seen += 1,
            Ok(Ok(_)) => {}
            other => panic!("event feed ended early: {:?}", other.is_err()),
        }
    }

    let snapshot = h.controller.snapshot().await;
    assert_eq!(snapshot.transcript.as_deref(), Some("lo"));
    assert_eq!(snapshot.transcript_fragments, 2);
    assert_eq!(snapshot.server_events, 1);
    assert_eq!(snapshot.last_message.unwrap()["type"], "response.done");
    assert_eq!(h.controller.status(), SessionStatus::Ready);
}

#[tokio::test]
async fn minted_model_overrides_configured_default() {
    let h = harness();
    *h.minter.model.lock().unwrap() = Some("gpt-4o-realtime-custom".into());

    h.controller.connect().await.unwrap();

    let snapshot = h.controller.snapshot().await;
    assert_eq!(
        snapshot.remote_model.as_deref(),
        Some("gpt-4o-realtime-custom")
    );
}

#[tokio::test]
async fn each_connect_gets_a_fresh_session_id() {
    let h = harness();

    h.controller.connect().await.unwrap();
    let first = h.controller.snapshot().await.id.unwrap();

    h.controller.stop().await;
    h.controller.connect().await.unwrap();
    let second = h.controller.snapshot().await.id.unwrap();

    assert_ne!(first, second);
    assert_eq!(h.minter.mints.load(Ordering::SeqCst), 2);
}
