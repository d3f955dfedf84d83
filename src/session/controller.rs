use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::config::SessionConfig;
use super::state::{SessionSnapshot, SessionStats, SessionStatus};
use crate::audio::{MicError, MicrophoneFactory, SystemMicrophoneFactory};
use crate::peer::{
    HttpSignaling, PeerConnector, PeerError, PeerEvent, PeerLink, PeerSettings, WebRtcConnector,
};
use crate::token::{HttpTokenBroker, TokenError, TokenMinter};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error(transparent)]
    Microphone(#[from] MicError),
}

/// Events the controller broadcasts upward to UI layers.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Status(SessionStatus),
    TranscriptDelta(String),
    Server(Value),
    Error(String),
}

/// Everything one session exclusively owns; replaced wholesale on each
/// connect and released atomically on stop. The epoch counter increments on
/// every connect and stop, so an in-flight attempt can detect it was
/// superseded after each await point.
struct Shared {
    epoch: u64,
    snapshot: SessionSnapshot,
    link: Option<Arc<dyn PeerLink>>,
    pump: Option<JoinHandle<()>>,
}

/// Orchestrates token minting, connection negotiation, the event channel,
/// and the audio pipeline into one session lifecycle. The only component
/// the host application talks to.
pub struct SessionController {
    config: SessionConfig,
    minter: Arc<dyn TokenMinter>,
    connector: Arc<dyn PeerConnector>,
    microphones: Arc<dyn MicrophoneFactory>,
    shared: Arc<Mutex<Shared>>,
    status_tx: watch::Sender<SessionStatus>,
    // Keeps the watch channel open so `status_tx.send` always stores the
    // value; with every receiver dropped, tokio's watch discards sends.
    _status_rx: watch::Receiver<SessionStatus>,
    events_tx: broadcast::Sender<SessionEvent>,
}

fn transition(
    shared: &mut Shared,
    status_tx: &watch::Sender<SessionStatus>,
    events_tx: &broadcast::Sender<SessionEvent>,
    next: SessionStatus,
) {
    let prev = shared.snapshot.status;
    if prev == next {
        return;
    }
    debug_assert!(
        prev.can_transition_to(next),
        "illegal session transition {prev} -> {next}"
    );

    if prev == SessionStatus::Error {
        shared.snapshot.last_error = None;
    }
    shared.snapshot.status = next;

    debug!(from = %prev, to = %next, "Session status changed");
    let _ = status_tx.send(next);
    let _ = events_tx.send(SessionEvent::Status(next));
}

impl SessionController {
    /// Controller backed by the production HTTP broker, WebRTC connector,
    /// and system microphone.
    pub fn new(config: SessionConfig) -> Self {
        let minter = Arc::new(HttpTokenBroker::new(config.mint_url.clone()));
        let signaling = Arc::new(HttpSignaling::new(config.endpoint_url.clone()));
        let connector = Arc::new(WebRtcConnector::new(
            PeerSettings {
                ice_servers: config.ice_servers.clone(),
                playback: None,
            },
            signaling,
        ));
        Self::with_components(config, minter, connector, Arc::new(SystemMicrophoneFactory))
    }

    /// Controller over explicit component implementations. Production and
    /// tests plug into the same seams.
    pub fn with_components(
        config: SessionConfig,
        minter: Arc<dyn TokenMinter>,
        connector: Arc<dyn PeerConnector>,
        microphones: Arc<dyn MicrophoneFactory>,
    ) -> Self {
        let (status_tx, _status_rx) = watch::channel(SessionStatus::Idle);
        let (events_tx, _) = broadcast::channel(64);

        Self {
            config,
            minter,
            connector,
            microphones,
            shared: Arc::new(Mutex::new(Shared {
                epoch: 0,
                snapshot: SessionSnapshot::idle(),
                link: None,
                pump: None,
            })),
            status_tx,
            _status_rx,
            events_tx,
        }
    }

    fn set(&self, shared: &mut Shared, next: SessionStatus) {
        transition(shared, &self.status_tx, &self.events_tx, next);
    }

    /// Establish a connection: mint one credential, negotiate one peer
    /// connection, wire the event channel. Idempotent (a no-op while a
    /// session is already `connecting`, `ready`, or `live`). Exactly one
    /// credential is minted per attempt and never reused.
    pub async fn connect(&self) -> Result<(), SessionError> {
        let epoch = {
            let mut shared = self.shared.lock().await;
            if shared.snapshot.status.is_active() {
                debug!("connect() while session active; no-op");
                return Ok(());
            }

            shared.epoch += 1;
            let id = format!("session-{}", uuid::Uuid::new_v4());
            info!(session = %id, "Starting session");
            shared.snapshot = SessionSnapshot::started(id, shared.snapshot.status);
            self.set(&mut shared, SessionStatus::Connecting);
            shared.epoch
        };

        let minted = match self.minter.mint().await {
            Ok(minted) => minted,
            Err(e) => {
                self.fail(epoch, e.to_string()).await;
                return Err(e.into());
            }
        };

        if self.superseded(epoch).await {
            debug!("Session superseded after mint; abandoning connect");
            return Ok(());
        }

        let model = minted
            .model
            .clone()
            .unwrap_or_else(|| self.config.default_model.clone());
        {
            let mut shared = self.shared.lock().await;
            if shared.epoch == epoch {
                shared.snapshot.remote_model = Some(model.clone());
            }
        }

        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let link = match self
            .connector
            .connect(minted.credential, &model, peer_tx)
            .await
        {
            Ok(link) => link,
            Err(e) => {
                self.fail(epoch, e.to_string()).await;
                return Err(e.into());
            }
        };
        let link: Arc<dyn PeerLink> = Arc::from(link);

        let mut shared = self.shared.lock().await;
        if shared.epoch != epoch {
            drop(shared);
            debug!("Session superseded during negotiation; releasing connection");
            link.close().await;
            return Ok(());
        }

        shared.link = Some(Arc::clone(&link));
        shared.pump = Some(tokio::spawn(Self::pump(
            peer_rx,
            Arc::clone(&self.shared),
            self.status_tx.clone(),
            self.events_tx.clone(),
            epoch,
        )));
        self.set(&mut shared, SessionStatus::Ready);

        Ok(())
    }

    /// Start transmitting microphone audio. From `idle` this connects first
    /// and proceeds to capture only once `ready`. Microphone denial is
    /// non-fatal: the session stays `ready` and the call may be retried.
    pub async fn start_mic(&self) -> Result<(), SessionError> {
        self.connect().await?;

        let (link, epoch) = {
            let shared = self.shared.lock().await;
            match shared.snapshot.status {
                SessionStatus::Live => return Ok(()),
                SessionStatus::Ready => match &shared.link {
                    Some(link) => (Arc::clone(link), shared.epoch),
                    None => return Ok(()),
                },
                // Torn down while connecting; nothing to capture on.
                _ => return Ok(()),
            }
        };

        let mic = self.microphones.create()?;

        match link.start_microphone(mic).await {
            Ok(()) => {
                let mut shared = self.shared.lock().await;
                if shared.epoch == epoch && shared.snapshot.status == SessionStatus::Ready {
                    self.set(&mut shared, SessionStatus::Live);
                }
                Ok(())
            }
            Err(e) => {
                warn!("Microphone attach failed: {}", e);
                Err(e.into())
            }
        }
    }

    /// Send a structured event to the remote endpoint. A no-op when no
    /// connection exists; never errors.
    pub async fn send_user_event(&self, payload: Value) {
        let link = {
            let shared = self.shared.lock().await;
            if !matches!(
                shared.snapshot.status,
                SessionStatus::Ready | SessionStatus::Live
            ) {
                debug!("send_user_event without connection; no-op");
                return;
            }
            shared.link.clone()
        };

        if let Some(link) = link {
            link.send_event(&payload).await;
        }
    }

    /// Tear the session down: stop local tracks, close the connection, drop
    /// channel references. Idempotent, and safe from any state including
    /// mid-negotiation (the in-flight connect observes the epoch bump and
    /// releases whatever it created).
    pub async fn stop(&self) {
        let (link, pump) = {
            let mut shared = self.shared.lock().await;
            shared.epoch += 1;
            let link = shared.link.take();
            let pump = shared.pump.take();
            self.set(&mut shared, SessionStatus::Stopped);
            (link, pump)
        };

        if let Some(pump) = pump {
            pump.abort();
        }
        if let Some(link) = link {
            link.close().await;
            info!("Session stopped; resources released");
        }
    }

    pub fn status(&self) -> SessionStatus {
        *self.status_tx.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.shared.lock().await.snapshot.clone()
    }

    pub async fn stats(&self) -> SessionStats {
        let shared = self.shared.lock().await;
        let duration_secs = shared
            .snapshot
            .started_at
            .map(|started| {
                let elapsed = chrono::Utc::now().signed_duration_since(started);
                elapsed.num_milliseconds() as f64 / 1000.0
            })
            .unwrap_or(0.0);

        SessionStats {
            status: shared.snapshot.status,
            started_at: shared.snapshot.started_at,
            duration_secs,
            transcript_fragments: shared.snapshot.transcript_fragments,
            server_events: shared.snapshot.server_events,
        }
    }

    async fn superseded(&self, epoch: u64) -> bool {
        self.shared.lock().await.epoch != epoch
    }

    async fn fail(&self, epoch: u64, message: String) {
        let mut shared = self.shared.lock().await;
        if shared.epoch != epoch {
            return;
        }
        self.set(&mut shared, SessionStatus::Error);
        shared.snapshot.last_error = Some(message.clone());
        let _ = self.events_tx.send(SessionEvent::Error(message));
    }

    /// Routes out-of-band peer events into the snapshot and the broadcast
    /// feed. One pump per established connection; a stale epoch means the
    /// session moved on and the pump exits.
    async fn pump(
        mut rx: mpsc::UnboundedReceiver<PeerEvent>,
        shared: Arc<Mutex<Shared>>,
        status_tx: watch::Sender<SessionStatus>,
        events_tx: broadcast::Sender<SessionEvent>,
        epoch: u64,
    ) {
        while let Some(event) = rx.recv().await {
            match event {
                PeerEvent::Transcript(text) => {
                    let mut s = shared.lock().await;
                    if s.epoch != epoch {
                        break;
                    }
                    s.snapshot.transcript = Some(text.clone());
                    s.snapshot.transcript_fragments += 1;
                    drop(s);
                    let _ = events_tx.send(SessionEvent::TranscriptDelta(text));
                }
                PeerEvent::Message(value) => {
                    let mut s = shared.lock().await;
                    if s.epoch != epoch {
                        break;
                    }
                    s.snapshot.last_message = Some(value.clone());
                    s.snapshot.server_events += 1;
                    drop(s);
                    let _ = events_tx.send(SessionEvent::Server(value));
                }
                PeerEvent::Closed(reason) => {
                    let link = {
                        let mut s = shared.lock().await;
                        if s.epoch != epoch {
                            break;
                        }
                        let message = PeerError::ConnectionClosed(reason).to_string();
                        transition(&mut s, &status_tx, &events_tx, SessionStatus::Error);
                        s.snapshot.last_error = Some(message.clone());
                        let _ = events_tx.send(SessionEvent::Error(message));
                        s.link.take()
                    };
                    if let Some(link) = link {
                        link.close().await;
                    }
                    break;
                }
            }
        }

        debug!("Session event pump stopped");
    }
}
