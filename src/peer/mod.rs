//! Peer connection management
//!
//! Owns the underlying WebRTC connection for one session: ICE configuration,
//! data-channel-first negotiation, the one-shot HTTP signaling exchange, and
//! track/channel wiring. The `PeerConnector`/`PeerLink` traits are the seam
//! the session controller depends on; `WebRtcConnector` is the production
//! implementation.
//!
//! Failures that occur after `connect()` has returned (ICE drops, remote
//! hangup) cannot be return values; they travel out-of-band as
//! [`PeerEvent::Closed`] on the event channel handed to `connect()`.

mod connection;
mod signaling;

pub use connection::{WebRtcConnector, WebRtcLink};
pub use signaling::{HttpSignaling, SignalingClient};

use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::audio::{MicError, MicrophoneBackend, RemoteAudioPacket};
use crate::token::EphemeralCredential;

#[derive(Error, Debug)]
pub enum PeerError {
    /// The signaling exchange did not produce a usable answer, or the
    /// connection could not be assembled up to that point.
    #[error("negotiation failed: {0}")]
    NegotiationFailed(String),

    /// The connection entered a closed or failed state after `connect()`
    /// succeeded. Reported asynchronously, never as a return value.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),
}

/// Out-of-band events from an open connection to the session controller.
#[derive(Debug)]
pub enum PeerEvent {
    /// An incremental transcript fragment from the remote endpoint.
    Transcript(String),
    /// Any other structured message from the remote endpoint.
    Message(Value),
    /// The connection dropped after negotiation succeeded.
    Closed(String),
}

/// Connection-level settings, independent of any one session.
#[derive(Debug, Clone)]
pub struct PeerSettings {
    /// Relay/discovery servers for NAT traversal. At least one is required.
    pub ice_servers: Vec<String>,
    /// Optional sink for remote audio payloads; `None` drains and drops.
    pub playback: Option<mpsc::Sender<RemoteAudioPacket>>,
}

impl Default for PeerSettings {
    fn default() -> Self {
        Self {
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            playback: None,
        }
    }
}

/// Opens one connection per call. Consumes the credential by value: a
/// credential authorizes exactly one attempt and is never reused.
#[async_trait::async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(
        &self,
        credential: EphemeralCredential,
        model: &str,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Box<dyn PeerLink>, PeerError>;
}

/// An established connection, exclusively owned by one session until
/// `close()` releases it.
#[async_trait::async_trait]
pub trait PeerLink: Send + Sync {
    /// Best-effort structured send; silently dropped until the event channel
    /// opens or after the link is released.
    async fn send_event(&self, payload: &Value);

    /// Attach microphone capture to the connection's audio sender.
    async fn start_microphone(&self, mic: Box<dyn MicrophoneBackend>) -> Result<(), MicError>;

    /// Stop local tracks and close the connection. Idempotent; safe before
    /// media negotiation has completed.
    async fn close(&self);
}
