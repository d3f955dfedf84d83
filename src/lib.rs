//! Realtime voice session management.
//!
//! Opens and maintains a low-latency, bidirectional audio + structured-event
//! channel between a host application and a remote speech-model endpoint:
//! an ephemeral credential is minted per connection attempt, a WebRTC peer
//! connection is negotiated through a one-shot HTTP signaling exchange, and
//! microphone audio plus a duplex JSON event channel flow over the result.
//!
//! [`SessionController`] is the single entry point; everything else backs it.

pub mod audio;
pub mod config;
pub mod events;
pub mod peer;
pub mod session;
pub mod token;

pub use audio::{
    AudioFrame, AudioPipeline, MicError, MicrophoneBackend, MicrophoneFactory, RemoteAudioPacket,
    SystemMicrophoneFactory,
};
pub use config::Config;
pub use events::{EventChannel, InboundEvent};
pub use peer::{
    HttpSignaling, PeerConnector, PeerError, PeerEvent, PeerLink, PeerSettings, SignalingClient,
    WebRtcConnector,
};
pub use session::{
    SessionConfig, SessionController, SessionError, SessionEvent, SessionSnapshot, SessionStats,
    SessionStatus,
};
pub use token::{EphemeralCredential, HttpTokenBroker, MintedSession, TokenError, TokenMinter};
