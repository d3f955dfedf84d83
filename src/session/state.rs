use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Session lifecycle state.
///
/// Legal edges: `idle → connecting → ready → live`, with `stopped` and
/// `error` reachable from any non-idle state (and from `idle` via an early
/// `stop()`). `connect()` from `stopped` or `error` starts an entirely new
/// session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Connecting,
    Ready,
    Live,
    Stopped,
    Error,
}

impl SessionStatus {
    /// Whether a connection exists or is being established.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Ready | Self::Live)
    }

    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Idle, Stopped)
                | (Connecting, Ready)
                | (Ready, Live)
                | (Connecting | Ready | Live, Stopped)
                | (Connecting | Ready | Live, Error)
                | (Error, Connecting)
                | (Error, Stopped)
                | (Stopped, Connecting)
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Live => "live",
            Self::Stopped => "stopped",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of the session the controller exposes upward.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    /// Client-generated identifier, fresh per connect, never reused.
    pub id: Option<String>,

    pub status: SessionStatus,

    /// Remote speech model negotiated for this session.
    pub remote_model: Option<String>,

    /// Last fatal error; cleared on every transition out of `error`.
    pub last_error: Option<String>,

    /// Most recently received transcript fragment. Not cumulative; callers
    /// wanting history accumulate fragments themselves.
    pub transcript: Option<String>,

    /// Most recent non-transcript structured event from the remote endpoint.
    pub last_message: Option<Value>,

    pub started_at: Option<DateTime<Utc>>,

    /// Transcript fragments received so far.
    pub transcript_fragments: u64,

    /// Non-transcript server events received so far.
    pub server_events: u64,
}

impl SessionSnapshot {
    pub(crate) fn idle() -> Self {
        Self {
            id: None,
            status: SessionStatus::Idle,
            remote_model: None,
            last_error: None,
            transcript: None,
            last_message: None,
            started_at: None,
            transcript_fragments: 0,
            server_events: 0,
        }
    }

    /// A fresh session record carrying over only the current status, which
    /// the controller transitions immediately afterwards.
    pub(crate) fn started(id: String, status: SessionStatus) -> Self {
        Self {
            id: Some(id),
            status,
            started_at: Some(Utc::now()),
            ..Self::idle()
        }
    }
}

/// Statistics about a session, for polling callers
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub status: SessionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub duration_secs: f64,
    pub transcript_fragments: u64,
    pub server_events: u64,
}
