//! Session lifecycle management
//!
//! This module provides the `SessionController` abstraction that manages:
//! - Credential minting and connection negotiation (`connect`)
//! - Microphone attachment (`start_mic`)
//! - Structured event sending (`send_user_event`)
//! - Deterministic teardown from any state (`stop`)
//! - Status/event feeds and snapshot/statistics accessors
//!
//! The state machine is `idle → connecting → ready → live`, with `stopped`
//! and `error` reachable from any non-idle state.

mod config;
mod controller;
mod state;

pub use config::{SessionConfig, DEFAULT_MODEL_ENV};
pub use controller::{SessionController, SessionError, SessionEvent};
pub use state::{SessionSnapshot, SessionStats, SessionStatus};
