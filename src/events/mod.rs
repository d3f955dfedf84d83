//! Structured-event channel
//!
//! Wraps the WebRTC data channel(s) of one connection into a single logical
//! duplex channel for JSON application messages, distinct from the audio
//! media path. Best-effort: sends are dropped until the channel opens,
//! inbound frames that do not parse as JSON are dropped, and ordering is
//! whatever the underlying transport provides within one connection.

mod channel;
mod messages;

pub use channel::EventChannel;
pub use messages::{classify, InboundEvent};
