//! Audio pipeline
//!
//! Local microphone capture and remote audio output for one connection:
//! - `MicrophoneBackend` / `MicrophoneFactory`: capture behind a trait so
//!   hosts (and tests) can supply their own source; a cpal-based default
//!   backend captures the system's default input device
//! - `AudioPipeline`: Opus-encodes captured frames and writes them into the
//!   connection's audio sender
//! - Remote track payloads are forwarded to an optional playback sink;
//!   rendering them is the host's concern

mod capture;
mod mic;
mod pipeline;

pub use capture::{CpalMicrophone, SystemMicrophoneFactory};
pub use mic::{
    AudioFrame, MicError, MicrophoneBackend, MicrophoneFactory, FRAME_DURATION_MS,
    PIPELINE_SAMPLE_RATE, SAMPLES_PER_FRAME,
};
pub use pipeline::{drain_remote_track, AudioPipeline, RemoteAudioPacket};
