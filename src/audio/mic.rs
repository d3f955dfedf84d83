use thiserror::Error;
use tokio::sync::mpsc;

/// Sample rate every frame entering the pipeline must carry.
pub const PIPELINE_SAMPLE_RATE: u32 = 48_000;

/// Duration of one pipeline frame.
pub const FRAME_DURATION_MS: u64 = 20;

/// Mono samples per pipeline frame (20ms at 48kHz).
pub const SAMPLES_PER_FRAME: usize = 960;

#[derive(Error, Debug)]
pub enum MicError {
    /// The runtime denied microphone access, or no capture device exists.
    /// Non-fatal for the session: the caller may retry capture later.
    #[error("microphone access denied: {0}")]
    AccessDenied(String),

    /// Capture was granted but the backend failed afterwards.
    #[error("microphone backend error: {0}")]
    Backend(String),
}

/// Audio sample data (16-bit PCM, mono, pipeline rate)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

/// Microphone capture backend trait
///
/// The "runtime" that grants or denies microphone access is the host
/// application; the default implementation captures the system input device
/// via cpal. Backends deliver mono 48kHz frames of exactly
/// [`SAMPLES_PER_FRAME`] samples.
#[async_trait::async_trait]
pub trait MicrophoneBackend: Send + Sync {
    /// Start capturing audio.
    ///
    /// Returns a channel receiver that will receive audio frames. Fails with
    /// [`MicError::AccessDenied`] when the device cannot be acquired.
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, MicError>;

    /// Stop capturing audio. Safe to call regardless of internal state.
    async fn stop(&mut self) -> Result<(), MicError>;

    /// Check if the backend is currently capturing.
    fn is_capturing(&self) -> bool;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Creates one backend per capture attempt, so a denied attempt can be
/// retried with a fresh device handle.
pub trait MicrophoneFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn MicrophoneBackend>, MicError>;
}

/// Convert interleaved multi-channel PCM to mono by summing channels.
pub(crate) fn downmix_to_mono(samples: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }

    let channels = channels as usize;
    let mut mono = Vec::with_capacity(samples.len() / channels);
    for frame in samples.chunks_exact(channels) {
        let sum: i32 = frame.iter().map(|&s| s as i32).sum();
        mono.push((sum / channels as i32).clamp(i16::MIN as i32, i16::MAX as i32) as i16);
    }
    mono
}

/// Nearest-sample rate conversion for mono PCM. Crude but sufficient for
/// voice capture; devices that already run at the target rate pass through.
pub(crate) fn resample_nearest(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let out_len = (samples.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src = (i as u64 * from_rate as u64 / to_rate as u64) as usize;
        out.push(samples[src.min(samples.len() - 1)]);
    }
    out
}
