use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::mic::{
    downmix_to_mono, resample_nearest, AudioFrame, MicError, MicrophoneBackend,
    MicrophoneFactory, FRAME_DURATION_MS, PIPELINE_SAMPLE_RATE, SAMPLES_PER_FRAME,
};

/// Default microphone backend: captures the system's default input device.
///
/// cpal streams are not `Send`, so the stream lives on a dedicated capture
/// thread for the lifetime of the backend; frames cross into async land over
/// an mpsc channel. Device or stream acquisition failure maps to
/// `MicError::AccessDenied`, the closest a headless runtime gets to a
/// rejected permission prompt.
pub struct CpalMicrophone {
    capturing: Arc<AtomicBool>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl CpalMicrophone {
    pub fn new() -> Self {
        Self {
            capturing: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }
}

impl Default for CpalMicrophone {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl MicrophoneBackend for CpalMicrophone {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, MicError> {
        if self.is_capturing() {
            return Err(MicError::Backend("capture already running".into()));
        }

        let (frame_tx, frame_rx) = mpsc::channel(64);
        let (ready_tx, ready_rx) = oneshot::channel();

        self.capturing.store(true, Ordering::SeqCst);
        let capturing = Arc::clone(&self.capturing);

        let worker = std::thread::Builder::new()
            .name("voicelink-mic".into())
            .spawn(move || {
                let stream = match build_input_stream(frame_tx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        capturing.store(false, Ordering::SeqCst);
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    capturing.store(false, Ordering::SeqCst);
                    let _ = ready_tx.send(Err(MicError::Backend(e.to_string())));
                    return;
                }

                let _ = ready_tx.send(Ok(()));

                while capturing.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(50));
                }

                drop(stream);
                debug!("Capture thread exiting");
            })
            .map_err(|e| MicError::Backend(e.to_string()))?;

        match ready_rx.await {
            Ok(Ok(())) => {
                info!("Microphone capture started");
                self.worker = Some(worker);
                Ok(frame_rx)
            }
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                self.capturing.store(false, Ordering::SeqCst);
                Err(MicError::Backend("capture thread exited before ready".into()))
            }
        }
    }

    async fn stop(&mut self) -> Result<(), MicError> {
        self.capturing.store(false, Ordering::SeqCst);

        if let Some(worker) = self.worker.take() {
            tokio::task::spawn_blocking(move || {
                let _ = worker.join();
            })
            .await
            .map_err(|e| MicError::Backend(e.to_string()))?;
        }

        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "cpal"
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        self.capturing.store(false, Ordering::SeqCst);
    }
}

fn build_input_stream(frame_tx: mpsc::Sender<AudioFrame>) -> Result<cpal::Stream, MicError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| MicError::AccessDenied("no default input device".into()))?;
    let config = device
        .default_input_config()
        .map_err(|e| MicError::AccessDenied(e.to_string()))?;

    let source_rate = config.sample_rate().0;
    let source_channels = config.channels();
    debug!(
        rate = source_rate,
        channels = source_channels,
        format = ?config.sample_format(),
        "Opening input device"
    );

    let mut chunker = FrameChunker::new(source_rate, source_channels);
    let err_fn = |e: cpal::StreamError| warn!("Microphone stream error: {}", e);

    let stream = match config.sample_format() {
        SampleFormat::I16 => device.build_input_stream(
            &config.into(),
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                chunker.push(data, &frame_tx);
            },
            err_fn,
            None,
        ),
        SampleFormat::F32 => device.build_input_stream(
            &config.into(),
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let pcm: Vec<i16> = data
                    .iter()
                    .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                    .collect();
                chunker.push(&pcm, &frame_tx);
            },
            err_fn,
            None,
        ),
        SampleFormat::U16 => device.build_input_stream(
            &config.into(),
            move |data: &[u16], _: &cpal::InputCallbackInfo| {
                let pcm: Vec<i16> = data
                    .iter()
                    .map(|&s| (s as i32 - 32_768) as i16)
                    .collect();
                chunker.push(&pcm, &frame_tx);
            },
            err_fn,
            None,
        ),
        other => {
            return Err(MicError::Backend(format!(
                "unsupported input sample format {:?}",
                other
            )))
        }
    };

    stream.map_err(|e| match e {
        cpal::BuildStreamError::DeviceNotAvailable => MicError::AccessDenied(e.to_string()),
        e => MicError::Backend(e.to_string()),
    })
}

/// Accumulates device-format PCM and emits pipeline frames: mono, 48kHz,
/// exactly one frame duration each.
struct FrameChunker {
    source_rate: u32,
    source_channels: u16,
    buffer: Vec<i16>,
    frames_emitted: u64,
}

impl FrameChunker {
    fn new(source_rate: u32, source_channels: u16) -> Self {
        Self {
            source_rate,
            source_channels,
            buffer: Vec::with_capacity(SAMPLES_PER_FRAME * 2),
            frames_emitted: 0,
        }
    }

    fn push(&mut self, samples: &[i16], tx: &mpsc::Sender<AudioFrame>) {
        let mono = downmix_to_mono(samples, self.source_channels);
        let resampled = resample_nearest(&mono, self.source_rate, PIPELINE_SAMPLE_RATE);
        self.buffer.extend_from_slice(&resampled);

        while self.buffer.len() >= SAMPLES_PER_FRAME {
            let frame_samples: Vec<i16> = self.buffer.drain(..SAMPLES_PER_FRAME).collect();
            let frame = AudioFrame {
                samples: frame_samples,
                sample_rate: PIPELINE_SAMPLE_RATE,
                channels: 1,
                timestamp_ms: self.frames_emitted * FRAME_DURATION_MS,
            };
            self.frames_emitted += 1;

            // Never block the realtime capture callback; drop on backpressure.
            if tx.try_send(frame).is_err() {
                debug!("Frame channel full or closed; dropping capture frame");
            }
        }
    }
}

/// Factory handing out one fresh cpal backend per capture attempt.
pub struct SystemMicrophoneFactory;

impl MicrophoneFactory for SystemMicrophoneFactory {
    fn create(&self) -> Result<Box<dyn MicrophoneBackend>, MicError> {
        Ok(Box::new(CpalMicrophone::new()))
    }
}
