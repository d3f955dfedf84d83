use std::sync::Arc;
use std::time::Duration;

use audiopus::coder::Encoder as OpusEncoder;
use audiopus::{Application, Channels, SampleRate};
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use super::mic::{MicError, MicrophoneBackend, FRAME_DURATION_MS, SAMPLES_PER_FRAME};

/// One RTP payload from the remote audio track, handed to the host's
/// playback sink for rendering.
#[derive(Debug, Clone)]
pub struct RemoteAudioPacket {
    pub payload: Bytes,
    pub timestamp: u32,
    pub sequence: u16,
}

/// Transmits microphone audio over an already-open connection.
///
/// The pipeline owns the backend it captured from and every track it added;
/// `stop()` halts all of them regardless of internal state.
pub struct AudioPipeline {
    sender: Arc<RTCRtpSender>,
    mic: Box<dyn MicrophoneBackend>,
    task: JoinHandle<()>,
}

impl AudioPipeline {
    /// Request microphone access and start transmitting on the connection's
    /// audio sender. Fails with [`MicError::AccessDenied`] when capture is
    /// refused; the connection itself is untouched in that case.
    pub async fn start(
        sender: Arc<RTCRtpSender>,
        mut mic: Box<dyn MicrophoneBackend>,
    ) -> Result<Self, MicError> {
        let mut frames = mic.start().await?;
        info!(backend = mic.name(), "Microphone attached");

        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48_000,
                channels: 1,
                ..Default::default()
            },
            "microphone".to_owned(),
            "voicelink".to_owned(),
        ));

        // Fills the sender slot negotiated at offer time; no renegotiation.
        sender
            .replace_track(Some(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>))
            .await
            .map_err(|e| MicError::Backend(e.to_string()))?;

        let mut encoder = OpusEncoder::new(SampleRate::Hz48000, Channels::Mono, Application::Voip)
            .map_err(|e| MicError::Backend(e.to_string()))?;

        let task = tokio::spawn(async move {
            let mut payload = vec![0u8; 1500];

            while let Some(frame) = frames.recv().await {
                if frame.samples.len() != SAMPLES_PER_FRAME {
                    trace!(len = frame.samples.len(), "Skipping off-size capture frame");
                    continue;
                }

                match encoder.encode(&frame.samples, &mut payload) {
                    Ok(len) => {
                        let sample = Sample {
                            data: Bytes::copy_from_slice(&payload[..len]),
                            duration: Duration::from_millis(FRAME_DURATION_MS),
                            ..Default::default()
                        };
                        if let Err(e) = track.write_sample(&sample).await {
                            debug!("Track write ended: {}", e);
                            break;
                        }
                    }
                    Err(e) => warn!("Opus encode failed: {}", e),
                }
            }

            debug!("Microphone pipeline task stopped");
        });

        Ok(Self { sender, mic, task })
    }

    /// Halt capture and detach the local track. Invoked by session teardown;
    /// safe regardless of pipeline internal state.
    pub async fn stop(mut self) {
        self.task.abort();

        if let Err(e) = self.mic.stop().await {
            warn!("Failed to stop microphone backend: {}", e);
        }

        if let Err(e) = self.sender.replace_track(None).await {
            debug!("Failed to detach local track: {}", e);
        }
    }
}

/// Drain a remote audio track, forwarding payloads to the playback sink when
/// one is attached. With no sink the packets are read and dropped so the
/// track keeps flowing.
pub async fn drain_remote_track(
    track: Arc<TrackRemote>,
    playback: Option<mpsc::Sender<RemoteAudioPacket>>,
) {
    info!(
        codec = %track.codec().capability.mime_type,
        "Remote audio track attached"
    );

    loop {
        match track.read_rtp().await {
            Ok((packet, _attributes)) => {
                if packet.payload.is_empty() {
                    continue;
                }

                if let Some(sink) = &playback {
                    let out = RemoteAudioPacket {
                        payload: packet.payload.clone(),
                        timestamp: packet.header.timestamp,
                        sequence: packet.header.sequence_number,
                    };
                    if sink.try_send(out).is_err() {
                        trace!("Playback sink full or closed; dropping packet");
                    }
                }
            }
            Err(e) => {
                debug!("Remote track read ended: {}", e);
                break;
            }
        }
    }
}
