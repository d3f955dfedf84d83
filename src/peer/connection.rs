use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;

use super::signaling::SignalingClient;
use super::{PeerError, PeerEvent, PeerLink, PeerSettings};
use crate::audio::{drain_remote_track, AudioPipeline, MicError, MicrophoneBackend};
use crate::events::EventChannel;
use crate::token::EphemeralCredential;

fn setup_err(e: webrtc::Error) -> PeerError {
    PeerError::NegotiationFailed(e.to_string())
}

/// Production connector: one `RTCPeerConnection` per call, negotiated over
/// the injected signaling client.
pub struct WebRtcConnector {
    settings: PeerSettings,
    signaling: Arc<dyn SignalingClient>,
}

impl WebRtcConnector {
    pub fn new(settings: PeerSettings, signaling: Arc<dyn SignalingClient>) -> Self {
        Self {
            settings,
            signaling,
        }
    }
}

#[async_trait::async_trait]
impl super::PeerConnector for WebRtcConnector {
    async fn connect(
        &self,
        credential: EphemeralCredential,
        model: &str,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Box<dyn PeerLink>, PeerError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(setup_err)?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(setup_err)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = self
            .settings
            .ice_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();

        let pc = Arc::new(
            api.new_peer_connection(RTCConfiguration {
                ice_servers,
                ..Default::default()
            })
            .await
            .map_err(setup_err)?,
        );

        let link = match self
            .negotiate(Arc::clone(&pc), credential, model, events)
            .await
        {
            Ok(link) => link,
            Err(e) => {
                // The agent's sockets and spawned tasks outlive the Arc;
                // only an explicit close releases them.
                if let Err(close_err) = pc.close().await {
                    debug!("Peer connection close: {}", close_err);
                }
                return Err(e);
            }
        };

        Ok(Box::new(link))
    }
}

impl WebRtcConnector {
    /// Negotiation steps once the connection object exists. Every error
    /// return is followed by `connect` closing `pc`.
    async fn negotiate(
        &self,
        pc: Arc<RTCPeerConnection>,
        credential: EphemeralCredential,
        model: &str,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<WebRtcLink, PeerError> {
        // The outbound event channel must exist before the offer is created
        // so it is part of the negotiated session description.
        let outbound = pc
            .create_data_channel("events", None)
            .await
            .map_err(setup_err)?;
        let channel = Arc::new(EventChannel::new(outbound, events.clone()));

        // Audio transceiver negotiated up front: receives remote audio now,
        // and carries an empty send slot the AudioPipeline fills later via
        // replace_track, avoiding a renegotiation round.
        let transceiver = pc
            .add_transceiver_from_kind(
                RTPCodecType::Audio,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Sendrecv,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(setup_err)?;
        let audio_sender = transceiver.sender().await;

        // Callback slots, set once per connection, before negotiation
        // completes: inbound media and inbound data-channel creation.
        {
            let playback = self.settings.playback.clone();
            pc.on_track(Box::new(move |track, _receiver, _transceiver| {
                let playback = playback.clone();
                Box::pin(async move {
                    if track.kind() == RTPCodecType::Audio {
                        tokio::spawn(drain_remote_track(track, playback));
                    }
                })
            }));
        }

        {
            let channel = Arc::clone(&channel);
            let sink = events.clone();
            pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                channel.adopt_inbound(&dc, sink.clone());
                Box::pin(async {})
            }));
        }

        {
            let events = events.clone();
            pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                debug!(state = %state, "Peer connection state changed");
                if matches!(
                    state,
                    RTCPeerConnectionState::Failed
                        | RTCPeerConnectionState::Closed
                        | RTCPeerConnectionState::Disconnected
                ) {
                    let _ = events.send(PeerEvent::Closed(format!(
                        "peer connection entered state {}",
                        state
                    )));
                }
                Box::pin(async {})
            }));
        }

        // Offer requesting to receive audio, no outbound video. The HTTP
        // exchange is one-shot, so wait for ICE gathering to finish and ship
        // the candidates inside the offer instead of trickling.
        let offer = pc.create_offer(None).await.map_err(setup_err)?;
        let mut gathered = pc.gathering_complete_promise().await;
        pc.set_local_description(offer).await.map_err(setup_err)?;
        let _ = gathered.recv().await;

        let local = pc.local_description().await.ok_or_else(|| {
            PeerError::NegotiationFailed("no local description after ICE gathering".into())
        })?;

        let answer_sdp = self
            .signaling
            .exchange(&local.sdp, &credential, model)
            .await?;

        let answer = RTCSessionDescription::answer(answer_sdp)
            .map_err(|e| PeerError::NegotiationFailed(e.to_string()))?;
        pc.set_remote_description(answer)
            .await
            .map_err(|e| PeerError::NegotiationFailed(e.to_string()))?;

        info!(model, "Answer applied; media negotiation proceeding");

        Ok(WebRtcLink {
            pc,
            channel,
            audio_sender,
            pipeline: Mutex::new(None),
            released: AtomicBool::new(false),
        })
    }
}

/// One open connection and everything hanging off it: the event channel,
/// the audio sender, and the pipeline once a microphone is attached.
/// Released atomically by `close()`.
pub struct WebRtcLink {
    pc: Arc<RTCPeerConnection>,
    channel: Arc<EventChannel>,
    audio_sender: Arc<RTCRtpSender>,
    pipeline: Mutex<Option<AudioPipeline>>,
    released: AtomicBool,
}

#[async_trait::async_trait]
impl PeerLink for WebRtcLink {
    async fn send_event(&self, payload: &Value) {
        if self.released.load(Ordering::SeqCst) {
            return;
        }
        self.channel.send(payload).await;
    }

    async fn start_microphone(&self, mic: Box<dyn MicrophoneBackend>) -> Result<(), MicError> {
        if self.released.load(Ordering::SeqCst) {
            return Err(MicError::Backend("connection released".into()));
        }

        let mut slot = self.pipeline.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        let pipeline = AudioPipeline::start(Arc::clone(&self.audio_sender), mic).await?;
        *slot = Some(pipeline);
        Ok(())
    }

    async fn close(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(pipeline) = self.pipeline.lock().await.take() {
            pipeline.stop().await;
        }

        if let Err(e) = self.pc.close().await {
            debug!("Peer connection close: {}", e);
        }

        info!("Peer connection released");
    }
}
