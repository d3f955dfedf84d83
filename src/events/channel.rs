use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;

use super::messages::{classify, InboundEvent};
use crate::peer::PeerEvent;

/// One logical duplex event channel for a connection.
///
/// Owns the locally-created outbound channel and wires inbound dispatch for
/// it plus any channel the remote side creates. Sends are silently dropped
/// until the outbound channel reports open; there is no queueing, no
/// acknowledgement, and no retry.
pub struct EventChannel {
    outbound: Arc<RTCDataChannel>,
    open: Arc<AtomicBool>,
}

impl EventChannel {
    /// Wrap the locally-created data channel and route its inbound messages
    /// into `sink`.
    pub fn new(outbound: Arc<RTCDataChannel>, sink: mpsc::UnboundedSender<PeerEvent>) -> Self {
        let open = Arc::new(AtomicBool::new(false));

        {
            let open = Arc::clone(&open);
            let label = outbound.label().to_string();
            outbound.on_open(Box::new(move || {
                debug!(channel = %label, "Event channel open");
                open.store(true, Ordering::SeqCst);
                Box::pin(async {})
            }));
        }

        {
            let open = Arc::clone(&open);
            outbound.on_close(Box::new(move || {
                open.store(false, Ordering::SeqCst);
                Box::pin(async {})
            }));
        }

        Self::wire_inbound(&outbound, sink);

        Self { outbound, open }
    }

    /// Route messages from a channel the remote side created into the same
    /// sink as the outbound channel's replies.
    pub fn adopt_inbound(
        &self,
        channel: &Arc<RTCDataChannel>,
        sink: mpsc::UnboundedSender<PeerEvent>,
    ) {
        debug!(channel = %channel.label(), "Adopting remote data channel");
        Self::wire_inbound(channel, sink);
    }

    fn wire_inbound(channel: &Arc<RTCDataChannel>, sink: mpsc::UnboundedSender<PeerEvent>) {
        channel.on_message(Box::new(move |msg: DataChannelMessage| {
            match classify(&msg.data) {
                Some(InboundEvent::TranscriptDelta(text)) => {
                    let _ = sink.send(PeerEvent::Transcript(text));
                }
                Some(InboundEvent::Server(value)) => {
                    let _ = sink.send(PeerEvent::Message(value));
                }
                None => {
                    // Some transports interleave non-JSON framing; not an error.
                    debug!(bytes = msg.data.len(), "Dropping malformed data channel frame");
                }
            }
            Box::pin(async {})
        }));
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Serialize and transmit `payload` if the channel is open; otherwise a
    /// silent no-op. Callers that need delivery must check readiness first.
    pub async fn send(&self, payload: &Value) {
        if !self.is_open() {
            trace!("Event channel not open; dropping outbound event");
            return;
        }

        match serde_json::to_string(payload) {
            Ok(text) => {
                if let Err(e) = self.outbound.send_text(text).await {
                    warn!("Failed to send event: {}", e);
                }
            }
            Err(e) => warn!("Failed to serialize outbound event: {}", e),
        }
    }
}
