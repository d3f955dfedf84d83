use tracing::debug;

use super::PeerError;
use crate::token::EphemeralCredential;

/// The one-shot HTTP request/response that carries the local offer and
/// returns the remote answer, substituting for a persistent signaling
/// server.
#[async_trait::async_trait]
pub trait SignalingClient: Send + Sync {
    async fn exchange(
        &self,
        offer_sdp: &str,
        credential: &EphemeralCredential,
        model: &str,
    ) -> Result<String, PeerError>;
}

/// Production signaling: POST the offer to the realtime endpoint with the
/// ephemeral credential as a bearer header and the model as a query
/// parameter; the response body is the SDP answer.
pub struct HttpSignaling {
    http: reqwest::Client,
    endpoint_url: String,
}

impl HttpSignaling {
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint_url: endpoint_url.into(),
        }
    }

    pub fn with_client(http: reqwest::Client, endpoint_url: impl Into<String>) -> Self {
        Self {
            http,
            endpoint_url: endpoint_url.into(),
        }
    }
}

#[async_trait::async_trait]
impl SignalingClient for HttpSignaling {
    async fn exchange(
        &self,
        offer_sdp: &str,
        credential: &EphemeralCredential,
        model: &str,
    ) -> Result<String, PeerError> {
        debug!(model, "Posting SDP offer to {}", self.endpoint_url);

        let response = self
            .http
            .post(&self.endpoint_url)
            .query(&[("model", model)])
            .bearer_auth(credential.secret())
            .header(reqwest::header::CONTENT_TYPE, "application/sdp")
            .body(offer_sdp.to_string())
            .send()
            .await
            .map_err(|e| PeerError::NegotiationFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PeerError::NegotiationFailed(format!(
                "signaling endpoint returned {}",
                status
            )));
        }

        let answer = response
            .text()
            .await
            .map_err(|e| PeerError::NegotiationFailed(e.to_string()))?;

        if answer.trim().is_empty() {
            return Err(PeerError::NegotiationFailed("empty SDP answer".into()));
        }

        Ok(answer)
    }
}
