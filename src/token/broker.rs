use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum TokenError {
    /// The minting endpoint was unreachable or returned a non-success status.
    #[error("token mint failed: {0}")]
    MintFailed(String),

    /// The minting endpoint answered, but the response carried no usable
    /// credential value.
    #[error("invalid credential shape: {0}")]
    InvalidCredentialShape(String),
}

/// A short-lived, single-use token authorizing one connection attempt.
///
/// The inner value is deliberately inaccessible except through
/// [`EphemeralCredential::secret`], and the `Debug` impl is redacted so the
/// credential cannot leak through logging or error formatting.
#[derive(Clone)]
pub struct EphemeralCredential(String);

impl EphemeralCredential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw credential, for the one signaling request that consumes it.
    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for EphemeralCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EphemeralCredential(..)")
    }
}

/// Result of one mint call: the credential plus the remote model identifier
/// the entitlement layer negotiated (absent when the endpoint leaves model
/// selection to the client's configured default).
#[derive(Debug)]
pub struct MintedSession {
    pub credential: EphemeralCredential,
    pub model: Option<String>,
}

/// Mints ephemeral credentials for connection attempts.
///
/// One mint per `connect()`; retry policy belongs to the caller.
#[async_trait::async_trait]
pub trait TokenMinter: Send + Sync {
    async fn mint(&self) -> Result<MintedSession, TokenError>;
}

/// Wire shape of the minting endpoint response. Two layouts are accepted:
/// a top-level `credential` string, or the nested `client_secret.value`
/// layout some provider session endpoints return.
#[derive(Debug, Deserialize)]
struct MintResponse {
    credential: Option<String>,
    client_secret: Option<ClientSecret>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClientSecret {
    value: String,
}

impl MintResponse {
    fn credential_value(self) -> (Option<String>, Option<String>) {
        let secret = self
            .credential
            .or(self.client_secret.map(|s| s.value))
            .filter(|v| !v.is_empty());
        (secret, self.model)
    }
}

/// Fetches credentials from a trusted same-origin minting endpoint over
/// authenticated HTTP. Holds nothing between calls.
pub struct HttpTokenBroker {
    http: reqwest::Client,
    mint_url: String,
}

impl HttpTokenBroker {
    pub fn new(mint_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            mint_url: mint_url.into(),
        }
    }

    pub fn with_client(http: reqwest::Client, mint_url: impl Into<String>) -> Self {
        Self {
            http,
            mint_url: mint_url.into(),
        }
    }
}

#[async_trait::async_trait]
impl TokenMinter for HttpTokenBroker {
    async fn mint(&self) -> Result<MintedSession, TokenError> {
        debug!("Requesting ephemeral credential from {}", self.mint_url);

        let response = self
            .http
            .get(&self.mint_url)
            .send()
            .await
            .map_err(|e| TokenError::MintFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TokenError::MintFailed(format!(
                "minting endpoint returned {}",
                status
            )));
        }

        let body: MintResponse = response
            .json()
            .await
            .map_err(|e| TokenError::InvalidCredentialShape(e.to_string()))?;

        let (secret, model) = body.credential_value();
        let secret = secret.ok_or_else(|| {
            TokenError::InvalidCredentialShape("response carried no credential value".into())
        })?;

        info!(model = model.as_deref(), "Minted ephemeral credential");

        Ok(MintedSession {
            credential: EphemeralCredential::new(secret),
            model,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_debug_is_redacted() {
        let credential = EphemeralCredential::new("ek_live_supersecret");
        let formatted = format!("{:?}", credential);
        assert!(!formatted.contains("supersecret"));
        assert_eq!(formatted, "EphemeralCredential(..)");
    }

    #[test]
    fn mint_response_accepts_top_level_credential() {
        let body: MintResponse =
            serde_json::from_str(r#"{"credential": "ek_abc", "model": "gpt-4o-realtime-preview"}"#)
                .unwrap();
        let (secret, model) = body.credential_value();
        assert_eq!(secret.as_deref(), Some("ek_abc"));
        assert_eq!(model.as_deref(), Some("gpt-4o-realtime-preview"));
    }

    #[test]
    fn mint_response_accepts_nested_client_secret() {
        let body: MintResponse =
            serde_json::from_str(r#"{"client_secret": {"value": "ek_nested"}}"#).unwrap();
        let (secret, model) = body.credential_value();
        assert_eq!(secret.as_deref(), Some("ek_nested"));
        assert_eq!(model, None);
    }

    #[test]
    fn mint_response_rejects_empty_credential() {
        let body: MintResponse = serde_json::from_str(r#"{"credential": ""}"#).unwrap();
        let (secret, _) = body.credential_value();
        assert_eq!(secret, None);
    }
}
