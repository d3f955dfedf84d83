use serde::{Deserialize, Serialize};

/// Environment variable consulted for the default remote model identifier.
pub const DEFAULT_MODEL_ENV: &str = "VOICELINK_DEFAULT_MODEL";

const FALLBACK_MODEL: &str = "gpt-4o-realtime-preview";

/// Configuration for one session controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Trusted same-origin endpoint that mints ephemeral credentials
    pub mint_url: String,

    /// Remote realtime endpoint receiving the SDP offer
    pub endpoint_url: String,

    /// Model used when the minting endpoint does not name one
    pub default_model: String,

    /// Relay/discovery servers for NAT traversal
    pub ice_servers: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mint_url: "http://localhost:8080/api/realtime/token".to_string(),
            endpoint_url: "https://api.openai.com/v1/realtime".to_string(),
            default_model: std::env::var(DEFAULT_MODEL_ENV)
                .unwrap_or_else(|_| FALLBACK_MODEL.to_string()),
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
        }
    }
}
