use anyhow::Result;
use serde::Deserialize;

use crate::session::SessionConfig;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub realtime: RealtimeConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct RealtimeConfig {
    pub mint_url: String,
    pub endpoint_url: String,
    pub default_model: Option<String>,
    pub ice_servers: Option<Vec<String>>,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("VOICELINK").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Session configuration derived from the loaded file, with defaults
    /// filling anything the file leaves out.
    pub fn session_config(&self) -> SessionConfig {
        let defaults = SessionConfig::default();
        SessionConfig {
            mint_url: self.realtime.mint_url.clone(),
            endpoint_url: self.realtime.endpoint_url.clone(),
            default_model: self
                .realtime
                .default_model
                .clone()
                .unwrap_or(defaults.default_model),
            ice_servers: self
                .realtime
                .ice_servers
                .clone()
                .unwrap_or(defaults.ice_servers),
        }
    }
}
