use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "http://localhost:10101";
pub const DEFAULT_SPEAKER_ID: u32 = 888753760;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackProvider {
    Gtts,
    Espeak,
    None,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    // Primary synthesis backend
    pub endpoints: Vec<String>,
    pub speaker_id: u32,
    pub probe_timeout_ms: u64,
    pub request_timeout_secs: u64,
    // Fallback provider
    pub fallback_provider: FallbackProvider,
    pub fallback_language: String,
    pub gtts_base_url: String,
    pub espeak_binary: String,
    // Artifacts
    pub scratch_dir: PathBuf,
    // Reading policy
    pub char_limit: usize,
    pub command_prefix: String,
    pub announce_membership: bool,
    pub leave_when_empty: bool,
    // Event gateway
    pub gateway_host: String,
    pub gateway_port: u16,
    // Logging; RUST_LOG wins when set
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoints: vec![DEFAULT_ENDPOINT.to_string()],
            speaker_id: DEFAULT_SPEAKER_ID,
            probe_timeout_ms: 2000,
            request_timeout_secs: 30,
            fallback_provider: FallbackProvider::Gtts,
            fallback_language: "ja".to_string(),
            gtts_base_url: crate::backends::gtts::DEFAULT_BASE_URL.to_string(),
            espeak_binary: "espeak-ng".to_string(),
            scratch_dir: PathBuf::from("temp_audio"),
            char_limit: crate::format::DEFAULT_CHAR_LIMIT,
            command_prefix: "!".to_string(),
            announce_membership: true,
            leave_when_empty: true,
            gateway_host: "127.0.0.1".to_string(),
            gateway_port: 6561,
            log_filter: "info".to_string(),
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, config::ConfigError> {
        let user_config = dirs::config_dir()
            .map(|dir| dir.join("speech-relay").join("Relay"))
            .unwrap_or_else(|| PathBuf::from("Relay"));

        let builder = Self::defaults()?
            // Merge with local config file (if exists)
            .add_source(File::with_name("Relay").required(false))
            .add_source(File::with_name(&user_config.to_string_lossy()).required(false))
            // Merge with environment variables (e.g. RELAY_SPEAKER_ID, RELAY_ENDPOINTS=a,b)
            .add_source(
                Environment::with_prefix("RELAY")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("endpoints"),
            );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>, config::ConfigError> {
        let d = Settings::default();
        Config::builder()
            .set_default("endpoints", d.endpoints)?
            .set_default("speaker_id", d.speaker_id as i64)?
            .set_default("probe_timeout_ms", d.probe_timeout_ms as i64)?
            .set_default("request_timeout_secs", d.request_timeout_secs as i64)?
            .set_default("fallback_provider", "gtts")?
            .set_default("fallback_language", d.fallback_language)?
            .set_default("gtts_base_url", d.gtts_base_url)?
            .set_default("espeak_binary", d.espeak_binary)?
            .set_default("scratch_dir", d.scratch_dir.to_string_lossy().into_owned())?
            .set_default("char_limit", d.char_limit as i64)?
            .set_default("command_prefix", d.command_prefix)?
            .set_default("announce_membership", d.announce_membership)?
            .set_default("leave_when_empty", d.leave_when_empty)?
            .set_default("gateway_host", d.gateway_host)?
            .set_default("gateway_port", d.gateway_port as i64)?
            .set_default("log_filter", d.log_filter)
    }

    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.endpoints.is_empty() {
            return Err(config::ConfigError::Message(
                "at least one synthesis endpoint must be configured".to_string(),
            ));
        }
        if let Some(bad) = self
            .endpoints
            .iter()
            .find(|e| !(e.starts_with("http://") || e.starts_with("https://")))
        {
            return Err(config::ConfigError::Message(format!(
                "Invalid endpoint: {}. Must start with http:// or https://",
                bad
            )));
        }
        if self.probe_timeout_ms == 0 || self.request_timeout_secs == 0 {
            return Err(config::ConfigError::Message(
                "timeouts must be greater than 0".to_string(),
            ));
        }
        if self.char_limit == 0 {
            return Err(config::ConfigError::Message(
                "char_limit must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn gateway_addr(&self) -> String {
        format!("{}:{}", self.gateway_host, self.gateway_port)
    }
}
