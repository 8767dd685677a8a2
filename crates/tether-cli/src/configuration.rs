use crate::error::{to_env_var, ConfigError};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use tether::agent::AgentConfig;
use tether::providers::configs::{
    AnthropicProviderConfig, ANTHROPIC_HOST, ANTHROPIC_MODEL, DEFAULT_MAX_TOKENS,
};

/// Fallback for the API key when `TETHER_PROVIDER__API_KEY` is not set
pub const API_KEY_ENV_VAR: &str = "ANTHROPIC_API_KEY";

#[derive(Debug, Deserialize)]
pub struct ProviderSettings {
    #[serde(default = "default_host")]
    pub host: String,
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: Option<i32>,
}

impl ProviderSettings {
    pub fn into_config(self) -> AnthropicProviderConfig {
        AnthropicProviderConfig {
            host: self.host,
            api_key: self.api_key,
            model: self.model,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "default_max_tool_depth")]
    pub max_tool_depth: usize,
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    /// Messages kept per user; 0 keeps everything, otherwise at least 2
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default)]
    pub system_prompt: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_tool_depth: default_max_tool_depth(),
            query_timeout_secs: default_query_timeout_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
            history_window: default_history_window(),
            system_prompt: String::new(),
        }
    }
}

impl EngineSettings {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            max_tool_depth: self.max_tool_depth,
            query_timeout: Duration::from_secs(self.query_timeout_secs),
            tool_timeout: self.tool_timeout(),
            history_window: (self.history_window > 0).then_some(self.history_window),
            system_prompt: self.system_prompt.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TransportSettings {
    /// Who unaddressed console lines come from
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
    #[serde(default = "default_chunk_delay_ms")]
    pub chunk_delay_ms: u64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            user_id: default_user_id(),
            max_message_chars: default_max_message_chars(),
            chunk_delay_ms: default_chunk_delay_ms(),
        }
    }
}

impl TransportSettings {
    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub provider: ProviderSettings,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub transport: TransportSettings,
}

impl Settings {
    /// Load settings from defaults, an optional file and the environment
    pub fn new(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_and_validate(config_file)
    }

    fn load_and_validate(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            // Provider defaults
            .set_default("provider.host", default_host())?
            .set_default("provider.model", default_model())?;

        if let Some(api_key) = env::var(API_KEY_ENV_VAR)
            .ok()
            .filter(|key| !key.trim().is_empty())
        {
            builder = builder.set_default("provider.api_key", api_key)?;
        }
        if let Some(path) = config_file {
            builder = builder.add_source(File::from(path));
        }

        // Layer on the environment variables
        let config = builder
            .add_source(
                Environment::with_prefix("TETHER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let result: Result<Self, config::ConfigError> = config.try_deserialize();

        match result {
            Ok(settings) => settings.validate(),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                // "missing field `api_key`", possibly followed by the key path
                let error_str = err.to_string();
                if let Some((_, rest)) = error_str.split_once("missing field `") {
                    let field = rest.split('`').next().unwrap_or_default();
                    Err(ConfigError::MissingEnvVar {
                        env_var: env_var_for(field),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: env_var_for(field),
                    })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.provider.api_key.trim().is_empty() {
            return Err(ConfigError::MissingEnvVar {
                env_var: API_KEY_ENV_VAR.to_string(),
            });
        }
        // A one-message window drops every reply along with its question
        if self.engine.history_window == 1 {
            return Err(ConfigError::InvalidValue {
                env_var: to_env_var("engine.history_window"),
                reason: "must be 0 (unbounded) or at least 2".to_string(),
            });
        }
        Ok(self)
    }
}

fn env_var_for(field: &str) -> String {
    match field {
        "api_key" | "provider.api_key" => API_KEY_ENV_VAR.to_string(),
        "provider" => API_KEY_ENV_VAR.to_string(),
        _ => to_env_var(field),
    }
}

fn default_host() -> String {
    ANTHROPIC_HOST.to_string()
}

fn default_model() -> String {
    ANTHROPIC_MODEL.to_string()
}

fn default_max_tokens() -> Option<i32> {
    Some(DEFAULT_MAX_TOKENS)
}

fn default_max_tool_depth() -> usize {
    3
}

fn default_query_timeout_secs() -> u64 {
    120
}

fn default_tool_timeout_secs() -> u64 {
    30
}

fn default_history_window() -> usize {
    100
}

fn default_user_id() -> String {
    "console".to_string()
}

fn default_max_message_chars() -> usize {
    4096
}

fn default_chunk_delay_ms() -> u64 {
    500
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clean_env() {
        for (key, _) in env::vars() {
            if key.starts_with("TETHER_") {
                env::remove_var(&key);
            }
        }
        env::remove_var(API_KEY_ENV_VAR);
    }

    #[test]
    #[serial]
    fn test_default_settings() {
        clean_env();
        env::set_var(API_KEY_ENV_VAR, "test-key");

        let settings = Settings::new(None).unwrap();
        assert_eq!(settings.provider.host, "https://api.anthropic.com");
        assert_eq!(settings.provider.api_key, "test-key");
        assert_eq!(settings.provider.model, "claude-3-5-sonnet-20241022");
        assert_eq!(settings.provider.max_tokens, Some(1000));
        assert_eq!(settings.provider.temperature, None);

        assert_eq!(settings.engine.max_tool_depth, 3);
        assert_eq!(settings.engine.history_window, 100);
        assert_eq!(settings.transport.user_id, "console");
        assert_eq!(settings.transport.max_message_chars, 4096);
        assert_eq!(settings.transport.chunk_delay(), Duration::from_millis(500));

        let agent_config = settings.engine.agent_config();
        assert_eq!(agent_config.history_window, Some(100));
        assert_eq!(agent_config.query_timeout, Duration::from_secs(120));
        assert_eq!(agent_config.tool_timeout, Duration::from_secs(30));

        clean_env();
    }

    #[test]
    #[serial]
    fn test_environment_override() {
        clean_env();
        env::set_var(API_KEY_ENV_VAR, "fallback-key");
        env::set_var("TETHER_PROVIDER__API_KEY", "override-key");
        env::set_var("TETHER_PROVIDER__MODEL", "claude-test");
        env::set_var("TETHER_PROVIDER__TEMPERATURE", "0.7");
        env::set_var("TETHER_ENGINE__MAX_TOOL_DEPTH", "5");
        env::set_var("TETHER_ENGINE__HISTORY_WINDOW", "0");
        env::set_var("TETHER_TRANSPORT__CHUNK_DELAY_MS", "0");

        let settings = Settings::new(None).unwrap();
        assert_eq!(settings.provider.api_key, "override-key");
        assert_eq!(settings.provider.model, "claude-test");
        assert_eq!(settings.provider.temperature, Some(0.7));
        assert_eq!(settings.engine.max_tool_depth, 5);
        assert_eq!(settings.engine.agent_config().history_window, None);
        assert_eq!(settings.transport.chunk_delay_ms, 0);

        clean_env();
    }

    #[test]
    #[serial]
    fn test_missing_api_key() {
        clean_env();

        match Settings::new(None) {
            Err(ConfigError::MissingEnvVar { env_var }) => {
                assert_eq!(env_var, API_KEY_ENV_VAR);
            }
            other => panic!("Expected missing api key, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    #[serial]
    fn test_blank_api_key_is_missing() {
        clean_env();
        env::set_var(API_KEY_ENV_VAR, "");

        assert!(matches!(
            Settings::new(None),
            Err(ConfigError::MissingEnvVar { env_var }) if env_var == API_KEY_ENV_VAR
        ));

        env::set_var(API_KEY_ENV_VAR, "real-key");
        env::set_var("TETHER_PROVIDER__API_KEY", "   ");
        assert!(matches!(
            Settings::new(None),
            Err(ConfigError::MissingEnvVar { env_var }) if env_var == API_KEY_ENV_VAR
        ));

        clean_env();
    }

    #[test]
    #[serial]
    fn test_history_window_of_one_is_rejected() {
        clean_env();
        env::set_var(API_KEY_ENV_VAR, "test-key");
        env::set_var("TETHER_ENGINE__HISTORY_WINDOW", "1");

        match Settings::new(None) {
            Err(ConfigError::InvalidValue { env_var, .. }) => {
                assert_eq!(env_var, "TETHER_ENGINE__HISTORY_WINDOW");
            }
            other => panic!("Expected invalid window, got {:?}", other.map(|_| ())),
        }

        env::set_var("TETHER_ENGINE__HISTORY_WINDOW", "2");
        let settings = Settings::new(None).unwrap();
        assert_eq!(settings.engine.agent_config().history_window, Some(2));

        clean_env();
    }
}
