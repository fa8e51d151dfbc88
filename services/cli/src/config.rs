use rtvi_core::{ClientConfig, ConnectionDescriptor, client::DEFAULT_BASE_URL};
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct CliConfig {
    pub base_url: String,
    pub timeout: Option<Duration>,
    /// Initial pipeline configuration sent with `start_bot`.
    pub pipeline: ClientConfig,
    pub enable_mic: bool,
    /// Pre-provisioned room; skips the HTTP handshake when set.
    pub room: Option<ConnectionDescriptor>,
    pub log_level: Level,
}

impl CliConfig {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let base_url =
            std::env::var("RTVI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        let timeout = match std::env::var("RTVI_TIMEOUT_SECS") {
            Ok(raw) => Some(parse_timeout(&raw).ok_or_else(|| {
                ConfigError::InvalidValue(
                    "RTVI_TIMEOUT_SECS".to_string(),
                    format!("'{raw}' is not a number of seconds"),
                )
            })?),
            Err(_) => None,
        };

        let pipeline = match std::env::var("RTVI_CONFIG") {
            Ok(raw) => parse_pipeline(&raw)
                .map_err(|reason| ConfigError::InvalidValue("RTVI_CONFIG".to_string(), reason))?,
            Err(_) => ClientConfig::default(),
        };

        let enable_mic = match std::env::var("RTVI_ENABLE_MIC") {
            Ok(raw) => parse_flag(&raw).ok_or_else(|| {
                ConfigError::InvalidValue(
                    "RTVI_ENABLE_MIC".to_string(),
                    format!("'{raw}' is not a boolean"),
                )
            })?,
            Err(_) => true,
        };

        let room = match (std::env::var("RTVI_ROOM_URL"), std::env::var("RTVI_ROOM_TOKEN")) {
            (Ok(url), Ok(token)) => Some(ConnectionDescriptor { url, token }),
            (Ok(_), Err(_)) => {
                return Err(ConfigError::MissingVar(
                    "RTVI_ROOM_TOKEN must be set together with RTVI_ROOM_URL".to_string(),
                ));
            }
            (Err(_), Ok(_)) => {
                return Err(ConfigError::MissingVar(
                    "RTVI_ROOM_URL must be set together with RTVI_ROOM_TOKEN".to_string(),
                ));
            }
            (Err(_), Err(_)) => None,
        };

        let log_level_str = std::env::var("RTVI_LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RTVI_LOG_LEVEL".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            base_url,
            timeout,
            pipeline,
            enable_mic,
            room,
            log_level,
        })
    }
}

/// Whole seconds; `0` disables the deadline.
pub fn parse_timeout(raw: &str) -> Option<Duration> {
    let secs = raw.trim().parse::<u64>().ok()?;
    Some(Duration::from_secs(secs))
}

/// A JSON object of the form `{"<service>": {<options>}, ...}`.
pub fn parse_pipeline(raw: &str) -> Result<ClientConfig, String> {
    let value: serde_json::Value = serde_json::from_str(raw).map_err(|e| e.to_string())?;
    ClientConfig::from_value(value)
        .ok_or_else(|| "expected an object mapping service names to option objects".to_string())
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn clear_env_vars() {
        unsafe {
            env::remove_var("RTVI_BASE_URL");
            env::remove_var("RTVI_TIMEOUT_SECS");
            env::remove_var("RTVI_CONFIG");
            env::remove_var("RTVI_ENABLE_MIC");
            env::remove_var("RTVI_ROOM_URL");
            env::remove_var("RTVI_ROOM_TOKEN");
            env::remove_var("RTVI_LOG_LEVEL");
        }
    }

    #[test]
    fn test_config_error_display() {
        let missing_var = ConfigError::MissingVar("TEST_VAR".to_string());
        assert_eq!(
            format!("{}", missing_var),
            "Missing environment variable: TEST_VAR"
        );

        let invalid_value =
            ConfigError::InvalidValue("TEST_VAR".to_string(), "bad_value".to_string());
        assert_eq!(
            format!("{}", invalid_value),
            "Invalid value for environment variable TEST_VAR: bad_value"
        );
    }

    #[test]
    #[serial]
    fn test_config_from_env_defaults() {
        clear_env_vars();

        let config = CliConfig::from_env().expect("Config should load successfully");

        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.timeout, None);
        assert!(config.pipeline.is_empty());
        assert!(config.enable_mic);
        assert!(config.room.is_none());
        assert_eq!(config.log_level, Level::INFO);
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom_values() {
        clear_env_vars();
        unsafe {
            env::set_var("RTVI_BASE_URL", "http://localhost:7860");
            env::set_var("RTVI_TIMEOUT_SECS", "15");
            env::set_var(
                "RTVI_CONFIG",
                r#"{"llm":{"model":"llama3-70b-8192"},"tts":{"voice":"v1"}}"#,
            );
            env::set_var("RTVI_ENABLE_MIC", "off");
            env::set_var("RTVI_ROOM_URL", "wss://rooms.example/r");
            env::set_var("RTVI_ROOM_TOKEN", "tok");
            env::set_var("RTVI_LOG_LEVEL", "debug");
        }

        let config = CliConfig::from_env().expect("Config should load successfully");

        assert_eq!(config.base_url, "http://localhost:7860");
        assert_eq!(config.timeout, Some(Duration::from_secs(15)));
        assert_eq!(
            config.pipeline.service("tts").unwrap()["voice"],
            serde_json::json!("v1")
        );
        assert!(!config.enable_mic);
        assert_eq!(config.room.unwrap().url, "wss://rooms.example/r");
        assert_eq!(config.log_level, Level::DEBUG);
        clear_env_vars();
    }

    #[test]
    #[serial]
    fn test_config_invalid_timeout() {
        clear_env_vars();
        unsafe {
            env::set_var("RTVI_TIMEOUT_SECS", "soon");
        }

        let err = CliConfig::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "RTVI_TIMEOUT_SECS"),
            _ => panic!("Expected InvalidValue for RTVI_TIMEOUT_SECS"),
        }
        clear_env_vars();
    }

    #[test]
    #[serial]
    fn test_config_pipeline_must_be_an_object() {
        clear_env_vars();
        unsafe {
            env::set_var("RTVI_CONFIG", r#"["llm"]"#);
        }

        let err = CliConfig::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "RTVI_CONFIG"),
            _ => panic!("Expected InvalidValue for RTVI_CONFIG"),
        }
        clear_env_vars();
    }

    #[test]
    #[serial]
    fn test_config_room_without_token() {
        clear_env_vars();
        unsafe {
            env::set_var("RTVI_ROOM_URL", "wss://rooms.example/r");
        }

        let err = CliConfig::from_env().unwrap_err();
        match err {
            ConfigError::MissingVar(msg) => assert!(msg.contains("RTVI_ROOM_TOKEN")),
            _ => panic!("Expected MissingVar for RTVI_ROOM_TOKEN"),
        }
        clear_env_vars();
    }

    #[test]
    fn test_parse_flag_variants() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag(" 0 "), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
