//! Environment-backed runtime configuration for `chat-terminal`.

use std::{env, path::PathBuf};

use chat_client::SessionConfig;
use chat_core::{
    ChannelConfig, DEFAULT_BROADCAST_TOPIC, DEFAULT_RECONNECT_DELAY_MS, DEFAULT_SEND_DESTINATION,
    ReconnectPolicy,
};
use chat_stomp::{DEFAULT_HEARTBEAT_MS, HeartBeat};
use thiserror::Error;
use url::Url;

const DEFAULT_API_URL: &str = "http://localhost:8080";

/// Runtime configuration used by the terminal client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalConfig {
    /// Base URL of the HTTP API.
    pub api_base: String,
    /// Optional explicit broadcast socket URL.
    pub socket_url: Option<String>,
    /// Token override; wins over the credentials file.
    pub token: Option<String>,
    /// User id override; wins over the credentials file.
    pub user_id: Option<String>,
    /// JSON credentials file written by the login flow.
    pub credentials_file: Option<PathBuf>,
    pub reconnect_delay_ms: u64,
    /// Heart-beat offer in both directions; 0 disables heart-beats.
    pub heartbeat_ms: u64,
    pub topic: String,
    pub destination: String,
}

impl TerminalConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let api_base = optional_trimmed_env("CHAT_API_URL", &mut lookup)
            .unwrap_or_else(|| DEFAULT_API_URL.to_owned());
        validate_url("CHAT_API_URL", &api_base, &["http", "https"])?;

        let socket_url = optional_trimmed_env("CHAT_SOCKET_URL", &mut lookup);
        if let Some(socket_url) = &socket_url {
            validate_url("CHAT_SOCKET_URL", socket_url, &["ws", "wss"])?;
        }

        let token = optional_trimmed_env("CHAT_TOKEN", &mut lookup);
        let user_id = optional_trimmed_env("CHAT_USER_ID", &mut lookup);
        let credentials_file =
            optional_trimmed_env("CHAT_CREDENTIALS_FILE", &mut lookup).map(PathBuf::from);

        let reconnect_delay_ms = parse_u64_with_default(
            "CHAT_RECONNECT_DELAY_MS",
            DEFAULT_RECONNECT_DELAY_MS,
            &mut lookup,
        )?;
        if reconnect_delay_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CHAT_RECONNECT_DELAY_MS",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        let heartbeat_ms =
            parse_u64_with_default("CHAT_HEARTBEAT_MS", DEFAULT_HEARTBEAT_MS, &mut lookup)?;

        let topic = optional_trimmed_env("CHAT_TOPIC", &mut lookup)
            .unwrap_or_else(|| DEFAULT_BROADCAST_TOPIC.to_owned());
        let destination = optional_trimmed_env("CHAT_DESTINATION", &mut lookup)
            .unwrap_or_else(|| DEFAULT_SEND_DESTINATION.to_owned());

        Ok(Self {
            api_base,
            socket_url,
            token,
            user_id,
            credentials_file,
            reconnect_delay_ms,
            heartbeat_ms,
            topic,
            destination,
        })
    }

    /// Session settings derived from this configuration.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            socket_url: self.socket_url.clone(),
            channel: ChannelConfig {
                topic: self.topic.clone(),
                destination: self.destination.clone(),
            },
            reconnect: ReconnectPolicy::new(self.reconnect_delay_ms),
            heart_beat: HeartBeat {
                outgoing_ms: self.heartbeat_ms,
                incoming_ms: self.heartbeat_ms,
            },
            ..SessionConfig::new(self.api_base.clone())
        }
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    #[error("invalid {key}='{value}': {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_u64_with_default<F>(
    key: &'static str,
    default: u64,
    lookup: &mut F,
) -> Result<u64, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    value
        .parse::<u64>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn validate_url(key: &'static str, value: &str, schemes: &[&str]) -> Result<(), ConfigError> {
    let url = Url::parse(value).map_err(|err| ConfigError::InvalidValue {
        key,
        value: value.to_owned(),
        reason: err.to_string(),
    })?;
    if !schemes.contains(&url.scheme()) {
        return Err(ConfigError::InvalidValue {
            key,
            value: value.to_owned(),
            reason: format!("scheme must be one of {}", schemes.join(", ")),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<TerminalConfig, ConfigError> {
        let values: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        TerminalConfig::from_lookup(|key| values.get(key).cloned())
    }

    #[test]
    fn uses_defaults_when_env_is_empty() {
        let config = from_pairs(&[]).expect("config should parse");
        assert_eq!(config.api_base, "http://localhost:8080");
        assert_eq!(config.reconnect_delay_ms, 5_000);
        assert_eq!(config.heartbeat_ms, 10_000);
        assert_eq!(config.topic, "/topic/public");
        assert_eq!(config.destination, "/app/chat.sendMessage");
        assert!(config.token.is_none());
        assert!(config.credentials_file.is_none());
    }

    #[test]
    fn parses_overrides() {
        let config = from_pairs(&[
            ("CHAT_API_URL", " https://school.example.org "),
            ("CHAT_SOCKET_URL", "wss://school.example.org/ws/websocket"),
            ("CHAT_TOKEN", "jwt"),
            ("CHAT_USER_ID", "42"),
            ("CHAT_CREDENTIALS_FILE", "/tmp/chat.json"),
            ("CHAT_RECONNECT_DELAY_MS", "250"),
            ("CHAT_HEARTBEAT_MS", "0"),
            ("CHAT_TOPIC", "/topic/class-7"),
        ])
        .expect("config should parse");

        assert_eq!(config.api_base, "https://school.example.org");
        assert_eq!(config.token.as_deref(), Some("jwt"));
        assert_eq!(config.credentials_file, Some(PathBuf::from("/tmp/chat.json")));
        assert_eq!(config.heartbeat_ms, 0);

        let session = config.session_config();
        assert_eq!(session.reconnect.delay_ms(), 250);
        assert_eq!(session.channel.topic, "/topic/class-7");
        assert_eq!(session.channel.destination, "/app/chat.sendMessage");
        assert_eq!(
            session.socket_url.as_deref(),
            Some("wss://school.example.org/ws/websocket")
        );
    }

    #[test]
    fn rejects_zero_reconnect_delay() {
        let err = from_pairs(&[("CHAT_RECONNECT_DELAY_MS", "0")]).expect_err("must fail");
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: "CHAT_RECONNECT_DELAY_MS",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            }
        );
        assert_eq!(
            err.to_string(),
            "invalid CHAT_RECONNECT_DELAY_MS='0': must be at least 1"
        );
    }

    #[test]
    fn rejects_non_numeric_values() {
        let err = from_pairs(&[("CHAT_HEARTBEAT_MS", "soon")]).expect_err("must fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "CHAT_HEARTBEAT_MS",
                ..
            }
        ));
    }

    #[test]
    fn rejects_wrong_url_schemes() {
        let err = from_pairs(&[("CHAT_API_URL", "ws://example.org")]).expect_err("must fail");
        assert!(err.to_string().starts_with("invalid CHAT_API_URL="));

        let err =
            from_pairs(&[("CHAT_SOCKET_URL", "https://example.org/ws")]).expect_err("must fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "CHAT_SOCKET_URL",
                ..
            }
        ));
    }
}
