use std::env;
use std::time::Duration;

use opconsole_api::client::CONNECT_TIMEOUT_ENV;
use tracing::warn;
use url::Url;

use crate::keys::CloseKeys;
use crate::session::reconnect::ReconnectPolicy;
use crate::session::reconnect::DEFAULT_RECONNECT_ATTEMPTS;
use crate::session::reconnect::DEFAULT_RECONNECT_DELAY;

pub const SOCKET_URL_ENV: &str = "OPCONSOLE_SOCKET_URL";
pub const RECONNECT_ATTEMPTS_ENV: &str = "OPCONSOLE_RECONNECT_ATTEMPTS";
pub const RECONNECT_DELAY_ENV: &str = "OPCONSOLE_RECONNECT_DELAY_MS";
pub const OPEN_COMMAND_ENV: &str = "OPCONSOLE_OPEN_COMMAND";
pub const CLOSE_KEYS_ENV: &str = "OPCONSOLE_CLOSE_KEYS";

const DEFAULT_SOCKET_URL: &str = "ws://127.0.0.1:8001/ws";
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub socket_url: Url,
    pub connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    /// Run once through the execution gateway right after the banner.
    pub open_command: Option<String>,
    pub close_keys: CloseKeys,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl SessionConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup; invalid values are
    /// logged and replaced by their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let value = |key: &str| {
            lookup(key)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };

        let socket_url = match value(SOCKET_URL_ENV) {
            Some(raw) => match Url::parse(&raw) {
                Ok(url) => url,
                Err(err) => {
                    warn!(value = %raw, error = %err, "Invalid {SOCKET_URL_ENV}; using default");
                    default_socket_url()
                }
            },
            None => default_socket_url(),
        };

        let connect_timeout = Duration::from_secs(parse_number(
            CONNECT_TIMEOUT_ENV,
            value(CONNECT_TIMEOUT_ENV),
            DEFAULT_CONNECT_TIMEOUT_SECS,
        ));

        let attempts = parse_number(
            RECONNECT_ATTEMPTS_ENV,
            value(RECONNECT_ATTEMPTS_ENV),
            u64::from(DEFAULT_RECONNECT_ATTEMPTS),
        );
        let attempts = u32::try_from(attempts).unwrap_or(u32::MAX);
        let delay = Duration::from_millis(parse_number(
            RECONNECT_DELAY_ENV,
            value(RECONNECT_DELAY_ENV),
            DEFAULT_RECONNECT_DELAY.as_millis() as u64,
        ));

        let close_keys = match value(CLOSE_KEYS_ENV) {
            Some(raw) => raw.parse().unwrap_or_else(|err: String| {
                warn!(value = %raw, error = %err, "Invalid {CLOSE_KEYS_ENV}; using default");
                CloseKeys::default()
            }),
            None => CloseKeys::default(),
        };

        Self {
            socket_url,
            connect_timeout,
            reconnect: ReconnectPolicy::new(attempts, delay),
            open_command: value(OPEN_COMMAND_ENV),
            close_keys,
        }
    }

    pub fn with_socket_url(mut self, socket_url: Url) -> Self {
        self.socket_url = socket_url;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn with_open_command(mut self, command: Option<String>) -> Self {
        self.open_command = command
            .map(|command| command.trim().to_string())
            .filter(|command| !command.is_empty());
        self
    }

    pub fn with_close_keys(mut self, close_keys: CloseKeys) -> Self {
        self.close_keys = close_keys;
        self
    }
}

fn default_socket_url() -> Url {
    Url::parse(DEFAULT_SOCKET_URL)
        .unwrap_or_else(|err| unreachable!("default socket URL is valid: {err}"))
}

fn parse_number(key: &str, raw: Option<String>, default: u64) -> u64 {
    let Some(raw) = raw else {
        return default;
    };
    match raw.parse::<u64>() {
        Ok(parsed) => parsed,
        Err(_) => {
            warn!(value = %raw, key, "Invalid numeric config; using default");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> SessionConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SessionConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.socket_url.as_str(), "ws://127.0.0.1:8001/ws");
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.reconnect, ReconnectPolicy::default());
        assert_eq!(config.open_command, None);
        assert_eq!(config.close_keys, CloseKeys::default());
    }

    #[test]
    fn test_values_from_lookup() {
        let config = config_from(&[
            (SOCKET_URL_ENV, "ws://gateway:9000/term"),
            (CONNECT_TIMEOUT_ENV, "3"),
            (RECONNECT_ATTEMPTS_ENV, "2"),
            (RECONNECT_DELAY_ENV, "250"),
            (OPEN_COMMAND_ENV, " ls "),
            (CLOSE_KEYS_ENV, "none"),
        ]);
        assert_eq!(config.socket_url.as_str(), "ws://gateway:9000/term");
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.reconnect.max_attempts(), 2);
        assert_eq!(config.reconnect.delay(), Duration::from_millis(250));
        assert_eq!(config.open_command.as_deref(), Some("ls"));
        assert!(config.close_keys.is_disabled());
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = config_from(&[
            (SOCKET_URL_ENV, "not a url"),
            (RECONNECT_ATTEMPTS_ENV, "many"),
            (RECONNECT_DELAY_ENV, "-5"),
            (OPEN_COMMAND_ENV, "   "),
        ]);
        assert_eq!(config.socket_url.as_str(), "ws://127.0.0.1:8001/ws");
        assert_eq!(config.reconnect, ReconnectPolicy::default());
        assert_eq!(config.open_command, None);
    }

    #[test]
    fn test_builder_pattern() {
        let config = config_from(&[])
            .with_socket_url(Url::parse("ws://10.0.0.1:8001/ws").unwrap())
            .with_connect_timeout(Duration::from_secs(1))
            .with_reconnect(ReconnectPolicy::disabled())
            .with_open_command(Some("uptime".into()))
            .with_close_keys(CloseKeys::disabled());
        assert_eq!(config.socket_url.host_str(), Some("10.0.0.1"));
        assert_eq!(config.connect_timeout, Duration::from_secs(1));
        assert_eq!(config.reconnect.max_attempts(), 0);
        assert_eq!(config.open_command.as_deref(), Some("uptime"));
        assert!(config.close_keys.is_disabled());
    }
}
