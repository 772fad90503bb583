// Конфигурация приложения
// Логирование по умолчанию включено только в режиме разработки

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::error::ConfigError;
use crate::media::MediaConstraints;
use crate::peer::types::ServerConfig;
use crate::signaling::Capabilities;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true; // В режиме отладки логирование включено

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false; // В продакшене логирование выключено, если не задано явно

pub const DEFAULT_SIGNALING_URL: &str = "ws://127.0.0.1:8080/ws";

/// Окно согласования, после которого оно считается неудачным
pub const NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Период ожидания восстановления peer connection
pub const GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Сколько сигнальный канал может лежать, пока ждём подбора пары
pub const SIGNALING_GRACE_PERIOD: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: LOGGING_ENABLED,
            filter: "info,ssc_roulette=debug,roulette_lib=debug,webrtc=warn".into(),
        }
    }
}

/// Повторное подключение к сигнальному серверу с экспоненциальной задержкой
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    #[serde(with = "millis")]
    pub initial_delay: Duration,
    #[serde(with = "millis")]
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub signaling_url: String,
    pub ice_servers: Vec<ServerConfig>,
    #[serde(with = "millis")]
    pub negotiation_timeout: Duration,
    #[serde(with = "millis")]
    pub link_grace_period: Duration,
    #[serde(with = "millis")]
    pub signaling_grace_period: Duration,
    pub reconnect: ReconnectPolicy,
    pub media: MediaConstraints,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            signaling_url: DEFAULT_SIGNALING_URL.into(),
            ice_servers: default_ice_servers(),
            negotiation_timeout: NEGOTIATION_TIMEOUT,
            link_grace_period: GRACE_PERIOD,
            signaling_grace_period: SIGNALING_GRACE_PERIOD,
            reconnect: ReconnectPolicy::default(),
            media: MediaConstraints::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Дефолтные STUN серверы
pub fn default_ice_servers() -> Vec<ServerConfig> {
    vec![
        ServerConfig {
            id: "default-stun".into(),
            r#type: "stun".into(),
            url: "stun:stun.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-1".into(),
            r#type: "stun".into(),
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Переменные окружения поверх текущих значений
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    /// То же, что `apply_env`, но переменные берутся из `var`
    pub fn apply_vars(
        &mut self,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(url) = var("SSC_SIGNALING_URL") {
            self.signaling_url = url;
        }
        if let Some(secs) = var("SSC_NEGOTIATION_TIMEOUT_SECS") {
            let parsed = secs.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                key: "SSC_NEGOTIATION_TIMEOUT_SECS".into(),
                value: secs.clone(),
            })?;
            self.negotiation_timeout = Duration::from_secs(parsed);
        }
        if let Some(filter) = var("SSC_LOG") {
            self.logging.enabled = true;
            self.logging.filter = filter;
        }
        Ok(())
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            video: self.media.video.is_some(),
            audio: self.media.audio,
        }
    }

    /// URL сигнального сервера; http(s) переводится в ws(s)
    pub fn websocket_url(&self) -> Result<Url, ConfigError> {
        let mut url = Url::parse(&self.signaling_url)
            .map_err(|e| ConfigError::InvalidUrl(self.signaling_url.clone(), e.to_string()))?;
        let scheme = match url.scheme() {
            "ws" | "http" => "ws",
            "wss" | "https" => "wss",
            other => {
                return Err(ConfigError::InvalidUrl(
                    self.signaling_url.clone(),
                    format!("unsupported scheme {other}"),
                ))
            }
        };
        url.set_scheme(scheme).map_err(|_| {
            ConfigError::InvalidUrl(self.signaling_url.clone(), "invalid websocket scheme".into())
        })?;
        Ok(url)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.websocket_url()?;

        for server in &self.ice_servers {
            if server.url.is_empty() {
                return Err(ConfigError::InvalidIceServer {
                    id: server.id.clone(),
                    reason: "server URL cannot be empty".into(),
                });
            }
            if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none())
            {
                return Err(ConfigError::InvalidIceServer {
                    id: server.id.clone(),
                    reason: "TURN servers require username and credential".into(),
                });
            }
        }

        if self.negotiation_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "negotiation_timeout".into(),
                value: "0".into(),
            });
        }
        if self.reconnect.multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                key: "reconnect.multiplier".into(),
                value: self.reconnect.multiplier.to_string(),
            });
        }
        Ok(())
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.negotiation_timeout, Duration::from_secs(10));
        assert_eq!(
            config.capabilities(),
            Capabilities {
                video: true,
                audio: true
            }
        );
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: Config = serde_json::from_str(
            r#"{ "signaling_url": "https://match.example.org/ws", "negotiation_timeout": 2500 }"#,
        )
        .unwrap();
        assert_eq!(config.negotiation_timeout, Duration::from_millis(2500));
        assert_eq!(config.link_grace_period, GRACE_PERIOD);
        assert_eq!(config.websocket_url().unwrap().scheme(), "wss");
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("SSC_SIGNALING_URL", "ws://10.0.0.5:9000/ws"),
            ("SSC_NEGOTIATION_TIMEOUT_SECS", "4"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config
            .apply_vars(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.signaling_url, "ws://10.0.0.5:9000/ws");
        assert_eq!(config.negotiation_timeout, Duration::from_secs(4));

        let err = Config::default()
            .apply_vars(|k| (k == "SSC_NEGOTIATION_TIMEOUT_SECS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn turn_without_credentials_is_rejected() {
        let mut config = Config::default();
        config.ice_servers.push(ServerConfig {
            id: "relay".into(),
            r#type: "turn".into(),
            url: "relay.example.org:3478".into(),
            username: None,
            credential: None,
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidIceServer { .. })
        ));
    }

    #[test]
    fn unsupported_scheme_is_rejected() {
        let config = Config {
            signaling_url: "ftp://example.org".into(),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidUrl(..))));
    }
}
