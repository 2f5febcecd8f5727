use std::time::Duration;

use rumqttc::{MqttOptions, QoS};

use bridge_api::ConfigError;

fn default_host() -> String {
    "localhost".into()
}
fn default_port() -> u16 {
    1883
}
fn default_client_id() -> String {
    "sensor-bridge".into()
}
fn default_keep_alive_secs() -> u64 {
    60
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_qos() -> u8 {
    1
}
fn default_clean_session() -> bool {
    true
}
fn default_channel_capacity() -> usize {
    64
}
fn default_max_packet_size() -> usize {
    1024 * 1024
}

/// `[broker_config]` для broker = "mqtt".
#[derive(Debug, Clone, serde::Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// QoS подписок: 0, 1 или 2.
    #[serde(default = "default_qos")]
    pub qos: u8,
    #[serde(default = "default_clean_session")]
    pub clean_session: bool,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Имя переменной окружения с паролем. Приоритетнее `password`.
    #[serde(default)]
    pub password_env: Option<String>,
    /// Ёмкость канала запросов клиента rumqttc.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Максимальный размер MQTT пакета в байтах (входящего и исходящего).
    /// Пакет больше лимита рвёт сессию целиком.
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            client_id: default_client_id(),
            keep_alive_secs: default_keep_alive_secs(),
            connect_timeout_ms: default_connect_timeout_ms(),
            qos: default_qos(),
            clean_session: default_clean_session(),
            username: None,
            password: None,
            password_env: None,
            channel_capacity: default_channel_capacity(),
            max_packet_size: default_max_packet_size(),
        }
    }
}

impl MqttConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::new("host is empty"));
        }
        if self.client_id.is_empty() {
            return Err(ConfigError::new("client_id is empty"));
        }
        if self.keep_alive_secs < 5 {
            return Err(ConfigError::new("keep_alive_secs must be at least 5"));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::new("channel_capacity must be at least 1"));
        }
        if self.max_packet_size < 1024 {
            return Err(ConfigError::new("max_packet_size must be at least 1024"));
        }
        self.qos()?;
        Ok(())
    }

    pub fn qos(&self) -> Result<QoS, ConfigError> {
        match self.qos {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            n => Err(ConfigError::new(format!("qos must be 0, 1 or 2 (got {n})"))),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    fn resolve_password(&self) -> Result<Option<String>, ConfigError> {
        if let Some(name) = &self.password_env {
            return std::env::var(name)
                .map(Some)
                .map_err(|_| ConfigError::new(format!("password_env: variable {name} is not set")));
        }
        Ok(self.password.clone())
    }

    /// Опции сессии. Каждый connect строит клиента заново из них.
    pub fn options(&self) -> Result<MqttOptions, ConfigError> {
        self.validate()?;
        let mut opts = MqttOptions::new(self.client_id.clone(), self.host.clone(), self.port);
        opts.set_keep_alive(Duration::from_secs(self.keep_alive_secs));
        opts.set_clean_session(self.clean_session);
        opts.set_max_packet_size(self.max_packet_size, self.max_packet_size);
        let password = self.resolve_password()?;
        if let Some(user) = &self.username {
            opts.set_credentials(user.clone(), password.unwrap_or_default());
        }
        Ok(opts)
    }
}
