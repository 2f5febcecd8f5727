use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use bridge_api::{Broker, BrokerFactory, RemoteStore, StoreFactory};
use pipeline::Router;
use pipeline::config::{QueueConfig, ReconnectConfig, RetryConfig, SubscriptionConfig, config_json_or_empty};
use storage_firebase::FirebaseStoreFactory;
use storage_memory::MemoryStoreFactory;
use transport_mqtt::MqttBrokerFactory;

use crate::error::ServerError;

#[derive(Parser)]
#[command(name = "bridge-server", about = "Мост MQTT → Firebase Realtime Database")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Запустить мост
    Serve(ConfigArgs),
    /// Проверить конфиг и показать маршруты topic → path
    Check(ConfigArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ConfigArgs {
    /// Путь к TOML конфиг файлу
    #[arg(long, default_value = "config.toml", env = "BRIDGE_CONFIG")]
    pub config: String,
}

// ---- TOML Config ----

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Сколько ждать drain очереди при shutdown.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    #[serde(default = "default_broker")]
    pub broker: String,
    #[serde(default)]
    pub broker_config: Option<toml::Value>,
    #[serde(default = "default_storage")]
    pub storage: String,
    #[serde(default)]
    pub storage_config: Option<toml::Value>,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionConfig>,
}

fn default_shutdown_grace_ms() -> u64 {
    5000
}
fn default_broker() -> String {
    "mqtt".into()
}
fn default_storage() -> String {
    "firebase".into()
}

impl ServerConfig {
    pub fn load(path: &str) -> Result<Self, ServerError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config { context: "read", detail: format!("'{path}': {e}") })?;
        Self::parse(&content)
            .map_err(|e| ServerError::Config { context: "parse", detail: format!("'{path}': {e}") })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Все проверки, которые можно сделать без сети. Возвращает router,
    /// чтобы шаблоны путей разбирались один раз.
    pub fn validate(&self) -> Result<Router, ServerError> {
        pipeline::config::validate(&self.queue, &self.retry, &self.reconnect, &self.subscriptions)?;
        store_factory(&self.storage)?;
        broker_factory(&self.broker)?;
        Ok(Router::new(&self.subscriptions)?)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn create_store(&self) -> Result<Arc<dyn RemoteStore>, ServerError> {
        let config_json = config_json_or_empty(&self.storage_config)?;
        Ok(store_factory(&self.storage)?.create(&config_json)?)
    }

    pub fn create_broker(&self) -> Result<Box<dyn Broker>, ServerError> {
        let config_json = config_json_or_empty(&self.broker_config)?;
        Ok(broker_factory(&self.broker)?.create(&config_json)?)
    }
}

fn store_factory(name: &str) -> Result<&'static dyn StoreFactory, ServerError> {
    match name {
        "firebase" => Ok(&FirebaseStoreFactory),
        "memory" => Ok(&MemoryStoreFactory),
        other => Err(ServerError::UnknownPlugin { kind: "storage", name: other.to_string() }),
    }
}

fn broker_factory(name: &str) -> Result<&'static dyn BrokerFactory, ServerError> {
    match name {
        "mqtt" => Ok(&MqttBrokerFactory),
        other => Err(ServerError::UnknownPlugin { kind: "broker", name: other.to_string() }),
    }
}
