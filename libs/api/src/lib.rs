use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub mod error;
pub mod types;
pub mod util;

pub use error::{ConfigError, ConnectionError, DecodeError, StoreError};
pub use types::{
    DeliveryTask, OverflowPolicy, RawMessage, Record, SubscriptionSpec, SEQUENCE_KEY,
    SERVER_TS_KEY,
};
pub use util::{is_valid_filter, now_secs, preview, topic_matches};

// ════════════════════════════════════════════════════════════════
//  Boundary Traits
// ════════════════════════════════════════════════════════════════

/// Иерархическое append-only хранилище (Firebase RTDB, memory, ...).
///
/// Каждый append независим: новый child с уникальным сгенерированным
/// ключом, соседи никогда не перезаписываются. Store упорядочивает
/// children по сгенерированному ключу.
pub trait RemoteStore: Send + Sync {
    /// Проверка доступности и credentials при старте.
    fn init(&self) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;

    /// Добавить child под `path`. Возвращает сгенерированный ключ.
    fn append_child(
        &self,
        path: &str,
        value: &serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<String, StoreError>> + Send + '_>>;

    /// Освободить ресурсы. Вызывается один раз, после остановки writer'а.
    fn shutdown(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async {})
    }
}

/// Publish/subscribe сессия с broker'ом.
///
/// Владеет соединением целиком; вызывается только из задачи
/// connection supervisor'а, поэтому методы берут `&mut self`.
pub trait Broker: Send {
    /// Полный handshake с новой сессией. Ok = сессия установлена.
    fn connect(&mut self) -> Pin<Box<dyn Future<Output = Result<(), ConnectionError>> + Send + '_>>;

    /// Подписаться на topic filter в текущей сессии.
    fn subscribe(
        &mut self,
        topic: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), ConnectionError>> + Send + '_>>;

    /// Следующее входящее сообщение. Ошибка = сессия потеряна
    /// (disconnect, keep-alive timeout, I/O).
    fn next_message(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Result<RawMessage, ConnectionError>> + Send + '_>>;

    /// Корректно закрыть сессию.
    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = Result<(), ConnectionError>> + Send + '_>>;
}

// ════════════════════════════════════════════════════════════════
//  Factories
// ════════════════════════════════════════════════════════════════

/// Создаёт store из JSON-конфига (`[storage_config]` таблица).
pub trait StoreFactory: Send + Sync {
    fn create(&self, config_json: &str) -> Result<Arc<dyn RemoteStore>, ConfigError>;
}

/// Создаёт broker из JSON-конфига (`[broker_config]` таблица).
pub trait BrokerFactory: Send + Sync {
    fn create(&self, config_json: &str) -> Result<Box<dyn Broker>, ConfigError>;
}

/// Пустой конфиг ("{}") означает defaults.
pub fn parse_config<T: serde::de::DeserializeOwned + Default>(config_json: &str) -> Result<T, ConfigError> {
    if config_json.trim().is_empty() || config_json == "{}" {
        return Ok(T::default());
    }
    Ok(serde_json::from_str(config_json)?)
}
