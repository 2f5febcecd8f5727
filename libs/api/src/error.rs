/// Почему payload не превратился в запись.
///
/// Всегда локальная ошибка: сообщение отбрасывается, считается и логируется,
/// pipeline продолжает работу.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Пустой payload (или только пробелы / невалидные байты).
    #[error("empty payload")]
    Empty,

    /// Синтаксически невалидный JSON.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// Валидный JSON, но верхний уровень не объект.
    #[error("payload is a JSON {0}, expected an object")]
    NotAnObject(&'static str),
}

/// Ошибка remote store. Категория определяет политику writer'а:
/// retryable повторяется с backoff, fatal отбрасывает задачу сразу.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Сеть, throttling, временная ошибка сервера, таймаут вызова.
    #[error("retryable: {0}")]
    Retryable(String),

    /// Невалидные credentials, отказ схемы, невалидный путь.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl StoreError {
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Retryable(_))
    }
}

/// Ошибки broker сессии. Любая из них при активной сессии означает
/// потерю соединения и обрабатывается reconnect-машиной супервизора.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("connect: {0}")]
    Connect(String),

    /// Broker ответил на handshake отказом (auth, protocol).
    #[error("connection refused: {0}")]
    Refused(String),

    #[error("subscribe ({topic}): {detail}")]
    Subscribe { topic: String, detail: String },

    /// Сессия потеряна: disconnect от broker'а, keep-alive timeout, I/O.
    #[error("connection lost: {0}")]
    Lost(String),

    /// Операция вызвана без активной сессии.
    #[error("not connected")]
    Closed,
}

/// Невалидная конфигурация plugin'а. Всегда фатальна при старте.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid plugin config: {0}")]
pub struct ConfigError(pub String);

impl ConfigError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        Self(e.to_string())
    }
}
