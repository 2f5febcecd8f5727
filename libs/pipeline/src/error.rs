use bridge_api::{ConnectionError, DeliveryTask, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("path template '{template}': {detail}")]
    Template { template: String, detail: String },

    /// Broker недоступен при старте после всех попыток.
    #[error("broker unreachable after {attempts} attempts: {last}")]
    Startup { attempts: u32, last: ConnectionError },

    /// Store не прошёл init при старте.
    #[error("store init failed after {attempts} attempts: {last}")]
    StoreInit { attempts: u32, last: StoreError },
}

/// Очередь закрыта; задача возвращается вызывающему.
#[derive(Debug, thiserror::Error)]
#[error("delivery queue closed")]
pub struct QueueClosed(pub DeliveryTask);
