use std::time::Duration;

use serde::Deserialize;

use bridge_api::OverflowPolicy;

use crate::PipelineError;
use crate::retry::Backoff;
use crate::supervisor::ReconnectPolicy;
use crate::writer::RetryPolicy;

pub use bridge_api::SubscriptionSpec as SubscriptionConfig;

// ═══════════════════════════════════════════════════════════════
//  Queue Config
// ═══════════════════════════════════════════════════════════════

/// Delivery queue между ingestion и writer'ом.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Максимум задач в очереди.
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
    /// Поведение при переполнении: ждать (back_pressure) или вытеснять
    /// самую старую задачу (drop_oldest).
    #[serde(default)]
    pub overflow: OverflowPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
            overflow: OverflowPolicy::default(),
        }
    }
}

fn default_queue_capacity() -> usize {
    1000
}

// ═══════════════════════════════════════════════════════════════
//  Retry Config
// ═══════════════════════════════════════════════════════════════

/// Повторы записи в remote store.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Всего попыток на задачу, включая первую.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_retry_jitter_ms")]
    pub jitter_ms: u64,
    /// Таймаут одного вызова store.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Попыток init store'а при старте.
    #[serde(default = "default_init_attempts")]
    pub init_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_retry_base_ms(),
            max_delay_ms: default_retry_max_ms(),
            jitter_ms: default_retry_jitter_ms(),
            call_timeout_ms: default_call_timeout_ms(),
            init_attempts: default_init_attempts(),
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            Duration::from_millis(self.jitter_ms),
        )
    }

    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: self.backoff(),
            call_timeout: Duration::from_millis(self.call_timeout_ms),
        }
    }
}

fn default_max_attempts() -> u32 {
    8
}
fn default_retry_base_ms() -> u64 {
    500
}
fn default_retry_max_ms() -> u64 {
    60_000
}
fn default_retry_jitter_ms() -> u64 {
    250
}
fn default_call_timeout_ms() -> u64 {
    10_000
}
fn default_init_attempts() -> u32 {
    5
}

// ═══════════════════════════════════════════════════════════════
//  Reconnect Config
// ═══════════════════════════════════════════════════════════════

/// Переподключение к broker'у.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_reconnect_base_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_reconnect_jitter_ms")]
    pub jitter_ms: u64,
    /// Сессия дольше этого сбрасывает backoff.
    #[serde(default = "default_stable_after_ms")]
    pub stable_after_ms: u64,
    /// Попыток до первой сессии, после которых процесс завершается.
    #[serde(default = "default_startup_attempts")]
    pub startup_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_reconnect_base_ms(),
            max_delay_ms: default_reconnect_max_ms(),
            jitter_ms: default_reconnect_jitter_ms(),
            stable_after_ms: default_stable_after_ms(),
            startup_attempts: default_startup_attempts(),
        }
    }
}

impl ReconnectConfig {
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            backoff: Backoff::new(
                Duration::from_millis(self.base_delay_ms),
                Duration::from_millis(self.max_delay_ms),
                Duration::from_millis(self.jitter_ms),
            ),
            stable_after: Duration::from_millis(self.stable_after_ms),
            startup_attempts: self.startup_attempts,
        }
    }
}

fn default_reconnect_base_ms() -> u64 {
    1000
}
fn default_reconnect_max_ms() -> u64 {
    30_000
}
fn default_reconnect_jitter_ms() -> u64 {
    500
}
fn default_stable_after_ms() -> u64 {
    30_000
}
fn default_startup_attempts() -> u32 {
    5
}

// ═══════════════════════════════════════════════════════════════
//  Validation
// ═══════════════════════════════════════════════════════════════

/// Проверки, не выразимые через serde.
pub fn validate(
    queue: &QueueConfig,
    retry: &RetryConfig,
    reconnect: &ReconnectConfig,
    subscriptions: &[SubscriptionConfig],
) -> Result<(), PipelineError> {
    let invalid = |context, detail: &str| PipelineError::Config {
        context,
        detail: detail.to_string(),
    };
    if subscriptions.is_empty() {
        return Err(invalid("subscriptions", "no [[subscriptions]] configured"));
    }
    if queue.capacity == 0 {
        return Err(invalid("queue", "capacity must be at least 1"));
    }
    if retry.max_attempts == 0 {
        return Err(invalid("retry", "max_attempts must be at least 1"));
    }
    if retry.init_attempts == 0 {
        return Err(invalid("retry", "init_attempts must be at least 1"));
    }
    if reconnect.startup_attempts == 0 {
        return Err(invalid("reconnect", "startup_attempts must be at least 1"));
    }
    if reconnect.base_delay_ms > reconnect.max_delay_ms || retry.base_delay_ms > retry.max_delay_ms {
        return Err(invalid("backoff", "base_delay_ms exceeds max_delay_ms"));
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════
//  Helpers
// ═══════════════════════════════════════════════════════════════

/// Сериализовать Option<toml::Value> в JSON-строку (или "{}").
pub fn config_json_or_empty<T: serde::Serialize>(val: &Option<T>) -> Result<String, PipelineError> {
    match val {
        Some(v) => serde_json::to_string(v).map_err(|e| PipelineError::Config {
            context: "serialize",
            detail: e.to_string(),
        }),
        None => Ok("{}".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let q = QueueConfig::default();
        assert_eq!((q.capacity, q.overflow), (1000, OverflowPolicy::BackPressure));
        let r = RetryConfig::default().policy();
        assert_eq!(r.max_attempts, 8);
        assert_eq!(r.call_timeout, Duration::from_secs(10));
        let c = ReconnectConfig::default().policy();
        assert_eq!(c.startup_attempts, 5);
    }

    #[test]
    fn validation_rejects_degenerate_values() {
        let subs = [SubscriptionConfig::new("a", "/a")];
        let ok = validate(&QueueConfig::default(), &RetryConfig::default(), &ReconnectConfig::default(), &subs);
        assert!(ok.is_ok());

        let no_subs = validate(&QueueConfig::default(), &RetryConfig::default(), &ReconnectConfig::default(), &[]);
        assert!(no_subs.is_err());

        let zero = QueueConfig { capacity: 0, ..Default::default() };
        assert!(validate(&zero, &RetryConfig::default(), &ReconnectConfig::default(), &subs).is_err());

        let no_tries = RetryConfig { max_attempts: 0, ..Default::default() };
        assert!(validate(&QueueConfig::default(), &no_tries, &ReconnectConfig::default(), &subs).is_err());
    }

    #[test]
    fn partial_tables_fill_defaults() {
        let q: QueueConfig = serde_json::from_str(r#"{"overflow":"drop_oldest"}"#).unwrap();
        assert_eq!((q.capacity, q.overflow), (1000, OverflowPolicy::DropOldest));
        let r: RetryConfig = serde_json::from_str(r#"{"max_attempts":3}"#).unwrap();
        assert_eq!((r.max_attempts, r.base_delay_ms), (3, 500));
    }
}
