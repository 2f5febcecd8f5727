use std::sync::Arc;

use serde::{Deserialize, Serialize};

// ════════════════════════════════════════════════════════════════
//  Overflow Policy
// ════════════════════════════════════════════════════════════════

/// Стратегия поведения при переполнении delivery queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Ingestion ждёт пока consumer освободит место. Ничего не теряется.
    #[default]
    #[serde(alias = "backpressure")]
    BackPressure,
    /// Очередь полна: вытеснить самую старую задачу, принять новую.
    #[serde(alias = "drop")]
    DropOldest,
}

// ════════════════════════════════════════════════════════════════
//  RawMessage
// ════════════════════════════════════════════════════════════════

/// Сообщение в том виде, в каком его отдал broker.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    /// Packet id broker'а, если QoS его назначает.
    pub broker_seq: Option<u64>,
}

impl RawMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            broker_seq: None,
        }
    }

    pub fn with_broker_seq(mut self, seq: u64) -> Self {
        self.broker_seq = Some(seq);
        self
    }
}

// ════════════════════════════════════════════════════════════════
//  Record
// ════════════════════════════════════════════════════════════════

/// Ключ серверного timestamp'а в сохранённом объекте.
pub const SERVER_TS_KEY: &str = "serverTimestamp";
/// Ключ process-local sequence в сохранённом объекте.
pub const SEQUENCE_KEY: &str = "sequence";

/// Декодированное и обогащённое сообщение. Неизменяемо после создания.
///
/// `fields` гибкие (форма payload датчика не фиксирована), метаданные
/// (`server_ts`, `sequence`, provenance) типизированы.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    topic: String,
    fields: serde_json::Map<String, serde_json::Value>,
    server_ts: i64,
    sequence: u64,
    broker_seq: Option<u64>,
}

impl Record {
    pub fn new(
        topic: impl Into<String>,
        fields: serde_json::Map<String, serde_json::Value>,
        server_ts: i64,
        sequence: u64,
        broker_seq: Option<u64>,
    ) -> Self {
        Self {
            topic: topic.into(),
            fields,
            server_ts,
            sequence,
            broker_seq,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn fields(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.fields
    }

    /// Unix seconds на момент получения.
    pub fn server_ts(&self) -> i64 {
        self.server_ts
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn broker_seq(&self) -> Option<u64> {
        self.broker_seq
    }

    /// Объект, который уходит в store: поля payload плюс ровно два ключа
    /// метаданных. Одноимённые ключи payload перезаписываются.
    pub fn to_value(&self) -> serde_json::Value {
        let mut map = self.fields.clone();
        map.insert(SERVER_TS_KEY.into(), self.server_ts.into());
        map.insert(SEQUENCE_KEY.into(), self.sequence.into());
        serde_json::Value::Object(map)
    }
}

impl Serialize for Record {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

// ════════════════════════════════════════════════════════════════
//  DeliveryTask
// ════════════════════════════════════════════════════════════════

/// Единица работы persistence writer'а.
#[derive(Debug, Clone)]
pub struct DeliveryTask {
    pub record: Arc<Record>,
    pub target_path: String,
    /// Номер попытки, начиная с 0.
    pub attempt: u32,
}

impl DeliveryTask {
    pub fn new(record: Record, target_path: impl Into<String>) -> Self {
        Self {
            record: Arc::new(record),
            target_path: target_path.into(),
            attempt: 0,
        }
    }

    /// Та же задача для следующей попытки.
    pub fn next_attempt(mut self) -> Self {
        self.attempt += 1;
        self
    }
}

// ════════════════════════════════════════════════════════════════
//  SubscriptionSpec
// ════════════════════════════════════════════════════════════════

/// Статическое соответствие broker topic → путь в store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionSpec {
    /// Topic filter (допускает `+` и завершающий `#`).
    pub topic: String,
    /// Шаблон пути: `{topic}` или `{N}` (N-й уровень topic'а).
    #[serde(rename = "path")]
    pub target_path_template: String,
}

impl SubscriptionSpec {
    pub fn new(topic: impl Into<String>, target_path_template: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            target_path_template: target_path_template.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(v: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        match v {
            serde_json::Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    #[test]
    fn stored_value_adds_exactly_two_keys() {
        let record = Record::new("plant/t", fields(json!({"temp": 21.5})), 1_700_000_000, 1, None);
        assert_eq!(
            record.to_value(),
            json!({"temp": 21.5, "serverTimestamp": 1_700_000_000, "sequence": 1})
        );
    }

    #[test]
    fn metadata_overwrites_payload_keys() {
        let record = Record::new("t", fields(json!({"sequence": "x", "a": 1})), 5, 9, None);
        let value = record.to_value();
        assert_eq!(value["sequence"], json!(9));
        assert_eq!(value.as_object().map(|m| m.len()), Some(3));
    }

    #[test]
    fn overflow_policy_aliases() {
        #[derive(Deserialize)]
        struct W {
            p: OverflowPolicy,
        }
        let w: W = serde_json::from_str(r#"{"p":"backpressure"}"#).unwrap();
        assert_eq!(w.p, OverflowPolicy::BackPressure);
        let w: W = serde_json::from_str(r#"{"p":"drop"}"#).unwrap();
        assert_eq!(w.p, OverflowPolicy::DropOldest);
    }

    #[test]
    fn next_attempt_keeps_record() {
        let task = DeliveryTask::new(Record::new("t", Default::default(), 0, 3, None), "/p");
        let retried = task.clone().next_attempt().next_attempt();
        assert_eq!(retried.attempt, 2);
        assert!(Arc::ptr_eq(&task.record, &retried.record));
    }
}
