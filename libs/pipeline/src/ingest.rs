use std::sync::Arc;

use bridge_api::{DeliveryTask, RawMessage, preview};

use crate::decoder;
use crate::enricher::Enricher;
use crate::error::QueueClosed;
use crate::queue::{DeliveryQueue, Enqueued};
use crate::route::Router;
use crate::stats::Stats;
use crate::writer::{abandon, report_displaced};

const PREVIEW_CHARS: usize = 128;

/// Что стало с входящим сообщением.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Queued { sequence: u64 },
    /// Поставлено, но ради него вытеснена самая старая задача.
    Displaced { sequence: u64 },
    DecodeFailed,
    Unrouted,
    /// Очередь закрыта (shutdown).
    Closed,
}

/// Ingestion path: decode → route → enrich → enqueue.
///
/// Вызывается inline из задачи супервизора на каждое сообщение broker'а.
/// Блокирующего I/O нет; ждать может только enqueue в режиме back-pressure.
pub struct Ingestor {
    router: Router,
    enricher: Enricher,
    queue: Arc<DeliveryQueue>,
    stats: Arc<Stats>,
}

impl Ingestor {
    pub fn new(router: Router, enricher: Enricher, queue: Arc<DeliveryQueue>, stats: Arc<Stats>) -> Self {
        Self {
            router,
            enricher,
            queue,
            stats,
        }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub async fn handle(&self, raw: RawMessage) -> IngestOutcome {
        Stats::inc(&self.stats.received);

        let fields = match decoder::decode_message(&raw) {
            Ok(fields) => fields,
            Err(e) => {
                Stats::inc(&self.stats.decode_failed);
                tracing::warn!(
                    topic = %raw.topic,
                    payload = %preview(&raw.payload, PREVIEW_CHARS),
                    reason = %e,
                    "decode failed, dropping"
                );
                return IngestOutcome::DecodeFailed;
            }
        };

        let Some(path) = self.router.route(&raw.topic) else {
            Stats::inc(&self.stats.unrouted);
            tracing::warn!(
                topic = %raw.topic,
                payload = %preview(&raw.payload, PREVIEW_CHARS),
                "no subscription for topic, dropping"
            );
            return IngestOutcome::Unrouted;
        };

        let record = self.enricher.enrich(fields, &raw.topic, raw.broker_seq);
        let sequence = record.sequence();
        tracing::trace!(topic = %raw.topic, path = %path, sequence, "record enqueued");

        match self.queue.enqueue(DeliveryTask::new(record, path)).await {
            Ok(Enqueued::Accepted) => IngestOutcome::Queued { sequence },
            Ok(Enqueued::Displaced(old)) => {
                report_displaced(&self.stats, &old);
                IngestOutcome::Displaced { sequence }
            }
            Err(QueueClosed(task)) => {
                abandon(&self.stats, &task, "queue closed");
                IngestOutcome::Closed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bridge_api::{OverflowPolicy, SubscriptionSpec};
    use tracing_test::traced_test;

    use super::*;

    fn ingestor(capacity: usize, overflow: OverflowPolicy) -> (Ingestor, Arc<DeliveryQueue>, Arc<Stats>) {
        let router = Router::new(&[
            SubscriptionSpec::new("plant/esp32_01/telemetry", "/plant/esp32_01/readings"),
            SubscriptionSpec::new("plant/esp32_01/status", "/plant/esp32_01/status_log"),
        ])
        .unwrap();
        let queue = Arc::new(DeliveryQueue::new(capacity, overflow));
        let stats = Arc::new(Stats::default());
        (
            Ingestor::new(router, Enricher::new(), queue.clone(), stats.clone()),
            queue,
            stats,
        )
    }

    #[tokio::test]
    async fn valid_message_becomes_task() {
        let (ing, queue, _) = ingestor(8, OverflowPolicy::BackPressure);
        let outcome = ing
            .handle(RawMessage::new("plant/esp32_01/telemetry", br#"{"temp": 21.5}"#.to_vec()))
            .await;
        assert_eq!(outcome, IngestOutcome::Queued { sequence: 1 });

        let task = queue.try_dequeue().unwrap();
        assert_eq!(task.target_path, "/plant/esp32_01/readings");
        assert_eq!(task.attempt, 0);
        assert_eq!(task.record.topic(), "plant/esp32_01/telemetry");
    }

    #[tokio::test]
    #[traced_test]
    async fn malformed_payloads_never_create_tasks() {
        let (ing, queue, stats) = ingestor(8, OverflowPolicy::BackPressure);
        for payload in [&b"not json"[..], b"42", b"[1,2,3]", b"\"not json\""] {
            let outcome = ing
                .handle(RawMessage::new("plant/esp32_01/status", payload.to_vec()))
                .await;
            assert_eq!(outcome, IngestOutcome::DecodeFailed);
        }
        assert!(queue.is_empty());
        assert_eq!(stats.snapshot().decode_failed, 4);
        assert!(logs_contain("decode failed, dropping"));

        // неудачи не расходуют sequence
        let outcome = ing
            .handle(RawMessage::new("plant/esp32_01/status", br#"{"status":"online"}"#.to_vec()))
            .await;
        assert_eq!(outcome, IngestOutcome::Queued { sequence: 1 });
    }

    #[tokio::test]
    #[traced_test]
    async fn unknown_topic_is_logged_and_dropped() {
        let (ing, queue, stats) = ingestor(8, OverflowPolicy::BackPressure);
        let outcome = ing.handle(RawMessage::new("plant/other", b"{}".to_vec())).await;
        assert_eq!(outcome, IngestOutcome::Unrouted);
        assert!(queue.is_empty());
        assert_eq!(stats.snapshot().unrouted, 1);
        assert!(logs_contain("no subscription for topic"));
    }

    #[tokio::test]
    async fn drop_oldest_reports_displacement() {
        let (ing, queue, stats) = ingestor(1, OverflowPolicy::DropOldest);
        let msg = || RawMessage::new("plant/esp32_01/telemetry", br#"{"n":1}"#.to_vec());
        assert_eq!(ing.handle(msg()).await, IngestOutcome::Queued { sequence: 1 });
        assert_eq!(ing.handle(msg()).await, IngestOutcome::Displaced { sequence: 2 });
        assert_eq!(stats.snapshot().displaced, 1);
        assert_eq!(queue.try_dequeue().unwrap().record.sequence(), 2);
    }

    #[tokio::test]
    async fn closed_queue_rejects_ingestion() {
        let (ing, queue, stats) = ingestor(8, OverflowPolicy::BackPressure);
        queue.close();
        let outcome = ing
            .handle(RawMessage::new("plant/esp32_01/telemetry", b"{}".to_vec()))
            .await;
        assert_eq!(outcome, IngestOutcome::Closed);
        assert_eq!(stats.snapshot().abandoned, 1);
    }
}
