use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use bridge_api::{DeliveryTask, RemoteStore, StoreError};

use crate::error::{PipelineError, QueueClosed};
use crate::queue::{DeliveryQueue, Enqueued};
use crate::retry::Backoff;
use crate::stats::Stats;

const PREVIEW_CHARS: usize = 128;

/// Политика повторов persistence writer'а.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Всего попыток, включая первую.
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Таймаут одного вызова store (отдельно от backoff).
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            backoff: Backoff::new(
                Duration::from_millis(500),
                Duration::from_secs(60),
                Duration::from_millis(250),
            ),
            call_timeout: Duration::from_secs(10),
        }
    }
}

/// Результат одной попытки записи.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Сгенерированный store'ом ключ.
    Ack(String),
    Retryable(StoreError),
    Fatal(StoreError),
}

// ═══════════════════════════════════════════════════════════════
//  PersistenceWriter
// ═══════════════════════════════════════════════════════════════

/// Consumer delivery queue: append в remote store с retry/backoff.
///
/// At-least-once: задача покидает pipeline только после ack'а store'а
/// или явного abandon (fatal ошибка, исчерпание попыток, shutdown).
pub struct PersistenceWriter {
    store: Arc<dyn RemoteStore>,
    queue: Arc<DeliveryQueue>,
    policy: RetryPolicy,
    stats: Arc<Stats>,
    retries: TaskTracker,
    /// Жёсткая остановка: истёк grace period drain'а.
    stop: CancellationToken,
}

impl PersistenceWriter {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        queue: Arc<DeliveryQueue>,
        policy: RetryPolicy,
        stats: Arc<Stats>,
        stop: CancellationToken,
    ) -> Self {
        Self {
            store,
            queue,
            policy,
            stats,
            retries: TaskTracker::new(),
            stop,
        }
    }

    /// Одна попытка append'а, ограниченная `call_timeout`.
    pub async fn write(&self, task: &DeliveryTask) -> WriteOutcome {
        let value = task.record.to_value();
        let call = self.store.append_child(&task.target_path, &value);
        match tokio::time::timeout(self.policy.call_timeout, call).await {
            Ok(Ok(key)) => WriteOutcome::Ack(key),
            Ok(Err(e)) if e.is_retryable() => WriteOutcome::Retryable(e),
            Ok(Err(e)) => WriteOutcome::Fatal(e),
            Err(_) => WriteOutcome::Retryable(StoreError::retryable(format!(
                "append timed out after {:?}",
                self.policy.call_timeout
            ))),
        }
    }

    /// Записать задачу и обработать результат: ack, отложенный retry
    /// или abandon.
    pub async fn deliver(&self, task: DeliveryTask) {
        match self.write(&task).await {
            WriteOutcome::Ack(key) => {
                Stats::inc(&self.stats.delivered);
                tracing::debug!(
                    path = %task.target_path,
                    key = %key,
                    sequence = task.record.sequence(),
                    attempt = task.attempt,
                    "record appended"
                );
            }
            WriteOutcome::Fatal(e) => {
                abandon(&self.stats, &task, &e.to_string());
            }
            WriteOutcome::Retryable(e) => {
                if task.attempt + 1 >= self.policy.max_attempts {
                    abandon(&self.stats, &task, &format!("retries exhausted: {e}"));
                } else {
                    let delay = self.policy.backoff.delay(task.attempt);
                    Stats::inc(&self.stats.retried);
                    tracing::warn!(
                        topic = %task.record.topic(),
                        path = %task.target_path,
                        sequence = task.record.sequence(),
                        attempt = task.attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "write failed, retry scheduled"
                    );
                    self.schedule_retry(task.next_attempt(), delay);
                }
            }
        }
    }

    /// Retry ждёт на таймере вне очереди; слот `Deferred` удерживает
    /// drain до возврата задачи в хвост очереди.
    fn schedule_retry(&self, task: DeliveryTask, delay: Duration) {
        let slot = self.queue.defer();
        let stats = self.stats.clone();
        let stop = self.stop.clone();
        self.retries.spawn(async move {
            let retry = task.clone();
            let requeued = tokio::select! {
                biased;
                _ = stop.cancelled() => None,
                r = async move {
                    tokio::time::sleep(delay).await;
                    slot.requeue(retry).await
                } => Some(r),
            };
            match requeued {
                Some(Ok(Enqueued::Accepted)) => {}
                Some(Ok(Enqueued::Displaced(old))) => report_displaced(&stats, &old),
                Some(Err(QueueClosed(task))) => abandon(&stats, &task, "queue closed"),
                None => abandon(&stats, &task, "shutdown"),
            }
        });
    }

    /// Consumer loop. Завершается, когда очередь закрыта и пуста и все
    /// retry завершены, либо по жёсткой остановке.
    pub async fn run(self) {
        tracing::info!(
            max_attempts = self.policy.max_attempts,
            call_timeout_ms = self.policy.call_timeout.as_millis() as u64,
            "writer started"
        );
        loop {
            let task = tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                task = self.queue.dequeue() => match task {
                    Some(task) => task,
                    None => break,
                },
            };
            self.deliver(task).await;
        }

        self.retries.close();
        self.retries.wait().await;

        // после жёсткой остановки в очереди могли остаться задачи
        while let Some(task) = self.queue.try_dequeue() {
            abandon(&self.stats, &task, "shutdown");
        }
        tracing::info!("writer stopped");
    }
}

/// Проверка store'а при старте: до `attempts` попыток `init` с backoff.
/// Fatal ошибка (неверные credentials, нет базы) не повторяется.
pub async fn init_store(store: &dyn RemoteStore, attempts: u32, policy: &RetryPolicy) -> Result<(), PipelineError> {
    let attempts = attempts.max(1);
    let mut attempt = 0;
    loop {
        let err = match tokio::time::timeout(policy.call_timeout, store.init()).await {
            Ok(Ok(())) => {
                tracing::info!(attempts = attempt + 1, "remote store ready");
                return Ok(());
            }
            Ok(Err(e)) => e,
            Err(_) => StoreError::retryable(format!("init timed out after {:?}", policy.call_timeout)),
        };
        attempt += 1;
        if !err.is_retryable() || attempt >= attempts {
            return Err(PipelineError::StoreInit { attempts: attempt, last: err });
        }
        let delay = policy.backoff.delay(attempt - 1);
        tracing::warn!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "remote store init failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

/// Терминальное событие: задача больше не будет записана.
pub(crate) fn abandon(stats: &Stats, task: &DeliveryTask, reason: &str) {
    Stats::inc(&stats.abandoned);
    let payload = task.record.to_value().to_string();
    tracing::error!(
        topic = %task.record.topic(),
        path = %task.target_path,
        sequence = task.record.sequence(),
        attempts = task.attempt + 1,
        reason = %reason,
        payload = %bridge_api::preview(payload.as_bytes(), PREVIEW_CHARS),
        "task abandoned"
    );
}

/// Задача вытеснена из полной очереди (DropOldest).
pub(crate) fn report_displaced(stats: &Stats, task: &DeliveryTask) {
    Stats::inc(&stats.displaced);
    tracing::warn!(
        topic = %task.record.topic(),
        path = %task.target_path,
        sequence = task.record.sequence(),
        attempt = task.attempt,
        "queue full, oldest task dropped"
    );
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;

    use bridge_api::{OverflowPolicy, Record};
    use tracing_test::traced_test;

    use super::*;

    /// Store, отвечающий заранее заданной последовательностью результатов.
    struct ScriptedStore {
        script: Mutex<VecDeque<Result<String, StoreError>>>,
        calls: Mutex<Vec<(String, serde_json::Value)>>,
    }

    impl ScriptedStore {
        fn new(script: Vec<Result<String, StoreError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl RemoteStore for ScriptedStore {
        fn init(&self) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }

        fn append_child(
            &self,
            path: &str,
            value: &serde_json::Value,
        ) -> Pin<Box<dyn Future<Output = Result<String, StoreError>> + Send + '_>> {
            self.calls.lock().unwrap().push((path.to_string(), value.clone()));
            let next = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("-key".into()));
            Box::pin(async move { next })
        }
    }

    /// Store, который никогда не отвечает.
    struct HangingStore;

    impl RemoteStore for HangingStore {
        fn init(&self) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }

        fn append_child(
            &self,
            _path: &str,
            _value: &serde_json::Value,
        ) -> Pin<Box<dyn Future<Output = Result<String, StoreError>> + Send + '_>> {
            Box::pin(std::future::pending())
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: Backoff::new(Duration::from_millis(100), Duration::from_secs(2), Duration::ZERO),
            call_timeout: Duration::from_secs(1),
        }
    }

    fn task(seq: u64) -> DeliveryTask {
        let mut fields = serde_json::Map::new();
        fields.insert("temp".into(), 21.5.into());
        DeliveryTask::new(Record::new("plant/t", fields, 1_700_000_000, seq, None), "/plant/readings")
    }

    fn writer(store: Arc<dyn RemoteStore>, max_attempts: u32) -> (PersistenceWriter, Arc<DeliveryQueue>, Arc<Stats>, CancellationToken) {
        let queue = Arc::new(DeliveryQueue::new(16, OverflowPolicy::BackPressure));
        let stats = Arc::new(Stats::default());
        let stop = CancellationToken::new();
        let w = PersistenceWriter::new(store, queue.clone(), policy(max_attempts), stats.clone(), stop.clone());
        (w, queue, stats, stop)
    }

    #[tokio::test]
    async fn write_classifies_outcomes() {
        let store = ScriptedStore::new(vec![
            Ok("-a".into()),
            Err(StoreError::retryable("503")),
            Err(StoreError::fatal("401")),
        ]);
        let (w, ..) = writer(store.clone(), 8);
        let t = task(1);
        assert_eq!(w.write(&t).await, WriteOutcome::Ack("-a".into()));
        assert!(matches!(w.write(&t).await, WriteOutcome::Retryable(_)));
        assert!(matches!(w.write(&t).await, WriteOutcome::Fatal(_)));

        let calls = store.calls.lock().unwrap();
        assert_eq!(calls[0].0, "/plant/readings");
        assert_eq!(calls[0].1["sequence"], serde_json::json!(1));
    }

    #[tokio::test(start_paused = true)]
    async fn call_timeout_is_retryable() {
        let (w, ..) = writer(Arc::new(HangingStore), 8);
        assert!(matches!(w.write(&task(1)).await, WriteOutcome::Retryable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_failure_is_requeued_then_delivered() {
        let store = ScriptedStore::new(vec![Err(StoreError::retryable("503")), Ok("-k".into())]);
        let (w, queue, stats, _stop) = writer(store.clone(), 8);

        w.deliver(task(1)).await;
        assert_eq!(queue.deferred(), 1);
        assert!(queue.is_empty());

        let retried = queue.dequeue().await.unwrap();
        assert_eq!(retried.attempt, 1);
        assert_eq!(retried.record.sequence(), 1);
        w.deliver(retried).await;

        let s = stats.snapshot();
        assert_eq!((s.delivered, s.retried, s.abandoned), (1, 1, 0));
        assert_eq!(store.calls(), 2);
        assert_eq!(queue.deferred(), 0);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn exhausted_retries_abandon_exactly_once() {
        let store = ScriptedStore::new(
            (0..10).map(|_| Err(StoreError::retryable("503"))).collect(),
        );
        let (w, queue, stats, _stop) = writer(store.clone(), 3);

        queue.enqueue(task(1)).await.unwrap();
        let before = queue.len();
        while let Some(t) = tokio::time::timeout(Duration::from_secs(30), queue.dequeue())
            .await
            .ok()
            .flatten()
        {
            w.deliver(t).await;
            if stats.snapshot().abandoned > 0 {
                break;
            }
        }

        assert_eq!(store.calls(), 3);
        let s = stats.snapshot();
        assert_eq!((s.retried, s.abandoned), (2, 1));
        assert_eq!(queue.len(), before - 1);
        assert_eq!(queue.deferred(), 0);
        logs_assert(|lines: &[&str]| {
            match lines.iter().filter(|l| l.contains("task abandoned")).count() {
                1 => Ok(()),
                n => Err(format!("expected one abandon event, got {n}")),
            }
        });
    }

    #[tokio::test]
    #[traced_test]
    async fn fatal_error_abandons_without_retry() {
        let store = ScriptedStore::new(vec![Err(StoreError::fatal("permission denied")), Ok("-k".into())]);
        let (w, queue, stats, _stop) = writer(store.clone(), 8);

        w.deliver(task(1)).await;
        w.deliver(task(2)).await;

        let s = stats.snapshot();
        assert_eq!((s.delivered, s.retried, s.abandoned), (1, 0, 1));
        assert_eq!(queue.deferred(), 0);
        assert!(logs_contain("permission denied"));
    }

    #[tokio::test(start_paused = true)]
    async fn run_drains_closed_queue_including_retries() {
        let store = ScriptedStore::new(vec![Err(StoreError::retryable("429"))]);
        let (w, queue, stats, _stop) = writer(store.clone(), 8);
        for i in 1..=3 {
            queue.enqueue(task(i)).await.unwrap();
        }
        queue.close();

        tokio::time::timeout(Duration::from_secs(30), w.run()).await.unwrap();

        let s = stats.snapshot();
        assert_eq!((s.delivered, s.retried, s.abandoned), (3, 1, 0));
        assert_eq!(store.calls(), 4);
    }

    /// Store, у которого init отвечает по сценарию.
    struct InitScript(Mutex<VecDeque<Result<(), StoreError>>>);

    impl RemoteStore for InitScript {
        fn init(&self) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
            let next = self.0.lock().unwrap().pop_front().unwrap_or(Ok(()));
            Box::pin(async move { next })
        }

        fn append_child(
            &self,
            _path: &str,
            _value: &serde_json::Value,
        ) -> Pin<Box<dyn Future<Output = Result<String, StoreError>> + Send + '_>> {
            Box::pin(async { Ok("-k".to_string()) })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn init_store_retries_transient_failures() {
        let store = InitScript(Mutex::new(
            vec![Err(StoreError::retryable("503")), Err(StoreError::retryable("timeout"))].into(),
        ));
        init_store(&store, 5, &policy(8)).await.unwrap();
        assert!(store.0.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn init_store_gives_up() {
        let store = InitScript(Mutex::new((0..5).map(|_| Err(StoreError::retryable("503"))).collect()));
        match init_store(&store, 3, &policy(8)).await {
            Err(PipelineError::StoreInit { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("unexpected: {other:?}"),
        }

        let fatal = InitScript(Mutex::new(vec![Err(StoreError::fatal("401"))].into()));
        match init_store(&fatal, 5, &policy(8)).await {
            Err(PipelineError::StoreInit { attempts, last }) => {
                assert_eq!(attempts, 1);
                assert!(!last.is_retryable());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hard_stop_abandons_pending_retries() {
        let store = ScriptedStore::new(vec![Err(StoreError::retryable("503"))]);
        let (w, queue, stats, stop) = writer(store.clone(), 8);
        queue.enqueue(task(1)).await.unwrap();

        let handle = tokio::spawn(w.run());
        // первая попытка провалилась, retry ждёт на таймере
        while stats.snapshot().retried == 0 {
            tokio::task::yield_now().await;
        }
        stop.cancel();
        handle.await.unwrap();

        let s = stats.snapshot();
        assert_eq!((s.delivered, s.abandoned), (0, 1));
        assert_eq!(queue.deferred(), 0);
    }
}
