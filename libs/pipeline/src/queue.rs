use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use bridge_api::{DeliveryTask, OverflowPolicy};

use crate::error::QueueClosed;

/// Результат успешного enqueue.
#[derive(Debug)]
pub enum Enqueued {
    Accepted,
    /// Очередь была полна (DropOldest): задача принята, самая старая вытеснена.
    Displaced(DeliveryTask),
}

impl Enqueued {
    /// `false`, если ради этой задачи пришлось выбросить другую.
    pub fn is_accepted(&self) -> bool {
        matches!(self, Enqueued::Accepted)
    }
}

struct State {
    tasks: VecDeque<DeliveryTask>,
    closed: bool,
    /// Задачи, ждущие retry на таймере (вне очереди, но ещё не завершены).
    deferred: usize,
}

// ═══════════════════════════════════════════════════════════════
//  DeliveryQueue
// ═══════════════════════════════════════════════════════════════

/// Bounded FIFO между ingestion и persistence writer'ом.
///
/// Единственное разделяемое изменяемое состояние между задачами.
/// FIFO сохраняется для задач одного producer'а; при переполнении
/// либо back-pressure (producer ждёт), либо вытеснение самой старой
/// задачи, в зависимости от `OverflowPolicy`.
pub struct DeliveryQueue {
    state: Mutex<State>,
    capacity: usize,
    overflow: OverflowPolicy,
    /// Появилась задача или очередь завершилась.
    items: Notify,
    /// Освободилось место или очередь закрыта.
    space: Notify,
}

impl DeliveryQueue {
    pub fn new(capacity: usize, overflow: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(State {
                tasks: VecDeque::with_capacity(capacity.min(65536)),
                closed: false,
                deferred: 0,
            }),
            capacity,
            overflow,
            items: Notify::new(),
            space: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn overflow(&self) -> OverflowPolicy {
        self.overflow
    }

    /// Задач в очереди (без ожидающих retry).
    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Задач, ждущих retry на таймере.
    pub fn deferred(&self) -> usize {
        self.lock().deferred
    }

    /// Поставить задачу от ingestion. В режиме BackPressure ждёт места.
    pub async fn enqueue(&self, task: DeliveryTask) -> Result<Enqueued, QueueClosed> {
        self.push(task, false).await
    }

    /// Следующая задача. Ждёт, пока задача появится; `None`, когда очередь
    /// закрыта, пуста и отложенных retry не осталось.
    pub async fn dequeue(&self) -> Option<DeliveryTask> {
        loop {
            let notified = self.items.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.lock();
                if let Some(task) = state.tasks.pop_front() {
                    drop(state);
                    self.space.notify_one();
                    return Some(task);
                }
                if state.closed && state.deferred == 0 {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Неблокирующий вариант `dequeue`.
    pub fn try_dequeue(&self) -> Option<DeliveryTask> {
        let task = self.lock().tasks.pop_front();
        if task.is_some() {
            self.space.notify_one();
        }
        task
    }

    /// Закрыть для ingestion. Уже поставленные и отложенные задачи
    /// дорабатываются (drain).
    pub fn close(&self) {
        self.lock().closed = true;
        self.items.notify_waiters();
        self.space.notify_waiters();
    }

    /// Зарезервировать слот под отложенный retry. Пока слот жив, `dequeue`
    /// не считает очередь завершённой.
    pub fn defer(self: &Arc<Self>) -> Deferred {
        self.lock().deferred += 1;
        Deferred {
            queue: self.clone(),
            armed: true,
        }
    }

    async fn push(&self, task: DeliveryTask, retry: bool) -> Result<Enqueued, QueueClosed> {
        loop {
            let notified = self.space.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.lock();
                if state.closed && !retry {
                    return Err(QueueClosed(task));
                }
                if state.tasks.len() < self.capacity {
                    state.tasks.push_back(task);
                    if retry {
                        state.deferred -= 1;
                    }
                    drop(state);
                    self.items.notify_one();
                    return Ok(Enqueued::Accepted);
                }
                if self.overflow == OverflowPolicy::DropOldest {
                    if let Some(oldest) = state.tasks.pop_front() {
                        state.tasks.push_back(task);
                        if retry {
                            state.deferred -= 1;
                        }
                        drop(state);
                        self.items.notify_one();
                        return Ok(Enqueued::Displaced(oldest));
                    }
                }
            }
            notified.await;
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Deferred: слот отложенного retry
// ═══════════════════════════════════════════════════════════════

/// Слот задачи, ожидающей retry. Либо возвращается в очередь через
/// `requeue`, либо при drop освобождает слот (задача потеряна).
pub struct Deferred {
    queue: Arc<DeliveryQueue>,
    armed: bool,
}

impl Deferred {
    /// Вернуть задачу в хвост очереди. Закрытая очередь retry не отклоняет.
    pub async fn requeue(mut self, task: DeliveryTask) -> Result<Enqueued, QueueClosed> {
        let outcome = self.queue.push(task, true).await?;
        self.armed = false;
        Ok(outcome)
    }
}

impl Drop for Deferred {
    fn drop(&mut self) {
        if self.armed {
            self.queue.lock().deferred -= 1;
            self.queue.items.notify_waiters();
        }
    }
}
