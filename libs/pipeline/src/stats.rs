use std::sync::atomic::{AtomicU64, Ordering};

/// Счётчики pipeline'а. Общие для ingestion и writer задач.
#[derive(Debug, Default)]
pub struct Stats {
    pub received: AtomicU64,
    pub decode_failed: AtomicU64,
    pub unrouted: AtomicU64,
    pub displaced: AtomicU64,
    pub delivered: AtomicU64,
    pub retried: AtomicU64,
    pub abandoned: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub decode_failed: u64,
    pub unrouted: u64,
    pub displaced: u64,
    pub delivered: u64,
    pub retried: u64,
    pub abandoned: u64,
}

impl Stats {
    pub(crate) fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            decode_failed: self.decode_failed.load(Ordering::Relaxed),
            unrouted: self.unrouted.load(Ordering::Relaxed),
            displaced: self.displaced.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}
