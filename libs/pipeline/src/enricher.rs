use std::sync::atomic::{AtomicU64, Ordering};

use bridge_api::{Record, now_secs};

use crate::decoder::Fields;

/// Присваивает серверный timestamp и process-local sequence.
///
/// Sequence начинается с 1 и строго растёт для всех topic'ов вместе;
/// переживает reconnect'ы (живёт столько же, сколько процесс).
pub struct Enricher {
    next_seq: AtomicU64,
    clock: fn() -> i64,
}

impl Default for Enricher {
    fn default() -> Self {
        Self::new()
    }
}

impl Enricher {
    pub fn new() -> Self {
        Self::with_clock(now_secs)
    }

    pub fn with_clock(clock: fn() -> i64) -> Self {
        Self {
            next_seq: AtomicU64::new(1),
            clock,
        }
    }

    pub fn enrich(&self, fields: Fields, topic: &str, broker_seq: Option<u64>) -> Record {
        let sequence = self.next_seq.fetch_add(1, Ordering::Relaxed);
        Record::new(topic, fields, (self.clock)(), sequence, broker_seq)
    }

    /// Sequence, который получит следующая запись.
    pub fn peek_next(&self) -> u64 {
        self.next_seq.load(Ordering::Relaxed)
    }
}
