//! MemoryLedger - HashMap 版の ledger（テスト・DB なしの開発用）

use async_trait::async_trait;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::domain::{DeliveryRecord, DeliveryStatus, LedgerSummary, RecordAttempt};
use crate::ports::{Clock, DeliveryLedger, SystemClock};

type Key = (String, String);

#[derive(Default)]
struct Inner {
    records: HashMap<Key, DeliveryRecord>,
    writes: u64,
}

/// Same upsert semantics as the SQLite ledger, kept in process memory.
#[derive(Default)]
pub struct MemoryLedger<C = SystemClock> {
    inner: Mutex<Inner>,
    clock: C,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C: Clock> MemoryLedger<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, lead_id: &str, partner_id: &str) -> Option<DeliveryRecord> {
        self.lock()
            .records
            .get(&(lead_id.to_string(), partner_id.to_string()))
            .cloned()
    }

    /// All records, ordered by (lead_id, partner_id).
    pub fn records(&self) -> Vec<DeliveryRecord> {
        let mut records: Vec<_> = self.lock().records.values().cloned().collect();
        records.sort_by(|a, b| (&a.lead_id, &a.partner_id).cmp(&(&b.lead_id, &b.partner_id)));
        records
    }

    /// Number of `record` and `mark_terminal` calls seen.
    pub fn writes(&self) -> u64 {
        self.lock().writes
    }

    pub fn summary(&self) -> LedgerSummary {
        let mut summary = LedgerSummary::default();
        for record in self.lock().records.values() {
            summary.add(record.status, 1);
        }
        summary
    }
}

#[async_trait]
impl<C: Clock> DeliveryLedger for MemoryLedger<C> {
    async fn record(&self, attempt: RecordAttempt) {
        let now = self.clock.now();
        let mut inner = self.lock();
        inner.writes += 1;
        let key = (attempt.lead_id.clone(), attempt.partner_id.clone());
        match inner.records.entry(key) {
            Entry::Occupied(mut existing) => existing.get_mut().apply(&attempt, now),
            Entry::Vacant(slot) => {
                slot.insert(DeliveryRecord::from_attempt(&attempt, now));
            }
        }
    }

    async fn mark_terminal(&self, lead_id: &str, partner_id: &str, error_message: &str) {
        let now = self.clock.now();
        let mut inner = self.lock();
        inner.writes += 1;
        inner
            .records
            .entry((lead_id.to_string(), partner_id.to_string()))
            .and_modify(|record| {
                record.status = DeliveryStatus::PermanentlyFailed;
                record.error_message = Some(error_message.to_string());
            })
            .or_insert_with(|| {
                DeliveryRecord::terminal_placeholder(lead_id, partner_id, error_message, now)
            });
    }
}
