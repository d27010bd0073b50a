use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::{RecordFilter, RecordOrder, Store, StoreStats};
use crate::model::{CanonicalRecord, DedupKey, Enrichment};

#[derive(Default)]
struct Inner {
    rows: Vec<CanonicalRecord>,
    by_key: HashMap<DedupKey, usize>,
}

/// Process-local `Store` with the same dedup and atomicity contract as Postgres.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    ingest_locked: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: i64) -> Option<CanonicalRecord> {
        let idx = usize::try_from(id).ok()?.checked_sub(1)?;
        self.lock().rows.get(idx).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock only means a panicking test thread; the data is still consistent.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert(&self, record: &CanonicalRecord) -> Result<bool> {
        let mut inner = self.lock();
        let key = record.dedup_key();
        if inner.by_key.contains_key(&key) {
            return Ok(false);
        }
        let now = Utc::now();
        let mut row = record.clone();
        row.id = Some(inner.rows.len() as i64 + 1);
        row.created_at = now;
        row.updated_at = now;
        row.enrichment = None;
        let idx = inner.rows.len();
        inner.rows.push(row);
        inner.by_key.insert(key, idx);
        Ok(true)
    }

    async fn select(&self, filter: &RecordFilter) -> Result<Vec<CanonicalRecord>> {
        let inner = self.lock();
        let mut out: Vec<CanonicalRecord> = inner
            .rows
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        match filter.order {
            RecordOrder::CapturedDesc => {
                out.sort_by(|a, b| b.captured_at.cmp(&a.captured_at).then(b.id.cmp(&a.id)))
            }
            RecordOrder::EnrichedAsc => {
                // NULLS LAST, like the SQL backend
                out.sort_by_key(|r| (r.enriched_at().is_none(), r.enriched_at(), r.id))
            }
        }
        if let Some(limit) = filter.limit {
            out.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }
        Ok(out)
    }

    async fn update_enrichment(&self, id: i64, enrichment: &Enrichment) -> Result<bool> {
        let mut inner = self.lock();
        let Some(idx) = usize::try_from(id).ok().and_then(|i| i.checked_sub(1)) else {
            return Ok(false);
        };
        let Some(row) = inner.rows.get_mut(idx) else {
            return Ok(false);
        };
        row.enrichment = Some(enrichment.clone());
        row.updated_at = Utc::now().max(row.created_at);
        Ok(true)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let inner = self.lock();
        let last_capture = inner.rows.iter().map(|r| r.captured_at).max();
        let current_records = match last_capture {
            Some(last) => {
                let since = last - Duration::days(1);
                inner.rows.iter().filter(|r| r.captured_at >= since).count() as i64
            }
            None => 0,
        };
        Ok(StoreStats {
            total_records: inner.rows.len() as i64,
            current_records,
            enriched_records: inner.rows.iter().filter(|r| r.is_enriched()).count() as i64,
            last_capture,
        })
    }

    async fn try_lock_ingest(&self) -> Result<bool> {
        Ok(self
            .ingest_locked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok())
    }

    async fn unlock_ingest(&self) -> Result<()> {
        self.ingest_locked.store(false, Ordering::Release);
        Ok(())
    }
}
