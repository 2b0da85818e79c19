use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tickstash_warehouse::{CacheRow, FetchLogRecord};
use tokio::sync::RwLock;

use crate::cache::{BackendError, BackendFuture, BackendKind, CacheBackend, CacheKey};

#[derive(Debug, Default)]
struct Faults {
    reads: AtomicBool,
    writes: AtomicBool,
    audits: AtomicBool,
    probe: AtomicBool,
}

#[derive(Debug, Default)]
struct Counters {
    reads: AtomicUsize,
    writes: AtomicUsize,
}

/// Process-local backend with switchable failures. Used in tests and as a
/// scratch cache when no persistent backend is wanted.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    kind: BackendKind,
    rows: Arc<RwLock<HashMap<String, CacheRow>>>,
    audit: Arc<RwLock<Vec<FetchLogRecord>>>,
    faults: Arc<Faults>,
    counters: Arc<Counters>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::posing_as(BackendKind::Memory)
    }

    /// Reports `kind` as its identity so two memory backends can stand in for
    /// a local and a remote store.
    pub fn posing_as(kind: BackendKind) -> Self {
        Self {
            kind,
            rows: Arc::new(RwLock::new(HashMap::new())),
            audit: Arc::new(RwLock::new(Vec::new())),
            faults: Arc::new(Faults::default()),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn fail_reads(&self, fail: bool) {
        self.faults.reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.faults.writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_audits(&self, fail: bool) {
        self.faults.audits.store(fail, Ordering::SeqCst);
    }

    pub fn fail_probe(&self, fail: bool) {
        self.faults.probe.store(fail, Ordering::SeqCst);
    }

    /// Stores `row` verbatim, bypassing any encoding.
    pub async fn insert_row(&self, key: &CacheKey, row: CacheRow) {
        self.rows.write().await.insert(key.storage_key(), row);
    }

    pub async fn row(&self, key: &CacheKey) -> Option<CacheRow> {
        self.rows.read().await.get(&key.storage_key()).cloned()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    pub async fn audit_log(&self) -> Vec<FetchLogRecord> {
        self.audit.read().await.clone()
    }

    pub fn read_count(&self) -> usize {
        self.counters.reads.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.counters.writes.load(Ordering::SeqCst)
    }

    fn check(&self, flag: &AtomicBool, operation: &str) -> Result<(), BackendError> {
        if flag.load(Ordering::SeqCst) {
            return Err(BackendError::unavailable(
                self.kind,
                format!("injected {operation} failure"),
            ));
        }
        Ok(())
    }
}

impl CacheBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn read<'a>(&'a self, key: &'a CacheKey) -> BackendFuture<'a, Option<CacheRow>> {
        Box::pin(async move {
            self.counters.reads.fetch_add(1, Ordering::SeqCst);
            self.check(&self.faults.reads, "read")?;
            Ok(self.row(key).await)
        })
    }

    fn write<'a>(&'a self, key: &'a CacheKey, row: &'a CacheRow) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.counters.writes.fetch_add(1, Ordering::SeqCst);
            self.check(&self.faults.writes, "write")?;
            self.insert_row(key, row.clone()).await;
            Ok(())
        })
    }

    fn append_audit<'a>(&'a self, record: &'a FetchLogRecord) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.check(&self.faults.audits, "audit")?;
            self.audit.write().await.push(record.clone());
            Ok(())
        })
    }

    fn probe<'a>(&'a self) -> BackendFuture<'a, ()> {
        Box::pin(async move { self.check(&self.faults.probe, "probe") })
    }
}
