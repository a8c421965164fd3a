//! In-process implementations of the registry, store, tracker, and lock
//! traits. Used for dry runs and tests; nothing here outlives the process.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::error::{AppError, ErrorClass};
use crate::job::{AttemptStats, ExtractionJob, JobStatus};
use crate::models::{
    FetchStatus, PropertyKey, PropertyRecord, SaleType, SourceDocument, StoredProperty,
    UpsertOutcome,
};
use crate::traits::{DocumentLocks, DocumentRegistry, JobTracker, PropertyStore};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Document registry over a fixed list of documents.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRegistry {
    documents: Arc<Mutex<Vec<SourceDocument>>>,
}

impl InMemoryRegistry {
    pub fn new(documents: Vec<SourceDocument>) -> Self {
        Self {
            documents: Arc::new(Mutex::new(documents)),
        }
    }

    pub fn documents(&self) -> Vec<SourceDocument> {
        lock(&self.documents).clone()
    }

    pub fn fetch_status(&self, document_id: Uuid) -> Option<FetchStatus> {
        lock(&self.documents)
            .iter()
            .find(|d| d.id == document_id)
            .map(|d| d.fetch_status)
    }
}

impl DocumentRegistry for InMemoryRegistry {
    async fn list_pending_documents(
        &self,
        jurisdiction: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SourceDocument>, AppError> {
        let mut pending: Vec<SourceDocument> = lock(&self.documents)
            .iter()
            .filter(|d| d.fetch_status == FetchStatus::Pending)
            .filter(|d| jurisdiction.is_none_or(|j| d.jurisdiction_id == j))
            .cloned()
            .collect();
        pending.sort_by_key(|d| d.registered_at);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn update_fetch_status(
        &self,
        document_id: Uuid,
        status: FetchStatus,
    ) -> Result<(), AppError> {
        let mut documents = lock(&self.documents);
        let doc = documents
            .iter_mut()
            .find(|d| d.id == document_id)
            .ok_or_else(|| AppError::Generic(format!("Unknown document {document_id}")))?;
        doc.fetch_status = status;
        Ok(())
    }
}

/// Property store keyed by (jurisdiction, parcel, sale type).
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    records: Arc<Mutex<HashMap<PropertyKey, StoredProperty>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &PropertyKey) -> Option<StoredProperty> {
        lock(&self.records).get(key).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.records).is_empty()
    }

    pub fn records(&self) -> Vec<PropertyRecord> {
        let mut records: Vec<PropertyRecord> = lock(&self.records)
            .values()
            .map(|s| s.record.clone())
            .collect();
        records.sort_by(|a, b| a.parcel_id.cmp(&b.parcel_id));
        records
    }
}

impl PropertyStore for InMemoryStore {
    async fn upsert(&self, record: &PropertyRecord) -> Result<UpsertOutcome, AppError> {
        let now = Utc::now();
        let mut records = lock(&self.records);
        match records.get_mut(&record.key()) {
            Some(existing) if existing.record.confidence > record.confidence => {
                Ok(UpsertOutcome::Skipped)
            }
            Some(existing) => {
                existing.record = record.clone();
                existing.updated_at = now;
                Ok(UpsertOutcome::Updated)
            }
            None => {
                records.insert(
                    record.key(),
                    StoredProperty {
                        id: Uuid::new_v4(),
                        record: record.clone(),
                        first_seen_at: now,
                        updated_at: now,
                    },
                );
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn list_properties(
        &self,
        jurisdiction: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StoredProperty>, AppError> {
        let mut found: Vec<StoredProperty> = lock(&self.records)
            .values()
            .filter(|s| jurisdiction.is_none_or(|j| s.record.jurisdiction_id == j))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        found.truncate(limit);
        Ok(found)
    }

    async fn document_sale_type(&self, document_id: Uuid) -> Result<Option<SaleType>, AppError> {
        Ok(lock(&self.records)
            .values()
            .filter(|s| s.record.document_id == document_id)
            .min_by_key(|s| s.first_seen_at)
            .map(|s| s.record.sale_type))
    }
}

/// Job tracker holding every job state in memory, in creation order.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTracker {
    jobs: Arc<Mutex<Vec<ExtractionJob>>>,
}

impl InMemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// All jobs, oldest first.
    pub fn jobs(&self) -> Vec<ExtractionJob> {
        lock(&self.jobs).clone()
    }
}

impl JobTracker for InMemoryTracker {
    async fn save_job(&self, job: &ExtractionJob) -> Result<(), AppError> {
        let mut jobs = lock(&self.jobs);
        match jobs.iter_mut().find(|j| j.id == job.id) {
            Some(existing) => *existing = job.clone(),
            None => jobs.push(job.clone()),
        }
        Ok(())
    }

    async fn list_jobs(
        &self,
        document_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<ExtractionJob>, AppError> {
        Ok(lock(&self.jobs)
            .iter()
            .rev()
            .filter(|j| document_id.is_none_or(|id| j.document_id == id))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn fail_stale_jobs(&self, older_than: Duration) -> Result<u64, AppError> {
        let ceiling = chrono::Duration::from_std(older_than)
            .map_err(|e| AppError::ConfigError(format!("Invalid stale ceiling: {e}")))?;
        let cutoff = Utc::now() - ceiling;

        let mut reaped = 0;
        for job in lock(&self.jobs).iter_mut() {
            if job.status == JobStatus::Running && job.started_at.is_some_and(|s| s < cutoff) {
                job.fail(
                    ErrorClass::Timeout,
                    "Job left running past the stale ceiling",
                    AttemptStats::default(),
                );
                reaped += 1;
            }
        }
        Ok(reaped)
    }
}

/// Process-local document locks.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLocks {
    held: Arc<Mutex<HashSet<Uuid>>>,
}

impl InMemoryLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_locked(&self, document_id: Uuid) -> bool {
        lock(&self.held).contains(&document_id)
    }
}

/// Releases its document when dropped.
#[derive(Debug)]
pub struct InMemoryLockGuard {
    document_id: Uuid,
    held: Arc<Mutex<HashSet<Uuid>>>,
}

impl Drop for InMemoryLockGuard {
    fn drop(&mut self) {
        lock(&self.held).remove(&self.document_id);
    }
}

impl DocumentLocks for InMemoryLocks {
    type Guard = InMemoryLockGuard;

    async fn try_lock(&self, document_id: Uuid) -> Result<Option<InMemoryLockGuard>, AppError> {
        if !lock(&self.held).insert(document_id) {
            return Ok(None);
        }
        Ok(Some(InMemoryLockGuard {
            document_id,
            held: Arc::clone(&self.held),
        }))
    }

    async fn release(&self, guard: InMemoryLockGuard) -> Result<(), AppError> {
        drop(guard);
        Ok(())
    }
}
