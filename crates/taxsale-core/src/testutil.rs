//! Test utilities: mock strategy collaborators and fixture builders.
//!
//! Mocks hold a queue of responses behind `Arc<Mutex<_>>`; each call pops
//! the first one.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::extract::split_rows;
use crate::models::{
    DocumentContent, DocumentHints, FetchStatus, PropertyRecord, RawRow, SaleType,
    SourceDocument, StoredProperty, UpsertOutcome, compute_hash,
};
use crate::traits::{
    AssistedExtractor, CustomProfileRunner, DocumentReader, PropertyStore, Renderer,
};
use crate::worker::{PipelineEvent, PipelineReporter};

// ---------------------------------------------------------------------------
// MockReader
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct MockReader {
    responses: Arc<Mutex<Vec<Result<DocumentContent, AppError>>>>,
    delay: Option<Duration>,
}

impl MockReader {
    pub fn content(text: &str) -> DocumentContent {
        DocumentContent {
            rows: split_rows(text),
            first_page: text.to_string(),
            content_hash: compute_hash(text.as_bytes()),
        }
    }

    pub fn from_text(text: &str) -> Self {
        Self::with_content(Self::content(text))
    }

    pub fn with_content(content: DocumentContent) -> Self {
        Self::with_responses(vec![Ok(content)])
    }

    pub fn with_error(error: AppError) -> Self {
        Self::with_responses(vec![Err(error)])
    }

    pub fn with_responses(responses: Vec<Result<DocumentContent, AppError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl DocumentReader for MockReader {
    async fn read(&self, location: &str) -> Result<DocumentContent, AppError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = {
            let mut responses = self.responses.lock().unwrap();
            (!responses.is_empty()).then(|| responses.remove(0))
        };
        next.unwrap_or_else(|| Err(AppError::FetchNotFound(location.to_string())))
    }
}

// ---------------------------------------------------------------------------
// MockRenderer
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct MockRenderer {
    responses: Arc<Mutex<Vec<Result<String, AppError>>>>,
}

impl MockRenderer {
    pub fn new(text: &str) -> Self {
        Self {
            responses: Arc::new(Mutex::new(vec![Ok(text.to_string())])),
        }
    }

    /// Renders an empty page on every call.
    pub fn empty() -> Self {
        Self {
            responses: Arc::new(Mutex::new(vec![])),
        }
    }

    pub fn with_error(error: AppError) -> Self {
        Self {
            responses: Arc::new(Mutex::new(vec![Err(error)])),
        }
    }
}

impl Renderer for MockRenderer {
    async fn render_and_extract(&self, _location: &str) -> Result<String, AppError> {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(String::new())
        } else {
            responses.remove(0)
        }
    }
}

// ---------------------------------------------------------------------------
// MockCustomRunner / MockAssistant
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct MockCustomRunner {
    responses: Arc<Mutex<Vec<Result<Vec<RawRow>, AppError>>>>,
    pub calls: Arc<Mutex<Vec<DocumentHints>>>,
}

impl MockCustomRunner {
    pub fn new(rows: Vec<RawRow>) -> Self {
        Self::with_responses(vec![Ok(rows)])
    }

    /// Returns no rows on every call.
    pub fn empty() -> Self {
        Self::with_responses(vec![])
    }

    pub fn with_responses(responses: Vec<Result<Vec<RawRow>, AppError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            calls: Arc::new(Mutex::new(vec![])),
        }
    }
}

impl CustomProfileRunner for MockCustomRunner {
    async fn generate_and_run_extractor(
        &self,
        hints: &DocumentHints,
    ) -> Result<Vec<RawRow>, AppError> {
        self.calls.lock().unwrap().push(hints.clone());
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(vec![])
        } else {
            responses.remove(0)
        }
    }
}

#[derive(Clone)]
pub struct MockAssistant {
    responses: Arc<Mutex<Vec<Result<Vec<RawRow>, AppError>>>>,
}

impl MockAssistant {
    pub fn new(rows: Vec<RawRow>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(vec![Ok(rows)])),
        }
    }

    pub fn empty() -> Self {
        Self {
            responses: Arc::new(Mutex::new(vec![])),
        }
    }
}

impl AssistedExtractor for MockAssistant {
    async fn extract_with_assistance(&self, _hints: &DocumentHints) -> Result<Vec<RawRow>, AppError> {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(vec![])
        } else {
            responses.remove(0)
        }
    }
}

// ---------------------------------------------------------------------------
// HangingStore
// ---------------------------------------------------------------------------

/// Store whose upserts never complete, like a database stuck on a lock.
#[derive(Clone, Default)]
pub struct HangingStore;

impl PropertyStore for HangingStore {
    async fn upsert(&self, _record: &PropertyRecord) -> Result<UpsertOutcome, AppError> {
        std::future::pending().await
    }

    async fn list_properties(
        &self,
        _jurisdiction: Option<&str>,
        _limit: usize,
    ) -> Result<Vec<StoredProperty>, AppError> {
        Ok(vec![])
    }

    async fn document_sale_type(&self, _document_id: Uuid) -> Result<Option<SaleType>, AppError> {
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Records the kind of every event it receives.
#[derive(Default)]
pub struct MockReporter {
    pub events: Mutex<Vec<String>>,
}

impl PipelineReporter for MockReporter {
    fn report(&self, event: PipelineEvent<'_>) {
        let kind = match event {
            PipelineEvent::RunStarted { .. } => "run_started",
            PipelineEvent::StaleJobsReaped { .. } => "stale_reaped",
            PipelineEvent::DocumentClaimed { .. } => "claimed",
            PipelineEvent::DocumentSkipped { .. } => "skipped",
            PipelineEvent::DocumentFinished { outcome } if outcome.succeeded => "succeeded",
            PipelineEvent::DocumentFinished { .. } => "failed",
            PipelineEvent::RunFinished { .. } => "run_finished",
            PipelineEvent::Error { .. } => "error",
        };
        self.events.lock().unwrap().push(kind.to_string());
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn make_document() -> SourceDocument {
    SourceDocument {
        id: Uuid::new_v4(),
        jurisdiction_id: "pa-blair".into(),
        state_code: "PA".into(),
        title: Some("Judicial Sale Property List".into()),
        location: "https://www.blairco.example/Judicial-Sale-List.pdf".into(),
        sale_type_hint: Some(SaleType::Judicial),
        sale_date: NaiveDate::from_ymd_opt(2026, 4, 15),
        fetch_status: FetchStatus::Pending,
        registered_at: Utc::now(),
    }
}

pub fn make_record(document: &SourceDocument, parcel_id: &str, confidence: f64) -> PropertyRecord {
    PropertyRecord {
        jurisdiction_id: document.jurisdiction_id.clone(),
        parcel_id: parcel_id.into(),
        sale_type: SaleType::Judicial,
        owner_raw: Some("NOLAND TRAVIS".into()),
        owner_name: Some("NOLAND TRAVIS".into()),
        address_raw: Some("12 MAIN ST".into()),
        address: Some("12 MAIN ST".into()),
        municipality: Some("CITY OF ALTOONA".into()),
        tax_amount: None,
        penalty_amount: None,
        total_due: Some(1250.0),
        sale_date: document.sale_date,
        tax_year: Some(2026),
        raw_text: format!("* | 101-000123 | NOLAND TRAVIS | {parcel_id}"),
        document_id: document.id,
        job_id: Uuid::new_v4(),
        confidence,
        extracted_at: Utc::now(),
    }
}

/// A canonical-layout row with only parcel, owner, and total due filled in.
pub fn canonical_row(parcel_id: &str, owner: &str, total_due: &str) -> RawRow {
    vec![
        parcel_id.into(),
        owner.into(),
        String::new(),
        String::new(),
        String::new(),
        total_due.into(),
        String::new(),
    ]
}
