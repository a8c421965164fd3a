use std::future::Future;
use std::time::Duration;

use uuid::Uuid;

use crate::error::AppError;
use crate::job::ExtractionJob;
use crate::models::{
    DocumentContent, DocumentHints, FetchStatus, PropertyRecord, RawRow, SaleType,
    SourceDocument, StoredProperty, UpsertOutcome,
};

/// Reads a document's own text layer (PDF text, CSV, plain text).
pub trait DocumentReader: Send + Sync + Clone {
    fn read(&self, location: &str) -> impl Future<Output = Result<DocumentContent, AppError>> + Send;
}

/// Renders a document in a headless browser and returns the visible text.
pub trait Renderer: Send + Sync + Clone {
    fn render_and_extract(
        &self,
        location: &str,
    ) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// Runs a jurisdiction-specific extraction routine.
///
/// Rows come back in canonical column order: parcel, owner, address, tax,
/// penalty, total due, sale date.
pub trait CustomProfileRunner: Send + Sync + Clone {
    fn generate_and_run_extractor(
        &self,
        hints: &DocumentHints,
    ) -> impl Future<Output = Result<Vec<RawRow>, AppError>> + Send;
}

/// Extracts rows with help from a vision-capable model. Same canonical
/// column order as [`CustomProfileRunner`].
pub trait AssistedExtractor: Send + Sync + Clone {
    fn extract_with_assistance(
        &self,
        hints: &DocumentHints,
    ) -> impl Future<Output = Result<Vec<RawRow>, AppError>> + Send;
}

/// Read side of the upstream document registry, plus fetch-status updates.
pub trait DocumentRegistry: Send + Sync + Clone {
    /// Pending property-list documents, oldest first.
    fn list_pending_documents(
        &self,
        jurisdiction: Option<&str>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<SourceDocument>, AppError>> + Send;

    fn update_fetch_status(
        &self,
        document_id: Uuid,
        status: FetchStatus,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Persists property records keyed by jurisdiction, parcel, and sale type.
pub trait PropertyStore: Send + Sync + Clone {
    /// Inserts the record, or replaces the stored one when the new
    /// confidence is at least as high. Lower confidence leaves it untouched.
    fn upsert(
        &self,
        record: &PropertyRecord,
    ) -> impl Future<Output = Result<UpsertOutcome, AppError>> + Send;

    fn list_properties(
        &self,
        jurisdiction: Option<&str>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<StoredProperty>, AppError>> + Send;

    /// Sale type of the earliest record stored from this document, if any.
    fn document_sale_type(
        &self,
        document_id: Uuid,
    ) -> impl Future<Output = Result<Option<SaleType>, AppError>> + Send;
}

/// Records extraction jobs as they move through their lifecycle.
pub trait JobTracker: Send + Sync + Clone {
    /// Inserts the job or overwrites its previous state.
    fn save_job(&self, job: &ExtractionJob) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Jobs newest first, optionally for a single document.
    fn list_jobs(
        &self,
        document_id: Option<Uuid>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<ExtractionJob>, AppError>> + Send;

    /// Marks jobs left running for longer than `older_than` as failed with
    /// TIMEOUT. Returns how many were reaped.
    fn fail_stale_jobs(
        &self,
        older_than: Duration,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;
}

/// Per-document mutual exclusion across workers and processes.
pub trait DocumentLocks: Send + Sync + Clone {
    type Guard: Send + 'static;

    /// Returns `None` when another worker holds the document.
    fn try_lock(
        &self,
        document_id: Uuid,
    ) -> impl Future<Output = Result<Option<Self::Guard>, AppError>> + Send;

    fn release(&self, guard: Self::Guard) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Stand-in for a strategy collaborator that is not wired up. Every call
/// fails, which escalates to the next strategy.
#[derive(Debug, Clone, Copy)]
pub struct Unconfigured;

impl Renderer for Unconfigured {
    async fn render_and_extract(&self, _location: &str) -> Result<String, AppError> {
        Err(AppError::NotConfigured("rendered".into()))
    }
}

impl CustomProfileRunner for Unconfigured {
    async fn generate_and_run_extractor(
        &self,
        _hints: &DocumentHints,
    ) -> Result<Vec<RawRow>, AppError> {
        Err(AppError::NotConfigured("custom_profile".into()))
    }
}

impl AssistedExtractor for Unconfigured {
    async fn extract_with_assistance(&self, _hints: &DocumentHints) -> Result<Vec<RawRow>, AppError> {
        Err(AppError::NotConfigured("assisted".into()))
    }
}

/// An optional collaborator: `None` behaves like [`Unconfigured`].
impl<T: Renderer> Renderer for Option<T> {
    async fn render_and_extract(&self, location: &str) -> Result<String, AppError> {
        match self {
            Some(inner) => inner.render_and_extract(location).await,
            None => Unconfigured.render_and_extract(location).await,
        }
    }
}

impl<T: CustomProfileRunner> CustomProfileRunner for Option<T> {
    async fn generate_and_run_extractor(
        &self,
        hints: &DocumentHints,
    ) -> Result<Vec<RawRow>, AppError> {
        match self {
            Some(inner) => inner.generate_and_run_extractor(hints).await,
            None => Unconfigured.generate_and_run_extractor(hints).await,
        }
    }
}

impl<T: AssistedExtractor> AssistedExtractor for Option<T> {
    async fn extract_with_assistance(&self, hints: &DocumentHints) -> Result<Vec<RawRow>, AppError> {
        match self {
            Some(inner) => inner.extract_with_assistance(hints).await,
            None => Unconfigured.extract_with_assistance(hints).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use crate::testutil::{MockAssistant, canonical_row, make_document};

    #[tokio::test]
    async fn test_missing_collaborators_are_not_configured() {
        let hints = DocumentHints::from(&make_document());
        let renderer: Option<Unconfigured> = None;
        let err = renderer.render_and_extract("list.pdf").await.unwrap_err();
        assert!(matches!(err, AppError::NotConfigured(ref s) if s == "rendered"));
        assert_eq!(err.class(), ErrorClass::Internal);

        let assistant: Option<MockAssistant> = None;
        assert!(assistant.extract_with_assistance(&hints).await.is_err());
    }

    #[tokio::test]
    async fn test_present_collaborator_is_used() {
        let hints = DocumentHints::from(&make_document());
        let assistant = Some(MockAssistant::new(vec![canonical_row("12-345-6789", "DOE JANE", "$5.00")]));
        let rows = assistant.extract_with_assistance(&hints).await.unwrap();
        assert_eq!(rows.len(), 1);
    }
}
