use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Utc};
use serde::Serialize;
use tokio::time::{Instant, timeout_at};
use uuid::Uuid;

use crate::classify::{Classification, classify, sample_text};
use crate::error::{AppError, ErrorClass};
use crate::extract::{CandidateRecord, RowExtractor};
use crate::job::{AttemptStats, ExtractionJob, JobStatus};
use crate::models::{
    DocumentHints, FetchStatus, PropertyRecord, RawRow, SaleType, SourceDocument, UpsertOutcome,
    compute_hash,
};
use crate::normalize::GivenNames;
use crate::profile::{CANONICAL_PROFILE, FormatProfile, GENERIC_PROFILE, ProfileRegistry};
use crate::strategy::{AttemptVerdict, ExtractionState, Strategy};
use crate::traits::{
    AssistedExtractor, CustomProfileRunner, DocumentReader, JobTracker, PropertyStore, Renderer,
};

/// Summary of one strategy attempt, kept on the document outcome.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptSummary {
    pub job_id: Uuid,
    pub strategy: Strategy,
    pub status: JobStatus,
    pub error_class: Option<ErrorClass>,
    pub records: u32,
}

/// Final result of walking one document through the strategy state machine.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentOutcome {
    pub document_id: Uuid,
    pub jurisdiction_id: String,
    pub succeeded: bool,
    pub strategy: Option<Strategy>,
    pub attempts: Vec<AttemptSummary>,
    pub records_extracted: u32,
    pub records_failed: u32,
    pub inserted: u32,
    pub updated: u32,
    pub skipped: u32,
    pub confidence_sum: f64,
    /// Status to write back to the document registry.
    pub fetch_status: FetchStatus,
    pub error_class: Option<ErrorClass>,
}

impl DocumentOutcome {
    fn new(document: &SourceDocument) -> Self {
        Self {
            document_id: document.id,
            jurisdiction_id: document.jurisdiction_id.clone(),
            succeeded: false,
            strategy: None,
            attempts: Vec::new(),
            records_extracted: 0,
            records_failed: 0,
            inserted: 0,
            updated: 0,
            skipped: 0,
            confidence_sum: 0.0,
            fetch_status: FetchStatus::Failed,
            error_class: None,
        }
    }
}

/// Rows pulled out by one attempt, before persistence.
#[derive(Debug)]
struct AttemptOutput {
    records: Vec<CandidateRecord>,
    rows_excluded: u32,
    rows_failed: u32,
    profile_name: String,
    profile_sale_type: Option<SaleType>,
    content_hash: String,
}

#[derive(Debug, Default)]
struct PersistTally {
    inserted: u32,
    updated: u32,
    skipped: u32,
    failed: u32,
    confidence_sum: f64,
}

impl PersistTally {
    fn persisted(&self) -> u32 {
        self.inserted + self.updated + self.skipped
    }
}

/// Drives one document through direct, rendered, custom-profile, and
/// assisted extraction until one of them yields records.
///
/// Every attempt is tracked as its own [`ExtractionJob`] and runs under a
/// wall-clock ceiling. Failures never escape: they advance the state machine.
#[derive(Clone)]
pub struct ExtractionOrchestrator<D, R, C, A, P, T>
where
    D: DocumentReader,
    R: Renderer,
    C: CustomProfileRunner,
    A: AssistedExtractor,
    P: PropertyStore,
    T: JobTracker,
{
    reader: D,
    renderer: R,
    custom: C,
    assistant: A,
    store: P,
    tracker: T,
    profiles: Arc<ProfileRegistry>,
    given_names: Arc<GivenNames>,
    attempt_timeout: Duration,
}

impl<D, R, C, A, P, T> ExtractionOrchestrator<D, R, C, A, P, T>
where
    D: DocumentReader + 'static,
    R: Renderer + 'static,
    C: CustomProfileRunner + 'static,
    A: AssistedExtractor + 'static,
    P: PropertyStore + 'static,
    T: JobTracker + 'static,
{
    pub fn new(reader: D, renderer: R, custom: C, assistant: A, store: P, tracker: T) -> Self {
        Self {
            reader,
            renderer,
            custom,
            assistant,
            store,
            tracker,
            profiles: Arc::new(ProfileRegistry::builtin()),
            given_names: Arc::new(GivenNames::default()),
            attempt_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_profiles(mut self, profiles: Arc<ProfileRegistry>) -> Self {
        self.profiles = profiles;
        self
    }

    pub fn with_given_names(mut self, given_names: Arc<GivenNames>) -> Self {
        self.given_names = given_names;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    pub fn store(&self) -> &P {
        &self.store
    }

    /// Runs the state machine to a terminal state.
    pub async fn process(&self, document: &SourceDocument, worker_id: &str) -> DocumentOutcome {
        let mut outcome = DocumentOutcome::new(document);
        let mut direct_failure: Option<ErrorClass> = None;
        let mut state = ExtractionState::New.start();

        while let Some(strategy) = state.strategy() {
            let mut job = ExtractionJob::new(document.id, strategy);
            job.start(worker_id);
            self.save_job(&job).await;

            tracing::info!(
                document_id = %document.id,
                job_id = %job.id,
                state = %state,
                "Starting extraction attempt"
            );

            // One ceiling covers reading, extraction, and persistence.
            let deadline = Instant::now() + self.attempt_timeout;
            let attempted = match self.run_attempt(strategy, document, deadline).await {
                Ok(output) => timeout_at(
                    deadline,
                    self.finish_attempt(document, &mut job, output, &mut outcome),
                )
                .await
                .unwrap_or_else(|_| Err(AppError::Timeout(self.attempt_timeout.as_secs()))),
                Err(e) => Err(e),
            };
            let verdict = match attempted {
                Ok(verdict) => verdict,
                Err(e) => {
                    tracing::warn!(
                        document_id = %document.id,
                        %strategy,
                        class = %e.class(),
                        error = %e,
                        "Extraction attempt failed"
                    );
                    job.fail(e.class(), e.to_string(), AttemptStats::default());
                    AttemptVerdict::Blocked
                }
            };

            if strategy == Strategy::Direct {
                direct_failure = job.error_class;
            }
            self.save_job(&job).await;
            outcome.attempts.push(AttemptSummary {
                job_id: job.id,
                strategy,
                status: job.status,
                error_class: job.error_class,
                records: job.records_extracted,
            });

            if verdict == AttemptVerdict::Extracted {
                outcome.strategy = Some(strategy);
            }
            state = state.advance(verdict);
        }

        if state == ExtractionState::Succeeded {
            outcome.succeeded = true;
            outcome.fetch_status = FetchStatus::Extracted;
        } else {
            outcome.error_class = Some(ErrorClass::NoExtractableContent);
            outcome.fetch_status = match direct_failure {
                Some(ErrorClass::FetchDenied) => FetchStatus::Denied,
                Some(ErrorClass::FetchNotFound) => FetchStatus::NotFound,
                _ => FetchStatus::Failed,
            };
            tracing::error!(
                document_id = %document.id,
                location = %document.location,
                "All strategies exhausted: NO_EXTRACTABLE_CONTENT"
            );
        }

        outcome
    }

    /// Runs one attempt on its own task so a timeout can abort it and a
    /// panicking collaborator only costs this attempt.
    async fn run_attempt(
        &self,
        strategy: Strategy,
        document: &SourceDocument,
        deadline: Instant,
    ) -> Result<AttemptOutput, AppError> {
        let this = self.clone();
        let doc = document.clone();
        let mut handle = tokio::spawn(async move { this.attempt(strategy, &doc).await });

        match timeout_at(deadline, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(AppError::Generic(format!(
                "{strategy} attempt crashed: {join_error}"
            ))),
            Err(_) => {
                handle.abort();
                Err(AppError::Timeout(self.attempt_timeout.as_secs()))
            }
        }
    }

    async fn attempt(
        &self,
        strategy: Strategy,
        document: &SourceDocument,
    ) -> Result<AttemptOutput, AppError> {
        match strategy {
            Strategy::Direct => {
                let content = self.reader.read(&document.location).await?;
                if content.rows.is_empty() {
                    return Err(AppError::NoExtractableContent(format!(
                        "No text layer in {}",
                        document.location
                    )));
                }
                let sample = if content.first_page.trim().is_empty() {
                    sample_text(&content.rows)
                } else {
                    content.first_page.clone()
                };
                self.extract_classified(document, &content.rows, &sample, content.content_hash)
            }
            Strategy::Rendered => {
                let text = self.renderer.render_and_extract(&document.location).await?;
                let rows = crate::extract::split_rows(&text);
                if rows.is_empty() {
                    return Err(AppError::NoExtractableContent(format!(
                        "Rendered page for {} has no text",
                        document.location
                    )));
                }
                let hash = compute_hash(text.as_bytes());
                self.extract_classified(document, &rows, &sample_text(&rows), hash)
            }
            Strategy::CustomProfile => {
                let rows = self
                    .custom
                    .generate_and_run_extractor(&DocumentHints::from(document))
                    .await?;
                self.extract_canonical(document, &rows)
            }
            Strategy::Assisted => {
                let rows = self
                    .assistant
                    .extract_with_assistance(&DocumentHints::from(document))
                    .await?;
                self.extract_canonical(document, &rows)
            }
        }
    }

    fn extract_classified(
        &self,
        document: &SourceDocument,
        rows: &[RawRow],
        sample: &str,
        content_hash: String,
    ) -> Result<AttemptOutput, AppError> {
        let profile = match classify(&self.profiles, sample, document.sale_type_hint) {
            Classification::Matched { profile, score } => {
                tracing::debug!(profile = %profile.name, score, "Classified document");
                profile
            }
            Classification::Unknown if document.sale_type_hint.is_some() => {
                self.profile(GENERIC_PROFILE)?
            }
            Classification::Unknown => {
                return Err(AppError::FormatUnrecognized(format!(
                    "No profile matched {} and it has no sale-type hint",
                    document.location
                )));
            }
        };
        Ok(self.extract_with(profile, document, rows, content_hash))
    }

    fn extract_canonical(
        &self,
        document: &SourceDocument,
        rows: &[RawRow],
    ) -> Result<AttemptOutput, AppError> {
        let hash = compute_hash(&serde_json::to_vec(rows)?);
        Ok(self.extract_with(self.profile(CANONICAL_PROFILE)?, document, rows, hash))
    }

    fn profile(&self, name: &str) -> Result<&FormatProfile, AppError> {
        self.profiles
            .get(name)
            .ok_or_else(|| AppError::ProfileError(format!("Profile '{name}' is not registered")))
    }

    fn extract_with(
        &self,
        profile: &FormatProfile,
        document: &SourceDocument,
        rows: &[RawRow],
        content_hash: String,
    ) -> AttemptOutput {
        let extractor = RowExtractor::new(profile, &self.given_names, &document.state_code);
        let extracted = extractor.extract_all(rows);
        AttemptOutput {
            records: extracted.records,
            rows_excluded: extracted.excluded,
            rows_failed: extracted.failed,
            profile_name: profile.name.clone(),
            profile_sale_type: profile.sale_type,
            content_hash,
        }
    }

    /// Persists what an attempt produced and closes its job.
    async fn finish_attempt(
        &self,
        document: &SourceDocument,
        job: &mut ExtractionJob,
        output: AttemptOutput,
        outcome: &mut DocumentOutcome,
    ) -> Result<AttemptVerdict, AppError> {
        job.profile_name = Some(output.profile_name.clone());
        job.content_hash = Some(output.content_hash.clone());

        let sale_type = self
            .resolve_sale_type(document, output.profile_sale_type)
            .await?;

        let mut rows_failed = output.rows_failed;
        let records: Vec<PropertyRecord> = output
            .records
            .into_iter()
            .map(|c| self.build_record(c, document, job, sale_type))
            .filter(|r| {
                let usable = r.confidence > 0.0;
                if !usable {
                    rows_failed += 1;
                }
                usable
            })
            .collect();

        let tally = self.persist(&records).await;
        let stats = AttemptStats {
            records_extracted: tally.persisted(),
            records_failed: rows_failed + tally.failed,
            rows_excluded: output.rows_excluded,
            average_confidence: (tally.persisted() > 0)
                .then(|| tally.confidence_sum / f64::from(tally.persisted())),
        };

        if tally.persisted() == 0 {
            let (class, message) = if records.is_empty() && rows_failed > 0 {
                (
                    ErrorClass::ParseRowFailure,
                    format!("All {rows_failed} data rows failed to parse"),
                )
            } else if records.is_empty() {
                match job.strategy {
                    Strategy::Direct | Strategy::Rendered => (
                        ErrorClass::FormatUnrecognized,
                        format!("Profile '{}' matched no rows", output.profile_name),
                    ),
                    Strategy::CustomProfile | Strategy::Assisted => (
                        ErrorClass::NoExtractableContent,
                        "Collaborator returned no usable rows".to_string(),
                    ),
                }
            } else {
                (
                    ErrorClass::Internal,
                    format!("Store rejected all {} records", records.len()),
                )
            };
            tracing::warn!(document_id = %document.id, strategy = %job.strategy, %class, "{message}");
            job.fail(class, message, stats);
            return Ok(AttemptVerdict::Blocked);
        }

        outcome.records_extracted += tally.persisted();
        outcome.records_failed += stats.records_failed;
        outcome.inserted += tally.inserted;
        outcome.updated += tally.updated;
        outcome.skipped += tally.skipped;
        outcome.confidence_sum += tally.confidence_sum;

        tracing::info!(
            document_id = %document.id,
            strategy = %job.strategy,
            profile = %output.profile_name,
            extracted = tally.persisted(),
            failed = stats.records_failed,
            excluded = stats.rows_excluded,
            "Extraction attempt succeeded"
        );
        job.succeed(stats);
        Ok(AttemptVerdict::Extracted)
    }

    /// Sale type for the dedup key. A declared hint wins. Otherwise the
    /// sale type this document's records were already stored under is
    /// reused, so a later run with a different strategy lands on the same
    /// rows. Only a first extraction takes it from the matched profile.
    async fn resolve_sale_type(
        &self,
        document: &SourceDocument,
        profile_sale_type: Option<SaleType>,
    ) -> Result<SaleType, AppError> {
        if let Some(hint) = document.sale_type_hint {
            return Ok(hint);
        }
        if let Some(stored) = self.store.document_sale_type(document.id).await? {
            return Ok(stored);
        }
        Ok(profile_sale_type.unwrap_or(SaleType::Unknown))
    }

    fn build_record(
        &self,
        candidate: CandidateRecord,
        document: &SourceDocument,
        job: &ExtractionJob,
        sale_type: SaleType,
    ) -> PropertyRecord {
        let sale_date = candidate.sale_date.or(document.sale_date);
        let extracted_at = Utc::now();
        PropertyRecord {
            jurisdiction_id: document.jurisdiction_id.clone(),
            parcel_id: candidate.parcel_id,
            sale_type,
            owner_raw: candidate.owner_raw,
            owner_name: candidate.owner_name,
            address_raw: candidate.address_raw,
            address: candidate.address,
            municipality: candidate.municipality,
            tax_amount: candidate.tax_amount,
            penalty_amount: candidate.penalty_amount,
            total_due: candidate.total_due,
            sale_date,
            tax_year: Some(sale_date.map_or(extracted_at.year(), |d| d.year())),
            raw_text: candidate.raw_text,
            document_id: document.id,
            job_id: job.id,
            confidence: job.strategy.record_confidence(candidate.fallbacks),
            extracted_at,
        }
    }

    async fn persist(&self, records: &[PropertyRecord]) -> PersistTally {
        let mut tally = PersistTally::default();
        for record in records {
            match self.store.upsert(record).await {
                Ok(outcome) => {
                    match outcome {
                        UpsertOutcome::Inserted => tally.inserted += 1,
                        UpsertOutcome::Updated => tally.updated += 1,
                        UpsertOutcome::Skipped => tally.skipped += 1,
                    }
                    tally.confidence_sum += record.confidence;
                }
                Err(e) => {
                    tracing::warn!(parcel_id = %record.parcel_id, error = %e, "Upsert failed");
                    tally.failed += 1;
                }
            }
        }
        tally
    }

    async fn save_job(&self, job: &ExtractionJob) {
        if let Err(e) = self.tracker.save_job(job).await {
            tracing::error!(job_id = %job.id, status = %job.status, error = %e, "Failed to record job");
        }
    }
}
