use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::AppError;
use crate::job::PipelineConfig;
use crate::models::SourceDocument;
use crate::orchestrator::{DocumentOutcome, ExtractionOrchestrator};
use crate::report::RunReport;
use crate::traits::{
    AssistedExtractor, CustomProfileRunner, DocumentLocks, DocumentReader, DocumentRegistry,
    JobTracker, PropertyStore, Renderer,
};

/// Events emitted by the pipeline for monitoring/logging.
#[derive(Debug, Clone)]
pub enum PipelineEvent<'a> {
    RunStarted {
        worker_id: &'a str,
        workers: usize,
    },
    StaleJobsReaped {
        count: u64,
    },
    DocumentClaimed {
        worker_id: &'a str,
        document_id: Uuid,
        location: &'a str,
    },
    /// Another worker or process holds the document lock.
    DocumentSkipped {
        document_id: Uuid,
    },
    DocumentFinished {
        outcome: &'a DocumentOutcome,
    },
    RunFinished {
        report: &'a RunReport,
    },
    Error {
        context: &'a str,
        error: &'a str,
    },
}

/// Trait for receiving pipeline events (decoupled logging).
pub trait PipelineReporter: Send + Sync {
    fn report(&self, event: PipelineEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPipelineReporter;

impl PipelineReporter for TracingPipelineReporter {
    fn report(&self, event: PipelineEvent<'_>) {
        match event {
            PipelineEvent::RunStarted { worker_id, workers } => {
                tracing::info!(%worker_id, workers, "Pipeline run started");
            }
            PipelineEvent::StaleJobsReaped { count } => {
                tracing::warn!(count, "Reaped stale running jobs");
            }
            PipelineEvent::DocumentClaimed {
                worker_id,
                document_id,
                location,
            } => {
                tracing::info!(%worker_id, %document_id, %location, "Document claimed");
            }
            PipelineEvent::DocumentSkipped { document_id } => {
                tracing::info!(%document_id, "Document locked elsewhere, skipping");
            }
            PipelineEvent::DocumentFinished { outcome } if outcome.succeeded => {
                tracing::info!(
                    document_id = %outcome.document_id,
                    strategy = ?outcome.strategy,
                    records = outcome.records_extracted,
                    attempts = outcome.attempts.len(),
                    "Document extracted"
                );
            }
            PipelineEvent::DocumentFinished { outcome } => {
                tracing::error!(
                    document_id = %outcome.document_id,
                    fetch_status = %outcome.fetch_status,
                    attempts = outcome.attempts.len(),
                    "Document failed"
                );
            }
            PipelineEvent::RunFinished { report } => {
                tracing::info!(
                    succeeded = report.documents_succeeded,
                    failed = report.documents_failed,
                    skipped = report.documents_skipped,
                    records = report.records_extracted,
                    cancelled = report.cancelled,
                    "Pipeline run finished"
                );
            }
            PipelineEvent::Error { context, error } => {
                tracing::error!(%context, %error, "Pipeline error");
            }
        }
    }
}

enum WorkerMessage {
    Claimed {
        worker_id: String,
        document_id: Uuid,
        location: String,
    },
    Skipped {
        document_id: Uuid,
    },
    Finished(Box<DocumentOutcome>),
    Error {
        context: String,
        error: String,
    },
}

/// Claims pending documents and runs them through the orchestrator on a
/// bounded pool of workers.
pub struct PipelineRunner<G, L, D, R, C, A, P, T>
where
    G: DocumentRegistry,
    L: DocumentLocks,
    D: DocumentReader,
    R: Renderer,
    C: CustomProfileRunner,
    A: AssistedExtractor,
    P: PropertyStore,
    T: JobTracker,
{
    registry: G,
    locks: L,
    orchestrator: ExtractionOrchestrator<D, R, C, A, P, T>,
    config: PipelineConfig,
}

impl<G, L, D, R, C, A, P, T> PipelineRunner<G, L, D, R, C, A, P, T>
where
    G: DocumentRegistry + 'static,
    L: DocumentLocks + 'static,
    D: DocumentReader + 'static,
    R: Renderer + 'static,
    C: CustomProfileRunner + 'static,
    A: AssistedExtractor + 'static,
    P: PropertyStore + 'static,
    T: JobTracker + 'static,
{
    pub fn new(
        registry: G,
        locks: L,
        orchestrator: ExtractionOrchestrator<D, R, C, A, P, T>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            registry,
            locks,
            orchestrator: orchestrator.with_attempt_timeout(config.attempt_timeout),
            config,
        }
    }

    /// Processes a single document outside a batch, under the same
    /// per-document lock as [`run`](Self::run). Returns `Ok(None)` when
    /// another worker or process holds the document.
    pub async fn process_document(
        &self,
        document: &SourceDocument,
    ) -> Result<Option<DocumentOutcome>, AppError> {
        let Some(guard) = self.locks.try_lock(document.id).await? else {
            return Ok(None);
        };

        let outcome = self
            .orchestrator
            .process(document, &self.config.worker_id)
            .await;
        let status = self
            .registry
            .update_fetch_status(document.id, outcome.fetch_status)
            .await;
        self.locks.release(guard).await?;
        status?;

        Ok(Some(outcome))
    }

    /// Processes one batch of pending documents.
    ///
    /// Cancellation stops workers from claiming new documents; documents
    /// already claimed run to a terminal state.
    pub async fn run<PR: PipelineReporter>(
        &self,
        cancel_token: CancellationToken,
        reporter: &PR,
    ) -> Result<RunReport, AppError> {
        reporter.report(PipelineEvent::RunStarted {
            worker_id: &self.config.worker_id,
            workers: self.config.workers,
        });

        let stale_jobs_reaped = match self
            .orchestrator
            .tracker()
            .fail_stale_jobs(self.config.stale_job_ceiling())
            .await
        {
            Ok(count) => {
                if count > 0 {
                    reporter.report(PipelineEvent::StaleJobsReaped { count });
                }
                count
            }
            Err(e) => {
                reporter.report(PipelineEvent::Error {
                    context: "reap stale jobs",
                    error: &e.to_string(),
                });
                0
            }
        };

        let documents = self
            .registry
            .list_pending_documents(self.config.jurisdiction.as_deref(), self.config.batch_limit)
            .await?;

        let mut report = RunReport::new(documents.len());
        report.stale_jobs_reaped = stale_jobs_reaped;

        let queue = Arc::new(Mutex::new(VecDeque::from(documents)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut workers = JoinSet::new();

        for index in 0..self.config.workers.max(1) {
            let worker = Worker {
                worker_id: format!("{}-{index}", self.config.worker_id),
                queue: Arc::clone(&queue),
                tx: tx.clone(),
                registry: self.registry.clone(),
                locks: self.locks.clone(),
                orchestrator: self.orchestrator.clone(),
                cancel_token: cancel_token.clone(),
            };
            workers.spawn(worker.run());
        }
        drop(tx);

        while let Some(message) = rx.recv().await {
            match message {
                WorkerMessage::Claimed {
                    worker_id,
                    document_id,
                    location,
                } => reporter.report(PipelineEvent::DocumentClaimed {
                    worker_id: &worker_id,
                    document_id,
                    location: &location,
                }),
                WorkerMessage::Skipped { document_id } => {
                    report.record_skipped();
                    reporter.report(PipelineEvent::DocumentSkipped { document_id });
                }
                WorkerMessage::Finished(outcome) => {
                    report.record(&outcome);
                    reporter.report(PipelineEvent::DocumentFinished { outcome: &outcome });
                }
                WorkerMessage::Error { context, error } => {
                    reporter.report(PipelineEvent::Error {
                        context: &context,
                        error: &error,
                    });
                }
            }
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                reporter.report(PipelineEvent::Error {
                    context: "worker task",
                    error: &e.to_string(),
                });
            }
        }

        report.cancelled = cancel_token.is_cancelled();
        reporter.report(PipelineEvent::RunFinished { report: &report });
        Ok(report)
    }
}

struct Worker<G, L, D, R, C, A, P, T>
where
    G: DocumentRegistry,
    L: DocumentLocks,
    D: DocumentReader,
    R: Renderer,
    C: CustomProfileRunner,
    A: AssistedExtractor,
    P: PropertyStore,
    T: JobTracker,
{
    worker_id: String,
    queue: Arc<Mutex<VecDeque<SourceDocument>>>,
    tx: mpsc::UnboundedSender<WorkerMessage>,
    registry: G,
    locks: L,
    orchestrator: ExtractionOrchestrator<D, R, C, A, P, T>,
    cancel_token: CancellationToken,
}

impl<G, L, D, R, C, A, P, T> Worker<G, L, D, R, C, A, P, T>
where
    G: DocumentRegistry + 'static,
    L: DocumentLocks + 'static,
    D: DocumentReader + 'static,
    R: Renderer + 'static,
    C: CustomProfileRunner + 'static,
    A: AssistedExtractor + 'static,
    P: PropertyStore + 'static,
    T: JobTracker + 'static,
{
    async fn run(self) {
        loop {
            if self.cancel_token.is_cancelled() {
                break;
            }
            let Some(document) = self.queue.lock().await.pop_front() else {
                break;
            };

            let guard = match self.locks.try_lock(document.id).await {
                Ok(Some(guard)) => guard,
                Ok(None) => {
                    self.send(WorkerMessage::Skipped {
                        document_id: document.id,
                    });
                    continue;
                }
                Err(e) => {
                    self.send(WorkerMessage::Error {
                        context: format!("lock document {}", document.id),
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            self.send(WorkerMessage::Claimed {
                worker_id: self.worker_id.clone(),
                document_id: document.id,
                location: document.location.clone(),
            });

            let outcome = self.orchestrator.process(&document, &self.worker_id).await;

            if let Err(e) = self
                .registry
                .update_fetch_status(document.id, outcome.fetch_status)
                .await
            {
                self.send(WorkerMessage::Error {
                    context: format!("update fetch status for {}", document.id),
                    error: e.to_string(),
                });
            }
            if let Err(e) = self.locks.release(guard).await {
                self.send(WorkerMessage::Error {
                    context: format!("release lock for {}", document.id),
                    error: e.to_string(),
                });
            }

            self.send(WorkerMessage::Finished(Box::new(outcome)));
        }
    }

    fn send(&self, message: WorkerMessage) {
        // The receiver only goes away once every worker has exited.
        let _ = self.tx.send(message);
    }
}
