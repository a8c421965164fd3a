use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use taxsale_core::error::AppError;
use taxsale_core::extract::split_rows;
use taxsale_core::job::JobStatus;
use taxsale_core::models::{DocumentContent, FetchStatus, compute_hash};
use taxsale_core::traits::{DocumentReader, Unconfigured};
use taxsale_core::{ExtractionOrchestrator, PipelineConfig, PipelineRunner, TracingPipelineReporter};
use taxsale_db::Database;
use tokio_util::sync::CancellationToken;

use crate::integration::common::{register, setup_test_db};

const JUDICIAL_TEXT: &str = "\
*\tCONTROL NO\tREPUTED OWNER\tMAP NUMBER\tDESCRIPTION\tLAND USE\tWINNING BID\n\
CITY OF ALTOONA\n\
*\t101-000123\tNOLAND TRAVIS\t01.05-16..-093.00-000\t12 MAIN ST\tR\t$1,250.00\n";

#[derive(Clone)]
struct JudicialListReader;

impl DocumentReader for JudicialListReader {
    async fn read(&self, _location: &str) -> Result<DocumentContent, AppError> {
        Ok(DocumentContent {
            rows: split_rows(JUDICIAL_TEXT),
            first_page: JUDICIAL_TEXT.to_string(),
            content_hash: compute_hash(JUDICIAL_TEXT.as_bytes()),
        })
    }
}

#[tokio::test]
async fn as_many_workers_as_connections() {
    let (pool, _container) = setup_test_db().await;
    let docs = vec![
        register(&pool, "https://blairco.example/a.pdf").await,
        register(&pool, "https://blairco.example/b.pdf").await,
        register(&pool, "https://blairco.example/c.pdf").await,
    ];

    let small = PgPoolOptions::new()
        .max_connections(2)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with((*pool.connect_options()).clone())
        .await
        .unwrap();
    let db = Database::from_pool(small);

    let orchestrator = ExtractionOrchestrator::new(
        JudicialListReader,
        Unconfigured,
        Unconfigured,
        Unconfigured,
        db.property_repo(),
        db.job_repo(),
    );
    let runner = PipelineRunner::new(
        db.document_repo(),
        db.claims(),
        orchestrator,
        PipelineConfig::default()
            .with_worker_id("it")
            .with_workers(2),
    );

    let report = runner
        .run(CancellationToken::new(), &TracingPipelineReporter)
        .await
        .unwrap();

    assert_eq!(report.documents_succeeded, 3);
    assert_eq!(report.documents_failed, 0);
    assert_eq!(
        db.job_repo().count_by_status(JobStatus::Succeeded).await.unwrap(),
        3
    );
    for doc in &docs {
        let stored = db.document_repo().get_document(doc.id).await.unwrap().unwrap();
        assert_eq!(stored.fetch_status, FetchStatus::Extracted);
        assert_eq!(db.claims().claimed_by(doc.id).await.unwrap(), None);
    }
}
