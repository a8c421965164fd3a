use std::time::Duration;

use chrono::Utc;
use taxsale_core::error::ErrorClass;
use taxsale_core::job::{AttemptStats, ExtractionJob, JobStatus};
use taxsale_core::strategy::Strategy;
use taxsale_core::traits::JobTracker;
use taxsale_db::JobRepository;

use crate::integration::common::{register, setup_test_db};

#[tokio::test]
async fn save_job_round_trips_lifecycle() {
    let (pool, _container) = setup_test_db().await;
    let doc = register(&pool, "https://blairco.example/judicial.pdf").await;
    let repo = JobRepository::new(pool);

    let mut job = ExtractionJob::new(doc.id, Strategy::Direct);
    job.start("worker-1");
    repo.save_job(&job).await.unwrap();
    assert_eq!(repo.count_by_status(JobStatus::Running).await.unwrap(), 1);

    job.fail(
        ErrorClass::FetchDenied,
        "HTTP 403",
        AttemptStats::default(),
    );
    repo.save_job(&job).await.unwrap();

    let stored = repo.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.strategy, Strategy::Direct);
    assert_eq!(stored.error_class, Some(ErrorClass::FetchDenied));
    assert_eq!(stored.worker_id.as_deref(), Some("worker-1"));
    assert_eq!(repo.count_by_status(JobStatus::Running).await.unwrap(), 0);
}

#[tokio::test]
async fn list_jobs_newest_first_per_document() {
    let (pool, _container) = setup_test_db().await;
    let doc = register(&pool, "https://blairco.example/judicial.pdf").await;
    let other = register(&pool, "https://blairco.example/upset.pdf").await;
    let repo = JobRepository::new(pool);

    let direct = ExtractionJob::new(doc.id, Strategy::Direct);
    repo.save_job(&direct).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let rendered = ExtractionJob::new(doc.id, Strategy::Rendered);
    repo.save_job(&rendered).await.unwrap();
    repo.save_job(&ExtractionJob::new(other.id, Strategy::Direct))
        .await
        .unwrap();

    let jobs = repo.list_jobs(Some(doc.id), 10).await.unwrap();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].id, rendered.id);
    assert_eq!(jobs[1].id, direct.id);
    assert_eq!(repo.list_jobs(None, 10).await.unwrap().len(), 3);
}

#[tokio::test]
async fn stale_running_jobs_are_failed() {
    let (pool, _container) = setup_test_db().await;
    let doc = register(&pool, "https://blairco.example/judicial.pdf").await;
    let repo = JobRepository::new(pool);

    let mut stale = ExtractionJob::new(doc.id, Strategy::Assisted);
    stale.start("crashed-worker");
    stale.started_at = Some(Utc::now() - chrono::Duration::hours(1));
    repo.save_job(&stale).await.unwrap();

    let mut fresh = ExtractionJob::new(doc.id, Strategy::Direct);
    fresh.start("worker-2");
    repo.save_job(&fresh).await.unwrap();

    let reaped = repo.fail_stale_jobs(Duration::from_secs(960)).await.unwrap();
    assert_eq!(reaped, 1);

    let stale = repo.get_job(stale.id).await.unwrap().unwrap();
    assert_eq!(stale.status, JobStatus::Failed);
    assert_eq!(stale.error_class, Some(ErrorClass::Timeout));
    let fresh = repo.get_job(fresh.id).await.unwrap().unwrap();
    assert_eq!(fresh.status, JobStatus::Running);
}
