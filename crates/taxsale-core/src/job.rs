use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorClass;
use crate::strategy::Strategy;

/// Status of one extraction attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

/// Row counts gathered while an attempt ran.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AttemptStats {
    pub records_extracted: u32,
    pub records_failed: u32,
    pub rows_excluded: u32,
    pub average_confidence: Option<f64>,
}

/// One strategy attempt against one document.
///
/// The job is created pending, marked running before any collaborator is
/// called, and closed as succeeded or failed. It is persisted at each step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionJob {
    pub id: Uuid,
    pub document_id: Uuid,
    pub strategy: Strategy,
    pub status: JobStatus,
    /// Format profile used, when the attempt got as far as classification.
    pub profile_name: Option<String>,
    /// SHA-256 of the bytes or text the attempt worked from.
    pub content_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub records_extracted: u32,
    pub records_failed: u32,
    pub rows_excluded: u32,
    pub average_confidence: Option<f64>,
    pub error_class: Option<ErrorClass>,
    pub error_message: Option<String>,
    pub worker_id: Option<String>,
}

impl ExtractionJob {
    pub fn new(document_id: Uuid, strategy: Strategy) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_id,
            strategy,
            status: JobStatus::Pending,
            profile_name: None,
            content_hash: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            records_extracted: 0,
            records_failed: 0,
            rows_excluded: 0,
            average_confidence: None,
            error_class: None,
            error_message: None,
            worker_id: None,
        }
    }

    pub fn start(&mut self, worker_id: &str) {
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
        self.worker_id = Some(worker_id.to_string());
    }

    pub fn succeed(&mut self, stats: AttemptStats) {
        self.apply_stats(stats);
        self.status = JobStatus::Succeeded;
        self.completed_at = Some(Utc::now());
    }

    /// Closes the job as failed. Counts gathered before the failure are kept.
    pub fn fail(&mut self, class: ErrorClass, message: impl Into<String>, stats: AttemptStats) {
        self.apply_stats(stats);
        self.status = JobStatus::Failed;
        self.error_class = Some(class);
        self.error_message = Some(message.into());
        self.completed_at = Some(Utc::now());
    }

    fn apply_stats(&mut self, stats: AttemptStats) {
        self.records_extracted = stats.records_extracted;
        self.records_failed = stats.records_failed;
        self.rows_excluded = stats.rows_excluded;
        self.average_confidence = stats.average_confidence;
    }
}

/// Configuration for a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub worker_id: String,
    /// Documents processed concurrently.
    pub workers: usize,
    /// Wall-clock ceiling for a single strategy attempt.
    pub attempt_timeout: Duration,
    /// Pending documents claimed per run.
    pub batch_limit: usize,
    /// Only process documents from this jurisdiction.
    pub jurisdiction: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", &Uuid::new_v4().to_string()[..8]),
            workers: 4,
            attempt_timeout: Duration::from_secs(120),
            batch_limit: 50,
            jurisdiction: None,
        }
    }
}

impl PipelineConfig {
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit;
        self
    }

    pub fn with_jurisdiction(mut self, jurisdiction: Option<String>) -> Self {
        self.jurisdiction = jurisdiction;
        self
    }

    /// Running jobs older than this were orphaned by a crashed process: twice
    /// the time a document can spend walking all four strategies.
    pub fn stale_job_ceiling(&self) -> Duration {
        self.attempt_timeout * (Strategy::ALL.len() as u32) * 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_roundtrip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Succeeded,
            JobStatus::Failed,
        ] {
            let parsed: JobStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_job_lifecycle() {
        let mut job = ExtractionJob::new(Uuid::new_v4(), Strategy::Direct);
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.started_at.is_none());

        job.start("worker-1");
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.worker_id.as_deref(), Some("worker-1"));
        assert!(!job.status.is_terminal());

        job.succeed(AttemptStats {
            records_extracted: 12,
            records_failed: 1,
            rows_excluded: 4,
            average_confidence: Some(0.93),
        });
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.records_extracted, 12);
        assert!(job.completed_at.is_some());
        assert!(job.error_class.is_none());
    }

    #[test]
    fn test_failed_job_keeps_class() {
        let mut job = ExtractionJob::new(Uuid::new_v4(), Strategy::Rendered);
        job.start("worker-1");
        job.fail(ErrorClass::FetchDenied, "HTTP 403", AttemptStats::default());
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_class, Some(ErrorClass::FetchDenied));
        assert_eq!(job.error_message.as_deref(), Some("HTTP 403"));
    }

    #[test]
    fn test_pipeline_config_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.workers, 4);
        assert_eq!(config.attempt_timeout, Duration::from_secs(120));
        assert_eq!(config.stale_job_ceiling(), Duration::from_secs(960));
        assert!(config.worker_id.starts_with("worker-"));

        let config = config.with_workers(0).with_worker_id("w");
        assert_eq!(config.workers, 1);
        assert_eq!(config.worker_id, "w");
    }
}
