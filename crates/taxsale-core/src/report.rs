use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use crate::error::ErrorClass;
use crate::models::FetchStatus;
use crate::orchestrator::DocumentOutcome;

/// A document that exhausted every strategy.
#[derive(Debug, Clone, Serialize)]
pub struct FailedDocument {
    pub document_id: Uuid,
    pub jurisdiction_id: String,
    pub error_class: ErrorClass,
    pub fetch_status: FetchStatus,
}

/// Aggregate counts for one pipeline run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub documents_claimed: u32,
    pub documents_succeeded: u32,
    pub documents_failed: u32,
    /// Held by another worker or process when this run reached them.
    pub documents_skipped: u32,
    pub stale_jobs_reaped: u64,
    pub records_extracted: u32,
    pub records_failed: u32,
    pub records_inserted: u32,
    pub records_updated: u32,
    pub records_unchanged: u32,
    pub average_confidence: Option<f64>,
    /// Winning strategy name to number of documents it extracted.
    pub by_strategy: BTreeMap<String, u32>,
    pub failures: Vec<FailedDocument>,
    pub cancelled: bool,
    #[serde(skip)]
    confidence_sum: f64,
}

impl RunReport {
    pub fn new(documents_claimed: usize) -> Self {
        Self {
            documents_claimed: documents_claimed as u32,
            ..Self::default()
        }
    }

    pub fn record(&mut self, outcome: &DocumentOutcome) {
        if outcome.succeeded {
            self.documents_succeeded += 1;
        } else {
            self.documents_failed += 1;
            self.failures.push(FailedDocument {
                document_id: outcome.document_id,
                jurisdiction_id: outcome.jurisdiction_id.clone(),
                error_class: outcome
                    .error_class
                    .unwrap_or(ErrorClass::NoExtractableContent),
                fetch_status: outcome.fetch_status,
            });
        }
        if let Some(strategy) = outcome.strategy {
            *self.by_strategy.entry(strategy.to_string()).or_insert(0) += 1;
        }

        self.records_extracted += outcome.records_extracted;
        self.records_failed += outcome.records_failed;
        self.records_inserted += outcome.inserted;
        self.records_updated += outcome.updated;
        self.records_unchanged += outcome.skipped;
        self.confidence_sum += outcome.confidence_sum;
        self.average_confidence = (self.records_extracted > 0)
            .then(|| self.confidence_sum / f64::from(self.records_extracted));
    }

    pub fn record_skipped(&mut self) {
        self.documents_skipped += 1;
    }

    pub fn documents_processed(&self) -> u32 {
        self.documents_succeeded + self.documents_failed
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Documents: {} claimed, {} succeeded, {} failed, {} skipped",
            self.documents_claimed,
            self.documents_succeeded,
            self.documents_failed,
            self.documents_skipped
        )?;
        writeln!(
            f,
            "Records:   {} extracted ({} new, {} updated, {} kept), {} failed",
            self.records_extracted,
            self.records_inserted,
            self.records_updated,
            self.records_unchanged,
            self.records_failed
        )?;
        if let Some(avg) = self.average_confidence {
            writeln!(f, "Average confidence: {avg:.2}")?;
        }
        for (strategy, count) in &self.by_strategy {
            writeln!(f, "  {strategy:<16} {count}")?;
        }
        for failure in &self.failures {
            writeln!(
                f,
                "  FAILED {} ({}): {} [{}]",
                failure.document_id,
                failure.jurisdiction_id,
                failure.error_class,
                failure.fetch_status
            )?;
        }
        if self.stale_jobs_reaped > 0 {
            writeln!(f, "Reaped {} stale jobs", self.stale_jobs_reaped)?;
        }
        if self.cancelled {
            writeln!(f, "Run was cancelled before the batch finished")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::Strategy;

    fn outcome(succeeded: bool, records: u32, confidence_sum: f64) -> DocumentOutcome {
        DocumentOutcome {
            document_id: Uuid::new_v4(),
            jurisdiction_id: "pa-blair".into(),
            succeeded,
            strategy: succeeded.then_some(Strategy::Direct),
            attempts: vec![],
            records_extracted: records,
            records_failed: 1,
            inserted: records,
            updated: 0,
            skipped: 0,
            confidence_sum,
            fetch_status: if succeeded {
                FetchStatus::Extracted
            } else {
                FetchStatus::Denied
            },
            error_class: (!succeeded).then_some(ErrorClass::NoExtractableContent),
        }
    }

    #[test]
    fn test_report_aggregates_outcomes() {
        let mut report = RunReport::new(3);
        report.record(&outcome(true, 2, 1.9));
        report.record(&outcome(false, 0, 0.0));
        report.record_skipped();

        assert_eq!(report.documents_processed(), 2);
        assert_eq!(report.documents_skipped, 1);
        assert_eq!(report.records_extracted, 2);
        assert_eq!(report.records_failed, 2);
        assert_eq!(report.by_strategy.get("direct"), Some(&1));
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].fetch_status, FetchStatus::Denied);
        assert!((report.average_confidence.unwrap() - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_report_display_and_json() {
        let mut report = RunReport::new(1);
        report.record(&outcome(false, 0, 0.0));
        let text = report.to_string();
        assert!(text.contains("1 failed"));
        assert!(text.contains("NO_EXTRACTABLE_CONTENT"));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["documents_failed"], 1);
        assert!(json.get("confidence_sum").is_none());
    }
}
