pub mod classify;
pub mod error;
pub mod extract;
pub mod job;
pub mod memory;
pub mod models;
pub mod normalize;
pub mod orchestrator;
pub mod profile;
pub mod report;
pub mod strategy;
pub mod traits;
pub mod worker;

#[cfg(test)]
mod testutil;

pub use error::{AppError, ErrorClass};
pub use job::{ExtractionJob, JobStatus, PipelineConfig};
pub use models::{
    DocumentContent, DocumentHints, FetchStatus, NewSourceDocument, PropertyRecord, RawRow,
    SaleType, SourceDocument, StoredProperty, UpsertOutcome, compute_hash,
};
pub use normalize::GivenNames;
pub use orchestrator::{DocumentOutcome, ExtractionOrchestrator};
pub use profile::{FormatProfile, ProfileRegistry};
pub use report::RunReport;
pub use strategy::Strategy;
pub use traits::{
    AssistedExtractor, CustomProfileRunner, DocumentLocks, DocumentReader, DocumentRegistry,
    JobTracker, PropertyStore, Renderer, Unconfigured,
};
pub use worker::{PipelineReporter, PipelineRunner, TracingPipelineReporter};
