mod claim_tests;
mod common;
mod document_tests;
mod job_tests;
mod pipeline_tests;
mod property_tests;
