pub mod claim;
pub mod config;
pub mod database;
pub mod document_repository;
pub mod job_repository;
pub mod property_repository;

pub use claim::{DocumentClaim, DocumentClaims};
pub use config::DatabaseConfig;
pub use database::Database;
pub use document_repository::DocumentRepository;
pub use job_repository::JobRepository;
pub use property_repository::PropertyRepository;
