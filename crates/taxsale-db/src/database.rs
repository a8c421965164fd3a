use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use taxsale_core::AppError;

use crate::claim::DocumentClaims;
use crate::config::DatabaseConfig;
use crate::document_repository::DocumentRepository;
use crate::job_repository::JobRepository;
use crate::property_repository::PropertyRepository;

/// Central database facade: owns the connection pool, runs migrations,
/// and vends repository instances.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL with the given configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect: {e}")))?;

        tracing::debug!(max_connections = config.max_connections, "Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a `Database` from an existing pool (useful for testing).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Migration failed: {e}")))?;
        tracing::debug!("Migrations applied");
        Ok(())
    }

    pub fn document_repo(&self) -> DocumentRepository {
        DocumentRepository::new(self.pool.clone())
    }

    pub fn property_repo(&self) -> PropertyRepository {
        PropertyRepository::new(self.pool.clone())
    }

    pub fn job_repo(&self) -> JobRepository {
        JobRepository::new(self.pool.clone())
    }

    pub fn claims(&self) -> DocumentClaims {
        DocumentClaims::new(self.pool.clone())
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
