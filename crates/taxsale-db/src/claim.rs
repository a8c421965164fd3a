use std::time::Duration;

use sqlx::{PgPool, Pool, Postgres};
use taxsale_core::error::AppError;
use taxsale_core::traits::DocumentLocks;
use uuid::Uuid;

/// Per-document mutual exclusion through a claim recorded on the
/// `source_documents` row.
///
/// Claiming and releasing are single statements, so a held claim never pins
/// a pooled connection. A claim older than the ttl is treated as abandoned
/// by a crashed process and can be taken over.
#[derive(Clone)]
pub struct DocumentClaims {
    pool: Pool<Postgres>,
    ttl: Duration,
}

impl DocumentClaims {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            ttl: Duration::from_secs(960),
        }
    }

    /// Sets how long a claim survives without release. Should cover the
    /// longest possible run of one document.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Current claimant of a document, if any.
    pub async fn claimed_by(&self, document_id: Uuid) -> Result<Option<String>, AppError> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as(r#"SELECT claimed_by FROM source_documents WHERE id = $1"#)
                .bind(document_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.and_then(|(claimed_by,)| claimed_by))
    }
}

/// A held document claim. Hand it back with [`DocumentLocks::release`];
/// a dropped claim stays in place until its ttl runs out.
#[derive(Debug)]
pub struct DocumentClaim {
    document_id: Uuid,
    token: String,
}

impl DocumentClaim {
    pub fn document_id(&self) -> Uuid {
        self.document_id
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl DocumentLocks for DocumentClaims {
    type Guard = DocumentClaim;

    /// Returns `None` when the document is claimed elsewhere or not registered.
    async fn try_lock(&self, document_id: Uuid) -> Result<Option<DocumentClaim>, AppError> {
        let token = format!("claim-{}", Uuid::new_v4());

        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE source_documents
            SET claimed_by = $2, claimed_at = NOW()
            WHERE id = $1
              AND (claimed_by IS NULL OR claimed_at < NOW() - make_interval(secs => $3))
            RETURNING id
            "#,
        )
        .bind(document_id)
        .bind(&token)
        .bind(self.ttl.as_secs_f64())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(claimed.map(|_| DocumentClaim { document_id, token }))
    }

    async fn release(&self, claim: DocumentClaim) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE source_documents
            SET claimed_by = NULL, claimed_at = NULL
            WHERE id = $1 AND claimed_by = $2
            "#,
        )
        .bind(claim.document_id)
        .bind(&claim.token)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            tracing::warn!(
                document_id = %claim.document_id,
                "Claim was already taken over before release"
            );
        }
        Ok(())
    }
}
