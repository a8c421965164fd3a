use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Pool, Postgres};
use taxsale_core::error::AppError;
use taxsale_core::models::{FetchStatus, NewSourceDocument, SaleType, SourceDocument};
use taxsale_core::traits::DocumentRegistry;
use uuid::Uuid;

/// PostgreSQL-backed document registry.
#[derive(Clone)]
pub struct DocumentRepository {
    pool: Pool<Postgres>,
}

impl DocumentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Registers a document. Registering a location twice returns the
    /// existing row with any newly supplied metadata merged in; its fetch
    /// status is left alone.
    pub async fn register_document(
        &self,
        new: NewSourceDocument,
    ) -> Result<SourceDocument, AppError> {
        let doc = new.into_document();
        let row = sqlx::query_as::<_, DocumentRow>(
            r#"
            INSERT INTO source_documents
                (id, jurisdiction_id, state_code, title, location, sale_type_hint, sale_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (location) DO UPDATE SET
                title = COALESCE(EXCLUDED.title, source_documents.title),
                sale_type_hint = COALESCE(EXCLUDED.sale_type_hint, source_documents.sale_type_hint),
                sale_date = COALESCE(EXCLUDED.sale_date, source_documents.sale_date),
                updated_at = NOW()
            RETURNING id, jurisdiction_id, state_code, title, location, sale_type_hint,
                      sale_date, fetch_status, registered_at
            "#,
        )
        .bind(doc.id)
        .bind(&doc.jurisdiction_id)
        .bind(&doc.state_code)
        .bind(&doc.title)
        .bind(&doc.location)
        .bind(doc.sale_type_hint.map(|s| s.as_str()))
        .bind(doc.sale_date)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.try_into()
    }

    pub async fn get_document(&self, id: Uuid) -> Result<Option<SourceDocument>, AppError> {
        let row = sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT id, jurisdiction_id, state_code, title, location, sale_type_hint,
                   sale_date, fetch_status, registered_at
            FROM source_documents WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.map(SourceDocument::try_from).transpose()
    }

    /// Puts a document back in the pending queue, e.g. after a county
    /// republishes its list at the same location.
    pub async fn reset_document(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE source_documents
            SET fetch_status = 'pending', updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct DocumentRow {
    id: Uuid,
    jurisdiction_id: String,
    state_code: String,
    title: Option<String>,
    location: String,
    sale_type_hint: Option<String>,
    sale_date: Option<NaiveDate>,
    fetch_status: String,
    registered_at: DateTime<Utc>,
}

fn invalid(column: &str, e: String) -> AppError {
    AppError::DatabaseError(format!("Invalid {column} in source_documents: {e}"))
}

impl TryFrom<DocumentRow> for SourceDocument {
    type Error = AppError;

    fn try_from(row: DocumentRow) -> Result<Self, AppError> {
        Ok(SourceDocument {
            id: row.id,
            jurisdiction_id: row.jurisdiction_id,
            state_code: row.state_code.trim().to_string(),
            title: row.title,
            location: row.location,
            sale_type_hint: row
                .sale_type_hint
                .map(|s| s.parse::<SaleType>().map_err(|e| invalid("sale_type_hint", e)))
                .transpose()?,
            sale_date: row.sale_date,
            fetch_status: row
                .fetch_status
                .parse::<FetchStatus>()
                .map_err(|e| invalid("fetch_status", e))?,
            registered_at: row.registered_at,
        })
    }
}

impl DocumentRegistry for DocumentRepository {
    async fn list_pending_documents(
        &self,
        jurisdiction: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SourceDocument>, AppError> {
        let rows = sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT id, jurisdiction_id, state_code, title, location, sale_type_hint,
                   sale_date, fetch_status, registered_at
            FROM source_documents
            WHERE fetch_status = 'pending'
              AND ($1::varchar IS NULL OR jurisdiction_id = $1)
            ORDER BY registered_at ASC
            LIMIT $2
            "#,
        )
        .bind(jurisdiction)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        rows.into_iter().map(SourceDocument::try_from).collect()
    }

    async fn update_fetch_status(
        &self,
        document_id: Uuid,
        status: FetchStatus,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE source_documents
            SET fetch_status = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(document_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(AppError::DatabaseError(format!(
                "Unknown document {document_id}"
            )));
        }
        Ok(())
    }
}
