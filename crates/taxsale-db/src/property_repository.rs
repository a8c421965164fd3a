use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Pool, Postgres};
use taxsale_core::error::AppError;
use taxsale_core::models::{
    PropertyKey, PropertyRecord, SaleType, StoredProperty, UpsertOutcome,
};
use taxsale_core::traits::PropertyStore;
use uuid::Uuid;

/// Repository for deduplicated property records in PostgreSQL.
#[derive(Clone)]
pub struct PropertyRepository {
    pool: Pool<Postgres>,
}

impl PropertyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, key: &PropertyKey) -> Result<Option<StoredProperty>, AppError> {
        let row = sqlx::query_as::<_, PropertyRow>(
            r#"
            SELECT * FROM properties
            WHERE jurisdiction_id = $1 AND parcel_id = $2 AND sale_type = $3
            "#,
        )
        .bind(&key.jurisdiction_id)
        .bind(&key.parcel_id)
        .bind(key.sale_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.map(StoredProperty::try_from).transpose()
    }

    pub async fn count_for_document(&self, document_id: Uuid) -> Result<i64, AppError> {
        let (count,): (i64,) =
            sqlx::query_as(r#"SELECT COUNT(*) FROM properties WHERE document_id = $1"#)
                .bind(document_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(count)
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct PropertyRow {
    id: Uuid,
    jurisdiction_id: String,
    parcel_id: String,
    sale_type: String,
    owner_raw: Option<String>,
    owner_name: Option<String>,
    address_raw: Option<String>,
    address: Option<String>,
    municipality: Option<String>,
    tax_amount: Option<f64>,
    penalty_amount: Option<f64>,
    total_due: Option<f64>,
    sale_date: Option<NaiveDate>,
    tax_year: Option<i32>,
    raw_text: String,
    document_id: Uuid,
    job_id: Uuid,
    confidence: f64,
    extracted_at: DateTime<Utc>,
    first_seen_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn parse_sale_type(text: &str) -> Result<SaleType, AppError> {
    text.parse()
        .map_err(|e| AppError::DatabaseError(format!("Invalid sale_type in properties: {e}")))
}

impl TryFrom<PropertyRow> for StoredProperty {
    type Error = AppError;

    fn try_from(row: PropertyRow) -> Result<Self, AppError> {
        Ok(StoredProperty {
            id: row.id,
            record: PropertyRecord {
                jurisdiction_id: row.jurisdiction_id,
                parcel_id: row.parcel_id,
                sale_type: parse_sale_type(&row.sale_type)?,
                owner_raw: row.owner_raw,
                owner_name: row.owner_name,
                address_raw: row.address_raw,
                address: row.address,
                municipality: row.municipality,
                tax_amount: row.tax_amount,
                penalty_amount: row.penalty_amount,
                total_due: row.total_due,
                sale_date: row.sale_date,
                tax_year: row.tax_year,
                raw_text: row.raw_text,
                document_id: row.document_id,
                job_id: row.job_id,
                confidence: row.confidence,
                extracted_at: row.extracted_at,
            },
            first_seen_at: row.first_seen_at,
            updated_at: row.updated_at,
        })
    }
}

impl PropertyStore for PropertyRepository {
    /// Single-statement upsert. The conflict branch only fires when the
    /// stored confidence is not higher, so a weaker strategy never
    /// overwrites a stronger one. No returned row means the update was
    /// suppressed.
    async fn upsert(&self, record: &PropertyRecord) -> Result<UpsertOutcome, AppError> {
        let inserted: Option<(bool,)> = sqlx::query_as(
            r#"
            INSERT INTO properties (
                jurisdiction_id, parcel_id, sale_type, owner_raw, owner_name,
                address_raw, address, municipality, tax_amount, penalty_amount,
                total_due, sale_date, tax_year, raw_text, document_id, job_id,
                confidence, extracted_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            ON CONFLICT (jurisdiction_id, parcel_id, sale_type) DO UPDATE SET
                owner_raw = EXCLUDED.owner_raw,
                owner_name = EXCLUDED.owner_name,
                address_raw = EXCLUDED.address_raw,
                address = EXCLUDED.address,
                municipality = EXCLUDED.municipality,
                tax_amount = EXCLUDED.tax_amount,
                penalty_amount = EXCLUDED.penalty_amount,
                total_due = EXCLUDED.total_due,
                sale_date = EXCLUDED.sale_date,
                tax_year = EXCLUDED.tax_year,
                raw_text = EXCLUDED.raw_text,
                document_id = EXCLUDED.document_id,
                job_id = EXCLUDED.job_id,
                confidence = EXCLUDED.confidence,
                extracted_at = EXCLUDED.extracted_at,
                updated_at = NOW()
            WHERE properties.confidence <= EXCLUDED.confidence
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(&record.jurisdiction_id)
        .bind(&record.parcel_id)
        .bind(record.sale_type.as_str())
        .bind(&record.owner_raw)
        .bind(&record.owner_name)
        .bind(&record.address_raw)
        .bind(&record.address)
        .bind(&record.municipality)
        .bind(record.tax_amount)
        .bind(record.penalty_amount)
        .bind(record.total_due)
        .bind(record.sale_date)
        .bind(record.tax_year)
        .bind(&record.raw_text)
        .bind(record.document_id)
        .bind(record.job_id)
        .bind(record.confidence)
        .bind(record.extracted_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(match inserted {
            Some((true,)) => UpsertOutcome::Inserted,
            Some((false,)) => UpsertOutcome::Updated,
            None => UpsertOutcome::Skipped,
        })
    }

    async fn list_properties(
        &self,
        jurisdiction: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StoredProperty>, AppError> {
        let rows = sqlx::query_as::<_, PropertyRow>(
            r#"
            SELECT * FROM properties
            WHERE ($1::varchar IS NULL OR jurisdiction_id = $1)
            ORDER BY updated_at DESC, parcel_id ASC
            LIMIT $2
            "#,
        )
        .bind(jurisdiction)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        rows.into_iter().map(StoredProperty::try_from).collect()
    }

    async fn document_sale_type(&self, document_id: Uuid) -> Result<Option<SaleType>, AppError> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT sale_type FROM properties
            WHERE document_id = $1
            ORDER BY first_seen_at ASC
            LIMIT 1
            "#,
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.map(|(sale_type,)| parse_sale_type(&sale_type)).transpose()
    }
}
