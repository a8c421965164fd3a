use chrono::{NaiveDate, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use taxsale_core::models::{NewSourceDocument, PropertyRecord, SaleType, SourceDocument};
use taxsale_db::DocumentRepository;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};
use uuid::Uuid;

/// Migration scripts, applied in order.
const MIGRATIONS: &[&str] = &[
    include_str!("../../../../migrations/001_init.sql"),
    include_str!("../../../../migrations/002_extraction_jobs.sql"),
    include_str!("../../../../migrations/003_properties.sql"),
    include_str!("../../../../migrations/004_document_claims.sql"),
];

/// Spins up a PostgreSQL container and returns a connected, migrated pool.
///
/// The `ContainerAsync` must be kept in scope for the test duration;
/// dropping it stops the container.
pub async fn setup_test_db() -> (PgPool, ContainerAsync<GenericImage>) {
    let container = GenericImage::new("postgres", "16")
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .with_env_var("POSTGRES_DB", "taxsale_test")
        .start()
        .await
        .expect("Failed to start PostgreSQL container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");

    let connection_string = format!("postgresql://postgres:postgres@{host}:{port}/taxsale_test");

    // Retry connection until container is fully ready
    const MAX_RETRIES: u32 = 30;
    let mut retries = 0;
    let pool = loop {
        match PgPoolOptions::new()
            .max_connections(8)
            .connect(&connection_string)
            .await
        {
            Ok(pool) => break pool,
            Err(e) => {
                retries += 1;
                if retries >= MAX_RETRIES {
                    panic!("Failed to connect to database after {MAX_RETRIES} retries: {e}");
                }
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    };

    for migration in MIGRATIONS {
        sqlx::raw_sql(migration)
            .execute(&pool)
            .await
            .expect("Failed to run migration");
    }

    (pool, container)
}

pub fn new_document(location: &str) -> NewSourceDocument {
    NewSourceDocument {
        jurisdiction_id: "pa-blair".into(),
        state_code: "pa".into(),
        title: Some("Judicial Sale Property List".into()),
        location: location.into(),
        sale_type_hint: Some(SaleType::Judicial),
        sale_date: NaiveDate::from_ymd_opt(2026, 4, 15),
    }
}

pub async fn register(pool: &PgPool, location: &str) -> SourceDocument {
    DocumentRepository::new(pool.clone())
        .register_document(new_document(location))
        .await
        .unwrap()
}

pub fn record(document: &SourceDocument, parcel_id: &str, confidence: f64) -> PropertyRecord {
    PropertyRecord {
        jurisdiction_id: document.jurisdiction_id.clone(),
        parcel_id: parcel_id.into(),
        sale_type: SaleType::Judicial,
        owner_raw: Some("B A R N ER DAVID W".into()),
        owner_name: Some("BARNER DAVID W".into()),
        address_raw: Some("8 1 5 3RD AVE".into()),
        address: Some("815 3RD AVE".into()),
        municipality: Some("CITY OF ALTOONA".into()),
        tax_amount: Some(812.4),
        penalty_amount: None,
        total_due: Some(1250.0),
        sale_date: document.sale_date,
        tax_year: Some(2026),
        raw_text: format!("* | 101-000124 | BARNER DAVID W | {parcel_id}"),
        document_id: document.id,
        job_id: Uuid::new_v4(),
        confidence,
        extracted_at: Utc::now(),
    }
}
