use taxsale_core::models::{SaleType, UpsertOutcome};
use taxsale_core::traits::PropertyStore;
use taxsale_db::PropertyRepository;

use crate::integration::common::{record, register, setup_test_db};

#[tokio::test]
async fn upsert_inserts_then_updates() {
    let (pool, _container) = setup_test_db().await;
    let doc = register(&pool, "https://blairco.example/judicial.pdf").await;
    let repo = PropertyRepository::new(pool);

    let first = record(&doc, "01.05-16..-094.00-000", 0.85);
    assert_eq!(repo.upsert(&first).await.unwrap(), UpsertOutcome::Inserted);

    let mut better = first.clone();
    better.confidence = 0.95;
    better.total_due = Some(1300.0);
    assert_eq!(repo.upsert(&better).await.unwrap(), UpsertOutcome::Updated);

    let stored = repo.get(&first.key()).await.unwrap().unwrap();
    assert_eq!(stored.record.total_due, Some(1300.0));
    assert_eq!(stored.record.owner_name.as_deref(), Some("BARNER DAVID W"));
    assert_eq!(repo.count_for_document(doc.id).await.unwrap(), 1);
}

#[tokio::test]
async fn lower_confidence_never_overwrites() {
    let (pool, _container) = setup_test_db().await;
    let doc = register(&pool, "https://blairco.example/judicial.pdf").await;
    let repo = PropertyRepository::new(pool);

    let strong = record(&doc, "01.05-16..-094.00-000", 0.95);
    repo.upsert(&strong).await.unwrap();

    let mut weak = strong.clone();
    weak.confidence = 0.60;
    weak.owner_name = Some("SOMEONE ELSE".into());
    assert_eq!(repo.upsert(&weak).await.unwrap(), UpsertOutcome::Skipped);

    let stored = repo.get(&strong.key()).await.unwrap().unwrap();
    assert_eq!(stored.record.owner_name.as_deref(), Some("BARNER DAVID W"));
    assert!((stored.record.confidence - 0.95).abs() < 1e-9);
}

#[tokio::test]
async fn list_properties_filters_by_jurisdiction() {
    let (pool, _container) = setup_test_db().await;
    let doc = register(&pool, "https://blairco.example/judicial.pdf").await;
    let repo = PropertyRepository::new(pool);

    repo.upsert(&record(&doc, "01.05-16..-093.00-000", 0.95))
        .await
        .unwrap();
    repo.upsert(&record(&doc, "01.05-16..-094.00-000", 0.95))
        .await
        .unwrap();

    assert_eq!(repo.list_properties(Some("pa-blair"), 10).await.unwrap().len(), 2);
    assert_eq!(repo.list_properties(None, 1).await.unwrap().len(), 1);
    assert!(repo.list_properties(Some("tx-bexar"), 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn document_sale_type_follows_first_stored_record() {
    let (pool, _container) = setup_test_db().await;
    let doc = register(&pool, "https://blairco.example/judicial.pdf").await;
    let repo = PropertyRepository::new(pool);

    assert_eq!(repo.document_sale_type(doc.id).await.unwrap(), None);
    repo.upsert(&record(&doc, "01.05-16..-093.00-000", 0.95))
        .await
        .unwrap();
    assert_eq!(
        repo.document_sale_type(doc.id).await.unwrap(),
        Some(SaleType::Judicial)
    );
}
