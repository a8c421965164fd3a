use taxsale_core::models::{FetchStatus, SaleType};
use taxsale_core::traits::DocumentRegistry;
use taxsale_db::DocumentRepository;

use crate::integration::common::{new_document, setup_test_db};

#[tokio::test]
async fn register_and_list_pending() {
    let (pool, _container) = setup_test_db().await;
    let repo = DocumentRepository::new(pool);

    let doc = repo
        .register_document(new_document("https://blairco.example/judicial.pdf"))
        .await
        .unwrap();
    assert_eq!(doc.state_code, "PA");
    assert_eq!(doc.fetch_status, FetchStatus::Pending);
    assert_eq!(doc.sale_type_hint, Some(SaleType::Judicial));

    let pending = repo.list_pending_documents(None, 10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, doc.id);

    let other = repo
        .list_pending_documents(Some("fl-polk"), 10)
        .await
        .unwrap();
    assert!(other.is_empty());
}

#[tokio::test]
async fn registering_twice_keeps_one_row() {
    let (pool, _container) = setup_test_db().await;
    let repo = DocumentRepository::new(pool);
    let location = "https://blairco.example/upset.pdf";

    let first = repo.register_document(new_document(location)).await.unwrap();
    let mut again = new_document(location);
    again.title = None;
    let second = repo.register_document(again).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.title.as_deref(), Some("Judicial Sale Property List"));
}

#[tokio::test]
async fn fetch_status_removes_from_pending() {
    let (pool, _container) = setup_test_db().await;
    let repo = DocumentRepository::new(pool);
    let doc = repo
        .register_document(new_document("https://blairco.example/repository.pdf"))
        .await
        .unwrap();

    repo.update_fetch_status(doc.id, FetchStatus::Denied)
        .await
        .unwrap();
    assert!(repo.list_pending_documents(None, 10).await.unwrap().is_empty());
    let stored = repo.get_document(doc.id).await.unwrap().unwrap();
    assert_eq!(stored.fetch_status, FetchStatus::Denied);

    assert!(repo.reset_document(doc.id).await.unwrap());
    assert_eq!(repo.list_pending_documents(None, 10).await.unwrap().len(), 1);

    let missing = repo
        .update_fetch_status(uuid::Uuid::new_v4(), FetchStatus::Failed)
        .await;
    assert!(missing.is_err());
}
