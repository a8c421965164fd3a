use std::time::Duration;

use taxsale_core::traits::DocumentLocks;
use taxsale_db::DocumentClaims;
use uuid::Uuid;

use crate::integration::common::{register, setup_test_db};

#[tokio::test]
async fn second_claim_is_refused() {
    let (pool, _container) = setup_test_db().await;
    let doc = register(&pool, "https://blairco.example/judicial.pdf").await;
    let other_doc = register(&pool, "https://blairco.example/upset.pdf").await;
    let claims = DocumentClaims::new(pool.clone());
    // A separate handle stands in for another process on the same database.
    let other = DocumentClaims::new(pool);

    let claim = claims.try_lock(doc.id).await.unwrap().expect("first claim");
    assert_eq!(claim.document_id(), doc.id);
    assert_eq!(
        claims.claimed_by(doc.id).await.unwrap().as_deref(),
        Some(claim.token())
    );
    assert!(other.try_lock(doc.id).await.unwrap().is_none());
    assert!(other.try_lock(other_doc.id).await.unwrap().is_some());

    claims.release(claim).await.unwrap();
    assert_eq!(claims.claimed_by(doc.id).await.unwrap(), None);
    assert!(other.try_lock(doc.id).await.unwrap().is_some());
}

#[tokio::test]
async fn expired_claim_can_be_taken_over() {
    let (pool, _container) = setup_test_db().await;
    let doc = register(&pool, "https://blairco.example/judicial.pdf").await;
    let crashed = DocumentClaims::new(pool.clone());
    let survivor = DocumentClaims::new(pool).with_ttl(Duration::from_millis(100));

    let abandoned = crashed.try_lock(doc.id).await.unwrap().expect("first claim");
    assert!(survivor.try_lock(doc.id).await.unwrap().is_none());
    tokio::time::sleep(Duration::from_millis(300)).await;

    let taken = survivor.try_lock(doc.id).await.unwrap().expect("takeover");
    // Releasing the stale claim must not free the new holder's claim.
    crashed.release(abandoned).await.unwrap();
    assert_eq!(
        survivor.claimed_by(doc.id).await.unwrap().as_deref(),
        Some(taken.token())
    );
}

#[tokio::test]
async fn unknown_document_cannot_be_claimed() {
    let (pool, _container) = setup_test_db().await;
    let claims = DocumentClaims::new(pool);

    assert!(claims.try_lock(Uuid::new_v4()).await.unwrap().is_none());
}
