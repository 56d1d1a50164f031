//! Integration tests for quota accounting across tree operations

mod common;

use ::common::error::VaultError;
use ::common::types::OwnerId;

use common::{bytes_of, setup_test_env, GIB, OWNER};

#[tokio::test]
async fn test_open_account_is_idempotent() {
    let (vault, _) = setup_test_env().await;
    let usage = vault.quota().usage(OWNER).await.unwrap();
    assert_eq!(usage.total_quota, 10 * GIB);
    assert_eq!(usage.total_used, 0);

    let again = vault.quota().open_account(OWNER, Some(5 * GIB)).await.unwrap();
    assert_eq!(again.total_quota, 10 * GIB);

    assert!(matches!(
        vault.quota().usage(OwnerId(77)).await,
        Err(VaultError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_set_quota_floor() {
    let (vault, _) = setup_test_env().await;
    let too_small = vault.quota().set_quota(OWNER, GIB - 1).await;
    assert!(matches!(too_small, Err(VaultError::InvalidInput(_))));

    let usage = vault.quota().set_quota(OWNER, 2 * GIB).await.unwrap();
    assert_eq!(usage.total_quota, 2 * GIB);
    assert!((usage.percentage() - 0.0).abs() < f64::EPSILON);

    assert!(matches!(
        vault.quota().set_quota(OwnerId(77), 2 * GIB).await,
        Err(VaultError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_used_tracks_active_files_through_lifecycle() {
    let (vault, _) = setup_test_env().await;
    let folder = vault.tree().create_folder(OWNER, None, "f").await.unwrap();
    let a = vault
        .upload(OWNER, Some(folder.id), "a.bin", None, bytes_of(1000, 1))
        .await
        .unwrap();
    let b = vault
        .upload(OWNER, None, "b.bin", None, bytes_of(250, 2))
        .await
        .unwrap();
    vault.tree().copy(OWNER, folder.id, None).await.unwrap();
    assert_eq!(vault.quota().usage(OWNER).await.unwrap().total_used, 2250);

    vault.trash().trash(OWNER, a.id).await.unwrap();
    assert_eq!(vault.quota().usage(OWNER).await.unwrap().total_used, 1250);
    vault.trash().purge(OWNER, a.id).await.unwrap();
    assert_eq!(vault.quota().usage(OWNER).await.unwrap().total_used, 1250);

    vault.trash().trash(OWNER, b.id).await.unwrap();
    vault.trash().restore(OWNER, b.id).await.unwrap();
    assert_eq!(vault.quota().usage(OWNER).await.unwrap().total_used, 1250);

    assert_eq!(vault.quota().recompute(OWNER).await.unwrap(), 1250);
}

#[tokio::test]
async fn test_recompute_corrects_drift() {
    let (vault, _) = setup_test_env().await;
    vault
        .upload(OWNER, None, "a.bin", None, bytes_of(400, 1))
        .await
        .unwrap();

    // an unmatched reservation is drift
    assert!(vault.quota().reserve(OWNER, 1000).await.unwrap());
    assert_eq!(vault.quota().usage(OWNER).await.unwrap().total_used, 1400);

    assert_eq!(vault.quota().recompute(OWNER).await.unwrap(), 400);
    assert_eq!(vault.quota().usage(OWNER).await.unwrap().total_used, 400);
}

#[tokio::test]
async fn test_over_release_recomputes() {
    let (vault, _) = setup_test_env().await;
    vault
        .upload(OWNER, None, "a.bin", None, bytes_of(400, 1))
        .await
        .unwrap();

    vault.quota().release(OWNER, 10_000).await.unwrap();
    assert_eq!(vault.quota().usage(OWNER).await.unwrap().total_used, 400);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reservations_never_exceed_quota() {
    let (vault, _) = setup_test_env().await;
    vault.quota().set_quota(OWNER, GIB).await.unwrap();

    let chunk = GIB / 4;
    let mut handles = Vec::new();
    for _ in 0..10 {
        let quota = vault.quota().clone();
        handles.push(tokio::spawn(async move { quota.reserve(OWNER, chunk).await }));
    }
    let mut granted = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap() {
            granted += 1;
        }
    }
    assert_eq!(granted, 4);
    assert_eq!(vault.quota().usage(OWNER).await.unwrap().total_used, GIB);
}
