//! Integration tests for uploads, deduplication and downloads

mod common;

use bytes::Bytes;

use ::common::config::{TreeLimits, VaultConfig};
use ::common::error::VaultError;
use ::common::tree::ListOptions;
use ::common::types::{Digest, NodeId};

use common::{
    bytes_of, eventually, setup_test_env, setup_with_config, setup_with_quota, test_config, MIB,
    OTHER, OWNER,
};

#[tokio::test]
async fn test_identical_uploads_share_one_blob() {
    let (vault, blobs) = setup_test_env().await;
    let data = bytes_of(5 * MIB as usize, 7);
    let digest = Digest::compute(&data);

    let first = vault
        .upload(OWNER, None, "report.pdf", None, data.clone())
        .await
        .unwrap();
    assert_eq!(vault.quota().usage(OWNER).await.unwrap().total_used, 5 * MIB);
    assert_eq!(first.mime_type.as_deref(), Some("application/pdf"));

    let entry = vault.content().lookup(&digest).await.unwrap().unwrap();
    assert_eq!(entry.reference_count, 1);

    let second = vault
        .upload(OWNER, None, "report-copy.pdf", None, data)
        .await
        .unwrap();

    let entry = vault.content().lookup(&digest).await.unwrap().unwrap();
    assert_eq!(entry.reference_count, 2);
    assert_eq!(vault.quota().usage(OWNER).await.unwrap().total_used, 10 * MIB);
    assert_eq!(blobs.live_count(), 1);
    assert_eq!(blobs.put_count(), 1);
    assert_eq!(first.storage_key, second.storage_key);
    assert_eq!(second.digest, Some(digest));
}

#[tokio::test]
async fn test_dedup_across_owners() {
    let (vault, blobs) = setup_test_env().await;
    vault.quota().open_account(OTHER, None).await.unwrap();
    let data = Bytes::from_static(b"shared bytes");

    vault.upload(OWNER, None, "a.txt", None, data.clone()).await.unwrap();
    let theirs = vault.upload(OTHER, None, "b.txt", None, data).await.unwrap();

    assert_eq!(blobs.live_count(), 1);
    let (_, downloaded) = vault.download(OTHER, theirs.id).await.unwrap();
    assert_eq!(downloaded, Bytes::from_static(b"shared bytes"));
    // the other owner can't read ours through their id space
    assert!(matches!(
        vault.download(OWNER, theirs.id).await,
        Err(VaultError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_upload_roundtrip_and_explicit_mime() {
    let (vault, _) = setup_test_env().await;
    let folder = vault.tree().create_folder(OWNER, None, "docs").await.unwrap();

    let node = vault
        .upload(
            OWNER,
            Some(folder.id),
            "data.bin",
            Some("application/x-custom"),
            Bytes::from_static(b"\x00\x01\x02"),
        )
        .await
        .unwrap();
    assert_eq!(node.parent, Some(folder.id));
    assert_eq!(node.size, 3);
    assert_eq!(node.mime_type.as_deref(), Some("application/x-custom"));

    let (fetched, data) = vault.download(OWNER, node.id).await.unwrap();
    assert_eq!(fetched.id, node.id);
    assert_eq!(data.as_ref(), b"\x00\x01\x02");
}

#[tokio::test]
async fn test_name_conflict_writes_nothing() {
    let (vault, blobs) = setup_test_env().await;
    vault
        .upload(OWNER, None, "notes.txt", None, Bytes::from_static(b"one"))
        .await
        .unwrap();

    let result = vault
        .upload(OWNER, None, "notes.txt", None, Bytes::from_static(b"two"))
        .await;
    assert!(matches!(result, Err(VaultError::NameConflict(_))));
    assert_eq!(blobs.put_count(), 1);
    assert_eq!(vault.quota().usage(OWNER).await.unwrap().total_used, 3);
}

#[tokio::test]
async fn test_missing_parent_is_parent_invalid() {
    let (vault, _) = setup_test_env().await;
    let result = vault
        .upload(OWNER, Some(NodeId(999)), "a.txt", None, Bytes::from_static(b"x"))
        .await;
    assert!(matches!(result, Err(VaultError::ParentInvalid(_))));

    let file = vault
        .upload(OWNER, None, "file.txt", None, Bytes::from_static(b"x"))
        .await
        .unwrap();
    let result = vault
        .upload(OWNER, Some(file.id), "child.txt", None, Bytes::from_static(b"y"))
        .await;
    assert!(matches!(result, Err(VaultError::ParentInvalid(_))));
}

#[tokio::test]
async fn test_invalid_names_rejected() {
    let (vault, _) = setup_test_env().await;
    for name in ["", "a/b", "..", "."] {
        let result = vault
            .upload(OWNER, None, name, None, Bytes::from_static(b"x"))
            .await;
        assert!(
            matches!(result, Err(VaultError::InvalidInput(_))),
            "{name:?} should be rejected"
        );
    }
}

#[tokio::test]
async fn test_quota_exceeded_before_blob_write() {
    let (vault, blobs) = setup_with_quota(100).await;

    let result = vault
        .upload(OWNER, None, "big.bin", None, bytes_of(101, 1))
        .await;
    match result {
        Err(VaultError::QuotaExceeded {
            requested,
            available,
        }) => {
            assert_eq!(requested, 101);
            assert_eq!(available, 100);
        }
        other => panic!("expected QuotaExceeded, got {other:?}"),
    }
    assert_eq!(blobs.put_count(), 0);
    assert_eq!(vault.quota().usage(OWNER).await.unwrap().total_used, 0);
}

#[tokio::test]
async fn test_storage_failure_rolls_back_quota() {
    let (vault, blobs) = setup_test_env().await;
    blobs.fail_puts(true);

    let data = bytes_of(1024, 3);
    let result = vault.upload(OWNER, None, "a.bin", None, data.clone()).await;
    assert!(matches!(result, Err(VaultError::StorageFailure { .. })));
    assert_eq!(vault.quota().usage(OWNER).await.unwrap().total_used, 0);
    assert!(vault
        .content()
        .lookup(&Digest::compute(&data))
        .await
        .unwrap()
        .is_none());

    blobs.fail_puts(false);
    vault.upload(OWNER, None, "a.bin", None, data).await.unwrap();
    assert_eq!(vault.quota().usage(OWNER).await.unwrap().total_used, 1024);
}

#[tokio::test]
async fn test_abandoned_upload_leaves_nothing() {
    let (vault, blobs) = setup_test_env().await;
    blobs.stall_puts(true);
    let data = bytes_of(4096, 5);

    let task = {
        let vault = vault.clone();
        let data = data.clone();
        tokio::spawn(async move { vault.upload(OWNER, None, "gone.bin", None, data).await })
    };
    eventually("blob write", || blobs.live_count() == 1).await;
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    eventually("blob removal", || blobs.live_count() == 0).await;
    assert_eq!(vault.quota().usage(OWNER).await.unwrap().total_used, 0);
    assert!(vault
        .content()
        .lookup(&Digest::compute(&data))
        .await
        .unwrap()
        .is_none());
    let root = vault
        .tree()
        .list_children(OWNER, None, &ListOptions::default())
        .await
        .unwrap();
    assert_eq!(root.total, 0);

    // the same bytes upload cleanly afterwards
    blobs.stall_puts(false);
    vault.upload(OWNER, None, "gone.bin", None, data).await.unwrap();
    assert_eq!(blobs.live_count(), 1);
}

#[tokio::test]
async fn test_node_rejected_after_blob_write_rolls_back() {
    let config = VaultConfig {
        limits: TreeLimits {
            max_depth: 1,
            max_nodes: 100,
        },
        ..test_config()
    };
    let (vault, blobs) = setup_with_config(config).await;
    let folder = vault.tree().create_folder(OWNER, None, "full").await.unwrap();
    let data = bytes_of(512, 6);

    // the depth limit is only checked with the node insert, after the put
    let result = vault
        .upload(OWNER, Some(folder.id), "deep.bin", None, data.clone())
        .await;
    assert!(matches!(result, Err(VaultError::InvalidInput(_))));
    assert_eq!(blobs.put_count(), 1);
    assert_eq!(blobs.live_count(), 0);
    assert_eq!(vault.quota().usage(OWNER).await.unwrap().total_used, 0);
    assert!(vault
        .content()
        .lookup(&Digest::compute(&data))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_quick_upload() {
    let (vault, blobs) = setup_test_env().await;
    let data = bytes_of(2048, 9);
    let digest = Digest::compute(&data);
    vault.upload(OWNER, None, "orig.bin", None, data).await.unwrap();

    let quick = vault
        .quick_upload(OWNER, None, "again.bin", &digest, 2048)
        .await
        .unwrap();
    assert_eq!(quick.digest.as_ref(), Some(&digest));
    assert_eq!(blobs.put_count(), 1);
    assert_eq!(
        vault.content().lookup(&digest).await.unwrap().unwrap().reference_count,
        2
    );
    assert_eq!(vault.quota().usage(OWNER).await.unwrap().total_used, 4096);

    let mismatch = vault
        .quick_upload(OWNER, None, "wrong.bin", &digest, 10)
        .await;
    assert!(matches!(mismatch, Err(VaultError::InvalidInput(_))));

    let unknown = Digest::compute(b"never uploaded");
    let missing = vault
        .quick_upload(OWNER, None, "nope.bin", &unknown, 14)
        .await;
    assert!(matches!(missing, Err(VaultError::NotFound(_))));
    assert_eq!(vault.quota().usage(OWNER).await.unwrap().total_used, 4096);
}

#[tokio::test]
async fn test_download_folder_is_invalid() {
    let (vault, _) = setup_test_env().await;
    let folder = vault.tree().create_folder(OWNER, None, "f").await.unwrap();
    assert!(matches!(
        vault.download(OWNER, folder.id).await,
        Err(VaultError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn test_presign_unsupported_on_memory_backend() {
    let (vault, _) = setup_test_env().await;
    let node = vault
        .upload(OWNER, None, "a.txt", None, Bytes::from_static(b"a"))
        .await
        .unwrap();
    let err = vault.presign(OWNER, node.id).await.unwrap_err();
    assert!(matches!(err, VaultError::StorageFailure { .. }));
    assert_eq!(err.public_message(), "storage temporarily unavailable");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_identical_uploads_store_once() {
    let (vault, blobs) = setup_test_env().await;
    let data = bytes_of(64 * 1024, 42);

    let mut handles = Vec::new();
    for i in 0..8 {
        let vault = vault.clone();
        let data = data.clone();
        handles.push(tokio::spawn(async move {
            vault
                .upload(OWNER, None, &format!("copy-{i}.bin"), None, data)
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(blobs.live_count(), 1);
    let entry = vault
        .content()
        .lookup(&Digest::compute(&data))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.reference_count, 8);
    assert_eq!(
        vault.quota().usage(OWNER).await.unwrap().total_used,
        8 * 64 * 1024
    );
}
