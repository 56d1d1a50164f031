//! Integration tests for copying files and folder subtrees

mod common;

use bytes::Bytes;

use ::common::error::VaultError;
use ::common::tree::ListOptions;
use ::common::types::Digest;

use common::{bytes_of, setup_test_env, setup_with_quota, OWNER};

#[tokio::test]
async fn test_copy_folder_is_isomorphic() {
    let (vault, blobs) = setup_test_env().await;
    let tree = vault.tree();

    let src = tree.create_folder(OWNER, None, "src").await.unwrap();
    let nested = tree.create_folder(OWNER, Some(src.id), "nested").await.unwrap();
    let a = bytes_of(100, 1);
    let b = bytes_of(200, 2);
    vault.upload(OWNER, Some(src.id), "a.bin", None, a.clone()).await.unwrap();
    vault.upload(OWNER, Some(nested.id), "b.bin", None, b.clone()).await.unwrap();
    let dest = tree.create_folder(OWNER, None, "dest").await.unwrap();

    let copy = tree.copy(OWNER, src.id, Some(dest.id)).await.unwrap();
    assert_ne!(copy.id, src.id);
    assert_eq!(copy.name, "src");
    assert_eq!(copy.parent, Some(dest.id));

    let children = tree
        .list_children(OWNER, Some(copy.id), &ListOptions::default())
        .await
        .unwrap();
    let names: Vec<_> = children.nodes.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, ["a.bin", "nested"]);
    assert_eq!(children.nodes[0].digest, Some(Digest::compute(&a)));

    let nested_copy = &children.nodes[1];
    assert_ne!(nested_copy.id, nested.id);
    let grandchildren = tree
        .list_children(OWNER, Some(nested_copy.id), &ListOptions::default())
        .await
        .unwrap();
    assert_eq!(grandchildren.nodes.len(), 1);
    assert_eq!(grandchildren.nodes[0].digest, Some(Digest::compute(&b)));

    for data in [&a, &b] {
        let entry = vault
            .content()
            .lookup(&Digest::compute(data))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.reference_count, 2);
    }
    assert_eq!(blobs.live_count(), 2);
    assert_eq!(vault.quota().usage(OWNER).await.unwrap().total_used, 600);
}

#[tokio::test]
async fn test_copy_renames_on_collision() {
    let (vault, _) = setup_test_env().await;
    let file = vault
        .upload(OWNER, None, "report.pdf", None, Bytes::from_static(b"pdf"))
        .await
        .unwrap();

    let first = vault.tree().copy(OWNER, file.id, None).await.unwrap();
    let second = vault.tree().copy(OWNER, file.id, None).await.unwrap();
    assert_eq!(first.name, "report (1).pdf");
    assert_eq!(second.name, "report (2).pdf");

    let folder = vault.tree().create_folder(OWNER, None, "photos").await.unwrap();
    let copy = vault.tree().copy(OWNER, folder.id, None).await.unwrap();
    assert_eq!(copy.name, "photos (1)");
}

#[tokio::test]
async fn test_copy_into_own_subtree_terminates() {
    let (vault, _) = setup_test_env().await;
    let tree = vault.tree();

    let top = tree.create_folder(OWNER, None, "top").await.unwrap();
    let child = tree.create_folder(OWNER, Some(top.id), "child").await.unwrap();

    let copy = tree.copy(OWNER, top.id, Some(child.id)).await.unwrap();
    assert_eq!(copy.parent, Some(child.id));

    let inside = tree
        .list_children(OWNER, Some(copy.id), &ListOptions::default())
        .await
        .unwrap();
    assert_eq!(inside.total, 1);
    assert_eq!(inside.nodes[0].name, "child");
    let deeper = tree
        .list_children(OWNER, Some(inside.nodes[0].id), &ListOptions::default())
        .await
        .unwrap();
    assert_eq!(deeper.total, 0);
}

#[tokio::test]
async fn test_copy_skips_trashed_descendants() {
    let (vault, _) = setup_test_env().await;
    let src = vault.tree().create_folder(OWNER, None, "src").await.unwrap();
    let kept = vault
        .upload(OWNER, Some(src.id), "kept.txt", None, Bytes::from_static(b"kept"))
        .await
        .unwrap();
    let gone = vault
        .upload(OWNER, Some(src.id), "gone.txt", None, Bytes::from_static(b"gone!"))
        .await
        .unwrap();
    vault.trash().trash(OWNER, gone.id).await.unwrap();

    let copy = vault.tree().copy(OWNER, src.id, None).await.unwrap();
    let children = vault
        .tree()
        .list_children(OWNER, Some(copy.id), &ListOptions::default())
        .await
        .unwrap();
    assert_eq!(children.total, 1);
    assert_eq!(children.nodes[0].name, kept.name);
    assert_eq!(vault.quota().usage(OWNER).await.unwrap().total_used, 8);
}

#[tokio::test]
async fn test_copy_over_quota_changes_nothing() {
    let (vault, _) = setup_with_quota(150).await;
    let data = bytes_of(100, 5);
    let file = vault.upload(OWNER, None, "a.bin", None, data.clone()).await.unwrap();

    let result = vault.tree().copy(OWNER, file.id, None).await;
    assert!(matches!(result, Err(VaultError::QuotaExceeded { .. })));

    let entry = vault
        .content()
        .lookup(&Digest::compute(&data))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.reference_count, 1);
    assert_eq!(vault.quota().usage(OWNER).await.unwrap().total_used, 100);
    let root = vault
        .tree()
        .list_children(OWNER, None, &ListOptions::default())
        .await
        .unwrap();
    assert_eq!(root.total, 1);
}
