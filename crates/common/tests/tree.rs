//! Integration tests for folder/file hierarchy operations

mod common;

use bytes::Bytes;

use ::common::config::{TreeLimits, VaultConfig};
use ::common::error::VaultError;
use ::common::tree::{ListOptions, NodeKind, SortKey, SortOrder};

use common::{setup_test_env, setup_with_config, test_config, OTHER, OWNER};

#[tokio::test]
async fn test_create_and_rename() {
    let (vault, _) = setup_test_env().await;
    let tree = vault.tree();

    let docs = tree.create_folder(OWNER, None, "docs").await.unwrap();
    tree.create_folder(OWNER, None, "music").await.unwrap();
    assert!(docs.is_folder());
    assert_eq!(docs.size, 0);

    let renamed = tree.rename(OWNER, docs.id, "papers").await.unwrap();
    assert_eq!(renamed.name, "papers");

    let conflict = tree.rename(OWNER, docs.id, "music").await;
    assert!(matches!(conflict, Err(VaultError::NameConflict(_))));

    // same name is a no-op, not a conflict with itself
    tree.rename(OWNER, docs.id, "papers").await.unwrap();
}

#[tokio::test]
async fn test_same_name_allowed_in_different_folders() {
    let (vault, _) = setup_test_env().await;
    let tree = vault.tree();

    let a = tree.create_folder(OWNER, None, "a").await.unwrap();
    let b = tree.create_folder(OWNER, None, "b").await.unwrap();
    tree.create_folder(OWNER, Some(a.id), "inner").await.unwrap();
    tree.create_folder(OWNER, Some(b.id), "inner").await.unwrap();

    let dup = tree.create_folder(OWNER, Some(a.id), "inner").await;
    assert!(matches!(dup, Err(VaultError::NameConflict(_))));
}

#[tokio::test]
async fn test_foreign_parent_is_invalid() {
    let (vault, _) = setup_test_env().await;
    vault.quota().open_account(OTHER, None).await.unwrap();
    let theirs = vault.tree().create_folder(OTHER, None, "private").await.unwrap();

    let result = vault.tree().create_folder(OWNER, Some(theirs.id), "sneaky").await;
    assert!(matches!(result, Err(VaultError::ParentInvalid(_))));
    assert!(matches!(
        vault.tree().rename(OWNER, theirs.id, "mine").await,
        Err(VaultError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_move_rejects_cycles() {
    let (vault, _) = setup_test_env().await;
    let tree = vault.tree();

    let a = tree.create_folder(OWNER, None, "a").await.unwrap();
    let b = tree.create_folder(OWNER, Some(a.id), "b").await.unwrap();
    let c = tree.create_folder(OWNER, Some(b.id), "c").await.unwrap();

    assert!(matches!(
        tree.move_node(OWNER, a.id, Some(c.id)).await,
        Err(VaultError::ParentInvalid(_))
    ));
    assert!(matches!(
        tree.move_node(OWNER, a.id, Some(a.id)).await,
        Err(VaultError::ParentInvalid(_))
    ));

    let moved = tree.move_node(OWNER, c.id, None).await.unwrap();
    assert_eq!(moved.parent, None);
    let moved = tree.move_node(OWNER, a.id, Some(c.id)).await.unwrap();
    assert_eq!(moved.parent, Some(c.id));
}

#[tokio::test]
async fn test_move_name_conflict() {
    let (vault, _) = setup_test_env().await;
    let tree = vault.tree();

    let dest = tree.create_folder(OWNER, None, "dest").await.unwrap();
    tree.create_folder(OWNER, Some(dest.id), "x").await.unwrap();
    let x = tree.create_folder(OWNER, None, "x").await.unwrap();

    assert!(matches!(
        tree.move_node(OWNER, x.id, Some(dest.id)).await,
        Err(VaultError::NameConflict(_))
    ));
}

#[tokio::test]
async fn test_list_children_sorted_and_paged() {
    let (vault, _) = setup_test_env().await;
    let folder = vault.tree().create_folder(OWNER, None, "f").await.unwrap();
    for (name, len) in [("b.txt", 30usize), ("a.txt", 10), ("c.txt", 20)] {
        vault
            .upload(OWNER, Some(folder.id), name, None, Bytes::from(vec![b'x'; len]))
            .await
            .unwrap();
    }
    vault
        .tree()
        .create_folder(OWNER, Some(folder.id), "sub")
        .await
        .unwrap();

    let all = vault
        .tree()
        .list_children(OWNER, Some(folder.id), &ListOptions::default())
        .await
        .unwrap();
    assert_eq!(all.total, 4);
    let names: Vec<_> = all.nodes.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, ["a.txt", "b.txt", "c.txt", "sub"]);

    let opts = ListOptions {
        kind: Some(NodeKind::File),
        sort: SortKey::Size,
        order: SortOrder::Desc,
        offset: 1,
        limit: 1,
    };
    let page = vault
        .tree()
        .list_children(OWNER, Some(folder.id), &opts)
        .await
        .unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.nodes.len(), 1);
    assert_eq!(page.nodes[0].name, "c.txt");
}

#[tokio::test]
async fn test_search_and_tree() {
    let (vault, _) = setup_test_env().await;
    let tree = vault.tree();

    let photos = tree.create_folder(OWNER, None, "Photos").await.unwrap();
    let trips = tree.create_folder(OWNER, Some(photos.id), "trips").await.unwrap();
    tree.create_folder(OWNER, None, "Archive").await.unwrap();
    vault
        .upload(OWNER, Some(trips.id), "trip-map.png", None, Bytes::from_static(b"png"))
        .await
        .unwrap();

    let hits = tree.search(OWNER, "trip", None).await.unwrap();
    assert_eq!(hits.len(), 2);
    let folders = tree.search(OWNER, "trip", Some(NodeKind::Folder)).await.unwrap();
    assert_eq!(folders.len(), 1);
    // case-sensitive
    assert!(tree.search(OWNER, "photos", None).await.unwrap().is_empty());
    assert!(matches!(
        tree.search(OWNER, "", None).await,
        Err(VaultError::InvalidInput(_))
    ));

    let forest = tree.build_tree(OWNER).await.unwrap();
    assert_eq!(forest.len(), 2);
    assert_eq!(forest[0].name, "Archive");
    assert_eq!(forest[1].name, "Photos");
    assert_eq!(forest[1].children.len(), 1);
    assert_eq!(forest[1].children[0].name, "trips");
    assert!(forest[1].children[0].children.is_empty());

    let path = tree.path(OWNER, trips.id).await.unwrap();
    let names: Vec<_> = path.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, ["Photos", "trips"]);
}

#[tokio::test]
async fn test_depth_limit() {
    let config = VaultConfig {
        limits: TreeLimits {
            max_depth: 3,
            max_nodes: 100,
        },
        ..test_config()
    };
    let (vault, _) = setup_with_config(config).await;
    let tree = vault.tree();

    let a = tree.create_folder(OWNER, None, "a").await.unwrap();
    let b = tree.create_folder(OWNER, Some(a.id), "b").await.unwrap();
    let c = tree.create_folder(OWNER, Some(b.id), "c").await.unwrap();
    assert!(matches!(
        tree.create_folder(OWNER, Some(c.id), "d").await,
        Err(VaultError::InvalidInput(_))
    ));

    // a two-level subtree can't go under b
    let x = tree.create_folder(OWNER, None, "x").await.unwrap();
    tree.create_folder(OWNER, Some(x.id), "y").await.unwrap();
    assert!(matches!(
        tree.move_node(OWNER, x.id, Some(b.id)).await,
        Err(VaultError::InvalidInput(_))
    ));
    tree.move_node(OWNER, x.id, Some(a.id)).await.unwrap();
}

#[tokio::test]
async fn test_is_within() {
    let (vault, _) = setup_test_env().await;
    let tree = vault.tree();

    let root = tree.create_folder(OWNER, None, "root").await.unwrap();
    let inner = tree.create_folder(OWNER, Some(root.id), "inner").await.unwrap();
    let outside = tree.create_folder(OWNER, None, "outside").await.unwrap();

    assert!(tree.is_within(root.id, root.id).await.unwrap());
    assert!(tree.is_within(root.id, inner.id).await.unwrap());
    assert!(!tree.is_within(root.id, outside.id).await.unwrap());
    assert!(!tree.is_within(inner.id, root.id).await.unwrap());

    vault.trash().trash(OWNER, inner.id).await.unwrap();
    assert!(!tree.is_within(root.id, inner.id).await.unwrap());
}
