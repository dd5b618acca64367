mod common;

use blob_storage::BlobStorageError;
use blob_storage::entity::blob;
use common::{TENANT, harness};
use sea_orm::EntityTrait;

#[tokio::test]
async fn rename_blob_moves_the_name() {
    let h = harness().await;
    let space = h.documents();
    let root = space.get_root(TENANT).await.unwrap();
    let original = space.find_or_create_child_blob(&root, "draft.txt").await.unwrap();
    space.find_or_create_child_directory(&root, "taken").await.unwrap();

    assert!(matches!(
        space.rename_blob(&original, "Taken").await,
        Err(BlobStorageError::NameInUse(_))
    ));

    let renamed = space.rename_blob(&original, "final.md").await.unwrap();
    assert_eq!(renamed.filename.as_deref(), Some("final.md"));
    assert_eq!(renamed.file_extension.as_deref(), Some("md"));
    assert!(renamed.renamed);
    assert!(space.find_child_blob(&root, "draft.txt").await.unwrap().is_none());

    let reused = space.find_or_create_child_blob(&root, "draft.txt").await.unwrap();
    assert_ne!(reused.id, original.id);
    assert!(matches!(
        space.rename_blob(&reused, "FINAL.md").await,
        Err(BlobStorageError::NameInUse(_))
    ));
}

#[tokio::test]
async fn rename_directory_keeps_children() {
    let h = harness().await;
    let space = h.documents();
    let file = space.find_or_create_by_path(TENANT, "/old/file.txt").await.unwrap();
    let root = space.get_root(TENANT).await.unwrap();
    let old = space.find_child_directory(&root, "old").await.unwrap().unwrap();

    let new = space.rename_directory(&old, "new").await.unwrap();

    assert_eq!(new.directory_name.as_deref(), Some("new"));
    assert_eq!(
        space.find_by_path(TENANT, "/new/file.txt").await.unwrap().map(|b| b.id),
        Some(file.id)
    );
    assert!(matches!(
        space.rename_directory(&root, "other").await,
        Err(BlobStorageError::RootDirectory)
    ));
    assert!(matches!(
        space.delete_directory(&root).await,
        Err(BlobStorageError::RootDirectory)
    ));
}

#[tokio::test]
async fn directories_cannot_move_below_themselves() {
    let h = harness().await;
    let space = h.documents();
    space.find_or_create_by_path(TENANT, "/a/b/c/file.txt").await.unwrap();
    let root = space.get_root(TENANT).await.unwrap();
    let a = space.find_child_directory(&root, "a").await.unwrap().unwrap();
    let b = space.find_child_directory(&a, "b").await.unwrap().unwrap();
    let c = space.find_child_directory(&b, "c").await.unwrap().unwrap();

    assert!(matches!(space.move_directory(&a, &c).await, Err(BlobStorageError::CircularMove)));
    assert!(matches!(space.move_directory(&a, &a).await, Err(BlobStorageError::CircularMove)));
    assert!(matches!(space.move_directory(&root, &a).await, Err(BlobStorageError::RootDirectory)));

    let moved = space.move_directory(&c, &root).await.unwrap();
    assert_eq!(moved.parent_id, Some(root.id));
    assert_eq!(space.determine_directory_path(&moved).await.unwrap(), "/c");
    assert!(space.find_by_path(TENANT, "/c/file.txt").await.unwrap().is_some());
    assert!(space.find_by_path(TENANT, "/a/b/c/file.txt").await.unwrap().is_none());
}

#[tokio::test]
async fn moves_across_tenants_are_rejected() {
    let h = harness().await;
    let space = h.documents();
    let file = space.find_or_create_by_path("tenant-a", "/dir/file.txt").await.unwrap();
    let foreign_root = space.get_root("tenant-b").await.unwrap();
    let own_root = space.get_root("tenant-a").await.unwrap();
    let dir = space.find_child_directory(&own_root, "dir").await.unwrap().unwrap();

    assert!(matches!(
        space.move_blob(&file, Some(&foreign_root)).await,
        Err(BlobStorageError::CrossTenantMove)
    ));
    assert!(matches!(
        space.move_directory(&dir, &foreign_root).await,
        Err(BlobStorageError::CrossTenantMove)
    ));
}

#[tokio::test]
async fn move_blob_checks_the_target_directory() {
    let h = harness().await;
    let space = h.documents();
    let inbox_file = space.find_or_create_by_path(TENANT, "/inbox/scan.pdf").await.unwrap();
    let archive_file = space.find_or_create_by_path(TENANT, "/archive/scan.pdf").await.unwrap();
    let root = space.get_root(TENANT).await.unwrap();
    let archive = space.find_child_directory(&root, "archive").await.unwrap().unwrap();

    assert!(matches!(
        space.move_blob(&inbox_file, Some(&archive)).await,
        Err(BlobStorageError::NameInUse(_))
    ));

    space.delete_blob(&archive_file).await.unwrap();
    let moved = space.move_blob(&inbox_file, Some(&archive)).await.unwrap();
    assert_eq!(moved.parent_id, Some(archive.id));
    assert!(moved.parent_changed);
    assert_eq!(
        space.find_by_path(TENANT, "/archive/scan.pdf").await.unwrap().map(|b| b.id),
        Some(inbox_file.id)
    );
}

#[tokio::test]
async fn soft_deleted_blobs_are_hidden_but_kept() {
    let h = harness().await;
    let space = h.documents();
    let file = space.find_or_create_by_path(TENANT, "/gone.txt").await.unwrap();

    space.delete_blob(&file).await.unwrap();
    space.delete_blob(&file).await.unwrap();

    assert!(space.find_by_blob_key(&file.blob_key).await.unwrap().is_none());
    assert!(space.find_by_path(TENANT, "/gone.txt").await.unwrap().is_none());
    let row = blob::Entity::find_by_id(file.id).one(&h.db).await.unwrap().unwrap();
    assert!(row.deleted);
    assert!(row.name_slot.is_none());

    let replacement = space.find_or_create_by_path(TENANT, "/gone.txt").await.unwrap();
    assert_ne!(replacement.id, file.id);
    assert!(matches!(
        space.rename_blob(&file, "back.txt").await,
        Err(BlobStorageError::UnknownBlob(_))
    ));
}
