mod common;

use blob_storage::BlobStorageError;
use common::{TENANT, harness};
use object_storage::DeliveryStatus;

const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

#[tokio::test]
async fn update_content_swaps_the_physical_object() {
    let h = harness().await;
    let space = h.documents();
    let file = space.find_or_create_by_path(TENANT, "/hello.txt").await.unwrap();
    assert!(space.download(&file).await.unwrap().is_none());

    let first = space.update_content(&file, None, b"hello").await.unwrap();
    let first_key = first.physical_object_key.clone().unwrap();
    assert_eq!(first.size, 5);
    assert_eq!(first.checksum.as_deref(), Some(HELLO_SHA256));
    assert!(first.content_updated);
    assert_eq!(space.download(&first).await.unwrap().as_deref(), Some(&b"hello"[..]));

    let second = space.update_content(&first, None, b"hello again").await.unwrap();
    let second_key = second.physical_object_key.clone().unwrap();
    assert_ne!(first_key, second_key);
    assert_eq!(second.blob_key, file.blob_key);
    assert!(!space.physical_space().exists(&first_key).await.unwrap());
    assert!(space.physical_space().exists(&second_key).await.unwrap());
}

#[tokio::test]
async fn update_content_from_a_stale_model_still_wins() {
    let h = harness().await;
    let space = h.documents();
    let file = space.find_or_create_by_path(TENANT, "/stale.txt").await.unwrap();

    space.update_content(&file, None, b"one").await.unwrap();
    let latest = space.update_content(&file, None, b"two").await.unwrap();

    assert_eq!(space.download(&latest).await.unwrap().as_deref(), Some(&b"two"[..]));
}

#[tokio::test]
async fn update_content_can_rename() {
    let h = harness().await;
    let space = h.documents();
    let file = space.find_or_create_by_path(TENANT, "/upload.bin").await.unwrap();
    space.find_or_create_by_path(TENANT, "/taken.png").await.unwrap();

    let renamed = space
        .update_content(&file, Some("photo.JPG"), b"jpeg")
        .await
        .unwrap();
    assert_eq!(renamed.filename.as_deref(), Some("photo.JPG"));
    assert_eq!(renamed.file_extension.as_deref(), Some("jpg"));
    assert!(renamed.renamed);
    assert_eq!(
        space.resolve_filename(&file.blob_key).await.unwrap().as_deref(),
        Some("photo.JPG")
    );

    assert!(matches!(
        space.update_content(&renamed, Some("TAKEN.png"), b"png").await,
        Err(BlobStorageError::NameInUse(_))
    ));
    assert_eq!(space.download(&renamed).await.unwrap().as_deref(), Some(&b"jpeg"[..]));
}

#[tokio::test]
async fn deliver_writes_the_content() {
    let h = harness().await;
    let space = h.documents();
    let file = space.find_or_create_by_path(TENANT, "/page.html").await.unwrap();
    space.update_content(&file, None, b"<html/>").await.unwrap();

    let mut sink = Vec::new();
    let status = space.deliver(&file.blob_key, None, &mut sink).await.unwrap();
    assert!(status.is_delivered());
    assert_eq!(sink, b"<html/>");

    let mut sink = Vec::new();
    assert_eq!(
        space.deliver("missing", None, &mut sink).await.unwrap(),
        DeliveryStatus::Failed(404)
    );

    let empty = space.find_or_create_by_path(TENANT, "/empty.txt").await.unwrap();
    assert_eq!(
        space.deliver(&empty.blob_key, None, &mut sink).await.unwrap(),
        DeliveryStatus::Failed(404)
    );
}

#[tokio::test]
async fn reads_are_touched_only_when_tracked() {
    let h = harness().await;

    let documents = h.documents();
    let untracked = documents.create_temporary_blob(None).await.unwrap();
    let untracked = documents.update_content(&untracked, None, b"x").await.unwrap();
    documents.download(&untracked).await.unwrap();
    let reloaded = documents.find_by_blob_key(&untracked.blob_key).await.unwrap().unwrap();
    assert!(reloaded.last_touched.is_none());

    let exact = h.space("exact");
    let tracked = exact.create_temporary_blob(None).await.unwrap();
    let tracked = exact.update_content(&tracked, None, b"x").await.unwrap();
    exact.download(&tracked).await.unwrap();
    let reloaded = exact.find_by_blob_key(&tracked.blob_key).await.unwrap().unwrap();
    assert!(reloaded.last_touched.is_some());
}

#[tokio::test]
async fn temporary_blobs_attach_once() {
    let h = harness().await;
    let space = h.documents();
    let upload = space.create_temporary_blob(Some(TENANT)).await.unwrap();
    assert!(upload.temporary);
    assert!(upload.committed);

    space.attach_temporary_blob(&upload.blob_key, "order-1").await.unwrap();
    assert!(matches!(
        space.attach_temporary_blob(&upload.blob_key, "order-2").await,
        Err(BlobStorageError::NotAttachable(_))
    ));

    let attached = space.find_attached_blobs("order-1").await.unwrap();
    assert_eq!(attached.len(), 1);
    assert!(!attached[0].temporary);
    assert!(space.find_attached_blobs("order-2").await.unwrap().is_empty());
}

#[tokio::test]
async fn attach_by_type_replaces_the_previous_blob() {
    let h = harness().await;
    let space = h.documents();
    let first = space.create_temporary_blob(None).await.unwrap();
    let second = space.create_temporary_blob(None).await.unwrap();

    space.attach_blob_by_type(&first.blob_key, "user-7", "avatar").await.unwrap();
    space.attach_blob_by_type(&first.blob_key, "user-7", "avatar").await.unwrap();
    space.attach_blob_by_type(&second.blob_key, "user-7", "avatar").await.unwrap();

    let current = space
        .find_attached_blob_by_designator("user-7", "avatar")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(current.blob_key, second.blob_key);
    assert!(space.find_by_blob_key(&first.blob_key).await.unwrap().is_none());
    assert!(matches!(
        space.attach_blob_by_type(&first.blob_key, "user-7", "avatar").await,
        Err(BlobStorageError::NotAttachable(_))
    ));
}

#[tokio::test]
async fn attached_blobs_are_deleted_by_reference() {
    let h = harness().await;
    let space = h.documents();
    let keep = space.find_or_create_attached_blob_by_name("ticket-9", "keep.txt").await.unwrap();
    space.find_or_create_attached_blob_by_name("ticket-9", "drop.txt").await.unwrap();
    let logo = space.create_temporary_blob(None).await.unwrap();
    space.attach_blob_by_type(&logo.blob_key, "ticket-9", "logo").await.unwrap();

    let removed = space
        .delete_referenced_blobs("ticket-9", None, Some(&keep.blob_key))
        .await
        .unwrap();
    assert_eq!(removed, 2);
    let remaining = space.find_attached_blobs("ticket-9").await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].blob_key, keep.blob_key);

    assert_eq!(space.delete_attached_blobs("ticket-9").await.unwrap(), 1);
    assert!(space.find_attached_blobs("ticket-9").await.unwrap().is_empty());
}

#[tokio::test]
async fn mark_as_used_clears_the_temporary_flag() {
    let h = harness().await;
    let space = h.documents();
    let upload = space.create_temporary_blob(None).await.unwrap();

    space.mark_as_used(&upload.blob_key).await.unwrap();

    let reloaded = space.find_by_blob_key(&upload.blob_key).await.unwrap().unwrap();
    assert!(!reloaded.temporary);
}
