mod common;

use common::MemoryStore;
use repomirror::mirror::clear_bucket;
use repomirror::MirrorError;
use std::sync::atomic::Ordering;

#[tokio::test]
async fn test_empty_bucket() {
    let store = MemoryStore::new("site");

    let deleted = clear_bucket(&store).await.unwrap();

    assert_eq!(deleted, 0);
    assert_eq!(store.list_calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.delete_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_deletes_across_pages() {
    let store = MemoryStore::with_page_size("site", 10);
    store.seed((0..25).map(|i| format!("assets/file-{:03}.js", i)));

    let deleted = clear_bucket(&store).await.unwrap();

    assert_eq!(deleted, 25);
    assert_eq!(store.len(), 0);
    // Pages of 10, 10 and 5, one bulk delete each
    assert_eq!(store.list_calls.load(Ordering::SeqCst), 3);
    assert_eq!(store.delete_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_idempotent() {
    let store = MemoryStore::with_page_size("site", 2);
    store.seed(["a".to_string(), "b".to_string(), "c".to_string()]);

    assert_eq!(clear_bucket(&store).await.unwrap(), 3);
    assert_eq!(clear_bucket(&store).await.unwrap(), 0);
}

#[tokio::test]
async fn test_list_failure_aborts() {
    let store = MemoryStore::new("site");
    store.seed(["index.html".to_string()]);
    store.fail_list();

    let err = clear_bucket(&store).await.unwrap_err();

    assert!(matches!(err, MirrorError::BucketClearFailure { ref bucket, .. } if bucket == "site"));
    assert_eq!(store.delete_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_delete_failure_aborts() {
    let store = MemoryStore::with_page_size("site", 1);
    store.seed(["a".to_string(), "b".to_string()]);
    store.fail_delete();

    let err = clear_bucket(&store).await.unwrap_err();

    assert!(matches!(err, MirrorError::BucketClearFailure { .. }));
    assert_eq!(store.list_calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn test_per_key_delete_error_aborts() {
    let store = MemoryStore::with_page_size("site", 2);
    store.seed(["a".to_string(), "b".to_string(), "c".to_string()]);
    store.reject_delete_of("b");

    let err = clear_bucket(&store).await.unwrap_err();

    match err {
        MirrorError::BucketClearFailure { message, .. } => {
            assert!(message.contains("b"));
            assert!(message.contains("AccessDenied"));
        }
        other => panic!("unexpected error: {}", other),
    }
    // Second page never listed
    assert_eq!(store.list_calls.load(Ordering::SeqCst), 1);
}
