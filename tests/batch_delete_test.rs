use std::sync::Arc;
use std::time::Duration;
use stowage::recovery::{RetryPolicy, Retrier};
use stowage::transport::{MemoryTransport, TransportError};
use stowage::{BatchDeleter, BucketName, DeleteOutcome, ObjectKey, Operation, StoreError};

fn deleter(transport: &MemoryTransport, batch_size: usize, concurrency: usize) -> BatchDeleter {
    let policy = RetryPolicy {
        max_attempts: 2,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        ..Default::default()
    };
    BatchDeleter::new(
        Arc::new(transport.clone()),
        Retrier::new(policy, Duration::from_secs(30)),
        batch_size,
        concurrency,
    )
}

fn keys(names: &[&str]) -> Vec<ObjectKey> {
    names.iter().map(|n| ObjectKey::new(*n).unwrap()).collect()
}

fn bucket() -> BucketName {
    BucketName::parse("logs").unwrap()
}

#[tokio::test]
async fn test_empty_key_list_makes_no_calls() {
    let transport = MemoryTransport::new().with_bucket("logs");
    let outcomes = deleter(&transport, 1000, 4)
        .delete_many(&bucket(), &[])
        .await
        .unwrap();

    assert!(outcomes.is_empty());
    assert_eq!(transport.total_calls(), 0);
}

#[tokio::test]
async fn test_missing_key_reported_per_key() {
    let transport = MemoryTransport::new();
    transport.insert_object("logs", "x", &b"1"[..]);

    let outcomes = deleter(&transport, 1000, 4)
        .delete_many(&bucket(), &keys(&["x", "y"]))
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 2);
    assert_eq!(
        outcomes[0],
        DeleteOutcome::Deleted {
            key: "x".to_string()
        }
    );
    match &outcomes[1] {
        DeleteOutcome::Failed { key, code, .. } => {
            assert_eq!(key, "y");
            assert_eq!(code, "NoSuchKey");
        }
        other => panic!("expected failure for y, got {:?}", other),
    }
    assert!(transport.object_data("logs", "x").is_none());
    assert_eq!(transport.call_count(Operation::HeadObject), 2);
    assert_eq!(transport.call_count(Operation::DeleteObjects), 1);
}

#[tokio::test]
async fn test_store_reporting_absent_key_as_deleted() {
    // DeleteObjects answers for "ghost" with a success entry, like S3 does
    let transport = MemoryTransport::new().with_bucket("logs");
    let reply = stowage::transport::Transport::delete_objects(
        &transport,
        "logs",
        &["ghost".to_string()],
    )
    .await
    .unwrap();
    assert!(reply[0].is_deleted());

    let outcomes = deleter(&transport, 1000, 4)
        .delete_many(&bucket(), &keys(&["ghost"]))
        .await
        .unwrap();
    match &outcomes[0] {
        DeleteOutcome::Failed { key, code, .. } => {
            assert_eq!(key, "ghost");
            assert_eq!(code, "NoSuchKey");
        }
        other => panic!("expected NoSuchKey for ghost, got {:?}", other),
    }
    // Nothing left to delete, so no second DeleteObjects request
    assert_eq!(transport.call_count(Operation::DeleteObjects), 1);
}

#[tokio::test]
async fn test_failed_existence_check_still_deletes() {
    let transport = MemoryTransport::new();
    transport.insert_object("logs", "x", &b"1"[..]);
    transport.fail_key(
        Operation::HeadObject,
        "x",
        TransportError::status(403, Some("AccessDenied"), "denied"),
        1,
    );

    let outcomes = deleter(&transport, 1000, 4)
        .delete_many(&bucket(), &keys(&["x"]))
        .await
        .unwrap();

    assert!(outcomes[0].is_deleted());
    assert!(transport.object_data("logs", "x").is_none());
}

#[tokio::test]
async fn test_large_delete_is_split_and_ordered() {
    let transport = MemoryTransport::new();
    let names: Vec<String> = (0..2500).map(|i| format!("day/{:05}.log", i)).collect();
    for name in &names {
        transport.insert_object("logs", name, &b"entry"[..]);
    }
    let keys: Vec<ObjectKey> = names.iter().map(|n| ObjectKey::new(n.as_str()).unwrap()).collect();

    let outcomes = deleter(&transport, 1000, 4)
        .delete_many(&bucket(), &keys)
        .await
        .unwrap();

    assert_eq!(transport.call_count(Operation::DeleteObjects), 3);
    assert_eq!(outcomes.len(), 2500);
    assert!(outcomes.iter().all(|o| o.is_deleted()));
    assert_eq!(
        outcomes.iter().map(|o| o.key().to_string()).collect::<Vec<_>>(),
        names
    );
}

#[tokio::test]
async fn test_duplicate_keys_each_get_an_outcome() {
    let transport = MemoryTransport::new();
    transport.insert_object("logs", "dup", &b"1"[..]);

    let outcomes = deleter(&transport, 1000, 4)
        .delete_many(&bucket(), &keys(&["dup", "dup"]))
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.key() == "dup" && o.is_deleted()));
}

#[tokio::test]
async fn test_rejected_sub_batch_marks_its_keys_failed() {
    let transport = MemoryTransport::new();
    for name in ["a", "b", "c", "d"] {
        transport.insert_object("logs", name, &b"1"[..]);
    }
    transport.fail_operation(
        Operation::DeleteObjects,
        TransportError::status(403, Some("AccessDenied"), "denied"),
        1,
    );

    let outcomes = deleter(&transport, 2, 1)
        .delete_many(&bucket(), &keys(&["a", "b", "c", "d"]))
        .await
        .unwrap();

    let summary: Vec<(&str, bool)> = outcomes.iter().map(|o| (o.key(), o.is_deleted())).collect();
    assert_eq!(
        summary,
        vec![("a", false), ("b", false), ("c", true), ("d", true)]
    );
    match &outcomes[0] {
        DeleteOutcome::Failed { code, .. } => assert_eq!(code, "AccessDenied"),
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(transport.object_data("logs", "a").is_some());
    assert!(transport.object_data("logs", "c").is_none());
}

#[tokio::test]
async fn test_unreachable_store_is_an_error() {
    let transport = MemoryTransport::new();
    for name in ["a", "b", "c"] {
        transport.insert_object("logs", name, &b"1"[..]);
    }
    transport.fail_operation(
        Operation::DeleteObjects,
        TransportError::connection("connection refused"),
        100,
    );

    let err = deleter(&transport, 1, 2)
        .delete_many(&bucket(), &keys(&["a", "b", "c"]))
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::Transient { .. }));
    // Each sub-batch used its full attempt budget
    assert_eq!(transport.call_count(Operation::DeleteObjects), 6);
}

#[tokio::test]
async fn test_partly_unreachable_store_reports_outcomes() {
    let transport = MemoryTransport::new();
    transport.insert_object("logs", "a", &b"1"[..]);
    transport.insert_object("logs", "b", &b"1"[..]);
    transport.fail_operation(
        Operation::DeleteObjects,
        TransportError::connection("connection refused"),
        2,
    );

    // First sub-batch exhausts both attempts, second goes through
    let outcomes = deleter(&transport, 1, 1)
        .delete_many(&bucket(), &keys(&["a", "b"]))
        .await
        .unwrap();

    assert!(!outcomes[0].is_deleted());
    assert!(outcomes[1].is_deleted());
}

#[tokio::test]
async fn test_single_delete() {
    let transport = MemoryTransport::new();
    transport.insert_object("logs", "one", &b"1"[..]);

    deleter(&transport, 1000, 4)
        .delete(&bucket(), &ObjectKey::new("one").unwrap())
        .await
        .unwrap();
    assert!(transport.object_data("logs", "one").is_none());
}

#[tokio::test]
async fn test_zero_batch_size_and_concurrency_are_clamped() {
    let transport = MemoryTransport::new();
    transport.insert_object("logs", "a", &b"1"[..]);
    transport.insert_object("logs", "b", &b"1"[..]);

    let outcomes = deleter(&transport, 0, 0)
        .delete_many(&bucket(), &keys(&["a", "b"]))
        .await
        .unwrap();

    assert!(outcomes.iter().all(|o| o.is_deleted()));
    assert_eq!(transport.call_count(Operation::DeleteObjects), 2);
}
