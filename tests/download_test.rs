use std::sync::Arc;
use stowage::config::TransferConfig;
use stowage::transport::MemoryTransport;
use stowage::{BucketName, ByteRange, ObjectKey, Operation, StoreError, TransferEngine};

fn engine(transport: &MemoryTransport) -> TransferEngine {
    let config = TransferConfig {
        initial_backoff_ms: 1,
        max_backoff_ms: 5,
        ..Default::default()
    };
    TransferEngine::new(Arc::new(transport.clone()), config)
}

fn names(bucket: &str, key: &str) -> (BucketName, ObjectKey) {
    (BucketName::parse(bucket).unwrap(), ObjectKey::new(key).unwrap())
}

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn test_ranged_read() {
    let transport = MemoryTransport::new();
    transport.insert_object("data", "twenty.bin", patterned(20));
    let engine = engine(&transport);
    let (bucket, key) = names("data", "twenty.bin");

    let body = engine
        .get(&bucket, &key, Some(ByteRange::new(10, 5).unwrap()))
        .await
        .unwrap();
    assert_eq!(body.content_length(), Some(5));
    let bytes = body.collect().await.unwrap();
    assert_eq!(&bytes[..], &patterned(20)[10..15]);
}

#[tokio::test]
async fn test_range_past_end_is_truncated() {
    let transport = MemoryTransport::new();
    transport.insert_object("data", "twenty.bin", patterned(20));
    let engine = engine(&transport);
    let (bucket, key) = names("data", "twenty.bin");

    let bytes = engine
        .get(&bucket, &key, Some(ByteRange::new(15, 100).unwrap()))
        .await
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert_eq!(bytes.len(), 5);
}

#[tokio::test]
async fn test_range_starting_past_end_fails() {
    let transport = MemoryTransport::new();
    transport.insert_object("data", "twenty.bin", patterned(20));
    let engine = engine(&transport);
    let (bucket, key) = names("data", "twenty.bin");

    let err = engine
        .get(&bucket, &key, Some(ByteRange::from_offset(25)))
        .await
        .unwrap_err();
    match err {
        StoreError::Range { offset, .. } => assert_eq!(offset, 25),
        other => panic!("expected Range, got {:?}", other),
    }
    // Range errors are not retried
    assert_eq!(transport.call_count(Operation::GetObject), 1);
}

#[tokio::test]
async fn test_get_missing_object() {
    let transport = MemoryTransport::new().with_bucket("data");
    let engine = engine(&transport);
    let (bucket, key) = names("data", "nothing.bin");

    let err = engine.get(&bucket, &key, None).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));
}

#[tokio::test]
async fn test_download_to_nested_path() {
    let transport = MemoryTransport::new();
    let data = patterned(300_000);
    transport.insert_object("data", "archive.tar", data.clone());
    let engine = engine(&transport);
    let (bucket, key) = names("data", "archive.tar");

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested/out/archive.tar");
    let size = engine
        .download_to_path(&bucket, &key, &path, false)
        .await
        .unwrap();

    assert_eq!(size, data.len() as u64);
    assert_eq!(std::fs::read(&path).unwrap(), data);
}

#[tokio::test]
async fn test_resume_continues_from_local_length() {
    let transport = MemoryTransport::new();
    let data = patterned(1000);
    transport.insert_object("data", "resume.bin", data.clone());
    let engine = engine(&transport);
    let (bucket, key) = names("data", "resume.bin");

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("resume.bin");
    std::fs::write(&path, &data[..400]).unwrap();

    let size = engine
        .download_to_path(&bucket, &key, &path, true)
        .await
        .unwrap();

    assert_eq!(size, 1000);
    assert_eq!(std::fs::read(&path).unwrap(), data);
    assert_eq!(transport.call_count(Operation::GetObject), 1);
}

#[tokio::test]
async fn test_resume_restarts_when_local_file_is_larger() {
    let transport = MemoryTransport::new();
    let data = patterned(100);
    transport.insert_object("data", "small.bin", data.clone());
    let engine = engine(&transport);
    let (bucket, key) = names("data", "small.bin");

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("small.bin");
    std::fs::write(&path, vec![7u8; 500]).unwrap();

    engine
        .download_to_path(&bucket, &key, &path, true)
        .await
        .unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), data);
}

#[tokio::test]
async fn test_resume_of_complete_file_reads_nothing() {
    let transport = MemoryTransport::new();
    let data = patterned(64);
    transport.insert_object("data", "done.bin", data.clone());
    let engine = engine(&transport);
    let (bucket, key) = names("data", "done.bin");

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("done.bin");
    std::fs::write(&path, &data).unwrap();

    engine
        .download_to_path(&bucket, &key, &path, true)
        .await
        .unwrap();
    assert_eq!(transport.call_count(Operation::GetObject), 0);
    assert_eq!(std::fs::read(&path).unwrap(), data);
}

#[tokio::test]
async fn test_broken_body_is_resumed_from_offset() {
    let transport = MemoryTransport::new();
    let data = patterned(200_000);
    transport.insert_object("data", "flaky.bin", data.clone());
    transport.break_body("flaky.bin", 70_000, 1);
    let engine = engine(&transport);
    let (bucket, key) = names("data", "flaky.bin");

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flaky.bin");
    engine
        .download_to_path(&bucket, &key, &path, false)
        .await
        .unwrap();

    assert_eq!(transport.call_count(Operation::GetObject), 2);
    assert_eq!(std::fs::read(&path).unwrap(), data);
}

#[tokio::test]
async fn test_broken_body_gives_up_after_attempt_budget() {
    let transport = MemoryTransport::new();
    transport.insert_object("data", "dead.bin", patterned(200_000));
    transport.break_body("dead.bin", 10, 100);
    let engine = engine(&transport);
    let (bucket, key) = names("data", "dead.bin");

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dead.bin");
    let err = engine
        .download_to_path(&bucket, &key, &path, false)
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::Io(_)));
    assert_eq!(transport.call_count(Operation::GetObject), 3);
    // Progress made before giving up stays on disk for a later resume
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 30);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_body_read_times_out() {
    let transport = MemoryTransport::new();
    transport.insert_object("data", "slow.bin", patterned(100));
    transport.stall_body("slow.bin", 10, 1);
    let engine = engine(&transport);
    let (bucket, key) = names("data", "slow.bin");

    let body = engine.get(&bucket, &key, None).await.unwrap();
    let err = body.collect().await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::TimedOut);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_download_gives_up_with_timeout() {
    let transport = MemoryTransport::new();
    transport.insert_object("data", "slow.bin", patterned(100));
    transport.stall_body("slow.bin", 10, 100);
    let engine = engine(&transport);
    let (bucket, key) = names("data", "slow.bin");

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("slow.bin");
    let err = tokio::time::timeout(
        std::time::Duration::from_secs(3600),
        engine.download_to_path(&bucket, &key, &path, false),
    )
    .await
    .expect("download must not hang on a silent body")
    .unwrap_err();

    assert!(matches!(
        err,
        StoreError::Timeout {
            operation: Operation::GetObject,
            ..
        }
    ));
    // Each stalled body counted against the attempt budget
    assert_eq!(transport.call_count(Operation::GetObject), 3);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 30);
}

#[tokio::test]
async fn test_download_missing_object_creates_no_file() {
    let transport = MemoryTransport::new().with_bucket("data");
    let engine = engine(&transport);
    let (bucket, key) = names("data", "ghost.bin");

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ghost.bin");
    let err = engine
        .download_to_path(&bucket, &key, &path, false)
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::NotFound { .. }));
    assert!(!path.exists());
}
