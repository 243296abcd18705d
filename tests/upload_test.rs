use bytes::Bytes;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use stowage::config::TransferConfig;
use stowage::transport::{MemoryTransport, Transport, TransportError};
use stowage::{
    BucketName, ObjectKey, Operation, PutOptions, StoreError, TransferEngine, UploadSource,
};
use tokio_util::sync::CancellationToken;

const MIB: usize = 1024 * 1024;

fn fast_config() -> TransferConfig {
    TransferConfig {
        initial_backoff_ms: 1,
        max_backoff_ms: 5,
        ..Default::default()
    }
}

fn engine(transport: &MemoryTransport) -> TransferEngine {
    TransferEngine::new(Arc::new(transport.clone()), fast_config())
}

fn names(bucket: &str, key: &str) -> (BucketName, ObjectKey) {
    (BucketName::parse(bucket).unwrap(), ObjectKey::new(key).unwrap())
}

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn test_unknown_size_stream_in_ten_parts() {
    let transport = MemoryTransport::new().with_bucket("data");
    let engine = engine(&transport);
    let (bucket, key) = names("data", "big.bin");

    let data = patterned(50 * MIB);
    let result = engine
        .put_reader(
            &bucket,
            &key,
            Cursor::new(data.clone()),
            None,
            PutOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(result.parts, 10);
    assert_eq!(result.size, (50 * MIB) as u64);
    assert_eq!(
        transport.completed_part_lists(),
        vec![("big.bin".to_string(), (1..=10).collect::<Vec<u32>>())]
    );
    assert_eq!(transport.call_count(Operation::UploadPart), 10);
    assert_eq!(transport.call_count(Operation::PutObject), 0);

    let stored = transport.object_data("data", "big.bin").unwrap();
    assert_eq!(stored.len(), 50 * MIB);
    assert_eq!(&stored[..], &data[..]);
}

#[tokio::test]
async fn test_known_size_uploads_parts_in_parallel() {
    let transport = MemoryTransport::new().with_bucket("data");
    let engine = engine(&transport);
    let (bucket, key) = names("data", "known.bin");

    let data = Bytes::from(patterned(12 * MIB + 17));
    let result = engine
        .put_bytes(&bucket, &key, data.clone(), PutOptions::default())
        .await
        .unwrap();

    assert_eq!(result.parts, 3);
    assert_eq!(result.size, data.len() as u64);
    assert!(result.etag.ends_with("-3\""));
    assert_eq!(transport.object_data("data", "known.bin").unwrap(), data);
}

#[tokio::test(start_paused = true)]
async fn test_parts_finishing_out_of_order_complete_in_part_order() {
    // Part 1 finishes last, part 4 first
    let transport = MemoryTransport::new()
        .with_bucket("data")
        .with_part_delays([
            (1, Duration::from_millis(400)),
            (2, Duration::from_millis(300)),
            (3, Duration::from_millis(200)),
            (4, Duration::from_millis(100)),
        ]);
    let config = TransferConfig {
        part_size: (5 * MIB) as u64,
        parallel_parts: 4,
        ..fast_config()
    };
    let engine = TransferEngine::new(Arc::new(transport.clone()), config);
    let (bucket, key) = names("data", "shuffled.bin");

    let data = Bytes::from(patterned(20 * MIB));
    let result = engine
        .put_bytes(&bucket, &key, data.clone(), PutOptions::default())
        .await
        .unwrap();

    assert_eq!(result.parts, 4);
    assert_eq!(transport.part_arrivals(), vec![4, 3, 2, 1]);
    assert_eq!(
        transport.completed_part_lists(),
        vec![("shuffled.bin".to_string(), vec![1, 2, 3, 4])]
    );
    assert_eq!(transport.object_data("data", "shuffled.bin").unwrap(), data);
}

#[tokio::test]
async fn test_zero_parallelism_uploads_every_part() {
    let transport = MemoryTransport::new().with_bucket("data");
    let config = TransferConfig {
        parallel_parts: 0,
        ..fast_config()
    };
    let engine = TransferEngine::new(Arc::new(transport.clone()), config);
    let (bucket, key) = names("data", "serial.bin");

    let data = Bytes::from(patterned(11 * MIB));
    let result = engine
        .put_bytes(&bucket, &key, data.clone(), PutOptions::default())
        .await
        .unwrap();

    assert_eq!(result.parts, 3);
    assert_eq!(transport.object_data("data", "serial.bin").unwrap(), data);
}

#[tokio::test]
async fn test_small_payload_is_single_put() {
    let transport = MemoryTransport::new().with_bucket("data");
    let engine = engine(&transport);
    let (bucket, key) = names("data", "notes.txt");

    let result = engine
        .put_bytes(&bucket, &key, &b"hello"[..], PutOptions::default())
        .await
        .unwrap();

    assert_eq!(result.parts, 0);
    assert_eq!(result.size, 5);
    assert_eq!(transport.call_count(Operation::PutObject), 1);
    assert_eq!(transport.call_count(Operation::CreateMultipartUpload), 0);
}

#[tokio::test]
async fn test_short_unknown_stream_is_single_put() {
    let transport = MemoryTransport::new().with_bucket("data");
    let engine = engine(&transport);
    let (bucket, key) = names("data", "short.bin");

    let result = engine
        .put(
            &bucket,
            &key,
            UploadSource::Reader(Box::new(Cursor::new(patterned(MIB)))),
            PutOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(result.parts, 0);
    assert_eq!(transport.call_count(Operation::PutObject), 1);
    assert_eq!(transport.call_count(Operation::CreateMultipartUpload), 0);
}

#[tokio::test]
async fn test_upload_from_path_sets_content_type_and_metadata() {
    let transport = MemoryTransport::new().with_bucket("data");
    let engine = engine(&transport);
    let (bucket, key) = names("data", "report.json");

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.json");
    std::fs::write(&path, br#"{"ok":true}"#).unwrap();

    let options = PutOptions {
        user_metadata: [("owner".to_string(), "ops".to_string())].into(),
        ..Default::default()
    };
    engine.put_path(&bucket, &key, &path, options).await.unwrap();

    let head = transport.head_object("data", "report.json", None).await.unwrap();
    assert_eq!(head.size, 11);
    assert_eq!(head.content_type.as_deref(), Some("application/json"));
    assert_eq!(head.user_metadata.get("owner").map(String::as_str), Some("ops"));
}

#[tokio::test]
async fn test_declared_size_mismatch_is_rejected() {
    let transport = MemoryTransport::new().with_bucket("data");
    let engine = engine(&transport);
    let (bucket, key) = names("data", "liar.bin");

    let err = engine
        .put_reader(
            &bucket,
            &key,
            Cursor::new(vec![0u8; 10]),
            Some(20),
            PutOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Io(_)));
    assert!(transport.object_data("data", "liar.bin").is_none());
}

#[tokio::test]
async fn test_transient_part_failure_is_retried() {
    let transport = MemoryTransport::new().with_bucket("data");
    transport.fail_part(
        2,
        TransportError::status(503, Some("SlowDown"), "reduce your request rate"),
        2,
    );
    let engine = engine(&transport);
    let (bucket, key) = names("data", "retry.bin");

    let result = engine
        .put_bytes(&bucket, &key, Bytes::from(patterned(15 * MIB)), PutOptions::default())
        .await
        .unwrap();

    assert_eq!(result.parts, 3);
    // 3 parts plus 2 failed attempts of part 2
    assert_eq!(transport.call_count(Operation::UploadPart), 5);
    assert_eq!(transport.call_count(Operation::AbortMultipartUpload), 0);
}

#[tokio::test]
async fn test_permanent_part_failure_aborts_once() {
    let transport = MemoryTransport::new().with_bucket("data");
    transport.fail_part(
        3,
        TransportError::status(403, Some("AccessDenied"), "denied"),
        1,
    );
    let engine = engine(&transport);
    let (bucket, key) = names("data", "denied.bin");

    let err = engine
        .put_bytes(&bucket, &key, Bytes::from(patterned(30 * MIB)), PutOptions::default())
        .await
        .unwrap_err();

    match err {
        StoreError::Transfer {
            source, cleanup, ..
        } => {
            assert!(matches!(*source, StoreError::Permanent { .. }));
            assert!(cleanup.is_none());
        }
        other => panic!("expected Transfer, got {:?}", other),
    }

    assert_eq!(transport.call_count(Operation::AbortMultipartUpload), 1);
    assert_eq!(transport.call_count(Operation::CompleteMultipartUpload), 0);
    assert!(transport.object_data("data", "denied.bin").is_none());
    assert!(transport
        .list_multipart_uploads("data", "")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_retry_budget_exhausted() {
    let transport = MemoryTransport::new().with_bucket("data");
    transport.fail_part(1, TransportError::connection("connection reset"), 10);
    let engine = engine(&transport);
    let (bucket, key) = names("data", "flaky.bin");

    let data = Bytes::from(patterned(10 * MIB));
    let err = engine
        .put_bytes(&bucket, &key, data, PutOptions::default())
        .await
        .unwrap_err();

    match err {
        StoreError::Transfer { source, .. } => assert!(source.is_retryable()),
        other => panic!("expected Transfer, got {:?}", other),
    }
    // Part 1 tried max_attempts (3) times, part 2 once
    assert_eq!(transport.call_count(Operation::UploadPart), 4);
    assert_eq!(transport.call_count(Operation::AbortMultipartUpload), 1);
}

#[tokio::test]
async fn test_failed_abort_is_reported_as_cleanup() {
    let transport = MemoryTransport::new().with_bucket("data");
    transport.fail_part(1, TransportError::status(400, Some("BadDigest"), "bad"), 1);
    transport.fail_operation(
        Operation::AbortMultipartUpload,
        TransportError::status(403, Some("AccessDenied"), "no abort"),
        1,
    );
    let engine = engine(&transport);
    let (bucket, key) = names("data", "orphan.bin");

    let err = engine
        .put_bytes(&bucket, &key, Bytes::from(patterned(10 * MIB)), PutOptions::default())
        .await
        .unwrap_err();

    match err {
        StoreError::Transfer { cleanup, .. } => assert!(cleanup.is_some()),
        other => panic!("expected Transfer, got {:?}", other),
    }
    assert_eq!(transport.call_count(Operation::AbortMultipartUpload), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_mid_upload_aborts_exactly_once() {
    let transport = MemoryTransport::new()
        .with_bucket("data")
        .with_part_delay(Duration::from_millis(100));
    let engine = engine(&transport);
    let (bucket, key) = names("data", "huge.bin");

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        trigger.cancel();
    });

    let options = PutOptions {
        cancel: Some(cancel),
        ..Default::default()
    };
    let err = engine
        .put_bytes(&bucket, &key, Bytes::from(vec![0u8; 100 * MIB]), options)
        .await
        .unwrap_err();

    match err {
        StoreError::Transfer { source, .. } => {
            assert!(matches!(*source, StoreError::Cancelled { .. }))
        }
        other => panic!("expected Transfer, got {:?}", other),
    }

    // 20 parts planned; only the first two waves were issued
    assert!(transport.call_count(Operation::UploadPart) < 20);
    assert_eq!(transport.call_count(Operation::AbortMultipartUpload), 1);
    assert_eq!(transport.call_count(Operation::CompleteMultipartUpload), 0);
    assert!(transport
        .list_multipart_uploads("data", "")
        .await
        .unwrap()
        .is_empty());
    assert!(transport.object_data("data", "huge.bin").is_none());
}

#[tokio::test]
async fn test_cancelled_before_start_makes_no_calls() {
    let transport = MemoryTransport::new().with_bucket("data");
    let engine = engine(&transport);
    let (bucket, key) = names("data", "never.bin");

    let cancel = CancellationToken::new();
    cancel.cancel();
    let options = PutOptions {
        cancel: Some(cancel),
        ..Default::default()
    };
    let err = engine
        .put_bytes(&bucket, &key, &b"payload"[..], options)
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::Cancelled { .. }));
    assert_eq!(transport.total_calls(), 0);
}

#[tokio::test]
async fn test_missing_bucket_fails_before_parts() {
    let transport = MemoryTransport::new();
    let engine = engine(&transport);
    let (bucket, key) = names("absent", "x.bin");

    let err = engine
        .put_bytes(&bucket, &key, Bytes::from(patterned(10 * MIB)), PutOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::BucketNotFound { .. }));
    assert_eq!(transport.call_count(Operation::UploadPart), 0);
}
