//! Integration tests for the S3-backed resolver.
//!
//! These run against LocalStack (or any S3-compatible endpoint) and need
//! credentials in the environment, e.g. `AWS_ACCESS_KEY_ID=test
//! AWS_SECRET_ACCESS_KEY=test`. The endpoint comes from `AWS_ENDPOINT_URL`
//! (default `http://localhost:4566`).
//!
//! Run with: cargo test --test integration_s3 -- --ignored --test-threads=1

use aws_sdk_s3::primitives::ByteStream;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

use s3resolver::{
    CacheState, FilesystemResolver, RemoteStore, ResolutionEngine, ResolverConfig, S3Store,
    StoreError,
};

/// Test bucket name
const TEST_BUCKET: &str = "s3resolver-test";

fn endpoint() -> String {
    std::env::var("AWS_ENDPOINT_URL").unwrap_or_else(|_| "http://localhost:4566".to_string())
}

/// Store pointing at LocalStack with the test bucket populated
fn create_test_store() -> Arc<S3Store> {
    let config = ResolverConfig::default().with_endpoint(endpoint());
    let store = S3Store::new(&config).expect("Failed to create S3 store");
    let client = store.client().clone();

    store.block_on(async {
        // Bucket may survive from an earlier run
        let _ = client.create_bucket().bucket(TEST_BUCKET).send().await;

        client
            .put_object()
            .bucket(TEST_BUCKET)
            .key("scene.usda")
            .body(ByteStream::from_static(b"#usda 1.0\n"))
            .send()
            .await
            .expect("Failed to upload scene.usda");

        client
            .put_object()
            .bucket(TEST_BUCKET)
            .key("props/chair.usda")
            .body(ByteStream::from_static(b"#usda 1.0\ndef Xform \"Chair\" {}\n"))
            .send()
            .await
            .expect("Failed to upload props/chair.usda");
    });

    Arc::new(store)
}

fn create_test_engine(store: Arc<S3Store>) -> (TempDir, ResolutionEngine) {
    let dir = TempDir::new().unwrap();
    let engine = ResolutionEngine::new(
        dir.path(),
        Some(store as Arc<dyn RemoteStore>),
        Arc::new(FilesystemResolver::new()),
    );
    (dir, engine)
}

#[test]
#[ignore] // Run with: cargo test -- --ignored --test-threads=1
fn test_head_and_get() {
    let store = create_test_store();

    let meta = store
        .head_metadata(TEST_BUCKET, "scene.usda", None)
        .expect("HeadObject failed. Is LocalStack running on localhost:4566?");
    assert!(meta.last_modified.is_valid());
    assert_eq!(meta.size, Some(10));

    let missing = store.head_metadata(TEST_BUCKET, "nope.usda", None);
    assert!(matches!(missing, Err(StoreError::NotFound { .. })));
}

#[test]
#[ignore] // Run with: cargo test -- --ignored --test-threads=1
fn test_resolve_fetch_resolve() {
    let store = create_test_store();
    let (dir, engine) = create_test_engine(store);
    let id = format!("s3://{TEST_BUCKET}/props/chair.usda");
    let local = dir.path().join(TEST_BUCKET).join("props/chair.usda");

    let first = engine.resolve_name(&id).unwrap();
    assert!(first.starts_with("s3://"));

    engine.fetch_asset(&id, "").expect("Failed to fetch chair.usda");
    assert!(
        std::fs::read_to_string(&local)
            .unwrap()
            .contains("Chair")
    );

    let entry = engine.entry(&id).unwrap();
    assert_eq!(entry.state, CacheState::Fetched);
    assert!(entry.content_tag.is_some());

    let second = engine.resolve_name(&id).unwrap();
    assert_eq!(PathBuf::from(second), local);
    assert_eq!(engine.metrics().head_count(), 1);
    assert_eq!(engine.metrics().get_count(), 1);
}

#[test]
#[ignore] // Run with: cargo test -- --ignored --test-threads=1
fn test_conditional_fetch_not_modified() {
    let store = create_test_store();
    let (_dir, engine) = create_test_engine(store);
    let id = format!("s3://{TEST_BUCKET}/scene.usda");

    engine.resolve_name(&id).unwrap();
    engine.fetch_asset(&id, "").unwrap();

    // local copy is newer than the object, so the store answers 304
    engine.refresh("");
    engine.resolve_name(&id).unwrap();
    engine.fetch_asset(&id, "").unwrap();

    assert_eq!(engine.metrics().not_modified_count(), 1);
    assert_eq!(engine.entry(&id).unwrap().state, CacheState::Fetched);
}

#[test]
#[ignore] // Run with: cargo test -- --ignored --test-threads=1
fn test_fetch_missing_object() {
    let store = create_test_store();
    let (_dir, engine) = create_test_engine(store);
    let id = format!("s3://{TEST_BUCKET}/does/not/exist.usda");

    engine.resolve_name(&id).unwrap();
    assert!(engine.fetch_asset(&id, "").is_err());
    assert_eq!(engine.entry(&id).unwrap().state, CacheState::Missing);
}
