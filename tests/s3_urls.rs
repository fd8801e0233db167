//! Object-Store URL Tests
//!
//! Everything here is offline: bucket construction, public URL synthesis
//! and presigning are pure computation, so no object store is needed.

use aerostore::StorageManager;
use serde_json::json;

fn manager(temporary_url: Option<&str>, url: Option<&str>) -> StorageManager {
    let mut disk = json!({
        "driver": "s3",
        "key": "AKIATEST",
        "secret": "shhh",
        "bucket": "assets",
        "region": "eu-west-1",
        "endpoint": "https://minio.internal:9000",
        "use_path_style": true,
        "root": "uploads",
    });
    if let Some(base) = temporary_url {
        disk["temporary_url"] = json!(base);
    }
    if let Some(base) = url {
        disk["url"] = json!(base);
    }
    StorageManager::from_value(json!({
        "default": "objects",
        "disks": { "objects": disk }
    }))
    .unwrap()
}

#[test]
fn test_native_public_url_includes_root() {
    let disk = manager(None, None).default_disk().unwrap();
    assert_eq!(
        disk.url("media/a.png").unwrap(),
        "https://minio.internal:9000/assets/uploads/media/a.png"
    );
}

#[test]
fn test_configured_base_overrides_native_url() {
    let disk = manager(None, Some("https://cdn.example.com")).default_disk().unwrap();
    assert_eq!(
        disk.url("media/a.png").unwrap(),
        "https://cdn.example.com/media/a.png"
    );
}

#[test]
fn test_temporary_url_is_signed() {
    let disk = manager(None, None).default_disk().unwrap();
    assert!(disk.provides_temporary_urls());

    let url = disk
        .temporary_url("media/a.png", chrono::Utc::now() + chrono::Duration::minutes(10))
        .unwrap();
    assert!(url.starts_with("https://minio.internal:9000/"));
    assert!(url.contains("uploads/media/a.png"));
    assert!(url.contains("X-Amz-Signature="));
}

#[test]
fn test_temporary_url_host_rewrite_preserves_signature() {
    let plain = manager(None, None).default_disk().unwrap();
    let rewritten = manager(Some("https://files.example.com:8443"), None)
        .default_disk()
        .unwrap();

    let url = rewritten
        .temporary_url("media/a.png", chrono::Utc::now() + chrono::Duration::minutes(10))
        .unwrap();

    // Scheme/host/port come from the alternate base
    assert!(url.starts_with("https://files.example.com:8443/"));
    // Path and signature query parameters survive the rewrite
    assert!(url.contains("uploads/media/a.png"));
    assert!(url.contains("X-Amz-Signature="));
    assert!(url.contains("X-Amz-Expires="));

    // The plain disk signs against the real endpoint
    let original = plain
        .temporary_url("media/a.png", chrono::Utc::now() + chrono::Duration::minutes(10))
        .unwrap();
    assert!(original.starts_with("https://minio.internal:9000/"));
}
