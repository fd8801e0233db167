//! Local Disk End-To-End Tests
//!
//! Exercises the documented adapter contract through the manager:
//! - prefixed paths are independent of edge separators
//! - put/get round-trips arbitrary bytes
//! - multi-delete keeps going after a failure
//! - URL synthesis with and without a configured base
//! - fail-soft vs fail-fast error policy per disk

use aerostore::{ChecksumAlgo, StorageError, StorageManager, Visibility};
use serde_json::json;
use tempfile::TempDir;

fn manager(temp: &TempDir, throw: bool) -> StorageManager {
    StorageManager::from_value(json!({
        "default": "data",
        "disks": {
            "data": {
                "driver": "local",
                "root": temp.path().join("data").to_string_lossy(),
                "throw": throw,
            },
            "cdn": {
                "driver": "local",
                "root": temp.path().join("data").to_string_lossy(),
                "url": "https://cdn.example.com",
            },
            "public_scope": {
                "driver": "scoped",
                "disk": "data",
                "prefix": "public",
            },
        }
    }))
    .unwrap()
}

#[test]
fn test_prefixed_path_ignores_edge_separators() {
    let temp = TempDir::new().unwrap();
    let disk = manager(&temp, false).default_disk().unwrap();

    let canonical = disk.path("a/b.txt");
    assert_eq!(disk.path("/a/b.txt"), canonical);
    assert!(canonical.ends_with("/data/a/b.txt"));
}

#[test]
fn test_put_get_url_scenario() {
    let temp = TempDir::new().unwrap();
    let manager = manager(&temp, false);
    let disk = manager.disk("data").unwrap();

    assert!(disk.put("a/b.txt", "hi").unwrap());
    assert_eq!(disk.get_string("a/b.txt").unwrap().unwrap(), "hi");
    assert_eq!(disk.url("a/b.txt").unwrap(), "/storage/a/b.txt");

    // Same tree exposed with a configured URL base
    let cdn = manager.disk("cdn").unwrap();
    assert_eq!(
        cdn.url("a/b.txt").unwrap(),
        "https://cdn.example.com/a/b.txt"
    );
}

#[test]
fn test_scoped_public_url_collapse() {
    let temp = TempDir::new().unwrap();
    let manager = manager(&temp, false);
    let scoped = manager.disk("public_scope").unwrap();

    scoped.put("foo.txt", "x").unwrap();
    assert_eq!(scoped.url("foo.txt").unwrap(), "/storage/foo.txt");

    // The backing file really lives under the public prefix
    let base = manager.disk("data").unwrap();
    assert!(base.file_exists("public/foo.txt"));
}

#[test]
fn test_byte_round_trip_including_nulls() {
    let temp = TempDir::new().unwrap();
    let disk = manager(&temp, false).default_disk().unwrap();

    for payload in [Vec::new(), vec![0u8], vec![1, 0, 2, 0, 3], vec![0xFF; 4096]] {
        assert!(disk.put("blob.bin", payload.clone()).unwrap());
        assert_eq!(disk.get("blob.bin").unwrap().unwrap(), payload);
    }
}

#[test]
fn test_multi_delete_partial_failure() {
    let temp = TempDir::new().unwrap();
    let disk = manager(&temp, false).default_disk().unwrap();

    disk.put("p1.txt", "x").unwrap();
    let overall = disk.delete_all(["p1.txt", "p2.txt"]).unwrap();

    assert!(!overall);
    assert!(!disk.exists("p1.txt"));
}

#[test]
fn test_fail_fast_disk_raises() {
    let temp = TempDir::new().unwrap();
    let disk = manager(&temp, true).default_disk().unwrap();

    assert!(matches!(
        disk.get("missing.txt"),
        Err(StorageError::NotFound { .. })
    ));
    assert!(matches!(
        disk.delete("missing.txt"),
        Err(StorageError::NotFound { .. })
    ));
}

#[test]
fn test_fail_soft_disk_returns_sentinels() {
    let temp = TempDir::new().unwrap();
    let disk = manager(&temp, false).default_disk().unwrap();

    assert_eq!(disk.get("missing.txt").unwrap(), None);
    assert!(!disk.delete("missing.txt").unwrap());
    assert_eq!(disk.size("missing.txt").unwrap(), None);
    assert_eq!(disk.mime_type("missing.txt").unwrap(), None);
}

#[test]
fn test_make_directory_idempotence() {
    let temp = TempDir::new().unwrap();
    let disk = manager(&temp, false).default_disk().unwrap();

    assert!(disk.make_directory("nested/dir").unwrap());
    assert!(disk.directory_exists("nested/dir"));
    assert!(disk.make_directory("nested/dir").unwrap());
    assert!(disk.directory_exists("nested/dir"));
}

#[cfg(unix)]
#[test]
fn test_visibility_round_trip_via_manager() {
    let temp = TempDir::new().unwrap();
    let disk = manager(&temp, false).default_disk().unwrap();
    disk.put("v.txt", "x").unwrap();

    for v in [Visibility::Public, Visibility::Private] {
        assert!(disk.set_visibility("v.txt", v).unwrap());
        assert_eq!(disk.get_visibility("v.txt").unwrap(), v);
    }
}

#[test]
fn test_checksums_agree_with_content() {
    let temp = TempDir::new().unwrap();
    let disk = manager(&temp, false).default_disk().unwrap();
    disk.put("sum.txt", "abc").unwrap();

    assert_eq!(
        disk.checksum_with("sum.txt", ChecksumAlgo::Sha256)
            .unwrap()
            .unwrap(),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
}

#[test]
fn test_two_disks_same_backend_do_not_collide() {
    let temp = TempDir::new().unwrap();
    let manager = StorageManager::from_value(json!({
        "default": "a",
        "disks": {
            "a": { "driver": "local", "root": temp.path().to_string_lossy(), "prefix": "a" },
            "b": { "driver": "local", "root": temp.path().to_string_lossy(), "prefix": "b" },
        }
    }))
    .unwrap();

    let a = manager.disk("a").unwrap();
    let b = manager.disk("b").unwrap();
    a.put("same.txt", "from a").unwrap();
    b.put("same.txt", "from b").unwrap();

    assert_eq!(a.get_string("same.txt").unwrap().unwrap(), "from a");
    assert_eq!(b.get_string("same.txt").unwrap().unwrap(), "from b");
}
