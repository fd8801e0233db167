//! Streaming checksum computation shared by the connectors that read file
//! bytes themselves. Reads in 8 KiB chunks so large files never buffer
//! fully in memory.

use std::io::Read;

use sha2::{Digest, Sha256};

use crate::config::ChecksumAlgo;
use crate::errors::{StorageError, StorageResult};

/// Hash everything the reader yields with the requested algorithm.
///
/// `Etag` has no client-side computation; object-store connectors answer it
/// from backend metadata instead of calling this.
pub fn hash_reader(
    path: &str,
    reader: &mut dyn Read,
    algo: ChecksumAlgo,
) -> StorageResult<String> {
    match algo {
        ChecksumAlgo::Sha256 => {
            let mut hasher = Sha256::new();
            feed(path, reader, |chunk| hasher.update(chunk))?;
            Ok(format!("{:x}", hasher.finalize()))
        }
        ChecksumAlgo::Crc32 => {
            let mut hasher = crc32fast::Hasher::new();
            feed(path, reader, |chunk| hasher.update(chunk))?;
            Ok(format!("{:08x}", hasher.finalize()))
        }
        ChecksumAlgo::Etag => Err(StorageError::ChecksumUnavailable {
            path: path.to_string(),
            reason: "etag checksums are only reported by object-store backends".to_string(),
        }),
    }
}

fn feed(
    path: &str,
    reader: &mut dyn Read,
    mut update: impl FnMut(&[u8]),
) -> StorageResult<()> {
    let mut buffer = [0u8; 8192];
    loop {
        let read = reader.read(&mut buffer).map_err(|e| {
            StorageError::unreadable(path, e)
        })?;
        if read == 0 {
            return Ok(());
        }
        update(&buffer[..read]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_sha256_known_vector() {
        let mut reader = Cursor::new(b"abc".to_vec());
        let digest = hash_reader("a.txt", &mut reader, ChecksumAlgo::Sha256).unwrap();
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_crc32_known_vector() {
        let mut reader = Cursor::new(b"123456789".to_vec());
        let digest = hash_reader("a.txt", &mut reader, ChecksumAlgo::Crc32).unwrap();
        assert_eq!(digest, "cbf43926");
    }

    #[test]
    fn test_etag_unavailable() {
        let mut reader = Cursor::new(Vec::new());
        let err = hash_reader("a.txt", &mut reader, ChecksumAlgo::Etag).unwrap_err();
        assert!(matches!(err, StorageError::ChecksumUnavailable { .. }));
    }

    #[test]
    fn test_chunked_input_matches_whole_input() {
        let data = vec![7u8; 100_000];
        let mut reader = Cursor::new(data.clone());
        let chunked = hash_reader("big", &mut reader, ChecksumAlgo::Sha256).unwrap();

        let mut hasher = Sha256::new();
        hasher.update(&data);
        assert_eq!(chunked, format!("{:x}", hasher.finalize()));
    }
}
