//! SHA-256 verification of downloaded artifacts.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{InstallError, InstallResult};

/// Buffer size for reading files during checksum calculation (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Calculate the lowercase hex SHA-256 digest of a file.
pub fn calculate_file_checksum(path: &Path) -> InstallResult<String> {
    let mut file = File::open(path).map_err(|e| InstallError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let bytes_read = file
            .read(&mut buffer)
            .map_err(|e| InstallError::ReadFailed {
                path: path.to_path_buf(),
                source: e,
            })?;

        if bytes_read == 0 {
            break;
        }

        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Verify a file against an expected digest, ignoring case.
///
/// An empty `expected` skips verification; the manifest itself is fetched
/// this way since nothing upstream of it carries a checksum.
pub fn verify_checksum(path: &Path, filename: &str, expected: &str) -> InstallResult<()> {
    let expected = expected.trim();
    if expected.is_empty() {
        return Ok(());
    }

    let actual = calculate_file_checksum(path)?;
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(InstallError::ChecksumMismatch {
            filename: filename.to_string(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const HELLO_WORLD_SHA256: &str =
        "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_calculate_file_checksum() {
        let temp = TempDir::new().unwrap();
        let file_path = temp.path().join("test.txt");
        fs::write(&file_path, b"hello world").unwrap();

        assert_eq!(calculate_file_checksum(&file_path).unwrap(), HELLO_WORLD_SHA256);
    }

    #[test]
    fn test_calculate_empty_file() {
        let temp = TempDir::new().unwrap();
        let file_path = temp.path().join("empty.txt");
        fs::write(&file_path, b"").unwrap();

        assert_eq!(
            calculate_file_checksum(&file_path).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_calculate_nonexistent_file() {
        assert!(calculate_file_checksum(Path::new("/nonexistent/file.txt")).is_err());
    }

    #[test]
    fn test_verify_is_case_insensitive() {
        let temp = TempDir::new().unwrap();
        let file_path = temp.path().join("test.txt");
        fs::write(&file_path, b"hello world").unwrap();

        assert!(verify_checksum(&file_path, "test.txt", HELLO_WORLD_SHA256).is_ok());
        assert!(verify_checksum(
            &file_path,
            "test.txt",
            &HELLO_WORLD_SHA256.to_uppercase()
        )
        .is_ok());
    }

    #[test]
    fn test_single_byte_mutation_mismatches() {
        let temp = TempDir::new().unwrap();
        let file_path = temp.path().join("test.txt");
        fs::write(&file_path, b"hello worle").unwrap();

        match verify_checksum(&file_path, "test.txt", HELLO_WORLD_SHA256) {
            Err(InstallError::ChecksumMismatch {
                filename,
                expected,
                actual,
            }) => {
                assert_eq!(filename, "test.txt");
                assert_eq!(expected, HELLO_WORLD_SHA256);
                assert_ne!(actual, HELLO_WORLD_SHA256);
            }
            other => panic!("expected ChecksumMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_expected_is_noop() {
        // Not even the file needs to exist.
        assert!(verify_checksum(Path::new("/nonexistent"), "version.txt", "").is_ok());
    }

    #[test]
    fn test_large_file_checksum_is_stable() {
        let temp = TempDir::new().unwrap();
        let file_path = temp.path().join("large.bin");
        fs::write(&file_path, vec![0xABu8; 100_000]).unwrap();

        let first = calculate_file_checksum(&file_path).unwrap();
        let second = calculate_file_checksum(&file_path).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }
}
