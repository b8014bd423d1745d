//! SHA256 verification for downloaded installers.

use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;

use crate::error::DownloadError;

/// Verify SHA256 checksum of a file.
pub async fn verify_sha256(path: &Path, expected: &str) -> Result<(), DownloadError> {
    let actual = calculate_sha256(path).await?;

    // Published digests are sometimes uppercase or padded.
    let expected = expected.trim().to_lowercase();

    if actual != expected {
        return Err(DownloadError::ChecksumMismatch { expected, actual });
    }

    Ok(())
}

/// Calculate SHA256 hash of a file.
pub async fn calculate_sha256(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 8192];

    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}
