//! SHA-256 content checksums, formatted as `sha256:<hex>`
//!
//! The checksum is the only signal used to decide whether a file changed
//! since its last sync. It is stored in the catalog and in each remote
//! document's custom metadata.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

pub const ALGORITHM_TAG: &str = "sha256:";

/// Checksum of an in-memory buffer
pub fn checksum_bytes(data: &[u8]) -> String {
    format!("{ALGORITHM_TAG}{:x}", Sha256::digest(data))
}

/// Checksum of a file, streamed through the hasher in 64KB reads
pub fn checksum_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("opening file for checksum: {}", path.display()))?;

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("reading for checksum: {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{ALGORITHM_TAG}{:x}", hasher.finalize()))
}

/// Bring a stored checksum to the tagged form.
///
/// Older uploads recorded a bare 64-char hex digest; those gain the tag.
/// Anything else is returned trimmed and otherwise untouched.
pub fn normalize(checksum: &str) -> String {
    let c = checksum.trim();
    if c.len() == 64 && c.bytes().all(|b| b.is_ascii_hexdigit()) {
        format!("{ALGORITHM_TAG}{}", c.to_ascii_lowercase())
    } else {
        c.to_string()
    }
}
