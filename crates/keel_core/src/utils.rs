use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{KeelError, Result};

const CHUNK_SIZE: usize = 64 * 1024;

/// SHA-256 of a file's bytes, as lowercase hex.
pub fn hash_file(path: &Path) -> Result<String> {
    if !path.is_file() {
        return Err(KeelError::NotFound(format!(
            "{} is not a file",
            path.display()
        )));
    }

    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Strip a leading `0x`/`0X` if present.
pub fn remove_0x(hexstr: &str) -> &str {
    hexstr
        .strip_prefix("0x")
        .or_else(|| hexstr.strip_prefix("0X"))
        .unwrap_or(hexstr)
}

/// Lowercase, `0x`-prefixed form of a hex string. Rejects non-hex input.
pub fn normalize_hexstring(hexstr: &str) -> Result<String> {
    let body = remove_0x(hexstr.trim());
    if !body.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(KeelError::Validation(format!("not a hex string: {hexstr}")));
    }
    Ok(format!("0x{}", body.to_ascii_lowercase()))
}
