//! Content digests attached to upload results and used for request signing.

use sha2::{Digest, Sha256};

/// Hex SHA-256 of a byte slice
pub fn sha256_hex(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Base64 MD5, the format of the `Content-MD5` header
pub fn md5_base64(content: &[u8]) -> String {
    use base64::{engine::general_purpose, Engine as _};
    general_purpose::STANDARD.encode(md5::compute(content).0)
}
