//! MySQL authentication plugins.

use sha1::{Digest, Sha1};
use sha2::Sha256;

pub const MYSQL_NATIVE_PASSWORD: &str = "mysql_native_password";
pub const CACHING_SHA2_PASSWORD: &str = "caching_sha2_password";

/// caching_sha2_password fast-auth status bytes (after the 0x01 marker).
pub const FAST_AUTH_SUCCESS: u8 = 0x03;
pub const PERFORM_FULL_AUTHENTICATION: u8 = 0x04;

/// Scramble length used by both plugins.
const SCRAMBLE_LEN: usize = 20;

/// mysql_native_password:
/// `SHA1(password) XOR SHA1(salt + SHA1(SHA1(password)))`.
///
/// An empty password yields an empty response.
pub fn scramble_native(password: &[u8], salt: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let salt = &salt[..salt.len().min(SCRAMBLE_LEN)];

    let stage1 = Sha1::digest(password);
    let stage2 = Sha1::digest(stage1);

    let mut hasher = Sha1::new();
    hasher.update(salt);
    hasher.update(stage2);
    let stage3 = hasher.finalize();

    xor(&stage1, &stage3)
}

/// caching_sha2_password fast path:
/// `SHA256(password) XOR SHA256(SHA256(SHA256(password)) + nonce)`.
pub fn scramble_caching_sha2(password: &[u8], nonce: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let nonce = &nonce[..nonce.len().min(SCRAMBLE_LEN)];

    let digest1 = Sha256::digest(password);
    let digest2 = Sha256::digest(digest1);

    let mut hasher = Sha256::new();
    hasher.update(digest2);
    hasher.update(nonce);
    let digest3 = hasher.finalize();

    xor(&digest1, &digest3)
}

/// Response for the named plugin. Unknown plugins get a native scramble;
/// the server answers with an auth switch if it wants something else.
pub fn scramble(plugin: &str, password: &[u8], salt: &[u8]) -> Vec<u8> {
    match plugin {
        CACHING_SHA2_PASSWORD => scramble_caching_sha2(password, salt),
        _ => scramble_native(password, salt),
    }
}

/// Plugin name this client answers with for a server-advertised plugin.
pub fn response_plugin(server_plugin: Option<&str>) -> &'static str {
    match server_plugin {
        Some(CACHING_SHA2_PASSWORD) => CACHING_SHA2_PASSWORD,
        _ => MYSQL_NATIVE_PASSWORD,
    }
}

fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b).map(|(x, y)| x ^ y).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn salt() -> Vec<u8> {
        (1u8..=20).collect()
    }

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    #[test]
    fn test_empty_password_sends_nothing() {
        assert!(scramble_native(b"", &salt()).is_empty());
        assert!(scramble_caching_sha2(b"", &salt()).is_empty());
    }

    #[test]
    fn test_native_scramble_known_answer() {
        assert_eq!(
            hex(&scramble_native(b"secret", &salt())),
            "b32bb3a583e1340c0a1108d58b1be49781ad8c2f"
        );
    }

    #[test]
    fn test_caching_sha2_scramble_known_answer() {
        assert_eq!(
            hex(&scramble_caching_sha2(b"secret", &salt())),
            "746ebe205d56a0707acb3e796e834e0dd7b1d61743b26bd5202c7a623230c7c9"
        );
    }

    #[test]
    fn test_native_scramble_ignores_salt_past_twenty_bytes() {
        let mut long = salt();
        long.push(0);
        assert_eq!(scramble_native(b"pw", &salt()), scramble_native(b"pw", &long));
    }

    #[test]
    fn test_caching_sha2_scramble_length() {
        assert_eq!(scramble_caching_sha2(b"secret", &salt()).len(), 32);
    }

    #[test]
    fn test_response_plugin() {
        assert_eq!(response_plugin(Some("caching_sha2_password")), CACHING_SHA2_PASSWORD);
        assert_eq!(response_plugin(Some("sha256_password")), MYSQL_NATIVE_PASSWORD);
        assert_eq!(response_plugin(None), MYSQL_NATIVE_PASSWORD);
    }
}
