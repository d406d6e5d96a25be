//! Miscellaneous helper utilities.
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use rsa::rand_core::{OsRng, RngCore};

use crate::error::{Error, Result};

/// Current UNIX time in seconds.
#[must_use]
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Standard (padded) base64 encoding.
#[must_use]
pub fn b64_encode(data: impl AsRef<[u8]>) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

/// Standard (padded) base64 decoding.
pub fn b64_decode(data: impl AsRef<[u8]>) -> Result<Vec<u8>> {
    Ok(base64::engine::general_purpose::STANDARD.decode(data)?)
}

/// Decode a JWK `k` value: URL-safe base64 whose padding may be stripped.
///
/// Padding is restored by hand (`len % 4` of 2 gets `==`, 3 gets `=`) since
/// the padded URL-safe engine rejects unpadded input. A remainder of 1 can
/// never be valid base64.
pub fn decode_jwk_key(k: &str) -> Result<Vec<u8>> {
    let mut padded = k.trim().to_string();
    match padded.len() % 4 {
        0 => {}
        2 => padded.push_str("=="),
        3 => padded.push('='),
        _ => {
            return Err(Error::HandshakeFailed(format!(
                "Invalid JWK key length {}",
                k.len()
            )))
        }
    }
    Ok(base64::engine::general_purpose::URL_SAFE.decode(padded)?)
}

/// Fill a fixed-size array from the OS CSPRNG.
#[must_use]
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    OsRng.fill_bytes(&mut buf);
    buf
}

/// Fresh 52-bit random message id.
#[must_use]
pub fn random_message_id() -> u64 {
    OsRng.next_u64() & ((1u64 << 52) - 1)
}

/// Ensure a file path's parent directory exists.
pub fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}
