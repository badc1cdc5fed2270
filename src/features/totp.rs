//! Time-based one-time passwords (RFC 6238 over RFC 4226 HOTP, HMAC-SHA1,
//! 30 s step, 6 digits).

use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::core::error::{AutomationError, Result};

pub const STEP_SECONDS: u64 = 30;
const DIGITS_MODULUS: u32 = 1_000_000;

fn decode_secret(secret: &str) -> Result<Vec<u8>> {
    let normalized: String = secret
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .trim_end_matches('=')
        .to_ascii_uppercase();

    if normalized.is_empty() {
        return Err(AutomationError::InvalidSecret("empty secret".to_string()));
    }

    BASE32_NOPAD
        .decode(normalized.as_bytes())
        .map_err(|e| AutomationError::InvalidSecret(e.to_string()))
}

/// HOTP value for an explicit counter.
pub fn hotp(secret: &str, counter: u64) -> Result<String> {
    let key = decode_secret(secret)?;

    let mut mac = Hmac::<Sha1>::new_from_slice(&key)
        .map_err(|e| AutomationError::InvalidSecret(e.to_string()))?;
    mac.update(&counter.to_be_bytes());
    let hash = mac.finalize().into_bytes();

    let offset = (hash[hash.len() - 1] & 0x0f) as usize;
    let binary = u32::from_be_bytes([
        hash[offset] & 0x7f,
        hash[offset + 1],
        hash[offset + 2],
        hash[offset + 3],
    ]);

    Ok(format!("{:06}", binary % DIGITS_MODULUS))
}

/// Number of 30-second steps elapsed since the Unix epoch.
pub fn counter_at(unix_seconds: u64) -> u64 {
    unix_seconds / STEP_SECONDS
}

/// TOTP code for `unix_seconds`.
pub fn derive_code(secret: &str, unix_seconds: u64) -> Result<String> {
    hotp(secret, counter_at(unix_seconds))
}

/// TOTP code for the current wall-clock time.
pub fn current_code(secret: &str) -> Result<String> {
    let now = chrono::Utc::now().timestamp().max(0) as u64;
    derive_code(secret, now)
}
