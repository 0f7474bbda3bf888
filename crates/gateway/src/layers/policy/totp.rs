use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

type HmacSha1 = Hmac<Sha1>;

pub const TOTP_PERIOD_SECS: u64 = 30;
/// A TOTP credential is two six-digit codes: one from the password, one from it reversed.
pub const TOTP_INPUT_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum TotpError {
    #[error("TOTP secret is not valid base32: {0}")]
    InvalidSecret(#[from] data_encoding::DecodeError),
    #[error("TOTP key rejected by HMAC")]
    InvalidKey,
}

/// RFC 6238 code for one 30-second time division of a base32 secret.
pub fn totp_code(secret_base32: &str, time_division: u64) -> Result<String, TotpError> {
    let normalised: String = secret_base32
        .chars()
        .filter(|ch| !ch.is_whitespace() && *ch != '=')
        .map(|ch| ch.to_ascii_uppercase())
        .collect();
    let key = BASE32_NOPAD.decode(normalised.as_bytes())?;
    let mut mac = HmacSha1::new_from_slice(&key).map_err(|_| TotpError::InvalidKey)?;
    mac.update(&time_division.to_be_bytes());
    let digest = mac.finalize().into_bytes();
    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = u32::from_be_bytes([
        digest[offset] & 0x7f,
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]);
    Ok(format!("{:06}", binary % 1_000_000))
}

/// Base32 secret that a password stands for.
pub fn password_secret(password: &str) -> String {
    BASE32_NOPAD.encode(password.as_bytes())
}

/// Previous, current and next codes around `unix_secs`.
pub fn codes_around(secret_base32: &str, unix_secs: u64) -> Result<[String; 3], TotpError> {
    let division = unix_secs / TOTP_PERIOD_SECS;
    Ok([
        totp_code(secret_base32, division.saturating_sub(1))?,
        totp_code(secret_base32, division)?,
        totp_code(secret_base32, division + 1)?,
    ])
}

/// Every twelve-digit credential `password` accepts at `unix_secs`.
pub fn acceptable_codes(password: &str, unix_secs: u64) -> Result<Vec<String>, TotpError> {
    let reversed: String = password.chars().rev().collect();
    let forward = codes_around(&password_secret(password), unix_secs)?;
    let backward = codes_around(&password_secret(&reversed), unix_secs)?;
    let mut codes = Vec::with_capacity(forward.len() * backward.len());
    for first in &forward {
        for second in &backward {
            codes.push(format!("{first}{second}"));
        }
    }
    Ok(codes)
}

#[derive(Debug, Clone)]
struct TotpUse {
    code: String,
    content: String,
}

/// Remembers, per password, which command the last accepted code authorised.
#[derive(Debug, Default)]
pub struct TotpReplayGuard {
    last_use: Mutex<HashMap<String, TotpUse>>,
}

impl TotpReplayGuard {
    /// Returns false when `code` already authorised different content.
    pub fn admit(&self, password: &str, code: &str, content: &str) -> bool {
        let mut last_use = self.last_use.lock().expect("totp replay lock");
        if let Some(previous) = last_use.get(password) {
            if previous.code == code && previous.content != content {
                return false;
            }
        }
        last_use.insert(
            password.to_string(),
            TotpUse {
                code: code.to_string(),
                content: content.to_string(),
            },
        );
        true
    }
}
