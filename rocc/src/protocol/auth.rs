//! Challenge-response authentication.
//!
//! ```text
//!   host                         device
//!    | ── chlng\r\n ─────────────► |
//!    | ◄──────────── <hex nonce>\n |
//!    | ── auth<HMAC-SHA256>\r\n ─► |
//!    | ◄───────────────────── OK\n |
//! ```
//!
//! The proof is HMAC-SHA256 over the decoded challenge bytes, keyed with the
//! shared secret, encoded as uppercase hex.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Decode the hex challenge sent by the device.
pub fn decode_challenge(response: &str) -> Result<Vec<u8>> {
    let text = response.trim();
    if text.is_empty() {
        return Err(Error::InvalidChallenge("empty challenge".into()));
    }
    hex::decode(text).map_err(|e| Error::InvalidChallenge(format!("{e} in {text:?}")))
}

/// Compute the uppercase hex proof for `challenge`.
pub fn compute_proof(secret: &[u8], challenge: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| Error::Config(format!("unusable secret: {e}")))?;
    mac.update(challenge);
    Ok(hex::encode_upper(mac.finalize().into_bytes()))
}
