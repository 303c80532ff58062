//! AWS date formats used by the authenticator and chunk verifier.

use chrono::{DateTime, Utc};

pub type UtcTime = DateTime<Utc>;

/// `yyyyMMdd`, used in the signing scope.
pub fn to_signer_date(time: UtcTime) -> String {
    time.format("%Y%m%d").to_string()
}

/// `yyyyMMddTHHmmssZ`, the `x-amz-date` header format.
pub fn to_amz_date(time: UtcTime) -> String {
    time.format("%Y%m%dT%H%M%SZ").to_string()
}

pub fn sha256_hash_hex(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(data))
}
