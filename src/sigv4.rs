//! AWS SigV4 request authentication (§4.3).
//!
//! This is the verifying half of the signing library's `signer.rs`: the
//! canonical-request construction and signing-key derivation are identical
//! math, run here to recompute an expected signature and compare it against
//! the one the client sent, rather than to produce one for an outbound
//! request.

use crate::error::{ErrorCode, LaminaError, LaminaResult};
use crate::header_constants::*;
use crate::multimap::{Multimap, MultimapExt, canonical_uri};
use crate::time::{UtcTime, to_amz_date, to_signer_date};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

fn hmac_hash(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts a key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hmac_hash_hex(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_hash(key, data))
}

pub fn signing_key(secret_key: &str, date: UtcTime, region: &str, service: &str) -> Vec<u8> {
    let mut key = b"AWS4".to_vec();
    key.extend(secret_key.as_bytes());
    let date_key = hmac_hash(&key, to_signer_date(date).as_bytes());
    let date_region_key = hmac_hash(&date_key, region.as_bytes());
    let date_region_service_key = hmac_hash(&date_region_key, service.as_bytes());
    hmac_hash(&date_region_service_key, b"aws4_request")
}

pub fn scope(date: UtcTime, region: &str, service: &str) -> String {
    format!("{}/{}/{}/aws4_request", to_signer_date(date), region, service)
}

fn canonical_request_hash(
    method: &str,
    uri: &str,
    query: &str,
    canonical_headers: &str,
    signed_headers: &str,
    payload_hash: &str,
) -> String {
    let canonical = format!(
        "{method}\n{uri}\n{query}\n{canonical_headers}\n\n{signed_headers}\n{payload_hash}"
    );
    crate::time::sha256_hash_hex(canonical.as_bytes())
}

fn string_to_sign(date: UtcTime, scope: &str, request_hash: &str) -> String {
    format!("AWS4-HMAC-SHA256\n{}\n{}\n{}", to_amz_date(date), scope, request_hash)
}

/// Parsed `Authorization: AWS4-HMAC-SHA256 Credential=..., SignedHeaders=..., Signature=...`.
#[derive(Debug, Clone)]
pub struct ParsedAuthorization {
    pub access_key: String,
    pub date: String,
    pub region: String,
    pub service: String,
    pub signed_headers: Vec<String>,
    pub signature: String,
}

pub fn parse_authorization(header: &str) -> LaminaResult<ParsedAuthorization> {
    let header = header
        .strip_prefix("AWS4-HMAC-SHA256 ")
        .ok_or_else(|| auth_failure())?;

    let mut access_key = None;
    let mut date = None;
    let mut region = None;
    let mut service = None;
    let mut signed_headers = None;
    let mut signature = None;

    for part in header.split(", ") {
        let part = part.trim();
        if let Some(rest) = part.strip_prefix("Credential=") {
            let fields: Vec<&str> = rest.splitn(5, '/').collect();
            if fields.len() != 5 || fields[4] != "aws4_request" {
                return Err(auth_failure());
            }
            access_key = Some(fields[0].to_string());
            date = Some(fields[1].to_string());
            region = Some(fields[2].to_string());
            service = Some(fields[3].to_string());
        } else if let Some(rest) = part.strip_prefix("SignedHeaders=") {
            signed_headers = Some(rest.split(';').map(|s| s.to_string()).collect());
        } else if let Some(rest) = part.strip_prefix("Signature=") {
            signature = Some(rest.to_string());
        }
    }

    Ok(ParsedAuthorization {
        access_key: access_key.ok_or_else(auth_failure)?,
        date: date.ok_or_else(auth_failure)?,
        region: region.ok_or_else(auth_failure)?,
        service: service.ok_or_else(auth_failure)?,
        signed_headers: signed_headers.ok_or_else(auth_failure)?,
        signature: signature.ok_or_else(auth_failure)?,
    })
}

fn auth_failure() -> LaminaError {
    LaminaError::new(ErrorCode::SignatureDoesNotMatch, "signature does not match")
}

/// Carries everything the chunked-payload parser needs to verify each chunk
/// and the trailer of a streaming request, anchored to the seed signature on
/// the initial (non-chunk) request.
#[derive(Clone)]
pub struct ChunkValidator {
    pub signing_key: Arc<[u8]>,
    pub date: UtcTime,
    pub scope: String,
    pub seed_signature: String,
    pub decoded_content_length: u64,
    pub expects_trailer: bool,
}

pub struct AuthenticatedRequest {
    pub access_key: String,
    pub chunk_validator: Option<ChunkValidator>,
}

/// Verifies a request's SigV4 signature and, for streaming payloads, returns
/// a `ChunkValidator` the caller threads through the chunked-payload parser.
pub fn authenticate(
    method: &str,
    path: &str,
    query_params: &Multimap,
    headers: &Multimap,
    secret_key: &str,
    payload_hash: &str,
) -> LaminaResult<AuthenticatedRequest> {
    let auth_header = headers
        .get(AUTHORIZATION)
        .ok_or_else(auth_failure)?;
    let parsed = parse_authorization(auth_header)?;

    let amz_date = headers.get(X_AMZ_DATE).ok_or_else(auth_failure)?;
    let date = chrono::NaiveDateTime::parse_from_str(amz_date, "%Y%m%dT%H%M%SZ")
        .map_err(|_| auth_failure())?
        .and_utc();

    let mut signed: Multimap = Multimap::new();
    for name in &parsed.signed_headers {
        if let Some(value) = headers.get(name) {
            signed.insert(name.clone(), value.clone());
        }
    }
    let (signed_headers, canonical_headers) = signed.get_canonical_headers();
    let canonical_query = query_params.get_canonical_query_string();
    let uri = canonical_uri(path);

    let request_hash = canonical_request_hash(
        method,
        &uri,
        &canonical_query,
        &canonical_headers,
        &signed_headers,
        payload_hash,
    );
    let scope_value = scope(date, &parsed.region, &parsed.service);
    let sts = string_to_sign(date, &scope_value, &request_hash);
    let key = signing_key(secret_key, date, &parsed.region, &parsed.service);
    let expected_signature = hmac_hash_hex(&key, sts.as_bytes());

    if !constant_time_eq(expected_signature.as_bytes(), parsed.signature.as_bytes()) {
        return Err(auth_failure());
    }

    let chunk_validator = match payload_hash {
        STREAMING_SIGNED_PAYLOAD | STREAMING_SIGNED_PAYLOAD_TRAILER => {
            let decoded_content_length = headers
                .get(X_AMZ_DECODED_CONTENT_LENGTH)
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0);
            Some(ChunkValidator {
                signing_key: Arc::from(key.into_boxed_slice()),
                date,
                scope: scope_value,
                seed_signature: expected_signature.clone(),
                decoded_content_length,
                expects_trailer: payload_hash == STREAMING_SIGNED_PAYLOAD_TRAILER,
            })
        }
        _ => None,
    };

    Ok(AuthenticatedRequest {
        access_key: parsed.access_key,
        chunk_validator,
    })
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_authorization_header() {
        let header = "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20150830/us-east-1/s3/aws4_request, SignedHeaders=host;x-amz-date, Signature=abcd1234";
        let parsed = parse_authorization(header).unwrap();
        assert_eq!(parsed.access_key, "AKIDEXAMPLE");
        assert_eq!(parsed.date, "20150830");
        assert_eq!(parsed.region, "us-east-1");
        assert_eq!(parsed.service, "s3");
        assert_eq!(parsed.signed_headers, vec!["host", "x-amz-date"]);
        assert_eq!(parsed.signature, "abcd1234");
    }

    #[test]
    fn rejects_malformed_authorization_header() {
        assert!(parse_authorization("Basic dXNlcjpwYXNz").is_err());
    }

    #[test]
    fn signature_mismatch_is_rejected() {
        let mut headers = Multimap::new();
        headers.insert(HOST.to_string(), "s3.example.com".to_string());
        headers.insert(X_AMZ_DATE.to_string(), "20150830T123600Z".to_string());
        headers.insert(
            AUTHORIZATION.to_string(),
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20150830/us-east-1/s3/aws4_request, SignedHeaders=host;x-amz-date, Signature=deadbeef".to_string(),
        );
        let query = Multimap::new();
        let result = authenticate(
            "GET",
            "/bucket/key",
            &query,
            &headers,
            "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY",
            UNSIGNED_PAYLOAD,
        );
        assert!(result.is_err());
    }
}
