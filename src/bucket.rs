//! Bucket naming validation and the bucket registry (§3, §4's "Bucket
//! registry" line item). Grounded in the signing library's
//! `check_bucket_name`, with the reserved-prefix checks that file lacked
//! (`xn--`, `sthree-`, `amzn-s3-demo-`) added per the expanded data model.

use crate::error::{ErrorCode, LaminaError, LaminaResult};
use crate::object::{Bucket, BucketType};
use crate::time::UtcTime;
use dashmap::DashMap;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

lazy_static! {
    static ref IPV4_REGEX: Regex =
        Regex::new(r"^(\d{1,3})\.(\d{1,3})\.(\d{1,3})\.(\d{1,3})$").unwrap();
    static ref VALID_BUCKET_NAME_REGEX: Regex =
        Regex::new(r"^[a-z0-9][a-z0-9.\-]{1,61}[a-z0-9]$").unwrap();
}

const RESERVED_PREFIXES: &[&str] = &["xn--", "sthree-", "amzn-s3-demo-"];

pub fn check_bucket_name(name: &str) -> LaminaResult<()> {
    let invalid = || LaminaError::new(ErrorCode::InvalidBucketName, "invalid bucket name");

    if name.len() < 3 || name.len() > 63 {
        return Err(invalid());
    }
    if !VALID_BUCKET_NAME_REGEX.is_match(name) {
        return Err(invalid());
    }
    if IPV4_REGEX.is_match(name) {
        return Err(invalid());
    }
    if name.contains("..") || name.contains(".-") || name.contains("-.") {
        return Err(invalid());
    }
    if RESERVED_PREFIXES.iter().any(|p| name.starts_with(p)) {
        return Err(invalid());
    }
    Ok(())
}

/// In-memory bucket registry; create/list/delete plus the type that drives
/// listing semantics (§4.7).
pub struct BucketRegistry {
    buckets: DashMap<String, Bucket>,
}

impl BucketRegistry {
    pub fn new() -> Self {
        BucketRegistry {
            buckets: DashMap::new(),
        }
    }

    pub fn create(
        &self,
        name: &str,
        bucket_type: BucketType,
        storage_class: Option<String>,
    ) -> LaminaResult<()> {
        check_bucket_name(name)?;
        // Open question resolved: BucketAlreadyExists is global, matching
        // the upstream system this spec distills (see DESIGN.md).
        if self.buckets.contains_key(name) {
            return Err(LaminaError::new(
                ErrorCode::BucketAlreadyExists,
                "bucket already exists",
            ));
        }
        self.buckets.insert(
            name.to_string(),
            Bucket {
                name: name.to_string(),
                creation_date: now(),
                bucket_type,
                storage_class,
                tags: HashMap::new(),
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Bucket> {
        self.buckets.get(name).map(|b| b.clone())
    }

    pub fn exists(&self, name: &str) -> bool {
        self.buckets.contains_key(name)
    }

    pub fn list(&self) -> Vec<Bucket> {
        self.buckets.iter().map(|e| e.value().clone()).collect()
    }

    pub fn delete(&self, name: &str) -> LaminaResult<()> {
        if self.buckets.remove(name).is_none() {
            return Err(LaminaError::new(ErrorCode::NoSuchBucket, "no such bucket"));
        }
        Ok(())
    }
}

impl Default for BucketRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedBucketRegistry = Arc<BucketRegistry>;

fn now() -> UtcTime {
    chrono::Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_names() {
        assert!(check_bucket_name("my-bucket.1").is_ok());
    }

    #[test]
    fn rejects_ip_shaped_names() {
        assert!(check_bucket_name("192.168.1.1").is_err());
    }

    #[test]
    fn rejects_reserved_prefixes() {
        assert!(check_bucket_name("xn--bucket").is_err());
        assert!(check_bucket_name("sthree-bucket").is_err());
        assert!(check_bucket_name("amzn-s3-demo-bucket").is_err());
    }

    #[test]
    fn rejects_too_short_or_long() {
        assert!(check_bucket_name("ab").is_err());
        assert!(check_bucket_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn create_then_duplicate_fails_as_bucket_already_exists() {
        let registry = BucketRegistry::new();
        registry
            .create("my-bucket", BucketType::GeneralPurpose, None)
            .unwrap();
        let err = registry
            .create("my-bucket", BucketType::GeneralPurpose, None)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::BucketAlreadyExists);
    }
}
