//! Data model (§3): buckets, objects, multipart uploads, users, cache entries.

use crate::checksum::ChecksumMap;
use crate::time::UtcTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BucketType {
    GeneralPurpose,
    Directory,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Bucket {
    pub name: String,
    pub creation_date: UtcTime,
    pub bucket_type: BucketType,
    pub storage_class: Option<String>,
    pub tags: HashMap<String, String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Checksums {
    pub crc32: Option<String>,
    pub crc32c: Option<String>,
    pub crc64nvme: Option<String>,
    pub sha1: Option<String>,
    pub sha256: Option<String>,
}

impl Checksums {
    pub fn from_map(map: &ChecksumMap) -> Self {
        use crate::checksum::ChecksumAlgorithm as A;
        Checksums {
            crc32: map.get(&A::Crc32).cloned(),
            crc32c: map.get(&A::Crc32c).cloned(),
            crc64nvme: map.get(&A::Crc64Nvme).cloned(),
            sha1: map.get(&A::Sha1).cloned(),
            sha256: map.get(&A::Sha256).cloned(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Object {
    pub bucket: String,
    pub key: String,
    pub size: u64,
    pub last_modified: UtcTime,
    pub etag: String,
    pub content_type: String,
    pub user_metadata: BTreeMap<String, String>,
    pub owner_id: Option<String>,
    pub owner_display_name: Option<String>,
    pub checksums: Checksums,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MultipartUpload {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    pub initiated: UtcTime,
    pub content_type: String,
    pub user_metadata: BTreeMap<String, String>,
    pub checksum_algorithm: Option<crate::checksum::ChecksumAlgorithm>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadPart {
    pub part_number: u16,
    pub size: u64,
    pub etag: String,
    pub checksums: Checksums,
    pub last_modified: UtcTime,
}

pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;
pub const MAX_PART_COUNT: u16 = 10_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    List,
    Read,
    Write,
    Delete,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BucketPermission {
    pub bucket_pattern: String,
    pub permissions: Vec<Permission>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct S3User {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub display_name: String,
    pub permissions: Vec<BucketPermission>,
}

impl S3User {
    pub fn allows(&self, bucket: &str, permission: Permission) -> bool {
        self.permissions.iter().any(|p| {
            glob_match(&p.bucket_pattern, bucket) && p.permissions.contains(&permission)
        })
    }
}

/// Minimal glob: `*` matches any suffix, otherwise exact match. Grounded in
/// the coarse per-user ACL model the spec calls for (no policy language).
fn glob_match(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return value.starts_with(prefix);
    }
    pattern == value
}
