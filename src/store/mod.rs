//! Backend-polymorphic storage contracts (§4.4, §9 "Polymorphic storage
//! backends via interfaces"). Each backend implements all three traits;
//! selection happens once at startup from configuration.

pub mod database;
pub mod filesystem;
pub mod memory;

use crate::checksum::{ChecksumAlgorithm, ChecksumMap};
use crate::error::LaminaResult;
use crate::object::UploadPart;
use crate::time::UtcTime;
use async_trait::async_trait;
use bytes::Bytes;

/// Result of a successful streaming ingest.
pub struct StoredData {
    pub size: u64,
    pub etag: String,
    pub checksums: ChecksumMap,
}

/// Outcome of a range write: `false` means nothing was written (bad range or
/// missing object), never an error by itself.
pub struct DataInfo {
    pub size: u64,
    pub last_modified: UtcTime,
    pub etag: String,
}

/// Object data store: raw bytes addressable by (bucket, key), source of
/// truth for existence (§4.4).
#[async_trait]
pub trait DataStore: Send + Sync {
    async fn store_data(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        requested_checksums: &[ChecksumAlgorithm],
        expected_checksums: ChecksumMap,
    ) -> LaminaResult<StoredData>;

    async fn store_multipart_data(
        &self,
        bucket: &str,
        key: &str,
        part_bytes: Vec<Bytes>,
    ) -> LaminaResult<StoredData>;

    /// Writes `[start, end]` inclusive (or the whole object if `range` is
    /// `None`) into `out`. Returns `false` without writing on an invalid
    /// range or missing object.
    async fn read_range(
        &self,
        bucket: &str,
        key: &str,
        range: Option<(u64, u64)>,
    ) -> LaminaResult<Option<Bytes>>;

    async fn data_exists(&self, bucket: &str, key: &str) -> bool;

    async fn get_data_info(&self, bucket: &str, key: &str) -> Option<DataInfo>;

    async fn delete_data(&self, bucket: &str, key: &str) -> LaminaResult<bool>;

    async fn copy_data(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        range: Option<(u64, u64)>,
    ) -> LaminaResult<StoredData>;

    /// Every key under `bucket`, in the order the backend chooses to
    /// enumerate (§4.7 leaves Directory-bucket order unspecified).
    async fn list_keys(&self, bucket: &str) -> Vec<String>;
}

/// Object metadata store: optional, may lag or be absent (§4.4, §4.5).
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn put(&self, bucket: &str, key: &str, object: &crate::object::Object) -> LaminaResult<()>;
    async fn get(&self, bucket: &str, key: &str) -> Option<crate::object::Object>;
    async fn delete(&self, bucket: &str, key: &str) -> LaminaResult<bool>;
}

/// Multipart part storage: independently addressable by
/// (bucket, key, uploadId, partNumber) (§3, §4.6).
#[async_trait]
pub trait MultipartStore: Send + Sync {
    async fn initiate(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        user_metadata: std::collections::BTreeMap<String, String>,
        checksum_algorithm: Option<ChecksumAlgorithm>,
    ) -> LaminaResult<String>;

    async fn get_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Option<crate::object::MultipartUpload>;

    async fn put_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u16,
        body: Bytes,
        requested_checksums: &[ChecksumAlgorithm],
    ) -> LaminaResult<UploadPart>;

    /// All stored parts for the upload, ordered by part number.
    async fn list_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Vec<(UploadPart, Bytes)>;

    async fn abort(&self, bucket: &str, key: &str, upload_id: &str) -> LaminaResult<()>;

    /// Idempotent cleanup of part data and initiation metadata after a
    /// successful complete.
    async fn finalize(&self, bucket: &str, key: &str, upload_id: &str) -> LaminaResult<()>;

    /// Distinct object keys with at least one in-progress upload under
    /// `bucket`, feeding the directory-bucket listing merge (§4.7 step 6).
    async fn list_upload_keys(&self, bucket: &str) -> Vec<String>;

    /// Every (key, uploadId) pair with an in-progress upload under `bucket`,
    /// used to abort them all when the bucket itself is deleted.
    async fn list_uploads(&self, bucket: &str) -> Vec<(String, String)>;
}
