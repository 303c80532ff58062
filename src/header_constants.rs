//! HTTP header name constants used by the wire protocol.

pub const CONTENT_TYPE: &str = "content-type";
pub const CONTENT_LENGTH: &str = "content-length";
pub const CONTENT_MD5: &str = "content-md5";
pub const AUTHORIZATION: &str = "authorization";
pub const RANGE: &str = "range";
pub const HOST: &str = "host";

pub const X_AMZ_DATE: &str = "x-amz-date";
pub const X_AMZ_CONTENT_SHA256: &str = "x-amz-content-sha256";
pub const X_AMZ_DECODED_CONTENT_LENGTH: &str = "x-amz-decoded-content-length";
pub const X_AMZ_TRAILER: &str = "x-amz-trailer";
pub const X_AMZ_SECURITY_TOKEN: &str = "x-amz-security-token";

pub const X_AMZ_COPY_SOURCE: &str = "x-amz-copy-source";
pub const X_AMZ_COPY_SOURCE_RANGE: &str = "x-amz-copy-source-range";
pub const X_AMZ_METADATA_DIRECTIVE: &str = "x-amz-metadata-directive";

pub const X_AMZ_CHECKSUM_CRC32: &str = "x-amz-checksum-crc32";
pub const X_AMZ_CHECKSUM_CRC32C: &str = "x-amz-checksum-crc32c";
pub const X_AMZ_CHECKSUM_CRC64NVME: &str = "x-amz-checksum-crc64nvme";
pub const X_AMZ_CHECKSUM_SHA1: &str = "x-amz-checksum-sha1";
pub const X_AMZ_CHECKSUM_SHA256: &str = "x-amz-checksum-sha256";
pub const X_AMZ_CHECKSUM_ALGORITHM: &str = "x-amz-sdk-checksum-algorithm";

pub const X_AMZ_META_PREFIX: &str = "x-amz-meta-";

pub const STREAMING_UNSIGNED_PAYLOAD_TRAILER: &str = "STREAMING-UNSIGNED-PAYLOAD-TRAILER";
pub const STREAMING_SIGNED_PAYLOAD: &str = "STREAMING-AWS4-HMAC-SHA256-PAYLOAD";
pub const STREAMING_SIGNED_PAYLOAD_TRAILER: &str = "STREAMING-AWS4-HMAC-SHA256-PAYLOAD-TRAILER";
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";
