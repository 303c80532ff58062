//! Multipart upload state machine (§4.6): Initiated → Parts-Accumulating →
//! Completed | Aborted, data-first throughout.

use crate::checksum::{ChecksumAlgorithm, aggregate};
use crate::error::{ErrorCode, LaminaError, LaminaResult};
use crate::object::{Checksums, MultipartUpload, Object, UploadPart, MAX_PART_COUNT, MIN_PART_SIZE};
use crate::store::{DataStore, MetadataStore, MultipartStore};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn cancelled() -> LaminaError {
    LaminaError::new(ErrorCode::RequestCancelled, "request was cancelled")
}

pub struct MultipartEngine {
    data: Arc<dyn DataStore>,
    metadata: Arc<dyn MetadataStore>,
    multipart: Arc<dyn MultipartStore>,
}

/// One declared part in a `CompleteMultipartUpload` request.
pub struct DeclaredPart {
    pub part_number: u16,
    pub etag: String,
}

impl MultipartEngine {
    pub fn new(
        data: Arc<dyn DataStore>,
        metadata: Arc<dyn MetadataStore>,
        multipart: Arc<dyn MultipartStore>,
    ) -> Self {
        MultipartEngine {
            data,
            metadata,
            multipart,
        }
    }

    pub async fn initiate(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        user_metadata: BTreeMap<String, String>,
        checksum_algorithm: Option<ChecksumAlgorithm>,
        cancel: &CancellationToken,
    ) -> LaminaResult<String> {
        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        tokio::select! {
            res = self.multipart.initiate(bucket, key, content_type, user_metadata, checksum_algorithm) => res,
            _ = cancel.cancelled() => Err(cancelled()),
        }
    }

    pub async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u16,
        body: Bytes,
        requested_checksums: &[ChecksumAlgorithm],
        cancel: &CancellationToken,
    ) -> LaminaResult<UploadPart> {
        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        if !(1..=MAX_PART_COUNT).contains(&part_number) {
            return Err(LaminaError::new(
                ErrorCode::InvalidArgument,
                "part number out of range",
            ));
        }
        // Data-first: missing initiation metadata never blocks the part
        // upload (§4.6); the backend synthesizes defaults if needed.
        tokio::select! {
            res = self.multipart.put_part(bucket, key, upload_id, part_number, body, requested_checksums) => res,
            _ = cancel.cancelled() => Err(cancelled()),
        }
    }

    pub async fn complete(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        declared: &[DeclaredPart],
        cancel: &CancellationToken,
    ) -> LaminaResult<Object> {
        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        let stored = self.multipart.list_parts(bucket, key, upload_id).await;
        if stored.is_empty() {
            return Err(LaminaError::new(ErrorCode::NoSuchUpload, "no such upload"));
        }

        let mut previous_number = 0u16;
        for d in declared {
            if d.part_number <= previous_number {
                return Err(LaminaError::new(
                    ErrorCode::InvalidPartOrder,
                    "parts must strictly ascend by part number",
                ));
            }
            previous_number = d.part_number;
        }

        let by_number: BTreeMap<u16, &(UploadPart, Bytes)> =
            stored.iter().map(|p| (p.0.part_number, p)).collect();

        let mut ordered_parts = Vec::with_capacity(declared.len());
        for (idx, d) in declared.iter().enumerate() {
            let Some((part, body)) = by_number.get(&d.part_number) else {
                return Err(LaminaError::new(ErrorCode::InvalidPart, "part not found"));
            };
            if part.etag != d.etag {
                return Err(LaminaError::new(
                    ErrorCode::InvalidPart,
                    "declared etag does not match stored part",
                ));
            }
            let is_last = idx == declared.len() - 1;
            if !is_last && part.size < MIN_PART_SIZE {
                return Err(LaminaError::new(
                    ErrorCode::EntityTooSmall,
                    "non-final part smaller than the minimum part size",
                ));
            }
            ordered_parts.push((part.clone(), body.clone()));
        }

        let bodies: Vec<Bytes> = ordered_parts.iter().map(|(_, b)| b.clone()).collect();
        let stored_result = tokio::select! {
            res = self.data.store_multipart_data(bucket, key, bodies) => res?,
            _ = cancel.cancelled() => return Err(cancelled()),
        };

        let upload = self.multipart.get_upload(bucket, key, upload_id).await;
        let (content_type, user_metadata) = match &upload {
            Some(u) => (u.content_type.clone(), u.user_metadata.clone()),
            None => ("application/octet-stream".to_string(), BTreeMap::new()),
        };

        let checksums = aggregate_parts(&ordered_parts.iter().map(|(p, _)| p.clone()).collect::<Vec<_>>());

        let object = Object {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size: stored_result.size,
            last_modified: chrono::Utc::now(),
            etag: stored_result.etag,
            content_type,
            user_metadata,
            owner_id: None,
            owner_display_name: None,
            checksums,
        };
        self.metadata.put(bucket, key, &object).await?;

        // Idempotent cleanup; missing initiation metadata is not an error.
        self.multipart.finalize(bucket, key, upload_id).await?;

        Ok(object)
    }

    pub async fn abort(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        cancel: &CancellationToken,
    ) -> LaminaResult<()> {
        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        tokio::select! {
            res = self.multipart.abort(bucket, key, upload_id) => res,
            _ = cancel.cancelled() => Err(cancelled()),
        }
    }

    pub async fn get_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Option<MultipartUpload> {
        self.multipart.get_upload(bucket, key, upload_id).await
    }
}

fn aggregate_parts(parts: &[UploadPart]) -> Checksums {
    let extract = |f: fn(&Checksums) -> &Option<String>| -> Vec<Option<String>> {
        parts.iter().map(|p| f(&p.checksums).clone()).collect()
    };

    Checksums {
        crc32: aggregate(ChecksumAlgorithm::Crc32, &extract(|c| &c.crc32)),
        crc32c: aggregate(ChecksumAlgorithm::Crc32c, &extract(|c| &c.crc32c)),
        crc64nvme: aggregate(ChecksumAlgorithm::Crc64Nvme, &extract(|c| &c.crc64nvme)),
        sha1: aggregate(ChecksumAlgorithm::Sha1, &extract(|c| &c.sha1)),
        sha256: aggregate(ChecksumAlgorithm::Sha256, &extract(|c| &c.sha256)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{MemoryDataStore, MemoryMetadataStore, MemoryMultipartStore};

    fn engine() -> MultipartEngine {
        MultipartEngine::new(
            Arc::new(MemoryDataStore::new()),
            Arc::new(MemoryMetadataStore::new()),
            Arc::new(MemoryMultipartStore::new()),
        )
    }

    #[tokio::test]
    async fn two_part_complete_concatenates_in_order() {
        let engine = engine();
        let cancel = CancellationToken::new();
        let upload_id = engine
            .initiate("b", "k", "text/plain", BTreeMap::new(), None, &cancel)
            .await
            .unwrap();

        let p1 = engine
            .upload_part("b", "k", &upload_id, 1, Bytes::from_static(b"part1 data"), &[], &cancel)
            .await
            .unwrap();
        let p2 = engine
            .upload_part("b", "k", &upload_id, 2, Bytes::from_static(b"part2 data"), &[], &cancel)
            .await
            .unwrap();

        let object = engine
            .complete(
                "b",
                "k",
                &upload_id,
                &[
                    DeclaredPart {
                        part_number: 1,
                        etag: p1.etag,
                    },
                    DeclaredPart {
                        part_number: 2,
                        etag: p2.etag,
                    },
                ],
                &cancel,
            )
            .await
            .unwrap();

        assert!(object.etag.ends_with("-2"));
    }

    #[tokio::test]
    async fn etag_mismatch_is_rejected() {
        let engine = engine();
        let cancel = CancellationToken::new();
        let upload_id = engine
            .initiate("b", "k", "text/plain", BTreeMap::new(), None, &cancel)
            .await
            .unwrap();
        engine
            .upload_part("b", "k", &upload_id, 1, Bytes::from_static(b"part1 data"), &[], &cancel)
            .await
            .unwrap();

        let err = engine
            .complete(
                "b",
                "k",
                &upload_id,
                &[DeclaredPart {
                    part_number: 1,
                    etag: "wrong".to_string(),
                }],
                &cancel,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidPart);
    }

    #[tokio::test]
    async fn out_of_order_parts_are_rejected() {
        let engine = engine();
        let cancel = CancellationToken::new();
        let upload_id = engine
            .initiate("b", "k", "text/plain", BTreeMap::new(), None, &cancel)
            .await
            .unwrap();
        let p1 = engine
            .upload_part("b", "k", &upload_id, 1, Bytes::from_static(b"a"), &[], &cancel)
            .await
            .unwrap();
        let p2 = engine
            .upload_part("b", "k", &upload_id, 2, Bytes::from_static(b"b"), &[], &cancel)
            .await
            .unwrap();

        let err = engine
            .complete(
                "b",
                "k",
                &upload_id,
                &[
                    DeclaredPart {
                        part_number: 2,
                        etag: p2.etag,
                    },
                    DeclaredPart {
                        part_number: 1,
                        etag: p1.etag,
                    },
                ],
                &cancel,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidPartOrder);
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits_initiate() {
        let engine = engine();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = engine
            .initiate("b", "k", "text/plain", BTreeMap::new(), None, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::RequestCancelled);
    }
}
