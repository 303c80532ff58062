//! Object Facade (§4.5): the single orchestration point between the data
//! store (source of truth for existence) and the metadata store (an
//! optional, possibly-lagging enrichment layer). Every read synthesizes an
//! `Object` from data-store facts first and layers metadata on top; every
//! write stores data before metadata so a crash mid-write never produces
//! metadata for bytes that were never persisted.

use crate::bucket::SharedBucketRegistry;
use crate::cache::MetadataCache;
use crate::checksum::{ChecksumAlgorithm, ChecksumMap};
use crate::content_type;
use crate::error::{ErrorCode, LaminaError, LaminaResult};
use crate::object::{Checksums, Object};
use crate::store::{DataStore, MetadataStore};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn cancelled() -> LaminaError {
    LaminaError::new(ErrorCode::RequestCancelled, "request was cancelled")
}

pub enum MetadataDirective {
    Copy,
    Replace,
}

/// True iff the caller supplied an explicit content type that differs
/// (case-insensitively) from the extension-derived default, or supplied
/// any user metadata entries.
fn should_store_metadata(
    explicit_content_type: Option<&str>,
    inferred_content_type: &str,
    user_metadata: &BTreeMap<String, String>,
) -> bool {
    let content_type_differs = explicit_content_type
        .is_some_and(|ct| !ct.eq_ignore_ascii_case(inferred_content_type));
    content_type_differs || !user_metadata.is_empty()
}

pub struct ObjectFacade {
    data: Arc<dyn DataStore>,
    metadata: Arc<dyn MetadataStore>,
    buckets: SharedBucketRegistry,
    cache: Arc<MetadataCache>,
}

impl ObjectFacade {
    pub fn new(
        data: Arc<dyn DataStore>,
        metadata: Arc<dyn MetadataStore>,
        buckets: SharedBucketRegistry,
        cache: Arc<MetadataCache>,
    ) -> Self {
        ObjectFacade {
            data,
            metadata,
            buckets,
            cache,
        }
    }

    pub async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<String>,
        user_metadata: BTreeMap<String, String>,
        requested_checksums: &[ChecksumAlgorithm],
        expected_checksums: ChecksumMap,
        cancel: &CancellationToken,
    ) -> LaminaResult<Object> {
        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        if !self.buckets.exists(bucket) {
            return Err(LaminaError::new(ErrorCode::NoSuchBucket, "no such bucket").with_resource(bucket));
        }

        let stored = tokio::select! {
            res = self.data.store_data(bucket, key, body, requested_checksums, expected_checksums) => res?,
            _ = cancel.cancelled() => return Err(cancelled()),
        };

        let inferred_content_type = content_type::infer_from_key(key).to_string();
        let should_store_metadata = should_store_metadata(content_type.as_deref(), &inferred_content_type, &user_metadata);
        let content_type = content_type.unwrap_or(inferred_content_type);

        let object = Object {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size: stored.size,
            last_modified: chrono::Utc::now(),
            etag: stored.etag,
            content_type,
            user_metadata,
            owner_id: None,
            owner_display_name: None,
            checksums: Checksums::from_map(&stored.checksums),
        };

        if should_store_metadata {
            if let Err(err) = self.metadata.put(bucket, key, &object).await {
                tracing::warn!(bucket, key, error = %err, "rolling back data write after metadata write failed");
                self.data.delete_data(bucket, key).await?;
                return Err(LaminaError::new(
                    ErrorCode::InternalError,
                    "failed to persist object metadata",
                ));
            }
            self.cache.put(object.clone(), object.last_modified);
        }

        Ok(object)
    }

    pub async fn get_object_info(
        &self,
        bucket: &str,
        key: &str,
        cancel: &CancellationToken,
    ) -> LaminaResult<Object> {
        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        let Some(info) = self.data.get_data_info(bucket, key).await else {
            return Err(LaminaError::new(ErrorCode::NoSuchKey, "no such key").with_resource(key));
        };

        if let Some(cached) = self.cache.get(bucket, key, info.last_modified) {
            return Ok(cached);
        }

        let object = match self.metadata.get(bucket, key).await {
            Some(mut object) if object.etag == info.etag => {
                object.size = info.size;
                object.last_modified = info.last_modified;
                object
            }
            // No metadata on record, or it has gone stale relative to the
            // data store: synthesize a minimal object from data-store facts
            // alone (§4.5 data-first synthesis).
            _ => Object {
                bucket: bucket.to_string(),
                key: key.to_string(),
                size: info.size,
                last_modified: info.last_modified,
                etag: info.etag,
                content_type: content_type::infer_from_key(key).to_string(),
                user_metadata: BTreeMap::new(),
                owner_id: None,
                owner_display_name: None,
                checksums: Checksums::default(),
            },
        };

        self.cache.put(object.clone(), object.last_modified);
        Ok(object)
    }

    pub async fn read_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<(u64, u64)>,
        cancel: &CancellationToken,
    ) -> LaminaResult<Bytes> {
        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        let result = tokio::select! {
            res = self.data.read_range(bucket, key, range) => res,
            _ = cancel.cancelled() => return Err(cancelled()),
        };
        result?.ok_or_else(|| LaminaError::new(ErrorCode::NoSuchKey, "no such key").with_resource(key))
    }

    pub async fn delete_object(&self, bucket: &str, key: &str, cancel: &CancellationToken) -> LaminaResult<()> {
        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        tokio::select! {
            res = self.data.delete_data(bucket, key) => res?,
            _ = cancel.cancelled() => return Err(cancelled()),
        };
        self.metadata.delete(bucket, key).await?;
        self.cache.invalidate(bucket, key);
        Ok(())
    }

    pub async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        directive: MetadataDirective,
        replacement_content_type: Option<String>,
        replacement_metadata: Option<BTreeMap<String, String>>,
        cancel: &CancellationToken,
    ) -> LaminaResult<Object> {
        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        if !self.buckets.exists(dst_bucket) {
            return Err(
                LaminaError::new(ErrorCode::NoSuchBucket, "no such bucket").with_resource(dst_bucket),
            );
        }

        let source_object = self.get_object_info(src_bucket, src_key, cancel).await?;
        let stored = tokio::select! {
            res = self.data.copy_data(src_bucket, src_key, dst_bucket, dst_key, None) => res?,
            _ = cancel.cancelled() => return Err(cancelled()),
        };

        let (content_type, user_metadata) = match directive {
            MetadataDirective::Copy => (source_object.content_type, source_object.user_metadata),
            MetadataDirective::Replace => (
                replacement_content_type.unwrap_or(source_object.content_type),
                replacement_metadata.unwrap_or_default(),
            ),
        };

        let inferred_content_type = content_type::infer_from_key(dst_key).to_string();
        let should_store_metadata =
            should_store_metadata(Some(content_type.as_str()), &inferred_content_type, &user_metadata);

        let object = Object {
            bucket: dst_bucket.to_string(),
            key: dst_key.to_string(),
            size: stored.size,
            last_modified: chrono::Utc::now(),
            etag: stored.etag,
            content_type,
            user_metadata,
            owner_id: source_object.owner_id,
            owner_display_name: source_object.owner_display_name,
            checksums: Checksums::from_map(&stored.checksums),
        };

        if should_store_metadata {
            if let Err(err) = self.metadata.put(dst_bucket, dst_key, &object).await {
                tracing::warn!(bucket = dst_bucket, key = dst_key, error = %err, "rolling back copied data after metadata write failed");
                self.data.delete_data(dst_bucket, dst_key).await?;
                return Err(LaminaError::new(
                    ErrorCode::InternalError,
                    "failed to persist object metadata",
                ));
            }
            self.cache.put(object.clone(), object.last_modified);
        }
        Ok(object)
    }

    pub async fn copy_object_part(
        &self,
        src_bucket: &str,
        src_key: &str,
        range: Option<(u64, u64)>,
        cancel: &CancellationToken,
    ) -> LaminaResult<Bytes> {
        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        let result = tokio::select! {
            res = self.data.read_range(src_bucket, src_key, range) => res,
            _ = cancel.cancelled() => return Err(cancelled()),
        };
        result?.ok_or_else(|| LaminaError::new(ErrorCode::InvalidRange, "invalid copy source range"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::BucketRegistry;
    use crate::store::memory::{MemoryDataStore, MemoryMetadataStore};

    fn facade() -> ObjectFacade {
        let registry = Arc::new(BucketRegistry::new());
        registry
            .create("b", crate::object::BucketType::GeneralPurpose, None)
            .unwrap();
        ObjectFacade::new(
            Arc::new(MemoryDataStore::new()),
            Arc::new(MemoryMetadataStore::new()),
            registry,
            Arc::new(MetadataCache::new(1_000_000)),
        )
    }

    #[tokio::test]
    async fn put_then_get_round_trips_content_type() {
        let facade = facade();
        let cancel = CancellationToken::new();
        let object = facade
            .put_object(
                "b",
                "notes.txt",
                Bytes::from_static(b"hello"),
                None,
                BTreeMap::new(),
                &[],
                ChecksumMap::new(),
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(object.content_type, "text/plain");

        let fetched = facade.get_object_info("b", "notes.txt", &cancel).await.unwrap();
        assert_eq!(fetched.etag, object.etag);
    }

    #[tokio::test]
    async fn get_missing_key_is_no_such_key() {
        let facade = facade();
        let cancel = CancellationToken::new();
        let err = facade
            .get_object_info("b", "missing", &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::NoSuchKey);
    }

    #[tokio::test]
    async fn copy_replace_overrides_content_type() {
        let facade = facade();
        let cancel = CancellationToken::new();
        facade
            .put_object(
                "b",
                "src",
                Bytes::from_static(b"payload"),
                Some("application/octet-stream".to_string()),
                BTreeMap::new(),
                &[],
                ChecksumMap::new(),
                &cancel,
            )
            .await
            .unwrap();

        let copied = facade
            .copy_object(
                "b",
                "src",
                "b",
                "dst",
                MetadataDirective::Replace,
                Some("text/plain".to_string()),
                Some(BTreeMap::new()),
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(copied.content_type, "text/plain");
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits_put() {
        let facade = facade();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = facade
            .put_object(
                "b",
                "notes.txt",
                Bytes::from_static(b"hello"),
                None,
                BTreeMap::new(),
                &[],
                ChecksumMap::new(),
                &cancel,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::RequestCancelled);
    }
}
