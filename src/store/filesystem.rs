//! Filesystem backend: one file per object under a configured data root,
//! with per-key writes serialized by an in-process lock (§5 "the filesystem
//! backend serializes writes per-key with a file lock and permits
//! concurrent reads").

use super::{DataInfo, DataStore, MetadataStore, MultipartStore, StoredData};
use crate::checksum::{ChecksumAlgorithm, ChecksumEngine, ChecksumMap};
use crate::error::{ErrorCode, LaminaError, LaminaResult};
use crate::object::{Checksums, MultipartUpload, Object, UploadPart};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;

pub struct FilesystemDataStore {
    root: PathBuf,
    locks: DashMap<(String, String), Arc<Mutex<()>>>,
}

impl FilesystemDataStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FilesystemDataStore {
            root: root.into(),
            locks: DashMap::new(),
        }
    }

    fn path_for(&self, bucket: &str, key: &str) -> PathBuf {
        self.root.join(bucket).join(key)
    }

    fn lock_for(&self, bucket: &str, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry((bucket.to_string(), key.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn content_etag(bytes: &[u8]) -> String {
        hex::encode(md5::compute(bytes).0)
    }
}

#[async_trait]
impl DataStore for FilesystemDataStore {
    async fn store_data(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        requested_checksums: &[ChecksumAlgorithm],
        expected_checksums: ChecksumMap,
    ) -> LaminaResult<StoredData> {
        let mut engine = ChecksumEngine::new(requested_checksums, expected_checksums);
        engine.append(&body);
        let outcome = engine.finish();
        if let Some(mismatch) = outcome.mismatched {
            return Err(LaminaError::new(
                ErrorCode::InvalidChecksum,
                format!("{mismatch} checksum does not match"),
            ));
        }

        let etag = Self::content_etag(&body);
        let path = self.path_for(bucket, key);
        let lock = self.lock_for(bucket, key);
        let _guard = lock.lock().await;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(LaminaError::internal)?;
        }
        let size = body.len() as u64;
        fs::write(&path, &body).await.map_err(LaminaError::internal)?;

        Ok(StoredData {
            size,
            etag,
            checksums: outcome.computed,
        })
    }

    async fn store_multipart_data(
        &self,
        bucket: &str,
        key: &str,
        part_bytes: Vec<Bytes>,
    ) -> LaminaResult<StoredData> {
        let n = part_bytes.len();
        let mut concatenated_etags = Vec::new();
        let mut total = Vec::with_capacity(part_bytes.iter().map(|b| b.len()).sum());
        for part in &part_bytes {
            concatenated_etags.extend_from_slice(Self::content_etag(part).as_bytes());
            total.extend_from_slice(part);
        }
        let etag = format!("{}-{}", hex::encode(md5::compute(&concatenated_etags).0), n);

        let path = self.path_for(bucket, key);
        let lock = self.lock_for(bucket, key);
        let _guard = lock.lock().await;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(LaminaError::internal)?;
        }
        let size = total.len() as u64;
        fs::write(&path, &total).await.map_err(LaminaError::internal)?;

        Ok(StoredData {
            size,
            etag,
            checksums: ChecksumMap::new(),
        })
    }

    async fn read_range(
        &self,
        bucket: &str,
        key: &str,
        range: Option<(u64, u64)>,
    ) -> LaminaResult<Option<Bytes>> {
        let path = self.path_for(bucket, key);
        let data = match fs::read(&path).await {
            Ok(d) => d,
            Err(_) => return Ok(None),
        };
        match range {
            None => Ok(Some(Bytes::from(data))),
            Some((start, end)) => {
                let size = data.len() as u64;
                if start > end || end >= size {
                    return Ok(None);
                }
                Ok(Some(Bytes::from(
                    data[start as usize..=end as usize].to_vec(),
                )))
            }
        }
    }

    async fn data_exists(&self, bucket: &str, key: &str) -> bool {
        fs::metadata(self.path_for(bucket, key)).await.is_ok()
    }

    async fn get_data_info(&self, bucket: &str, key: &str) -> Option<DataInfo> {
        let path = self.path_for(bucket, key);
        let meta = fs::metadata(&path).await.ok()?;
        let data = fs::read(&path).await.ok()?;
        let modified = meta.modified().ok()?;
        Some(DataInfo {
            size: meta.len(),
            last_modified: chrono::DateTime::from(modified),
            etag: Self::content_etag(&data),
        })
    }

    async fn delete_data(&self, bucket: &str, key: &str) -> LaminaResult<bool> {
        let path = self.path_for(bucket, key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(LaminaError::internal(e)),
        }
    }

    async fn copy_data(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        range: Option<(u64, u64)>,
    ) -> LaminaResult<StoredData> {
        let bytes = self
            .read_range(src_bucket, src_key, range)
            .await?
            .ok_or_else(|| LaminaError::new(ErrorCode::NoSuchKey, "no such key"))?;
        self.store_data(dst_bucket, dst_key, bytes, &[], ChecksumMap::new())
            .await
    }

    async fn list_keys(&self, bucket: &str) -> Vec<String> {
        let dir = self.root.join(bucket);
        let mut keys = Vec::new();
        let mut stack = vec![dir.clone()];
        while let Some(current) = stack.pop() {
            let Ok(mut entries) = fs::read_dir(&current).await else {
                continue;
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if let Ok(relative) = path.strip_prefix(&dir) {
                    if let Some(s) = relative.to_str() {
                        keys.push(s.replace(std::path::MAIN_SEPARATOR, "/"));
                    }
                }
            }
        }
        keys
    }
}

pub struct FilesystemMetadataStore {
    root: PathBuf,
}

impl FilesystemMetadataStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FilesystemMetadataStore { root: root.into() }
    }

    fn path_for(&self, bucket: &str, key: &str) -> PathBuf {
        self.root
            .join(".lamina-meta")
            .join(bucket)
            .join(format!("{key}.json"))
    }
}

#[async_trait]
impl MetadataStore for FilesystemMetadataStore {
    async fn put(&self, bucket: &str, key: &str, object: &Object) -> LaminaResult<()> {
        let path = self.path_for(bucket, key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(LaminaError::internal)?;
        }
        let json = serde_json::to_vec(object).map_err(LaminaError::internal)?;
        fs::write(&path, json).await.map_err(LaminaError::internal)
    }

    async fn get(&self, bucket: &str, key: &str) -> Option<Object> {
        let data = fs::read(self.path_for(bucket, key)).await.ok()?;
        serde_json::from_slice(&data).ok()
    }

    async fn delete(&self, bucket: &str, key: &str) -> LaminaResult<bool> {
        match fs::remove_file(self.path_for(bucket, key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(LaminaError::internal(e)),
        }
    }
}

/// Multipart parts land under a side directory keyed by upload id; small
/// deployments only, matching the ancestor's preference for simple
/// filesystem layouts over a dedicated staging area.
pub struct FilesystemMultipartStore {
    root: PathBuf,
    uploads: DashMap<(String, String, String), MultipartUpload>,
}

impl FilesystemMultipartStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FilesystemMultipartStore {
            root: root.into(),
            uploads: DashMap::new(),
        }
    }

    fn part_path(&self, bucket: &str, key: &str, upload_id: &str, part_number: u16) -> PathBuf {
        self.root
            .join(".lamina-multipart")
            .join(bucket)
            .join(key)
            .join(upload_id)
            .join(format!("{part_number:05}"))
    }

    fn part_checksums_path(&self, bucket: &str, key: &str, upload_id: &str, part_number: u16) -> PathBuf {
        self.part_path(bucket, key, upload_id, part_number)
            .with_extension("checksums.json")
    }

    fn parts_dir(&self, bucket: &str, key: &str, upload_id: &str) -> PathBuf {
        self.root
            .join(".lamina-multipart")
            .join(bucket)
            .join(key)
            .join(upload_id)
    }
}

#[async_trait]
impl MultipartStore for FilesystemMultipartStore {
    async fn initiate(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        user_metadata: BTreeMap<String, String>,
        checksum_algorithm: Option<ChecksumAlgorithm>,
    ) -> LaminaResult<String> {
        let upload_id = uuid::Uuid::new_v4().simple().to_string();
        self.uploads.insert(
            (bucket.to_string(), key.to_string(), upload_id.clone()),
            MultipartUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                upload_id: upload_id.clone(),
                initiated: chrono::Utc::now(),
                content_type: content_type.to_string(),
                user_metadata,
                checksum_algorithm,
            },
        );
        Ok(upload_id)
    }

    async fn get_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Option<MultipartUpload> {
        self.uploads
            .get(&(bucket.to_string(), key.to_string(), upload_id.to_string()))
            .map(|e| e.clone())
    }

    async fn put_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u16,
        body: Bytes,
        requested_checksums: &[ChecksumAlgorithm],
    ) -> LaminaResult<UploadPart> {
        let mut engine = ChecksumEngine::new(requested_checksums, ChecksumMap::new());
        engine.append(&body);
        let outcome = engine.finish();
        let etag = hex::encode(md5::compute(&body).0);

        let path = self.part_path(bucket, key, upload_id, part_number);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(LaminaError::internal)?;
        }
        fs::write(&path, &body).await.map_err(LaminaError::internal)?;

        let checksums = Checksums::from_map(&outcome.computed);
        let checksums_json = serde_json::to_vec(&checksums).map_err(LaminaError::internal)?;
        fs::write(
            self.part_checksums_path(bucket, key, upload_id, part_number),
            checksums_json,
        )
        .await
        .map_err(LaminaError::internal)?;

        self.uploads
            .entry((bucket.to_string(), key.to_string(), upload_id.to_string()))
            .or_insert_with(|| MultipartUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                upload_id: upload_id.to_string(),
                initiated: chrono::Utc::now(),
                content_type: "application/octet-stream".to_string(),
                user_metadata: BTreeMap::new(),
                checksum_algorithm: None,
            });

        Ok(UploadPart {
            part_number,
            size: body.len() as u64,
            etag,
            checksums,
            last_modified: chrono::Utc::now(),
        })
    }

    async fn list_parts(&self, bucket: &str, key: &str, upload_id: &str) -> Vec<(UploadPart, Bytes)> {
        let dir = self.parts_dir(bucket, key, upload_id);
        let Ok(mut entries) = fs::read_dir(&dir).await else {
            return Vec::new();
        };
        let mut parts = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Ok(part_number) = name.parse::<u16>() else {
                continue;
            };
            let Ok(body) = fs::read(entry.path()).await else {
                continue;
            };
            let body = Bytes::from(body);
            let etag = hex::encode(md5::compute(&body).0);
            let checksums = match fs::read(self.part_checksums_path(bucket, key, upload_id, part_number)).await {
                Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
                Err(_) => Checksums::default(),
            };
            parts.push((
                UploadPart {
                    part_number,
                    size: body.len() as u64,
                    etag,
                    checksums,
                    last_modified: chrono::Utc::now(),
                },
                body,
            ));
        }
        parts.sort_by_key(|(p, _)| p.part_number);
        parts
    }

    async fn abort(&self, bucket: &str, key: &str, upload_id: &str) -> LaminaResult<()> {
        let _ = fs::remove_dir_all(self.parts_dir(bucket, key, upload_id)).await;
        self.uploads
            .remove(&(bucket.to_string(), key.to_string(), upload_id.to_string()));
        Ok(())
    }

    async fn finalize(&self, bucket: &str, key: &str, upload_id: &str) -> LaminaResult<()> {
        self.abort(bucket, key, upload_id).await
    }

    async fn list_upload_keys(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .uploads
            .iter()
            .filter(|e| e.key().0 == bucket)
            .map(|e| e.key().1.clone())
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    async fn list_uploads(&self, bucket: &str) -> Vec<(String, String)> {
        self.uploads
            .iter()
            .filter(|e| e.key().0 == bucket)
            .map(|e| (e.key().1.clone(), e.key().2.clone()))
            .collect()
    }
}
