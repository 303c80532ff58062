//! Relational-database backend. Bytes and metadata both live in tables;
//! `sqlx` drives the pool, grounded in the `sqlx` stack several
//! server-shaped repos in the supporting corpus use for exactly this kind
//! of polymorphic storage layer. Only compiled when the `backend-database`
//! feature is enabled.

#![cfg(feature = "backend-database")]

use super::{DataInfo, DataStore, MetadataStore, MultipartStore, StoredData};
use crate::checksum::{ChecksumAlgorithm, ChecksumEngine, ChecksumMap};
use crate::error::{ErrorCode, LaminaError, LaminaResult};
use crate::object::{Checksums, MultipartUpload, Object, UploadPart};
use async_trait::async_trait;
use bytes::Bytes;
use sqlx::AnyPool;
use sqlx::Row;
use std::collections::BTreeMap;

pub struct DatabaseStore {
    pool: AnyPool,
}

impl DatabaseStore {
    pub async fn connect(url: &str) -> LaminaResult<Self> {
        sqlx::any::install_default_drivers();
        let pool = AnyPool::connect(url).await.map_err(LaminaError::internal)?;
        let store = DatabaseStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> LaminaResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS objects (
                bucket TEXT NOT NULL,
                key TEXT NOT NULL,
                bytes BLOB NOT NULL,
                etag TEXT NOT NULL,
                last_modified TEXT NOT NULL,
                PRIMARY KEY (bucket, key)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(LaminaError::internal)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS object_metadata (
                bucket TEXT NOT NULL,
                key TEXT NOT NULL,
                json TEXT NOT NULL,
                PRIMARY KEY (bucket, key)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(LaminaError::internal)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS multipart_uploads (
                bucket TEXT NOT NULL,
                key TEXT NOT NULL,
                upload_id TEXT NOT NULL,
                json TEXT NOT NULL,
                PRIMARY KEY (bucket, key, upload_id)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(LaminaError::internal)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS multipart_parts (
                bucket TEXT NOT NULL,
                key TEXT NOT NULL,
                upload_id TEXT NOT NULL,
                part_number INTEGER NOT NULL,
                bytes BLOB NOT NULL,
                etag TEXT NOT NULL,
                checksums TEXT NOT NULL DEFAULT '{}',
                PRIMARY KEY (bucket, key, upload_id, part_number)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(LaminaError::internal)?;

        Ok(())
    }

    fn content_etag(bytes: &[u8]) -> String {
        hex::encode(md5::compute(bytes).0)
    }
}

#[async_trait]
impl DataStore for DatabaseStore {
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
        let now = chrono::Utc::now();
        let size = body.len() as u64;
        sqlx::query(
            "INSERT OR REPLACE INTO objects (bucket, key, bytes, etag, last_modified) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(bucket)
        .bind(key)
        .bind(body.to_vec())
        .bind(&etag)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(LaminaError::internal)?;

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
        let mut total = Vec::new();
        for part in &part_bytes {
            concatenated_etags.extend_from_slice(Self::content_etag(part).as_bytes());
            total.extend_from_slice(part);
        }
        let etag = format!("{}-{}", hex::encode(md5::compute(&concatenated_etags).0), n);
        let size = total.len() as u64;
        let now = chrono::Utc::now();

        sqlx::query(
            "INSERT OR REPLACE INTO objects (bucket, key, bytes, etag, last_modified) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(bucket)
        .bind(key)
        .bind(total)
        .bind(&etag)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(LaminaError::internal)?;

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
        let row = sqlx::query("SELECT bytes FROM objects WHERE bucket = ? AND key = ?")
            .bind(bucket)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(LaminaError::internal)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let data: Vec<u8> = row.try_get("bytes").map_err(LaminaError::internal)?;

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
        sqlx::query("SELECT 1 FROM objects WHERE bucket = ? AND key = ?")
            .bind(bucket)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .ok()
            .flatten()
            .is_some()
    }

    async fn get_data_info(&self, bucket: &str, key: &str) -> Option<DataInfo> {
        let row = sqlx::query(
            "SELECT bytes, etag, last_modified FROM objects WHERE bucket = ? AND key = ?",
        )
        .bind(bucket)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .ok()??;
        let data: Vec<u8> = row.try_get("bytes").ok()?;
        let etag: String = row.try_get("etag").ok()?;
        let last_modified_str: String = row.try_get("last_modified").ok()?;
        let last_modified = chrono::DateTime::parse_from_rfc3339(&last_modified_str)
            .ok()?
            .with_timezone(&chrono::Utc);
        Some(DataInfo {
            size: data.len() as u64,
            last_modified,
            etag,
        })
    }

    async fn delete_data(&self, bucket: &str, key: &str) -> LaminaResult<bool> {
        let result = sqlx::query("DELETE FROM objects WHERE bucket = ? AND key = ?")
            .bind(bucket)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(LaminaError::internal)?;
        Ok(result.rows_affected() > 0)
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
        sqlx::query("SELECT key FROM objects WHERE bucket = ?")
            .bind(bucket)
            .fetch_all(&self.pool)
            .await
            .map(|rows| {
                rows.into_iter()
                    .filter_map(|r| r.try_get::<String, _>("key").ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl MetadataStore for DatabaseStore {
    async fn put(&self, bucket: &str, key: &str, object: &Object) -> LaminaResult<()> {
        let json = serde_json::to_string(object).map_err(LaminaError::internal)?;
        sqlx::query(
            "INSERT OR REPLACE INTO object_metadata (bucket, key, json) VALUES (?, ?, ?)",
        )
        .bind(bucket)
        .bind(key)
        .bind(json)
        .execute(&self.pool)
        .await
        .map_err(LaminaError::internal)?;
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Option<Object> {
        let row = sqlx::query("SELECT json FROM object_metadata WHERE bucket = ? AND key = ?")
            .bind(bucket)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .ok()??;
        let json: String = row.try_get("json").ok()?;
        serde_json::from_str(&json).ok()
    }

    async fn delete(&self, bucket: &str, key: &str) -> LaminaResult<bool> {
        let result = sqlx::query("DELETE FROM object_metadata WHERE bucket = ? AND key = ?")
            .bind(bucket)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(LaminaError::internal)?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl MultipartStore for DatabaseStore {
    async fn initiate(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        user_metadata: BTreeMap<String, String>,
        checksum_algorithm: Option<ChecksumAlgorithm>,
    ) -> LaminaResult<String> {
        let upload_id = uuid::Uuid::new_v4().simple().to_string();
        let upload = MultipartUpload {
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id: upload_id.clone(),
            initiated: chrono::Utc::now(),
            content_type: content_type.to_string(),
            user_metadata,
            checksum_algorithm,
        };
        let json = serde_json::to_string(&upload).map_err(LaminaError::internal)?;
        sqlx::query(
            "INSERT INTO multipart_uploads (bucket, key, upload_id, json) VALUES (?, ?, ?, ?)",
        )
        .bind(bucket)
        .bind(key)
        .bind(&upload_id)
        .bind(json)
        .execute(&self.pool)
        .await
        .map_err(LaminaError::internal)?;
        Ok(upload_id)
    }

    async fn get_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Option<MultipartUpload> {
        let row = sqlx::query(
            "SELECT json FROM multipart_uploads WHERE bucket = ? AND key = ? AND upload_id = ?",
        )
        .bind(bucket)
        .bind(key)
        .bind(upload_id)
        .fetch_optional(&self.pool)
        .await
        .ok()??;
        let json: String = row.try_get("json").ok()?;
        serde_json::from_str(&json).ok()
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
        let etag = Self::content_etag(&body);
        let checksums = Checksums::from_map(&outcome.computed);
        let checksums_json = serde_json::to_string(&checksums).map_err(LaminaError::internal)?;

        sqlx::query(
            "INSERT OR REPLACE INTO multipart_parts (bucket, key, upload_id, part_number, bytes, etag, checksums) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(bucket)
        .bind(key)
        .bind(upload_id)
        .bind(part_number as i64)
        .bind(body.to_vec())
        .bind(&etag)
        .bind(&checksums_json)
        .execute(&self.pool)
        .await
        .map_err(LaminaError::internal)?;

        Ok(UploadPart {
            part_number,
            size: body.len() as u64,
            etag,
            checksums,
            last_modified: chrono::Utc::now(),
        })
    }

    async fn list_parts(&self, bucket: &str, key: &str, upload_id: &str) -> Vec<(UploadPart, Bytes)> {
        let rows = sqlx::query(
            "SELECT part_number, bytes, etag, checksums FROM multipart_parts WHERE bucket = ? AND key = ? AND upload_id = ? ORDER BY part_number",
        )
        .bind(bucket)
        .bind(key)
        .bind(upload_id)
        .fetch_all(&self.pool)
        .await
        .unwrap_or_default();

        rows.into_iter()
            .filter_map(|row| {
                let part_number: i64 = row.try_get("part_number").ok()?;
                let bytes: Vec<u8> = row.try_get("bytes").ok()?;
                let etag: String = row.try_get("etag").ok()?;
                let checksums = row
                    .try_get::<String, _>("checksums")
                    .ok()
                    .and_then(|json| serde_json::from_str(&json).ok())
                    .unwrap_or_default();
                let body = Bytes::from(bytes);
                Some((
                    UploadPart {
                        part_number: part_number as u16,
                        size: body.len() as u64,
                        etag,
                        checksums,
                        last_modified: chrono::Utc::now(),
                    },
                    body,
                ))
            })
            .collect()
    }

    async fn abort(&self, bucket: &str, key: &str, upload_id: &str) -> LaminaResult<()> {
        self.finalize(bucket, key, upload_id).await
    }

    async fn finalize(&self, bucket: &str, key: &str, upload_id: &str) -> LaminaResult<()> {
        sqlx::query(
            "DELETE FROM multipart_parts WHERE bucket = ? AND key = ? AND upload_id = ?",
        )
        .bind(bucket)
        .bind(key)
        .bind(upload_id)
        .execute(&self.pool)
        .await
        .map_err(LaminaError::internal)?;
        sqlx::query(
            "DELETE FROM multipart_uploads WHERE bucket = ? AND key = ? AND upload_id = ?",
        )
        .bind(bucket)
        .bind(key)
        .bind(upload_id)
        .execute(&self.pool)
        .await
        .map_err(LaminaError::internal)?;
        Ok(())
    }

    async fn list_upload_keys(&self, bucket: &str) -> Vec<String> {
        sqlx::query("SELECT DISTINCT key FROM multipart_uploads WHERE bucket = ?")
            .bind(bucket)
            .fetch_all(&self.pool)
            .await
            .map(|rows| {
                rows.into_iter()
                    .filter_map(|r| r.try_get::<String, _>("key").ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn list_uploads(&self, bucket: &str) -> Vec<(String, String)> {
        sqlx::query("SELECT key, upload_id FROM multipart_uploads WHERE bucket = ?")
            .bind(bucket)
            .fetch_all(&self.pool)
            .await
            .map(|rows| {
                rows.into_iter()
                    .filter_map(|r| {
                        let key = r.try_get::<String, _>("key").ok()?;
                        let upload_id = r.try_get::<String, _>("upload_id").ok()?;
                        Some((key, upload_id))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}
