//! Request handlers wiring the SigV4 authenticator, chunked-payload
//! decoder, object facade, multipart engine, and list engine to the wire.

use super::AppState;
use super::xml;
use crate::chunked::ChunkedBodyParser;
use crate::error::{ErrorCode, LaminaError, LaminaResult};
use crate::facade::MetadataDirective;
use crate::header_constants::*;
use crate::multimap::{Multimap, MultimapExt};
use crate::multipart::DeclaredPart;
use crate::object::Permission;
use axum::extract::{Path, Query, RawQuery, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;

fn headers_to_multimap(headers: &HeaderMap) -> Multimap {
    let mut map = Multimap::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            map.add(name.as_str().to_lowercase(), value.to_string());
        }
    }
    map
}

fn query_to_multimap(query: &str) -> Multimap {
    let mut map = Multimap::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let mut it = pair.splitn(2, '=');
        let k = it.next().unwrap_or_default();
        let v = it.next().unwrap_or_default();
        map.add(
            urlencoding::decode(k).unwrap_or_default().into_owned(),
            urlencoding::decode(v).unwrap_or_default().into_owned(),
        );
    }
    map
}

/// Authenticates the request if `auth_enabled`, checks the caller's
/// per-bucket ACL for `required_permission`, and resolves the effective
/// body: de-framing a chunked payload when the client streamed one, or
/// checking the declared payload hash against the literal body otherwise.
/// Takes the body as an already-buffered `Bytes` rather than feeding
/// `ChunkedBodyParser` incrementally off the wire (a documented deviation
/// from full incremental decoding; see `chunked::ChunkedBodyParser`).
/// Callers with no body of their own (GET/HEAD/DELETE) pass `Bytes::new()`.
async fn authenticate_and_decode(
    state: &AppState,
    method: &str,
    path: &str,
    query: &str,
    headers: &HeaderMap,
    body: Bytes,
    bucket: &str,
    required_permission: Permission,
) -> LaminaResult<Bytes> {
    if !state.auth_enabled {
        return Ok(body);
    }

    let header_map = headers_to_multimap(headers);
    let query_map = query_to_multimap(query);
    let payload_hash = header_map
        .get(X_AMZ_CONTENT_SHA256)
        .cloned()
        .unwrap_or_else(|| UNSIGNED_PAYLOAD.to_string());

    let auth_header = header_map
        .get(AUTHORIZATION)
        .ok_or_else(|| LaminaError::new(ErrorCode::AccessDenied, "missing authorization header"))?;
    let parsed = crate::sigv4::parse_authorization(auth_header)?;
    let user = state
        .users
        .get(&parsed.access_key)
        .ok_or_else(|| LaminaError::new(ErrorCode::AccessDenied, "unknown access key"))?;
    if !user.allows(bucket, required_permission) {
        return Err(LaminaError::new(ErrorCode::AccessDenied, "access denied").with_resource(bucket));
    }
    let secret_key = user.secret_access_key.clone();

    let authenticated = crate::sigv4::authenticate(
        method,
        path,
        &query_map,
        &header_map,
        &secret_key,
        &payload_hash,
    )?;
    let _ = authenticated.access_key;

    match authenticated.chunk_validator {
        Some(validator) => {
            let mut parser = ChunkedBodyParser::new(validator);
            parser.push(&body)?;
            Ok(parser.finish()?.data)
        }
        None => {
            if payload_hash != UNSIGNED_PAYLOAD
                && payload_hash != STREAMING_UNSIGNED_PAYLOAD_TRAILER
                && payload_hash != crate::time::sha256_hash_hex(&body)
            {
                return Err(LaminaError::new(
                    ErrorCode::InvalidChecksum,
                    "x-amz-content-sha256 does not match the request body",
                ));
            }
            Ok(body)
        }
    }
}

fn parse_range(header: &str) -> Option<(u64, u64)> {
    let spec = header.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

fn user_metadata_from_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let name = name.as_str().to_lowercase();
            let stripped = name.strip_prefix(X_AMZ_META_PREFIX)?;
            Some((stripped.to_string(), value.to_str().ok()?.to_string()))
        })
        .collect()
}

pub async fn list_buckets(State(state): State<Arc<AppState>>) -> Response {
    let buckets = state.buckets.list();
    (StatusCode::OK, [("Content-Type", "application/xml")], xml::list_buckets(&buckets)).into_response()
}

pub async fn create_bucket(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    if let Err(err) = authenticate_and_decode(
        &state,
        "PUT",
        &format!("/{bucket}"),
        query.as_deref().unwrap_or(""),
        &headers,
        Bytes::new(),
        &bucket,
        Permission::Write,
    )
    .await
    {
        return err.into_response();
    }

    let defaults = &state.bucket_defaults;
    match state
        .buckets
        .create(&bucket, defaults.bucket_type, defaults.storage_class.clone())
    {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => err.into_response(),
    }
}

/// Deletes the bucket and cascades to every object's data, metadata, and
/// in-progress multipart upload it owns (§3) — an empty registry entry left
/// behind would make those orphaned and unreachable by any other operation.
pub async fn delete_bucket(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    if let Err(err) = authenticate_and_decode(
        &state,
        "DELETE",
        &format!("/{bucket}"),
        query.as_deref().unwrap_or(""),
        &headers,
        Bytes::new(),
        &bucket,
        Permission::Delete,
    )
    .await
    {
        return err.into_response();
    }

    for (key, upload_id) in state.multipart_store.list_uploads(&bucket).await {
        if let Err(err) = state.multipart.abort(&bucket, &key, &upload_id, &state.shutdown).await {
            return err.into_response();
        }
    }
    for key in state.data.list_keys(&bucket).await {
        if let Err(err) = state.facade.delete_object(&bucket, &key, &state.shutdown).await {
            return err.into_response();
        }
    }

    match state.buckets.delete(&bucket) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}

#[derive(serde::Deserialize, Default)]
pub struct ListObjectsQuery {
    #[serde(default)]
    pub prefix: String,
    pub delimiter: Option<String>,
    #[serde(rename = "start-after")]
    pub start_after: Option<String>,
    #[serde(rename = "max-keys")]
    pub max_keys: Option<usize>,
}

pub async fn list_objects(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
    Query(q): Query<ListObjectsQuery>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    if let Err(err) = authenticate_and_decode(
        &state,
        "GET",
        &format!("/{bucket}"),
        query.as_deref().unwrap_or(""),
        &headers,
        Bytes::new(),
        &bucket,
        Permission::List,
    )
    .await
    {
        return err.into_response();
    }

    let Some(bucket_info) = state.buckets.get(&bucket) else {
        return LaminaError::new(ErrorCode::NoSuchBucket, "no such bucket")
            .with_resource(&bucket)
            .into_response();
    };
    let max_keys = q.max_keys.unwrap_or(1000);
    match super::run_list(
        &state,
        &bucket,
        bucket_info.bucket_type,
        &q.prefix,
        q.delimiter.as_deref(),
        q.start_after.as_deref(),
        max_keys,
    )
    .await
    {
        Ok(result) => (
            StatusCode::OK,
            [("Content-Type", "application/xml")],
            xml::list_objects_v2(&result, &bucket, &q.prefix, max_keys),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

#[derive(serde::Deserialize, Default)]
pub struct ObjectQuery {
    #[serde(rename = "partNumber")]
    pub part_number: Option<u16>,
    #[serde(rename = "uploadId")]
    pub upload_id: Option<String>,
    pub uploads: Option<String>,
}

pub async fn put_object_or_part(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
    Query(q): Query<ObjectQuery>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let body: Bytes = match authenticate_and_decode(
        &state,
        "PUT",
        &format!("/{bucket}/{key}"),
        query.as_deref().unwrap_or(""),
        &headers,
        body,
        &bucket,
        Permission::Write,
    )
    .await
    {
        Ok(b) => b,
        Err(err) => return err.into_response(),
    };

    let copy_source = headers
        .get(X_AMZ_COPY_SOURCE)
        .and_then(|v| v.to_str().ok());

    if let (Some(copy_source), Some(part_number), Some(upload_id)) =
        (copy_source, q.part_number, &q.upload_id)
    {
        return copy_object_part_upload(&state, &bucket, &key, upload_id, part_number, copy_source, &headers).await;
    }

    if let Some(copy_source) = copy_source {
        return copy_object(&state, &bucket, &key, copy_source, &headers).await;
    }

    if let (Some(part_number), Some(upload_id)) = (q.part_number, &q.upload_id) {
        return match state
            .multipart
            .upload_part(&bucket, &key, upload_id, part_number, body, &[], &state.shutdown)
            .await
        {
            Ok(part) => (StatusCode::OK, [("ETag", format!("\"{}\"", part.etag))]).into_response(),
            Err(err) => err.into_response(),
        };
    }

    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let user_metadata = user_metadata_from_headers(&headers);

    match state
        .facade
        .put_object(
            &bucket,
            &key,
            body,
            content_type,
            user_metadata,
            &[],
            Default::default(),
            &state.shutdown,
        )
        .await
    {
        Ok(object) => (StatusCode::OK, [("ETag", format!("\"{}\"", object.etag))]).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn copy_object(
    state: &AppState,
    dst_bucket: &str,
    dst_key: &str,
    copy_source: &str,
    headers: &HeaderMap,
) -> Response {
    let trimmed = copy_source.trim_start_matches('/');
    let decoded = urlencoding::decode(trimmed).unwrap_or_default().into_owned();
    let Some((src_bucket, src_key)) = decoded.split_once('/') else {
        return LaminaError::new(ErrorCode::InvalidArgument, "malformed copy source").into_response();
    };

    let directive = match headers
        .get(X_AMZ_METADATA_DIRECTIVE)
        .and_then(|v| v.to_str().ok())
    {
        Some("REPLACE") => MetadataDirective::Replace,
        _ => MetadataDirective::Copy,
    };
    let replacement_content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let replacement_metadata = user_metadata_from_headers(headers);

    match state
        .facade
        .copy_object(
            src_bucket,
            src_key,
            dst_bucket,
            dst_key,
            directive,
            replacement_content_type,
            Some(replacement_metadata),
            &state.shutdown,
        )
        .await
    {
        Ok(object) => (
            StatusCode::OK,
            [("Content-Type", "application/xml")],
            xml::copy_object_result(&object),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn get_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    if let Err(err) = authenticate_and_decode(
        &state,
        "GET",
        &format!("/{bucket}/{key}"),
        query.as_deref().unwrap_or(""),
        &headers,
        Bytes::new(),
        &bucket,
        Permission::Read,
    )
    .await
    {
        return err.into_response();
    }

    let range = headers
        .get(RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_range);

    match state.facade.read_object(&bucket, &key, range, &state.shutdown).await {
        Ok(bytes) => {
            let status = if range.is_some() {
                StatusCode::PARTIAL_CONTENT
            } else {
                StatusCode::OK
            };
            (status, bytes).into_response()
        }
        Err(err) => err.into_response(),
    }
}

pub async fn head_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    if let Err(err) = authenticate_and_decode(
        &state,
        "HEAD",
        &format!("/{bucket}/{key}"),
        query.as_deref().unwrap_or(""),
        &headers,
        Bytes::new(),
        &bucket,
        Permission::Read,
    )
    .await
    {
        return err.into_response();
    }

    match state.facade.get_object_info(&bucket, &key, &state.shutdown).await {
        Ok(object) => (
            StatusCode::OK,
            [
                ("ETag", format!("\"{}\"", object.etag)),
                ("Content-Type", object.content_type.clone()),
                ("Content-Length", object.size.to_string()),
            ],
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn delete_object_or_abort(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
    Query(q): Query<ObjectQuery>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    if let Err(err) = authenticate_and_decode(
        &state,
        "DELETE",
        &format!("/{bucket}/{key}"),
        query.as_deref().unwrap_or(""),
        &headers,
        Bytes::new(),
        &bucket,
        Permission::Delete,
    )
    .await
    {
        return err.into_response();
    }

    if let Some(upload_id) = q.upload_id {
        return match state.multipart.abort(&bucket, &key, &upload_id, &state.shutdown).await {
            Ok(()) => StatusCode::NO_CONTENT.into_response(),
            Err(err) => err.into_response(),
        };
    }
    match state.facade.delete_object(&bucket, &key, &state.shutdown).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn post_multipart(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
    Query(q): Query<ObjectQuery>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let body: Bytes = match authenticate_and_decode(
        &state,
        "POST",
        &format!("/{bucket}/{key}"),
        query.as_deref().unwrap_or(""),
        &headers,
        body,
        &bucket,
        Permission::Write,
    )
    .await
    {
        Ok(b) => b,
        Err(err) => return err.into_response(),
    };

    if q.uploads.is_some() {
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let user_metadata = user_metadata_from_headers(&headers);
        return match state
            .multipart
            .initiate(&bucket, &key, &content_type, user_metadata, None, &state.shutdown)
            .await
        {
            Ok(upload_id) => (
                StatusCode::OK,
                [("Content-Type", "application/xml")],
                xml::initiate_multipart_upload(&bucket, &key, &upload_id),
            )
                .into_response(),
            Err(err) => err.into_response(),
        };
    }

    if let Some(upload_id) = q.upload_id {
        let declared = match xml::parse_complete_multipart_upload(&body) {
            Ok(parts) => parts,
            Err(err) => return err.into_response(),
        };
        let declared: Vec<DeclaredPart> = declared
            .into_iter()
            .map(|p| DeclaredPart {
                part_number: p.part_number,
                etag: p.etag,
            })
            .collect();
        return match state
            .multipart
            .complete(&bucket, &key, &upload_id, &declared, &state.shutdown)
            .await
        {
            Ok(object) => (
                StatusCode::OK,
                [("Content-Type", "application/xml")],
                xml::complete_multipart_upload_result(&bucket, &key, &object),
            )
                .into_response(),
            Err(err) => err.into_response(),
        };
    }

    LaminaError::new(ErrorCode::InvalidArgument, "unsupported POST request").into_response()
}

pub async fn post_bucket_level(
    State(_state): State<Arc<AppState>>,
    Path(_bucket): Path<String>,
) -> Response {
    LaminaError::new(ErrorCode::InvalidArgument, "unsupported POST request").into_response()
}

async fn copy_object_part_upload(
    state: &AppState,
    dst_bucket: &str,
    dst_key: &str,
    upload_id: &str,
    part_number: u16,
    copy_source: &str,
    headers: &HeaderMap,
) -> Response {
    let trimmed = copy_source.trim_start_matches('/');
    let decoded = urlencoding::decode(trimmed).unwrap_or_default().into_owned();
    let Some((src_bucket, src_key)) = decoded.split_once('/') else {
        return LaminaError::new(ErrorCode::InvalidArgument, "malformed copy source").into_response();
    };
    let range = headers
        .get(X_AMZ_COPY_SOURCE_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_range);

    let body = match state
        .facade
        .copy_object_part(src_bucket, src_key, range, &state.shutdown)
        .await
    {
        Ok(body) => body,
        Err(err) => return err.into_response(),
    };

    match state
        .multipart
        .upload_part(dst_bucket, dst_key, upload_id, part_number, body, &[], &state.shutdown)
        .await
    {
        Ok(part) => (
            StatusCode::OK,
            [("Content-Type", "application/xml")],
            xml::copy_part_result(&part),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bytes_range_header() {
        assert_eq!(parse_range("bytes=5-14"), Some((5, 14)));
        assert_eq!(parse_range("bogus"), None);
    }

    #[test]
    fn extracts_user_metadata_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-amz-meta-origin", "camera".parse().unwrap());
        headers.insert("content-type", "image/png".parse().unwrap());
        let metadata = user_metadata_from_headers(&headers);
        assert_eq!(metadata.get("origin"), Some(&"camera".to_string()));
        assert_eq!(metadata.len(), 1);
    }
}
