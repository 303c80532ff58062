//! End-to-end coverage of the HTTP surface against the in-memory backend,
//! exercised through the router directly rather than a bound socket.

use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use bytes::Bytes;
use lamina::bucket::BucketRegistry;
use lamina::cache::MetadataCache;
use lamina::config::Config;
use lamina::http::{self, AppState};
use lamina::object::BucketType;
use lamina::store::memory::{MemoryDataStore, MemoryMetadataStore, MemoryMultipartStore};
use std::sync::Arc;
use tower::ServiceExt;

fn build_state() -> Arc<AppState> {
    let config = Config::default();
    let buckets = Arc::new(BucketRegistry::new());
    let cache = Arc::new(MetadataCache::new(config.metadata_cache_size_bytes));
    Arc::new(AppState::new(
        Arc::new(MemoryDataStore::new()),
        Arc::new(MemoryMetadataStore::new()),
        Arc::new(MemoryMultipartStore::new()),
        buckets,
        cache,
        &config,
    ))
}

async fn body_bytes(response: axum::response::Response) -> Bytes {
    body::to_bytes(response.into_body(), usize::MAX).await.unwrap()
}

#[tokio::test]
async fn put_then_get_round_trips_object_bytes() {
    let state = build_state();
    state.buckets.create("bucket", BucketType::GeneralPurpose, None).unwrap();
    let router = http::router(state);

    let put = Request::builder()
        .method("PUT")
        .uri("/bucket/notes.txt")
        .body(Body::from("hello world"))
        .unwrap();
    let response = router.clone().oneshot(put).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let get = Request::builder()
        .method("GET")
        .uri("/bucket/notes.txt")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(get).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(&body_bytes(response).await[..], b"hello world");
}

#[tokio::test]
async fn range_get_returns_partial_content() {
    let state = build_state();
    state.buckets.create("bucket", BucketType::GeneralPurpose, None).unwrap();
    let router = http::router(state);

    let put = Request::builder()
        .method("PUT")
        .uri("/bucket/data.bin")
        .body(Body::from("0123456789"))
        .unwrap();
    router.clone().oneshot(put).await.unwrap();

    let get = Request::builder()
        .method("GET")
        .uri("/bucket/data.bin")
        .header("range", "bytes=2-4")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(get).await.unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(&body_bytes(response).await[..], b"234");
}

#[tokio::test]
async fn multipart_upload_completes_in_declared_order() {
    let state = build_state();
    state.buckets.create("bucket", BucketType::GeneralPurpose, None).unwrap();
    let router = http::router(state);

    let initiate = Request::builder()
        .method("POST")
        .uri("/bucket/big.bin?uploads")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(initiate).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let xml = body_bytes(response).await;
    let upload_id = extract_tag(&xml, "UploadId");

    let part1 = six_mib(b'a');
    let put1 = Request::builder()
        .method("PUT")
        .uri(format!("/bucket/big.bin?partNumber=1&uploadId={upload_id}"))
        .body(Body::from(part1))
        .unwrap();
    let response = router.clone().oneshot(put1).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let etag1 = etag_header(&response);

    let put2 = Request::builder()
        .method("PUT")
        .uri(format!("/bucket/big.bin?partNumber=2&uploadId={upload_id}"))
        .body(Body::from("tail"))
        .unwrap();
    let response = router.clone().oneshot(put2).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let etag2 = etag_header(&response);

    let complete_body = format!(
        "<CompleteMultipartUpload><Part><PartNumber>1</PartNumber><ETag>\"{etag1}\"</ETag></Part>\
         <Part><PartNumber>2</PartNumber><ETag>\"{etag2}\"</ETag></Part></CompleteMultipartUpload>"
    );
    let complete = Request::builder()
        .method("POST")
        .uri(format!("/bucket/big.bin?uploadId={upload_id}"))
        .body(Body::from(complete_body))
        .unwrap();
    let response = router.clone().oneshot(complete).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let result_xml = body_bytes(response).await;
    assert!(extract_tag(&result_xml, "ETag").ends_with("-2\""));

    let get = Request::builder()
        .method("GET")
        .uri("/bucket/big.bin")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(get).await.unwrap();
    let fetched = body_bytes(response).await;
    assert_eq!(fetched.len(), 6 * 1024 * 1024 + 4);
}

#[tokio::test]
async fn complete_multipart_upload_with_mismatched_etag_is_rejected() {
    let state = build_state();
    state.buckets.create("bucket", BucketType::GeneralPurpose, None).unwrap();
    let router = http::router(state);

    let initiate = Request::builder()
        .method("POST")
        .uri("/bucket/k?uploads")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(initiate).await.unwrap();
    let xml = body_bytes(response).await;
    let upload_id = extract_tag(&xml, "UploadId");

    let put1 = Request::builder()
        .method("PUT")
        .uri(format!("/bucket/k?partNumber=1&uploadId={upload_id}"))
        .body(Body::from("part data"))
        .unwrap();
    router.clone().oneshot(put1).await.unwrap();

    let complete_body = format!(
        "<CompleteMultipartUpload><Part><PartNumber>1</PartNumber><ETag>\"deadbeef\"</ETag></Part></CompleteMultipartUpload>"
    );
    let complete = Request::builder()
        .method("POST")
        .uri(format!("/bucket/k?uploadId={upload_id}"))
        .body(Body::from(complete_body))
        .unwrap();
    let response = router.oneshot(complete).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn directory_bucket_listing_rolls_up_delimiter_prefixes() {
    let state = build_state();
    state.buckets.create("dirbucket", BucketType::Directory, None).unwrap();
    let router = http::router(state);

    for key in ["logs/2024/a.txt", "logs/2024/b.txt", "logs/2025/c.txt"] {
        let put = Request::builder()
            .method("PUT")
            .uri(format!("/dirbucket/{key}"))
            .body(Body::from("x"))
            .unwrap();
        let response = router.clone().oneshot(put).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let list = Request::builder()
        .method("GET")
        .uri("/dirbucket?prefix=logs/&delimiter=/")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(list).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let xml = String::from_utf8(body_bytes(response).await.to_vec()).unwrap();
    assert!(xml.contains("logs/2024/"));
    assert!(xml.contains("logs/2025/"));
}

fn six_mib(fill: u8) -> Vec<u8> {
    vec![fill; 6 * 1024 * 1024]
}

fn etag_header(response: &axum::response::Response) -> String {
    response
        .headers()
        .get("etag")
        .unwrap()
        .to_str()
        .unwrap()
        .trim_matches('"')
        .to_string()
}

fn extract_tag(xml: &[u8], tag: &str) -> String {
    let text = String::from_utf8_lossy(xml);
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = text.find(&open).unwrap() + open.len();
    let end = text.find(&close).unwrap();
    text[start..end].to_string()
}
