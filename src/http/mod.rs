//! HTTP routing (§1 "out of scope: HTTP routing boilerplate" — an external
//! collaborator the core never imports, wired up here so the crate is a
//! runnable server and not just a library of components).

pub mod handlers;
pub mod xml;

use crate::bucket::SharedBucketRegistry;
use crate::cache::MetadataCache;
use crate::config::{BucketDefaults, Config};
use crate::facade::ObjectFacade;
use crate::list::ListRequest;
use crate::multipart::MultipartEngine;
use crate::object::S3User;
use crate::store::{DataStore, MetadataStore, MultipartStore};
use axum::Router;
use axum::routing::{delete, get, head, post, put};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub facade: ObjectFacade,
    pub multipart: MultipartEngine,
    pub buckets: SharedBucketRegistry,
    pub data: Arc<dyn DataStore>,
    pub multipart_store: Arc<dyn MultipartStore>,
    pub users: BTreeMap<String, S3User>,
    pub auth_enabled: bool,
    pub bucket_defaults: BucketDefaults,
    /// Cancelled on graceful shutdown; threaded into every facade/multipart
    /// operation so an in-flight request aborts cleanly instead of racing
    /// a server that is tearing down its storage backends.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        data: Arc<dyn DataStore>,
        metadata: Arc<dyn MetadataStore>,
        multipart_store: Arc<dyn MultipartStore>,
        buckets: SharedBucketRegistry,
        cache: Arc<MetadataCache>,
        config: &Config,
    ) -> Self {
        AppState {
            facade: ObjectFacade::new(data.clone(), metadata.clone(), buckets.clone(), cache),
            multipart: MultipartEngine::new(data.clone(), metadata, multipart_store.clone()),
            buckets,
            data,
            multipart_store,
            users: config.user_table(),
            auth_enabled: config.auth_enabled,
            bucket_defaults: config.bucket_defaults.clone(),
            shutdown: CancellationToken::new(),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::list_buckets))
        .route(
            "/{bucket}",
            put(handlers::create_bucket)
                .delete(handlers::delete_bucket)
                .get(handlers::list_objects)
                .post(handlers::post_bucket_level),
        )
        .route(
            "/{bucket}/{*key}",
            put(handlers::put_object_or_part)
                .get(handlers::get_object)
                .head(handlers::head_object)
                .delete(handlers::delete_object_or_abort)
                .post(handlers::post_multipart),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(60)))
}

/// Turns the already-enumerated keys of a bucket plus any in-progress
/// multipart upload keys into a `list::list` call (§4.7).
pub async fn run_list(
    state: &AppState,
    bucket_name: &str,
    bucket_type: crate::object::BucketType,
    prefix: &str,
    delimiter: Option<&str>,
    start_after: Option<&str>,
    max_keys: usize,
) -> crate::error::LaminaResult<crate::list::ListResult> {
    let mut keys = state.data.list_keys(bucket_name).await;
    if bucket_type == crate::object::BucketType::GeneralPurpose {
        keys.sort();
    }
    let in_progress = if bucket_type == crate::object::BucketType::Directory {
        state.multipart_store.list_upload_keys(bucket_name).await
    } else {
        Vec::new()
    };
    crate::list::list(
        &ListRequest {
            bucket_type,
            prefix,
            delimiter,
            start_after,
            max_keys,
        },
        &keys,
        &in_progress,
    )
}
