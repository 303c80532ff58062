//! An S3-API-compatible object storage server: SigV4 authentication,
//! chunked-payload decoding, a data-first object store, a multipart upload
//! state machine, and an S3-shaped listing engine, fronted by an HTTP layer.

pub mod bucket;
pub mod cache;
pub mod checksum;
pub mod chunked;
pub mod config;
pub mod content_type;
pub mod error;
pub mod facade;
pub mod header_constants;
pub mod http;
pub mod list;
pub mod multimap;
pub mod multipart;
pub mod object;
pub mod sigv4;
pub mod store;
pub mod time;
