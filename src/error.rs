//! Error codes and the S3-shaped XML error body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::fmt;

/// Well-known S3 error codes this server emits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    NoSuchBucket,
    NoSuchKey,
    NoSuchUpload,
    BucketAlreadyExists,
    BucketNotEmpty,
    InvalidBucketName,
    InvalidObjectName,
    InvalidArgument,
    InvalidPart,
    InvalidPartOrder,
    EntityTooSmall,
    InvalidChecksum,
    InvalidChunkSignature,
    SignatureDoesNotMatch,
    AccessDenied,
    MalformedXML,
    InvalidRange,
    InternalError,
    RequestCancelled,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NoSuchBucket => "NoSuchBucket",
            ErrorCode::NoSuchKey => "NoSuchKey",
            ErrorCode::NoSuchUpload => "NoSuchUpload",
            ErrorCode::BucketAlreadyExists => "BucketAlreadyExists",
            ErrorCode::BucketNotEmpty => "BucketNotEmpty",
            ErrorCode::InvalidBucketName => "InvalidBucketName",
            ErrorCode::InvalidObjectName => "InvalidObjectName",
            ErrorCode::InvalidArgument => "InvalidArgument",
            ErrorCode::InvalidPart => "InvalidPart",
            ErrorCode::InvalidPartOrder => "InvalidPartOrder",
            ErrorCode::EntityTooSmall => "EntityTooSmall",
            ErrorCode::InvalidChecksum => "InvalidChecksum",
            ErrorCode::InvalidChunkSignature => "InvalidChunkSignature",
            ErrorCode::SignatureDoesNotMatch => "SignatureDoesNotMatch",
            ErrorCode::AccessDenied => "AccessDenied",
            ErrorCode::MalformedXML => "MalformedXML",
            ErrorCode::InvalidRange => "InvalidRange",
            ErrorCode::InternalError => "InternalError",
            ErrorCode::RequestCancelled => "RequestCancelled",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ErrorCode::NoSuchBucket
            | ErrorCode::NoSuchKey
            | ErrorCode::NoSuchUpload => StatusCode::NOT_FOUND,
            ErrorCode::BucketAlreadyExists | ErrorCode::BucketNotEmpty => StatusCode::CONFLICT,
            ErrorCode::InvalidBucketName
            | ErrorCode::InvalidObjectName
            | ErrorCode::InvalidArgument
            | ErrorCode::InvalidPart
            | ErrorCode::InvalidPartOrder
            | ErrorCode::EntityTooSmall
            | ErrorCode::InvalidChecksum
            | ErrorCode::InvalidChunkSignature
            | ErrorCode::MalformedXML => StatusCode::BAD_REQUEST,
            ErrorCode::SignatureDoesNotMatch | ErrorCode::AccessDenied => StatusCode::FORBIDDEN,
            ErrorCode::InvalidRange => StatusCode::RANGE_NOT_SATISFIABLE,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::RequestCancelled => StatusCode::from_u16(499).unwrap(),
        }
    }
}

/// Top level error type returned by every core operation.
#[derive(Debug, thiserror::Error)]
#[error("{code:?}: {message}")]
pub struct LaminaError {
    pub code: ErrorCode,
    pub message: String,
    pub resource: Option<String>,
}

impl LaminaError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        LaminaError {
            code,
            message: message.into(),
            resource: None,
        }
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn internal(err: impl fmt::Display) -> Self {
        // The caller-facing message never echoes backend detail; that detail
        // is only ever logged via tracing at the call site.
        let _ = err;
        LaminaError::new(ErrorCode::InternalError, "internal error")
    }
}

impl IntoResponse for LaminaError {
    fn into_response(self) -> Response {
        let status = self.code.status();
        let mut elem = xmltree::Element::new("Error");
        let mut push = |tag: &str, text: &str| {
            let mut child = xmltree::Element::new(tag);
            child
                .children
                .push(xmltree::XMLNode::Text(text.to_string()));
            elem.children.push(xmltree::XMLNode::Element(child));
        };
        push("Code", self.code.as_str());
        push("Message", &self.message);
        push("Resource", self.resource.as_deref().unwrap_or(""));
        push("RequestId", &uuid::Uuid::new_v4().simple().to_string());

        let mut body: Vec<u8> = Vec::new();
        let _ = elem.write(&mut body);

        tracing::warn!(code = self.code.as_str(), message = %self.message, "request failed");

        (status, [("Content-Type", "application/xml")], body).into_response()
    }
}

pub type LaminaResult<T> = Result<T, LaminaError>;
