//! XML (de)serialization of S3 request/response envelopes — an external
//! collaborator the core never depends on, needed here only so the HTTP
//! layer can actually speak the wire protocol.

use crate::error::{ErrorCode, LaminaError, LaminaResult};
use crate::list::ListResult;
use crate::object::{Bucket, Object, UploadPart};
use xmltree::{Element, XMLNode};

fn leaf(tag: &str, text: impl Into<String>) -> Element {
    let mut el = Element::new(tag);
    el.children.push(XMLNode::Text(text.into()));
    el
}

fn push(parent: &mut Element, tag: &str, text: impl Into<String>) {
    parent.children.push(XMLNode::Element(leaf(tag, text)));
}

fn render(root: Element) -> Vec<u8> {
    let mut out = Vec::new();
    let _ = root.write(&mut out);
    out
}

pub fn list_buckets(buckets: &[Bucket]) -> Vec<u8> {
    let mut root = Element::new("ListAllMyBucketsResult");
    let mut list = Element::new("Buckets");
    for bucket in buckets {
        let mut b = Element::new("Bucket");
        push(&mut b, "Name", bucket.name.clone());
        push(
            &mut b,
            "CreationDate",
            bucket.creation_date.to_rfc3339(),
        );
        list.children.push(XMLNode::Element(b));
    }
    root.children.push(XMLNode::Element(list));
    render(root)
}

pub fn list_objects_v2(result: &ListResult, bucket: &str, prefix: &str, max_keys: usize) -> Vec<u8> {
    let mut root = Element::new("ListBucketResult");
    push(&mut root, "Name", bucket.to_string());
    push(&mut root, "Prefix", prefix.to_string());
    push(&mut root, "MaxKeys", max_keys.to_string());
    push(&mut root, "IsTruncated", result.is_truncated.to_string());
    if let Some(token) = &result.next_token {
        push(&mut root, "NextContinuationToken", token.clone());
    }
    for key in &result.keys {
        let mut contents = Element::new("Contents");
        push(&mut contents, "Key", key.clone());
        root.children.push(XMLNode::Element(contents));
    }
    for common_prefix in &result.common_prefixes {
        let mut cp = Element::new("CommonPrefixes");
        push(&mut cp, "Prefix", common_prefix.clone());
        root.children.push(XMLNode::Element(cp));
    }
    render(root)
}

pub fn initiate_multipart_upload(bucket: &str, key: &str, upload_id: &str) -> Vec<u8> {
    let mut root = Element::new("InitiateMultipartUploadResult");
    push(&mut root, "Bucket", bucket.to_string());
    push(&mut root, "Key", key.to_string());
    push(&mut root, "UploadId", upload_id.to_string());
    render(root)
}

pub fn complete_multipart_upload_result(bucket: &str, key: &str, object: &Object) -> Vec<u8> {
    let mut root = Element::new("CompleteMultipartUploadResult");
    push(&mut root, "Bucket", bucket.to_string());
    push(&mut root, "Key", key.to_string());
    push(&mut root, "ETag", format!("\"{}\"", object.etag));
    render(root)
}

pub fn copy_object_result(object: &Object) -> Vec<u8> {
    let mut root = Element::new("CopyObjectResult");
    push(&mut root, "ETag", format!("\"{}\"", object.etag));
    push(&mut root, "LastModified", object.last_modified.to_rfc3339());
    render(root)
}

pub fn copy_part_result(part: &UploadPart) -> Vec<u8> {
    let mut root = Element::new("CopyPartResult");
    push(&mut root, "ETag", format!("\"{}\"", part.etag));
    push(&mut root, "LastModified", part.last_modified.to_rfc3339());
    render(root)
}

/// One `(partNumber, etag)` pair parsed out of a `CompleteMultipartUpload`
/// request body.
pub struct CompletedPart {
    pub part_number: u16,
    pub etag: String,
}

pub fn parse_complete_multipart_upload(body: &[u8]) -> LaminaResult<Vec<CompletedPart>> {
    let root = Element::parse(body).map_err(|_| malformed())?;
    let mut parts = Vec::new();
    for child in root.children.iter().filter_map(|n| n.as_element()) {
        if child.name != "Part" {
            continue;
        }
        let part_number = child
            .get_child("PartNumber")
            .and_then(|e| e.get_text())
            .and_then(|t| t.parse::<u16>().ok())
            .ok_or_else(malformed)?;
        let etag = child
            .get_child("ETag")
            .and_then(|e| e.get_text())
            .map(|t| t.trim_matches('"').to_string())
            .ok_or_else(malformed)?;
        parts.push(CompletedPart { part_number, etag });
    }
    Ok(parts)
}

fn malformed() -> LaminaError {
    LaminaError::new(ErrorCode::MalformedXML, "malformed request body")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_complete_multipart_upload_body() {
        let body = br#"<CompleteMultipartUpload>
            <Part><PartNumber>1</PartNumber><ETag>"abc"</ETag></Part>
            <Part><PartNumber>2</PartNumber><ETag>"def"</ETag></Part>
        </CompleteMultipartUpload>"#;
        let parts = parse_complete_multipart_upload(body).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].part_number, 1);
        assert_eq!(parts[0].etag, "abc");
    }

    #[test]
    fn rejects_malformed_body() {
        assert!(parse_complete_multipart_upload(b"not xml").is_err());
    }
}
