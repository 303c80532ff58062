//! List Engine (§4.7): prefix/delimiter listing with common-prefix rollup,
//! bucket-type-dependent ordering, and directory-bucket multipart-prefix
//! merging.

use crate::error::{ErrorCode, LaminaError, LaminaResult};
use crate::object::BucketType;
use std::collections::BTreeSet;

pub struct ListRequest<'a> {
    pub bucket_type: BucketType,
    pub prefix: &'a str,
    pub delimiter: Option<&'a str>,
    pub start_after: Option<&'a str>,
    pub max_keys: usize,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ListResult {
    pub keys: Vec<String>,
    pub common_prefixes: BTreeSet<String>,
    pub is_truncated: bool,
    pub next_token: Option<String>,
}

/// `keys` is every key in the bucket, already in the backend's enumeration
/// order (ordinal-ascending for GeneralPurpose, unspecified for Directory
/// buckets per §4.7 — this function does not re-sort, it trusts the
/// caller's order). `in_progress_upload_keys` feeds the directory-bucket
/// multipart-prefix merge in step 6; pass an empty slice for
/// GeneralPurpose buckets.
pub fn list(
    request: &ListRequest,
    keys: &[String],
    in_progress_upload_keys: &[String],
) -> LaminaResult<ListResult> {
    if request.bucket_type == BucketType::Directory {
        if let Some(delimiter) = request.delimiter {
            if delimiter != "/" {
                return Err(LaminaError::new(
                    ErrorCode::InvalidArgument,
                    "directory buckets only support '/' as a delimiter",
                ));
            }
            if !request.prefix.is_empty() && !request.prefix.ends_with(delimiter) {
                return Err(LaminaError::new(
                    ErrorCode::InvalidArgument,
                    "directory bucket prefixes must end with the delimiter",
                ));
            }
        }
    }

    let mut filtered: Vec<&String> = keys
        .iter()
        .filter(|k| k.starts_with(request.prefix))
        .collect();

    if let Some(start_after) = request.start_after {
        filtered.retain(|k| k.as_str() > start_after);
    }

    let mut result = ListResult::default();

    match request.delimiter {
        None => {
            for key in filtered {
                if result.keys.len() + result.common_prefixes.len() >= request.max_keys {
                    result.is_truncated = true;
                    break;
                }
                result.keys.push(key.clone());
            }
            result.next_token = result.keys.last().cloned();
        }
        Some(delimiter) => {
            for key in filtered {
                if result.keys.len() + result.common_prefixes.len() >= request.max_keys {
                    result.is_truncated = true;
                    break;
                }
                let rest = &key[request.prefix.len()..];
                match rest.find(delimiter) {
                    Some(offset) => {
                        let boundary = request.prefix.len() + offset + delimiter.len();
                        result.common_prefixes.insert(key[..boundary].to_string());
                    }
                    None => {
                        result.keys.push(key.clone());
                    }
                }
            }

            if request.bucket_type == BucketType::Directory && !delimiter.is_empty() {
                for upload_key in in_progress_upload_keys {
                    if !upload_key.starts_with(request.prefix) {
                        continue;
                    }
                    let rest = &upload_key[request.prefix.len()..];
                    if let Some(offset) = rest.find(delimiter) {
                        let boundary = request.prefix.len() + offset + delimiter.len();
                        result
                            .common_prefixes
                            .insert(upload_key[..boundary].to_string());
                    }
                }
            }

            result.next_token = result
                .keys
                .last()
                .cloned()
                .or_else(|| result.common_prefixes.iter().next_back().cloned());
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_delimiter_yields_all_prefixed_keys() {
        let data = keys(&["a/1", "a/2", "b/1"]);
        let result = list(
            &ListRequest {
                bucket_type: BucketType::GeneralPurpose,
                prefix: "a/",
                delimiter: None,
                start_after: None,
                max_keys: 100,
            },
            &data,
            &[],
        )
        .unwrap();
        assert_eq!(result.keys, vec!["a/1", "a/2"]);
        assert!(!result.is_truncated);
    }

    #[test]
    fn delimiter_rolls_up_common_prefixes() {
        let data = keys(&["uploads/completed/file.txt", "uploads/readme.md"]);
        let result = list(
            &ListRequest {
                bucket_type: BucketType::GeneralPurpose,
                prefix: "uploads/",
                delimiter: Some("/"),
                start_after: None,
                max_keys: 100,
            },
            &data,
            &[],
        )
        .unwrap();
        assert_eq!(result.keys, vec!["uploads/readme.md"]);
        assert!(result.common_prefixes.contains("uploads/completed/"));
    }

    #[test]
    fn directory_bucket_merges_in_progress_multipart_prefixes() {
        let data = keys(&["uploads/completed/file.txt"]);
        let in_progress = keys(&["uploads/inprogress/file1.txt"]);
        let result = list(
            &ListRequest {
                bucket_type: BucketType::Directory,
                prefix: "uploads/",
                delimiter: Some("/"),
                start_after: None,
                max_keys: 100,
            },
            &data,
            &in_progress,
        )
        .unwrap();
        let expected: BTreeSet<String> = ["uploads/completed/", "uploads/inprogress/"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(result.common_prefixes, expected);
    }

    #[test]
    fn directory_bucket_rejects_non_slash_delimiter() {
        let err = list(
            &ListRequest {
                bucket_type: BucketType::Directory,
                prefix: "",
                delimiter: Some(","),
                start_after: None,
                max_keys: 10,
            },
            &[],
            &[],
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArgument);
    }

    #[test]
    fn max_keys_truncates() {
        let data = keys(&["a", "b", "c"]);
        let result = list(
            &ListRequest {
                bucket_type: BucketType::GeneralPurpose,
                prefix: "",
                delimiter: None,
                start_after: None,
                max_keys: 2,
            },
            &data,
            &[],
        )
        .unwrap();
        assert_eq!(result.keys, vec!["a", "b"]);
        assert!(result.is_truncated);
    }
}
