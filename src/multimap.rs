//! Canonical header/query-string helpers shared by the authenticator and the
//! chunked-payload trailer verifier.

use lazy_static::lazy_static;
use multimap::MultiMap;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use regex::Regex;
use std::collections::BTreeMap;

pub type Multimap = MultiMap<String, String>;

/// RFC 3986 unreserved set: everything else gets percent-encoded.
const UNRESERVED: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'%')
    .add(b'/')
    .add(b':')
    .add(b';')
    .add(b'=')
    .add(b'@')
    .add(b'[')
    .add(b']')
    .add(b'\\')
    .add(b'^')
    .add(b'|')
    .add(b'$')
    .add(b'&')
    .add(b'+')
    .add(b',')
    .add(b'!')
    .add(b'\'')
    .add(b'(')
    .add(b')')
    .add(b'*');

pub fn urlencode(s: &str) -> String {
    utf8_percent_encode(s, UNRESERVED).to_string()
}

pub trait MultimapExt {
    fn add<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V);
    fn get_canonical_query_string(&self) -> String;
    fn get_canonical_headers(&self) -> (String, String);
}

impl MultimapExt for Multimap {
    fn add<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        self.insert(key.into(), value.into());
    }

    fn get_canonical_query_string(&self) -> String {
        let mut keys: Vec<String> = self.keys().cloned().collect();
        keys.sort();

        let mut query = String::new();
        for key in keys {
            if let Some(values) = self.get_vec(&key) {
                for value in values {
                    if !query.is_empty() {
                        query.push('&');
                    }
                    query.push_str(&urlencode(&key));
                    query.push('=');
                    query.push_str(&urlencode(value));
                }
            }
        }
        query
    }

    fn get_canonical_headers(&self) -> (String, String) {
        lazy_static! {
            static ref MULTI_SPACE_REGEX: Regex = Regex::new("( +)").unwrap();
        }
        let mut btmap: BTreeMap<String, String> = BTreeMap::new();

        for (k, values) in self.iter_all() {
            let key = k.to_lowercase();
            if key == "authorization" || key == "user-agent" {
                continue;
            }

            let mut vs = values.clone();
            vs.sort();

            let mut value = String::new();
            for v in vs {
                if !value.is_empty() {
                    value.push(',');
                }
                let s = MULTI_SPACE_REGEX.replace_all(&v, " ").trim().to_string();
                value.push_str(&s);
            }
            btmap.insert(key, value);
        }

        let mut signed_headers = String::new();
        let mut canonical_headers = String::new();
        let mut add_delim = false;
        for (key, value) in &btmap {
            if add_delim {
                signed_headers.push(';');
                canonical_headers.push('\n');
            }
            signed_headers.push_str(key);
            canonical_headers.push_str(key);
            canonical_headers.push(':');
            canonical_headers.push_str(value);
            add_delim = true;
        }

        (signed_headers, canonical_headers)
    }
}

/// Percent-encodes a single canonical-URI path segment (§4.3 CANONICAL-URI).
pub fn encode_uri_segment(segment: &str) -> String {
    urlencode(segment)
}

/// Builds the canonical URI from a raw request path: split on `/` preserving
/// empty segments, percent-encode each, rejoin with `/`.
pub fn canonical_uri(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    let encoded: Vec<String> = path.split('/').map(encode_uri_segment).collect();
    let joined = encoded.join("/");
    if joined.starts_with('/') {
        joined
    } else {
        format!("/{joined}")
    }
}
