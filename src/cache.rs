//! Bounded, size-aware metadata cache (§4.8), keyed by (bucket, key) and
//! checked for staleness against the backing data's last-modified instant.

use crate::object::Object;
use crate::time::UtcTime;
use std::collections::HashMap;
use std::sync::Mutex;

struct Entry {
    object: Object,
    data_last_modified: UtcTime,
    size: usize,
    order: u64,
}

/// Deterministic, cheap size estimate: fixed per-entry overhead plus
/// UTF-16-style sizing (2 bytes/char) of every string field, plus a small
/// overhead per user-metadata pair.
fn estimate_size(object: &Object) -> usize {
    const FIXED_OVERHEAD: usize = 128;
    const PER_METADATA_ENTRY_OVERHEAD: usize = 32;

    let string_bytes = object.key.chars().count() * 2
        + object.etag.chars().count() * 2
        + object.content_type.chars().count() * 2
        + object
            .user_metadata
            .iter()
            .map(|(k, v)| (k.chars().count() + v.chars().count()) * 2 + PER_METADATA_ENTRY_OVERHEAD)
            .sum::<usize>();

    FIXED_OVERHEAD + string_bytes
}

/// LRU eviction by insertion/access order under a total-size ceiling.
pub struct MetadataCache {
    inner: Mutex<Inner>,
    max_bytes: usize,
}

struct Inner {
    entries: HashMap<(String, String), Entry>,
    total_bytes: usize,
    clock: u64,
}

impl MetadataCache {
    pub fn new(max_bytes: usize) -> Self {
        MetadataCache {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                total_bytes: 0,
                clock: 0,
            }),
            max_bytes,
        }
    }

    pub fn get(&self, bucket: &str, key: &str, current_data_last_modified: UtcTime) -> Option<Object> {
        let mut inner = self.inner.lock().unwrap();
        inner.clock += 1;
        let next_clock = inner.clock;
        let k = (bucket.to_string(), key.to_string());
        let stale = match inner.entries.get(&k) {
            Some(entry) => entry.data_last_modified != current_data_last_modified,
            None => return None,
        };
        if stale {
            if let Some(removed) = inner.entries.remove(&k) {
                inner.total_bytes -= removed.size;
            }
            return None;
        }
        let entry = inner.entries.get_mut(&k)?;
        entry.order = next_clock;
        Some(entry.object.clone())
    }

    pub fn put(&self, object: Object, data_last_modified: UtcTime) {
        let size = estimate_size(&object);
        let mut inner = self.inner.lock().unwrap();
        inner.clock += 1;
        let clock = inner.clock;
        let k = (object.bucket.clone(), object.key.clone());

        if let Some(old) = inner.entries.remove(&k) {
            inner.total_bytes -= old.size;
        }

        while inner.total_bytes + size > self.max_bytes {
            let Some(lru_key) = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.order)
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            if let Some(removed) = inner.entries.remove(&lru_key) {
                inner.total_bytes -= removed.size;
            }
        }

        inner.total_bytes += size;
        inner.entries.insert(
            k,
            Entry {
                object,
                data_last_modified,
                size,
                order: clock,
            },
        );
    }

    pub fn invalidate(&self, bucket: &str, key: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(removed) = inner.entries.remove(&(bucket.to_string(), key.to_string())) {
            inner.total_bytes -= removed.size;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sample(key: &str) -> Object {
        Object {
            bucket: "b".to_string(),
            key: key.to_string(),
            size: 10,
            last_modified: chrono::Utc::now(),
            etag: "abc".to_string(),
            content_type: "text/plain".to_string(),
            user_metadata: BTreeMap::new(),
            owner_id: None,
            owner_display_name: None,
            checksums: Default::default(),
        }
    }

    #[test]
    fn hit_then_stale_on_data_change() {
        let cache = MetadataCache::new(1_000_000);
        let t0 = chrono::Utc::now();
        cache.put(sample("k"), t0);
        assert!(cache.get("b", "k", t0).is_some());

        let t1 = t0 + chrono::Duration::seconds(1);
        assert!(cache.get("b", "k", t1).is_none());
    }

    #[test]
    fn evicts_lru_under_size_pressure() {
        let cache = MetadataCache::new(400);
        let t = chrono::Utc::now();
        cache.put(sample("a"), t);
        cache.put(sample("b"), t);
        cache.put(sample("c"), t);
        // oldest entries should have been evicted to respect the ceiling
        assert!(cache.get("b", "c", t).is_some());
    }
}
