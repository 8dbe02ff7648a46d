//! The four bridge caches.
//!
//! Each map sits behind its own lock; critical sections are plain map
//! operations and never span network I/O. The subfolder-count and file-size
//! maps carry a one-shot "hot" token: a readdir prefetch arms it, the next
//! consumer takes it, and nothing re-arms it except another prefetch.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Mutex, RwLock};

use lru::LruCache;

use crate::api_client::Entry;

/// The root directory's well-known remote id; it is never listed or cached.
pub const ROOT_ID: &str = "root";

/// Listings cached beyond this are evicted; eviction only costs a full
/// re-fetch on the next listing of that URL.
const LISTING_CACHE_CAPACITY: usize = 4096;

/// What an absolute local path maps to on the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathIdEntry {
    pub id: String,
    pub is_dir: bool,
}

/// One listing response, pinned to the ETag it was served under.
#[derive(Debug, Clone)]
pub struct CachedListing {
    pub etag: String,
    pub entries: Vec<Entry>,
}

#[derive(Debug, Clone, Copy)]
struct HotCount {
    count: u32,
    hot: bool,
}

#[derive(Debug, Clone)]
struct HotSize {
    size: u64,
    hot: bool,
    /// ETag of the last `fields=size` stat, for revalidation on the cold path.
    etag: Option<String>,
}

pub struct BridgeCaches {
    path_ids: RwLock<HashMap<String, PathIdEntry>>,
    listings: Mutex<LruCache<String, CachedListing>>,
    subfolder_counts: RwLock<HashMap<String, HotCount>>,
    file_sizes: RwLock<HashMap<String, HotSize>>,
}

impl Default for BridgeCaches {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeCaches {
    pub fn new() -> Self {
        let capacity = NonZeroUsize::new(LISTING_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            path_ids: RwLock::new(HashMap::new()),
            listings: Mutex::new(LruCache::new(capacity)),
            subfolder_counts: RwLock::new(HashMap::new()),
            file_sizes: RwLock::new(HashMap::new()),
        }
    }

    // --- path -> id ---

    pub fn path_id(&self, path: &str) -> Option<PathIdEntry> {
        self.path_ids.read().unwrap().get(path).cloned()
    }

    pub fn insert_path_id(&self, path: impl Into<String>, id: impl Into<String>, is_dir: bool) {
        self.path_ids.write().unwrap().insert(
            path.into(),
            PathIdEntry {
                id: id.into(),
                is_dir,
            },
        );
    }

    pub fn remove_path_id(&self, path: &str) {
        self.path_ids.write().unwrap().remove(path);
    }

    /// Rename: the object keeps its id, only the key changes.
    pub fn rekey_path_id(&self, old_path: &str, new_path: &str) {
        let mut map = self.path_ids.write().unwrap();
        if let Some(entry) = map.remove(old_path) {
            map.insert(new_path.to_string(), entry);
        }
    }

    /// Shadow-copy finalization: the path stays, the id is replaced by the
    /// temp upload's id.
    pub fn replace_path_id(&self, path: &str, new_id: impl Into<String>) {
        self.path_ids.write().unwrap().insert(
            path.to_string(),
            PathIdEntry {
                id: new_id.into(),
                is_dir: false,
            },
        );
    }

    // --- listings, keyed by the exact request URL ---

    pub fn listing(&self, url: &str) -> Option<CachedListing> {
        self.listings.lock().unwrap().get(url).cloned()
    }

    pub fn listing_etag(&self, url: &str) -> Option<String> {
        self.listings
            .lock()
            .unwrap()
            .get(url)
            .map(|l| l.etag.clone())
    }

    /// Replace the cached listing wholesale. Responses without an ETag are
    /// not cached; they could never be revalidated.
    pub fn store_listing(&self, url: impl Into<String>, etag: Option<String>, entries: Vec<Entry>) {
        if let Some(etag) = etag {
            self.listings
                .lock()
                .unwrap()
                .put(url.into(), CachedListing { etag, entries });
        }
    }

    pub fn drop_listing(&self, url: &str) {
        self.listings.lock().unwrap().pop(url);
    }

    // --- subfolder counts, keyed by directory id ---

    /// Arm a freshly prefetched count; the next consumer takes it.
    pub fn prime_subfolder_count(&self, id: impl Into<String>, count: u32) {
        self.subfolder_counts
            .write()
            .unwrap()
            .insert(id.into(), HotCount { count, hot: true });
    }

    /// 304 on the prefetch listing: the prior count is still valid, re-arm it.
    pub fn rearm_subfolder_count(&self, id: &str) {
        self.subfolder_counts
            .write()
            .unwrap()
            .entry(id.to_string())
            .and_modify(|v| v.hot = true)
            .or_insert(HotCount {
                count: 0,
                hot: true,
            });
    }

    /// Take the hot token, if armed. Cold entries return `None` and the
    /// caller falls through to a listing.
    pub fn take_subfolder_count(&self, id: &str) -> Option<u32> {
        let mut map = self.subfolder_counts.write().unwrap();
        let value = map.get_mut(id)?;
        if value.hot {
            value.hot = false;
            Some(value.count)
        } else {
            None
        }
    }

    /// Record a count computed outside a prefetch; stored cold.
    pub fn store_subfolder_count(&self, id: impl Into<String>, count: u32) {
        self.subfolder_counts
            .write()
            .unwrap()
            .insert(id.into(), HotCount { count, hot: false });
    }

    pub fn remove_subfolder_count(&self, id: &str) {
        self.subfolder_counts.write().unwrap().remove(id);
    }

    // --- file sizes, keyed by file id ---

    /// Arm a size straight out of a readdir listing payload.
    pub fn prime_file_size(&self, id: impl Into<String>, size: u64) {
        let mut map = self.file_sizes.write().unwrap();
        map.entry(id.into())
            .and_modify(|v| {
                v.size = size;
                v.hot = true;
            })
            .or_insert(HotSize {
                size,
                hot: true,
                etag: None,
            });
    }

    pub fn take_file_size(&self, id: &str) -> Option<u64> {
        let mut map = self.file_sizes.write().unwrap();
        let value = map.get_mut(id)?;
        if value.hot {
            value.hot = false;
            Some(value.size)
        } else {
            None
        }
    }

    /// Record a stat result; keeps any armed hot token as the stat did not
    /// consume it.
    pub fn store_file_size(&self, id: &str, size: u64, etag: Option<String>) {
        let mut map = self.file_sizes.write().unwrap();
        map.entry(id.to_string())
            .and_modify(|v| {
                v.size = size;
                v.etag = etag.clone();
            })
            .or_insert(HotSize {
                size,
                hot: false,
                etag,
            });
    }

    pub fn cached_file_size(&self, id: &str) -> Option<u64> {
        self.file_sizes.read().unwrap().get(id).map(|v| v.size)
    }

    pub fn file_size_etag(&self, id: &str) -> Option<String> {
        self.file_sizes
            .read()
            .unwrap()
            .get(id)
            .and_then(|v| v.etag.clone())
    }

    pub fn remove_file_size(&self, id: &str) {
        self.file_sizes.write().unwrap().remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_client::EntryKind;

    fn entry(id: &str, name: &str) -> Entry {
        Entry {
            id: id.into(),
            name: name.into(),
            parent_id: None,
            kind: EntryKind::File { size: 1 },
        }
    }

    #[test]
    fn hot_counts_are_one_shot() {
        let caches = BridgeCaches::new();
        caches.prime_subfolder_count("d1", 3);
        assert_eq!(caches.take_subfolder_count("d1"), Some(3));
        // Second consumer falls through to the network.
        assert_eq!(caches.take_subfolder_count("d1"), None);
    }

    #[test]
    fn rearm_keeps_the_prior_count() {
        let caches = BridgeCaches::new();
        caches.prime_subfolder_count("d1", 5);
        assert_eq!(caches.take_subfolder_count("d1"), Some(5));
        caches.rearm_subfolder_count("d1");
        assert_eq!(caches.take_subfolder_count("d1"), Some(5));
    }

    #[test]
    fn hot_sizes_are_one_shot_and_survive_stats() {
        let caches = BridgeCaches::new();
        caches.prime_file_size("f1", 42);
        // A stat on another code path must not clear the token.
        caches.store_file_size("f1", 42, Some("\"v1\"".into()));
        assert_eq!(caches.take_file_size("f1"), Some(42));
        assert_eq!(caches.take_file_size("f1"), None);
        assert_eq!(caches.cached_file_size("f1"), Some(42));
        assert_eq!(caches.file_size_etag("f1").as_deref(), Some("\"v1\""));
    }

    #[test]
    fn rekey_preserves_the_remote_id() {
        let caches = BridgeCaches::new();
        caches.insert_path_id("/a/x", "id-x", false);
        caches.rekey_path_id("/a/x", "/b/x");
        assert_eq!(caches.path_id("/a/x"), None);
        assert_eq!(
            caches.path_id("/b/x"),
            Some(PathIdEntry {
                id: "id-x".into(),
                is_dir: false
            })
        );
    }

    #[test]
    fn listings_replace_wholesale_and_require_an_etag() {
        let caches = BridgeCaches::new();
        caches.store_listing("u", None, vec![entry("1", "a")]);
        assert!(caches.listing("u").is_none());

        caches.store_listing("u", Some("\"v1\"".into()), vec![entry("1", "a")]);
        assert_eq!(caches.listing_etag("u").as_deref(), Some("\"v1\""));

        caches.store_listing(
            "u",
            Some("\"v2\"".into()),
            vec![entry("2", "b"), entry("3", "c")],
        );
        let stored = caches.listing("u").unwrap();
        assert_eq!(stored.etag, "\"v2\"");
        assert_eq!(stored.entries.len(), 2);

        caches.drop_listing("u");
        assert!(caches.listing("u").is_none());
    }
}
