use dashmap::{mapref::entry::Entry, DashMap};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use crate::models::Link;

/// Thread-safe in-memory cache mapping short_code -> resolvable link.
///
/// Backed by a DashMap so concurrent redirects read without contending.
/// Only `LinkStore` writes to it. Every update or delete evicts the code
/// after its write commits, and every eviction bumps `evictions`.
///
/// A reader that loaded a row from the database fills the cache with
/// `insert_if_unchanged`, passing the epoch it saw *before* the read. If any
/// eviction happened in between, the row may be stale and is not cached, so
/// a deleted or edited link cannot be brought back by a slow reader.
#[derive(Clone, Debug, Default)]
pub struct LinkCache {
    inner: Arc<DashMap<String, Link>>,
    evictions: Arc<AtomicU64>,
}

impl LinkCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current eviction epoch. Take it before reading the row to be cached.
    pub fn epoch(&self) -> u64 {
        self.evictions.load(Ordering::SeqCst)
    }

    /// Cache `link` unless an eviction happened since `epoch` was taken.
    /// Returns whether the link was stored.
    pub fn insert_if_unchanged(&self, link: Link, epoch: u64) -> bool {
        // The shard lock held by `entry` orders this check against `remove`,
        // which bumps the epoch before it takes the same lock.
        match self.inner.entry(link.short_code.clone()) {
            Entry::Occupied(mut entry) => {
                if self.epoch() != epoch {
                    return false;
                }
                entry.insert(link);
            }
            Entry::Vacant(entry) => {
                if self.epoch() != epoch {
                    return false;
                }
                entry.insert(link);
            }
        }
        true
    }

    /// Look up a short code. Returns a clone of the cached link if present.
    pub fn get(&self, short_code: &str) -> Option<Link> {
        self.inner.get(short_code).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, short_code: &str) {
        self.evictions.fetch_add(1, Ordering::SeqCst);
        self.inner.remove(short_code);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn link(code: &str, url: &str) -> Link {
        let now = Utc::now();
        Link {
            short_code: code.into(),
            original_url: url.into(),
            owner_id: "owner".into(),
            created_at: now,
            updated_at: now,
            expires_at: None,
            is_active: true,
        }
    }

    #[test]
    fn insert_get_remove() {
        let cache = LinkCache::new();
        assert!(cache.is_empty());

        assert!(cache.insert_if_unchanged(link("abc", "https://a.example"), cache.epoch()));
        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.get("abc").map(|l| l.original_url),
            Some("https://a.example".to_owned())
        );

        assert!(cache.insert_if_unchanged(link("abc", "https://b.example"), cache.epoch()));
        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.get("abc").map(|l| l.original_url),
            Some("https://b.example".to_owned())
        );

        cache.remove("abc");
        assert!(cache.get("abc").is_none());
    }

    #[test]
    fn clones_share_entries() {
        let cache = LinkCache::new();
        let other = cache.clone();
        cache.insert_if_unchanged(link("abc", "https://a.example"), cache.epoch());
        assert!(other.get("abc").is_some());
    }

    #[test]
    fn stale_fill_after_eviction_is_refused() {
        let cache = LinkCache::new();
        cache.insert_if_unchanged(link("abc", "https://a.example"), cache.epoch());

        // A reader takes the epoch, then a delete evicts before the fill.
        let seen = cache.epoch();
        cache.remove("abc");

        assert!(!cache.insert_if_unchanged(link("abc", "https://a.example"), seen));
        assert!(cache.get("abc").is_none());

        // A fresh read after the eviction may fill again.
        assert!(cache.insert_if_unchanged(link("abc", "https://b.example"), cache.epoch()));
    }

    #[test]
    fn eviction_of_another_code_also_refuses_the_fill() {
        let cache = LinkCache::new();
        let seen = cache.epoch();
        cache.remove("other");
        assert!(!cache.insert_if_unchanged(link("abc", "https://a.example"), seen));
    }
}
