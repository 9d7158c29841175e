//! Rendered fragment cache.
//!
//! Holds HTML rendered from a template for one node and preview flag. Each
//! entry records the nodes and templates it was rendered from; channels drop
//! entries through those dependencies.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use lru::LruCache;
use metrics::counter;
use tracing::debug;

use super::config::CacheConfig;
use super::dependencies::{Dependency, DependencyIndex};
use crate::domain::types::{ContentId, Preview};
use crate::util::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::fragments";
const METRIC_FRAGMENT_HIT: &str = "vellum_fragment_hit_total";
const METRIC_FRAGMENT_MISS: &str = "vellum_fragment_miss_total";
const METRIC_FRAGMENT_EVICT: &str = "vellum_fragment_evict_total";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FragmentKey {
    pub template: String,
    pub content_id: ContentId,
    pub preview: Preview,
}

impl FragmentKey {
    pub fn new(template: impl Into<String>, content_id: ContentId, preview: Preview) -> Self {
        Self {
            template: template.into(),
            content_id,
            preview,
        }
    }
}

pub struct FragmentCache {
    enabled: bool,
    entries: RwLock<LruCache<FragmentKey, Arc<str>>>,
    index: DependencyIndex<FragmentKey>,
    generation: AtomicU64,
}

impl FragmentCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            enabled: config.enable_fragments,
            entries: RwLock::new(LruCache::new(config.fragment_limit_non_zero())),
            index: DependencyIndex::new(),
            generation: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Read before rendering; pass it back to [`FragmentCache::put`].
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn get(&self, key: &FragmentKey) -> Option<Arc<str>> {
        if !self.enabled {
            return None;
        }
        let hit = rw_write(&self.entries, SOURCE, "get").get(key).cloned();
        match hit {
            Some(_) => counter!(METRIC_FRAGMENT_HIT).increment(1),
            None => counter!(METRIC_FRAGMENT_MISS).increment(1),
        }
        hit
    }

    /// Store a rendering unless an invalidation ran since `observed_generation`.
    /// Returns whether the fragment was stored.
    pub fn put(
        &self,
        key: FragmentKey,
        html: Arc<str>,
        dependencies: HashSet<Dependency>,
        observed_generation: u64,
    ) -> bool {
        if !self.enabled {
            return false;
        }
        let mut entries = rw_write(&self.entries, SOURCE, "put");
        if self.generation.load(Ordering::SeqCst) != observed_generation {
            debug!(template = %key.template, content_id = %key.content_id, "Discarded stale fragment");
            return false;
        }
        if let Some((evicted, _)) = entries.push(key.clone(), html)
            && evicted != key
        {
            counter!(METRIC_FRAGMENT_EVICT).increment(1);
            self.index.unregister(&evicted);
        }
        self.index.register(key, dependencies);
        true
    }

    /// Drop every fragment built from `dependency`; returns how many went.
    pub fn invalidate(&self, dependency: &Dependency) -> usize {
        let mut entries = rw_write(&self.entries, SOURCE, "invalidate");
        self.generation.fetch_add(1, Ordering::SeqCst);
        let keys = self.index.take(dependency);
        keys.iter()
            .filter(|key| entries.pop(*key).is_some())
            .count()
    }

    pub fn clear(&self) -> usize {
        let mut entries = rw_write(&self.entries, SOURCE, "clear");
        self.generation.fetch_add(1, Ordering::SeqCst);
        let dropped = entries.len();
        entries.clear();
        self.index.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(limit: usize) -> FragmentCache {
        FragmentCache::new(&CacheConfig {
            enable_fragments: true,
            fragment_limit: limit,
            template_limit: 4,
        })
    }

    fn deps(id: i32) -> HashSet<Dependency> {
        HashSet::from([
            Dependency::Content(ContentId(id)),
            Dependency::Template("page".to_string()),
        ])
    }

    #[test]
    fn invalidating_a_node_drops_only_its_fragments() {
        let cache = cache(8);
        let generation = cache.generation();
        let home = FragmentKey::new("page", ContentId(1), Preview::Published);
        let about = FragmentKey::new("page", ContentId(2), Preview::Published);
        assert!(cache.put(home.clone(), Arc::from("<p>home</p>"), deps(1), generation));
        assert!(cache.put(about.clone(), Arc::from("<p>about</p>"), deps(2), generation));

        assert_eq!(cache.invalidate(&Dependency::Content(ContentId(1))), 1);
        assert!(cache.get(&home).is_none());
        assert_eq!(cache.get(&about).as_deref(), Some("<p>about</p>"));

        assert_eq!(
            cache.invalidate(&Dependency::Template("page".to_string())),
            1
        );
        assert!(cache.is_empty());
    }

    #[test]
    fn renders_started_before_an_invalidation_are_not_stored() {
        let cache = cache(8);
        let generation = cache.generation();
        cache.invalidate(&Dependency::Content(ContentId(1)));

        let key = FragmentKey::new("page", ContentId(1), Preview::Draft);
        assert!(!cache.put(key.clone(), Arc::from("stale"), deps(1), generation));
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn eviction_unlinks_dependencies() {
        let cache = cache(1);
        let generation = cache.generation();
        cache.put(
            FragmentKey::new("page", ContentId(1), Preview::Published),
            Arc::from("a"),
            deps(1),
            generation,
        );
        cache.put(
            FragmentKey::new("page", ContentId(2), Preview::Published),
            Arc::from("b"),
            deps(2),
            generation,
        );
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.invalidate(&Dependency::Content(ContentId(1))), 0);
    }

    #[test]
    fn disabled_cache_stores_nothing() {
        let cache = FragmentCache::new(&CacheConfig {
            enable_fragments: false,
            ..CacheConfig::default()
        });
        let key = FragmentKey::new("page", ContentId(1), Preview::Published);
        assert!(!cache.put(key.clone(), Arc::from("a"), deps(1), cache.generation()));
        assert!(cache.get(&key).is_none());
    }
}
