//! Bidirectional dependency index for derived cache entries.
//!
//! Tracks which entities each cached entry was built from, so a change to an
//! entity finds every entry to drop without scanning the cache.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::RwLock;

use crate::domain::types::ContentId;
use crate::util::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::dependencies";

/// Something a derived entry was built from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Dependency {
    Content(ContentId),
    Template(String),
}

pub struct DependencyIndex<K> {
    dependency_to_keys: RwLock<HashMap<Dependency, HashSet<K>>>,
    key_to_dependencies: RwLock<HashMap<K, HashSet<Dependency>>>,
}

impl<K> DependencyIndex<K>
where
    K: Clone + Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            dependency_to_keys: RwLock::new(HashMap::new()),
            key_to_dependencies: RwLock::new(HashMap::new()),
        }
    }

    /// Record `key` as built from `dependencies`, replacing earlier links.
    pub fn register(&self, key: K, dependencies: HashSet<Dependency>) {
        let mut d2k = rw_write(&self.dependency_to_keys, SOURCE, "register.d2k");
        let mut k2d = rw_write(&self.key_to_dependencies, SOURCE, "register.k2d");

        if let Some(previous) = k2d.remove(&key) {
            detach(&mut d2k, &key, previous);
        }
        for dependency in &dependencies {
            d2k.entry(dependency.clone())
                .or_default()
                .insert(key.clone());
        }
        k2d.insert(key, dependencies);
    }

    pub fn keys_for(&self, dependency: &Dependency) -> HashSet<K> {
        rw_read(&self.dependency_to_keys, SOURCE, "keys_for")
            .get(dependency)
            .cloned()
            .unwrap_or_default()
    }

    pub fn unregister(&self, key: &K) {
        let mut d2k = rw_write(&self.dependency_to_keys, SOURCE, "unregister.d2k");
        let mut k2d = rw_write(&self.key_to_dependencies, SOURCE, "unregister.k2d");
        if let Some(dependencies) = k2d.remove(key) {
            detach(&mut d2k, key, dependencies);
        }
    }

    /// Drop every key built from `dependency` and return them.
    pub fn take(&self, dependency: &Dependency) -> HashSet<K> {
        let mut d2k = rw_write(&self.dependency_to_keys, SOURCE, "take.d2k");
        let mut k2d = rw_write(&self.key_to_dependencies, SOURCE, "take.k2d");

        let keys = d2k.remove(dependency).unwrap_or_default();
        for key in &keys {
            if let Some(dependencies) = k2d.remove(key) {
                detach(&mut d2k, key, dependencies);
            }
        }
        keys
    }

    pub fn clear(&self) {
        rw_write(&self.dependency_to_keys, SOURCE, "clear.d2k").clear();
        rw_write(&self.key_to_dependencies, SOURCE, "clear.k2d").clear();
    }

    pub fn key_count(&self) -> usize {
        rw_read(&self.key_to_dependencies, SOURCE, "key_count").len()
    }

    pub fn dependency_count(&self) -> usize {
        rw_read(&self.dependency_to_keys, SOURCE, "dependency_count").len()
    }
}

impl<K> Default for DependencyIndex<K>
where
    K: Clone + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

fn detach<K: Eq + Hash>(
    d2k: &mut HashMap<Dependency, HashSet<K>>,
    key: &K,
    dependencies: HashSet<Dependency>,
) {
    for dependency in dependencies {
        if let Some(keys) = d2k.get_mut(&dependency) {
            keys.remove(key);
            if keys.is_empty() {
                d2k.remove(&dependency);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(items: &[Dependency]) -> HashSet<Dependency> {
        items.iter().cloned().collect()
    }

    #[test]
    fn take_removes_every_link_of_the_dropped_keys() {
        let index = DependencyIndex::new();
        index.register(
            "home",
            deps(&[
                Dependency::Content(ContentId(1)),
                Dependency::Template("page".to_string()),
            ]),
        );
        index.register("about", deps(&[Dependency::Content(ContentId(2))]));

        let taken = index.take(&Dependency::Content(ContentId(1)));
        assert_eq!(taken, HashSet::from(["home"]));
        assert!(
            index
                .keys_for(&Dependency::Template("page".to_string()))
                .is_empty()
        );
        assert_eq!(index.key_count(), 1);
        assert_eq!(index.dependency_count(), 1);
    }

    #[test]
    fn re_registering_replaces_old_links() {
        let index = DependencyIndex::new();
        index.register(7, deps(&[Dependency::Content(ContentId(1))]));
        index.register(7, deps(&[Dependency::Content(ContentId(2))]));

        assert!(index.keys_for(&Dependency::Content(ContentId(1))).is_empty());
        assert_eq!(
            index.keys_for(&Dependency::Content(ContentId(2))),
            HashSet::from([7])
        );

        index.unregister(&7);
        assert_eq!(index.dependency_count(), 0);
    }
}
