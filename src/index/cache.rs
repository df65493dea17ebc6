use dashmap::DashMap;
use std::path::{Path, PathBuf};

use crate::core::Envelope;

/// 最近计算过的包络缓存（DashMap 实现，有界，近似 LFU 淘汰）
pub struct EnvelopeCache {
    inner: DashMap<PathBuf, Envelope>,
    access_count: DashMap<PathBuf, u64>,
    capacity: usize,
}

impl EnvelopeCache {
    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            inner: DashMap::with_capacity(cap),
            access_count: DashMap::with_capacity(cap),
            capacity: cap,
        }
    }

    pub fn get(&self, path: &Path) -> Option<Envelope> {
        let hit = self.inner.get(path).map(|e| e.value().clone())?;
        *self.access_count.entry(path.to_path_buf()).or_insert(0) += 1;
        Some(hit)
    }

    pub fn insert(&self, path: PathBuf, envelope: Envelope) {
        if !self.inner.contains_key(&path) && self.inner.len() >= self.capacity {
            // 淘汰访问次数最少的条目
            let victim = self
                .access_count
                .iter()
                .min_by_key(|e| *e.value())
                .map(|e| e.key().clone())
                .or_else(|| self.inner.iter().next().map(|e| e.key().clone()));

            if let Some(key) = victim {
                self.inner.remove(&key);
                self.access_count.remove(&key);
            }
        }

        self.access_count.entry(path.clone()).or_insert(0);
        self.inner.insert(path, envelope);
    }

    pub fn invalidate(&self, path: &Path) {
        self.inner.remove(path);
        self.access_count.remove(path);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn clear(&self) {
        self.inner.clear();
        self.access_count.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Crs, SpatialRef};

    fn env(x: f64) -> Envelope {
        Envelope::new(Crs::spatial(SpatialRef::epsg(4326)), vec![x, x], vec![x + 1.0, x + 1.0])
            .unwrap()
    }

    #[test]
    fn capacity_is_bounded_and_cold_entries_go_first() {
        let cache = EnvelopeCache::with_capacity(2);
        cache.insert(PathBuf::from("/a"), env(0.0));
        cache.insert(PathBuf::from("/b"), env(1.0));
        assert!(cache.get(Path::new("/a")).is_some());

        cache.insert(PathBuf::from("/c"), env(2.0));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(Path::new("/b")).is_none());
        assert!(cache.get(Path::new("/a")).is_some());
        assert!(cache.get(Path::new("/c")).is_some());
    }

    #[test]
    fn replacing_an_entry_does_not_evict() {
        let cache = EnvelopeCache::with_capacity(1);
        cache.insert(PathBuf::from("/a"), env(0.0));
        cache.insert(PathBuf::from("/a"), env(5.0));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(Path::new("/a")).unwrap().min(0), 5.0);

        cache.invalidate(Path::new("/a"));
        assert!(cache.is_empty());
    }
}
