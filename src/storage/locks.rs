use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

pub type SharedLock = Arc<Mutex<()>>;

/// 按规范化位置分配的互斥锁登记表
///
/// 同一个 registry 下，指向同一目录的多个 index/store 实例拿到同一把锁。
/// registry 由调用方持有并注入（测试可各自新建，互不干扰）；
/// 只保存 Weak，最后一个持有者释放后条目在下次分配时清理。
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: Mutex<HashMap<PathBuf, Weak<Mutex<()>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, location: &Path) -> SharedLock {
        let key = canonical_key(location);
        let mut g = self.locks.lock();
        if let Some(lock) = g.get(&key).and_then(Weak::upgrade) {
            return lock;
        }
        g.retain(|_, w| w.strong_count() > 0);

        let lock = Arc::new(Mutex::new(()));
        g.insert(key, Arc::downgrade(&lock));
        lock
    }
}

fn canonical_key(location: &Path) -> PathBuf {
    if let Ok(p) = std::fs::canonicalize(location) {
        return p;
    }
    // 尚不存在的位置：退化为绝对路径
    if location.is_absolute() {
        location.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(location))
            .unwrap_or_else(|_| location.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_tmp_dir(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("raster-harvest-{}-{}", tag, nanos))
    }

    fn live_locks(reg: &LockRegistry) -> usize {
        reg.locks
            .lock()
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    #[test]
    fn same_location_shares_one_lock() {
        let dir = unique_tmp_dir("locks");
        std::fs::create_dir_all(dir.join("sub")).unwrap();

        let reg = LockRegistry::new();
        let a = reg.lock_for(&dir);
        // 不同写法的同一目录
        let b = reg.lock_for(&dir.join("sub").join(".."));
        assert!(Arc::ptr_eq(&a, &b));

        let c = reg.lock_for(&dir.join("sub"));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(live_locks(&reg), 2);
    }

    #[test]
    fn registries_are_isolated() {
        let dir = unique_tmp_dir("locks-iso");
        std::fs::create_dir_all(&dir).unwrap();
        let a = LockRegistry::new().lock_for(&dir);
        let b = LockRegistry::new().lock_for(&dir);
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn released_locks_are_pruned() {
        let reg = LockRegistry::new();
        let dir = unique_tmp_dir("locks-prune");
        drop(reg.lock_for(&dir));
        assert_eq!(live_locks(&reg), 0);
        let _keep = reg.lock_for(&dir.join("other"));
        assert_eq!(reg.locks.lock().len(), 1);
    }
}
