use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use crate::config::HarvestConfig;
use crate::core::{Crs, Envelope, Footprint, FootprintReader, TimestampExtractor};
use crate::error::{Error, Result};
use crate::index::{DiskTree, SpatialTree, TreeElementMapper};
use crate::stats::{bump, HarvestStats};
use crate::storage::{EnvelopeFn, HistoryStore, LockRegistry, PathIdStore, SharedLock};

type BoxedTree = Box<dyn SpatialTree<Element = PathBuf>>;

/// 文件 → 时空包络：footprint 的空间范围 × 文件名时间点 `[t, t+1]`
struct EnvelopeBuilder {
    reader: Arc<dyn FootprintReader>,
    extractor: Arc<dyn TimestampExtractor>,
    crs: OnceLock<Crs>,
}

impl EnvelopeBuilder {
    fn build(&self, path: &Path, footprint: &Footprint) -> Result<Envelope> {
        let sref = footprint
            .crs
            .clone()
            .ok_or_else(|| Error::NoSpatialRef(path.to_path_buf()))?;
        if sref.dimension != footprint.lower.len() || sref.dimension != footprint.upper.len() {
            return Err(Error::Reader(anyhow::anyhow!(
                "footprint of {:?} has {} / {} bounds for a {}-d reference",
                path,
                footprint.lower.len(),
                footprint.upper.len(),
                sref.dimension
            )));
        }

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::NonUtf8Path(path.to_path_buf()))?;
        let t = self.extractor.extract(name)? as f64;

        let mut lower = footprint.lower.clone();
        let mut upper = footprint.upper.clone();
        lower.push(t);
        upper.push(t + 1.0);
        let env = Envelope::new(Crs::compound(sref), lower, upper)?;

        match self.crs.get() {
            Some(target) => env.transform_to(target),
            None => Ok(env),
        }
    }

    /// 缓存未命中时的完整路径：重新读取 footprint
    fn read_and_build(&self, path: &Path) -> Result<Envelope> {
        let footprint = self.reader.read_footprint(path)?;
        self.build(path, &footprint)
    }
}

/// 时空索引：把栅格文件登记进 tree 引擎并按包络查询
///
/// 锁顺序：tree 锁（按 tree 目录共享）→ 本实例 tree 句柄 → id store 内部锁。
/// 历史标记有自己的锁；写入路径上它嵌套在 tree 锁之内，反过来从不发生。
pub struct TemporalIndex {
    root: PathBuf,
    tree_dir: PathBuf,
    tree_lock: SharedLock,
    tree: Mutex<Option<BoxedTree>>,
    store: Arc<PathIdStore>,
    history: HistoryStore,
    builder: Arc<EnvelopeBuilder>,
    generation: AtomicU64,
    closed: AtomicBool,
    stats: Arc<HarvestStats>,
}

impl TemporalIndex {
    pub fn open(
        cfg: &HarvestConfig,
        reader: Arc<dyn FootprintReader>,
        extractor: Arc<dyn TimestampExtractor>,
        locks: &LockRegistry,
        stats: Arc<HarvestStats>,
    ) -> Result<Self> {
        let cfg = cfg.canonical()?;
        let root = cfg.path.clone();
        let tree_dir = cfg.index_dir();

        let builder = Arc::new(EnvelopeBuilder {
            reader,
            extractor,
            crs: OnceLock::new(),
        });
        let envelope_fn: EnvelopeFn = {
            let builder = builder.clone();
            Arc::new(move |p: &Path| builder.read_and_build(p))
        };
        let store = Arc::new(PathIdStore::open(&tree_dir, &root, envelope_fn)?);
        let history = HistoryStore::open(&root, &cfg.history_dir(), locks)?;

        let index = Self {
            tree_lock: locks.lock_for(&tree_dir),
            root,
            tree_dir,
            tree: Mutex::new(None),
            store,
            history,
            builder,
            generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            stats,
        };

        {
            let _g = index.tree_lock.lock();
            let mut tree = index.tree.lock();
            if DiskTree::exists(&index.tree_dir) {
                index.open_tree(&mut tree)?;
            }
        }
        tracing::info!(
            "Temporal index on {:?} (tree in {:?}, {} entries)",
            index.root,
            index.tree_dir,
            index.size()?
        );
        Ok(index)
    }

    fn open_tree(&self, slot: &mut Option<BoxedTree>) -> Result<()> {
        let mapper: Arc<dyn TreeElementMapper<PathBuf>> = self.store.clone();
        let tree = DiskTree::open(&self.tree_dir, mapper)?;
        let _ = self.builder.crs.set(tree.crs().clone());
        *slot = Some(Box::new(tree));
        Ok(())
    }

    /// 读路径：本实例还没有 tree 句柄时，打开另一个实例可能已经创建的 tree
    fn loaded<'a>(&self, slot: &'a mut Option<BoxedTree>) -> Result<Option<&'a mut BoxedTree>> {
        if slot.is_none() && !self.closed.load(Ordering::Acquire) && DiskTree::exists(&self.tree_dir) {
            self.open_tree(slot)?;
        }
        Ok(slot.as_mut())
    }

    /// 首个文件决定索引坐标系：其空间参考 × 时间轴
    fn ensure_tree<'a>(
        &self,
        slot: &'a mut Option<BoxedTree>,
        footprint: &Footprint,
        path: &Path,
    ) -> Result<&'a mut BoxedTree> {
        if slot.is_none() {
            if DiskTree::exists(&self.tree_dir) {
                // 可能由共享同一目录的另一个实例刚刚创建
                self.open_tree(slot)?;
            } else {
                let sref = footprint
                    .crs
                    .clone()
                    .ok_or_else(|| Error::NoSpatialRef(path.to_path_buf()))?;
                let crs = Crs::compound(sref);
                let mapper: Arc<dyn TreeElementMapper<PathBuf>> = self.store.clone();
                let tree = DiskTree::create(&self.tree_dir, crs.clone(), mapper)?;
                let _ = self.builder.crs.set(crs);
                *slot = Some(Box::new(tree));
            }
        }
        slot.as_mut().ok_or(Error::Closed)
    }

    /// 幂等登记：已索引且未修改的文件直接返回 true；失败记录日志后返回 false
    pub fn try_index(&self, path: &Path) -> bool {
        match self.index_file(path) {
            Ok(true) => {
                bump(&self.stats.files_indexed);
                true
            }
            Ok(false) => {
                bump(&self.stats.files_up_to_date);
                true
            }
            Err(e) => {
                bump(&self.stats.failures);
                tracing::warn!("Skipping {:?}: {}", path, e);
                false
            }
        }
    }

    /// 同一文件在标记、id store 里只保留一种写法（规范化的绝对路径）
    fn normalize(&self, path: &Path) -> PathBuf {
        std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
    }

    /// Ok(false) = 历史标记仍有效，没有写入
    fn index_file(&self, path: &Path) -> Result<bool> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        let path = &self.normalize(path);
        if self.history.is_indexed(path)? {
            tracing::trace!("Up to date: {:?}", path);
            return Ok(false);
        }

        let footprint = self.builder.reader.read_footprint(path)?;
        let id = {
            let _g = self.tree_lock.lock();
            // 读 footprint 期间别的调用方（或共享目录的另一个实例）可能已登记
            if self.history.is_indexed(path)? {
                tracing::trace!("Indexed concurrently: {:?}", path);
                return Ok(false);
            }
            let mut slot = self.tree.lock();
            let tree = self.ensure_tree(&mut slot, &footprint, path)?;
            let env = self.builder.build(path, &footprint)?;
            // 重新索引：旧包络作废，新条目使用新标识符
            self.store.invalidate(path);
            self.store.cache_envelope(path, env);
            let id = tree.insert(path.to_path_buf())?;
            self.history.mark(path)?;
            id
        };

        self.generation.fetch_add(1, Ordering::AcqRel);
        tracing::debug!("Indexed {:?} as #{}", path, id);
        Ok(true)
    }

    /// 与 `area` 相交的条目中标识符最大者（插入顺序即新旧顺序）
    pub fn find_most_recent(&self, area: &Envelope) -> Result<Option<PathBuf>> {
        let _g = self.tree_lock.lock();
        let mut slot = self.tree.lock();
        let Some(tree) = self.loaded(&mut slot)? else {
            return Ok(None);
        };
        match tree.search_ids(area)?.into_iter().max() {
            Some(id) => Ok(Some(tree.object(id)?)),
            None => Ok(None),
        }
    }

    /// 所有条目的并集包络；空索引返回 None
    pub fn get_envelope(&self) -> Result<Option<Envelope>> {
        let _g = self.tree_lock.lock();
        let mut slot = self.tree.lock();
        match self.loaded(&mut slot)? {
            Some(tree) => tree.extent(),
            None => Ok(None),
        }
    }

    pub fn size(&self) -> Result<u64> {
        let _g = self.tree_lock.lock();
        let mut slot = self.tree.lock();
        match self.loaded(&mut slot)? {
            Some(tree) => tree.count(),
            None => Ok(0),
        }
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.size()? == 0)
    }

    pub fn get_object(&self, id: u64) -> Result<PathBuf> {
        let _g = self.tree_lock.lock();
        let mut slot = self.tree.lock();
        match self.loaded(&mut slot)? {
            Some(tree) => tree.object(id),
            None => Err(Error::IdNotFound(id)),
        }
    }

    /// 任意一个已登记文件（用于推断分辨率）
    pub fn sample_path(&self) -> Result<Option<PathBuf>> {
        if self.is_empty()? {
            return Ok(None);
        }
        self.get_object(1).map(Some)
    }

    /// 所有条目时间轴下界（去重、升序）
    pub fn times(&self) -> Result<Vec<i64>> {
        let _g = self.tree_lock.lock();
        let mut slot = self.tree.lock();
        let Some(tree) = self.loaded(&mut slot)? else {
            return Ok(Vec::new());
        };
        let Some(axis) = tree.crs().time_axis() else {
            return Ok(Vec::new());
        };
        let mut out = BTreeSet::new();
        for id in 1..=tree.count()? {
            if let Some(env) = tree.entry_envelope(id)? {
                out.insert(env.min(axis) as i64);
            }
        }
        Ok(out.into_iter().collect())
    }

    /// 索引坐标系；第一个文件登记之前为 None
    pub fn crs(&self) -> Option<Crs> {
        self.builder.crs.get().cloned()
    }

    /// 每次成功写入 tree 递增，供上层缓存判断失效
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn is_indexed(&self, path: &Path) -> Result<bool> {
        self.history.is_indexed(&self.normalize(path))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stats(&self) -> &Arc<HarvestStats> {
        &self.stats
    }

    /// 关闭 tree（连带关闭 id store）；重复调用无副作用
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let _g = self.tree_lock.lock();
        let mut slot = self.tree.lock();
        if let Some(mut tree) = slot.take() {
            tree.close()?;
        } else {
            self.store.close()?;
        }
        tracing::info!("Closed temporal index on {:?}", self.root);
        Ok(())
    }
}

impl Drop for TemporalIndex {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("Closing temporal index on {:?} failed: {}", self.root, e);
        }
    }
}
