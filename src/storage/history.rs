use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};

use crate::error::Result;
use crate::storage::locks::{LockRegistry, SharedLock};

/// 索引历史标记：`<history>/<源文件相对路径>`
///
/// - 只有标记文件自身的 mtime 决定“是否已索引”，内容仅作审计（每次追加一行）
/// - 与 tree 锁相互独立，记账不阻塞 tree 写入
pub struct HistoryStore {
    root: PathBuf,
    dir: PathBuf,
    lock: SharedLock,
}

impl HistoryStore {
    pub fn open(root: &Path, dir: &Path, locks: &LockRegistry) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            root: root.to_path_buf(),
            dir: dir.to_path_buf(),
            lock: locks.lock_for(dir),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn marker_path(&self, source: &Path) -> PathBuf {
        match source.strip_prefix(&self.root) {
            Ok(rel) => self.dir.join(rel),
            // 根目录之外的文件：去掉根/盘符后镜像完整路径
            Err(_) => {
                let mut out = self.dir.clone();
                for c in source.components() {
                    if let Component::Normal(part) = c {
                        out.push(part);
                    }
                }
                out
            }
        }
    }

    /// 标记存在且标记时间 ≥ 源文件当前 mtime
    pub fn is_indexed(&self, source: &Path) -> Result<bool> {
        let _g = self.lock.lock();
        let marker = match std::fs::metadata(self.marker_path(source)) {
            Ok(md) => md,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let source_mtime = std::fs::metadata(source)?.modified()?;
        Ok(marker.modified()? >= source_mtime)
    }

    /// 创建/刷新标记并追加一行审计记录
    pub fn mark(&self, source: &Path) -> Result<()> {
        let _g = self.lock.lock();
        let marker = self.marker_path(source);
        if let Some(parent) = marker.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut f = OpenOptions::new().create(true).append(true).open(&marker)?;
        writeln!(f, "INDEXED ON {}", chrono::Utc::now().to_rfc3339())?;
        f.flush()?;
        Ok(())
    }
}
