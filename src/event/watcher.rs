use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// 监听事件归一化后的两类变化
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Change {
    /// 新建 / 修改 / 改名目标
    Upsert(PathBuf),
    /// 删除 / 改名来源
    Delete(PathBuf),
}

/// 把一个 notify 事件拆成若干变化；访问类事件忽略
pub fn changes(event: &notify::Event) -> Vec<Change> {
    let upserts = || -> Vec<Change> { event.paths.iter().cloned().map(Change::Upsert).collect() };
    let deletes = || -> Vec<Change> { event.paths.iter().cloned().map(Change::Delete).collect() };

    match event.kind {
        EventKind::Create(_) => upserts(),
        EventKind::Remove(_) => deletes(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => deletes(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => upserts(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut out = Vec::with_capacity(2);
            if let Some(from) = event.paths.first() {
                out.push(Change::Delete(from.clone()));
            }
            if let Some(to) = event.paths.get(1) {
                out.push(Change::Upsert(to.clone()));
            }
            out
        }
        // 后端无法区分方向（如 FSEvents）：按当前是否存在判断
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .map(|p| {
                if p.exists() {
                    Change::Upsert(p.clone())
                } else {
                    Change::Delete(p.clone())
                }
            })
            .collect(),
        EventKind::Modify(_) => upserts(),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

/// 文件系统事件监听器（单层目录，不递归）
pub struct EventWatcher;

impl EventWatcher {
    /// 启动监听；返回的 watcher 必须由调用方持有，drop 即停止
    pub fn start<F>(dir: &Path, handler: F) -> Result<RecommendedWatcher>
    where
        F: Fn(notify::Event) + Send + 'static,
    {
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) => handler(event),
                Err(e) => tracing::warn!("Watch error: {}", e),
            },
            Config::default(),
        )?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        tracing::debug!("Watching {:?}", dir);
        Ok(watcher)
    }
}
