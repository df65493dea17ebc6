use ignore::WalkBuilder;
use notify::RecommendedWatcher;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::core::FileGroup;
use crate::error::Result;
use crate::event::queue::{DelayQueue, DelayedFileGroup};
use crate::event::watcher::{changes, Change, EventWatcher};
use crate::stats::{bump, HarvestStats};

struct Inner {
    dir: PathBuf,
    delay: Duration,
    reset_trigger: Option<PathBuf>,
    queue: DelayQueue,
    stats: Arc<HarvestStats>,
}

impl Inner {
    /// 单个文件进入 debounce 队列
    fn offer(&self, path: &Path) {
        match FileGroup::new(path) {
            Some(group) => {
                tracing::trace!("Queue {:?}", path);
                self.queue.update(DelayedFileGroup::new(group, self.delay));
            }
            None => tracing::debug!("Ignoring unnamed path {:?}", path),
        }
    }

    /// 全量扫描目录中的普通文件（单层，不过滤隐藏文件 / ignore 规则）
    fn harvest_all(&self) -> usize {
        bump(&self.stats.rescans);
        let walker = WalkBuilder::new(&self.dir)
            .max_depth(Some(1))
            .standard_filters(false)
            .build();

        let mut n = 0;
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("Scan error in {:?}: {}", self.dir, e);
                    continue;
                }
            };
            if entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                self.offer(entry.path());
                n += 1;
            }
        }
        tracing::info!("Harvested {} file(s) in {:?}", n, self.dir);
        n
    }

    fn is_trigger(&self, path: &Path) -> bool {
        self.reset_trigger
            .as_deref()
            .map(|t| path.starts_with(t))
            .unwrap_or(false)
    }

    fn on_event(&self, event: notify::Event) {
        for change in changes(&event) {
            match change {
                Change::Upsert(path) => {
                    if path.is_dir() {
                        continue;
                    }
                    self.offer(&path);
                }
                Change::Delete(path) if self.is_trigger(&path) => {
                    tracing::info!("Reset trigger {:?} removed, rescanning {:?}", path, self.dir);
                    self.harvest_all();
                }
                Change::Delete(path) => {
                    // 单文件删除不会从索引中移除
                    tracing::debug!("Unhandled deletion of {:?}", path);
                }
            }
        }
    }
}

/// 触发路径改挂到规范化后的目录下：监听事件里的路径都以规范目录开头
fn rebase_trigger(trigger: PathBuf, given: &Path, canonical: &Path) -> PathBuf {
    match trigger.strip_prefix(given) {
        Ok(rel) => canonical.join(rel),
        Err(_) if trigger.is_relative() => canonical.join(trigger),
        Err(_) => trigger,
    }
}

/// 目录采集器：初始全量扫描 + 目录监听 → debounce 队列 → 专用 worker 线程交付文件组
///
/// 消费者返回的错误或 panic 只记录日志，不会中断 worker。
pub struct DirectoryHarvester {
    inner: Arc<Inner>,
    watcher: Mutex<Option<RecommendedWatcher>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DirectoryHarvester {
    pub fn start<F>(
        dir: &Path,
        delay: Duration,
        reset_trigger: Option<PathBuf>,
        stats: Arc<HarvestStats>,
        consumer: F,
    ) -> Result<Self>
    where
        F: Fn(FileGroup) -> anyhow::Result<()> + Send + 'static,
    {
        let canonical = std::fs::canonicalize(dir)?;
        let reset_trigger = reset_trigger.map(|t| rebase_trigger(t, dir, &canonical));
        let dir = canonical.as_path();
        let inner = Arc::new(Inner {
            dir: dir.to_path_buf(),
            delay,
            reset_trigger,
            queue: DelayQueue::new(),
            stats,
        });

        inner.harvest_all();

        let watcher = {
            let inner = inner.clone();
            EventWatcher::start(dir, move |event| inner.on_event(event))?
        };

        let worker = {
            let inner = inner.clone();
            thread::Builder::new()
                .name("harvest-worker".to_string())
                .spawn(move || Self::run_loop(&inner, consumer))?
        };

        tracing::info!(
            "Harvesting {:?} (delay {:?}, reset trigger {:?})",
            dir,
            delay,
            inner.reset_trigger
        );
        Ok(Self {
            inner,
            watcher: Mutex::new(Some(watcher)),
            worker: Mutex::new(Some(worker)),
        })
    }

    fn run_loop<F>(inner: &Inner, consumer: F)
    where
        F: Fn(FileGroup) -> anyhow::Result<()>,
    {
        while let Some(group) = inner.queue.take() {
            bump(&inner.stats.groups_delivered);
            tracing::debug!(
                "Delivering group {:?}/{:?} ({} file(s))",
                group.dir(),
                group.base(),
                group.len()
            );
            let key = group.key().clone();
            match catch_unwind(AssertUnwindSafe(|| consumer(group))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    bump(&inner.stats.consumer_errors);
                    tracing::warn!("Consumer failed on {:?}/{:?}: {:#}", key.dir, key.base, e);
                }
                Err(_) => {
                    bump(&inner.stats.consumer_errors);
                    tracing::warn!("Consumer panicked on {:?}/{:?}", key.dir, key.base);
                }
            }
        }
        tracing::debug!("Harvest worker for {:?} stopped", inner.dir);
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// 强制重新扫描整个目录
    pub fn rescan(&self) -> usize {
        self.inner.harvest_all()
    }

    /// 尚未到期的文件组数
    pub fn pending(&self) -> usize {
        self.inner.queue.len()
    }

    /// 停止监听与 worker；可重复调用
    pub fn close(&self) {
        if self.watcher.lock().take().is_some() {
            tracing::info!("Stopped watching {:?}", self.inner.dir);
        }
        self.inner.queue.close();

        let worker = self.worker.lock().take();
        if let Some(handle) = worker {
            // 在 worker 线程里（消费者回调中）close 时不能 join 自己
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::warn!("Harvest worker for {:?} panicked", self.inner.dir);
            }
        }
    }
}

impl Drop for DirectoryHarvester {
    fn drop(&mut self) {
        self.close();
    }
}
