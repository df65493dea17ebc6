use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// 采集/索引运行计数（全部为单调递增的原子计数器）
#[derive(Debug, Default)]
pub struct HarvestStats {
    /// 交付给消费者的文件组
    pub groups_delivered: AtomicU64,
    /// 成功写入 tree 的文件
    pub files_indexed: AtomicU64,
    /// 因历史标记仍然有效而跳过的文件
    pub files_up_to_date: AtomicU64,
    /// `try_index` 失败（读取失败 / 无空间参考 / 时间解析失败 / CRS 不兼容）
    pub failures: AtomicU64,
    /// 全量重扫次数（含启动扫描）
    pub rescans: AtomicU64,
    /// 消费者返回错误或 panic 的次数
    pub consumer_errors: AtomicU64,
}

impl HarvestStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            groups_delivered: self.groups_delivered.load(Ordering::Relaxed),
            files_indexed: self.files_indexed.load(Ordering::Relaxed),
            files_up_to_date: self.files_up_to_date.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            rescans: self.rescans.load(Ordering::Relaxed),
            consumer_errors: self.consumer_errors.load(Ordering::Relaxed),
        }
    }
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub groups_delivered: u64,
    pub files_indexed: u64,
    pub files_up_to_date: u64,
    pub failures: u64,
    pub rescans: u64,
    pub consumer_errors: u64,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "╔══════════════════════════════════════════╗")?;
        writeln!(f, "║         raster-harvest statistics        ║")?;
        writeln!(f, "╠══════════════════════════════════════════╣")?;
        writeln!(f, "║ groups delivered: {:>12}           ║", self.groups_delivered)?;
        writeln!(f, "║ files indexed:    {:>12}           ║", self.files_indexed)?;
        writeln!(f, "║ up to date:       {:>12}           ║", self.files_up_to_date)?;
        writeln!(f, "║ failures:         {:>12}           ║", self.failures)?;
        writeln!(f, "║ rescans:          {:>12}           ║", self.rescans)?;
        writeln!(f, "║ consumer errors:  {:>12}           ║", self.consumer_errors)?;
        write!(f, "╚══════════════════════════════════════════╝")
    }
}
