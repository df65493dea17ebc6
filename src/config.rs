use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::PatternTimestamp;
use crate::error::{Error, Result};

pub const DEFAULT_DELAY_MS: u64 = 5000;
pub const HISTORY_DIR_NAME: &str = ".history";
pub const INDEX_DIR_NAME: &str = ".index";

fn default_delay() -> u64 {
    DEFAULT_DELAY_MS
}

/// 采集配置（TOML，kebab-case 键）
///
/// ```toml
/// path = "/data/sst"
/// pattern = 'sst_(\d{8})'
/// time-index = 1
/// time-format = "%Y%m%d"
/// delay = 5000
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct HarvestConfig {
    /// 被监听目录
    pub path: PathBuf,
    /// 从文件名截取时间串的正则
    pub pattern: String,
    /// `pattern` 中时间串所在的捕获组
    pub time_index: usize,
    /// chrono strftime 格式
    pub time_format: String,
    /// debounce 延迟（毫秒）
    #[serde(default = "default_delay")]
    pub delay: u64,
    /// 时间串只有日期时补的时刻（当日毫秒数）
    #[serde(default)]
    pub milli_of_day: u32,
    /// 时间串没有时区时补的 UTC 偏移（秒）
    #[serde(default)]
    pub offset_seconds: i32,
    /// 删除该文件（或其子路径）触发全量重扫；相对路径基于 `path`
    #[serde(default)]
    pub reset_trigger: Option<PathBuf>,
    /// tree / id store 文件所在目录，默认 `<path>/.index`
    #[serde(default)]
    pub index_dir: Option<PathBuf>,
}

impl HarvestConfig {
    pub fn new(
        path: impl Into<PathBuf>,
        pattern: impl Into<String>,
        time_index: usize,
        time_format: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            pattern: pattern.into(),
            time_index,
            time_format: time_format.into(),
            delay: DEFAULT_DELAY_MS,
            milli_of_day: 0,
            offset_seconds: 0,
            reset_trigger: None,
            index_dir: None,
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay)
    }

    fn resolve(&self, p: &Path) -> PathBuf {
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.path.join(p)
        }
    }

    pub fn index_dir(&self) -> PathBuf {
        match &self.index_dir {
            Some(p) => self.resolve(p),
            None => self.path.join(INDEX_DIR_NAME),
        }
    }

    pub fn history_dir(&self) -> PathBuf {
        self.path.join(HISTORY_DIR_NAME)
    }

    pub fn reset_trigger(&self) -> Option<PathBuf> {
        self.reset_trigger.as_deref().map(|p| self.resolve(p))
    }

    /// `path` 换成规范化的绝对路径；派生的 index / history / 触发路径随之一致。
    /// 监听事件里的路径总是绝对的，扫描和登记必须使用同一写法。
    pub fn canonical(&self) -> Result<Self> {
        let path = std::fs::canonicalize(&self.path).map_err(|e| {
            Error::Config(format!("cannot resolve {:?}: {}", self.path, e))
        })?;
        Ok(Self {
            path,
            ..self.clone()
        })
    }

    /// 构造期校验：任何一项失败都是致命配置错误
    pub fn validate(&self) -> Result<()> {
        let md = std::fs::metadata(&self.path).map_err(|e| {
            Error::Config(format!("cannot access {:?}: {}", self.path, e))
        })?;
        if !md.is_dir() {
            return Err(Error::Config(format!("{:?} is not a directory", self.path)));
        }
        if md.permissions().readonly() {
            return Err(Error::Config(format!("{:?} is not writable", self.path)));
        }
        PatternTimestamp::from_config(self)?;
        Ok(())
    }
}
