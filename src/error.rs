use std::path::PathBuf;

/// 库内统一错误类型
///
/// 分类：
/// - 可跳过的源文件错误（读取失败 / 无空间参考 / CRS 不兼容）：由 `try_index` 记录后跳过
/// - 配置/初始化错误：构造时直接返回给调用方
/// - 查找错误（`IdNotFound` / `PathNotFound` / `NoData`）：不 panic，显式返回
/// - 存储文件 I/O 错误：不重试，原样向上传播
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid file name pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("cannot extract timestamp from {name:?}: {reason}")]
    TimeParse { name: String, reason: String },

    #[error("path is {len} bytes of UTF-8, limit is 32767")]
    PathTooLong { len: usize },

    #[error("path is not valid UTF-8: {0:?}")]
    NonUtf8Path(PathBuf),

    #[error("no path bound to tree identifier {0}")]
    IdNotFound(u64),

    #[error("path not present in identifier store: {0:?}")]
    PathNotFound(PathBuf),

    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("no usable spatial reference in {0:?}")]
    NoSpatialRef(PathBuf),

    #[error("incompatible coordinate systems: {from} -> {to}")]
    IncompatibleCrs { from: String, to: String },

    #[error("no data available for envelope {0}")]
    NoData(String),

    #[error("raster reader failed: {0:#}")]
    Reader(#[from] anyhow::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("watch error: {0}")]
    Notify(#[from] notify::Error),

    #[error("corrupted store file {path:?}: {reason}")]
    Corrupted { path: PathBuf, reason: String },

    #[error("already closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, Error>;
