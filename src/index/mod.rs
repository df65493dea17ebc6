pub mod cache;
pub mod temporal;
pub mod tree;

use std::collections::HashMap;

use crate::core::{Crs, Envelope};
use crate::error::{Error, Result};

/// tree 引擎的元素翻译插件：标识符 ↔ 元素、元素 → 包络
///
/// ## 契约
/// - 标识符从 1 开始、严格递增，一经分配永久有效
/// - `full_map` 是禁止操作（持久化实现不会把全部映射读进内存）
pub trait TreeElementMapper<E>: Send + Sync {
    fn tree_identifier(&self, element: &E) -> Result<u64>;
    fn envelope(&self, element: &E) -> Result<Envelope>;
    fn set_tree_identifier(&self, element: &E, id: u64) -> Result<()>;
    fn object_from_tree_identifier(&self, id: u64) -> Result<E>;

    fn full_map(&self) -> Result<HashMap<u64, E>> {
        Err(Error::Unsupported("full identifier map"))
    }

    fn close(&self) -> Result<()>;
}

/// 空间 tree 引擎抽象
///
/// 所有调用都在 index 的 tree 锁内串行执行（粗粒度互斥）；
/// 将来若要读写分离，只需在该 trait 之后换实现，调用点不变。
pub trait SpatialTree: Send {
    type Element;

    fn crs(&self) -> &Crs;
    fn insert(&mut self, element: Self::Element) -> Result<u64>;
    fn search_ids(&mut self, area: &Envelope) -> Result<Vec<u64>>;
    fn extent(&mut self) -> Result<Option<Envelope>>;
    fn count(&mut self) -> Result<u64>;
    fn entry_envelope(&mut self, id: u64) -> Result<Option<Envelope>>;
    fn object(&self, id: u64) -> Result<Self::Element>;
    fn close(&mut self) -> Result<()>;
}

pub use cache::EnvelopeCache;
pub use temporal::TemporalIndex;
pub use tree::DiskTree;
