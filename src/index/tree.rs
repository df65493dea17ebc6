use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::{Crs, Envelope};
use crate::error::{Error, Result};
use crate::index::{SpatialTree, TreeElementMapper};

pub const META_FILE: &str = "tree.meta";
pub const ENTRIES_FILE: &str = "tree.env";

const TREE_MAGIC: u32 = 0x3145_5254; // "TRE1"
const TREE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct TreeHeader {
    magic: u32,
    version: u32,
    crs: Crs,
}

/// 磁盘 tree 引擎
///
/// - `tree.meta`：bincode 头（magic + version + 坐标系），创建时一次性写入（tmp + rename）
/// - `tree.env`：append-only 定长记录 `[u64 id][lower f64 × dim][upper f64 × dim]`，LE
///
/// 叶子条目常驻内存；每次操作前先追读其他实例追加的尾部记录，
/// 因此同一目录上的多个实例（共享同一把 tree 锁）看到一致的内容。
pub struct DiskTree {
    dir: PathBuf,
    crs: Crs,
    dim: usize,
    mapper: Arc<dyn TreeElementMapper<PathBuf>>,
    entries: Vec<(u64, Envelope)>,
    file: Option<File>,
    loaded_len: u64,
}

impl DiskTree {
    pub fn exists(dir: &Path) -> bool {
        dir.join(META_FILE).is_file()
    }

    pub fn create(
        dir: &Path,
        crs: Crs,
        mapper: Arc<dyn TreeElementMapper<PathBuf>>,
    ) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let header = TreeHeader {
            magic: TREE_MAGIC,
            version: TREE_VERSION,
            crs,
        };
        let tmp = dir.join(format!("{META_FILE}.tmp"));
        {
            let mut f = File::create(&tmp)?;
            bincode::serialize_into(&mut f, &header)?;
            f.sync_all()?;
        }
        std::fs::rename(&tmp, dir.join(META_FILE))?;
        tracing::info!("Created index tree in {:?} ({})", dir, header.crs);
        Self::open(dir, mapper)
    }

    pub fn open(dir: &Path, mapper: Arc<dyn TreeElementMapper<PathBuf>>) -> Result<Self> {
        let meta_path = dir.join(META_FILE);
        let header: TreeHeader = bincode::deserialize_from(File::open(&meta_path)?)?;
        if header.magic != TREE_MAGIC || header.version != TREE_VERSION {
            return Err(Error::Corrupted {
                path: meta_path,
                reason: format!(
                    "unexpected header magic={:#x} version={}",
                    header.magic, header.version
                ),
            });
        }

        let entries_path = dir.join(ENTRIES_FILE);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&entries_path)?;

        let dim = header.crs.dimension();
        let record_len = record_len(dim);
        let len = file.metadata()?.len();
        if len % record_len != 0 {
            // 崩溃留下的半条记录：截掉，避免后续追加错位
            let keep = len - len % record_len;
            tracing::warn!(
                "Truncating torn tail of {:?}: {} -> {} bytes",
                entries_path,
                len,
                keep
            );
            file.set_len(keep)?;
        }

        let mut tree = Self {
            dir: dir.to_path_buf(),
            crs: header.crs,
            dim,
            mapper,
            entries: Vec::new(),
            file: Some(file),
            loaded_len: 0,
        };
        tree.sync()?;
        tracing::debug!("Opened index tree {:?}: {} entries", dir, tree.entries.len());
        Ok(tree)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 追读尾部新记录（只读取完整记录）
    fn sync(&mut self) -> Result<()> {
        let record_len = record_len(self.dim);
        let file = self.file.as_mut().ok_or(Error::Closed)?;
        let len = file.metadata()?.len();
        let available = (len.saturating_sub(self.loaded_len) / record_len) * record_len;
        if available == 0 {
            return Ok(());
        }

        let mut buf = vec![0u8; available as usize];
        file.seek(SeekFrom::Start(self.loaded_len))?;
        file.read_exact(&mut buf)?;
        for rec in buf.chunks_exact(record_len as usize) {
            let (id, lower, upper) = decode_record(rec, self.dim);
            self.entries
                .push((id, Envelope::new(self.crs.clone(), lower, upper)?));
        }
        self.loaded_len += available;
        Ok(())
    }

    fn next_id(&self) -> u64 {
        self.entries.last().map(|(id, _)| id + 1).unwrap_or(1)
    }
}

fn record_len(dim: usize) -> u64 {
    8 + 16 * dim as u64
}

fn encode_record(id: u64, env: &Envelope) -> Vec<u8> {
    let mut out = Vec::with_capacity(record_len(env.dimension()) as usize);
    out.extend_from_slice(&id.to_le_bytes());
    for v in env.lower() {
        out.extend_from_slice(&v.to_le_bytes());
    }
    for v in env.upper() {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

fn decode_record(rec: &[u8], dim: usize) -> (u64, Vec<f64>, Vec<f64>) {
    let word = |i: usize| -> [u8; 8] {
        let mut w = [0u8; 8];
        w.copy_from_slice(&rec[i * 8..i * 8 + 8]);
        w
    };
    let id = u64::from_le_bytes(word(0));
    let lower = (0..dim).map(|i| f64::from_le_bytes(word(1 + i))).collect();
    let upper = (0..dim)
        .map(|i| f64::from_le_bytes(word(1 + dim + i)))
        .collect();
    (id, lower, upper)
}

impl SpatialTree for DiskTree {
    type Element = PathBuf;

    fn crs(&self) -> &Crs {
        &self.crs
    }

    fn insert(&mut self, element: PathBuf) -> Result<u64> {
        self.sync()?;
        let env = self.mapper.envelope(&element)?.transform_to(&self.crs)?;
        let id = self.next_id();
        self.mapper.set_tree_identifier(&element, id)?;

        let rec = encode_record(id, &env);
        let file = self.file.as_mut().ok_or(Error::Closed)?;
        file.write_all(&rec)?;
        file.flush()?;
        self.loaded_len += rec.len() as u64;
        self.entries.push((id, env));
        Ok(id)
    }

    fn search_ids(&mut self, area: &Envelope) -> Result<Vec<u64>> {
        self.sync()?;
        let area = area.transform_to(&self.crs)?;
        Ok(self
            .entries
            .iter()
            .filter(|(_, env)| env.intersects(&area))
            .map(|(id, _)| *id)
            .collect())
    }

    fn extent(&mut self) -> Result<Option<Envelope>> {
        self.sync()?;
        if self.entries.is_empty() {
            return Ok(None);
        }
        let mut acc = Envelope::empty(self.crs.clone());
        for (_, env) in &self.entries {
            acc.expand_to_include(env);
        }
        Ok(Some(acc))
    }

    fn count(&mut self) -> Result<u64> {
        self.sync()?;
        Ok(self.entries.len() as u64)
    }

    fn entry_envelope(&mut self, id: u64) -> Result<Option<Envelope>> {
        self.sync()?;
        Ok(self
            .entries
            .binary_search_by_key(&id, |(i, _)| *i)
            .ok()
            .map(|pos| self.entries[pos].1.clone()))
    }

    fn object(&self, id: u64) -> Result<PathBuf> {
        self.mapper.object_from_tree_identifier(id)
    }

    fn close(&mut self) -> Result<()> {
        if let Some(f) = self.file.take() {
            f.sync_all()?;
            self.mapper.close()?;
        }
        Ok(())
    }
}
