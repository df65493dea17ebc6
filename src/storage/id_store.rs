use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::Envelope;
use crate::error::{Error, Result};
use crate::index::{EnvelopeCache, TreeElementMapper};

pub const PATHS_FILE: &str = "paths.bin";
pub const OFFSETS_FILE: &str = "offsets.bin";
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

const MAX_PATH_BYTES: usize = 32767;
const SLOT_SIZE: u64 = 8;

/// 包络计算回调（缓存未命中时调用）
pub type EnvelopeFn = Arc<dyn Fn(&Path) -> Result<Envelope> + Send + Sync>;

struct StoreFiles {
    paths: File,
    offsets: File,
}

/// 标识符 ↔ 路径的双文件存储
///
/// 磁盘格式：
/// - `paths.bin`：append-only 记录 `[u16 BE 长度][UTF-8 字节]`，无填充、无分隔
/// - `offsets.bin`：稠密 u64 BE 数组，slot k 保存标识符 k+1 的记录偏移；长度恒为 8 的倍数
///
/// 路径以相对 `root` 的形式落盘以缩短文本；根目录外的路径原样保存为绝对路径。
/// 两个文件的所有读写都串行在同一把内部锁之后（与 tree 锁无关）。
pub struct PathIdStore {
    root: PathBuf,
    dir: PathBuf,
    files: Mutex<Option<StoreFiles>>,
    cache: EnvelopeCache,
    envelope_fn: EnvelopeFn,
}

impl PathIdStore {
    pub fn open(dir: &Path, root: &Path, envelope_fn: EnvelopeFn) -> Result<Self> {
        Self::open_with_capacity(dir, root, envelope_fn, DEFAULT_CACHE_CAPACITY)
    }

    pub fn open_with_capacity(
        dir: &Path,
        root: &Path,
        envelope_fn: EnvelopeFn,
        cache_capacity: usize,
    ) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let open = |name: &str| {
            OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(dir.join(name))
        };
        let paths = open(PATHS_FILE)?;
        let offsets = open(OFFSETS_FILE)?;

        let offsets_len = offsets.metadata()?.len();
        if offsets_len % SLOT_SIZE != 0 {
            return Err(Error::Corrupted {
                path: dir.join(OFFSETS_FILE),
                reason: format!("length {offsets_len} is not a multiple of {SLOT_SIZE}"),
            });
        }

        Ok(Self {
            root: root.to_path_buf(),
            dir: dir.to_path_buf(),
            files: Mutex::new(Some(StoreFiles { paths, offsets })),
            cache: EnvelopeCache::with_capacity(cache_capacity),
            envelope_fn,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 已分配的标识符 slot 数
    pub fn slot_count(&self) -> Result<u64> {
        let g = self.files.lock();
        let files = g.as_ref().ok_or(Error::Closed)?;
        Ok(files.offsets.metadata()?.len() / SLOT_SIZE)
    }

    pub fn cache_envelope(&self, path: &Path, envelope: Envelope) {
        self.cache.insert(path.to_path_buf(), envelope);
    }

    pub fn invalidate(&self, path: &Path) {
        self.cache.invalidate(path);
    }

    fn encode(&self, path: &Path) -> Result<Vec<u8>> {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        let text = rel
            .to_str()
            .ok_or_else(|| Error::NonUtf8Path(path.to_path_buf()))?;
        let bytes = text.as_bytes();
        if bytes.len() > MAX_PATH_BYTES {
            return Err(Error::PathTooLong { len: bytes.len() });
        }
        let mut out = Vec::with_capacity(2 + bytes.len());
        out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
        out.extend_from_slice(bytes);
        Ok(out)
    }

    fn decode(&self, text: &str) -> PathBuf {
        // 绝对路径 join 后仍是其自身
        self.root.join(text)
    }

    fn corrupted(&self, file: &str, reason: impl Into<String>) -> Error {
        Error::Corrupted {
            path: self.dir.join(file),
            reason: reason.into(),
        }
    }
}

/// 读一条长度前缀记录；干净的 EOF 返回 None
fn read_record(r: &mut impl Read) -> std::io::Result<Option<Vec<u8>>> {
    let mut len = [0u8; 2];
    match r.read_exact(&mut len) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let mut buf = vec![0u8; u16::from_be_bytes(len) as usize];
    r.read_exact(&mut buf)?;
    Ok(Some(buf))
}

impl TreeElementMapper<PathBuf> for PathIdStore {
    /// 线性扫描：先在 paths.bin 找记录偏移，再在 offsets.bin 找持有该偏移的 slot。
    /// 查找远少于插入，O(n) 可以接受；若规模变大，可加辅助哈希索引而不改文件格式。
    fn tree_identifier(&self, element: &PathBuf) -> Result<u64> {
        let wanted = self.encode(element)?;
        let wanted = &wanted[2..];

        let mut g = self.files.lock();
        let files = g.as_mut().ok_or(Error::Closed)?;

        files.paths.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(&files.paths);
        let mut offset = 0u64;
        let mut found = None;
        while let Some(rec) = read_record(&mut reader)? {
            if rec == wanted {
                found = Some(offset);
                break;
            }
            offset += 2 + rec.len() as u64;
        }
        let Some(offset) = found else {
            return Err(Error::PathNotFound(element.clone()));
        };

        files.offsets.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(&files.offsets);
        let mut slot = [0u8; SLOT_SIZE as usize];
        let mut index = 0u64;
        loop {
            match reader.read_exact(&mut slot) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            if u64::from_be_bytes(slot) == offset {
                return Ok(index + 1);
            }
            index += 1;
        }
        Err(Error::PathNotFound(element.clone()))
    }

    fn envelope(&self, element: &PathBuf) -> Result<Envelope> {
        if let Some(hit) = self.cache.get(element) {
            return Ok(hit);
        }
        let env = (self.envelope_fn)(element)?;
        self.cache.insert(element.clone(), env.clone());
        Ok(env)
    }

    fn set_tree_identifier(&self, element: &PathBuf, id: u64) -> Result<()> {
        if id == 0 {
            return Err(Error::Unsupported("tree identifiers start at 1"));
        }
        let record = self.encode(element)?;

        let mut g = self.files.lock();
        let files = g.as_mut().ok_or(Error::Closed)?;

        // slot 必须稠密：补零的空洞会被解码成偏移 0 处的记录
        let slots = files.offsets.metadata()?.len() / SLOT_SIZE;
        if id > slots + 1 {
            return Err(Error::Unsupported("tree identifiers must be assigned without gaps"));
        }

        let offset = files.paths.seek(SeekFrom::End(0))?;
        files.paths.write_all(&record)?;
        files.paths.flush()?;

        files.offsets.seek(SeekFrom::Start((id - 1) * SLOT_SIZE))?;
        files.offsets.write_all(&offset.to_be_bytes())?;
        files.offsets.flush()?;
        Ok(())
    }

    fn object_from_tree_identifier(&self, id: u64) -> Result<PathBuf> {
        if id == 0 {
            return Err(Error::IdNotFound(id));
        }
        let mut g = self.files.lock();
        let files = g.as_mut().ok_or(Error::Closed)?;

        let slot_pos = (id - 1) * SLOT_SIZE;
        if slot_pos + SLOT_SIZE > files.offsets.metadata()?.len() {
            return Err(Error::IdNotFound(id));
        }
        let mut slot = [0u8; SLOT_SIZE as usize];
        files.offsets.seek(SeekFrom::Start(slot_pos))?;
        files.offsets.read_exact(&mut slot)?;
        let offset = u64::from_be_bytes(slot);

        files.paths.seek(SeekFrom::Start(offset))?;
        let rec = read_record(&mut files.paths)?
            .ok_or_else(|| self.corrupted(PATHS_FILE, format!("no record at offset {offset}")))?;
        let text = String::from_utf8(rec)
            .map_err(|_| self.corrupted(PATHS_FILE, format!("invalid UTF-8 at offset {offset}")))?;
        Ok(self.decode(&text))
    }

    fn close(&self) -> Result<()> {
        let mut g = self.files.lock();
        if let Some(files) = g.take() {
            files.paths.sync_all()?;
            files.offsets.sync_all()?;
        }
        self.cache.clear();
        Ok(())
    }
}
