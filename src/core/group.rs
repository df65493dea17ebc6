use std::collections::BTreeSet;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// 文件组身份：(父目录, 去扩展名的文件名)
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub dir: PathBuf,
    pub base: OsString,
}

impl GroupKey {
    /// 从路径拆出 (身份, 扩展名)；扩展名带前导点，无扩展名时为空串
    pub fn split(path: &Path) -> Option<(GroupKey, OsString)> {
        let dir = path.parent()?.to_path_buf();
        let base = path.file_stem()?.to_os_string();
        let ext = match path.extension() {
            Some(e) => {
                let mut s = OsString::from(".");
                s.push(e);
                s
            }
            None => OsString::new(),
        };
        Some((GroupKey { dir, base }, ext))
    }

    fn path_with(&self, ext: &OsStr) -> PathBuf {
        let mut name = self.base.clone();
        name.push(ext);
        self.dir.join(name)
    }
}

/// 同目录、同 base name 的兄弟文件集合（一个逻辑数据集，如 .tif + .tfw）
#[derive(Clone, Debug)]
pub struct FileGroup {
    key: GroupKey,
    extensions: BTreeSet<OsString>,
}

impl PartialEq for FileGroup {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for FileGroup {}

impl FileGroup {
    /// 以单个文件建组；没有父目录或文件名的路径返回 None
    pub fn new(path: &Path) -> Option<Self> {
        let (key, ext) = GroupKey::split(path)?;
        let mut extensions = BTreeSet::new();
        extensions.insert(ext);
        Some(Self { key, extensions })
    }

    pub fn key(&self) -> &GroupKey {
        &self.key
    }

    pub fn dir(&self) -> &Path {
        &self.key.dir
    }

    pub fn base(&self) -> &OsStr {
        &self.key.base
    }

    pub fn extensions(&self) -> impl Iterator<Item = &OsStr> {
        self.extensions.iter().map(|e| e.as_os_str())
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// 身份不符或扩展名已存在时返回 false
    pub fn add(&mut self, path: &Path) -> bool {
        match GroupKey::split(path) {
            Some((key, ext)) if key == self.key => self.extensions.insert(ext),
            _ => false,
        }
    }

    pub fn remove(&mut self, path: &Path) -> bool {
        match GroupKey::split(path) {
            Some((key, ext)) if key == self.key => self.extensions.remove(&ext),
            _ => false,
        }
    }

    /// 合并另一个同身份组的扩展名；身份不同则不动
    pub fn merge(&mut self, other: &FileGroup) -> bool {
        if other.key != self.key {
            return false;
        }
        let before = self.extensions.len();
        self.extensions.extend(other.extensions.iter().cloned());
        self.extensions.len() != before
    }

    /// 调用时刻的快照：之后对组的修改不影响已产出的序列
    pub fn paths(&self) -> GroupPaths {
        GroupPaths {
            key: self.key.clone(),
            extensions: self.extensions.iter().cloned().collect(),
        }
    }
}

/// 惰性、有限、可重复遍历的路径序列
#[derive(Clone, Debug)]
pub struct GroupPaths {
    key: GroupKey,
    extensions: Arc<[OsString]>,
}

impl GroupPaths {
    pub fn iter(&self) -> impl Iterator<Item = PathBuf> + '_ {
        self.extensions.iter().map(|e| self.key.path_with(e))
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }
}

impl<'a> IntoIterator for &'a GroupPaths {
    type Item = PathBuf;
    type IntoIter = Box<dyn Iterator<Item = PathBuf> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn siblings_share_one_group() {
        let mut g = FileGroup::new(Path::new("/data/sst_20230101.tif")).unwrap();
        assert!(g.add(Path::new("/data/sst_20230101.tfw")));
        assert_eq!(g.base(), "sst_20230101");
        let exts: Vec<_> = g.extensions().collect();
        assert_eq!(exts, vec![OsStr::new(".tfw"), OsStr::new(".tif")]);
    }

    #[test]
    fn foreign_files_are_rejected() {
        let mut g = FileGroup::new(Path::new("/data/sst_20230101.tif")).unwrap();
        assert!(!g.add(Path::new("/other/sst_20230101.tfw")));
        assert!(!g.add(Path::new("/data/sst_20230102.tfw")));
        assert!(!g.remove(Path::new("/other/sst_20230101.tif")));
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn re_adding_known_extension_is_a_no_op() {
        let mut g = FileGroup::new(Path::new("/data/a.tif")).unwrap();
        assert!(!g.add(Path::new("/data/a.tif")));
        assert!(g.remove(Path::new("/data/a.tif")));
        assert!(g.is_empty());
        assert!(!g.remove(Path::new("/data/a.tif")));
    }

    #[test]
    fn extensionless_file_round_trips() {
        let g = FileGroup::new(Path::new("/data/README")).unwrap();
        let paths: Vec<_> = g.paths().iter().collect();
        assert_eq!(paths, vec![PathBuf::from("/data/README")]);
    }

    #[test]
    fn paths_snapshot_ignores_later_mutation() {
        let mut g = FileGroup::new(Path::new("/data/a.tif")).unwrap();
        let snap = g.paths();
        g.add(Path::new("/data/a.prj"));
        assert_eq!(snap.iter().count(), 1);
        // 可重复遍历
        assert_eq!((&snap).into_iter().count(), 1);
        assert_eq!(g.paths().len(), 2);
    }

    #[test]
    fn equality_is_identity_only() {
        let mut a = FileGroup::new(Path::new("/data/a.tif")).unwrap();
        let b = FileGroup::new(Path::new("/data/a.tfw")).unwrap();
        assert_eq!(a, b);
        assert!(a.merge(&b));
        assert_eq!(a.len(), 2);
        assert!(!a.merge(&FileGroup::new(Path::new("/data/b.tif")).unwrap()));
    }
}
