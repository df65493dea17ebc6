use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::HarvestConfig;
use crate::core::{Envelope, FileGroup, FootprintReader, PatternTimestamp, RasterReader};
use crate::error::{Error, Result};
use crate::event::DirectoryHarvester;
use crate::index::TemporalIndex;
use crate::query::grid::GridGeometry;
use crate::stats::HarvestStats;
use crate::storage::LockRegistry;

struct CachedGrid {
    generation: u64,
    size: u64,
    geometry: Arc<GridGeometry>,
}

/// 只读时序栅格资源：目录采集 → 时空索引 → 按包络读取最新文件
pub struct TimedResource<R: RasterReader + 'static> {
    reader: Arc<R>,
    index: Arc<TemporalIndex>,
    harvester: Mutex<Option<DirectoryHarvester>>,
    grid: ArcSwapOption<CachedGrid>,
}

impl<R: RasterReader + 'static> TimedResource<R> {
    /// 校验配置、打开索引，并开始采集目录（初始扫描在返回前已入队）
    pub fn open(config: &HarvestConfig, reader: R, locks: &LockRegistry) -> Result<Self> {
        config.validate()?;
        let config = &config.canonical()?;
        let extractor = Arc::new(PatternTimestamp::from_config(config)?);
        let reader = Arc::new(reader);
        let stats = Arc::new(HarvestStats::new());
        let footprints: Arc<dyn FootprintReader> = reader.clone();
        let index = Arc::new(TemporalIndex::open(
            config,
            footprints,
            extractor,
            locks,
            stats.clone(),
        )?);

        let consumer = {
            let index = index.clone();
            let reader = reader.clone();
            move |group: FileGroup| -> anyhow::Result<()> {
                for path in &group.paths() {
                    if reader.accepts(&path) {
                        index.try_index(&path);
                    }
                }
                Ok(())
            }
        };
        let harvester = DirectoryHarvester::start(
            &config.path,
            config.delay(),
            config.reset_trigger(),
            stats,
            consumer,
        )?;

        let mut resource = Self::from_parts(index, reader);
        resource.harvester = Mutex::new(Some(harvester));
        Ok(resource)
    }

    /// 不带目录监听的资源（索引由调用方维护）
    pub fn from_parts(index: Arc<TemporalIndex>, reader: Arc<R>) -> Self {
        Self {
            reader,
            index,
            harvester: Mutex::new(None),
            grid: ArcSwapOption::empty(),
        }
    }

    pub fn index(&self) -> &Arc<TemporalIndex> {
        &self.index
    }

    pub fn reader(&self) -> &Arc<R> {
        &self.reader
    }

    pub fn stats(&self) -> &Arc<HarvestStats> {
        self.index.stats()
    }

    /// 强制全量重扫被监听目录；没有采集器时返回 0
    pub fn rescan(&self) -> usize {
        match self.harvester.lock().as_ref() {
            Some(h) => h.rescan(),
            None => 0,
        }
    }

    /// 网格几何；索引没有新写入时复用缓存
    pub fn grid_geometry(&self) -> Result<Arc<GridGeometry>> {
        let generation = self.index.generation();
        let size = self.index.size()?;
        if let Some(cached) = self.grid.load_full() {
            if cached.generation == generation && cached.size == size {
                return Ok(cached.geometry.clone());
            }
        }

        let geometry = Arc::new(self.compute_grid(size)?);
        self.grid.store(Some(Arc::new(CachedGrid {
            generation,
            size,
            geometry: geometry.clone(),
        })));
        Ok(geometry)
    }

    fn compute_grid(&self, size: u64) -> Result<GridGeometry> {
        if size == 0 {
            return Ok(GridGeometry::empty(self.index.crs()));
        }
        let envelope = self
            .index
            .get_envelope()?
            .ok_or_else(|| Error::NoData("index has no extent".to_string()))?;
        let sample = self
            .index
            .sample_path()?
            .ok_or_else(|| Error::NoData("index has no entries".to_string()))?;

        // 任取一个已索引文件的像元大小作为整体分辨率
        let footprint = self.reader.read_footprint(&sample)?;
        let resolution = footprint
            .lower
            .iter()
            .zip(&footprint.upper)
            .zip(&footprint.grid)
            .map(|((lo, hi), n)| {
                if *n == 0 {
                    Err(Error::Corrupted {
                        path: sample.clone(),
                        reason: "zero-sized pixel grid".to_string(),
                    })
                } else {
                    Ok((hi - lo) / *n as f64)
                }
            })
            .collect::<Result<Vec<f64>>>()?;

        let times = self.index.times()?;
        tracing::debug!(
            "Grid geometry from {:?}: resolution {:?}, {} time step(s)",
            sample,
            resolution,
            times.len()
        );
        GridGeometry::build(&envelope, &resolution, &times)
    }

    /// 查找与 `area` 相交的最新文件并交给 reader 解码；不给范围时取全幅 × 最新时刻
    pub fn read(&self, area: Option<&Envelope>) -> Result<R::Coverage> {
        let query = match area {
            Some(a) => a.clone(),
            None => self.latest_envelope()?,
        };
        let path = self.resolve(&query)?;
        tracing::debug!("Reading {:?} for {}", path, query);
        Ok(self.reader.read(&path, area)?)
    }

    /// 与 `area` 相交的最新文件
    pub fn resolve(&self, area: &Envelope) -> Result<PathBuf> {
        match self.index.find_most_recent(area) {
            Ok(Some(path)) => Ok(path),
            Ok(None) => Err(Error::NoData(area.to_string())),
            Err(e) => {
                tracing::warn!("Lookup for {} failed: {}", area, e);
                Err(Error::NoData(area.to_string()))
            }
        }
    }

    fn latest_envelope(&self) -> Result<Envelope> {
        let mut env = self
            .index
            .get_envelope()?
            .ok_or_else(|| Error::NoData("index is empty".to_string()))?;
        if let Some(axis) = env.crs().time_axis() {
            if let Some(t) = self.index.times()?.last() {
                env.set_range(axis, *t as f64, *t as f64);
            }
        }
        Ok(env)
    }

    /// 先停采集再关索引；可重复调用
    pub fn close(&self) -> Result<()> {
        if let Some(h) = self.harvester.lock().take() {
            h.close();
        }
        self.grid.store(None);
        self.index.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Crs, RawCoverage, SidecarReader, SpatialRef};
    use std::path::Path;
    use std::time::{Duration, Instant};

    fn unique_tmp_dir(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("raster-harvest-{}-{}", tag, nanos));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    const JAN_1: i64 = 1_672_531_200_000;
    const DAY: i64 = 86_400_000;

    fn raster(dir: &Path, base: &str, lower: [f64; 2], upper: [f64; 2], body: &[u8]) -> PathBuf {
        std::fs::write(
            dir.join(format!("{base}.json")),
            format!(
                r#"{{"crs":"EPSG:4326","lower":[{},{}],"upper":[{},{}],"grid":[10,20]}}"#,
                lower[0], lower[1], upper[0], upper[1]
            ),
        )
        .unwrap();
        let tif = dir.join(format!("{base}.tif"));
        std::fs::write(&tif, body).unwrap();
        tif
    }

    fn open(dir: &Path) -> TimedResource<SidecarReader> {
        let mut cfg = HarvestConfig::new(dir, r"sst_(\d{8})", 1, "%Y%m%d");
        cfg.delay = 20;
        TimedResource::open(&cfg, SidecarReader, &LockRegistry::new()).unwrap()
    }

    fn wait_for_size(res: &TimedResource<SidecarReader>, n: u64) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while res.index().size().unwrap() < n {
            assert!(Instant::now() < deadline, "timed out waiting for {n} entries");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn empty_directory_has_degenerate_grid_and_no_data() {
        let dir = unique_tmp_dir("resource-empty");
        let res = open(&dir);
        let grid = res.grid_geometry().unwrap();
        assert!(grid.is_empty());
        assert!(matches!(res.read(None), Err(Error::NoData(_))));
        res.close().unwrap();
        res.close().unwrap();
    }

    #[test]
    fn harvested_files_drive_grid_and_reads() {
        let dir = unique_tmp_dir("resource-read");
        raster(&dir, "sst_20230101", [0.0, 0.0], [10.0, 10.0], b"day1");
        raster(&dir, "sst_20230102", [0.0, 0.0], [10.0, 10.0], b"day2");
        let res = open(&dir);
        wait_for_size(&res, 2);

        let grid = res.grid_geometry().unwrap();
        assert_eq!(grid.extent(), &[10, 20, 2]);
        assert_eq!(grid.crs(), Some(&Crs::compound(SpatialRef::epsg(4326))));
        let p = grid.grid_to_crs(&[1.0, 1.0, 1.0]).unwrap();
        assert_eq!(p, vec![1.0, 0.5, (JAN_1 + DAY) as f64]);
        assert!(Arc::ptr_eq(&grid, &res.grid_geometry().unwrap()));

        // 默认读取：全幅 × 最新时刻
        let cov: RawCoverage = res.read(None).unwrap();
        assert_eq!(cov.bytes, b"day2");

        let first_day = Envelope::new(
            Crs::compound(SpatialRef::epsg(4326)),
            vec![2.0, 2.0, JAN_1 as f64],
            vec![3.0, 3.0, JAN_1 as f64],
        )
        .unwrap();
        assert_eq!(res.read(Some(&first_day)).unwrap().bytes, b"day1");

        let elsewhere = Envelope::new(
            Crs::spatial(SpatialRef::epsg(4326)),
            vec![50.0, 50.0],
            vec![60.0, 60.0],
        )
        .unwrap();
        assert!(matches!(res.read(Some(&elsewhere)), Err(Error::NoData(_))));

        let foreign = Envelope::new(
            Crs::spatial(SpatialRef::epsg(3857)),
            vec![0.0, 0.0],
            vec![1.0, 1.0],
        )
        .unwrap();
        assert!(matches!(res.read(Some(&foreign)), Err(Error::NoData(_))));
        res.close().unwrap();
    }

    #[test]
    fn grid_cache_is_refreshed_after_new_entries() {
        let dir = unique_tmp_dir("resource-cache");
        raster(&dir, "sst_20230101", [0.0, 0.0], [10.0, 10.0], b"a");
        let res = open(&dir);
        wait_for_size(&res, 1);
        let before = res.grid_geometry().unwrap();
        assert_eq!(before.extent()[2], 1);

        raster(&dir, "sst_20230103", [10.0, 0.0], [20.0, 10.0], b"b");
        res.index().try_index(&dir.join("sst_20230103.tif"));
        let after = res.grid_geometry().unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.extent(), &[20, 20, 2]);
        res.close().unwrap();
    }

    #[test]
    fn files_without_sidecar_are_not_offered() {
        let dir = unique_tmp_dir("resource-accept");
        std::fs::write(dir.join("sst_20230101.tif"), b"orphan").unwrap();
        raster(&dir, "sst_20230102", [0.0, 0.0], [1.0, 1.0], b"ok");
        let res = open(&dir);
        wait_for_size(&res, 1);
        std::thread::sleep(Duration::from_millis(100));

        let snap = res.stats().snapshot();
        assert_eq!(snap.files_indexed, 1);
        assert_eq!(snap.failures, 0);
        assert_eq!(res.index().size().unwrap(), 1);
        res.close().unwrap();
    }

    #[test]
    fn companion_files_do_not_shadow_the_raster() {
        let dir = unique_tmp_dir("resource-companions");
        raster(&dir, "sst_20230101", [0.0, 0.0], [10.0, 10.0], b"pixels");
        std::fs::write(dir.join("sst_20230101.tfw"), b"0.5\n0\n0\n-0.5\n0\n10\n").unwrap();
        let res = open(&dir);
        wait_for_size(&res, 1);
        std::thread::sleep(Duration::from_millis(100));

        assert_eq!(res.index().size().unwrap(), 1);
        let cov = res.read(None).unwrap();
        assert_eq!(cov.bytes, b"pixels");
        assert_eq!(cov.path.extension().unwrap(), "tif");
        res.close().unwrap();
    }

    #[test]
    fn relative_root_keeps_one_spelling_and_honours_the_trigger() {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let rel = PathBuf::from("target").join(format!("raster-harvest-relative-{nanos}"));
        std::fs::create_dir_all(&rel).unwrap();
        let real = std::fs::canonicalize(&rel).unwrap();
        raster(&rel, "sst_20230101", [0.0, 0.0], [10.0, 10.0], b"day1");
        std::fs::write(rel.join("reset.flag"), b"").unwrap();

        let mut cfg = HarvestConfig::new(&rel, r"sst_(\d{8})", 1, "%Y%m%d");
        cfg.delay = 20;
        cfg.reset_trigger = Some(PathBuf::from("reset.flag"));
        let res = TimedResource::open(&cfg, SidecarReader, &LockRegistry::new()).unwrap();
        wait_for_size(&res, 1);
        assert_eq!(res.index().root(), real.as_path());
        assert_eq!(res.index().get_object(1).unwrap(), real.join("sst_20230101.tif"));

        // 监听事件带来的是绝对路径：同一文件不会再登记一次
        raster(&rel, "sst_20230102", [0.0, 0.0], [10.0, 10.0], b"day2");
        wait_for_size(&res, 2);
        assert_eq!(res.index().get_object(2).unwrap(), real.join("sst_20230102.tif"));

        std::fs::remove_file(rel.join("reset.flag")).unwrap();
        let deadline = Instant::now() + Duration::from_secs(10);
        while res.stats().snapshot().rescans < 2 || res.stats().snapshot().files_up_to_date < 2 {
            assert!(Instant::now() < deadline, "reset trigger was not honoured");
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(res.index().size().unwrap(), 2);
        assert!(real.join(".history").join("sst_20230101.tif").is_file());

        assert!(res.rescan() >= 4);
        assert!(res.stats().snapshot().rescans >= 3);
        res.close().unwrap();
        assert_eq!(res.rescan(), 0);
        std::fs::remove_dir_all(&real).unwrap();
    }
}
