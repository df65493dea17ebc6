use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::core::geom::{Envelope, SpatialRef};

/// 单个栅格文件的覆盖范围
#[derive(Clone, Debug, PartialEq)]
pub struct Footprint {
    /// 空间参考；None 表示文件没有可用的地理参考
    pub crs: Option<SpatialRef>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
    /// 每个空间轴的像素数
    pub grid: Vec<u64>,
}

/// 索引侧只需要读 footprint（object safe，可以 `Arc<dyn FootprintReader>` 共享）
pub trait FootprintReader: Send + Sync {
    /// 组内哪些文件是真正的栅格（其余如 .tfw/.prj 只是伴随文件）
    fn accepts(&self, _path: &Path) -> bool {
        true
    }

    fn read_footprint(&self, path: &Path) -> anyhow::Result<Footprint>;
}

/// 读门面需要的完整读取能力；像素解码由实现方负责
pub trait RasterReader: FootprintReader {
    type Coverage;

    fn read(&self, path: &Path, area: Option<&Envelope>) -> anyhow::Result<Self::Coverage>;
}

#[derive(Debug, Deserialize)]
struct Sidecar {
    #[serde(default)]
    crs: Option<String>,
    lower: Vec<f64>,
    upper: Vec<f64>,
    grid: Vec<u64>,
}

/// 被当作栅格本体的扩展名（不区分大小写）；.tfw/.prj/.aux.xml 等只是伴随文件
pub const RASTER_EXTENSIONS: &[&str] = &["tif", "tiff", "nc", "grb", "grb2", "grib", "grib2", "img", "asc"];

/// 伴随 JSON 描述文件读取器：`<base>.<ext>` 的范围写在同组的 `<base>.json` 中
///
/// ```json
/// { "crs": "EPSG:4326", "lower": [-180, -90], "upper": [180, 90], "grid": [3600, 1800] }
/// ```
#[derive(Clone, Debug, Default)]
pub struct SidecarReader;

#[derive(Clone, Debug)]
pub struct RawCoverage {
    pub path: PathBuf,
    pub footprint: Footprint,
    pub bytes: Vec<u8>,
}

impl SidecarReader {
    pub fn sidecar_of(path: &Path) -> PathBuf {
        path.with_extension("json")
    }
}

impl FootprintReader for SidecarReader {
    fn accepts(&self, path: &Path) -> bool {
        let is_raster = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| RASTER_EXTENSIONS.iter().any(|r| e.eq_ignore_ascii_case(r)));
        is_raster && Self::sidecar_of(path).is_file()
    }

    fn read_footprint(&self, path: &Path) -> anyhow::Result<Footprint> {
        let sidecar = Self::sidecar_of(path);
        let text = std::fs::read_to_string(&sidecar)
            .map_err(|e| anyhow::anyhow!("cannot read sidecar {:?}: {}", sidecar, e))?;
        let s: Sidecar = serde_json::from_str(&text)?;

        let dim = s.lower.len();
        anyhow::ensure!(
            s.upper.len() == dim && s.grid.len() == dim,
            "sidecar {:?}: lower/upper/grid lengths differ",
            sidecar
        );

        Ok(Footprint {
            crs: s
                .crs
                .filter(|c| !c.trim().is_empty())
                .map(|c| SpatialRef::new(c, dim)),
            lower: s.lower,
            upper: s.upper,
            grid: s.grid,
        })
    }
}

impl RasterReader for SidecarReader {
    type Coverage = RawCoverage;

    fn read(&self, path: &Path, _area: Option<&Envelope>) -> anyhow::Result<RawCoverage> {
        let footprint = self.read_footprint(path)?;
        let bytes = std::fs::read(path)?;
        Ok(RawCoverage {
            path: path.to_path_buf(),
            footprint,
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_tmp_dir(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("raster-harvest-{}-{}", tag, nanos))
    }

    #[test]
    fn sidecar_describes_footprint() {
        let dir = unique_tmp_dir("sidecar");
        std::fs::create_dir_all(&dir).unwrap();
        let tif = dir.join("sst_20230101.tif");
        std::fs::write(&tif, b"pixels").unwrap();
        std::fs::write(
            dir.join("sst_20230101.json"),
            r#"{"crs":"EPSG:4326","lower":[0,10],"upper":[20,30],"grid":[200,200]}"#,
        )
        .unwrap();

        let r = SidecarReader;
        assert!(r.accepts(&tif));
        assert!(!r.accepts(&dir.join("sst_20230101.json")));

        let fp = r.read_footprint(&tif).unwrap();
        assert_eq!(fp.crs, Some(SpatialRef::epsg(4326)));
        assert_eq!(fp.grid, vec![200, 200]);
        assert_eq!(fp.lower, vec![0.0, 10.0]);
        assert_eq!(fp.upper, vec![20.0, 30.0]);

        let cov = r.read(&tif, None).unwrap();
        assert_eq!(cov.bytes, b"pixels");
    }

    #[test]
    fn companion_files_are_not_rasters() {
        let dir = unique_tmp_dir("sidecar-companions");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("sst_20230101.json"),
            r#"{"crs":"EPSG:4326","lower":[0,0],"upper":[1,1],"grid":[1,1]}"#,
        )
        .unwrap();
        for name in ["sst_20230101.tif", "sst_20230101.TIFF", "sst_20230101.nc"] {
            std::fs::write(dir.join(name), b"x").unwrap();
        }
        for name in ["sst_20230101.tfw", "sst_20230101.prj", "sst_20230101"] {
            std::fs::write(dir.join(name), b"x").unwrap();
        }

        let r = SidecarReader;
        assert!(r.accepts(&dir.join("sst_20230101.tif")));
        assert!(r.accepts(&dir.join("sst_20230101.TIFF")));
        assert!(r.accepts(&dir.join("sst_20230101.nc")));
        assert!(!r.accepts(&dir.join("sst_20230101.tfw")));
        assert!(!r.accepts(&dir.join("sst_20230101.prj")));
        assert!(!r.accepts(&dir.join("sst_20230101")));
        // 没有描述文件的栅格同样不接受
        assert!(!r.accepts(&dir.join("sst_20230102.tif")));
    }

    #[test]
    fn blank_crs_is_treated_as_missing() {
        let dir = unique_tmp_dir("sidecar-nocrs");
        std::fs::create_dir_all(&dir).unwrap();
        let tif = dir.join("a.tif");
        std::fs::write(&tif, b"").unwrap();
        std::fs::write(
            dir.join("a.json"),
            r#"{"crs":"  ","lower":[0,0],"upper":[1,1],"grid":[1,1]}"#,
        )
        .unwrap();

        let fp = SidecarReader.read_footprint(&tif).unwrap();
        assert!(fp.crs.is_none());
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let dir = unique_tmp_dir("sidecar-bad");
        std::fs::create_dir_all(&dir).unwrap();
        let tif = dir.join("a.tif");
        std::fs::write(
            dir.join("a.json"),
            r#"{"crs":"EPSG:4326","lower":[0,0],"upper":[1],"grid":[1,1]}"#,
        )
        .unwrap();
        assert!(SidecarReader.read_footprint(&tif).is_err());
    }
}
