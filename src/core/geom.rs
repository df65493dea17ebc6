use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// 2D/ND 空间参考（只按 code 识别，不做重投影）
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpatialRef {
    pub code: String,
    pub dimension: usize,
}

impl SpatialRef {
    pub fn new(code: impl Into<String>, dimension: usize) -> Self {
        Self {
            code: code.into(),
            dimension,
        }
    }

    pub fn epsg(code: u32) -> Self {
        Self::new(format!("EPSG:{code}"), 2)
    }
}

impl fmt::Display for SpatialRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)
    }
}

/// 复合坐标系的组成部分；时间轴固定为 Unix epoch 毫秒
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CrsComponent {
    Spatial(SpatialRef),
    Time,
}

impl CrsComponent {
    pub fn dimension(&self) -> usize {
        match self {
            CrsComponent::Spatial(s) => s.dimension,
            CrsComponent::Time => 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Crs {
    components: Vec<CrsComponent>,
}

impl Crs {
    pub fn spatial(sref: SpatialRef) -> Self {
        Self {
            components: vec![CrsComponent::Spatial(sref)],
        }
    }

    /// 空间参考 × 时间轴（索引内部使用的固定坐标系）
    pub fn compound(sref: SpatialRef) -> Self {
        Self {
            components: vec![CrsComponent::Spatial(sref), CrsComponent::Time],
        }
    }

    pub fn from_components(components: Vec<CrsComponent>) -> Self {
        Self { components }
    }

    pub fn components(&self) -> &[CrsComponent] {
        &self.components
    }

    pub fn dimension(&self) -> usize {
        self.components.iter().map(|c| c.dimension()).sum()
    }

    pub fn spatial_ref(&self) -> Option<&SpatialRef> {
        self.components.iter().find_map(|c| match c {
            CrsComponent::Spatial(s) => Some(s),
            CrsComponent::Time => None,
        })
    }

    /// 时间轴所在的轴序号
    pub fn time_axis(&self) -> Option<usize> {
        let mut axis = 0;
        for c in &self.components {
            if *c == CrsComponent::Time {
                return Some(axis);
            }
            axis += c.dimension();
        }
        None
    }

    /// 空间轴序号范围
    pub fn spatial_axes(&self) -> Option<std::ops::Range<usize>> {
        let mut axis = 0;
        for c in &self.components {
            if let CrsComponent::Spatial(s) = c {
                return Some(axis..axis + s.dimension);
            }
            axis += c.dimension();
        }
        None
    }

    fn offset_of(&self, wanted: &CrsComponent) -> Option<usize> {
        let mut axis = 0;
        for c in &self.components {
            if c == wanted {
                return Some(axis);
            }
            axis += c.dimension();
        }
        None
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, c) in self.components.iter().enumerate() {
            if i > 0 {
                f.write_str(" + ")?;
            }
            match c {
                CrsComponent::Spatial(s) => write!(f, "{s}")?,
                CrsComponent::Time => f.write_str("time(ms)")?,
            }
        }
        Ok(())
    }
}

/// N 维包络（闭区间）。lower > upper 的轴表示空包络。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    crs: Crs,
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl Envelope {
    pub fn new(crs: Crs, lower: Vec<f64>, upper: Vec<f64>) -> Result<Self> {
        let dim = crs.dimension();
        if lower.len() != dim || upper.len() != dim {
            return Err(Error::Config(format!(
                "envelope has {}/{} ordinates, {} expects {}",
                lower.len(),
                upper.len(),
                crs,
                dim
            )));
        }
        Ok(Self { crs, lower, upper })
    }

    pub fn empty(crs: Crs) -> Self {
        let dim = crs.dimension();
        Self {
            crs,
            lower: vec![f64::INFINITY; dim],
            upper: vec![f64::NEG_INFINITY; dim],
        }
    }

    pub fn crs(&self) -> &Crs {
        &self.crs
    }

    pub fn lower(&self) -> &[f64] {
        &self.lower
    }

    pub fn upper(&self) -> &[f64] {
        &self.upper
    }

    pub fn dimension(&self) -> usize {
        self.lower.len()
    }

    pub fn min(&self, axis: usize) -> f64 {
        self.lower[axis]
    }

    pub fn max(&self, axis: usize) -> f64 {
        self.upper[axis]
    }

    pub fn span(&self, axis: usize) -> f64 {
        self.upper[axis] - self.lower[axis]
    }

    pub fn is_empty(&self) -> bool {
        self.lower
            .iter()
            .zip(&self.upper)
            .any(|(lo, hi)| !(lo <= hi))
    }

    pub fn set_range(&mut self, axis: usize, lo: f64, hi: f64) {
        self.lower[axis] = lo;
        self.upper[axis] = hi;
    }

    /// 闭区间相交（边界接触也算相交）；调用方保证同一坐标系
    pub fn intersects(&self, other: &Envelope) -> bool {
        if self.dimension() != other.dimension() || self.is_empty() || other.is_empty() {
            return false;
        }
        (0..self.dimension())
            .all(|i| self.lower[i] <= other.upper[i] && other.lower[i] <= self.upper[i])
    }

    pub fn expand_to_include(&mut self, other: &Envelope) {
        if other.is_empty() {
            return;
        }
        for i in 0..self.dimension().min(other.dimension()) {
            self.lower[i] = self.lower[i].min(other.lower[i]);
            self.upper[i] = self.upper[i].max(other.upper[i]);
        }
    }

    /// 把包络改写到 `target` 坐标系：按组成部分匹配（可换轴序），
    /// 缺失的时间轴展开为整条时间线；空间参考不同则失败（不做重投影）。
    pub fn transform_to(&self, target: &Crs) -> Result<Envelope> {
        if &self.crs == target {
            return Ok(self.clone());
        }
        let incompatible = || Error::IncompatibleCrs {
            from: self.crs.to_string(),
            to: target.to_string(),
        };

        let mut lower = Vec::with_capacity(target.dimension());
        let mut upper = Vec::with_capacity(target.dimension());
        for component in target.components() {
            match self.crs.offset_of(component) {
                Some(src) => {
                    let dim = component.dimension();
                    lower.extend_from_slice(&self.lower[src..src + dim]);
                    upper.extend_from_slice(&self.upper[src..src + dim]);
                }
                None if *component == CrsComponent::Time => {
                    lower.push(f64::NEG_INFINITY);
                    upper.push(f64::INFINITY);
                }
                None => return Err(incompatible()),
            }
        }
        Envelope::new(target.clone(), lower, upper)
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for i in 0..self.dimension() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}..{}", self.lower[i], self.upper[i])?;
        }
        write!(f, "] ({})", self.crs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wgs84() -> SpatialRef {
        SpatialRef::epsg(4326)
    }

    #[test]
    fn compound_axes_layout() {
        let crs = Crs::compound(wgs84());
        assert_eq!(crs.dimension(), 3);
        assert_eq!(crs.time_axis(), Some(2));
        assert_eq!(crs.spatial_axes(), Some(0..2));
        assert_eq!(crs.to_string(), "EPSG:4326 + time(ms)");
    }

    #[test]
    fn empty_envelope_grows_on_expand() {
        let crs = Crs::spatial(wgs84());
        let mut acc = Envelope::empty(crs.clone());
        assert!(acc.is_empty());

        let a = Envelope::new(crs.clone(), vec![0.0, 0.0], vec![1.0, 1.0]).unwrap();
        let b = Envelope::new(crs, vec![2.0, -1.0], vec![3.0, 0.5]).unwrap();
        acc.expand_to_include(&a);
        acc.expand_to_include(&b);
        assert!(!acc.is_empty());
        assert_eq!(acc.lower(), &[0.0, -1.0]);
        assert_eq!(acc.upper(), &[3.0, 1.0]);
    }

    #[test]
    fn touching_boundaries_intersect() {
        let crs = Crs::spatial(wgs84());
        let a = Envelope::new(crs.clone(), vec![0.0, 0.0], vec![1.0, 1.0]).unwrap();
        let b = Envelope::new(crs.clone(), vec![1.0, 1.0], vec![2.0, 2.0]).unwrap();
        let c = Envelope::new(crs, vec![1.5, 1.5], vec![2.0, 2.0]).unwrap();
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn spatial_query_widens_to_full_time_line() {
        let q = Envelope::new(Crs::spatial(wgs84()), vec![0.0, 0.0], vec![1.0, 1.0]).unwrap();
        let t = q.transform_to(&Crs::compound(wgs84())).unwrap();
        assert_eq!(t.min(2), f64::NEG_INFINITY);
        assert_eq!(t.max(2), f64::INFINITY);
        assert_eq!(t.min(0), 0.0);
    }

    #[test]
    fn time_first_envelope_is_transposed() {
        let src_crs =
            Crs::from_components(vec![CrsComponent::Time, CrsComponent::Spatial(wgs84())]);
        let src = Envelope::new(src_crs, vec![10.0, 1.0, 2.0], vec![11.0, 3.0, 4.0]).unwrap();
        let t = src.transform_to(&Crs::compound(wgs84())).unwrap();
        assert_eq!(t.lower(), &[1.0, 2.0, 10.0]);
        assert_eq!(t.upper(), &[3.0, 4.0, 11.0]);
    }

    #[test]
    fn other_spatial_reference_is_rejected() {
        let src = Envelope::new(
            Crs::spatial(SpatialRef::epsg(3857)),
            vec![0.0, 0.0],
            vec![1.0, 1.0],
        )
        .unwrap();
        let err = src.transform_to(&Crs::compound(wgs84())).unwrap_err();
        assert!(matches!(err, Error::IncompatibleCrs { .. }));
    }

    #[test]
    fn ordinate_count_must_match_crs() {
        assert!(Envelope::new(Crs::compound(wgs84()), vec![0.0, 0.0], vec![1.0, 1.0]).is_err());
    }
}
