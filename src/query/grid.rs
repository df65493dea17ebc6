use crate::core::{Crs, Envelope};
use crate::error::{Error, Result};

/// 单轴 网格坐标 ↔ CRS 坐标 变换
#[derive(Clone, Debug, PartialEq)]
pub enum AxisTransform {
    /// crs = offset + scale · grid
    Linear { scale: f64, offset: f64 },
    /// 网格下标 i 对应 `values[i]`，下标之间线性插值，越界时钳位到两端
    Discrete { values: Vec<f64> },
}

impl AxisTransform {
    pub fn to_crs(&self, g: f64) -> f64 {
        match self {
            AxisTransform::Linear { scale, offset } => offset + scale * g,
            AxisTransform::Discrete { values } => {
                let Some(last) = values.len().checked_sub(1) else {
                    return f64::NAN;
                };
                if g <= 0.0 {
                    return values[0];
                }
                let i = g.floor() as usize;
                if i >= last {
                    return values[last];
                }
                let frac = g - i as f64;
                values[i] + frac * (values[i + 1] - values[i])
            }
        }
    }

    pub fn to_grid(&self, c: f64) -> f64 {
        match self {
            AxisTransform::Linear { scale, offset } => (c - offset) / scale,
            AxisTransform::Discrete { values } => {
                let Some(last) = values.len().checked_sub(1) else {
                    return f64::NAN;
                };
                if c <= values[0] {
                    return 0.0;
                }
                if c >= values[last] {
                    return last as f64;
                }
                // values 升序：第一个 > c 的位置减一即左端点
                let i = values.partition_point(|v| *v <= c) - 1;
                let span = values[i + 1] - values[i];
                i as f64 + (c - values[i]) / span
            }
        }
    }
}

/// N 维网格几何：空间轴为仿射变换，时间轴在离散的已索引时刻之间插值
#[derive(Clone, Debug, PartialEq)]
pub struct GridGeometry {
    crs: Option<Crs>,
    extent: Vec<u64>,
    envelope: Option<Envelope>,
    axes: Vec<AxisTransform>,
}

impl GridGeometry {
    /// 退化几何：每个轴 0 个格子，没有变换
    pub fn empty(crs: Option<Crs>) -> Self {
        let dim = crs.as_ref().map(|c| c.dimension()).unwrap_or(0);
        Self {
            crs,
            extent: vec![0; dim],
            envelope: None,
            axes: Vec::new(),
        }
    }

    /// `resolution`：每个空间轴的像元大小；`times`：升序去重的已索引时刻
    pub fn build(envelope: &Envelope, resolution: &[f64], times: &[i64]) -> Result<Self> {
        let crs = envelope.crs().clone();
        let spatial = crs.spatial_axes().unwrap_or(0..0);
        if resolution.len() != spatial.len() {
            return Err(Error::Config(format!(
                "{} resolution value(s) for {} spatial axes",
                resolution.len(),
                spatial.len()
            )));
        }
        let time_axis = crs.time_axis();

        let mut extent = Vec::with_capacity(crs.dimension());
        let mut axes = Vec::with_capacity(crs.dimension());
        for axis in 0..crs.dimension() {
            if Some(axis) == time_axis {
                if times.is_empty() {
                    return Err(Error::NoData("no indexed time values".to_string()));
                }
                extent.push(times.len() as u64);
                axes.push(AxisTransform::Discrete {
                    values: times.iter().map(|t| *t as f64).collect(),
                });
            } else if spatial.contains(&axis) {
                let res = resolution[axis - spatial.start];
                if !(res.is_finite() && res > 0.0) {
                    return Err(Error::Config(format!(
                        "invalid resolution {res} on axis {axis}"
                    )));
                }
                let cells = (envelope.span(axis) / res).ceil().max(1.0);
                extent.push(cells as u64);
                axes.push(AxisTransform::Linear {
                    scale: res,
                    offset: envelope.min(axis),
                });
            } else {
                return Err(Error::Unsupported("grid over a non-spatial, non-temporal axis"));
            }
        }

        Ok(Self {
            crs: Some(crs),
            extent,
            envelope: Some(envelope.clone()),
            axes,
        })
    }

    pub fn crs(&self) -> Option<&Crs> {
        self.crs.as_ref()
    }

    /// 每个轴的格子数
    pub fn extent(&self) -> &[u64] {
        &self.extent
    }

    pub fn envelope(&self) -> Option<&Envelope> {
        self.envelope.as_ref()
    }

    pub fn axes(&self) -> &[AxisTransform] {
        &self.axes
    }

    pub fn is_empty(&self) -> bool {
        self.extent.is_empty() || self.extent.iter().any(|n| *n == 0)
    }

    pub fn grid_to_crs(&self, grid: &[f64]) -> Result<Vec<f64>> {
        self.check_point(grid)?;
        Ok(self
            .axes
            .iter()
            .zip(grid)
            .map(|(t, g)| t.to_crs(*g))
            .collect())
    }

    pub fn crs_to_grid(&self, point: &[f64]) -> Result<Vec<f64>> {
        self.check_point(point)?;
        Ok(self
            .axes
            .iter()
            .zip(point)
            .map(|(t, c)| t.to_grid(*c))
            .collect())
    }

    fn check_point(&self, point: &[f64]) -> Result<()> {
        if self.is_empty() {
            return Err(Error::NoData("empty grid geometry".to_string()));
        }
        if point.len() != self.axes.len() {
            return Err(Error::Config(format!(
                "point has {} coordinate(s), grid has {} axes",
                point.len(),
                self.axes.len()
            )));
        }
        Ok(())
    }
}
