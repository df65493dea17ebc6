pub mod grid;
pub mod resource;

pub use grid::{AxisTransform, GridGeometry};
pub use resource::TimedResource;
