pub mod geom;
pub mod group;
pub mod raster;
pub mod time;

pub use geom::*;
pub use group::*;
pub use raster::*;
pub use time::*;
