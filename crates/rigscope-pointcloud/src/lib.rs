//! rigscope-pointcloud: depth image → colored 3D point cloud.
//!
//! ```text
//! DepthFrame ─┬─► DepthProjector ──── positions ─┐
//!             └─► SurfaceColorMapper ─ colors ────┴─► PointCloudFrame ──watch──► renderer
//! ```
//!
//! Both halves walk the same validity mask in the same row-major order, so
//! position `i` and color `i` always describe the same pixel.

pub mod assembler;
pub mod color;
pub mod projector;

pub use assembler::{AssembleOutcome, PointCloudAssembler, PointCloudFrame, PointCloudHandle};
pub use color::{hsv_to_rgb, Hsv, SurfaceColorMapper};
pub use projector::DepthProjector;
