//! Opening pyramidal slides and extracting tractable regions from them.
//!
//! ```text
//! SlideReader::open ──► SlideHandle (levels, metadata, tile index)
//!        │
//!        ├─ select_region ──► RegionPlan::Whole | RegionPlan::Tiled
//!        │
//!        └─ extract(request) ──► PixelBuffer (fits the envelope)
//! ```

mod extract;
mod handle;
mod reader;
mod region;

pub use extract::extract_region;
pub use handle::{LevelInfo, SlideHandle};
pub use reader::SlideReader;
pub use region::{
    decoded_bytes, plan_grid, select_region, split_axis, CropBox, Envelope, PlanError,
    PlannerSettings, RegionPlan, RegionRequest, Span, TileGrid,
};
