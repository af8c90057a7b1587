//! Region selection and the tiling policy.
//!
//! Everything here is pure: a plan is a function of the level geometry, the
//! output envelope and the [`PlannerSettings`], so re-planning the same slide
//! always yields the same requests.

use std::fmt;

use serde::Serialize;

use super::handle::LevelInfo;

/// Largest output raster, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Envelope {
    pub width: u32,
    pub height: u32,
}

impl Envelope {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Limits that drive level selection and tiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannerSettings {
    /// Maximum decoded bytes of one extracted region
    pub memory_ceiling: u64,
    /// Smallest edge a tile may have unless the level itself is smaller
    pub min_tile_edge: u32,
}

/// Rectangle in level pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CropBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropBox {
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }
}

/// One extraction: a crop of a level, scaled into an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionRequest {
    pub level: usize,
    pub crop: CropBox,
    pub envelope: Envelope,
}

/// A contiguous run of pixels along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: u32,
    pub len: u32,
}

/// Column and row spans of a tile grid. Cells are their cross product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileGrid {
    pub columns: Vec<Span>,
    pub rows: Vec<Span>,
}

impl TileGrid {
    pub fn len(&self) -> usize {
        self.columns.len() * self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cells in row-major order (left to right, top to bottom).
    pub fn cells(&self) -> impl Iterator<Item = CropBox> + '_ {
        self.rows.iter().flat_map(move |row| {
            self.columns.iter().map(move |column| CropBox {
                x: column.start,
                y: row.start,
                width: column.len,
                height: row.len,
            })
        })
    }
}

/// What to extract from a slide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionPlan {
    /// One request covering a whole level
    Whole(RegionRequest),
    /// A grid over a level too large to decode at once
    Tiled {
        level: usize,
        grid: TileGrid,
        envelope: Envelope,
    },
}

impl RegionPlan {
    pub fn level(&self) -> usize {
        match self {
            RegionPlan::Whole(request) => request.level,
            RegionPlan::Tiled { level, .. } => *level,
        }
    }

    pub fn request_count(&self) -> usize {
        match self {
            RegionPlan::Whole(_) => 1,
            RegionPlan::Tiled { grid, .. } => grid.len(),
        }
    }

    /// The extraction requests in upload order.
    pub fn requests(&self) -> Vec<RegionRequest> {
        match self {
            RegionPlan::Whole(request) => vec![*request],
            RegionPlan::Tiled {
                level,
                grid,
                envelope,
            } => grid
                .cells()
                .map(|crop| RegionRequest {
                    level: *level,
                    crop,
                    envelope: *envelope,
                })
                .collect(),
        }
    }
}

/// Why no plan could be made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    NoLevels,
    EmptyEnvelope,
    /// Even one native tile (plus edge headroom) exceeds the ceiling
    CeilingBelowNativeTile {
        level: usize,
        required: u64,
        ceiling: u64,
    },
}

impl fmt::Display for PlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanError::NoLevels => write!(f, "slide has no pyramid levels"),
            PlanError::EmptyEnvelope => write!(f, "output envelope is empty"),
            PlanError::CeilingBelowNativeTile {
                level,
                required,
                ceiling,
            } => write!(
                f,
                "memory ceiling of {ceiling} bytes cannot hold one tile of level {level} ({required} bytes)"
            ),
        }
    }
}

impl std::error::Error for PlanError {}

/// Bytes needed to hold a decoded `width` x `height` region of `level`.
pub fn decoded_bytes(width: u32, height: u32, level: &LevelInfo) -> u64 {
    width as u64 * height as u64 * level.bytes_per_pixel()
}

/// Choose the level and extraction strategy for a slide.
///
/// The candidate is the lowest-resolution level that still reaches the
/// envelope on at least one axis (level 0 when none does). If it does not fit
/// the ceiling, the highest-resolution level that does is used instead; when
/// no level fits, the candidate is tiled.
pub fn select_region(
    levels: &[LevelInfo],
    envelope: Envelope,
    settings: &PlannerSettings,
) -> Result<RegionPlan, PlanError> {
    if levels.is_empty() {
        return Err(PlanError::NoLevels);
    }
    if envelope.width == 0 || envelope.height == 0 {
        return Err(PlanError::EmptyEnvelope);
    }

    let fits = |level: &LevelInfo| {
        decoded_bytes(level.width, level.height, level) <= settings.memory_ceiling
    };

    let candidate = levels
        .iter()
        .rposition(|l| l.width >= envelope.width || l.height >= envelope.height)
        .unwrap_or(0);

    let whole_level = (candidate..levels.len()).find(|&index| fits(&levels[index]));
    if let Some(index) = whole_level {
        let level = &levels[index];
        return Ok(RegionPlan::Whole(RegionRequest {
            level: index,
            crop: CropBox {
                x: 0,
                y: 0,
                width: level.width,
                height: level.height,
            },
            envelope,
        }));
    }

    let grid = plan_grid(candidate, &levels[candidate], settings)?;
    Ok(RegionPlan::Tiled {
        level: candidate,
        grid,
        envelope,
    })
}

/// Tile a level into aligned, non-overlapping cells within the ceiling.
///
/// The per-axis step is a multiple of the native tile size, at least the
/// minimum edge, grown one native tile at a time (wider axis last) while a
/// cell with edge headroom still fits: `(kx*tw + min) * (ky*th + min) * bpp`.
pub fn plan_grid(
    level_index: usize,
    level: &LevelInfo,
    settings: &PlannerSettings,
) -> Result<TileGrid, PlanError> {
    let (tile_w, tile_h) = (level.tile_width as u64, level.tile_height as u64);
    let min = settings.min_tile_edge as u64;
    let cost = |kx: u64, ky: u64| (kx * tile_w + min) * (ky * tile_h + min) * level.bytes_per_pixel();

    let max_kx = level.tiles_x.max(1) as u64;
    let max_ky = level.tiles_y.max(1) as u64;
    let mut kx = min.div_ceil(tile_w).clamp(1, max_kx);
    let mut ky = min.div_ceil(tile_h).clamp(1, max_ky);

    let required = cost(kx, ky);
    if required > settings.memory_ceiling {
        return Err(PlanError::CeilingBelowNativeTile {
            level: level_index,
            required,
            ceiling: settings.memory_ceiling,
        });
    }

    loop {
        let grow_x = kx < max_kx && cost(kx + 1, ky) <= settings.memory_ceiling;
        let grow_y = ky < max_ky && cost(kx, ky + 1) <= settings.memory_ceiling;
        match (grow_x, grow_y) {
            (false, false) => break,
            (true, false) => kx += 1,
            (false, true) => ky += 1,
            (true, true) => {
                if kx * tile_w <= ky * tile_h {
                    kx += 1;
                } else {
                    ky += 1;
                }
            }
        }
    }

    Ok(TileGrid {
        columns: split_axis(level.width, kx * tile_w, min),
        rows: split_axis(level.height, ky * tile_h, min),
    })
}

/// Cut `[0, len)` into `step`-sized spans from the origin; a final remainder
/// shorter than `min` is merged into the span before it.
pub fn split_axis(len: u32, step: u64, min: u64) -> Vec<Span> {
    let len = len as u64;
    let step = step.max(1);
    let mut spans = Vec::new();
    let mut start = 0u64;

    while len - start > step {
        spans.push(Span {
            start: start as u32,
            len: step as u32,
        });
        start += step;
    }

    let remainder = len - start;
    match spans.last_mut() {
        Some(last) if remainder < min => last.len += remainder as u32,
        _ if remainder > 0 => spans.push(Span {
            start: start as u32,
            len: remainder as u32,
        }),
        _ => {}
    }
    spans
}
