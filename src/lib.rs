//! Background vector tile processing: protobuf decoding, bucket tessellation,
//! label layout and collision placement.

pub mod bucket;
pub mod buffers;
pub mod collision_tile;
pub mod earcut;
pub mod error;
pub mod feature_index;
pub mod geojson;
pub mod geometry;
pub mod glyphs;
pub mod grid_index;
pub mod intersection;
pub mod mbtiles;
pub mod pbf;
pub mod proto;
pub mod struct_array;
pub mod style;
pub mod symbol;
pub mod tile_source;
pub mod vector_tile;
pub mod worker;
pub mod worker_tile;

pub use error::{Error, Result, warn_once};

/// Internal tile extent every geometry is rescaled into.
pub const EXTENT: i32 = 8192;

#[derive(Debug, Copy, Clone, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct TileId {
    pub zoom: u8,
    pub column: u32,
    pub row: u32,
}

impl TileId {
    pub fn new(zoom: u8, column: u32, row: u32) -> Self {
        TileId { zoom, column, row }
    }

    pub fn normalize(zoom: u8, column: i64, row: i64) -> Self {
        let limit = 1i64 << zoom;

        TileId {
            zoom,
            column: column.rem_euclid(limit) as u32,
            row: row.clamp(0, limit - 1) as u32,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.zoom < 32 && self.row < self.limit() && self.column < self.limit()
    }

    pub fn parent(&self) -> Option<Self> {
        if self.zoom == 0 {
            None
        } else {
            Some(TileId {
                zoom: self.zoom - 1,
                column: self.column / 2,
                row: self.row / 2,
            })
        }
    }

    pub fn zoom(&self) -> f32 {
        self.zoom as f32
    }

    /// Row index in the TMS scheme used by MBTiles archives.
    pub fn tms_row(&self) -> u32 {
        self.limit() - 1 - self.row
    }

    pub fn limit(&self) -> u32 {
        1u32 << self.zoom
    }
}

impl std::fmt::Display for TileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.column, self.row)
    }
}
