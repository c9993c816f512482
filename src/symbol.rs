//! Label layout: shaping, anchor placement along lines, quads and the
//! collision geometry handed to [`crate::collision_tile::CollisionTile`].

pub mod anchor;
pub mod check_max_angle;
pub mod clip_line;
pub mod collision_box;
pub mod collision_feature;
pub mod merge_lines;
pub mod quads;
pub mod shaping;

pub use anchor::{Anchor, get_anchors};
pub use collision_box::{CollisionBox, CollisionBoxArray};
pub use collision_feature::CollisionFeature;
pub use quads::SymbolQuad;
pub use shaping::{PositionedIcon, Shaping};
