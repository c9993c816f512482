use std::mem::offset_of;

use lyon::math::{Point, point};

use crate::struct_array::{Member, MemberType, Record, StructArray};

/// A box around part of a label, relative to its anchor. Offsets are in tile
/// units at the tile's own zoom; `bbox` is the rotated and stretched box last
/// used for placement.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CollisionBox {
    pub anchor_x: i16,
    pub anchor_y: i16,
    pub x1: i16,
    pub y1: i16,
    pub x2: i16,
    pub y2: i16,
    pub bbox: [i16; 4],
    /// Scale above which the box no longer covers its label
    pub max_scale: f32,
    pub placement_scale: f32,
    pub feature_index: u32,
    pub source_layer_index: u16,
    pub bucket_index: u16,
}

impl Record for CollisionBox {
    const MEMBERS: &'static [Member] = &[
        Member::new("anchorPointX", MemberType::Int16, 1, offset_of!(CollisionBox, anchor_x)),
        Member::new("anchorPointY", MemberType::Int16, 1, offset_of!(CollisionBox, anchor_y)),
        Member::new("x1", MemberType::Int16, 1, offset_of!(CollisionBox, x1)),
        Member::new("y1", MemberType::Int16, 1, offset_of!(CollisionBox, y1)),
        Member::new("x2", MemberType::Int16, 1, offset_of!(CollisionBox, x2)),
        Member::new("y2", MemberType::Int16, 1, offset_of!(CollisionBox, y2)),
        Member::new("bbox", MemberType::Int16, 4, offset_of!(CollisionBox, bbox)),
        Member::new("maxScale", MemberType::Float32, 1, offset_of!(CollisionBox, max_scale)),
        Member::new(
            "placementScale",
            MemberType::Float32,
            1,
            offset_of!(CollisionBox, placement_scale),
        ),
        Member::new("featureIndex", MemberType::Uint32, 1, offset_of!(CollisionBox, feature_index)),
        Member::new(
            "sourceLayerIndex",
            MemberType::Uint16,
            1,
            offset_of!(CollisionBox, source_layer_index),
        ),
        Member::new("bucketIndex", MemberType::Uint16, 1, offset_of!(CollisionBox, bucket_index)),
    ];
    const ALIGNMENT: usize = 4;
}

pub type CollisionBoxArray = StructArray<CollisionBox>;

/// Which feature a collision box belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct FeatureRef {
    pub feature_index: u32,
    pub source_layer_index: u16,
    pub bucket_index: u16,
}

impl CollisionBox {
    /// A box around `anchor`. Offsets are truncated to whole units.
    pub fn new(anchor: Point, offsets: [f32; 4], max_scale: f32, feature: FeatureRef) -> Self {
        CollisionBox {
            anchor_x: anchor.x as i16,
            anchor_y: anchor.y as i16,
            x1: offsets[0] as i16,
            y1: offsets[1] as i16,
            x2: offsets[2] as i16,
            y2: offsets[3] as i16,
            bbox: [0; 4],
            max_scale,
            placement_scale: 0.0,
            feature_index: feature.feature_index,
            source_layer_index: feature.source_layer_index,
            bucket_index: feature.bucket_index,
        }
    }

    pub fn anchor_point(&self) -> Point {
        point(self.anchor_x as f32, self.anchor_y as f32)
    }

    pub fn feature(&self) -> FeatureRef {
        FeatureRef {
            feature_index: self.feature_index,
            source_layer_index: self.source_layer_index,
            bucket_index: self.bucket_index,
        }
    }
}
