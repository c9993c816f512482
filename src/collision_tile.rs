//! Label placement for one tile. Every placed label's boxes go into a grid;
//! each new label is given the smallest scale at which none of its boxes hit
//! a label placed before it.

use ahash::AHashSet;
use lyon::math::{Point, point};

use crate::{
    EXTENT,
    grid_index::{BBox, GridIndex},
    struct_array::SerializedStructArray,
    symbol::{CollisionBox, CollisionBoxArray, CollisionFeature},
};

const GRID_CELLS: i32 = 12;
const GRID_PADDING: i32 = 6;

/// Labels may appear half a zoom level early and are kept until the next
/// tile zoom level takes over.
pub const MIN_SCALE: f32 = 0.5;
pub const MAX_SCALE: f32 = 2.0;

#[derive(Debug)]
pub struct CollisionTile {
    pub angle: f32,
    pub pitch: f32,
    pub min_scale: f32,
    pub max_scale: f32,
    y_stretch: f32,
    rotation: [f32; 4],
    reverse_rotation: [f32; 4],
    grid: GridIndex,
    ignored_grid: GridIndex,
    edges: [CollisionBox; 4],
    boxes: CollisionBoxArray,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SerializedCollisionTile {
    pub angle: f32,
    pub pitch: f32,
    pub collision_box_array: SerializedStructArray,
    pub grid: Vec<i32>,
    pub ignored_grid: Vec<i32>,
}

impl SerializedCollisionTile {
    pub fn transferables(&self) -> Vec<&[u8]> {
        vec![self.collision_box_array.bytes()]
    }
}

fn edge(anchor: (i16, i16), offsets: [i16; 4]) -> CollisionBox {
    CollisionBox {
        anchor_x: anchor.0,
        anchor_y: anchor.1,
        x1: offsets[0],
        y1: offsets[1],
        x2: offsets[2],
        y2: offsets[3],
        max_scale: i16::MAX as f32,
        ..CollisionBox::default()
    }
}

fn mat_mult(p: Point, m: [f32; 4]) -> Point {
    point(m[0] * p.x + m[1] * p.y, m[2] * p.x + m[3] * p.y)
}

fn to_grid_bbox(bbox: [f32; 4]) -> BBox {
    [
        bbox[0].floor() as i32,
        bbox[1].floor() as i32,
        bbox[2].ceil() as i32,
        bbox[3].ceil() as i32,
    ]
}

impl CollisionTile {
    /// A tile viewed at `angle` radians of rotation and `pitch` degrees of
    /// tilt, placing labels whose boxes live in `boxes`.
    pub fn new(angle: f32, pitch: f32, boxes: CollisionBoxArray) -> Self {
        let (sin, cos) = angle.sin_cos();
        let extent = EXTENT as i16;
        let max = i16::MAX;

        // Boxes are stretched vertically on tilted maps; the squish grows
        // with distance, so stretch a little more than the plain ratio
        let y_stretch = (1.0 / pitch.to_radians().cos()).powf(1.3);

        CollisionTile {
            angle,
            pitch,
            min_scale: MIN_SCALE,
            max_scale: MAX_SCALE,
            y_stretch,
            rotation: [cos, -sin, sin, cos],
            reverse_rotation: [cos, sin, -sin, cos],
            grid: GridIndex::new(EXTENT, GRID_CELLS, GRID_PADDING),
            ignored_grid: GridIndex::new(EXTENT, GRID_CELLS, 0),
            edges: [
                edge((0, 0), [0, -max, 0, max]),
                edge((extent, 0), [0, -max, 0, max]),
                edge((0, 0), [-max, 0, max, 0]),
                edge((0, extent), [-max, 0, max, 0]),
            ],
            boxes,
        }
    }

    pub fn from_serialized(serialized: SerializedCollisionTile) -> Option<Self> {
        let mut tile = CollisionTile::new(
            serialized.angle,
            serialized.pitch,
            CollisionBoxArray::from_serialized(serialized.collision_box_array),
        );
        tile.grid = GridIndex::from_serialized(&serialized.grid)?;
        tile.ignored_grid = GridIndex::from_serialized(&serialized.ignored_grid)?;
        Some(tile)
    }

    pub fn y_stretch(&self) -> f32 {
        self.y_stretch
    }

    pub fn boxes(&self) -> &CollisionBoxArray {
        &self.boxes
    }

    pub fn boxes_mut(&mut self) -> &mut CollisionBoxArray {
        &mut self.boxes
    }

    /// Hands the box store back for a later placement pass.
    pub fn into_boxes(self) -> CollisionBoxArray {
        self.boxes
    }

    /// The smallest scale at which the feature collides with nothing placed
    /// so far. Searching stops once the scale reaches the maximum, so any
    /// result above the maximum only means the label is hidden.
    pub fn place_collision_feature(
        &mut self,
        feature: &CollisionFeature,
        allow_overlap: bool,
        avoid_edges: bool,
    ) -> f32 {
        let mut min_placement_scale = self.min_scale;

        for index in feature.boxes() {
            let Some(mut b) = self.boxes.get(index) else {
                continue;
            };

            // Grid boxes cover the label at the smallest scale it may show at
            let anchor = mat_mult(b.anchor_point(), self.rotation);
            let grow = 1.0 / self.min_scale;
            let bbox = [
                anchor.x + b.x1 as f32 * grow,
                anchor.y + b.y1 as f32 * self.y_stretch * grow,
                anchor.x + b.x2 as f32 * grow,
                anchor.y + b.y2 as f32 * self.y_stretch * grow,
            ];
            b.bbox = to_grid_bbox(bbox).map(|v| v.clamp(i16::MIN as i32, i16::MAX as i32) as i16);
            self.boxes.set(index, b);

            let offsets = [b.x1 as f32, b.y1 as f32, b.x2 as f32, b.y2 as f32];

            if !allow_overlap {
                for key in self.grid.query(to_grid_bbox(bbox)) {
                    let Some(blocking) = self.boxes.get(key as usize) else {
                        continue;
                    };
                    let blocking_anchor = mat_mult(blocking.anchor_point(), self.rotation);

                    min_placement_scale = self.placement_scale(
                        min_placement_scale,
                        anchor,
                        offsets,
                        b.max_scale,
                        blocking_anchor,
                        &blocking,
                    );
                    if min_placement_scale >= self.max_scale {
                        return min_placement_scale;
                    }
                }
            }

            if avoid_edges {
                let offsets = if self.angle != 0.0 {
                    let corners = [
                        mat_mult(point(offsets[0], offsets[1]), self.reverse_rotation),
                        mat_mult(point(offsets[2], offsets[1]), self.reverse_rotation),
                        mat_mult(point(offsets[0], offsets[3]), self.reverse_rotation),
                        mat_mult(point(offsets[2], offsets[3]), self.reverse_rotation),
                    ];
                    let xs = corners.map(|c| c.x);
                    let ys = corners.map(|c| c.y);
                    [
                        xs.into_iter().fold(f32::INFINITY, f32::min),
                        ys.into_iter().fold(f32::INFINITY, f32::min),
                        xs.into_iter().fold(f32::NEG_INFINITY, f32::max),
                        ys.into_iter().fold(f32::NEG_INFINITY, f32::max),
                    ]
                } else {
                    offsets
                };

                for edge in &self.edges {
                    min_placement_scale = self.placement_scale(
                        min_placement_scale,
                        b.anchor_point(),
                        offsets,
                        b.max_scale,
                        edge.anchor_point(),
                        edge,
                    );
                    if min_placement_scale >= self.max_scale {
                        return min_placement_scale;
                    }
                }
            }
        }

        min_placement_scale
    }

    /// The scale at which a box at `anchor` no longer overlaps `blocking`,
    /// if that raises `min_placement_scale` while `blocking` is shown.
    fn placement_scale(
        &self,
        min_placement_scale: f32,
        anchor: Point,
        offsets: [f32; 4],
        box_max_scale: f32,
        blocking_anchor: Point,
        blocking: &CollisionBox,
    ) -> f32 {
        let dx = anchor.x - blocking_anchor.x;
        let dy = anchor.y - blocking_anchor.y;

        // Left of, right of, above and below the blocking box
        let mut s1 = (blocking.x1 as f32 - offsets[2]) / dx;
        let mut s2 = (blocking.x2 as f32 - offsets[0]) / dx;
        let mut s3 = (blocking.y1 as f32 - offsets[3]) * self.y_stretch / dy;
        let mut s4 = (blocking.y2 as f32 - offsets[1]) * self.y_stretch / dy;

        if s1.is_nan() || s2.is_nan() {
            s1 = 1.0;
            s2 = 1.0;
        }
        if s3.is_nan() || s4.is_nan() {
            s3 = 1.0;
            s4 = 1.0;
        }

        let collision_free_scale = s1
            .max(s2)
            .min(s3.max(s4))
            // Past its max scale the blocking box no longer covers its label
            .min(blocking.max_scale)
            .min(box_max_scale);

        if collision_free_scale > min_placement_scale
            && collision_free_scale >= blocking.placement_scale
        {
            collision_free_scale
        } else {
            min_placement_scale
        }
    }

    /// Records the feature's placement. Boxes only enter a grid when the
    /// label is shown below the maximum scale; labels ignoring placement go
    /// into a separate grid that blocks nothing but can still be queried.
    pub fn insert_collision_feature(
        &mut self,
        feature: &CollisionFeature,
        placement_scale: f32,
        ignore_placement: bool,
    ) {
        for index in feature.boxes() {
            let Some(mut b) = self.boxes.get(index) else {
                continue;
            };
            b.placement_scale = placement_scale;
            self.boxes.set(index, b);

            if placement_scale < self.max_scale {
                let bbox = b.bbox.map(i32::from);
                let grid = if ignore_placement {
                    &mut self.ignored_grid
                } else {
                    &mut self.grid
                };
                grid.insert(index as u32, bbox);
            }
        }
    }

    /// Indices of the boxes visible at `scale` inside the query box, one per
    /// feature.
    pub fn query_rendered_symbols(&self, query: [f32; 4], scale: f32) -> Vec<usize> {
        let [min_x, min_y, max_x, max_y] = query;
        let anchor = mat_mult(point(min_x, min_y), self.rotation);
        let offsets = [0.0, 0.0, max_x - min_x, max_y - min_y];

        let search = [
            anchor.x,
            anchor.y,
            anchor.x + offsets[2] / scale,
            anchor.y + offsets[3] / scale * self.y_stretch,
        ];
        let search = to_grid_bbox(search);

        let mut keys = self.grid.query(search);
        keys.extend(self.ignored_grid.query(search));

        let mut seen = AHashSet::new();
        let mut result = Vec::new();

        for key in keys {
            let Some(blocking) = self.boxes.get(key as usize) else {
                continue;
            };
            let feature = (blocking.source_layer_index, blocking.feature_index);
            if seen.contains(&feature) {
                continue;
            }

            let blocking_anchor = mat_mult(blocking.anchor_point(), self.rotation);
            let min_placement_scale = self.placement_scale(
                self.min_scale,
                anchor,
                offsets,
                scale,
                blocking_anchor,
                &blocking,
            );
            if min_placement_scale >= scale {
                seen.insert(feature);
                result.push(key as usize);
            }
        }

        result
    }

    pub fn serialize(&self) -> SerializedCollisionTile {
        SerializedCollisionTile {
            angle: self.angle,
            pitch: self.pitch,
            collision_box_array: self.boxes.clone().serialize(),
            grid: self.grid.serialize(),
            ignored_grid: self.ignored_grid.serialize(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::{Anchor, collision_box::FeatureRef, collision_feature::LabelBounds};
    use approx::assert_relative_eq;

    fn label(tile: &mut CollisionTile, x: f32, y: f32, feature_index: u32) -> CollisionFeature {
        let anchor = Anchor::new(point(x, y), 0.0, None);
        let bounds = LabelBounds {
            top: -10.0,
            bottom: 10.0,
            left: -10.0,
            right: 10.0,
        };
        let feature = FeatureRef {
            feature_index,
            ..FeatureRef::default()
        };
        CollisionFeature::new(tile.boxes_mut(), &[], &anchor, feature, bounds, 1.0, 0.0, false, false)
    }

    fn place(tile: &mut CollisionTile, feature: &CollisionFeature) -> f32 {
        let scale = tile.place_collision_feature(feature, false, false);
        tile.insert_collision_feature(feature, scale, false);
        scale
    }

    #[test]
    fn first_label_is_placed_at_the_minimum_scale() {
        let mut tile = CollisionTile::new(0.0, 0.0, CollisionBoxArray::new());
        let a = label(&mut tile, 100.0, 100.0, 0);
        assert_eq!(place(&mut tile, &a), MIN_SCALE);
    }

    #[test]
    fn coincident_labels_never_show_the_second() {
        let mut tile = CollisionTile::new(0.0, 0.0, CollisionBoxArray::new());
        let a = label(&mut tile, 100.0, 100.0, 0);
        let b = label(&mut tile, 100.0, 100.0, 1);

        assert_eq!(place(&mut tile, &a), MIN_SCALE);
        assert_eq!(place(&mut tile, &b), f32::INFINITY);
    }

    #[test]
    fn nearby_labels_wait_until_they_fit() {
        let mut tile = CollisionTile::new(0.0, 0.0, CollisionBoxArray::new());
        let a = label(&mut tile, 100.0, 100.0, 0);
        let b = label(&mut tile, 130.0, 100.0, 1);

        place(&mut tile, &a);
        // 20 units of box need 30 units of anchor distance at 2/3 scale
        assert_relative_eq!(place(&mut tile, &b), 2.0 / 3.0);
        assert_relative_eq!(tile.boxes().get(b.box_start_index).unwrap().placement_scale, 2.0 / 3.0);
    }

    #[test]
    fn overlap_and_ignored_placement() {
        let mut tile = CollisionTile::new(0.0, 0.0, CollisionBoxArray::new());
        let a = label(&mut tile, 100.0, 100.0, 0);
        let b = label(&mut tile, 100.0, 100.0, 1);
        let c = label(&mut tile, 100.0, 100.0, 2);

        let scale = tile.place_collision_feature(&a, false, false);
        tile.insert_collision_feature(&a, scale, true);

        // `a` ignores placement so it does not block `b`
        assert_eq!(place(&mut tile, &b), MIN_SCALE);
        assert_eq!(tile.place_collision_feature(&c, true, false), MIN_SCALE);
    }

    #[test]
    fn labels_can_avoid_tile_edges() {
        let mut tile = CollisionTile::new(0.0, 0.0, CollisionBoxArray::new());
        let a = label(&mut tile, 4.0, 500.0, 0);

        // The left edge pushes the label's 10 unit half width out to 2.5
        assert_relative_eq!(tile.place_collision_feature(&a, false, true), 2.5);
        assert_eq!(tile.place_collision_feature(&a, false, false), MIN_SCALE);
    }

    #[test]
    fn labels_separating_at_the_maximum_scale_keep_it() {
        let mut tile = CollisionTile::new(0.0, 0.0, CollisionBoxArray::new());
        let a = label(&mut tile, 100.0, 100.0, 0);
        let b = label(&mut tile, 110.0, 100.0, 1);

        place(&mut tile, &a);
        assert_relative_eq!(place(&mut tile, &b), MAX_SCALE);

        // Shown only at the maximum, so it never blocks later labels
        let hits = tile.query_rendered_symbols([105.0, 95.0, 125.0, 105.0], MAX_SCALE);
        assert!(!hits.contains(&b.box_start_index));
        let c = label(&mut tile, 125.0, 100.0, 2);
        assert_relative_eq!(tile.place_collision_feature(&c, false, false), 0.8);
    }

    #[test]
    fn pitch_stretches_boxes_vertically() {
        let tile = CollisionTile::new(0.0, 60.0, CollisionBoxArray::new());
        assert_relative_eq!(tile.y_stretch(), 2f32.powf(1.3), epsilon = 1e-4);
    }

    #[test]
    fn query_finds_placed_labels_once() {
        let mut tile = CollisionTile::new(0.0, 0.0, CollisionBoxArray::new());
        let a = label(&mut tile, 100.0, 100.0, 0);
        let b = label(&mut tile, 1000.0, 1000.0, 1);
        place(&mut tile, &a);
        place(&mut tile, &b);

        let hits = tile.query_rendered_symbols([95.0, 95.0, 105.0, 105.0], 1.0);
        assert_eq!(hits, vec![a.box_start_index]);

        let serialized = tile.serialize();
        let restored = CollisionTile::from_serialized(serialized).unwrap();
        assert_eq!(restored.query_rendered_symbols([95.0, 95.0, 105.0, 105.0], 1.0), hits);
    }

    #[test]
    fn hidden_labels_stay_out_of_the_grid() {
        let mut tile = CollisionTile::new(0.0, 0.0, CollisionBoxArray::new());
        let a = label(&mut tile, 100.0, 100.0, 0);
        tile.insert_collision_feature(&a, f32::INFINITY, false);
        assert!(tile.query_rendered_symbols([0.0, 0.0, 200.0, 200.0], 1.0).is_empty());
    }
}
