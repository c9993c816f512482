use std::sync::Arc;

use crate::{
    EXTENT,
    buffers::{CircleAttributes, CircleVertex, LineElement, ProgramGroup, SerializedArrayGroup, TriangleElement},
    geometry::Ring,
    style::{LayerFamily, LayerKind},
};

use super::{BucketParameters, family_layer};

type CircleProgram = ProgramGroup<CircleVertex, TriangleElement, LineElement, CircleAttributes>;

/// A quad per point. The extrusion sign is packed into the low bit of each
/// doubled position.
#[derive(Debug)]
pub struct CircleBucket {
    pub(crate) family: Arc<LayerFamily>,
    pub(crate) params: BucketParameters,
    circle: CircleProgram,
}

impl CircleBucket {
    pub fn new(family: Arc<LayerFamily>, params: BucketParameters) -> Self {
        let circle = ProgramGroup::new(family.layer_ids(), false);
        CircleBucket {
            family,
            params,
            circle,
        }
    }

    pub fn add_feature(&mut self, geometry: &[Ring]) {
        for point in geometry.iter().flatten() {
            let (x, y) = (point.x, point.y);

            // Points outside the tile are drawn by the neighbouring tile
            if x < 0 || x >= EXTENT || y < 0 || y >= EXTENT {
                continue;
            }

            let group = self.circle.prepare(4);
            let vertex = |ex: i32, ey: i32| CircleVertex {
                pos: [(x * 2 + (ex + 1) / 2) as i16, (y * 2 + (ey + 1) / 2) as i16],
            };

            let index = group.layout_vertex_array.emplace_back(vertex(-1, -1)) as u16;
            group.layout_vertex_array.emplace_back(vertex(1, -1));
            group.layout_vertex_array.emplace_back(vertex(1, 1));
            group.layout_vertex_array.emplace_back(vertex(-1, 1));

            group.element_array.emplace_back(TriangleElement {
                vertices: [index, index + 1, index + 2],
            });
            group.element_array.emplace_back(TriangleElement {
                vertices: [index, index + 3, index + 2],
            });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.circle.is_empty()
    }

    pub(crate) fn take_program_groups(&mut self) -> Vec<(&'static str, Vec<SerializedArrayGroup>)> {
        let zoom = self.params.zoom;
        let family = self.family.clone();
        let mut circle = std::mem::replace(&mut self.circle, ProgramGroup::new(family.layer_ids(), false));

        for group in circle.groups.iter_mut() {
            group.populate_paint_arrays(|id| match family_layer(&family, id).map(|l| &l.kind) {
                Some(LayerKind::Circle { paint, .. }) => CircleAttributes {
                    color: paint.circle_color(zoom).to_bytes(),
                    radius: paint.circle_radius(zoom),
                },
                _ => CircleAttributes::default(),
            });
        }

        vec![("circle", circle.serialize())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{geometry::TilePoint, style::StyleLayer};
    use serde_json::json;

    #[test]
    fn points_become_quads_and_outside_points_are_skipped() {
        let layer = StyleLayer::from_json(json!({ "id": "poi", "type": "circle" })).unwrap();
        let mut bucket = CircleBucket::new(Arc::new(LayerFamily::new(layer)), BucketParameters::default());

        bucket.add_feature(&[vec![
            TilePoint::new(10, 20),
            TilePoint::new(-1, 20),
            TilePoint::new(10, EXTENT),
        ]]);

        assert_eq!(bucket.circle.vertex_count(), 4);
        assert_eq!(bucket.circle.element_count(), 2);

        let positions: Vec<_> = bucket.circle.groups[0]
            .layout_vertex_array
            .iter()
            .map(|v| v.pos)
            .collect();
        assert_eq!(positions, vec![[20, 40], [21, 40], [21, 41], [20, 41]]);

        let groups = bucket.take_program_groups();
        let paint = &groups[0].1[0].paint_vertex_arrays[0].1;
        assert_eq!(paint.length, 4);
        assert_eq!(f32::from_ne_bytes(paint.array_buffer[4..8].try_into().unwrap()), 5.0);
    }
}
