use std::sync::Arc;

use crate::{
    buffers::{FillAttributes, FillVertex, LineElement, ProgramGroup, SerializedArrayGroup, TriangleElement},
    earcut,
    geometry::{Ring, classify_rings},
    style::{LayerFamily, LayerKind},
};

use super::{BucketParameters, family_layer};

const EARCUT_MAX_RINGS: usize = 500;

type FillProgram = ProgramGroup<FillVertex, TriangleElement, LineElement, FillAttributes>;

/// Polygon interiors as triangles plus their outlines as line segments.
#[derive(Debug)]
pub struct FillBucket {
    pub(crate) family: Arc<LayerFamily>,
    pub(crate) params: BucketParameters,
    fill: FillProgram,
}

impl FillBucket {
    pub fn new(family: Arc<LayerFamily>, params: BucketParameters) -> Self {
        let fill = ProgramGroup::new(family.layer_ids(), true);
        FillBucket {
            family,
            params,
            fill,
        }
    }

    pub fn add_feature(&mut self, geometry: &[Ring]) {
        for polygon in classify_rings(geometry.to_vec(), EARCUT_MAX_RINGS) {
            self.add_polygon(&polygon);
        }
    }

    fn add_polygon(&mut self, polygon: &[Ring]) {
        let num_vertices: usize = polygon.iter().map(Vec::len).sum();
        if num_vertices == 0 {
            return;
        }

        let group = self.fill.prepare(num_vertices);
        let start_index = group.layout_vertex_array.len();

        for ring in polygon.iter().filter(|r| !r.is_empty()) {
            let line_index = group.layout_vertex_array.len();

            for (v, point) in ring.iter().enumerate() {
                group.layout_vertex_array.emplace_back(FillVertex {
                    pos: [point.x as i16, point.y as i16],
                });

                if v >= 1 {
                    if let Some(lines) = group.element_array2.as_mut() {
                        let index = (line_index + v) as u16;
                        lines.emplace_back(LineElement {
                            vertices: [index - 1, index],
                        });
                    }
                }
            }
        }

        let (data, hole_indices) = earcut::flatten(polygon);
        let triangles = earcut::earcut(&data, &hole_indices);
        for triangle in triangles.chunks_exact(3) {
            group.element_array.emplace_back(TriangleElement {
                vertices: [
                    (triangle[0] + start_index) as u16,
                    (triangle[1] + start_index) as u16,
                    (triangle[2] + start_index) as u16,
                ],
            });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fill.is_empty()
    }

    pub(crate) fn take_program_groups(&mut self) -> Vec<(&'static str, Vec<SerializedArrayGroup>)> {
        let zoom = self.params.zoom;
        let family = self.family.clone();
        let mut fill = std::mem::replace(&mut self.fill, ProgramGroup::new(family.layer_ids(), true));

        for group in fill.groups.iter_mut() {
            group.populate_paint_arrays(|id| match family_layer(&family, id).map(|l| &l.kind) {
                Some(LayerKind::Fill { paint, .. }) => FillAttributes {
                    color: paint.fill_color(zoom).to_bytes(),
                    outline_color: paint.fill_outline_color(zoom).to_bytes(),
                },
                _ => FillAttributes::default(),
            });
        }

        vec![("fill", fill.serialize())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{geometry::TilePoint, style::StyleLayer};
    use serde_json::json;

    fn bucket() -> FillBucket {
        let layer = StyleLayer::from_json(json!({
            "id": "water",
            "type": "fill",
            "paint": { "fill-color": "#0000ff" }
        }))
        .unwrap();
        FillBucket::new(Arc::new(LayerFamily::new(layer)), BucketParameters::default())
    }

    fn ring(points: &[(i32, i32)]) -> Ring {
        points.iter().map(|&(x, y)| TilePoint::new(x, y)).collect()
    }

    #[test]
    fn triangle_gives_one_triangle_and_three_outline_segments() {
        let mut bucket = bucket();
        bucket.add_feature(&[ring(&[(0, 0), (100, 0), (100, 100), (0, 0)])]);

        assert_eq!(bucket.fill.vertex_count(), 4);
        assert_eq!(bucket.fill.element_count(), 1);
        assert_eq!(bucket.fill.element2_count(), 3);

        let group = &bucket.fill.groups[0];
        let lines: Vec<_> = group.element_array2.as_ref().unwrap().iter().map(|e| e.vertices).collect();
        assert_eq!(lines, vec![[0, 1], [1, 2], [2, 3]]);
    }

    #[test]
    fn polygons_index_from_their_own_start() {
        let mut bucket = bucket();
        let square = ring(&[(0, 0), (10, 0), (10, 10), (0, 10), (0, 0)]);
        let other = ring(&[(20, 0), (30, 0), (30, 10), (20, 10), (20, 0)]);
        bucket.add_feature(&[square, other]);

        assert_eq!(bucket.fill.element_count(), 4);
        let group = &bucket.fill.groups[0];
        let second: Vec<_> = group.element_array.iter().skip(2).collect();
        assert!(second.iter().flat_map(|t| t.vertices).all(|v| (5..10).contains(&v)));
    }

    #[test]
    fn serialized_paint_covers_every_vertex() {
        let mut bucket = bucket();
        bucket.add_feature(&[ring(&[(0, 0), (100, 0), (100, 100), (0, 0)])]);

        let groups = bucket.take_program_groups();
        let (name, groups) = &groups[0];
        assert_eq!(*name, "fill");
        let (id, paint) = &groups[0].paint_vertex_arrays[0];
        assert_eq!(id, "water");
        assert_eq!(paint.length, 4);
        assert_eq!(&paint.array_buffer[..4], &[0, 0, 255, 255]);
        assert!(bucket.is_empty());
    }
}
