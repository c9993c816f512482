use std::sync::Arc;

use lyon::math::{Vector, vector};

use crate::{
    EXTENT,
    buffers::{LineAttributes, LineElement, LineVertex, ProgramGroup, SerializedArrayGroup, TriangleElement},
    geometry::{Ring, TilePoint},
    style::{LayerFamily, LayerKind, LineCap, LineJoin, LineLayout},
};

use super::{BucketParameters, family_layer};

/// Extrusion vectors are stored as signed bytes scaled by this factor, so the
/// longest storable extrusion is 128 / 63 ≈ 2 line widths.
const EXTRUDE_SCALE: f32 = 63.0;

/// cos(75° / 2); corners sharper than 75° get extra vertices near the corner.
const COS_HALF_SHARP_CORNER: f32 = 0.793_353_3;

/// Distance in pixels of the extra vertices placed before and after a sharp
/// corner.
const SHARP_CORNER_OFFSET: f32 = 15.0;

/// Distance along the line is stored at half resolution to reach further.
const LINE_DISTANCE_SCALE: f32 = 1.0 / 2.0;

/// The scaled distance has to fit in the 14 bits left next to the direction.
const MAX_LINE_DISTANCE: f32 = (1 << 14) as f32 / LINE_DISTANCE_SCALE;

type LineProgram = ProgramGroup<LineVertex, TriangleElement, LineElement, LineAttributes>;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Join {
    Miter,
    Bevel,
    FlipBevel,
    FakeRound,
    Round,
    Butt,
    Square,
}

impl From<LineJoin> for Join {
    fn from(join: LineJoin) -> Self {
        match join {
            LineJoin::Miter => Join::Miter,
            LineJoin::Bevel => Join::Bevel,
            LineJoin::Round => Join::Round,
        }
    }
}

impl From<LineCap> for Join {
    fn from(cap: LineCap) -> Self {
        match cap {
            LineCap::Butt => Join::Butt,
            LineCap::Round => Join::Round,
            LineCap::Square => Join::Square,
        }
    }
}

/// Extruded line strips with joins and caps.
#[derive(Debug)]
pub struct LineBucket {
    pub(crate) family: Arc<LayerFamily>,
    pub(crate) params: BucketParameters,
    line: LineProgram,
    distance: f32,
    e1: Option<u16>,
    e2: Option<u16>,
}

impl LineBucket {
    pub fn new(family: Arc<LayerFamily>, params: BucketParameters) -> Self {
        let line = ProgramGroup::new(family.layer_ids(), false);
        LineBucket {
            family,
            params,
            line,
            distance: 0.0,
            e1: None,
            e2: None,
        }
    }

    fn layout(&self) -> LineLayout {
        match &self.family.parent.kind {
            LayerKind::Line { layout, .. } => layout.clone(),
            _ => LineLayout::default(),
        }
    }

    pub fn add_feature(&mut self, geometry: &[Ring]) {
        let layout = self.layout();
        let zoom = self.params.zoom;
        let join = layout.line_join(zoom);
        let cap = layout.line_cap(zoom);
        let miter_limit = layout.line_miter_limit(zoom);
        let round_limit = layout.line_round_limit(zoom);

        for line in geometry {
            self.add_line(line, join, cap, miter_limit, round_limit);
        }
    }

    fn add_line(
        &mut self,
        vertices: &[TilePoint],
        join: LineJoin,
        cap: LineCap,
        miter_limit: f32,
        round_limit: f32,
    ) {
        let mut len = vertices.len();
        while len > 2 && vertices[len - 1] == vertices[len - 2] {
            len -= 1;
        }

        if len < 2 {
            return;
        }

        let miter_limit = if join == LineJoin::Bevel { 1.05 } else { miter_limit };
        let sharp_corner_offset =
            SHARP_CORNER_OFFSET * (EXTENT as f32 / (512.0 * self.params.overscaling));

        let first_vertex = vertices[0];
        let last_vertex = vertices[len - 1];
        let closed = first_vertex == last_vertex;

        self.line.prepare(len * 10);

        // A closed line needs at least two distinct points
        if len == 2 && closed {
            return;
        }

        self.distance = 0.0;

        let begin_cap = Join::from(cap);
        let end_cap = if closed { Join::Butt } else { Join::from(cap) };
        let mut start_of_line = true;

        let mut current_vertex: Option<TilePoint> = None;
        let mut prev_vertex: Option<TilePoint> = None;
        let mut prev_normal: Option<Vector> = None;
        let mut next_normal: Option<Vector> = None;

        self.e1 = None;
        self.e2 = None;

        if closed {
            let current = vertices[len - 2];
            current_vertex = Some(current);
            next_normal = Some(perp(unit(sub(first_vertex, current))));
        }

        for i in 0..len {
            let next_vertex = if closed && i == len - 1 {
                Some(vertices[1])
            } else {
                vertices.get(i + 1).copied().filter(|_| i + 1 < len)
            };

            if next_vertex == Some(vertices[i]) {
                continue;
            }

            if next_normal.is_some() {
                prev_normal = next_normal;
            }
            if current_vertex.is_some() {
                prev_vertex = current_vertex;
            }

            let mut current = vertices[i];
            current_vertex = Some(current);

            // Without a next vertex the line continues straight
            next_normal = match next_vertex {
                Some(next) => Some(perp(unit(sub(next, current)))),
                None => prev_normal,
            };
            let Some(next_n) = next_normal else {
                continue;
            };
            let prev_n = *prev_normal.get_or_insert(next_n);

            let mut join_normal = unit(prev_n + next_n);

            let cos_half_angle = join_normal.dot(next_n);
            let miter_length = 1.0 / cos_half_angle;

            let is_sharp_corner =
                cos_half_angle < COS_HALF_SHARP_CORNER && prev_vertex.is_some() && next_vertex.is_some();

            if is_sharp_corner && i > 0 {
                if let Some(prev) = prev_vertex {
                    let prev_segment_length = dist(current, prev);
                    if prev_segment_length > 2.0 * sharp_corner_offset {
                        let offset = sub(current, prev) * (sharp_corner_offset / prev_segment_length);
                        let new_prev = round_point(current, -offset);
                        self.distance += dist(new_prev, prev);
                        self.add_current_vertex(new_prev, prev_n, 0.0, 0.0, false);
                        prev_vertex = Some(new_prev);
                    }
                }
            }

            let middle_vertex = prev_vertex.is_some() && next_vertex.is_some();
            let mut current_join = if middle_vertex {
                Join::from(join)
            } else if next_vertex.is_some() {
                begin_cap
            } else {
                end_cap
            };

            if middle_vertex && current_join == Join::Round {
                if miter_length < round_limit {
                    current_join = Join::Miter;
                } else if miter_length <= 2.0 {
                    current_join = Join::FakeRound;
                }
            }

            if current_join == Join::Miter && miter_length > miter_limit {
                current_join = Join::Bevel;
            }

            if current_join == Join::Bevel {
                // Extrusions longer than 2 line widths can't be stored, flip
                // the bevel instead
                if miter_length > 2.0 {
                    current_join = Join::FlipBevel;
                }

                // The bevel would be invisible
                if miter_length < miter_limit {
                    current_join = Join::Miter;
                }
            }

            if let Some(prev) = prev_vertex {
                self.distance += dist(current, prev);
            }

            match current_join {
                Join::Miter => {
                    join_normal = join_normal * miter_length;
                    self.add_current_vertex(current, join_normal, 0.0, 0.0, false);
                }
                Join::FlipBevel => {
                    if miter_length > 100.0 {
                        // Nearly parallel segments
                        join_normal = next_n;
                    } else {
                        let direction = if prev_n.cross(next_n) > 0.0 { -1.0 } else { 1.0 };
                        let bevel_length =
                            miter_length * (prev_n + next_n).length() / (prev_n - next_n).length();
                        join_normal = perp(join_normal) * (bevel_length * direction);
                    }
                    self.add_current_vertex(current, join_normal, 0.0, 0.0, false);
                    self.add_current_vertex(current, -join_normal, 0.0, 0.0, false);
                }
                Join::Bevel | Join::FakeRound => {
                    let line_turns_left = prev_n.cross(next_n) > 0.0;
                    let offset = -(miter_length * miter_length - 1.0).sqrt();
                    let (offset_a, offset_b) = if line_turns_left {
                        (offset, 0.0)
                    } else {
                        (0.0, offset)
                    };

                    // Close the previous segment with a bevel
                    if !start_of_line {
                        self.add_current_vertex(current, prev_n, offset_a, offset_b, false);
                    }

                    if current_join == Join::FakeRound {
                        // A fan of pie slices, more of them for sharper angles
                        let n = ((0.5 - (cos_half_angle - 0.5)) * 8.0).floor().max(0.0) as usize;

                        for m in 0..n {
                            let t = (m + 1) as f32 / (n + 1) as f32;
                            let normal = unit(next_n * t + prev_n);
                            self.add_pie_slice_vertex(current, normal, line_turns_left);
                        }

                        self.add_pie_slice_vertex(current, join_normal, line_turns_left);

                        for k in (0..n).rev() {
                            let t = (k + 1) as f32 / (n + 1) as f32;
                            let normal = unit(prev_n * t + next_n);
                            self.add_pie_slice_vertex(current, normal, line_turns_left);
                        }
                    }

                    if next_vertex.is_some() {
                        self.add_current_vertex(current, next_n, -offset_a, -offset_b, false);
                    }
                }
                Join::Butt => {
                    if !start_of_line {
                        self.add_current_vertex(current, prev_n, 0.0, 0.0, false);
                    }

                    if next_vertex.is_some() {
                        self.add_current_vertex(current, next_n, 0.0, 0.0, false);
                    }
                }
                Join::Square => {
                    if !start_of_line {
                        self.add_current_vertex(current, prev_n, 1.0, 1.0, false);

                        // Disconnect from the next segment
                        self.e1 = None;
                        self.e2 = None;
                    }

                    if next_vertex.is_some() {
                        self.add_current_vertex(current, next_n, -1.0, -1.0, false);
                    }
                }
                Join::Round => {
                    if !start_of_line {
                        self.add_current_vertex(current, prev_n, 0.0, 0.0, false);
                        self.add_current_vertex(current, prev_n, 1.0, 1.0, true);

                        self.e1 = None;
                        self.e2 = None;
                    }

                    if next_vertex.is_some() {
                        self.add_current_vertex(current, next_n, -1.0, -1.0, true);
                        self.add_current_vertex(current, next_n, 0.0, 0.0, false);
                    }
                }
            }

            if is_sharp_corner && i < len - 1 {
                if let Some(next) = next_vertex {
                    let next_segment_length = dist(current, next);
                    if next_segment_length > 2.0 * sharp_corner_offset {
                        let offset = sub(next, current) * (sharp_corner_offset / next_segment_length);
                        let new_current = round_point(current, offset);
                        self.distance += dist(new_current, current);
                        self.add_current_vertex(new_current, next_n, 0.0, 0.0, false);
                        current = new_current;
                        current_vertex = Some(current);
                    }
                }
            }

            start_of_line = false;
        }
    }

    /// Adds the two vertices on either side of `point`. `end_left` and
    /// `end_right` push them along the line for caps and bevels.
    fn add_current_vertex(
        &mut self,
        point: TilePoint,
        normal: Vector,
        end_left: f32,
        end_right: f32,
        round: bool,
    ) {
        let distance = self.distance;
        let tx = round as i32;

        let mut extrude = normal;
        if end_left != 0.0 {
            extrude -= perp(normal) * end_left;
        }
        self.add_vertex(point, extrude, tx, 0, end_left, distance);

        let mut extrude = -normal;
        if end_right != 0.0 {
            extrude -= perp(normal) * end_right;
        }
        self.add_vertex(point, extrude, tx, 1, -end_right, distance);

        // Start over at zero before the stored distance overflows
        if distance > MAX_LINE_DISTANCE / 2.0 {
            self.distance = 0.0;
            self.add_current_vertex(point, normal, end_left, end_right, round);
        }
    }

    fn add_pie_slice_vertex(&mut self, point: TilePoint, extrude: Vector, line_turns_left: bool) {
        let ty = line_turns_left as i32;
        let extrude = if line_turns_left { -extrude } else { extrude };

        let e3 = self.push_vertex(point, extrude, 0, ty, 0.0, self.distance);
        if let (Some(e1), Some(e2)) = (self.e1, self.e2) {
            self.push_triangle([e1, e2, e3]);
        }

        if line_turns_left {
            self.e2 = Some(e3);
        } else {
            self.e1 = Some(e3);
        }
    }

    fn add_vertex(&mut self, point: TilePoint, extrude: Vector, tx: i32, ty: i32, dir: f32, distance: f32) {
        let e3 = self.push_vertex(point, extrude, tx, ty, dir, distance);
        if let (Some(e1), Some(e2)) = (self.e1, self.e2) {
            self.push_triangle([e1, e2, e3]);
        }
        self.e1 = self.e2;
        self.e2 = Some(e3);
    }

    fn push_vertex(&mut self, point: TilePoint, extrude: Vector, tx: i32, ty: i32, dir: f32, distance: f32) -> u16 {
        let group = self.line.prepare(0);
        group.layout_vertex_array.emplace_back(line_vertex(point, extrude, tx, ty, dir, distance)) as u16
    }

    fn push_triangle(&mut self, vertices: [u16; 3]) {
        let group = self.line.prepare(0);
        group.element_array.emplace_back(TriangleElement { vertices });
    }

    pub fn is_empty(&self) -> bool {
        self.line.is_empty()
    }

    pub(crate) fn take_program_groups(&mut self) -> Vec<(&'static str, Vec<SerializedArrayGroup>)> {
        let zoom = self.params.zoom;
        let family = self.family.clone();
        let mut line = std::mem::replace(&mut self.line, ProgramGroup::new(family.layer_ids(), false));

        for group in line.groups.iter_mut() {
            group.populate_paint_arrays(|id| match family_layer(&family, id).map(|l| &l.kind) {
                Some(LayerKind::Line { paint, .. }) => LineAttributes {
                    color: paint.line_color(zoom).to_bytes(),
                    width: paint.line_width(zoom),
                },
                _ => LineAttributes::default(),
            });
        }

        vec![("line", line.serialize())]
    }
}

/// Packs a line vertex. The low bits of the doubled position hold the
/// texture flags, `data` holds the extrusion, the direction and the scaled
/// distance along the line split over two bytes.
fn line_vertex(point: TilePoint, extrude: Vector, tx: i32, ty: i32, dir: f32, distance: f32) -> LineVertex {
    let dir = if dir == 0.0 { 0 } else if dir < 0.0 { -1 } else { 1 };
    let scaled = (distance * LINE_DISTANCE_SCALE) as i32;

    LineVertex {
        pos: [((point.x << 1) | tx) as i16, ((point.y << 1) | ty) as i16],
        data: [
            ((EXTRUDE_SCALE * extrude.x).round() + 128.0) as u8,
            ((EXTRUDE_SCALE * extrude.y).round() + 128.0) as u8,
            ((dir + 1) | ((scaled & 0x3F) << 2)) as u8,
            (scaled >> 6) as u8,
        ],
    }
}

fn sub(a: TilePoint, b: TilePoint) -> Vector {
    vector((a.x - b.x) as f32, (a.y - b.y) as f32)
}

fn dist(a: TilePoint, b: TilePoint) -> f32 {
    sub(a, b).length()
}

fn unit(v: Vector) -> Vector {
    let length = v.length();
    if length == 0.0 { v } else { v / length }
}

fn perp(v: Vector) -> Vector {
    vector(-v.y, v.x)
}

fn round_point(p: TilePoint, offset: Vector) -> TilePoint {
    TilePoint::new(
        p.x + (offset.x + 0.5).floor() as i32,
        p.y + (offset.y + 0.5).floor() as i32,
    )
}
