use lyon::math::{Point, point};

use super::{
    anchor::Anchor,
    collision_box::{CollisionBox, CollisionBoxArray, FeatureRef},
    shaping::{PositionedIcon, Shaping},
};

/// Extent of a shaped label around its anchor.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct LabelBounds {
    pub top: f32,
    pub bottom: f32,
    pub left: f32,
    pub right: f32,
}

impl From<&Shaping> for LabelBounds {
    fn from(s: &Shaping) -> Self {
        LabelBounds {
            top: s.top,
            bottom: s.bottom,
            left: s.left,
            right: s.right,
        }
    }
}

impl From<&PositionedIcon> for LabelBounds {
    fn from(s: &PositionedIcon) -> Self {
        LabelBounds {
            top: s.top,
            bottom: s.bottom,
            left: s.left,
            right: s.right,
        }
    }
}

/// The range of boxes in the tile's [`CollisionBoxArray`] covering one label.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct CollisionFeature {
    pub box_start_index: usize,
    pub box_end_index: usize,
}

impl CollisionFeature {
    /// Point labels get a single box. Labels along lines are covered by a
    /// row of square boxes following the line; `straight` labels follow the
    /// anchor's segment only.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        boxes: &mut CollisionBoxArray,
        line: &[Point],
        anchor: &Anchor,
        feature: FeatureRef,
        shaped: LabelBounds,
        box_scale: f32,
        padding: f32,
        align_line: bool,
        straight: bool,
    ) -> Self {
        let y1 = shaped.top * box_scale - padding;
        let y2 = shaped.bottom * box_scale + padding;
        let x1 = shaped.left * box_scale - padding;
        let x2 = shaped.right * box_scale + padding;

        let box_start_index = boxes.len();

        match anchor.segment {
            Some(segment) if align_line => {
                let height = y2 - y1;
                let length = x2 - x1;

                if height > 0.0 {
                    // Keeps long labels from getting very many tiny boxes
                    let height = height.max(10.0 * box_scale);

                    if straight {
                        if let (Some(&a), Some(&b)) = (line.get(segment), line.get(segment + 1)) {
                            let vector = (b - a).normalize() * length;
                            let straight_line = [anchor.point - vector, anchor.point + vector];
                            add_line_boxes(boxes, &straight_line, anchor, 0, length, height, feature);
                        }
                    } else {
                        add_line_boxes(boxes, line, anchor, segment, length, height, feature);
                    }
                }
            }
            _ => {
                boxes.emplace_back(CollisionBox::new(
                    anchor.point,
                    [x1, y1, x2, y2],
                    f32::INFINITY,
                    feature,
                ));
            }
        }

        CollisionFeature {
            box_start_index,
            box_end_index: boxes.len(),
        }
    }

    pub fn boxes(&self) -> std::ops::Range<usize> {
        self.box_start_index..self.box_end_index
    }

    pub fn is_empty(&self) -> bool {
        self.box_start_index == self.box_end_index
    }
}

fn add_line_boxes(
    boxes: &mut CollisionBoxArray,
    line: &[Point],
    anchor: &Anchor,
    segment: usize,
    label_length: f32,
    box_size: f32,
    feature: FeatureRef,
) {
    let step = box_size / 2.0;
    let n_boxes = (label_length / step).floor() as usize;

    // Centers the first box half a box in so its edge meets the label's
    let first_box_offset = -box_size / 2.0;

    let mut p = anchor.point;
    let mut index = segment as isize + 1;
    let mut anchor_distance = first_box_offset;

    // Move back to the first segment the label appears on
    loop {
        index -= 1;
        let Some(&vertex) = usize::try_from(index).ok().and_then(|i| line.get(i)) else {
            return;
        };
        anchor_distance -= (vertex - p).length();
        p = vertex;

        if anchor_distance <= -label_length / 2.0 {
            break;
        }
    }

    let mut index = index as usize;
    let Some(mut segment_length) = segment_length(line, index) else {
        return;
    };

    for i in 0..n_boxes {
        let box_distance_to_anchor = -label_length / 2.0 + i as f32 * step;

        while anchor_distance + segment_length < box_distance_to_anchor {
            anchor_distance += segment_length;
            index += 1;

            match segment_length_at(line, index) {
                Some(length) => segment_length = length,
                None => return,
            }
        }

        let segment_box_distance = box_distance_to_anchor - anchor_distance;
        let (p0, p1) = (line[index], line[index + 1]);
        let box_anchor = p0 + (p1 - p0).normalize() * segment_box_distance;
        let box_anchor = point(box_anchor.x.round(), box_anchor.y.round());

        let distance_to_inner_edge = ((box_distance_to_anchor - first_box_offset).abs() - step / 2.0).max(0.0);
        let max_scale = label_length / 2.0 / distance_to_inner_edge;

        boxes.emplace_back(CollisionBox::new(
            box_anchor,
            [-box_size / 2.0, -box_size / 2.0, box_size / 2.0, box_size / 2.0],
            max_scale,
            feature,
        ));
    }
}

fn segment_length(line: &[Point], index: usize) -> Option<f32> {
    Some((*line.get(index + 1)? - *line.get(index)?).length())
}

fn segment_length_at(line: &[Point], index: usize) -> Option<f32> {
    if index + 1 >= line.len() {
        return None;
    }
    segment_length(line, index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn bounds() -> LabelBounds {
        LabelBounds {
            top: -10.0,
            bottom: 10.0,
            left: -50.0,
            right: 50.0,
        }
    }

    #[test]
    fn point_labels_get_one_box() {
        let mut boxes = CollisionBoxArray::new();
        let anchor = Anchor::new(point(500.0, 500.0), 0.0, None);
        let feature = CollisionFeature::new(
            &mut boxes,
            &[],
            &anchor,
            FeatureRef::default(),
            bounds(),
            2.0,
            4.0,
            false,
            false,
        );

        assert_eq!(feature.boxes(), 0..1);
        let b = boxes.get(0).unwrap();
        assert_eq!((b.x1, b.y1, b.x2, b.y2), (-104, -24, 104, 24));
        assert_eq!(b.max_scale, f32::INFINITY);
    }

    #[test]
    fn line_labels_are_covered_by_square_boxes() {
        let line = [point(0.0, 100.0), point(1000.0, 100.0)];
        let anchor = Anchor::new(point(500.0, 100.0), 0.0, Some(0));
        let mut boxes = CollisionBoxArray::new();
        let feature = CollisionFeature::new(
            &mut boxes,
            &line,
            &anchor,
            FeatureRef::default(),
            bounds(),
            1.0,
            0.0,
            true,
            false,
        );

        // Boxes of 20 units every 10 units over the 100 unit label
        assert_eq!(feature.boxes().len(), 10);
        let first = boxes.get(feature.box_start_index).unwrap();
        assert_eq!(first.anchor_point(), point(460.0, 100.0));
        assert_eq!((first.x1, first.x2), (-10, 10));

        // Boxes near the anchor stay valid the longest
        let scales: Vec<f32> = boxes.iter().map(|b| b.max_scale).collect();
        assert_relative_eq!(scales[0], 50.0 / 35.0);
        assert_eq!(scales[4], f32::INFINITY);
    }

    #[test]
    fn zero_height_labels_have_no_line_boxes() {
        let line = [point(0.0, 100.0), point(1000.0, 100.0)];
        let anchor = Anchor::new(point(500.0, 100.0), 0.0, Some(0));
        let mut boxes = CollisionBoxArray::new();
        let flat = LabelBounds {
            top: 0.0,
            bottom: 0.0,
            ..bounds()
        };
        let feature = CollisionFeature::new(
            &mut boxes,
            &line,
            &anchor,
            FeatureRef::default(),
            flat,
            1.0,
            0.0,
            true,
            false,
        );
        assert!(feature.is_empty());
    }
}
