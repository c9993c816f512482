use lyon::math::{Point, point};

use crate::EXTENT;

use super::{
    check_max_angle::check_max_angle,
    shaping::{PositionedIcon, Shaping},
};

/// Where a label is placed. Anchors on lines remember the segment they lie
/// on and its direction.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Anchor {
    pub point: Point,
    pub angle: f32,
    pub segment: Option<usize>,
}

impl Anchor {
    pub fn new(point: Point, angle: f32, segment: Option<usize>) -> Self {
        Anchor {
            point,
            angle,
            segment,
        }
    }
}

/// Candidate anchors along `line` every `spacing` units, offset so labels of
/// neighbouring tiles line up. Anchors where the label would not fit on the
/// line or would bend more than `max_angle` radians are dropped.
#[allow(clippy::too_many_arguments)]
pub fn get_anchors(
    line: &[Point],
    spacing: f32,
    max_angle: f32,
    shaped_text: Option<&Shaping>,
    shaped_icon: Option<&PositionedIcon>,
    glyph_size: f32,
    box_scale: f32,
    overscaling: f32,
) -> Vec<Anchor> {
    let Some(first) = line.first() else {
        return Vec::new();
    };

    let angle_window_size = if shaped_text.is_some() {
        3.0 / 5.0 * glyph_size * box_scale
    } else {
        0.0
    };

    let label_length = shaped_text
        .map(|s| s.right - s.left)
        .unwrap_or(0.0)
        .max(shaped_icon.map(|s| s.right - s.left).unwrap_or(0.0));

    let extent = EXTENT as f32;
    let is_line_continued = first.x == 0.0 || first.x == extent || first.y == 0.0 || first.y == extent;

    // Long labels keep at least a quarter of the spacing between them
    let mut spacing = spacing;
    if spacing - label_length * box_scale < spacing / 4.0 {
        spacing = label_length * box_scale + spacing / 4.0;
    }

    // Extra offset on lines starting in the tile keeps labels away from T
    // intersections
    let fixed_extra_offset = glyph_size * 2.0;

    let offset = if is_line_continued {
        (spacing / 2.0 * overscaling) % spacing
    } else {
        ((label_length / 2.0 + fixed_extra_offset) * box_scale * overscaling) % spacing
    };

    resample(
        line,
        offset,
        spacing,
        angle_window_size,
        max_angle,
        label_length * box_scale,
        is_line_continued,
        false,
    )
}

#[allow(clippy::too_many_arguments)]
fn resample(
    line: &[Point],
    offset: f32,
    spacing: f32,
    angle_window_size: f32,
    max_angle: f32,
    label_length: f32,
    continued_line: bool,
    place_at_middle: bool,
) -> Vec<Anchor> {
    let half_label_length = label_length / 2.0;
    let line_length: f32 = line.windows(2).map(|w| (w[1] - w[0]).length()).sum();
    let extent = EXTENT as f32;

    let mut distance = 0.0;
    let mut marked_distance = offset - spacing;
    let mut anchors = Vec::new();

    for (i, w) in line.windows(2).enumerate() {
        let (a, b) = (w[0], w[1]);
        let segment_dist = (b - a).length();
        let angle = (b.y - a.y).atan2(b.x - a.x);

        while marked_distance + spacing < distance + segment_dist {
            marked_distance += spacing;

            let t = (marked_distance - distance) / segment_dist;
            let x = a.x + (b.x - a.x) * t;
            let y = a.y + (b.y - a.y) * t;

            // The label has to fit between the start and end of the line
            if x >= 0.0
                && x < extent
                && y >= 0.0
                && y < extent
                && marked_distance - half_label_length >= 0.0
                && marked_distance + half_label_length <= line_length
            {
                let anchor = Anchor::new(point(x.round(), y.round()), angle, Some(i));

                if angle_window_size == 0.0
                    || check_max_angle(line, &anchor, label_length, angle_window_size, max_angle)
                {
                    anchors.push(anchor);
                }
            }
        }

        distance += segment_dist;
    }

    if !place_at_middle && anchors.is_empty() && !continued_line {
        // Short lines in overscaled tiles may miss every spaced position,
        // try the middle of the line instead
        anchors = resample(
            line,
            distance / 2.0,
            spacing,
            angle_window_size,
            max_angle,
            label_length,
            continued_line,
            true,
        );
    }

    anchors
}
