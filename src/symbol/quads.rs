use std::f32::consts::PI;

use lyon::math::{Point, Vector, point, vector};

use crate::glyphs::{GLYPH_BUFFER, Rect};

use super::{
    anchor::Anchor,
    shaping::{PositionedIcon, Shaping},
};

/// Labels may be shown one zoom level below the tile's own zoom.
pub const MIN_SCALE: f32 = 0.5;

/// A textured quad around an anchor. Corner offsets are in ems, angles in
/// radians in `0..2π`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SymbolQuad {
    pub anchor_point: Point,
    pub tl: Vector,
    pub tr: Vector,
    pub bl: Vector,
    pub br: Vector,
    pub tex: Rect,
    pub anchor_angle: f32,
    pub glyph_angle: f32,
    pub min_scale: f32,
    pub max_scale: f32,
}

fn rotate(v: Vector, angle: f32) -> Vector {
    let (sin, cos) = angle.sin_cos();
    vector(cos * v.x - sin * v.y, sin * v.x + cos * v.y)
}

pub fn get_icon_quads(
    anchor: &Anchor,
    icon: &PositionedIcon,
    line: &[Point],
    icon_rotate: f32,
    along_line: bool,
) -> Vec<SymbolQuad> {
    let rect = icon.image.rect();
    let border = 1.0;
    let left = icon.left - border;
    let right = left + rect.w as f32 / icon.image.pixel_ratio;
    let top = icon.top - border;
    let bottom = top + rect.h as f32 / icon.image.pixel_ratio;

    let mut angle = icon_rotate.to_radians();
    if along_line {
        if let Some(prev) = anchor.segment.and_then(|s| line.get(s)) {
            let segment = anchor.segment.unwrap_or_default();
            let next = line.get(segment + 1);
            match next {
                Some(next) if anchor.point == *prev => {
                    angle += (anchor.point.y - next.y).atan2(anchor.point.x - next.x) + PI;
                }
                _ => angle += (anchor.point.y - prev.y).atan2(anchor.point.x - prev.x),
            }
        }
    }

    let corner = |x: f32, y: f32| rotate(vector(x, y), angle);

    vec![SymbolQuad {
        anchor_point: anchor.point,
        tl: corner(left, top),
        tr: corner(right, top),
        bl: corner(left, bottom),
        br: corner(right, bottom),
        tex: rect,
        anchor_angle: 0.0,
        glyph_angle: 0.0,
        min_scale: MIN_SCALE,
        max_scale: f32::INFINITY,
    }]
}

#[derive(Debug, Copy, Clone)]
struct GlyphInstance {
    anchor_point: Point,
    offset: f32,
    angle: f32,
    min_scale: f32,
    max_scale: f32,
}

#[derive(Debug, Copy, Clone)]
pub struct GlyphQuadOptions {
    pub box_scale: f32,
    pub text_rotate: f32,
    pub keep_upright: bool,
    pub along_line: bool,
}

pub fn get_glyph_quads(
    anchor: &Anchor,
    shaping: &Shaping,
    line: &[Point],
    options: GlyphQuadOptions,
) -> Vec<SymbolQuad> {
    let text_rotate = options.text_rotate.to_radians();
    let buffer = GLYPH_BUFFER as f32;
    let mut quads = Vec::with_capacity(shaping.positioned_glyphs.len());

    for positioned in &shaping.positioned_glyphs {
        let glyph = &positioned.glyph;
        let Some(rect) = glyph.rect else {
            continue;
        };

        let center_x = (positioned.x + glyph.advance / 2.0) * options.box_scale;

        let mut instances = Vec::new();
        let mut label_min_scale = MIN_SCALE;

        match anchor.segment {
            Some(segment) if options.along_line => {
                label_min_scale = get_segment_glyphs(&mut instances, anchor, center_x, line, segment, true);
                if options.keep_upright {
                    label_min_scale = label_min_scale
                        .min(get_segment_glyphs(&mut instances, anchor, center_x, line, segment, false));
                }
            }
            _ => instances.push(GlyphInstance {
                anchor_point: anchor.point,
                offset: 0.0,
                angle: 0.0,
                min_scale: MIN_SCALE,
                max_scale: f32::INFINITY,
            }),
        }

        let x1 = positioned.x + glyph.left as f32 - buffer;
        let y1 = positioned.y - glyph.top as f32 - buffer;
        let x2 = x1 + rect.w as f32;
        let y2 = y1 + rect.h as f32;

        let corner = |x: f32, y: f32| {
            let v = vector(x, y);
            if text_rotate != 0.0 { rotate(v, text_rotate) } else { v }
        };

        for instance in instances {
            // Keeps the label from running past the end of the line
            let glyph_min_scale = instance.min_scale.max(label_min_scale);

            let anchor_angle = (anchor.angle + instance.offset + 2.0 * PI) % (2.0 * PI);
            let glyph_angle = (instance.angle + instance.offset + 2.0 * PI) % (2.0 * PI);

            quads.push(SymbolQuad {
                anchor_point: instance.anchor_point,
                tl: corner(x1, y1),
                tr: corner(x2, y1),
                bl: corner(x1, y2),
                br: corner(x2, y2),
                tex: rect,
                anchor_angle,
                glyph_angle,
                min_scale: glyph_min_scale,
                max_scale: instance.max_scale,
            });
        }
    }

    quads
}

/// Walks along `line` from the anchor for a glyph `offset` away, adding an
/// instance per segment the glyph passes over while the label shrinks.
/// Returns the smallest scale at which the glyph still fits on the line.
fn get_segment_glyphs(
    glyphs: &mut Vec<GlyphInstance>,
    anchor: &Anchor,
    offset: f32,
    line: &[Point],
    segment: usize,
    forward: bool,
) -> f32 {
    let upside_down = !forward;
    let forward = if offset < 0.0 { !forward } else { forward };

    let mut segment = segment as isize;
    if forward {
        segment += 1;
    }

    let point_at = |i: isize| usize::try_from(i).ok().and_then(|i| line.get(i)).copied();

    let mut new_anchor_point = anchor.point;
    let Some(mut end) = point_at(segment) else {
        return MIN_SCALE;
    };
    let mut prev_scale = f32::INFINITY;

    let offset = offset.abs();
    let placement_scale = MIN_SCALE;

    loop {
        let distance = (end - new_anchor_point).length();
        let scale = offset / distance;

        let mut angle = (end.y - new_anchor_point.y).atan2(end.x - new_anchor_point.x);
        if !forward {
            angle += PI;
        }

        glyphs.push(GlyphInstance {
            anchor_point: new_anchor_point,
            offset: if upside_down { PI } else { 0.0 },
            min_scale: scale,
            max_scale: prev_scale,
            angle: (angle + 2.0 * PI) % (2.0 * PI),
        });

        if scale <= placement_scale {
            break;
        }

        new_anchor_point = end;

        // Skip duplicate points
        while new_anchor_point == end {
            segment += if forward { 1 } else { -1 };
            match point_at(segment) {
                Some(p) => end = p,
                None => return scale,
            }
        }

        let normal = (end - new_anchor_point).normalize();
        new_anchor_point = new_anchor_point - normal * distance;

        prev_scale = scale;
    }

    placement_scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        glyphs::IconImage,
        symbol::shaping::{TextOptions, shape_icon, shape_text, tests::glyph_stack},
    };
    use approx::assert_relative_eq;

    fn icon() -> PositionedIcon {
        shape_icon(
            &IconImage {
                width: 10,
                height: 10,
                x: 0,
                y: 0,
                pixel_ratio: 1.0,
                sdf: false,
            },
            (0.0, 0.0),
        )
    }

    #[test]
    fn icon_quad_has_a_border() {
        let anchor = Anchor::new(point(100.0, 100.0), 0.0, None);
        let quads = get_icon_quads(&anchor, &icon(), &[], 0.0, false);

        assert_eq!(quads.len(), 1);
        assert_eq!(quads[0].tl, vector(-6.0, -6.0));
        assert_eq!(quads[0].br, vector(4.0, 4.0));
        assert_eq!(quads[0].max_scale, f32::INFINITY);
    }

    #[test]
    fn icon_quads_follow_the_line_direction() {
        let line = [point(0.0, 0.0), point(0.0, 100.0)];
        let anchor = Anchor::new(point(0.0, 50.0), 0.0, Some(0));
        let quads = get_icon_quads(&anchor, &icon(), &line, 0.0, true);

        // Rotated a quarter turn, so the top left corner moves to the right
        assert_relative_eq!(quads[0].tl.x, 6.0, epsilon = 1e-4);
        assert_relative_eq!(quads[0].tl.y, -6.0, epsilon = 1e-4);
    }

    #[test]
    fn point_labels_get_one_quad_per_visible_glyph() {
        let shaping = shape_text("a b", &glyph_stack(), &TextOptions::default()).unwrap();
        let anchor = Anchor::new(point(10.0, 10.0), 0.0, None);
        let options = GlyphQuadOptions {
            box_scale: 1.0,
            text_rotate: 0.0,
            keep_upright: true,
            along_line: false,
        };
        let quads = get_glyph_quads(&anchor, &shaping, &[], options);

        assert_eq!(quads.len(), 2);
        assert!(quads.iter().all(|q| q.min_scale == MIN_SCALE && q.anchor_point == anchor.point));
    }

    #[test]
    fn glyphs_along_lines_limit_their_scale_range() {
        let line = [point(0.0, 0.0), point(100.0, 0.0), point(100.0, 100.0)];
        let anchor = Anchor::new(point(80.0, 0.0), 0.0, Some(0));

        let mut instances = Vec::new();
        let min_scale = get_segment_glyphs(&mut instances, &anchor, 40.0, &line, 0, true);

        // 20 units remain on the first segment, the glyph needs 40
        assert_eq!(instances.len(), 2);
        assert_relative_eq!(instances[0].min_scale, 2.0);
        assert_relative_eq!(instances[1].max_scale, 2.0);
        assert_relative_eq!(instances[1].angle, PI / 2.0);
        assert_relative_eq!(min_scale, MIN_SCALE);

        // Walking backwards past the start of the line caps the scale
        let mut instances = Vec::new();
        let min_scale = get_segment_glyphs(&mut instances, &anchor, -100.0, &line, 0, true);
        assert_relative_eq!(min_scale, 100.0 / 80.0);
    }
}
