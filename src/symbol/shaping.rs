//! Lays out label text into positioned glyphs and sizes icons.

use crate::{
    glyphs::{Glyph, GlyphStack, IconImage},
    style::Text,
};

/// Baseline offset of the first line, relative to the em box of the glyph
/// metrics.
const Y_OFFSET: f32 = -17.0;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PositionedGlyph {
    pub codepoint: u32,
    pub x: f32,
    pub y: f32,
    pub glyph: Glyph,
}

/// Shaped text in ems scaled to [`crate::glyphs::ONE_EM`], with the bounding
/// box around the anchor.
#[derive(Debug, Clone, PartialEq)]
pub struct Shaping {
    pub positioned_glyphs: Vec<PositionedGlyph>,
    pub text: Text,
    pub top: f32,
    pub bottom: f32,
    pub left: f32,
    pub right: f32,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TextOptions {
    /// Zero disables line breaking.
    pub max_width: f32,
    pub line_height: f32,
    pub horizontal_align: f32,
    pub vertical_align: f32,
    pub justify: f32,
    pub spacing: f32,
    pub translate: (f32, f32),
}

impl Default for TextOptions {
    fn default() -> Self {
        TextOptions {
            max_width: 0.0,
            line_height: 24.0,
            horizontal_align: 0.5,
            vertical_align: 0.5,
            justify: 0.5,
            spacing: 0.0,
            translate: (0.0, 0.0),
        }
    }
}

fn is_whitespace(c: u32) -> bool {
    matches!(c, 0x09 | 0x0a | 0x0b | 0x0c | 0x0d | 0x20)
}

fn is_breakable(c: u32) -> bool {
    matches!(
        c,
        0x0a | 0x20 | 0x26 | 0x28 | 0x29 | 0x2b | 0x2d | 0x2f | 0xad | 0xb7 | 0x200b | 0x2010 | 0x2013 | 0x2027
    )
}

/// Shapes `text`. Returns `None` when none of its characters has a glyph.
pub fn shape_text(text: &str, glyphs: &GlyphStack, options: &TextOptions) -> Option<Shaping> {
    let codepoints: Vec<u32> = text.chars().map(u32::from).collect();
    if !codepoints.iter().any(|c| glyphs.contains_key(c)) {
        return None;
    }

    let (tx, ty) = options.translate;
    let mut shaping = Shaping {
        positioned_glyphs: Vec::with_capacity(codepoints.len()),
        text: text.into(),
        top: ty,
        bottom: ty,
        left: tx,
        right: tx,
    };

    let breaks = determine_line_breaks(&codepoints, glyphs, options.spacing, options.max_width);

    let mut y = Y_OFFSET;
    let mut max_line_length: f32 = 0.0;
    let mut line_count = 0;
    let mut start = 0;

    for end in breaks {
        let line = trim_whitespace(&codepoints[start..end]);
        start = end;
        line_count += 1;

        if line.is_empty() {
            y += options.line_height;
            continue;
        }

        let line_start_index = shaping.positioned_glyphs.len();
        let mut x = 0.0;
        for &codepoint in line {
            let Some(glyph) = glyphs.get(&codepoint) else {
                continue;
            };

            shaping.positioned_glyphs.push(PositionedGlyph {
                codepoint,
                x,
                y,
                glyph: *glyph,
            });
            x += glyph.advance + options.spacing;
        }

        if shaping.positioned_glyphs.len() > line_start_index {
            max_line_length = max_line_length.max(x - options.spacing);
            justify_line(&mut shaping.positioned_glyphs[line_start_index..], options.justify);
        }

        y += options.line_height;
    }

    if shaping.positioned_glyphs.is_empty() {
        return None;
    }

    align(
        &mut shaping.positioned_glyphs,
        options,
        max_line_length,
        line_count as f32,
    );

    let height = line_count as f32 * options.line_height;
    shaping.top += -options.vertical_align * height;
    shaping.bottom = shaping.top + height;
    shaping.left += -options.horizontal_align * max_line_length;
    shaping.right = shaping.left + max_line_length;

    Some(shaping)
}

fn trim_whitespace(line: &[u32]) -> &[u32] {
    let start = line.iter().position(|&c| !is_whitespace(c)).unwrap_or(line.len());
    let end = line.iter().rposition(|&c| !is_whitespace(c)).map_or(start, |i| i + 1);
    &line[start..end]
}

fn justify_line(line: &mut [PositionedGlyph], justify: f32) {
    let Some(last) = line.last() else {
        return;
    };

    let indent = (last.x + last.glyph.advance) * justify;
    for glyph in line.iter_mut() {
        glyph.x -= indent;
    }
}

fn align(glyphs: &mut [PositionedGlyph], options: &TextOptions, max_line_length: f32, line_count: f32) {
    let shift_x = (options.justify - options.horizontal_align) * max_line_length + options.translate.0;
    let shift_y = (-options.vertical_align * line_count + 0.5) * options.line_height + options.translate.1;

    for glyph in glyphs.iter_mut() {
        glyph.x += shift_x;
        glyph.y += shift_y;
    }
}

#[derive(Debug, Clone)]
struct Break {
    index: usize,
    x: f32,
    prior: Option<usize>,
    badness: f32,
}

fn calculate_badness(line_width: f32, target_width: f32, penalty: f32, is_last_break: bool) -> f32 {
    let raggedness = (line_width - target_width).powi(2);

    if is_last_break {
        // Short final lines read better than long ones
        if line_width < target_width {
            raggedness / 2.0
        } else {
            raggedness * 2.0
        }
    } else {
        raggedness + penalty.abs() * penalty
    }
}

fn calculate_penalty(codepoint: u32, next_codepoint: Option<u32>) -> f32 {
    let mut penalty = 0.0;

    // Forced break
    if codepoint == 0x0a {
        penalty -= 10000.0;
    }

    // Avoid leaving an opening parenthesis at a line end or a closing one at
    // the start
    if codepoint == 0x28 || codepoint == 0xff08 {
        penalty += 50.0;
    }
    if matches!(next_codepoint, Some(0x29 | 0xff09)) {
        penalty += 50.0;
    }

    penalty
}

fn evaluate_break(
    index: usize,
    x: f32,
    target_width: f32,
    potential_breaks: &[Break],
    penalty: f32,
    is_last_break: bool,
) -> Break {
    let mut best_prior = None;
    let mut best_badness = calculate_badness(x, target_width, penalty, is_last_break);

    for (i, prior) in potential_breaks.iter().enumerate() {
        let badness = calculate_badness(x - prior.x, target_width, penalty, is_last_break) + prior.badness;
        if badness <= best_badness {
            best_prior = Some(i);
            best_badness = badness;
        }
    }

    Break {
        index,
        x,
        prior: best_prior,
        badness: best_badness,
    }
}

/// End indices of each line. Breaks are chosen so lines come out close to
/// the same width instead of filling each line greedily.
fn determine_line_breaks(codepoints: &[u32], glyphs: &GlyphStack, spacing: f32, max_width: f32) -> Vec<usize> {
    if max_width <= 0.0 || codepoints.is_empty() {
        return vec![codepoints.len()];
    }

    let total_width: f32 = codepoints
        .iter()
        .filter_map(|c| glyphs.get(c))
        .map(|g| g.advance + spacing)
        .sum();
    let line_count = (total_width / max_width).ceil().max(1.0);
    let target_width = total_width / line_count;

    let mut potential_breaks: Vec<Break> = Vec::new();
    let mut current_x = 0.0;

    for (i, &codepoint) in codepoints.iter().enumerate() {
        if let Some(glyph) = glyphs.get(&codepoint) {
            if !is_whitespace(codepoint) {
                current_x += glyph.advance + spacing;
            }
        }

        if i + 1 < codepoints.len() && is_breakable(codepoint) {
            let penalty = calculate_penalty(codepoint, codepoints.get(i + 1).copied());
            let candidate = evaluate_break(i + 1, current_x, target_width, &potential_breaks, penalty, false);
            potential_breaks.push(candidate);
        }
    }

    let last = evaluate_break(codepoints.len(), current_x, target_width, &potential_breaks, 0.0, true);

    let mut breaks = vec![last.index];
    let mut prior = last.prior;
    while let Some(i) = prior {
        breaks.push(potential_breaks[i].index);
        prior = potential_breaks[i].prior;
    }
    breaks.reverse();
    breaks
}

/// An icon's box around the anchor.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PositionedIcon {
    pub image: IconImage,
    pub top: f32,
    pub bottom: f32,
    pub left: f32,
    pub right: f32,
}

pub fn shape_icon(image: &IconImage, offset: (f32, f32)) -> PositionedIcon {
    let width = image.width as f32 / image.pixel_ratio;
    let height = image.height as f32 / image.pixel_ratio;

    let left = offset.0 - width / 2.0;
    let top = offset.1 - height / 2.0;

    PositionedIcon {
        image: *image,
        top,
        bottom: top + height,
        left,
        right: left + width,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::glyphs::Rect;
    use approx::assert_relative_eq;

    /// Monospaced test glyphs, 10 units wide, for printable ASCII.
    pub(crate) fn glyph_stack() -> GlyphStack {
        (0x20..0x7f)
            .map(|c| {
                let blank = c == 0x20;
                (
                    c,
                    Glyph {
                        id: c,
                        width: if blank { 0 } else { 8 },
                        height: if blank { 0 } else { 12 },
                        left: 1,
                        top: -6,
                        advance: 10.0,
                        rect: (!blank).then_some(Rect {
                            x: (c as u16 - 0x20) * 14,
                            y: 0,
                            w: 14,
                            h: 18,
                        }),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn single_line_is_centered_on_the_anchor() {
        let shaping = shape_text("abcd", &glyph_stack(), &TextOptions::default()).unwrap();

        assert_eq!(shaping.positioned_glyphs.len(), 4);
        assert_relative_eq!(shaping.left, -20.0);
        assert_relative_eq!(shaping.right, 20.0);
        assert_relative_eq!(shaping.top, -12.0);
        assert_relative_eq!(shaping.bottom, 12.0);
        assert_relative_eq!(shaping.positioned_glyphs[0].x, -20.0);
        assert_relative_eq!(shaping.positioned_glyphs[3].x, 10.0);
        assert_relative_eq!(shaping.positioned_glyphs[0].y, -17.0);
    }

    #[test]
    fn breaks_balance_line_widths() {
        let codepoints: Vec<u32> = "aaaa bbbb cccc dd".chars().map(u32::from).collect();
        // A greedy fill would break after "aaaa bbbb cccc"
        let breaks = determine_line_breaks(&codepoints, &glyph_stack(), 0.0, 140.0);
        assert_eq!(breaks, vec![10, 17]);

        let options = TextOptions {
            max_width: 140.0,
            ..TextOptions::default()
        };
        let shaping = shape_text("aaaa bbbb cccc dd", &glyph_stack(), &options).unwrap();
        let lines: std::collections::BTreeSet<i32> =
            shaping.positioned_glyphs.iter().map(|g| g.y as i32).collect();
        assert_eq!(lines.len(), 2);
        assert_relative_eq!(shaping.bottom - shaping.top, 48.0);
        assert_relative_eq!(shaping.right - shaping.left, 90.0);
    }

    #[test]
    fn newlines_force_breaks() {
        let codepoints: Vec<u32> = "ab\ncd".chars().map(u32::from).collect();
        let breaks = determine_line_breaks(&codepoints, &glyph_stack(), 0.0, 1000.0);
        assert_eq!(breaks, vec![3, 5]);
    }

    #[test]
    fn justification_and_anchor_move_glyphs() {
        let options = TextOptions {
            horizontal_align: 0.0,
            vertical_align: 0.0,
            justify: 0.0,
            translate: (5.0, 7.0),
            ..TextOptions::default()
        };
        let shaping = shape_text("ab", &glyph_stack(), &options).unwrap();
        assert_relative_eq!(shaping.left, 5.0);
        assert_relative_eq!(shaping.top, 7.0);
        assert_relative_eq!(shaping.positioned_glyphs[0].x, 5.0);
        assert_relative_eq!(shaping.positioned_glyphs[0].y, -17.0 + 12.0 + 7.0);
    }

    #[test]
    fn text_without_glyphs_has_no_shaping() {
        assert!(shape_text("\u{4e2d}", &glyph_stack(), &TextOptions::default()).is_none());
    }

    #[test]
    fn icons_are_centered_and_offset() {
        let image = IconImage {
            width: 20,
            height: 10,
            x: 0,
            y: 0,
            pixel_ratio: 2.0,
            sdf: false,
        };
        let icon = shape_icon(&image, (1.0, 0.0));
        assert_relative_eq!(icon.left, -4.0);
        assert_relative_eq!(icon.right, 6.0);
        assert_relative_eq!(icon.top, -2.5);
        assert_relative_eq!(icon.bottom, 2.5);
    }
}
