use std::{collections::VecDeque, f32::consts::PI};

use lyon::math::Point;

use super::anchor::Anchor;

/// Whether a label of `label_length` centered on `anchor` fits on the line
/// without the line turning more than `max_angle` radians within any window
/// of `window_size`.
pub fn check_max_angle(
    line: &[Point],
    anchor: &Anchor,
    label_length: f32,
    window_size: f32,
    max_angle: f32,
) -> bool {
    // Horizontal labels always pass
    let Some(segment) = anchor.segment else {
        return true;
    };

    let mut p = anchor.point;
    let mut index = segment as isize + 1;
    let mut anchor_distance = 0.0;

    // Move back to the first segment the label appears on
    while anchor_distance > -label_length / 2.0 {
        index -= 1;
        let Some(&vertex) = usize::try_from(index).ok().and_then(|i| line.get(i)) else {
            return false;
        };
        anchor_distance -= (vertex - p).length();
        p = vertex;
    }

    let mut index = index as usize;
    let (Some(&start), Some(&next)) = (line.get(index), line.get(index + 1)) else {
        return false;
    };
    anchor_distance += (next - start).length();
    index += 1;

    let mut recent_corners: VecDeque<(f32, f32)> = VecDeque::new();
    let mut recent_angle_delta = 0.0;

    // Walk forward over the label checking the corners on the way
    while anchor_distance < label_length / 2.0 {
        let (Some(&prev), Some(&current)) = (line.get(index - 1), line.get(index)) else {
            return false;
        };
        let Some(&next) = line.get(index + 1) else {
            return false;
        };

        let angle_delta = angle_to(prev, current) - angle_to(current, next);
        let angle_delta = (((angle_delta + 3.0 * PI) % (PI * 2.0)) - PI).abs();

        recent_corners.push_back((anchor_distance, angle_delta));
        recent_angle_delta += angle_delta;

        while let Some(&(distance, delta)) = recent_corners.front() {
            if anchor_distance - distance > window_size {
                recent_angle_delta -= delta;
                recent_corners.pop_front();
            } else {
                break;
            }
        }

        if recent_angle_delta > max_angle {
            return false;
        }

        index += 1;
        anchor_distance += (next - current).length();
    }

    true
}

fn angle_to(a: Point, b: Point) -> f32 {
    (a.y - b.y).atan2(a.x - b.x)
}
