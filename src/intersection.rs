//! Exact hit tests between query geometry and tile geometry, all in tile
//! units.

use lyon::math::{Point, Vector};

/// Whether any polygon of `polygon` overlaps any polygon of `other`.
pub fn multi_polygon_intersects_multi_polygon(polygon: &[Vec<Point>], other: &[Vec<Point>]) -> bool {
    if polygon.len() == 1 && polygon[0].len() == 1 {
        return multi_polygon_contains_point(other, polygon[0][0]);
    }

    for ring in other {
        for &p in ring {
            if multi_polygon_contains_point(polygon, p) {
                return true;
            }
        }
    }

    for ring in polygon {
        for &p in ring {
            if multi_polygon_contains_point(other, p) {
                return true;
            }
        }
    }

    polygon
        .iter()
        .any(|a| other.iter().any(|b| line_intersects_line(a, b)))
}

/// Whether the query polygon comes within `radius` of any of the points.
pub fn multi_polygon_intersects_buffered_multi_point(
    polygon: &[Vec<Point>],
    rings: &[Vec<Point>],
    radius: f32,
) -> bool {
    rings.iter().flatten().any(|&p| {
        multi_polygon_contains_point(polygon, p) || polygon_intersects_buffered_point(polygon, p, radius)
    })
}

/// Whether the query polygon comes within `radius` of any of the lines.
pub fn multi_polygon_intersects_buffered_multi_line(
    polygon: &[Vec<Point>],
    lines: &[Vec<Point>],
    radius: f32,
) -> bool {
    let has_area = polygon.iter().any(|ring| ring.len() >= 3);

    for line in lines {
        if has_area && line.iter().any(|&p| multi_polygon_contains_point(polygon, p)) {
            return true;
        }

        if polygon
            .iter()
            .any(|ring| line_intersects_buffered_line(ring, line, radius))
        {
            return true;
        }
    }
    false
}

fn polygon_intersects_buffered_point(polygon: &[Vec<Point>], p: Point, radius: f32) -> bool {
    let radius_squared = radius * radius;

    polygon.iter().any(|ring| {
        if ring.len() == 1 {
            return (ring[0] - p).square_length() <= radius_squared;
        }
        ring.windows(2)
            .any(|w| dist_to_segment_squared(p, w[0], w[1]) <= radius_squared)
    })
}

fn line_intersects_buffered_line(a: &[Point], b: &[Point], radius: f32) -> bool {
    if a.len() > 1 {
        if line_intersects_line(a, b) {
            return true;
        }

        // Close enough to any of the other's vertices
        if b.iter().any(|&p| {
            a.windows(2)
                .any(|w| dist_to_segment_squared(p, w[0], w[1]) <= radius * radius)
        }) {
            return true;
        }
    }

    a.iter().any(|&p| {
        b.windows(2)
            .any(|w| dist_to_segment_squared(p, w[0], w[1]) <= radius * radius)
    })
}

fn line_intersects_line(a: &[Point], b: &[Point]) -> bool {
    a.windows(2).any(|sa| {
        b.windows(2)
            .any(|sb| line_segment_intersects_line_segment(sa[0], sa[1], sb[0], sb[1]))
    })
}

fn is_counter_clockwise(a: Point, b: Point, c: Point) -> bool {
    (c.y - a.y) * (b.x - a.x) > (b.y - a.y) * (c.x - a.x)
}

fn line_segment_intersects_line_segment(a0: Point, a1: Point, b0: Point, b1: Point) -> bool {
    is_counter_clockwise(a0, b0, b1) != is_counter_clockwise(a1, b0, b1)
        && is_counter_clockwise(a0, a1, b0) != is_counter_clockwise(a0, a1, b1)
}

/// Squared distance from `p` to the segment `v..w`.
pub fn dist_to_segment_squared(p: Point, v: Point, w: Point) -> f32 {
    let segment: Vector = w - v;
    let length_squared = segment.square_length();
    if length_squared == 0.0 {
        return (p - v).square_length();
    }

    let t = (p - v).dot(segment) / length_squared;
    if t < 0.0 {
        return (p - v).square_length();
    }
    if t > 1.0 {
        return (p - w).square_length();
    }

    (p - (v + segment * t)).square_length()
}

/// Even-odd containment over every ring, so holes are excluded.
pub fn multi_polygon_contains_point(rings: &[Vec<Point>], p: Point) -> bool {
    rings
        .iter()
        .fold(false, |inside, ring| inside != polygon_contains_point(ring, p))
}

/// Containment in a single ring.
pub fn polygon_contains_point(ring: &[Point], p: Point) -> bool {
    let Some(&last) = ring.last() else {
        return false;
    };

    let mut inside = false;
    let mut p2 = last;
    for &p1 in ring {
        if (p1.y > p.y) != (p2.y > p.y) && p.x < (p2.x - p1.x) * (p.y - p1.y) / (p2.y - p1.y) + p1.x {
            inside = !inside;
        }
        p2 = p1;
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use lyon::math::point;

    fn ring(points: &[(f32, f32)]) -> Vec<Point> {
        points.iter().map(|&(x, y)| point(x, y)).collect()
    }

    fn square(x: f32, y: f32, size: f32) -> Vec<Point> {
        ring(&[(x, y), (x + size, y), (x + size, y + size), (x, y + size), (x, y)])
    }

    #[test]
    fn point_in_polygon_respects_holes() {
        let polygon = vec![square(0.0, 0.0, 100.0), square(25.0, 25.0, 50.0)];
        assert!(multi_polygon_contains_point(&polygon, point(10.0, 10.0)));
        assert!(!multi_polygon_contains_point(&polygon, point(50.0, 50.0)));
        assert!(!multi_polygon_contains_point(&polygon, point(150.0, 50.0)));
        assert!(polygon_contains_point(&square(0.0, 0.0, 10.0), point(5.0, 5.0)));
    }

    #[test]
    fn segment_distance_clamps_to_endpoints() {
        let (v, w) = (point(0.0, 0.0), point(10.0, 0.0));
        assert_relative_eq!(dist_to_segment_squared(point(5.0, 3.0), v, w), 9.0);
        assert_relative_eq!(dist_to_segment_squared(point(-3.0, 4.0), v, w), 25.0);
        assert_relative_eq!(dist_to_segment_squared(point(13.0, 4.0), v, w), 25.0);
        assert_relative_eq!(dist_to_segment_squared(point(1.0, 1.0), v, v), 2.0);
    }

    #[test]
    fn polygons_intersect_by_containment_or_crossing() {
        let a = vec![square(0.0, 0.0, 10.0)];
        let inside = vec![square(2.0, 2.0, 2.0)];
        let crossing = vec![ring(&[(5.0, -5.0), (5.0, 15.0), (6.0, 15.0), (6.0, -5.0), (5.0, -5.0)])];
        let apart = vec![square(20.0, 20.0, 5.0)];

        assert!(multi_polygon_intersects_multi_polygon(&a, &inside));
        assert!(multi_polygon_intersects_multi_polygon(&inside, &a));
        assert!(multi_polygon_intersects_multi_polygon(&a, &crossing));
        assert!(!multi_polygon_intersects_multi_polygon(&a, &apart));

        let query_point = vec![ring(&[(5.0, 5.0)])];
        assert!(multi_polygon_intersects_multi_polygon(&query_point, &a));
    }

    #[test]
    fn buffered_points_and_lines() {
        let query = vec![square(0.0, 0.0, 10.0)];
        let points = vec![ring(&[(13.0, 5.0)])];
        assert!(multi_polygon_intersects_buffered_multi_point(&query, &points, 4.0));
        assert!(!multi_polygon_intersects_buffered_multi_point(&query, &points, 2.0));

        let line = vec![ring(&[(-10.0, 14.0), (20.0, 14.0)])];
        assert!(multi_polygon_intersects_buffered_multi_line(&query, &line, 5.0));
        assert!(!multi_polygon_intersects_buffered_multi_line(&query, &line, 3.0));

        let through = vec![ring(&[(-10.0, 5.0), (20.0, 5.0)])];
        assert!(multi_polygon_intersects_buffered_multi_line(&query, &through, 0.0));
    }
}
