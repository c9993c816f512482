use lyon::geom::euclid::default::Point2D;

use crate::{EXTENT, Result, vector_tile::VectorTileFeature, warn_once};

/// A point in integer tile coordinates.
pub type TilePoint = Point2D<i32>;

pub type Ring = Vec<TilePoint>;

// Vertex positions are stored doubled in 16 bit attributes
const LIMIT_MIN: i32 = -(1 << 14);
const LIMIT_MAX: i32 = (1 << 14) - 1;

/// Loads a feature's geometry rescaled from its own extent into [`EXTENT`].
pub fn load_geometry(feature: &VectorTileFeature<'_>) -> Result<Vec<Ring>> {
    let mut geometry = feature.load_geometry()?;
    let scale = EXTENT as f64 / feature.extent().max(1) as f64;

    for ring in geometry.iter_mut() {
        for point in ring.iter_mut() {
            *point = rescale(*point, scale);

            if point.x < LIMIT_MIN
                || point.x > LIMIT_MAX
                || point.y < LIMIT_MIN
                || point.y > LIMIT_MAX
            {
                warn_once("geometry exceeds allowed extent, reduce your vector tile buffer size");
            }
        }
    }

    Ok(geometry)
}

fn rescale(point: TilePoint, scale: f64) -> TilePoint {
    // Round half up, matching the fixed point renderer
    let x = (point.x as f64 * scale + 0.5).floor() as i32;
    let y = (point.y as f64 * scale + 0.5).floor() as i32;
    TilePoint::new(x, y)
}

/// Twice the signed area of a ring, positive for clockwise rings in tile
/// coordinates (y down).
pub fn signed_area(ring: &[TilePoint]) -> i64 {
    let Some(&last) = ring.last() else {
        return 0;
    };

    let mut sum = 0i64;
    let mut prev = last;
    for &p in ring {
        sum += (prev.x as i64 - p.x as i64) * (p.y as i64 + prev.y as i64);
        prev = p;
    }

    sum
}

/// Groups rings into polygons. The winding of the first non-degenerate ring
/// marks outer rings; each outer ring starts a polygon and rings of the other
/// winding are its holes. Degenerate rings are dropped. With `max_rings > 1`
/// a polygon keeps its outer ring plus its largest holes, `max_rings` rings
/// at most.
pub fn classify_rings(rings: Vec<Ring>, max_rings: usize) -> Vec<Vec<Ring>> {
    if rings.len() <= 1 {
        return vec![rings];
    }

    let mut polygons: Vec<Vec<(u64, Ring)>> = Vec::new();
    let mut polygon: Vec<(u64, Ring)> = Vec::new();
    let mut ccw = None;

    for ring in rings {
        let area = signed_area(&ring);
        if area == 0 {
            continue;
        }

        let is_ccw = area < 0;
        let outer = *ccw.get_or_insert(is_ccw);

        if outer == is_ccw && !polygon.is_empty() {
            polygons.push(std::mem::take(&mut polygon));
        }
        polygon.push((area.unsigned_abs(), ring));
    }

    if !polygon.is_empty() {
        polygons.push(polygon);
    }

    polygons
        .into_iter()
        .map(|mut polygon| {
            if max_rings > 1 && polygon.len() > max_rings {
                let holes = &mut polygon[1..];
                holes.select_nth_unstable_by(max_rings - 2, |a, b| b.0.cmp(&a.0));
                polygon.truncate(max_rings);
            }
            polygon.into_iter().map(|(_, ring)| ring).collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        proto::{self, GeometryEncoder, LayerBuilder},
        vector_tile::VectorTile,
    };
    use prost::Message;

    fn ring(points: &[(i32, i32)]) -> Ring {
        points.iter().map(|&(x, y)| TilePoint::new(x, y)).collect()
    }

    fn square(x: i32, y: i32, size: i32, clockwise: bool) -> Ring {
        let mut r = ring(&[
            (x, y),
            (x + size, y),
            (x + size, y + size),
            (x, y + size),
            (x, y),
        ]);
        if !clockwise {
            r.reverse();
        }
        r
    }

    #[test]
    fn signed_area_sign_follows_winding() {
        assert!(signed_area(&square(0, 0, 10, true)) > 0);
        assert!(signed_area(&square(0, 0, 10, false)) < 0);
        assert_eq!(signed_area(&square(0, 0, 10, true)).abs(), 200);
        assert_eq!(signed_area(&[]), 0);
    }

    #[test]
    fn outer_rings_start_polygons_and_holes_attach() {
        let rings = vec![
            square(0, 0, 100, true),
            square(10, 10, 10, false),
            square(200, 0, 100, true),
            square(210, 10, 10, false),
            square(230, 10, 10, false),
        ];
        let polygons = classify_rings(rings, 0);
        assert_eq!(polygons.len(), 2);
        assert_eq!(polygons[0].len(), 2);
        assert_eq!(polygons[1].len(), 3);
    }

    #[test]
    fn degenerate_rings_are_dropped() {
        let rings = vec![
            ring(&[(0, 0), (5, 0), (10, 0), (0, 0)]),
            square(0, 0, 10, false),
            square(2, 2, 2, true),
        ];
        let polygons = classify_rings(rings, 0);
        assert_eq!(polygons.len(), 1);
        assert_eq!(polygons[0].len(), 2);
        assert_eq!(polygons[0][0], square(0, 0, 10, false));
    }

    #[test]
    fn max_rings_keeps_largest_holes() {
        let rings = vec![
            square(0, 0, 1000, true),
            square(10, 10, 5, false),
            square(100, 100, 50, false),
            square(300, 300, 2, false),
            square(500, 500, 80, false),
        ];
        let polygons = classify_rings(rings, 3);
        assert_eq!(polygons.len(), 1);
        let polygon = &polygons[0];
        assert_eq!(polygon.len(), 3);
        assert_eq!(polygon[0], square(0, 0, 1000, true));
        assert!(polygon.contains(&square(100, 100, 50, false)));
        assert!(polygon.contains(&square(500, 500, 80, false)));
    }

    #[test]
    fn load_geometry_rescales_to_internal_extent() {
        let mut layer = LayerBuilder::new("lines", 4096);
        layer.add_feature(
            None,
            proto::GeomType::Linestring,
            GeometryEncoder::new()
                .line(&[[1, 1], [4096, 2048], [9000, -9000]])
                .finish(),
            Vec::<(&str, proto::Value)>::new(),
        );
        let data = proto::Tile {
            layers: vec![layer.finish()],
        }
        .encode_to_vec();

        let tile = VectorTile::parse(&data).unwrap();
        let feature = tile.layers[0].feature(0).unwrap();
        let geometry = load_geometry(&feature).unwrap();
        assert_eq!(
            geometry,
            vec![ring(&[(2, 2), (8192, 4096), (18000, -18000)])]
        );
    }

    #[test]
    fn rescale_rounds_half_up() {
        assert_eq!(rescale(TilePoint::new(1, -1), 0.5), TilePoint::new(1, 0));
        assert_eq!(rescale(TilePoint::new(3, -3), 0.5), TilePoint::new(2, -1));
    }
}
