//! GeoJSON as a tile source. Features are projected to Web Mercator once on
//! parse; each tile request selects the features whose bounds touch the
//! buffered tile, clips them to it and encodes a single-layer vector tile.
//! Geometry is not simplified.

use std::f64::consts::PI;

use geo::{
    BooleanOps, BoundingRect, Coord, Geometry, Intersects, LineString, MapCoords, MultiLineString, MultiPoint,
    MultiPolygon, Orient, Rect, orient::Direction,
};
use geojson::{GeoJson, feature::Id};
use prost::Message;
use serde_json::Value as Json;

use crate::{
    Error, Result, TileId,
    proto::{self, GeometryEncoder, LayerBuilder},
};

/// Name of the one layer in every GeoJSON tile.
pub const GEOJSON_LAYER: &str = "_geojsonTileLayer";

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct GeoJsonOptions {
    pub extent: u32,
    /// Tile units kept around the tile so geometry crossing the edge
    /// renders seamlessly.
    pub buffer: u32,
}

impl Default for GeoJsonOptions {
    fn default() -> Self {
        GeoJsonOptions {
            extent: 4096,
            buffer: 64,
        }
    }
}

/// A feature's geometry grouped by the vector tile type it encodes as.
#[derive(Debug, Clone, PartialEq)]
enum Shape {
    Points(MultiPoint),
    Lines(MultiLineString),
    Polygons(MultiPolygon),
}

impl Shape {
    fn kind(&self) -> proto::GeomType {
        match self {
            Shape::Points(_) => proto::GeomType::Point,
            Shape::Lines(_) => proto::GeomType::Linestring,
            Shape::Polygons(_) => proto::GeomType::Polygon,
        }
    }

    fn bounding_rect(&self) -> Option<Rect> {
        match self {
            Shape::Points(points) => points.bounding_rect(),
            Shape::Lines(lines) => lines.bounding_rect(),
            Shape::Polygons(polygons) => polygons.bounding_rect(),
        }
    }

    fn map_coords(&self, f: impl Fn(Coord) -> Coord + Copy) -> Shape {
        match self {
            Shape::Points(points) => Shape::Points(points.map_coords(f)),
            Shape::Lines(lines) => Shape::Lines(lines.map_coords(f)),
            Shape::Polygons(polygons) => Shape::Polygons(polygons.map_coords(f)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ProjectedFeature {
    id: Option<u64>,
    properties: Vec<(String, proto::Value)>,
    /// World coordinates, `0..1` on both axes.
    shape: Shape,
    bbox: Rect,
}

#[derive(Debug, Clone, Default)]
pub struct GeoJsonIndex {
    options: GeoJsonOptions,
    features: Vec<ProjectedFeature>,
}

impl GeoJsonIndex {
    pub fn parse(json: &str, options: GeoJsonOptions) -> Result<Self> {
        let geojson: GeoJson = json.parse().map_err(|e: geojson::Error| Error::GeoJson(e.to_string()))?;
        Self::from_geojson(geojson, options)
    }

    /// Accepts a feature collection, a single feature or a bare geometry.
    pub fn from_geojson(geojson: GeoJson, options: GeoJsonOptions) -> Result<Self> {
        let mut features = Vec::new();

        match geojson {
            GeoJson::FeatureCollection(collection) => {
                for feature in collection.features {
                    add_feature(&mut features, feature)?;
                }
            }
            GeoJson::Feature(feature) => add_feature(&mut features, feature)?,
            GeoJson::Geometry(geometry) => add_geometry(&mut features, geometry, None, Vec::new())?,
        }

        log::debug!("indexed {} geojson features", features.len());
        Ok(GeoJsonIndex { options, features })
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// The encoded tile, `None` when no feature reaches it.
    pub fn tile(&self, tile: TileId) -> Option<Vec<u8>> {
        let z2 = (1u64 << tile.zoom) as f64;
        let extent = self.options.extent as f64;
        let buffer = self.options.buffer as f64;

        let world_buffer = buffer / extent;
        let bounds = Rect::new(
            Coord {
                x: (tile.column as f64 - world_buffer) / z2,
                y: (tile.row as f64 - world_buffer) / z2,
            },
            Coord {
                x: (tile.column as f64 + 1.0 + world_buffer) / z2,
                y: (tile.row as f64 + 1.0 + world_buffer) / z2,
            },
        );
        let clip = Rect::new(
            Coord {
                x: -buffer,
                y: -buffer,
            },
            Coord {
                x: extent + buffer,
                y: extent + buffer,
            },
        );
        let to_tile = |c: Coord| Coord {
            x: (c.x * z2 - tile.column as f64) * extent,
            y: (c.y * z2 - tile.row as f64) * extent,
        };

        let mut layer = LayerBuilder::new(GEOJSON_LAYER, self.options.extent);

        for feature in self.features.iter().filter(|f| f.bbox.intersects(&bounds)) {
            let mut encoder = GeometryEncoder::new();
            let encoded = match feature.shape.map_coords(to_tile) {
                Shape::Points(points) => encode_points(&mut encoder, &points, &clip),
                Shape::Lines(lines) => encode_lines(&mut encoder, &lines, &clip),
                Shape::Polygons(polygons) => encode_polygons(&mut encoder, &polygons, &clip),
            };
            if !encoded {
                continue;
            }

            layer.add_feature(
                feature.id,
                feature.shape.kind(),
                encoder.finish(),
                feature.properties.iter().map(|(k, v)| (k.as_str(), v.clone())),
            );
        }

        if layer.is_empty() {
            return None;
        }

        Some(
            proto::Tile {
                layers: vec![layer.finish()],
            }
            .encode_to_vec(),
        )
    }
}

fn add_feature(features: &mut Vec<ProjectedFeature>, feature: geojson::Feature) -> Result<()> {
    let Some(geometry) = feature.geometry else {
        return Ok(());
    };

    let id = match feature.id {
        Some(Id::Number(n)) => n.as_u64(),
        _ => None,
    };
    let properties = feature
        .properties
        .map(|props| {
            props
                .iter()
                .filter_map(|(k, v)| property_value(v).map(|v| (k.clone(), v)))
                .collect()
        })
        .unwrap_or_default();

    add_geometry(features, geometry, id, properties)
}

fn property_value(value: &Json) -> Option<proto::Value> {
    Some(match value {
        Json::Null => return None,
        Json::Bool(b) => proto::Value::bool(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => proto::Value::int(i),
            None => proto::Value::double(n.as_f64()?),
        },
        Json::String(s) => proto::Value::string(s),
        other => proto::Value::string(other.to_string()),
    })
}

fn add_geometry(
    features: &mut Vec<ProjectedFeature>,
    geometry: geojson::Geometry,
    id: Option<u64>,
    properties: Vec<(String, proto::Value)>,
) -> Result<()> {
    let geometry = Geometry::<f64>::try_from(geometry.value).map_err(|e| Error::GeoJson(e.to_string()))?;
    add_shapes(features, geometry.map_coords(project), id, &properties);
    Ok(())
}

/// Splits collections into one feature per member, all sharing `id` and
/// `properties`.
fn add_shapes(
    features: &mut Vec<ProjectedFeature>,
    geometry: Geometry,
    id: Option<u64>,
    properties: &[(String, proto::Value)],
) {
    let shape = match geometry {
        Geometry::Point(point) => Shape::Points(MultiPoint::new(vec![point])),
        Geometry::MultiPoint(points) => Shape::Points(points),
        Geometry::Line(line) => Shape::Lines(MultiLineString::new(vec![LineString::from(line)])),
        Geometry::LineString(line) => Shape::Lines(MultiLineString::new(vec![line])),
        Geometry::MultiLineString(lines) => Shape::Lines(lines),
        Geometry::Polygon(polygon) => Shape::Polygons(MultiPolygon::new(vec![polygon])),
        Geometry::MultiPolygon(polygons) => Shape::Polygons(polygons),
        Geometry::Rect(rect) => Shape::Polygons(MultiPolygon::new(vec![rect.to_polygon()])),
        Geometry::Triangle(triangle) => Shape::Polygons(MultiPolygon::new(vec![triangle.to_polygon()])),
        Geometry::GeometryCollection(collection) => {
            for member in collection {
                add_shapes(features, member, id, properties);
            }
            return;
        }
    };

    let Some(bbox) = shape.bounding_rect() else {
        return;
    };

    features.push(ProjectedFeature {
        id,
        properties: properties.to_vec(),
        shape,
        bbox,
    });
}

/// Web Mercator in `0..1`, clamped at the poles.
fn project(c: Coord) -> Coord {
    let sin = (c.y * PI / 180.0).sin();
    let y = 0.5 - 0.25 * ((1.0 + sin) / (1.0 - sin)).ln() / PI;
    Coord {
        x: c.x / 360.0 + 0.5,
        y: y.clamp(0.0, 1.0),
    }
}

fn round(c: &Coord) -> [i32; 2] {
    [c.x.round() as i32, c.y.round() as i32]
}

fn encode_points(encoder: &mut GeometryEncoder, points: &MultiPoint, clip: &Rect) -> bool {
    let points: Vec<[i32; 2]> = points
        .iter()
        .filter(|p| clip.intersects(&p.0))
        .map(|p| round(&p.0))
        .collect();
    encoder.points(&points);
    !points.is_empty()
}

fn encode_lines(encoder: &mut GeometryEncoder, lines: &MultiLineString, clip: &Rect) -> bool {
    let clipped = clip.to_polygon().clip(lines, false);

    let mut encoded = false;
    for line in clipped.iter() {
        let points: Vec<[i32; 2]> = line.coords().map(round).collect();
        if points.len() < 2 {
            continue;
        }
        encoder.line(&points);
        encoded = true;
    }
    encoded
}

/// Clips to `clip` and winds outer rings clockwise and holes
/// counter-clockwise in tile coordinates.
fn encode_polygons(encoder: &mut GeometryEncoder, polygons: &MultiPolygon, clip: &Rect) -> bool {
    let Some(bbox) = polygons.bounding_rect() else {
        return false;
    };
    let inside = bbox.min().x >= clip.min().x
        && bbox.min().y >= clip.min().y
        && bbox.max().x <= clip.max().x
        && bbox.max().y <= clip.max().y;

    let clipped = if inside {
        polygons.clone()
    } else {
        polygons.intersection(&clip.to_polygon())
    };

    let mut encoded = false;
    for polygon in clipped.orient(Direction::Default).iter() {
        if !encode_ring(encoder, polygon.exterior()) {
            continue;
        }
        encoded = true;
        for hole in polygon.interiors() {
            encode_ring(encoder, hole);
        }
    }
    encoded
}

fn encode_ring(encoder: &mut GeometryEncoder, ring: &LineString) -> bool {
    let mut points: Vec<[i32; 2]> = ring.coords().map(round).collect();
    points.dedup();
    // Closed rings repeat their first point
    if points.len() < 4 {
        return false;
    }
    encoder.ring(&points);
    true
}
