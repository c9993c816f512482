//! Answers "which rendered features are under this geometry" for a loaded
//! tile. Every feature that went into a bucket is indexed by the bounding
//! boxes of its rings; candidates from the grid are then tested exactly
//! against their geometry as the style renders it. Labels are found through
//! the tile's collision boxes instead.

use std::{collections::BTreeMap, mem::offset_of};

use lyon::math::{Point, Vector, point, vector};

use crate::{
    EXTENT, Result, TileId,
    collision_tile::CollisionTile,
    geometry::{self, Ring, TilePoint, classify_rings},
    grid_index::GridIndex,
    intersection::{
        multi_polygon_intersects_buffered_multi_line, multi_polygon_intersects_buffered_multi_point,
        multi_polygon_intersects_multi_polygon,
    },
    struct_array::{Member, MemberType, Record, SerializedStructArray, StructArray},
    style::{FilterExpression, LayerKind, StyleLayer, TranslateAnchor},
    symbol::collision_box::FeatureRef,
    vector_tile::{GeomType, VectorTile, VectorTileFeature},
};

const GRID_CELLS: i32 = 16;

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FeatureRecord {
    pub feature_index: u32,
    pub source_layer_index: u16,
    pub bucket_index: u16,
}

impl Record for FeatureRecord {
    const MEMBERS: &'static [Member] = &[
        Member::new("featureIndex", MemberType::Uint32, 1, offset_of!(FeatureRecord, feature_index)),
        Member::new(
            "sourceLayerIndex",
            MemberType::Uint16,
            1,
            offset_of!(FeatureRecord, source_layer_index),
        ),
        Member::new("bucketIndex", MemberType::Uint16, 1, offset_of!(FeatureRecord, bucket_index)),
    ];
}

impl From<FeatureRecord> for FeatureRef {
    fn from(r: FeatureRecord) -> Self {
        FeatureRef {
            feature_index: r.feature_index,
            source_layer_index: r.source_layer_index,
            bucket_index: r.bucket_index,
        }
    }
}

#[derive(Debug)]
pub struct FeatureIndex {
    pub tile: TileId,
    pub overscaling: f32,
    grid: GridIndex,
    records: StructArray<FeatureRecord>,
    bucket_layer_ids: Vec<Vec<String>>,
    raw_tile_data: Vec<u8>,
    collision_tile: Option<CollisionTile>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SerializedFeatureIndex {
    pub tile: TileId,
    pub overscaling: f32,
    pub grid: Vec<i32>,
    pub feature_index_array: SerializedStructArray,
    pub bucket_layer_ids: Vec<Vec<String>>,
}

impl SerializedFeatureIndex {
    pub fn transferables(&self) -> Vec<&[u8]> {
        vec![self.feature_index_array.bytes()]
    }
}

/// A rendered-feature query in tile units.
#[derive(Debug, Clone)]
pub struct QueryParameters {
    /// Rings of the query shape; a single point is a one point ring.
    pub geometry: Vec<Vec<Point>>,
    /// Zoom paint properties are evaluated at.
    pub zoom: f32,
    /// Tile scale relative to the tile's zoom.
    pub scale: f32,
    pub tile_size: f32,
    /// Map rotation in radians.
    pub bearing: f32,
    /// Only these layers are queried when set.
    pub layers: Option<Vec<String>>,
    pub filter: FilterExpression,
}

impl Default for QueryParameters {
    fn default() -> Self {
        QueryParameters {
            geometry: Vec::new(),
            zoom: 0.0,
            scale: 1.0,
            tile_size: 512.0,
            bearing: 0.0,
            layers: None,
            filter: FilterExpression::True,
        }
    }
}

/// One hit, as a GeoJSON feature of the style layer it was rendered by.
#[derive(Debug, Clone, PartialEq)]
pub struct QueriedFeature {
    pub layer: String,
    pub id: Option<u64>,
    pub kind: GeomType,
    pub properties: serde_json::Map<String, serde_json::Value>,
    /// GeoJSON geometry in longitude and latitude.
    pub geometry: serde_json::Value,
}

impl QueriedFeature {
    pub fn to_geojson(&self) -> serde_json::Value {
        let mut feature = serde_json::json!({
            "type": "Feature",
            "properties": self.properties,
            "geometry": self.geometry,
            "layer": { "id": self.layer },
        });
        if let Some(id) = self.id {
            feature["id"] = id.into();
        }
        feature
    }
}

pub type QueryResult = BTreeMap<String, Vec<QueriedFeature>>;

impl FeatureIndex {
    pub fn new(tile: TileId, overscaling: f32) -> Self {
        FeatureIndex {
            tile,
            overscaling,
            grid: GridIndex::new(EXTENT, GRID_CELLS, 0),
            records: StructArray::new(),
            bucket_layer_ids: Vec::new(),
            raw_tile_data: Vec::new(),
            collision_tile: None,
        }
    }

    pub fn from_serialized(serialized: SerializedFeatureIndex, raw_tile_data: Vec<u8>) -> Option<Self> {
        Some(FeatureIndex {
            tile: serialized.tile,
            overscaling: serialized.overscaling,
            grid: GridIndex::from_serialized(&serialized.grid)?,
            records: StructArray::from_serialized(serialized.feature_index_array),
            bucket_layer_ids: serialized.bucket_layer_ids,
            raw_tile_data,
            collision_tile: None,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Indexes every ring of a feature under one record.
    pub fn insert(&mut self, geometry: &[Ring], feature: FeatureRef) {
        let key = self.records.emplace_back(FeatureRecord {
            feature_index: feature.feature_index,
            source_layer_index: feature.source_layer_index,
            bucket_index: feature.bucket_index,
        }) as u32;

        for ring in geometry {
            let Some(bbox) = ring_bbox(ring) else {
                continue;
            };
            self.grid.insert(key, bbox);
        }
    }

    pub fn set_bucket_layer_ids(&mut self, ids: Vec<Vec<String>>) {
        self.bucket_layer_ids = ids;
    }

    pub fn set_raw_tile_data(&mut self, data: Vec<u8>) {
        self.raw_tile_data = data;
    }

    pub fn raw_tile_data(&self) -> &[u8] {
        &self.raw_tile_data
    }

    pub fn set_collision_tile(&mut self, tile: CollisionTile) {
        self.collision_tile = Some(tile);
    }

    pub fn serialize(&mut self) -> SerializedFeatureIndex {
        SerializedFeatureIndex {
            tile: self.tile,
            overscaling: self.overscaling,
            grid: self.grid.serialize(),
            feature_index_array: std::mem::take(&mut self.records).serialize(),
            bucket_layer_ids: self.bucket_layer_ids.clone(),
        }
    }

    /// Features rendered by `style_layers` under the query geometry, grouped
    /// by layer id. Within a layer, features indexed later come first and
    /// labels follow the other geometry.
    pub fn query(&self, params: &QueryParameters, style_layers: &[StyleLayer]) -> Result<QueryResult> {
        let mut result = QueryResult::new();
        let Some(bounds) = geometry_bounds(&params.geometry) else {
            return Ok(result);
        };

        let tile = VectorTile::parse(&self.raw_tile_data)?;
        let pixels_to_tile_units = EXTENT as f32 / params.tile_size / params.scale;

        // Rendered geometry may be buffered, offset or translated away from
        // the indexed geometry
        let additional_radius = style_layers
            .iter()
            .filter(|l| is_requested(params, &l.id))
            .map(|l| l.query_radius(params.zoom) * pixels_to_tile_units)
            .fold(0.0, f32::max);

        let search = [
            (bounds[0] - additional_radius).floor() as i32,
            (bounds[1] - additional_radius).floor() as i32,
            (bounds[2] + additional_radius).ceil() as i32,
            (bounds[3] + additional_radius).ceil() as i32,
        ];

        let mut matching = self.grid.query(search);
        matching.sort_unstable_by(|a, b| b.cmp(a));
        matching.dedup();
        let features = matching
            .into_iter()
            .filter_map(|key| self.records.get(key as usize))
            .map(FeatureRef::from);
        let query = Query {
            index: self,
            tile: &tile,
            params,
            style_layers,
            pixels_to_tile_units,
        };
        query.filter_matching(&mut result, features, false)?;

        if let Some(collision_tile) = &self.collision_tile {
            let mut symbols = collision_tile.query_rendered_symbols(bounds, params.scale);
            symbols.sort_unstable();
            let features = symbols
                .into_iter()
                .filter_map(|index| collision_tile.boxes().get(index))
                .map(|b| b.feature());
            query.filter_matching(&mut result, features, true)?;
        }

        Ok(result)
    }
}

struct Query<'a, 't> {
    index: &'a FeatureIndex,
    tile: &'a VectorTile<'t>,
    params: &'a QueryParameters,
    style_layers: &'a [StyleLayer],
    pixels_to_tile_units: f32,
}

impl Query<'_, '_> {
    fn filter_matching<I>(&self, result: &mut QueryResult, matching: I, symbols: bool) -> Result<()>
    where
        I: Iterator<Item = FeatureRef>,
    {
        let zoom = self.params.zoom;
        let mut previous = None;

        for feature_ref in matching {
            if previous == Some(feature_ref) {
                continue;
            }
            previous = Some(feature_ref);

            let Some(layer_ids) = self.index.bucket_layer_ids.get(feature_ref.bucket_index as usize) else {
                continue;
            };
            if !layer_ids.iter().any(|id| is_requested(self.params, id)) {
                continue;
            }

            let Some(source_layer) = self.tile.layers.get(feature_ref.source_layer_index as usize) else {
                continue;
            };
            let feature = source_layer.feature(feature_ref.feature_index as usize)?;
            if !self.params.filter.eval(&feature) {
                continue;
            }

            let mut rings: Option<Vec<Vec<Point>>> = None;

            for layer_id in layer_ids {
                if !is_requested(self.params, layer_id) {
                    continue;
                }
                let Some(style_layer) = self.style_layers.iter().find(|l| &l.id == layer_id) else {
                    continue;
                };

                // Labels already passed their collision boxes
                if !symbols {
                    if rings.is_none() {
                        rings = Some(to_float_rings(&geometry::load_geometry(&feature)?));
                    }
                    let Some(rings) = &rings else {
                        continue;
                    };
                    if !self.intersects(style_layer, rings, zoom) {
                        continue;
                    }
                }

                result
                    .entry(layer_id.clone())
                    .or_default()
                    .push(queried_feature(&feature, layer_id, self.index.tile)?);
            }
        }

        Ok(())
    }

    fn intersects(&self, layer: &StyleLayer, geometry: &[Vec<Point>], zoom: f32) -> bool {
        let units = self.pixels_to_tile_units;
        let query = &self.params.geometry;

        match &layer.kind {
            LayerKind::Line { paint, .. } => {
                let translated = self.translate(query, paint.line_translate(zoom), paint.line_translate_anchor);
                let half_width = paint.line_width_total(zoom) / 2.0 * units;
                let offset = paint.line_offset(zoom);
                if offset != 0.0 {
                    let offset = offset_line(geometry, offset * units);
                    multi_polygon_intersects_buffered_multi_line(&translated, &offset, half_width)
                } else {
                    multi_polygon_intersects_buffered_multi_line(&translated, geometry, half_width)
                }
            }
            LayerKind::Fill { paint, .. } => {
                let translated = self.translate(query, paint.fill_translate(zoom), paint.fill_translate_anchor);
                multi_polygon_intersects_multi_polygon(&translated, geometry)
            }
            LayerKind::Circle { paint, .. } => {
                let translated =
                    self.translate(query, paint.circle_translate(zoom), paint.circle_translate_anchor);
                let radius = paint.circle_radius(zoom) * units;
                multi_polygon_intersects_buffered_multi_point(&translated, geometry, radius)
            }
            _ => false,
        }
    }

    /// Moves the query instead of the rendered geometry.
    fn translate(&self, query: &[Vec<Point>], translate: (f32, f32), anchor: TranslateAnchor) -> Vec<Vec<Point>> {
        if translate == (0.0, 0.0) {
            return query.to_vec();
        }

        let mut translate = vector(translate.0, translate.1);
        if anchor == TranslateAnchor::Viewport {
            let (sin, cos) = (-self.params.bearing).sin_cos();
            translate = vector(cos * translate.x - sin * translate.y, sin * translate.x + cos * translate.y);
        }
        let translate = translate * self.pixels_to_tile_units;

        query
            .iter()
            .map(|ring| ring.iter().map(|&p| p - translate).collect())
            .collect()
    }
}

fn is_requested(params: &QueryParameters, id: &str) -> bool {
    params
        .layers
        .as_ref()
        .is_none_or(|layers| layers.iter().any(|l| l == id))
}

fn ring_bbox(ring: &[TilePoint]) -> Option<[i32; 4]> {
    let first = ring.first()?;
    Some(ring.iter().fold([first.x, first.y, first.x, first.y], |b, p| {
        [b[0].min(p.x), b[1].min(p.y), b[2].max(p.x), b[3].max(p.y)]
    }))
}

fn geometry_bounds(geometry: &[Vec<Point>]) -> Option<[f32; 4]> {
    let mut points = geometry.iter().flatten();
    let first = points.next()?;
    Some(points.fold([first.x, first.y, first.x, first.y], |b, p| {
        [b[0].min(p.x), b[1].min(p.y), b[2].max(p.x), b[3].max(p.y)]
    }))
}

fn to_float_rings(rings: &[Ring]) -> Vec<Vec<Point>> {
    rings
        .iter()
        .map(|ring| ring.iter().map(|p| point(p.x as f32, p.y as f32)).collect())
        .collect()
}

/// Shifts each line sideways by `offset`, mitering the vertices.
fn offset_line(rings: &[Vec<Point>], offset: f32) -> Vec<Vec<Point>> {
    rings
        .iter()
        .map(|ring| {
            (0..ring.len())
                .map(|i| {
                    let b = ring[i];
                    let a_to_b = match i.checked_sub(1).map(|j| ring[j]) {
                        Some(a) => perp((b - a).normalize()),
                        None => Vector::zero(),
                    };
                    let b_to_c = match ring.get(i + 1) {
                        Some(&c) => perp((c - b).normalize()),
                        None => Vector::zero(),
                    };

                    let extrude = a_to_b + b_to_c;
                    if extrude.square_length() == 0.0 {
                        return b;
                    }
                    let extrude = extrude.normalize();
                    let normal = if b_to_c.square_length() > 0.0 { b_to_c } else { a_to_b };
                    let cos_half_angle = extrude.dot(normal);
                    b + extrude / cos_half_angle * offset
                })
                .collect()
        })
        .collect()
}

fn perp(v: Vector) -> Vector {
    vector(-v.y, v.x)
}

fn queried_feature(feature: &VectorTileFeature<'_>, layer: &str, tile: TileId) -> Result<QueriedFeature> {
    Ok(QueriedFeature {
        layer: layer.to_string(),
        id: feature.id(),
        kind: feature.kind(),
        properties: feature.properties_json(),
        geometry: geojson_geometry(feature, tile)?,
    })
}

/// The feature's geometry projected from tile coordinates to longitude and
/// latitude.
fn geojson_geometry(feature: &VectorTileFeature<'_>, tile: TileId) -> Result<serde_json::Value> {
    let extent = feature.extent().max(1) as f64;
    let size = extent * (1u64 << tile.zoom) as f64;
    let x0 = extent * tile.column as f64;
    let y0 = extent * tile.row as f64;

    let project = |p: &TilePoint| -> [f64; 2] {
        let y2 = 180.0 - (p.y as f64 + y0) * 360.0 / size;
        [
            (p.x as f64 + x0) * 360.0 / size - 180.0,
            360.0 / std::f64::consts::PI * (y2 * std::f64::consts::PI / 180.0).exp().atan() - 90.0,
        ]
    };
    let line = |ring: &Ring| -> Vec<[f64; 2]> { ring.iter().map(project).collect() };

    let rings = feature.load_geometry()?;
    let (kind, coordinates) = match feature.kind() {
        GeomType::Point => {
            let points: Vec<[f64; 2]> = rings.iter().flatten().map(project).collect();
            match points.as_slice() {
                [single] => ("Point", serde_json::json!(single)),
                _ => ("MultiPoint", serde_json::json!(points)),
            }
        }
        GeomType::LineString => {
            let lines: Vec<_> = rings.iter().map(line).collect();
            match lines.as_slice() {
                [single] => ("LineString", serde_json::json!(single)),
                _ => ("MultiLineString", serde_json::json!(lines)),
            }
        }
        GeomType::Polygon => {
            let polygons: Vec<Vec<_>> = classify_rings(rings, 0)
                .iter()
                .map(|polygon| polygon.iter().map(line).collect())
                .collect();
            match polygons.as_slice() {
                [single] => ("Polygon", serde_json::json!(single)),
                _ => ("MultiPolygon", serde_json::json!(polygons)),
            }
        }
        GeomType::Unknown => return Ok(serde_json::Value::Null),
    };

    Ok(serde_json::json!({ "type": kind, "coordinates": coordinates }))
}
