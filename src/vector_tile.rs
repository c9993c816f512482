use std::ops::Range;

use bstr::{BStr, ByteSlice};
use smallvec::SmallVec;

use crate::{
    Error, Result,
    geometry::TilePoint,
    pbf::{Pbf, WireType},
    warn_once,
};

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Value<'a> {
    String(&'a BStr),
    Number(f64),
    Bool(bool),
}

impl<'a> Value<'a> {
    pub fn as_str(&self) -> Option<&'a BStr> {
        match self {
            Value::String(s) => Some(s),
            Value::Number(_) => None,
            Value::Bool(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::String(s) => serde_json::Value::String(s.to_str_lossy().into_owned()),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => {
                serde_json::Value::from(*n as i64)
            }
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Bool(b) => serde_json::Value::Bool(*b),
        }
    }
}

impl std::fmt::Display for Value<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::String(s) => s.fmt(f),
            Value::Number(n) => n.fmt(f),
            Value::Bool(b) => b.fmt(f),
        }
    }
}

impl From<&'static str> for Value<'static> {
    fn from(value: &'static str) -> Self {
        Value::String(value.as_bytes().as_bstr())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum GeomType {
    Unknown,
    Point,
    LineString,
    Polygon,
}

impl GeomType {
    fn from_u32(n: u32) -> Self {
        match n {
            1 => GeomType::Point,
            2 => GeomType::LineString,
            3 => GeomType::Polygon,
            _ => GeomType::Unknown,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            GeomType::Unknown => "Unknown",
            GeomType::Point => "Point",
            GeomType::LineString => "LineString",
            GeomType::Polygon => "Polygon",
        }
    }
}

/// A parsed tile. Layers are indexed eagerly, features stay encoded until
/// requested.
pub struct VectorTile<'a> {
    pub layers: Vec<VectorTileLayer<'a>>,
}

impl<'a> VectorTile<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let mut layers = Vec::new();
        let mut pbf = Pbf::new(data);
        pbf.read_fields(data.len(), &mut layers, |field, layers, pbf| {
            if field == 3 {
                let bytes = pbf.read_bytes()?;
                let layer = VectorTileLayer::parse(bytes)?;
                if !layer.is_empty() {
                    layers.push(layer);
                }
            }
            Ok(())
        })?;

        Ok(VectorTile { layers })
    }

    pub fn layer(&self, name: &str) -> Option<&VectorTileLayer<'a>> {
        self.layers.iter().find(|l| l.name == name)
    }
}

pub struct VectorTileLayer<'a> {
    data: &'a [u8],
    pub version: u32,
    pub name: &'a str,
    pub extent: u32,
    keys: Vec<&'a BStr>,
    values: Vec<Option<Value<'a>>>,
    features: Vec<Range<usize>>,
}

impl<'a> VectorTileLayer<'a> {
    fn parse(data: &'a [u8]) -> Result<Self> {
        let mut layer = VectorTileLayer {
            data,
            version: 1,
            name: "",
            extent: 4096,
            keys: Vec::new(),
            values: Vec::new(),
            features: Vec::new(),
        };

        let mut pbf = Pbf::new(data);
        pbf.read_fields(data.len(), &mut layer, |field, layer, pbf| {
            match field {
                15 => layer.version = pbf.read_varint32()?,
                1 => layer.name = pbf.read_string()?,
                5 => layer.extent = pbf.read_varint32()?,
                2 => {
                    let bytes = pbf.read_bytes()?;
                    let end = pbf.pos();
                    layer.features.push(end - bytes.len()..end);
                }
                3 => layer.keys.push(pbf.read_bytes()?.as_bstr()),
                4 => {
                    let mut value = None;
                    pbf.read_message(&mut value, read_value)?;
                    layer.values.push(value);
                }
                _ => (),
            }
            Ok(())
        })?;

        if layer.version == 1 {
            warn_once(format!(
                "vector tile layer '{}' uses legacy version 1 encoding",
                layer.name
            ));
        }

        Ok(layer)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn feature(&self, index: usize) -> Result<VectorTileFeature<'_>> {
        let range = self.features.get(index).cloned().ok_or(Error::UnexpectedEof)?;
        let bytes = &self.data[range];

        let mut feature = VectorTileFeature {
            layer: self,
            id: None,
            kind: GeomType::Unknown,
            tags: SmallVec::new(),
            geometry: &[],
        };

        let mut pbf = Pbf::new(bytes);
        pbf.read_fields(bytes.len(), &mut feature, |field, feature, pbf| {
            match field {
                1 => feature.id = Some(pbf.read_varint()?),
                2 => {
                    let mut tags = Vec::new();
                    pbf.read_packed_varint32(&mut tags)?;
                    feature.tags.extend(tags);
                }
                3 => feature.kind = GeomType::from_u32(pbf.read_varint32()?),
                4 if pbf.wire_type() == WireType::Bytes => feature.geometry = pbf.read_bytes()?,
                4 => {
                    warn_once("ignoring unpacked feature geometry");
                }
                _ => (),
            }
            Ok(())
        })?;

        Ok(feature)
    }

    pub fn features(&self) -> impl Iterator<Item = Result<VectorTileFeature<'_>>> {
        (0..self.len()).map(|i| self.feature(i))
    }
}

fn read_value<'a>(field: u32, value: &mut Option<Value<'a>>, pbf: &mut Pbf<'a>) -> Result<()> {
    let v = match field {
        1 => Value::String(pbf.read_bytes()?.as_bstr()),
        2 => Value::Number(pbf.read_float()? as f64),
        3 => Value::Number(pbf.read_double()?),
        4 => Value::Number(pbf.read_int64()? as f64),
        5 => Value::Number(pbf.read_varint()? as f64),
        6 => Value::Number(pbf.read_svarint()? as f64),
        7 => Value::Bool(pbf.read_bool()?),
        _ => return Ok(()),
    };
    *value = Some(v);
    Ok(())
}

pub struct VectorTileFeature<'a> {
    layer: &'a VectorTileLayer<'a>,
    id: Option<u64>,
    kind: GeomType,
    tags: SmallVec<[u32; 16]>,
    geometry: &'a [u8],
}

impl std::fmt::Debug for VectorTileFeature<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorTileFeature")
            .field("layer", &self.layer.name)
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("tags", &self.tags.len())
            .finish()
    }
}

impl<'a> VectorTileFeature<'a> {
    pub fn id(&self) -> Option<u64> {
        self.id
    }

    pub fn kind(&self) -> GeomType {
        self.kind
    }

    pub fn extent(&self) -> u32 {
        self.layer.extent
    }

    pub fn layer_name(&self) -> &'a str {
        self.layer.name
    }

    pub fn properties(&self) -> impl Iterator<Item = (&'a BStr, Value<'a>)> {
        let layer = self.layer;
        self.tags.chunks(2).filter_map(move |tag| {
            let [k, v] = tag else {
                return None;
            };
            let key = *layer.keys.get(*k as usize)?;
            let value = (*layer.values.get(*v as usize)?)?;
            Some((key, value))
        })
    }

    pub fn property<B: AsRef<[u8]>>(&self, key: B) -> Option<Value<'a>> {
        let key = key.as_ref();
        if key == b"$type" {
            return Some(match self.kind {
                GeomType::Polygon => "Polygon".into(),
                GeomType::LineString => "LineString".into(),
                GeomType::Point => "Point".into(),
                GeomType::Unknown => "Unknown".into(),
            });
        }

        self.properties()
            .find(|(k, _)| k.as_bytes() == key)
            .map(|(_, v)| v)
    }

    pub fn properties_json(&self) -> serde_json::Map<String, serde_json::Value> {
        self.properties()
            .map(|(k, v)| (k.to_str_lossy().into_owned(), v.to_json()))
            .collect()
    }

    /// The raw command stream in tile extent coordinates.
    pub fn commands(&self) -> GeometryCursor<'a> {
        GeometryCursor::new(self.geometry)
    }

    /// Rings (or lines, or single points) in the feature's own extent.
    /// `ClosePath` repeats the ring's first point.
    pub fn load_geometry(&self) -> Result<Vec<Vec<TilePoint>>> {
        let mut lines = Vec::new();
        let mut line: Vec<TilePoint> = Vec::new();

        for command in self.commands() {
            match command? {
                GeometryCommand::MoveTo(p) => {
                    if !line.is_empty() {
                        lines.push(std::mem::take(&mut line));
                    }
                    line.push(p);
                }
                GeometryCommand::LineTo(p) => line.push(p),
                GeometryCommand::ClosePath => {
                    if let Some(&first) = line.first() {
                        line.push(first);
                    }
                }
            }
        }

        if !line.is_empty() {
            lines.push(line);
        }

        Ok(lines)
    }

    /// `[min_x, min_y, max_x, max_y]` over every coordinate in the stream.
    pub fn bbox(&self) -> Result<[i32; 4]> {
        let mut bbox = [i32::MAX, i32::MAX, i32::MIN, i32::MIN];

        for command in self.commands() {
            match command? {
                GeometryCommand::MoveTo(p) | GeometryCommand::LineTo(p) => {
                    bbox[0] = bbox[0].min(p.x);
                    bbox[1] = bbox[1].min(p.y);
                    bbox[2] = bbox[2].max(p.x);
                    bbox[3] = bbox[3].max(p.y);
                }
                GeometryCommand::ClosePath => (),
            }
        }

        Ok(bbox)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GeometryCommand {
    MoveTo(TilePoint),
    LineTo(TilePoint),
    ClosePath,
}

pub struct GeometryCursor<'a> {
    pbf: Pbf<'a>,
    command: u32,
    count: u32,
    x: i32,
    y: i32,
}

impl<'a> GeometryCursor<'a> {
    pub fn new(geometry: &'a [u8]) -> Self {
        GeometryCursor {
            pbf: Pbf::new(geometry),
            command: 0,
            count: 0,
            x: 0,
            y: 0,
        }
    }

    fn fail(&mut self, err: Error) -> Option<Result<GeometryCommand>> {
        self.count = 0;
        self.pbf.set_pos(self.pbf.len());
        Some(Err(err))
    }
}

impl Iterator for GeometryCursor<'_> {
    type Item = Result<GeometryCommand>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.count == 0 {
            if self.pbf.pos() >= self.pbf.len() {
                return None;
            }

            let cmd = match self.pbf.read_varint32() {
                Ok(cmd) => cmd,
                Err(e) => return self.fail(e),
            };

            self.command = cmd & 0x7;
            self.count = cmd >> 3;

            if !matches!(self.command, 1 | 2 | 7) {
                return self.fail(Error::UnknownCommand(self.command));
            }
        }

        self.count -= 1;

        if self.command == 7 {
            return Some(Ok(GeometryCommand::ClosePath));
        }

        let delta = self
            .pbf
            .read_sint32()
            .and_then(|dx| Ok((dx, self.pbf.read_sint32()?)));
        let (dx, dy) = match delta {
            Ok(d) => d,
            Err(e) => return self.fail(e),
        };

        self.x = self.x.wrapping_add(dx);
        self.y = self.y.wrapping_add(dy);
        let p = TilePoint::new(self.x, self.y);

        if self.command == 1 {
            Some(Ok(GeometryCommand::MoveTo(p)))
        } else {
            Some(Ok(GeometryCommand::LineTo(p)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{self, GeometryEncoder, LayerBuilder};
    use pretty_assertions::assert_eq;
    use prost::Message;

    fn fixture() -> Vec<u8> {
        let mut roads = LayerBuilder::new("roads", 4096);
        roads.add_feature(
            Some(7),
            proto::GeomType::Linestring,
            GeometryEncoder::new().line(&[[0, 0], [10, 0], [10, 10]]).finish(),
            [
                ("name", proto::Value::string("Main St")),
                ("lanes", proto::Value::int(2)),
            ],
        );
        let mut water = LayerBuilder::new("water", 2048);
        water.add_feature(
            None,
            proto::GeomType::Polygon,
            GeometryEncoder::new()
                .ring(&[[1, 1], [5, 1], [5, 5]])
                .ring(&[[2, 2], [3, 3], [3, 2]])
                .finish(),
            [("natural", proto::Value::bool(true))],
        );

        proto::Tile {
            layers: vec![roads.finish(), water.finish()],
        }
        .encode_to_vec()
    }

    fn p(x: i32, y: i32) -> TilePoint {
        TilePoint::new(x, y)
    }

    #[test]
    fn decodes_layers_and_properties() {
        let data = fixture();
        let tile = VectorTile::parse(&data).unwrap();
        assert_eq!(tile.layers.len(), 2);

        let roads = tile.layer("roads").unwrap();
        assert_eq!(roads.extent, 4096);
        assert_eq!(roads.version, 2);
        let feature = roads.feature(0).unwrap();
        assert_eq!(feature.id(), Some(7));
        assert_eq!(feature.kind(), GeomType::LineString);
        assert_eq!(
            feature.property("name").and_then(|v| v.as_str()),
            Some("Main St".as_bytes().as_bstr())
        );
        assert_eq!(feature.property("lanes"), Some(Value::Number(2.0)));
        assert_eq!(feature.property("$type"), Some(Value::from("LineString")));
        assert_eq!(feature.property("missing"), None);
        assert_eq!(
            feature.properties_json().get("lanes"),
            Some(&serde_json::json!(2))
        );
    }

    #[test]
    fn loads_geometry_and_bbox() {
        let data = fixture();
        let tile = VectorTile::parse(&data).unwrap();
        let water = tile.layer("water").unwrap();
        assert_eq!(water.extent, 2048);

        let feature = water.feature(0).unwrap();
        let rings = feature.load_geometry().unwrap();
        assert_eq!(
            rings,
            vec![
                vec![p(1, 1), p(5, 1), p(5, 5), p(1, 1)],
                vec![p(2, 2), p(3, 3), p(3, 2), p(2, 2)],
            ]
        );
        assert_eq!(feature.bbox().unwrap(), [1, 1, 5, 5]);
    }

    #[test]
    fn multipoint_yields_one_line_per_point() {
        let mut layer = LayerBuilder::new("poi", 4096);
        layer.add_feature(
            None,
            proto::GeomType::Point,
            GeometryEncoder::new().points(&[[1, 2], [3, 4]]).finish(),
            Vec::<(&str, proto::Value)>::new(),
        );
        let data = proto::Tile {
            layers: vec![layer.finish()],
        }
        .encode_to_vec();

        let tile = VectorTile::parse(&data).unwrap();
        let feature = tile.layers[0].feature(0).unwrap();
        assert_eq!(
            feature.load_geometry().unwrap(),
            vec![vec![p(1, 2)], vec![p(3, 4)]]
        );
    }

    #[test]
    fn unknown_command_is_fatal() {
        let mut layer = LayerBuilder::new("bad", 4096);
        layer.add_feature(
            None,
            proto::GeomType::Point,
            vec![proto::command(3, 1), 0, 0],
            Vec::<(&str, proto::Value)>::new(),
        );
        let data = proto::Tile {
            layers: vec![layer.finish()],
        }
        .encode_to_vec();

        let tile = VectorTile::parse(&data).unwrap();
        let feature = tile.layers[0].feature(0).unwrap();
        assert!(matches!(
            feature.load_geometry(),
            Err(Error::UnknownCommand(3))
        ));
        assert!(matches!(feature.bbox(), Err(Error::UnknownCommand(3))));
    }
}
