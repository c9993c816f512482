//! Vector tile schema as prost messages, used to encode tiles produced from
//! GeoJSON and to build fixtures. Decoding on the hot path goes through
//! [`crate::vector_tile`] instead.

use ahash::AHashMap;
use prost::{Enumeration, Message};

#[derive(Clone, PartialEq, Message)]
pub struct Tile {
    #[prost(message, repeated, tag = "3")]
    pub layers: Vec<Layer>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Layer {
    #[prost(uint32, required, tag = "15", default = "1")]
    pub version: u32,
    #[prost(string, required, tag = "1")]
    pub name: String,
    #[prost(message, repeated, tag = "2")]
    pub features: Vec<Feature>,
    // Keys and string values are bytes, some tilesets carry labels that are not valid utf-8
    #[prost(bytes = "vec", repeated, tag = "3")]
    pub keys: Vec<Vec<u8>>,
    #[prost(message, repeated, tag = "4")]
    pub values: Vec<Value>,
    #[prost(uint32, optional, tag = "5", default = "4096")]
    pub extent: Option<u32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Feature {
    #[prost(uint64, optional, tag = "1", default = "0")]
    pub id: Option<u64>,
    #[prost(uint32, repeated, tag = "2")]
    pub tags: Vec<u32>,
    #[prost(enumeration = "GeomType", optional, tag = "3", default = "Unknown")]
    pub r#type: Option<i32>,
    #[prost(uint32, repeated, tag = "4")]
    pub geometry: Vec<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum GeomType {
    Unknown = 0,
    Point = 1,
    Linestring = 2,
    Polygon = 3,
}

#[derive(Clone, PartialEq, Message)]
pub struct Value {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub string_value: Option<Vec<u8>>,
    #[prost(float, optional, tag = "2")]
    pub float_value: Option<f32>,
    #[prost(double, optional, tag = "3")]
    pub double_value: Option<f64>,
    #[prost(int64, optional, tag = "4")]
    pub int_value: Option<i64>,
    #[prost(uint64, optional, tag = "5")]
    pub uint_value: Option<u64>,
    #[prost(sint64, optional, tag = "6")]
    pub sint_value: Option<i64>,
    #[prost(bool, optional, tag = "7")]
    pub bool_value: Option<bool>,
}

impl Value {
    pub fn string<S: AsRef<[u8]>>(s: S) -> Self {
        Value {
            string_value: Some(s.as_ref().to_vec()),
            ..Default::default()
        }
    }

    pub fn double(n: f64) -> Self {
        Value {
            double_value: Some(n),
            ..Default::default()
        }
    }

    pub fn int(n: i64) -> Self {
        if n < 0 {
            Value {
                sint_value: Some(n),
                ..Default::default()
            }
        } else {
            Value {
                uint_value: Some(n as u64),
                ..Default::default()
            }
        }
    }

    pub fn bool(b: bool) -> Self {
        Value {
            bool_value: Some(b),
            ..Default::default()
        }
    }
}

const MOVE_TO: u32 = 1;
const LINE_TO: u32 = 2;
const CLOSE_PATH: u32 = 7;

pub fn command(id: u32, count: u32) -> u32 {
    (id & 0x7) | (count << 3)
}

pub fn zigzag(n: i32) -> u32 {
    ((n << 1) ^ (n >> 31)) as u32
}

/// Builds a feature geometry command stream from absolute tile coordinates.
#[derive(Debug, Default, Clone)]
pub struct GeometryEncoder {
    x: i32,
    y: i32,
    data: Vec<u32>,
}

impl GeometryEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn delta(&mut self, [x, y]: [i32; 2]) {
        self.data.push(zigzag(x - self.x));
        self.data.push(zigzag(y - self.y));
        self.x = x;
        self.y = y;
    }

    /// One `MoveTo` carrying every point.
    pub fn points(&mut self, points: &[[i32; 2]]) -> &mut Self {
        if points.is_empty() {
            return self;
        }

        self.data.push(command(MOVE_TO, points.len() as u32));
        for &p in points {
            self.delta(p);
        }
        self
    }

    pub fn line(&mut self, points: &[[i32; 2]]) -> &mut Self {
        let Some((&first, rest)) = points.split_first() else {
            return self;
        };

        self.data.push(command(MOVE_TO, 1));
        self.delta(first);
        if !rest.is_empty() {
            self.data.push(command(LINE_TO, rest.len() as u32));
            for &p in rest {
                self.delta(p);
            }
        }
        self
    }

    /// A closed ring. A trailing point equal to the first is dropped, the
    /// `ClosePath` command restores it.
    pub fn ring(&mut self, points: &[[i32; 2]]) -> &mut Self {
        let points = match points {
            [first, .., last] if first == last => &points[..points.len() - 1],
            _ => points,
        };

        self.line(points);
        if !points.is_empty() {
            self.data.push(command(CLOSE_PATH, 1));
        }
        self
    }

    pub fn finish(&mut self) -> Vec<u32> {
        self.x = 0;
        self.y = 0;
        std::mem::take(&mut self.data)
    }
}

/// Accumulates features into a layer, interning property keys and values.
pub struct LayerBuilder {
    layer: Layer,
    keys: AHashMap<Vec<u8>, u32>,
    values: AHashMap<Vec<u8>, u32>,
}

impl LayerBuilder {
    pub fn new<S: Into<String>>(name: S, extent: u32) -> Self {
        LayerBuilder {
            layer: Layer {
                version: 2,
                name: name.into(),
                extent: Some(extent),
                ..Default::default()
            },
            keys: AHashMap::new(),
            values: AHashMap::new(),
        }
    }

    fn key(&mut self, key: &[u8]) -> u32 {
        if let Some(&idx) = self.keys.get(key) {
            return idx;
        }

        let idx = self.layer.keys.len() as u32;
        self.layer.keys.push(key.to_vec());
        self.keys.insert(key.to_vec(), idx);
        idx
    }

    fn value(&mut self, value: Value) -> u32 {
        let encoded = value.encode_to_vec();
        if let Some(&idx) = self.values.get(&encoded) {
            return idx;
        }

        let idx = self.layer.values.len() as u32;
        self.layer.values.push(value);
        self.values.insert(encoded, idx);
        idx
    }

    pub fn add_feature<K, I>(
        &mut self,
        id: Option<u64>,
        kind: GeomType,
        geometry: Vec<u32>,
        properties: I,
    ) -> &mut Self
    where
        K: AsRef<[u8]>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let mut tags = Vec::new();
        for (key, value) in properties {
            tags.push(self.key(key.as_ref()));
            tags.push(self.value(value));
        }

        self.layer.features.push(Feature {
            id,
            tags,
            r#type: Some(kind as i32),
            geometry,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.layer.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layer.features.is_empty()
    }

    pub fn finish(self) -> Layer {
        self.layer
    }
}
