//! Per-layer geometry tessellation.
//!
//! A bucket is built for one style layer family at one zoom. It receives the
//! features that passed the family's filter and writes them into program
//! groups of binary vertex and element arrays. Symbol buckets are the
//! exception in that their final contents depend on collision placement and
//! can be regenerated without reloading the tile.

use std::sync::Arc;

use crate::{
    buffers::SerializedArrayGroup,
    geometry::Ring,
    style::{LayerFamily, LayerType},
    vector_tile::VectorTileFeature,
};

pub mod circle;
pub mod fill;
pub mod line;
pub mod symbol;

pub use circle::CircleBucket;
pub use fill::FillBucket;
pub use line::LineBucket;
pub use symbol::SymbolBucket;

#[derive(Debug, Copy, Clone)]
pub struct BucketParameters {
    pub zoom: f32,
    pub overscaling: f32,
    /// Position of the bucket within its tile, stored in feature index and
    /// collision records.
    pub index: usize,
    pub show_collision_boxes: bool,
}

impl Default for BucketParameters {
    fn default() -> Self {
        BucketParameters {
            zoom: 0.0,
            overscaling: 1.0,
            index: 0,
            show_collision_boxes: false,
        }
    }
}

/// A feature selected for a bucket with its geometry already loaded.
#[derive(Debug)]
pub struct BucketFeature<'a> {
    pub index: usize,
    pub source_layer_index: usize,
    pub feature: VectorTileFeature<'a>,
    pub geometry: Vec<Ring>,
}

#[derive(Debug)]
pub enum Bucket {
    Fill(FillBucket),
    Line(LineBucket),
    Circle(CircleBucket),
    Symbol(Box<SymbolBucket>),
}

impl Bucket {
    /// A bucket for the family's layer type, `None` for types that produce no
    /// geometry.
    pub fn new(family: Arc<LayerFamily>, params: BucketParameters) -> Option<Bucket> {
        let bucket = match family.parent.layer_type() {
            LayerType::Fill => Bucket::Fill(FillBucket::new(family, params)),
            LayerType::Line => Bucket::Line(LineBucket::new(family, params)),
            LayerType::Circle => Bucket::Circle(CircleBucket::new(family, params)),
            LayerType::Symbol => Bucket::Symbol(Box::new(SymbolBucket::new(family, params))),
            _ => return None,
        };

        Some(bucket)
    }

    pub fn family(&self) -> &LayerFamily {
        match self {
            Bucket::Fill(b) => &b.family,
            Bucket::Line(b) => &b.family,
            Bucket::Circle(b) => &b.family,
            Bucket::Symbol(b) => b.family(),
        }
    }

    pub fn id(&self) -> &str {
        &self.family().parent.id
    }

    pub fn index(&self) -> usize {
        match self {
            Bucket::Fill(b) => b.params.index,
            Bucket::Line(b) => b.params.index,
            Bucket::Circle(b) => b.params.index,
            Bucket::Symbol(b) => b.params().index,
        }
    }

    /// Tessellates geometry buckets directly; symbol buckets only collect
    /// their features and dependencies here.
    pub fn populate(&mut self, features: &[BucketFeature<'_>]) {
        match self {
            Bucket::Fill(b) => features.iter().for_each(|f| b.add_feature(&f.geometry)),
            Bucket::Line(b) => features.iter().for_each(|f| b.add_feature(&f.geometry)),
            Bucket::Circle(b) => features.iter().for_each(|f| b.add_feature(&f.geometry)),
            Bucket::Symbol(b) => b.populate(features),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Bucket::Fill(b) => b.is_empty(),
            Bucket::Line(b) => b.is_empty(),
            Bucket::Circle(b) => b.is_empty(),
            Bucket::Symbol(b) => b.is_empty(),
        }
    }

    /// Moves the finished arrays out, leaving the bucket empty.
    pub fn serialize(&mut self) -> SerializedBucket {
        let program_groups = match self {
            Bucket::Fill(b) => b.take_program_groups(),
            Bucket::Line(b) => b.take_program_groups(),
            Bucket::Circle(b) => b.take_program_groups(),
            Bucket::Symbol(b) => b.take_program_groups(),
        };

        let family = self.family();
        SerializedBucket {
            layer_id: family.parent.id.clone(),
            child_layer_ids: family.layer_ids(),
            program_groups,
        }
    }
}

/// A bucket's buffers, ready to be handed over to the renderer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SerializedBucket {
    pub layer_id: String,
    pub child_layer_ids: Vec<String>,
    pub program_groups: Vec<(&'static str, Vec<SerializedArrayGroup>)>,
}

impl SerializedBucket {
    pub fn program_group(&self, name: &str) -> Option<&[SerializedArrayGroup]> {
        self.program_groups
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, groups)| groups.as_slice())
    }

    /// Every buffer owned by this bucket.
    pub fn transferables(&self) -> impl Iterator<Item = &[u8]> {
        self.program_groups
            .iter()
            .flat_map(|(_, groups)| groups.iter())
            .flat_map(|group| group.buffers())
    }
}

/// Finds a layer of `family` by id, used when filling per-layer paint arrays.
pub(crate) fn family_layer<'a>(
    family: &'a LayerFamily,
    id: &str,
) -> Option<&'a crate::style::StyleLayer> {
    family.layers().find(|l| l.id == id)
}
