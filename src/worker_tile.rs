//! Layout of a single tile: buckets for every style layer family that draws
//! from the tile's source, the feature index for queries and the collision
//! tile for labels.
//!
//! Parsing is asynchronous because symbol buckets wait for glyph and icon
//! dependencies. A tile stays in [`TileState::Parsing`] until the parsed
//! result is handed back through [`WorkerTile::finish`]. Placement requests
//! arriving in between are remembered, the latest one wins, and applied once
//! when the tile finishes.

use std::sync::Arc;

use futures::{FutureExt, future};

use crate::{
    Result, TileId,
    bucket::{Bucket, BucketFeature, BucketParameters, SerializedBucket},
    collision_tile::{CollisionTile, SerializedCollisionTile},
    feature_index::{FeatureIndex, SerializedFeatureIndex},
    geojson::GEOJSON_LAYER,
    geometry::load_geometry,
    glyphs::{DependencyProvider, GlyphRequests, GlyphStacks, IconImages},
    style::LayerFamily,
    symbol::{CollisionBoxArray, collision_box::FeatureRef},
    vector_tile::VectorTile,
};

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerTileParameters {
    pub uid: u64,
    pub source: String,
    pub tile: TileId,
    /// Zoom the tile is displayed at, above the tile's own zoom when
    /// overscaled.
    pub zoom: f32,
    pub overscaling: f32,
    pub angle: f32,
    pub pitch: f32,
    pub show_collision_boxes: bool,
}

impl Default for WorkerTileParameters {
    fn default() -> Self {
        WorkerTileParameters {
            uid: 0,
            source: String::new(),
            tile: TileId::default(),
            zoom: 0.0,
            overscaling: 1.0,
            angle: 0.0,
            pitch: 0.0,
            show_collision_boxes: false,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TileState {
    Parsing,
    Done,
}

/// Everything a loaded tile hands to the renderer.
#[derive(Debug, Clone)]
pub struct TileResult {
    pub buckets: Vec<SerializedBucket>,
    pub feature_index: SerializedFeatureIndex,
    pub collision_tile: SerializedCollisionTile,
    pub raw_tile_data: Vec<u8>,
}

impl TileResult {
    pub fn transferables(&self) -> Vec<&[u8]> {
        let mut buffers: Vec<&[u8]> = self.buckets.iter().flat_map(|b| b.transferables()).collect();
        buffers.extend(self.feature_index.transferables());
        buffers.extend(self.collision_tile.transferables());
        buffers.push(&self.raw_tile_data);
        buffers
    }

    /// Rebuilds the tile's feature index for queries. Label placement is
    /// attached so labels visible at the query scale are found as well.
    pub fn query_index(&self) -> Option<FeatureIndex> {
        let mut index = FeatureIndex::from_serialized(self.feature_index.clone(), self.raw_tile_data.clone())?;
        index.set_collision_tile(CollisionTile::from_serialized(self.collision_tile.clone())?);
        Some(index)
    }
}

/// Symbol buckets and collision state after a placement pass.
#[derive(Debug, Clone)]
pub struct PlacementResult {
    pub buckets: Vec<SerializedBucket>,
    pub collision_tile: SerializedCollisionTile,
}

impl PlacementResult {
    pub fn transferables(&self) -> Vec<&[u8]> {
        let mut buffers: Vec<&[u8]> = self.buckets.iter().flat_map(|b| b.transferables()).collect();
        buffers.extend(self.collision_tile.transferables());
        buffers
    }
}

/// Laid out but not yet serialized tile contents.
#[derive(Debug)]
pub struct ParsedTile {
    buckets: Vec<Bucket>,
    feature_index: FeatureIndex,
    collision_tile: CollisionTile,
    raw_tile_data: Vec<u8>,
}

#[derive(Debug, Copy, Clone, PartialEq)]
struct Placement {
    angle: f32,
    pitch: f32,
    show_collision_boxes: bool,
}

#[derive(Debug)]
pub struct WorkerTile {
    pub params: WorkerTileParameters,
    state: TileState,
    pending_placement: Option<Placement>,
    symbol_buckets: Vec<Bucket>,
    collision_boxes: CollisionBoxArray,
    raw_tile_data: Option<Vec<u8>>,
}

impl WorkerTile {
    pub fn new(params: WorkerTileParameters) -> Self {
        WorkerTile {
            params,
            state: TileState::Parsing,
            pending_placement: None,
            symbol_buckets: Vec::new(),
            collision_boxes: CollisionBoxArray::new(),
            raw_tile_data: None,
        }
    }

    pub fn state(&self) -> TileState {
        self.state
    }

    /// The bytes of the last finished parse, kept for reloads.
    pub fn raw_tile_data(&self) -> Option<&[u8]> {
        self.raw_tile_data.as_deref()
    }

    /// Marks the tile as being parsed again, for reloads of a finished tile.
    pub fn restart(&mut self) {
        self.state = TileState::Parsing;
    }

    /// Lays out `data` for every family drawing from the tile's source.
    ///
    /// Geometry buckets are tessellated in one synchronous pass. Symbol
    /// buckets then wait for glyphs and icons, which are requested together,
    /// before they are shaped and placed. Families later in the style are
    /// placed first so they win collisions.
    pub async fn parse(
        params: WorkerTileParameters,
        data: Vec<u8>,
        families: Arc<[Arc<LayerFamily>]>,
        dependencies: Arc<dyn DependencyProvider>,
    ) -> Result<ParsedTile> {
        let (mut buckets, mut feature_index) = populate(&params, &data, &families)?;

        let mut glyph_requests = GlyphRequests::default();
        let mut icon_requests = Vec::new();
        for bucket in buckets.iter() {
            let Bucket::Symbol(symbol) = bucket else {
                continue;
            };
            for (stack, codepoints) in symbol.glyph_requests() {
                glyph_requests
                    .entry(stack.clone())
                    .or_default()
                    .extend(codepoints.iter().copied());
            }
            icon_requests.extend(symbol.icon_requests().map(String::from));
        }
        icon_requests.sort();
        icon_requests.dedup();

        let glyphs = if glyph_requests.is_empty() {
            future::ready(Ok(GlyphStacks::default())).boxed()
        } else {
            dependencies.glyphs(glyph_requests)
        };
        let icons = if icon_requests.is_empty() {
            future::ready(Ok(IconImages::default())).boxed()
        } else {
            dependencies.icons(icon_requests)
        };
        let (stacks, icons) = future::try_join(glyphs, icons).await?;

        let mut collision_tile = CollisionTile::new(params.angle, params.pitch, CollisionBoxArray::new());
        for bucket in buckets.iter_mut() {
            if let Bucket::Symbol(symbol) = bucket {
                symbol.prepare(&stacks, &icons, collision_tile.boxes_mut());
            }
        }
        place_symbols(&mut buckets, &mut collision_tile);

        feature_index.set_bucket_layer_ids(buckets.iter().map(|b| b.family().layer_ids()).collect());

        log::debug!(
            "parsed tile {} of '{}': {} buckets, {} indexed features",
            params.tile,
            params.source,
            buckets.len(),
            feature_index.len()
        );

        Ok(ParsedTile {
            buckets,
            feature_index,
            collision_tile,
            raw_tile_data: data,
        })
    }

    /// Serializes a finished parse and moves the tile to
    /// [`TileState::Done`], first re-placing labels if a placement request
    /// arrived while parsing.
    pub fn finish(&mut self, parsed: ParsedTile) -> TileResult {
        let ParsedTile {
            mut buckets,
            mut feature_index,
            mut collision_tile,
            raw_tile_data,
        } = parsed;

        if let Some(placement) = self.pending_placement.take() {
            self.params.angle = placement.angle;
            self.params.pitch = placement.pitch;
            self.params.show_collision_boxes = placement.show_collision_boxes;
            for bucket in buckets.iter_mut() {
                if let Bucket::Symbol(symbol) = bucket {
                    symbol.set_show_collision_boxes(placement.show_collision_boxes);
                }
            }
            collision_tile = CollisionTile::new(placement.angle, placement.pitch, collision_tile.into_boxes());
            place_symbols(&mut buckets, &mut collision_tile);
        }

        let serialized_buckets = serialize_buckets(&mut buckets);
        let serialized_collision_tile = collision_tile.serialize();

        self.collision_boxes = collision_tile.into_boxes();
        self.symbol_buckets = buckets
            .into_iter()
            .filter(|b| matches!(b, Bucket::Symbol(_)))
            .collect();
        self.raw_tile_data = Some(raw_tile_data.clone());
        self.state = TileState::Done;

        TileResult {
            buckets: serialized_buckets,
            feature_index: feature_index.serialize(),
            collision_tile: serialized_collision_tile,
            raw_tile_data,
        }
    }

    /// Re-runs label placement for a new view. While the tile is still
    /// parsing the request is kept and `None` returned; a later request
    /// replaces an earlier one.
    pub fn redo_placement(&mut self, angle: f32, pitch: f32, show_collision_boxes: bool) -> Option<PlacementResult> {
        let placement = Placement {
            angle,
            pitch,
            show_collision_boxes,
        };

        if self.state == TileState::Parsing {
            self.pending_placement = Some(placement);
            return None;
        }

        self.params.angle = angle;
        self.params.pitch = pitch;
        self.params.show_collision_boxes = show_collision_boxes;

        let boxes = std::mem::take(&mut self.collision_boxes);
        let mut collision_tile = CollisionTile::new(angle, pitch, boxes);
        for bucket in self.symbol_buckets.iter_mut() {
            if let Bucket::Symbol(symbol) = bucket {
                symbol.set_show_collision_boxes(show_collision_boxes);
            }
        }
        place_symbols(&mut self.symbol_buckets, &mut collision_tile);

        let buckets = serialize_buckets(&mut self.symbol_buckets);
        let serialized = collision_tile.serialize();
        self.collision_boxes = collision_tile.into_boxes();

        Some(PlacementResult {
            buckets,
            collision_tile: serialized,
        })
    }
}

/// Creates the buckets for `families` and fills the geometry buckets,
/// indexing their features for queries. Symbol buckets only collect their
/// features here.
fn populate(
    params: &WorkerTileParameters,
    data: &[u8],
    families: &[Arc<LayerFamily>],
) -> Result<(Vec<Bucket>, FeatureIndex)> {
    let tile = VectorTile::parse(data)?;
    let mut feature_index = FeatureIndex::new(params.tile, params.overscaling);
    let mut buckets = Vec::new();

    let geojson_layer = tile.layers.iter().position(|l| l.name == GEOJSON_LAYER);

    for family in families {
        let layer = &family.parent;
        if layer.source.as_deref() != Some(params.source.as_str()) || layer.is_hidden(params.zoom) {
            continue;
        }

        let source_layer_index = match layer.source_layer.as_deref() {
            Some(name) => tile.layers.iter().position(|l| l.name == name).or(geojson_layer),
            None => geojson_layer,
        };
        let Some(source_layer_index) = source_layer_index else {
            continue;
        };

        let bucket_params = BucketParameters {
            zoom: params.zoom,
            overscaling: params.overscaling,
            index: buckets.len(),
            show_collision_boxes: params.show_collision_boxes,
        };
        let Some(mut bucket) = Bucket::new(family.clone(), bucket_params) else {
            continue;
        };

        let source_layer = &tile.layers[source_layer_index];
        let mut features = Vec::new();
        for index in 0..source_layer.len() {
            let feature = source_layer.feature(index)?;
            if !layer.filter(&feature) {
                continue;
            }
            let geometry = load_geometry(&feature)?;
            features.push(BucketFeature {
                index,
                source_layer_index,
                feature,
                geometry,
            });
        }

        bucket.populate(&features);

        if !matches!(bucket, Bucket::Symbol(_)) {
            for feature in features.iter() {
                feature_index.insert(
                    &feature.geometry,
                    FeatureRef {
                        feature_index: feature.index as u32,
                        source_layer_index: feature.source_layer_index as u16,
                        bucket_index: bucket.index() as u16,
                    },
                );
            }
        }

        buckets.push(bucket);
    }

    Ok((buckets, feature_index))
}

fn place_symbols(buckets: &mut [Bucket], collision_tile: &mut CollisionTile) {
    for bucket in buckets.iter_mut().rev() {
        if let Bucket::Symbol(symbol) = bucket {
            symbol.place(collision_tile);
        }
    }
}

fn serialize_buckets(buckets: &mut [Bucket]) -> Vec<SerializedBucket> {
    buckets
        .iter_mut()
        .filter(|b| !b.is_empty())
        .map(Bucket::serialize)
        .collect()
}
