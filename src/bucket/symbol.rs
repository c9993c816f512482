use std::{collections::BTreeSet, f32::consts::PI, sync::Arc};

use lyon::math::{Point, Vector, point, vector};

use crate::{
    EXTENT,
    buffers::{
        CollisionBoxVertex, LineElement, ProgramGroup, SerializedArrayGroup, SymbolAttributes,
        SymbolVertex, TriangleElement,
    },
    collision_tile::CollisionTile,
    geometry::{Ring, TilePoint},
    glyphs::{GlyphRequests, GlyphStacks, IconImages, ONE_EM},
    style::{Color, LayerFamily, LayerKind, SymbolLayout, SymbolPlacement, Text},
    symbol::{
        Anchor, CollisionBoxArray, CollisionFeature, PositionedIcon, Shaping, SymbolQuad,
        clip_line::clip_line,
        collision_box::FeatureRef,
        get_anchors,
        merge_lines::{LineFeature, merge_lines},
        quads::{GlyphQuadOptions, get_glyph_quads, get_icon_quads},
        shaping::{TextOptions, shape_icon, shape_text},
    },
    warn_once,
};

use super::{BucketFeature, BucketParameters, family_layer};

type SymbolProgram = ProgramGroup<SymbolVertex, TriangleElement, LineElement, SymbolAttributes>;
type CollisionBoxProgram = ProgramGroup<CollisionBoxVertex, LineElement, LineElement, SymbolAttributes>;

/// Zoom levels are packed as tenths into a byte.
const MAX_ZOOM: f32 = 25.0;

/// A feature waiting for its glyphs and icons.
#[derive(Debug, Clone)]
pub struct SymbolFeature {
    pub index: usize,
    pub source_layer_index: usize,
    pub text: Option<Text>,
    pub icon: Option<Text>,
    pub geometry: Vec<Ring>,
}

impl LineFeature for SymbolFeature {
    fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    fn line_mut(&mut self) -> Option<&mut Vec<TilePoint>> {
        self.geometry.first_mut()
    }

    fn line(&self) -> Option<&[TilePoint]> {
        self.geometry.first().map(Vec::as_slice)
    }
}

/// One potential label: its quads and the collision boxes deciding whether
/// they are drawn.
#[derive(Debug)]
struct SymbolInstance {
    anchor: Anchor,
    index: usize,
    glyph_quads: Vec<SymbolQuad>,
    icon_quads: Vec<SymbolQuad>,
    text_collision: Option<CollisionFeature>,
    icon_collision: Option<CollisionFeature>,
}

/// Layout values shared by every label of the bucket.
#[derive(Debug, Copy, Clone)]
struct LabelLayout {
    is_line: bool,
    overscaling: f32,
    text_box_scale: f32,
    text_max_box_scale: f32,
    icon_box_scale: f32,
    symbol_min_distance: f32,
    text_repeat_distance: f32,
    text_padding: f32,
    icon_padding: f32,
    text_max_angle: f32,
    text_rotate: f32,
    icon_rotate: f32,
    text_keep_upright: bool,
    text_along_line: bool,
    icon_along_line: bool,
    avoid_edges: bool,
    may_overlap: bool,
    bucket_index: usize,
}

impl LabelLayout {
    fn new(layout: &SymbolLayout, params: &BucketParameters) -> Self {
        let zoom = params.zoom;
        let tile_pixel_ratio = EXTENT as f32 / (512.0 * params.overscaling);

        // Sizes are taken one zoom level up, labels are drawn at most twice
        // as large as laid out
        let text_size = layout.text_size(zoom + 1.0);
        let text_max_size = layout.text_size(18.0);
        let icon_size = layout.icon_size(zoom + 1.0);

        let symbol_min_distance = tile_pixel_ratio * layout.symbol_spacing(zoom);

        LabelLayout {
            is_line: layout.symbol_placement(zoom) == SymbolPlacement::Line,
            overscaling: params.overscaling,
            text_box_scale: tile_pixel_ratio * text_size / ONE_EM,
            text_max_box_scale: tile_pixel_ratio * text_max_size / ONE_EM,
            icon_box_scale: tile_pixel_ratio * icon_size,
            symbol_min_distance,
            text_repeat_distance: symbol_min_distance / 2.0,
            text_padding: layout.text_padding(zoom) * tile_pixel_ratio,
            icon_padding: layout.icon_padding(zoom) * tile_pixel_ratio,
            text_max_angle: layout.text_max_angle(zoom).to_radians(),
            text_rotate: layout.text_rotate(zoom),
            icon_rotate: layout.icon_rotate(zoom),
            text_keep_upright: layout.text_keep_upright(),
            text_along_line: layout.text_along_line(zoom),
            icon_along_line: layout.icon_along_line(zoom),
            avoid_edges: layout.symbol_avoid_edges,
            may_overlap: layout.may_overlap(),
            bucket_index: params.index,
        }
    }
}

/// Text and icon labels. Layout happens in three steps: [`populate`]
/// collects features and the glyphs and icons they need, [`prepare`] shapes
/// them into quads and collision boxes once those arrive, and [`place`]
/// runs collision detection and writes the drawable arrays. Only `place` is
/// repeated when the view angle or pitch changes.
///
/// [`populate`]: SymbolBucket::populate
/// [`prepare`]: SymbolBucket::prepare
/// [`place`]: SymbolBucket::place
#[derive(Debug)]
pub struct SymbolBucket {
    family: Arc<LayerFamily>,
    params: BucketParameters,
    layout: SymbolLayout,
    features: Vec<SymbolFeature>,
    glyph_requests: GlyphRequests,
    icon_requests: BTreeSet<String>,
    instances: Vec<SymbolInstance>,
    sdf_icons: Option<bool>,
    icons_need_linear: bool,
    glyph: SymbolProgram,
    icon: SymbolProgram,
    collision_box: CollisionBoxProgram,
}

impl SymbolBucket {
    pub fn new(family: Arc<LayerFamily>, params: BucketParameters) -> Self {
        let layout = match &family.parent.kind {
            LayerKind::Symbol { layout, .. } => layout.clone(),
            _ => SymbolLayout::default(),
        };
        let layer_ids = family.layer_ids();

        SymbolBucket {
            glyph: ProgramGroup::new(layer_ids.clone(), false),
            icon: ProgramGroup::new(layer_ids, false),
            collision_box: ProgramGroup::new(Vec::new(), false),
            family,
            params,
            layout,
            features: Vec::new(),
            glyph_requests: GlyphRequests::default(),
            icon_requests: BTreeSet::new(),
            instances: Vec::new(),
            sdf_icons: None,
            icons_need_linear: false,
        }
    }

    pub fn family(&self) -> &LayerFamily {
        &self.family
    }

    pub fn params(&self) -> &BucketParameters {
        &self.params
    }

    pub fn set_show_collision_boxes(&mut self, show: bool) {
        self.params.show_collision_boxes = show;
    }

    pub fn features(&self) -> &[SymbolFeature] {
        &self.features
    }

    /// Codepoints per font stack needed by the collected features.
    pub fn glyph_requests(&self) -> &GlyphRequests {
        &self.glyph_requests
    }

    pub fn icon_requests(&self) -> impl Iterator<Item = &str> {
        self.icon_requests.iter().map(String::as_str)
    }

    /// Whether the icons are signed distance fields.
    pub fn sdf_icons(&self) -> bool {
        self.sdf_icons.unwrap_or(false)
    }

    /// Icons are scaled or rotated and need linear filtering.
    pub fn icons_need_linear(&self) -> bool {
        self.icons_need_linear
    }

    /// Keeps features with a label and records what they depend on. Line
    /// labels with the same text are merged across split geometry.
    pub fn populate(&mut self, features: &[BucketFeature<'_>]) {
        let zoom = self.params.zoom;
        let font_stack = self.layout.font_stack();

        for f in features {
            let text = self.layout.text(&f.feature);
            let icon = self.layout.icon(&f.feature);
            if text.is_none() && icon.is_none() {
                continue;
            }

            if let Some(icon) = &icon {
                self.icon_requests.insert(icon.to_string());
            }
            if let Some(text) = &text {
                self.glyph_requests
                    .entry(font_stack.clone())
                    .or_default()
                    .extend(text.chars().map(u32::from));
            }

            self.features.push(SymbolFeature {
                index: f.index,
                source_layer_index: f.source_layer_index,
                text,
                icon,
                geometry: f.geometry.clone(),
            });
        }

        if self.layout.symbol_placement(zoom) == SymbolPlacement::Line {
            self.features = merge_lines(std::mem::take(&mut self.features));
        }
    }

    /// Shapes every feature and creates its quads and collision boxes.
    /// Missing glyphs or icons leave that part of the label out.
    pub fn prepare(&mut self, stacks: &GlyphStacks, icons: &IconImages, boxes: &mut CollisionBoxArray) {
        let zoom = self.params.zoom;
        let layout = &self.layout;
        let label = LabelLayout::new(layout, &self.params);

        let (horizontal_align, vertical_align) = layout.text_anchor(zoom).alignment();
        let (offset_x, offset_y) = layout.text_offset(zoom);
        let text_options = TextOptions {
            max_width: if label.is_line {
                0.0
            } else {
                layout.text_max_width(zoom) * ONE_EM
            },
            line_height: layout.text_line_height(zoom) * ONE_EM,
            horizontal_align,
            vertical_align,
            justify: layout.text_justify.factor(),
            spacing: layout.text_letter_spacing(zoom) * ONE_EM,
            translate: (offset_x * ONE_EM, offset_y * ONE_EM),
        };
        let icon_offset = layout.icon_offset(zoom);

        let font_stack = layout.font_stack();
        let stack = stacks.get(&font_stack);

        let mut compare_text: ahash::AHashMap<Text, Vec<Point>> = ahash::AHashMap::new();
        self.instances.clear();

        for feature in &self.features {
            let shaped_text = feature
                .text
                .as_deref()
                .zip(stack)
                .and_then(|(text, stack)| shape_text(text, stack, &text_options));

            let mut shaped_icon = None;
            if let Some(image) = feature.icon.as_deref().and_then(|name| icons.get(name)) {
                shaped_icon = Some(shape_icon(image, icon_offset));

                match self.sdf_icons {
                    None => self.sdf_icons = Some(image.sdf),
                    Some(sdf) if sdf != image.sdf => {
                        warn_once("cannot mix SDF and non-SDF icons in one buffer");
                    }
                    _ => (),
                }
                if image.pixel_ratio != 1.0 || label.icon_rotate != 0.0 {
                    self.icons_need_linear = true;
                }
            }

            if shaped_text.is_none() && shaped_icon.is_none() {
                continue;
            }

            add_feature(
                &label,
                feature,
                shaped_text.as_ref(),
                shaped_icon.as_ref(),
                boxes,
                &mut compare_text,
                &mut self.instances,
            );
        }

        log::trace!(
            "layer {}: {} symbol instances from {} features",
            self.family.parent.id,
            self.instances.len(),
            self.features.len()
        );
    }

    /// Runs collision detection for every label against `tile` and rebuilds
    /// the drawable arrays from scratch.
    pub fn place(&mut self, tile: &mut CollisionTile) {
        let layer_ids = self.family.layer_ids();
        self.glyph = ProgramGroup::new(layer_ids.clone(), false);
        self.icon = ProgramGroup::new(layer_ids, false);
        self.collision_box = ProgramGroup::new(Vec::new(), false);

        let zoom = self.params.zoom;
        let layout = &self.layout;
        let text_along_line = layout.text_along_line(zoom);
        let icon_along_line = layout.icon_along_line(zoom);

        // Lower labels are drawn over higher ones. Labels that cannot overlap
        // keep their order so they do not flicker while rotating.
        if layout.may_overlap() {
            let (sin, cos) = tile.angle.sin_cos();
            let rotated_y = |a: &Anchor| (sin * a.point.x + cos * a.point.y) as i32;
            self.instances.sort_by(|a, b| {
                rotated_y(&a.anchor)
                    .cmp(&rotated_y(&b.anchor))
                    .then(b.index.cmp(&a.index))
            });
        }

        for instance in &self.instances {
            let has_text = instance.text_collision.is_some();
            let has_icon = instance.icon_collision.is_some();

            let icon_without_text = layout.text_optional || !has_text;
            let text_without_icon = layout.icon_optional || !has_icon;

            let mut glyph_scale = match &instance.text_collision {
                Some(f) => tile.place_collision_feature(f, layout.text_allow_overlap, layout.symbol_avoid_edges),
                None => tile.min_scale,
            };
            let mut icon_scale = match &instance.icon_collision {
                Some(f) => tile.place_collision_feature(f, layout.icon_allow_overlap, layout.symbol_avoid_edges),
                None => tile.min_scale,
            };

            if !icon_without_text && !text_without_icon {
                let scale = glyph_scale.max(icon_scale);
                glyph_scale = scale;
                icon_scale = scale;
            } else if !text_without_icon {
                glyph_scale = glyph_scale.max(icon_scale);
            } else if !icon_without_text {
                icon_scale = glyph_scale.max(icon_scale);
            }

            if let Some(f) = &instance.text_collision {
                tile.insert_collision_feature(f, glyph_scale, layout.text_ignore_placement);
                if glyph_scale <= tile.max_scale {
                    add_symbols(
                        &mut self.glyph,
                        &instance.glyph_quads,
                        glyph_scale,
                        layout.text_keep_upright(),
                        text_along_line,
                        tile.angle,
                        zoom,
                    );
                }
            }

            if let Some(f) = &instance.icon_collision {
                tile.insert_collision_feature(f, icon_scale, layout.icon_ignore_placement);
                if icon_scale <= tile.max_scale {
                    add_symbols(
                        &mut self.icon,
                        &instance.icon_quads,
                        icon_scale,
                        layout.icon_keep_upright,
                        icon_along_line,
                        tile.angle,
                        zoom,
                    );
                }
            }
        }

        if self.params.show_collision_boxes {
            add_collision_boxes(&mut self.collision_box, &self.instances, tile, zoom);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.glyph.is_empty() && self.icon.is_empty() && self.collision_box.is_empty()
    }

    pub(crate) fn take_program_groups(&mut self) -> Vec<(&'static str, Vec<SerializedArrayGroup>)> {
        let zoom = self.params.zoom;
        let family = self.family.clone();
        let layer_ids = family.layer_ids();

        let mut glyph = std::mem::replace(&mut self.glyph, ProgramGroup::new(layer_ids.clone(), false));
        let mut icon = std::mem::replace(&mut self.icon, ProgramGroup::new(layer_ids, false));
        let collision_box = std::mem::replace(&mut self.collision_box, ProgramGroup::new(Vec::new(), false));

        for group in glyph.groups.iter_mut() {
            group.populate_paint_arrays(|id| match family_layer(&family, id).map(|l| &l.kind) {
                Some(LayerKind::Symbol { paint, .. }) => SymbolAttributes {
                    fill_color: paint.text_color(zoom).to_bytes(),
                    halo_color: paint.text_halo_color(zoom).to_bytes(),
                },
                _ => SymbolAttributes::default(),
            });
        }

        for group in icon.groups.iter_mut() {
            group.populate_paint_arrays(|id| match family_layer(&family, id).map(|l| &l.kind) {
                Some(LayerKind::Symbol { paint, .. }) => SymbolAttributes {
                    fill_color: Color::rgba(1.0, 1.0, 1.0, paint.icon_opacity(zoom)).to_bytes(),
                    halo_color: paint.text_halo_color(zoom).to_bytes(),
                },
                _ => SymbolAttributes::default(),
            });
        }

        let mut groups = vec![("glyph", glyph.serialize()), ("icon", icon.serialize())];
        if !collision_box.is_empty() {
            groups.push(("collisionBox", collision_box.serialize()));
        }
        groups
    }
}

fn add_feature(
    label: &LabelLayout,
    feature: &SymbolFeature,
    shaped_text: Option<&Shaping>,
    shaped_icon: Option<&PositionedIcon>,
    boxes: &mut CollisionBoxArray,
    compare_text: &mut ahash::AHashMap<Text, Vec<Point>>,
    instances: &mut Vec<SymbolInstance>,
) {
    let lines = if label.is_line {
        clip_line(&feature.geometry, 0, 0, EXTENT, EXTENT)
    } else {
        feature.geometry.clone()
    };

    let feature_ref = FeatureRef {
        feature_index: feature.index as u32,
        source_layer_index: feature.source_layer_index as u16,
        bucket_index: label.bucket_index as u16,
    };
    let extent = EXTENT as f32;

    for line in &lines {
        let line: Vec<Point> = line.iter().map(|p| point(p.x as f32, p.y as f32)).collect();

        let anchors = if label.is_line {
            get_anchors(
                &line,
                label.symbol_min_distance,
                label.text_max_angle,
                shaped_text,
                shaped_icon,
                ONE_EM,
                label.text_max_box_scale,
                label.overscaling,
            )
        } else {
            line.first().map(|&p| Anchor::new(p, 0.0, None)).into_iter().collect()
        };

        for anchor in anchors {
            if let (Some(shaped), true) = (shaped_text, label.is_line) {
                if anchor_is_too_close(compare_text, &shaped.text, label.text_repeat_distance, anchor.point) {
                    continue;
                }
            }

            let inside = !(anchor.point.x < 0.0
                || anchor.point.x > extent
                || anchor.point.y < 0.0
                || anchor.point.y > extent);

            if label.avoid_edges && !inside {
                continue;
            }

            // Labels outside the tile still take part in collision but are
            // drawn by the neighbouring tile. Overlapping layers draw them in
            // both tiles to keep their draw order across the boundary.
            let add_to_buffers = inside || label.may_overlap;

            let mut instance = SymbolInstance {
                anchor,
                index: instances.len(),
                glyph_quads: Vec::new(),
                icon_quads: Vec::new(),
                text_collision: None,
                icon_collision: None,
            };

            if let Some(shaped) = shaped_text {
                if add_to_buffers {
                    instance.glyph_quads = get_glyph_quads(
                        &anchor,
                        shaped,
                        &line,
                        GlyphQuadOptions {
                            box_scale: label.text_box_scale,
                            text_rotate: label.text_rotate,
                            keep_upright: label.text_keep_upright,
                            along_line: label.text_along_line,
                        },
                    );
                }
                instance.text_collision = Some(CollisionFeature::new(
                    boxes,
                    &line,
                    &anchor,
                    feature_ref,
                    shaped.into(),
                    label.text_box_scale,
                    label.text_padding,
                    label.text_along_line,
                    false,
                ));
            }

            if let Some(shaped) = shaped_icon {
                if add_to_buffers {
                    instance.icon_quads =
                        get_icon_quads(&anchor, shaped, &line, label.icon_rotate, label.icon_along_line);
                }
                instance.icon_collision = Some(CollisionFeature::new(
                    boxes,
                    &line,
                    &anchor,
                    feature_ref,
                    shaped.into(),
                    label.icon_box_scale,
                    label.icon_padding,
                    label.icon_along_line,
                    true,
                ));
            }

            instances.push(instance);
        }
    }
}

/// Whether a label with the same text was already anchored within
/// `repeat_distance`; remembers the anchor otherwise.
fn anchor_is_too_close(
    compare_text: &mut ahash::AHashMap<Text, Vec<Point>>,
    text: &Text,
    repeat_distance: f32,
    anchor: Point,
) -> bool {
    let others = compare_text.entry(text.clone()).or_default();
    if others
        .iter()
        .rev()
        .any(|other| (anchor - *other).length() < repeat_distance)
    {
        return true;
    }
    others.push(anchor);
    false
}

fn add_symbols(
    program: &mut SymbolProgram,
    quads: &[SymbolQuad],
    scale: f32,
    keep_upright: bool,
    along_line: bool,
    placement_angle: f32,
    zoom: f32,
) {
    if quads.is_empty() {
        return;
    }

    let group = program.prepare(4 * quads.len());
    let placement_zoom = (scale.log2() + zoom).max(0.0);

    for quad in quads {
        // Upside down copies of glyphs are dropped
        let a = (quad.anchor_angle + placement_angle + PI) % (PI * 2.0);
        if keep_upright && along_line && (a <= PI / 2.0 || a > PI * 3.0 / 2.0) {
            continue;
        }

        let mut min_zoom = (zoom + quad.min_scale.log2()).max(placement_zoom);
        let max_zoom = (zoom + quad.max_scale.log2()).min(MAX_ZOOM);
        if max_zoom <= min_zoom {
            continue;
        }

        // Fading labels may still show outside their collision free range
        if min_zoom == placement_zoom {
            min_zoom = 0.0;
        }

        let glyph_angle = ((quad.glyph_angle / (PI * 2.0)) * 256.0).round() as u32 % 256;
        let data = [
            (placement_zoom * 10.0) as u8,
            glyph_angle as u8,
            (min_zoom * 10.0) as u8,
            (max_zoom * 10.0) as u8,
        ];

        let anchor = quad.anchor_point;
        let tex = quad.tex;
        let vertex = |offset: Vector, tx: u16, ty: u16| SymbolVertex {
            pos: [anchor.x as i16, anchor.y as i16],
            offset: [(offset.x * 64.0).round() as i16, (offset.y * 64.0).round() as i16],
            texture_pos: [tx / 4, ty / 4],
            data,
        };

        let vertices = &mut group.layout_vertex_array;
        let index = vertices.emplace_back(vertex(quad.tl, tex.x, tex.y)) as u16;
        vertices.emplace_back(vertex(quad.tr, tex.x + tex.w, tex.y));
        vertices.emplace_back(vertex(quad.bl, tex.x, tex.y + tex.h));
        vertices.emplace_back(vertex(quad.br, tex.x + tex.w, tex.y + tex.h));

        group.element_array.emplace_back(TriangleElement {
            vertices: [index, index + 1, index + 2],
        });
        group.element_array.emplace_back(TriangleElement {
            vertices: [index + 1, index + 2, index + 3],
        });
    }
}

/// Outlines of every collision box, for debugging placement.
fn add_collision_boxes(
    program: &mut CollisionBoxProgram,
    instances: &[SymbolInstance],
    tile: &CollisionTile,
    zoom: f32,
) {
    let angle = -tile.angle;
    let y_stretch = tile.y_stretch();
    let (sin, cos) = angle.sin_cos();
    let rotate = |x: i16, y: i16| {
        let v = vector(x as f32, y as f32 * y_stretch);
        vector(cos * v.x - sin * v.y, sin * v.x + cos * v.y)
    };

    let features = instances
        .iter()
        .flat_map(|i| i.text_collision.iter().chain(i.icon_collision.iter()));

    for feature in features {
        for index in feature.boxes() {
            let Some(b) = tile.boxes().get(index) else {
                continue;
            };

            let tl = rotate(b.x1, b.y1);
            let tr = rotate(b.x2, b.y1);
            let bl = rotate(b.x1, b.y2);
            let br = rotate(b.x2, b.y2);

            let max_zoom = (zoom + b.max_scale.log2()).clamp(0.0, MAX_ZOOM);
            let placement_zoom = (zoom + b.placement_scale.log2()).clamp(0.0, MAX_ZOOM);
            let data = [(max_zoom * 10.0) as u8, (placement_zoom * 10.0) as u8];

            let group = program.prepare(8);
            let start = group.layout_vertex_array.len() as u16;
            for extrude in [tl, tr, tr, br, br, bl, bl, tl] {
                group.layout_vertex_array.emplace_back(CollisionBoxVertex::new(
                    [b.anchor_x, b.anchor_y],
                    [extrude.x.round() as i16, extrude.y.round() as i16],
                    data,
                ));
            }
            for edge in 0..4 {
                let i = start + edge * 2;
                group.element_array.emplace_back(LineElement {
                    vertices: [i, i + 1],
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        glyphs::{GlyphStack, IconImage},
        proto::{self, GeometryEncoder, LayerBuilder},
        style::StyleLayer,
        symbol::shaping::tests::glyph_stack,
        vector_tile::VectorTile,
    };
    use pretty_assertions::assert_eq;
    use prost::Message;
    use serde_json::json;

    fn tile_data(kind: proto::GeomType, features: &[(Vec<[i32; 2]>, &str)]) -> Vec<u8> {
        let mut layer = LayerBuilder::new("labels", 8192);
        for (points, name) in features {
            let mut encoder = GeometryEncoder::new();
            match kind {
                proto::GeomType::Point => encoder.points(points),
                _ => encoder.line(points),
            };
            layer.add_feature(None, kind, encoder.finish(), [("name", proto::Value::string(name))]);
        }
        proto::Tile {
            layers: vec![layer.finish()],
        }
        .encode_to_vec()
    }

    fn bucket(layout: serde_json::Value, params: BucketParameters) -> SymbolBucket {
        let layer = StyleLayer::from_json(json!({
            "id": "labels",
            "type": "symbol",
            "layout": layout,
        }))
        .unwrap();
        SymbolBucket::new(Arc::new(LayerFamily::new(layer)), params)
    }

    fn populate(bucket: &mut SymbolBucket, data: &[u8]) {
        let tile = VectorTile::parse(data).unwrap();
        let layer = &tile.layers[0];
        let features: Vec<_> = (0..layer.len())
            .map(|i| {
                let feature = layer.feature(i).unwrap();
                BucketFeature {
                    index: i,
                    source_layer_index: 0,
                    geometry: crate::geometry::load_geometry(&feature).unwrap(),
                    feature,
                }
            })
            .collect();
        bucket.populate(&features);
    }

    fn stacks(bucket: &SymbolBucket) -> GlyphStacks {
        let stack: GlyphStack = glyph_stack();
        bucket
            .glyph_requests()
            .keys()
            .map(|name| (name.clone(), stack.clone()))
            .collect()
    }

    fn layout_and_place(bucket: &mut SymbolBucket, icons: &IconImages) -> CollisionTile {
        let mut boxes = CollisionBoxArray::new();
        bucket.prepare(&stacks(bucket), icons, &mut boxes);
        let mut tile = CollisionTile::new(0.0, 0.0, boxes);
        bucket.place(&mut tile);
        tile
    }

    #[test]
    fn populate_collects_dependencies() {
        let mut bucket = bucket(
            json!({ "text-field": "{name}", "icon-image": "{name}-icon" }),
            BucketParameters::default(),
        );
        let data = tile_data(
            proto::GeomType::Point,
            &[(vec![[10, 10]], "ab"), (vec![[20, 20]], "ba"), (vec![[30, 30]], "")],
        );
        populate(&mut bucket, &data);

        // The empty name still resolves to an icon
        assert_eq!(bucket.features().len(), 3);
        let codepoints: Vec<u32> = bucket.glyph_requests().values().flatten().copied().collect();
        assert_eq!(codepoints, vec!['a' as u32, 'b' as u32]);
        assert_eq!(bucket.icon_requests().collect::<Vec<_>>(), vec!["-icon", "ab-icon", "ba-icon"]);
    }

    #[test]
    fn features_without_labels_are_skipped() {
        let mut bucket = bucket(json!({ "text-field": "{name}" }), BucketParameters::default());
        let data = tile_data(proto::GeomType::Point, &[(vec![[10, 10]], "  "), (vec![[20, 20]], "x")]);
        populate(&mut bucket, &data);
        assert_eq!(bucket.features().len(), 1);
    }

    #[test]
    fn line_labels_are_merged() {
        let mut bucket = bucket(
            json!({ "text-field": "{name}", "symbol-placement": "line" }),
            BucketParameters::default(),
        );
        let data = tile_data(
            proto::GeomType::Linestring,
            &[
                (vec![[0, 100], [1000, 100]], "main"),
                (vec![[1000, 100], [2000, 100]], "main"),
                (vec![[2000, 100], [3000, 100]], "side"),
            ],
        );
        populate(&mut bucket, &data);

        assert_eq!(bucket.features().len(), 2);
        assert_eq!(bucket.features()[0].geometry[0].len(), 3);
    }

    #[test]
    fn coincident_point_labels_draw_once() {
        let mut bucket = bucket(json!({ "text-field": "{name}" }), BucketParameters::default());
        let data = tile_data(
            proto::GeomType::Point,
            &[(vec![[4000, 4000]], "ab"), (vec![[4000, 4000]], "ab")],
        );
        populate(&mut bucket, &data);
        layout_and_place(&mut bucket, &IconImages::default());

        // Two glyphs of one label, four vertices each
        assert_eq!(bucket.glyph.vertex_count(), 8);
        assert_eq!(bucket.glyph.element_count(), 4);
        assert!(bucket.icon.is_empty());
    }

    #[test]
    fn allowed_overlap_draws_every_label() {
        let mut bucket = bucket(
            json!({ "text-field": "{name}", "text-allow-overlap": true }),
            BucketParameters::default(),
        );
        let data = tile_data(
            proto::GeomType::Point,
            &[(vec![[4000, 4000]], "ab"), (vec![[4000, 4000]], "ab")],
        );
        populate(&mut bucket, &data);
        layout_and_place(&mut bucket, &IconImages::default());
        assert_eq!(bucket.glyph.vertex_count(), 16);
    }

    #[test]
    fn labels_outside_the_tile_are_not_drawn() {
        let mut bucket = bucket(json!({ "text-field": "{name}" }), BucketParameters::default());
        let data = tile_data(proto::GeomType::Point, &[(vec![[-100, 4000]], "ab")]);
        populate(&mut bucket, &data);
        let tile = layout_and_place(&mut bucket, &IconImages::default());

        assert!(bucket.is_empty());
        // Its collision box still blocks labels of the neighbouring tile
        assert_eq!(tile.boxes().len(), 1);
    }

    #[test]
    fn repeated_line_labels_keep_their_distance() {
        let mut bucket = bucket(
            json!({ "text-field": "{name}", "symbol-placement": "line", "symbol-spacing": 50 }),
            BucketParameters::default(),
        );
        let data = tile_data(
            proto::GeomType::Linestring,
            &[
                (vec![[100, 1000], [8000, 1000]], "ab"),
                (vec![[100, 1100], [8000, 1100]], "ab"),
            ],
        );
        populate(&mut bucket, &data);
        let mut boxes = CollisionBoxArray::new();
        bucket.prepare(&stacks(&bucket), &IconImages::default(), &mut boxes);

        // The parallel line repeats the text within half the spacing
        let on_second_line = bucket.instances.iter().filter(|i| i.anchor.point.y == 1100.0).count();
        assert!(bucket.instances.len() > 1);
        assert_eq!(on_second_line, 0);
    }

    #[test]
    fn icons_are_placed_with_their_text() {
        let mut bucket = bucket(
            json!({ "text-field": "{name}", "icon-image": "dot" }),
            BucketParameters {
                show_collision_boxes: true,
                ..BucketParameters::default()
            },
        );
        let data = tile_data(proto::GeomType::Point, &[(vec![[4000, 4000]], "ab")]);
        populate(&mut bucket, &data);

        let icons: IconImages = [(
            "dot".to_string(),
            IconImage {
                width: 8,
                height: 8,
                x: 0,
                y: 0,
                pixel_ratio: 1.0,
                sdf: true,
            },
        )]
        .into_iter()
        .collect();
        layout_and_place(&mut bucket, &icons);

        assert_eq!(bucket.icon.vertex_count(), 4);
        assert_eq!(bucket.glyph.vertex_count(), 8);
        assert!(bucket.sdf_icons());
        // One box each for the text and the icon
        assert_eq!(bucket.collision_box.vertex_count(), 16);

        let groups = bucket.take_program_groups();
        let names: Vec<_> = groups.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, vec!["glyph", "icon", "collisionBox"]);
    }

    #[test]
    fn placement_can_be_redone() {
        let mut bucket = bucket(json!({ "text-field": "{name}" }), BucketParameters::default());
        let data = tile_data(proto::GeomType::Point, &[(vec![[4000, 4000]], "ab")]);
        populate(&mut bucket, &data);
        let tile = layout_and_place(&mut bucket, &IconImages::default());
        let first = bucket.take_program_groups();
        assert!(bucket.is_empty());

        let mut tile = CollisionTile::new(0.5, 30.0, tile.into_boxes());
        bucket.place(&mut tile);
        let second = bucket.take_program_groups();

        assert_eq!(first[0].1[0].layout_vertex_array.length, 8);
        assert_eq!(second[0].1[0].layout_vertex_array.length, 8);
    }
}
