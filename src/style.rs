use serde::Deserialize;
use smallvec::SmallVec;

use crate::{
    Error, Result,
    vector_tile::{Value, VectorTileFeature},
};

pub mod color;
pub mod filter_expression;
pub mod source;

pub use color::Color;
pub use filter_expression::FilterExpression;
pub use source::{Source, SourceCollection};

pub type Text = smartstring::alias::String;

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Style {
    #[serde(default)]
    pub sources: SourceCollection,
    pub layers: Vec<StyleLayer>,
}

impl Style {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Style(e.to_string()))
    }

    /// Groups layers sharing geometry. Every layer without a `ref` heads a
    /// family, layers with a `ref` join the family of the layer they name.
    pub fn families(&self) -> Vec<LayerFamily> {
        let mut families: Vec<LayerFamily> = self
            .layers
            .iter()
            .filter(|l| l.parent.is_none())
            .map(|l| LayerFamily {
                parent: l.clone(),
                children: Vec::new(),
            })
            .collect();

        for layer in self.layers.iter() {
            let Some(parent) = layer.parent.as_deref() else {
                continue;
            };

            match families.iter_mut().find(|f| f.parent.id == parent) {
                Some(family) => family.children.push(layer.clone()),
                None => log::warn!("layer '{}' references unknown layer '{}'", layer.id, parent),
            }
        }

        families
    }
}

/// A layer plus the layers that reference it. The parent's layout, filter and
/// source apply to all of them, each keeps its own paint properties.
#[derive(Debug, Clone)]
pub struct LayerFamily {
    pub parent: StyleLayer,
    pub children: Vec<StyleLayer>,
}

impl LayerFamily {
    pub fn new(parent: StyleLayer) -> Self {
        LayerFamily {
            parent,
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: StyleLayer) -> Self {
        self.children.push(child);
        self
    }

    pub fn layers(&self) -> impl Iterator<Item = &StyleLayer> {
        std::iter::once(&self.parent).chain(self.children.iter())
    }

    pub fn layer_ids(&self) -> Vec<String> {
        self.layers().map(|l| l.id.clone()).collect()
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct StyleLayer {
    pub id: String,
    #[serde(rename = "ref")]
    pub parent: Option<String>,
    pub source: Option<String>,
    pub source_layer: Option<String>,
    pub minzoom: Option<f32>,
    pub maxzoom: Option<f32>,
    #[serde(default)]
    pub filter: FilterExpression,
    #[serde(flatten)]
    pub kind: LayerKind,
}

impl StyleLayer {
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| Error::Style(e.to_string()))
    }

    pub fn layer_type(&self) -> LayerType {
        match self.kind {
            LayerKind::Background => LayerType::Background,
            LayerKind::Fill { .. } => LayerType::Fill,
            LayerKind::Line { .. } => LayerType::Line,
            LayerKind::Circle { .. } => LayerType::Circle,
            LayerKind::Symbol { .. } => LayerType::Symbol,
            LayerKind::Raster => LayerType::Raster,
            LayerKind::Unsupported => LayerType::Unsupported,
        }
    }

    pub fn visibility(&self) -> Visibility {
        match &self.kind {
            LayerKind::Fill { layout, .. } | LayerKind::Circle { layout, .. } => layout.visibility,
            LayerKind::Line { layout, .. } => layout.visibility,
            LayerKind::Symbol { layout, .. } => layout.visibility,
            _ => Visibility::Visible,
        }
    }

    /// Whether the layer produces nothing at `zoom`.
    pub fn is_hidden(&self, zoom: f32) -> bool {
        self.minzoom.is_some_and(|min| zoom < min)
            || self.maxzoom.is_some_and(|max| zoom >= max)
            || self.visibility() == Visibility::None
    }

    pub fn filter(&self, feature: &VectorTileFeature<'_>) -> bool {
        self.filter.eval(feature)
    }

    /// Distance in pixels rendered geometry may extend past the source
    /// geometry.
    pub fn query_radius(&self, zoom: f32) -> f32 {
        match &self.kind {
            LayerKind::Line { paint, .. } => {
                paint.line_width_total(zoom) / 2.0
                    + paint.line_offset(zoom).abs()
                    + translate_distance(paint.line_translate(zoom))
            }
            LayerKind::Fill { paint, .. } => translate_distance(paint.fill_translate(zoom)),
            LayerKind::Circle { paint, .. } => {
                paint.circle_radius(zoom) + translate_distance(paint.circle_translate(zoom))
            }
            _ => 0.0,
        }
    }
}

fn translate_distance((x, y): (f32, f32)) -> f32 {
    (x * x + y * y).sqrt()
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum LayerKind {
    Background,
    Fill {
        #[serde(default)]
        layout: BaseLayout,
        #[serde(default)]
        paint: FillPaint,
    },
    Line {
        #[serde(default)]
        layout: LineLayout,
        #[serde(default)]
        paint: LinePaint,
    },
    Circle {
        #[serde(default)]
        layout: BaseLayout,
        #[serde(default)]
        paint: CirclePaint,
    },
    Symbol {
        #[serde(default)]
        layout: SymbolLayout,
        #[serde(default)]
        paint: SymbolPaint,
    },
    Raster,
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum LayerType {
    Background,
    Fill,
    Line,
    Circle,
    Symbol,
    Raster,
    Unsupported,
}

impl LayerType {
    pub fn name(&self) -> &'static str {
        match self {
            LayerType::Background => "background",
            LayerType::Fill => "fill",
            LayerType::Line => "line",
            LayerType::Circle => "circle",
            LayerType::Symbol => "symbol",
            LayerType::Raster => "raster",
            LayerType::Unsupported => "unsupported",
        }
    }
}

#[derive(Deserialize, Debug, Copy, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Visibility {
    #[default]
    Visible,
    None,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
pub struct BaseLayout {
    #[serde(default)]
    pub visibility: Visibility,
}

#[derive(Deserialize, Debug, Copy, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LineJoin {
    Round,
    #[default]
    Miter,
    Bevel,
}

impl EnumParameter for LineJoin {}

#[derive(Deserialize, Debug, Copy, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LineCap {
    #[default]
    Butt,
    Round,
    Square,
}

impl EnumParameter for LineCap {}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
pub struct LineLayout {
    #[serde(default)]
    pub visibility: Visibility,
    line_cap: Option<Parameter<LineCap>>,
    line_join: Option<Parameter<LineJoin>>,
    line_miter_limit: Option<Parameter<f32>>,
    line_round_limit: Option<Parameter<f32>>,
}

impl LineLayout {
    pub fn line_cap(&self, zoom: f32) -> LineCap {
        get_parameter(self.line_cap.as_ref(), zoom).unwrap_or_default()
    }

    pub fn line_join(&self, zoom: f32) -> LineJoin {
        get_parameter(self.line_join.as_ref(), zoom).unwrap_or_default()
    }

    pub fn line_miter_limit(&self, zoom: f32) -> f32 {
        get_parameter(self.line_miter_limit.as_ref(), zoom).unwrap_or(2.0)
    }

    pub fn line_round_limit(&self, zoom: f32) -> f32 {
        get_parameter(self.line_round_limit.as_ref(), zoom).unwrap_or(1.05)
    }
}

#[derive(Deserialize, Debug, Copy, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TranslateAnchor {
    #[default]
    Map,
    Viewport,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
pub struct FillPaint {
    fill_color: Option<Parameter<Color>>,
    fill_opacity: Option<Parameter<f32>>,
    fill_outline_color: Option<Parameter<Color>>,
    fill_translate: Option<Parameter<(f32, f32)>>,
    #[serde(default)]
    pub fill_translate_anchor: TranslateAnchor,
}

impl FillPaint {
    pub fn fill_color(&self, zoom: f32) -> Color {
        let opacity = get_parameter(self.fill_opacity.as_ref(), zoom);
        with_opacity(get_parameter(self.fill_color.as_ref(), zoom), opacity)
    }

    /// Falls back to the fill colour when unset.
    pub fn fill_outline_color(&self, zoom: f32) -> Color {
        match get_parameter(self.fill_outline_color.as_ref(), zoom) {
            Some(color) => with_opacity(Some(color), get_parameter(self.fill_opacity.as_ref(), zoom)),
            None => self.fill_color(zoom),
        }
    }

    pub fn fill_translate(&self, zoom: f32) -> (f32, f32) {
        get_parameter(self.fill_translate.as_ref(), zoom).unwrap_or((0.0, 0.0))
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
pub struct LinePaint {
    line_color: Option<Parameter<Color>>,
    line_opacity: Option<Parameter<f32>>,
    line_width: Option<Parameter<f32>>,
    line_gap_width: Option<Parameter<f32>>,
    line_offset: Option<Parameter<f32>>,
    line_translate: Option<Parameter<(f32, f32)>>,
    #[serde(default)]
    pub line_translate_anchor: TranslateAnchor,
}

impl LinePaint {
    pub fn line_color(&self, zoom: f32) -> Color {
        let opacity = get_parameter(self.line_opacity.as_ref(), zoom);
        with_opacity(get_parameter(self.line_color.as_ref(), zoom), opacity)
    }

    pub fn line_width(&self, zoom: f32) -> f32 {
        get_parameter(self.line_width.as_ref(), zoom).unwrap_or(1.0)
    }

    pub fn line_gap_width(&self, zoom: f32) -> f32 {
        get_parameter(self.line_gap_width.as_ref(), zoom).unwrap_or(0.0)
    }

    /// The full rendered width, both casings included when there is a gap.
    pub fn line_width_total(&self, zoom: f32) -> f32 {
        let gap = self.line_gap_width(zoom);
        if gap > 0.0 {
            gap + 2.0 * self.line_width(zoom)
        } else {
            self.line_width(zoom)
        }
    }

    pub fn line_offset(&self, zoom: f32) -> f32 {
        get_parameter(self.line_offset.as_ref(), zoom).unwrap_or(0.0)
    }

    pub fn line_translate(&self, zoom: f32) -> (f32, f32) {
        get_parameter(self.line_translate.as_ref(), zoom).unwrap_or((0.0, 0.0))
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
pub struct CirclePaint {
    circle_color: Option<Parameter<Color>>,
    circle_opacity: Option<Parameter<f32>>,
    circle_radius: Option<Parameter<f32>>,
    circle_translate: Option<Parameter<(f32, f32)>>,
    #[serde(default)]
    pub circle_translate_anchor: TranslateAnchor,
}

impl CirclePaint {
    pub fn circle_color(&self, zoom: f32) -> Color {
        let opacity = get_parameter(self.circle_opacity.as_ref(), zoom);
        with_opacity(get_parameter(self.circle_color.as_ref(), zoom), opacity)
    }

    pub fn circle_radius(&self, zoom: f32) -> f32 {
        get_parameter(self.circle_radius.as_ref(), zoom).unwrap_or(5.0)
    }

    pub fn circle_translate(&self, zoom: f32) -> (f32, f32) {
        get_parameter(self.circle_translate.as_ref(), zoom).unwrap_or((0.0, 0.0))
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
pub struct SymbolPaint {
    text_color: Option<Parameter<Color>>,
    text_opacity: Option<Parameter<f32>>,
    text_halo_color: Option<Parameter<Color>>,
    text_halo_width: Option<Parameter<f32>>,
    icon_opacity: Option<Parameter<f32>>,
}

impl SymbolPaint {
    pub fn text_color(&self, zoom: f32) -> Color {
        let opacity = get_parameter(self.text_opacity.as_ref(), zoom);
        with_opacity(get_parameter(self.text_color.as_ref(), zoom), opacity)
    }

    pub fn text_halo_color(&self, zoom: f32) -> Color {
        get_parameter(self.text_halo_color.as_ref(), zoom)
            .unwrap_or_else(|| Color::default().with_alpha(0.0))
    }

    pub fn text_halo_width(&self, zoom: f32) -> f32 {
        get_parameter(self.text_halo_width.as_ref(), zoom).unwrap_or_default()
    }

    pub fn icon_opacity(&self, zoom: f32) -> f32 {
        get_parameter(self.icon_opacity.as_ref(), zoom).unwrap_or(1.0)
    }
}

fn with_opacity(color: Option<Color>, opacity: Option<f32>) -> Color {
    match color {
        Some(color) => color.with_alpha(opacity.unwrap_or(color.alpha())),
        None => Color::default(),
    }
}

#[derive(Deserialize, Debug, Copy, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SymbolPlacement {
    #[default]
    Point,
    Line,
}

impl EnumParameter for SymbolPlacement {}

#[derive(Deserialize, Debug, Copy, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RotationAlignment {
    Map,
    Viewport,
    #[default]
    Auto,
}

#[derive(Deserialize, Debug, Copy, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TextTransform {
    #[default]
    None,
    Uppercase,
    Lowercase,
}

impl TextTransform {
    fn transform(&self, c: char, text: &mut Text) {
        match self {
            TextTransform::None => text.push(c),
            TextTransform::Uppercase => text.extend(c.to_uppercase()),
            TextTransform::Lowercase => text.extend(c.to_lowercase()),
        }
    }
}

#[derive(Deserialize, Debug, Copy, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TextJustify {
    Left,
    #[default]
    Center,
    Right,
}

impl TextJustify {
    pub fn factor(&self) -> f32 {
        match self {
            TextJustify::Left => 0.0,
            TextJustify::Center => 0.5,
            TextJustify::Right => 1.0,
        }
    }
}

#[derive(Deserialize, Debug, Copy, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TextAnchor {
    #[default]
    Center,
    Left,
    Right,
    Top,
    Bottom,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl EnumParameter for TextAnchor {}

impl TextAnchor {
    /// Horizontal and vertical alignment of the text box relative to the
    /// anchor, 0 aligns the left/top edge.
    pub fn alignment(&self) -> (f32, f32) {
        let horizontal = match self {
            TextAnchor::Left | TextAnchor::TopLeft | TextAnchor::BottomLeft => 0.0,
            TextAnchor::Right | TextAnchor::TopRight | TextAnchor::BottomRight => 1.0,
            _ => 0.5,
        };
        let vertical = match self {
            TextAnchor::Top | TextAnchor::TopLeft | TextAnchor::TopRight => 0.0,
            TextAnchor::Bottom | TextAnchor::BottomLeft | TextAnchor::BottomRight => 1.0,
            _ => 0.5,
        };
        (horizontal, vertical)
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
pub struct SymbolLayout {
    #[serde(default)]
    pub visibility: Visibility,
    symbol_placement: Option<Parameter<SymbolPlacement>>,
    symbol_spacing: Option<Parameter<f32>>,
    #[serde(default)]
    pub symbol_avoid_edges: bool,

    #[serde(default)]
    pub icon_allow_overlap: bool,
    #[serde(default)]
    pub icon_ignore_placement: bool,
    #[serde(default)]
    pub icon_optional: bool,
    #[serde(default)]
    pub icon_rotation_alignment: RotationAlignment,
    icon_size: Option<Parameter<f32>>,
    icon_image: Option<String>,
    icon_rotate: Option<Parameter<f32>>,
    icon_padding: Option<Parameter<f32>>,
    #[serde(default)]
    pub icon_keep_upright: bool,
    icon_offset: Option<Parameter<(f32, f32)>>,

    #[serde(default)]
    pub text_rotation_alignment: RotationAlignment,
    text_field: Option<String>,
    text_font: Option<Vec<String>>,
    text_size: Option<Parameter<f32>>,
    text_max_width: Option<Parameter<f32>>,
    text_line_height: Option<Parameter<f32>>,
    text_letter_spacing: Option<Parameter<f32>>,
    #[serde(default)]
    pub text_justify: TextJustify,
    text_anchor: Option<Parameter<TextAnchor>>,
    text_max_angle: Option<Parameter<f32>>,
    text_rotate: Option<Parameter<f32>>,
    text_padding: Option<Parameter<f32>>,
    text_keep_upright: Option<bool>,
    #[serde(default)]
    pub text_transform: TextTransform,
    text_offset: Option<Parameter<(f32, f32)>>,
    #[serde(default)]
    pub text_allow_overlap: bool,
    #[serde(default)]
    pub text_ignore_placement: bool,
    #[serde(default)]
    pub text_optional: bool,
}

impl SymbolLayout {
    pub fn symbol_placement(&self, zoom: f32) -> SymbolPlacement {
        get_parameter(self.symbol_placement.as_ref(), zoom).unwrap_or_default()
    }

    pub fn symbol_spacing(&self, zoom: f32) -> f32 {
        get_parameter(self.symbol_spacing.as_ref(), zoom).unwrap_or(250.0)
    }

    pub fn icon_size(&self, zoom: f32) -> f32 {
        get_parameter(self.icon_size.as_ref(), zoom).unwrap_or(1.0)
    }

    pub fn icon_rotate(&self, zoom: f32) -> f32 {
        get_parameter(self.icon_rotate.as_ref(), zoom).unwrap_or(0.0)
    }

    pub fn icon_padding(&self, zoom: f32) -> f32 {
        get_parameter(self.icon_padding.as_ref(), zoom).unwrap_or(2.0)
    }

    pub fn icon_offset(&self, zoom: f32) -> (f32, f32) {
        get_parameter(self.icon_offset.as_ref(), zoom).unwrap_or((0.0, 0.0))
    }

    pub fn has_icon(&self) -> bool {
        self.icon_image.is_some()
    }

    pub fn has_text(&self) -> bool {
        self.text_field.is_some()
    }

    pub fn text_font(&self) -> Vec<String> {
        self.text_font.clone().unwrap_or_else(|| {
            vec![
                "Open Sans Regular".to_string(),
                "Arial Unicode MS Regular".to_string(),
            ]
        })
    }

    /// The font stack key glyph requests are grouped by.
    pub fn font_stack(&self) -> String {
        self.text_font().join(",")
    }

    pub fn text_size(&self, zoom: f32) -> f32 {
        get_parameter(self.text_size.as_ref(), zoom).unwrap_or(16.0)
    }

    pub fn text_max_width(&self, zoom: f32) -> f32 {
        get_parameter(self.text_max_width.as_ref(), zoom).unwrap_or(10.0)
    }

    pub fn text_line_height(&self, zoom: f32) -> f32 {
        get_parameter(self.text_line_height.as_ref(), zoom).unwrap_or(1.2)
    }

    pub fn text_letter_spacing(&self, zoom: f32) -> f32 {
        get_parameter(self.text_letter_spacing.as_ref(), zoom).unwrap_or(0.0)
    }

    pub fn text_anchor(&self, zoom: f32) -> TextAnchor {
        get_parameter(self.text_anchor.as_ref(), zoom).unwrap_or_default()
    }

    pub fn text_max_angle(&self, zoom: f32) -> f32 {
        get_parameter(self.text_max_angle.as_ref(), zoom).unwrap_or(45.0)
    }

    pub fn text_rotate(&self, zoom: f32) -> f32 {
        get_parameter(self.text_rotate.as_ref(), zoom).unwrap_or(0.0)
    }

    pub fn text_padding(&self, zoom: f32) -> f32 {
        get_parameter(self.text_padding.as_ref(), zoom).unwrap_or(2.0)
    }

    pub fn text_keep_upright(&self) -> bool {
        self.text_keep_upright.unwrap_or(true)
    }

    pub fn text_offset(&self, zoom: f32) -> (f32, f32) {
        get_parameter(self.text_offset.as_ref(), zoom).unwrap_or((0.0, 0.0))
    }

    pub fn text_along_line(&self, zoom: f32) -> bool {
        along_line(self.text_rotation_alignment, self.symbol_placement(zoom))
    }

    pub fn icon_along_line(&self, zoom: f32) -> bool {
        along_line(self.icon_rotation_alignment, self.symbol_placement(zoom))
    }

    /// Labels of this layer may be drawn over each other.
    pub fn may_overlap(&self) -> bool {
        self.text_allow_overlap
            || self.icon_allow_overlap
            || self.text_ignore_placement
            || self.icon_ignore_placement
    }

    pub fn text(&self, feature: &VectorTileFeature<'_>) -> Option<Text> {
        let format = self.text_field.as_deref()?;
        let transform = self.text_transform;

        let mut text = Text::new();
        for c in resolve_tokens(format, |key| feature.property(key)).chars() {
            transform.transform(c, &mut text);
        }

        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.into())
        }
    }

    pub fn icon(&self, feature: &VectorTileFeature<'_>) -> Option<Text> {
        let format = self.icon_image.as_deref()?;
        let icon = resolve_tokens(format, |key| feature.property(key));
        (!icon.is_empty()).then_some(icon)
    }
}

fn along_line(alignment: RotationAlignment, placement: SymbolPlacement) -> bool {
    match alignment {
        RotationAlignment::Map => placement == SymbolPlacement::Line,
        RotationAlignment::Viewport => false,
        RotationAlignment::Auto => placement == SymbolPlacement::Line,
    }
}

/// Replaces `{key}` tokens with the matching property, missing properties
/// become empty.
pub fn resolve_tokens<'a, F>(format: &str, mut lookup: F) -> Text
where
    F: FnMut(&str) -> Option<Value<'a>>,
{
    use std::fmt::Write;

    let mut text = Text::new();
    let mut field_start = None;

    for (idx, c) in format.char_indices() {
        match (c, field_start) {
            ('{', None) => field_start = Some(idx + 1),
            ('}', Some(start)) => {
                if let Some(value) = lookup(&format[start..idx]) {
                    let _ = write!(text, "{}", value);
                }
                field_start = None;
            }
            (c, None) => text.push(c),
            _ => (),
        }
    }

    text
}

fn get_parameter<T: Copy + Interpolate>(param: Option<&'_ Parameter<T>>, zoom: f32) -> Option<T> {
    param.and_then(|p| p.eval(zoom))
}

#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
enum Parameter<T> {
    Constant(T),
    Function(Function<T>),
}

impl<T: Copy + Interpolate> Parameter<T> {
    fn eval(&self, zoom: f32) -> Option<T> {
        match self {
            Parameter::Constant(v) => Some(*v),
            Parameter::Function(f) => f.eval(zoom),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
struct Function<T> {
    base: Option<f32>,
    stops: SmallVec<[(f32, T); 8]>,
}

impl<T: Copy + Interpolate> Function<T> {
    fn eval(&self, zoom: f32) -> Option<T> {
        let first = self.stops.first()?;
        let last = self.stops.last()?;

        if zoom <= first.0 {
            return Some(first.1);
        }
        if zoom >= last.0 {
            return Some(last.1);
        }

        let base = self.base.unwrap_or(1.0);
        self.stops
            .windows(2)
            .find(|w| zoom >= w[0].0 && zoom <= w[1].0)
            .map(|w| {
                let factor = interpolation_factor(zoom, base, w[0].0, w[1].0);
                w[0].1.interpolate(factor, w[1].1)
            })
    }
}

fn interpolation_factor(zoom: f32, base: f32, lower: f32, upper: f32) -> f32 {
    let difference = upper - lower;
    let progress = zoom - lower;

    if difference == 0.0 {
        0.0
    } else if base == 1.0 {
        progress / difference
    } else {
        (base.powf(progress) - 1.0) / (base.powf(difference) - 1.0)
    }
}

trait Interpolate {
    fn interpolate(&self, factor: f32, other: Self) -> Self;
}

impl Interpolate for f32 {
    fn interpolate(&self, factor: f32, other: Self) -> Self {
        (factor * other) + ((1.0 - factor) * self)
    }
}

impl<A: Interpolate, B: Interpolate> Interpolate for (A, B) {
    fn interpolate(&self, factor: f32, other: Self) -> Self {
        (
            self.0.interpolate(factor, other.0),
            self.1.interpolate(factor, other.1),
        )
    }
}

/// Values that step between stops instead of blending.
trait EnumParameter: Copy {}

impl EnumParameter for bool {}

impl<T: EnumParameter> Interpolate for T {
    fn interpolate(&self, _factor: f32, _other: Self) -> Self {
        *self
    }
}
