//! Glyph and icon dependencies of symbol layout.
//!
//! Symbol buckets only need metrics and atlas positions, never pixels. A
//! [`DependencyProvider`] answers both kinds of request asynchronously; the
//! provider shipped here measures the bundled Noto Sans faces with fontdue
//! and reads icon positions from a sprite index.

use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex},
};

use ahash::AHashMap;
use fontdue::Font;
use futures::{FutureExt, future::BoxFuture};
use serde::Deserialize;

use crate::{Error, Result};

/// Glyphs are measured at this size, shaping scales from it.
pub const ONE_EM: f32 = 24.0;

/// Padding around every glyph bitmap in the atlas.
pub const GLYPH_BUFFER: i32 = 3;

const ATLAS_WIDTH: u16 = 1024;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: u16,
    pub y: u16,
    pub w: u16,
    pub h: u16,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Glyph {
    pub id: u32,
    pub width: u32,
    pub height: u32,
    pub left: i32,
    /// Top edge relative to the top of the em box.
    pub top: i32,
    pub advance: f32,
    /// Atlas position including the buffer, `None` for blank glyphs.
    pub rect: Option<Rect>,
}

pub type GlyphStack = AHashMap<u32, Glyph>;
pub type GlyphStacks = AHashMap<String, GlyphStack>;

/// Codepoints needed per font stack.
pub type GlyphRequests = AHashMap<String, BTreeSet<u32>>;

#[derive(Deserialize, Debug, Copy, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IconImage {
    pub width: u16,
    pub height: u16,
    pub x: u16,
    pub y: u16,
    #[serde(default = "default_pixel_ratio")]
    pub pixel_ratio: f32,
    #[serde(default)]
    pub sdf: bool,
}

fn default_pixel_ratio() -> f32 {
    1.0
}

impl IconImage {
    pub fn rect(&self) -> Rect {
        Rect {
            x: self.x,
            y: self.y,
            w: self.width,
            h: self.height,
        }
    }
}

pub type IconImages = AHashMap<String, IconImage>;

/// Source of the glyph metrics and icon images symbol layout depends on.
pub trait DependencyProvider: Send + Sync {
    fn glyphs(&self, requests: GlyphRequests) -> BoxFuture<'static, Result<GlyphStacks>>;

    fn icons(&self, names: Vec<String>) -> BoxFuture<'static, Result<IconImages>>;
}

/// Icon positions keyed by name, in the JSON layout of sprite sheets.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(transparent)]
pub struct SpriteIndex {
    icons: AHashMap<String, IconImage>,
}

impl SpriteIndex {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Dependency(e.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<&IconImage> {
        self.icons.get(name)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
struct FontId(u8);

struct FontCollection {
    fonts: Vec<Font>,
}

impl FontCollection {
    fn new() -> Result<Self> {
        let fonts = [notosans::REGULAR_TTF, notosans::BOLD_TTF, notosans::ITALIC_TTF]
            .into_iter()
            .map(|data| {
                Font::from_bytes(data, Default::default())
                    .map_err(|e| Error::Dependency(e.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(FontCollection { fonts })
    }

    /// Picks a face for a comma separated font stack by the first name that
    /// hints at a weight or slant.
    fn font_id(&self, stack: &str) -> FontId {
        for name in stack.split(',') {
            let name = name.trim();
            if name.contains("Bold") {
                return FontId(1);
            } else if name.contains("Italic") {
                return FontId(2);
            } else if name.contains("Regular") || name == "Noto Sans" {
                return FontId(0);
            }
        }

        crate::warn_once(format!("no matching font face for '{stack}', using Noto Sans"));
        FontId(0)
    }

    fn font(&self, FontId(id): FontId) -> Option<&Font> {
        self.fonts.get(id as usize)
    }
}

/// Packs rectangles left to right in rows of the tallest item so far.
#[derive(Debug, Default)]
struct ShelfPacker {
    x: u16,
    y: u16,
    shelf_height: u16,
}

impl ShelfPacker {
    fn pack(&mut self, w: u16, h: u16) -> Rect {
        if self.x + w > ATLAS_WIDTH {
            self.x = 0;
            self.y += self.shelf_height;
            self.shelf_height = 0;
        }

        let rect = Rect {
            x: self.x,
            y: self.y,
            w,
            h,
        };
        self.x += w;
        self.shelf_height = self.shelf_height.max(h);
        rect
    }
}

#[derive(Default)]
struct GlyphAtlas {
    packer: ShelfPacker,
    glyphs: AHashMap<(FontId, u32), Glyph>,
}

/// Measures glyphs with the bundled fonts and serves icons from a sprite
/// index. Atlas positions are stable across requests.
pub struct LocalDependencies {
    fonts: FontCollection,
    sprites: SpriteIndex,
    atlas: Mutex<GlyphAtlas>,
}

impl LocalDependencies {
    pub fn new(sprites: SpriteIndex) -> Result<Arc<Self>> {
        Ok(Arc::new(LocalDependencies {
            fonts: FontCollection::new()?,
            sprites,
            atlas: Mutex::new(GlyphAtlas::default()),
        }))
    }

    fn glyph(&self, atlas: &mut GlyphAtlas, font_id: FontId, codepoint: u32) -> Option<Glyph> {
        if let Some(glyph) = atlas.glyphs.get(&(font_id, codepoint)) {
            return Some(*glyph);
        }

        let c = char::from_u32(codepoint)?;
        let font = self.fonts.font(font_id)?;
        let metrics = font.metrics(c, ONE_EM);

        let rect = (metrics.width > 0 && metrics.height > 0).then(|| {
            atlas.packer.pack(
                metrics.width as u16 + 2 * GLYPH_BUFFER as u16,
                metrics.height as u16 + 2 * GLYPH_BUFFER as u16,
            )
        });

        let glyph = Glyph {
            id: codepoint,
            width: metrics.width as u32,
            height: metrics.height as u32,
            left: metrics.xmin,
            top: metrics.ymin + metrics.height as i32 - ONE_EM as i32,
            advance: metrics.advance_width.round(),
            rect,
        };

        atlas.glyphs.insert((font_id, codepoint), glyph);
        Some(glyph)
    }
}

impl DependencyProvider for LocalDependencies {
    fn glyphs(&self, requests: GlyphRequests) -> BoxFuture<'static, Result<GlyphStacks>> {
        let result = self
            .atlas
            .lock()
            .map_err(|_| Error::Dependency("glyph atlas poisoned".into()))
            .map(|mut atlas| {
                requests
                    .into_iter()
                    .map(|(stack, codepoints)| {
                        let font_id = self.fonts.font_id(&stack);
                        let glyphs = codepoints
                            .into_iter()
                            .filter_map(|c| self.glyph(&mut atlas, font_id, c).map(|g| (c, g)))
                            .collect();
                        (stack, glyphs)
                    })
                    .collect()
            });

        futures::future::ready(result).boxed()
    }

    fn icons(&self, names: Vec<String>) -> BoxFuture<'static, Result<IconImages>> {
        let icons = names
            .into_iter()
            .filter_map(|name| {
                let icon = self.sprites.get(&name).copied();
                if icon.is_none() {
                    crate::warn_once(format!("icon '{name}' not found in sprite"));
                }
                icon.map(|icon| (name, icon))
            })
            .collect();

        futures::future::ready(Ok(icons)).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    #[test]
    fn shelf_packer_wraps_rows() {
        let mut packer = ShelfPacker::default();
        assert_eq!(packer.pack(1000, 10), Rect { x: 0, y: 0, w: 1000, h: 10 });
        assert_eq!(packer.pack(24, 8), Rect { x: 1000, y: 0, w: 24, h: 8 });
        assert_eq!(packer.pack(30, 12), Rect { x: 0, y: 10, w: 30, h: 12 });
        assert_eq!(packer.pack(20, 5), Rect { x: 30, y: 10, w: 20, h: 5 });
    }

    #[test]
    fn sprite_index_reads_sprite_json() {
        let sprites = SpriteIndex::from_json(
            r#"{ "airport": { "width": 16, "height": 18, "x": 32, "y": 0, "pixelRatio": 2 } }"#,
        )
        .unwrap();
        let airport = sprites.get("airport").unwrap();
        assert_eq!(airport.rect(), Rect { x: 32, y: 0, w: 16, h: 18 });
        assert_eq!(airport.pixel_ratio, 2.0);
        assert!(!airport.sdf);
    }

    #[test]
    fn local_glyphs_have_metrics_and_stable_rects() {
        let deps = LocalDependencies::new(SpriteIndex::default()).unwrap();
        let mut requests = GlyphRequests::new();
        requests.insert("Noto Sans Regular".into(), ['A' as u32, ' ' as u32].into());

        let stacks = block_on(deps.glyphs(requests.clone())).unwrap();
        let stack = &stacks["Noto Sans Regular"];
        let a = stack[&('A' as u32)];
        assert!(a.advance > 0.0);
        assert!(a.rect.is_some());
        assert_eq!(stack[&(' ' as u32)].rect, None);

        let again = block_on(deps.glyphs(requests)).unwrap();
        assert_eq!(again["Noto Sans Regular"][&('A' as u32)].rect, a.rect);

        let icons = block_on(deps.icons(vec!["missing".into()])).unwrap();
        assert!(icons.is_empty());
    }
}
