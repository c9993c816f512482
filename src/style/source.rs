use std::collections::BTreeMap;

use serde::Deserialize;

use crate::TileId;

/// The style's sources keyed by name.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(transparent)]
pub struct SourceCollection {
    sources: BTreeMap<String, Source>,
}

impl SourceCollection {
    pub fn get(&self, name: &str) -> Option<&Source> {
        self.sources.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, source: Source) {
        self.sources.insert(name.into(), source);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Source)> {
        self.sources.iter().map(|(name, source)| (name.as_str(), source))
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Source {
    #[serde(rename = "type")]
    pub kind: SourceType,
    #[serde(default)]
    pub tiles: Vec<String>,
    pub minzoom: Option<u8>,
    pub maxzoom: Option<u8>,
    pub attribution: Option<String>,
}

impl Source {
    /// The tile url for `tile`, built from the first template with `{z}`,
    /// `{x}` and `{y}` substituted.
    pub fn tile_url(&self, tile: TileId) -> Option<String> {
        let template = self.tiles.first()?;
        Some(
            template
                .replace("{z}", &tile.zoom.to_string())
                .replace("{x}", &tile.column.to_string())
                .replace("{y}", &tile.row.to_string()),
        )
    }

    /// The zoom tiles are fetched at when rendering `zoom`, capped at the
    /// source's maximum.
    pub fn source_zoom(&self, zoom: u8) -> u8 {
        zoom.min(self.maxzoom.unwrap_or(22))
    }
}

#[derive(Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SourceType {
    Vector,
    Raster,
    RasterDem,
    Geojson,
    Video,
    Image,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tile_url_substitutes_coordinates() {
        let sources: SourceCollection = serde_json::from_value(json!({
            "osm": {
                "type": "vector",
                "tiles": ["mbtiles://planet.mbtiles/{z}/{x}/{y}"],
                "maxzoom": 14
            }
        }))
        .unwrap();

        let source = sources.get("osm").unwrap();
        assert_eq!(source.kind, SourceType::Vector);
        assert_eq!(
            source.tile_url(TileId::new(3, 5, 2)).as_deref(),
            Some("mbtiles://planet.mbtiles/3/5/2")
        );
        assert_eq!(source.source_zoom(16), 14);
        assert!(sources.get("missing").is_none());
    }
}
