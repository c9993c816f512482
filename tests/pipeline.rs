use std::sync::Arc;

use futures::executor::block_on;
use pretty_assertions::assert_eq;
use prost::Message;
use serde_json::json;

use tile_worker::{
    TileId,
    bucket::SerializedBucket,
    feature_index::QueryParameters,
    glyphs::{DependencyProvider, LocalDependencies, SpriteIndex},
    grid_index::GridIndex,
    proto::{self, GeometryEncoder, LayerBuilder},
    style::{LayerFamily, Style},
    worker_tile::{TileResult, WorkerTile, WorkerTileParameters},
};

fn families(layers: serde_json::Value) -> Arc<[Arc<LayerFamily>]> {
    let style = Style::from_json(&json!({ "layers": layers }).to_string()).unwrap();
    style.families().into_iter().map(Arc::new).collect()
}

fn dependencies() -> Arc<dyn DependencyProvider> {
    LocalDependencies::new(SpriteIndex::default()).unwrap()
}

fn encode(layers: Vec<proto::Layer>) -> Vec<u8> {
    proto::Tile { layers }.encode_to_vec()
}

fn params() -> WorkerTileParameters {
    WorkerTileParameters {
        uid: 1,
        source: "test".into(),
        tile: TileId::new(10, 300, 400),
        zoom: 10.0,
        ..Default::default()
    }
}

fn process(data: Vec<u8>, layers: serde_json::Value) -> TileResult {
    let parsed = block_on(WorkerTile::parse(params(), data, families(layers), dependencies())).unwrap();
    WorkerTile::new(params()).finish(parsed)
}

fn bucket<'a>(result: &'a TileResult, id: &str) -> &'a SerializedBucket {
    result.buckets.iter().find(|b| b.layer_id == id).unwrap()
}

fn counts(bucket: &SerializedBucket, program: &str) -> (usize, usize) {
    let groups = bucket.program_group(program).unwrap();
    (
        groups.iter().map(|g| g.layout_vertex_array.length).sum(),
        groups.iter().map(|g| g.element_array.length).sum(),
    )
}

#[test]
fn fill_triangle() {
    let mut layer = LayerBuilder::new("shapes", 8192);
    layer.add_feature(
        Some(1),
        proto::GeomType::Polygon,
        GeometryEncoder::new().ring(&[[0, 0], [100, 0], [100, 100]]).finish(),
        [("kind", proto::Value::string("triangle"))],
    );

    let result = process(
        encode(vec![layer.finish()]),
        json!([{ "id": "shapes", "type": "fill", "source": "test", "source-layer": "shapes" }]),
    );

    let fill = bucket(&result, "shapes");
    assert_eq!(counts(fill, "fill"), (4, 1));
    let outline = fill.program_group("fill").unwrap()[0].element_array2.as_ref().unwrap();
    assert_eq!(outline.length, 3);
    assert_eq!(fill.program_group("fill").unwrap()[0].paint_vertex_arrays[0].0, "shapes");
}

#[test]
fn round_joins_outweigh_bevels() {
    let mut layer = LayerBuilder::new("roads", 8192);
    layer.add_feature(
        None,
        proto::GeomType::Linestring,
        GeometryEncoder::new().line(&[[0, 0], [1000, 0], [1000, 1000]]).finish(),
        Vec::<(&str, proto::Value)>::new(),
    );
    let data = encode(vec![layer.finish()]);

    let result = process(
        data,
        json!([
            { "id": "round", "type": "line", "source": "test", "source-layer": "roads",
              "layout": { "line-join": "round" } },
            { "id": "bevel", "type": "line", "source": "test", "source-layer": "roads",
              "layout": { "line-join": "bevel" } }
        ]),
    );

    let (_, round) = counts(bucket(&result, "round"), "line");
    let (_, bevel) = counts(bucket(&result, "bevel"), "line");
    assert!(round > bevel, "round {round} bevel {bevel}");
}

#[test]
fn coincident_labels_draw_once() {
    let mut layer = LayerBuilder::new("places", 8192);
    for id in 0..2 {
        layer.add_feature(
            Some(id),
            proto::GeomType::Point,
            GeometryEncoder::new().points(&[[4096, 4096]]).finish(),
            [("name", proto::Value::string("ab"))],
        );
    }
    let data = encode(vec![layer.finish()]);

    let label = |id: &str, overlap: bool| {
        json!({ "id": id, "type": "symbol", "source": "test", "source-layer": "places",
                "layout": { "text-field": "{name}", "text-allow-overlap": overlap } })
    };

    let result = process(data.clone(), json!([label("labels", false)]));
    assert_eq!(counts(bucket(&result, "labels"), "glyph"), (8, 4));

    let result = process(data, json!([label("labels", true)]));
    assert_eq!(counts(bucket(&result, "labels"), "glyph"), (16, 8));
}

#[test]
fn later_layers_win_collisions() {
    let mut layer = LayerBuilder::new("places", 8192);
    layer.add_feature(
        Some(1),
        proto::GeomType::Point,
        GeometryEncoder::new().points(&[[4096, 4096]]).finish(),
        [("name", proto::Value::string("ab"))],
    );
    let data = encode(vec![layer.finish()]);

    let label = |id: &str| {
        json!({ "id": id, "type": "symbol", "source": "test", "source-layer": "places",
                "layout": { "text-field": "{name}" } })
    };
    let result = process(data, json!([label("below"), label("above")]));

    let ids: Vec<_> = result.buckets.iter().map(|b| b.layer_id.as_str()).collect();
    assert_eq!(ids, ["above"]);
}

#[test]
fn rendered_features_can_be_queried() {
    let mut layer = LayerBuilder::new("shapes", 8192);
    layer.add_feature(
        Some(9),
        proto::GeomType::Polygon,
        GeometryEncoder::new()
            .ring(&[[1000, 1000], [3000, 1000], [3000, 3000], [1000, 3000]])
            .finish(),
        [("name", proto::Value::string("square"))],
    );
    let data = encode(vec![layer.finish()]);
    let layers = json!([{ "id": "shapes", "type": "fill", "source": "test", "source-layer": "shapes" }]);
    let style_layers: Vec<_> = families(layers.clone()).iter().map(|f| f.parent.clone()).collect();

    let result = process(data, layers);
    let index = result.query_index().unwrap();

    let query = |x: f32, y: f32| QueryParameters {
        geometry: vec![vec![lyon::math::point(x, y)]],
        zoom: 10.0,
        ..Default::default()
    };

    let hits = index.query(&query(2000.0, 2000.0), &style_layers).unwrap();
    let shapes = &hits["shapes"];
    assert_eq!(shapes.len(), 1);
    assert_eq!(shapes[0].id, Some(9));
    assert_eq!(shapes[0].properties["name"], json!("square"));

    assert!(index.query(&query(5000.0, 5000.0), &style_layers).unwrap().is_empty());
}

#[test]
fn visible_labels_can_be_queried() {
    let mut layer = LayerBuilder::new("places", 8192);
    layer.add_feature(
        Some(4),
        proto::GeomType::Point,
        GeometryEncoder::new().points(&[[4096, 4096]]).finish(),
        [("name", proto::Value::string("ab"))],
    );
    let data = encode(vec![layer.finish()]);
    let layers = json!([{ "id": "labels", "type": "symbol", "source": "test", "source-layer": "places",
                          "layout": { "text-field": "{name}" } }]);
    let style_layers: Vec<_> = families(layers.clone()).iter().map(|f| f.parent.clone()).collect();

    let result = process(data, layers);
    assert_eq!(result.feature_index.feature_index_array.length, 0);
    let index = result.query_index().unwrap();

    let query = |x: f32, y: f32| QueryParameters {
        geometry: vec![vec![lyon::math::point(x, y)]],
        zoom: 10.0,
        ..Default::default()
    };

    let hits = index.query(&query(4096.0, 4096.0), &style_layers).unwrap();
    let labels = &hits["labels"];
    assert_eq!(labels.len(), 1);
    assert_eq!(labels[0].id, Some(4));
    assert_eq!(labels[0].properties["name"], json!("ab"));

    assert!(index.query(&query(200.0, 200.0), &style_layers).unwrap().is_empty());
}

#[test]
fn grid_index_survives_serialization() {
    let mut grid = GridIndex::new(100, 10, 0);
    grid.insert(0, [4, 10, 12, 12]);
    grid.insert(1, [10, 4, 12, 12]);
    grid.insert(2, [70, 70, 80, 80]);

    let mut hits = grid.query([0, 0, 20, 20]);
    hits.sort();
    assert_eq!(hits, vec![0, 1]);

    let restored = GridIndex::from_serialized(&grid.serialize()).unwrap();
    let mut restored_hits = restored.query([0, 0, 20, 20]);
    restored_hits.sort();
    assert_eq!(restored_hits, hits);
    assert_eq!(restored.query([75, 75, 76, 76]), vec![2]);
    assert!(restored.query([40, 40, 50, 50]).is_empty());
}
