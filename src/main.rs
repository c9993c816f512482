use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, anyhow, bail};
use clap::Parser;
use futures::executor::block_on;

use tile_worker::{
    TileId,
    bucket::SerializedBucket,
    geojson::GeoJsonOptions,
    glyphs::{LocalDependencies, SpriteIndex},
    style::{Style, source::SourceType},
    tile_source::TileSourceCollection,
    worker::{GeoJsonData, Request, Response, WorkerPool},
    worker_tile::{TileResult, WorkerTileParameters},
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to a MapLibre style document
    style: PathBuf,
    /// Tile to lay out, as z/x/y
    #[arg(value_parser = parse_tile)]
    tile: TileId,
    /// Style source to read, defaults to the first vector source
    #[arg(long)]
    source: Option<String>,
    /// Directory that mbtiles:// urls are resolved against
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,
    /// Tile the features of a GeoJSON file for the source instead of
    /// fetching them
    #[arg(long)]
    geojson: Option<PathBuf>,
    /// Sprite index describing icon positions
    #[arg(long)]
    sprite: Option<PathBuf>,
    /// Zoom the tile is displayed at, defaults to the tile's zoom
    #[arg(long)]
    zoom: Option<f32>,
    /// Map rotation in radians
    #[arg(long, default_value_t = 0.0)]
    angle: f32,
    /// Map tilt in radians
    #[arg(long, default_value_t = 0.0)]
    pitch: f32,
    #[arg(long)]
    show_collision_boxes: bool,
    /// Number of worker threads
    #[arg(long, default_value_t = 1)]
    workers: usize,
}

fn parse_tile(value: &str) -> anyhow::Result<TileId> {
    let parts: Vec<&str> = value.split('/').collect();
    let [zoom, column, row] = parts.as_slice() else {
        bail!("expected z/x/y, got '{value}'");
    };

    let tile = TileId::new(zoom.parse()?, column.parse()?, row.parse()?);
    if !tile.is_valid() {
        bail!("tile {tile} is outside the tile pyramid");
    }
    Ok(tile)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let style_json = std::fs::read_to_string(&args.style)
        .with_context(|| format!("reading style {}", args.style.display()))?;
    let style = Arc::new(Style::from_json(&style_json)?);

    let sprites = match args.sprite.as_ref() {
        Some(path) => SpriteIndex::from_json(
            &std::fs::read_to_string(path).with_context(|| format!("reading sprite {}", path.display()))?,
        )?,
        None => SpriteIndex::default(),
    };
    let dependencies = LocalDependencies::new(sprites)?;
    let fetcher = Arc::new(TileSourceCollection::new(&args.data_dir));

    let pool = WorkerPool::new(args.workers, style.clone(), fetcher, dependencies)?;

    let source = match args.source.clone() {
        Some(source) => source,
        None => style
            .sources
            .iter()
            .find(|(_, source)| source.kind == SourceType::Vector)
            .map(|(name, _)| name.to_string())
            .ok_or_else(|| anyhow!("style has no vector source"))?,
    };

    let zoom = args.zoom.unwrap_or(args.tile.zoom()).max(args.tile.zoom());
    let params = WorkerTileParameters {
        uid: 0,
        source: source.clone(),
        tile: args.tile,
        zoom,
        overscaling: 2f32.powf(zoom - args.tile.zoom()),
        angle: args.angle,
        pitch: args.pitch,
        show_collision_boxes: args.show_collision_boxes,
    };

    let request = match args.geojson.as_ref() {
        Some(path) => {
            let data = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            let parsed = block_on(pool.send(Request::ParseGeoJson {
                source: source.clone(),
                data: GeoJsonData::Inline(data),
                options: GeoJsonOptions::default(),
            }))?;
            if let Response::GeoJsonParsed { features } = parsed {
                log::info!("indexed {features} geojson features");
            }
            Request::LoadGeoJsonTile { params }
        }
        None => {
            let url = style
                .sources
                .get(&source)
                .and_then(|s| s.tile_url(args.tile))
                .ok_or_else(|| anyhow!("source '{source}' has no tile url"))?;
            log::info!("loading {url}");
            Request::LoadTile { params, url }
        }
    };

    match block_on(pool.send(request))? {
        Response::Tile(Some(result)) => print_summary(args.tile, &result),
        Response::Tile(None) => println!("tile {} has no data", args.tile),
        other => bail!("unexpected worker response {other:?}"),
    }

    Ok(())
}

fn print_summary(tile: TileId, result: &TileResult) {
    println!("tile {tile}: {} buckets", result.buckets.len());
    for bucket in result.buckets.iter() {
        print_bucket(bucket);
    }

    println!(
        "feature index: {} features, {} grid cells",
        result.feature_index.feature_index_array.length,
        result.feature_index.grid.len()
    );
    println!(
        "collision tile: {} boxes",
        result.collision_tile.collision_box_array.length
    );

    let bytes: usize = result.transferables().iter().map(|b| b.len()).sum();
    println!("{bytes} bytes in {} buffers", result.transferables().len());
}

fn print_bucket(bucket: &SerializedBucket) {
    println!("  {} ({})", bucket.layer_id, bucket.child_layer_ids.join(", "));
    for (program, groups) in bucket.program_groups.iter() {
        let vertices: usize = groups.iter().map(|g| g.layout_vertex_array.length).sum();
        let elements: usize = groups.iter().map(|g| g.element_array.length).sum();
        println!(
            "    {program}: {} groups, {vertices} vertices, {elements} elements",
            groups.len()
        );
    }
}
