//! Background workers answering tile requests.
//!
//! Each [`Worker`] owns a thread running a local executor. Requests arrive
//! over a channel and every tile load becomes a task on that executor, so a
//! worker keeps many tiles in flight while each tile's state is only touched
//! from its own thread. Loads can be aborted at any await point, dropping the
//! pending fetch and dependency futures with them.

use std::{cell::RefCell, future::Future, rc::Rc, sync::Arc, thread::JoinHandle};

use ahash::AHashMap;
use futures::{
    FutureExt, StreamExt,
    channel::{mpsc, oneshot},
    executor::{LocalPool, LocalSpawner},
    future::{self, AbortHandle, Abortable, BoxFuture, LocalBoxFuture},
    task::LocalSpawnExt,
};

use crate::{
    Error, Result,
    geojson::{GeoJsonIndex, GeoJsonOptions},
    glyphs::DependencyProvider,
    style::{LayerFamily, Style},
    tile_source::TileFetcher,
    worker_tile::{ParsedTile, PlacementResult, TileResult, TileState, WorkerTile, WorkerTileParameters},
};

#[derive(Debug, Clone)]
pub enum GeoJsonData {
    Url(String),
    Inline(String),
}

#[derive(Debug, Clone)]
pub enum Request {
    LoadTile {
        params: WorkerTileParameters,
        url: String,
    },
    /// Parses the already fetched bytes of a loaded tile again.
    ReloadTile {
        source: String,
        uid: u64,
    },
    /// Cancels a load in flight. Finished tiles are left alone.
    AbortTile {
        source: String,
        uid: u64,
    },
    RemoveTile {
        source: String,
        uid: u64,
    },
    RedoPlacement {
        source: String,
        uid: u64,
        angle: f32,
        pitch: f32,
        show_collision_boxes: bool,
    },
    ParseGeoJson {
        source: String,
        data: GeoJsonData,
        options: GeoJsonOptions,
    },
    LoadGeoJsonTile {
        params: WorkerTileParameters,
    },
    SetStyle(Arc<Style>),
}

impl Request {
    /// The tile a request is about, `None` for requests every worker needs.
    pub fn tile_uid(&self) -> Option<u64> {
        match self {
            Request::LoadTile { params, .. } | Request::LoadGeoJsonTile { params } => Some(params.uid),
            Request::ReloadTile { uid, .. }
            | Request::AbortTile { uid, .. }
            | Request::RemoveTile { uid, .. }
            | Request::RedoPlacement { uid, .. } => Some(*uid),
            Request::ParseGeoJson { .. } | Request::SetStyle(_) => None,
        }
    }
}

#[derive(Debug)]
pub enum Response {
    /// A parsed tile, `None` when the source has no data for it.
    Tile(Option<TileResult>),
    /// New label placement, `None` when the tile is unknown or the request
    /// was deferred until parsing finishes.
    Placement(Option<PlacementResult>),
    GeoJsonParsed {
        features: usize,
    },
    /// A reload replaced by a newer reload of the same tile.
    Superseded,
    Done,
}

impl Response {
    /// Buffers whose ownership moves to the receiver.
    pub fn transferables(&self) -> Vec<&[u8]> {
        match self {
            Response::Tile(Some(result)) => result.transferables(),
            Response::Placement(Some(result)) => result.transferables(),
            _ => Vec::new(),
        }
    }
}

type Reply = oneshot::Sender<Result<Response>>;
type TileKey = (String, u64);

struct Envelope {
    request: Request,
    reply: Reply,
}

pub struct Worker {
    id: usize,
    sender: mpsc::UnboundedSender<Envelope>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn spawn(
        id: usize,
        style: Arc<Style>,
        fetcher: Arc<dyn TileFetcher>,
        dependencies: Arc<dyn DependencyProvider>,
    ) -> Result<Self> {
        let (sender, receiver) = mpsc::unbounded();

        let handle = std::thread::Builder::new()
            .name(format!("tile-worker-{id}"))
            .spawn(move || WorkerState::new(&style, fetcher, dependencies).run(receiver))?;

        Ok(Worker {
            id,
            sender,
            handle: Some(handle),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Queues `request`; the returned future resolves with the worker's
    /// answer. Requests are handled in the order they were sent.
    pub fn send(&self, request: Request) -> impl Future<Output = Result<Response>> + Send + 'static {
        let (reply, response) = oneshot::channel();
        let queued = self.sender.unbounded_send(Envelope { request, reply }).is_ok();

        async move {
            if !queued {
                return Err(Error::Aborted);
            }
            response.await.map_err(|_| Error::Aborted)?
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.sender.close_channel();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("tile worker {} panicked", self.id);
            }
        }
    }
}

struct TileEntry {
    tile: WorkerTile,
    abort: Option<AbortHandle>,
    pending_reload: Option<Reply>,
}

impl TileEntry {
    fn new(params: WorkerTileParameters) -> Self {
        TileEntry {
            tile: WorkerTile::new(params),
            abort: None,
            pending_reload: None,
        }
    }

    fn cancel(self) {
        if let Some(abort) = self.abort {
            abort.abort();
        }
        if let Some(reply) = self.pending_reload {
            let _ = reply.send(Err(Error::Aborted));
        }
    }
}

struct WorkerState {
    families: Arc<[Arc<LayerFamily>]>,
    fetcher: Arc<dyn TileFetcher>,
    dependencies: Arc<dyn DependencyProvider>,
    tiles: AHashMap<TileKey, TileEntry>,
    geojson: AHashMap<String, Rc<GeoJsonIndex>>,
}

type Shared = Rc<RefCell<WorkerState>>;

fn families(style: &Style) -> Arc<[Arc<LayerFamily>]> {
    style.families().into_iter().map(Arc::new).collect()
}

impl WorkerState {
    fn new(style: &Style, fetcher: Arc<dyn TileFetcher>, dependencies: Arc<dyn DependencyProvider>) -> Self {
        WorkerState {
            families: families(style),
            fetcher,
            dependencies,
            tiles: AHashMap::new(),
            geojson: AHashMap::new(),
        }
    }

    fn run(self, mut receiver: mpsc::UnboundedReceiver<Envelope>) {
        let mut pool = LocalPool::new();
        let spawner = pool.spawner();
        let state = Rc::new(RefCell::new(self));

        pool.run_until(async move {
            while let Some(Envelope { request, reply }) = receiver.next().await {
                handle(&state, &spawner, request, reply);
            }
        });

        log::debug!("tile worker channel closed");
    }
}

fn handle(state: &Shared, spawner: &LocalSpawner, request: Request, reply: Reply) {
    let response = match request {
        Request::LoadTile { params, url } => {
            let fetcher = state.borrow().fetcher.clone();
            let data = async move { fetcher.fetch(&url).await }.boxed_local();
            load(state, spawner, params, data, reply);
            return;
        }
        Request::LoadGeoJsonTile { params } => {
            let data = state
                .borrow()
                .geojson
                .get(&params.source)
                .and_then(|index| index.tile(params.tile));

            let Some(data) = data else {
                log::debug!("no geojson data for tile {} of '{}'", params.tile, params.source);
                let _ = reply.send(Ok(Response::Tile(None)));
                return;
            };
            load(state, spawner, params, future::ready(Ok(Some(data))).boxed_local(), reply);
            return;
        }
        Request::ReloadTile { source, uid } => {
            reload(state, spawner, (source, uid), reply);
            return;
        }
        Request::ParseGeoJson { source, data, options } => {
            parse_geojson(state, spawner, source, data, options, reply);
            return;
        }
        Request::AbortTile { source, uid } => {
            let mut state = state.borrow_mut();
            let key = (source, uid);
            if state.tiles.get(&key).is_some_and(|e| e.tile.state() == TileState::Parsing) {
                if let Some(entry) = state.tiles.remove(&key) {
                    entry.cancel();
                }
            }
            Ok(Response::Done)
        }
        Request::RemoveTile { source, uid } => {
            if let Some(entry) = state.borrow_mut().tiles.remove(&(source, uid)) {
                entry.cancel();
            }
            Ok(Response::Done)
        }
        Request::RedoPlacement {
            source,
            uid,
            angle,
            pitch,
            show_collision_boxes,
        } => {
            let placement = state
                .borrow_mut()
                .tiles
                .get_mut(&(source, uid))
                .and_then(|entry| entry.tile.redo_placement(angle, pitch, show_collision_boxes));
            Ok(Response::Placement(placement))
        }
        Request::SetStyle(style) => {
            state.borrow_mut().families = families(&style);
            Ok(Response::Done)
        }
    };

    let _ = reply.send(response);
}

/// Starts a fresh tile, replacing and cancelling any earlier load of the
/// same tile.
fn load(
    state: &Shared,
    spawner: &LocalSpawner,
    params: WorkerTileParameters,
    data: LocalBoxFuture<'static, Result<Option<Vec<u8>>>>,
    reply: Reply,
) {
    let key = (params.source.clone(), params.uid);
    let previous = state
        .borrow_mut()
        .tiles
        .insert(key.clone(), TileEntry::new(params.clone()));
    if let Some(previous) = previous {
        previous.cancel();
    }

    start_parse(state, spawner, key, params, data, reply);
}

fn reload(state: &Shared, spawner: &LocalSpawner, key: TileKey, reply: Reply) {
    let mut worker = state.borrow_mut();
    let Some(entry) = worker.tiles.get_mut(&key) else {
        drop(worker);
        let _ = reply.send(Ok(Response::Tile(None)));
        return;
    };

    if entry.tile.state() == TileState::Parsing {
        if let Some(superseded) = entry.pending_reload.replace(reply) {
            let _ = superseded.send(Ok(Response::Superseded));
        }
        return;
    }

    let data = entry.tile.raw_tile_data().map(<[u8]>::to_vec);
    let params = entry.tile.params.clone();
    drop(worker);

    start_parse(state, spawner, key, params, future::ready(Ok(data)).boxed_local(), reply);
}

fn start_parse(
    state: &Shared,
    spawner: &LocalSpawner,
    key: TileKey,
    params: WorkerTileParameters,
    data: LocalBoxFuture<'static, Result<Option<Vec<u8>>>>,
    reply: Reply,
) {
    let (abort, registration) = AbortHandle::new_pair();
    let (families, dependencies) = {
        let mut state = state.borrow_mut();
        if let Some(entry) = state.tiles.get_mut(&key) {
            entry.tile.restart();
            entry.abort = Some(abort);
        }
        (state.families.clone(), state.dependencies.clone())
    };

    let parse = Abortable::new(
        async move {
            let Some(data) = data.await? else {
                return Ok(None);
            };
            WorkerTile::parse(params, data, families, dependencies).await.map(Some)
        },
        registration,
    );

    let task_state = state.clone();
    let task_spawner = spawner.clone();
    let task = async move {
        let outcome = match parse.await {
            Ok(outcome) => outcome,
            Err(aborted) => Err(aborted.into()),
        };
        finish_parse(&task_state, &task_spawner, key, outcome, reply);
    };

    if let Err(e) = spawner.spawn_local(task) {
        log::error!("unable to schedule tile parse: {e}");
    }
}

fn finish_parse(
    state: &Shared,
    spawner: &LocalSpawner,
    key: TileKey,
    outcome: Result<Option<ParsedTile>>,
    reply: Reply,
) {
    let mut worker = state.borrow_mut();
    let pending_reload = worker.tiles.get_mut(&key).and_then(|e| e.pending_reload.take());

    let response = match outcome {
        Ok(Some(parsed)) => match worker.tiles.get_mut(&key) {
            Some(entry) => {
                entry.abort = None;
                Ok(Response::Tile(Some(entry.tile.finish(parsed))))
            }
            None => Err(Error::Aborted),
        },
        Ok(None) => {
            worker.tiles.remove(&key);
            Ok(Response::Tile(None))
        }
        Err(Error::Aborted) => Err(Error::Aborted),
        Err(e) => {
            log::warn!("tile {} of '{}' failed: {e}", key.1, key.0);
            worker.tiles.remove(&key);
            Err(e)
        }
    };
    drop(worker);

    let _ = reply.send(response);

    if let Some(pending_reload) = pending_reload {
        reload(state, spawner, key, pending_reload);
    }
}

fn parse_geojson(
    state: &Shared,
    spawner: &LocalSpawner,
    source: String,
    data: GeoJsonData,
    options: GeoJsonOptions,
    reply: Reply,
) {
    let fetcher = state.borrow().fetcher.clone();
    let task_state = state.clone();

    let task = async move {
        let index = async {
            let text = match data {
                GeoJsonData::Inline(text) => text,
                GeoJsonData::Url(url) => {
                    let bytes = fetcher
                        .fetch(&url)
                        .await?
                        .ok_or_else(|| Error::GeoJson(format!("no data at {url}")))?;
                    String::from_utf8(bytes).map_err(|e| Error::GeoJson(e.to_string()))?
                }
            };
            GeoJsonIndex::parse(&text, options)
        }
        .await;

        let response = index.map(|index| {
            let features = index.len();
            log::debug!("indexed {features} geojson features for '{source}'");
            task_state.borrow_mut().geojson.insert(source, Rc::new(index));
            Response::GeoJsonParsed { features }
        });
        let _ = reply.send(response);
    };

    if let Err(e) = spawner.spawn_local(task) {
        log::error!("unable to schedule geojson parse: {e}");
    }
}

/// A fixed set of workers. Requests for a tile always go to the same
/// worker, chosen round-robin by tile uid; style and GeoJSON requests go to
/// every worker.
pub struct WorkerPool {
    workers: Vec<Worker>,
}

impl WorkerPool {
    pub fn new(
        count: usize,
        style: Arc<Style>,
        fetcher: Arc<dyn TileFetcher>,
        dependencies: Arc<dyn DependencyProvider>,
    ) -> Result<Self> {
        let workers = (0..count.max(1))
            .map(|id| Worker::spawn(id, style.clone(), fetcher.clone(), dependencies.clone()))
            .collect::<Result<Vec<_>>>()?;

        Ok(WorkerPool { workers })
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn worker_for(&self, uid: u64) -> &Worker {
        &self.workers[(uid % self.workers.len() as u64) as usize]
    }

    /// Broadcast requests resolve with the last worker's answer, or the
    /// first error.
    pub fn send(&self, request: Request) -> BoxFuture<'static, Result<Response>> {
        if let Some(uid) = request.tile_uid() {
            return self.worker_for(uid).send(request).boxed();
        }

        let sends: Vec<_> = self.workers.iter().map(|w| w.send(request.clone())).collect();
        async move {
            let mut responses = future::try_join_all(sends).await?;
            Ok(responses.pop().unwrap_or(Response::Done))
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        TileId,
        glyphs::{LocalDependencies, SpriteIndex},
        proto::{self, GeometryEncoder, LayerBuilder},
    };
    use futures::executor::block_on;
    use prost::Message;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryFetcher {
        tiles: AHashMap<String, Vec<u8>>,
        gate: Mutex<Option<oneshot::Receiver<Vec<u8>>>>,
    }

    impl TileFetcher for MemoryFetcher {
        fn fetch(&self, url: &str) -> BoxFuture<'static, Result<Option<Vec<u8>>>> {
            if url == "gated" {
                let gate = self.gate.lock().unwrap().take();
                return match gate {
                    Some(gate) => gate.map(|data| data.map(Some).map_err(|_| Error::Aborted)).boxed(),
                    None => future::ready(Ok(None)).boxed(),
                };
            }
            if url == "never" {
                return future::pending().boxed();
            }
            future::ready(Ok(self.tiles.get(url).cloned())).boxed()
        }
    }

    fn tile_data() -> Vec<u8> {
        let mut water = LayerBuilder::new("water", 4096);
        water.add_feature(
            Some(1),
            proto::GeomType::Polygon,
            GeometryEncoder::new()
                .ring(&[[0, 0], [1024, 0], [1024, 1024], [0, 1024]])
                .finish(),
            [("kind", proto::Value::string("lake"))],
        );
        let mut places = LayerBuilder::new("places", 4096);
        places.add_feature(
            Some(2),
            proto::GeomType::Point,
            GeometryEncoder::new().points(&[[2048, 2048]]).finish(),
            [("name", proto::Value::string("Gamma"))],
        );
        proto::Tile {
            layers: vec![water.finish(), places.finish()],
        }
        .encode_to_vec()
    }

    fn style() -> Arc<Style> {
        let style = Style::from_json(
            &json!({
                "layers": [
                    { "id": "water", "type": "fill", "source": "osm", "source-layer": "water" },
                    { "id": "labels", "type": "symbol", "source": "osm", "source-layer": "places",
                      "layout": { "text-field": "{name}" } },
                    { "id": "shapes", "type": "fill", "source": "shapes" }
                ]
            })
            .to_string(),
        )
        .unwrap();
        Arc::new(style)
    }

    fn worker(fetcher: MemoryFetcher) -> Worker {
        let dependencies = LocalDependencies::new(SpriteIndex::from_json("{}").unwrap()).unwrap();
        Worker::spawn(0, style(), Arc::new(fetcher), dependencies).unwrap()
    }

    fn fetcher() -> MemoryFetcher {
        let mut fetcher = MemoryFetcher::default();
        fetcher.tiles.insert("osm/1/0/0".into(), tile_data());
        fetcher
    }

    fn params(uid: u64) -> WorkerTileParameters {
        WorkerTileParameters {
            uid,
            source: "osm".into(),
            tile: TileId::new(1, 0, 0),
            zoom: 1.0,
            ..Default::default()
        }
    }

    fn load(uid: u64, url: &str) -> Request {
        Request::LoadTile {
            params: params(uid),
            url: url.into(),
        }
    }

    fn redo(uid: u64) -> Request {
        Request::RedoPlacement {
            source: "osm".into(),
            uid,
            angle: 0.5,
            pitch: 0.0,
            show_collision_boxes: false,
        }
    }

    #[test]
    fn loads_redoes_and_removes_tiles() {
        let worker = worker(fetcher());
        let Response::Tile(Some(result)) = block_on(worker.send(load(1, "osm/1/0/0"))).unwrap() else {
            panic!("expected a tile");
        };
        let layers: Vec<_> = result.buckets.iter().map(|b| b.layer_id.as_str()).collect();
        assert_eq!(layers, ["water", "labels"]);
        assert_eq!(result.raw_tile_data, tile_data());

        let Response::Placement(Some(placement)) = block_on(worker.send(redo(1))).unwrap() else {
            panic!("expected a placement");
        };
        assert_eq!(placement.collision_tile.angle, 0.5);
        assert_eq!(placement.buckets.len(), 1);

        let remove = Request::RemoveTile {
            source: "osm".into(),
            uid: 1,
        };
        assert!(matches!(block_on(worker.send(remove)), Ok(Response::Done)));
        assert!(matches!(block_on(worker.send(redo(1))), Ok(Response::Placement(None))));
    }

    #[test]
    fn missing_tiles_load_empty() {
        let worker = worker(fetcher());
        assert!(matches!(
            block_on(worker.send(load(2, "osm/9/9/9"))),
            Ok(Response::Tile(None))
        ));
        let reload = Request::ReloadTile {
            source: "osm".into(),
            uid: 2,
        };
        assert!(matches!(block_on(worker.send(reload)), Ok(Response::Tile(None))));
    }

    #[test]
    fn aborting_a_load_drops_it() {
        let worker = worker(fetcher());
        let loading = worker.send(load(3, "never"));
        let abort = worker.send(Request::AbortTile {
            source: "osm".into(),
            uid: 3,
        });

        assert!(matches!(block_on(abort), Ok(Response::Done)));
        assert!(matches!(block_on(loading), Err(Error::Aborted)));
        assert!(matches!(block_on(worker.send(redo(3))), Ok(Response::Placement(None))));
    }

    #[test]
    fn reloads_during_parse_are_coalesced() {
        let (release, gate) = oneshot::channel();
        let fetcher = MemoryFetcher {
            gate: Mutex::new(Some(gate)),
            ..Default::default()
        };
        let worker = worker(fetcher);
        let reload = || Request::ReloadTile {
            source: "osm".into(),
            uid: 4,
        };

        let loading = worker.send(load(4, "gated"));
        let first = worker.send(reload());
        let second = worker.send(reload());
        let deferred = worker.send(redo(4));

        assert!(matches!(block_on(first), Ok(Response::Superseded)));
        assert!(matches!(block_on(deferred), Ok(Response::Placement(None))));

        release.send(tile_data()).unwrap();
        let Ok(Response::Tile(Some(loaded))) = block_on(loading) else {
            panic!("expected the loaded tile");
        };
        assert_eq!(loaded.collision_tile.angle, 0.5);

        let Ok(Response::Tile(Some(reloaded))) = block_on(second) else {
            panic!("expected the reloaded tile");
        };
        assert_eq!(reloaded.buckets, loaded.buckets);
        assert_eq!(reloaded.raw_tile_data, loaded.raw_tile_data);
    }

    #[test]
    fn geojson_sources_are_tiled_on_demand() {
        let worker = worker(MemoryFetcher::default());
        let geojson = json!({
            "type": "Feature",
            "properties": { "name": "box" },
            "geometry": {
                "type": "Polygon",
                "coordinates": [[[-10.0, -10.0], [10.0, -10.0], [10.0, 10.0], [-10.0, 10.0], [-10.0, -10.0]]]
            }
        });

        let parse = Request::ParseGeoJson {
            source: "shapes".into(),
            data: GeoJsonData::Inline(geojson.to_string()),
            options: GeoJsonOptions::default(),
        };
        assert!(matches!(
            block_on(worker.send(parse)),
            Ok(Response::GeoJsonParsed { features: 1 })
        ));

        let tile = |uid: u64, tile: TileId| Request::LoadGeoJsonTile {
            params: WorkerTileParameters {
                uid,
                source: "shapes".into(),
                tile,
                zoom: tile.zoom(),
                ..Default::default()
            },
        };

        let Ok(Response::Tile(Some(result))) = block_on(worker.send(tile(5, TileId::new(0, 0, 0)))) else {
            panic!("expected a geojson tile");
        };
        assert_eq!(result.buckets.len(), 1);
        assert_eq!(result.buckets[0].layer_id, "shapes");

        assert!(matches!(
            block_on(worker.send(tile(6, TileId::new(4, 0, 0)))),
            Ok(Response::Tile(None))
        ));

        let bad = Request::ParseGeoJson {
            source: "shapes".into(),
            data: GeoJsonData::Inline("{".into()),
            options: GeoJsonOptions::default(),
        };
        assert!(matches!(block_on(worker.send(bad)), Err(Error::GeoJson(_))));
    }

    #[test]
    fn pool_routes_tiles_to_one_worker() {
        let dependencies = LocalDependencies::new(SpriteIndex::from_json("{}").unwrap()).unwrap();
        let pool = WorkerPool::new(3, style(), Arc::new(fetcher()), dependencies).unwrap();
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.worker_for(4).id(), 1);

        for uid in 0..3 {
            assert!(matches!(
                block_on(pool.send(load(uid, "osm/1/0/0"))),
                Ok(Response::Tile(Some(_)))
            ));
        }
        for uid in 0..3 {
            assert!(matches!(
                block_on(pool.send(redo(uid))),
                Ok(Response::Placement(Some(_)))
            ));
        }

        assert!(matches!(block_on(pool.send(Request::SetStyle(style()))), Ok(Response::Done)));
    }
}
