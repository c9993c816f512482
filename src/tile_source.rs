//! Raw tile bytes for the worker. Tile URLs are resolved by scheme:
//! `mbtiles://` reads from an archive under the data directory with the
//! last three path segments naming `z/x/y`, `file://` reads a plain file.
//! Gzipped payloads are inflated before they are handed out.

use std::{
    io::Read,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use ahash::AHashMap;
use anyhow::Context;
use futures::{FutureExt, future::BoxFuture};
use libflate::gzip;

use crate::{Error, Result, TileId, mbtiles::MbTilesSource};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Fetches the bytes behind a tile URL. `None` means the source has no tile
/// there, which is not an error.
pub trait TileFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> BoxFuture<'static, Result<Option<Vec<u8>>>>;
}

/// Inflates `data` when it starts with the gzip magic bytes.
pub fn decompress(data: Vec<u8>) -> Result<Vec<u8>> {
    if !data.starts_with(&GZIP_MAGIC) {
        return Ok(data);
    }

    let mut decoder = gzip::Decoder::new(data.as_slice())?;
    let mut inflated = Vec::with_capacity(data.len() * 4);
    decoder.read_to_end(&mut inflated)?;
    Ok(inflated)
}

/// Serves `mbtiles://` and `file://` URLs, keeping one open archive per
/// path.
pub struct TileSourceCollection {
    data_dir: PathBuf,
    archives: Mutex<AHashMap<PathBuf, Arc<MbTilesSource>>>,
}

impl TileSourceCollection {
    pub fn new<P: Into<PathBuf>>(data_dir: P) -> Self {
        TileSourceCollection {
            data_dir: data_dir.into(),
            archives: Mutex::new(AHashMap::new()),
        }
    }

    fn archive(&self, path: &Path) -> anyhow::Result<Arc<MbTilesSource>> {
        let mut archives = self
            .archives
            .lock()
            .map_err(|_| anyhow::anyhow!("tile source cache poisoned"))?;

        if let Some(archive) = archives.get(path) {
            return Ok(archive.clone());
        }

        let archive = Arc::new(MbTilesSource::new(path)?);
        archives.insert(path.to_path_buf(), archive.clone());
        Ok(archive)
    }

    fn load(&self, url: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let uri = url::Url::parse(url).with_context(|| format!("invalid tile url '{url}'"))?;

        let data = match uri.scheme() {
            "mbtiles" => {
                let (path, tile) = self.mbtiles_location(&uri)?;
                self.archive(&path)?.query_tile(tile)?
            }
            "file" => {
                let path = uri
                    .to_file_path()
                    .map_err(|_| anyhow::anyhow!("invalid file url '{url}'"))?;
                match std::fs::read(&path) {
                    Ok(data) => Some(data),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                    Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
                }
            }
            scheme => anyhow::bail!("unsupported tile source scheme: {scheme}"),
        };

        match data {
            Some(data) => Ok(Some(decompress(data)?)),
            None => {
                log::debug!("no tile at {url}");
                Ok(None)
            }
        }
    }

    fn mbtiles_location(&self, uri: &url::Url) -> anyhow::Result<(PathBuf, TileId)> {
        let mut segments: Vec<&str> = uri.host_str().filter(|h| !h.is_empty()).into_iter().collect();
        segments.extend(uri.path_segments().into_iter().flatten().filter(|s| !s.is_empty()));

        let Some(split) = segments.len().checked_sub(3) else {
            anyhow::bail!("mbtiles url '{uri}' does not end in z/x/y");
        };
        let (file, zxy) = segments.split_at(split);
        let zoom = zxy[0].parse().context("tile zoom")?;
        let column = zxy[1].parse().context("tile column")?;
        let row = zxy[2].parse().context("tile row")?;

        let mut path = self.data_dir.clone();
        path.extend(file);
        Ok((path, TileId::new(zoom, column, row)))
    }
}

impl TileFetcher for TileSourceCollection {
    fn fetch(&self, url: &str) -> BoxFuture<'static, Result<Option<Vec<u8>>>> {
        let result = self.load(url).map_err(|e| Error::Fetch(format!("{e:#}")));
        futures::future::ready(result).boxed()
    }
}
