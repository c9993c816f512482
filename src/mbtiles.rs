use std::{path::PathBuf, sync::Mutex};

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags, OptionalExtension};

use crate::TileId;

/// Tiles from an MBTiles archive, rows addressed in the TMS scheme.
pub struct MbTilesSource {
    path: PathBuf,
    connection: Mutex<Connection>,
}

impl std::fmt::Debug for MbTilesSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MbTilesSource").field("path", &self.path).finish()
    }
}

impl MbTilesSource {
    pub fn new<P: Into<PathBuf>>(database: P) -> Result<Self> {
        let path = database.into();
        let connection = Connection::open_with_flags(&path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .with_context(|| format!("opening mbtiles archive {}", path.display()))?;

        Ok(Self {
            path,
            connection: Mutex::new(connection),
        })
    }

    /// The stored bytes of a tile, still compressed if the archive stores
    /// them compressed. `None` when the archive has no such tile.
    pub fn query_tile(&self, tile: TileId) -> Result<Option<Vec<u8>>> {
        let connection = self
            .connection
            .lock()
            .map_err(|_| anyhow::anyhow!("mbtiles connection poisoned"))?;

        let mut query = connection.prepare_cached(
            "SELECT tile_data FROM tiles WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
        )?;

        let data = query
            .query_row((tile.zoom, tile.column, tile.tms_row()), |row| row.get::<_, Vec<u8>>(0))
            .optional()
            .with_context(|| format!("reading tile {tile} from {}", self.path.display()))?;

        Ok(data)
    }

    pub fn try_clone(&self) -> Result<Self> {
        Self::new(self.path.clone())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn write_archive(name: &str, tiles: &[(TileId, &[u8])]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("{name}-{}.mbtiles", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let connection = Connection::open(&path).unwrap();
        connection
            .execute_batch(
                "CREATE TABLE tiles (zoom_level INTEGER, tile_column INTEGER, tile_row INTEGER, tile_data BLOB);",
            )
            .unwrap();
        for (tile, data) in tiles {
            connection
                .execute(
                    "INSERT INTO tiles VALUES (?1, ?2, ?3, ?4)",
                    (tile.zoom, tile.column, tile.tms_row(), data.to_vec()),
                )
                .unwrap();
        }

        path
    }

    #[test]
    fn reads_tiles_by_tms_row() {
        let tile = TileId::new(2, 1, 0);
        let path = write_archive("tile-worker-mbtiles", &[(tile, b"tile bytes")]);

        let source = MbTilesSource::new(&path).unwrap();
        assert_eq!(source.query_tile(tile).unwrap().as_deref(), Some(&b"tile bytes"[..]));
        assert_eq!(source.query_tile(TileId::new(2, 1, 3)).unwrap(), None);

        let clone = source.try_clone().unwrap();
        assert!(clone.query_tile(tile).unwrap().is_some());

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn missing_archive_is_an_error() {
        assert!(MbTilesSource::new("/nonexistent/archive.mbtiles").is_err());
    }
}
