//! Static terrain grid.

use crate::config::BlockingTile;
use shared::MAP_TILES;

/// Tile codes that stop a unit: brick, steel and water.
const BLOCKING_CODES: [u8; 3] = [1, 2, 3];

pub struct TerrainMap {
    tiles: Vec<u8>,
}

impl TerrainMap {
    /// An all-empty map.
    pub fn empty() -> Self {
        Self {
            tiles: vec![0; (MAP_TILES * MAP_TILES) as usize],
        }
    }

    pub fn from_tiles(tiles: &[BlockingTile]) -> Self {
        let mut map = Self::empty();
        for tile in tiles {
            map.set(tile.x, tile.y, tile.code);
        }
        map
    }

    fn index(x: i32, y: i32) -> Option<usize> {
        if x < 0 || y < 0 || x >= MAP_TILES || y >= MAP_TILES {
            None
        } else {
            Some((x * MAP_TILES + y) as usize)
        }
    }

    pub fn set(&mut self, x: i32, y: i32, code: u8) {
        if let Some(i) = Self::index(x, y) {
            self.tiles[i] = code;
        }
    }

    pub fn code(&self, x: i32, y: i32) -> Option<u8> {
        Self::index(x, y).map(|i| self.tiles[i])
    }

    /// Tiles outside the grid count as blocking.
    pub fn is_blocking(&self, x: i32, y: i32) -> bool {
        match self.code(x, y) {
            Some(code) => BLOCKING_CODES.contains(&code),
            None => true,
        }
    }
}

impl Default for TerrainMap {
    fn default() -> Self {
        Self::empty()
    }
}
