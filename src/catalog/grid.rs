use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A discrete detail tier. Higher levels subdivide the map into more tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoomLevel(pub u8);

impl ZoomLevel {
    pub const fn new(level: u8) -> Self {
        Self(level)
    }

    pub const fn value(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for ZoomLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Grid dimensions, in tiles, for one zoom level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSize {
    pub columns: u32,
    pub rows: u32,
}

impl GridSize {
    pub fn new(columns: u32, rows: u32) -> Self {
        Self { columns, rows }
    }

    pub fn square(side: u32) -> Self {
        Self { columns: side, rows: side }
    }

    pub fn tile_count(&self) -> usize {
        self.columns as usize * self.rows as usize
    }
}

/// Position of a tile in its grid. `column` grows to the east, `row` to the south.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TileCoordinate {
    pub column: u32,
    pub row: u32,
}

impl TileCoordinate {
    pub fn new(column: u32, row: u32) -> Self {
        Self { column, row }
    }
}

impl fmt::Display for TileCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.column, self.row)
    }
}

/// Unique identity of one tile of one map version at one zoom level.
///
/// The key doubles as the relative cache path, so two distinct
/// `(map, version, zoom, coordinate)` tuples always map to distinct files.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub map: String,
    pub version: String,
    pub zoom: ZoomLevel,
    pub coordinate: TileCoordinate,
    pub extension: String,
}

impl TileKey {
    /// Directory holding every tile of this key's map, version and zoom
    pub fn namespace(&self) -> PathBuf {
        PathBuf::from(&self.map)
            .join(&self.version)
            .join(self.zoom.to_string())
    }

    /// Path of the tile relative to the cache root
    pub fn relative_path(&self) -> PathBuf {
        let file_name = format!(
            "{}_{}.{}",
            self.coordinate.column, self.coordinate.row, self.extension
        );
        self.namespace().join(file_name)
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}/z{}/{}",
            self.map, self.version, self.zoom, self.coordinate
        )
    }
}

/// Tile URL template bound to one map, version and zoom level.
///
/// Recognised placeholders: `{map}`, `{version}`, `{zoom}`, `{x}`, `{y}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    template: String,
    map: String,
    version: String,
    zoom: ZoomLevel,
}

impl UrlTemplate {
    pub fn new(template: &str, map: &str, version: &str, zoom: ZoomLevel) -> Self {
        Self {
            template: template.to_string(),
            map: map.to_string(),
            version: version.to_string(),
            zoom,
        }
    }

    pub fn url(&self, coordinate: TileCoordinate) -> String {
        self.template
            .replace("{map}", &self.map)
            .replace("{version}", &self.version)
            .replace("{zoom}", &self.zoom.to_string())
            .replace("{x}", &coordinate.column.to_string())
            .replace("{y}", &coordinate.row.to_string())
    }
}

/// Everything needed to fetch and lay out the tiles of one map at one zoom level.
#[derive(Debug, Clone)]
pub struct TileGrid {
    pub map: String,
    pub version: String,
    pub zoom: ZoomLevel,
    pub size: GridSize,
    pub tile_size: u32,
    pub urls: UrlTemplate,
    pub extension: String,
}

impl TileGrid {
    pub fn columns(&self) -> u32 {
        self.size.columns
    }

    pub fn rows(&self) -> u32 {
        self.size.rows
    }

    pub fn tile_count(&self) -> usize {
        self.size.tile_count()
    }

    /// Output canvas size in pixels
    pub fn canvas_size(&self) -> (u32, u32) {
        (self.size.columns * self.tile_size, self.size.rows * self.tile_size)
    }

    pub fn contains(&self, coordinate: TileCoordinate) -> bool {
        coordinate.column < self.size.columns && coordinate.row < self.size.rows
    }

    /// All coordinates of the grid, row by row
    pub fn coordinates(&self) -> Vec<TileCoordinate> {
        let mut coordinates = Vec::with_capacity(self.tile_count());
        for row in 0..self.size.rows {
            for column in 0..self.size.columns {
                coordinates.push(TileCoordinate::new(column, row));
            }
        }
        coordinates
    }

    pub fn key(&self, coordinate: TileCoordinate) -> TileKey {
        TileKey {
            map: self.map.clone(),
            version: self.version.clone(),
            zoom: self.zoom,
            coordinate,
            extension: self.extension.clone(),
        }
    }

    pub fn url(&self, coordinate: TileCoordinate) -> String {
        self.urls.url(coordinate)
    }
}
