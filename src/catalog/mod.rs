use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, ResolveError};

mod grid;

pub use grid::{GridSize, TileCoordinate, TileGrid, TileKey, UrlTemplate, ZoomLevel};

/// Default tile server, iZurvive's DayZ map tiles
pub const DEFAULT_TILE_URL: &str =
    "https://maps.izurvive.com/maps/{map}/{version}/tiles/{zoom}/{x}/{y}.webp";

pub const DEFAULT_TILE_EXTENSION: &str = "webp";

pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Zoom level selected when the caller does not pick one
pub const DEFAULT_ZOOM: ZoomLevel = ZoomLevel(4);

/// Map rendering style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MapStyle {
    /// Topographic
    Top,
    /// Satellite
    Sat,
}

impl fmt::Display for MapStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapStyle::Top => write!(f, "Top"),
            MapStyle::Sat => write!(f, "Sat"),
        }
    }
}

/// One map variant offered by the tile server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapDescriptor {
    /// Terrain name, e.g. `ChernarusPlus`
    pub name: String,

    pub style: MapStyle,

    /// Tile set version published by the server
    pub version: String,

    /// Edge length of a tile in pixels
    #[serde(default = "default_tile_size")]
    pub tile_size: u32,

    /// Grid dimensions for every supported zoom level
    #[serde(default = "default_zoom_table")]
    pub zooms: BTreeMap<ZoomLevel, GridSize>,
}

impl MapDescriptor {
    pub fn new(name: &str, style: MapStyle, version: &str) -> Self {
        Self {
            name: name.to_string(),
            style,
            version: version.to_string(),
            tile_size: DEFAULT_TILE_SIZE,
            zooms: default_zoom_table(),
        }
    }

    /// Human-facing label, also used in tile URLs and cache paths
    pub fn label(&self) -> String {
        format!("{}-{}", self.name, self.style)
    }

    pub fn supported_zooms(&self) -> Vec<ZoomLevel> {
        self.zooms.keys().copied().collect()
    }
}

fn default_tile_size() -> u32 {
    DEFAULT_TILE_SIZE
}

/// Grid sizes published by the iZurvive tile server: 2x2 at zoom 1 up to 128x128 at zoom 7.
pub fn default_zoom_table() -> BTreeMap<ZoomLevel, GridSize> {
    BTreeMap::from([
        (ZoomLevel(1), GridSize::square(2)),
        (ZoomLevel(2), GridSize::square(4)),
        (ZoomLevel(3), GridSize::square(8)),
        (ZoomLevel(4), GridSize::square(16)),
        (ZoomLevel(5), GridSize::square(32)),
        (ZoomLevel(6), GridSize::square(64)),
        (ZoomLevel(7), GridSize::square(128)),
    ])
}

fn default_tile_url() -> String {
    DEFAULT_TILE_URL.to_string()
}

fn default_tile_extension() -> String {
    DEFAULT_TILE_EXTENSION.to_string()
}

/// On-disk catalog format
#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default = "default_tile_url")]
    tile_url: String,
    #[serde(default = "default_tile_extension")]
    tile_extension: String,
    maps: Vec<MapDescriptor>,
}

/// The set of maps the tool knows how to download, keyed by label.
#[derive(Debug, Clone)]
pub struct Catalog {
    tile_url: String,
    tile_extension: String,
    maps: BTreeMap<String, MapDescriptor>,
}

impl Default for Catalog {
    fn default() -> Self {
        let maps = [
            MapDescriptor::new("ChernarusPlus", MapStyle::Top, "1.26.0"),
            MapDescriptor::new("ChernarusPlus", MapStyle::Sat, "1.26.0"),
            MapDescriptor::new("Livonia", MapStyle::Top, "1.26.0"),
            MapDescriptor::new("Livonia", MapStyle::Sat, "1.26.0"),
            MapDescriptor::new("Sakhal", MapStyle::Top, "1.3.0"),
            MapDescriptor::new("Sakhal", MapStyle::Sat, "1.3.0"),
        ];

        Self {
            tile_url: default_tile_url(),
            tile_extension: default_tile_extension(),
            maps: maps.into_iter().map(|m| (m.label(), m)).collect(),
        }
    }
}

impl Catalog {
    /// Build a catalog from explicit parts, validating every entry
    pub fn new(
        tile_url: &str,
        tile_extension: &str,
        maps: Vec<MapDescriptor>,
    ) -> Result<Self, CatalogError> {
        if maps.is_empty() {
            return Err(CatalogError::Invalid("catalog has no maps".to_string()));
        }
        if !is_path_safe(tile_extension) {
            return Err(CatalogError::Invalid(format!(
                "tile extension {:?} is not a valid file extension",
                tile_extension
            )));
        }

        let mut by_label = BTreeMap::new();
        for map in maps {
            validate_map(&map)?;
            let label = map.label();
            if by_label.insert(label.clone(), map).is_some() {
                return Err(CatalogError::Invalid(format!("duplicate map {}", label)));
            }
        }

        Ok(Self {
            tile_url: tile_url.to_string(),
            tile_extension: tile_extension.to_string(),
            maps: by_label,
        })
    }

    /// Parse a catalog from its JSON representation
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_json::from_str(json)?;
        Self::new(&file.tile_url, &file.tile_extension, file.maps)
    }

    /// Load a catalog from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        debug!("Loading map catalog from {}", path.display());
        let json = fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn labels(&self) -> Vec<&str> {
        self.maps.keys().map(String::as_str).collect()
    }

    pub fn maps(&self) -> impl Iterator<Item = &MapDescriptor> {
        self.maps.values()
    }

    pub fn get(&self, label: &str) -> Option<&MapDescriptor> {
        self.maps.get(label)
    }

    pub fn tile_url(&self) -> &str {
        &self.tile_url
    }

    /// Replace the tile set version of one map
    pub fn override_version(&mut self, label: &str, version: &str) -> Result<(), CatalogError> {
        if !is_path_safe(version) {
            return Err(CatalogError::Invalid(format!(
                "version {:?} may only contain letters, digits, '.', '_' and '-'",
                version
            )));
        }
        let map = self
            .maps
            .get_mut(label)
            .ok_or_else(|| ResolveError::UnsupportedMap(label.to_string()))?;
        map.version = version.to_string();
        Ok(())
    }

    /// Resolve a map label and zoom level into the grid of tiles to fetch.
    pub fn resolve(&self, label: &str, zoom: ZoomLevel) -> Result<TileGrid, ResolveError> {
        let map = self
            .maps
            .get(label)
            .ok_or_else(|| ResolveError::UnsupportedMap(label.to_string()))?;

        let size = map
            .zooms
            .get(&zoom)
            .copied()
            .ok_or_else(|| ResolveError::UnsupportedZoom {
                map: label.to_string(),
                zoom,
            })?;

        Ok(TileGrid {
            map: label.to_string(),
            version: map.version.clone(),
            zoom,
            size,
            tile_size: map.tile_size,
            urls: UrlTemplate::new(&self.tile_url, label, &map.version, zoom),
            extension: self.tile_extension.clone(),
        })
    }
}

/// Labels and versions become directory names in the cache
fn is_path_safe(s: &str) -> bool {
    !s.is_empty()
        && s != "."
        && s != ".."
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
}

fn validate_map(map: &MapDescriptor) -> Result<(), CatalogError> {
    let label = map.label();
    if !is_path_safe(&map.name) || !is_path_safe(&map.version) {
        return Err(CatalogError::Invalid(format!(
            "map {} has a name or version that is not path safe",
            label
        )));
    }
    if map.tile_size == 0 {
        return Err(CatalogError::Invalid(format!("map {} has a zero tile size", label)));
    }
    if map.zooms.is_empty() {
        return Err(CatalogError::Invalid(format!("map {} has no zoom levels", label)));
    }
    for (zoom, size) in &map.zooms {
        if size.columns == 0 || size.rows == 0 {
            return Err(CatalogError::Invalid(format!(
                "map {} zoom {} has an empty grid",
                label, zoom
            )));
        }
        let width = size.columns.checked_mul(map.tile_size);
        let height = size.rows.checked_mul(map.tile_size);
        if width.is_none() || height.is_none() {
            return Err(CatalogError::Invalid(format!(
                "map {} zoom {} is too large to stitch",
                label, zoom
            )));
        }
    }
    Ok(())
}
