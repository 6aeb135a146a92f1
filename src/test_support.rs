//! Fixtures shared by the unit tests.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use image::{ImageOutputFormat, Rgba, RgbaImage};

use crate::catalog::{Catalog, GridSize, MapDescriptor, MapStyle, TileCoordinate, TileGrid, ZoomLevel};
use crate::download::Transport;
use crate::error::TransportError;

pub const TEST_TILE_SIZE: u32 = 4;

/// Single map `Test-Top` with 4 px tiles and 2x2, 4x4 and 8x8 grids
pub fn test_catalog() -> Catalog {
    let mut map = MapDescriptor::new("Test", MapStyle::Top, "1.0");
    map.tile_size = TEST_TILE_SIZE;
    map.zooms = [
        (ZoomLevel(1), GridSize::square(2)),
        (ZoomLevel(2), GridSize::square(4)),
        (ZoomLevel(3), GridSize::square(8)),
    ]
    .into_iter()
    .collect();

    Catalog::new("fake://{map}/{version}/{zoom}/{x}/{y}.png", "png", vec![map])
        .expect("Failed to build test catalog")
}

/// Solid colour PNG tile
pub fn png_tile(size: u32, rgba: [u8; 4]) -> Vec<u8> {
    let image = RgbaImage::from_pixel(size, size, Rgba(rgba));
    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, ImageOutputFormat::Png)
        .expect("Failed to encode test tile");
    buf.into_inner()
}

/// Colour used for the tile at a coordinate, distinct for small grids
pub fn tile_colour(coordinate: TileCoordinate) -> [u8; 4] {
    [
        (coordinate.column * 40 % 256) as u8,
        (coordinate.row * 40 % 256) as u8,
        200,
        255,
    ]
}

/// In-memory tile server that counts requests
pub struct FakeTransport {
    bodies: HashMap<String, Vec<u8>>,
    requests: AtomicUsize,
}

impl FakeTransport {
    /// Serves a distinct solid tile for every coordinate of the grid
    pub fn serving(grid: &TileGrid) -> Self {
        let bodies = grid
            .coordinates()
            .into_iter()
            .map(|c| (grid.url(c), png_tile(grid.tile_size, tile_colour(c))))
            .collect();
        Self {
            bodies,
            requests: AtomicUsize::new(0),
        }
    }

    /// Answer 404 for one coordinate
    pub fn without(mut self, grid: &TileGrid, coordinate: TileCoordinate) -> Self {
        self.bodies.remove(&grid.url(coordinate));
        self
    }

    pub fn with_body(mut self, grid: &TileGrid, coordinate: TileCoordinate, body: Vec<u8>) -> Self {
        self.bodies.insert(grid.url(coordinate), body);
        self
    }

    pub fn body(&self, grid: &TileGrid, coordinate: TileCoordinate) -> Option<Vec<u8>> {
        self.bodies.get(&grid.url(coordinate)).cloned()
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Transport for FakeTransport {
    fn fetch(&self, url: &str, _timeout: Duration) -> Result<Vec<u8>, TransportError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.bodies.get(url).cloned().ok_or_else(|| TransportError::Status {
            url: url.to_string(),
            status: 404,
        })
    }
}
