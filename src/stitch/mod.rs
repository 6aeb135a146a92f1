use std::io::Cursor;
use std::path::Path;

use image::{imageops, ImageFormat, ImageOutputFormat, ImageResult, RgbaImage};
use log::{debug, warn};
use rayon::prelude::*;
use sha2::{Digest, Sha256};

use crate::catalog::{GridSize, TileCoordinate};
use crate::fetch::TileResult;

/// The assembled map. Immutable once handed out.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeImage {
    image: RgbaImage,
}

impl CompositeImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn as_rgba(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_rgba(self) -> RgbaImage {
        self.image
    }

    /// Encode the map as PNG, e.g. to stream it back to a client
    pub fn encode_png(&self) -> ImageResult<Vec<u8>> {
        let mut buf = Cursor::new(Vec::new());
        self.image.write_to(&mut buf, ImageOutputFormat::Png)?;
        Ok(buf.into_inner())
    }

    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> ImageResult<()> {
        self.image.save_with_format(path, ImageFormat::Png)
    }

    /// SHA-256 of the dimensions and raw pixels, as lowercase hex
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.image.width().to_le_bytes());
        hasher.update(self.image.height().to_le_bytes());
        hasher.update(self.image.as_raw());
        format!("{:x}", hasher.finalize())
    }
}

/// Stitched map plus the tiles whose payload could not be decoded
#[derive(Debug)]
pub struct Stitched {
    pub image: CompositeImage,
    pub undecodable: Vec<TileCoordinate>,
}

/// Composite the successful tiles onto a transparent canvas.
///
/// Each tile lands at `(column * tile_size, row * tile_size)` with no
/// blending. Failed, missing and undecodable tiles leave their cell fully
/// transparent. When a coordinate appears more than once the later result
/// wins.
pub fn stitch(size: GridSize, tile_size: u32, results: &[TileResult]) -> Stitched {
    stitch_batched(size, tile_size, results, DECODE_BATCH)
}

/// Tiles decoded in parallel before being placed. Bounds the number of
/// decoded rasters alive next to the canvas.
const DECODE_BATCH: usize = 64;

fn stitch_batched(size: GridSize, tile_size: u32, results: &[TileResult], batch: usize) -> Stitched {
    let mut canvas = RgbaImage::new(size.columns * tile_size, size.rows * tile_size);
    let mut undecodable = Vec::new();

    for chunk in results.chunks(batch.max(1)) {
        // Decoding dominates, so it runs in parallel. Placement stays in input order.
        let decoded: Vec<(TileCoordinate, Option<RgbaImage>)> = chunk
            .par_iter()
            .filter_map(|result| match result {
                TileResult::Success { coordinate, data, .. } => Some((*coordinate, data)),
                TileResult::Failure { .. } => None,
            })
            .filter(|(coordinate, _)| {
                let inside = coordinate.column < size.columns && coordinate.row < size.rows;
                if !inside {
                    warn!("Ignoring tile {} outside the {}x{} grid", coordinate, size.columns, size.rows);
                }
                inside
            })
            .map(|(coordinate, data)| (coordinate, decode_tile(coordinate, data, tile_size)))
            .collect();

        for (coordinate, tile) in decoded {
            let x = coordinate.column as i64 * tile_size as i64;
            let y = coordinate.row as i64 * tile_size as i64;
            match tile {
                Some(tile) => {
                    undecodable.retain(|c| *c != coordinate);
                    imageops::replace(&mut canvas, &tile, x, y);
                }
                None => {
                    clear_cell(&mut canvas, coordinate, tile_size);
                    if !undecodable.contains(&coordinate) {
                        undecodable.push(coordinate);
                    }
                }
            }
        }
    }

    debug!(
        "Stitched {}x{} canvas, {} undecodable tiles",
        canvas.width(),
        canvas.height(),
        undecodable.len()
    );

    Stitched {
        image: CompositeImage { image: canvas },
        undecodable,
    }
}

fn decode_tile(coordinate: TileCoordinate, data: &[u8], tile_size: u32) -> Option<RgbaImage> {
    let tile = match image::load_from_memory(data) {
        Ok(tile) => tile.to_rgba8(),
        Err(e) => {
            warn!("Failed to decode tile {}: {}", coordinate, e);
            return None;
        }
    };

    if tile.width() != tile_size || tile.height() != tile_size {
        warn!(
            "Tile {} is {}x{}, expected {}x{}",
            coordinate,
            tile.width(),
            tile.height(),
            tile_size,
            tile_size
        );
    }
    if tile.width() > tile_size || tile.height() > tile_size {
        let width = tile.width().min(tile_size);
        let height = tile.height().min(tile_size);
        return Some(imageops::crop_imm(&tile, 0, 0, width, height).to_image());
    }
    Some(tile)
}

/// Reset a cell to transparent, undoing an earlier duplicate placement
fn clear_cell(canvas: &mut RgbaImage, coordinate: TileCoordinate, tile_size: u32) {
    let blank = RgbaImage::new(tile_size, tile_size);
    imageops::replace(
        canvas,
        &blank,
        coordinate.column as i64 * tile_size as i64,
        coordinate.row as i64 * tile_size as i64,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{TileError, TransportError};
    use crate::fetch::TileOrigin;
    use crate::test_support::{png_tile, tile_colour};
    use image::Rgba;

    const TILE: u32 = 8;

    fn success(column: u32, row: u32) -> TileResult {
        let coordinate = TileCoordinate::new(column, row);
        TileResult::Success {
            coordinate,
            data: png_tile(TILE, tile_colour(coordinate)),
            origin: TileOrigin::Network,
        }
    }

    fn failure(column: u32, row: u32) -> TileResult {
        TileResult::Failure {
            coordinate: TileCoordinate::new(column, row),
            error: TileError::Transport(TransportError::Timeout("fake://".to_string())),
        }
    }

    fn cell_is(image: &RgbaImage, coordinate: TileCoordinate, colour: [u8; 4]) -> bool {
        let x0 = coordinate.column * TILE;
        let y0 = coordinate.row * TILE;
        (y0..y0 + TILE).all(|y| (x0..x0 + TILE).all(|x| *image.get_pixel(x, y) == Rgba(colour)))
    }

    #[test]
    fn test_gap_left_where_tile_failed() {
        let mut results = Vec::new();
        for row in 0..4 {
            for column in 0..4 {
                if (column, row) == (2, 3) {
                    results.push(failure(column, row));
                } else {
                    results.push(success(column, row));
                }
            }
        }

        let stitched = stitch(GridSize::square(4), TILE, &results);
        let image = stitched.image.as_rgba();
        assert_eq!((image.width(), image.height()), (4 * TILE, 4 * TILE));
        assert!(stitched.undecodable.is_empty());

        for row in 0..4 {
            for column in 0..4 {
                let coordinate = TileCoordinate::new(column, row);
                if (column, row) == (2, 3) {
                    assert!(cell_is(image, coordinate, [0, 0, 0, 0]), "gap should be transparent");
                } else {
                    assert!(cell_is(image, coordinate, tile_colour(coordinate)), "wrong cell {}", coordinate);
                }
            }
        }
    }

    #[test]
    fn test_stitch_is_deterministic() {
        let results: Vec<_> = (0..3)
            .flat_map(|row| (0..2).map(move |column| success(column, row)))
            .collect();
        let mut reversed = results.clone();
        reversed.reverse();

        let first = stitch(GridSize::new(2, 3), TILE, &results);
        let second = stitch(GridSize::new(2, 3), TILE, &results);
        let third = stitch(GridSize::new(2, 3), TILE, &reversed);

        assert_eq!(first.image, second.image);
        assert_eq!(first.image, third.image);
        assert_eq!(first.image.fingerprint(), second.image.fingerprint());
        assert_eq!(first.image.encode_png().unwrap(), second.image.encode_png().unwrap());
    }

    #[test]
    fn test_empty_results_give_blank_canvas() {
        let stitched = stitch(GridSize::new(3, 2), TILE, &[]);
        assert_eq!(stitched.image.width(), 3 * TILE);
        assert_eq!(stitched.image.height(), 2 * TILE);
        assert!(stitched.image.as_rgba().pixels().all(|p| *p == Rgba([0, 0, 0, 0])));
    }

    #[test]
    fn test_undecodable_and_out_of_grid_tiles_are_skipped() {
        let garbage = TileResult::Success {
            coordinate: TileCoordinate::new(1, 0),
            data: b"\x89PNG\r\n\x1a\ntruncated".to_vec(),
            origin: TileOrigin::Cache,
        };
        let results = vec![success(0, 0), garbage, success(5, 5)];

        let stitched = stitch(GridSize::new(2, 1), TILE, &results);

        assert_eq!(stitched.undecodable, vec![TileCoordinate::new(1, 0)]);
        let image = stitched.image.as_rgba();
        assert!(cell_is(image, TileCoordinate::new(0, 0), tile_colour(TileCoordinate::new(0, 0))));
        assert!(cell_is(image, TileCoordinate::new(1, 0), [0, 0, 0, 0]));
    }

    #[test]
    fn test_oversized_tile_does_not_bleed_into_neighbours() {
        let big = TileResult::Success {
            coordinate: TileCoordinate::new(0, 0),
            data: png_tile(TILE * 2, [255, 0, 0, 255]),
            origin: TileOrigin::Network,
        };
        let stitched = stitch(GridSize::new(2, 1), TILE, &[big]);
        let image = stitched.image.as_rgba();
        assert!(cell_is(image, TileCoordinate::new(0, 0), [255, 0, 0, 255]));
        assert!(cell_is(image, TileCoordinate::new(1, 0), [0, 0, 0, 0]));
    }

    #[test]
    fn test_small_batches_match_a_single_batch() {
        let mut results: Vec<_> = (0..3)
            .flat_map(|row| (0..3).map(move |column| success(column, row)))
            .collect();
        results[4] = failure(1, 1);
        results.push(TileResult::Success {
            coordinate: TileCoordinate::new(2, 2),
            data: b"not an image".to_vec(),
            origin: TileOrigin::Cache,
        });

        let batched = stitch_batched(GridSize::square(3), TILE, &results, 3);
        let whole = stitch_batched(GridSize::square(3), TILE, &results, results.len());

        assert_eq!(batched.image, whole.image);
        assert_eq!(batched.undecodable, vec![TileCoordinate::new(2, 2)]);
        assert_eq!(batched.undecodable, whole.undecodable);
        assert!(cell_is(batched.image.as_rgba(), TileCoordinate::new(1, 1), [0, 0, 0, 0]));
        assert!(cell_is(batched.image.as_rgba(), TileCoordinate::new(2, 2), [0, 0, 0, 0]));
    }

    #[test]
    fn test_later_duplicate_wins_across_batches() {
        let coordinate = TileCoordinate::new(0, 0);
        let red = TileResult::Success {
            coordinate,
            data: png_tile(TILE, [255, 0, 0, 255]),
            origin: TileOrigin::Cache,
        };
        let blue = TileResult::Success {
            coordinate,
            data: png_tile(TILE, [0, 0, 255, 255]),
            origin: TileOrigin::Network,
        };

        let stitched = stitch_batched(GridSize::new(2, 1), TILE, &[red, success(1, 0), blue], 2);

        assert!(cell_is(stitched.image.as_rgba(), coordinate, [0, 0, 255, 255]));
        assert!(stitched.undecodable.is_empty());
    }

    #[test]
    fn test_png_round_trip_preserves_pixels() {
        let stitched = stitch(GridSize::square(2), TILE, &[success(1, 1)]);
        let png = stitched.image.encode_png().unwrap();
        let decoded = image::load_from_memory(&png).unwrap().to_rgba8();
        assert_eq!(&decoded, stitched.image.as_rgba());
    }
}
