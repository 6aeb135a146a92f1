use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;

use crate::catalog::{TileCoordinate, TileGrid, ZoomLevel};
use crate::fetch::{FetchOutcome, TileOrigin, TileResult};

/// Summary of one map generation run, written next to the map as JSON
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub map: String,
    pub version: String,
    pub zoom: ZoomLevel,
    pub columns: u32,
    pub rows: u32,
    pub tile_size: u32,
    pub width: u32,
    pub height: u32,
    pub total_tiles: usize,
    pub cached_tiles: usize,
    pub downloaded_tiles: usize,
    pub failed_tiles: usize,
    pub failed: Vec<TileCoordinate>,
    pub cache_write_failures: usize,
    pub fingerprint: String,
    pub generated_at: String,
}

impl RunReport {
    pub(crate) fn new(
        grid: &TileGrid,
        outcome: &FetchOutcome,
        undecodable: &[TileCoordinate],
        fingerprint: String,
    ) -> Self {
        let mut cached_tiles = 0;
        let mut downloaded_tiles = 0;
        let mut failed = Vec::new();
        for result in &outcome.results {
            match result {
                TileResult::Success { coordinate, origin, .. } => {
                    if undecodable.contains(coordinate) {
                        failed.push(*coordinate);
                    } else if *origin == TileOrigin::Cache {
                        cached_tiles += 1;
                    } else {
                        downloaded_tiles += 1;
                    }
                }
                TileResult::Failure { coordinate, .. } => failed.push(*coordinate),
            }
        }
        failed.sort();

        let (width, height) = grid.canvas_size();
        Self {
            map: grid.map.clone(),
            version: grid.version.clone(),
            zoom: grid.zoom,
            columns: grid.columns(),
            rows: grid.rows(),
            tile_size: grid.tile_size,
            width,
            height,
            total_tiles: grid.tile_count(),
            cached_tiles,
            downloaded_tiles,
            failed_tiles: failed.len(),
            failed,
            cache_write_failures: outcome.cache_write_failures,
            fingerprint,
            generated_at: Utc::now().to_rfc3339(),
        }
    }

    /// Fraction of the grid that ended up blank
    pub fn failure_ratio(&self) -> f64 {
        if self.total_tiles == 0 {
            0.0
        } else {
            self.failed_tiles as f64 / self.total_tiles as f64
        }
    }

    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("Failed to create report file {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        Ok(())
    }
}
