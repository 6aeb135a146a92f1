use std::sync::Arc;

use log::{info, warn};

use crate::cache::TileCache;
use crate::catalog::{Catalog, TileGrid, ZoomLevel};
use crate::download::Transport;
use crate::error::PipelineError;
use crate::fetch::{CancelToken, FetchConfig, Fetcher, ProgressSink};
use crate::stitch::{stitch, CompositeImage};

mod report;

pub use report::RunReport;

/// Configuration for map generation
#[derive(Debug, Clone, Default)]
pub struct GeneratorConfig {
    pub fetch: FetchConfig,

    /// Abort when more than this fraction of tiles is missing.
    /// `None` always produces a best-effort partial map.
    pub max_failure_ratio: Option<f64>,
}

/// A stitched map and the summary of how it was obtained
#[derive(Debug)]
pub struct GeneratedMap {
    pub image: CompositeImage,
    pub report: RunReport,
}

/// File name the original downloader gave its output
pub fn default_output_name(label: &str, zoom: ZoomLevel) -> String {
    format!("DayZ_Map_{}_{}.png", label, zoom)
}

/// Resolves, fetches and stitches maps against one catalog and one cache
pub struct MapGenerator {
    catalog: Catalog,
    cache: TileCache,
    fetcher: Fetcher,
    config: GeneratorConfig,
}

impl MapGenerator {
    pub fn new(
        catalog: Catalog,
        cache: TileCache,
        transport: Arc<dyn Transport>,
        config: GeneratorConfig,
    ) -> Result<Self, PipelineError> {
        if let Some(limit) = config.max_failure_ratio {
            if !(0.0..=1.0).contains(&limit) {
                return Err(PipelineError::InvalidConfig(format!(
                    "max_failure_ratio must be between 0 and 1, got {}",
                    limit
                )));
            }
        }
        let fetcher = Fetcher::new(transport, config.fetch.clone())?;
        Ok(Self {
            catalog,
            cache,
            fetcher,
            config,
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn cache(&self) -> &TileCache {
        &self.cache
    }

    pub fn resolve(&self, label: &str, zoom: ZoomLevel) -> Result<TileGrid, PipelineError> {
        Ok(self.catalog.resolve(label, zoom)?)
    }

    /// Build the full map for `label` at `zoom`.
    ///
    /// Fails before any cache or network access when the map or zoom level is
    /// unknown. Individual tile failures only leave transparent gaps.
    pub fn generate_map(
        &self,
        label: &str,
        zoom: ZoomLevel,
        progress: &dyn ProgressSink,
    ) -> Result<GeneratedMap, PipelineError> {
        self.generate_map_with_cancel(label, zoom, progress, &CancelToken::new())
    }

    /// Like [`generate_map`](Self::generate_map), abortable between tile fetches through `cancel`.
    pub fn generate_map_with_cancel(
        &self,
        label: &str,
        zoom: ZoomLevel,
        progress: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<GeneratedMap, PipelineError> {
        let grid = self.resolve(label, zoom)?;
        let (width, height) = grid.canvas_size();
        info!(
            "Generating {} v{} zoom {}: {}x{} tiles, {}x{} px",
            grid.map,
            grid.version,
            grid.zoom,
            grid.columns(),
            grid.rows(),
            width,
            height
        );

        let outcome = self.fetcher.fetch_all(&grid, &self.cache, progress, cancel);
        if cancel.is_cancelled() {
            info!("Map generation cancelled");
            return Err(PipelineError::Cancelled);
        }

        info!("Stitching tiles");
        let stitched = stitch(grid.size, grid.tile_size, &outcome.results);
        let report = RunReport::new(
            &grid,
            &outcome,
            &stitched.undecodable,
            stitched.image.fingerprint(),
        );

        if report.failed_tiles > 0 {
            warn!(
                "{} of {} tiles are missing and will be blank",
                report.failed_tiles, report.total_tiles
            );
        }
        if let Some(limit) = self.config.max_failure_ratio {
            if report.failure_ratio() > limit {
                return Err(PipelineError::TooManyFailures {
                    failed: report.failed_tiles,
                    total: report.total_tiles,
                });
            }
        }

        info!(
            "Map complete: {} cached, {} downloaded, {} failed",
            report.cached_tiles, report.downloaded_tiles, report.failed_tiles
        );

        Ok(GeneratedMap {
            image: stitched.image,
            report,
        })
    }
}
