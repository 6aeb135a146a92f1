use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use log::{debug, info, warn};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::cache::TileCache;
use crate::catalog::{TileCoordinate, TileGrid};
use crate::download::Transport;
use crate::error::{PipelineError, TileError};

mod progress;

pub use progress::{CancelToken, NoProgress, ProgressSink};
use progress::ProgressCounter;

/// Where a successfully obtained tile came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileOrigin {
    Cache,
    Network,
}

/// Outcome of fetching one tile
#[derive(Debug, Clone)]
pub enum TileResult {
    Success {
        coordinate: TileCoordinate,
        data: Vec<u8>,
        origin: TileOrigin,
    },
    Failure {
        coordinate: TileCoordinate,
        error: TileError,
    },
}

impl TileResult {
    pub fn coordinate(&self) -> TileCoordinate {
        match self {
            TileResult::Success { coordinate, .. } => *coordinate,
            TileResult::Failure { coordinate, .. } => *coordinate,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TileResult::Success { .. })
    }
}

/// Fetcher settings
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Number of tiles fetched concurrently
    pub workers: usize,

    /// Upper bound on a single tile request
    pub request_timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Results of one pass over a grid
#[derive(Debug)]
pub struct FetchOutcome {
    /// One result per grid coordinate, in grid order
    pub results: Vec<TileResult>,

    /// Tiles that were downloaded but could not be written to the cache
    pub cache_write_failures: usize,
}

/// Fetches every tile of a grid through the cache, downloading misses on a bounded pool.
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    pool: ThreadPool,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(transport: Arc<dyn Transport>, config: FetchConfig) -> Result<Self, PipelineError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.workers.max(1))
            .thread_name(|i| format!("tile-fetch-{}", i))
            .build()
            .map_err(|e| PipelineError::WorkerPool(e.to_string()))?;

        Ok(Self {
            transport,
            pool,
            config,
        })
    }

    /// Attempt every coordinate of `grid`.
    ///
    /// Never aborts early on failures. `progress` is called once per attempted
    /// tile; tiles skipped because of `cancel` are reported as
    /// [`TileError::Cancelled`] and do not count as attempts.
    pub fn fetch_all(
        &self,
        grid: &TileGrid,
        cache: &TileCache,
        progress: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> FetchOutcome {
        let coordinates = grid.coordinates();
        let counter = ProgressCounter::new(coordinates.len(), progress);
        let cache_write_failures = AtomicUsize::new(0);

        info!(
            "Fetching {} tiles for {} zoom {} with {} workers",
            coordinates.len(),
            grid.map,
            grid.zoom,
            self.config.workers.max(1)
        );

        let results: Vec<TileResult> = self.pool.install(|| {
            coordinates
                .par_iter()
                .map(|&coordinate| {
                    if cancel.is_cancelled() {
                        return TileResult::Failure {
                            coordinate,
                            error: TileError::Cancelled,
                        };
                    }
                    let result = self.fetch_one(grid, coordinate, cache, &cache_write_failures);
                    counter.tick();
                    result
                })
                .collect()
        });

        FetchOutcome {
            results,
            cache_write_failures: cache_write_failures.load(Ordering::Relaxed),
        }
    }

    fn fetch_one(
        &self,
        grid: &TileGrid,
        coordinate: TileCoordinate,
        cache: &TileCache,
        cache_write_failures: &AtomicUsize,
    ) -> TileResult {
        let key = grid.key(coordinate);

        // Check if the tile is already in the cache
        if let Some(data) = cache.get(&key) {
            match check_payload(&data) {
                Ok(()) => {
                    debug!("Using cached tile {}", key);
                    return TileResult::Success {
                        coordinate,
                        data,
                        origin: TileOrigin::Cache,
                    };
                }
                Err(e) => {
                    warn!("Discarding cached tile {}: {}", key, e);
                    if let Err(e) = cache.remove(&key) {
                        warn!("Failed to remove cached tile {}: {}", key, e);
                    }
                }
            }
        }

        let url = grid.url(coordinate);
        let data = match self.transport.fetch(&url, self.config.request_timeout) {
            Ok(data) => data,
            Err(e) => {
                warn!("Failed to download tile {}: {}", coordinate, e);
                return TileResult::Failure {
                    coordinate,
                    error: e.into(),
                };
            }
        };

        if let Err(e) = check_payload(&data) {
            warn!("Failed to download tile {}: {}", coordinate, e);
            return TileResult::Failure { coordinate, error: e };
        }

        // Losing the cache write only costs a re-download on the next run
        if let Err(e) = cache.put(&key, &data) {
            warn!("Failed to cache tile {}: {}", key, e);
            cache_write_failures.fetch_add(1, Ordering::Relaxed);
        }

        TileResult::Success {
            coordinate,
            data,
            origin: TileOrigin::Network,
        }
    }
}

/// Accept only payloads that decode completely. The decoded raster is dropped
/// so memory stays bounded by the compressed tiles.
fn check_payload(data: &[u8]) -> Result<(), TileError> {
    image::load_from_memory(data)
        .map(|_| ())
        .map_err(|e| TileError::Decode(e.to_string()))
}
