use std::path::PathBuf;

use thiserror::Error;

use crate::catalog::ZoomLevel;

/// Errors raised while resolving a map/zoom pair into a tile grid.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Unsupported map: {0}")]
    UnsupportedMap(String),

    #[error("Map {map} does not support zoom level {zoom}")]
    UnsupportedZoom { map: String, zoom: ZoomLevel },
}

/// Errors raised while loading or editing a catalog.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("IO error reading catalog {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse catalog: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid catalog: {0}")]
    Invalid(String),

    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

/// Errors raised by a [`Transport`](crate::download::Transport).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Request to {0} timed out")]
    Timeout(String),

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("Failed to create HTTP client: {0}")]
    Client(String),
}

/// Why a single tile could not be obtained.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TileError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Payload is not a valid image: {0}")]
    Decode(String),

    #[error("Cancelled before the tile was fetched")]
    Cancelled,
}

/// Errors raised by the on-disk tile cache.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Not a valid map label: {0:?}")]
    InvalidLabel(String),
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io { path: path.into(), source }
    }
}

/// Errors that abort a whole map generation run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("{failed} of {total} tiles failed, above the configured limit")]
    TooManyFailures { failed: usize, total: usize },

    #[error("Map generation was cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to build worker pool: {0}")]
    WorkerPool(String),
}
