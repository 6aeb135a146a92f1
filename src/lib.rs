//! Download a grid of map tiles from a tile server and stitch them into one image.
//!
//! [`MapGenerator::generate_map`] resolves a map label and zoom level into a
//! [`TileGrid`](catalog::TileGrid), fetches every tile through the on-disk
//! [`TileCache`](cache::TileCache), and composites the results into a
//! [`CompositeImage`](stitch::CompositeImage).

pub mod cache;
pub mod catalog;
pub mod download;
pub mod error;
pub mod fetch;
pub mod pipeline;
pub mod stitch;

#[cfg(test)]
mod test_support;

pub use cache::TileCache;
pub use catalog::{Catalog, MapDescriptor, MapStyle, TileCoordinate, TileGrid, ZoomLevel};
pub use download::{HttpTransport, Transport};
pub use error::{CacheError, CatalogError, PipelineError, ResolveError, TileError, TransportError};
pub use fetch::{CancelToken, FetchConfig, NoProgress, ProgressSink, TileResult};
pub use pipeline::{GeneratedMap, GeneratorConfig, MapGenerator, RunReport};
pub use stitch::CompositeImage;
