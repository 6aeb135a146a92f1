use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use daymap::catalog::DEFAULT_ZOOM;
use daymap::pipeline::default_output_name;
use daymap::{
    Catalog, FetchConfig, GeneratorConfig, HttpTransport, MapGenerator, ProgressSink, TileCache,
    ZoomLevel,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the tile cache directory
    #[arg(short, long, default_value = "tiles")]
    cache_dir: PathBuf,

    /// Path to the output directory
    #[arg(short, long, default_value = "output")]
    output_dir: PathBuf,

    /// JSON map catalog to use instead of the built-in one
    #[arg(long)]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download and stitch a full map
    Generate {
        /// Map label, e.g. ChernarusPlus-Top
        #[arg(short, long)]
        map: String,

        /// Zoom level; higher levels give a larger, more detailed map
        #[arg(short, long, default_value_t = DEFAULT_ZOOM.value())]
        zoom: u8,

        /// Override the tile set version of the map
        #[arg(long)]
        map_version: Option<String>,

        /// Output filename for the stitched map
        #[arg(long)]
        output: Option<String>,

        /// Number of tiles downloaded in parallel
        #[arg(short, long, default_value_t = 8)]
        workers: usize,

        /// Timeout for a single tile request, in seconds
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,

        /// Fail instead of writing a map when more than this fraction of tiles is missing
        #[arg(long, value_parser = parse_failure_ratio)]
        max_failure_ratio: Option<f64>,

        /// Do not write the JSON run report next to the map
        #[arg(long)]
        no_report: bool,
    },

    /// List the maps and zoom levels of the catalog
    ListMaps,

    /// Clear the tile cache
    ClearCache {
        /// Only clear the tiles of this map
        #[arg(short, long)]
        map: Option<String>,
    },
}

/// Accepts a fraction between 0 and 1 inclusive
fn parse_failure_ratio(s: &str) -> Result<f64, String> {
    let ratio: f64 = s.parse().map_err(|_| format!("{} is not a number", s))?;
    if (0.0..=1.0).contains(&ratio) {
        Ok(ratio)
    } else {
        Err(format!("{} is not between 0 and 1", s))
    }
}

/// Logs download progress in 5% steps
struct LogProgress;

impl ProgressSink for LogProgress {
    fn on_progress(&self, completed: usize, total: usize) {
        let step = |n: usize| n * 20 / total.max(1);
        if completed == total || step(completed) != step(completed - 1) {
            info!(
                "Fetched {}/{} tiles ({}%)",
                completed,
                total,
                completed * 100 / total.max(1)
            );
        }
    }
}

fn main() -> Result<()> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Parse command line arguments
    let cli = Cli::parse();

    let mut catalog = match &cli.catalog {
        Some(path) => Catalog::from_json_file(path)
            .with_context(|| format!("Failed to load catalog {}", path.display()))?,
        None => Catalog::default(),
    };

    // Create cache directory
    let cache = TileCache::new(&cli.cache_dir).context("Failed to create cache")?;

    // Process command
    match cli.command {
        Commands::Generate {
            map,
            zoom,
            map_version,
            output,
            workers,
            timeout_secs,
            max_failure_ratio,
            no_report,
        } => {
            if let Some(version) = &map_version {
                catalog
                    .override_version(&map, version)
                    .context("Failed to set map version")?;
            }
            let zoom = ZoomLevel::new(zoom);

            // Create output directory
            std::fs::create_dir_all(&cli.output_dir)
                .context("Failed to create output directory")?;

            let transport = HttpTransport::new().context("Failed to create HTTP client")?;
            let config = GeneratorConfig {
                fetch: FetchConfig {
                    workers,
                    request_timeout: Duration::from_secs(timeout_secs),
                },
                max_failure_ratio,
            };
            let generator = MapGenerator::new(catalog, cache, Arc::new(transport), config)
                .context("Failed to set up map generator")?;

            let map_data = generator
                .generate_map(&map, zoom, &LogProgress)
                .with_context(|| format!("Failed to generate {} at zoom {}", map, zoom))?;

            // Write the map to a file
            let file_name = output.unwrap_or_else(|| default_output_name(&map, zoom));
            let output_path = cli.output_dir.join(file_name);
            info!("Writing map to {}", output_path.display());
            map_data
                .image
                .save_png(&output_path)
                .context("Failed to write map image")?;

            if !no_report {
                let report_path = output_path.with_extension("json");
                map_data.report.write_json(&report_path)?;
                info!("Run report written to {}", report_path.display());
            }

            if map_data.report.failed_tiles > 0 {
                info!(
                    "Done, {} of {} tiles missing",
                    map_data.report.failed_tiles, map_data.report.total_tiles
                );
            } else {
                info!("Done");
            }
        }

        Commands::ListMaps => {
            for descriptor in catalog.maps() {
                let zooms: Vec<String> = descriptor
                    .supported_zooms()
                    .iter()
                    .map(ZoomLevel::to_string)
                    .collect();
                println!(
                    "{:<20} version {:<8} zoom {}",
                    descriptor.label(),
                    descriptor.version,
                    zooms.join(",")
                );
            }
        }

        Commands::ClearCache { map } => match map {
            Some(label) => {
                info!("Clearing cached tiles of {}", label);
                cache.clear_map(&label).context("Failed to clear cache")?;
                info!("Cache cleared");
            }
            None => {
                info!("Clearing cache");
                cache.clear().context("Failed to clear cache")?;
                info!("Cache cleared");
            }
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_failure_ratio() {
        assert_eq!(parse_failure_ratio("0"), Ok(0.0));
        assert_eq!(parse_failure_ratio("0.25"), Ok(0.25));
        assert_eq!(parse_failure_ratio("1"), Ok(1.0));
        for bad in ["-0.1", "1.01", "NaN", "inf", "half"] {
            assert!(parse_failure_ratio(bad).is_err(), "{} should be rejected", bad);
        }
    }

    #[test]
    fn test_cli_rejects_out_of_range_failure_ratio() {
        let args = ["daymap", "generate", "--map", "Livonia-Top", "--max-failure-ratio", "1.5"];
        assert!(Cli::try_parse_from(args).is_err());

        let args = ["daymap", "generate", "--map", "Livonia-Top", "--max-failure-ratio", "0.1"];
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Commands::Generate { max_failure_ratio, .. } => assert_eq!(max_failure_ratio, Some(0.1)),
            _ => panic!("expected generate"),
        }
    }
}
