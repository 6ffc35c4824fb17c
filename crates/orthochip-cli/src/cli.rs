use clap::{Args, Parser, Subcommand};
use geo::{Coord, Rect};
use orthochip_core::config::{parse_shape, parse_workers, CliConfigOverrides};
use orthochip_core::models::{ExecutionMode, NodataPolicy};
use std::path::PathBuf;

/// Orthochip - Orthophoto chips and cadastral land-use masks
#[derive(Parser, Debug)]
#[command(name = "orthochip")]
#[command(about = "Extract orthophoto chips and rasterized cadastral masks", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Output results in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Configuration file (TOML); defaults to ./orthochip.toml when present
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Extract chips and masks for every query point
    Run(RunArgs),

    /// Generate a grid of query points over an area of interest
    Grid(GridArgs),

    /// Summarise a batch log
    Status(StatusArgs),

    /// Show the layered configuration and where each value comes from
    Config,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Query point CSV with id, lat, lon columns
    #[arg(long, value_name = "CSV")]
    pub points: Option<PathBuf>,

    /// Catalog GeoJSON describing imagery and cadastre sheets
    #[arg(long, value_name = "GEOJSON")]
    pub catalog: Option<PathBuf>,

    /// Output directory for chips, masks and the batch log
    #[arg(long, value_name = "DIR")]
    pub outpath: Option<PathBuf>,

    /// Ground pixel size in meters (one of the fixed ladder values)
    #[arg(long)]
    pub pixel_size: Option<f64>,

    /// Output pixel size in meters when chips are resampled
    #[arg(long)]
    pub resample_size: Option<f64>,

    /// Chip shape as channels,height,width (e.g. 4,512,512)
    #[arg(long, value_parser = parse_shape)]
    pub shape: Option<[usize; 3]>,

    /// Cadastral class codes to burn, comma separated (e.g. 41,83)
    #[arg(long, value_delimiter = ',')]
    pub mask_labels: Vec<u16>,

    /// Execution mode (sequential or parallel)
    #[arg(long)]
    pub mode: Option<ExecutionMode>,

    /// Worker threads for parallel mode
    #[arg(long, value_parser = parse_workers)]
    pub workers: Option<usize>,

    /// Partial coverage handling (flag or remove)
    #[arg(long)]
    pub nodata_mode: Option<NodataPolicy>,

    /// Fill value for pixels outside source coverage
    #[arg(long)]
    pub nodata_value: Option<u8>,

    /// Also write the clipped cadastre features of every tile
    #[arg(long)]
    pub vector_extract: bool,
}

impl RunArgs {
    pub fn into_overrides(self) -> CliConfigOverrides {
        CliConfigOverrides {
            points_path: self.points,
            catalog_path: self.catalog,
            outpath: self.outpath,
            pixel_size: self.pixel_size,
            resample_size: self.resample_size,
            shape: self.shape,
            mask_labels: (!self.mask_labels.is_empty()).then_some(self.mask_labels),
            mode: self.mode,
            workers: self.workers,
            create_vector_extract: self.vector_extract.then_some(true),
            nodata_mode: self.nodata_mode,
            nodata_value: self.nodata_value,
        }
    }
}

#[derive(Args, Debug)]
pub struct GridArgs {
    /// Area of interest in the catalog CRS as minx,miny,maxx,maxy
    #[arg(long, value_parser = parse_bbox, allow_hyphen_values = true)]
    pub bbox: Rect<f64>,

    /// Destination CSV for the generated query points
    #[arg(long, short, value_name = "CSV")]
    pub output: PathBuf,

    /// Catalog GeoJSON describing imagery and cadastre sheets
    #[arg(long, value_name = "GEOJSON")]
    pub catalog: Option<PathBuf>,

    /// Ground pixel size in meters
    #[arg(long)]
    pub pixel_size: Option<f64>,

    /// Chip shape as channels,height,width
    #[arg(long, value_parser = parse_shape)]
    pub shape: Option<[usize; 3]>,
}

impl GridArgs {
    pub fn overrides(&self) -> CliConfigOverrides {
        CliConfigOverrides {
            catalog_path: self.catalog.clone(),
            pixel_size: self.pixel_size,
            shape: self.shape,
            ..Default::default()
        }
    }
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Batch log CSV; defaults to the log inside the configured outpath
    #[arg(long, value_name = "CSV")]
    pub log: Option<PathBuf>,

    /// List every failed tile
    #[arg(long)]
    pub failures: bool,
}

/// Parse `minx,miny,maxx,maxy` into a rectangle
fn parse_bbox(s: &str) -> Result<Rect<f64>, String> {
    let values = s
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f64>()
                .map_err(|_| format!("Invalid coordinate '{}' in bbox", part.trim()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    match values.as_slice() {
        [min_x, min_y, max_x, max_y] if min_x < max_x && min_y < max_y => Ok(Rect::new(
            Coord { x: *min_x, y: *min_y },
            Coord { x: *max_x, y: *max_y },
        )),
        [_, _, _, _] => Err("bbox minimum must be below its maximum".to_string()),
        _ => Err(format!("Invalid bbox: {}. Use minx,miny,maxx,maxy", s)),
    }
}
