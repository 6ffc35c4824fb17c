use crate::error::{OrthochipError, Result};
use crate::models::{ChipSpec, Crs, ExecutionMode, NodataPolicy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the batch log written into the output directory
pub const BATCH_LOG_FILE: &str = "statelog.csv";

/// Configuration source for tracking where values come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Default value
    Default,
    /// Loaded from config file
    File,
    /// Loaded from environment variable
    Environment,
    /// Provided via CLI argument
    Cli,
}

impl ConfigSource {
    /// Returns the precedence level (higher = higher priority)
    pub fn precedence(&self) -> u8 {
        match self {
            ConfigSource::Default => 0,
            ConfigSource::File => 1,
            ConfigSource::Environment => 2,
            ConfigSource::Cli => 3,
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }

    /// Update the value if the new source has at least the same precedence
    pub fn update(&mut self, value: T, source: ConfigSource) {
        if source.precedence() >= self.source.precedence() {
            self.value = value;
            self.source = source;
        }
    }
}

/// Layered configuration for an extraction batch
#[derive(Debug, Clone)]
pub struct LayeredConfig {
    pub points_path: ConfigValue<Option<PathBuf>>,
    pub catalog_path: ConfigValue<Option<PathBuf>>,
    pub outpath: ConfigValue<Option<PathBuf>>,
    pub pixel_size: ConfigValue<Option<f64>>,
    pub resample_size: ConfigValue<Option<f64>>,
    pub shape: ConfigValue<Option<[usize; 3]>>,
    pub mask_labels: ConfigValue<Vec<u16>>,
    pub mode: ConfigValue<ExecutionMode>,
    pub workers: ConfigValue<Option<usize>>,
    pub flush_every: ConfigValue<usize>,
    pub create_vector_extract: ConfigValue<bool>,
    pub nodata_mode: ConfigValue<NodataPolicy>,
    pub nodata_value: ConfigValue<u8>,
    pub geographic_epsg: ConfigValue<u32>,
    pub class_attribute: ConfigValue<String>,
}

impl LayeredConfig {
    /// Create a new configuration with default values
    pub fn with_defaults() -> Self {
        Self {
            points_path: ConfigValue::new(None, ConfigSource::Default),
            catalog_path: ConfigValue::new(None, ConfigSource::Default),
            outpath: ConfigValue::new(None, ConfigSource::Default),
            pixel_size: ConfigValue::new(None, ConfigSource::Default),
            resample_size: ConfigValue::new(None, ConfigSource::Default),
            shape: ConfigValue::new(None, ConfigSource::Default),
            mask_labels: ConfigValue::new(Vec::new(), ConfigSource::Default),
            mode: ConfigValue::new(ExecutionMode::Sequential, ConfigSource::Default),
            workers: ConfigValue::new(None, ConfigSource::Default),
            flush_every: ConfigValue::new(100, ConfigSource::Default),
            create_vector_extract: ConfigValue::new(false, ConfigSource::Default),
            nodata_mode: ConfigValue::new(NodataPolicy::Flag, ConfigSource::Default),
            nodata_value: ConfigValue::new(0, ConfigSource::Default),
            geographic_epsg: ConfigValue::new(4326, ConfigSource::Default),
            class_attribute: ConfigValue::new("NS".to_string(), ConfigSource::Default),
        }
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        let content =
            fs::read_to_string(path.as_ref()).map_err(|e| OrthochipError::ConfigInvalid {
                key: "file".to_string(),
                reason: format!("Failed to read config file: {}", e),
            })?;

        let file_config: FileConfig =
            toml::from_str(&content).map_err(|e| OrthochipError::ConfigInvalid {
                key: "file".to_string(),
                reason: format!("Failed to parse TOML: {}", e),
            })?;

        // Relative paths in the file resolve against the file's directory
        let base = path.as_ref().parent().map(Path::to_path_buf).unwrap_or_default();
        let resolve = |p: PathBuf| if p.is_relative() { base.join(p) } else { p };

        if let Some(points_path) = file_config.points_path {
            self.points_path.update(Some(resolve(points_path)), ConfigSource::File);
        }
        if let Some(catalog_path) = file_config.catalog_path {
            self.catalog_path.update(Some(resolve(catalog_path)), ConfigSource::File);
        }
        if let Some(outpath) = file_config.outpath {
            self.outpath.update(Some(resolve(outpath)), ConfigSource::File);
        }
        if let Some(pixel_size) = file_config.pixel_size {
            self.pixel_size.update(Some(pixel_size), ConfigSource::File);
        }
        if let Some(resample_size) = file_config.resample_size {
            self.resample_size.update(Some(resample_size), ConfigSource::File);
        }
        if let Some(shape) = file_config.shape {
            self.shape.update(Some(shape), ConfigSource::File);
        }
        if let Some(mask_labels) = file_config.mask_labels {
            self.mask_labels.update(mask_labels, ConfigSource::File);
        }
        if let Some(mode) = file_config.mode {
            self.mode.update(mode, ConfigSource::File);
        }
        if let Some(workers) = file_config.workers {
            self.workers.update(Some(positive("workers", workers)?), ConfigSource::File);
        }
        if let Some(flush_every) = file_config.flush_every {
            self.flush_every.update(positive("flush_every", flush_every)?, ConfigSource::File);
        }
        if let Some(create_vector_extract) = file_config.create_vector_extract {
            self.create_vector_extract.update(create_vector_extract, ConfigSource::File);
        }
        if let Some(nodata_mode) = file_config.nodata_mode {
            self.nodata_mode.update(nodata_mode, ConfigSource::File);
        }
        if let Some(nodata_value) = file_config.nodata_value {
            self.nodata_value.update(nodata_value, ConfigSource::File);
        }
        if let Some(geographic_epsg) = file_config.geographic_epsg {
            self.geographic_epsg.update(geographic_epsg, ConfigSource::File);
        }
        if let Some(class_attribute) = file_config.class_attribute {
            self.class_attribute.update(class_attribute, ConfigSource::File);
        }

        Ok(self)
    }

    /// Load configuration from `ORTHOCHIP_*` environment variables
    pub fn load_from_env(self) -> Self {
        self.load_from_lookup(|key| env::var(key).ok())
    }

    /// Apply the environment layer from any key lookup
    pub fn load_from_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("ORTHOCHIP_POINTS") {
            self.points_path.update(Some(PathBuf::from(raw)), ConfigSource::Environment);
        }

        if let Some(raw) = lookup("ORTHOCHIP_CATALOG") {
            self.catalog_path.update(Some(PathBuf::from(raw)), ConfigSource::Environment);
        }

        if let Some(raw) = lookup("ORTHOCHIP_OUTPATH") {
            self.outpath.update(Some(PathBuf::from(raw)), ConfigSource::Environment);
        }

        if let Some(raw) = lookup("ORTHOCHIP_PIXEL_SIZE") {
            match raw.trim().parse::<f64>() {
                Ok(value) => self.pixel_size.update(Some(value), ConfigSource::Environment),
                Err(_) => tracing::warn!(
                    "Invalid ORTHOCHIP_PIXEL_SIZE value '{}': expected a number",
                    raw
                ),
            }
        }

        if let Some(raw) = lookup("ORTHOCHIP_RESAMPLE_SIZE") {
            match raw.trim().parse::<f64>() {
                Ok(value) => self.resample_size.update(Some(value), ConfigSource::Environment),
                Err(_) => tracing::warn!(
                    "Invalid ORTHOCHIP_RESAMPLE_SIZE value '{}': expected a number",
                    raw
                ),
            }
        }

        if let Some(raw) = lookup("ORTHOCHIP_SHAPE") {
            match parse_shape(&raw) {
                Ok(shape) => self.shape.update(Some(shape), ConfigSource::Environment),
                Err(_) => tracing::warn!(
                    "Invalid ORTHOCHIP_SHAPE value '{}': expected channels,height,width",
                    raw
                ),
            }
        }

        if let Some(raw) = lookup("ORTHOCHIP_MASK_LABELS") {
            match parse_mask_labels(&raw) {
                Ok(labels) => self.mask_labels.update(labels, ConfigSource::Environment),
                Err(_) => tracing::warn!(
                    "Invalid ORTHOCHIP_MASK_LABELS value '{}': expected a comma separated list of codes",
                    raw
                ),
            }
        }

        if let Some(raw) = lookup("ORTHOCHIP_MODE") {
            match raw.parse::<ExecutionMode>() {
                Ok(mode) => self.mode.update(mode, ConfigSource::Environment),
                Err(_) => tracing::warn!(
                    "Invalid ORTHOCHIP_MODE value '{}': expected sequential or parallel",
                    raw
                ),
            }
        }

        if let Some(raw) = lookup("ORTHOCHIP_WORKERS") {
            match parse_workers(&raw) {
                Ok(workers) => self.workers.update(Some(workers), ConfigSource::Environment),
                Err(_) => tracing::warn!(
                    "Invalid ORTHOCHIP_WORKERS value '{}': expected a positive integer",
                    raw
                ),
            }
        }

        if let Some(raw) = lookup("ORTHOCHIP_NODATA_MODE") {
            match raw.parse::<NodataPolicy>() {
                Ok(policy) => self.nodata_mode.update(policy, ConfigSource::Environment),
                Err(_) => tracing::warn!(
                    "Invalid ORTHOCHIP_NODATA_MODE value '{}': expected flag or remove",
                    raw
                ),
            }
        }

        if let Some(raw) = lookup("ORTHOCHIP_NODATA_VALUE") {
            match raw.trim().parse::<u8>() {
                Ok(value) => self.nodata_value.update(value, ConfigSource::Environment),
                Err(_) => tracing::warn!(
                    "Invalid ORTHOCHIP_NODATA_VALUE value '{}': expected 0-255",
                    raw
                ),
            }
        }

        self
    }

    /// Update configuration from CLI arguments
    pub fn update_from_cli(&mut self, overrides: CliConfigOverrides) {
        if let Some(points_path) = overrides.points_path {
            self.points_path.update(Some(points_path), ConfigSource::Cli);
        }
        if let Some(catalog_path) = overrides.catalog_path {
            self.catalog_path.update(Some(catalog_path), ConfigSource::Cli);
        }
        if let Some(outpath) = overrides.outpath {
            self.outpath.update(Some(outpath), ConfigSource::Cli);
        }
        if let Some(pixel_size) = overrides.pixel_size {
            self.pixel_size.update(Some(pixel_size), ConfigSource::Cli);
        }
        if let Some(resample_size) = overrides.resample_size {
            self.resample_size.update(Some(resample_size), ConfigSource::Cli);
        }
        if let Some(shape) = overrides.shape {
            self.shape.update(Some(shape), ConfigSource::Cli);
        }
        if let Some(mask_labels) = overrides.mask_labels {
            self.mask_labels.update(mask_labels, ConfigSource::Cli);
        }
        if let Some(mode) = overrides.mode {
            self.mode.update(mode, ConfigSource::Cli);
        }
        if let Some(workers) = overrides.workers {
            self.workers.update(Some(workers), ConfigSource::Cli);
        }
        if let Some(create_vector_extract) = overrides.create_vector_extract {
            self.create_vector_extract.update(create_vector_extract, ConfigSource::Cli);
        }
        if let Some(nodata_mode) = overrides.nodata_mode {
            self.nodata_mode.update(nodata_mode, ConfigSource::Cli);
        }
        if let Some(nodata_value) = overrides.nodata_value {
            self.nodata_value.update(nodata_value, ConfigSource::Cli);
        }
    }

    /// Validate the batch-shared chip parameters
    ///
    /// Every failure here is fatal to the whole batch.
    pub fn to_chip_spec(&self) -> Result<ChipSpec> {
        let pixel_size = self
            .pixel_size
            .value
            .ok_or_else(|| OrthochipError::ConfigMissing { key: "pixel_size".to_string() })?;
        let shape = self
            .shape
            .value
            .ok_or_else(|| OrthochipError::ConfigMissing { key: "shape".to_string() })?;
        let outpath = self.outpath_required()?;
        if self.mask_labels.value.is_empty() {
            return Err(OrthochipError::ConfigMissing { key: "mask_labels".to_string() });
        }

        ChipSpec::builder(pixel_size, shape)
            .resample_size(self.resample_size.value)
            .classes(self.mask_labels.value.iter().copied())
            .nodata_policy(self.nodata_mode.value)
            .nodata_value(self.nodata_value.value)
            .write_vector_extract(self.create_vector_extract.value)
            .outpath(outpath)
            .build()
            .map_err(|err| match err {
                OrthochipError::Validation { field, reason } => {
                    OrthochipError::ConfigInvalid { key: field, reason }
                }
                other => other,
            })
    }

    pub fn outpath_required(&self) -> Result<PathBuf> {
        self.outpath
            .value
            .clone()
            .ok_or_else(|| OrthochipError::ConfigMissing { key: "outpath".to_string() })
    }

    pub fn points_path_required(&self) -> Result<PathBuf> {
        self.points_path
            .value
            .clone()
            .ok_or_else(|| OrthochipError::ConfigMissing { key: "points_path".to_string() })
    }

    pub fn catalog_path_required(&self) -> Result<PathBuf> {
        self.catalog_path
            .value
            .clone()
            .ok_or_else(|| OrthochipError::ConfigMissing { key: "catalog_path".to_string() })
    }

    /// Reference system of query point coordinates
    pub fn geographic_crs(&self) -> Crs {
        Crs::from_epsg(self.geographic_epsg.value)
    }

    /// Batch log location inside the output directory
    pub fn batch_log_path(&self) -> Result<PathBuf> {
        Ok(self.outpath_required()?.join(BATCH_LOG_FILE))
    }

    /// Get all configuration values as a map for inspection
    pub fn to_inspection_map(&self) -> HashMap<String, (String, ConfigSource)> {
        fn path(value: &Option<PathBuf>) -> String {
            value.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "<unset>".to_string())
        }
        fn optional<T: ToString>(value: &Option<T>) -> String {
            value.as_ref().map(ToString::to_string).unwrap_or_else(|| "<unset>".to_string())
        }

        let mut map = HashMap::new();

        map.insert("points_path".to_string(), (path(&self.points_path.value), self.points_path.source));
        map.insert(
            "catalog_path".to_string(),
            (path(&self.catalog_path.value), self.catalog_path.source),
        );
        map.insert("outpath".to_string(), (path(&self.outpath.value), self.outpath.source));
        map.insert(
            "pixel_size".to_string(),
            (optional(&self.pixel_size.value), self.pixel_size.source),
        );
        map.insert(
            "resample_size".to_string(),
            (optional(&self.resample_size.value), self.resample_size.source),
        );
        map.insert(
            "shape".to_string(),
            (
                self.shape
                    .value
                    .map(|[c, h, w]| format!("[{}, {}, {}]", c, h, w))
                    .unwrap_or_else(|| "<unset>".to_string()),
                self.shape.source,
            ),
        );
        map.insert(
            "mask_labels".to_string(),
            (
                self.mask_labels.value.iter().map(ToString::to_string).collect::<Vec<_>>().join(","),
                self.mask_labels.source,
            ),
        );
        map.insert("mode".to_string(), (self.mode.value.to_string(), self.mode.source));
        map.insert(
            "workers".to_string(),
            (
                self.workers.value.map(|w| w.to_string()).unwrap_or_else(|| "auto".to_string()),
                self.workers.source,
            ),
        );
        map.insert(
            "flush_every".to_string(),
            (self.flush_every.value.to_string(), self.flush_every.source),
        );
        map.insert(
            "create_vector_extract".to_string(),
            (self.create_vector_extract.value.to_string(), self.create_vector_extract.source),
        );
        map.insert(
            "nodata_mode".to_string(),
            (self.nodata_mode.value.to_string(), self.nodata_mode.source),
        );
        map.insert(
            "nodata_value".to_string(),
            (self.nodata_value.value.to_string(), self.nodata_value.source),
        );
        map.insert(
            "geographic_epsg".to_string(),
            (format!("EPSG:{}", self.geographic_epsg.value), self.geographic_epsg.source),
        );
        map.insert(
            "class_attribute".to_string(),
            (self.class_attribute.value.clone(), self.class_attribute.source),
        );

        map
    }
}

/// Configuration loaded from TOML file
#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    points_path: Option<PathBuf>,
    catalog_path: Option<PathBuf>,
    outpath: Option<PathBuf>,
    pixel_size: Option<f64>,
    resample_size: Option<f64>,
    shape: Option<[usize; 3]>,
    mask_labels: Option<Vec<u16>>,
    mode: Option<ExecutionMode>,
    workers: Option<usize>,
    flush_every: Option<usize>,
    create_vector_extract: Option<bool>,
    nodata_mode: Option<NodataPolicy>,
    nodata_value: Option<u8>,
    geographic_epsg: Option<u32>,
    class_attribute: Option<String>,
}

/// CLI configuration overrides
#[derive(Debug, Default)]
pub struct CliConfigOverrides {
    pub points_path: Option<PathBuf>,
    pub catalog_path: Option<PathBuf>,
    pub outpath: Option<PathBuf>,
    pub pixel_size: Option<f64>,
    pub resample_size: Option<f64>,
    pub shape: Option<[usize; 3]>,
    pub mask_labels: Option<Vec<u16>>,
    pub mode: Option<ExecutionMode>,
    pub workers: Option<usize>,
    pub create_vector_extract: Option<bool>,
    pub nodata_mode: Option<NodataPolicy>,
    pub nodata_value: Option<u8>,
}

/// Parse a chip shape written as `c,h,w`
pub fn parse_shape(s: &str) -> Result<[usize; 3]> {
    let invalid = || OrthochipError::ConfigInvalid {
        key: "shape".to_string(),
        reason: format!("Invalid shape: {}. Use channels,height,width (e.g. 4,512,512)", s),
    };
    let parts = s
        .split(',')
        .map(|part| part.trim().parse::<usize>().map_err(|_| invalid()))
        .collect::<Result<Vec<_>>>()?;
    match parts.as_slice() {
        [c, h, w] => Ok([*c, *h, *w]),
        _ => Err(invalid()),
    }
}

/// Parse a comma separated list of class codes
pub fn parse_mask_labels(s: &str) -> Result<Vec<u16>> {
    s.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(|part| {
            part.trim().parse::<u16>().map_err(|_| OrthochipError::ConfigInvalid {
                key: "mask_labels".to_string(),
                reason: format!("Invalid class code: {}", part.trim()),
            })
        })
        .collect()
}

/// Parse a worker count; zero is rejected
pub fn parse_workers(s: &str) -> Result<usize> {
    let workers = s.trim().parse::<usize>().map_err(|_| OrthochipError::ConfigInvalid {
        key: "workers".to_string(),
        reason: format!("Invalid worker count: {}. Use a positive integer", s),
    })?;
    positive("workers", workers)
}

fn positive(key: &str, value: usize) -> Result<usize> {
    if value == 0 {
        return Err(OrthochipError::ConfigInvalid {
            key: key.to_string(),
            reason: "must be a positive integer".to_string(),
        });
    }
    Ok(value)
}
