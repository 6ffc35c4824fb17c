use console::style;
use orthochip_core::OrthochipError;
use std::fmt;
use std::path::Path;

/// Enhanced error type with suggestions
#[derive(Clone)]
pub struct CliError {
    pub message: String,
    pub context: Option<String>,
    pub suggestions: Vec<String>,
    pub help_command: Option<String>,
}

impl CliError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: None,
            suggestions: Vec::new(),
            help_command: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_help(mut self, command: impl Into<String>) -> Self {
        self.help_command = Some(command.into());
        self
    }

    pub fn display(&self) {
        eprintln!("{} {}\n", style("✗").red().bold(), style(&self.message).red().bold());

        if let Some(ref context) = self.context {
            eprintln!("{}", context);
            eprintln!();
        }

        if !self.suggestions.is_empty() {
            eprintln!("{}", style("To fix this:").yellow().bold());
            for (i, suggestion) in self.suggestions.iter().enumerate() {
                eprintln!("  {}. {}", i + 1, suggestion);
            }
            eprintln!();
        }

        if let Some(ref help_cmd) = self.help_command {
            eprintln!("{} {}", style("Need help?").cyan(), style(help_cmd).cyan().bold());
        }
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "status": "error",
            "message": self.message,
            "context": self.context,
            "suggestions": self.suggestions,
        })
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Debug for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

/// Print a failed command to stderr in the selected format
pub fn report(error: &anyhow::Error, json: bool) {
    let cli_error = classify(error);
    if json {
        eprintln!(
            "{}",
            serde_json::to_string_pretty(&cli_error.to_json())
                .unwrap_or_else(|_| cli_error.message.clone())
        );
    } else {
        cli_error.display();
    }
}

fn classify(error: &anyhow::Error) -> CliError {
    if let Some(cli_error) = error.downcast_ref::<CliError>() {
        return cli_error.clone();
    }
    if let Some(core_error) = error.downcast_ref::<OrthochipError>() {
        return from_core(core_error);
    }
    from_anyhow(error)
}

/// Command-line flag and environment variable that set a configuration key
fn config_key_sources(key: &str) -> Option<(&'static str, &'static str)> {
    match key {
        "points_path" => Some(("--points", "ORTHOCHIP_POINTS")),
        "catalog_path" => Some(("--catalog", "ORTHOCHIP_CATALOG")),
        "outpath" => Some(("--outpath", "ORTHOCHIP_OUTPATH")),
        "pixel_size" => Some(("--pixel-size", "ORTHOCHIP_PIXEL_SIZE")),
        "resample_size" => Some(("--resample-size", "ORTHOCHIP_RESAMPLE_SIZE")),
        "shape" => Some(("--shape", "ORTHOCHIP_SHAPE")),
        "mask_labels" => Some(("--mask-labels", "ORTHOCHIP_MASK_LABELS")),
        "mode" => Some(("--mode", "ORTHOCHIP_MODE")),
        "workers" => Some(("--workers", "ORTHOCHIP_WORKERS")),
        "nodata_mode" => Some(("--nodata-mode", "ORTHOCHIP_NODATA_MODE")),
        "nodata_value" => Some(("--nodata-value", "ORTHOCHIP_NODATA_VALUE")),
        _ => None,
    }
}

/// Create error for a required configuration value nobody provided
pub fn missing_config(key: &str) -> CliError {
    let mut error = CliError::new(format!("Missing configuration: {}", key))
        .with_context("This value has no default and was not set in any configuration layer.")
        .with_suggestion(format!("Set `{}` in orthochip.toml", key));
    if let Some((flag, env)) = config_key_sources(key) {
        error = error
            .with_suggestion(format!("Or pass {} on the command line", flag))
            .with_suggestion(format!("Or export {}", env));
    }
    error.with_help("Run: orthochip config")
}

/// Create error for invalid configuration
pub fn invalid_config(key: &str, reason: &str) -> CliError {
    CliError::new(format!("Invalid configuration: {}", key))
        .with_context(format!("Configuration value is invalid.\n\nReason: {}", reason))
        .with_suggestion("Check orthochip.toml and ORTHOCHIP_* variables")
        .with_suggestion("Inspect the effective values and their sources: orthochip config")
        .with_help("Run: orthochip run --help")
}

/// Create error for an output path that cannot hold tiles
pub fn invalid_outpath(path: &Path) -> CliError {
    CliError::new("Output path is not a directory")
        .with_context(format!("Tiles and the batch log are written into a directory.\n\nPath: {}", path.display()))
        .with_suggestion("Point --outpath at a directory")
        .with_suggestion("Or remove the file occupying that path")
}

/// Create error for missing catalog file
pub fn catalog_not_found(path: &Path) -> CliError {
    CliError::new("Catalog file not found")
        .with_context(format!("The catalog GeoJSON does not exist.\n\nPath: {}", path.display()))
        .with_suggestion("Check the path passed to --catalog or set in catalog_path")
        .with_suggestion("Relative paths in orthochip.toml resolve against the file's directory")
        .with_help("Run: orthochip config")
}

/// Create error for a catalog without any sheet
pub fn empty_catalog(path: &Path) -> CliError {
    CliError::new("Catalog has no sheets")
        .with_context(format!("The catalog contains no coverage features.\n\nPath: {}", path.display()))
        .with_suggestion("Add one feature per imagery sheet with rgb_raster, vector_url and valid_from")
}

/// Create error for missing batch log
pub fn batch_log_not_found(path: &Path) -> CliError {
    CliError::new("Batch log not found")
        .with_context(format!("No batch has written a log here yet.\n\nPath: {}", path.display()))
        .with_suggestion("Run a batch first: orthochip run")
        .with_suggestion("Or pass the log explicitly: orthochip status --log <CSV>")
        .with_help("Run: orthochip status --help")
}

/// Convert a library error into operator guidance
pub fn from_core(error: &OrthochipError) -> CliError {
    match error {
        OrthochipError::ConfigMissing { key } => missing_config(key),
        OrthochipError::ConfigInvalid { key, reason } => invalid_config(key, reason),
        OrthochipError::Validation { field, reason } => invalid_config(field, reason),
        OrthochipError::InvalidOutpath { path } => invalid_outpath(path),
        other => CliError::new(other.to_string()),
    }
}

/// Convert anyhow::Error to CliError with context
pub fn from_anyhow(error: &anyhow::Error) -> CliError {
    let message = format!("{:#}", error);

    if message.contains("No such file or directory") {
        CliError::new("File not found")
            .with_context(format!("Error: {}", message))
            .with_suggestion("Check the file path and try again")
    } else if message.to_lowercase().contains("permission denied") {
        CliError::new("Permission denied")
            .with_context(format!("Error: {}", message))
            .with_suggestion("Check file permissions")
            .with_suggestion("Or run with appropriate privileges")
    } else {
        CliError::new(message)
    }
}
