use kycface_core::{ConfigError, PipelineConfig};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Largest accepted image payload unless overridden.
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ConfigLoadError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid pipeline configuration: {0}")]
    Pipeline(#[from] ConfigError),
}

/// Which message bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    Session,
    System,
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Bus to serve on (default: session).
    pub bus: BusKind,
    /// Number of engine threads, each with its own loaded models.
    pub workers: usize,
    /// Upper bound for a single image payload.
    pub max_image_bytes: usize,
    /// Sweep, geometry and tier settings.
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Load configuration from `KYCFACE_*` environment variables with defaults.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigLoadError> {
        let model_dir = var("KYCFACE_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| default_model_dir(&var));

        let bus = match var("KYCFACE_BUS").as_deref() {
            None | Some("session") => BusKind::Session,
            Some("system") => BusKind::System,
            Some(other) => {
                return Err(ConfigLoadError::InvalidValue {
                    key: "KYCFACE_BUS",
                    value: other.to_string(),
                })
            }
        };

        let workers = parse_or(&var, "KYCFACE_WORKERS", 1usize)?;
        if workers == 0 {
            return Err(ConfigLoadError::InvalidValue {
                key: "KYCFACE_WORKERS",
                value: "0".into(),
            });
        }

        let pipeline = match var("KYCFACE_CONFIG") {
            Some(path) => load_pipeline_config(Path::new(&path))?,
            None => PipelineConfig::default(),
        };
        pipeline.validate()?;

        Ok(Self {
            model_dir,
            bus,
            workers,
            max_image_bytes: parse_or(&var, "KYCFACE_MAX_IMAGE_BYTES", DEFAULT_MAX_IMAGE_BYTES)?,
            pipeline,
        })
    }
}

/// Read a TOML file with optional `[sweep]`, `[geometry]` and `[tiers]`
/// tables. Missing tables and keys keep their defaults.
pub fn load_pipeline_config(path: &Path) -> Result<PipelineConfig, ConfigLoadError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_pipeline_config(&text).map_err(|source| ConfigLoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_pipeline_config(text: &str) -> Result<PipelineConfig, toml::de::Error> {
    toml::from_str(text)
}

fn default_model_dir(var: &impl Fn(&str) -> Option<String>) -> PathBuf {
    var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("kycface/models")
}

fn parse_or<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigLoadError> {
    match var(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigLoadError::InvalidValue { key, value }),
    }
}
