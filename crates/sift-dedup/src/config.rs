//! Run configuration.
//!
//! Values come from, in increasing priority: defaults, an optional JSON
//! config file, `SIFT_*` environment variables, then command-line flags.

use crate::signature::SignatureConfig;
use crate::store::StoreConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable overriding [`RunConfig::workers`].
pub const ENV_WORKERS: &str = "SIFT_WORKERS";
/// Environment variable overriding [`RunConfig::blacklist_path`].
pub const ENV_BLACKLIST: &str = "SIFT_BLACKLIST";
/// Environment variable overriding [`RunConfig::output_dir`].
pub const ENV_OUTPUT_DIR: &str = "SIFT_OUTPUT_DIR";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid value for {name}: {value}")]
    Env { name: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// How documents are compared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DedupMode {
    /// One online pass against a shared store.
    #[default]
    IntraFile,
    /// Each file's documents against every other file's signatures.
    CrossFile,
}

/// Who owns the shared store during a parallel run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreBackendKind {
    /// `Arc<Mutex<_>>` shared by the workers.
    #[default]
    Mutex,
    /// A dedicated broker thread serving requests over a channel.
    Broker,
}

/// Parameters of the optional content filters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentFilterConfig {
    /// Minimum document length in characters.
    pub min_chars: Option<usize>,
    /// Maximum document length in characters.
    pub max_chars: Option<usize>,
    /// Reject long texts padded with spaces.
    pub space_filter: bool,
    /// Reject documents tagged with header/footer/noisy quality warnings.
    pub quality_warnings: bool,
    /// Newline-delimited block list.
    pub ng_words_path: Option<PathBuf>,
}

/// Everything a run needs to know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Input files or glob patterns.
    pub inputs: Vec<String>,
    pub output_dir: PathBuf,
    /// JSON field holding the document text.
    pub text_field: String,
    /// Fields copied into document metadata.
    pub metadata_keys: Vec<String>,
    /// Nested object holding the metadata keys, if any.
    pub metadata_root: Option<String>,
    /// Reject malformed records instead of aborting.
    pub ignore_errors: bool,
    pub blacklist_path: Option<PathBuf>,
    pub recreate_blacklist: bool,
    /// Seed `seen` from the loaded blacklist.
    pub seed_seen: bool,
    pub workers: usize,
    pub mode: DedupMode,
    pub store_backend: StoreBackendKind,
    /// Register documents with the store (otherwise only the blacklist is consulted).
    pub online: bool,
    /// Archive for cross-file rejections. Defaults to `<output_dir>/removed.jsonl`.
    pub removed_path: Option<PathBuf>,
    pub signature: SignatureConfig,
    pub content: ContentFilterConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            output_dir: PathBuf::from("output"),
            text_field: "text".to_string(),
            metadata_keys: Vec::new(),
            metadata_root: None,
            ignore_errors: false,
            blacklist_path: None,
            recreate_blacklist: false,
            seed_seen: true,
            workers: 1,
            mode: DedupMode::default(),
            store_backend: StoreBackendKind::default(),
            online: true,
            removed_path: None,
            signature: SignatureConfig::default(),
            content: ContentFilterConfig::default(),
        }
    }
}

impl RunConfig {
    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay `SIFT_*` environment variables.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    fn apply_vars(mut self, get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(value) = get(ENV_WORKERS) {
            self.workers = value.trim().parse().map_err(|_| ConfigError::Env {
                name: ENV_WORKERS,
                value,
            })?;
        }
        if let Some(value) = get(ENV_BLACKLIST) {
            self.blacklist_path = Some(PathBuf::from(value));
        }
        if let Some(value) = get(ENV_OUTPUT_DIR) {
            self.output_dir = PathBuf::from(value);
        }
        Ok(self)
    }

    pub fn with_inputs(mut self, inputs: Vec<String>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_blacklist(mut self, path: impl Into<PathBuf>, recreate: bool) -> Self {
        self.blacklist_path = Some(path.into());
        self.recreate_blacklist = recreate;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_mode(mut self, mode: DedupMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_store_backend(mut self, backend: StoreBackendKind) -> Self {
        self.store_backend = backend;
        self
    }

    pub fn with_signature(mut self, signature: SignatureConfig) -> Self {
        self.signature = signature;
        self
    }

    /// Store settings derived from this config.
    #[must_use]
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            blacklist_path: self.blacklist_path.clone(),
            recreate: self.recreate_blacklist,
            seed_seen: self.seed_seen,
        }
    }

    /// Where cross-file rejections are archived.
    #[must_use]
    pub fn removed_path(&self) -> PathBuf {
        self.removed_path
            .clone()
            .unwrap_or_else(|| self.output_dir.join("removed.jsonl"))
    }

    /// Check the values that would otherwise fail deep inside a run.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.text_field.is_empty() {
            return Err(ConfigError::Invalid("text field must not be empty".into()));
        }
        let sig = &self.signature;
        if sig.ngram_size == 0 || sig.num_bands == 0 || sig.rows_per_band == 0 {
            return Err(ConfigError::Invalid(
                "ngram size, bands and rows per band must all be at least 1".into(),
            ));
        }
        if let (Some(min), Some(max)) = (self.content.min_chars, self.content.max_chars) {
            if min > max {
                return Err(ConfigError::Invalid(format!(
                    "min chars ({min}) exceeds max chars ({max})"
                )));
            }
        }
        Ok(())
    }
}
