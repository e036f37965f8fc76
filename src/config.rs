//! Explicit configuration passed to constructors.
//!
//! Everything the core needs from its environment (engine executables, weight
//! files, corpus and cache locations, pool sizes) is collected here once and
//! validated up front. Nothing is re-read while jobs are running.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::backend::BackendKind;
use crate::config_error;
use crate::errors::Result;

/// Startup configuration for one engine executable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub executable: String,
    /// Extra command-line arguments passed to the executable
    pub args: Vec<String>,
    /// Network weights file (neural backends only)
    pub weights: Option<PathBuf>,
    /// Additional `setoption` name/value pairs sent after the handshake
    pub options: BTreeMap<String, String>,
    /// How long to wait for the engine to exit after `quit` before killing it
    pub quit_grace_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            executable: String::new(),
            args: Vec::new(),
            weights: None,
            options: BTreeMap::new(),
            quit_grace_ms: 500,
        }
    }
}

impl EngineConfig {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            ..Self::default()
        }
    }

    pub fn with_weights(mut self, weights: impl Into<PathBuf>) -> Self {
        self.weights = Some(weights.into());
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(name.into(), value.into());
        self
    }

    pub fn is_configured(&self) -> bool {
        !self.executable.trim().is_empty()
    }
}

/// Exploration defaults used by the explorer binary and the trainer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorerConfig {
    pub cache_path: Option<PathBuf>,
    pub num_workers: usize,
    pub max_depth: usize,
    /// Minimum share of a parent's occurrences a move needs to be expanded
    pub stop_threshold: f64,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            cache_path: None,
            num_workers: 2,
            max_depth: 3,
            stop_threshold: 0.05,
        }
    }
}

/// Reply policy for training sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Sampled replies seen fewer times than this end the session
    pub min_occurrences: u64,
    /// Minimum share a reply needs to be eligible for sampling
    pub sample_threshold: f64,
    /// Number of hint moves returned with each evaluation
    pub n_hints: usize,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            min_occurrences: 10,
            sample_threshold: 0.05,
            n_hints: 3,
        }
    }
}

/// Top-level configuration for the analysis core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub classical: EngineConfig,
    pub neural: EngineConfig,
    pub book_path: Option<PathBuf>,
    pub num_workers: usize,
    pub explorer: ExplorerConfig,
    pub trainer: TrainerConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            classical: EngineConfig::new("stockfish"),
            neural: EngineConfig::new("lc0"),
            book_path: None,
            num_workers: 2,
            explorer: ExplorerConfig::default(),
            trainer: TrainerConfig::default(),
        }
    }
}

impl AnalysisConfig {
    /// Load configuration from a JSON file and validate it.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: AnalysisConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from process environment variables.
    ///
    /// Recognized keys: `STOCKFISH_PATH`, `LCZERO_PATH`, `LCZERO_WEIGHTS`,
    /// `BOOK_PATH`, `EXPLORER_CACHE_PATH`, `ANALYSIS_WORKERS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`AnalysisConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = AnalysisConfig::default();

        if let Some(path) = lookup("STOCKFISH_PATH") {
            config.classical.executable = path;
        }
        if let Some(path) = lookup("LCZERO_PATH") {
            config.neural.executable = path;
        }
        if let Some(weights) = lookup("LCZERO_WEIGHTS") {
            config.neural.weights = Some(PathBuf::from(weights));
        }
        if let Some(book) = lookup("BOOK_PATH") {
            config.book_path = Some(PathBuf::from(book));
        }
        if let Some(cache) = lookup("EXPLORER_CACHE_PATH") {
            config.explorer.cache_path = Some(PathBuf::from(cache));
        }
        if let Some(workers) = lookup("ANALYSIS_WORKERS") {
            config.num_workers = workers.trim().parse().map_err(|_| {
                config_error!("ANALYSIS_WORKERS must be a positive integer, got '{}'", workers)
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Engine configuration for a backend kind.
    pub fn engine(&self, kind: BackendKind) -> &EngineConfig {
        match kind {
            BackendKind::Classical => &self.classical,
            BackendKind::Neural => &self.neural,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_workers == 0 {
            return Err(config_error!("Number of workers must be a positive integer"));
        }
        if self.explorer.num_workers == 0 {
            return Err(config_error!("Number of explorer workers must be a positive integer"));
        }
        if !(0.0..=1.0).contains(&self.explorer.stop_threshold) {
            return Err(config_error!(
                "stop_threshold must be within [0, 1], got {}",
                self.explorer.stop_threshold
            ));
        }
        if !(0.0..=1.0).contains(&self.trainer.sample_threshold) {
            return Err(config_error!(
                "sample_threshold must be within [0, 1], got {}",
                self.trainer.sample_threshold
            ));
        }
        if self.trainer.n_hints == 0 {
            return Err(config_error!("n_hints must be at least 1"));
        }
        Ok(())
    }
}
