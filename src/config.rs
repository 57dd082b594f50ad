//! Hybrid KV-cache compression config.
//!
//! The config is loaded from a YAML document (see `configs/hybrid.yaml`) and is
//! immutable afterwards. Loader policy (how to treat unknown strategy tags and
//! missing per-strategy parameters) lives in [`LoadOptions`].

use std::fmt;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, warn};

use crate::document;
use crate::error::{ConfigError, FieldPath, Result};
use crate::strategy::chain::HybridChain;
use crate::strategy::fraction::Fraction;
use crate::strategy::sub::SubStrategy;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "kv-cache-hybrid",
    about = "Validate and inspect hybrid KV-cache compression configs"
)]
pub struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Load a config and report errors and advisories.
    Validate {
        #[command(flatten)]
        load: LoadArgs,
    },

    /// Load a config and print it in canonical form.
    Normalize {
        #[command(flatten)]
        load: LoadArgs,

        /// Write to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Expand a config over a model's layers and print the per-layer plan.
    Plan {
        #[command(flatten)]
        load: LoadArgs,

        /// Model preset name (fuzzy matched, e.g. "Meta-Llama-3-8B-Instruct").
        #[arg(short, long)]
        model: String,

        /// Prompt length to check for cache overflow.
        #[arg(long)]
        prompt_len: Option<usize>,
    },
}

/// Arguments shared by every subcommand that loads a config.
#[derive(Args, Debug, Clone)]
pub struct LoadArgs {
    /// Path to the config file (YAML).
    #[arg(default_value = "configs/hybrid.yaml")]
    pub config: PathBuf,

    /// Keep unrecognised strategy tags instead of rejecting them.
    #[arg(long)]
    pub allow_unknown_strategies: bool,

    /// Fill missing heavy_hitter_frac / recent_window with placeholder values.
    #[arg(long)]
    pub fill_placeholders: bool,

    /// Placeholder heavy_hitter_frac (with --fill-placeholders).
    #[arg(long, default_value_t = PlaceholderParams::DEFAULT_FRAC)]
    pub placeholder_heavy_hitter_frac: f64,

    /// Placeholder recent_window (with --fill-placeholders).
    #[arg(long, default_value_t = PlaceholderParams::DEFAULT_FRAC)]
    pub placeholder_recent_window: f64,
}

impl LoadArgs {
    /// Translate the flags into loader options.
    pub fn load_options(&self) -> Result<LoadOptions> {
        let unknown_strategies = if self.allow_unknown_strategies {
            UnknownStrategyPolicy::Flag
        } else {
            UnknownStrategyPolicy::Reject
        };

        let fill_placeholders = if self.fill_placeholders {
            Some(PlaceholderParams::new(
                self.placeholder_heavy_hitter_frac,
                self.placeholder_recent_window,
            )?)
        } else {
            None
        };

        Ok(LoadOptions {
            unknown_strategies,
            fill_placeholders,
        })
    }
}

/// What to do with a `strategy` tag the loader does not know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownStrategyPolicy {
    /// Fail the load with [`ConfigError::UnknownStrategy`].
    #[default]
    Reject,
    /// Keep it as [`SubStrategy::Custom`] and record an advisory.
    Flag,
}

/// Values substituted for missing per-strategy parameters.
///
/// These are provisional numbers, not tuned constants; override them per model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaceholderParams {
    pub heavy_hitter_frac: Fraction,
    pub recent_window: Fraction,
}

impl PlaceholderParams {
    pub const DEFAULT_FRAC: f64 = 0.3;

    pub fn new(heavy_hitter_frac: f64, recent_window: f64) -> Result<Self> {
        let placeholder = FieldPath::root().key("placeholder");
        Ok(Self {
            heavy_hitter_frac: fraction_arg(placeholder.key("heavy_hitter_frac"), heavy_hitter_frac)?,
            recent_window: fraction_arg(placeholder.key("recent_window"), recent_window)?,
        })
    }
}

impl Default for PlaceholderParams {
    fn default() -> Self {
        let frac = Fraction::new(Self::DEFAULT_FRAC).unwrap_or(Fraction::ONE);
        Self {
            heavy_hitter_frac: frac,
            recent_window: frac,
        }
    }
}

fn fraction_arg(path: FieldPath, value: f64) -> Result<Fraction> {
    Fraction::new(value).ok_or_else(|| ConfigError::OutOfRangeValue {
        path,
        value: value.to_string(),
        constraint: Fraction::CONSTRAINT,
    })
}

/// Loader policy. The default is strict: unknown tags and missing parameters
/// are errors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadOptions {
    pub unknown_strategies: UnknownStrategyPolicy,
    pub fill_placeholders: Option<PlaceholderParams>,
}

/// A non-fatal finding about an otherwise valid config.
#[derive(Debug, Clone, PartialEq)]
pub enum Advisory {
    /// The chain does not end in a no-eviction strategy, so the last entry
    /// is taken even when it misses the recovery threshold.
    ChainWithoutFallback { last: String },
    /// An unrecognised strategy tag was kept.
    UnknownStrategyKept { path: FieldPath, name: String },
    /// A missing parameter was filled from [`PlaceholderParams`].
    PlaceholderApplied { path: FieldPath, value: Fraction },
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Advisory::ChainWithoutFallback { last } => write!(
                f,
                "hybrid_strategies ends in {last:?}, not a no-eviction strategy such as \"full\""
            ),
            Advisory::UnknownStrategyKept { path, name } => {
                write!(f, "`{path}` uses unrecognised strategy {name:?}")
            }
            Advisory::PlaceholderApplied { path, value } => {
                write!(f, "`{path}` missing, using placeholder {value}")
            }
        }
    }
}

/// Outcome of a successful load.
#[derive(Debug, Clone)]
pub struct LoadReport {
    pub config: HybridCacheConfig,
    pub advisories: Vec<Advisory>,
}

/// The hybrid cache compression config.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HybridCacheConfig {
    cache_strategy: Vec<String>,
    prompt_compression_strategy: Vec<String>,
    max_cache_length: Vec<Fraction>,
    global_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    min_recovery_frac: Option<Fraction>,
    hybrid_strategies: Vec<SubStrategy>,
}

impl HybridCacheConfig {
    /// Strategy name that routes a layer through the hybrid chain.
    pub const HYBRID: &'static str = "hybrid";

    /// Build a config programmatically, enforcing the same invariants as the
    /// loader.
    pub fn new(
        cache_strategy: Vec<String>,
        prompt_compression_strategy: Vec<String>,
        max_cache_length: Vec<Fraction>,
        global_tokens: usize,
        min_recovery_frac: Option<Fraction>,
        hybrid_strategies: Vec<SubStrategy>,
    ) -> Result<Self> {
        let root = FieldPath::root();
        document::check_names(&root.key("cache_strategy"), &cache_strategy)?;
        document::check_names(
            &root.key("prompt_compression_strategy"),
            &prompt_compression_strategy,
        )?;
        if max_cache_length.is_empty() {
            return Err(ConfigError::InvalidValue {
                path: root.key("max_cache_length"),
                value: "[]".to_string(),
                reason: "needs at least one entry",
            });
        }
        if hybrid_strategies.is_empty() {
            return Err(ConfigError::EmptyStrategyChain {
                path: root.key("hybrid_strategies"),
            });
        }

        Ok(Self {
            cache_strategy,
            prompt_compression_strategy,
            max_cache_length,
            global_tokens,
            min_recovery_frac,
            hybrid_strategies,
        })
    }

    /// Parse a YAML document with strict options. Advisories are logged.
    pub fn from_yaml_str(source: &str) -> Result<Self> {
        let report = Self::parse_with(source, &LoadOptions::default())?;
        Ok(report.config)
    }

    /// Parse a YAML document with explicit loader options.
    pub fn parse_with(source: &str, options: &LoadOptions) -> Result<LoadReport> {
        let report = document::parse(source, options)?;
        for advisory in &report.advisories {
            warn!(%advisory, "Config advisory");
        }
        debug!(
            layers = report.config.cache_strategy.len(),
            global_tokens = report.config.global_tokens,
            chain = report.config.hybrid_strategies.len(),
            min_recovery_frac = ?report.config.min_recovery_frac.map(Fraction::get),
            "Hybrid cache config parsed"
        );
        Ok(report)
    }

    /// Load from a YAML file with strict options.
    pub fn load(path: &Path) -> Result<Self> {
        let report = Self::load_with(path, &LoadOptions::default())?;
        Ok(report.config)
    }

    /// Load from a YAML file with explicit loader options.
    pub fn load_with(path: &Path, options: &LoadOptions) -> Result<LoadReport> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), bytes = source.len(), "Loading hybrid cache config");
        Self::parse_with(&source, options)
    }

    /// Canonical YAML rendering. Comments from the source are not kept.
    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Write the canonical YAML rendering to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let yaml = self.to_yaml_string()?;
        std::fs::write(path, yaml).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn cache_strategy(&self) -> &[String] {
        &self.cache_strategy
    }

    pub fn prompt_compression_strategy(&self) -> &[String] {
        &self.prompt_compression_strategy
    }

    pub fn max_cache_length(&self) -> &[Fraction] {
        &self.max_cache_length
    }

    pub fn global_tokens(&self) -> usize {
        self.global_tokens
    }

    pub fn min_recovery_frac(&self) -> Option<Fraction> {
        self.min_recovery_frac
    }

    /// Threshold for the chain walk. Unset means only lossless strategies
    /// qualify.
    pub fn recovery_threshold(&self) -> Fraction {
        self.min_recovery_frac.unwrap_or(Fraction::ONE)
    }

    pub fn hybrid_strategies(&self) -> &[SubStrategy] {
        &self.hybrid_strategies
    }

    pub fn chain(&self) -> HybridChain<'_> {
        // `new` and the loader both reject an empty chain.
        HybridChain::from_non_empty(&self.hybrid_strategies)
    }

    /// Whether any layer routes through the hybrid chain.
    pub fn uses_hybrid(&self) -> bool {
        self.cache_strategy.iter().any(|s| s == Self::HYBRID)
    }

    /// Findings that do not stop the load.
    pub fn advisories(&self) -> Vec<Advisory> {
        let mut advisories = Vec::new();
        for (idx, strategy) in self.hybrid_strategies.iter().enumerate() {
            if let SubStrategy::Custom(custom) = strategy {
                advisories.push(Advisory::UnknownStrategyKept {
                    path: FieldPath::root()
                        .key("hybrid_strategies")
                        .index(idx)
                        .key("strategy"),
                    name: custom.name.clone(),
                });
            }
        }
        let chain = self.chain();
        if !chain.has_fallback() {
            advisories.push(Advisory::ChainWithoutFallback {
                last: chain.last().name().to_string(),
            });
        }
        advisories
    }
}
