//! Error types for loading and interpreting hybrid cache configs.
//!
//! Every schema error carries the [`FieldPath`] of the offending value so the
//! message points straight at the line a user has to fix.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// A dotted/indexed path into the config document, e.g.
/// `hybrid_strategies[2].heavy_hitter_frac`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldPath {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

impl FieldPath {
    /// The document root.
    pub fn root() -> Self {
        Self::default()
    }

    /// Path extended by a mapping key.
    pub fn key(&self, key: impl Into<String>) -> Self {
        let mut path = self.clone();
        path.segments.push(Segment::Key(key.into()));
        path
    }

    /// Path extended by a sequence index.
    pub fn index(&self, idx: usize) -> Self {
        let mut path = self.clone();
        path.segments.push(Segment::Index(idx));
        path
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "<root>");
        }
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Key(key) if i == 0 => write!(f, "{key}")?,
                Segment::Key(key) => write!(f, ".{key}")?,
                Segment::Index(idx) => write!(f, "[{idx}]")?,
            }
        }
        Ok(())
    }
}

/// Errors raised while loading, validating or planning a hybrid cache config.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed document: {message}")]
    MalformedDocument {
        message: String,
        /// 1-based line and column, when the YAML parser reports one.
        location: Option<(usize, usize)>,
    },

    #[error("unknown field `{path}`")]
    UnknownField { path: FieldPath },

    #[error("missing required field `{path}`")]
    MissingRequiredField { path: FieldPath },

    #[error("`{path}` must be {expected}, found {found}")]
    InvalidType {
        path: FieldPath,
        expected: &'static str,
        found: String,
    },

    #[error("`{path}` = {value} is out of range: {constraint}")]
    OutOfRangeValue {
        path: FieldPath,
        value: String,
        constraint: &'static str,
    },

    #[error("`{path}` = {value} is invalid: {reason}")]
    InvalidValue {
        path: FieldPath,
        value: String,
        reason: &'static str,
    },

    #[error("`{path}` is empty; the strategy chain needs at least one entry")]
    EmptyStrategyChain { path: FieldPath },

    #[error("`{path}` names unknown strategy {name:?}")]
    UnknownStrategy { path: FieldPath, name: String },

    #[error("`{path}` has {found} entries; expected 1 or {expected} (one per layer)")]
    LayerCountMismatch {
        path: FieldPath,
        expected: usize,
        found: usize,
    },

    #[error("no model preset matches {0:?}")]
    UnknownModel(String),

    #[error("model name {name:?} matches several presets equally well: {candidates:?}")]
    AmbiguousModel {
        name: String,
        candidates: Vec<String>,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_yaml::Error),
}

impl ConfigError {
    /// Field path of the offending value, for schema errors.
    pub fn path(&self) -> Option<&FieldPath> {
        match self {
            ConfigError::UnknownField { path }
            | ConfigError::MissingRequiredField { path }
            | ConfigError::InvalidType { path, .. }
            | ConfigError::OutOfRangeValue { path, .. }
            | ConfigError::InvalidValue { path, .. }
            | ConfigError::EmptyStrategyChain { path }
            | ConfigError::UnknownStrategy { path, .. }
            | ConfigError::LayerCountMismatch { path, .. } => Some(path),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_path_display() {
        let path = FieldPath::root()
            .key("hybrid_strategies")
            .index(2)
            .key("heavy_hitter_frac");
        assert_eq!(path.to_string(), "hybrid_strategies[2].heavy_hitter_frac");
        assert_eq!(FieldPath::root().to_string(), "<root>");
    }

    #[test]
    fn test_error_message_names_path() {
        let err = ConfigError::OutOfRangeValue {
            path: FieldPath::root().key("min_recovery_frac"),
            value: "1.5".to_string(),
            constraint: "must lie in (0, 1]",
        };
        assert_eq!(
            err.to_string(),
            "`min_recovery_frac` = 1.5 is out of range: must lie in (0, 1]"
        );
        assert_eq!(err.path().unwrap().to_string(), "min_recovery_frac");
    }
}
